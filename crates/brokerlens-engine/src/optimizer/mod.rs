//! Funnel definition and conversion-rate analytics.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{info, warn};

use brokerlens_core::cache::{self, CacheOptions, CacheStore};
use brokerlens_core::collaborators::{CompetitiveSource, Forecaster, SeoAuditor};
use brokerlens_core::error::{AnalyticsError, AnalyticsResult};
use brokerlens_core::priority::Priority;
use brokerlens_core::time::generate_id;

use crate::tracker::{count_funnel, UserBehaviorTracker};

mod attribution;
mod funnel;
mod recommendations;

pub use attribution::{
    ChannelAttribution, JourneyPath, MultiChannelAttribution, RevenueAttribution, RevenueGroup,
    TouchpointAnalysis,
};
pub use funnel::{
    compute_performance, default_goals, default_steps, fallback_rate, AttributionRow,
    ConversionGoal, DropOffPoint, Funnel, FunnelConfig, FunnelPerformance, FunnelStep,
    SeoContribution, SeoIntegration, StepMetric, StepType,
};
pub(crate) use recommendations::daily_series;
pub use recommendations::{
    OptimizationInsights, PageOptimization, PageOptimizationKind, PredictiveInsights, TestIdea,
};

const FUNNEL_TTL: Duration = Duration::from_secs(24 * 60 * 60);
const FUNNEL_PERFORMANCE_TTL: Duration = Duration::from_secs(10 * 60);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OptimizationKind {
    Content,
    Ux,
    Technical,
    Seo,
    Conversion,
    Performance,
}

impl OptimizationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OptimizationKind::Content => "content",
            OptimizationKind::Ux => "ux",
            OptimizationKind::Technical => "technical",
            OptimizationKind::Seo => "seo",
            OptimizationKind::Conversion => "conversion",
            OptimizationKind::Performance => "performance",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Effort {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OptimizationRecommendation {
    pub id: String,
    pub kind: OptimizationKind,
    pub priority: Priority,
    pub title: String,
    pub description: String,
    /// Page URL or funnel step the change applies to.
    pub target: String,
    /// Expected uplift in percentage points.
    pub expected_impact: f64,
    pub effort: Effort,
    pub implementation: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExecutionResult {
    pub success: bool,
    pub optimization_id: String,
    pub changes: Vec<String>,
    pub expected_impact: f64,
    pub rollback_plan: String,
    pub executed_at: DateTime<Utc>,
}

pub struct ConversionOptimizer {
    cache: Arc<dyn CacheStore>,
    tracker: Arc<UserBehaviorTracker>,
    seo: Arc<dyn SeoAuditor>,
    forecaster: Arc<dyn Forecaster>,
    competitive: Arc<dyn CompetitiveSource>,
    funnels: RwLock<HashMap<String, Funnel>>,
    queue: RwLock<Vec<OptimizationRecommendation>>,
    default_funnel_id: String,
}

impl ConversionOptimizer {
    pub fn new(
        cache: Arc<dyn CacheStore>,
        tracker: Arc<UserBehaviorTracker>,
        seo: Arc<dyn SeoAuditor>,
        forecaster: Arc<dyn Forecaster>,
        competitive: Arc<dyn CompetitiveSource>,
    ) -> Self {
        let default_funnel = Funnel::from_config(
            FunnelConfig {
                name: Some("Forex Broker Comparison Funnel".to_string()),
                description: Some(
                    "Landing to category to comparison to broker signup".to_string(),
                ),
                ..FunnelConfig::default()
            },
            Utc::now(),
        );
        let default_funnel_id = default_funnel.id.clone();
        let mut funnels = HashMap::new();
        funnels.insert(default_funnel.id.clone(), default_funnel);
        Self {
            cache,
            tracker,
            seo,
            forecaster,
            competitive,
            funnels: RwLock::new(funnels),
            queue: RwLock::new(Vec::new()),
            default_funnel_id,
        }
    }

    pub fn default_funnel_id(&self) -> &str {
        &self.default_funnel_id
    }

    pub async fn create_funnel(&self, config: FunnelConfig) -> String {
        let funnel = Funnel::from_config(config, Utc::now());
        let id = funnel.id.clone();
        cache::store(
            self.cache.as_ref(),
            &format!("conversion_funnel:{id}"),
            &funnel,
            CacheOptions::ttl(FUNNEL_TTL).tagged("conversion_funnels"),
        )
        .await;
        info!(funnel_id = %id, steps = funnel.steps.len(), name = %funnel.name, "funnel created");
        self.funnels.write().await.insert(id.clone(), funnel);
        id
    }

    pub async fn funnel(&self, funnel_id: &str) -> Option<Funnel> {
        self.funnels.read().await.get(funnel_id).cloned()
    }

    pub async fn list_funnels(&self) -> Vec<Funnel> {
        let mut funnels: Vec<Funnel> = self.funnels.read().await.values().cloned().collect();
        funnels.sort_by_key(|f| f.created_at);
        funnels
    }

    pub async fn analyze_funnel(&self, funnel_id: &str) -> AnalyticsResult<FunnelPerformance> {
        let funnel = self
            .funnel(funnel_id)
            .await
            .ok_or_else(|| AnalyticsError::not_found(format!("Funnel {funnel_id}")))?;
        let key = format!("funnel_performance:{funnel_id}");
        if let Some(hit) = cache::cached::<FunnelPerformance>(self.cache.as_ref(), &key).await {
            return Ok(hit);
        }

        let sessions = self.tracker.sessions(None).await;
        let counts = (!sessions.is_empty()).then(|| count_funnel(&sessions, &funnel.step_urls()));
        let mut performance = compute_performance(&funnel, counts.as_ref(), &sessions, Utc::now());
        performance.step_optimizations = self
            .enqueue(std::mem::take(&mut performance.step_optimizations))
            .await;

        cache::store(
            self.cache.as_ref(),
            &key,
            &performance,
            CacheOptions::ttl(FUNNEL_PERFORMANCE_TTL).tagged("funnel_performance"),
        )
        .await;
        info!(
            funnel_id,
            estimated = performance.estimated,
            overall_rate = performance.overall_conversion_rate,
            "funnel analyzed"
        );
        Ok(performance)
    }

    /// Queue recommendations, skipping ones already pending for the same
    /// target. Returns the queued entries, so callers see executable ids.
    async fn enqueue(
        &self,
        recommendations: Vec<OptimizationRecommendation>,
    ) -> Vec<OptimizationRecommendation> {
        if recommendations.is_empty() {
            return recommendations;
        }
        let mut queue = self.queue.write().await;
        let mut queued = Vec::with_capacity(recommendations.len());
        for rec in recommendations {
            match queue
                .iter()
                .find(|q| q.title == rec.title && q.target == rec.target)
            {
                Some(existing) => queued.push(existing.clone()),
                None => {
                    queue.push(rec.clone());
                    queued.push(rec);
                }
            }
        }
        queued
    }

    /// Queue a recommendation produced elsewhere. Returns its id.
    pub async fn submit_recommendation(&self, mut recommendation: OptimizationRecommendation) -> String {
        if recommendation.id.is_empty() {
            recommendation.id = generate_id("opt");
        }
        let id = recommendation.id.clone();
        self.queue.write().await.push(recommendation);
        id
    }

    pub async fn pending_recommendations(&self) -> Vec<OptimizationRecommendation> {
        self.queue.read().await.clone()
    }

    /// Record a recommendation as applied and remove it from the queue.
    ///
    /// Critical recommendations need `auto_approve`.
    pub async fn execute_optimization(
        &self,
        optimization_id: &str,
        auto_approve: bool,
    ) -> AnalyticsResult<ExecutionResult> {
        let mut queue = self.queue.write().await;
        let index = queue
            .iter()
            .position(|r| r.id == optimization_id)
            .ok_or_else(|| AnalyticsError::not_found(format!("Optimization {optimization_id}")))?;
        if queue[index].priority == Priority::Critical && !auto_approve {
            return Err(AnalyticsError::ApprovalRequired(format!(
                "critical optimization {optimization_id} needs auto_approve"
            )));
        }
        let rec = queue.remove(index);
        drop(queue);
        // Cached funnel analyses may still list the executed recommendation.
        if let Err(e) = self.cache.clear_by_tag("funnel_performance").await {
            warn!(error = %e, "funnel performance cache invalidation failed");
        }

        info!(
            optimization_id,
            kind = rec.kind.as_str(),
            priority = rec.priority.as_str(),
            "optimization executed"
        );
        Ok(ExecutionResult {
            success: true,
            optimization_id: optimization_id.to_string(),
            changes: vec![format!(
                "Applied {} optimization: {}",
                rec.kind.as_str(),
                rec.title
            )],
            expected_impact: rec.expected_impact,
            rollback_plan: format!("Rollback plan for {optimization_id} created"),
            executed_at: Utc::now(),
        })
    }

    pub async fn process_optimization_queue(&self) -> usize {
        let pending = self.queue.read().await.len();
        if pending > 0 {
            info!(pending, "optimization recommendations awaiting execution");
        }
        pending
    }
}
