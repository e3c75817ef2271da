//! Cross-service aggregation, correlation mining and health.

use std::collections::{HashMap, HashSet, VecDeque};
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use brokerlens_core::cache::{self, CacheOptions, CacheStore};
use brokerlens_core::collaborators::{CompetitiveSource, PerformanceMonitor, SeoAuditor};
use brokerlens_core::error::{AnalyticsError, AnalyticsResult};
use brokerlens_core::priority::Priority;
use brokerlens_core::time::TimeRange;

use crate::experiments::ABTestingFramework;
use crate::optimizer::ConversionOptimizer;
use crate::tracker::{BehaviorFilters, UserBehaviorTracker};

mod correlation;
mod dashboard;
mod health;
mod insights;
mod planning;
mod reporting;
mod snapshots;

pub use correlation::{
    pearson_p_value, AnalyticsCorrelation, CorrelatedMetric, CorrelationKind,
    CorrelationStatistics, CorrelationStore, CorrelationTrendReport, CORRELATION_WINDOW,
};
pub(crate) use dashboard::series_trend;
pub use dashboard::{
    AnalyticsDashboard, Audience, DashboardOverview, KpiStatus, UnifiedAlert, UnifiedKpi,
    UnifiedRecommendation, UnifiedTrend,
};
pub use health::{
    assess, health_score, service_status, AnalyticsHealth, HealthAlert, HealthRecommendation,
    ProbeOutcome, ProbeStats, ServiceHealth, ServiceStatus, HEALTH_SERVICES,
};
pub use insights::{
    derive_insights, select_insights, CrossServiceInsight, InsightEvidence, InsightInputs,
    InsightKind,
};
pub use planning::{
    build_plan, CurrentMetrics, MonitoringPlan, OptimizationTargets, PlanPhase, PlannedAction,
    UnifiedOptimization, UnifiedOptimizationPlan,
};
pub use reporting::{ReportMetadata, ReportSection, UnifiedReportExport};
pub use snapshots::{
    BehaviorSnapshot, BusinessContextSnapshot, ConversionSnapshot, CoreWebVitals,
    ExperimentSnapshot, PerformanceSnapshot, SeoSnapshot, SourceSnapshot, UnifiedAnalyticsData,
};

const UNIFIED_TTL: Duration = Duration::from_secs(2 * 60);
const UNIFIED_REUSE_SECS: i64 = 60;
const CORRELATIONS_TTL: Duration = Duration::from_secs(30 * 60);
const INSIGHTS_TTL: Duration = Duration::from_secs(15 * 60);
const HEALTH_REUSE_SECS: i64 = 5 * 60;
/// Stored correlations older than this are pruned on reanalysis.
const CORRELATION_RETENTION_HOURS: i64 = 24;
/// Aggregation requests drained per scheduler pass.
pub const AGGREGATION_BATCH: usize = 50;
/// Pending aggregation requests kept before the oldest is dropped.
pub const MAX_AGGREGATION_QUEUE: usize = 1_000;

/// Collaborators and settings the aggregator is wired with.
pub struct AggregatorDeps {
    pub cache: Arc<dyn CacheStore>,
    pub tracker: Arc<UserBehaviorTracker>,
    pub optimizer: Arc<ConversionOptimizer>,
    pub experiments: Arc<ABTestingFramework>,
    pub seo: Arc<dyn SeoAuditor>,
    pub performance: Arc<dyn PerformanceMonitor>,
    pub competitive: Arc<dyn CompetitiveSource>,
    pub correlation_cap: usize,
    pub export_base_url: String,
}

/// A deferred `aggregate_analytics` call.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AggregationRequest {
    pub session_id: Option<String>,
    pub user_id: Option<String>,
    pub page_url: Option<String>,
}

pub struct AnalyticsAggregator {
    cache: Arc<dyn CacheStore>,
    tracker: Arc<UserBehaviorTracker>,
    optimizer: Arc<ConversionOptimizer>,
    experiments: Arc<ABTestingFramework>,
    seo: Arc<dyn SeoAuditor>,
    performance: Arc<dyn PerformanceMonitor>,
    competitive: Arc<dyn CompetitiveSource>,
    export_base_url: String,
    probes: Mutex<HashMap<String, ProbeStats>>,
    correlations: RwLock<CorrelationStore>,
    insights: RwLock<HashMap<String, CrossServiceInsight>>,
    dismissed: RwLock<HashSet<String>>,
    health: RwLock<Option<AnalyticsHealth>>,
    queue: Mutex<VecDeque<AggregationRequest>>,
}

impl AnalyticsAggregator {
    pub fn new(deps: AggregatorDeps) -> Self {
        Self {
            cache: deps.cache,
            tracker: deps.tracker,
            optimizer: deps.optimizer,
            experiments: deps.experiments,
            seo: deps.seo,
            performance: deps.performance,
            competitive: deps.competitive,
            export_base_url: deps.export_base_url,
            probes: Mutex::new(HashMap::new()),
            correlations: RwLock::new(CorrelationStore::new(deps.correlation_cap)),
            insights: RwLock::new(HashMap::new()),
            dismissed: RwLock::new(HashSet::new()),
            health: RwLock::new(None),
            queue: Mutex::new(VecDeque::new()),
        }
    }

    /// Run `fetch`, record its latency and outcome, and fall back to the
    /// degraded default when it fails.
    async fn probed<T, F>(&self, fetch: F) -> T
    where
        T: SourceSnapshot,
        F: Future<Output = anyhow::Result<T>>,
    {
        let started = Instant::now();
        let result = fetch.await;
        let outcome = match &result {
            Ok(snapshot) if snapshot.has_data() => ProbeOutcome::Ok,
            Ok(_) => ProbeOutcome::Empty,
            Err(_) => ProbeOutcome::Failed,
        };
        self.record_probe(T::SOURCE, outcome, started.elapsed()).await;
        result.unwrap_or_else(|e| {
            warn!(error = %e, source = T::SOURCE, "snapshot degraded");
            T::fallback()
        })
    }

    pub async fn record_probe(&self, source: &str, outcome: ProbeOutcome, latency: Duration) {
        self.probes
            .lock()
            .await
            .entry(source.to_string())
            .or_default()
            .record(outcome, latency, Utc::now());
    }

    pub async fn probe_stats(&self) -> HashMap<String, ProbeStats> {
        self.probes.lock().await.clone()
    }

    /// One unified record for the (session, user, page) triple.
    ///
    /// Never fails: a source that errors contributes its degraded default.
    pub async fn aggregate_analytics(
        &self,
        session_id: Option<&str>,
        user_id: Option<&str>,
        page_url: Option<&str>,
    ) -> UnifiedAnalyticsData {
        let key = format!(
            "unified_analytics:{}:{}:{}",
            session_id.unwrap_or(""),
            user_id.unwrap_or(""),
            page_url.unwrap_or("")
        );
        let now = Utc::now();
        if let Some(hit) = cache::cached::<UnifiedAnalyticsData>(self.cache.as_ref(), &key).await {
            if (now - hit.timestamp).num_seconds() < UNIFIED_REUSE_SECS {
                return hit;
            }
        }

        let session = match session_id {
            Some(id) => self.tracker.find_session(id).await,
            None => None,
        };
        let url = page_url
            .map(str::to_string)
            .or_else(|| session.as_ref().map(|s| s.current_page.clone()))
            .unwrap_or_else(|| "/".to_string());
        let session = session.as_ref();

        let (
            user_behavior,
            seo_performance,
            conversion_data,
            experiment_data,
            performance_metrics,
            business_context,
        ) = tokio::join!(
            self.probed(async {
                Ok::<_, anyhow::Error>(match session {
                    Some(s) => BehaviorSnapshot::from_session(s),
                    None => {
                        let insights = self
                            .tracker
                            .get_behavior_insights(None, &BehaviorFilters::default())
                            .await;
                        let realtime = self.tracker.get_real_time_metrics().await;
                        BehaviorSnapshot::site_wide(&insights, &realtime)
                    }
                })
            }),
            self.probed(async {
                let audit = self.seo.audit_page(&url).await?;
                Ok::<_, anyhow::Error>(SeoSnapshot::from_audit(&audit, snapshots::is_organic(session)))
            }),
            self.probed(async {
                let insights = self.optimizer.get_optimization_insights(None, None).await?;
                let behavior = self
                    .tracker
                    .get_behavior_insights(None, &BehaviorFilters::default())
                    .await;
                Ok::<_, anyhow::Error>(ConversionSnapshot::build(&insights, behavior.conversion_rate, session))
            }),
            self.probed(async {
                let tests = self.experiments.list_tests().await;
                let assignments = match user_id {
                    Some(user) => self.experiments.assignments_for_user(user).await,
                    None => Vec::new(),
                };
                Ok::<_, anyhow::Error>(ExperimentSnapshot::build(&tests, &assignments, now))
            }),
            self.probed(async {
                let metrics = self.performance.page_metrics(Some(&url)).await?;
                Ok::<_, anyhow::Error>(PerformanceSnapshot::from(&metrics))
            }),
            self.probed(async {
                let position = self.competitive.market_position().await?;
                Ok::<_, anyhow::Error>(BusinessContextSnapshot::from(&position))
            }),
        );

        let data = UnifiedAnalyticsData {
            timestamp: now,
            session_id: session_id.map(str::to_string),
            user_id: user_id.map(str::to_string),
            page_url: url,
            user_behavior,
            seo_performance,
            conversion_data,
            experiment_data,
            performance_metrics,
            business_context,
        };
        let degraded = data.degraded_sources();
        if !degraded.is_empty() {
            warn!(sources = ?degraded, "unified analytics assembled with degraded sources");
        }

        cache::store(
            self.cache.as_ref(),
            &key,
            &data,
            CacheOptions::ttl(UNIFIED_TTL).tagged("unified_analytics"),
        )
        .await;
        self.analyze_correlations(&data).await;
        data
    }

    /// Feed the engagement/SEO pair into the rolling window. Returns the
    /// correlation when one was stored.
    pub async fn analyze_correlations(
        &self,
        data: &UnifiedAnalyticsData,
    ) -> Option<AnalyticsCorrelation> {
        if data.user_behavior.degraded || data.seo_performance.degraded {
            return None;
        }
        let stored = self.correlations.write().await.observe(
            data.user_behavior.engagement_score,
            data.seo_performance.combined_score(),
            data.timestamp,
        );
        if let Some(c) = &stored {
            debug!(correlation_id = %c.id, strength = c.strength, "correlation stored");
        }
        stored
    }

    pub async fn get_analytics_correlations(
        &self,
        range: Option<TimeRange>,
        services: Option<Vec<String>>,
        min_strength: Option<f64>,
    ) -> Vec<AnalyticsCorrelation> {
        let key = format!(
            "analytics_correlations:{}:{}:{}",
            serde_json::to_string(&range).unwrap_or_default(),
            services.as_deref().map(|s| s.join(",")).unwrap_or_default(),
            min_strength.map(|m| m.to_string()).unwrap_or_default()
        );
        if let Some(hit) =
            cache::cached::<Vec<AnalyticsCorrelation>>(self.cache.as_ref(), &key).await
        {
            return hit;
        }
        let correlations =
            self.correlations
                .read()
                .await
                .filter(range.as_ref(), services.as_deref(), min_strength);
        cache::store(
            self.cache.as_ref(),
            &key,
            &correlations,
            CacheOptions::ttl(CORRELATIONS_TTL).tagged("correlation_analysis"),
        )
        .await;
        correlations
    }

    pub async fn get_cross_service_insights(
        &self,
        priority: Option<Priority>,
        services: Option<Vec<String>>,
        limit: Option<usize>,
    ) -> Vec<CrossServiceInsight> {
        let key = format!(
            "cross_service_insights:{}:{}:{}",
            priority.map(|p| p.as_str()).unwrap_or(""),
            services.as_deref().map(|s| s.join(",")).unwrap_or_default(),
            limit.map(|l| l.to_string()).unwrap_or_default()
        );
        if let Some(hit) =
            cache::cached::<Vec<CrossServiceInsight>>(self.cache.as_ref(), &key).await
        {
            return hit;
        }
        if self.insights.read().await.is_empty() {
            self.regenerate_insights().await;
        }
        let selected = {
            let insights = self.insights.read().await;
            let dismissed = self.dismissed.read().await;
            select_insights(insights.values(), &dismissed, priority, services.as_deref(), limit)
        };
        cache::store(
            self.cache.as_ref(),
            &key,
            &selected,
            CacheOptions::ttl(INSIGHTS_TTL).tagged("cross_service_insights"),
        )
        .await;
        selected
    }

    pub async fn dismiss_insight(&self, insight_id: &str) -> AnalyticsResult<()> {
        if !self.insights.read().await.contains_key(insight_id) {
            return Err(AnalyticsError::not_found(format!("Insight {insight_id}")));
        }
        self.dismissed.write().await.insert(insight_id.to_string());
        if let Err(e) = self.cache.clear_by_tag("cross_service_insights").await {
            warn!(error = %e, "insight cache invalidation failed");
        }
        info!(insight_id, "insight dismissed");
        Ok(())
    }

    /// Rebuild cross-service insights from the current state of every
    /// service. Returns the number generated.
    pub async fn regenerate_insights(&self) -> usize {
        let now = Utc::now();
        let behavior = self
            .tracker
            .get_behavior_insights(None, &BehaviorFilters::default())
            .await;
        let alerts = self.tracker.get_real_time_metrics().await.performance_alerts;
        let correlations = self.correlations.read().await.filter(None, None, None);
        let health = self.health.read().await.clone();
        let mut tests = Vec::new();
        for test in self.experiments.list_tests().await {
            let winner = test.results.as_ref().and_then(|r| r.winner.clone());
            tests.push((test, winner));
        }
        let competitive = match self.competitive.market_position().await {
            Ok(snapshot) => Some(snapshot),
            Err(e) => {
                warn!(error = %e, "competitive data unavailable for insights");
                None
            }
        };

        let generated = derive_insights(
            &InsightInputs {
                behavior,
                alerts,
                correlations,
                health,
                tests,
                competitive,
            },
            now,
        );
        let count = generated.len();
        *self.insights.write().await =
            generated.into_iter().map(|i| (i.id.clone(), i)).collect();
        if let Err(e) = self.cache.clear_by_tag("cross_service_insights").await {
            warn!(error = %e, "insight cache invalidation failed");
        }
        debug!(count, "cross-service insights regenerated");
        count
    }

    /// Health is recomputed at most once per five minutes; calls inside
    /// the window return the same value.
    pub async fn get_analytics_health(&self) -> AnalyticsHealth {
        let now = Utc::now();
        if let Some(health) = self.health.read().await.as_ref() {
            if (now - health.generated_at).num_seconds() < HEALTH_REUSE_SECS {
                return health.clone();
            }
        }
        let probes = self.probe_stats().await;
        let cache_stats = match self.cache.stats().await {
            Ok(stats) => stats,
            Err(e) => {
                warn!(error = %e, "cache stats unavailable");
                Default::default()
            }
        };
        let health = assess(&probes, cache_stats, now);
        let mut slot = self.health.write().await;
        // Another caller may have refreshed while the probes were read.
        if let Some(existing) = slot.as_ref() {
            if (now - existing.generated_at).num_seconds() < HEALTH_REUSE_SECS {
                return existing.clone();
            }
        }
        *slot = Some(health.clone());
        health
    }

    /// Queue a deferred aggregation. An identical pending request is not
    /// queued twice; a full queue drops its oldest entry.
    pub async fn enqueue_aggregation(&self, request: AggregationRequest) -> bool {
        let mut queue = self.queue.lock().await;
        if queue.contains(&request) {
            return false;
        }
        if queue.len() >= MAX_AGGREGATION_QUEUE {
            queue.pop_front();
            warn!(
                max = MAX_AGGREGATION_QUEUE,
                "aggregation queue full, dropping oldest request"
            );
        }
        queue.push_back(request);
        true
    }

    pub async fn pending_aggregations(&self) -> usize {
        self.queue.lock().await.len()
    }

    /// Scheduler hook: run up to [`AGGREGATION_BATCH`] deferred
    /// aggregations.
    pub async fn process_aggregation_queue(&self) -> usize {
        let batch: Vec<AggregationRequest> = {
            let mut queue = self.queue.lock().await;
            let n = queue.len().min(AGGREGATION_BATCH);
            queue.drain(..n).collect()
        };
        for request in &batch {
            self.aggregate_analytics(
                request.session_id.as_deref(),
                request.user_id.as_deref(),
                request.page_url.as_deref(),
            )
            .await;
        }
        batch.len()
    }

    /// Scheduler hook: prune expired correlations and recompute their trend.
    pub async fn reanalyze_correlations(&self) -> CorrelationTrendReport {
        let cutoff = Utc::now() - chrono::Duration::hours(CORRELATION_RETENTION_HOURS);
        let report = self.correlations.write().await.reanalyze(cutoff);
        if report.pruned > 0 {
            if let Err(e) = self.cache.clear_by_tag("correlation_analysis").await {
                warn!(error = %e, "correlation cache invalidation failed");
            }
        }
        debug!(
            pruned = report.pruned,
            remaining = report.remaining,
            trend = ?report.trend,
            "correlations reanalyzed"
        );
        report
    }

    pub async fn correlation_count(&self) -> usize {
        self.correlations.read().await.len()
    }
}
