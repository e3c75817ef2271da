use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use brokerlens_core::cache::{self, CacheOptions};
use brokerlens_core::collaborators::{AuditIssue, CompetitiveSnapshot, Forecast, StaticCompetitiveSource};
use brokerlens_core::error::{AnalyticsError, AnalyticsResult};
use brokerlens_core::priority::Priority;
use brokerlens_core::session::Session;
use brokerlens_core::stats::{lehr_sample_size, mean, percent};
use brokerlens_core::time::{generate_id, TimeRange, Timeframe};
use brokerlens_core::traffic::TrafficMedium;

use crate::tracker::{count_funnel, BehaviorFilters, Opportunity, OpportunityKind};

use super::{
    compute_performance, ConversionOptimizer, Effort, OptimizationKind,
    OptimizationRecommendation,
};

const INSIGHTS_TTL: Duration = Duration::from_secs(15 * 60);
const PREDICTIVE_TTL: Duration = Duration::from_secs(60 * 60);
const PAGE_OPTIMIZATION_TTL: Duration = Duration::from_secs(30 * 60);
const TEST_IDEAS_TTL: Duration = Duration::from_secs(45 * 60);

const HISTORY_DAYS: usize = 30;
const MAX_RECOMMENDATIONS: usize = 10;
/// Relative lift a suggested test should be able to detect.
const TEST_MDE: f64 = 0.2;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PredictiveInsights {
    pub timeframe: Timeframe,
    pub horizon_days: usize,
    pub history_days: usize,
    pub conversions: Forecast,
    pub revenue: Forecast,
    pub seo_traffic: Forecast,
    pub expected_conversions: f64,
    pub expected_revenue: f64,
    pub generated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OptimizationInsights {
    pub funnel_id: Option<String>,
    pub overall_score: f64,
    pub engagement_score: f64,
    pub seo_effectiveness: f64,
    /// Mean step conversion rate across the analysed funnels, in percent.
    pub funnel_efficiency: f64,
    pub conversion_velocity: f64,
    /// Percent of conversions that carry a monetary value.
    pub revenue_optimization: f64,
    pub recommendations: Vec<OptimizationRecommendation>,
    pub predictive: PredictiveInsights,
    pub competitive: CompetitiveSnapshot,
    pub generated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PageOptimizationKind {
    #[default]
    Seo,
    Content,
    Technical,
    Performance,
}

impl PageOptimizationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PageOptimizationKind::Seo => "seo",
            PageOptimizationKind::Content => "content",
            PageOptimizationKind::Technical => "technical",
            PageOptimizationKind::Performance => "performance",
        }
    }

    fn covers(&self, issue: &AuditIssue) -> bool {
        match self {
            PageOptimizationKind::Seo => true,
            other => issue.category.eq_ignore_ascii_case(other.as_str()),
        }
    }

    fn optimization_kind(&self) -> OptimizationKind {
        match self {
            PageOptimizationKind::Seo => OptimizationKind::Seo,
            PageOptimizationKind::Content => OptimizationKind::Content,
            PageOptimizationKind::Technical => OptimizationKind::Technical,
            PageOptimizationKind::Performance => OptimizationKind::Performance,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PageOptimization {
    pub page_url: String,
    pub kind: PageOptimizationKind,
    pub seo_score: f64,
    pub engagement_score: f64,
    pub current_score: f64,
    pub expected_uplift: f64,
    pub projected_score: f64,
    pub recommendations: Vec<OptimizationRecommendation>,
    pub analyzed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TestIdea {
    pub rank: usize,
    pub funnel_id: String,
    pub step_id: String,
    pub step_name: String,
    pub target_url: String,
    pub hypothesis: String,
    pub baseline_rate: f64,
    pub minimum_detectable_effect: f64,
    pub sample_size_per_variant: u64,
    pub priority: Priority,
    pub suggested_variants: Vec<String>,
}

/// Conversions, revenue and organic sessions per day, oldest first,
/// for the `days` days ending at `now`.
pub(crate) fn daily_series(
    sessions: &[Session],
    days: usize,
    now: DateTime<Utc>,
) -> (Vec<f64>, Vec<f64>, Vec<f64>) {
    let mut conversions = vec![0.0; days];
    let mut revenue = vec![0.0; days];
    let mut organic = vec![0.0; days];
    let today = now.date_naive();
    for session in sessions {
        let age = (today - session.start_time.date_naive()).num_days();
        if age < 0 || age as usize >= days {
            continue;
        }
        let slot = days - 1 - age as usize;
        conversions[slot] += session.conversion_events.len() as f64;
        revenue[slot] += session.revenue();
        if session.source.medium == TrafficMedium::Organic {
            organic[slot] += 1.0;
        }
    }
    (conversions, revenue, organic)
}

fn from_opportunity(opportunity: &Opportunity) -> OptimizationRecommendation {
    let kind = match opportunity.kind {
        OpportunityKind::Content => OptimizationKind::Content,
        OpportunityKind::Performance => OptimizationKind::Performance,
        OpportunityKind::Seo => OptimizationKind::Seo,
        OpportunityKind::Conversion => OptimizationKind::Conversion,
    };
    OptimizationRecommendation {
        id: generate_id("opt"),
        kind,
        priority: opportunity.priority,
        title: opportunity.description.clone(),
        description: opportunity.implementation.clone(),
        target: opportunity
            .affected_pages
            .first()
            .cloned()
            .unwrap_or_else(|| "site".to_string()),
        expected_impact: opportunity.potential_impact,
        effort: if opportunity.priority >= Priority::High {
            Effort::Medium
        } else {
            Effort::Low
        },
        implementation: vec![opportunity.implementation.clone()],
    }
}

fn issue_priority(impact: f64) -> Priority {
    if impact >= 10.0 {
        Priority::High
    } else if impact >= 5.0 {
        Priority::Medium
    } else {
        Priority::Low
    }
}

impl ConversionOptimizer {
    pub async fn get_optimization_insights(
        &self,
        funnel_id: Option<&str>,
        range: Option<TimeRange>,
    ) -> AnalyticsResult<OptimizationInsights> {
        let funnels = match funnel_id {
            Some(id) => vec![self
                .funnel(id)
                .await
                .ok_or_else(|| AnalyticsError::not_found(format!("Funnel {id}")))?],
            None => self.list_funnels().await,
        };
        let key = format!(
            "optimization_insights:{}:{}",
            funnel_id.unwrap_or("all"),
            serde_json::to_string(&range).unwrap_or_default()
        );
        if let Some(hit) = cache::cached::<OptimizationInsights>(self.cache.as_ref(), &key).await {
            return Ok(hit);
        }

        let behavior = self
            .tracker
            .get_behavior_insights(range, &BehaviorFilters::default())
            .await;
        let sessions = self.tracker.sessions(range).await;
        let now = Utc::now();

        let mut step_rates = Vec::new();
        let mut step_recommendations = Vec::new();
        for funnel in &funnels {
            let counts =
                (!sessions.is_empty()).then(|| count_funnel(&sessions, &funnel.step_urls()));
            let performance = compute_performance(funnel, counts.as_ref(), &sessions, now);
            step_rates.extend(performance.steps.iter().map(|s| s.conversion_rate));
            step_recommendations.extend(performance.step_optimizations);
        }

        let conversions: Vec<_> = sessions.iter().flat_map(|s| &s.conversion_events).collect();
        let valued = conversions.iter().filter(|c| c.value.is_some()).count();
        let minutes = behavior.average_session_duration_ms / 60_000.0;

        let mut recommendations: Vec<OptimizationRecommendation> = behavior
            .optimization_opportunities
            .iter()
            .map(from_opportunity)
            .chain(step_recommendations)
            .collect();
        recommendations.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then(b.expected_impact.total_cmp(&a.expected_impact))
        });
        recommendations.truncate(MAX_RECOMMENDATIONS);
        let recommendations = self.enqueue(recommendations).await;

        let competitive = match self.competitive.market_position().await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!(error = %e, "competitive source unavailable, using static snapshot");
                StaticCompetitiveSource::snapshot()
            }
        };

        let insights = OptimizationInsights {
            funnel_id: funnel_id.map(str::to_string),
            overall_score: (behavior.overall_engagement * 0.4 + behavior.seo_effectiveness * 0.6)
                .min(100.0),
            engagement_score: behavior.overall_engagement,
            seo_effectiveness: behavior.seo_effectiveness,
            funnel_efficiency: mean(&step_rates).unwrap_or(0.0) * 100.0,
            conversion_velocity: (100.0 - minutes).max(0.0),
            revenue_optimization: percent(valued as f64, conversions.len() as f64),
            recommendations,
            predictive: self.get_predictive_insights(Timeframe::Month).await,
            competitive,
            generated_at: now,
        };
        cache::store(
            self.cache.as_ref(),
            &key,
            &insights,
            CacheOptions::ttl(INSIGHTS_TTL).tagged("optimization_insights"),
        )
        .await;
        Ok(insights)
    }

    pub async fn get_predictive_insights(&self, timeframe: Timeframe) -> PredictiveInsights {
        let key = format!("predictive_insights:{}", timeframe.as_str());
        if let Some(hit) = cache::cached::<PredictiveInsights>(self.cache.as_ref(), &key).await {
            return hit;
        }
        let now = Utc::now();
        let horizon = timeframe.duration().num_days().max(1) as usize;
        let sessions = self.tracker.sessions(None).await;
        let (conversions, revenue, organic) = daily_series(&sessions, HISTORY_DAYS, now);

        let conversions = self.forecaster.forecast(&conversions, horizon);
        let revenue = self.forecaster.forecast(&revenue, horizon);
        let insights = PredictiveInsights {
            timeframe,
            horizon_days: horizon,
            history_days: HISTORY_DAYS,
            expected_conversions: conversions.predicted.iter().sum(),
            expected_revenue: revenue.predicted.iter().sum(),
            conversions,
            revenue,
            seo_traffic: self.forecaster.forecast(&organic, horizon),
            generated_at: now,
        };
        cache::store(
            self.cache.as_ref(),
            &key,
            &insights,
            CacheOptions::ttl(PREDICTIVE_TTL).tagged("predictive_insights"),
        )
        .await;
        insights
    }

    pub async fn optimize_page(
        &self,
        page_url: &str,
        kind: PageOptimizationKind,
    ) -> AnalyticsResult<PageOptimization> {
        let key = format!("page_optimization:{}:{page_url}", kind.as_str());
        if let Some(hit) = cache::cached::<PageOptimization>(self.cache.as_ref(), &key).await {
            return Ok(hit);
        }
        let audit = self.tracker.page_audit(page_url).await?;
        let correlation = self.tracker.get_seo_correlation(page_url).await?;

        let current_score = (audit.overall_score + correlation.engagement_score) / 2.0;
        let gap = (100.0 - current_score).max(0.0);
        let issues: Vec<&AuditIssue> = audit.issues.iter().filter(|i| kind.covers(i)).collect();
        let expected_uplift = issues.iter().map(|i| i.impact).sum::<f64>().min(gap);

        let recommendations = issues
            .iter()
            .map(|issue| OptimizationRecommendation {
                id: generate_id("opt"),
                kind: kind.optimization_kind(),
                priority: issue_priority(issue.impact),
                title: format!("Fix {} issue on {page_url}", issue.category),
                description: issue.description.clone(),
                target: page_url.to_string(),
                expected_impact: issue.impact.min(gap),
                effort: if issue.impact >= 10.0 {
                    Effort::Medium
                } else {
                    Effort::Low
                },
                implementation: vec![issue.description.clone()],
            })
            .collect();
        let recommendations = self.enqueue(recommendations).await;

        let optimization = PageOptimization {
            page_url: page_url.to_string(),
            kind,
            seo_score: audit.overall_score,
            engagement_score: correlation.engagement_score,
            current_score,
            expected_uplift,
            projected_score: current_score + expected_uplift,
            recommendations,
            analyzed_at: Utc::now(),
        };
        cache::store(
            self.cache.as_ref(),
            &key,
            &optimization,
            CacheOptions::ttl(PAGE_OPTIMIZATION_TTL)
                .tagged("page_optimizations")
                .tagged(page_url),
        )
        .await;
        info!(
            page_url,
            kind = kind.as_str(),
            current_score,
            expected_uplift,
            "page optimization computed"
        );
        Ok(optimization)
    }

    /// Test ideas for a funnel, weakest step first.
    pub async fn get_ab_testing_recommendations(
        &self,
        funnel_id: &str,
    ) -> AnalyticsResult<Vec<TestIdea>> {
        let key = format!("ab_test_recommendations:{funnel_id}");
        if let Some(hit) = cache::cached::<Vec<TestIdea>>(self.cache.as_ref(), &key).await {
            return Ok(hit);
        }
        let funnel = self
            .funnel(funnel_id)
            .await
            .ok_or_else(|| AnalyticsError::not_found(format!("Funnel {funnel_id}")))?;
        let performance = self.analyze_funnel(funnel_id).await?;

        let mut ranked: Vec<(usize, f64)> = performance
            .steps
            .iter()
            .enumerate()
            .map(|(i, s)| (i, s.conversion_rate))
            .collect();
        ranked.sort_by(|a, b| a.1.total_cmp(&b.1).then(a.0.cmp(&b.0)));

        let ideas: Vec<TestIdea> = ranked
            .into_iter()
            .enumerate()
            .filter_map(|(rank, (index, rate))| {
                let step = funnel.steps.get(index)?;
                let priority = if rate < step.drop_off_threshold / 2.0 {
                    Priority::Critical
                } else if rate < step.drop_off_threshold {
                    Priority::High
                } else if rank == 0 {
                    Priority::Medium
                } else {
                    Priority::Low
                };
                Some(TestIdea {
                    rank: rank + 1,
                    funnel_id: funnel_id.to_string(),
                    step_id: step.id.clone(),
                    step_name: step.name.clone(),
                    target_url: step.url.clone(),
                    hypothesis: format!(
                        "A clearer call to action on {} lifts step conversion from {:.1}% by {:.0}%",
                        step.name,
                        rate * 100.0,
                        TEST_MDE * 100.0
                    ),
                    baseline_rate: rate,
                    minimum_detectable_effect: TEST_MDE,
                    sample_size_per_variant: lehr_sample_size(rate, TEST_MDE),
                    priority,
                    suggested_variants: vec![
                        "control".to_string(),
                        format!("{}_cta_variant", step.id),
                    ],
                })
            })
            .collect();

        cache::store(
            self.cache.as_ref(),
            &key,
            &ideas,
            CacheOptions::ttl(TEST_IDEAS_TTL).tagged("ab_test_recommendations"),
        )
        .await;
        Ok(ideas)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    use brokerlens_core::session::{
        ConversionEvent, ConversionKind, DeviceType, SeoAttribution, SessionPerformance,
        TrafficSource,
    };
    use chrono::Duration as ChronoDuration;

    fn session(days_ago: i64, medium: TrafficMedium, value: Option<f64>) -> Session {
        let start = Utc::now() - ChronoDuration::days(days_ago);
        Session {
            session_id: generate_id("sess"),
            user_id: None,
            device_id: "d".into(),
            device_type: DeviceType::Desktop,
            start_time: start,
            last_activity: start,
            total_duration_ms: 0,
            page_views: 1,
            current_page: "/".into(),
            interactions: Vec::new(),
            source: TrafficSource {
                medium,
                source: medium.as_str().into(),
                campaign: None,
                keyword: None,
                referrer: None,
                landing_page: "/".into(),
                seo_page: None,
            },
            seo_attribution: SeoAttribution::default(),
            conversion_events: value
                .map(|v| {
                    vec![ConversionEvent {
                        kind: ConversionKind::Lead,
                        timestamp: start,
                        value: Some(v),
                        currency: "USD".into(),
                        seo_attribution: SeoAttribution::default(),
                        funnel_step: 4,
                        metadata: HashMap::new(),
                    }]
                })
                .unwrap_or_default(),
            performance: SessionPerformance::default(),
            ended_at: None,
            error: None,
        }
    }

    #[test]
    fn daily_series_buckets_by_age() {
        let now = Utc::now();
        let sessions = vec![
            session(0, TrafficMedium::Organic, Some(10.0)),
            session(0, TrafficMedium::Direct, None),
            session(2, TrafficMedium::Organic, Some(5.0)),
            session(40, TrafficMedium::Organic, Some(99.0)),
        ];
        let (conversions, revenue, organic) = daily_series(&sessions, 7, now);
        assert_eq!(conversions.len(), 7);
        assert_eq!(conversions[6], 1.0);
        assert_eq!(revenue[6], 10.0);
        assert_eq!(revenue[4], 5.0);
        assert_eq!(organic[6], 1.0);
        assert_eq!(revenue.iter().sum::<f64>(), 15.0);
    }

    #[test]
    fn page_kind_filters_issue_categories() {
        let content = AuditIssue {
            category: "content".into(),
            description: "thin".into(),
            impact: 8.0,
        };
        let technical = AuditIssue {
            category: "technical".into(),
            description: "schema".into(),
            impact: 5.0,
        };
        assert!(PageOptimizationKind::Seo.covers(&content));
        assert!(PageOptimizationKind::Seo.covers(&technical));
        assert!(PageOptimizationKind::Content.covers(&content));
        assert!(!PageOptimizationKind::Content.covers(&technical));
        assert_eq!(issue_priority(12.0), Priority::High);
        assert_eq!(issue_priority(5.0), Priority::Medium);
        assert_eq!(issue_priority(1.0), Priority::Low);
    }
}
