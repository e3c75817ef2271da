//! Per-source snapshots composed into [`UnifiedAnalyticsData`].
//!
//! Every snapshot has a documented fallback used when its source fails.
//! Fallbacks carry `degraded: true` so callers can tell them apart from
//! genuine zero readings.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use brokerlens_core::collaborators::{CompetitiveSnapshot, PageAudit, PageMetrics};
use brokerlens_core::session::Session;
use brokerlens_core::traffic::TrafficMedium;

use crate::experiments::{compute_results, ABTest, Assignment, TestStatus};
use crate::optimizer::OptimizationInsights;
use crate::tracker::{engagement_score, BehaviorInsights, RealTimeMetrics};

/// A snapshot a single data source contributes to the unified record.
pub trait SourceSnapshot: Sized {
    /// Probe name the source reports health under.
    const SOURCE: &'static str;

    /// The documented default, flagged as degraded.
    fn fallback() -> Self;

    /// False when the source answered without anything to report.
    fn has_data(&self) -> bool {
        true
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BehaviorSnapshot {
    pub session_duration_ms: f64,
    pub page_views: u32,
    pub interactions: usize,
    pub engagement_score: f64,
    pub conversion_events: usize,
    pub traffic_source: String,
    pub device_type: String,
    pub degraded: bool,
}

impl Default for BehaviorSnapshot {
    fn default() -> Self {
        Self {
            session_duration_ms: 0.0,
            page_views: 1,
            interactions: 0,
            engagement_score: 0.0,
            conversion_events: 0,
            traffic_source: "unknown".to_string(),
            device_type: "unknown".to_string(),
            degraded: false,
        }
    }
}

impl SourceSnapshot for BehaviorSnapshot {
    const SOURCE: &'static str = "user_behavior";

    fn fallback() -> Self {
        Self {
            degraded: true,
            ..Self::default()
        }
    }

    fn has_data(&self) -> bool {
        self.interactions > 0 || self.session_duration_ms > 0.0
    }
}

impl BehaviorSnapshot {
    pub fn from_session(session: &Session) -> Self {
        Self {
            session_duration_ms: session.total_duration_ms as f64,
            page_views: session.page_views,
            interactions: session.interactions.len(),
            engagement_score: engagement_score(std::slice::from_ref(session)),
            conversion_events: session.conversion_events.len(),
            traffic_source: session.source.medium.as_str().to_string(),
            device_type: session.device_type.as_str().to_string(),
            degraded: false,
        }
    }

    /// Site-wide view when no single session is in scope.
    pub fn site_wide(insights: &BehaviorInsights, realtime: &RealTimeMetrics) -> Self {
        Self {
            session_duration_ms: insights.average_session_duration_ms,
            page_views: (insights.pages_per_session.round() as u32).max(1),
            interactions: realtime.live_interactions.len(),
            engagement_score: insights.overall_engagement,
            conversion_events: realtime.recent_conversions.len(),
            traffic_source: "all".to_string(),
            device_type: "all".to_string(),
            degraded: false,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SeoSnapshot {
    pub organic_traffic: bool,
    pub content_quality_score: f64,
    pub technical_seo_score: f64,
    pub structured_data_present: bool,
    pub meta_tags_optimized: bool,
    pub page_speed_score: f64,
    pub mobile_optimization: f64,
    pub degraded: bool,
}

impl SourceSnapshot for SeoSnapshot {
    const SOURCE: &'static str = "seo_analytics";

    fn fallback() -> Self {
        Self {
            degraded: true,
            ..Self::default()
        }
    }
}

impl SeoSnapshot {
    pub fn from_audit(audit: &PageAudit, organic_traffic: bool) -> Self {
        Self {
            organic_traffic,
            content_quality_score: audit.content_quality.overall_score,
            technical_seo_score: audit.technical_seo.score,
            structured_data_present: !audit.technical_seo.structured_data.is_empty(),
            meta_tags_optimized: audit.technical_seo.meta_tags.len() > 3,
            page_speed_score: audit.performance.score,
            mobile_optimization: audit.technical_seo.mobile_optimization,
            degraded: false,
        }
    }

    /// Mean of content and technical scores, the SEO side of the
    /// engagement correlation.
    pub fn combined_score(&self) -> f64 {
        (self.content_quality_score + self.technical_seo_score) / 2.0
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConversionSnapshot {
    pub funnel_step: u8,
    /// Observed conversion rate as a fraction.
    pub conversion_probability: f64,
    pub revenue_attribution: f64,
    pub channel_attribution: String,
    pub touchpoint_position: usize,
    pub influence_score: f64,
    pub optimization_opportunities: Vec<String>,
    pub degraded: bool,
}

impl Default for ConversionSnapshot {
    fn default() -> Self {
        Self {
            funnel_step: 0,
            conversion_probability: 0.0,
            revenue_attribution: 0.0,
            channel_attribution: "unknown".to_string(),
            touchpoint_position: 0,
            influence_score: 0.0,
            optimization_opportunities: Vec::new(),
            degraded: false,
        }
    }
}

impl SourceSnapshot for ConversionSnapshot {
    const SOURCE: &'static str = "conversion_optimizer";

    fn fallback() -> Self {
        Self {
            degraded: true,
            ..Self::default()
        }
    }
}

impl ConversionSnapshot {
    pub fn build(
        insights: &OptimizationInsights,
        site_conversion_rate: f64,
        session: Option<&Session>,
    ) -> Self {
        let optimization_opportunities = insights
            .recommendations
            .iter()
            .take(3)
            .map(|r| r.title.clone())
            .collect();
        match session {
            Some(s) => Self {
                funnel_step: s.funnel_step(),
                conversion_probability: if s.converted() {
                    1.0
                } else {
                    site_conversion_rate / 100.0
                },
                revenue_attribution: s.revenue(),
                channel_attribution: s.source.medium.as_str().to_string(),
                touchpoint_position: s.page_sequence().len(),
                influence_score: insights.seo_effectiveness,
                optimization_opportunities,
                degraded: false,
            },
            None => Self {
                funnel_step: 0,
                conversion_probability: site_conversion_rate / 100.0,
                revenue_attribution: 0.0,
                channel_attribution: "all".to_string(),
                touchpoint_position: 0,
                influence_score: insights.seo_effectiveness,
                optimization_opportunities,
                degraded: false,
            },
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ExperimentSnapshot {
    pub active_tests: Vec<String>,
    pub assigned_variants: BTreeMap<String, String>,
    pub conversion_events: u64,
    /// Best observed relative lift over control across running tests.
    pub experimental_lift: f64,
    pub significance_status: BTreeMap<String, bool>,
    pub degraded: bool,
}

impl SourceSnapshot for ExperimentSnapshot {
    const SOURCE: &'static str = "ab_testing";

    fn fallback() -> Self {
        Self {
            degraded: true,
            ..Self::default()
        }
    }

    fn has_data(&self) -> bool {
        !self.active_tests.is_empty()
    }
}

impl ExperimentSnapshot {
    pub fn build(tests: &[ABTest], assignments: &[Assignment], now: DateTime<Utc>) -> Self {
        let mut snapshot = Self::default();
        for test in tests.iter().filter(|t| t.status == TestStatus::Running) {
            let results = compute_results(test, now);
            snapshot.active_tests.push(test.id.clone());
            snapshot.conversion_events += test.variants.iter().map(|v| v.metrics.conversions).sum::<u64>();
            let lift = results
                .variants
                .iter()
                .filter(|v| !v.is_control)
                .map(|v| v.relative_lift)
                .fold(0.0, f64::max);
            snapshot.experimental_lift = snapshot.experimental_lift.max(lift);
            snapshot
                .significance_status
                .insert(test.id.clone(), results.statistical_significance);
        }
        for assignment in assignments {
            snapshot
                .assigned_variants
                .insert(assignment.test_id.clone(), assignment.variant_id.clone());
        }
        snapshot
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct CoreWebVitals {
    pub lcp_ms: f64,
    pub fcp_ms: f64,
    pub cls: f64,
    pub tti_ms: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PerformanceSnapshot {
    pub page_load_time_ms: f64,
    pub cache_hit_rate: f64,
    pub error_count: u32,
    pub core_web_vitals: CoreWebVitals,
    pub user_experience_score: f64,
    pub degraded: bool,
}

impl SourceSnapshot for PerformanceSnapshot {
    const SOURCE: &'static str = "performance";

    fn fallback() -> Self {
        Self {
            degraded: true,
            ..Self::default()
        }
    }
}

impl From<&PageMetrics> for PerformanceSnapshot {
    fn from(m: &PageMetrics) -> Self {
        Self {
            page_load_time_ms: m.load_time_ms,
            cache_hit_rate: m.cache_hit_rate,
            error_count: m.error_count,
            core_web_vitals: CoreWebVitals {
                lcp_ms: m.largest_contentful_paint_ms,
                fcp_ms: m.first_contentful_paint_ms,
                cls: m.cumulative_layout_shift,
                tti_ms: m.time_to_interactive_ms,
            },
            user_experience_score: m.score,
            degraded: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BusinessContextSnapshot {
    pub business_impact: f64,
    pub competitive_position: f64,
    /// Lower is better.
    pub risk_assessment: f64,
    pub opportunity_score: f64,
    pub degraded: bool,
}

impl Default for BusinessContextSnapshot {
    fn default() -> Self {
        Self {
            business_impact: 0.0,
            competitive_position: 0.0,
            risk_assessment: 50.0,
            opportunity_score: 0.0,
            degraded: false,
        }
    }
}

impl SourceSnapshot for BusinessContextSnapshot {
    const SOURCE: &'static str = "business_intelligence";

    fn fallback() -> Self {
        Self {
            degraded: true,
            ..Self::default()
        }
    }
}

impl From<&CompetitiveSnapshot> for BusinessContextSnapshot {
    fn from(c: &CompetitiveSnapshot) -> Self {
        let leader_share = c
            .competitors
            .iter()
            .map(|p| p.market_share)
            .fold(c.market_share, f64::max);
        Self {
            business_impact: (c.market_share / leader_share * 100.0).min(100.0),
            competitive_position: (110.0 - c.rank as f64 * 10.0).clamp(0.0, 100.0),
            risk_assessment: (30.0 + c.threats.len() as f64 * 10.0
                - c.opportunities.len() as f64 * 5.0)
                .clamp(0.0, 100.0),
            opportunity_score: (50.0 + c.growth_rate * 2.0 + c.opportunities.len() as f64 * 5.0)
                .clamp(0.0, 100.0),
            degraded: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UnifiedAnalyticsData {
    pub timestamp: DateTime<Utc>,
    pub session_id: Option<String>,
    pub user_id: Option<String>,
    pub page_url: String,
    pub user_behavior: BehaviorSnapshot,
    pub seo_performance: SeoSnapshot,
    pub conversion_data: ConversionSnapshot,
    pub experiment_data: ExperimentSnapshot,
    pub performance_metrics: PerformanceSnapshot,
    pub business_context: BusinessContextSnapshot,
}

impl UnifiedAnalyticsData {
    /// Sources that fell back to their default snapshot.
    pub fn degraded_sources(&self) -> Vec<&'static str> {
        [
            (BehaviorSnapshot::SOURCE, self.user_behavior.degraded),
            (SeoSnapshot::SOURCE, self.seo_performance.degraded),
            (ConversionSnapshot::SOURCE, self.conversion_data.degraded),
            (ExperimentSnapshot::SOURCE, self.experiment_data.degraded),
            (PerformanceSnapshot::SOURCE, self.performance_metrics.degraded),
            (BusinessContextSnapshot::SOURCE, self.business_context.degraded),
        ]
        .into_iter()
        .filter_map(|(source, degraded)| degraded.then_some(source))
        .collect()
    }
}

/// True when the session arrived from search.
pub fn is_organic(session: Option<&Session>) -> bool {
    session.is_some_and(|s| s.source.medium == TrafficMedium::Organic)
}

#[cfg(test)]
mod tests {
    use super::*;
    use brokerlens_core::collaborators::StaticCompetitiveSource;

    #[test]
    fn fallbacks_match_documented_defaults() {
        let behavior = BehaviorSnapshot::fallback();
        assert!(behavior.degraded);
        assert_eq!(behavior.page_views, 1);
        assert_eq!(behavior.traffic_source, "unknown");
        assert_eq!(behavior.device_type, "unknown");

        let business = BusinessContextSnapshot::fallback();
        assert!(business.degraded);
        assert_eq!(business.risk_assessment, 50.0);
        assert_eq!(business.business_impact, 0.0);

        let seo = SeoSnapshot::fallback();
        assert!(seo.degraded && seo.content_quality_score == 0.0);
        assert_eq!(ConversionSnapshot::fallback().channel_attribution, "unknown");
    }

    #[test]
    fn competitive_context_is_bounded() {
        let ctx = BusinessContextSnapshot::from(&StaticCompetitiveSource::snapshot());
        for v in [
            ctx.business_impact,
            ctx.competitive_position,
            ctx.risk_assessment,
            ctx.opportunity_score,
        ] {
            assert!((0.0..=100.0).contains(&v), "{v} out of range");
        }
        // rank 5
        assert!((ctx.competitive_position - 60.0).abs() < 1e-9);
        assert!(!ctx.degraded);
    }
}
