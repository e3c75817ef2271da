use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use brokerlens_core::error::{AnalyticsError, AnalyticsResult};
use brokerlens_core::stats::lehr_sample_size;

use super::results::TestResults;

/// Traffic totals must land within this distance of 100%.
pub const TRAFFIC_TOLERANCE: f64 = 0.01;
pub const MAX_TEST_DURATION_DAYS: i64 = 365;
/// Smallest relative lift a primary metric may target.
pub const MIN_TARGET_IMPROVEMENT: f64 = 0.01;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TestType {
    #[default]
    Page,
    Feature,
    Seo,
    Content,
    Performance,
    Multivariate,
    Funnel,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TestStatus {
    Draft,
    Ready,
    Running,
    Paused,
    Completed,
    Archived,
}

impl TestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TestStatus::Draft => "draft",
            TestStatus::Ready => "ready",
            TestStatus::Running => "running",
            TestStatus::Paused => "paused",
            TestStatus::Completed => "completed",
            TestStatus::Archived => "archived",
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct VariantMetrics {
    pub impressions: u64,
    pub conversions: u64,
    pub revenue: f64,
    pub organic_impressions: u64,
    pub organic_clicks: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Variant {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub is_control: bool,
    pub traffic_percentage: f64,
    /// Factor name to level. Multivariate analysis reads main effects from here.
    #[serde(default)]
    pub configuration: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    pub metrics: VariantMetrics,
}

impl Variant {
    pub fn new(id: &str, name: &str, is_control: bool, traffic_percentage: f64) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            description: String::new(),
            is_control,
            traffic_percentage,
            configuration: BTreeMap::new(),
            metrics: VariantMetrics::default(),
        }
    }

    pub fn conversion_rate(&self) -> f64 {
        if self.metrics.impressions == 0 {
            0.0
        } else {
            self.metrics.conversions as f64 / self.metrics.impressions as f64
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricRole {
    Primary,
    Secondary,
    Guardrail,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricKind {
    ConversionRate,
    Revenue,
    Engagement,
    SeoRanking,
    PageSpeed,
    BounceRate,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MetricThreshold {
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub significance_level: f64,
    /// Minimum relative lift that matters to the business.
    pub practical_threshold: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TestMetric {
    pub name: String,
    pub role: MetricRole,
    pub kind: MetricKind,
    pub baseline: f64,
    pub target_improvement: f64,
    pub threshold: MetricThreshold,
}

pub fn default_metrics() -> Vec<TestMetric> {
    vec![
        TestMetric {
            name: "conversion_rate".to_string(),
            role: MetricRole::Primary,
            kind: MetricKind::ConversionRate,
            baseline: 0.03,
            target_improvement: 0.20,
            threshold: MetricThreshold {
                min: None,
                max: None,
                significance_level: 0.05,
                practical_threshold: 0.02,
            },
        },
        TestMetric {
            name: "seo_ranking".to_string(),
            role: MetricRole::Secondary,
            kind: MetricKind::SeoRanking,
            baseline: 10.0,
            target_improvement: -0.20,
            threshold: MetricThreshold {
                min: None,
                max: None,
                significance_level: 0.05,
                practical_threshold: 1.0,
            },
        },
        TestMetric {
            name: "page_speed".to_string(),
            role: MetricRole::Guardrail,
            kind: MetricKind::PageSpeed,
            baseline: 2000.0,
            target_improvement: 0.0,
            threshold: MetricThreshold {
                min: None,
                max: Some(3000.0),
                significance_level: 0.05,
                practical_threshold: 500.0,
            },
        },
    ]
}

pub fn default_variants() -> Vec<Variant> {
    let mut control = Variant::new("control", "Control", true, 50.0);
    control.description = "Original version".to_string();
    let mut variant = Variant::new("variant_a", "Variant A", false, 50.0);
    variant.description = "Test version".to_string();
    vec![control, variant]
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PowerAnalysis {
    pub alpha: f64,
    pub beta: f64,
    pub power: f64,
    pub baseline_rate: f64,
    pub minimum_detectable_effect: f64,
    pub sample_size_per_variant: u64,
    pub total_sample_size: u64,
    pub expected_daily_visitors: u64,
    pub estimated_duration_days: u64,
}

impl PowerAnalysis {
    pub fn compute(primary: &TestMetric, variants: usize, daily_visitors: u64) -> Self {
        let per_variant = lehr_sample_size(primary.baseline, primary.target_improvement);
        let total = per_variant.saturating_mul(variants as u64);
        let daily = daily_visitors.max(1);
        Self {
            alpha: 0.05,
            beta: 0.2,
            power: 0.8,
            baseline_rate: primary.baseline,
            minimum_detectable_effect: primary.target_improvement,
            sample_size_per_variant: per_variant,
            total_sample_size: total,
            expected_daily_visitors: daily,
            estimated_duration_days: total.div_ceil(daily),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TrafficAllocation {
    pub minimum_sample_size: u64,
    pub power_analysis: PowerAnalysis,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TestPhase {
    pub name: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub description: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Milestone {
    pub name: String,
    pub date: DateTime<Utc>,
    pub description: String,
    pub completed: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Timeline {
    pub planned_start: DateTime<Utc>,
    pub planned_end: DateTime<Utc>,
    pub actual_start: Option<DateTime<Utc>>,
    pub actual_end: Option<DateTime<Utc>>,
    pub phases: Vec<TestPhase>,
    pub milestones: Vec<Milestone>,
}

fn phase(name: &str, start: DateTime<Utc>, end: DateTime<Utc>, description: &str) -> TestPhase {
    TestPhase {
        name: name.to_string(),
        start,
        end,
        description: description.to_string(),
    }
}

fn milestone(name: &str, date: DateTime<Utc>, description: &str) -> Milestone {
    Milestone {
        name: name.to_string(),
        date,
        description: description.to_string(),
        completed: false,
    }
}

impl Timeline {
    /// Start tomorrow, run `duration_days`, then a day of analysis.
    /// The duration is clamped to `1..=MAX_TEST_DURATION_DAYS`.
    pub fn planned(now: DateTime<Utc>, duration_days: i64) -> Self {
        let start = now + Duration::days(1);
        let end = start + Duration::days(duration_days.clamp(1, MAX_TEST_DURATION_DAYS));
        Self {
            planned_start: start,
            planned_end: end,
            actual_start: None,
            actual_end: None,
            phases: vec![
                phase("planning", now, now + Duration::hours(12), "Test planning and setup"),
                phase("setup", now + Duration::hours(12), start, "Technical implementation"),
                phase("active", start, end, "Active testing period"),
                phase("analysis", end, end + Duration::days(1), "Results analysis and reporting"),
            ],
            milestones: vec![
                milestone("Test Launch", start, "Test goes live"),
                milestone(
                    "Minimum Sample Size",
                    start + Duration::days(7),
                    "Reach minimum statistical power",
                ),
                milestone(
                    "Statistical Significance",
                    start + Duration::days(10),
                    "Achieve statistical significance",
                ),
                milestone("Test Completion", end, "Test ends and analysis begins"),
            ],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WinnerDetermination {
    pub enabled: bool,
    pub confidence: f64,
    pub practical_significance: f64,
    pub minimum_runtime_days: i64,
}

impl Default for WinnerDetermination {
    fn default() -> Self {
        Self {
            enabled: true,
            confidence: 0.95,
            practical_significance: 0.02,
            minimum_runtime_days: 7,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Automation {
    /// Stop automatically once the planned end has passed.
    pub auto_stop: bool,
    pub winner_determination: WinnerDetermination,
}

impl Default for Automation {
    fn default() -> Self {
        Self {
            auto_stop: true,
            winner_determination: WinnerDetermination::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ABTest {
    pub id: String,
    pub name: String,
    pub description: String,
    pub hypothesis: String,
    pub test_type: TestType,
    pub status: TestStatus,
    pub variants: Vec<Variant>,
    pub traffic_allocation: TrafficAllocation,
    pub target_metrics: Vec<TestMetric>,
    pub timeline: Timeline,
    pub automation: Automation,
    pub results: Option<TestResults>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ABTest {
    pub fn control(&self) -> Option<&Variant> {
        self.variants.iter().find(|v| v.is_control)
    }

    pub fn primary_metric(&self) -> Option<&TestMetric> {
        self.target_metrics
            .iter()
            .find(|m| m.role == MetricRole::Primary)
    }

    pub fn variant_mut(&mut self, variant_id: &str) -> Option<&mut Variant> {
        self.variants.iter_mut().find(|v| v.id == variant_id)
    }

    /// Checks a test must pass before it can run.
    pub fn validate_readiness(&self) -> AnalyticsResult<()> {
        if self.variants.len() < 2 {
            return Err(AnalyticsError::validation("At least 2 variants are required"));
        }
        if self.variants.iter().filter(|v| v.is_control).count() != 1 {
            return Err(AnalyticsError::validation(
                "Exactly one control variant is required",
            ));
        }
        if !traffic_sums_to_100(&self.variants) {
            return Err(AnalyticsError::validation("Traffic allocation must total 100%"));
        }
        if self.target_metrics.is_empty() {
            return Err(AnalyticsError::validation(
                "At least one target metric is required",
            ));
        }
        let primaries = self
            .target_metrics
            .iter()
            .filter(|m| m.role == MetricRole::Primary)
            .count();
        if primaries != 1 {
            return Err(AnalyticsError::validation(
                "Exactly one primary metric is required",
            ));
        }
        Ok(())
    }
}

pub fn traffic_sums_to_100(variants: &[Variant]) -> bool {
    let total: f64 = variants.iter().map(|v| v.traffic_percentage).sum();
    (total - 100.0).abs() <= TRAFFIC_TOLERANCE
}

/// Input for `create_test`. Omitted parts get defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TestConfig {
    pub name: Option<String>,
    pub description: Option<String>,
    pub hypothesis: Option<String>,
    pub test_type: Option<TestType>,
    pub variants: Option<Vec<Variant>>,
    pub target_metrics: Option<Vec<TestMetric>>,
    pub automation: Option<Automation>,
    pub duration_days: Option<i64>,
    pub expected_daily_visitors: Option<u64>,
}

impl TestConfig {
    /// Validation in a fixed order, so the first problem is reported.
    pub fn validate(&self) -> AnalyticsResult<()> {
        if blank(self.name.as_deref()) {
            return Err(AnalyticsError::validation("Test name is required"));
        }
        if blank(self.hypothesis.as_deref()) {
            return Err(AnalyticsError::validation("Test hypothesis is required"));
        }
        if let Some(variants) = &self.variants {
            if variants.len() < 2 {
                return Err(AnalyticsError::validation("At least 2 variants are required"));
            }
            if !traffic_sums_to_100(variants) {
                return Err(AnalyticsError::validation("Traffic allocation must total 100%"));
            }
        }
        if let Some(metrics) = &self.target_metrics {
            let Some(primary) = metrics.iter().find(|m| m.role == MetricRole::Primary) else {
                return Err(AnalyticsError::validation(
                    "Primary metric required for power analysis",
                ));
            };
            let lift = primary.target_improvement.abs();
            if !lift.is_finite() || lift < MIN_TARGET_IMPROVEMENT {
                return Err(AnalyticsError::validation(
                    "Primary metric target improvement must be at least 1%",
                ));
            }
        }
        if let Some(days) = self.duration_days {
            if !(1..=MAX_TEST_DURATION_DAYS).contains(&days) {
                return Err(AnalyticsError::validation(
                    "Test duration must be between 1 and 365 days",
                ));
            }
        }
        Ok(())
    }
}

fn blank(value: Option<&str>) -> bool {
    value.map_or(true, |s| s.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> TestConfig {
        TestConfig {
            name: Some("CTA colour".into()),
            hypothesis: Some("Green converts better".into()),
            ..TestConfig::default()
        }
    }

    #[test]
    fn validation_reports_first_problem_in_order() {
        let err = TestConfig::default().validate().unwrap_err();
        assert_eq!(err.to_string(), "Test name is required");

        let mut c = config();
        c.hypothesis = Some("  ".into());
        assert_eq!(c.validate().unwrap_err().to_string(), "Test hypothesis is required");

        let mut c = config();
        c.variants = Some(vec![Variant::new("control", "Control", true, 100.0)]);
        assert_eq!(
            c.validate().unwrap_err().to_string(),
            "At least 2 variants are required"
        );

        let mut c = config();
        c.variants = Some(vec![
            Variant::new("control", "Control", true, 50.0),
            Variant::new("b", "B", false, 40.0),
        ]);
        assert_eq!(
            c.validate().unwrap_err().to_string(),
            "Traffic allocation must total 100%"
        );

        assert!(config().validate().is_ok());
    }

    #[test]
    fn duration_outside_a_year_is_rejected() {
        for days in [0, -30, i64::MAX / 1000] {
            let mut c = config();
            c.duration_days = Some(days);
            assert_eq!(
                c.validate().unwrap_err().to_string(),
                "Test duration must be between 1 and 365 days"
            );
        }
        let mut c = config();
        c.duration_days = Some(365);
        assert!(c.validate().is_ok());
    }

    #[test]
    fn tiny_primary_lift_is_rejected() {
        let mut metrics = default_metrics();
        metrics[0].target_improvement = 1e-12;
        let mut c = config();
        c.target_metrics = Some(metrics);
        assert_eq!(
            c.validate().unwrap_err().to_string(),
            "Primary metric target improvement must be at least 1%"
        );
    }

    #[test]
    fn power_analysis_saturates_instead_of_overflowing() {
        let mut primary = default_metrics()[0].clone();
        primary.target_improvement = 1e-12;
        let power = PowerAnalysis::compute(&primary, 3, 100);
        assert_eq!(power.total_sample_size, u64::MAX);
    }

    #[test]
    fn traffic_tolerance_accepts_rounding() {
        let variants = vec![
            Variant::new("a", "A", true, 33.333),
            Variant::new("b", "B", false, 33.333),
            Variant::new("c", "C", false, 33.334),
        ];
        assert!(traffic_sums_to_100(&variants));
    }

    #[test]
    fn power_analysis_uses_lehr_rule() {
        let primary = &default_metrics()[0];
        let power = PowerAnalysis::compute(primary, 2, 100);
        assert_eq!(power.sample_size_per_variant, 12_934);
        assert_eq!(power.total_sample_size, 25_868);
        assert_eq!(power.estimated_duration_days, 259);
        assert!((power.power - 0.8).abs() < 1e-9);
    }

    #[test]
    fn default_timeline_starts_tomorrow_for_two_weeks() {
        let now = Utc::now();
        let t = Timeline::planned(now, 14);
        assert_eq!(t.planned_start, now + Duration::days(1));
        assert_eq!(t.planned_end, now + Duration::days(15));
        assert_eq!(t.phases.len(), 4);
        assert_eq!(t.milestones.len(), 4);
    }

    #[test]
    fn timeline_never_ends_before_it_starts() {
        let now = Utc::now();
        let t = Timeline::planned(now, -30);
        assert_eq!(t.planned_end, t.planned_start + Duration::days(1));
        let t = Timeline::planned(now, i64::MAX);
        assert_eq!(t.planned_end, t.planned_start + Duration::days(MAX_TEST_DURATION_DAYS));
    }
}
