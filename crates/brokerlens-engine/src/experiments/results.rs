use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use brokerlens_core::stats::{lift_ci, proportion_ci, two_proportion_z_test, Z_95};

use super::model::{ABTest, MetricKind, MetricRole, TestStatus, Variant};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultStatus {
    Running,
    Completed,
    Inconclusive,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VariantResult {
    pub variant_id: String,
    pub name: String,
    pub is_control: bool,
    pub sample_size: u64,
    pub conversions: u64,
    pub conversion_rate: f64,
    pub conversion_rate_ci: (f64, f64),
    /// Relative lift over the control rate.
    pub relative_lift: f64,
    pub lift_ci: (f64, f64),
    pub z_score: f64,
    pub p_value: f64,
    pub is_significant: bool,
    pub is_practically_significant: bool,
    pub revenue: f64,
    pub organic_clicks: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MetricValue {
    pub variant_id: String,
    pub value: f64,
    pub sample_size: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MetricResult {
    pub name: String,
    pub role: MetricRole,
    pub values: Vec<MetricValue>,
    /// Variant with the best observed value, when the metric is measured.
    pub leader: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SeoTestImpact {
    pub organic_impressions: u64,
    pub organic_clicks: u64,
    pub organic_click_through_rate: f64,
    /// Lift of the best variant's organic CTR over control's.
    pub organic_ctr_lift: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TestResults {
    pub test_id: String,
    pub status: ResultStatus,
    pub winner: Option<String>,
    pub confidence: f64,
    pub statistical_significance: bool,
    pub practical_significance: bool,
    pub variants: Vec<VariantResult>,
    pub metrics: Vec<MetricResult>,
    pub seo_impact: SeoTestImpact,
    pub recommendations: Vec<String>,
    pub next_steps: Vec<String>,
    pub computed_at: DateTime<Utc>,
}

fn variant_result(variant: &Variant, control: Option<&Variant>, alpha: f64, practical: f64) -> VariantResult {
    let m = &variant.metrics;
    let rate = variant.conversion_rate();
    let (relative_lift, lift_interval, z, p_value) = match control {
        Some(c) if !variant.is_control => {
            let control_rate = c.conversion_rate();
            let lift = if control_rate > 0.0 {
                (rate - control_rate) / control_rate
            } else {
                0.0
            };
            let test = two_proportion_z_test(
                c.metrics.conversions,
                c.metrics.impressions,
                m.conversions,
                m.impressions,
            );
            let interval = lift_ci(
                c.metrics.conversions,
                c.metrics.impressions,
                m.conversions,
                m.impressions,
                Z_95,
            );
            (lift, interval, test.z, test.p_value)
        }
        _ => (0.0, (0.0, 0.0), 0.0, 1.0),
    };
    VariantResult {
        variant_id: variant.id.clone(),
        name: variant.name.clone(),
        is_control: variant.is_control,
        sample_size: m.impressions,
        conversions: m.conversions,
        conversion_rate: rate,
        conversion_rate_ci: proportion_ci(m.conversions, m.impressions, Z_95),
        relative_lift,
        lift_ci: lift_interval,
        z_score: z,
        p_value,
        is_significant: !variant.is_control && p_value < alpha,
        is_practically_significant: !variant.is_control && relative_lift.abs() >= practical,
        revenue: m.revenue,
        organic_clicks: m.organic_clicks,
    }
}

fn metric_value(variant: &Variant, kind: MetricKind) -> Option<f64> {
    match kind {
        MetricKind::ConversionRate => Some(variant.conversion_rate()),
        MetricKind::Revenue => Some(variant.metrics.revenue),
        _ => None,
    }
}

fn metric_results(test: &ABTest) -> Vec<MetricResult> {
    test.target_metrics
        .iter()
        .map(|metric| {
            let values: Vec<MetricValue> = test
                .variants
                .iter()
                .filter_map(|v| {
                    metric_value(v, metric.kind).map(|value| MetricValue {
                        variant_id: v.id.clone(),
                        value,
                        sample_size: v.metrics.impressions,
                    })
                })
                .collect();
            let leader = values
                .iter()
                .filter(|v| v.sample_size > 0)
                .max_by(|a, b| a.value.total_cmp(&b.value))
                .map(|v| v.variant_id.clone());
            MetricResult {
                name: metric.name.clone(),
                role: metric.role,
                values,
                leader,
            }
        })
        .collect()
}

fn organic_ctr(variant: &Variant) -> f64 {
    if variant.metrics.organic_impressions == 0 {
        0.0
    } else {
        variant.metrics.organic_clicks as f64 / variant.metrics.organic_impressions as f64
    }
}

fn seo_impact(test: &ABTest) -> SeoTestImpact {
    let impressions: u64 = test.variants.iter().map(|v| v.metrics.organic_impressions).sum();
    let clicks: u64 = test.variants.iter().map(|v| v.metrics.organic_clicks).sum();
    let control_ctr = test.control().map(organic_ctr).unwrap_or(0.0);
    let best_ctr = test
        .variants
        .iter()
        .filter(|v| !v.is_control)
        .map(organic_ctr)
        .fold(0.0, f64::max);
    SeoTestImpact {
        organic_impressions: impressions,
        organic_clicks: clicks,
        organic_click_through_rate: if impressions == 0 {
            0.0
        } else {
            clicks as f64 / impressions as f64 * 100.0
        },
        organic_ctr_lift: if control_ctr > 0.0 {
            (best_ctr - control_ctr) / control_ctr
        } else {
            0.0
        },
    }
}

/// Results for the test's current counts.
pub fn compute_results(test: &ABTest, now: DateTime<Utc>) -> TestResults {
    let (alpha, practical) = test
        .primary_metric()
        .map(|m| (m.threshold.significance_level, m.threshold.practical_threshold))
        .unwrap_or((0.05, 0.02));
    let control = test.control();
    let variants: Vec<VariantResult> = test
        .variants
        .iter()
        .map(|v| variant_result(v, control, alpha, practical))
        .collect();

    let winner = variants
        .iter()
        .filter(|r| !r.is_control && r.is_significant && r.is_practically_significant)
        .max_by(|a, b| a.relative_lift.total_cmp(&b.relative_lift))
        .map(|r| r.variant_id.clone());
    let statistical_significance = variants.iter().any(|r| r.is_significant);
    let practical_significance = variants.iter().any(|r| r.is_practically_significant);
    let confidence = variants
        .iter()
        .map(|r| 1.0 - r.p_value)
        .fold(0.0, f64::max);

    let running = matches!(test.status, TestStatus::Running | TestStatus::Paused);
    let status = if running {
        ResultStatus::Running
    } else if winner.is_some() {
        ResultStatus::Completed
    } else {
        ResultStatus::Inconclusive
    };

    let mut recommendations = Vec::new();
    match &winner {
        Some(id) => recommendations.push(format!("Roll out variant {id} to all traffic")),
        None if statistical_significance => recommendations
            .push("Significant difference found but below the practical threshold".to_string()),
        None => recommendations
            .push("Run the test longer or increase traffic to reach significance".to_string()),
    }
    let min_samples = test.traffic_allocation.minimum_sample_size;
    if variants.iter().any(|r| r.sample_size < min_samples) {
        recommendations.push(format!(
            "Collect at least {min_samples} impressions per variant for the planned power"
        ));
    }

    let next_steps = if running {
        vec![
            "Continue monitoring test progress".to_string(),
            "Check for statistical significance daily".to_string(),
        ]
    } else {
        vec![
            "Implement the winning variant".to_string(),
            "Plan follow-up tests based on learnings".to_string(),
        ]
    };

    TestResults {
        test_id: test.id.clone(),
        status,
        winner,
        confidence,
        statistical_significance,
        practical_significance,
        variants,
        metrics: metric_results(test),
        seo_impact: seo_impact(test),
        recommendations,
        next_steps,
        computed_at: now,
    }
}

/// Early stop: near-certain, practically meaningful and past the minimum runtime.
pub fn should_stop_early(test: &ABTest, results: &TestResults, now: DateTime<Utc>) -> bool {
    let rule = &test.automation.winner_determination;
    if !rule.enabled || test.status != TestStatus::Running {
        return false;
    }
    let Some(started) = test.timeline.actual_start else {
        return false;
    };
    results.confidence > 0.99
        && results.practical_significance
        && (now - started).num_days() >= rule.minimum_runtime_days
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    use crate::experiments::model::{
        default_metrics, default_variants, Automation, PowerAnalysis, Timeline, TrafficAllocation,
    };

    fn running_test(control: (u64, u64), variant: (u64, u64)) -> ABTest {
        let now = Utc::now();
        let mut variants = default_variants();
        variants[0].metrics.impressions = control.0;
        variants[0].metrics.conversions = control.1;
        variants[1].metrics.impressions = variant.0;
        variants[1].metrics.conversions = variant.1;
        let metrics = default_metrics();
        let power = PowerAnalysis::compute(&metrics[0], 2, 100);
        let mut timeline = Timeline::planned(now, 14);
        timeline.actual_start = Some(now);
        ABTest {
            id: "test_1".into(),
            name: "CTA".into(),
            description: String::new(),
            hypothesis: "h".into(),
            test_type: Default::default(),
            status: TestStatus::Running,
            variants,
            traffic_allocation: TrafficAllocation {
                minimum_sample_size: power.sample_size_per_variant,
                power_analysis: power,
            },
            target_metrics: metrics,
            timeline,
            automation: Automation::default(),
            results: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn higher_converting_variant_wins() {
        let mut test = running_test((1000, 50), (1000, 80));
        test.status = TestStatus::Completed;
        let results = compute_results(&test, Utc::now());
        assert_eq!(results.winner.as_deref(), Some("variant_a"));
        assert_eq!(results.status, ResultStatus::Completed);
        let variant = &results.variants[1];
        assert!((variant.relative_lift - 0.6).abs() < 1e-9);
        assert!(variant.p_value < 0.05);
        assert!(variant.is_practically_significant);
        assert!(results.confidence > 0.99);
        let (lo, hi) = results.variants[0].conversion_rate_ci;
        assert!(lo >= 0.0 && hi <= 1.0 && lo < 0.05 && hi > 0.05);
    }

    #[test]
    fn small_samples_are_never_significant() {
        let results = compute_results(&running_test((20, 1), (20, 10)), Utc::now());
        assert_eq!(results.variants[1].p_value, 1.0);
        assert!(results.winner.is_none());
        assert_eq!(results.status, ResultStatus::Running);
    }

    #[test]
    fn early_stop_waits_for_minimum_runtime() {
        let test = running_test((5000, 150), (5000, 300));
        let results = compute_results(&test, Utc::now());
        assert!(!should_stop_early(&test, &results, Utc::now()));
        assert!(should_stop_early(
            &test,
            &results,
            Utc::now() + Duration::days(8)
        ));
    }

    #[test]
    fn metric_leader_follows_conversion_rate() {
        let results = compute_results(&running_test((100, 3), (100, 9)), Utc::now());
        let primary = &results.metrics[0];
        assert_eq!(primary.leader.as_deref(), Some("variant_a"));
        assert!(results.metrics[1].values.is_empty());
    }
}
