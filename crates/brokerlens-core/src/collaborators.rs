//! Seams for the systems the analytics services consult but do not own.
//!
//! Each trait has a deterministic in-process implementation that the server
//! wires by default. Tests substitute failing or scripted fakes.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::stats;

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ContentQuality {
    pub overall_score: f64,
    pub keyword_optimization: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TechnicalSeo {
    pub score: f64,
    pub meta_tags: Vec<String>,
    pub structured_data: Vec<String>,
    pub mobile_optimization: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PagePerformance {
    pub score: f64,
}

/// A failed audit check and the score points it costs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AuditIssue {
    pub category: String,
    pub description: String,
    pub impact: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PageAudit {
    pub url: String,
    pub overall_score: f64,
    pub content_quality: ContentQuality,
    pub technical_seo: TechnicalSeo,
    pub performance: PagePerformance,
    pub issues: Vec<AuditIssue>,
}

#[async_trait]
pub trait SeoAuditor: Send + Sync + 'static {
    async fn audit_page(&self, url: &str) -> anyhow::Result<PageAudit>;
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PageMetrics {
    pub load_time_ms: f64,
    pub first_contentful_paint_ms: f64,
    pub largest_contentful_paint_ms: f64,
    pub cumulative_layout_shift: f64,
    pub time_to_interactive_ms: f64,
    pub cache_hit_rate: f64,
    pub error_count: u32,
    pub score: f64,
}

#[async_trait]
pub trait PerformanceMonitor: Send + Sync + 'static {
    /// Metrics for `url`, or site-wide when `None`.
    async fn page_metrics(&self, url: Option<&str>) -> anyhow::Result<PageMetrics>;
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TrendDirection {
    Increasing,
    Decreasing,
    Stable,
}

impl TrendDirection {
    /// Direction of `current` against `previous` with a 1% dead band.
    pub fn between(previous: f64, current: f64) -> Self {
        let tolerance = previous.abs() * 0.01;
        if current > previous + tolerance {
            TrendDirection::Increasing
        } else if current < previous - tolerance {
            TrendDirection::Decreasing
        } else {
            TrendDirection::Stable
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Forecast {
    pub predicted: Vec<f64>,
    pub confidence: f64,
    pub trend: TrendDirection,
}

pub trait Forecaster: Send + Sync + 'static {
    /// Project `horizon` future points from a regularly spaced `history`.
    fn forecast(&self, history: &[f64], horizon: usize) -> Forecast;
}

/// Least-squares line through the history, extended forward.
///
/// Predictions are floored at zero. Confidence grows with the fit's r².
#[derive(Debug, Clone, Copy, Default)]
pub struct LinearTrendForecaster;

impl Forecaster for LinearTrendForecaster {
    fn forecast(&self, history: &[f64], horizon: usize) -> Forecast {
        let Some(trend) = stats::linear_trend(history) else {
            let last = history.last().copied().unwrap_or(0.0);
            return Forecast {
                predicted: vec![last.max(0.0); horizon],
                confidence: 0.5,
                trend: TrendDirection::Stable,
            };
        };
        let n = history.len() as f64;
        let predicted = (0..horizon)
            .map(|i| trend.at(n + i as f64).max(0.0))
            .collect::<Vec<_>>();
        let start = trend.at(n - 1.0);
        let end = predicted.last().copied().unwrap_or(start);
        Forecast {
            predicted,
            confidence: (0.5 + 0.45 * trend.r_squared).min(0.95),
            trend: TrendDirection::between(start, end),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CompetitorProfile {
    pub name: String,
    pub market_share: f64,
    pub strengths: Vec<String>,
    pub weaknesses: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CompetitiveSnapshot {
    pub market: String,
    pub rank: u32,
    pub market_share: f64,
    pub growth_rate: f64,
    pub competitors: Vec<CompetitorProfile>,
    pub opportunities: Vec<String>,
    pub threats: Vec<String>,
}

#[async_trait]
pub trait CompetitiveSource: Send + Sync + 'static {
    async fn market_position(&self) -> anyhow::Result<CompetitiveSnapshot>;
}

/// Fixed market snapshot used until a market-data feed is wired in.
#[derive(Debug, Clone, Default)]
pub struct StaticCompetitiveSource;

impl StaticCompetitiveSource {
    pub fn snapshot() -> CompetitiveSnapshot {
        CompetitiveSnapshot {
            market: "Forex Brokers".to_string(),
            rank: 5,
            market_share: 12.5,
            growth_rate: 8.3,
            competitors: vec![
                CompetitorProfile {
                    name: "BrokerChooser".to_string(),
                    market_share: 18.2,
                    strengths: vec!["Brand recognition".into(), "Review depth".into()],
                    weaknesses: vec!["Slow mobile pages".into()],
                },
                CompetitorProfile {
                    name: "ForexBrokers.com".to_string(),
                    market_share: 15.7,
                    strengths: vec!["Domain authority".into()],
                    weaknesses: vec!["Limited country coverage".into()],
                },
            ],
            opportunities: vec![
                "Country-specific broker guides".to_string(),
                "Interactive spread comparison".to_string(),
            ],
            threats: vec!["Search algorithm updates".to_string()],
        }
    }
}

#[async_trait]
impl CompetitiveSource for StaticCompetitiveSource {
    async fn market_position(&self) -> anyhow::Result<CompetitiveSnapshot> {
        Ok(Self::snapshot())
    }
}

#[async_trait]
pub trait ReportDelivery: Send + Sync + 'static {
    async fn deliver(
        &self,
        schedule_id: &str,
        recipients: &[String],
        report: &serde_json::Value,
    ) -> anyhow::Result<()>;
}

/// Delivery that only records the event in the log.
#[derive(Debug, Clone, Default)]
pub struct LogReportDelivery;

#[async_trait]
impl ReportDelivery for LogReportDelivery {
    async fn deliver(
        &self,
        schedule_id: &str,
        recipients: &[String],
        report: &serde_json::Value,
    ) -> anyhow::Result<()> {
        tracing::info!(
            schedule_id,
            recipients = recipients.len(),
            report_id = report.get("id").and_then(|v| v.as_str()).unwrap_or(""),
            "scheduled report delivered"
        );
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Anomaly {
    pub kind: String,
    pub statistic: f64,
    pub description: String,
}

pub trait AnomalyDetector: Send + Sync + 'static {
    /// Inspect per-variant impression counts against their configured
    /// traffic shares (percentages).
    fn detect(&self, observed: &[u64], expected_percent: &[f64]) -> Option<Anomaly>;
}

/// Chi-square sample ratio mismatch check at p < 0.001.
#[derive(Debug, Clone, Copy)]
pub struct SampleRatioMismatchDetector {
    pub min_total: u64,
}

impl Default for SampleRatioMismatchDetector {
    fn default() -> Self {
        Self { min_total: 100 }
    }
}

/// Chi-square critical values at p = 0.001 for 1..=6 degrees of freedom.
const CHI2_CRITICAL_001: [f64; 6] = [10.828, 13.816, 16.266, 18.467, 20.515, 22.458];

impl AnomalyDetector for SampleRatioMismatchDetector {
    fn detect(&self, observed: &[u64], expected_percent: &[f64]) -> Option<Anomaly> {
        if observed.len() < 2 || observed.len() != expected_percent.len() {
            return None;
        }
        let total: u64 = observed.iter().sum();
        if total < self.min_total {
            return None;
        }
        let share_sum: f64 = expected_percent.iter().sum();
        if share_sum <= 0.0 {
            return None;
        }
        let chi2: f64 = observed
            .iter()
            .zip(expected_percent)
            .filter(|(_, share)| **share > 0.0)
            .map(|(o, share)| {
                let expected = total as f64 * share / share_sum;
                (*o as f64 - expected).powi(2) / expected
            })
            .sum();
        let df = observed.len() - 1;
        let critical = CHI2_CRITICAL_001
            .get(df - 1)
            .copied()
            .unwrap_or(CHI2_CRITICAL_001[5]);
        (chi2 > critical).then(|| Anomaly {
            kind: "sample_ratio_mismatch".to_string(),
            statistic: chi2,
            description: format!(
                "Observed traffic split deviates from allocation (chi2 = {chi2:.2}, df = {df})"
            ),
        })
    }
}

/// Auditor returning the same audit for every page.
#[derive(Debug, Clone)]
pub struct StaticSeoAuditor {
    pub audit: PageAudit,
}

impl Default for StaticSeoAuditor {
    fn default() -> Self {
        Self {
            audit: PageAudit {
                url: String::new(),
                overall_score: 72.0,
                content_quality: ContentQuality {
                    overall_score: 70.0,
                    keyword_optimization: 65.0,
                },
                technical_seo: TechnicalSeo {
                    score: 78.0,
                    meta_tags: vec![
                        "title".to_string(),
                        "description".to_string(),
                        "og:title".to_string(),
                    ],
                    structured_data: vec![
                        "Organization".to_string(),
                        "FinancialService".to_string(),
                    ],
                    mobile_optimization: 82.0,
                },
                performance: PagePerformance { score: 80.0 },
                issues: vec![
                    AuditIssue {
                        category: "content".to_string(),
                        description: "Primary keyword missing from H1".to_string(),
                        impact: 8.0,
                    },
                    AuditIssue {
                        category: "technical".to_string(),
                        description: "Review schema not present".to_string(),
                        impact: 5.0,
                    },
                ],
            },
        }
    }
}

#[async_trait]
impl SeoAuditor for StaticSeoAuditor {
    async fn audit_page(&self, url: &str) -> anyhow::Result<PageAudit> {
        let mut audit = self.audit.clone();
        audit.url = url.to_string();
        Ok(audit)
    }
}

/// Monitor returning fixed Core Web Vitals.
#[derive(Debug, Clone)]
pub struct StaticPerformanceMonitor {
    pub metrics: PageMetrics,
}

impl Default for StaticPerformanceMonitor {
    fn default() -> Self {
        Self {
            metrics: PageMetrics {
                load_time_ms: 1800.0,
                first_contentful_paint_ms: 1100.0,
                largest_contentful_paint_ms: 2300.0,
                cumulative_layout_shift: 0.08,
                time_to_interactive_ms: 2900.0,
                cache_hit_rate: 0.85,
                error_count: 0,
                score: 84.0,
            },
        }
    }
}

#[async_trait]
impl PerformanceMonitor for StaticPerformanceMonitor {
    async fn page_metrics(&self, _url: Option<&str>) -> anyhow::Result<PageMetrics> {
        Ok(self.metrics.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forecaster_extends_increasing_series() {
        let f = LinearTrendForecaster.forecast(&[10.0, 12.0, 14.0, 16.0], 3);
        assert_eq!(f.predicted.len(), 3);
        assert!((f.predicted[0] - 18.0).abs() < 1e-9);
        assert_eq!(f.trend, TrendDirection::Increasing);
        assert!(f.confidence > 0.9);
    }

    #[test]
    fn forecaster_without_history_is_flat() {
        let f = LinearTrendForecaster.forecast(&[], 2);
        assert_eq!(f.predicted, vec![0.0, 0.0]);
        assert_eq!(f.trend, TrendDirection::Stable);
    }

    #[test]
    fn forecaster_never_predicts_negative_values() {
        let f = LinearTrendForecaster.forecast(&[9.0, 6.0, 3.0], 4);
        assert!(f.predicted.iter().all(|v| *v >= 0.0));
        assert_eq!(f.trend, TrendDirection::Decreasing);
    }

    #[test]
    fn srm_flags_lopsided_split() {
        let d = SampleRatioMismatchDetector::default();
        assert!(d.detect(&[500, 500], &[50.0, 50.0]).is_none());
        let anomaly = d.detect(&[700, 300], &[50.0, 50.0]).unwrap();
        assert_eq!(anomaly.kind, "sample_ratio_mismatch");
        assert!(d.detect(&[30, 10], &[50.0, 50.0]).is_none());
    }

    #[test]
    fn trend_direction_has_dead_band() {
        assert_eq!(TrendDirection::between(100.0, 100.5), TrendDirection::Stable);
        assert_eq!(TrendDirection::between(100.0, 105.0), TrendDirection::Increasing);
        assert_eq!(TrendDirection::between(100.0, 90.0), TrendDirection::Decreasing);
    }

    #[tokio::test]
    async fn static_auditor_echoes_url() {
        let audit = StaticSeoAuditor::default()
            .audit_page("/best-brokers/ecn")
            .await
            .unwrap();
        assert_eq!(audit.url, "/best-brokers/ecn");
        assert!(audit.overall_score > 0.0);
    }
}
