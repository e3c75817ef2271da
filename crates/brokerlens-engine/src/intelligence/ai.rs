use std::time::Duration as StdDuration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use brokerlens_core::cache::{self, CacheOptions};
use brokerlens_core::collaborators::TrendDirection;
use brokerlens_core::priority::Priority;
use brokerlens_core::stats::{mean, z_score};
use brokerlens_core::time::Timeframe;

use crate::aggregator::CrossServiceInsight;

use super::BusinessIntelligence;

const AI_INSIGHTS_TTL: StdDuration = StdDuration::from_secs(30 * 60);
/// Readings needed before the latest one can be called anomalous.
const MIN_BASELINE_POINTS: usize = 5;
const ANOMALY_Z: f64 = 3.0;

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AiInsightContext {
    /// Service name the insights should touch, e.g. `seo_analytics`.
    pub focus: Option<String>,
    pub priority: Option<Priority>,
    pub timeframe: Timeframe,
    pub include_recommendations: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MetricAnomaly {
    pub metric: String,
    pub value: f64,
    pub baseline_mean: f64,
    pub z_score: f64,
    pub detected_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MetricPrediction {
    pub metric: String,
    pub next_value: f64,
    pub confidence: f64,
    pub trend: TrendDirection,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AiInsights {
    pub insights: Vec<CrossServiceInsight>,
    pub anomalies: Vec<MetricAnomaly>,
    pub predictions: Vec<MetricPrediction>,
    pub recommendations: Vec<String>,
    pub generated_at: DateTime<Utc>,
}

/// Flags the latest reading of `series` when it sits more than three
/// standard deviations from the readings before it.
pub fn detect_anomaly(metric: &str, series: &[f64], now: DateTime<Utc>) -> Option<MetricAnomaly> {
    let (latest, baseline) = series.split_last()?;
    if baseline.len() < MIN_BASELINE_POINTS {
        return None;
    }
    let z = z_score(*latest, baseline)?;
    (z.abs() > ANOMALY_Z).then(|| MetricAnomaly {
        metric: metric.to_string(),
        value: *latest,
        baseline_mean: mean(baseline).unwrap_or(0.0),
        z_score: z,
        detected_at: now,
    })
}

impl BusinessIntelligence {
    pub async fn get_ai_insights(&self, context: &AiInsightContext) -> AiInsights {
        let key = format!(
            "ai_insights:{}",
            serde_json::to_string(context).unwrap_or_default()
        );
        if let Some(hit) = cache::cached::<AiInsights>(self.cache.as_ref(), &key).await {
            return hit;
        }

        let now = Utc::now();
        let services = context.focus.clone().map(|f| vec![f]);
        let insights = self
            .aggregator
            .get_cross_service_insights(context.priority, services, None)
            .await;

        let days = context.timeframe.duration().num_days().max(1) as usize;
        let series = self.ai_series(days, now).await;
        let mut anomalies = Vec::new();
        let mut predictions = Vec::new();
        for (metric, values) in &series {
            if let Some(anomaly) = detect_anomaly(metric, values, now) {
                debug!(metric = %metric, z = anomaly.z_score, "metric anomaly");
                anomalies.push(anomaly);
            }
            if values.is_empty() {
                continue;
            }
            let forecast = self.forecaster.forecast(values, 1);
            predictions.push(MetricPrediction {
                metric: metric.clone(),
                next_value: forecast.predicted.first().copied().unwrap_or(0.0),
                confidence: forecast.confidence,
                trend: forecast.trend,
            });
        }

        let recommendations = if context.include_recommendations {
            insights
                .iter()
                .flat_map(|i| i.recommendations.iter().cloned())
                .chain(anomalies.iter().map(|a| {
                    format!(
                        "Investigate {}: latest value {:.2} against a baseline of {:.2}",
                        a.metric, a.value, a.baseline_mean
                    )
                }))
                .collect()
        } else {
            Vec::new()
        };

        let result = AiInsights {
            insights,
            anomalies,
            predictions,
            recommendations,
            generated_at: now,
        };
        cache::store(
            self.cache.as_ref(),
            &key,
            &result,
            CacheOptions::ttl(AI_INSIGHTS_TTL).tagged("ai_insights"),
        )
        .await;
        info!(
            insights = result.insights.len(),
            anomalies = result.anomalies.len(),
            "ai insights generated"
        );
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spike_after_stable_baseline_is_anomalous() {
        let now = Utc::now();
        let series = [10.0, 11.0, 9.0, 10.0, 10.5, 9.5, 40.0];
        let anomaly = detect_anomaly("daily_sessions", &series, now).unwrap();
        assert_eq!(anomaly.value, 40.0);
        assert!(anomaly.z_score > 3.0);
        assert!((anomaly.baseline_mean - 10.0).abs() < 1e-9);
    }

    #[test]
    fn short_or_flat_histories_are_never_anomalous() {
        let now = Utc::now();
        assert!(detect_anomaly("m", &[1.0, 1.0, 50.0], now).is_none());
        assert!(detect_anomaly("m", &[2.0; 8], now).is_none());
        assert!(detect_anomaly("m", &[], now).is_none());
        assert!(detect_anomaly("m", &[10.0, 11.0, 9.0, 10.0, 10.5, 11.0], now).is_none());
    }
}
