use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use brokerlens_core::collaborators::TrendDirection;
use brokerlens_core::stats::{mean, normal_cdf, pearson};
use brokerlens_core::time::{generate_id, TimeRange};

/// Paired observations kept for the rolling correlation.
pub const CORRELATION_WINDOW: usize = 200;
/// Fewer paired observations than this never produce a stored result.
pub const MIN_CORRELATION_SAMPLES: usize = 10;
/// Weaker correlations are not stored.
pub const MIN_STORED_STRENGTH: f64 = 0.3;
/// A new result this close to the latest stored one is a duplicate.
pub const DEDUP_TOLERANCE: f64 = 0.01;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CorrelationKind {
    Positive,
    Negative,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CorrelatedMetric {
    pub service: String,
    pub metric: String,
    pub value: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CorrelationStatistics {
    pub pearson: f64,
    pub sample_size: usize,
    pub p_value: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AnalyticsCorrelation {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub kind: CorrelationKind,
    pub strength: f64,
    pub primary: CorrelatedMetric,
    pub secondary: CorrelatedMetric,
    pub causality: String,
    pub implications: Vec<String>,
    pub recommendations: Vec<String>,
    pub statistics: CorrelationStatistics,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CorrelationTrendReport {
    pub pruned: usize,
    pub remaining: usize,
    pub mean_strength: f64,
    pub trend: TrendDirection,
}

/// Two-sided p-value of a Pearson r via the normal approximation of its
/// t statistic. 1.0 below three samples.
pub fn pearson_p_value(r: f64, n: usize) -> f64 {
    if n < 3 {
        return 1.0;
    }
    let denom = 1.0 - r * r;
    if denom <= f64::EPSILON {
        return 0.0;
    }
    let t = r * ((n - 2) as f64 / denom).sqrt();
    (2.0 * (1.0 - normal_cdf(t.abs()))).clamp(0.0, 1.0)
}

/// Rolling engagement/SEO samples plus the correlations mined from them.
#[derive(Debug)]
pub struct CorrelationStore {
    samples: VecDeque<(f64, f64)>,
    entries: VecDeque<AnalyticsCorrelation>,
    cap: usize,
    trend: TrendDirection,
}

impl CorrelationStore {
    pub fn new(cap: usize) -> Self {
        Self {
            samples: VecDeque::with_capacity(CORRELATION_WINDOW),
            entries: VecDeque::new(),
            cap: cap.max(1),
            trend: TrendDirection::Stable,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn trend(&self) -> TrendDirection {
        self.trend
    }

    pub fn latest(&self) -> Option<&AnalyticsCorrelation> {
        self.entries.back()
    }

    /// Add one (engagement, seo) observation and store the resulting
    /// correlation when it is strong and not a duplicate.
    pub fn observe(
        &mut self,
        engagement: f64,
        seo: f64,
        now: DateTime<Utc>,
    ) -> Option<AnalyticsCorrelation> {
        if self.samples.len() == CORRELATION_WINDOW {
            self.samples.pop_front();
        }
        self.samples.push_back((engagement, seo));

        if self.samples.len() < MIN_CORRELATION_SAMPLES {
            return None;
        }
        let (xs, ys): (Vec<f64>, Vec<f64>) = self.samples.iter().copied().unzip();
        let r = pearson(&xs, &ys);
        let strength = r.abs();
        if strength <= MIN_STORED_STRENGTH {
            return None;
        }
        if self
            .entries
            .back()
            .is_some_and(|last| (last.strength - strength).abs() < DEDUP_TOLERANCE)
        {
            return None;
        }

        let n = xs.len();
        let correlation = engagement_seo_correlation(r, n, engagement, seo, now);
        if self.entries.len() == self.cap {
            self.entries.pop_front();
        }
        self.entries.push_back(correlation.clone());
        Some(correlation)
    }

    pub fn filter(
        &self,
        range: Option<&TimeRange>,
        services: Option<&[String]>,
        min_strength: Option<f64>,
    ) -> Vec<AnalyticsCorrelation> {
        self.entries
            .iter()
            .filter(|c| min_strength.map_or(true, |m| c.strength >= m))
            .filter(|c| services.map_or(true, |s| s.contains(&c.primary.service)))
            .filter(|c| range.map_or(true, |r| r.contains(c.timestamp)))
            .cloned()
            .collect()
    }

    /// Drop entries older than `cutoff` and recompute the strength trend.
    pub fn reanalyze(&mut self, cutoff: DateTime<Utc>) -> CorrelationTrendReport {
        let before = self.entries.len();
        self.entries.retain(|c| c.timestamp >= cutoff);
        let strengths: Vec<f64> = self.entries.iter().map(|c| c.strength).collect();
        let half = strengths.len() / 2;
        self.trend = if half == 0 {
            TrendDirection::Stable
        } else {
            let older = mean(&strengths[..half]).unwrap_or(0.0);
            let newer = mean(&strengths[half..]).unwrap_or(0.0);
            TrendDirection::between(older, newer)
        };
        CorrelationTrendReport {
            pruned: before - self.entries.len(),
            remaining: self.entries.len(),
            mean_strength: mean(&strengths).unwrap_or(0.0),
            trend: self.trend,
        }
    }
}

fn engagement_seo_correlation(
    r: f64,
    n: usize,
    engagement: f64,
    seo: f64,
    now: DateTime<Utc>,
) -> AnalyticsCorrelation {
    let kind = if r > 0.0 {
        CorrelationKind::Positive
    } else {
        CorrelationKind::Negative
    };
    let (causality, implication, recommendation) = match kind {
        CorrelationKind::Positive => (
            "Higher SEO quality leads to better user engagement",
            "SEO improvements directly lift engagement",
            "Prioritize SEO content quality improvements",
        ),
        CorrelationKind::Negative => (
            "SEO-optimized pages are engaging visitors less",
            "Keyword-driven content may be hurting readability",
            "Review top SEO pages for readability and intent match",
        ),
    };
    AnalyticsCorrelation {
        id: generate_id("engagement_seo"),
        timestamp: now,
        kind,
        strength: r.abs(),
        primary: CorrelatedMetric {
            service: "user_behavior".to_string(),
            metric: "engagement_score".to_string(),
            value: engagement,
        },
        secondary: CorrelatedMetric {
            service: "seo".to_string(),
            metric: "combined_seo_score".to_string(),
            value: seo,
        },
        causality: causality.to_string(),
        implications: vec![implication.to_string()],
        recommendations: vec![recommendation.to_string()],
        statistics: CorrelationStatistics {
            pearson: r,
            sample_size: n,
            p_value: pearson_p_value(r, n),
        },
    }
}
