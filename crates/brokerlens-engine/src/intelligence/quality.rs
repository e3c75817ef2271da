use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};

use brokerlens_core::priority::Priority;
use brokerlens_core::stats::mean;

use crate::aggregator::ProbeStats;

use super::report::{DataIssue, DataIssueKind, DataQualityReport, DataRecommendation};

/// Assessed sources and the aggregator probe that feeds each.
pub const QUALITY_SOURCES: [(&str, &str); 5] = [
    ("user_behavior", "user_behavior"),
    ("seo_analytics", "seo_analytics"),
    ("conversion_data", "conversion_optimizer"),
    ("ab_tests", "ab_testing"),
    ("performance", "performance"),
];

/// Sources scored below this raise an issue.
pub const ISSUE_THRESHOLD: f64 = 80.0;
const HIGH_SEVERITY_THRESHOLD: f64 = 70.0;
const FRESHNESS_HOURS: i64 = 1;

fn session_backed(source: &str) -> bool {
    matches!(source, "user_behavior" | "conversion_data")
}

/// Score every source from its probe statistics. `completeness` is the
/// percent of tracked sessions set up without error and weighs into the
/// session-backed sources. Unprobed sources score 100.
pub fn assess_sources(
    probes: &HashMap<String, ProbeStats>,
    completeness: f64,
    now: DateTime<Utc>,
) -> DataQualityReport {
    let mut source_scores = Vec::with_capacity(QUALITY_SOURCES.len());
    let mut accuracy = Vec::with_capacity(QUALITY_SOURCES.len());
    let mut consistency = Vec::with_capacity(QUALITY_SOURCES.len());
    let mut timeliness = Vec::with_capacity(QUALITY_SOURCES.len());
    let mut issues = Vec::new();

    for (source, probe_name) in QUALITY_SOURCES {
        let probe = probes.get(probe_name);
        let quality = probe.map_or(100.0, ProbeStats::data_quality);
        accuracy.push(quality);
        consistency.push(probe.map_or(100.0, |p| 100.0 - p.error_rate() * 100.0));
        let fresh = probe
            .and_then(|p| p.last_call)
            .map_or(true, |at| now - at <= Duration::hours(FRESHNESS_HOURS));
        timeliness.push(if fresh { 100.0 } else { 50.0 });

        let score = if session_backed(source) {
            (quality + completeness) / 2.0
        } else {
            quality
        };
        if score < ISSUE_THRESHOLD {
            let kind = if session_backed(source) && completeness < quality {
                DataIssueKind::Completeness
            } else {
                DataIssueKind::Accuracy
            };
            let description = match kind {
                DataIssueKind::Completeness => format!("Incomplete session data in {source}"),
                _ => format!("Data accuracy concerns in {source}"),
            };
            issues.push(DataIssue {
                source: source.to_string(),
                kind,
                description,
                severity: if score < HIGH_SEVERITY_THRESHOLD {
                    Priority::High
                } else {
                    Priority::Medium
                },
                impact: (100.0 - score) / 100.0,
                solution: format!("Implement data validation for {source}"),
                timeline_days: 14,
            });
        }
        source_scores.push((source.to_string(), score));
    }

    let scores: Vec<f64> = source_scores.iter().map(|(_, s)| *s).collect();
    let recommendations = if issues.is_empty() {
        Vec::new()
    } else {
        vec![DataRecommendation {
            area: "Data Validation".to_string(),
            recommendation: "Implement automated data quality checks".to_string(),
            priority: Priority::High,
        }]
    };
    DataQualityReport {
        overall_score: mean(&scores).unwrap_or(100.0),
        completeness,
        accuracy: mean(&accuracy).unwrap_or(100.0),
        consistency: mean(&consistency).unwrap_or(100.0),
        timeliness: mean(&timeliness).unwrap_or(100.0),
        sources_assessed: source_scores.len(),
        source_scores,
        issues,
        recommendations,
        last_assessment: now,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregator::ProbeOutcome;
    use std::time::Duration as StdDuration;

    fn probe(ok: u64, empty: u64, failed: u64, at: DateTime<Utc>) -> ProbeStats {
        let mut stats = ProbeStats::default();
        let latency = StdDuration::from_millis(5);
        for _ in 0..ok {
            stats.record(ProbeOutcome::Ok, latency, at);
        }
        for _ in 0..empty {
            stats.record(ProbeOutcome::Empty, latency, at);
        }
        for _ in 0..failed {
            stats.record(ProbeOutcome::Failed, latency, at);
        }
        stats
    }

    #[test]
    fn clean_probes_raise_no_issues() {
        let now = Utc::now();
        let probes: HashMap<String, ProbeStats> = QUALITY_SOURCES
            .iter()
            .map(|(_, p)| (p.to_string(), probe(10, 0, 0, now)))
            .collect();
        let report = assess_sources(&probes, 100.0, now);
        assert_eq!(report.sources_assessed, 5);
        assert!(report.issues.is_empty());
        assert!((report.overall_score - 100.0).abs() < 1e-9);
        assert!(report.recommendations.is_empty());
    }

    #[test]
    fn failing_source_is_flagged_with_severity() {
        let now = Utc::now();
        let mut probes = HashMap::new();
        probes.insert("seo_analytics".to_string(), probe(6, 0, 4, now));
        probes.insert("performance".to_string(), probe(15, 0, 5, now));
        let report = assess_sources(&probes, 100.0, now);
        let seo = report.issues.iter().find(|i| i.source == "seo_analytics").unwrap();
        assert_eq!(seo.severity, Priority::High);
        assert_eq!(seo.kind, DataIssueKind::Accuracy);
        assert!((seo.impact - 0.4).abs() < 1e-9);
        let perf = report.issues.iter().find(|i| i.source == "performance").unwrap();
        assert_eq!(perf.severity, Priority::Medium);
        assert_eq!(report.recommendations.len(), 1);
    }

    #[test]
    fn incomplete_sessions_weigh_on_behavior_sources() {
        let now = Utc::now();
        let report = assess_sources(&HashMap::new(), 40.0, now);
        let sources: Vec<&str> = report.issues.iter().map(|i| i.source.as_str()).collect();
        assert_eq!(sources, vec!["user_behavior", "conversion_data"]);
        assert!(report.issues.iter().all(|i| i.kind == DataIssueKind::Completeness));
    }

    #[test]
    fn stale_probes_lower_timeliness() {
        let now = Utc::now();
        let mut probes = HashMap::new();
        probes.insert("ab_testing".to_string(), probe(3, 0, 0, now - Duration::hours(5)));
        let report = assess_sources(&probes, 100.0, now);
        assert!((report.timeliness - 90.0).abs() < 1e-9);
    }
}
