use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use brokerlens_core::cache::CacheStats;
use brokerlens_core::priority::Priority;
use brokerlens_core::stats::percent;

/// Services reported by the health check, in display order.
pub const HEALTH_SERVICES: [&str; 5] = [
    "user_behavior",
    "seo_analytics",
    "conversion_optimizer",
    "ab_testing",
    "business_intelligence",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeOutcome {
    /// The source answered with data.
    Ok,
    /// The source answered but had nothing to report.
    Empty,
    /// The source failed and a fallback snapshot was used.
    Failed,
}

/// Running call statistics for one data source.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ProbeStats {
    pub calls: u64,
    pub failures: u64,
    pub empty: u64,
    pub total_latency_ms: f64,
    pub last_call: Option<DateTime<Utc>>,
}

impl ProbeStats {
    pub fn record(&mut self, outcome: ProbeOutcome, latency: Duration, at: DateTime<Utc>) {
        self.calls += 1;
        match outcome {
            ProbeOutcome::Ok => {}
            ProbeOutcome::Empty => self.empty += 1,
            ProbeOutcome::Failed => self.failures += 1,
        }
        self.total_latency_ms += latency.as_secs_f64() * 1000.0;
        self.last_call = Some(at);
    }

    /// Percent of calls that did not fail. 100 before the first call.
    pub fn uptime(&self) -> f64 {
        if self.calls == 0 {
            return 100.0;
        }
        percent((self.calls - self.failures) as f64, self.calls as f64)
    }

    pub fn mean_response_ms(&self) -> f64 {
        if self.calls == 0 {
            0.0
        } else {
            self.total_latency_ms / self.calls as f64
        }
    }

    /// Failed fraction of calls, in `[0, 1]`.
    pub fn error_rate(&self) -> f64 {
        if self.calls == 0 {
            0.0
        } else {
            self.failures as f64 / self.calls as f64
        }
    }

    /// Percent of calls that produced real data.
    pub fn data_quality(&self) -> f64 {
        if self.calls == 0 {
            return 100.0;
        }
        percent(
            (self.calls - self.failures - self.empty) as f64,
            self.calls as f64,
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServiceHealth {
    pub service: String,
    pub status: ServiceStatus,
    pub uptime: f64,
    pub response_time_ms: f64,
    pub error_rate: f64,
    pub data_quality: f64,
    pub score: f64,
    pub calls: u64,
    pub last_check: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HealthRecommendation {
    pub service: String,
    pub priority: Priority,
    pub recommendation: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HealthAlert {
    pub service: String,
    pub message: String,
    pub resolution_steps: Vec<String>,
    pub escalation_required: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AnalyticsHealth {
    pub overall_score: f64,
    pub services: BTreeMap<String, ServiceHealth>,
    pub cache: CacheStats,
    pub recommendations: Vec<HealthRecommendation>,
    pub alerts: Vec<HealthAlert>,
    pub generated_at: DateTime<Utc>,
}

pub fn service_status(uptime: f64, error_rate: f64) -> ServiceStatus {
    if uptime < 90.0 {
        ServiceStatus::Unhealthy
    } else if uptime < 99.0 || error_rate > 0.02 {
        ServiceStatus::Degraded
    } else {
        ServiceStatus::Healthy
    }
}

/// Weighted 0..=100 score: uptime 30%, latency 20%, errors 20%, data 30%.
pub fn health_score(uptime: f64, response_ms: f64, error_rate: f64, data_quality: f64) -> f64 {
    uptime * 0.3
        + (100.0 - response_ms / 10.0).max(0.0) * 0.2
        + (100.0 - error_rate * 5000.0).max(0.0) * 0.2
        + data_quality * 0.3
}

pub fn service_health(service: &str, probe: &ProbeStats) -> ServiceHealth {
    let uptime = probe.uptime();
    let response_time_ms = probe.mean_response_ms();
    let error_rate = probe.error_rate();
    let data_quality = probe.data_quality();
    ServiceHealth {
        service: service.to_string(),
        status: service_status(uptime, error_rate),
        uptime,
        response_time_ms,
        error_rate,
        data_quality,
        score: health_score(uptime, response_time_ms, error_rate, data_quality),
        calls: probe.calls,
        last_check: probe.last_call,
    }
}

pub fn assess(
    probes: &HashMap<String, ProbeStats>,
    cache: CacheStats,
    now: DateTime<Utc>,
) -> AnalyticsHealth {
    let idle = ProbeStats::default();
    let services: BTreeMap<String, ServiceHealth> = HEALTH_SERVICES
        .iter()
        .map(|name| {
            let probe = probes.get(*name).unwrap_or(&idle);
            (name.to_string(), service_health(name, probe))
        })
        .collect();
    let overall_score =
        services.values().map(|s| s.score).sum::<f64>() / HEALTH_SERVICES.len() as f64;

    let recommendations = services
        .values()
        .filter(|s| s.status != ServiceStatus::Healthy || s.uptime < 99.0)
        .map(|s| HealthRecommendation {
            service: s.service.clone(),
            priority: if s.status == ServiceStatus::Unhealthy {
                Priority::Critical
            } else {
                Priority::High
            },
            recommendation: format!("Improve {} reliability and uptime", s.service),
        })
        .collect();
    let alerts = services
        .values()
        .filter(|s| s.status == ServiceStatus::Unhealthy)
        .map(|s| HealthAlert {
            service: s.service.clone(),
            message: format!("{} is unhealthy ({:.1}% uptime)", s.service, s.uptime),
            resolution_steps: vec![
                "Check service logs".to_string(),
                "Verify the upstream collaborator".to_string(),
                "Escalate if the failure persists".to_string(),
            ],
            escalation_required: true,
        })
        .collect();

    AnalyticsHealth {
        overall_score,
        services,
        cache,
        recommendations,
        alerts,
        generated_at: now,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn probe(calls: u64, failures: u64, empty: u64, latency_ms: u64) -> ProbeStats {
        let mut p = ProbeStats::default();
        for i in 0..calls {
            let outcome = if i < failures {
                ProbeOutcome::Failed
            } else if i < failures + empty {
                ProbeOutcome::Empty
            } else {
                ProbeOutcome::Ok
            };
            p.record(outcome, Duration::from_millis(latency_ms), Utc::now());
        }
        p
    }

    #[test]
    fn idle_service_is_fully_healthy() {
        let h = service_health("ab_testing", &ProbeStats::default());
        assert_eq!(h.status, ServiceStatus::Healthy);
        assert!((h.score - 100.0).abs() < 1e-9);
    }

    #[test]
    fn status_bands_follow_uptime_and_errors() {
        assert_eq!(service_status(85.0, 0.0), ServiceStatus::Unhealthy);
        assert_eq!(service_status(95.0, 0.0), ServiceStatus::Degraded);
        assert_eq!(service_status(99.5, 0.03), ServiceStatus::Degraded);
        assert_eq!(service_status(100.0, 0.0), ServiceStatus::Healthy);
    }

    #[test]
    fn score_weights_each_component() {
        // 30 + (100 - 20) * .2 + (100 - 50) * .2 + 27
        let score = health_score(100.0, 200.0, 0.01, 90.0);
        assert!((score - 83.0).abs() < 1e-9);
    }

    #[test]
    fn failing_source_raises_critical_alert() {
        let mut probes = HashMap::new();
        probes.insert("seo_analytics".to_string(), probe(10, 5, 0, 20));
        probes.insert("user_behavior".to_string(), probe(10, 0, 2, 5));
        let health = assess(&probes, CacheStats::default(), Utc::now());

        let seo = &health.services["seo_analytics"];
        assert_eq!(seo.status, ServiceStatus::Unhealthy);
        assert!((seo.uptime - 50.0).abs() < 1e-9);
        assert_eq!(health.alerts.len(), 1);
        assert_eq!(health.alerts[0].service, "seo_analytics");

        let behavior = &health.services["user_behavior"];
        assert_eq!(behavior.status, ServiceStatus::Healthy);
        assert!((behavior.data_quality - 80.0).abs() < 1e-9);
        assert!(health.overall_score < 100.0);
    }
}
