use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use brokerlens_core::collaborators::CompetitiveSnapshot;
use brokerlens_core::priority::Priority;

use crate::experiments::{ABTest, TestStatus};
use crate::tracker::{AlertSeverity, BehaviorInsights, OpportunityKind, PerformanceAlert};

use super::correlation::AnalyticsCorrelation;
use super::health::{AnalyticsHealth, ServiceStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InsightKind {
    OptimizationOpportunity,
    PerformanceIssue,
    UserExperience,
    BusinessImpact,
    TechnicalDebt,
    CompetitiveAdvantage,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InsightEvidence {
    pub service: String,
    pub data_point: String,
    pub value: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CrossServiceInsight {
    /// Stable across regenerations so dismissals stick.
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub kind: InsightKind,
    pub priority: Priority,
    pub services: Vec<String>,
    pub title: String,
    pub description: String,
    pub evidence: Vec<InsightEvidence>,
    pub recommendations: Vec<String>,
    pub confidence: f64,
}

/// Everything insight generation looks at, gathered up front.
#[derive(Debug, Clone, Default)]
pub struct InsightInputs {
    pub behavior: BehaviorInsights,
    pub alerts: Vec<PerformanceAlert>,
    pub correlations: Vec<AnalyticsCorrelation>,
    pub health: Option<AnalyticsHealth>,
    pub tests: Vec<(ABTest, Option<String>)>,
    pub competitive: Option<CompetitiveSnapshot>,
}

fn slug(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        if c.is_ascii_alphanumeric() {
            out.push(c.to_ascii_lowercase());
        } else if !out.ends_with('_') {
            out.push('_');
        }
    }
    out.trim_matches('_').to_string()
}

fn opportunity_service(kind: OpportunityKind) -> &'static str {
    match kind {
        OpportunityKind::Seo => "seo_analytics",
        OpportunityKind::Conversion => "conversion_optimizer",
        OpportunityKind::Performance => "performance",
        OpportunityKind::Content => "user_behavior",
    }
}

fn evidence(service: &str, data_point: &str, value: f64) -> InsightEvidence {
    InsightEvidence {
        service: service.to_string(),
        data_point: data_point.to_string(),
        value,
    }
}

pub fn derive_insights(inputs: &InsightInputs, now: DateTime<Utc>) -> Vec<CrossServiceInsight> {
    let mut out = Vec::new();

    for opportunity in inputs
        .behavior
        .optimization_opportunities
        .iter()
        .filter(|o| o.priority >= Priority::High)
    {
        let page = opportunity
            .affected_pages
            .first()
            .map(String::as_str)
            .unwrap_or("site");
        let service = opportunity_service(opportunity.kind);
        let mut services = vec!["user_behavior".to_string()];
        if service != "user_behavior" {
            services.push(service.to_string());
        }
        out.push(CrossServiceInsight {
            id: slug(&format!("opportunity {:?} {page}", opportunity.kind)),
            timestamp: now,
            kind: InsightKind::OptimizationOpportunity,
            priority: opportunity.priority,
            services,
            title: opportunity.description.clone(),
            description: format!(
                "{} across {} sessions; potential impact {:.1}%",
                opportunity.description, opportunity.sample_size, opportunity.potential_impact
            ),
            evidence: vec![evidence(
                "user_behavior",
                "sample_size",
                opportunity.sample_size as f64,
            )],
            recommendations: vec![opportunity.implementation.clone()],
            confidence: (opportunity.sample_size as f64 / 200.0).clamp(0.5, 0.95),
        });
    }

    for alert in &inputs.alerts {
        let page = alert.affected_pages.first().map(String::as_str).unwrap_or("site");
        out.push(CrossServiceInsight {
            id: slug(&format!("alert {:?} {page}", alert.kind)),
            timestamp: now,
            kind: InsightKind::UserExperience,
            priority: match alert.severity {
                AlertSeverity::Critical => Priority::Critical,
                AlertSeverity::Warning => Priority::High,
                AlertSeverity::Info => Priority::Medium,
            },
            services: vec!["user_behavior".to_string(), "performance".to_string()],
            title: format!("Visitors are leaving {page}"),
            description: alert.message.clone(),
            evidence: Vec::new(),
            recommendations: vec![
                "Review above-the-fold content and load time".to_string(),
                "Run an A/B test on the landing layout".to_string(),
            ],
            confidence: 0.8,
        });
    }

    if let Some(strongest) = inputs
        .correlations
        .iter()
        .filter(|c| c.strength > 0.5)
        .max_by(|a, b| a.strength.total_cmp(&b.strength))
    {
        out.push(CrossServiceInsight {
            id: "correlation_engagement_seo".to_string(),
            timestamp: now,
            kind: InsightKind::UserExperience,
            priority: Priority::Medium,
            services: vec!["user_behavior".to_string(), "seo_analytics".to_string()],
            title: "Engagement tracks SEO quality".to_string(),
            description: strongest.causality.clone(),
            evidence: vec![
                evidence("user_behavior", "pearson_r", strongest.statistics.pearson),
                evidence(
                    "user_behavior",
                    "sample_size",
                    strongest.statistics.sample_size as f64,
                ),
            ],
            recommendations: strongest.recommendations.clone(),
            confidence: 1.0 - strongest.statistics.p_value,
        });
    }

    if let Some(health) = &inputs.health {
        for service in health.services.values() {
            let (kind, priority) = match service.status {
                ServiceStatus::Healthy => continue,
                ServiceStatus::Unhealthy => (InsightKind::PerformanceIssue, Priority::Critical),
                ServiceStatus::Degraded => (InsightKind::TechnicalDebt, Priority::Medium),
            };
            out.push(CrossServiceInsight {
                id: format!("health_{}", service.service),
                timestamp: now,
                kind,
                priority,
                services: vec![service.service.clone()],
                title: format!("{} data is unreliable", service.service),
                description: format!(
                    "{:.1}% uptime with {:.1}% of calls returning usable data",
                    service.uptime, service.data_quality
                ),
                evidence: vec![
                    evidence(&service.service, "uptime", service.uptime),
                    evidence(&service.service, "error_rate", service.error_rate),
                ],
                recommendations: vec![format!("Investigate failures in {}", service.service)],
                confidence: 0.9,
            });
        }
    }

    for (test, winner) in &inputs.tests {
        let Some(winner) = winner else { continue };
        if test.status != TestStatus::Completed {
            continue;
        }
        out.push(CrossServiceInsight {
            id: format!("experiment_{}", test.id),
            timestamp: now,
            kind: InsightKind::BusinessImpact,
            priority: Priority::High,
            services: vec!["ab_testing".to_string(), "conversion_optimizer".to_string()],
            title: format!("{}: {} won", test.name, winner),
            description: format!("Test \"{}\" produced a significant winner", test.hypothesis),
            evidence: Vec::new(),
            recommendations: vec![format!("Roll out {winner} and retire the control")],
            confidence: 0.95,
        });
    }

    if let Some(competitive) = &inputs.competitive {
        for opportunity in &competitive.opportunities {
            out.push(CrossServiceInsight {
                id: slug(&format!("competitive {opportunity}")),
                timestamp: now,
                kind: InsightKind::CompetitiveAdvantage,
                priority: Priority::Low,
                services: vec!["business_intelligence".to_string()],
                title: opportunity.clone(),
                description: format!(
                    "Market opening while ranked #{} in {}",
                    competitive.rank, competitive.market
                ),
                evidence: vec![evidence(
                    "business_intelligence",
                    "market_share",
                    competitive.market_share,
                )],
                recommendations: vec![format!("Scope content for: {opportunity}")],
                confidence: 0.6,
            });
        }
    }

    out
}

/// Priority then confidence, both descending, after dropping dismissed
/// entries and applying the optional filters.
pub fn select_insights<'a>(
    insights: impl IntoIterator<Item = &'a CrossServiceInsight>,
    dismissed: &HashSet<String>,
    priority: Option<Priority>,
    services: Option<&[String]>,
    limit: Option<usize>,
) -> Vec<CrossServiceInsight> {
    let mut selected: Vec<CrossServiceInsight> = insights
        .into_iter()
        .filter(|i| !dismissed.contains(&i.id))
        .filter(|i| priority.map_or(true, |p| i.priority == p))
        .filter(|i| services.map_or(true, |s| i.services.iter().any(|svc| s.contains(svc))))
        .cloned()
        .collect();
    selected.sort_by(|a, b| {
        b.priority
            .weight()
            .cmp(&a.priority.weight())
            .then(b.confidence.total_cmp(&a.confidence))
            .then(a.id.cmp(&b.id))
    });
    if let Some(limit) = limit {
        selected.truncate(limit);
    }
    selected
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracker::{AlertKind, Opportunity};

    fn insight(id: &str, priority: Priority, confidence: f64, services: &[&str]) -> CrossServiceInsight {
        CrossServiceInsight {
            id: id.to_string(),
            timestamp: Utc::now(),
            kind: InsightKind::OptimizationOpportunity,
            priority,
            services: services.iter().map(|s| s.to_string()).collect(),
            title: id.to_string(),
            description: String::new(),
            evidence: Vec::new(),
            recommendations: Vec::new(),
            confidence,
        }
    }

    #[test]
    fn selection_orders_by_priority_then_confidence() {
        let all = vec![
            insight("a", Priority::Medium, 0.9, &["seo_analytics"]),
            insight("b", Priority::Critical, 0.5, &["user_behavior"]),
            insight("c", Priority::Critical, 0.8, &["ab_testing"]),
            insight("d", Priority::Low, 0.99, &["seo_analytics"]),
        ];
        let ids: Vec<String> = select_insights(&all, &HashSet::new(), None, None, Some(3))
            .into_iter()
            .map(|i| i.id)
            .collect();
        assert_eq!(ids, vec!["c", "b", "a"]);
    }

    #[test]
    fn dismissed_and_filtered_insights_are_dropped() {
        let all = vec![
            insight("a", Priority::High, 0.9, &["seo_analytics", "user_behavior"]),
            insight("b", Priority::High, 0.5, &["ab_testing"]),
        ];
        let dismissed: HashSet<String> = ["a".to_string()].into();
        assert_eq!(select_insights(&all, &dismissed, None, None, None).len(), 1);
        let services = vec!["user_behavior".to_string()];
        let only = select_insights(&all, &HashSet::new(), Some(Priority::High), Some(&services), None);
        assert_eq!(only.len(), 1);
        assert_eq!(only[0].id, "a");
    }

    #[test]
    fn derived_ids_are_stable_between_runs() {
        let inputs = InsightInputs {
            behavior: BehaviorInsights {
                optimization_opportunities: vec![Opportunity {
                    kind: OpportunityKind::Seo,
                    priority: Priority::High,
                    description: "High bounce on /best-brokers/ecn".to_string(),
                    potential_impact: 12.0,
                    implementation: "Tighten the intro".to_string(),
                    affected_pages: vec!["/best-brokers/ecn".to_string()],
                    sample_size: 40,
                }],
                ..BehaviorInsights::default()
            },
            alerts: vec![PerformanceAlert {
                kind: AlertKind::HighBounceRate,
                severity: AlertSeverity::Critical,
                message: "Bounce 90%".to_string(),
                affected_pages: vec!["/".to_string()],
                timestamp: Utc::now(),
            }],
            ..InsightInputs::default()
        };
        let first = derive_insights(&inputs, Utc::now());
        let second = derive_insights(&inputs, Utc::now());
        let ids: Vec<&str> = first.iter().map(|i| i.id.as_str()).collect();
        assert_eq!(ids, second.iter().map(|i| i.id.as_str()).collect::<Vec<_>>());
        assert_eq!(ids, vec!["opportunity_seo_best_brokers_ecn", "alert_highbouncerate"]);
        assert_eq!(first[1].priority, Priority::Critical);
        assert_eq!(first[0].services, vec!["user_behavior", "seo_analytics"]);
    }
}
