use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use brokerlens_core::priority::Priority;
use brokerlens_core::time::generate_id;

use crate::optimizer::Effort;

/// Share of a metric's gap a plan expects to close.
const EXPECTED_GAP_CLOSURE: f64 = 0.6;

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct OptimizationTargets {
    pub user_experience: Option<f64>,
    /// Percent.
    pub conversion_rate: Option<f64>,
    pub seo_performance: Option<f64>,
    pub page_speed: Option<f64>,
    pub business_impact: Option<f64>,
}

impl OptimizationTargets {
    fn entries(&self) -> Vec<(&'static str, f64)> {
        [
            ("user_experience", self.user_experience),
            ("conversion_rate", self.conversion_rate),
            ("seo_performance", self.seo_performance),
            ("page_speed", self.page_speed),
            ("business_impact", self.business_impact),
        ]
        .into_iter()
        .filter_map(|(name, value)| value.map(|v| (name, v)))
        .collect()
    }
}

/// Present readings of the metrics a plan can target.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct CurrentMetrics {
    pub user_experience: f64,
    pub conversion_rate: f64,
    pub seo_performance: f64,
    pub page_speed: f64,
    pub business_impact: f64,
}

impl CurrentMetrics {
    fn get(&self, metric: &str) -> f64 {
        match metric {
            "user_experience" => self.user_experience,
            "conversion_rate" => self.conversion_rate,
            "seo_performance" => self.seo_performance,
            "page_speed" => self.page_speed,
            _ => self.business_impact,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PlannedAction {
    pub service: String,
    pub metric: String,
    pub action: String,
    pub current: f64,
    pub target: f64,
    pub gap: f64,
    pub priority: Priority,
    pub effort: Effort,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PlanPhase {
    pub name: String,
    pub duration_days: u32,
    pub actions: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UnifiedOptimizationPlan {
    pub id: String,
    pub targets: BTreeMap<String, f64>,
    pub actions: Vec<PlannedAction>,
    pub phases: Vec<PlanPhase>,
    pub total_duration_days: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MonitoringPlan {
    pub metrics: Vec<String>,
    pub frequency: String,
    /// Alert when a metric falls below its floor.
    pub thresholds: BTreeMap<String, f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UnifiedOptimization {
    pub plan: UnifiedOptimizationPlan,
    pub expected_impact: BTreeMap<String, f64>,
    pub monitoring: MonitoringPlan,
    pub generated_at: DateTime<Utc>,
}

fn playbook(metric: &str) -> (&'static str, &'static str, Effort) {
    match metric {
        "user_experience" => (
            "user_behavior",
            "Simplify comparison tables and reduce layout shift",
            Effort::Low,
        ),
        "conversion_rate" => (
            "conversion_optimizer",
            "Test broker signup CTA placement and form length",
            Effort::Medium,
        ),
        "seo_performance" => (
            "seo_analytics",
            "Fix on-page SEO issues on top landing pages",
            Effort::High,
        ),
        "page_speed" => (
            "performance",
            "Defer non-critical scripts and compress hero images",
            Effort::Medium,
        ),
        _ => (
            "business_intelligence",
            "Focus content on highest-revenue broker categories",
            Effort::High,
        ),
    }
}

fn gap_priority(gap: f64, target: f64) -> Priority {
    let ratio = if target > 0.0 { gap / target } else { 0.0 };
    if ratio > 0.3 {
        Priority::Critical
    } else if ratio > 0.15 {
        Priority::High
    } else if ratio > 0.05 {
        Priority::Medium
    } else {
        Priority::Low
    }
}

pub fn build_plan(
    targets: &OptimizationTargets,
    current: &CurrentMetrics,
    now: DateTime<Utc>,
) -> UnifiedOptimization {
    let entries = targets.entries();
    let mut actions: Vec<PlannedAction> = entries
        .iter()
        .filter_map(|(metric, target)| {
            let current = current.get(metric);
            let gap = target - current;
            (gap > 0.0).then(|| {
                let (service, action, effort) = playbook(metric);
                PlannedAction {
                    service: service.to_string(),
                    metric: metric.to_string(),
                    action: action.to_string(),
                    current,
                    target: *target,
                    gap,
                    priority: gap_priority(gap, *target),
                    effort,
                }
            })
        })
        .collect();
    actions.sort_by(|a, b| b.priority.cmp(&a.priority).then(a.metric.cmp(&b.metric)));

    let quick: Vec<String> = actions
        .iter()
        .filter(|a| a.effort != Effort::High)
        .map(|a| a.action.clone())
        .collect();
    let core: Vec<String> = actions
        .iter()
        .filter(|a| a.effort == Effort::High)
        .map(|a| a.action.clone())
        .collect();
    let mut phases = Vec::new();
    if !quick.is_empty() {
        phases.push(PlanPhase {
            name: "Quick wins".to_string(),
            duration_days: 14,
            actions: quick,
        });
    }
    if !core.is_empty() {
        phases.push(PlanPhase {
            name: "Core improvements".to_string(),
            duration_days: 30,
            actions: core,
        });
    }
    if !actions.is_empty() {
        phases.push(PlanPhase {
            name: "Validation".to_string(),
            duration_days: 14,
            actions: vec!["A/B test shipped changes against the previous baseline".to_string()],
        });
    }
    let total_duration_days = phases.iter().map(|p| p.duration_days).sum();

    let expected_impact = actions
        .iter()
        .map(|a| (a.metric.clone(), a.gap * EXPECTED_GAP_CLOSURE))
        .collect();
    let monitoring = MonitoringPlan {
        metrics: entries.iter().map(|(m, _)| m.to_string()).collect(),
        frequency: "daily".to_string(),
        thresholds: entries
            .iter()
            .map(|(m, _)| (m.to_string(), current.get(m)))
            .collect(),
    };

    UnifiedOptimization {
        plan: UnifiedOptimizationPlan {
            id: generate_id("plan"),
            targets: entries.iter().map(|(m, v)| (m.to_string(), *v)).collect(),
            actions,
            phases,
            total_duration_days,
        },
        expected_impact,
        monitoring,
        generated_at: now,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn current() -> CurrentMetrics {
        CurrentMetrics {
            user_experience: 84.0,
            conversion_rate: 2.0,
            seo_performance: 74.0,
            page_speed: 80.0,
            business_impact: 60.0,
        }
    }

    #[test]
    fn only_shortfalls_become_actions() {
        let targets = OptimizationTargets {
            user_experience: Some(80.0),
            conversion_rate: Some(4.0),
            seo_performance: Some(80.0),
            ..Default::default()
        };
        let out = build_plan(&targets, &current(), Utc::now());
        let metrics: Vec<&str> = out.plan.actions.iter().map(|a| a.metric.as_str()).collect();
        assert_eq!(metrics, vec!["conversion_rate", "seo_performance"]);
        assert_eq!(out.plan.actions[0].priority, Priority::Critical);
        assert!((out.expected_impact["conversion_rate"] - 1.2).abs() < 1e-9);
        assert_eq!(out.monitoring.metrics.len(), 3);
        assert_eq!(out.plan.total_duration_days, 58);
    }

    #[test]
    fn met_targets_produce_empty_plan() {
        let targets = OptimizationTargets {
            page_speed: Some(50.0),
            ..Default::default()
        };
        let out = build_plan(&targets, &current(), Utc::now());
        assert!(out.plan.actions.is_empty());
        assert!(out.plan.phases.is_empty());
        assert_eq!(out.monitoring.thresholds["page_speed"], 80.0);
    }
}
