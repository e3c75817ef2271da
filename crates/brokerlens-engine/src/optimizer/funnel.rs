use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use brokerlens_core::priority::Priority;
use brokerlens_core::session::Session;
use brokerlens_core::stats::percent;
use brokerlens_core::time::generate_id;
use brokerlens_core::traffic::TrafficMedium;

use crate::tracker::FunnelAnalysis;

use super::attribution::group_revenue;
use super::{Effort, OptimizationKind, OptimizationRecommendation};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepType {
    Landing,
    Category,
    Comparison,
    Review,
    Signup,
    Custom,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FunnelStep {
    pub id: String,
    pub name: String,
    pub url: String,
    pub step_type: StepType,
    pub expected_duration_secs: u64,
    /// Minimum acceptable conversion from the previous step.
    pub drop_off_threshold: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConversionGoal {
    pub id: String,
    pub name: String,
    pub value: f64,
    pub currency: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SeoIntegration {
    pub track_organic: bool,
    pub keyword_tracking: bool,
    pub content_scoring: bool,
    pub target_keywords: Vec<String>,
}

impl Default for SeoIntegration {
    fn default() -> Self {
        Self {
            track_organic: true,
            keyword_tracking: true,
            content_scoring: true,
            target_keywords: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Funnel {
    pub id: String,
    pub name: String,
    pub description: String,
    pub steps: Vec<FunnelStep>,
    pub goals: Vec<ConversionGoal>,
    pub seo_integration: SeoIntegration,
    pub target_audience: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FunnelConfig {
    pub name: Option<String>,
    pub description: Option<String>,
    pub steps: Option<Vec<FunnelStep>>,
    pub goals: Option<Vec<ConversionGoal>>,
    pub seo_integration: Option<SeoIntegration>,
    pub target_audience: Option<Vec<String>>,
}

fn step(name: &str, url: &str, step_type: StepType, secs: u64, threshold: f64) -> FunnelStep {
    FunnelStep {
        id: name.to_lowercase().replace(' ', "_"),
        name: name.to_string(),
        url: url.to_string(),
        step_type,
        expected_duration_secs: secs,
        drop_off_threshold: threshold,
    }
}

/// Landing, category, comparison, signup.
pub fn default_steps() -> Vec<FunnelStep> {
    vec![
        step("Landing", "/best-brokers", StepType::Landing, 30, 0.6),
        step("Category", "/best-brokers/", StepType::Category, 120, 0.4),
        step("Comparison", "/compare", StepType::Comparison, 180, 0.3),
        step("Signup", "/signup", StepType::Signup, 300, 0.2),
    ]
}

pub fn default_goals() -> Vec<ConversionGoal> {
    vec![ConversionGoal {
        id: "broker_signup".to_string(),
        name: "Broker signup".to_string(),
        value: 50.0,
        currency: "USD".to_string(),
    }]
}

impl Funnel {
    pub fn from_config(config: FunnelConfig, now: DateTime<Utc>) -> Self {
        Self {
            id: generate_id("funnel"),
            name: config
                .name
                .filter(|n| !n.trim().is_empty())
                .unwrap_or_else(|| "Default Funnel".to_string()),
            description: config.description.unwrap_or_default(),
            steps: config
                .steps
                .filter(|s| !s.is_empty())
                .unwrap_or_else(default_steps),
            goals: config
                .goals
                .filter(|g| !g.is_empty())
                .unwrap_or_else(default_goals),
            seo_integration: config.seo_integration.unwrap_or_default(),
            target_audience: config
                .target_audience
                .filter(|a| !a.is_empty())
                .unwrap_or_else(|| vec!["all".to_string()]),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn step_urls(&self) -> Vec<String> {
        self.steps.iter().map(|s| s.url.clone()).collect()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StepMetric {
    pub step_id: String,
    pub name: String,
    pub url: String,
    pub sessions_reached: usize,
    pub conversion_rate: f64,
    pub drop_off_rate: f64,
    pub below_threshold: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DropOffPoint {
    pub step_id: String,
    pub step_index: usize,
    pub drop_off_rate: f64,
    pub threshold: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SeoContribution {
    pub organic_sessions: usize,
    pub organic_conversions: usize,
    pub organic_share: f64,
    pub organic_revenue: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AttributionRow {
    pub channel: String,
    pub conversions: usize,
    pub revenue: f64,
    pub share: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FunnelPerformance {
    pub funnel_id: String,
    pub name: String,
    /// Rates come from the fallback sequence, not measurement.
    pub estimated: bool,
    pub total_sessions: usize,
    pub steps: Vec<StepMetric>,
    pub overall_conversion_rate: f64,
    pub average_time_secs: u64,
    pub drop_off_points: Vec<DropOffPoint>,
    pub seo_contribution: SeoContribution,
    pub revenue_attribution: Vec<AttributionRow>,
    pub step_optimizations: Vec<OptimizationRecommendation>,
    pub analyzed_at: DateTime<Utc>,
}

/// Step rate used when no session data exists.
pub fn fallback_rate(index: usize) -> f64 {
    (0.8 - 0.15 * index as f64).max(0.1)
}

pub(crate) fn revenue_by_channel(sessions: &[Session]) -> Vec<AttributionRow> {
    group_revenue(sessions, |s| s.source.medium.as_str().to_string())
}

pub(crate) fn seo_contribution(sessions: &[Session]) -> SeoContribution {
    let organic: Vec<&Session> = sessions
        .iter()
        .filter(|s| s.source.medium == TrafficMedium::Organic)
        .collect();
    let organic_conversions: usize = organic.iter().map(|s| s.conversion_events.len()).sum();
    let all_conversions: usize = sessions.iter().map(|s| s.conversion_events.len()).sum();
    SeoContribution {
        organic_sessions: organic.len(),
        organic_conversions,
        organic_share: percent(organic_conversions as f64, all_conversions as f64),
        organic_revenue: organic.iter().map(|s| s.revenue()).sum(),
    }
}

fn step_recommendation(funnel: &Funnel, step: &FunnelStep, rate: f64) -> OptimizationRecommendation {
    let priority = if rate < step.drop_off_threshold / 2.0 {
        Priority::Critical
    } else {
        Priority::High
    };
    let (kind, actions) = match step.step_type {
        StepType::Landing | StepType::Category => (
            OptimizationKind::Content,
            vec![
                "Tighten headline to match search intent".to_string(),
                "Surface top-rated brokers above the fold".to_string(),
            ],
        ),
        StepType::Comparison | StepType::Review => (
            OptimizationKind::Ux,
            vec![
                "Simplify the comparison table".to_string(),
                "Add sticky call-to-action buttons".to_string(),
            ],
        ),
        StepType::Signup => (
            OptimizationKind::Conversion,
            vec![
                "Reduce signup form fields".to_string(),
                "Add regulatory trust badges near the form".to_string(),
            ],
        ),
        StepType::Custom => (
            OptimizationKind::Conversion,
            vec!["Review step content and calls to action".to_string()],
        ),
    };
    OptimizationRecommendation {
        id: generate_id("opt"),
        kind,
        priority,
        title: format!("Improve {} step of {}", step.name, funnel.name),
        description: format!(
            "Step converts at {:.1}%, below the {:.1}% threshold",
            rate * 100.0,
            step.drop_off_threshold * 100.0
        ),
        target: step.url.clone(),
        expected_impact: ((step.drop_off_threshold - rate) * 100.0).max(0.0),
        effort: Effort::Medium,
        implementation: actions,
    }
}

/// Funnel performance from measured counts, or from the fallback sequence
/// when `counts` is `None`.
pub fn compute_performance(
    funnel: &Funnel,
    counts: Option<&FunnelAnalysis>,
    sessions: &[Session],
    now: DateTime<Utc>,
) -> FunnelPerformance {
    let rates: Vec<f64> = match counts {
        Some(analysis) => analysis.steps.iter().map(|s| s.conversion_rate).collect(),
        None => (0..funnel.steps.len()).map(fallback_rate).collect(),
    };

    let mut steps = Vec::with_capacity(funnel.steps.len());
    let mut drop_off_points = Vec::new();
    let mut step_optimizations = Vec::new();
    for (i, step) in funnel.steps.iter().enumerate() {
        let rate = rates.get(i).copied().unwrap_or(0.0);
        let below = rate < step.drop_off_threshold;
        if below {
            drop_off_points.push(DropOffPoint {
                step_id: step.id.clone(),
                step_index: i,
                drop_off_rate: (1.0 - rate) * 100.0,
                threshold: step.drop_off_threshold,
            });
            step_optimizations.push(step_recommendation(funnel, step, rate));
        }
        steps.push(StepMetric {
            step_id: step.id.clone(),
            name: step.name.clone(),
            url: step.url.clone(),
            sessions_reached: counts
                .and_then(|a| a.steps.get(i))
                .map(|s| s.sessions)
                .unwrap_or(0),
            conversion_rate: rate,
            drop_off_rate: (1.0 - rate) * 100.0,
            below_threshold: below,
        });
    }

    let overall = if rates.is_empty() {
        0.0
    } else {
        rates.iter().product::<f64>() * 100.0
    };

    FunnelPerformance {
        funnel_id: funnel.id.clone(),
        name: funnel.name.clone(),
        estimated: counts.is_none(),
        total_sessions: sessions.len(),
        steps,
        overall_conversion_rate: overall,
        average_time_secs: funnel.steps.iter().map(|s| s.expected_duration_secs).sum(),
        drop_off_points,
        seo_contribution: seo_contribution(sessions),
        revenue_attribution: revenue_by_channel(sessions),
        step_optimizations,
        analyzed_at: now,
    }
}
