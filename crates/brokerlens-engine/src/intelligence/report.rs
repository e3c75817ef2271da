use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use brokerlens_core::collaborators::{CompetitiveSnapshot, Forecast, TrendDirection};
use brokerlens_core::priority::Priority;
use brokerlens_core::time::{generate_id, TimeRange, Timeframe};

use crate::experiments::ExperimentRecommendations;
use crate::optimizer::OptimizationRecommendation;
use crate::tracker::{BehaviorInsights, Opportunity};

use super::dashboards::DashboardAudience;

/// Stand-in score for an input that could not be gathered.
pub const UNAVAILABLE_SCORE: f64 = 50.0;

pub const KEY_METRICS: [&str; 6] = [
    "conversion_rate",
    "revenue",
    "user_engagement",
    "seo_performance",
    "page_speed",
    "customer_satisfaction",
];

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportType {
    #[default]
    Executive,
    Operational,
    Tactical,
    Compliance,
    AdHoc,
}

impl ReportType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Executive => "executive",
            Self::Operational => "operational",
            Self::Tactical => "tactical",
            Self::Compliance => "compliance",
            Self::AdHoc => "ad_hoc",
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ReportConfig {
    pub report_type: ReportType,
    pub timeframe: Timeframe,
    /// Overrides `timeframe` when set.
    pub custom_range: Option<TimeRange>,
    pub audience: DashboardAudience,
    pub include_forecasts: bool,
    pub include_competitive: bool,
    /// Restricts the key metrics to these names when non-empty.
    pub custom_metrics: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PerformanceRating {
    Excellent,
    Good,
    Average,
    BelowAverage,
    Poor,
}

pub fn performance_rating(score: f64) -> PerformanceRating {
    if score >= 90.0 {
        PerformanceRating::Excellent
    } else if score >= 75.0 {
        PerformanceRating::Good
    } else if score >= 60.0 {
        PerformanceRating::Average
    } else if score >= 45.0 {
        PerformanceRating::BelowAverage
    } else {
        PerformanceRating::Poor
    }
}

/// Weighted blend of engagement, conversion and SEO scores. Missing
/// inputs count as [`UNAVAILABLE_SCORE`].
pub fn performance_score(engagement: Option<f64>, conversion: Option<f64>, seo: Option<f64>) -> f64 {
    engagement.unwrap_or(UNAVAILABLE_SCORE) * 0.3
        + conversion.unwrap_or(UNAVAILABLE_SCORE) * 0.3
        + seo.unwrap_or(UNAVAILABLE_SCORE) * 0.4
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExecutiveSummary {
    pub overall_performance: PerformanceRating,
    pub performance_score: f64,
    pub key_achievements: Vec<String>,
    pub critical_issues: Vec<String>,
    pub opportunities_identified: usize,
    pub recommended_actions: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricCategory {
    Financial,
    Operational,
    Customer,
    Seo,
    Technical,
}

pub fn metric_category(metric: &str) -> MetricCategory {
    if metric.contains("revenue") || metric.contains("cost") {
        MetricCategory::Financial
    } else if metric.contains("seo") {
        MetricCategory::Seo
    } else if metric.contains("user") || metric.contains("customer") {
        MetricCategory::Customer
    } else if metric.contains("performance") || metric.contains("speed") {
        MetricCategory::Technical
    } else {
        MetricCategory::Operational
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricRating {
    Excellent,
    Good,
    Satisfactory,
    NeedsImprovement,
    Critical,
}

pub fn metric_rating(value: f64, target: f64) -> MetricRating {
    let attainment = if target <= 0.0 { 1.0 } else { value / target };
    if attainment >= 1.0 {
        MetricRating::Excellent
    } else if attainment >= 0.9 {
        MetricRating::Good
    } else if attainment >= 0.75 {
        MetricRating::Satisfactory
    } else if attainment >= 0.5 {
        MetricRating::NeedsImprovement
    } else {
        MetricRating::Critical
    }
}

/// Target a key metric is rated against. Revenue is rated against its
/// previous reading.
pub fn metric_target(metric: &str, previous: Option<f64>) -> f64 {
    match metric {
        "conversion_rate" => 5.0,
        "user_engagement" => 70.0,
        "seo_performance" => 80.0,
        "page_speed" => 85.0,
        "customer_satisfaction" => 75.0,
        _ => previous.unwrap_or(0.0),
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MetricForecast {
    pub next_period: f64,
    pub confidence: f64,
}

impl From<&Forecast> for MetricForecast {
    fn from(forecast: &Forecast) -> Self {
        Self {
            next_period: forecast.predicted.first().copied().unwrap_or(0.0),
            confidence: forecast.confidence,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct KeyMetric {
    pub name: String,
    pub category: MetricCategory,
    pub current_value: f64,
    pub previous_value: Option<f64>,
    pub target: f64,
    pub trend: TrendDirection,
    pub rating: MetricRating,
    pub forecast: MetricForecast,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BusinessInsightSource {
    UserBehavior,
    Experiments,
    Seo,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BusinessInsight {
    pub title: String,
    pub description: String,
    pub priority: Priority,
    pub impact: f64,
    pub source: BusinessInsightSource,
}

impl From<&Opportunity> for BusinessInsight {
    fn from(opportunity: &Opportunity) -> Self {
        Self {
            title: opportunity.description.clone(),
            description: opportunity.implementation.clone(),
            priority: opportunity.priority,
            impact: opportunity.potential_impact,
            source: BusinessInsightSource::UserBehavior,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BusinessRecommendation {
    pub title: String,
    pub description: String,
    pub priority: Priority,
    pub expected_impact: f64,
    pub owner: String,
}

impl From<&OptimizationRecommendation> for BusinessRecommendation {
    fn from(rec: &OptimizationRecommendation) -> Self {
        Self {
            title: rec.title.clone(),
            description: rec.description.clone(),
            priority: rec.priority,
            expected_impact: rec.expected_impact,
            owner: "conversion_optimizer".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BusinessForecast {
    pub metric: String,
    pub horizon_days: usize,
    pub predicted_total: f64,
    pub confidence: f64,
    pub trend: TrendDirection,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CompetitiveAnalysis {
    pub segment: String,
    pub rank: u32,
    pub market_share: f64,
    pub growth: f64,
    pub competitors: Vec<String>,
    pub opportunities: Vec<String>,
    pub threats: Vec<String>,
}

impl CompetitiveAnalysis {
    /// Fixed positioning used when live competitive data is not requested.
    pub fn basic() -> Self {
        Self {
            segment: "Forex Brokers".to_string(),
            rank: 5,
            market_share: 12.5,
            growth: 8.3,
            competitors: Vec::new(),
            opportunities: Vec::new(),
            threats: Vec::new(),
        }
    }
}

impl From<&CompetitiveSnapshot> for CompetitiveAnalysis {
    fn from(snapshot: &CompetitiveSnapshot) -> Self {
        Self {
            segment: snapshot.market.clone(),
            rank: snapshot.rank,
            market_share: snapshot.market_share,
            growth: snapshot.growth_rate,
            competitors: snapshot.competitors.iter().map(|c| c.name.clone()).collect(),
            opportunities: snapshot.opportunities.clone(),
            threats: snapshot.threats.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Risk {
    pub category: String,
    pub description: String,
    pub probability: f64,
    pub impact: f64,
    pub mitigation: String,
}

impl Risk {
    pub fn exposure(&self) -> f64 {
        self.probability * self.impact
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RiskAssessment {
    pub overall_risk: RiskLevel,
    pub top_risks: Vec<Risk>,
}

/// Risks from market threats, unhealthy services and visitor bounce.
pub fn assess_risk(
    threats: &[String],
    unhealthy_services: &[String],
    bounce_rate: f64,
) -> RiskAssessment {
    let mut risks: Vec<Risk> = threats
        .iter()
        .map(|t| Risk {
            category: "market".to_string(),
            description: t.clone(),
            probability: 0.5,
            impact: 0.6,
            mitigation: "Track competitor moves weekly".to_string(),
        })
        .collect();
    risks.extend(unhealthy_services.iter().map(|s| Risk {
        category: "operational".to_string(),
        description: format!("{s} is unhealthy"),
        probability: 0.8,
        impact: 0.7,
        mitigation: format!("Restore {s} and backfill its data"),
    }));
    if bounce_rate > 60.0 {
        risks.push(Risk {
            category: "customer".to_string(),
            description: format!("Bounce rate at {bounce_rate:.1}%"),
            probability: 0.7,
            impact: 0.5,
            mitigation: "Rework landing pages for search intent".to_string(),
        });
    }
    risks.sort_by(|a, b| b.exposure().total_cmp(&a.exposure()));
    let worst = risks.first().map_or(0.0, Risk::exposure);
    RiskAssessment {
        overall_risk: if worst >= 0.5 {
            RiskLevel::High
        } else if worst >= 0.25 {
            RiskLevel::Medium
        } else {
            RiskLevel::Low
        },
        top_risks: risks.into_iter().take(5).collect(),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionStatus {
    Planned,
    InProgress,
    Completed,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ActionItem {
    pub id: String,
    pub title: String,
    pub description: String,
    pub priority: Priority,
    pub owner: String,
    pub due_date: DateTime<Utc>,
    pub status: ActionStatus,
}

/// One action per critical or high recommendation, due in one or two
/// weeks respectively.
pub fn action_items(recommendations: &[BusinessRecommendation], now: DateTime<Utc>) -> Vec<ActionItem> {
    recommendations
        .iter()
        .filter(|r| r.priority >= Priority::High)
        .map(|r| ActionItem {
            id: generate_id("action"),
            title: r.title.clone(),
            description: r.description.clone(),
            priority: r.priority,
            owner: r.owner.clone(),
            due_date: now
                + Duration::days(if r.priority == Priority::Critical { 7 } else { 14 }),
            status: ActionStatus::Planned,
        })
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataIssueKind {
    Completeness,
    Accuracy,
    Consistency,
    Timeliness,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DataIssue {
    pub source: String,
    pub kind: DataIssueKind,
    pub description: String,
    pub severity: Priority,
    pub impact: f64,
    pub solution: String,
    pub timeline_days: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DataRecommendation {
    pub area: String,
    pub recommendation: String,
    pub priority: Priority,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DataQualityReport {
    pub overall_score: f64,
    pub completeness: f64,
    pub accuracy: f64,
    pub consistency: f64,
    pub timeliness: f64,
    pub source_scores: Vec<(String, f64)>,
    pub issues: Vec<DataIssue>,
    pub recommendations: Vec<DataRecommendation>,
    pub sources_assessed: usize,
    pub last_assessment: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BusinessIntelligenceReport {
    pub id: String,
    pub title: String,
    pub report_type: ReportType,
    pub timeframe: Timeframe,
    pub time_range: TimeRange,
    pub generated_at: DateTime<Utc>,
    pub executive_summary: ExecutiveSummary,
    pub key_metrics: Vec<KeyMetric>,
    pub insights: Vec<BusinessInsight>,
    pub recommendations: Vec<BusinessRecommendation>,
    pub forecasts: Vec<BusinessForecast>,
    pub competitive_analysis: CompetitiveAnalysis,
    pub risk_assessment: RiskAssessment,
    pub action_items: Vec<ActionItem>,
    pub data_quality: DataQualityReport,
}

/// Business insights from behavior opportunities and high-impact test
/// ideas, most urgent first.
pub fn business_insights(
    behavior: &BehaviorInsights,
    experiments: &ExperimentRecommendations,
) -> Vec<BusinessInsight> {
    let mut insights: Vec<BusinessInsight> = behavior
        .optimization_opportunities
        .iter()
        .map(BusinessInsight::from)
        .collect();
    insights.extend(experiments.high_impact_tests.iter().map(|t| BusinessInsight {
        title: t.title.clone(),
        description: t.hypothesis.clone(),
        priority: t.priority,
        impact: t.expected_impact,
        source: if t.seo_focused {
            BusinessInsightSource::Seo
        } else {
            BusinessInsightSource::Experiments
        },
    }));
    insights.sort_by(|a, b| {
        b.priority
            .cmp(&a.priority)
            .then(b.impact.total_cmp(&a.impact))
    });
    insights
}

pub fn executive_summary(
    score: f64,
    key_metrics: &[KeyMetric],
    insights: &[BusinessInsight],
    recommendations: &[BusinessRecommendation],
) -> ExecutiveSummary {
    ExecutiveSummary {
        overall_performance: performance_rating(score),
        performance_score: score,
        key_achievements: key_metrics
            .iter()
            .filter(|m| {
                matches!(m.rating, MetricRating::Excellent | MetricRating::Good)
                    || m.trend == TrendDirection::Increasing
            })
            .map(|m| format!("{} at {:.1}", m.name, m.current_value))
            .collect(),
        critical_issues: insights
            .iter()
            .filter(|i| i.priority >= Priority::High)
            .map(|i| i.title.clone())
            .collect(),
        opportunities_identified: insights.len(),
        recommended_actions: recommendations.len(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rating_bands() {
        assert_eq!(performance_rating(90.0), PerformanceRating::Excellent);
        assert_eq!(performance_rating(75.0), PerformanceRating::Good);
        assert_eq!(performance_rating(60.0), PerformanceRating::Average);
        assert_eq!(performance_rating(45.0), PerformanceRating::BelowAverage);
        assert_eq!(performance_rating(44.9), PerformanceRating::Poor);
    }

    #[test]
    fn missing_inputs_score_fifty() {
        assert!((performance_score(None, None, None) - 50.0).abs() < 1e-9);
        let s = performance_score(Some(80.0), Some(60.0), Some(70.0));
        assert!((s - (24.0 + 18.0 + 28.0)).abs() < 1e-9);
    }

    #[test]
    fn categories_follow_metric_names() {
        assert_eq!(metric_category("revenue"), MetricCategory::Financial);
        assert_eq!(metric_category("acquisition_cost"), MetricCategory::Financial);
        assert_eq!(metric_category("seo_performance"), MetricCategory::Seo);
        assert_eq!(metric_category("user_engagement"), MetricCategory::Customer);
        assert_eq!(metric_category("customer_satisfaction"), MetricCategory::Customer);
        assert_eq!(metric_category("page_speed"), MetricCategory::Technical);
        assert_eq!(metric_category("conversion_rate"), MetricCategory::Operational);
    }

    #[test]
    fn basic_competitive_analysis_is_fixed() {
        let basic = CompetitiveAnalysis::basic();
        assert_eq!(basic.segment, "Forex Brokers");
        assert_eq!(basic.rank, 5);
        assert_eq!(basic.market_share, 12.5);
        assert_eq!(basic.growth, 8.3);
    }

    #[test]
    fn unhealthy_service_raises_overall_risk() {
        let calm = assess_risk(&[], &[], 30.0);
        assert_eq!(calm.overall_risk, RiskLevel::Low);
        let market = assess_risk(&["Algorithm update".to_string()], &[], 30.0);
        assert_eq!(market.overall_risk, RiskLevel::Medium);
        let outage = assess_risk(&[], &["seo_analytics".to_string()], 30.0);
        assert_eq!(outage.overall_risk, RiskLevel::High);
        assert_eq!(outage.top_risks[0].category, "operational");
    }

    #[test]
    fn only_urgent_recommendations_become_actions() {
        let now = Utc::now();
        let rec = |priority| BusinessRecommendation {
            title: "t".into(),
            description: "d".into(),
            priority,
            expected_impact: 5.0,
            owner: "conversion_optimizer".into(),
        };
        let items = action_items(&[rec(Priority::Low), rec(Priority::Critical), rec(Priority::High)], now);
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].due_date - now, Duration::days(7));
        assert_eq!(items[1].due_date - now, Duration::days(14));
    }

    #[test]
    fn metric_rating_uses_attainment() {
        assert_eq!(metric_rating(5.0, 5.0), MetricRating::Excellent);
        assert_eq!(metric_rating(4.6, 5.0), MetricRating::Good);
        assert_eq!(metric_rating(1.0, 5.0), MetricRating::Critical);
        assert_eq!(metric_target("revenue", Some(1200.0)), 1200.0);
    }
}
