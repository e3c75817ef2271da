//! Business intelligence: reports, dashboards, forecasts and data quality
//! built on top of the other analytics services.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{info, warn};

use brokerlens_core::cache::{self, CacheOptions, CacheStore};
use brokerlens_core::collaborators::{
    CompetitiveSnapshot, CompetitiveSource, Forecaster, ReportDelivery, SeoAuditor,
    TrendDirection,
};
use brokerlens_core::error::{AnalyticsError, AnalyticsResult};
use brokerlens_core::session::Session;
use brokerlens_core::stats::{mean, percent};
use brokerlens_core::time::{generate_id, TimeRange, Timeframe};

use crate::aggregator::{
    series_trend, AnalyticsAggregator, Audience, CrossServiceInsight, ServiceStatus, UnifiedAlert,
    UnifiedTrend,
};
use crate::experiments::{ABTestingFramework, ExperimentFilters};
use crate::optimizer::{daily_series, ConversionOptimizer, PredictiveInsights};
use crate::tracker::{BehaviorFilters, BehaviorInsights, UserBehaviorTracker};

mod ai;
mod dashboards;
mod export;
mod quality;
mod report;
mod schedule;

pub use ai::{detect_anomaly, AiInsightContext, AiInsights, MetricAnomaly, MetricPrediction};
pub use dashboards::{
    default_dashboards, kpi_data, ChartPoint, DashboardAudience, DashboardConfig, DashboardData,
    DashboardRequest, Threshold, ThresholdOperator, ThresholdState, Widget, WidgetData,
    WidgetPosition, WidgetSize, WidgetType, DEFAULT_REFRESH_MS,
};
pub use quality::{assess_sources, ISSUE_THRESHOLD, QUALITY_SOURCES};
pub use report::{
    action_items, assess_risk, business_insights, executive_summary, metric_category,
    metric_rating, metric_target, performance_rating, performance_score, ActionItem,
    ActionStatus, BusinessForecast, BusinessInsight, BusinessInsightSource,
    BusinessIntelligenceReport, BusinessRecommendation, CompetitiveAnalysis, DataIssue,
    DataIssueKind, DataQualityReport, DataRecommendation, ExecutiveSummary, KeyMetric,
    MetricCategory, MetricForecast, MetricRating, PerformanceRating, ReportConfig, ReportType,
    Risk, RiskAssessment, RiskLevel, KEY_METRICS, UNAVAILABLE_SCORE,
};
pub use schedule::{ReportFrequency, ReportSchedule, ScheduleRequest};

const REPORT_REUSE_SECS: i64 = 60 * 60;
const REPORT_TTL: Duration = Duration::from_secs(2 * 60 * 60);
const EXECUTIVE_DASHBOARD_TTL: Duration = Duration::from_secs(15 * 60);
const PREDICTIVE_TTL: Duration = Duration::from_secs(60 * 60);
const COMPETITIVE_REUSE_SECS: i64 = 4 * 60 * 60;
const COMPETITIVE_TTL: Duration = Duration::from_secs(6 * 60 * 60);
const DATA_QUALITY_REUSE_SECS: i64 = 24 * 60 * 60;
const DATA_QUALITY_TTL: Duration = Duration::from_secs(24 * 60 * 60);
/// Readings kept per metric.
const HISTORY_CAP: usize = 90;
/// Daily points behind each forecast.
const FORECAST_HISTORY_DAYS: usize = 30;

/// Collaborators the BI service is wired with.
pub struct BiDeps {
    pub cache: Arc<dyn CacheStore>,
    pub tracker: Arc<UserBehaviorTracker>,
    pub optimizer: Arc<ConversionOptimizer>,
    pub experiments: Arc<ABTestingFramework>,
    pub aggregator: Arc<AnalyticsAggregator>,
    pub seo: Arc<dyn SeoAuditor>,
    pub competitive: Arc<dyn CompetitiveSource>,
    pub forecaster: Arc<dyn Forecaster>,
    pub delivery: Arc<dyn ReportDelivery>,
    pub export_base_url: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct MetricPoint {
    pub at: DateTime<Utc>,
    pub value: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExecutiveKpi {
    pub name: String,
    pub value: f64,
    pub previous: f64,
    pub change_percent: f64,
    pub trend: TrendDirection,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExecutiveDashboard {
    pub timeframe: Timeframe,
    pub kpis: Vec<ExecutiveKpi>,
    pub trends: Vec<UnifiedTrend>,
    pub alerts: Vec<UnifiedAlert>,
    pub insights: Vec<CrossServiceInsight>,
    pub forecasts: Vec<BusinessForecast>,
    pub competitive_updates: Vec<String>,
    pub action_items: Vec<ActionItem>,
    pub generated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scenario {
    Baseline,
    Optimistic,
    Pessimistic,
}

impl Scenario {
    pub const ALL: [Scenario; 3] = [Self::Baseline, Self::Optimistic, Self::Pessimistic];

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "baseline" => Some(Self::Baseline),
            "optimistic" => Some(Self::Optimistic),
            "pessimistic" => Some(Self::Pessimistic),
            _ => None,
        }
    }

    pub fn multiplier(&self) -> f64 {
        match self {
            Self::Baseline => 1.0,
            Self::Optimistic => 1.2,
            Self::Pessimistic => 0.8,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PredictiveForecast {
    pub metric: String,
    pub history_points: usize,
    pub predicted: Vec<f64>,
    pub predicted_total: f64,
    pub confidence: f64,
    pub trend: TrendDirection,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScenarioAnalysis {
    pub scenario: Scenario,
    pub multiplier: f64,
    pub totals: BTreeMap<String, f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PredictiveAnalytics {
    pub timeframe: Timeframe,
    pub horizon_days: usize,
    pub forecasts: Vec<PredictiveForecast>,
    pub scenarios: Vec<ScenarioAnalysis>,
    pub mean_confidence: f64,
    pub recommendations: Vec<String>,
    pub generated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CompetitorBenchmark {
    pub competitor: String,
    pub market_share: f64,
    /// Competitor share minus ours, in points.
    pub share_gap: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CompetitiveIntelligence {
    pub market_position: CompetitiveSnapshot,
    pub threat_alerts: Vec<String>,
    pub opportunities: Vec<String>,
    pub benchmarking: Vec<CompetitorBenchmark>,
    pub strategic_recommendations: Vec<String>,
    pub last_updated: DateTime<Utc>,
}

impl CompetitiveIntelligence {
    pub fn from_snapshot(snapshot: CompetitiveSnapshot, now: DateTime<Utc>) -> Self {
        let benchmarking: Vec<CompetitorBenchmark> = snapshot
            .competitors
            .iter()
            .map(|c| CompetitorBenchmark {
                competitor: c.name.clone(),
                market_share: c.market_share,
                share_gap: c.market_share - snapshot.market_share,
            })
            .collect();
        let strategic_recommendations = snapshot
            .competitors
            .iter()
            .filter(|c| c.market_share > snapshot.market_share)
            .flat_map(|c| {
                let gap = c.market_share - snapshot.market_share;
                c.weaknesses.iter().map(move |w| {
                    format!(
                        "Close the {gap:.1}pt share gap with {} by targeting: {w}",
                        c.name
                    )
                })
            })
            .collect();
        Self {
            threat_alerts: snapshot.threats.clone(),
            opportunities: snapshot.opportunities.clone(),
            benchmarking,
            strategic_recommendations,
            market_position: snapshot,
            last_updated: now,
        }
    }
}

/// Sessions started per day, oldest first.
pub(crate) fn daily_sessions(sessions: &[Session], days: usize, now: DateTime<Utc>) -> Vec<f64> {
    let mut counts = vec![0.0; days];
    let today = now.date_naive();
    for session in sessions {
        let age = (today - session.start_time.date_naive()).num_days();
        if age >= 0 && (age as usize) < days {
            counts[days - 1 - age as usize] += 1.0;
        }
    }
    counts
}

/// Daily series for metrics derived from sessions; `None` for point-in-time
/// metrics.
pub(crate) fn session_series(
    metric: &str,
    sessions: &[Session],
    days: usize,
    now: DateTime<Utc>,
) -> Option<Vec<f64>> {
    match metric {
        "conversions" => Some(daily_series(sessions, days, now).0),
        "revenue" => Some(daily_series(sessions, days, now).1),
        "organic_sessions" | "organic_traffic" | "seo_traffic" => {
            Some(daily_series(sessions, days, now).2)
        }
        "sessions" => Some(daily_sessions(sessions, days, now)),
        _ => None,
    }
}

fn customer_satisfaction(behavior: &BehaviorInsights) -> f64 {
    if behavior.total_sessions == 0 {
        return UNAVAILABLE_SCORE;
    }
    ((100.0 - behavior.bounce_rate) + behavior.overall_engagement) / 2.0
}

fn business_forecasts(predictive: &PredictiveInsights) -> Vec<BusinessForecast> {
    [
        ("conversions", &predictive.conversions),
        ("revenue", &predictive.revenue),
        ("seo_traffic", &predictive.seo_traffic),
    ]
    .into_iter()
    .map(|(metric, forecast)| BusinessForecast {
        metric: metric.to_string(),
        horizon_days: predictive.horizon_days,
        predicted_total: forecast.predicted.iter().sum(),
        confidence: forecast.confidence,
        trend: forecast.trend,
    })
    .collect()
}

pub struct BusinessIntelligence {
    cache: Arc<dyn CacheStore>,
    tracker: Arc<UserBehaviorTracker>,
    optimizer: Arc<ConversionOptimizer>,
    experiments: Arc<ABTestingFramework>,
    aggregator: Arc<AnalyticsAggregator>,
    seo: Arc<dyn SeoAuditor>,
    competitive: Arc<dyn CompetitiveSource>,
    forecaster: Arc<dyn Forecaster>,
    delivery: Arc<dyn ReportDelivery>,
    export_base_url: String,
    reports: RwLock<HashMap<String, BusinessIntelligenceReport>>,
    dashboards: RwLock<HashMap<String, DashboardConfig>>,
    schedules: RwLock<HashMap<String, ReportSchedule>>,
    history: RwLock<HashMap<String, VecDeque<MetricPoint>>>,
}

impl BusinessIntelligence {
    /// Builds the service with the three default dashboards installed.
    pub fn new(deps: BiDeps) -> Self {
        let dashboards = default_dashboards(Utc::now())
            .into_iter()
            .map(|d| (d.id.clone(), d))
            .collect();
        Self {
            cache: deps.cache,
            tracker: deps.tracker,
            optimizer: deps.optimizer,
            experiments: deps.experiments,
            aggregator: deps.aggregator,
            seo: deps.seo,
            competitive: deps.competitive,
            forecaster: deps.forecaster,
            delivery: deps.delivery,
            export_base_url: deps.export_base_url,
            reports: RwLock::new(HashMap::new()),
            dashboards: RwLock::new(dashboards),
            schedules: RwLock::new(HashMap::new()),
            history: RwLock::new(HashMap::new()),
        }
    }

    pub async fn record_metric(&self, metric: &str, value: f64, at: DateTime<Utc>) {
        let mut history = self.history.write().await;
        let series = history.entry(metric.to_string()).or_default();
        if series.len() == HISTORY_CAP {
            series.pop_front();
        }
        series.push_back(MetricPoint { at, value });
    }

    pub async fn metric_history(&self, metric: &str) -> Vec<MetricPoint> {
        self.history
            .read()
            .await
            .get(metric)
            .map(|s| s.iter().copied().collect())
            .unwrap_or_default()
    }

    pub async fn get_report(&self, report_id: &str) -> Option<BusinessIntelligenceReport> {
        self.reports.read().await.get(report_id).cloned()
    }

    /// Rate each live reading against its target and previous reading,
    /// then append it to the metric history.
    async fn key_metrics(
        &self,
        live: &[(&str, f64)],
        only: &[String],
        now: DateTime<Utc>,
    ) -> Vec<KeyMetric> {
        let mut metrics = Vec::new();
        for (name, value) in live {
            if !only.is_empty() && !only.iter().any(|m| m == name) {
                continue;
            }
            let history = self.metric_history(name).await;
            let previous = history.last().map(|p| p.value);
            let mut values: Vec<f64> = history.iter().map(|p| p.value).collect();
            values.push(*value);
            let forecast = self.forecaster.forecast(&values, 1);
            let target = metric_target(name, previous);
            metrics.push(KeyMetric {
                name: name.to_string(),
                category: metric_category(name),
                current_value: *value,
                previous_value: previous,
                target,
                trend: previous.map_or(TrendDirection::Stable, |p| {
                    TrendDirection::between(p, *value)
                }),
                rating: metric_rating(*value, target),
                forecast: MetricForecast::from(&forecast),
            });
            self.record_metric(name, *value, now).await;
        }
        metrics
    }

    pub async fn generate_report(
        &self,
        config: &ReportConfig,
    ) -> AnalyticsResult<BusinessIntelligenceReport> {
        let key = format!("bi_report:{}", serde_json::to_string(config)?);
        let now = Utc::now();
        if let Some(hit) =
            cache::cached::<BusinessIntelligenceReport>(self.cache.as_ref(), &key).await
        {
            if (now - hit.generated_at).num_seconds() < REPORT_REUSE_SECS {
                self.reports.write().await.insert(hit.id.clone(), hit.clone());
                return Ok(hit);
            }
        }

        let range = config.timeframe.range(config.custom_range, now);
        let behavior_filters = BehaviorFilters::default();
        let experiment_filters = ExperimentFilters::default();
        let (behavior, optimization, audit, experiments, competitive, health) = tokio::join!(
            self.tracker
                .get_behavior_insights(Some(range), &behavior_filters),
            self.optimizer.get_optimization_insights(None, Some(range)),
            self.seo.audit_page("/"),
            self.experiments
                .get_experiment_recommendations(&experiment_filters),
            self.get_competitive_intelligence(),
            self.aggregator.get_analytics_health(),
        );
        let optimization = optimization
            .map_err(|e| warn!(error = %e, "optimizer insights unavailable for report"))
            .ok();
        let audit = audit
            .map_err(|e| warn!(error = %e, "site audit unavailable for report"))
            .ok();
        let competitive = competitive
            .map_err(|e| warn!(error = %e, "competitive data unavailable for report"))
            .ok();

        let score = performance_score(
            (behavior.total_sessions > 0).then_some(behavior.overall_engagement),
            optimization.as_ref().map(|o| o.overall_score),
            audit.as_ref().map(|a| a.overall_score),
        );

        let revenue: f64 = self
            .tracker
            .sessions(Some(range))
            .await
            .iter()
            .map(Session::revenue)
            .sum();
        let live = [
            ("conversion_rate", behavior.conversion_rate),
            ("revenue", revenue),
            ("user_engagement", behavior.overall_engagement),
            (
                "seo_performance",
                audit.as_ref().map_or(UNAVAILABLE_SCORE, |a| a.overall_score),
            ),
            (
                "page_speed",
                audit.as_ref().map_or(UNAVAILABLE_SCORE, |a| a.performance.score),
            ),
            ("customer_satisfaction", customer_satisfaction(&behavior)),
        ];
        let key_metrics = self.key_metrics(&live, &config.custom_metrics, now).await;

        let insights = business_insights(&behavior, &experiments);
        let recommendations: Vec<BusinessRecommendation> = optimization
            .as_ref()
            .map(|o| o.recommendations.iter().map(BusinessRecommendation::from).collect())
            .unwrap_or_default();
        let forecasts = if config.include_forecasts {
            match &optimization {
                Some(o) => business_forecasts(&o.predictive),
                None => business_forecasts(&self.optimizer.get_predictive_insights(config.timeframe).await),
            }
        } else {
            Vec::new()
        };
        let competitive_analysis = match (&competitive, config.include_competitive) {
            (Some(ci), true) => CompetitiveAnalysis::from(&ci.market_position),
            _ => CompetitiveAnalysis::basic(),
        };
        let unhealthy: Vec<String> = health
            .services
            .values()
            .filter(|s| s.status == ServiceStatus::Unhealthy)
            .map(|s| s.service.clone())
            .collect();
        let threats = competitive
            .as_ref()
            .map(|ci| ci.threat_alerts.clone())
            .unwrap_or_default();
        let risk_assessment = assess_risk(&threats, &unhealthy, behavior.bounce_rate);

        let report = BusinessIntelligenceReport {
            id: generate_id("bi_report"),
            title: format!(
                "Business Intelligence Report - {}",
                config.report_type.as_str()
            ),
            report_type: config.report_type,
            timeframe: config.timeframe,
            time_range: range,
            generated_at: now,
            executive_summary: executive_summary(score, &key_metrics, &insights, &recommendations),
            action_items: action_items(&recommendations, now),
            key_metrics,
            insights,
            recommendations,
            forecasts,
            competitive_analysis,
            risk_assessment,
            data_quality: self.assess_data_quality().await,
        };

        cache::store(
            self.cache.as_ref(),
            &key,
            &report,
            CacheOptions::ttl(REPORT_TTL).tagged("bi_reports"),
        )
        .await;
        self.reports
            .write()
            .await
            .insert(report.id.clone(), report.clone());
        info!(
            report_id = %report.id,
            score = report.executive_summary.performance_score,
            "business intelligence report generated"
        );
        Ok(report)
    }

    pub async fn get_executive_dashboard(
        &self,
        timeframe: Timeframe,
        filters: &BehaviorFilters,
    ) -> ExecutiveDashboard {
        let key = format!(
            "executive_dashboard:{}:{}",
            timeframe.as_str(),
            serde_json::to_string(filters).unwrap_or_default()
        );
        if let Some(hit) = cache::cached::<ExecutiveDashboard>(self.cache.as_ref(), &key).await {
            return hit;
        }
        let now = Utc::now();
        let range = timeframe.range(None, now);
        let sessions: Vec<Session> = self
            .tracker
            .sessions(Some(range))
            .await
            .into_iter()
            .filter(|s| filters.matches(s))
            .collect();
        let days = range.days().clamp(2, 90) as usize;
        let (conversions, revenue, organic) = daily_series(&sessions, days, now);
        let visits = daily_sessions(&sessions, days, now);

        let series = [
            ("sessions", visits),
            ("conversions", conversions),
            ("revenue", revenue),
            ("organic_sessions", organic),
        ];
        let kpis = series
            .iter()
            .map(|(name, values)| {
                let half = values.len() / 2;
                let previous: f64 = values[..half].iter().sum();
                let value: f64 = values[half..].iter().sum();
                ExecutiveKpi {
                    name: name.to_string(),
                    value,
                    previous,
                    change_percent: if previous == 0.0 {
                        0.0
                    } else {
                        (value - previous) / previous * 100.0
                    },
                    trend: TrendDirection::between(previous, value),
                }
            })
            .collect();
        let trends = series
            .iter()
            .map(|(name, values)| series_trend(name, values))
            .collect();

        let alerts = self
            .aggregator
            .get_analytics_dashboard(Audience::Executive)
            .await
            .alerts;
        let insights = self
            .aggregator
            .get_cross_service_insights(None, None, Some(5))
            .await;
        let forecasts = business_forecasts(&self.optimizer.get_predictive_insights(timeframe).await);
        let competitive_updates = match self.get_competitive_intelligence().await {
            Ok(ci) => ci
                .threat_alerts
                .iter()
                .map(|t| format!("Threat: {t}"))
                .chain(ci.opportunities.iter().map(|o| format!("Opportunity: {o}")))
                .collect(),
            Err(e) => {
                warn!(error = %e, "competitive updates unavailable");
                Vec::new()
            }
        };
        let pending: Vec<BusinessRecommendation> = self
            .optimizer
            .pending_recommendations()
            .await
            .iter()
            .map(BusinessRecommendation::from)
            .collect();

        let dashboard = ExecutiveDashboard {
            timeframe,
            kpis,
            trends,
            alerts,
            insights,
            forecasts,
            competitive_updates,
            action_items: action_items(&pending, now),
            generated_at: now,
        };
        cache::store(
            self.cache.as_ref(),
            &key,
            &dashboard,
            CacheOptions::ttl(EXECUTIVE_DASHBOARD_TTL).tagged("executive_dashboard"),
        )
        .await;
        dashboard
    }

    /// Forecast each named metric over the timeframe. Session-derived
    /// metrics use their daily series; anything else uses the recorded
    /// metric history.
    pub async fn get_predictive_analytics(
        &self,
        metrics: &[String],
        timeframe: Timeframe,
        scenarios: &[String],
    ) -> AnalyticsResult<PredictiveAnalytics> {
        if metrics.is_empty() {
            return Err(AnalyticsError::validation("At least one metric is required"));
        }
        let scenarios: Vec<Scenario> = if scenarios.is_empty() {
            Scenario::ALL.to_vec()
        } else {
            scenarios
                .iter()
                .map(|raw| {
                    Scenario::parse(raw).ok_or_else(|| {
                        AnalyticsError::validation(format!("Unknown scenario: {raw}"))
                    })
                })
                .collect::<AnalyticsResult<_>>()?
        };
        let key = format!(
            "predictive_analytics:{}:{}:{}",
            metrics.join(","),
            timeframe.as_str(),
            serde_json::to_string(&scenarios)?
        );
        if let Some(hit) = cache::cached::<PredictiveAnalytics>(self.cache.as_ref(), &key).await {
            return Ok(hit);
        }

        let now = Utc::now();
        let horizon = timeframe.duration().num_days().max(1) as usize;
        let sessions = self.tracker.sessions(None).await;
        let mut forecasts = Vec::with_capacity(metrics.len());
        for metric in metrics {
            let history = match session_series(metric, &sessions, FORECAST_HISTORY_DAYS, now) {
                Some(series) => series,
                None => self
                    .metric_history(metric)
                    .await
                    .iter()
                    .map(|p| p.value)
                    .collect(),
            };
            let forecast = self.forecaster.forecast(&history, horizon);
            forecasts.push(PredictiveForecast {
                metric: metric.clone(),
                history_points: history.len(),
                predicted_total: forecast.predicted.iter().sum(),
                predicted: forecast.predicted,
                confidence: forecast.confidence,
                trend: forecast.trend,
            });
        }

        let scenarios = scenarios
            .into_iter()
            .map(|scenario| ScenarioAnalysis {
                scenario,
                multiplier: scenario.multiplier(),
                totals: forecasts
                    .iter()
                    .map(|f| (f.metric.clone(), f.predicted_total * scenario.multiplier()))
                    .collect(),
            })
            .collect();
        let confidences: Vec<f64> = forecasts.iter().map(|f| f.confidence).collect();
        let recommendations = forecasts
            .iter()
            .filter(|f| f.trend == TrendDirection::Decreasing)
            .map(|f| format!("{} is projected to decline; review its drivers", f.metric))
            .collect();
        let analytics = PredictiveAnalytics {
            timeframe,
            horizon_days: horizon,
            forecasts,
            scenarios,
            mean_confidence: mean(&confidences).unwrap_or(0.0),
            recommendations,
            generated_at: now,
        };
        cache::store(
            self.cache.as_ref(),
            &key,
            &analytics,
            CacheOptions::ttl(PREDICTIVE_TTL).tagged("predictive_analytics"),
        )
        .await;
        Ok(analytics)
    }

    pub async fn get_competitive_intelligence(&self) -> AnalyticsResult<CompetitiveIntelligence> {
        let key = "competitive_intelligence";
        let now = Utc::now();
        if let Some(hit) =
            cache::cached::<CompetitiveIntelligence>(self.cache.as_ref(), key).await
        {
            if (now - hit.last_updated).num_seconds() < COMPETITIVE_REUSE_SECS {
                return Ok(hit);
            }
        }
        let snapshot = self.competitive.market_position().await?;
        let intelligence = CompetitiveIntelligence::from_snapshot(snapshot, now);
        cache::store(
            self.cache.as_ref(),
            key,
            &intelligence,
            CacheOptions::ttl(COMPETITIVE_TTL).tagged("competitive_intelligence"),
        )
        .await;
        Ok(intelligence)
    }

    pub async fn assess_data_quality(&self) -> DataQualityReport {
        let key = "data_quality_assessment";
        let now = Utc::now();
        if let Some(hit) = cache::cached::<DataQualityReport>(self.cache.as_ref(), key).await {
            if (now - hit.last_assessment).num_seconds() < DATA_QUALITY_REUSE_SECS {
                return hit;
            }
        }
        let probes = self.aggregator.probe_stats().await;
        let sessions = self.tracker.sessions(None).await;
        let completeness = if sessions.is_empty() {
            100.0
        } else {
            let clean = sessions.iter().filter(|s| s.error.is_none()).count();
            percent(clean as f64, sessions.len() as f64)
        };
        let report = assess_sources(&probes, completeness, now);
        for issue in &report.issues {
            warn!(
                source = %issue.source,
                severity = issue.severity.as_str(),
                "data quality issue"
            );
        }
        cache::store(
            self.cache.as_ref(),
            key,
            &report,
            CacheOptions::ttl(DATA_QUALITY_TTL).tagged("data_quality"),
        )
        .await;
        report
    }

    /// Series used by the anomaly and prediction passes, keyed by metric.
    async fn ai_series(&self, days: usize, now: DateTime<Utc>) -> BTreeMap<String, Vec<f64>> {
        let mut series: BTreeMap<String, Vec<f64>> = self
            .history
            .read()
            .await
            .iter()
            .map(|(name, points)| (name.clone(), points.iter().map(|p| p.value).collect()))
            .collect();
        let sessions = self.tracker.sessions(Some(TimeRange::last(
            chrono::Duration::days(days as i64),
            now,
        )))
        .await;
        for metric in ["sessions", "conversions", "revenue"] {
            if let Some(values) = session_series(metric, &sessions, days, now) {
                series.insert(format!("daily_{metric}"), values);
            }
        }
        series
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use brokerlens_core::session::{DeviceType, SeoAttribution, SessionPerformance, TrafficSource};
    use brokerlens_core::traffic::TrafficMedium;
    use chrono::Duration as ChronoDuration;

    #[test]
    fn competitive_benchmarks_measure_share_gap() {
        let snapshot = brokerlens_core::collaborators::StaticCompetitiveSource::snapshot();
        let ci = CompetitiveIntelligence::from_snapshot(snapshot, Utc::now());
        assert_eq!(ci.benchmarking.len(), 2);
        assert!((ci.benchmarking[0].share_gap - 5.7).abs() < 1e-9);
        assert!(ci.strategic_recommendations[0].contains("BrokerChooser"));
        assert_eq!(ci.threat_alerts, vec!["Search algorithm updates".to_string()]);
    }

    #[test]
    fn scenarios_parse_and_scale() {
        assert_eq!(Scenario::parse("optimistic"), Some(Scenario::Optimistic));
        assert_eq!(Scenario::parse("apocalyptic"), None);
        assert_eq!(Scenario::Pessimistic.multiplier(), 0.8);
    }

    fn session_at(start: DateTime<Utc>) -> Session {
        Session {
            session_id: generate_id("sess"),
            user_id: None,
            device_id: "d".into(),
            device_type: DeviceType::Desktop,
            start_time: start,
            last_activity: start,
            total_duration_ms: 0,
            page_views: 1,
            current_page: "/".into(),
            interactions: Vec::new(),
            source: TrafficSource {
                medium: TrafficMedium::Direct,
                source: "direct".into(),
                campaign: None,
                keyword: None,
                referrer: None,
                landing_page: "/".into(),
                seo_page: None,
            },
            seo_attribution: SeoAttribution::default(),
            conversion_events: Vec::new(),
            performance: SessionPerformance::default(),
            ended_at: None,
            error: None,
        }
    }

    #[test]
    fn daily_sessions_bucket_by_age() {
        let now = Utc::now();
        let sessions = vec![
            session_at(now - ChronoDuration::days(1)),
            session_at(now),
            session_at(now),
            session_at(now - ChronoDuration::days(10)),
        ];
        assert_eq!(daily_sessions(&sessions, 3, now), vec![0.0, 1.0, 2.0]);
        assert!(session_series("bounce_rate", &sessions, 3, now).is_none());
        assert_eq!(session_series("sessions", &sessions, 3, now).map(|s| s.len()), Some(3));
    }
}
