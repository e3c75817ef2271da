use std::collections::BTreeMap;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use brokerlens_core::cache::{self, CacheOptions};
use brokerlens_core::collaborators::TrendDirection;
use brokerlens_core::error::{AnalyticsError, AnalyticsResult};
use brokerlens_core::priority::Priority;
use brokerlens_core::session::Session;
use brokerlens_core::time::generate_id;

use crate::tracker::BehaviorFilters;

use super::{session_series, BusinessIntelligence};

pub const DEFAULT_REFRESH_MS: u64 = 300_000;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DashboardAudience {
    Executive,
    Management,
    #[default]
    Operational,
    Technical,
    Analyst,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WidgetType {
    Kpi,
    Chart,
    Table,
    Gauge,
    Map,
    Text,
    Image,
    Custom,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThresholdOperator {
    Less,
    Greater,
    Equal,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Threshold {
    pub metric: String,
    pub operator: ThresholdOperator,
    pub value: f64,
    pub severity: Priority,
}

impl Threshold {
    pub fn triggered_by(&self, value: f64) -> bool {
        match self.operator {
            ThresholdOperator::Less => value < self.value,
            ThresholdOperator::Greater => value > self.value,
            ThresholdOperator::Equal => (value - self.value).abs() < f64::EPSILON,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct WidgetPosition {
    pub row: u32,
    pub column: u32,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct WidgetSize {
    pub width: u32,
    pub height: u32,
}

impl Default for WidgetSize {
    fn default() -> Self {
        Self {
            width: 300,
            height: 200,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Widget {
    pub id: String,
    pub widget_type: WidgetType,
    pub title: String,
    pub data_source: String,
    pub metrics: Vec<String>,
    #[serde(default = "default_aggregation")]
    pub aggregation: String,
    #[serde(default)]
    pub thresholds: Vec<Threshold>,
    #[serde(default)]
    pub position: WidgetPosition,
    #[serde(default)]
    pub size: WidgetSize,
}

fn default_aggregation() -> String {
    "sum".to_string()
}

impl Widget {
    pub fn metric(&self) -> &str {
        self.metrics.first().map(String::as_str).unwrap_or("sessions")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DashboardConfig {
    pub id: String,
    pub name: String,
    pub description: String,
    pub audience: DashboardAudience,
    pub refresh_interval_ms: u64,
    pub widgets: Vec<Widget>,
    pub created_at: DateTime<Utc>,
}

/// Fields a caller may set when creating a dashboard; the rest default.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DashboardRequest {
    pub name: Option<String>,
    pub description: Option<String>,
    pub audience: Option<DashboardAudience>,
    pub refresh_interval_ms: Option<u64>,
    pub widgets: Vec<Widget>,
}

impl DashboardRequest {
    pub fn into_config(self, now: DateTime<Utc>) -> DashboardConfig {
        DashboardConfig {
            id: generate_id("dashboard"),
            name: self.name.unwrap_or_else(|| "Custom Dashboard".to_string()),
            description: self.description.unwrap_or_default(),
            audience: self.audience.unwrap_or_default(),
            refresh_interval_ms: self
                .refresh_interval_ms
                .filter(|ms| *ms > 0)
                .unwrap_or(DEFAULT_REFRESH_MS),
            widgets: self.widgets,
            created_at: now,
        }
    }
}

/// Executive Overview, Operations Dashboard and SEO Performance.
pub fn default_dashboards(now: DateTime<Utc>) -> Vec<DashboardConfig> {
    let revenue_kpi = Widget {
        id: "revenue_kpi".to_string(),
        widget_type: WidgetType::Kpi,
        title: "Monthly Revenue".to_string(),
        data_source: "conversion_data".to_string(),
        metrics: vec!["revenue".to_string()],
        aggregation: "sum".to_string(),
        thresholds: vec![Threshold {
            metric: "revenue".to_string(),
            operator: ThresholdOperator::Less,
            value: 100_000.0,
            severity: Priority::High,
        }],
        position: WidgetPosition::default(),
        size: WidgetSize::default(),
    };
    [
        DashboardRequest {
            name: Some("Executive Overview".to_string()),
            description: Some("High-level business metrics and KPIs".to_string()),
            audience: Some(DashboardAudience::Executive),
            widgets: vec![revenue_kpi],
            ..Default::default()
        },
        DashboardRequest {
            name: Some("Operations Dashboard".to_string()),
            description: Some("Operational metrics and performance indicators".to_string()),
            audience: Some(DashboardAudience::Operational),
            ..Default::default()
        },
        DashboardRequest {
            name: Some("SEO Performance".to_string()),
            description: Some("SEO metrics and search performance".to_string()),
            audience: Some(DashboardAudience::Technical),
            ..Default::default()
        },
    ]
    .into_iter()
    .map(|request| request.into_config(now))
    .collect()
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ThresholdState {
    pub metric: String,
    pub operator: ThresholdOperator,
    pub value: f64,
    pub severity: Priority,
    pub triggered: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChartPoint {
    pub date: NaiveDate,
    pub value: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum WidgetData {
    Kpi {
        value: f64,
        /// Percent change against the previous window.
        change: f64,
        trend: TrendDirection,
        thresholds: Vec<ThresholdState>,
    },
    Chart {
        points: Vec<ChartPoint>,
    },
    Gauge {
        value: f64,
    },
    Table {
        rows: Vec<serde_json::Value>,
    },
    Empty,
}

pub fn kpi_data(widget: &Widget, current: f64, previous: f64) -> WidgetData {
    let change = if previous == 0.0 {
        0.0
    } else {
        (current - previous) / previous * 100.0
    };
    WidgetData::Kpi {
        value: current,
        change,
        trend: TrendDirection::between(previous, current),
        thresholds: widget
            .thresholds
            .iter()
            .map(|t| ThresholdState {
                metric: t.metric.clone(),
                operator: t.operator,
                value: t.value,
                severity: t.severity,
                triggered: t.triggered_by(current),
            })
            .collect(),
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DashboardData {
    pub dashboard: DashboardConfig,
    pub widgets: BTreeMap<String, WidgetData>,
    pub filters: BehaviorFilters,
    pub last_updated: DateTime<Utc>,
    pub next_update: DateTime<Utc>,
}

/// Days behind a chart widget; KPI widgets compare the last window with
/// the one before it.
const WIDGET_WINDOW_DAYS: usize = 30;
const DASHBOARD_CONFIG_TTL: StdDuration = StdDuration::from_secs(7 * 24 * 60 * 60);

impl BusinessIntelligence {
    pub async fn create_dashboard(&self, request: DashboardRequest) -> String {
        let config = request.into_config(Utc::now());
        let id = config.id.clone();
        cache::store(
            self.cache.as_ref(),
            &format!("dashboard_config:{id}"),
            &config,
            CacheOptions::ttl(DASHBOARD_CONFIG_TTL).tagged("dashboard_configs"),
        )
        .await;
        info!(dashboard_id = %id, widgets = config.widgets.len(), "dashboard created");
        self.dashboards.write().await.insert(id.clone(), config);
        id
    }

    pub async fn list_dashboards(&self) -> Vec<DashboardConfig> {
        let mut dashboards: Vec<DashboardConfig> =
            self.dashboards.read().await.values().cloned().collect();
        dashboards.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.name.cmp(&b.name)));
        dashboards
    }

    pub async fn get_dashboard_data(
        &self,
        dashboard_id: &str,
        filters: BehaviorFilters,
    ) -> AnalyticsResult<DashboardData> {
        let dashboard = self
            .dashboards
            .read()
            .await
            .get(dashboard_id)
            .cloned()
            .ok_or_else(|| AnalyticsError::not_found(format!("Dashboard {dashboard_id}")))?;

        let key = format!(
            "dashboard_data:{dashboard_id}:{}",
            serde_json::to_string(&filters)?
        );
        let now = Utc::now();
        let refresh = Duration::milliseconds(dashboard.refresh_interval_ms as i64);
        if let Some(hit) = cache::cached::<DashboardData>(self.cache.as_ref(), &key).await {
            if now - hit.last_updated < refresh {
                return Ok(hit);
            }
        }

        let sessions: Vec<Session> = self
            .tracker
            .sessions(None)
            .await
            .into_iter()
            .filter(|s| filters.matches(s))
            .collect();
        let mut widgets = BTreeMap::new();
        for widget in &dashboard.widgets {
            let data = self.widget_data(widget, &sessions, &filters, now).await;
            widgets.insert(widget.id.clone(), data);
        }

        let data = DashboardData {
            dashboard,
            widgets,
            filters,
            last_updated: now,
            next_update: now + refresh,
        };
        cache::store(
            self.cache.as_ref(),
            &key,
            &data,
            CacheOptions::ttl(StdDuration::from_millis(data.dashboard.refresh_interval_ms))
                .tagged("dashboard_data")
                .tagged(dashboard_id),
        )
        .await;
        Ok(data)
    }

    async fn widget_data(
        &self,
        widget: &Widget,
        sessions: &[Session],
        filters: &BehaviorFilters,
        now: DateTime<Utc>,
    ) -> WidgetData {
        let metric = widget.metric();
        match widget.widget_type {
            WidgetType::Kpi => {
                match session_series(metric, sessions, WIDGET_WINDOW_DAYS * 2, now) {
                    Some(series) => {
                        let (previous, current) = series.split_at(WIDGET_WINDOW_DAYS);
                        kpi_data(widget, current.iter().sum(), previous.iter().sum())
                    }
                    None => {
                        let history = self.metric_history(metric).await;
                        let mut recent = history.iter().rev().map(|p| p.value);
                        let current = recent.next().unwrap_or(0.0);
                        let previous = recent.next().unwrap_or(current);
                        kpi_data(widget, current, previous)
                    }
                }
            }
            WidgetType::Chart => {
                let values = session_series(metric, sessions, WIDGET_WINDOW_DAYS, now)
                    .unwrap_or_else(|| vec![0.0; WIDGET_WINDOW_DAYS]);
                let today = now.date_naive();
                let points = values
                    .into_iter()
                    .enumerate()
                    .map(|(i, value)| ChartPoint {
                        date: today - Duration::days((WIDGET_WINDOW_DAYS - 1 - i) as i64),
                        value,
                    })
                    .collect();
                WidgetData::Chart { points }
            }
            WidgetType::Gauge => {
                let value = match session_series(metric, sessions, WIDGET_WINDOW_DAYS, now) {
                    Some(series) => series.iter().sum(),
                    None => self
                        .metric_history(metric)
                        .await
                        .last()
                        .map_or(0.0, |p| p.value),
                };
                WidgetData::Gauge { value }
            }
            WidgetType::Table => {
                let insights = self.tracker.get_behavior_insights(None, filters).await;
                let rows = insights
                    .top_performing_content
                    .iter()
                    .filter_map(|c| serde_json::to_value(c).ok())
                    .collect();
                WidgetData::Table { rows }
            }
            WidgetType::Map
            | WidgetType::Text
            | WidgetType::Image
            | WidgetType::Custom => WidgetData::Empty,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_defaults_fill_missing_fields() {
        let config = DashboardRequest::default().into_config(Utc::now());
        assert_eq!(config.name, "Custom Dashboard");
        assert_eq!(config.audience, DashboardAudience::Operational);
        assert_eq!(config.refresh_interval_ms, 300_000);
        assert!(config.id.starts_with("dashboard_"));
    }

    #[test]
    fn three_default_dashboards_with_revenue_kpi() {
        let dashboards = default_dashboards(Utc::now());
        let names: Vec<&str> = dashboards.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, vec!["Executive Overview", "Operations Dashboard", "SEO Performance"]);
        let kpi = &dashboards[0].widgets[0];
        assert_eq!(kpi.widget_type, WidgetType::Kpi);
        assert_eq!(kpi.metric(), "revenue");
        assert_eq!(dashboards[2].audience, DashboardAudience::Technical);
    }

    #[test]
    fn kpi_evaluates_thresholds_against_current_value() {
        let dashboards = default_dashboards(Utc::now());
        let widget = &dashboards[0].widgets[0];
        match kpi_data(widget, 50_000.0, 40_000.0) {
            WidgetData::Kpi {
                change,
                trend,
                thresholds,
                ..
            } => {
                assert!((change - 25.0).abs() < 1e-9);
                assert_eq!(trend, TrendDirection::Increasing);
                assert!(thresholds[0].triggered);
            }
            other => panic!("unexpected widget data: {other:?}"),
        }
    }
}
