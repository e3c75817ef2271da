use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use brokerlens_core::cache::{self, CacheOptions};
use brokerlens_core::collaborators::TrendDirection;

use crate::experiments::TestStatus;
use crate::optimizer::daily_series;
use crate::tracker::{AlertSeverity, BehaviorFilters};

use super::health::AnalyticsHealth;
use super::insights::CrossServiceInsight;
use super::planning::{build_plan, CurrentMetrics, OptimizationTargets, UnifiedOptimization};
use super::AnalyticsAggregator;

const DASHBOARD_TTL: Duration = Duration::from_secs(10 * 60);
const DASHBOARD_REUSE_SECS: i64 = 5 * 60;
const UNIFIED_OPTIMIZATION_TTL: Duration = Duration::from_secs(60 * 60);
const TREND_DAYS: usize = 14;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Audience {
    Executive,
    #[default]
    Operational,
    Technical,
}

impl Audience {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "executive" => Some(Self::Executive),
            "operational" => Some(Self::Operational),
            "technical" => Some(Self::Technical),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Executive => "executive",
            Self::Operational => "operational",
            Self::Technical => "technical",
        }
    }

    fn wants_kpi(&self, name: &str) -> bool {
        match self {
            Self::Operational => true,
            Self::Executive => matches!(name, "conversion_rate" | "revenue" | "health_score"),
            Self::Technical => matches!(name, "health_score" | "bounce_rate" | "cache_hit_rate"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KpiStatus {
    OnTrack,
    AtRisk,
    OffTrack,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UnifiedKpi {
    pub name: String,
    pub value: f64,
    pub target: f64,
    pub trend: TrendDirection,
    pub status: KpiStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UnifiedTrend {
    pub metric: String,
    pub direction: TrendDirection,
    /// Second half of the window against the first, in percent.
    pub change_percent: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UnifiedAlert {
    pub severity: AlertSeverity,
    pub message: String,
    pub services: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UnifiedRecommendation {
    pub title: String,
    pub description: String,
    pub impact: f64,
    pub services: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DashboardOverview {
    pub total_sessions: usize,
    pub active_sessions: usize,
    pub active_tests: usize,
    pub active_correlations: usize,
    pub health_score: f64,
    pub last_update: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AnalyticsDashboard {
    pub audience: Audience,
    pub overview: DashboardOverview,
    pub kpis: Vec<UnifiedKpi>,
    pub trends: Vec<UnifiedTrend>,
    pub alerts: Vec<UnifiedAlert>,
    pub insights: Vec<CrossServiceInsight>,
    pub recommendations: Vec<UnifiedRecommendation>,
    pub generated_at: DateTime<Utc>,
}

/// Compare the two halves of a daily series.
pub(crate) fn series_trend(metric: &str, series: &[f64]) -> UnifiedTrend {
    let half = series.len() / 2;
    let older: f64 = series[..half].iter().sum();
    let newer: f64 = series[half..].iter().sum();
    UnifiedTrend {
        metric: metric.to_string(),
        direction: TrendDirection::between(older, newer),
        change_percent: if older == 0.0 {
            0.0
        } else {
            (newer - older) / older * 100.0
        },
    }
}

fn kpi(
    name: &str,
    value: f64,
    target: f64,
    higher_is_better: bool,
    trend: TrendDirection,
) -> UnifiedKpi {
    let attainment = if higher_is_better {
        if target == 0.0 {
            1.0
        } else {
            value / target
        }
    } else if value == 0.0 {
        1.0
    } else {
        target / value
    };
    UnifiedKpi {
        name: name.to_string(),
        value,
        target,
        trend,
        status: if attainment >= 0.95 {
            KpiStatus::OnTrack
        } else if attainment >= 0.8 {
            KpiStatus::AtRisk
        } else {
            KpiStatus::OffTrack
        },
    }
}

fn health_alerts(health: &AnalyticsHealth) -> Vec<UnifiedAlert> {
    health
        .alerts
        .iter()
        .map(|a| UnifiedAlert {
            severity: AlertSeverity::Critical,
            message: a.message.clone(),
            services: vec![a.service.clone()],
        })
        .collect()
}

impl AnalyticsAggregator {
    pub async fn get_analytics_dashboard(&self, audience: Audience) -> AnalyticsDashboard {
        let key = format!("analytics_dashboard:{}", audience.as_str());
        let now = Utc::now();
        if let Some(hit) = cache::cached::<AnalyticsDashboard>(self.cache.as_ref(), &key).await {
            if (now - hit.generated_at).num_seconds() < DASHBOARD_REUSE_SECS {
                return hit;
            }
        }

        let health = self.get_analytics_health().await;
        let behavior = self
            .tracker
            .get_behavior_insights(None, &BehaviorFilters::default())
            .await;
        let realtime = self.tracker.get_real_time_metrics().await;
        let sessions = self.tracker.sessions(None).await;
        let (conversions, revenue, organic) = daily_series(&sessions, TREND_DAYS, now);
        let trends = vec![
            series_trend("conversions", &conversions),
            series_trend("revenue", &revenue),
            series_trend("organic_sessions", &organic),
        ];
        let trend_of = |metric: &str| {
            trends
                .iter()
                .find(|t| t.metric == metric)
                .map(|t| t.direction)
                .unwrap_or(TrendDirection::Stable)
        };

        // Revenue has no fixed target; it is measured against the prior week.
        let half = revenue.len() / 2;
        let prior_revenue: f64 = revenue[..half].iter().sum();
        let recent_revenue: f64 = revenue[half..].iter().sum();
        let stable = TrendDirection::Stable;
        let kpis: Vec<UnifiedKpi> = [
            kpi("conversion_rate", behavior.conversion_rate, 5.0, true, trend_of("conversions")),
            kpi("revenue", recent_revenue, prior_revenue, true, trend_of("revenue")),
            kpi("engagement", behavior.overall_engagement, 70.0, true, stable),
            kpi("seo_effectiveness", behavior.seo_effectiveness, 75.0, true, trend_of("organic_sessions")),
            kpi("bounce_rate", behavior.bounce_rate, 40.0, false, stable),
            kpi("health_score", health.overall_score, 95.0, true, stable),
            kpi("cache_hit_rate", health.cache.hit_rate * 100.0, 80.0, true, stable),
        ]
        .into_iter()
        .filter(|k| audience.wants_kpi(&k.name))
        .collect();

        let mut alerts: Vec<UnifiedAlert> = realtime
            .performance_alerts
            .iter()
            .map(|a| UnifiedAlert {
                severity: a.severity,
                message: a.message.clone(),
                services: vec!["user_behavior".to_string()],
            })
            .chain(health_alerts(&health))
            .collect();
        if audience == Audience::Executive {
            alerts.retain(|a| a.severity == AlertSeverity::Critical);
        }

        let insights = self.get_cross_service_insights(None, None, Some(5)).await;
        let mut recommendations: Vec<UnifiedRecommendation> = insights
            .iter()
            .filter_map(|i| {
                i.recommendations.first().map(|r| UnifiedRecommendation {
                    title: i.title.clone(),
                    description: r.clone(),
                    impact: i.confidence * 100.0,
                    services: i.services.clone(),
                })
            })
            .collect();
        let pending = self.optimizer.pending_recommendations().await;
        recommendations.extend(pending.into_iter().take(5).map(|r| UnifiedRecommendation {
            title: r.title,
            description: r.description,
            impact: r.expected_impact,
            services: vec!["conversion_optimizer".to_string()],
        }));

        let active_tests = self
            .experiments
            .list_tests()
            .await
            .iter()
            .filter(|t| t.status == TestStatus::Running)
            .count();
        let dashboard = AnalyticsDashboard {
            audience,
            overview: DashboardOverview {
                total_sessions: behavior.total_sessions,
                active_sessions: realtime.current_sessions,
                active_tests,
                active_correlations: self.correlation_count().await,
                health_score: health.overall_score,
                last_update: now,
            },
            kpis,
            trends,
            alerts,
            insights,
            recommendations,
            generated_at: now,
        };
        cache::store(
            self.cache.as_ref(),
            &key,
            &dashboard,
            CacheOptions::ttl(DASHBOARD_TTL).tagged("analytics_dashboard"),
        )
        .await;
        dashboard
    }

    /// Plan actions for every target the site currently falls short of.
    pub async fn execute_unified_optimization(
        &self,
        targets: &OptimizationTargets,
    ) -> UnifiedOptimization {
        let key = format!(
            "unified_optimization:{}",
            serde_json::to_string(targets).unwrap_or_default()
        );
        if let Some(hit) = cache::cached::<UnifiedOptimization>(self.cache.as_ref(), &key).await {
            return hit;
        }
        let snapshot = self.aggregate_analytics(None, None, Some("/")).await;
        let behavior = self
            .tracker
            .get_behavior_insights(None, &BehaviorFilters::default())
            .await;
        let current = CurrentMetrics {
            user_experience: snapshot.performance_metrics.user_experience_score,
            conversion_rate: behavior.conversion_rate,
            seo_performance: snapshot.seo_performance.combined_score(),
            page_speed: snapshot.seo_performance.page_speed_score,
            business_impact: snapshot.business_context.business_impact,
        };
        let plan = build_plan(targets, &current, Utc::now());
        cache::store(
            self.cache.as_ref(),
            &key,
            &plan,
            CacheOptions::ttl(UNIFIED_OPTIMIZATION_TTL).tagged("unified_optimization"),
        )
        .await;
        plan
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trend_compares_series_halves() {
        let t = series_trend("conversions", &[1.0, 1.0, 2.0, 4.0]);
        assert_eq!(t.direction, TrendDirection::Increasing);
        assert!((t.change_percent - 200.0).abs() < 1e-9);
        let flat = series_trend("revenue", &[0.0; 14]);
        assert_eq!(flat.direction, TrendDirection::Stable);
        assert_eq!(flat.change_percent, 0.0);
    }

    #[test]
    fn kpi_status_respects_direction() {
        assert_eq!(kpi("c", 5.0, 5.0, true, TrendDirection::Stable).status, KpiStatus::OnTrack);
        assert_eq!(kpi("c", 4.2, 5.0, true, TrendDirection::Stable).status, KpiStatus::AtRisk);
        assert_eq!(kpi("b", 80.0, 40.0, false, TrendDirection::Stable).status, KpiStatus::OffTrack);
    }

    #[test]
    fn executive_audience_sees_business_kpis_only() {
        assert!(Audience::Executive.wants_kpi("revenue"));
        assert!(!Audience::Executive.wants_kpi("bounce_rate"));
        assert!(Audience::Technical.wants_kpi("cache_hit_rate"));
        assert_eq!(Audience::parse("technical"), Some(Audience::Technical));
        assert_eq!(Audience::parse("board"), None);
    }
}
