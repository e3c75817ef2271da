use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use brokerlens_core::cache::{self, CacheOptions};
use brokerlens_core::error::{AnalyticsError, AnalyticsResult};
use brokerlens_core::priority::Priority;
use brokerlens_core::stats::{lehr_sample_size, percent};
use brokerlens_core::time::generate_id;

use crate::optimizer::{Effort, OptimizationKind, OptimizationRecommendation};
use crate::tracker::{BehaviorFilters, Opportunity, OpportunityKind};

use super::model::{ABTest, TestType};
use super::ABTestingFramework;

const RECOMMENDATIONS_TTL: Duration = Duration::from_secs(60 * 60);
const MULTIVARIATE_TTL: Duration = Duration::from_secs(10 * 60);
const SEO_INSIGHTS_TTL: Duration = Duration::from_secs(15 * 60);
/// Baseline conversion assumed when sizing suggested experiments.
const PLANNING_BASELINE: f64 = 0.03;

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ExperimentFilters {
    pub category: Option<OptimizationKind>,
    pub priority: Option<Priority>,
    pub seo_focused: Option<bool>,
    pub min_impact: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExperimentRecommendation {
    pub id: String,
    pub title: String,
    pub description: String,
    pub hypothesis: String,
    pub category: OptimizationKind,
    pub priority: Priority,
    pub expected_impact: f64,
    pub confidence: f64,
    pub required_traffic: u64,
    pub estimated_duration_days: u64,
    pub complexity: Effort,
    pub seo_focused: bool,
    pub target: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ExperimentRecommendations {
    pub high_impact_tests: Vec<ExperimentRecommendation>,
    pub seo_optimization_tests: Vec<ExperimentRecommendation>,
    pub performance_tests: Vec<ExperimentRecommendation>,
    pub content_tests: Vec<ExperimentRecommendation>,
    pub technical_tests: Vec<ExperimentRecommendation>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FactorLevel {
    pub level: String,
    pub impressions: u64,
    pub conversions: u64,
    pub conversion_rate: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MainEffect {
    pub factor: String,
    pub levels: Vec<FactorLevel>,
    /// Spread between the best and worst level's conversion rate.
    pub effect_size: f64,
    pub best_level: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MultivariateAnalysis {
    pub test_id: String,
    pub main_effects: Vec<MainEffect>,
    pub optimal_combination: BTreeMap<String, String>,
    pub best_variant: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SeoVariantInsight {
    pub variant_id: String,
    pub organic_impressions: u64,
    pub organic_clicks: u64,
    pub click_through_rate: f64,
    pub conversions: u64,
    pub organic_conversion_share: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SeoTestInsights {
    pub test_id: String,
    pub variants: Vec<SeoVariantInsight>,
    pub best_organic_variant: Option<String>,
    pub recommendations: Vec<String>,
}

fn level_name(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Main effect of every configuration factor on conversion rate.
pub fn multivariate_analysis(test: &ABTest) -> MultivariateAnalysis {
    let mut factors: BTreeMap<&str, BTreeMap<String, (u64, u64)>> = BTreeMap::new();
    for variant in &test.variants {
        for (factor, value) in &variant.configuration {
            let level = factors
                .entry(factor.as_str())
                .or_default()
                .entry(level_name(value))
                .or_default();
            level.0 += variant.metrics.impressions;
            level.1 += variant.metrics.conversions;
        }
    }

    let mut optimal_combination = BTreeMap::new();
    let main_effects: Vec<MainEffect> = factors
        .into_iter()
        .map(|(factor, levels)| {
            let levels: Vec<FactorLevel> = levels
                .into_iter()
                .map(|(level, (impressions, conversions))| FactorLevel {
                    level,
                    impressions,
                    conversions,
                    conversion_rate: if impressions == 0 {
                        0.0
                    } else {
                        conversions as f64 / impressions as f64
                    },
                })
                .collect();
            let best = levels
                .iter()
                .filter(|l| l.impressions > 0)
                .max_by(|a, b| a.conversion_rate.total_cmp(&b.conversion_rate));
            let worst = levels
                .iter()
                .filter(|l| l.impressions > 0)
                .min_by(|a, b| a.conversion_rate.total_cmp(&b.conversion_rate));
            let effect_size = match (best, worst) {
                (Some(b), Some(w)) => b.conversion_rate - w.conversion_rate,
                _ => 0.0,
            };
            let best_level = best.map(|l| l.level.clone());
            if let Some(level) = &best_level {
                optimal_combination.insert(factor.to_string(), level.clone());
            }
            MainEffect {
                factor: factor.to_string(),
                levels,
                effect_size,
                best_level,
            }
        })
        .collect();

    let best_variant = test
        .variants
        .iter()
        .filter(|v| v.metrics.impressions > 0)
        .max_by(|a, b| a.conversion_rate().total_cmp(&b.conversion_rate()))
        .map(|v| v.id.clone());

    MultivariateAnalysis {
        test_id: test.id.clone(),
        main_effects,
        optimal_combination,
        best_variant,
    }
}

pub fn seo_test_insights(test: &ABTest) -> SeoTestInsights {
    let variants: Vec<SeoVariantInsight> = test
        .variants
        .iter()
        .map(|v| {
            let m = &v.metrics;
            SeoVariantInsight {
                variant_id: v.id.clone(),
                organic_impressions: m.organic_impressions,
                organic_clicks: m.organic_clicks,
                click_through_rate: percent(m.organic_clicks as f64, m.organic_impressions as f64),
                conversions: m.conversions,
                organic_conversion_share: percent(m.organic_clicks as f64, m.conversions as f64),
            }
        })
        .collect();
    let best_organic_variant = variants
        .iter()
        .filter(|v| v.organic_impressions > 0)
        .max_by(|a, b| a.click_through_rate.total_cmp(&b.click_through_rate))
        .map(|v| v.variant_id.clone());

    let mut recommendations = Vec::new();
    if variants.iter().all(|v| v.organic_impressions == 0) {
        recommendations.push("No organic traffic reached this test yet".to_string());
    } else if let Some(best) = &best_organic_variant {
        recommendations.push(format!(
            "Apply the SEO elements of {best} to organic landing pages"
        ));
    }
    SeoTestInsights {
        test_id: test.id.clone(),
        variants,
        best_organic_variant,
        recommendations,
    }
}

fn from_opportunity(opportunity: &Opportunity) -> ExperimentRecommendation {
    let category = match opportunity.kind {
        OpportunityKind::Content => OptimizationKind::Content,
        OpportunityKind::Performance => OptimizationKind::Performance,
        OpportunityKind::Seo => OptimizationKind::Seo,
        OpportunityKind::Conversion => OptimizationKind::Conversion,
    };
    ExperimentRecommendation {
        id: generate_id("exp"),
        title: format!("Test: {}", opportunity.description),
        description: opportunity.implementation.clone(),
        hypothesis: format!(
            "Addressing \"{}\" lifts conversion by {:.0}%",
            opportunity.description, opportunity.potential_impact
        ),
        category,
        priority: opportunity.priority,
        expected_impact: opportunity.potential_impact,
        confidence: (opportunity.sample_size as f64 / 500.0).clamp(0.3, 0.9),
        required_traffic: 0,
        estimated_duration_days: 0,
        complexity: Effort::Medium,
        seo_focused: category == OptimizationKind::Seo,
        target: opportunity
            .affected_pages
            .first()
            .cloned()
            .unwrap_or_else(|| "site".to_string()),
    }
}

fn from_optimization(rec: &OptimizationRecommendation) -> ExperimentRecommendation {
    ExperimentRecommendation {
        id: generate_id("exp"),
        title: format!("Test: {}", rec.title),
        description: rec.description.clone(),
        hypothesis: format!(
            "{} lifts conversion on {} by {:.1} points",
            rec.title, rec.target, rec.expected_impact
        ),
        category: rec.kind,
        priority: rec.priority,
        expected_impact: rec.expected_impact,
        confidence: 0.6,
        required_traffic: 0,
        estimated_duration_days: 0,
        complexity: rec.effort,
        seo_focused: rec.kind == OptimizationKind::Seo,
        target: rec.target.clone(),
    }
}

impl ExperimentFilters {
    fn matches(&self, rec: &ExperimentRecommendation) -> bool {
        self.category.map_or(true, |c| c == rec.category)
            && self.priority.map_or(true, |p| p == rec.priority)
            && self.seo_focused.map_or(true, |s| s == rec.seo_focused)
            && self.min_impact.map_or(true, |m| rec.expected_impact >= m)
    }
}

impl ABTestingFramework {
    pub async fn get_experiment_recommendations(
        &self,
        filters: &ExperimentFilters,
    ) -> ExperimentRecommendations {
        let key = format!(
            "experiment_recommendations:{}",
            serde_json::to_string(filters).unwrap_or_default()
        );
        if let Some(hit) =
            cache::cached::<ExperimentRecommendations>(self.cache.as_ref(), &key).await
        {
            return hit;
        }

        let behavior = self
            .tracker
            .get_behavior_insights(None, &BehaviorFilters::default())
            .await;
        let pending = self.optimizer.pending_recommendations().await;

        let candidates = behavior
            .optimization_opportunities
            .iter()
            .map(from_opportunity)
            .chain(pending.iter().map(from_optimization))
            .map(|mut rec| {
                let mde = (rec.expected_impact / 100.0).max(0.05);
                rec.required_traffic = lehr_sample_size(PLANNING_BASELINE, mde) * 2;
                rec.estimated_duration_days =
                    rec.required_traffic.div_ceil(self.daily_visitors.max(1));
                rec
            })
            .filter(|rec| filters.matches(rec));

        let mut out = ExperimentRecommendations::default();
        for rec in candidates {
            if rec.priority >= Priority::High {
                out.high_impact_tests.push(rec.clone());
            }
            if rec.seo_focused {
                out.seo_optimization_tests.push(rec.clone());
            }
            match rec.category {
                OptimizationKind::Performance => out.performance_tests.push(rec),
                OptimizationKind::Content => out.content_tests.push(rec),
                OptimizationKind::Technical | OptimizationKind::Ux => out.technical_tests.push(rec),
                OptimizationKind::Seo | OptimizationKind::Conversion => {}
            }
        }
        out.high_impact_tests
            .sort_by(|a, b| b.expected_impact.total_cmp(&a.expected_impact));

        cache::store(
            self.cache.as_ref(),
            &key,
            &out,
            CacheOptions::ttl(RECOMMENDATIONS_TTL).tagged("experiment_recommendations"),
        )
        .await;
        out
    }

    pub async fn get_multivariate_analysis(
        &self,
        test_id: &str,
    ) -> AnalyticsResult<MultivariateAnalysis> {
        let test = self
            .get_test(test_id)
            .await
            .ok_or_else(|| AnalyticsError::not_found(format!("Test {test_id}")))?;
        if test.test_type != TestType::Multivariate {
            return Err(AnalyticsError::validation(
                "Invalid test for multivariate analysis",
            ));
        }
        let key = format!("multivariate_analysis:{test_id}");
        if let Some(hit) = cache::cached::<MultivariateAnalysis>(self.cache.as_ref(), &key).await {
            return Ok(hit);
        }
        let analysis = multivariate_analysis(&test);
        cache::store(
            self.cache.as_ref(),
            &key,
            &analysis,
            CacheOptions::ttl(MULTIVARIATE_TTL)
                .tagged("multivariate_analysis")
                .tagged(test_id),
        )
        .await;
        Ok(analysis)
    }

    pub async fn get_seo_test_insights(&self, test_id: &str) -> AnalyticsResult<SeoTestInsights> {
        let test = self
            .get_test(test_id)
            .await
            .ok_or_else(|| AnalyticsError::not_found(format!("Test {test_id}")))?;
        let key = format!("seo_test_insights:{test_id}");
        if let Some(hit) = cache::cached::<SeoTestInsights>(self.cache.as_ref(), &key).await {
            return Ok(hit);
        }
        let insights = seo_test_insights(&test);
        cache::store(
            self.cache.as_ref(),
            &key,
            &insights,
            CacheOptions::ttl(SEO_INSIGHTS_TTL)
                .tagged("seo_test_insights")
                .tagged(test_id),
        )
        .await;
        Ok(insights)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;

    use crate::experiments::model::{
        default_metrics, Automation, PowerAnalysis, TestStatus, Timeline, TrafficAllocation,
        Variant,
    };

    fn variant(id: &str, colour: &str, layout: &str, n: u64, c: u64) -> Variant {
        let mut v = Variant::new(id, id, id == "control", 25.0);
        v.configuration.insert("colour".into(), json!(colour));
        v.configuration.insert("layout".into(), json!(layout));
        v.metrics.impressions = n;
        v.metrics.conversions = c;
        v
    }

    fn test_with(variants: Vec<Variant>) -> ABTest {
        let now = Utc::now();
        let metrics = default_metrics();
        let power = PowerAnalysis::compute(&metrics[0], variants.len(), 100);
        ABTest {
            id: "test_mv".into(),
            name: "Factorial".into(),
            description: String::new(),
            hypothesis: "h".into(),
            test_type: TestType::Multivariate,
            status: TestStatus::Running,
            variants,
            traffic_allocation: TrafficAllocation {
                minimum_sample_size: power.sample_size_per_variant,
                power_analysis: power,
            },
            target_metrics: metrics,
            timeline: Timeline::planned(now, 14),
            automation: Automation::default(),
            results: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn main_effects_pool_levels_across_variants() {
        let test = test_with(vec![
            variant("control", "blue", "list", 100, 2),
            variant("b", "green", "list", 100, 6),
            variant("c", "blue", "grid", 100, 4),
            variant("d", "green", "grid", 100, 8),
        ]);
        let analysis = multivariate_analysis(&test);
        let colour = &analysis.main_effects[0];
        assert_eq!(colour.factor, "colour");
        assert_eq!(colour.best_level.as_deref(), Some("green"));
        assert!((colour.effect_size - 0.04).abs() < 1e-9);
        assert_eq!(analysis.optimal_combination["layout"], "grid");
        assert_eq!(analysis.best_variant.as_deref(), Some("d"));
    }

    #[test]
    fn seo_insights_report_ctr_per_variant() {
        let mut a = variant("control", "blue", "list", 100, 10);
        a.metrics.organic_impressions = 40;
        a.metrics.organic_clicks = 4;
        let mut b = variant("b", "green", "list", 100, 12);
        b.metrics.organic_impressions = 50;
        b.metrics.organic_clicks = 10;
        let insights = seo_test_insights(&test_with(vec![a, b]));
        assert!((insights.variants[0].click_through_rate - 10.0).abs() < 1e-9);
        assert!((insights.variants[1].click_through_rate - 20.0).abs() < 1e-9);
        assert_eq!(insights.best_organic_variant.as_deref(), Some("b"));
    }
}
