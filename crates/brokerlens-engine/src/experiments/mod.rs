//! A/B test lifecycle, assignment and significance testing.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use brokerlens_core::cache::{self, CacheOptions, CacheStore};
use brokerlens_core::collaborators::AnomalyDetector;
use brokerlens_core::error::{AnalyticsError, AnalyticsResult};
use brokerlens_core::time::generate_id;
use brokerlens_core::traffic::{classify_medium, TrafficMedium};

use crate::optimizer::ConversionOptimizer;
use crate::tracker::UserBehaviorTracker;

mod analysis;
mod assignment;
mod model;
mod results;

pub use analysis::{
    ExperimentFilters, ExperimentRecommendation, ExperimentRecommendations, FactorLevel,
    MainEffect, MultivariateAnalysis, SeoTestInsights, SeoVariantInsight,
};
pub use assignment::{bucket, pick_variant, Assignment, AssignmentContext};
pub use model::{
    default_metrics, default_variants, traffic_sums_to_100, ABTest, Automation, MetricKind,
    MetricRole, MetricThreshold, Milestone, PowerAnalysis, TestConfig, TestMetric, TestPhase,
    TestStatus, TestType, Timeline, TrafficAllocation, Variant, VariantMetrics,
    WinnerDetermination,
};
pub use results::{
    compute_results, should_stop_early, MetricResult, MetricValue, ResultStatus, SeoTestImpact,
    TestResults, VariantResult,
};

const TEST_TTL: Duration = Duration::from_secs(30 * 24 * 60 * 60);
const RESULTS_TTL: Duration = Duration::from_secs(60);
const DEFAULT_DURATION_DAYS: i64 = 14;

type TestHandle = Arc<Mutex<ABTest>>;

pub struct ABTestingFramework {
    cache: Arc<dyn CacheStore>,
    tracker: Arc<UserBehaviorTracker>,
    optimizer: Arc<ConversionOptimizer>,
    detector: Arc<dyn AnomalyDetector>,
    daily_visitors: u64,
    tests: RwLock<HashMap<String, TestHandle>>,
    assignments: RwLock<HashMap<(String, String), Assignment>>,
    queue: RwLock<Vec<String>>,
}

impl ABTestingFramework {
    pub fn new(
        cache: Arc<dyn CacheStore>,
        tracker: Arc<UserBehaviorTracker>,
        optimizer: Arc<ConversionOptimizer>,
        detector: Arc<dyn AnomalyDetector>,
        daily_visitors: u64,
    ) -> Self {
        Self {
            cache,
            tracker,
            optimizer,
            detector,
            daily_visitors,
            tests: RwLock::new(HashMap::new()),
            assignments: RwLock::new(HashMap::new()),
            queue: RwLock::new(Vec::new()),
        }
    }

    async fn handle(&self, test_id: &str) -> Option<TestHandle> {
        self.tests.read().await.get(test_id).cloned()
    }

    async fn require(&self, test_id: &str) -> AnalyticsResult<TestHandle> {
        self.handle(test_id)
            .await
            .ok_or_else(|| AnalyticsError::not_found(format!("Test {test_id}")))
    }

    async fn cache_test(&self, test: &ABTest) {
        cache::store(
            self.cache.as_ref(),
            &format!("ab_test:{}", test.id),
            test,
            CacheOptions::ttl(TEST_TTL).tagged("ab_tests"),
        )
        .await;
    }

    async fn cache_results(&self, results: &TestResults) {
        cache::store(
            self.cache.as_ref(),
            &format!("test_results:{}", results.test_id),
            results,
            CacheOptions::ttl(RESULTS_TTL)
                .tagged("test_results")
                .tagged(results.test_id.clone()),
        )
        .await;
    }

    pub async fn create_test(&self, config: TestConfig) -> AnalyticsResult<String> {
        config.validate()?;
        let now = Utc::now();
        let variants = config.variants.unwrap_or_else(default_variants);
        let target_metrics = config.target_metrics.unwrap_or_else(default_metrics);
        let primary = target_metrics
            .iter()
            .find(|m| m.role == MetricRole::Primary)
            .ok_or_else(|| AnalyticsError::validation("Primary metric required for power analysis"))?;
        let power = PowerAnalysis::compute(
            primary,
            variants.len(),
            config.expected_daily_visitors.unwrap_or(self.daily_visitors),
        );

        let test = ABTest {
            id: generate_id("test"),
            name: config.name.unwrap_or_default(),
            description: config.description.unwrap_or_default(),
            hypothesis: config.hypothesis.unwrap_or_default(),
            test_type: config.test_type.unwrap_or_default(),
            status: TestStatus::Draft,
            variants,
            traffic_allocation: TrafficAllocation {
                minimum_sample_size: power.sample_size_per_variant,
                power_analysis: power,
            },
            timeline: Timeline::planned(now, config.duration_days.unwrap_or(DEFAULT_DURATION_DAYS)),
            target_metrics,
            automation: config.automation.unwrap_or_default(),
            results: None,
            created_at: now,
            updated_at: now,
        };
        let id = test.id.clone();
        self.cache_test(&test).await;
        info!(
            test_id = %id,
            name = %test.name,
            variants = test.variants.len(),
            sample_size = test.traffic_allocation.power_analysis.sample_size_per_variant,
            "ab test created"
        );
        self.tests
            .write()
            .await
            .insert(id.clone(), Arc::new(Mutex::new(test)));
        Ok(id)
    }

    pub async fn get_test(&self, test_id: &str) -> Option<ABTest> {
        let handle = self.handle(test_id).await?;
        let test = handle.lock().await.clone();
        Some(test)
    }

    pub async fn list_tests(&self) -> Vec<ABTest> {
        let handles: Vec<TestHandle> = self.tests.read().await.values().cloned().collect();
        let mut tests = Vec::with_capacity(handles.len());
        for handle in handles {
            tests.push(handle.lock().await.clone());
        }
        tests.sort_by_key(|t| t.created_at);
        tests
    }

    /// Apply a status change under the test's lock, then re-cache it.
    async fn transition<F>(&self, test_id: &str, apply: F) -> AnalyticsResult<ABTest>
    where
        F: FnOnce(&mut ABTest) -> AnalyticsResult<()>,
    {
        let handle = self.require(test_id).await?;
        let snapshot = {
            let mut test = handle.lock().await;
            apply(&mut test)?;
            test.updated_at = Utc::now();
            test.clone()
        };
        self.cache_test(&snapshot).await;
        Ok(snapshot)
    }

    pub async fn mark_ready(&self, test_id: &str) -> AnalyticsResult<()> {
        self.transition(test_id, |test| {
            if test.status != TestStatus::Draft {
                return Err(AnalyticsError::invalid_state(format!(
                    "Test {} cannot be marked ready from status {}",
                    test.id,
                    test.status.as_str()
                )));
            }
            test.validate_readiness()?;
            test.status = TestStatus::Ready;
            Ok(())
        })
        .await?;
        Ok(())
    }

    pub async fn start_test(&self, test_id: &str) -> AnalyticsResult<()> {
        let now = Utc::now();
        self.transition(test_id, |test| {
            if !matches!(test.status, TestStatus::Draft | TestStatus::Ready) {
                return Err(AnalyticsError::invalid_state(format!(
                    "Test {} cannot be started from status {}",
                    test.id,
                    test.status.as_str()
                )));
            }
            test.validate_readiness()?;
            test.status = TestStatus::Running;
            test.timeline.actual_start = Some(now);
            test.results = None;
            for variant in &mut test.variants {
                variant.metrics = VariantMetrics::default();
            }
            Ok(())
        })
        .await?;
        let mut queue = self.queue.write().await;
        if !queue.iter().any(|id| id == test_id) {
            queue.push(test_id.to_string());
        }
        drop(queue);
        info!(test_id, "ab test started");
        Ok(())
    }

    pub async fn pause_test(&self, test_id: &str) -> AnalyticsResult<()> {
        self.transition(test_id, |test| {
            if test.status != TestStatus::Running {
                return Err(AnalyticsError::invalid_state(format!(
                    "Test {} is not currently running",
                    test.id
                )));
            }
            test.status = TestStatus::Paused;
            Ok(())
        })
        .await?;
        info!(test_id, "ab test paused");
        Ok(())
    }

    pub async fn resume_test(&self, test_id: &str) -> AnalyticsResult<()> {
        self.transition(test_id, |test| {
            if test.status != TestStatus::Paused {
                return Err(AnalyticsError::invalid_state(format!(
                    "Test {} is not paused",
                    test.id
                )));
            }
            test.status = TestStatus::Running;
            Ok(())
        })
        .await?;
        info!(test_id, "ab test resumed");
        Ok(())
    }

    pub async fn archive_test(&self, test_id: &str) -> AnalyticsResult<()> {
        self.transition(test_id, |test| {
            if test.status != TestStatus::Completed {
                return Err(AnalyticsError::invalid_state(format!(
                    "Test {} must be completed before archiving",
                    test.id
                )));
            }
            test.status = TestStatus::Archived;
            Ok(())
        })
        .await?;
        Ok(())
    }

    pub async fn stop_test(&self, test_id: &str, reason: &str) -> AnalyticsResult<TestResults> {
        let now = Utc::now();
        let snapshot = self
            .transition(test_id, |test| {
                if !matches!(test.status, TestStatus::Running | TestStatus::Paused) {
                    return Err(AnalyticsError::invalid_state(format!(
                        "Test {} is not currently running",
                        test.id
                    )));
                }
                test.status = TestStatus::Completed;
                test.timeline.actual_end = Some(now);
                test.results = Some(compute_results(test, now));
                Ok(())
            })
            .await?;
        self.queue.write().await.retain(|id| id != test_id);

        let results = snapshot
            .results
            .ok_or_else(|| AnalyticsError::Internal(anyhow::anyhow!("stop produced no results")))?;
        self.cache_results(&results).await;
        info!(
            test_id,
            reason,
            winner = results.winner.as_deref().unwrap_or("inconclusive"),
            confidence = results.confidence,
            "ab test stopped"
        );
        Ok(results)
    }

    /// Deterministic variant for a user. `None` unless the test is running.
    pub async fn assign_user_to_test(
        &self,
        test_id: &str,
        user_id: &str,
        session_id: Option<&str>,
        context: &AssignmentContext,
    ) -> Option<Assignment> {
        let handle = self.handle(test_id).await?;
        let key = (test_id.to_string(), user_id.to_string());

        let (assignment, snapshot) = {
            let mut test = handle.lock().await;
            if test.status != TestStatus::Running {
                return None;
            }
            if let Some(existing) = self.assignments.read().await.get(&key) {
                return Some(existing.clone());
            }
            let fraction = bucket(user_id, test_id);
            let variant_id = pick_variant(&test.variants, fraction)?.id.clone();
            let organic = classify_medium(context.referrer.as_deref(), None) == TrafficMedium::Organic;
            let variant = test.variant_mut(&variant_id)?;
            variant.metrics.impressions += 1;
            if organic {
                variant.metrics.organic_impressions += 1;
            }
            let assignment = Assignment {
                test_id: test_id.to_string(),
                variant_id,
                variant_name: variant.name.clone(),
                user_id: user_id.to_string(),
                session_id: session_id.map(str::to_string),
                assigned_at: Utc::now(),
            };
            self.assignments
                .write()
                .await
                .insert(key, assignment.clone());
            test.updated_at = Utc::now();
            (assignment, test.clone())
        };
        self.cache_test(&snapshot).await;
        Some(assignment)
    }

    /// Count a conversion for a variant. Returns false when ignored.
    pub async fn track_test_conversion(
        &self,
        test_id: &str,
        variant_id: &str,
        kind: &str,
        value: Option<f64>,
        metadata: &HashMap<String, serde_json::Value>,
    ) -> bool {
        let Some(handle) = self.handle(test_id).await else {
            return false;
        };
        let now = Utc::now();
        let (results, stop_early, snapshot) = {
            let mut test = handle.lock().await;
            if test.status != TestStatus::Running {
                return false;
            }
            let Some(variant) = test.variant_mut(variant_id) else {
                return false;
            };
            variant.metrics.conversions += 1;
            if let Some(v) = value {
                variant.metrics.revenue += v;
            }
            let seo_source = metadata
                .get("seo_source")
                .and_then(|v| v.as_bool())
                .unwrap_or(false);
            if seo_source {
                variant.metrics.organic_clicks += 1;
            }
            test.updated_at = now;
            let results = compute_results(&test, now);
            let stop = should_stop_early(&test, &results, now);
            (results, stop, test.clone())
        };
        self.cache_test(&snapshot).await;
        self.cache_results(&results).await;
        debug!(test_id, variant_id, kind, "test conversion tracked");

        if stop_early {
            if let Err(e) = self.stop_test(test_id, "Early stopping rule triggered").await {
                warn!(test_id, error = %e, "early stop failed");
            }
        }
        true
    }

    pub async fn get_test_results(&self, test_id: &str) -> Option<TestResults> {
        let key = format!("test_results:{test_id}");
        if let Some(hit) = cache::cached::<TestResults>(self.cache.as_ref(), &key).await {
            return Some(hit);
        }
        let handle = self.handle(test_id).await?;
        let results = {
            let test = handle.lock().await;
            compute_results(&test, Utc::now())
        };
        self.cache_results(&results).await;
        Some(results)
    }

    /// Scheduler hook: anomaly check, re-cache, early stop and auto-stop
    /// for each queued test. Returns the number of tests inspected.
    pub async fn process_test_queue(&self, now: DateTime<Utc>) -> usize {
        let queued: Vec<String> = self.queue.read().await.clone();
        let mut processed = 0;
        for test_id in queued {
            let Some(handle) = self.handle(&test_id).await else {
                self.queue.write().await.retain(|id| id != &test_id);
                continue;
            };
            let test = handle.lock().await.clone();
            if test.status != TestStatus::Running {
                continue;
            }
            processed += 1;

            let observed: Vec<u64> = test.variants.iter().map(|v| v.metrics.impressions).collect();
            let expected: Vec<f64> = test.variants.iter().map(|v| v.traffic_percentage).collect();
            if let Some(anomaly) = self.detector.detect(&observed, &expected) {
                warn!(
                    test_id = %test_id,
                    kind = %anomaly.kind,
                    statistic = anomaly.statistic,
                    "{}",
                    anomaly.description
                );
            }
            self.cache_test(&test).await;

            let results = compute_results(&test, now);
            let reason = if should_stop_early(&test, &results, now) {
                Some("Early stopping rule triggered")
            } else if test.automation.auto_stop && now >= test.timeline.planned_end {
                Some("Planned duration completed")
            } else {
                None
            };
            if let Some(reason) = reason {
                if let Err(e) = self.stop_test(&test_id, reason).await {
                    warn!(test_id = %test_id, error = %e, "automatic stop failed");
                }
            }
        }
        processed
    }

    pub async fn queued_tests(&self) -> Vec<String> {
        self.queue.read().await.clone()
    }

    pub async fn assignments_for_user(&self, user_id: &str) -> Vec<Assignment> {
        let mut out: Vec<Assignment> = self
            .assignments
            .read()
            .await
            .iter()
            .filter(|((_, user), _)| user == user_id)
            .map(|(_, assignment)| assignment.clone())
            .collect();
        out.sort_by(|a, b| a.test_id.cmp(&b.test_id));
        out
    }
}
