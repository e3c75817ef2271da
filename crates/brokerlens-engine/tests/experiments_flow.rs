use std::collections::HashMap;

use brokerlens_core::config::Config;
use brokerlens_core::error::AnalyticsError;
use brokerlens_engine::experiments::{
    default_metrics, AssignmentContext, MetricRole, TestConfig, TestStatus, Variant,
};
use brokerlens_engine::services::AnalyticsServices;

fn services() -> AnalyticsServices {
    AnalyticsServices::local(&Config::default())
}

fn config(name: &str) -> TestConfig {
    TestConfig {
        name: Some(name.to_string()),
        hypothesis: Some("A shorter signup form converts more visitors".to_string()),
        ..TestConfig::default()
    }
}

#[tokio::test]
async fn variant_a_wins_with_higher_conversion_rate() {
    let services = services();
    let ab = &services.experiments;
    let test_id = ab.create_test(config("Signup form")).await.expect("create");
    ab.start_test(&test_id).await.expect("start");

    let context = AssignmentContext::default();
    let mut by_variant: HashMap<String, Vec<String>> = HashMap::new();
    for i in 0..2000 {
        let user = format!("user_{i}");
        let assignment = ab
            .assign_user_to_test(&test_id, &user, None, &context)
            .await
            .expect("running test assigns");
        by_variant.entry(assignment.variant_id).or_default().push(user);
    }
    assert_eq!(by_variant.len(), 2);

    for (variant, users) in &by_variant {
        let rate = if variant == "variant_a" { 0.08 } else { 0.05 };
        let conversions = (users.len() as f64 * rate).round() as usize;
        for _ in 0..conversions {
            assert!(
                ab.track_test_conversion(&test_id, variant, "signup", Some(25.0), &HashMap::new())
                    .await
            );
        }
    }

    let results = ab.get_test_results(&test_id).await.expect("results");
    assert_eq!(results.winner.as_deref(), Some("variant_a"));
    assert!(results.statistical_significance);

    let stopped = ab.stop_test(&test_id, "Analysis complete").await.expect("stop");
    assert_eq!(stopped.winner.as_deref(), Some("variant_a"));
    let test = ab.get_test(&test_id).await.expect("test");
    assert_eq!(test.status, TestStatus::Completed);
}

#[tokio::test]
async fn assignment_is_sticky_per_user() {
    let services = services();
    let ab = &services.experiments;
    let test_id = ab.create_test(config("Sticky")).await.expect("create");
    ab.start_test(&test_id).await.expect("start");

    let context = AssignmentContext::default();
    let first = ab
        .assign_user_to_test(&test_id, "user_42", None, &context)
        .await
        .expect("assigned");
    let second = ab
        .assign_user_to_test(&test_id, "user_42", None, &context)
        .await
        .expect("assigned");
    assert_eq!(first.variant_id, second.variant_id);
    assert_eq!(ab.assignments_for_user("user_42").await.len(), 1);
}

#[tokio::test]
async fn draft_tests_do_not_assign_or_convert() {
    let services = services();
    let ab = &services.experiments;
    let test_id = ab.create_test(config("Draft")).await.expect("create");
    let context = AssignmentContext::default();
    assert!(ab
        .assign_user_to_test(&test_id, "user_1", None, &context)
        .await
        .is_none());
    assert!(
        !ab.track_test_conversion(&test_id, "control", "signup", None, &HashMap::new())
            .await
    );
}

#[tokio::test]
async fn missing_name_is_rejected() {
    let services = services();
    let err = services
        .experiments
        .create_test(TestConfig::default())
        .await
        .expect_err("name required");
    match err {
        AnalyticsError::Validation(message) => assert_eq!(message, "Test name is required"),
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn lifecycle_transitions_are_guarded() {
    let services = services();
    let ab = &services.experiments;
    let test_id = ab.create_test(config("Lifecycle")).await.expect("create");

    let err = ab.pause_test(&test_id).await.expect_err("draft cannot pause");
    assert!(matches!(err, AnalyticsError::InvalidState(_)));

    ab.mark_ready(&test_id).await.expect("ready");
    assert_eq!(ab.get_test(&test_id).await.expect("test").status, TestStatus::Ready);
    ab.start_test(&test_id).await.expect("start");
    assert_eq!(ab.queued_tests().await, vec![test_id.clone()]);

    ab.pause_test(&test_id).await.expect("pause");
    let context = AssignmentContext::default();
    assert!(ab
        .assign_user_to_test(&test_id, "user_7", None, &context)
        .await
        .is_none());
    ab.resume_test(&test_id).await.expect("resume");
    assert!(ab
        .assign_user_to_test(&test_id, "user_7", None, &context)
        .await
        .is_some());

    let err = ab.archive_test(&test_id).await.expect_err("running cannot archive");
    assert!(matches!(err, AnalyticsError::InvalidState(_)));
    ab.stop_test(&test_id, "Enough data").await.expect("stop");
    ab.archive_test(&test_id).await.expect("archive");
    assert_eq!(
        ab.get_test(&test_id).await.expect("test").status,
        TestStatus::Archived
    );
}

#[tokio::test]
async fn per_test_analyses_check_the_test() {
    let services = services();
    let ab = &services.experiments;
    let test_id = ab.create_test(config("Meta description")).await.expect("create");

    let err = ab
        .get_multivariate_analysis(&test_id)
        .await
        .expect_err("page test is not multivariate");
    match err {
        AnalyticsError::Validation(message) => {
            assert_eq!(message, "Invalid test for multivariate analysis")
        }
        other => panic!("unexpected error: {other:?}"),
    }

    let insights = ab.get_seo_test_insights(&test_id).await.expect("seo insights");
    assert_eq!(insights.test_id, test_id);
    assert_eq!(insights.variants.len(), 2);

    let err = ab
        .get_seo_test_insights("test_missing")
        .await
        .expect_err("unknown test");
    assert!(matches!(err, AnalyticsError::NotFound(_)));
}

async fn start_error(config: TestConfig) -> String {
    let services = services();
    let ab = &services.experiments;
    let test_id = ab.create_test(config).await.expect("create");
    match ab.start_test(&test_id).await.expect_err("not startable") {
        AnalyticsError::Validation(message) => message,
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn start_requires_exactly_one_control() {
    let mut no_control = config("No control");
    no_control.variants = Some(vec![
        Variant::new("variant_a", "A", false, 50.0),
        Variant::new("variant_b", "B", false, 50.0),
    ]);
    assert_eq!(
        start_error(no_control).await,
        "Exactly one control variant is required"
    );

    let mut two_controls = config("Two controls");
    two_controls.variants = Some(vec![
        Variant::new("control", "Control", true, 50.0),
        Variant::new("control_b", "Control B", true, 50.0),
    ]);
    assert_eq!(
        start_error(two_controls).await,
        "Exactly one control variant is required"
    );
}

#[tokio::test]
async fn start_requires_exactly_one_primary_metric() {
    let mut metrics = default_metrics();
    let mut second = metrics[0].clone();
    second.name = "revenue_per_visitor".to_string();
    metrics.push(second);
    let mut two_primaries = config("Two primaries");
    two_primaries.target_metrics = Some(metrics);
    assert_eq!(
        start_error(two_primaries).await,
        "Exactly one primary metric is required"
    );

    let mut no_primary = config("No primary");
    no_primary.target_metrics = Some(
        default_metrics()
            .into_iter()
            .filter(|m| m.role != MetricRole::Primary)
            .collect(),
    );
    let err = services()
        .experiments
        .create_test(no_primary)
        .await
        .expect_err("primary required");
    match err {
        AnalyticsError::Validation(message) => {
            assert_eq!(message, "Primary metric required for power analysis")
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn out_of_range_durations_are_rejected_at_creation() {
    let services = services();
    let ab = &services.experiments;
    for days in [-30, 0, i64::MAX / 1000] {
        let mut c = config("Duration");
        c.duration_days = Some(days);
        match ab.create_test(c).await.expect_err("bad duration") {
            AnalyticsError::Validation(message) => {
                assert_eq!(message, "Test duration must be between 1 and 365 days")
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
    assert!(ab.list_tests().await.is_empty());

    let mut c = config("Thirty days");
    c.duration_days = Some(30);
    let test_id = ab.create_test(c).await.expect("create");
    ab.start_test(&test_id).await.expect("start");
    ab.process_test_queue(chrono::Utc::now()).await;
    let test = ab.get_test(&test_id).await.expect("test");
    assert_eq!(test.status, TestStatus::Running);
    assert!(test.timeline.planned_end > test.timeline.planned_start);
}
