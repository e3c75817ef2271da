use std::sync::Arc;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;

use brokerlens_core::config::Config;
use brokerlens_server::app::build_app;
use brokerlens_server::scheduler::{process_once, Job, JobClock};
use brokerlens_server::state::AppState;

fn test_config() -> Config {
    Config {
        port: 0,
        export_base_url: "http://localhost:0/exports".to_string(),
        ..Config::default()
    }
}

fn setup() -> (Arc<AppState>, axum::Router) {
    let state = Arc::new(AppState::new(test_config()));
    let app = build_app(Arc::clone(&state));
    (state, app)
}

fn json_request(method: &str, uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .expect("request")
}

fn get_request(uri: &str) -> Request<Body> {
    Request::builder()
        .method("GET")
        .uri(uri)
        .body(Body::empty())
        .expect("request")
}

async fn json_body(response: axum::response::Response) -> Value {
    let bytes = response
        .into_body()
        .collect()
        .await
        .expect("body")
        .to_bytes();
    serde_json::from_slice(&bytes).expect("json body")
}

#[tokio::test]
async fn health_returns_ok() {
    let (_state, app) = setup();
    let response = app.oneshot(get_request("/health")).await.expect("response");
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["active_sessions"], 0);
}

#[tokio::test]
async fn session_lifecycle_over_http() {
    let (state, app) = setup();

    let response = app
        .clone()
        .oneshot(json_request(
            "POST",
            "/api/sessions",
            json!({ "landing_url": "/brokers/compare", "user_id": "trader_1" }),
        ))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::CREATED);
    let session_id = json_body(response).await["data"]["session_id"]
        .as_str()
        .expect("session id")
        .to_string();

    let response = app
        .clone()
        .oneshot(json_request(
            "POST",
            &format!("/api/sessions/{session_id}/interactions"),
            json!({ "kind": "click", "page_url": "/brokers/compare", "element_id": "open-account" }),
        ))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await["data"]["recorded"], true);

    let response = app
        .clone()
        .oneshot(json_request(
            "POST",
            &format!("/api/sessions/{session_id}/conversions"),
            json!({ "kind": "signup", "value": 50.0 }),
        ))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::CREATED);

    let response = app
        .clone()
        .oneshot(get_request(&format!("/api/sessions/{session_id}/journey")))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .clone()
        .oneshot(json_request(
            "POST",
            &format!("/api/sessions/{session_id}/end"),
            json!({}),
        ))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["data"]["session_id"], session_id.as_str());
    assert_eq!(state.services.tracker.active_session_count().await, 0);

    // The end handler queued one deferred aggregation.
    assert_eq!(state.services.aggregator.process_aggregation_queue().await, 1);

    let response = app
        .oneshot(json_request(
            "POST",
            &format!("/api/sessions/{session_id}/end"),
            json!({}),
        ))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn unknown_session_uses_error_envelope() {
    let (_state, app) = setup();
    let response = app
        .oneshot(get_request("/api/sessions/session_missing/journey"))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body = json_body(response).await;
    assert_eq!(body["error"]["code"], "not_found");
    assert!(body["error"]["field"].is_null());
}

#[tokio::test]
async fn experiment_create_start_and_assign() {
    let (_state, app) = setup();
    let response = app
        .clone()
        .oneshot(json_request(
            "POST",
            "/api/tests",
            json!({
                "name": "Spread table layout",
                "hypothesis": "Showing spreads first raises account signups"
            }),
        ))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::CREATED);
    let test_id = json_body(response).await["data"]["test_id"]
        .as_str()
        .expect("test id")
        .to_string();

    let assign = json!({ "user_id": "trader_9" });
    let response = app
        .clone()
        .oneshot(json_request(
            "POST",
            &format!("/api/tests/{test_id}/assign"),
            assign.clone(),
        ))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::CONFLICT);

    let response = app
        .clone()
        .oneshot(json_request(
            "POST",
            &format!("/api/tests/{test_id}/start"),
            json!({}),
        ))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .clone()
        .oneshot(json_request(
            "POST",
            &format!("/api/tests/{test_id}/assign"),
            assign,
        ))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["data"]["user_id"], "trader_9");
    let variant_id = body["data"]["variant_id"]
        .as_str()
        .expect("variant")
        .to_string();

    let response = app
        .clone()
        .oneshot(json_request(
            "POST",
            &format!("/api/tests/{test_id}/conversions"),
            json!({ "variant_id": variant_id, "kind": "signup", "value": 20.0 }),
        ))
        .await
        .expect("response");
    assert_eq!(json_body(response).await["data"]["recorded"], true);

    let response = app
        .oneshot(json_request(
            "POST",
            "/api/tests/test_missing/assign",
            json!({ "user_id": "trader_9" }),
        ))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn invalid_test_is_a_validation_error() {
    let (_state, app) = setup();
    let response = app
        .oneshot(json_request("POST", "/api/tests", json!({})))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = json_body(response).await;
    assert_eq!(body["error"]["code"], "validation_error");
    assert_eq!(body["error"]["message"], "Test name is required");
}

#[tokio::test]
async fn report_export_checks_format() {
    let (_state, app) = setup();
    let response = app
        .clone()
        .oneshot(json_request("POST", "/api/reports", json!({ "report_type": "executive" })))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::CREATED);
    let report_id = json_body(response).await["data"]["id"]
        .as_str()
        .expect("report id")
        .to_string();

    let response = app
        .clone()
        .oneshot(get_request(&format!(
            "/api/reports/{report_id}/export?format=pdf"
        )))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(json_body(response).await["error"]["code"], "unsupported_format");

    let response = app
        .clone()
        .oneshot(get_request(&format!(
            "/api/reports/{report_id}/export?format=csv"
        )))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()[header::CONTENT_TYPE],
        "text/csv; charset=utf-8"
    );
    let disposition = response.headers()[header::CONTENT_DISPOSITION]
        .to_str()
        .expect("header")
        .to_string();
    assert!(disposition.starts_with("attachment;"));
    assert!(disposition.contains(&format!("bi_report_{report_id}.csv")));

    let response = app
        .oneshot(get_request("/api/reports/bi_report_missing/export?format=json"))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn dashboards_list_and_render() {
    let (_state, app) = setup();
    let response = app
        .clone()
        .oneshot(get_request("/api/dashboards"))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    let dashboards = body["data"].as_array().expect("dashboards");
    assert_eq!(dashboards.len(), 3);
    let id = dashboards[0]["id"].as_str().expect("id").to_string();

    let response = app
        .clone()
        .oneshot(get_request(&format!("/api/dashboards/{id}/data")))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .oneshot(get_request("/api/dashboards/dashboard_missing/data"))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn analytics_dashboard_rejects_unknown_audience() {
    let (_state, app) = setup();
    let response = app
        .clone()
        .oneshot(get_request("/api/analytics/dashboard?audience=interns"))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app
        .oneshot(get_request("/api/analytics/dashboard?audience=executive"))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await["data"]["audience"], "executive");
}

#[tokio::test]
async fn behavior_insights_need_both_range_ends() {
    let (_state, app) = setup();
    let response = app
        .clone()
        .oneshot(get_request(
            "/api/insights/behavior?start=2026-01-01T00:00:00Z",
        ))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app
        .oneshot(get_request("/api/insights/behavior?device_type=mobile"))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await["data"]["total_sessions"], 0);
}

#[tokio::test]
async fn scheduler_runs_every_job_on_first_pass() {
    let (state, _app) = setup();
    let now = chrono::Utc::now();
    let mut clock = JobClock::default();
    let completed = process_once(&state, &mut clock, now)
        .await
        .expect("scheduler pass");
    assert_eq!(completed.len(), Job::ALL.len());

    let again = process_once(&state, &mut clock, now + chrono::Duration::seconds(10))
        .await
        .expect("scheduler pass");
    let jobs: Vec<Job> = again.into_iter().map(|(job, _)| job).collect();
    assert_eq!(jobs, vec![Job::DrainInteractions]);
}
