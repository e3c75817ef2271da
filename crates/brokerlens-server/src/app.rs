use std::sync::Arc;

use axum::{
    http::HeaderValue,
    routing::{get, post},
    Router,
};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use crate::{routes, state::AppState};

/// Permissive CORS unless origins are configured.
fn cors_layer(origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|o| HeaderValue::from_str(o).ok())
        .collect();
    if allowed.is_empty() {
        layer.allow_origin(Any)
    } else {
        layer.allow_origin(allowed)
    }
}

/// Construct the Axum [`Router`] with all routes and middleware attached.
///
/// Middleware is applied in outer-to-inner order (outermost runs first on
/// request, last on response):
///
/// 1. `TraceLayer`, structured request/response logging via `tracing`.
/// 2. `CorsLayer`, for the dashboard front-end and the tracking script.
pub fn build_app(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(routes::health::health))
        // Behavior tracking
        .route("/api/sessions", post(routes::sessions::start_session))
        .route(
            "/api/sessions/{id}/interactions",
            post(routes::sessions::track_interaction),
        )
        .route(
            "/api/sessions/{id}/conversions",
            post(routes::sessions::track_conversion),
        )
        .route("/api/sessions/{id}/end", post(routes::sessions::end_session))
        .route("/api/sessions/{id}/journey", get(routes::sessions::journey))
        .route("/api/insights/behavior", get(routes::insights::behavior))
        .route("/api/realtime", get(routes::insights::realtime))
        // Conversion optimization
        .route("/api/funnels", post(routes::funnels::create_funnel))
        .route(
            "/api/funnels/{id}/analysis",
            get(routes::funnels::analyze_funnel),
        )
        .route(
            "/api/optimizations/{id}/execute",
            post(routes::funnels::execute_optimization),
        )
        // Experiments
        .route("/api/tests", post(routes::experiments::create_test))
        .route("/api/tests/{id}/start", post(routes::experiments::start_test))
        .route("/api/tests/{id}/stop", post(routes::experiments::stop_test))
        .route("/api/tests/{id}/assign", post(routes::experiments::assign))
        .route(
            "/api/tests/{id}/conversions",
            post(routes::experiments::track_conversion),
        )
        .route("/api/tests/{id}/results", get(routes::experiments::results))
        // Cross-service analytics
        .route("/api/analytics/unified", get(routes::analytics::unified))
        .route("/api/analytics/health", get(routes::analytics::health))
        .route("/api/analytics/insights", get(routes::analytics::insights))
        .route(
            "/api/analytics/insights/{id}/dismiss",
            post(routes::analytics::dismiss_insight),
        )
        .route("/api/analytics/dashboard", get(routes::analytics::dashboard))
        // Business intelligence
        .route("/api/reports", post(routes::reports::generate_report))
        .route("/api/reports/{id}/export", get(routes::reports::export_report))
        .route("/api/dashboards", get(routes::reports::list_dashboards))
        .route(
            "/api/dashboards/{id}/data",
            get(routes::reports::dashboard_data),
        )
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer(&state.config.cors_origins))
        .with_state(state)
}
