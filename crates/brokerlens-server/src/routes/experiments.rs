use std::{collections::HashMap, sync::Arc};

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};

use brokerlens_engine::experiments::{AssignmentContext, TestConfig};

use crate::{error::AppError, state::AppState};

#[derive(Debug, Deserialize)]
pub struct StopQuery {
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct AssignRequest {
    pub user_id: String,
    pub session_id: Option<String>,
    pub user_agent: Option<String>,
    pub ip_address: Option<String>,
    pub referrer: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct TestConversionRequest {
    pub variant_id: String,
    pub kind: String,
    pub value: Option<f64>,
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
}

/// `POST /api/tests`
#[tracing::instrument(skip(state, config))]
pub async fn create_test(
    State(state): State<Arc<AppState>>,
    Json(config): Json<TestConfig>,
) -> Result<impl IntoResponse, AppError> {
    let test_id = state.services.experiments.create_test(config).await?;
    Ok((
        StatusCode::CREATED,
        Json(json!({ "data": { "test_id": test_id } })),
    ))
}

/// `POST /api/tests/{id}/start`
#[tracing::instrument(skip(state))]
pub async fn start_test(
    State(state): State<Arc<AppState>>,
    Path(test_id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    state.services.experiments.start_test(&test_id).await?;
    Ok(Json(json!({ "data": { "test_id": test_id, "status": "running" } })))
}

/// `POST /api/tests/{id}/stop?reason=`
#[tracing::instrument(skip(state))]
pub async fn stop_test(
    State(state): State<Arc<AppState>>,
    Path(test_id): Path<String>,
    Query(query): Query<StopQuery>,
) -> Result<impl IntoResponse, AppError> {
    let reason = query.reason.as_deref().unwrap_or("Stopped manually");
    let results = state.services.experiments.stop_test(&test_id, reason).await?;
    Ok(Json(json!({ "data": results })))
}

/// `POST /api/tests/{id}/assign`
///
/// 404 for an unknown test, 409 when the test exists but is not running.
#[tracing::instrument(skip(state, request))]
pub async fn assign(
    State(state): State<Arc<AppState>>,
    Path(test_id): Path<String>,
    Json(request): Json<AssignRequest>,
) -> Result<impl IntoResponse, AppError> {
    let context = AssignmentContext {
        user_agent: request.user_agent,
        ip_address: request.ip_address,
        referrer: request.referrer,
    };
    let experiments = &state.services.experiments;
    match experiments
        .assign_user_to_test(
            &test_id,
            &request.user_id,
            request.session_id.as_deref(),
            &context,
        )
        .await
    {
        Some(assignment) => Ok(Json(json!({ "data": assignment }))),
        None => match experiments.get_test(&test_id).await {
            Some(test) => Err(AppError::Conflict(format!(
                "Test {test_id} is {}, not running",
                test.status.as_str()
            ))),
            None => Err(AppError::NotFound(format!("Test {test_id} not found"))),
        },
    }
}

/// `POST /api/tests/{id}/conversions`
#[tracing::instrument(skip(state, request))]
pub async fn track_conversion(
    State(state): State<Arc<AppState>>,
    Path(test_id): Path<String>,
    Json(request): Json<TestConversionRequest>,
) -> impl IntoResponse {
    let recorded = state
        .services
        .experiments
        .track_test_conversion(
            &test_id,
            &request.variant_id,
            &request.kind,
            request.value,
            &request.metadata,
        )
        .await;
    Json(json!({ "data": { "recorded": recorded } }))
}

/// `GET /api/tests/{id}/results`
#[tracing::instrument(skip(state))]
pub async fn results(
    State(state): State<Arc<AppState>>,
    Path(test_id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let results = state
        .services
        .experiments
        .get_test_results(&test_id)
        .await
        .ok_or_else(|| AppError::NotFound(format!("Test {test_id} not found")))?;
    Ok(Json(json!({ "data": results })))
}
