use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::Deserialize;
use serde_json::json;

use brokerlens_engine::optimizer::FunnelConfig;

use crate::{error::AppError, state::AppState};

#[derive(Debug, Deserialize)]
pub struct ExecuteQuery {
    #[serde(default)]
    pub auto_approve: bool,
}

/// `POST /api/funnels`
#[tracing::instrument(skip(state, config))]
pub async fn create_funnel(
    State(state): State<Arc<AppState>>,
    Json(config): Json<FunnelConfig>,
) -> impl IntoResponse {
    let funnel_id = state.services.optimizer.create_funnel(config).await;
    (
        StatusCode::CREATED,
        Json(json!({ "data": { "funnel_id": funnel_id } })),
    )
}

/// `GET /api/funnels/{id}/analysis`
#[tracing::instrument(skip(state))]
pub async fn analyze_funnel(
    State(state): State<Arc<AppState>>,
    Path(funnel_id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let performance = state.services.optimizer.analyze_funnel(&funnel_id).await?;
    Ok(Json(json!({ "data": performance })))
}

/// `POST /api/optimizations/{id}/execute?auto_approve=true`
///
/// Critical recommendations answer 403 unless `auto_approve` is set.
#[tracing::instrument(skip(state))]
pub async fn execute_optimization(
    State(state): State<Arc<AppState>>,
    Path(optimization_id): Path<String>,
    Query(query): Query<ExecuteQuery>,
) -> Result<impl IntoResponse, AppError> {
    let result = state
        .services
        .optimizer
        .execute_optimization(&optimization_id, query.auto_approve)
        .await?;
    Ok(Json(json!({ "data": result })))
}
