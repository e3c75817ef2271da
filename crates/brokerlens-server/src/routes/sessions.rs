use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde_json::json;

use brokerlens_core::session::StartSessionOptions;
use brokerlens_engine::aggregator::AggregationRequest;
use brokerlens_engine::tracker::{ConversionInput, InteractionInput};

use crate::{error::AppError, state::AppState};

/// `POST /api/sessions`
#[tracing::instrument(skip(state, options))]
pub async fn start_session(
    State(state): State<Arc<AppState>>,
    Json(options): Json<StartSessionOptions>,
) -> impl IntoResponse {
    let session_id = state.services.tracker.start_session(options).await;
    (
        StatusCode::CREATED,
        Json(json!({ "data": { "session_id": session_id } })),
    )
}

/// `POST /api/sessions/{id}/interactions`
///
/// Interactions for unknown or ended sessions are dropped; the response
/// reports whether the event was recorded.
#[tracing::instrument(skip(state, input))]
pub async fn track_interaction(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
    Json(input): Json<InteractionInput>,
) -> impl IntoResponse {
    let recorded = state
        .services
        .tracker
        .track_interaction(&session_id, input)
        .await;
    Json(json!({ "data": { "recorded": recorded } }))
}

/// `POST /api/sessions/{id}/conversions`
#[tracing::instrument(skip(state, input))]
pub async fn track_conversion(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
    Json(input): Json<ConversionInput>,
) -> Result<impl IntoResponse, AppError> {
    let event = state
        .services
        .tracker
        .track_conversion(&session_id, input)
        .await
        .ok_or_else(|| AppError::NotFound(format!("Session {session_id} not found")))?;
    Ok((StatusCode::CREATED, Json(json!({ "data": event }))))
}

/// `POST /api/sessions/{id}/end`
///
/// Ending a session queues a deferred cross-service aggregation for it.
#[tracing::instrument(skip(state))]
pub async fn end_session(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let session = state.services.tracker.end_session(&session_id).await?;
    state
        .services
        .aggregator
        .enqueue_aggregation(AggregationRequest {
            session_id: Some(session.session_id.clone()),
            user_id: session.user_id.clone(),
            page_url: Some(session.current_page.clone()),
        })
        .await;
    Ok(Json(json!({ "data": session })))
}

/// `GET /api/sessions/{id}/journey`
#[tracing::instrument(skip(state))]
pub async fn journey(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let journey = state
        .services
        .tracker
        .get_user_journey(&session_id)
        .await
        .ok_or_else(|| AppError::NotFound(format!("Session {session_id} not found")))?;
    Ok(Json(json!({ "data": journey })))
}
