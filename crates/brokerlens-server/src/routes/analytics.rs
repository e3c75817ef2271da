use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    response::IntoResponse,
    Json,
};
use serde::Deserialize;
use serde_json::json;

use brokerlens_core::priority::Priority;
use brokerlens_engine::aggregator::Audience;

use crate::{error::AppError, state::AppState};

#[derive(Debug, Deserialize)]
pub struct UnifiedQuery {
    pub session_id: Option<String>,
    pub user_id: Option<String>,
    pub page_url: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct InsightsQuery {
    pub priority: Option<Priority>,
    /// Comma-separated service names.
    pub services: Option<String>,
    pub limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct DashboardQuery {
    pub audience: Option<String>,
}

/// `GET /api/analytics/unified?session_id=&user_id=&page_url=`
#[tracing::instrument(skip(state))]
pub async fn unified(
    State(state): State<Arc<AppState>>,
    Query(query): Query<UnifiedQuery>,
) -> impl IntoResponse {
    let data = state
        .services
        .aggregator
        .aggregate_analytics(
            query.session_id.as_deref(),
            query.user_id.as_deref(),
            query.page_url.as_deref(),
        )
        .await;
    Json(json!({ "data": data }))
}

/// `GET /api/analytics/health`
#[tracing::instrument(skip(state))]
pub async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let health = state.services.aggregator.get_analytics_health().await;
    Json(json!({ "data": health }))
}

/// `GET /api/analytics/insights?priority=&services=a,b&limit=`
#[tracing::instrument(skip(state))]
pub async fn insights(
    State(state): State<Arc<AppState>>,
    Query(query): Query<InsightsQuery>,
) -> impl IntoResponse {
    let services = query.services.map(|raw| {
        raw.split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect::<Vec<_>>()
    });
    let insights = state
        .services
        .aggregator
        .get_cross_service_insights(query.priority, services, query.limit)
        .await;
    Json(json!({ "data": insights }))
}

/// `POST /api/analytics/insights/{id}/dismiss`
#[tracing::instrument(skip(state))]
pub async fn dismiss_insight(
    State(state): State<Arc<AppState>>,
    Path(insight_id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    state
        .services
        .aggregator
        .dismiss_insight(&insight_id)
        .await?;
    Ok(Json(json!({ "data": { "insight_id": insight_id, "dismissed": true } })))
}

/// `GET /api/analytics/dashboard?audience=executive|operational|technical`
#[tracing::instrument(skip(state))]
pub async fn dashboard(
    State(state): State<Arc<AppState>>,
    Query(query): Query<DashboardQuery>,
) -> Result<impl IntoResponse, AppError> {
    let audience = match query.audience.as_deref() {
        None => Audience::default(),
        Some(raw) => Audience::parse(raw)
            .ok_or_else(|| AppError::BadRequest(format!("Unknown audience {raw}")))?,
    };
    let dashboard = state
        .services
        .aggregator
        .get_analytics_dashboard(audience)
        .await;
    Ok(Json(json!({ "data": dashboard })))
}
