use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::IntoResponse,
    Json,
};
use serde::Deserialize;
use serde_json::json;

use brokerlens_engine::export::ExportFormat;
use brokerlens_engine::intelligence::ReportConfig;
use brokerlens_engine::tracker::BehaviorFilters;

use crate::{error::AppError, state::AppState};

#[derive(Debug, Deserialize)]
pub struct ExportQuery {
    pub format: Option<String>,
}

/// `POST /api/reports`
#[tracing::instrument(skip(state, config))]
pub async fn generate_report(
    State(state): State<Arc<AppState>>,
    Json(config): Json<ReportConfig>,
) -> Result<impl IntoResponse, AppError> {
    let report = state.services.intelligence.generate_report(&config).await?;
    Ok((StatusCode::CREATED, Json(json!({ "data": report }))))
}

/// `GET /api/reports/{id}/export?format=json|csv`
///
/// Returns the file as an attachment. Formats without a renderer answer 400.
#[tracing::instrument(skip(state))]
pub async fn export_report(
    State(state): State<Arc<AppState>>,
    Path(report_id): Path<String>,
    Query(query): Query<ExportQuery>,
) -> Result<impl IntoResponse, AppError> {
    let format = match query.format.as_deref() {
        None => ExportFormat::Json,
        Some(raw) => {
            ExportFormat::parse(raw).ok_or_else(|| AppError::UnsupportedFormat(raw.to_string()))?
        }
    };
    let file = state
        .services
        .intelligence
        .export_report(&report_id, format)
        .await?;

    let disposition = format!("attachment; filename=\"{}\"", file.filename);
    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, file.content_type.clone()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        file.bytes,
    ))
}

/// `GET /api/dashboards`
#[tracing::instrument(skip(state))]
pub async fn list_dashboards(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let dashboards = state.services.intelligence.list_dashboards().await;
    Json(json!({ "data": dashboards }))
}

/// `GET /api/dashboards/{id}/data?seo_category=&traffic_source=&device_type=`
#[tracing::instrument(skip(state))]
pub async fn dashboard_data(
    State(state): State<Arc<AppState>>,
    Path(dashboard_id): Path<String>,
    Query(filters): Query<BehaviorFilters>,
) -> Result<impl IntoResponse, AppError> {
    let data = state
        .services
        .intelligence
        .get_dashboard_data(&dashboard_id, filters)
        .await?;
    Ok(Json(json!({ "data": data })))
}
