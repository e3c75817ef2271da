use std::sync::Arc;

use axum::{
    extract::{Query, State},
    response::IntoResponse,
    Json,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::json;

use brokerlens_core::session::DeviceType;
use brokerlens_core::time::TimeRange;
use brokerlens_engine::tracker::BehaviorFilters;

use crate::{error::AppError, state::AppState};

#[derive(Debug, Deserialize)]
pub struct BehaviorQuery {
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    pub seo_category: Option<String>,
    pub traffic_source: Option<String>,
    pub device_type: Option<DeviceType>,
}

impl BehaviorQuery {
    /// A range needs both ends; a lone bound is rejected.
    fn range(&self) -> Result<Option<TimeRange>, AppError> {
        match (self.start, self.end) {
            (Some(start), Some(end)) if start <= end => Ok(Some(TimeRange::new(start, end))),
            (Some(_), Some(_)) => Err(AppError::BadRequest(
                "start must not be after end".to_string(),
            )),
            (None, None) => Ok(None),
            _ => Err(AppError::BadRequest(
                "start and end must be given together".to_string(),
            )),
        }
    }

    fn filters(&self) -> BehaviorFilters {
        BehaviorFilters {
            seo_category: self.seo_category.clone(),
            traffic_source: self.traffic_source.clone(),
            device_type: self.device_type,
        }
    }
}

/// `GET /api/insights/behavior?start=&end=&seo_category=&traffic_source=&device_type=`
#[tracing::instrument(skip(state))]
pub async fn behavior(
    State(state): State<Arc<AppState>>,
    Query(query): Query<BehaviorQuery>,
) -> Result<impl IntoResponse, AppError> {
    let range = query.range()?;
    let insights = state
        .services
        .tracker
        .get_behavior_insights(range, &query.filters())
        .await;
    Ok(Json(json!({ "data": insights })))
}

/// `GET /api/realtime`
#[tracing::instrument(skip(state))]
pub async fn realtime(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let metrics = state.services.tracker.get_real_time_metrics().await;
    Json(json!({ "data": metrics }))
}
