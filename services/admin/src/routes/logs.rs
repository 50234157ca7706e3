//! Read side of the audit trail

use axum::{
    Json,
    extract::{Path, State},
};
use axum_extra::extract::WithRejection;

use super::{Params, found};
use crate::{
    audit::{LogEntry, LogFilter, LogQuery},
    error::{ApiError, ApiResult},
    state::AppState,
};

/// Newest-first entries, at most 100
pub async fn list(
    State(state): State<AppState>,
    WithRejection(query, _): Params<LogQuery>,
) -> ApiResult<Json<Vec<LogEntry>>> {
    let filter = LogFilter::try_from(query.0).map_err(ApiError::Validation)?;
    let entries = state
        .audit
        .list(&filter)
        .await
        .map_err(|e| ApiError::Dependency(e.to_string()))?;
    Ok(Json(entries))
}

pub async fn get(
    State(state): State<AppState>,
    WithRejection(Path(id), _): WithRejection<Path<i64>, ApiError>,
) -> ApiResult<Json<LogEntry>> {
    let entry = state
        .audit
        .get(id)
        .await
        .map_err(|e| ApiError::Dependency(e.to_string()))?;
    Ok(Json(found(entry, "Log entry")?))
}
