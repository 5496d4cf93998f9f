//! Alert listing and statistics handlers

use axum::extract::{Query, State};
use axum::Json;
use serde::Deserialize;

use super::{ApiResult, AppState};
use crate::database::{AlertFilter, AlertStats};
use crate::models::AlertRecord;

const DEFAULT_LIMIT: usize = 100;

#[derive(Debug, Deserialize)]
pub struct AlertsQuery {
    pub limit: Option<usize>,
    /// Filter by alert type; wins over `ip` when both are supplied
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub ip: Option<String>,
}

/// `GET /api/alerts?limit=&type=&ip=`
pub async fn list(
    State(state): State<AppState>,
    Query(query): Query<AlertsQuery>,
) -> ApiResult<Json<Vec<AlertRecord>>> {
    let filter = if query.kind.is_some() {
        AlertFilter {
            kind: query.kind,
            ip: None,
        }
    } else {
        AlertFilter {
            kind: None,
            ip: query.ip,
        }
    };

    let limit = query.limit.unwrap_or(DEFAULT_LIMIT);
    let alerts = state.db.list_alerts(&filter, limit)?;
    Ok(Json(alerts))
}

/// `GET /api/alerts/stats`
pub async fn stats(State(state): State<AppState>) -> ApiResult<Json<AlertStats>> {
    Ok(Json(state.db.alert_stats()?))
}
