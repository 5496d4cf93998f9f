//! Threat snapshot, export, and tail-stream handlers

use axum::extract::{Query, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::Json;
use chrono::{SecondsFormat, Utc};
use futures_util::stream::Stream;
use futures_util::StreamExt;
use serde::Deserialize;
use std::collections::{HashSet, VecDeque};
use std::convert::Infallible;
use std::time::Duration;
use tracing::warn;

use super::{ApiError, ApiResult, AppState};
use crate::database::Database;
use crate::models::ThreatRecord;

/// Distinct source IPs enriched with geolocation in a snapshot
const SNAPSHOT_GEO_LIMIT: usize = 100;

/// Quiet-period keepalive interval for the SSE stream (seconds)
const KEEPALIVE_SECS: u64 = 10;

/// Rows fetched per catch-up read on the tail stream
const TAIL_BATCH: usize = 256;

/// `GET /api/threats`: full snapshot, geolocation attached for the
/// first distinct source IPs when the service is enabled.
pub async fn snapshot(State(state): State<AppState>) -> ApiResult<Json<Vec<serde_json::Value>>> {
    let threats = state.db.list_threats(None)?;

    let mut geo_by_ip = std::collections::HashMap::new();
    if state.geo.enabled() {
        let mut seen = HashSet::new();
        for threat in &threats {
            if seen.len() >= SNAPSHOT_GEO_LIMIT {
                break;
            }
            if seen.insert(threat.source_ip.clone()) {
                if let Some(geo) = state.geo.lookup(&threat.source_ip).await {
                    geo_by_ip.insert(threat.source_ip.clone(), geo);
                }
            }
        }
    }

    let rows = threats
        .into_iter()
        .map(|threat| {
            let geo = geo_by_ip.get(&threat.source_ip).cloned();
            let mut value = serde_json::to_value(&threat).unwrap_or_default();
            if let (Some(obj), Some(geo)) = (value.as_object_mut(), geo) {
                obj.insert(
                    "geolocation".to_string(),
                    serde_json::to_value(geo).unwrap_or_default(),
                );
            }
            value
        })
        .collect();

    Ok(Json(rows))
}

#[derive(Debug, Deserialize)]
pub struct ExportQuery {
    #[serde(default)]
    pub format: Option<String>,
}

/// `GET /api/threats/export?format=json`
pub async fn export(
    State(state): State<AppState>,
    Query(query): Query<ExportQuery>,
) -> ApiResult<Json<serde_json::Value>> {
    if let Some(format) = query.format.as_deref() {
        if format != "json" {
            return Err(ApiError::BadRequest(format!(
                "Unsupported export format: {}",
                format
            )));
        }
    }

    let threats = state.db.list_threats(None)?;
    Ok(Json(serde_json::json!({
        "exported_at": Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
        "total_threats": threats.len(),
        "threats": threats,
    })))
}

#[derive(Debug, Deserialize)]
pub struct StreamQuery {
    /// Starting id cursor; 0 replays the whole log
    #[serde(default)]
    pub after: Option<i64>,
}

/// `GET /api/threats/stream`: server-sent events, one JSON threat per
/// event, in id order from the cursor, `: keepalive` comments when quiet.
pub async fn stream(
    State(state): State<AppState>,
    Query(query): Query<StreamQuery>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let after = query.after.unwrap_or(0);
    let events = tail_stream(state.db.clone(), after).map(|record| {
        Ok(Event::default().data(serde_json::to_string(&record).unwrap_or_default()))
    });

    Sse::new(events).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(KEEPALIVE_SECS))
            .text("keepalive"),
    )
}

/// Rows appended after `after`, in strictly increasing id order, forever.
///
/// The writer's watch channel wakes the stream on append; a one second
/// poll is the fallback, so a missed notification delays a row but never
/// drops it. Ends when the database (and its notify channel) goes away.
pub fn tail_stream(db: Database, after: i64) -> impl Stream<Item = ThreatRecord> {
    struct TailState {
        db: Database,
        cursor: i64,
        notify: tokio::sync::watch::Receiver<i64>,
        pending: VecDeque<ThreatRecord>,
    }

    let notify = db.subscribe();
    let state = TailState {
        db,
        cursor: after,
        notify,
        pending: VecDeque::new(),
    };

    futures_util::stream::unfold(state, |mut st| async move {
        loop {
            if let Some(row) = st.pending.pop_front() {
                st.cursor = row.id;
                return Some((row, st));
            }

            match st.db.threats_after(st.cursor, TAIL_BATCH) {
                Ok(rows) if !rows.is_empty() => {
                    st.pending.extend(rows);
                    continue;
                }
                Ok(_) => {}
                Err(e) => warn!("Tail stream read failed: {:#}", e),
            }

            tokio::select! {
                changed = st.notify.changed() => {
                    if changed.is_err() {
                        return None;
                    }
                }
                _ = tokio::time::sleep(Duration::from_secs(1)) => {}
            }
        }
    })
}
