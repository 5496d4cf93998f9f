//! Health, geolocation, and chat handlers

use axum::extract::{Path, State};
use axum::Json;
use serde::{Deserialize, Serialize};

use super::{ApiError, ApiResult, AppState};
use crate::models::Geolocation;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    #[serde(rename = "logFileExists")]
    pub log_file_exists: bool,
    #[serde(rename = "logFileSize")]
    pub log_file_size: u64,
    #[serde(rename = "dbFileExists")]
    pub db_file_exists: bool,
    #[serde(rename = "dbFileSize")]
    pub db_file_size: u64,
    #[serde(rename = "packetsProcessed")]
    pub packets_processed: u64,
}

/// `GET /api/health`
pub async fn health(State(state): State<AppState>) -> ApiResult<Json<HealthResponse>> {
    let log_meta = std::fs::metadata(state.config.log_path()).ok();
    let db_meta = std::fs::metadata(state.config.db_path()).ok();

    let packets_processed = state
        .db
        .get_stat("packet_count")?
        .and_then(|v| v.parse().ok())
        .unwrap_or(0);

    Ok(Json(HealthResponse {
        status: "ok",
        log_file_exists: log_meta.is_some(),
        log_file_size: log_meta.map(|m| m.len()).unwrap_or(0),
        db_file_exists: db_meta.is_some(),
        db_file_size: db_meta.map(|m| m.len()).unwrap_or(0),
        packets_processed,
    }))
}

/// `GET /api/geolocation/{ip}`
pub async fn geolocation(
    State(state): State<AppState>,
    Path(ip): Path<String>,
) -> ApiResult<Json<Geolocation>> {
    if !state.geo.enabled() {
        return Err(ApiError::ServiceUnavailable(
            "Geolocation service is disabled".to_string(),
        ));
    }

    match state.geo.lookup(&ip).await {
        Some(geo) => Ok(Json(geo)),
        None => Err(ApiError::NotFound(format!("No geolocation data for {}", ip))),
    }
}

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct ChatResponse {
    pub reply: String,
}

/// `POST /api/chat`: summarizes the last 24 hours for the LLM and
/// forwards the user's question.
pub async fn chat(
    State(state): State<AppState>,
    Json(request): Json<ChatRequest>,
) -> ApiResult<Json<ChatResponse>> {
    let summary = state.db.threat_summary()?;

    let by_kind = if summary.by_kind.is_empty() {
        "none".to_string()
    } else {
        summary
            .by_kind
            .iter()
            .map(|(kind, count)| format!("{}={}", kind, count))
            .collect::<Vec<_>>()
            .join(", ")
    };

    let top_sources = if summary.top_sources.is_empty() {
        "none".to_string()
    } else {
        summary
            .top_sources
            .iter()
            .map(|(ip, count)| format!("{} ({})", ip, count))
            .collect::<Vec<_>>()
            .join(", ")
    };

    let ratio = summary
        .avg_syn_ack_ratio
        .map(|r| format!("{:.4}", r))
        .unwrap_or_else(|| "n/a".to_string());

    let prompt = format!(
        "You are the assistant for a network threat monitoring dashboard.\n\
         Current statistics (last 24 hours):\n\
         - Total threats: {}\n\
         - By type: {}\n\
         - Top source IPs: {}\n\
         - Traffic trend: {}\n\
         - Average SYN/ACK ratio: {}\n\n\
         User question: {}\n\
         Answer concisely using the statistics above.",
        summary.total_24h,
        by_kind,
        top_sources,
        summary.trend(),
        ratio,
        request.message,
    );

    let reply = state.llm.generate(&prompt).await;
    Ok(Json(ChatResponse { reply }))
}
