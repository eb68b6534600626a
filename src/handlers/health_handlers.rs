//! Health, readiness and status handlers.
//!
//! - GET /healthz    -> liveness, never touches the store
//! - GET /readyz     -> readiness, probes the configured store
//! - GET /api/status -> upload counters and uptime

use crate::services::{relay_service::RelayService, stats::StatusReport};
use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use chrono::{SecondsFormat, Utc};
use serde::Serialize;

/// `GET /healthz`
///
/// Always 200 with a small JSON body. Cheap and free of I/O.
pub async fn healthz() -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(HealthResponse {
            status: "ok",
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
        }),
    )
}

/// `GET /readyz`
///
/// 200 when the store answers its readiness probe, 503 with the reason
/// otherwise.
pub async fn readyz(State(service): State<RelayService>) -> impl IntoResponse {
    match service.check_ready().await {
        Ok(()) => (
            StatusCode::OK,
            Json(ReadyResponse {
                status: "ok",
                error: None,
            }),
        ),
        Err(err) => {
            tracing::warn!(error = %err, "readiness check failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(ReadyResponse {
                    status: "error",
                    error: Some(err.to_string()),
                }),
            )
        }
    }
}

/// `GET /api/status`
pub async fn api_status(State(service): State<RelayService>) -> Json<StatusReport> {
    Json(service.status())
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    timestamp: String,
}

#[derive(Serialize)]
struct ReadyResponse {
    status: &'static str,
    error: Option<String>,
}
