//! Defines routes for the relay's HTTP surface.
//!
//! ## Structure
//! - **Probes**
//!   - `GET    /healthz` liveness
//!   - `GET    /readyz` store readiness
//!   - `GET    /api/status` upload counters
//!
//! - **Relay endpoints**
//!   - `POST   /api/uploads` upload a file from the spool directory
//!   - `GET    /api/objects/{*key}` object metadata
//!   - `DELETE /api/objects/{*key}` delete object
//!   - `GET    /api/links/{*key}` presigned download link
//!
//! The wildcard `*key` allows nested keys like `photos/2025/img.jpg`.

use crate::{
    handlers::{
        health_handlers::{api_status, healthz, readyz},
        object_handlers::{create_upload, delete_object, get_link, get_object},
    },
    services::relay_service::RelayService,
};
use axum::{
    Router,
    routing::{get, post},
};

/// Build the router; every handler shares the `RelayService` state.
pub fn routes() -> Router<RelayService> {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/api/status", get(api_status))
        .route("/api/uploads", post(create_upload))
        .route("/api/objects/{*key}", get(get_object).delete(delete_object))
        .route("/api/links/{*key}", get(get_link))
}
