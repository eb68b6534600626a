//! bucket-relay: push local files into an S3-compatible bucket through
//! chunked multipart uploads, with progress reporting, upload gating and a
//! small HTTP surface.

pub mod config;
pub mod errors;
pub mod handlers;
pub mod models;
pub mod routes;
pub mod services;
pub mod store;

use axum::Router;
use services::relay_service::RelayService;

/// The relay's HTTP application with its state attached.
pub fn app(service: RelayService) -> Router {
    routes::routes::routes().with_state(service)
}
