//! HTTP handlers for relaying uploads and working with stored objects.
//! Storage concerns stay in `RelayService`; handlers only translate between
//! HTTP and the service.

use crate::{
    errors::AppError,
    models::object::ObjectInfo,
    services::{
        relay_service::{ObjectLink, RelayService},
        uploader::UploadReport,
    },
};
use axum::{
    Json,
    extract::{Path, Query, State},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::IntoResponse,
};
use serde::Deserialize;
use std::{path::PathBuf, time::Duration};

/// Body of `POST /api/uploads`: a file already present in the relay's spool
/// directory, and the user it is uploaded for.
#[derive(Debug, Deserialize)]
pub struct UploadRequest {
    pub path: PathBuf,
    pub key: Option<String>,
    pub user_id: i64,
}

#[derive(Debug, Deserialize)]
pub struct LinkQuery {
    /// Lifetime in seconds; the configured default when absent.
    pub expires_in: Option<u64>,
}

/// `POST /api/uploads`: push a local file to the bucket.
pub async fn create_upload(
    State(service): State<RelayService>,
    Json(req): Json<UploadRequest>,
) -> Result<(StatusCode, Json<UploadReport>), AppError> {
    let report = service
        .upload_spooled(&req.path, req.key.as_deref(), req.user_id)
        .await?;
    Ok((StatusCode::CREATED, Json(report)))
}

/// `GET /api/objects/{*key}`: object metadata, with the ETag mirrored in
/// the response header.
pub async fn get_object(
    State(service): State<RelayService>,
    Path(key): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let info = service.describe(&key).await?;

    let mut headers = HeaderMap::new();
    if let Some(etag) = info.etag.as_deref()
        && let Ok(value) = HeaderValue::from_str(&format!("\"{}\"", etag))
    {
        headers.insert(header::ETAG, value);
    }
    Ok((headers, Json::<ObjectInfo>(info)))
}

/// `DELETE /api/objects/{*key}`
pub async fn delete_object(
    State(service): State<RelayService>,
    Path(key): Path<String>,
) -> Result<StatusCode, AppError> {
    service.delete(&key).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// `GET /api/links/{*key}?expires_in=`: time-limited download link.
pub async fn get_link(
    State(service): State<RelayService>,
    Path(key): Path<String>,
    Query(q): Query<LinkQuery>,
) -> Result<Json<ObjectLink>, AppError> {
    if q.expires_in == Some(0) {
        return Err(AppError::bad_request("expires_in must be positive"));
    }
    let link = service
        .link(&key, q.expires_in.map(Duration::from_secs))
        .await?;
    Ok(Json(link))
}
