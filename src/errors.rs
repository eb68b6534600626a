use crate::{
    services::{
        downloader::DownloadError, gate::GateError, premium::PremiumError,
        relay_service::RelayError, uploader::UploadError,
    },
    store::StoreError,
};
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::fmt;

/// A lightweight wrapper for general errors that keeps the message local.
#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub message: String,
}

impl AppError {
    /// Create a new AppError with a specific status and message.
    pub fn new(status: StatusCode, msg: impl Into<String>) -> Self {
        Self {
            status,
            message: msg.into(),
        }
    }

    /// Shortcut for a 500 Internal Server Error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, msg)
    }

    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, msg)
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "error": self.message,
            "status": self.status.as_u16()
        }));

        (self.status, body).into_response()
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::internal(err.to_string())
    }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        let status = match &err {
            StoreError::NotFound(_) | StoreError::NoSuchUpload(_) => StatusCode::NOT_FOUND,
            StoreError::InvalidKey(_)
            | StoreError::InvalidBucket { .. }
            | StoreError::InvalidPart(_)
            | StoreError::EntityTooSmall { .. } => StatusCode::BAD_REQUEST,
            StoreError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            StoreError::Config(_)
            | StoreError::Io(_)
            | StoreError::Sqlx(_)
            | StoreError::Remote(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        AppError::new(status, err.to_string())
    }
}

impl From<UploadError> for AppError {
    fn from(err: UploadError) -> Self {
        let status = match &err {
            UploadError::InvalidSource { .. }
            | UploadError::EmptyFile
            | UploadError::PartSizeTooSmall { .. }
            | UploadError::TooManyParts { .. } => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        // Include the store's reason; the variant message alone says little.
        let message = match std::error::Error::source(&err) {
            Some(source) => format!("{}: {}", err, source),
            None => err.to_string(),
        };
        AppError::new(status, message)
    }
}

impl From<GateError> for AppError {
    fn from(err: GateError) -> Self {
        let status = match &err {
            GateError::TooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            GateError::NotPremium(_) => StatusCode::FORBIDDEN,
            GateError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
        };
        AppError::new(status, err.to_string())
    }
}

impl From<DownloadError> for AppError {
    fn from(err: DownloadError) -> Self {
        match err {
            DownloadError::Store(err) => err.into(),
            other => AppError::internal(other.to_string()),
        }
    }
}

impl From<PremiumError> for AppError {
    fn from(err: PremiumError) -> Self {
        match err {
            PremiumError::InvalidDays(_) => AppError::bad_request(err.to_string()),
            other => AppError::internal(other.to_string()),
        }
    }
}

impl From<RelayError> for AppError {
    fn from(err: RelayError) -> Self {
        match err {
            RelayError::Upload(err) => err.into(),
            RelayError::Gate(err) => err.into(),
            RelayError::Store(err) => err.into(),
            RelayError::Download(err) => err.into(),
            RelayError::Premium(err) => err.into(),
        }
    }
}
