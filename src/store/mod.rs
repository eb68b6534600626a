//! Object store seam.
//!
//! `ObjectStore` is the four-operation multipart contract shared by every
//! S3-compatible store (create / upload-part / complete / abort) plus the
//! single-shot and read-side calls the relay needs. `S3Store` talks to a
//! real endpoint; `LocalStore` keeps payloads on disk and metadata in SQLite.

pub mod local;
pub mod s3;

use crate::{
    config::{Backend, StoreConfig},
    models::{multipart::CompletedPart, object::ObjectInfo},
};
use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use std::{io, path::Path, pin::Pin, sync::Arc, time::Duration};
use thiserror::Error;

pub use local::LocalStore;
pub use s3::S3Store;

/// Minimum size of every part except the last (S3 rule).
pub const MIN_PART_SIZE: u64 = 5 * 1024 * 1024;

/// Maximum number of parts in one multipart upload (S3 rule).
pub const MAX_PARTS: u64 = 10_000;

pub type ByteStream = Pin<Box<dyn Stream<Item = StoreResult<Bytes>> + Send>>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("object `{0}` not found")]
    NotFound(String),
    #[error("multipart upload `{0}` does not exist")]
    NoSuchUpload(String),
    #[error("invalid object key: {0}")]
    InvalidKey(String),
    #[error("bucket `{name}` invalid: {reason}")]
    InvalidBucket { name: String, reason: String },
    #[error("invalid part list: {0}")]
    InvalidPart(String),
    #[error("part {part_number} is {size} bytes, below the {min} byte minimum")]
    EntityTooSmall { part_number: i32, size: u64, min: u64 },
    #[error("operation timed out after {0:?}")]
    Timeout(Duration),
    #[error("configuration error: {0}")]
    Config(String),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
    #[error("remote store error: {0}")]
    Remote(#[source] Box<dyn std::error::Error + Send + Sync>),
}

pub type StoreResult<T> = Result<T, StoreError>;

#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Smallest size the store accepts for a non-final part.
    fn min_part_size(&self) -> u64 {
        MIN_PART_SIZE
    }

    /// Open a multipart session for `key`, returning the store's session id.
    async fn create_multipart_upload(
        &self,
        key: &str,
        content_type: Option<&str>,
    ) -> StoreResult<String>;

    /// Upload one part and return its completion token (ETag).
    async fn upload_part(
        &self,
        key: &str,
        upload_id: &str,
        part_number: i32,
        body: Bytes,
    ) -> StoreResult<String>;

    /// Finalize a session. `parts` must be sorted by part number.
    async fn complete_multipart_upload(
        &self,
        key: &str,
        upload_id: &str,
        parts: &[CompletedPart],
    ) -> StoreResult<()>;

    async fn abort_multipart_upload(&self, key: &str, upload_id: &str) -> StoreResult<()>;

    /// Single-request upload of a whole local file.
    async fn put_object(&self, key: &str, path: &Path, content_type: Option<&str>)
    -> StoreResult<()>;

    async fn head_object(&self, key: &str) -> StoreResult<ObjectInfo>;

    async fn exists(&self, key: &str) -> StoreResult<bool> {
        match self.head_object(key).await {
            Ok(_) => Ok(true),
            Err(StoreError::NotFound(_)) => Ok(false),
            Err(err) => Err(err),
        }
    }

    async fn get_object(&self, key: &str) -> StoreResult<(ObjectInfo, ByteStream)>;

    async fn delete_object(&self, key: &str) -> StoreResult<()>;

    /// Time-limited GET link for `key`.
    async fn presign_get(&self, key: &str, expires_in: Duration) -> StoreResult<String>;

    /// Cheap readiness probe used by `/readyz`.
    async fn check_ready(&self) -> StoreResult<()>;
}

/// Build the configured backend.
pub async fn connect(config: &StoreConfig) -> StoreResult<Arc<dyn ObjectStore>> {
    match config.backend {
        Backend::S3 => {
            let store = S3Store::new(config).await?;
            tracing::info!(bucket = %config.bucket, endpoint = ?config.endpoint, "using S3 backend");
            Ok(Arc::new(store))
        }
        Backend::Local => {
            let store =
                LocalStore::open(&config.local_dir, &config.database_url, &config.bucket).await?;
            tracing::info!(bucket = %config.bucket, dir = %config.local_dir.display(), "using local backend");
            Ok(Arc::new(store))
        }
    }
}
