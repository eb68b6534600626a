//! Chunked uploader.
//!
//! Small files go up in one request. Larger files are split into parts that
//! are uploaded through a multipart session, up to `concurrency` at a time,
//! then finalized with the part list in ascending order. Any failure aborts
//! the session exactly once so no half-written object appears under the key.

use crate::{
    config::UploadSettings,
    models::{
        media::content_type_for,
        multipart::{CompletedPart, PartRange, SessionError, UploadSession},
    },
    services::progress::{ProgressObserver, ProgressState, notify},
    store::{MAX_PARTS, ObjectStore, StoreError},
};
use bytes::Bytes;
use futures::{StreamExt, stream};
use serde::Serialize;
use std::{
    io::SeekFrom,
    path::{Path, PathBuf},
    sync::Arc,
    time::{Duration, Instant},
};
use thiserror::Error;
use tokio::{
    fs::{self, File},
    io::{AsyncReadExt, AsyncSeekExt},
};
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("`{path}` is not a readable regular file: {reason}")]
    InvalidSource { path: PathBuf, reason: String },
    #[error("cannot split an empty file into parts")]
    EmptyFile,
    #[error("part size {part_size} is below the store minimum of {min} bytes")]
    PartSizeTooSmall { part_size: u64, min: u64 },
    #[error("{parts} parts needed, more than the {max} part limit")]
    TooManyParts { parts: u64, max: u64 },
    #[error("failed to open multipart session")]
    SessionOpenFailed(#[source] StoreError),
    #[error("part {part_number} failed")]
    PartUploadFailed {
        part_number: i32,
        #[source]
        source: StoreError,
    },
    #[error("failed to finalize multipart session")]
    FinalizeFailed(#[source] StoreError),
    #[error("single-request upload failed")]
    SingleUploadFailed(#[source] StoreError),
    #[error(transparent)]
    Session(#[from] SessionError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum UploadMode {
    Single,
    Multipart,
}

/// Outcome of a successful upload.
#[derive(Debug, Clone, Serialize)]
pub struct UploadReport {
    pub key: String,
    pub size: u64,
    pub parts: usize,
    pub mode: UploadMode,
    pub elapsed: Duration,
}

/// Split `[0, file_size)` into contiguous parts of `part_size` bytes; the
/// last part takes the remainder.
pub fn plan_parts(file_size: u64, part_size: u64) -> Result<Vec<PartRange>, UploadError> {
    if part_size == 0 {
        return Err(UploadError::PartSizeTooSmall { part_size, min: 1 });
    }
    if file_size == 0 {
        return Err(UploadError::EmptyFile);
    }
    let count = file_size.div_ceil(part_size);
    if count > MAX_PARTS {
        return Err(UploadError::TooManyParts {
            parts: count,
            max: MAX_PARTS,
        });
    }

    Ok((0..count)
        .map(|idx| {
            let offset = idx * part_size;
            PartRange {
                part_number: (idx + 1) as i32,
                offset,
                len: part_size.min(file_size - offset),
            }
        })
        .collect())
}

/// Reads one part from its own handle so parts can be read concurrently.
async fn read_part(path: &Path, range: PartRange) -> std::io::Result<Bytes> {
    let mut file = File::open(path).await?;
    file.seek(SeekFrom::Start(range.offset)).await?;
    let mut buf = vec![0u8; range.len as usize];
    file.read_exact(&mut buf).await?;
    Ok(Bytes::from(buf))
}

#[derive(Clone)]
pub struct ChunkedUploader {
    store: Arc<dyn ObjectStore>,
    settings: UploadSettings,
}

impl ChunkedUploader {
    pub fn new(store: Arc<dyn ObjectStore>, settings: UploadSettings) -> Self {
        Self { store, settings }
    }

    pub fn settings(&self) -> &UploadSettings {
        &self.settings
    }

    /// Upload with the configured default part size.
    pub async fn upload(
        &self,
        path: &Path,
        key: &str,
        observer: Option<&dyn ProgressObserver>,
    ) -> Result<UploadReport, UploadError> {
        self.upload_with_part_size(path, key, self.settings.part_size, observer)
            .await
    }

    /// Upload `path` to `key`. The local file is only read.
    pub async fn upload_with_part_size(
        &self,
        path: &Path,
        key: &str,
        part_size: u64,
        observer: Option<&dyn ProgressObserver>,
    ) -> Result<UploadReport, UploadError> {
        let min = self.store.min_part_size();
        if part_size == 0 || part_size < min {
            return Err(UploadError::PartSizeTooSmall { part_size, min });
        }

        let meta = fs::metadata(path)
            .await
            .map_err(|err| UploadError::InvalidSource {
                path: path.to_path_buf(),
                reason: err.to_string(),
            })?;
        if !meta.is_file() {
            return Err(UploadError::InvalidSource {
                path: path.to_path_buf(),
                reason: "not a regular file".into(),
            });
        }

        let size = meta.len();
        let content_type = content_type_for(key);
        let started = Instant::now();

        if size <= self.settings.multipart_threshold {
            info!(key, size, "uploading in a single request");
            self.store
                .put_object(key, path, Some(content_type))
                .await
                .map_err(UploadError::SingleUploadFailed)?;
            notify(observer, size, size);
            return Ok(UploadReport {
                key: key.to_string(),
                size,
                parts: 1,
                mode: UploadMode::Single,
                elapsed: started.elapsed(),
            });
        }

        let plan = plan_parts(size, part_size)?;
        let part_count = plan.len();
        info!(key, size, parts = part_count, part_size, "starting multipart upload");

        let upload_id = self
            .store
            .create_multipart_upload(key, Some(content_type))
            .await
            .map_err(UploadError::SessionOpenFailed)?;
        let mut session = UploadSession::new(key);
        session.open(upload_id.clone())?;

        if let Err(err) = self
            .send_parts(path, &upload_id, plan, size, &mut session, observer)
            .await
        {
            self.abort_session(&mut session).await;
            return Err(err);
        }

        let completed = match session.begin_finalize(part_count) {
            Ok(parts) => parts,
            Err(err) => {
                self.abort_session(&mut session).await;
                return Err(err.into());
            }
        };
        if let Err(err) = self
            .store
            .complete_multipart_upload(key, &upload_id, &completed)
            .await
        {
            self.abort_session(&mut session).await;
            return Err(UploadError::FinalizeFailed(err));
        }
        session.finish()?;

        let elapsed = started.elapsed();
        info!(key, size, parts = part_count, ?elapsed, "multipart upload complete");
        Ok(UploadReport {
            key: key.to_string(),
            size,
            parts: part_count,
            mode: UploadMode::Multipart,
            elapsed,
        })
    }

    /// Upload every planned part. Returns on the first failure; dropping the
    /// stream cancels whatever is still in flight.
    async fn send_parts(
        &self,
        path: &Path,
        upload_id: &str,
        plan: Vec<PartRange>,
        total: u64,
        session: &mut UploadSession,
        observer: Option<&dyn ProgressObserver>,
    ) -> Result<(), UploadError> {
        session.begin_parts()?;
        let key = session.object_key().to_string();
        let mut progress = ProgressState::new();

        let mut in_flight = stream::iter(plan)
            .map(|range| self.send_part(path, &key, upload_id, range))
            .buffer_unordered(self.settings.concurrency.max(1));

        while let Some(result) = in_flight.next().await {
            let (range, etag) = result?;
            session.record_part(CompletedPart::new(range.part_number, etag))?;
            let transferred = progress.advance(range.len);
            debug!(part = range.part_number, transferred, total, "part uploaded");
            notify(observer, transferred, total);
        }
        Ok(())
    }

    async fn send_part(
        &self,
        path: &Path,
        key: &str,
        upload_id: &str,
        range: PartRange,
    ) -> Result<(PartRange, String), UploadError> {
        let work = async {
            let body = read_part(path, range).await.map_err(StoreError::Io)?;
            self.store
                .upload_part(key, upload_id, range.part_number, body)
                .await
        };
        let result = match self.settings.part_timeout {
            Some(limit) => tokio::time::timeout(limit, work)
                .await
                .unwrap_or(Err(StoreError::Timeout(limit))),
            None => work.await,
        };

        result
            .map(|etag| (range, etag))
            .map_err(|source| UploadError::PartUploadFailed {
                part_number: range.part_number,
                source,
            })
    }

    /// Abort once. A failed abort is logged and left to the store's
    /// lifecycle rules.
    async fn abort_session(&self, session: &mut UploadSession) {
        if session.begin_abort().is_err() {
            return;
        }
        let key = session.object_key().to_string();
        let upload_id = session.session_id().to_string();
        match self.store.abort_multipart_upload(&key, &upload_id).await {
            Ok(()) => info!(key, upload_id, "multipart session aborted"),
            Err(err) => {
                warn!(key, upload_id, error = %err, "failed to abort multipart session")
            }
        }
        if let Err(err) = session.mark_aborted() {
            warn!(key, upload_id, error = %err, "session left in an unexpected state");
        }
    }
}
