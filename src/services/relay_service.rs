//! RelayService ties the store, uploader, gate and counters together. It is
//! the single piece of state the HTTP layer and the CLI work through.

use crate::{
    models::{media::MediaFile, object::ObjectInfo},
    services::{
        downloader::{self, DownloadError},
        gate::{GateError, UploadGate},
        premium::{PremiumError, PremiumStore},
        progress::{ProgressReporter, ProgressSnapshot},
        stats::{StatusReport, UploadStats},
        uploader::{ChunkedUploader, UploadError, UploadReport},
    },
    store::{ObjectStore, StoreError},
};
use std::{
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};
use thiserror::Error;
use tokio::{fs, sync::watch};
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum RelayError {
    #[error(transparent)]
    Upload(#[from] UploadError),
    #[error(transparent)]
    Gate(#[from] GateError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Download(#[from] DownloadError),
    #[error(transparent)]
    Premium(#[from] PremiumError),
}

/// Signed link handed back to callers.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ObjectLink {
    pub key: String,
    pub url: String,
    pub expires_in_secs: u64,
}

#[derive(Clone)]
pub struct RelayService {
    store: Arc<dyn ObjectStore>,
    uploader: ChunkedUploader,
    gate: UploadGate,
    stats: Arc<UploadStats>,
    progress: watch::Sender<Option<ProgressSnapshot>>,
    link_expiry: Duration,
}

impl RelayService {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        uploader: ChunkedUploader,
        gate: UploadGate,
        stats: Arc<UploadStats>,
        link_expiry: Duration,
    ) -> Self {
        let (progress, _) = watch::channel(None);
        Self {
            store,
            uploader,
            gate,
            stats,
            progress,
            link_expiry,
        }
    }

    pub fn store(&self) -> &Arc<dyn ObjectStore> {
        &self.store
    }

    pub fn premium(&self) -> &Arc<PremiumStore> {
        self.gate.premium()
    }

    /// Latest progress snapshot of any transfer run through this service.
    pub fn subscribe_progress(&self) -> watch::Receiver<Option<ProgressSnapshot>> {
        self.progress.subscribe()
    }

    fn reporter(&self, label: &str) -> ProgressReporter {
        ProgressReporter::with_sender(
            label,
            self.uploader.settings().progress_interval,
            self.progress.clone(),
        )
    }

    /// Upload a file named by a remote caller. `path` must resolve, symlinks
    /// included, inside the spool directory; relative paths are taken from
    /// it. The gate always runs.
    pub async fn upload_spooled(
        &self,
        path: &Path,
        key: Option<&str>,
        user_id: i64,
    ) -> Result<UploadReport, RelayError> {
        let path = self.confine_to_spool(path).await?;
        self.upload(&path, key, Some(user_id)).await
    }

    async fn confine_to_spool(&self, path: &Path) -> Result<PathBuf, UploadError> {
        let invalid = |reason: String| UploadError::InvalidSource {
            path: path.to_path_buf(),
            reason,
        };
        let root = fs::canonicalize(self.gate.spool_dir())
            .await
            .map_err(|err| invalid(format!("spool directory unavailable: {}", err)))?;
        let candidate = if path.is_relative() {
            root.join(path)
        } else {
            path.to_path_buf()
        };
        let resolved = fs::canonicalize(&candidate)
            .await
            .map_err(|err| invalid(err.to_string()))?;
        if !resolved.starts_with(&root) {
            warn!(path = %path.display(), "refused upload from outside the spool directory");
            return Err(invalid("outside the spool directory".into()));
        }
        Ok(resolved)
    }

    /// Upload a local file. `key` defaults to the file name; when `user` is
    /// given the upload must first pass the gate. Trusted callers only: the
    /// path is not confined.
    pub async fn upload(
        &self,
        path: &Path,
        key: Option<&str>,
        user: Option<i64>,
    ) -> Result<UploadReport, RelayError> {
        let meta = fs::metadata(path)
            .await
            .map_err(|err| UploadError::InvalidSource {
                path: path.to_path_buf(),
                reason: err.to_string(),
            })?;
        let media = MediaFile::new(path, key, meta.len());
        let key = media.name.clone();

        if let Some(user_id) = user {
            self.gate.admit(user_id, media.size).await?;
        }

        info!(key = %key, kind = ?media.kind, size = media.size, "relaying file");
        let reporter = self.reporter(&key);
        match self.uploader.upload(media.path(), &key, Some(&reporter)).await {
            Ok(report) => {
                self.stats.record_success(report.size);
                Ok(report)
            }
            Err(err) => {
                self.stats.record_failure();
                warn!(key = %key, error = %err, "upload failed");
                Err(err.into())
            }
        }
    }

    pub async fn download(&self, key: &str, dest: &Path) -> Result<u64, RelayError> {
        let reporter = self.reporter(key);
        Ok(downloader::download(self.store.as_ref(), key, dest, Some(&reporter)).await?)
    }

    /// Presigned GET link. Missing keys are reported rather than signed.
    pub async fn link(
        &self,
        key: &str,
        expires_in: Option<Duration>,
    ) -> Result<ObjectLink, RelayError> {
        let expires_in = expires_in.unwrap_or(self.link_expiry);
        if !self.store.exists(key).await? {
            return Err(StoreError::NotFound(key.to_string()).into());
        }
        let url = self.store.presign_get(key, expires_in).await?;
        Ok(ObjectLink {
            key: key.to_string(),
            url,
            expires_in_secs: expires_in.as_secs(),
        })
    }

    pub async fn describe(&self, key: &str) -> Result<ObjectInfo, RelayError> {
        Ok(self.store.head_object(key).await?)
    }

    pub async fn delete(&self, key: &str) -> Result<(), RelayError> {
        self.store.delete_object(key).await?;
        info!(key, "object deleted");
        Ok(())
    }

    pub fn status(&self) -> StatusReport {
        self.stats.report()
    }

    pub async fn check_ready(&self) -> Result<(), RelayError> {
        Ok(self.store.check_ready().await?)
    }
}
