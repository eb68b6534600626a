use crate::{
    services::progress::{ProgressObserver, notify},
    store::{ObjectStore, StoreError},
};
use futures::StreamExt;
use std::{
    io,
    path::{Path, PathBuf},
};
use thiserror::Error;
use tokio::{
    fs::{self, File},
    io::AsyncWriteExt,
};
use tracing::info;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum DownloadError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("writing {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Stream `key` into `dest`. Bytes land in a temp file beside `dest` that is
/// renamed into place only after the whole body has been written and synced.
/// Returns the number of bytes written.
pub async fn download(
    store: &dyn ObjectStore,
    key: &str,
    dest: &Path,
    observer: Option<&dyn ProgressObserver>,
) -> Result<u64, DownloadError> {
    let (info, mut body) = store.get_object(key).await?;

    let parent = match dest.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    let write_err = |source: io::Error| DownloadError::Write {
        path: dest.to_path_buf(),
        source,
    };
    fs::create_dir_all(&parent).await.map_err(write_err)?;
    let tmp_path = parent.join(format!(".download-{}", Uuid::new_v4()));

    let result = async {
        let mut file = File::create(&tmp_path).await.map_err(write_err)?;
        let mut written = 0u64;
        while let Some(chunk) = body.next().await {
            let chunk = chunk?;
            file.write_all(&chunk).await.map_err(write_err)?;
            written += chunk.len() as u64;
            notify(observer, written, info.size.max(written));
        }
        file.flush().await.map_err(write_err)?;
        file.sync_all().await.map_err(write_err)?;
        drop(file);
        fs::rename(&tmp_path, dest).await.map_err(write_err)?;
        Ok::<u64, DownloadError>(written)
    }
    .await;

    match result {
        Ok(written) => {
            info!(key, bytes = written, dest = %dest.display(), "download complete");
            Ok(written)
        }
        Err(err) => {
            let _ = fs::remove_file(&tmp_path).await;
            Err(err)
        }
    }
}
