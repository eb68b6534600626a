//! src/store/local.rs
//!
//! LocalStore is an S3-compatible store backed by SQLite for metadata and
//! local disk for payloads. Finished objects are sharded beneath
//! `base_path/{bucket}/{shard}/{shard}/{key}`; in-progress multipart parts are
//! staged under `base_path/.multipart/{upload_id}/` so nothing becomes
//! visible under the key until the session completes.

use crate::{
    models::{
        multipart::{CompletedPart, MultipartPart, MultipartUpload},
        object::{Object, ObjectInfo},
    },
    store::{ByteStream, MAX_PARTS, MIN_PART_SIZE, ObjectStore, StoreError, StoreResult},
};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use futures::{Stream, StreamExt, TryStreamExt, pin_mut};
use md5::Context;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::{
    collections::HashMap,
    io::{self, ErrorKind},
    path::{Path, PathBuf},
    str::FromStr,
    sync::Arc,
    time::Duration,
};
use tokio::{
    fs::{self, File},
    io::AsyncWriteExt,
};
use tokio_util::io::ReaderStream;
use tracing::{debug, instrument};
use uuid::Uuid;

const MAX_OBJECT_KEY_LEN: usize = 1024;
const BUCKET_NAME_MIN_LEN: usize = 3;
const BUCKET_NAME_MAX_LEN: usize = 63;
const STAGING_DIR: &str = ".multipart";
const SCHEMA: &str = include_str!("../../migrations/0001_init.sql");

/// LocalStore implements the multipart contract with the same rules an S3
/// endpoint enforces:
/// - unknown or finished sessions are `NoSuchUpload`
/// - completion requires a non-empty, strictly ascending part list whose
///   ETags match what was uploaded
/// - every part but the last must reach the minimum part size
#[derive(Clone)]
pub struct LocalStore {
    /// Shared SQLite connection pool used for metadata operations.
    pub db: Arc<SqlitePool>,

    /// Base directory on disk where payloads and staged parts are stored.
    pub base_path: PathBuf,

    bucket: String,
    min_part_size: u64,
}

impl LocalStore {
    /// Open (and migrate) a store rooted at `base_path` using the SQLite
    /// database at `database_url`.
    pub async fn open(
        base_path: impl Into<PathBuf>,
        database_url: &str,
        bucket: &str,
    ) -> StoreResult<Self> {
        ensure_bucket_name_safe(bucket)?;
        let base_path = base_path.into();
        fs::create_dir_all(&base_path).await?;

        let options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
        if let Some(parent) = options.get_filename().parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent).await?;
                tracing::info!("Created missing directory {:?}", parent);
            }
        }

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;
        run_migrations(&pool).await?;

        Ok(Self {
            db: Arc::new(pool),
            base_path,
            bucket: bucket.to_string(),
            min_part_size: MIN_PART_SIZE,
        })
    }

    /// Override the minimum non-final part size.
    pub fn with_min_part_size(mut self, min_part_size: u64) -> Self {
        self.min_part_size = min_part_size;
        self
    }

    /// Compute the physical base folder path for the bucket.
    fn bucket_root(&self) -> PathBuf {
        self.base_path.join(&self.bucket)
    }

    /// Generate two-level shard identifiers for an object key.
    ///
    /// Uses MD5(bucket/key) and returns the first two bytes as lowercase
    /// hexadecimal strings (00–ff). Reduces file count per directory.
    fn object_shards(bucket_name: &str, key: &str) -> (String, String) {
        let digest = md5::compute(format!("{}/{}", bucket_name, key));
        (format!("{:02x}", digest[0]), format!("{:02x}", digest[1]))
    }

    /// Combines base_path/bucket/{shard}/{shard}/{key}.
    /// Parent directories may not exist yet.
    fn object_path(&self, key: &str) -> PathBuf {
        let (shard_a, shard_b) = Self::object_shards(&self.bucket, key);
        let mut path = self.bucket_root();
        path.push(shard_a);
        path.push(shard_b);
        path.push(key);
        path
    }

    fn staging_dir(&self, upload_id: &str) -> PathBuf {
        self.base_path.join(STAGING_DIR).join(upload_id)
    }

    fn part_path(&self, upload_id: &str, part_number: i32) -> PathBuf {
        self.staging_dir(upload_id)
            .join(format!("{:05}.part", part_number))
    }

    /// Fetch a non-finished multipart session, checking it belongs to `key`.
    async fn fetch_upload(&self, key: &str, upload_id: &str) -> StoreResult<MultipartUpload> {
        let upload = sqlx::query_as::<_, MultipartUpload>(
            "SELECT id, bucket, key, upload_id, content_type, initiated_at
             FROM multipart_uploads WHERE upload_id = ? AND bucket = ?",
        )
        .bind(upload_id)
        .bind(&self.bucket)
        .fetch_one(&*self.db)
        .await
        .map_err(|err| match err {
            sqlx::Error::RowNotFound => StoreError::NoSuchUpload(upload_id.to_string()),
            other => StoreError::Sqlx(other),
        })?;

        if upload.key != key {
            return Err(StoreError::NoSuchUpload(upload_id.to_string()));
        }
        Ok(upload)
    }

    /// Fetch finished object metadata. Returns NotFound if the row is missing.
    async fn fetch_object(&self, key: &str) -> StoreResult<Object> {
        sqlx::query_as::<_, Object>(
            "SELECT id, bucket, key, filename, content_type, size_bytes, etag, last_modified
             FROM objects WHERE key = ? AND bucket = ?",
        )
        .bind(key)
        .bind(&self.bucket)
        .fetch_one(&*self.db)
        .await
        .map_err(|err| match err {
            sqlx::Error::RowNotFound => StoreError::NotFound(key.to_string()),
            other => StoreError::Sqlx(other),
        })
    }

    /// Sessions that were opened and neither completed nor aborted.
    pub async fn pending_uploads(&self) -> StoreResult<Vec<MultipartUpload>> {
        let rows = sqlx::query_as::<_, MultipartUpload>(
            "SELECT id, bucket, key, upload_id, content_type, initiated_at
             FROM multipart_uploads WHERE bucket = ? ORDER BY initiated_at ASC",
        )
        .bind(&self.bucket)
        .fetch_all(&*self.db)
        .await?;
        Ok(rows)
    }

    /// Stream an object to disk and update metadata.
    ///
    /// - Writes bytes incrementally to a temporary file.
    /// - Computes MD5/etag and size while streaming.
    /// - Atomically renames into final location.
    /// - Upserts metadata row (S3-like overwrite semantics).
    ///
    /// `part_count` marks a multipart assembly; its ETag gets the `-N` suffix.
    async fn write_object_stream<S>(
        &self,
        key: &str,
        content_type: Option<String>,
        part_count: Option<usize>,
        stream: S,
    ) -> StoreResult<Object>
    where
        S: Stream<Item = io::Result<Bytes>> + Send + 'static,
    {
        let file_path = self.object_path(key);
        let parent = file_path.parent().map(Path::to_path_buf).ok_or_else(|| {
            StoreError::Io(io::Error::new(
                ErrorKind::Other,
                "object path missing parent directory",
            ))
        })?;
        fs::create_dir_all(&parent).await?;
        let tmp_path = parent.join(format!(".tmp-{}", Uuid::new_v4()));
        let mut file = File::create(&tmp_path).await?;

        let mut size_bytes: i64 = 0;
        let mut digest = Context::new();
        pin_mut!(stream);
        while let Some(chunk_res) = stream.next().await {
            let chunk = match chunk_res {
                Ok(chunk) => chunk,
                Err(err) => {
                    let _ = fs::remove_file(&tmp_path).await;
                    return Err(StoreError::Io(err));
                }
            };
            size_bytes += chunk.len() as i64;
            digest.consume(&chunk);
            if let Err(err) = file.write_all(&chunk).await {
                let _ = fs::remove_file(&tmp_path).await;
                return Err(StoreError::Io(err));
            }
        }
        if let Err(err) = file.flush().await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(StoreError::Io(err));
        }
        if let Err(err) = file.sync_all().await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(StoreError::Io(err));
        }
        drop(file);

        if let Err(err) = fs::rename(&tmp_path, &file_path).await {
            if err.kind() == ErrorKind::AlreadyExists {
                fs::remove_file(&file_path).await?;
                fs::rename(&tmp_path, &file_path).await?;
            } else {
                let _ = fs::remove_file(&tmp_path).await;
                return Err(StoreError::Io(err));
            }
        }

        let filename = key.rsplit('/').next().unwrap_or(key).to_string();
        let etag = match part_count {
            Some(parts) => format!("{:x}-{}", digest.compute(), parts),
            None => format!("{:x}", digest.compute()),
        };

        let insert_result = sqlx::query_as::<_, Object>(
            r#"
            INSERT INTO objects (
                id, bucket, key, filename, content_type, size_bytes, etag, last_modified
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(bucket, key) DO UPDATE SET
                filename = excluded.filename,
                content_type = excluded.content_type,
                size_bytes = excluded.size_bytes,
                etag = excluded.etag,
                last_modified = excluded.last_modified
            RETURNING id, bucket, key, filename, content_type, size_bytes, etag, last_modified
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(&self.bucket)
        .bind(key)
        .bind(&filename)
        .bind(content_type)
        .bind(size_bytes)
        .bind(&etag)
        .bind(Utc::now())
        .fetch_one(&*self.db)
        .await;

        match insert_result {
            Ok(obj) => Ok(obj),
            Err(err) => {
                let _ = fs::remove_file(&file_path).await;
                Err(StoreError::Sqlx(err))
            }
        }
    }

    /// Check a completion request against the parts actually stored.
    fn validate_completion(
        &self,
        requested: &[CompletedPart],
        stored: &HashMap<i32, MultipartPart>,
    ) -> StoreResult<()> {
        if requested.is_empty() {
            return Err(StoreError::InvalidPart(
                "at least one part is required".into(),
            ));
        }
        if requested
            .windows(2)
            .any(|pair| pair[0].part_number >= pair[1].part_number)
        {
            return Err(StoreError::InvalidPart(
                "parts must be listed in strictly ascending order".into(),
            ));
        }

        let last = requested.len() - 1;
        for (idx, part) in requested.iter().enumerate() {
            let row = stored.get(&part.part_number).ok_or_else(|| {
                StoreError::InvalidPart(format!("part {} was never uploaded", part.part_number))
            })?;
            if part.etag.trim_matches('"') != row.etag {
                return Err(StoreError::InvalidPart(format!(
                    "etag mismatch for part {}",
                    part.part_number
                )));
            }
            let size = row.size_bytes.max(0) as u64;
            if idx != last && size < self.min_part_size {
                return Err(StoreError::EntityTooSmall {
                    part_number: part.part_number,
                    size,
                    min: self.min_part_size,
                });
            }
        }
        Ok(())
    }

    /// Remove a session's rows and staged parts.
    async fn discard_session(&self, upload: &MultipartUpload) -> StoreResult<()> {
        let mut tx = self.db.begin().await?;
        sqlx::query("DELETE FROM multipart_parts WHERE upload_id = ?")
            .bind(upload.id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM multipart_uploads WHERE id = ?")
            .bind(upload.id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        let dir = self.staging_dir(&upload.upload_id);
        match fs::remove_dir_all(&dir).await {
            Ok(_) => {}
            Err(err) if err.kind() == ErrorKind::NotFound => {}
            Err(err) => debug!("failed to remove staging dir {}: {}", dir.display(), err),
        }
        Ok(())
    }

    /// Recursively remove empty directories up to bucket root.
    ///
    /// Stops when:
    /// - directory not empty
    /// - directory not found
    /// - reached root
    /// - encountered unexpected I/O errors
    async fn prune_empty_dirs(&self, start: &Path, stop: &Path) {
        let mut current = start.to_path_buf();
        while current.starts_with(stop) && current != stop {
            match fs::remove_dir(&current).await {
                Ok(_) => {
                    if let Some(parent) = current.parent() {
                        current = parent.to_path_buf();
                    } else {
                        break;
                    }
                }
                Err(err) if err.kind() == ErrorKind::NotFound => break,
                Err(err) if err.kind() == ErrorKind::DirectoryNotEmpty => break,
                Err(err) => {
                    debug!("failed to prune directory {}: {}", current.display(), err);
                    break;
                }
            }
        }
    }
}

#[async_trait]
impl ObjectStore for LocalStore {
    fn min_part_size(&self) -> u64 {
        self.min_part_size
    }

    #[instrument(skip(self), fields(backend = "local"))]
    async fn create_multipart_upload(
        &self,
        key: &str,
        content_type: Option<&str>,
    ) -> StoreResult<String> {
        ensure_key_safe(key)?;
        let upload_id = Uuid::new_v4().simple().to_string();

        sqlx::query(
            "INSERT INTO multipart_uploads (id, bucket, key, upload_id, content_type, initiated_at)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(Uuid::new_v4())
        .bind(&self.bucket)
        .bind(key)
        .bind(&upload_id)
        .bind(content_type)
        .bind(Utc::now())
        .execute(&*self.db)
        .await?;

        fs::create_dir_all(self.staging_dir(&upload_id)).await?;
        debug!(%upload_id, "opened multipart session");
        Ok(upload_id)
    }

    #[instrument(skip(self, body), fields(backend = "local", size = body.len()))]
    async fn upload_part(
        &self,
        key: &str,
        upload_id: &str,
        part_number: i32,
        body: Bytes,
    ) -> StoreResult<String> {
        ensure_key_safe(key)?;
        if part_number < 1 || part_number as u64 > MAX_PARTS {
            return Err(StoreError::InvalidPart(format!(
                "part number {} outside 1..={}",
                part_number, MAX_PARTS
            )));
        }
        let upload = self.fetch_upload(key, upload_id).await?;

        let dir = self.staging_dir(upload_id);
        fs::create_dir_all(&dir).await?;
        let part_path = self.part_path(upload_id, part_number);
        let tmp_path = dir.join(format!(".tmp-{}", Uuid::new_v4()));

        let written = async {
            let mut file = File::create(&tmp_path).await?;
            file.write_all(&body).await?;
            file.sync_all().await?;
            drop(file);
            fs::rename(&tmp_path, &part_path).await
        }
        .await;
        if let Err(err) = written {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(StoreError::Io(err));
        }

        let etag = format!("{:x}", md5::compute(&body));
        sqlx::query(
            "INSERT INTO multipart_parts (id, upload_id, part_number, size_bytes, etag, uploaded_at)
             VALUES (?, ?, ?, ?, ?, ?)
             ON CONFLICT(upload_id, part_number) DO UPDATE SET
                size_bytes = excluded.size_bytes,
                etag = excluded.etag,
                uploaded_at = excluded.uploaded_at",
        )
        .bind(Uuid::new_v4())
        .bind(upload.id)
        .bind(part_number)
        .bind(body.len() as i64)
        .bind(&etag)
        .bind(Utc::now())
        .execute(&*self.db)
        .await?;

        Ok(etag)
    }

    #[instrument(skip(self, parts), fields(backend = "local", parts = parts.len()))]
    async fn complete_multipart_upload(
        &self,
        key: &str,
        upload_id: &str,
        parts: &[CompletedPart],
    ) -> StoreResult<()> {
        ensure_key_safe(key)?;
        let upload = self.fetch_upload(key, upload_id).await?;

        let stored: HashMap<i32, MultipartPart> = sqlx::query_as::<_, MultipartPart>(
            "SELECT id, upload_id, part_number, size_bytes, etag, uploaded_at
             FROM multipart_parts WHERE upload_id = ? ORDER BY part_number ASC",
        )
        .bind(upload.id)
        .fetch_all(&*self.db)
        .await?
        .into_iter()
        .map(|row| (row.part_number, row))
        .collect();

        self.validate_completion(parts, &stored)?;

        let part_paths: Vec<PathBuf> = parts
            .iter()
            .map(|part| self.part_path(upload_id, part.part_number))
            .collect();
        let stream = futures::stream::iter(part_paths)
            .then(File::open)
            .map_ok(ReaderStream::new)
            .try_flatten();

        let object = self
            .write_object_stream(key, upload.content_type.clone(), Some(parts.len()), stream)
            .await?;
        self.discard_session(&upload).await?;

        debug!(size = object.size_bytes, etag = ?object.etag, "completed multipart session");
        Ok(())
    }

    #[instrument(skip(self), fields(backend = "local"))]
    async fn abort_multipart_upload(&self, key: &str, upload_id: &str) -> StoreResult<()> {
        ensure_key_safe(key)?;
        let upload = self.fetch_upload(key, upload_id).await?;
        self.discard_session(&upload).await
    }

    #[instrument(skip(self), fields(backend = "local"))]
    async fn put_object(
        &self,
        key: &str,
        path: &Path,
        content_type: Option<&str>,
    ) -> StoreResult<()> {
        ensure_key_safe(key)?;
        let file = File::open(path).await?;
        self.write_object_stream(
            key,
            content_type.map(str::to_string),
            None,
            ReaderStream::new(file),
        )
        .await?;
        Ok(())
    }

    async fn head_object(&self, key: &str) -> StoreResult<ObjectInfo> {
        ensure_key_safe(key)?;
        Ok(self.fetch_object(key).await?.into())
    }

    /// Returns metadata and a stream over the payload. A row whose payload is
    /// missing on disk counts as NotFound.
    async fn get_object(&self, key: &str) -> StoreResult<(ObjectInfo, ByteStream)> {
        ensure_key_safe(key)?;
        let object = self.fetch_object(key).await?;

        let file = File::open(self.object_path(key)).await.map_err(|err| {
            if err.kind() == ErrorKind::NotFound {
                StoreError::NotFound(key.to_string())
            } else {
                StoreError::Io(err)
            }
        })?;
        let stream = ReaderStream::new(file).map(|chunk| chunk.map_err(StoreError::Io));

        Ok((object.into(), Box::pin(stream)))
    }

    /// Delete the metadata row, then the payload, then prune empty shard dirs.
    #[instrument(skip(self), fields(backend = "local"))]
    async fn delete_object(&self, key: &str) -> StoreResult<()> {
        ensure_key_safe(key)?;
        self.fetch_object(key).await?;

        sqlx::query("DELETE FROM objects WHERE key = ? AND bucket = ?")
            .bind(key)
            .bind(&self.bucket)
            .execute(&*self.db)
            .await?;

        let file_path = self.object_path(key);
        match fs::remove_file(&file_path).await {
            Ok(_) => debug!("removed physical file {}", file_path.display()),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!("file {} already missing", file_path.display());
            }
            Err(err) => return Err(StoreError::Io(err)),
        }

        if let Some(parent) = file_path.parent() {
            let bucket_root = self.bucket_root();
            self.prune_empty_dirs(parent, &bucket_root).await;
        }

        Ok(())
    }

    /// Local payloads have no signing authority: the link is a `file://` URL
    /// and `expires_in` is not enforced.
    async fn presign_get(&self, key: &str, _expires_in: Duration) -> StoreResult<String> {
        ensure_key_safe(key)?;
        self.fetch_object(key).await?;
        let absolute = fs::canonicalize(self.object_path(key)).await?;
        Ok(format!("file://{}", absolute.display()))
    }

    /// 1. Runs a lightweight query against SQLite (`SELECT 1`).
    /// 2. Performs a write/read/delete round trip under `base_path`.
    async fn check_ready(&self) -> StoreResult<()> {
        let value = sqlx::query_scalar::<_, i64>("SELECT 1")
            .fetch_one(&*self.db)
            .await?;
        if value != 1 {
            return Err(StoreError::Config(format!(
                "unexpected SELECT 1 result: {}",
                value
            )));
        }

        let tmp_path = self.base_path.join(format!(".readyz-{}", Uuid::new_v4()));
        fs::write(&tmp_path, b"readyz").await?;
        let read_back = fs::read(&tmp_path).await;
        let _ = fs::remove_file(&tmp_path).await;
        if read_back? != b"readyz" {
            return Err(StoreError::Io(io::Error::new(
                ErrorKind::InvalidData,
                "file content mismatch",
            )));
        }
        Ok(())
    }
}

/// Apply the embedded schema statement by statement.
pub async fn run_migrations(db: &SqlitePool) -> StoreResult<()> {
    let statements = SCHEMA
        .split(';')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>();

    debug!("Running {} migration statements...", statements.len());

    for stmt in statements {
        sqlx::query(stmt).execute(db).await?;
    }

    Ok(())
}

/// Basic key validation to avoid trivial path traversal vectors.
///
/// Rejects empty or oversized keys, keys that begin with `/` or contain
/// `..`, keys with empty or `.` segments (`a//b`, `dir/`, `a/./b`), and keys
/// with control characters or backslashes.
pub fn ensure_key_safe(key: &str) -> StoreResult<()> {
    if key.is_empty() {
        return Err(StoreError::InvalidKey("key is empty".into()));
    }
    if key.len() > MAX_OBJECT_KEY_LEN {
        return Err(StoreError::InvalidKey(format!(
            "key exceeds {} bytes",
            MAX_OBJECT_KEY_LEN
        )));
    }
    if key.starts_with('/') || key.contains("..") {
        return Err(StoreError::InvalidKey(format!("`{}` escapes the bucket", key)));
    }
    if key.split('/').any(|segment| segment.is_empty() || segment == ".") {
        return Err(StoreError::InvalidKey(format!(
            "`{}` has an empty or `.` path segment",
            key
        )));
    }
    if key.bytes().any(|b| b.is_ascii_control() || b == b'\\') {
        return Err(StoreError::InvalidKey(
            "control characters and backslashes are not allowed".into(),
        ));
    }
    Ok(())
}

/// Validate bucket name format.
///
/// Enforces S3-like naming rules:
/// - 3–63 characters
/// - lowercase letters, digits, dots, hyphens only
/// - cannot start/end with dot or hyphen
/// - cannot contain consecutive dots or dot-hyphen patterns
/// - cannot look like an IPv4 address
pub fn ensure_bucket_name_safe(name: &str) -> StoreResult<()> {
    let invalid = |reason: &str| StoreError::InvalidBucket {
        name: name.to_string(),
        reason: reason.to_string(),
    };

    let len = name.len();
    if !(BUCKET_NAME_MIN_LEN..=BUCKET_NAME_MAX_LEN).contains(&len) {
        return Err(invalid("must be between 3 and 63 characters"));
    }
    if !name
        .chars()
        .all(|c| matches!(c, 'a'..='z' | '0'..='9' | '.' | '-'))
    {
        return Err(invalid(
            "allowed characters are lowercase letters, digits, dots, and hyphens",
        ));
    }
    if name.starts_with('.') || name.ends_with('.') || name.starts_with('-') || name.ends_with('-')
    {
        return Err(invalid("must start and end with a lowercase letter or digit"));
    }
    if name.contains("..") || name.contains("-.") || name.contains(".-") {
        return Err(invalid(
            "cannot contain consecutive dots or dot-hyphen combinations",
        ));
    }
    if is_ipv4_like(name) {
        return Err(invalid("must not be formatted like an IP address"));
    }
    Ok(())
}

/// Check if a string matches IPv4-like dotted decimal form.
fn is_ipv4_like(name: &str) -> bool {
    let parts: Vec<&str> = name.split('.').collect();
    parts.len() == 4
        && parts.iter().all(|segment| {
            !segment.is_empty()
                && segment.len() <= 3
                && segment.chars().all(|c| c.is_ascii_digit())
                && segment.parse::<u8>().is_ok()
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_unsafe_keys() {
        assert!(ensure_key_safe("videos/2025/clip.mp4").is_ok());
        assert!(ensure_key_safe("").is_err());
        assert!(ensure_key_safe("/etc/passwd").is_err());
        assert!(ensure_key_safe("a/../b").is_err());
        assert!(ensure_key_safe("a\\b").is_err());
        assert!(ensure_key_safe("line\nbreak").is_err());
        assert!(ensure_key_safe("dir/").is_err());
        assert!(ensure_key_safe("a/./b").is_err());
        assert!(ensure_key_safe("a//b").is_err());
        assert!(ensure_key_safe(".").is_err());
        assert!(ensure_key_safe("notes.v2/.hidden").is_ok());
        assert!(ensure_key_safe(&"k".repeat(MAX_OBJECT_KEY_LEN + 1)).is_err());
    }

    #[test]
    fn bucket_names_follow_dns_rules() {
        assert!(ensure_bucket_name_safe("media-files").is_ok());
        assert!(ensure_bucket_name_safe("my.bucket.01").is_ok());
        assert!(ensure_bucket_name_safe("ab").is_err());
        assert!(ensure_bucket_name_safe("Uploads").is_err());
        assert!(ensure_bucket_name_safe("-uploads").is_err());
        assert!(ensure_bucket_name_safe("a..b").is_err());
        assert!(ensure_bucket_name_safe("a.-b").is_err());
        assert!(ensure_bucket_name_safe("192.168.1.10").is_err());
        assert!(ensure_bucket_name_safe("999.1.1.1").is_ok());
    }

    #[test]
    fn shards_are_stable_hex_pairs() {
        let (a, b) = LocalStore::object_shards("uploads", "x/y.bin");
        assert_eq!(a.len(), 2);
        assert_eq!(b.len(), 2);
        assert_eq!(
            (a, b),
            LocalStore::object_shards("uploads", "x/y.bin"),
            "same bucket/key must map to the same shard"
        );
    }
}
