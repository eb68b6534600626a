//! S3-compatible store on the AWS SDK. Works against AWS, Wasabi, MinIO and
//! anything else speaking the S3 multipart protocol.

use crate::{
    config::StoreConfig,
    models::{multipart::CompletedPart, object::ObjectInfo},
    store::{ByteStream, ObjectStore, StoreError, StoreResult},
};
use async_trait::async_trait;
use aws_config::{BehaviorVersion, Region};
use aws_sdk_s3::{
    Client,
    error::SdkError,
    presigning::PresigningConfig,
    types::{CompletedMultipartUpload, CompletedPart as S3CompletedPart},
};
use base64::{Engine, engine::general_purpose::STANDARD};
use bytes::Bytes;
use chrono::DateTime;
use futures::StreamExt;
use std::{path::Path, time::Duration};
use tokio_util::io::ReaderStream;
use tracing::instrument;

pub struct S3Store {
    client: Client,
    bucket: String,
    endpoint: Option<String>,
}

impl std::fmt::Debug for S3Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("S3Store")
            .field("bucket", &self.bucket)
            .field("endpoint", &self.endpoint)
            .finish_non_exhaustive()
    }
}

impl S3Store {
    /// Build a client from the store config. Explicit credentials win over
    /// the ambient AWS chain; bare `host:port` endpoints get an `http://`
    /// scheme.
    pub async fn new(config: &StoreConfig) -> StoreResult<Self> {
        if config.access_key_id.is_some() ^ config.secret_access_key.is_some() {
            return Err(StoreError::Config(
                "s3 config requires both access key id and secret access key when either is set"
                    .to_string(),
            ));
        }

        let shared = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(config.region.clone()))
            .load()
            .await;
        let mut builder = aws_sdk_s3::config::Builder::from(&shared);

        if let (Some(key_id), Some(secret)) = (&config.access_key_id, &config.secret_access_key) {
            let credentials = aws_sdk_s3::config::Credentials::new(
                key_id.clone(),
                secret.clone(),
                None,
                None,
                "bucket-relay-config",
            );
            builder = builder.credentials_provider(credentials);
        }

        let endpoint = config.endpoint.as_ref().map(|url| normalize_endpoint(url));
        if let Some(url) = &endpoint {
            builder = builder.endpoint_url(url);
        }
        if config.force_path_style {
            builder = builder.force_path_style(true);
        }

        Ok(Self {
            client: Client::from_conf(builder.build()),
            bucket: config.bucket.clone(),
            endpoint,
        })
    }
}

fn normalize_endpoint(url: &str) -> String {
    let lower = url.to_ascii_lowercase();
    if lower.starts_with("http://") || lower.starts_with("https://") {
        url.to_string()
    } else {
        format!("http://{}", url)
    }
}

/// 404 from the service means the key is absent; everything else is remote.
fn map_sdk_error<E>(err: SdkError<E>, key: &str) -> StoreError
where
    E: std::error::Error + Send + Sync + 'static,
{
    if let SdkError::ServiceError(ref service_err) = err
        && service_err.raw().status().as_u16() == 404
    {
        return StoreError::NotFound(key.to_string());
    }
    StoreError::Remote(Box::new(err))
}

/// Same as `map_sdk_error`, but a 404 names the session rather than the key.
fn map_session_error<E>(err: SdkError<E>, upload_id: &str) -> StoreError
where
    E: std::error::Error + Send + Sync + 'static,
{
    match map_sdk_error(err, upload_id) {
        StoreError::NotFound(id) => StoreError::NoSuchUpload(id),
        other => other,
    }
}

fn remote<E>(err: E) -> StoreError
where
    E: std::error::Error + Send + Sync + 'static,
{
    StoreError::Remote(Box::new(err))
}

#[async_trait]
impl ObjectStore for S3Store {
    #[instrument(skip(self), fields(backend = "s3"))]
    async fn create_multipart_upload(
        &self,
        key: &str,
        content_type: Option<&str>,
    ) -> StoreResult<String> {
        let output = self
            .client
            .create_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .set_content_type(content_type.map(str::to_string))
            .send()
            .await
            .map_err(remote)?;

        output
            .upload_id()
            .map(str::to_string)
            .ok_or_else(|| StoreError::Config("S3 did not return upload_id".to_string()))
    }

    #[instrument(skip(self, body), fields(backend = "s3", size = body.len()))]
    async fn upload_part(
        &self,
        key: &str,
        upload_id: &str,
        part_number: i32,
        body: Bytes,
    ) -> StoreResult<String> {
        let content_md5 = STANDARD.encode(md5::compute(&body).0);
        let output = self
            .client
            .upload_part()
            .bucket(&self.bucket)
            .key(key)
            .upload_id(upload_id)
            .part_number(part_number)
            .content_md5(content_md5)
            .body(body.into())
            .send()
            .await
            .map_err(|err| map_session_error(err, upload_id))?;

        output.e_tag().map(str::to_string).ok_or_else(|| {
            StoreError::Config(format!("S3 returned no ETag for part {}", part_number))
        })
    }

    #[instrument(skip(self, parts), fields(backend = "s3", parts = parts.len()))]
    async fn complete_multipart_upload(
        &self,
        key: &str,
        upload_id: &str,
        parts: &[CompletedPart],
    ) -> StoreResult<()> {
        let parts = parts
            .iter()
            .map(|part| {
                S3CompletedPart::builder()
                    .e_tag(&part.etag)
                    .part_number(part.part_number)
                    .build()
            })
            .collect::<Vec<_>>();
        let completed = CompletedMultipartUpload::builder()
            .set_parts(Some(parts))
            .build();

        self.client
            .complete_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .upload_id(upload_id)
            .multipart_upload(completed)
            .send()
            .await
            .map_err(|err| map_session_error(err, upload_id))?;
        Ok(())
    }

    #[instrument(skip(self), fields(backend = "s3"))]
    async fn abort_multipart_upload(&self, key: &str, upload_id: &str) -> StoreResult<()> {
        self.client
            .abort_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .upload_id(upload_id)
            .send()
            .await
            .map_err(|err| map_session_error(err, upload_id))?;
        Ok(())
    }

    #[instrument(skip(self), fields(backend = "s3"))]
    async fn put_object(
        &self,
        key: &str,
        path: &Path,
        content_type: Option<&str>,
    ) -> StoreResult<()> {
        let body = aws_sdk_s3::primitives::ByteStream::from_path(path)
            .await
            .map_err(remote)?;
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .set_content_type(content_type.map(str::to_string))
            .body(body)
            .send()
            .await
            .map_err(remote)?;
        Ok(())
    }

    #[instrument(skip(self), fields(backend = "s3"))]
    async fn head_object(&self, key: &str) -> StoreResult<ObjectInfo> {
        let output = self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|err| map_sdk_error(err, key))?;

        Ok(ObjectInfo {
            key: key.to_string(),
            size: output.content_length().unwrap_or(0).max(0) as u64,
            etag: output.e_tag().map(|tag| tag.trim_matches('"').to_string()),
            content_type: output.content_type().map(str::to_string),
            last_modified: output
                .last_modified()
                .and_then(|dt| DateTime::from_timestamp(dt.secs(), dt.subsec_nanos())),
        })
    }

    #[instrument(skip(self), fields(backend = "s3"))]
    async fn get_object(&self, key: &str) -> StoreResult<(ObjectInfo, ByteStream)> {
        let output = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|err| map_sdk_error(err, key))?;

        let info = ObjectInfo {
            key: key.to_string(),
            size: output.content_length().unwrap_or(0).max(0) as u64,
            etag: output.e_tag().map(|tag| tag.trim_matches('"').to_string()),
            content_type: output.content_type().map(str::to_string),
            last_modified: output
                .last_modified()
                .and_then(|dt| DateTime::from_timestamp(dt.secs(), dt.subsec_nanos())),
        };
        let stream = ReaderStream::new(output.body.into_async_read())
            .map(|chunk| chunk.map_err(StoreError::Io));

        Ok((info, Box::pin(stream)))
    }

    /// S3 deletes are silent on missing keys, so check first to report NotFound.
    #[instrument(skip(self), fields(backend = "s3"))]
    async fn delete_object(&self, key: &str) -> StoreResult<()> {
        if !self.exists(key).await? {
            return Err(StoreError::NotFound(key.to_string()));
        }
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(remote)?;
        Ok(())
    }

    #[instrument(skip(self), fields(backend = "s3"))]
    async fn presign_get(&self, key: &str, expires_in: Duration) -> StoreResult<String> {
        let presigning = PresigningConfig::expires_in(expires_in)
            .map_err(|err| StoreError::Config(err.to_string()))?;
        let request = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .presigned(presigning)
            .await
            .map_err(|err| map_sdk_error(err, key))?;
        Ok(request.uri().to_string())
    }

    async fn check_ready(&self) -> StoreResult<()> {
        const READY_TIMEOUT: Duration = Duration::from_secs(10);

        let probe = self.client.head_bucket().bucket(&self.bucket).send();
        tokio::time::timeout(READY_TIMEOUT, probe)
            .await
            .map_err(|_| StoreError::Timeout(READY_TIMEOUT))?
            .map_err(remote)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Backend;
    use std::path::PathBuf;

    fn config(access: Option<&str>, secret: Option<&str>) -> StoreConfig {
        StoreConfig {
            backend: Backend::S3,
            bucket: "uploads".into(),
            endpoint: Some("minio:9000".into()),
            region: "us-east-1".into(),
            access_key_id: access.map(str::to_string),
            secret_access_key: secret.map(str::to_string),
            force_path_style: true,
            local_dir: PathBuf::from("."),
            database_url: "sqlite::memory:".into(),
        }
    }

    #[test]
    fn bare_endpoints_get_a_scheme() {
        assert_eq!(normalize_endpoint("minio:9000"), "http://minio:9000");
        assert_eq!(
            normalize_endpoint("https://s3.wasabisys.com"),
            "https://s3.wasabisys.com"
        );
        assert_eq!(normalize_endpoint("HTTP://Local:9000"), "HTTP://Local:9000");
    }

    #[tokio::test]
    async fn half_configured_credentials_are_rejected() {
        let err = S3Store::new(&config(Some("AKIA"), None)).await.unwrap_err();
        assert!(matches!(err, StoreError::Config(_)));
    }
}
