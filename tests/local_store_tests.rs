mod common;

use bucket_relay::{
    config::UploadSettings,
    models::multipart::CompletedPart,
    services::uploader::ChunkedUploader,
    store::{LocalStore, ObjectStore, StoreError},
};
use bytes::Bytes;
use common::{KIB, payload, write_file};
use futures::TryStreamExt;
use std::{path::Path, sync::Arc, time::Duration};
use tempfile::{TempDir, tempdir};

async fn open_store(dir: &Path) -> LocalStore {
    let url = format!("sqlite://{}", dir.join("meta/relay.db").display());
    LocalStore::open(dir.join("objects"), &url, "uploads")
        .await
        .unwrap()
        .with_min_part_size(KIB)
}

async fn fresh() -> (LocalStore, TempDir) {
    let dir = tempdir().unwrap();
    let store = open_store(dir.path()).await;
    (store, dir)
}

async fn read_all(store: &LocalStore, key: &str) -> Vec<u8> {
    let (_, stream) = store.get_object(key).await.unwrap();
    let chunks: Vec<Bytes> = stream.try_collect().await.unwrap();
    chunks.concat()
}

#[tokio::test]
async fn multipart_lifecycle_assembles_parts_in_list_order() {
    let (store, _dir) = fresh().await;
    let first = Bytes::from(payload(2 * KIB as usize));
    let second = Bytes::from(vec![7u8; 100]);

    let id = store
        .create_multipart_upload("media/clip.mp4", Some("video/mp4"))
        .await
        .unwrap();
    // parts may arrive in any order
    let etag2 = store
        .upload_part("media/clip.mp4", &id, 2, second.clone())
        .await
        .unwrap();
    let etag1 = store
        .upload_part("media/clip.mp4", &id, 1, first.clone())
        .await
        .unwrap();

    assert!(!store.exists("media/clip.mp4").await.unwrap());
    assert_eq!(store.pending_uploads().await.unwrap().len(), 1);

    store
        .complete_multipart_upload(
            "media/clip.mp4",
            &id,
            &[CompletedPart::new(1, etag1), CompletedPart::new(2, etag2)],
        )
        .await
        .unwrap();

    let info = store.head_object("media/clip.mp4").await.unwrap();
    assert_eq!(info.size, first.len() as u64 + 100);
    assert_eq!(info.content_type.as_deref(), Some("video/mp4"));
    assert!(info.etag.unwrap().ends_with("-2"));

    let body = read_all(&store, "media/clip.mp4").await;
    assert_eq!(body, [first.as_ref(), second.as_ref()].concat());
    assert!(store.pending_uploads().await.unwrap().is_empty());
    assert!(!store.base_path.join(".multipart").join(&id).exists());
}

#[tokio::test]
async fn completion_enforces_part_rules() {
    let (store, _dir) = fresh().await;
    let id = store.create_multipart_upload("k.bin", None).await.unwrap();
    let small = store
        .upload_part("k.bin", &id, 1, Bytes::from(vec![1u8; 10]))
        .await
        .unwrap();
    let last = store
        .upload_part("k.bin", &id, 2, Bytes::from(vec![2u8; 10]))
        .await
        .unwrap();

    let empty = store.complete_multipart_upload("k.bin", &id, &[]).await;
    assert!(matches!(empty, Err(StoreError::InvalidPart(_))));

    let unsorted = store
        .complete_multipart_upload(
            "k.bin",
            &id,
            &[
                CompletedPart::new(2, last.clone()),
                CompletedPart::new(1, small.clone()),
            ],
        )
        .await;
    assert!(matches!(unsorted, Err(StoreError::InvalidPart(_))));

    let wrong_etag = store
        .complete_multipart_upload("k.bin", &id, &[CompletedPart::new(1, "deadbeef")])
        .await;
    assert!(matches!(wrong_etag, Err(StoreError::InvalidPart(_))));

    let unknown = store
        .complete_multipart_upload("k.bin", &id, &[CompletedPart::new(3, "x")])
        .await;
    assert!(matches!(unknown, Err(StoreError::InvalidPart(_))));

    let too_small = store
        .complete_multipart_upload(
            "k.bin",
            &id,
            &[CompletedPart::new(1, small), CompletedPart::new(2, last)],
        )
        .await;
    assert!(matches!(
        too_small,
        Err(StoreError::EntityTooSmall { part_number: 1, .. })
    ));

    // a quoted etag (as S3 hands them out) is accepted for a single final part
    let id2 = store.create_multipart_upload("one.bin", None).await.unwrap();
    let etag = store
        .upload_part("one.bin", &id2, 1, Bytes::from_static(b"tiny"))
        .await
        .unwrap();
    store
        .complete_multipart_upload(
            "one.bin",
            &id2,
            &[CompletedPart::new(1, format!("\"{}\"", etag))],
        )
        .await
        .unwrap();
    assert_eq!(read_all(&store, "one.bin").await, b"tiny");
}

#[tokio::test]
async fn abort_discards_session_and_parts() {
    let (store, _dir) = fresh().await;
    let id = store.create_multipart_upload("gone.bin", None).await.unwrap();
    store
        .upload_part("gone.bin", &id, 1, Bytes::from_static(b"data"))
        .await
        .unwrap();

    store.abort_multipart_upload("gone.bin", &id).await.unwrap();

    assert!(!store.exists("gone.bin").await.unwrap());
    assert!(!store.base_path.join(".multipart").join(&id).exists());
    assert!(matches!(
        store.abort_multipart_upload("gone.bin", &id).await,
        Err(StoreError::NoSuchUpload(_))
    ));
    assert!(matches!(
        store
            .upload_part("gone.bin", &id, 2, Bytes::from_static(b"x"))
            .await,
        Err(StoreError::NoSuchUpload(_))
    ));
}

#[tokio::test]
async fn sessions_are_bound_to_their_key() {
    let (store, _dir) = fresh().await;
    let id = store.create_multipart_upload("a.bin", None).await.unwrap();
    assert!(matches!(
        store
            .upload_part("b.bin", &id, 1, Bytes::from_static(b"x"))
            .await,
        Err(StoreError::NoSuchUpload(_))
    ));
    assert!(matches!(
        store
            .upload_part("a.bin", &id, 0, Bytes::from_static(b"x"))
            .await,
        Err(StoreError::InvalidPart(_))
    ));
}

#[tokio::test]
async fn put_head_link_delete() {
    let (store, dir) = fresh().await;
    let (path, bytes) = write_file(dir.path(), "photo.jpg", 3000);

    store
        .put_object("albums/photo.jpg", &path, Some("image/jpeg"))
        .await
        .unwrap();
    let info = store.head_object("albums/photo.jpg").await.unwrap();
    assert_eq!(info.size, 3000);
    assert_eq!(info.etag.as_deref(), Some(format!("{:x}", md5::compute(&bytes)).as_str()));
    assert_eq!(read_all(&store, "albums/photo.jpg").await, bytes);

    let link = store
        .presign_get("albums/photo.jpg", Duration::from_secs(60))
        .await
        .unwrap();
    assert!(link.starts_with("file://"));
    assert!(link.ends_with("albums/photo.jpg"));

    store.delete_object("albums/photo.jpg").await.unwrap();
    assert!(matches!(
        store.head_object("albums/photo.jpg").await,
        Err(StoreError::NotFound(_))
    ));
    assert!(matches!(
        store.delete_object("albums/photo.jpg").await,
        Err(StoreError::NotFound(_))
    ));
    assert!(matches!(
        store.presign_get("albums/photo.jpg", Duration::from_secs(1)).await,
        Err(StoreError::NotFound(_))
    ));
}

#[tokio::test]
async fn rejects_unsafe_keys_and_bad_buckets() {
    let (store, dir) = fresh().await;
    assert!(matches!(
        store.create_multipart_upload("../escape", None).await,
        Err(StoreError::InvalidKey(_))
    ));
    assert!(matches!(
        store.head_object("/abs").await,
        Err(StoreError::InvalidKey(_))
    ));

    let (path, _) = write_file(dir.path(), "x.bin", 10);
    for key in ["dir/", "a/./b"] {
        assert!(
            matches!(
                store.put_object(key, &path, None).await,
                Err(StoreError::InvalidKey(_))
            ),
            "{}",
            key
        );
    }

    let url = format!("sqlite://{}", dir.path().join("other.db").display());
    assert!(matches!(
        LocalStore::open(dir.path().join("x"), &url, "Bad_Bucket").await,
        Err(StoreError::InvalidBucket { .. })
    ));
}

#[tokio::test]
async fn reopening_keeps_metadata_and_readiness_passes() {
    let dir = tempdir().unwrap();
    let (path, bytes) = write_file(dir.path(), "notes.txt", 512);
    {
        let store = open_store(dir.path()).await;
        store.put_object("notes.txt", &path, None).await.unwrap();
        store.check_ready().await.unwrap();
    }
    let store = open_store(dir.path()).await;
    assert_eq!(read_all(&store, "notes.txt").await, bytes);
}

#[tokio::test]
async fn chunked_uploader_round_trips_through_local_store() {
    let dir = tempdir().unwrap();
    let store: Arc<dyn ObjectStore> = Arc::new(open_store(dir.path()).await);
    let (path, bytes) = write_file(dir.path(), "movie.mkv", (10 * KIB + 321) as usize);

    let uploader = ChunkedUploader::new(
        store.clone(),
        UploadSettings {
            part_size: 2 * KIB,
            multipart_threshold: 2 * KIB,
            concurrency: 3,
            part_timeout: Some(Duration::from_secs(30)),
            progress_interval: Duration::from_millis(0),
        },
    );
    let report = uploader.upload(&path, "movie.mkv", None).await.unwrap();
    assert_eq!(report.parts, 6);

    let info = store.head_object("movie.mkv").await.unwrap();
    assert_eq!(info.size, bytes.len() as u64);
    assert_eq!(info.content_type.as_deref(), Some("video/x-matroska"));
    assert!(info.etag.unwrap().ends_with("-6"));

    let (_, stream) = store.get_object("movie.mkv").await.unwrap();
    let chunks: Vec<Bytes> = stream.try_collect().await.unwrap();
    assert_eq!(chunks.concat(), bytes);
}
