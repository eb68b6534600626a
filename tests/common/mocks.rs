use async_trait::async_trait;
use bucket_relay::{
    models::{multipart::CompletedPart, object::ObjectInfo},
    store::{ByteStream, ObjectStore, StoreError, StoreResult},
};
use bytes::Bytes;
use chrono::Utc;
use std::{
    collections::{BTreeMap, HashMap},
    path::Path,
    sync::{
        Mutex,
        atomic::{AtomicUsize, Ordering},
    },
};
use tokio::time::Duration;

struct Session {
    key: String,
    parts: BTreeMap<i32, (String, Bytes)>,
}

#[derive(Default)]
struct Inner {
    sessions: HashMap<String, Session>,
    objects: HashMap<String, (Bytes, Option<String>)>,
    next_id: u64,
}

/// In-memory store that follows the multipart contract and can be told to
/// fail specific calls. Counters record how it was driven.
#[allow(dead_code)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
    min_part_size: u64,
    fail_part: Option<i32>,
    fail_complete: bool,
    fail_abort: bool,
    part_delay: Option<Duration>,

    pub creates: AtomicUsize,
    pub puts: AtomicUsize,
    pub part_calls: AtomicUsize,
    pub completes: AtomicUsize,
    pub aborts: AtomicUsize,
    in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
    pub session_ids: Mutex<Vec<String>>,
    pub part_sizes: Mutex<BTreeMap<i32, usize>>,
    pub completed_lists: Mutex<Vec<Vec<CompletedPart>>>,
}

#[allow(dead_code)]
impl MemoryStore {
    pub fn new(min_part_size: u64) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            min_part_size,
            fail_part: None,
            fail_complete: false,
            fail_abort: false,
            part_delay: None,
            creates: AtomicUsize::new(0),
            puts: AtomicUsize::new(0),
            part_calls: AtomicUsize::new(0),
            completes: AtomicUsize::new(0),
            aborts: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            session_ids: Mutex::new(Vec::new()),
            part_sizes: Mutex::new(BTreeMap::new()),
            completed_lists: Mutex::new(Vec::new()),
        }
    }

    pub fn failing_part(mut self, part_number: i32) -> Self {
        self.fail_part = Some(part_number);
        self
    }

    pub fn failing_complete(mut self) -> Self {
        self.fail_complete = true;
        self
    }

    pub fn failing_abort(mut self) -> Self {
        self.fail_abort = true;
        self
    }

    /// Every part call sleeps this long before answering.
    pub fn with_part_delay(mut self, delay: Duration) -> Self {
        self.part_delay = Some(delay);
        self
    }

    pub fn count(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }

    pub fn object(&self, key: &str) -> Option<Bytes> {
        self.inner
            .lock()
            .unwrap()
            .objects
            .get(key)
            .map(|(bytes, _)| bytes.clone())
    }

    pub fn open_sessions(&self) -> usize {
        self.inner.lock().unwrap().sessions.len()
    }

    fn info(key: &str, bytes: &Bytes, content_type: Option<String>) -> ObjectInfo {
        ObjectInfo {
            key: key.to_string(),
            size: bytes.len() as u64,
            etag: Some(format!("{:x}", md5::compute(bytes))),
            content_type,
            last_modified: Some(Utc::now()),
        }
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    fn min_part_size(&self) -> u64 {
        self.min_part_size
    }

    async fn create_multipart_upload(
        &self,
        key: &str,
        _content_type: Option<&str>,
    ) -> StoreResult<String> {
        self.creates.fetch_add(1, Ordering::SeqCst);
        let mut inner = self.inner.lock().unwrap();
        inner.next_id += 1;
        let id = format!("upload-{}", inner.next_id);
        inner.sessions.insert(
            id.clone(),
            Session {
                key: key.to_string(),
                parts: BTreeMap::new(),
            },
        );
        self.session_ids.lock().unwrap().push(id.clone());
        Ok(id)
    }

    async fn upload_part(
        &self,
        key: &str,
        upload_id: &str,
        part_number: i32,
        body: Bytes,
    ) -> StoreResult<String> {
        self.part_calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        if let Some(delay) = self.part_delay {
            tokio::time::sleep(delay).await;
        } else {
            tokio::task::yield_now().await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if self.fail_part == Some(part_number) {
            return Err(StoreError::Remote(
                format!("injected failure on part {}", part_number).into(),
            ));
        }

        let etag = format!("{:x}", md5::compute(&body));
        let mut inner = self.inner.lock().unwrap();
        let session = inner
            .sessions
            .get_mut(upload_id)
            .filter(|session| session.key == key)
            .ok_or_else(|| StoreError::NoSuchUpload(upload_id.to_string()))?;
        self.part_sizes
            .lock()
            .unwrap()
            .insert(part_number, body.len());
        session.parts.insert(part_number, (etag.clone(), body));
        Ok(etag)
    }

    async fn complete_multipart_upload(
        &self,
        key: &str,
        upload_id: &str,
        parts: &[CompletedPart],
    ) -> StoreResult<()> {
        self.completes.fetch_add(1, Ordering::SeqCst);
        self.completed_lists.lock().unwrap().push(parts.to_vec());
        if self.fail_complete {
            return Err(StoreError::Remote("injected complete failure".into()));
        }

        let mut inner = self.inner.lock().unwrap();
        let session = inner
            .sessions
            .remove(upload_id)
            .filter(|session| session.key == key)
            .ok_or_else(|| StoreError::NoSuchUpload(upload_id.to_string()))?;

        if parts.is_empty()
            || parts
                .windows(2)
                .any(|pair| pair[0].part_number >= pair[1].part_number)
        {
            return Err(StoreError::InvalidPart("unsorted part list".into()));
        }
        let mut assembled = Vec::new();
        for part in parts {
            let (etag, bytes) = session
                .parts
                .get(&part.part_number)
                .ok_or_else(|| StoreError::InvalidPart(format!("{}", part.part_number)))?;
            if *etag != part.etag {
                return Err(StoreError::InvalidPart("etag mismatch".into()));
            }
            assembled.extend_from_slice(bytes);
        }
        inner
            .objects
            .insert(key.to_string(), (Bytes::from(assembled), None));
        Ok(())
    }

    async fn abort_multipart_upload(&self, _key: &str, upload_id: &str) -> StoreResult<()> {
        self.aborts.fetch_add(1, Ordering::SeqCst);
        if self.fail_abort {
            return Err(StoreError::Remote("injected abort failure".into()));
        }
        self.inner
            .lock()
            .unwrap()
            .sessions
            .remove(upload_id)
            .map(|_| ())
            .ok_or_else(|| StoreError::NoSuchUpload(upload_id.to_string()))
    }

    async fn put_object(
        &self,
        key: &str,
        path: &Path,
        content_type: Option<&str>,
    ) -> StoreResult<()> {
        self.puts.fetch_add(1, Ordering::SeqCst);
        let bytes = Bytes::from(tokio::fs::read(path).await?);
        self.inner.lock().unwrap().objects.insert(
            key.to_string(),
            (bytes, content_type.map(str::to_string)),
        );
        Ok(())
    }

    async fn head_object(&self, key: &str) -> StoreResult<ObjectInfo> {
        let inner = self.inner.lock().unwrap();
        let (bytes, content_type) = inner
            .objects
            .get(key)
            .ok_or_else(|| StoreError::NotFound(key.to_string()))?;
        Ok(Self::info(key, bytes, content_type.clone()))
    }

    async fn get_object(&self, key: &str) -> StoreResult<(ObjectInfo, ByteStream)> {
        let info = self.head_object(key).await?;
        let bytes = self.object(key).unwrap_or_default();
        let stream = futures::stream::iter(vec![Ok::<Bytes, StoreError>(bytes)]);
        Ok((info, Box::pin(stream)))
    }

    async fn delete_object(&self, key: &str) -> StoreResult<()> {
        self.inner
            .lock()
            .unwrap()
            .objects
            .remove(key)
            .map(|_| ())
            .ok_or_else(|| StoreError::NotFound(key.to_string()))
    }

    async fn presign_get(&self, key: &str, expires_in: Duration) -> StoreResult<String> {
        Ok(format!(
            "memory://bucket/{}?expires={}",
            key,
            expires_in.as_secs()
        ))
    }

    async fn check_ready(&self) -> StoreResult<()> {
        Ok(())
    }
}
