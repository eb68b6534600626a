//! Premium users, persisted as a JSON map of `user_id -> record`.

use crate::models::premium::PremiumRecord;
use chrono::{DateTime, Duration, Utc};
use std::{
    collections::BTreeMap,
    io::{self, ErrorKind},
    path::PathBuf,
};
use thiserror::Error;
use tokio::{fs, sync::RwLock};
use tracing::{debug, info};
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum PremiumError {
    #[error("premium days must be positive, got {0}")]
    InvalidDays(i64),
    #[error("premium file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("premium file is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug)]
pub struct PremiumStore {
    path: PathBuf,
    records: RwLock<BTreeMap<i64, PremiumRecord>>,
}

impl PremiumStore {
    /// Read the premium file. A missing file is an empty store.
    pub async fn load(path: impl Into<PathBuf>) -> Result<Self, PremiumError> {
        let path = path.into();
        let records = match fs::read(&path).await {
            Ok(raw) if raw.iter().all(u8::is_ascii_whitespace) => BTreeMap::new(),
            Ok(raw) => serde_json::from_slice(&raw)?,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!(path = %path.display(), "no premium file yet");
                BTreeMap::new()
            }
            Err(source) => return Err(PremiumError::Io { path, source }),
        };
        Ok(Self {
            path,
            records: RwLock::new(records),
        })
    }

    pub async fn record(&self, user_id: i64) -> Option<PremiumRecord> {
        self.records.read().await.get(&user_id).cloned()
    }

    pub async fn is_premium(&self, user_id: i64, now: DateTime<Utc>) -> bool {
        self.records
            .read()
            .await
            .get(&user_id)
            .is_some_and(|record| record.is_active(now))
    }

    /// Extend (or start) a subscription by `days`, counting from the later of
    /// `now` and the current expiry.
    pub async fn grant(
        &self,
        user_id: i64,
        days: i64,
        now: DateTime<Utc>,
    ) -> Result<PremiumRecord, PremiumError> {
        if days <= 0 {
            return Err(PremiumError::InvalidDays(days));
        }
        let mut records = self.records.write().await;
        let mut next = records.clone();
        let record = match next.get(&user_id) {
            Some(current) if current.is_active(now) => PremiumRecord {
                user_id,
                granted_at: current.granted_at,
                expires_at: current.expires_at + Duration::days(days),
            },
            _ => PremiumRecord {
                user_id,
                granted_at: now,
                expires_at: now + Duration::days(days),
            },
        };
        next.insert(user_id, record.clone());
        self.persist(&next).await?;
        *records = next;

        info!(user_id, expires_at = %record.expires_at, "premium granted");
        Ok(record)
    }

    /// Returns whether a record was removed.
    pub async fn revoke(&self, user_id: i64) -> Result<bool, PremiumError> {
        let mut records = self.records.write().await;
        let mut next = records.clone();
        if next.remove(&user_id).is_none() {
            return Ok(false);
        }
        self.persist(&next).await?;
        *records = next;
        info!(user_id, "premium revoked");
        Ok(true)
    }

    /// Unexpired records, ordered by user id.
    pub async fn active(&self, now: DateTime<Utc>) -> Vec<PremiumRecord> {
        self.records
            .read()
            .await
            .values()
            .filter(|record| record.is_active(now))
            .cloned()
            .collect()
    }

    /// Temp file + rename so a crash never leaves a truncated file. Callers
    /// swap `records` into memory only after this succeeds.
    async fn persist(&self, records: &BTreeMap<i64, PremiumRecord>) -> Result<(), PremiumError> {
        let io_err = |source: io::Error| PremiumError::Io {
            path: self.path.clone(),
            source,
        };
        let json = serde_json::to_vec_pretty(records)?;

        let parent = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&parent).await.map_err(io_err)?;
        let tmp_path = parent.join(format!(".premium-{}.json", Uuid::new_v4()));
        fs::write(&tmp_path, &json).await.map_err(io_err)?;
        if let Err(err) = fs::rename(&tmp_path, &self.path).await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(io_err(err));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn missing_file_is_empty() {
        let dir = tempdir().unwrap();
        let store = PremiumStore::load(dir.path().join("premium.json"))
            .await
            .unwrap();
        assert!(store.active(Utc::now()).await.is_empty());
        assert!(!store.is_premium(1, Utc::now()).await);
    }

    #[tokio::test]
    async fn grant_extends_from_current_expiry_and_persists() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested/premium.json");
        let now = Utc::now();

        let store = PremiumStore::load(&path).await.unwrap();
        let first = store.grant(7, 30, now).await.unwrap();
        assert_eq!(first.expires_at, now + Duration::days(30));

        let second = store.grant(7, 10, now + Duration::days(1)).await.unwrap();
        assert_eq!(second.expires_at, now + Duration::days(40));
        assert_eq!(second.granted_at, now);

        let reloaded = PremiumStore::load(&path).await.unwrap();
        assert!(reloaded.is_premium(7, now + Duration::days(39)).await);
        assert!(!reloaded.is_premium(7, now + Duration::days(40)).await);
    }

    #[tokio::test]
    async fn expired_grant_restarts_from_now() {
        let dir = tempdir().unwrap();
        let store = PremiumStore::load(dir.path().join("p.json")).await.unwrap();
        let now = Utc::now();
        store.grant(3, 1, now).await.unwrap();

        let later = now + Duration::days(5);
        let renewed = store.grant(3, 2, later).await.unwrap();
        assert_eq!(renewed.granted_at, later);
        assert_eq!(renewed.expires_at, later + Duration::days(2));
    }

    #[tokio::test]
    async fn revoke_and_reject_non_positive_days() {
        let dir = tempdir().unwrap();
        let store = PremiumStore::load(dir.path().join("p.json")).await.unwrap();
        assert!(matches!(
            store.grant(1, 0, Utc::now()).await,
            Err(PremiumError::InvalidDays(0))
        ));
        store.grant(1, 5, Utc::now()).await.unwrap();
        assert!(store.revoke(1).await.unwrap());
        assert!(!store.revoke(1).await.unwrap());
        assert!(!store.is_premium(1, Utc::now()).await);
    }

    #[tokio::test]
    async fn failed_write_leaves_memory_untouched() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("p.json");
        let store = PremiumStore::load(&path).await.unwrap();
        let now = Utc::now();
        store.grant(1, 5, now).await.unwrap();

        // a directory where the file should be makes every rename fail
        std::fs::remove_file(&path).unwrap();
        std::fs::create_dir(&path).unwrap();

        assert!(matches!(
            store.grant(2, 5, now).await,
            Err(PremiumError::Io { .. })
        ));
        assert!(!store.is_premium(2, now).await);

        assert!(matches!(store.revoke(1).await, Err(PremiumError::Io { .. })));
        assert!(store.is_premium(1, now).await);
    }

    #[tokio::test]
    async fn malformed_file_is_an_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("p.json");
        std::fs::write(&path, b"{not json").unwrap();
        assert!(matches!(
            PremiumStore::load(&path).await,
            Err(PremiumError::Json(_))
        ));
    }
}
