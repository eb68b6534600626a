//! Upload admission: size cap, premium membership and a per-user rate limit.

use crate::{config::GateSettings, services::premium::PremiumStore};
use chrono::{DateTime, Utc};
use std::{collections::HashMap, path::Path, sync::Arc};
use thiserror::Error;
use tokio::{
    sync::Mutex,
    time::{Duration, Instant},
};
use tracing::debug;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum GateError {
    #[error("file is {size} bytes, above the {max} byte limit")]
    TooLarge { size: u64, max: u64 },
    #[error("user {0} has no active premium subscription")]
    NotPremium(i64),
    #[error("rate limit reached, retry in {}s", retry_after.as_secs().max(1))]
    RateLimited { retry_after: Duration },
}

#[derive(Debug, Clone, Copy)]
struct Window {
    started: Instant,
    count: u32,
}

/// At most `limit` hits per key per `window`. The window opens on the first
/// hit and resets once it has fully elapsed. Keys whose window has elapsed
/// are evicted on the next check, so the map only holds recently seen keys.
#[derive(Clone)]
pub struct FixedWindowLimiter {
    windows: Arc<Mutex<HashMap<i64, Window>>>,
    limit: u32,
    window: Duration,
}

impl FixedWindowLimiter {
    pub fn new(limit: u32, window: Duration) -> Self {
        Self {
            windows: Arc::new(Mutex::new(HashMap::new())),
            limit,
            window,
        }
    }

    pub async fn check(&self, key: i64) -> Result<(), Duration> {
        self.check_at(key, Instant::now()).await
    }

    /// Count a hit at `now`, or return how long until the window resets.
    pub async fn check_at(&self, key: i64, now: Instant) -> Result<(), Duration> {
        let mut windows = self.windows.lock().await;
        windows.retain(|_, w| now.saturating_duration_since(w.started) < self.window);
        let entry = windows.entry(key).or_insert(Window {
            started: now,
            count: 0,
        });

        let age = now.saturating_duration_since(entry.started);
        if entry.count >= self.limit {
            return Err(self.window.saturating_sub(age));
        }
        entry.count += 1;
        Ok(())
    }
}

#[derive(Clone)]
pub struct UploadGate {
    settings: GateSettings,
    premium: Arc<PremiumStore>,
    limiter: FixedWindowLimiter,
}

impl UploadGate {
    pub fn new(settings: GateSettings, premium: Arc<PremiumStore>) -> Self {
        let limiter = FixedWindowLimiter::new(settings.uploads_per_window, settings.window);
        Self {
            settings,
            premium,
            limiter,
        }
    }

    pub fn premium(&self) -> &Arc<PremiumStore> {
        &self.premium
    }

    pub fn spool_dir(&self) -> &Path {
        &self.settings.spool_dir
    }

    pub fn is_admin(&self, user_id: i64) -> bool {
        self.settings.admin_ids.contains(&user_id)
    }

    pub async fn admit(&self, user_id: i64, file_size: u64) -> Result<(), GateError> {
        self.admit_at(user_id, file_size, Utc::now(), Instant::now())
            .await
    }

    /// Checks run in order: size, membership, rate. Admins skip only the
    /// membership check.
    pub async fn admit_at(
        &self,
        user_id: i64,
        file_size: u64,
        now: DateTime<Utc>,
        clock: Instant,
    ) -> Result<(), GateError> {
        if file_size > self.settings.max_file_size {
            return Err(GateError::TooLarge {
                size: file_size,
                max: self.settings.max_file_size,
            });
        }
        if !self.is_admin(user_id) && !self.premium.is_premium(user_id, now).await {
            return Err(GateError::NotPremium(user_id));
        }
        self.limiter
            .check_at(user_id, clock)
            .await
            .map_err(|retry_after| GateError::RateLimited { retry_after })?;

        debug!(user_id, file_size, "upload admitted");
        Ok(())
    }
}
