//! Transfer progress: the observer seam the uploader and downloader report
//! through, and a throttled reporter that turns raw byte counts into
//! snapshots with rate and ETA.

use serde::Serialize;
use std::{
    error::Error,
    fmt,
    sync::Mutex,
    time::{Duration, Instant},
};
use tokio::sync::watch;
use tracing::{debug, warn};

pub type ObserverError = Box<dyn Error + Send + Sync>;

const BAR_CELLS: usize = 20;

/// Receives `(bytes_transferred, total_bytes)` after each completed unit of
/// work. Called synchronously from the transfer loop, so it must be quick.
pub trait ProgressObserver: Send + Sync {
    fn on_progress(&self, transferred: u64, total: u64) -> Result<(), ObserverError>;
}

impl<F> ProgressObserver for F
where
    F: Fn(u64, u64) + Send + Sync,
{
    fn on_progress(&self, transferred: u64, total: u64) -> Result<(), ObserverError> {
        self(transferred, total);
        Ok(())
    }
}

/// Invoke the observer, if any. A failing observer is logged and otherwise
/// ignored; it never affects the transfer.
pub fn notify(observer: Option<&dyn ProgressObserver>, transferred: u64, total: u64) {
    if let Some(observer) = observer
        && let Err(err) = observer.on_progress(transferred, total)
    {
        warn!(transferred, total, error = %err, "progress observer failed");
    }
}

/// Byte counter owned by a single transfer loop.
#[derive(Debug, Clone, Default)]
pub struct ProgressState {
    bytes_transferred: u64,
}

impl ProgressState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `bytes` and return the new cumulative total.
    pub fn advance(&mut self, bytes: u64) -> u64 {
        self.bytes_transferred = self.bytes_transferred.saturating_add(bytes);
        self.bytes_transferred
    }
}

/// Point-in-time view of a transfer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgressSnapshot {
    pub label: String,
    pub transferred: u64,
    pub total: u64,
    pub percent: f64,
    pub rate_bytes_per_sec: f64,
    pub eta: Option<Duration>,
    pub elapsed: Duration,
}

impl ProgressSnapshot {
    pub fn is_complete(&self) -> bool {
        self.transferred >= self.total
    }
}

impl fmt::Display for ProgressSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let eta = match self.eta {
            Some(eta) => format_eta(eta),
            None => "unknown".to_string(),
        };
        write!(
            f,
            "{} {:.1}% {} / {} @ {}/s ETA {}",
            progress_bar(self.percent),
            self.percent,
            human_bytes(self.transferred),
            human_bytes(self.total),
            human_bytes(self.rate_bytes_per_sec as u64),
            eta
        )
    }
}

#[derive(Debug)]
struct Throttle {
    started_at: Instant,
    last_emit: Option<(Instant, u64)>,
}

/// Observer that throttles raw progress into snapshots, logs them at debug
/// and publishes them on a watch channel.
#[derive(Debug)]
pub struct ProgressReporter {
    label: String,
    min_interval: Duration,
    throttle: Mutex<Throttle>,
    tx: watch::Sender<Option<ProgressSnapshot>>,
}

impl ProgressReporter {
    /// New reporter with its own channel.
    pub fn new(
        label: impl Into<String>,
        min_interval: Duration,
    ) -> (Self, watch::Receiver<Option<ProgressSnapshot>>) {
        let (tx, rx) = watch::channel(None);
        (Self::with_sender(label, min_interval, tx), rx)
    }

    /// New reporter publishing into an existing channel.
    pub fn with_sender(
        label: impl Into<String>,
        min_interval: Duration,
        tx: watch::Sender<Option<ProgressSnapshot>>,
    ) -> Self {
        Self {
            label: label.into(),
            min_interval,
            throttle: Mutex::new(Throttle {
                started_at: Instant::now(),
                last_emit: None,
            }),
            tx,
        }
    }

    /// Record progress observed at `now`. Returns the snapshot when one was
    /// emitted, `None` when throttled.
    pub fn observe_at(
        &self,
        transferred: u64,
        total: u64,
        now: Instant,
    ) -> Option<ProgressSnapshot> {
        let mut throttle = self
            .throttle
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        let is_final = transferred >= total;
        let (since, since_bytes) = match throttle.last_emit {
            Some((at, bytes)) => {
                if !is_final && now.saturating_duration_since(at) < self.min_interval {
                    return None;
                }
                (at, bytes)
            }
            None => (throttle.started_at, 0),
        };

        let window = now.saturating_duration_since(since).as_secs_f64();
        let delta = transferred.saturating_sub(since_bytes) as f64;
        let rate = if window > 0.0 { delta / window } else { 0.0 };
        let remaining = total.saturating_sub(transferred);
        let eta = if remaining == 0 {
            Some(Duration::ZERO)
        } else if rate > 0.0 {
            Some(Duration::from_secs_f64(remaining as f64 / rate))
        } else {
            None
        };
        let percent = if total == 0 {
            100.0
        } else {
            (transferred.min(total) as f64 / total as f64) * 100.0
        };

        throttle.last_emit = Some((now, transferred));
        let snapshot = ProgressSnapshot {
            label: self.label.clone(),
            transferred,
            total,
            percent,
            rate_bytes_per_sec: rate,
            eta,
            elapsed: now.saturating_duration_since(throttle.started_at),
        };
        drop(throttle);

        debug!(label = %snapshot.label, "{}", snapshot);
        self.tx.send_replace(Some(snapshot.clone()));
        Some(snapshot)
    }
}

impl ProgressObserver for ProgressReporter {
    fn on_progress(&self, transferred: u64, total: u64) -> Result<(), ObserverError> {
        self.observe_at(transferred, total, Instant::now());
        Ok(())
    }
}

/// Render a byte count with binary units, e.g. `1.50 MB`.
pub fn human_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];
    if bytes < 1024 {
        return format!("{} B", bytes);
    }
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{:.2} {}", value, UNITS[unit])
}

/// `45s`, `3m 5s`, `1h 2m`.
pub fn format_eta(eta: Duration) -> String {
    let secs = eta.as_secs();
    if secs < 60 {
        format!("{}s", secs)
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m", secs / 3600, (secs % 3600) / 60)
    }
}

/// Fixed-width bar for a percentage in `0..=100`.
pub fn progress_bar(percent: f64) -> String {
    let filled = ((percent.clamp(0.0, 100.0) / 100.0) * BAR_CELLS as f64).round() as usize;
    let filled = filled.min(BAR_CELLS);
    format!("{}{}", "█".repeat(filled), "░".repeat(BAR_CELLS - filled))
}
