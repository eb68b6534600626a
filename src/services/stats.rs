use serde::Serialize;
use std::{
    sync::atomic::{AtomicU64, Ordering},
    time::Instant,
};

/// Process-lifetime upload counters.
#[derive(Debug)]
pub struct UploadStats {
    started_at: Instant,
    total: AtomicU64,
    successful: AtomicU64,
    failed: AtomicU64,
    bytes_uploaded: AtomicU64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusReport {
    pub status: &'static str,
    pub uptime_secs: u64,
    pub total_uploads: u64,
    pub successful_uploads: u64,
    pub failed_uploads: u64,
    /// Percentage in `0..=100`; zero before the first upload.
    pub success_rate: f64,
    pub bytes_uploaded: u64,
}

impl UploadStats {
    pub fn new() -> Self {
        Self {
            started_at: Instant::now(),
            total: AtomicU64::new(0),
            successful: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            bytes_uploaded: AtomicU64::new(0),
        }
    }

    pub fn record_success(&self, bytes: u64) {
        self.total.fetch_add(1, Ordering::Relaxed);
        self.successful.fetch_add(1, Ordering::Relaxed);
        self.bytes_uploaded.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn record_failure(&self) {
        self.total.fetch_add(1, Ordering::Relaxed);
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn report(&self) -> StatusReport {
        let total = self.total.load(Ordering::Relaxed);
        let successful = self.successful.load(Ordering::Relaxed);
        let success_rate = if total == 0 {
            0.0
        } else {
            successful as f64 / total as f64 * 100.0
        };
        StatusReport {
            status: "running",
            uptime_secs: self.started_at.elapsed().as_secs(),
            total_uploads: total,
            successful_uploads: successful,
            failed_uploads: self.failed.load(Ordering::Relaxed),
            success_rate,
            bytes_uploaded: self.bytes_uploaded.load(Ordering::Relaxed),
        }
    }
}

impl Default for UploadStats {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_rate_is_zero_without_uploads() {
        let report = UploadStats::new().report();
        assert_eq!(report.total_uploads, 0);
        assert_eq!(report.success_rate, 0.0);
    }

    #[test]
    fn counts_outcomes() {
        let stats = UploadStats::new();
        stats.record_success(100);
        stats.record_success(50);
        stats.record_failure();
        stats.record_failure();

        let report = stats.report();
        assert_eq!(report.total_uploads, 4);
        assert_eq!(report.successful_uploads, 2);
        assert_eq!(report.failed_uploads, 2);
        assert_eq!(report.bytes_uploaded, 150);
        assert_eq!(report.success_rate, 50.0);
    }
}
