//! Metrics collection for zip runs.
//!
//! Cumulative, thread-safe counters shared by every run of a `ZipService`.
//! They feed the completion log lines and can be read back for diagnostics.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::archive::ArchiveSummary;

/// Collector for zip run metrics
#[derive(Debug, Default)]
pub struct ServiceMetrics {
    archives_created: AtomicU64,
    archives_failed: AtomicU64,
    entries_written: AtomicU64,
    /// Uncompressed bytes read from source objects
    bytes_read: AtomicU64,
    /// Archive bytes written to the store
    bytes_written: AtomicU64,
    /// Failed runs whose partial archive could not be deleted
    cleanup_failures: AtomicU64,
}

/// Point-in-time copy of the counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub archives_created: u64,
    pub archives_failed: u64,
    pub entries_written: u64,
    pub bytes_read: u64,
    pub bytes_written: u64,
    pub cleanup_failures: u64,
}

impl ServiceMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a committed archive
    pub fn record_success(&self, summary: &ArchiveSummary) {
        self.archives_created.fetch_add(1, Ordering::Relaxed);
        self.entries_written
            .fetch_add(summary.entries as u64, Ordering::Relaxed);
        self.bytes_read
            .fetch_add(summary.uncompressed_bytes, Ordering::Relaxed);
        self.bytes_written
            .fetch_add(summary.archive_bytes, Ordering::Relaxed);
    }

    pub fn record_failure(&self) {
        self.archives_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cleanup_failure(&self) {
        self.cleanup_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            archives_created: self.archives_created.load(Ordering::Relaxed),
            archives_failed: self.archives_failed.load(Ordering::Relaxed),
            entries_written: self.entries_written.load(Ordering::Relaxed),
            bytes_read: self.bytes_read.load(Ordering::Relaxed),
            bytes_written: self.bytes_written.load(Ordering::Relaxed),
            cleanup_failures: self.cleanup_failures.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_tracking() {
        let metrics = ServiceMetrics::new();

        metrics.record_success(&ArchiveSummary {
            entries: 2,
            uncompressed_bytes: 11,
            archive_bytes: 250,
        });
        metrics.record_success(&ArchiveSummary {
            entries: 1,
            uncompressed_bytes: 100,
            archive_bytes: 150,
        });
        metrics.record_failure();
        metrics.record_cleanup_failure();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.archives_created, 2);
        assert_eq!(snapshot.archives_failed, 1);
        assert_eq!(snapshot.entries_written, 3);
        assert_eq!(snapshot.bytes_read, 111);
        assert_eq!(snapshot.bytes_written, 400);
        assert_eq!(snapshot.cleanup_failures, 1);
    }

    #[test]
    fn test_snapshot_starts_empty() {
        assert_eq!(ServiceMetrics::new().snapshot(), MetricsSnapshot::default());
    }
}
