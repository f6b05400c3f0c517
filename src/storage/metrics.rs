use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::Serialize;

/// Counters maintained by the serialize and save stages.
#[derive(Default)]
pub struct PipelineMetrics {
    serialized_by_worker: AtomicU64,
    serialized_inline: AtomicU64,
    serialization_failures: AtomicU64,
    records_saved: AtomicU64,
    bytes_saved: AtomicU64,
    save_failures: AtomicU64,
    saves_skipped: AtomicU64,
    save_micros: AtomicU64,
    serialize_micros: AtomicU64,
}

/// Point-in-time copy of [`PipelineMetrics`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct PipelineStatsSnapshot {
    /// Objects converted by the background worker.
    pub serialized_by_worker: u64,
    /// Objects converted on a reader's thread.
    pub serialized_inline: u64,
    /// Conversions that failed and were dropped.
    pub serialization_failures: u64,
    /// Records written to disk.
    pub records_saved: u64,
    /// Bytes written to disk, headers included.
    pub bytes_saved: u64,
    /// Disk writes that failed.
    pub save_failures: u64,
    /// Save jobs skipped because the record was removed or already on disk.
    pub saves_skipped: u64,
    /// Cumulative time spent writing records, in microseconds.
    pub save_micros: u64,
    /// Cumulative time spent serializing, in microseconds.
    pub serialize_micros: u64,
}

impl PipelineStatsSnapshot {
    /// Total successful conversions.
    pub fn serialized(&self) -> u64 {
        self.serialized_by_worker + self.serialized_inline
    }
}

impl PipelineMetrics {
    pub(crate) fn record_serialized(&self, inline: bool, elapsed: Duration) {
        if inline {
            self.serialized_inline.fetch_add(1, Ordering::Relaxed);
        } else {
            self.serialized_by_worker.fetch_add(1, Ordering::Relaxed);
        }
        self.serialize_micros
            .fetch_add(elapsed.as_micros() as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_serialization_failure(&self) {
        self.serialization_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_saved(&self, bytes: u64, elapsed: Duration) {
        self.records_saved.fetch_add(1, Ordering::Relaxed);
        self.bytes_saved.fetch_add(bytes, Ordering::Relaxed);
        self.save_micros
            .fetch_add(elapsed.as_micros() as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_save_failure(&self) {
        self.save_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_save_skipped(&self) {
        self.saves_skipped.fetch_add(1, Ordering::Relaxed);
    }

    /// Creates a snapshot of the current counters.
    pub fn snapshot(&self) -> PipelineStatsSnapshot {
        PipelineStatsSnapshot {
            serialized_by_worker: self.serialized_by_worker.load(Ordering::Relaxed),
            serialized_inline: self.serialized_inline.load(Ordering::Relaxed),
            serialization_failures: self.serialization_failures.load(Ordering::Relaxed),
            records_saved: self.records_saved.load(Ordering::Relaxed),
            bytes_saved: self.bytes_saved.load(Ordering::Relaxed),
            save_failures: self.save_failures.load(Ordering::Relaxed),
            saves_skipped: self.saves_skipped.load(Ordering::Relaxed),
            save_micros: self.save_micros.load(Ordering::Relaxed),
            serialize_micros: self.serialize_micros.load(Ordering::Relaxed),
        }
    }
}
