//! Applier metrics.
//!
//! Lock-free atomic counters plus a fixed-bucket latency histogram,
//! snapshotted for observability. Counters are per applier, i.e. per
//! target table.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Histogram bucket upper bounds, in microseconds. The last bucket is
/// unbounded.
const BUCKET_BOUNDS_MICROS: [u64; 4] = [1_000, 10_000, 100_000, 1_000_000];

/// Atomic counters for one table applier.
#[derive(Debug, Default)]
pub struct ApplyMetrics {
    /// Rows deleted.
    pub deletes: AtomicU64,
    /// Rows upserted.
    pub upserts: AtomicU64,
    /// Failed apply calls.
    pub errors: AtomicU64,
    /// Completed apply calls.
    applies: AtomicU64,
    /// Total apply time in microseconds.
    micros_total: AtomicU64,
    /// Latency buckets: `<1ms, <10ms, <100ms, <1s, rest`.
    buckets: [AtomicU64; 5],
}

impl ApplyMetrics {
    /// Creates zeroed metrics.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the duration of one successful apply call.
    #[allow(clippy::cast_possible_truncation)]
    pub fn observe_apply(&self, took: Duration) {
        let micros = took.as_micros() as u64;
        self.applies.fetch_add(1, Ordering::Relaxed);
        self.micros_total.fetch_add(micros, Ordering::Relaxed);
        let idx = BUCKET_BOUNDS_MICROS
            .iter()
            .position(|&bound| micros < bound)
            .unwrap_or(BUCKET_BOUNDS_MICROS.len());
        self.buckets[idx].fetch_add(1, Ordering::Relaxed);
    }

    /// Returns a consistent-enough snapshot for reporting.
    #[must_use]
    pub fn snapshot(&self) -> ApplyMetricsSnapshot {
        ApplyMetricsSnapshot {
            deletes: self.deletes.load(Ordering::Relaxed),
            upserts: self.upserts.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            applies: self.applies.load(Ordering::Relaxed),
            micros_total: self.micros_total.load(Ordering::Relaxed),
            buckets: [
                self.buckets[0].load(Ordering::Relaxed),
                self.buckets[1].load(Ordering::Relaxed),
                self.buckets[2].load(Ordering::Relaxed),
                self.buckets[3].load(Ordering::Relaxed),
                self.buckets[4].load(Ordering::Relaxed),
            ],
        }
    }
}

/// Immutable snapshot of [`ApplyMetrics`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ApplyMetricsSnapshot {
    /// Rows deleted.
    pub deletes: u64,
    /// Rows upserted.
    pub upserts: u64,
    /// Failed apply calls.
    pub errors: u64,
    /// Completed apply calls.
    pub applies: u64,
    /// Total apply time in microseconds.
    pub micros_total: u64,
    /// Latency buckets: `<1ms, <10ms, <100ms, <1s, rest`.
    pub buckets: [u64; 5],
}
