//! Sweep metrics.
//!
//! One [`SweepMetrics`] per sweeper group, handed out by the sweeper
//! the way a labeled metric family hands out children. Deferral and
//! error counters are the operator's main liveness signal: a stuck FK
//! chain shows up as rising deferrals with a flat applied count.

use std::sync::atomic::{AtomicU64, Ordering};

/// Atomic counters for one sweeper group.
#[derive(Debug, Default)]
pub struct SweepMetrics {
    /// Mutations presented to the downstream acceptor.
    pub attempted: AtomicU64,
    /// Mutations applied and marked.
    pub applied: AtomicU64,
    /// Deferrable failures (FK and friends); quiet retries.
    pub deferrals: AtomicU64,
    /// Non-deferrable failures; logged retries.
    pub errors: AtomicU64,
    /// Completed sweep cycles.
    pub sweeps: AtomicU64,
}

impl SweepMetrics {
    /// Creates zeroed metrics.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a consistent-enough snapshot for reporting.
    #[must_use]
    pub fn snapshot(&self) -> SweepMetricsSnapshot {
        SweepMetricsSnapshot {
            attempted: self.attempted.load(Ordering::Relaxed),
            applied: self.applied.load(Ordering::Relaxed),
            deferrals: self.deferrals.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            sweeps: self.sweeps.load(Ordering::Relaxed),
        }
    }
}

/// Immutable snapshot of [`SweepMetrics`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SweepMetricsSnapshot {
    /// Mutations presented to the downstream acceptor.
    pub attempted: u64,
    /// Mutations applied and marked.
    pub applied: u64,
    /// Deferrable failures.
    pub deferrals: u64,
    /// Non-deferrable failures.
    pub errors: u64,
    /// Completed sweep cycles.
    pub sweeps: u64,
}
