//! Sequencer configuration.

use std::time::Duration;

/// Default applier chunk size.
///
/// Statements are generated per row, so the chunk size bounds how many
/// statements travel in one round-trip batch; hyper-wide tables may
/// need a smaller value.
pub const DEFAULT_ROW_LIMIT: usize = 100;

/// Default sweep retry interval and per-row lease duration.
pub const DEFAULT_QUIESCENT_PERIOD: Duration = Duration::from_secs(1);

/// Default page size for unstaging.
pub const DEFAULT_SWEEP_LIMIT: usize = 1_000;

/// Default grace for generation shutdown.
pub const DEFAULT_TASK_GRACE_PERIOD: Duration = Duration::from_secs(10);

/// Default wait for the applier's initial column snapshot.
pub const DEFAULT_SCHEMA_TIMEOUT: Duration = Duration::from_secs(10);

/// Tunables for the best-effort sequencer and its appliers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SequencerConfig {
    /// Sweep retry interval. Also bounds the per-row lease installed by
    /// unstaging, which in turn bounds a mutation's retry rate.
    pub quiescent_period: Duration,

    /// Maximum mutations unstaged per page.
    pub sweep_limit: usize,

    /// Distinct-timestamp limit forwarded to nested sub-sequencers as
    /// their `max_deferred`.
    pub timestamp_limit: usize,

    /// How long a retiring generation may take to wind down its tasks.
    pub task_grace_period: Duration,

    /// Applier chunk size for upserts and deletes.
    pub row_limit: usize,

    /// How long the applier waits for its initial column snapshot.
    pub schema_timeout: Duration,
}

impl Default for SequencerConfig {
    fn default() -> Self {
        Self {
            quiescent_period: DEFAULT_QUIESCENT_PERIOD,
            sweep_limit: DEFAULT_SWEEP_LIMIT,
            timestamp_limit: usize::MAX,
            task_grace_period: DEFAULT_TASK_GRACE_PERIOD,
            row_limit: DEFAULT_ROW_LIMIT,
            schema_timeout: DEFAULT_SCHEMA_TIMEOUT,
        }
    }
}
