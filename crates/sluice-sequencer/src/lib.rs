//! # Sluice Sequencer
//!
//! The best-effort apply core: partitions tables by referential
//! connectivity, sweeps staged mutations per table under a group lease,
//! regenerates its sub-sequencers on schema change, and relaxes
//! cross-component ordering for throughput. At-least-once is the
//! contract; progress is observable per table and never regresses.

#![deny(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]

/// The direct acceptor for singleton components.
pub mod direct;
/// Sequencer errors and deferrable classification.
pub mod errors;
/// Generations of sub-sequencers.
pub mod generation;
mod leasing;
/// Sweep metrics.
pub mod metrics;
/// The best-effort router.
pub mod router;
/// The sequencer contract.
pub mod sequencer;
mod staged;
/// Progress stats.
pub mod stat;
/// The per-component sweeper.
pub mod sweep;

pub use direct::DirectAcceptor;
pub use errors::{is_deferrable, SequencerError};
pub use generation::Generation;
pub use metrics::{SweepMetrics, SweepMetricsSnapshot};
pub use router::{BestEffort, TimeSource};
pub use sequencer::{Sequencer, StartOptions, TableGroup};
pub use stat::Stat;
pub use sweep::Sweeper;
