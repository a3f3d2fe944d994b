//! # Sluice Staging
//!
//! In-memory implementations of the pipeline's collaborator contracts:
//! staging buffers with per-row leases, named exclusive leases, a
//! publishable schema watcher, and a recording target database. Used by
//! the integration suite and by embedded single-process deployments
//! that do not need a persistent staging store.

#![deny(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]

/// In-memory named leases.
pub mod leases;
/// In-memory staging buffers.
pub mod memory;
/// A recording, scriptable target database.
pub mod target;
/// In-memory schema watcher.
pub mod watcher;

pub use leases::MemoryLeases;
pub use memory::{MemoryStager, MemoryStagers};
pub use target::{ExecutedStatement, RecordingTarget};
pub use watcher::MemoryWatcher;
