//! # Sluice Apply
//!
//! The schema-aware table applier: turns batches of mutations into
//! parameterized `DELETE`/`UPSERT` statements against the target,
//! regenerating its templates whenever the target schema changes.

#![deny(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]

/// The applier factory and acceptor surface.
pub mod acceptor;
/// The per-table applier.
pub mod applier;
/// Per-table apply configuration.
pub mod config;
/// Applier metrics.
pub mod metrics;
/// PostgreSQL-family target pool.
pub mod postgres;
mod template;

pub use acceptor::Appliers;
pub use applier::Applier;
pub use config::{ApplyConfig, SUBSTITUTION_TOKEN};
pub use metrics::{ApplyMetrics, ApplyMetricsSnapshot};
pub use postgres::PostgresTargetPool;
