//! # Sluice Core
//!
//! Shared vocabulary for the sluice apply pipeline: timestamps,
//! identifiers, mutations, observable variables, cancellable task
//! contexts, schema metadata, and the contracts of the collaborators
//! the best-effort sequencer is wired to (staging buffers, leases,
//! schema watcher, target database).

#![deny(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]

/// Acceptor traits for the mutation flow.
pub mod accept;
/// Sequencer configuration and defaults.
pub mod config;
/// Error taxonomy.
pub mod error;
/// Hybrid logical clocks and ranges.
pub mod hlc;
/// Case-preserving SQL identifiers.
pub mod ident;
/// Named exclusive leases.
pub mod lease;
/// Mutations and batches.
pub mod mutation;
/// Observable variables.
pub mod notify;
/// Target schema metadata and FK components.
pub mod schema;
/// The staging buffer contract.
pub mod stage;
/// Cancellable task contexts.
pub mod stopper;
/// The target database contract.
pub mod target;

pub use accept::{AcceptOptions, MultiAcceptor, TableAcceptor};
pub use config::SequencerConfig;
pub use error::{AcceptError, LeaseError, SchemaDriftError, SchemaError, StageError};
pub use hlc::{Hlc, HlcRange};
pub use ident::{Ident, TableId};
pub use mutation::{MultiBatch, Mutation, TableBatch};
pub use notify::Var;
pub use schema::{ColumnData, SchemaComponent, SchemaData, SchemaWatcher};
pub use stage::{Stager, Stagers, UnstageCursor};
pub use stopper::Context;
pub use target::{SqlParam, TargetError, TargetErrorKind, TargetQuerier};
