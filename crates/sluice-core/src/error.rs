//! Error taxonomy shared across the pipeline.
//!
//! Errors split into the classes the sweep loop cares about: target
//! errors (further classified as deferrable or not), schema drift
//! (the incoming payload no longer matches the target; always
//! surfaced), staging and lease failures, and clean cancellation.

use thiserror::Error;

use crate::hlc::Hlc;
use crate::ident::{Ident, TableId};
use crate::target::TargetError;

/// Schema drift: the incoming payload disagrees with the target schema.
///
/// Drift is never retried in place; it propagates so the operator (or an
/// upstream retry with refreshed metadata) can resolve it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchemaDriftError {
    /// The mutation key has the wrong number of primary-key values.
    #[error(
        "schema drift detected in {table}: \
         inconsistent number of key columns: received {received} expect {expected}: \
         key {key}@{time}"
    )]
    PkArity {
        /// The target table.
        table: TableId,
        /// Values present in the mutation key.
        received: usize,
        /// Primary-key columns in the target.
        expected: usize,
        /// The offending key, as text.
        key: String,
        /// The mutation timestamp.
        time: Hlc,
    },

    /// A primary-key column is absent from the payload.
    #[error("schema drift detected in {table}: missing PK column {column}: key {key}@{time}")]
    MissingPk {
        /// The target table.
        table: TableId,
        /// The absent primary-key column.
        column: Ident,
        /// The offending key, as text.
        key: String,
        /// The mutation timestamp.
        time: Hlc,
    },

    /// The payload contains columns the target does not know.
    #[error(
        "schema drift detected in {table}: unexpected columns {columns:?}: key {key}@{time}"
    )]
    UnexpectedColumns {
        /// The target table.
        table: TableId,
        /// The unknown column names, sorted.
        columns: Vec<String>,
        /// The offending key, as text.
        key: String,
        /// The mutation timestamp.
        time: Hlc,
    },
}

/// Failure staging or unstaging mutations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StageError {
    /// The staging store rejected or lost the request.
    #[error("staging store unavailable: {0}")]
    Unavailable(String),

    /// A staged payload could not be encoded or decoded.
    #[error("staged mutation corrupt: {0}")]
    Corrupt(String),

    /// No stager exists for the requested table.
    #[error("no stager for table {0}")]
    UnknownTable(TableId),
}

/// Failure obtaining schema metadata.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchemaError {
    /// The watcher has no metadata for the table.
    #[error("schema watcher knows no table {0}")]
    UnknownTable(TableId),

    /// The initial column snapshot did not arrive in time.
    #[error("column data timeout for {0}")]
    Timeout(TableId),

    /// The watcher shut down while a subscription was active.
    #[error("schema watcher closed")]
    Closed,
}

/// Failure acquiring or holding a named lease.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LeaseError {
    /// Another holder owns the lease.
    #[error("lease {name} held elsewhere")]
    Busy {
        /// The contested lease name.
        name: String,
    },

    /// The lease backend failed.
    #[error("lease backend error: {0}")]
    Backend(String),
}

/// An error surfaced through the acceptor call chain.
#[derive(Debug, Error)]
pub enum AcceptError {
    /// The target database rejected a statement.
    #[error(transparent)]
    Target(#[from] TargetError),

    /// The payload no longer matches the target schema.
    #[error(transparent)]
    SchemaDrift(#[from] SchemaDriftError),

    /// A mutation payload was not valid JSON.
    #[error("malformed mutation payload: {0}")]
    Codec(#[from] serde_json::Error),

    /// The applier has no column metadata yet.
    #[error("no column data available for {0}")]
    NoSchema(TableId),

    /// Schema metadata could not be obtained.
    #[error(transparent)]
    Schema(#[from] SchemaError),

    /// No route exists for the batch's table.
    #[error("no component route for table {0}")]
    Unroutable(TableId),

    /// Staging a mutation failed.
    #[error(transparent)]
    Stage(#[from] StageError),

    /// The surrounding context stopped; clean termination, not a fault.
    #[error("interrupted by shutdown")]
    Stopped,
}

impl AcceptError {
    /// Returns the underlying target error, when that is what this is.
    #[must_use]
    pub fn as_target(&self) -> Option<&TargetError> {
        match self {
            Self::Target(err) => Some(err),
            _ => None,
        }
    }

    /// Returns `true` for clean cancellation.
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        matches!(self, Self::Stopped)
    }
}
