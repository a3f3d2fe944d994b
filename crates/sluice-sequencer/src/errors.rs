//! Sequencer errors and the deferrable-error classification.

use thiserror::Error;

use sluice_core::error::{AcceptError, LeaseError, SchemaError, StageError};
use sluice_core::target::TargetErrorKind;

/// A start-time sequencer failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SequencerError {
    /// The staging store could not be reached.
    #[error(transparent)]
    Stage(#[from] StageError),

    /// Schema metadata was unavailable.
    #[error(transparent)]
    Schema(#[from] SchemaError),

    /// The lease backend failed outright.
    #[error(transparent)]
    Lease(#[from] LeaseError),
}

/// Returns `true` when retrying the mutation later is expected to
/// succeed, so the failure should stay quiet and staged.
///
/// Deferrable failures are referential-integrity races: the parent row
/// has not arrived yet (FK violations), or two merges collided under
/// read-committed reads (unique violations on concurrent upserts).
#[must_use]
pub fn is_deferrable(err: &AcceptError) -> bool {
    let Some(target) = err.as_target() else {
        return false;
    };
    match &target.kind {
        // foreign_key_violation
        TargetErrorKind::Postgres { sqlstate } => sqlstate == "23503",
        // Cannot add or update a child row: a foreign key constraint fails
        TargetErrorKind::MySql { errno } => *errno == 1452,
        // ORA-00001 unique constraint violated: concurrent merges under
        // read-committed reads can race on insert.
        // ORA-02291 integrity constraint violated.
        TargetErrorKind::Oracle { code } => matches!(code, 1 | 2291),
        _ => false,
    }
}
