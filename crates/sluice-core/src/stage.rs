//! The persistent staging buffer contract.
//!
//! Incoming mutations that cannot be applied immediately are staged: a
//! durable, per-table buffer on the target cluster. Sweepers later
//! drain the buffer through a leased cursor: each row handed out gets
//! a short per-row lease so concurrent sweeps and crashed holders
//! cannot double-apply faster than the lease period.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;

use crate::error::StageError;
use crate::hlc::Hlc;
use crate::ident::TableId;
use crate::mutation::Mutation;
use crate::stopper::Context;

/// A resumable position in the staging buffer.
///
/// Opaque to callers: feed the cursor returned by one
/// [`Stagers::unstage`] call into the next. `lease_expiry` is refreshed
/// by the sweeper before every page so a row's retry rate is bounded by
/// the quiescent period.
#[derive(Debug, Clone)]
pub struct UnstageCursor {
    /// Inclusive lower timestamp bound.
    pub start_at: Hlc,
    /// Exclusive upper timestamp bound.
    pub end_before: Hlc,
    /// Tables to drain.
    pub targets: Vec<TableId>,
    /// Maximum distinct timestamps to return per call.
    pub timestamp_limit: usize,
    /// Maximum mutations to return per call.
    pub update_limit: usize,
    /// Rows handed out are leased until this deadline.
    pub lease_expiry: Instant,
}

impl UnstageCursor {
    /// Creates a cursor over `[start_at, end_before)` for one table.
    #[must_use]
    pub fn new(table: TableId, start_at: Hlc, end_before: Hlc) -> Self {
        Self {
            start_at,
            end_before,
            targets: vec![table],
            timestamp_limit: usize::MAX,
            update_limit: usize::MAX,
            lease_expiry: Instant::now(),
        }
    }
}

/// Per-table staging operations.
#[async_trait]
pub trait Stager: Send + Sync {
    /// Durably stores mutations for later application.
    ///
    /// # Errors
    ///
    /// Returns a [`StageError`] when the store rejects the write.
    async fn stage(&self, ctx: &Context, muts: &[Mutation]) -> Result<(), StageError>;

    /// Removes mutations from the pending set after a successful apply.
    /// Marking is idempotent; already-marked rows are skipped.
    ///
    /// # Errors
    ///
    /// Returns a [`StageError`] when the store rejects the update.
    async fn mark_applied(&self, ctx: &Context, muts: &[Mutation]) -> Result<(), StageError>;
}

/// Row callback invoked by [`Stagers::unstage`] for each leased row.
pub type UnstageCallback<'a> = &'a mut (dyn FnMut(&TableId, Mutation) + Send);

/// Factory and cross-table operations over staging buffers.
#[async_trait]
pub trait Stagers: Send + Sync {
    /// Returns the stager for `table`, creating the backing buffer if
    /// needed.
    ///
    /// # Errors
    ///
    /// Returns a [`StageError`] when the buffer cannot be provisioned.
    async fn get(&self, ctx: &Context, table: &TableId) -> Result<Arc<dyn Stager>, StageError>;

    /// Hands out a page of pending, un-leased mutations within the
    /// cursor's bounds, installing a lease until `cursor.lease_expiry`
    /// on each. Returns the advanced cursor and whether more rows may
    /// remain.
    ///
    /// # Errors
    ///
    /// Returns a [`StageError`] when the read fails; leases taken before
    /// the failure may remain until they expire.
    async fn unstage(
        &self,
        ctx: &Context,
        cursor: UnstageCursor,
        on_row: UnstageCallback<'_>,
    ) -> Result<(UnstageCursor, bool), StageError>;
}
