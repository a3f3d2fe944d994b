//! Acceptor traits: the downstream surfaces mutations flow through.
//!
//! A [`TableAcceptor`] consumes one table's batch; a [`MultiAcceptor`]
//! routes batches spanning several tables. Both are object-safe so the
//! pipeline can be assembled from trait objects: router → component
//! sub-sequencer → (direct path | staging) → applier.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::AcceptError;
use crate::mutation::{MultiBatch, TableBatch};
use crate::stopper::Context;
use crate::target::TargetQuerier;

/// Per-call options threaded through the acceptor chain.
#[derive(Clone, Default)]
pub struct AcceptOptions {
    /// An externally-managed target transaction or batcher. When unset,
    /// acceptors that write to the target use their own pool.
    pub querier: Option<Arc<dyn TargetQuerier>>,
}

impl std::fmt::Debug for AcceptOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AcceptOptions")
            .field("querier", &self.querier.as_ref().map(|_| "<dyn>"))
            .finish()
    }
}

/// Consumes mutations for a single table.
#[async_trait]
pub trait TableAcceptor: Send + Sync {
    /// Applies or stages one table's batch.
    ///
    /// # Errors
    ///
    /// Returns an [`AcceptError`]; callers classify it as deferrable,
    /// drift, or transient.
    async fn accept_table_batch(
        &self,
        ctx: &Context,
        batch: &TableBatch,
        opts: &AcceptOptions,
    ) -> Result<(), AcceptError>;
}

/// Consumes mutations spanning multiple tables.
#[async_trait]
pub trait MultiAcceptor: TableAcceptor {
    /// Routes each per-table batch to the appropriate downstream
    /// acceptor.
    ///
    /// # Errors
    ///
    /// Returns the first [`AcceptError`] encountered.
    async fn accept_multi_batch(
        &self,
        ctx: &Context,
        batch: &MultiBatch,
        opts: &AcceptOptions,
    ) -> Result<(), AcceptError>;
}
