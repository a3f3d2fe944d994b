//! The direct acceptor: first-attempt apply for singleton components.
//!
//! A table with no foreign-key neighbors cannot hit a deferrable
//! ordering race from other tables, so its mutations skip the
//! stage-and-sweep cycle: try the primary apply immediately and only
//! fall back to staging when the target defers. Non-deferrable errors
//! propagate to the caller.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use sluice_core::accept::{AcceptOptions, MultiAcceptor, TableAcceptor};
use sluice_core::error::AcceptError;
use sluice_core::mutation::{MultiBatch, TableBatch};
use sluice_core::stopper::Context;

use crate::errors::is_deferrable;

/// Try-direct-then-stage acceptor for single-table components.
pub struct DirectAcceptor {
    primary: Arc<dyn TableAcceptor>,
    staged: Arc<dyn MultiAcceptor>,
}

impl DirectAcceptor {
    /// Wraps `staged` (the component's staging path) with a direct
    /// attempt through `primary`.
    pub fn new(primary: Arc<dyn TableAcceptor>, staged: Arc<dyn MultiAcceptor>) -> Self {
        Self { primary, staged }
    }
}

#[async_trait]
impl TableAcceptor for DirectAcceptor {
    async fn accept_table_batch(
        &self,
        ctx: &Context,
        batch: &TableBatch,
        opts: &AcceptOptions,
    ) -> Result<(), AcceptError> {
        match self.primary.accept_table_batch(ctx, batch, opts).await {
            Ok(()) => Ok(()),
            Err(err) if is_deferrable(&err) => {
                debug!(
                    table = %batch.table,
                    error = %err,
                    "direct apply deferred; staging batch"
                );
                self.staged.accept_table_batch(ctx, batch, opts).await
            }
            Err(err) => Err(err),
        }
    }
}

#[async_trait]
impl MultiAcceptor for DirectAcceptor {
    async fn accept_multi_batch(
        &self,
        ctx: &Context,
        batch: &MultiBatch,
        opts: &AcceptOptions,
    ) -> Result<(), AcceptError> {
        for table_batch in &batch.batches {
            self.accept_table_batch(ctx, table_batch, opts).await?;
        }
        Ok(())
    }
}
