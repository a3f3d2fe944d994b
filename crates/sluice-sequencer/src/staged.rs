//! The staging acceptor: writes incoming mutations into the buffer.
//!
//! This is the default path for every multi-table component and the
//! fallback for singletons whose direct attempt deferred. Staged
//! mutations are picked up by the per-table sweepers.

use std::sync::Arc;

use async_trait::async_trait;

use sluice_core::accept::{AcceptOptions, MultiAcceptor, TableAcceptor};
use sluice_core::error::AcceptError;
use sluice_core::ident::TableId;
use sluice_core::mutation::{MultiBatch, TableBatch};
use sluice_core::stage::Stagers;
use sluice_core::stopper::Context;

/// Stages batches instead of applying them.
pub(crate) struct StagingAcceptor {
    stagers: Arc<dyn Stagers>,
}

impl StagingAcceptor {
    pub(crate) fn new(stagers: Arc<dyn Stagers>) -> Self {
        Self { stagers }
    }
}

#[async_trait]
impl TableAcceptor for StagingAcceptor {
    async fn accept_table_batch(
        &self,
        ctx: &Context,
        batch: &TableBatch,
        _opts: &AcceptOptions,
    ) -> Result<(), AcceptError> {
        if batch.is_empty() {
            return Ok(());
        }
        let stager = self.stagers.get(ctx, &batch.table).await?;
        stager.stage(ctx, &batch.data).await?;
        Ok(())
    }
}

/// Forwards per-table batches in a fixed table order.
///
/// The order is the component's topological order, so parent tables are
/// presented before their children within one multi-batch. Tables
/// outside the order are rejected rather than silently appended.
pub(crate) struct OrderedAcceptor {
    order: Vec<TableId>,
    delegate: Arc<dyn TableAcceptor>,
}

impl OrderedAcceptor {
    pub(crate) fn new(order: Vec<TableId>, delegate: Arc<dyn TableAcceptor>) -> Self {
        Self { order, delegate }
    }
}

#[async_trait]
impl TableAcceptor for OrderedAcceptor {
    async fn accept_table_batch(
        &self,
        ctx: &Context,
        batch: &TableBatch,
        opts: &AcceptOptions,
    ) -> Result<(), AcceptError> {
        if !self.order.contains(&batch.table) {
            return Err(AcceptError::Unroutable(batch.table.clone()));
        }
        self.delegate.accept_table_batch(ctx, batch, opts).await
    }
}

#[async_trait]
impl MultiAcceptor for OrderedAcceptor {
    async fn accept_multi_batch(
        &self,
        ctx: &Context,
        batch: &MultiBatch,
        opts: &AcceptOptions,
    ) -> Result<(), AcceptError> {
        for table in &self.order {
            for table_batch in batch.batches.iter().filter(|b| &b.table == table) {
                self.delegate
                    .accept_table_batch(ctx, table_batch, opts)
                    .await?;
            }
        }
        if let Some(stray) = batch
            .batches
            .iter()
            .find(|b| !self.order.contains(&b.table))
        {
            return Err(AcceptError::Unroutable(stray.table.clone()));
        }
        Ok(())
    }
}
