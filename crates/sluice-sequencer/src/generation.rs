//! Generations: one schema snapshot's worth of sub-sequencers.
//!
//! Every schema publication gets its own [`Generation`]: a nested
//! context, one sub-sequencer per FK component, and the routing table
//! from table to component acceptor. Retiring a generation stops its
//! nested context as a unit and waits (bounded by the grace period) for
//! the sweepers, lease holders, and stat fanouts it spawned.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use sluice_core::accept::{AcceptOptions, MultiAcceptor};
use sluice_core::config::SequencerConfig;
use sluice_core::error::AcceptError;
use sluice_core::ident::TableId;
use sluice_core::mutation::{MultiBatch, TableBatch};
use sluice_core::notify::Var;
use sluice_core::schema::SchemaData;
use sluice_core::stopper::Context;

use crate::direct::DirectAcceptor;
use crate::errors::SequencerError;
use crate::sequencer::{Sequencer, StartOptions, TableGroup};
use crate::stat::{fan_stats, Stat};

/// One live set of per-component sub-sequencers.
pub struct Generation {
    ctx: Context,
    schema: SchemaData,
    routes: Vec<Arc<dyn MultiAcceptor>>,
    by_table: HashMap<TableId, usize>,
    grace: Duration,
}

impl Generation {
    /// Builds a generation against `schema`.
    ///
    /// Starts the inner sequencer once per component (its group's table
    /// list is the component's topological order, its deferred-timestamp
    /// limit the configured one), wraps singleton components in the
    /// direct path, and fans each sub-stat into `agg`.
    ///
    /// # Errors
    ///
    /// Propagates the first inner start failure; sub-sequencers started
    /// before the failure stop when the nested context is dropped.
    pub(crate) async fn build(
        parent: &Context,
        cfg: &SequencerConfig,
        inner: &Arc<dyn Sequencer>,
        opts: &StartOptions,
        schema: SchemaData,
        agg: &Arc<Var<Stat>>,
    ) -> Result<Arc<Self>, SequencerError> {
        let ctx = parent.child();
        let mut routes: Vec<Arc<dyn MultiAcceptor>> = Vec::new();
        let mut by_table = HashMap::new();

        for component in &schema.components {
            let sub_opts = StartOptions {
                group: TableGroup::new(
                    format!("{}/{}", opts.group.name, component.group_name()),
                    component.order.clone(),
                ),
                bounds: Arc::clone(&opts.bounds),
                delegate: Arc::clone(&opts.delegate),
                max_deferred: cfg.timestamp_limit,
            };
            let (sub_acceptor, sub_stats) = inner.start(&ctx, sub_opts).await?;

            // A table with no FK neighbors can try the target directly;
            // everything else goes through staging.
            let route: Arc<dyn MultiAcceptor> = if component.is_singleton() {
                Arc::new(DirectAcceptor::new(
                    Arc::clone(&opts.delegate),
                    sub_acceptor,
                ))
            } else {
                sub_acceptor
            };

            fan_stats(&ctx, &sub_stats, Arc::clone(agg));

            let idx = routes.len();
            routes.push(route);
            for table in &component.order {
                by_table.insert(table.clone(), idx);
            }
        }

        Ok(Arc::new(Self {
            ctx,
            schema,
            routes,
            by_table,
            grace: cfg.task_grace_period,
        }))
    }

    /// The schema snapshot this generation was built against.
    #[must_use]
    pub fn schema(&self) -> &SchemaData {
        &self.schema
    }

    /// Routes one table's batch to its component acceptor.
    pub(crate) async fn dispatch_table(
        &self,
        ctx: &Context,
        batch: &TableBatch,
        opts: &AcceptOptions,
    ) -> Result<(), AcceptError> {
        let route = self
            .by_table
            .get(&batch.table)
            .and_then(|&idx| self.routes.get(idx))
            .ok_or_else(|| AcceptError::Unroutable(batch.table.clone()))?;
        route.accept_table_batch(ctx, batch, opts).await
    }

    /// Partitions a multi-table batch by component and forwards each
    /// slice to its acceptor.
    pub(crate) async fn dispatch_multi(
        &self,
        ctx: &Context,
        batch: &MultiBatch,
        opts: &AcceptOptions,
    ) -> Result<(), AcceptError> {
        let mut per_component: Vec<Option<MultiBatch>> = vec![None; self.routes.len()];
        for table_batch in &batch.batches {
            let idx = *self
                .by_table
                .get(&table_batch.table)
                .ok_or_else(|| AcceptError::Unroutable(table_batch.table.clone()))?;
            per_component[idx]
                .get_or_insert_with(MultiBatch::new)
                .batches
                .push(table_batch.clone());
        }
        for (idx, slice) in per_component.into_iter().enumerate() {
            if let Some(slice) = slice {
                self.routes[idx]
                    .accept_multi_batch(ctx, &slice, opts)
                    .await?;
            }
        }
        Ok(())
    }

    /// Stops the nested context and waits for its tasks, bounded by the
    /// grace period. Returns `false` when stragglers were abandoned.
    pub async fn shutdown(&self) -> bool {
        self.ctx.stop_and_wait(self.grace).await
    }
}

impl std::fmt::Debug for Generation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Generation")
            .field("components", &self.routes.len())
            .field("tables", &self.by_table.len())
            .finish_non_exhaustive()
    }
}
