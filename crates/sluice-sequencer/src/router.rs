//! The best-effort router.
//!
//! [`BestEffort`] federates the per-component [`Sweeper`] across the
//! whole table set: it partitions tables by FK connectivity, runs one
//! sub-sequencer per component inside a [`Generation`], routes incoming
//! mutations to the right component, and reacts to schema publications
//! by atomically swapping in a freshly built generation. Cross-table
//! ordering is deliberately relaxed to whatever each component
//! enforces; that relaxation is where the throughput comes from.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{info, trace, warn};

use sluice_core::accept::{AcceptOptions, MultiAcceptor, TableAcceptor};
use sluice_core::config::SequencerConfig;
use sluice_core::hlc::Hlc;
use sluice_core::lease::Leases;
use sluice_core::mutation::{MultiBatch, TableBatch};
use sluice_core::notify::Var;
use sluice_core::schema::SchemaWatcher;
use sluice_core::stage::Stagers;
use sluice_core::stopper::Context;

use crate::errors::SequencerError;
use crate::generation::Generation;
use crate::sequencer::{Sequencer, StartOptions};
use crate::stat::Stat;
use crate::sweep::Sweeper;

/// A clock used to synthesize resolved bounds before the source
/// delivers its first checkpoint.
pub type TimeSource = Arc<dyn Fn() -> Hlc + Send + Sync>;

/// Best-effort sequencer over FK-connected components.
pub struct BestEffort {
    cfg: SequencerConfig,
    leases: Arc<dyn Leases>,
    stagers: Arc<dyn Stagers>,
    watcher: Arc<dyn SchemaWatcher>,
    time_source: TimeSource,
}

impl BestEffort {
    /// Creates a router over the given collaborators.
    pub fn new(
        cfg: SequencerConfig,
        leases: Arc<dyn Leases>,
        stagers: Arc<dyn Stagers>,
        watcher: Arc<dyn SchemaWatcher>,
    ) -> Self {
        Self {
            cfg,
            leases,
            stagers,
            watcher,
            time_source: Arc::new(Hlc::wall_now),
        }
    }

    /// Overrides the clock behind synthetic bounds proposals.
    #[must_use]
    pub fn with_time_source(mut self, time_source: TimeSource) -> Self {
        self.time_source = time_source;
        self
    }
}

#[async_trait]
impl Sequencer for BestEffort {
    async fn start(
        &self,
        ctx: &Context,
        opts: StartOptions,
    ) -> Result<(Arc<dyn MultiAcceptor>, Arc<Var<Stat>>), SequencerError> {
        let stats = Arc::new(Var::new(Stat::new(opts.group.name.clone())));
        let inner: Arc<dyn Sequencer> = Arc::new(Sweeper::new(
            self.cfg.clone(),
            Arc::clone(&self.leases),
            Arc::clone(&self.stagers),
        ));

        let initial = Generation::build(
            ctx,
            &self.cfg,
            &inner,
            &opts,
            self.watcher.snapshot(),
            &stats,
        )
        .await?;
        let current = Arc::new(Var::new(Arc::clone(&initial)));

        self.watch_schema(ctx, &inner, &opts, &current, &stats);
        if opts.bounds.get().min().is_zero() {
            self.propose_synthetic_bounds(ctx, &opts);
        }

        let acceptor: Arc<dyn MultiAcceptor> = Arc::new(RouterAcceptor {
            current: Arc::clone(&current),
        });
        Ok((acceptor, stats))
    }
}

impl BestEffort {
    /// Spawns the long-lived task that regenerates on schema change.
    fn watch_schema(
        &self,
        ctx: &Context,
        inner: &Arc<dyn Sequencer>,
        opts: &StartOptions,
        current: &Arc<Var<Arc<Generation>>>,
        stats: &Arc<Var<Stat>>,
    ) {
        let task_ctx = ctx.clone();
        let cfg = self.cfg.clone();
        let inner = Arc::clone(inner);
        let opts = opts.clone();
        let current = Arc::clone(current);
        let stats = Arc::clone(stats);
        let mut rx = self.watcher.notify().subscribe();

        ctx.spawn(async move {
            loop {
                tokio::select! {
                    () = task_ctx.stopping() => break,
                    changed = rx.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                }
                let schema = rx.borrow_and_update().clone();
                if schema == *current.get().schema() {
                    continue;
                }

                match Generation::build(&task_ctx, &cfg, &inner, &opts, schema, &stats).await {
                    Ok(next) => {
                        let previous = current.get();
                        // Swap is atomic: writers see either the old or
                        // the new generation, never a mix.
                        current.set(Arc::clone(&next));
                        info!(
                            components = next.schema().components.len(),
                            "schema changed; new generation routing"
                        );
                        if !previous.shutdown().await {
                            warn!("retired generation did not stop within grace period");
                        }
                    }
                    Err(err) => {
                        warn!(error = %err, "unable to start generation for new schema");
                    }
                }
            }
        });
    }

    /// Spawns the 1 Hz synthetic-bounds proposer. It exits for good
    /// once the source delivers a real checkpoint.
    fn propose_synthetic_bounds(&self, ctx: &Context, opts: &StartOptions) {
        let task_ctx = ctx.clone();
        let bounds = Arc::clone(&opts.bounds);
        let time_source = Arc::clone(&self.time_source);

        ctx.spawn(async move {
            loop {
                tokio::select! {
                    () = task_ctx.stopping() => return,
                    () = tokio::time::sleep(Duration::from_secs(1)) => {}
                }
                let proposed = time_source();
                let still_synthetic = bounds
                    .update(|range| {
                        if range.min().is_zero() {
                            Ok(range.extended_to(proposed))
                        } else {
                            Err(())
                        }
                    })
                    .is_ok();
                if !still_synthetic {
                    trace!("first checkpoint arrived; synthetic bounds task exiting");
                    return;
                }
            }
        });
    }
}

/// The acceptor handed to callers: looks up the component enclosing the
/// target table in the current generation and delegates.
struct RouterAcceptor {
    current: Arc<Var<Arc<Generation>>>,
}

#[async_trait]
impl TableAcceptor for RouterAcceptor {
    async fn accept_table_batch(
        &self,
        ctx: &Context,
        batch: &TableBatch,
        opts: &AcceptOptions,
    ) -> Result<(), sluice_core::error::AcceptError> {
        self.current.get().dispatch_table(ctx, batch, opts).await
    }
}

#[async_trait]
impl MultiAcceptor for RouterAcceptor {
    async fn accept_multi_batch(
        &self,
        ctx: &Context,
        batch: &MultiBatch,
        opts: &AcceptOptions,
    ) -> Result<(), sluice_core::error::AcceptError> {
        self.current.get().dispatch_multi(ctx, batch, opts).await
    }
}
