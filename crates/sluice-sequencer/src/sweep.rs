//! The per-component sweeper sequencer.
//!
//! [`Sweeper`] is the inner unit the best-effort router federates over:
//! given one FK-connected group of tables, it acquires the group lease,
//! runs an independent sweep loop per table, and exposes the staging
//! acceptor incoming mutations should be written through. Sweep loops
//! drain the staging buffer a page at a time, apply each mutation as a
//! single-row batch, and mark the successes applied.

use std::collections::HashMap;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::{trace, warn};

use sluice_core::accept::{AcceptOptions, MultiAcceptor, TableAcceptor};
use sluice_core::config::SequencerConfig;
use sluice_core::hlc::{Hlc, HlcRange};
use sluice_core::ident::TableId;
use sluice_core::lease::Leases;
use sluice_core::mutation::{Mutation, TableBatch};
use sluice_core::notify::Var;
use sluice_core::stage::{Stagers, UnstageCursor};
use sluice_core::stopper::Context;

use crate::errors::{is_deferrable, SequencerError};
use crate::leasing::lease_group;
use crate::metrics::SweepMetrics;
use crate::sequencer::{Sequencer, StartOptions};
use crate::staged::{OrderedAcceptor, StagingAcceptor};
use crate::stat::Stat;

/// Sweeps staged mutations for one table group under its lease.
pub struct Sweeper {
    cfg: SequencerConfig,
    leases: Arc<dyn Leases>,
    stagers: Arc<dyn Stagers>,
    metrics: Mutex<HashMap<String, Arc<SweepMetrics>>>,
}

impl Sweeper {
    /// Creates a sweeper sequencer.
    pub fn new(cfg: SequencerConfig, leases: Arc<dyn Leases>, stagers: Arc<dyn Stagers>) -> Self {
        Self {
            cfg,
            leases,
            stagers,
            metrics: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the metrics for `group`, creating them on first use.
    #[must_use]
    pub fn metrics_for(&self, group: &str) -> Arc<SweepMetrics> {
        Arc::clone(
            self.metrics
                .lock()
                .entry(group.to_string())
                .or_insert_with(|| Arc::new(SweepMetrics::new())),
        )
    }
}

#[async_trait]
impl Sequencer for Sweeper {
    async fn start(
        &self,
        ctx: &Context,
        opts: StartOptions,
    ) -> Result<(Arc<dyn MultiAcceptor>, Arc<Var<Stat>>), SequencerError> {
        let stats = Arc::new(Var::new(Stat::new(opts.group.name.clone())));
        let metrics = self.metrics_for(&opts.group.name);

        let outer = ctx.clone();
        let cfg = self.cfg.clone();
        let leases = Arc::clone(&self.leases);
        let stagers = Arc::clone(&self.stagers);
        let group = opts.group.clone();
        let bounds = Arc::clone(&opts.bounds);
        let delegate = Arc::clone(&opts.delegate);
        let shared_stats = Arc::clone(&stats);
        let max_deferred = opts.max_deferred;

        ctx.spawn(async move {
            let grace = cfg.task_grace_period;
            let body_cfg = cfg.clone();
            lease_group(
                &outer,
                leases,
                group.name.clone(),
                grace,
                move |sweep_ctx| {
                    for table in group.tables.clone() {
                        trace!(table = %table, "sweeper starting");
                        sweep_ctx.spawn(sweep_table(
                            sweep_ctx.clone(),
                            body_cfg.clone(),
                            table,
                            Arc::clone(&bounds),
                            Arc::clone(&shared_stats),
                            Arc::clone(&stagers),
                            Arc::clone(&delegate),
                            Arc::clone(&metrics),
                            max_deferred,
                        ));
                    }
                },
            )
            .await;
        });

        let staging: Arc<dyn TableAcceptor> =
            Arc::new(StagingAcceptor::new(Arc::clone(&self.stagers)));
        let acceptor: Arc<dyn MultiAcceptor> =
            Arc::new(OrderedAcceptor::new(opts.group.tables, staging));
        Ok((acceptor, stats))
    }
}

/// One table's sweep loop: on-change-or-interval over the bounds, with
/// a quiescent period between cycles.
#[allow(clippy::too_many_arguments)]
async fn sweep_table(
    ctx: Context,
    cfg: SequencerConfig,
    table: TableId,
    bounds: Arc<Var<HlcRange>>,
    stats: Arc<Var<Stat>>,
    stagers: Arc<dyn Stagers>,
    delegate: Arc<dyn TableAcceptor>,
    metrics: Arc<SweepMetrics>,
    max_deferred: usize,
) {
    let mut rx = bounds.subscribe();
    loop {
        tokio::select! {
            () = ctx.stopping() => break,
            changed = rx.changed() => {
                if changed.is_err() {
                    break;
                }
            }
            () = tokio::time::sleep(cfg.quiescent_period) => {}
        }
        // Idle until the source produces a resolvable window.
        let bound = *rx.borrow_and_update();
        if bound.is_empty() {
            continue;
        }

        match sweep_once(
            &ctx,
            &cfg,
            &table,
            bound,
            &stagers,
            &delegate,
            &metrics,
            max_deferred,
        )
        .await
        {
            Ok(outcome) => {
                let _ = stats.update::<()>(|old| {
                    let mut next = old.clone();
                    next.attempted += outcome.attempted;
                    next.applied += outcome.applied;
                    next.note_progress(&table, outcome.last_time);
                    Ok(next)
                });
            }
            Err(err) => {
                // The bounds are still in place; the next cycle retries.
                warn!(table = %table, error = %err, "error while sweeping table; will continue");
            }
        }
    }
    trace!(table = %table, "sweeper stopping");
}

#[derive(Debug, Default)]
struct SweepOutcome {
    attempted: u64,
    applied: u64,
    last_time: Hlc,
}

/// A single pass over the deferred, un-leased mutations in the window.
#[allow(clippy::too_many_arguments)]
async fn sweep_once(
    ctx: &Context,
    cfg: &SequencerConfig,
    table: &TableId,
    bound: HlcRange,
    stagers: &Arc<dyn Stagers>,
    delegate: &Arc<dyn TableAcceptor>,
    metrics: &SweepMetrics,
    max_deferred: usize,
) -> Result<SweepOutcome, SequencerError> {
    trace!(table = %table, bound = %bound, "sweep starting");
    metrics.sweeps.fetch_add(1, Ordering::Relaxed);

    let marker = stagers.get(ctx, table).await?;
    let mut outcome = SweepOutcome::default();
    let mut cursor = UnstageCursor::new(table.clone(), bound.min(), bound.max_exclusive());
    cursor.update_limit = cfg.sweep_limit;
    cursor.timestamp_limit = max_deferred;

    let mut has_more = true;
    while has_more && !ctx.is_stopping() {
        // Reserve each row for a quiescent period: an upper bound on
        // the rate at which any one mutation is retried.
        cursor.lease_expiry = Instant::now() + cfg.quiescent_period;

        let mut pending: Vec<Mutation> = Vec::new();
        let (next, more) = stagers
            .unstage(ctx, cursor, &mut |_, m| pending.push(m))
            .await?;
        cursor = next;
        has_more = more;
        outcome.attempted += pending.len() as u64;

        // Filter-in-place: compact the successfully applied mutations
        // into the prefix so they can be marked in one call.
        let mut success = 0usize;
        let mut interrupted = false;
        for idx in 0..pending.len() {
            // Everything here has been deferred at least once, so
            // single-row batches lose nothing: an FK failure is
            // per-row, and a wider batch would abort wholesale on one
            // offending row.
            let batch = TableBatch::single(table.clone(), pending[idx].clone());
            match delegate
                .accept_table_batch(ctx, &batch, &AcceptOptions::default())
                .await
            {
                Ok(()) => {
                    pending.swap(success, idx);
                    success += 1;
                }
                Err(err) if err.is_stopped() => {
                    interrupted = true;
                    break;
                }
                Err(err) if is_deferrable(&err) => {
                    // Quiet retry later; the row lease stays intact so
                    // the mutation is skipped until it expires.
                    metrics.deferrals.fetch_add(1, Ordering::Relaxed);
                }
                Err(err) => {
                    warn!(
                        table = %table,
                        key = %pending[idx].key_string(),
                        error = %err,
                        "will retry mutation later"
                    );
                    metrics.errors.fetch_add(1, Ordering::Relaxed);
                }
            }
        }

        if success == 0 {
            // No forward progress on this page.
            break;
        }
        marker.mark_applied(ctx, &pending[..success]).await?;
        outcome.applied += success as u64;
        if interrupted {
            break;
        }
    }

    outcome.last_time = cursor.end_before;
    metrics
        .attempted
        .fetch_add(outcome.attempted, Ordering::Relaxed);
    metrics.applied.fetch_add(outcome.applied, Ordering::Relaxed);
    trace!(
        table = %table,
        applied = outcome.applied,
        attempted = outcome.attempted,
        "sweep completed"
    );
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use bytes::Bytes;
    use sluice_core::error::AcceptError;
    use sluice_core::target::TargetError;
    use sluice_core::Stager;
    use sluice_staging::{MemoryLeases, MemoryStagers};

    fn t() -> TableId {
        TableId::new("public", "t")
    }

    fn upsert(id: u32, wall: i64) -> Mutation {
        Mutation::upsert(
            Bytes::from(format!("[{id}]")),
            Bytes::from(format!("{{\"id\":{id}}}")),
            Hlc::new(wall, 0),
        )
    }

    /// Scripted per-key acceptor: keys in `failing` fail once with the
    /// configured error; keys in `defer_keys` defer on every attempt.
    #[derive(Default)]
    struct Script {
        failing: Mutex<HashMap<String, AcceptError>>,
        defer_keys: Mutex<Vec<String>>,
        accepted: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl TableAcceptor for Script {
        async fn accept_table_batch(
            &self,
            _ctx: &Context,
            batch: &TableBatch,
            _opts: &AcceptOptions,
        ) -> Result<(), AcceptError> {
            let key = batch.data[0].key_string();
            if self.defer_keys.lock().contains(&key) {
                return Err(AcceptError::from(TargetError::postgres("23503", "fk")));
            }
            if let Some(err) = self.failing.lock().remove(&key) {
                return Err(err);
            }
            self.accepted.lock().push(key);
            Ok(())
        }
    }

    fn quick_cfg() -> SequencerConfig {
        SequencerConfig {
            quiescent_period: Duration::from_millis(50),
            ..SequencerConfig::default()
        }
    }

    #[tokio::test]
    async fn test_sweep_once_applies_and_marks() {
        let ctx = Context::root();
        let stagers = MemoryStagers::new();
        let stager = stagers.stager(&t());
        let muts = vec![upsert(1, 10), upsert(2, 10), upsert(3, 10)];
        stager.stage(&ctx, &muts).await.unwrap();

        let script = Arc::new(Script::default());
        let delegate: Arc<dyn TableAcceptor> = Arc::clone(&script) as _;
        let stagers_dyn: Arc<dyn Stagers> = Arc::new(stagers.clone());
        let metrics = SweepMetrics::new();

        let outcome = sweep_once(
            &ctx,
            &quick_cfg(),
            &t(),
            HlcRange::new(Hlc::ZERO, Hlc::new(100, 0)),
            &stagers_dyn,
            &delegate,
            &metrics,
            usize::MAX,
        )
        .await
        .unwrap();

        assert_eq!(outcome.attempted, 3);
        assert_eq!(outcome.applied, 3);
        assert_eq!(outcome.last_time, Hlc::new(100, 0));
        assert_eq!(stager.pending_count(), 0);
        assert_eq!(metrics.snapshot().applied, 3);
    }

    #[tokio::test]
    async fn test_deferrable_rows_stay_staged_and_leased() {
        let ctx = Context::root();
        let stagers = MemoryStagers::new();
        let stager = stagers.stager(&t());
        stager
            .stage(&ctx, &[upsert(1, 10), upsert(2, 10)])
            .await
            .unwrap();

        let script = Arc::new(Script::default());
        script.failing.lock().insert(
            "[1]".into(),
            AcceptError::from(TargetError::postgres("23503", "fk")),
        );
        let delegate: Arc<dyn TableAcceptor> = Arc::clone(&script) as _;
        let stagers_dyn: Arc<dyn Stagers> = Arc::new(stagers.clone());
        let metrics = SweepMetrics::new();

        let outcome = sweep_once(
            &ctx,
            &quick_cfg(),
            &t(),
            HlcRange::new(Hlc::ZERO, Hlc::new(100, 0)),
            &stagers_dyn,
            &delegate,
            &metrics,
            usize::MAX,
        )
        .await
        .unwrap();

        assert_eq!(outcome.attempted, 2);
        assert_eq!(outcome.applied, 1);
        assert_eq!(outcome.last_time, Hlc::new(100, 0));
        assert_eq!(metrics.snapshot().deferrals, 1);
        assert_eq!(metrics.snapshot().errors, 0);
        // The deferred row remains pending, under its row lease.
        assert_eq!(stager.pending_count(), 1);
        assert_eq!(stager.leased_count(), 1);

        // After lease expiry a second sweep retries and succeeds.
        stager.expire_leases();
        let outcome = sweep_once(
            &ctx,
            &quick_cfg(),
            &t(),
            HlcRange::new(Hlc::ZERO, Hlc::new(100, 0)),
            &stagers_dyn,
            &delegate,
            &metrics,
            usize::MAX,
        )
        .await
        .unwrap();
        assert_eq!(outcome.applied, 1);
        assert_eq!(stager.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_transient_errors_are_logged_not_fatal() {
        let ctx = Context::root();
        let stagers = MemoryStagers::new();
        let stager = stagers.stager(&t());
        stager
            .stage(&ctx, &[upsert(1, 10), upsert(2, 10)])
            .await
            .unwrap();

        let script = Arc::new(Script::default());
        script.failing.lock().insert(
            "[2]".into(),
            AcceptError::from(TargetError::other("connection reset")),
        );
        let delegate: Arc<dyn TableAcceptor> = Arc::clone(&script) as _;
        let stagers_dyn: Arc<dyn Stagers> = Arc::new(stagers.clone());
        let metrics = SweepMetrics::new();

        let outcome = sweep_once(
            &ctx,
            &quick_cfg(),
            &t(),
            HlcRange::new(Hlc::ZERO, Hlc::new(100, 0)),
            &stagers_dyn,
            &delegate,
            &metrics,
            usize::MAX,
        )
        .await
        .unwrap();

        assert_eq!(outcome.applied, 1);
        assert_eq!(metrics.snapshot().errors, 1);
        assert_eq!(metrics.snapshot().deferrals, 0);
        assert_eq!(stager.pending_count(), 1);
    }

    #[tokio::test]
    async fn test_replay_of_applied_set_is_a_noop() {
        let ctx = Context::root();
        let stagers = MemoryStagers::new();
        let stager = stagers.stager(&t());
        stager.stage(&ctx, &[upsert(1, 10)]).await.unwrap();

        let script = Arc::new(Script::default());
        let delegate: Arc<dyn TableAcceptor> = Arc::clone(&script) as _;
        let stagers_dyn: Arc<dyn Stagers> = Arc::new(stagers.clone());
        let metrics = SweepMetrics::new();
        let bound = HlcRange::new(Hlc::ZERO, Hlc::new(100, 0));

        let first = sweep_once(
            &ctx,
            &quick_cfg(),
            &t(),
            bound,
            &stagers_dyn,
            &delegate,
            &metrics,
            usize::MAX,
        )
        .await
        .unwrap();
        assert_eq!(first.applied, 1);

        // Replaying the identical window finds nothing to do.
        let second = sweep_once(
            &ctx,
            &quick_cfg(),
            &t(),
            bound,
            &stagers_dyn,
            &delegate,
            &metrics,
            usize::MAX,
        )
        .await
        .unwrap();
        assert_eq!(second.attempted, 0);
        assert_eq!(second.applied, 0);
    }

    #[tokio::test]
    async fn test_progress_records_window_bound_past_deferred_rows() {
        let ctx = Context::root();
        let stagers = MemoryStagers::new();
        let stager = stagers.stager(&t());
        stager
            .stage(&ctx, &[upsert(1, 10), upsert(2, 10)])
            .await
            .unwrap();

        let script = Arc::new(Script::default());
        script.defer_keys.lock().push("[1]".into());
        let stats = Arc::new(Var::new(Stat::new("grp")));
        let bounds = Arc::new(Var::new(HlcRange::new(Hlc::ZERO, Hlc::new(100, 0))));
        let stagers_dyn: Arc<dyn Stagers> = Arc::new(stagers.clone());
        let metrics = Arc::new(SweepMetrics::new());

        let task = tokio::spawn(sweep_table(
            ctx.clone(),
            quick_cfg(),
            t(),
            Arc::clone(&bounds),
            Arc::clone(&stats),
            stagers_dyn,
            Arc::clone(&script) as Arc<dyn TableAcceptor>,
            Arc::clone(&metrics),
            usize::MAX,
        ));

        let deadline = tokio::time::Instant::now() + Duration::from_secs(3);
        while stats.get().applied < 1 {
            assert!(tokio::time::Instant::now() < deadline, "sweep never applied");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        // The cycle left "[1]" deferred and staged, yet the stat still
        // records lastTime = the window's upper bound.
        let stat = stats.get();
        assert_eq!(stat.progress[&t()], Hlc::new(100, 0));
        assert_eq!(stat.applied, 1);
        assert!(metrics.snapshot().deferrals >= 1);
        assert_eq!(stager.pending_count(), 1);

        ctx.stop();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_sweeper_start_runs_end_to_end() {
        let ctx = Context::root();
        let stagers = MemoryStagers::new();
        let leases = MemoryLeases::new(Duration::from_secs(5));
        let sweeper = Sweeper::new(
            quick_cfg(),
            Arc::new(leases),
            Arc::new(stagers.clone()),
        );

        let script = Arc::new(Script::default());
        let bounds = Arc::new(Var::new(HlcRange::new(
            Hlc::new(1, 0),
            Hlc::new(100, 0),
        )));
        let opts = StartOptions {
            group: crate::sequencer::TableGroup::new("grp", vec![t()]),
            bounds,
            delegate: Arc::clone(&script) as _,
            max_deferred: usize::MAX,
        };

        let (acceptor, stats) = sweeper.start(&ctx, opts).await.unwrap();

        // Write through the returned acceptor: the batch is staged.
        let batch = TableBatch::single(t(), upsert(7, 10));
        acceptor
            .accept_table_batch(&ctx, &batch, &AcceptOptions::default())
            .await
            .unwrap();

        // The sweep loop picks it up and applies it.
        let deadline = tokio::time::Instant::now() + Duration::from_secs(3);
        while stats.get().applied < 1 {
            assert!(tokio::time::Instant::now() < deadline, "sweep never applied");
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(*script.accepted.lock(), vec!["[7]".to_string()]);
        assert_eq!(stats.get().progress[&t()], Hlc::new(100, 0));

        assert!(ctx.stop_and_wait(Duration::from_secs(2)).await);
    }
}
