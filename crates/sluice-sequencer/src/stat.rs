//! Progress stats and their aggregation.
//!
//! Each sub-sequencer publishes a cumulative [`Stat`]; the router fans
//! every sub-stat into one aggregated observable. Per-table progress is
//! monotone: a late-arriving update can never move a table's high-water
//! mark backwards.

use std::collections::HashMap;

use tracing::trace;

use sluice_core::hlc::Hlc;
use sluice_core::ident::TableId;
use sluice_core::notify::Var;
use sluice_core::stopper::Context;

/// Cumulative progress for one group.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Stat {
    /// The group this stat describes.
    pub group: String,
    /// Per-table progress high-water marks.
    pub progress: HashMap<TableId, Hlc>,
    /// Mutations presented to the downstream acceptor.
    pub attempted: u64,
    /// Mutations successfully applied and marked.
    pub applied: u64,
}

impl Stat {
    /// Creates an empty stat for `group`.
    pub fn new(group: impl Into<String>) -> Self {
        Self {
            group: group.into(),
            ..Self::default()
        }
    }

    /// Advances a table's progress mark, never regressing it.
    pub fn note_progress(&mut self, table: &TableId, time: Hlc) {
        let slot = self.progress.entry(table.clone()).or_insert(Hlc::ZERO);
        if time > *slot {
            *slot = time;
        }
    }
}

/// Copies changes from a sub-sequencer's stat into the aggregate.
///
/// Runs until `ctx` stops or the sub-stat's publisher goes away. The
/// task tracks the last snapshot it merged, so counter increments are
/// applied exactly once; progress entries merge via max. A retired
/// generation's fanout task stops with the generation, after which its
/// sub-stat can no longer influence the aggregate.
pub(crate) fn fan_stats(ctx: &Context, sub: &Var<Stat>, agg: std::sync::Arc<Var<Stat>>) {
    let mut rx = sub.subscribe();
    let inner = ctx.clone();
    ctx.spawn(async move {
        let mut last = Stat::default();
        loop {
            tokio::select! {
                () = inner.stopping() => break,
                changed = rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
            let current = rx.borrow_and_update().clone();
            let attempted_delta = current.attempted.saturating_sub(last.attempted);
            let applied_delta = current.applied.saturating_sub(last.applied);

            let merged = agg.update::<()>(|old| {
                let mut next = old.clone();
                next.attempted += attempted_delta;
                next.applied += applied_delta;
                for (table, time) in &current.progress {
                    next.note_progress(table, *time);
                }
                Ok(next)
            });
            if let Ok(next) = merged {
                trace!(
                    group = %next.group,
                    attempted = next.attempted,
                    applied = next.applied,
                    "merged sub-sequencer stat"
                );
            }
            last = current;
        }
    });
}
