//! In-memory staging buffers.
//!
//! [`MemoryStagers`] keeps one ordered buffer per table, with the same
//! lease discipline a persistent store would enforce: unstaging hands
//! out only pending, un-leased rows and installs a per-row lease until
//! the cursor's deadline. Used by integration tests and embedded
//! single-process deployments.

use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;

use sluice_core::error::StageError;
use sluice_core::hlc::Hlc;
use sluice_core::ident::TableId;
use sluice_core::mutation::Mutation;
use sluice_core::stage::{Stager, Stagers, UnstageCallback, UnstageCursor};
use sluice_core::stopper::Context;

#[derive(Debug, Clone)]
struct StagedRow {
    data: Bytes,
    lease_until: Option<Instant>,
    applied: bool,
}

type TableBuffer = BTreeMap<(Hlc, Bytes), StagedRow>;

/// One table's in-memory staging buffer.
#[derive(Debug, Default)]
pub struct MemoryStager {
    rows: Mutex<TableBuffer>,
}

impl MemoryStager {
    /// Number of rows staged and not yet marked applied.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.rows.lock().values().filter(|r| !r.applied).count()
    }

    /// Number of pending rows currently under an unexpired lease.
    #[must_use]
    pub fn leased_count(&self) -> usize {
        let now = Instant::now();
        self.rows
            .lock()
            .values()
            .filter(|r| !r.applied && r.lease_until.is_some_and(|until| until > now))
            .count()
    }

    /// Expires every outstanding row lease, making rows immediately
    /// re-eligible. Test helper standing in for the passage of time.
    pub fn expire_leases(&self) {
        for row in self.rows.lock().values_mut() {
            row.lease_until = None;
        }
    }
}

#[async_trait]
impl Stager for MemoryStager {
    async fn stage(&self, _ctx: &Context, muts: &[Mutation]) -> Result<(), StageError> {
        let mut rows = self.rows.lock();
        for m in muts {
            match rows.entry((m.time, m.key.clone())) {
                Entry::Vacant(slot) => {
                    slot.insert(StagedRow {
                        data: m.data.clone(),
                        lease_until: None,
                        applied: false,
                    });
                }
                Entry::Occupied(mut slot) => {
                    // Re-staging the same key@time replaces the payload
                    // but never resurrects an applied row.
                    let row = slot.get_mut();
                    if !row.applied {
                        row.data = m.data.clone();
                    }
                }
            }
        }
        Ok(())
    }

    async fn mark_applied(&self, _ctx: &Context, muts: &[Mutation]) -> Result<(), StageError> {
        let mut rows = self.rows.lock();
        for m in muts {
            if let Some(row) = rows.get_mut(&(m.time, m.key.clone())) {
                row.applied = true;
                row.lease_until = None;
            }
        }
        Ok(())
    }
}

/// Factory over per-table in-memory buffers.
#[derive(Debug, Default, Clone)]
pub struct MemoryStagers {
    tables: Arc<Mutex<HashMap<TableId, Arc<MemoryStager>>>>,
}

impl MemoryStagers {
    /// Creates an empty set of buffers.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the buffer for `table`, creating it if needed. The
    /// synchronous twin of [`Stagers::get`] for test setup.
    #[must_use]
    pub fn stager(&self, table: &TableId) -> Arc<MemoryStager> {
        Arc::clone(
            self.tables
                .lock()
                .entry(table.clone())
                .or_insert_with(|| Arc::new(MemoryStager::default())),
        )
    }
}

#[async_trait]
impl Stagers for MemoryStagers {
    async fn get(&self, _ctx: &Context, table: &TableId) -> Result<Arc<dyn Stager>, StageError> {
        Ok(self.stager(table))
    }

    async fn unstage(
        &self,
        _ctx: &Context,
        mut cursor: UnstageCursor,
        on_row: UnstageCallback<'_>,
    ) -> Result<(UnstageCursor, bool), StageError> {
        let now = Instant::now();
        let mut selected = 0usize;
        let mut times_seen: Vec<Hlc> = Vec::new();
        let mut more = false;

        for table in cursor.targets.clone() {
            let stager = self.stager(&table);
            let mut rows = stager.rows.lock();
            let range = (cursor.start_at, Bytes::new())..(cursor.end_before, Bytes::new());
            for ((time, key), row) in rows.range_mut(range) {
                if row.applied {
                    continue;
                }
                if row.lease_until.is_some_and(|until| until > now) {
                    continue;
                }
                if selected == cursor.update_limit {
                    more = true;
                    break;
                }
                if !times_seen.contains(time) {
                    if times_seen.len() == cursor.timestamp_limit {
                        more = true;
                        break;
                    }
                    times_seen.push(*time);
                }

                row.lease_until = Some(cursor.lease_expiry);
                selected += 1;
                on_row(
                    &table,
                    Mutation {
                        key: key.clone(),
                        data: row.data.clone(),
                        time: *time,
                    },
                );
            }
        }

        // Resume after what this page covered; leased rows are skipped
        // on re-read anyway, so the cursor only needs to move when the
        // page was cut short by a limit.
        if !more {
            cursor.start_at = cursor.end_before;
        }
        Ok((cursor, more))
    }
}
