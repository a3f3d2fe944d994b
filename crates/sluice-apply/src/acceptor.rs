//! The applier factory and its acceptor surface.
//!
//! [`Appliers`] lazily builds one [`Applier`] per target table and
//! exposes the [`TableAcceptor`] the sequencer uses as its primary
//! apply delegate: a batch arrives, the matching applier is looked up
//! (or built), and the batch is applied through the configured pool or
//! the caller-supplied querier.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use sluice_core::accept::{AcceptOptions, TableAcceptor};
use sluice_core::config::SequencerConfig;
use sluice_core::error::{AcceptError, SchemaError};
use sluice_core::ident::TableId;
use sluice_core::mutation::TableBatch;
use sluice_core::schema::SchemaWatcher;
use sluice_core::stopper::Context;
use sluice_core::target::TargetQuerier;

use crate::applier::Applier;
use crate::config::ApplyConfig;

/// Builds and caches table appliers.
pub struct Appliers {
    watcher: Arc<dyn SchemaWatcher>,
    pool: Arc<dyn TargetQuerier>,
    settings: SequencerConfig,
    configs: Mutex<HashMap<TableId, ApplyConfig>>,
    cache: tokio::sync::Mutex<HashMap<TableId, Arc<Applier>>>,
}

impl Appliers {
    /// Creates a factory over `watcher` and the default target `pool`.
    pub fn new(
        watcher: Arc<dyn SchemaWatcher>,
        pool: Arc<dyn TargetQuerier>,
        settings: SequencerConfig,
    ) -> Self {
        Self {
            watcher,
            pool,
            settings,
            configs: Mutex::new(HashMap::new()),
            cache: tokio::sync::Mutex::new(HashMap::new()),
        }
    }

    /// Overlays per-table configuration. Takes effect when the table's
    /// applier is next built; call before the first batch for the
    /// table.
    pub fn configure(&self, table: TableId, config: &ApplyConfig) {
        self.configs.lock().entry(table).or_default().patch(config);
    }

    /// Returns the applier for `table`, building it on first use.
    ///
    /// # Errors
    ///
    /// Propagates [`SchemaError`] from applier construction.
    pub async fn get(&self, table: &TableId) -> Result<Arc<Applier>, SchemaError> {
        let mut cache = self.cache.lock().await;
        if let Some(found) = cache.get(table) {
            return Ok(Arc::clone(found));
        }
        let config = self.configs.lock().get(table).cloned().unwrap_or_default();
        let applier = Applier::new(
            self.watcher.as_ref(),
            table.clone(),
            config,
            &self.settings,
        )
        .await?;
        cache.insert(table.clone(), Arc::clone(&applier));
        Ok(applier)
    }
}

#[async_trait]
impl TableAcceptor for Appliers {
    async fn accept_table_batch(
        &self,
        ctx: &Context,
        batch: &TableBatch,
        opts: &AcceptOptions,
    ) -> Result<(), AcceptError> {
        let applier = self.get(&batch.table).await?;
        let querier = opts
            .querier
            .clone()
            .unwrap_or_else(|| Arc::clone(&self.pool));
        applier.apply(ctx, querier.as_ref(), &batch.data).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use bytes::Bytes;
    use sluice_core::hlc::Hlc;
    use sluice_core::mutation::Mutation;
    use sluice_core::schema::ColumnData;
    use sluice_staging::{MemoryWatcher, RecordingTarget};

    fn t(name: &str) -> TableId {
        TableId::new("public", name)
    }

    fn appliers(watcher: &Arc<MemoryWatcher>, pool: &RecordingTarget) -> Appliers {
        let w: Arc<dyn SchemaWatcher> = Arc::clone(watcher) as _;
        Appliers::new(
            w,
            Arc::new(pool.clone()),
            SequencerConfig {
                schema_timeout: std::time::Duration::from_millis(200),
                ..SequencerConfig::default()
            },
        )
    }

    #[tokio::test]
    async fn test_batches_route_to_per_table_appliers() {
        let watcher = Arc::new(MemoryWatcher::new());
        watcher.publish(
            vec![
                (t("a"), vec![ColumnData::pk("id", "INT8")]),
                (t("b"), vec![ColumnData::pk("id", "INT8")]),
            ],
            &[],
        );
        let pool = RecordingTarget::new();
        let acceptor = appliers(&watcher, &pool);
        let ctx = Context::root();

        for name in ["a", "b"] {
            let batch = TableBatch::single(
                t(name),
                Mutation::upsert(
                    Bytes::from_static(b"[1]"),
                    Bytes::from_static(br#"{"id":1}"#),
                    Hlc::new(1, 0),
                ),
            );
            acceptor
                .accept_table_batch(&ctx, &batch, &AcceptOptions::default())
                .await
                .unwrap();
        }

        let stmts = pool.statements();
        assert!(stmts[0].contains("\"a\""));
        assert!(stmts[1].contains("\"b\""));
    }

    #[tokio::test]
    async fn test_get_caches_appliers() {
        let watcher = Arc::new(MemoryWatcher::new());
        watcher.publish(vec![(t("a"), vec![ColumnData::pk("id", "INT8")])], &[]);
        let pool = RecordingTarget::new();
        let acceptor = appliers(&watcher, &pool);

        let first = acceptor.get(&t("a")).await.unwrap();
        let second = acceptor.get(&t("a")).await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[tokio::test]
    async fn test_unknown_table_surfaces_schema_error() {
        let watcher = Arc::new(MemoryWatcher::new());
        watcher.publish(vec![(t("a"), vec![ColumnData::pk("id", "INT8")])], &[]);
        let pool = RecordingTarget::new();
        let acceptor = appliers(&watcher, &pool);

        assert!(matches!(
            acceptor.get(&t("missing")).await,
            Err(SchemaError::UnknownTable(_))
        ));
    }

    #[tokio::test]
    async fn test_opts_querier_overrides_pool() {
        let watcher = Arc::new(MemoryWatcher::new());
        watcher.publish(vec![(t("a"), vec![ColumnData::pk("id", "INT8")])], &[]);
        let pool = RecordingTarget::new();
        let acceptor = appliers(&watcher, &pool);
        let ctx = Context::root();

        let tx = RecordingTarget::new();
        let opts = AcceptOptions {
            querier: Some(Arc::new(tx.clone())),
        };
        let batch = TableBatch::single(
            t("a"),
            Mutation::upsert(
                Bytes::from_static(b"[1]"),
                Bytes::from_static(br#"{"id":1}"#),
                Hlc::new(1, 0),
            ),
        );
        acceptor
            .accept_table_batch(&ctx, &batch, &opts)
            .await
            .unwrap();

        assert!(pool.executed().is_empty());
        assert_eq!(tx.executed().len(), 1);
    }
}
