//! In-memory schema watcher.
//!
//! Publishes schema snapshots on demand, recomputing the FK-component
//! partition on every publication. Integration tests use it to stage a
//! schema, start the pipeline, then publish a changed schema mid-flight.

use std::collections::HashMap;

use parking_lot::Mutex;
use tokio::sync::watch;

use sluice_core::error::SchemaError;
use sluice_core::ident::TableId;
use sluice_core::notify::Var;
use sluice_core::schema::{
    components_from_graph, ColumnData, SchemaData, SchemaWatcher,
};

/// In-memory implementation of [`SchemaWatcher`].
pub struct MemoryWatcher {
    snapshot: Var<SchemaData>,
    feeds: Mutex<HashMap<TableId, watch::Sender<Vec<ColumnData>>>>,
}

impl Default for MemoryWatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryWatcher {
    /// Creates a watcher with an empty schema.
    #[must_use]
    pub fn new() -> Self {
        Self {
            snapshot: Var::new(SchemaData::default()),
            feeds: Mutex::new(HashMap::new()),
        }
    }

    /// Publishes a new schema snapshot.
    ///
    /// `tables` carries the column list per table (primary-key columns
    /// first); `fk_edges` lists `(child, parent)` references. Components
    /// are recomputed, the snapshot observable fires, and every
    /// per-table feed receives its new column list.
    pub fn publish(
        &self,
        tables: Vec<(TableId, Vec<ColumnData>)>,
        fk_edges: &[(TableId, TableId)],
    ) {
        let names: Vec<TableId> = tables.iter().map(|(t, _)| t.clone()).collect();
        let data = SchemaData {
            columns: tables.into_iter().collect(),
            components: components_from_graph(&names, fk_edges),
        };

        let mut feeds = self.feeds.lock();
        for (table, columns) in &data.columns {
            feeds
                .entry(table.clone())
                .or_insert_with(|| watch::channel(Vec::new()).0)
                .send_replace(columns.clone());
        }
        drop(feeds);

        self.snapshot.set(data);
    }
}

impl SchemaWatcher for MemoryWatcher {
    fn snapshot(&self) -> SchemaData {
        self.snapshot.get()
    }

    fn notify(&self) -> &Var<SchemaData> {
        &self.snapshot
    }

    fn watch(&self, table: &TableId) -> Result<watch::Receiver<Vec<ColumnData>>, SchemaError> {
        let feeds = self.feeds.lock();
        let sender = feeds
            .get(table)
            .ok_or_else(|| SchemaError::UnknownTable(table.clone()))?;
        let mut rx = sender.subscribe();
        rx.mark_changed();
        Ok(rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sluice_core::schema::SchemaComponent;

    fn t(name: &str) -> TableId {
        TableId::new("public", name)
    }

    #[test]
    fn test_publish_computes_components() {
        let w = MemoryWatcher::new();
        w.publish(
            vec![
                (t("p"), vec![ColumnData::pk("id", "INT8")]),
                (
                    t("c"),
                    vec![ColumnData::pk("id", "INT8"), ColumnData::col("p", "INT8")],
                ),
                (t("solo"), vec![ColumnData::pk("id", "INT8")]),
            ],
            &[(t("c"), t("p"))],
        );

        let data = w.snapshot();
        assert_eq!(data.components.len(), 2);
        let pair = data.component_of(&t("c")).unwrap();
        assert_eq!(pair.order, vec![t("p"), t("c")]);
        assert!(data.component_of(&t("solo")).unwrap().is_singleton());
    }

    #[tokio::test]
    async fn test_watch_delivers_initial_and_updates() {
        let w = MemoryWatcher::new();
        w.publish(vec![(t("a"), vec![ColumnData::pk("id", "INT8")])], &[]);

        let mut rx = w.watch(&t("a")).unwrap();
        rx.changed().await.unwrap();
        assert_eq!(rx.borrow_and_update().len(), 1);

        w.publish(
            vec![(
                t("a"),
                vec![ColumnData::pk("id", "INT8"), ColumnData::col("v", "STRING")],
            )],
            &[],
        );
        rx.changed().await.unwrap();
        assert_eq!(rx.borrow_and_update().len(), 2);
    }

    #[test]
    fn test_watch_unknown_table_errors() {
        let w = MemoryWatcher::new();
        assert!(matches!(
            w.watch(&t("missing")),
            Err(SchemaError::UnknownTable(_))
        ));
    }

    #[tokio::test]
    async fn test_notify_fires_on_publish() {
        let w = MemoryWatcher::new();
        let mut rx = w.notify().subscribe();
        rx.changed().await.unwrap();
        rx.borrow_and_update();

        w.publish(vec![(t("a"), vec![ColumnData::pk("id", "INT8")])], &[]);
        rx.changed().await.unwrap();
        let data = rx.borrow_and_update().clone();
        assert_eq!(
            data.components,
            vec![SchemaComponent {
                order: vec![t("a")]
            }]
        );
    }
}
