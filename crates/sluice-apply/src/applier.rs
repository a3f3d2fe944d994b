//! The table applier.
//!
//! One applier per target table. It subscribes to the schema watcher at
//! construction, blocks until the first column snapshot arrives (bounded
//! by the configured timeout), and keeps its statement templates fresh
//! in the background. Applying a batch partitions mutations by kind and
//! emits deletes before upserts, each chunked to the row limit.

use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::debug;

use sluice_core::config::SequencerConfig;
use sluice_core::error::{AcceptError, SchemaDriftError, SchemaError};
use sluice_core::ident::TableId;
use sluice_core::mutation::Mutation;
use sluice_core::schema::{ColumnData, SchemaWatcher};
use sluice_core::stopper::Context;
use sluice_core::target::{SqlParam, TargetQuerier};

use crate::config::ApplyConfig;
use crate::metrics::ApplyMetrics;
use crate::template::{build_plan, BindSource, TablePlan};

/// Applies mutation batches to one target table.
#[derive(Debug)]
pub struct Applier {
    target: TableId,
    config: ApplyConfig,
    row_limit: usize,
    metrics: Arc<ApplyMetrics>,
    state: RwLock<TablePlan>,
    refresh_task: Mutex<Option<JoinHandle<()>>>,
}

impl Applier {
    /// Builds an applier for `target`.
    ///
    /// Subscribes to the watcher and waits up to the configured schema
    /// timeout for a non-empty column snapshot, then starts a
    /// background task that rebuilds the templates on every subsequent
    /// publication.
    ///
    /// # Errors
    ///
    /// Returns [`SchemaError::Timeout`] when no snapshot arrives in
    /// time, or the watcher's error when the table is unknown.
    pub async fn new(
        watcher: &dyn SchemaWatcher,
        target: TableId,
        config: ApplyConfig,
        settings: &SequencerConfig,
    ) -> Result<Arc<Self>, SchemaError> {
        let mut rx = watcher.watch(&target)?;

        let initial: Vec<ColumnData> =
            tokio::time::timeout(settings.schema_timeout, async {
                loop {
                    if rx.changed().await.is_err() {
                        return Err(SchemaError::Closed);
                    }
                    let cols = rx.borrow_and_update().clone();
                    if !cols.is_empty() {
                        return Ok(cols);
                    }
                }
            })
            .await
            .map_err(|_| SchemaError::Timeout(target.clone()))??;

        let row_limit = config.row_limit.unwrap_or(settings.row_limit).max(1);
        let applier = Arc::new(Self {
            state: RwLock::new(build_plan(&target, &initial, &config)),
            target,
            config,
            row_limit,
            metrics: Arc::new(ApplyMetrics::new()),
            refresh_task: Mutex::new(None),
        });

        let weak = Arc::downgrade(&applier);
        let task = tokio::spawn(async move {
            while rx.changed().await.is_ok() {
                let cols = rx.borrow_and_update().clone();
                let Some(me) = weak.upgrade() else { break };
                me.refresh(&cols).await;
                debug!(table = %me.target, "refreshed schema");
            }
        });
        *applier.refresh_task.lock() = Some(task);

        Ok(applier)
    }

    /// The target table.
    #[must_use]
    pub fn target(&self) -> &TableId {
        &self.target
    }

    /// This applier's metrics.
    #[must_use]
    pub fn metrics(&self) -> &Arc<ApplyMetrics> {
        &self.metrics
    }

    /// The current delete template. Exposed for inspection and tests.
    pub async fn delete_template(&self) -> String {
        self.state.read().await.delete.sql.clone()
    }

    /// The current upsert template. Exposed for inspection and tests.
    pub async fn upsert_template(&self) -> String {
        self.state.read().await.upsert_sql.clone()
    }

    /// Applies `muts` through `querier`.
    ///
    /// Deletes are emitted first, then upserts, each chunked to the row
    /// limit. The template state is read-locked for the duration, so a
    /// concurrent schema refresh waits for in-flight applies.
    ///
    /// # Errors
    ///
    /// Returns [`AcceptError`]: target failures pass through with the
    /// offending statement attached; schema drift fails the whole batch
    /// without marking anything applied.
    pub async fn apply(
        &self,
        ctx: &Context,
        querier: &dyn TargetQuerier,
        muts: &[Mutation],
    ) -> Result<(), AcceptError> {
        let start = Instant::now();
        let result = self.apply_inner(ctx, querier, muts).await;
        match &result {
            Ok(()) => self.metrics.observe_apply(start.elapsed()),
            Err(err) if err.is_stopped() => {}
            Err(_) => {
                self.metrics
                    .errors
                    .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
            }
        }
        result
    }

    async fn apply_inner(
        &self,
        ctx: &Context,
        querier: &dyn TargetQuerier,
        muts: &[Mutation],
    ) -> Result<(), AcceptError> {
        let plan = self.state.read().await;
        if plan.columns.is_empty() {
            return Err(AcceptError::NoSchema(self.target.clone()));
        }

        let mut deletes: Vec<Vec<SqlParam>> = Vec::new();
        let mut upserts: Vec<Vec<SqlParam>> = Vec::new();
        for m in muts {
            if m.is_delete() {
                deletes.push(self.encode_delete(&plan, m)?);
            } else {
                upserts.push(self.encode_upsert(&plan, m)?);
            }
        }

        for chunk in deletes.chunks(self.row_limit) {
            if ctx.is_stopping() {
                return Err(AcceptError::Stopped);
            }
            querier
                .execute_rows(&plan.delete.sql, chunk)
                .await
                .map_err(|e| AcceptError::Target(e.with_statement(plan.delete.sql.clone())))?;
        }
        if !deletes.is_empty() {
            self.metrics
                .deletes
                .fetch_add(deletes.len() as u64, std::sync::atomic::Ordering::Relaxed);
            debug!(table = %self.target, count = deletes.len(), "deleted rows");
        }

        for chunk in upserts.chunks(self.row_limit) {
            if ctx.is_stopping() {
                return Err(AcceptError::Stopped);
            }
            querier
                .execute_rows(&plan.upsert_sql, chunk)
                .await
                .map_err(|e| AcceptError::Target(e.with_statement(plan.upsert_sql.clone())))?;
        }
        if !upserts.is_empty() {
            self.metrics
                .upserts
                .fetch_add(upserts.len() as u64, std::sync::atomic::Ordering::Relaxed);
            debug!(table = %self.target, count = upserts.len(), "upserted rows");
        }

        Ok(())
    }

    fn encode_delete(
        &self,
        plan: &TablePlan,
        m: &Mutation,
    ) -> Result<Vec<SqlParam>, AcceptError> {
        let key_vals: Vec<Value> = serde_json::from_slice(&m.key)?;
        if key_vals.len() != plan.pks.len() {
            return Err(SchemaDriftError::PkArity {
                table: self.target.clone(),
                received: key_vals.len(),
                expected: plan.pks.len(),
                key: m.key_string(),
                time: m.time,
            }
            .into());
        }
        Ok(plan
            .delete
            .key_positions
            .iter()
            .map(|&pos| value_to_param(&key_vals[pos]))
            .collect())
    }

    fn encode_upsert(
        &self,
        plan: &TablePlan,
        m: &Mutation,
    ) -> Result<Vec<SqlParam>, AcceptError> {
        let payload: serde_json::Map<String, Value> = serde_json::from_slice(&m.data)?;

        // Incoming names the target does not model are either packed
        // into the extras column or reported as drift.
        let mut extras = serde_json::Map::new();
        let mut unexpected: Vec<String> = Vec::new();
        for (name, value) in &payload {
            if plan.known_payload_names.iter().any(|k| k == name) {
                continue;
            }
            if self.config.ignore.contains(name) {
                continue;
            }
            if self.config.extras.is_some() {
                extras.insert(name.clone(), value.clone());
            } else {
                unexpected.push(name.clone());
            }
        }
        if !unexpected.is_empty() {
            unexpected.sort();
            return Err(SchemaDriftError::UnexpectedColumns {
                table: self.target.clone(),
                columns: unexpected,
                key: m.key_string(),
                time: m.time,
            }
            .into());
        }

        let mut args = Vec::with_capacity(plan.bindings.len());
        for binding in &plan.bindings {
            match &binding.source {
                BindSource::Extras => {
                    if extras.is_empty() {
                        args.push(None);
                    } else {
                        args.push(Some(Value::Object(extras.clone()).to_string()));
                    }
                }
                BindSource::Column {
                    source_name,
                    primary,
                } => match payload.get(source_name) {
                    Some(value) => args.push(value_to_param(value)),
                    // Missing non-PK columns are tolerated: the source
                    // may simply not have them yet.
                    None if *primary => {
                        return Err(SchemaDriftError::MissingPk {
                            table: self.target.clone(),
                            column: binding.column.clone(),
                            key: m.key_string(),
                            time: m.time,
                        }
                        .into());
                    }
                    None => args.push(None),
                },
            }
        }
        Ok(args)
    }

    async fn refresh(&self, columns: &[ColumnData]) {
        let plan = build_plan(&self.target, columns, &self.config);
        *self.state.write().await = plan;
    }
}

impl Drop for Applier {
    fn drop(&mut self) {
        if let Some(task) = self.refresh_task.lock().take() {
            task.abort();
        }
    }
}

/// Renders a decoded JSON value as a text bind parameter. The generated
/// SQL casts every placeholder, so the target parses the text; numbers
/// pass through verbatim thanks to arbitrary-precision decoding.
fn value_to_param(value: &Value) -> SqlParam {
    match value {
        Value::Null => None,
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use bytes::Bytes;
    use sluice_core::hlc::Hlc;
    use sluice_core::ident::Ident;
    use sluice_staging::{MemoryWatcher, RecordingTarget};

    fn t() -> TableId {
        TableId::new("public", "t")
    }

    fn settings() -> SequencerConfig {
        SequencerConfig {
            schema_timeout: Duration::from_secs(1),
            ..SequencerConfig::default()
        }
    }

    fn upsert(key: &str, data: &str, wall: i64) -> Mutation {
        Mutation::upsert(
            Bytes::from(key.to_string()),
            Bytes::from(data.to_string()),
            Hlc::new(wall, 0),
        )
    }

    async fn applier_for(
        cols: Vec<ColumnData>,
        config: ApplyConfig,
    ) -> (Arc<Applier>, Arc<MemoryWatcher>) {
        let watcher = Arc::new(MemoryWatcher::new());
        watcher.publish(vec![(t(), cols)], &[]);
        let applier = Applier::new(watcher.as_ref(), t(), config, &settings())
            .await
            .unwrap();
        (applier, watcher)
    }

    #[tokio::test]
    async fn test_upserts_flow_through() {
        let (applier, _w) = applier_for(
            vec![ColumnData::pk("id", "INT8"), ColumnData::col("v", "STRING")],
            ApplyConfig::default(),
        )
        .await;
        let target = RecordingTarget::new();
        let ctx = Context::root();

        applier
            .apply(
                &ctx,
                &target,
                &[
                    upsert("[1]", r#"{"id":1,"v":"a"}"#, 10),
                    upsert("[2]", r#"{"id":2,"v":"b"}"#, 10),
                ],
            )
            .await
            .unwrap();

        let executed = target.executed();
        assert_eq!(executed.len(), 2);
        assert!(executed[0].sql.starts_with("UPSERT INTO"));
        assert_eq!(
            executed[0].params,
            vec![Some("1".to_string()), Some("a".to_string())]
        );
        assert_eq!(applier.metrics().snapshot().upserts, 2);
    }

    #[tokio::test]
    async fn test_deletes_precede_upserts() {
        let (applier, _w) = applier_for(
            vec![ColumnData::pk("id", "INT8"), ColumnData::col("v", "STRING")],
            ApplyConfig::default(),
        )
        .await;
        let target = RecordingTarget::new();
        let ctx = Context::root();

        applier
            .apply(
                &ctx,
                &target,
                &[
                    upsert("[1]", r#"{"id":1,"v":"a"}"#, 10),
                    Mutation::delete(Bytes::from_static(b"[2]"), Hlc::new(10, 0)),
                ],
            )
            .await
            .unwrap();

        let stmts = target.statements();
        assert!(stmts[0].starts_with("DELETE FROM"));
        assert!(stmts[1].starts_with("UPSERT INTO"));
    }

    #[tokio::test]
    async fn test_missing_pk_is_schema_drift() {
        let (applier, _w) = applier_for(
            vec![ColumnData::pk("id", "INT8"), ColumnData::col("v", "STRING")],
            ApplyConfig::default(),
        )
        .await;
        let target = RecordingTarget::new();
        let ctx = Context::root();

        let err = applier
            .apply(&ctx, &target, &[upsert("[]", r#"{"v":"x"}"#, 10)])
            .await
            .unwrap_err();
        assert!(err.to_string().contains("missing PK column \"id\""));
        assert!(target.executed().is_empty());
        assert_eq!(applier.metrics().snapshot().errors, 1);
    }

    #[tokio::test]
    async fn test_unexpected_columns_sorted_in_error() {
        let (applier, _w) = applier_for(
            vec![ColumnData::pk("id", "INT8"), ColumnData::col("v", "STRING")],
            ApplyConfig::default(),
        )
        .await;
        let target = RecordingTarget::new();
        let ctx = Context::root();

        let err = applier
            .apply(
                &ctx,
                &target,
                &[upsert(
                    "[1]",
                    r#"{"id":1,"v":"x","more":1,"extra":true}"#,
                    10,
                )],
            )
            .await
            .unwrap_err();
        assert!(err.to_string().contains("[\"extra\", \"more\"]"));
        assert!(target.executed().is_empty());
    }

    #[tokio::test]
    async fn test_extras_column_absorbs_unmapped_values() {
        let cfg = ApplyConfig {
            extras: Some(Ident::new("overflow")),
            ..ApplyConfig::default()
        };
        let (applier, _w) = applier_for(
            vec![
                ColumnData::pk("id", "INT8"),
                ColumnData::col("overflow", "JSONB"),
            ],
            cfg,
        )
        .await;
        let target = RecordingTarget::new();
        let ctx = Context::root();

        applier
            .apply(
                &ctx,
                &target,
                &[upsert("[1]", r#"{"id":1,"stray":"kept"}"#, 10)],
            )
            .await
            .unwrap();

        let params = &target.executed()[0].params;
        assert_eq!(params[0], Some("1".to_string()));
        assert_eq!(params[1], Some(r#"{"stray":"kept"}"#.to_string()));
    }

    #[tokio::test]
    async fn test_pk_arity_mismatch_on_delete() {
        let (applier, _w) = applier_for(
            vec![
                ColumnData::pk("a", "INT8"),
                ColumnData::pk("b", "INT8"),
                ColumnData::col("v", "STRING"),
            ],
            ApplyConfig::default(),
        )
        .await;
        let target = RecordingTarget::new();
        let ctx = Context::root();

        let err = applier
            .apply(
                &ctx,
                &target,
                &[Mutation::delete(Bytes::from_static(b"[1]"), Hlc::new(10, 0))],
            )
            .await
            .unwrap_err();
        assert!(err.to_string().contains("received 1 expect 2"));
    }

    #[tokio::test]
    async fn test_missing_non_pk_binds_null() {
        let (applier, _w) = applier_for(
            vec![
                ColumnData::pk("id", "INT8"),
                ColumnData::col("a", "STRING"),
                ColumnData::col("b", "STRING"),
            ],
            ApplyConfig::default(),
        )
        .await;
        let target = RecordingTarget::new();
        let ctx = Context::root();

        applier
            .apply(&ctx, &target, &[upsert("[1]", r#"{"id":1,"a":"x"}"#, 10)])
            .await
            .unwrap();
        let params = &target.executed()[0].params;
        assert_eq!(params[2], None);
    }

    #[tokio::test]
    async fn test_decimals_survive_verbatim() {
        let (applier, _w) = applier_for(
            vec![
                ColumnData::pk("id", "INT8"),
                ColumnData::col("n", "NUMERIC"),
            ],
            ApplyConfig::default(),
        )
        .await;
        let target = RecordingTarget::new();
        let ctx = Context::root();

        applier
            .apply(
                &ctx,
                &target,
                &[upsert(
                    "[1]",
                    r#"{"id":1,"n":12345678901234567890.12345678901234567890}"#,
                    10,
                )],
            )
            .await
            .unwrap();
        assert_eq!(
            target.executed()[0].params[1],
            Some("12345678901234567890.12345678901234567890".to_string())
        );
    }

    #[tokio::test]
    async fn test_geo_template_applies() {
        let (applier, _w) = applier_for(
            vec![ColumnData::pk("id", "INT8"), ColumnData::col("g", "GEOMETRY")],
            ApplyConfig::default(),
        )
        .await;
        assert!(applier
            .upsert_template()
            .await
            .contains("st_geomfromgeojson($2::jsonb)"));

        let target = RecordingTarget::new();
        let ctx = Context::root();
        applier
            .apply(
                &ctx,
                &target,
                &[upsert(
                    "[1]",
                    r#"{"id":1,"g":{"type":"Point","coordinates":[1.0,2.0]}}"#,
                    10,
                )],
            )
            .await
            .unwrap();
        let params = &target.executed()[0].params;
        assert_eq!(
            params[1],
            Some(r#"{"type":"Point","coordinates":[1.0,2.0]}"#.to_string())
        );
    }

    #[tokio::test]
    async fn test_chunking_respects_row_limit() {
        let cfg = ApplyConfig {
            row_limit: Some(2),
            ..ApplyConfig::default()
        };
        let (applier, _w) = applier_for(
            vec![ColumnData::pk("id", "INT8"), ColumnData::col("v", "STRING")],
            cfg,
        )
        .await;
        let target = RecordingTarget::new();
        let ctx = Context::root();

        let muts: Vec<Mutation> = (0..5)
            .map(|i| upsert(&format!("[{i}]"), &format!(r#"{{"id":{i},"v":"x"}}"#), 10))
            .collect();
        applier.apply(&ctx, &target, &muts).await.unwrap();
        // Five rows still mean five statements; chunking only bounds
        // how many travel per round-trip batch.
        assert_eq!(target.executed().len(), 5);
        assert_eq!(applier.metrics().snapshot().upserts, 5);
    }

    #[tokio::test]
    async fn test_refresh_rebuilds_templates() {
        let (applier, watcher) = applier_for(
            vec![ColumnData::pk("id", "INT8"), ColumnData::col("a", "STRING")],
            ApplyConfig::default(),
        )
        .await;
        assert!(!applier.upsert_template().await.contains("\"b\""));

        watcher.publish(
            vec![(
                t(),
                vec![
                    ColumnData::pk("id", "INT8"),
                    ColumnData::col("a", "STRING"),
                    ColumnData::col("b", "STRING"),
                ],
            )],
            &[],
        );

        let deadline = Instant::now() + Duration::from_secs(2);
        loop {
            if applier.upsert_template().await.contains("\"b\"") {
                break;
            }
            assert!(Instant::now() < deadline, "refresh never landed");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    #[tokio::test]
    async fn test_initial_schema_timeout() {
        let watcher = MemoryWatcher::new();
        // The table is known but has no columns yet.
        watcher.publish(vec![(t(), Vec::new())], &[]);
        let cfg = SequencerConfig {
            schema_timeout: Duration::from_millis(50),
            ..SequencerConfig::default()
        };
        let err = Applier::new(&watcher, t(), ApplyConfig::default(), &cfg)
            .await
            .unwrap_err();
        assert!(matches!(err, SchemaError::Timeout(_)));
    }

    #[tokio::test]
    async fn test_target_errors_pass_through_with_statement() {
        let (applier, _w) = applier_for(
            vec![ColumnData::pk("id", "INT8"), ColumnData::col("v", "STRING")],
            ApplyConfig::default(),
        )
        .await;
        let target = RecordingTarget::new();
        target.set_handler(|_, _| {
            Err(sluice_core::target::TargetError::postgres(
                "23503",
                "fk violation",
            ))
        });
        let ctx = Context::root();

        let err = applier
            .apply(&ctx, &target, &[upsert("[1]", r#"{"id":1,"v":"a"}"#, 10)])
            .await
            .unwrap_err();
        let target_err = err.as_target().unwrap();
        assert_eq!(target_err.sqlstate(), Some("23503"));
        assert!(target_err.statement.as_deref().unwrap().starts_with("UPSERT"));
    }
}
