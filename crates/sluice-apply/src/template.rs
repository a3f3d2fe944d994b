//! SQL template generation.
//!
//! Rebuilt from the target's column list on every schema publication:
//! one parameterized `DELETE` and one parameterized `UPSERT` per table,
//! plus the binding plan that maps incoming payload values onto the
//! placeholders. Placeholders are 1-indexed and densified: only bound
//! columns consume an index, so the bind array is always positional.

use std::fmt::Write as _;

use sluice_core::ident::{Ident, TableId};
use sluice_core::schema::ColumnData;

use crate::config::{ApplyConfig, SUBSTITUTION_TOKEN};

/// How one upsert placeholder gets its value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum BindSource {
    /// Look up a payload value by incoming name.
    Column {
        /// The payload key to read.
        source_name: String,
        /// Whether absence is schema drift.
        primary: bool,
    },
    /// Bind the collected unmapped values as a JSON object.
    Extras,
}

/// One bind parameter of the upsert statement, in placeholder order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct UpsertBinding {
    pub column: Ident,
    pub source: BindSource,
}

/// The delete statement and its key-binding plan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct DeletePlan {
    pub sql: String,
    /// Indices into the decoded key array to bind, in placeholder
    /// order. Ignored primary-key columns are present in the key but
    /// never bound.
    pub key_positions: Vec<usize>,
}

/// The full per-table plan the applier executes against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct TablePlan {
    pub delete: DeletePlan,
    pub upsert_sql: String,
    pub bindings: Vec<UpsertBinding>,
    /// All published columns, in target order.
    pub columns: Vec<ColumnData>,
    /// All primary-key columns, including ignored ones. The key array
    /// arity is checked against this.
    pub pks: Vec<ColumnData>,
    /// Payload keys the target recognizes (after source-name mapping),
    /// including names of ignored target columns.
    pub known_payload_names: Vec<String>,
}

/// Builds the statement templates and binding plan for one table.
pub(crate) fn build_plan(
    table: &TableId,
    columns: &[ColumnData],
    config: &ApplyConfig,
) -> TablePlan {
    let pks: Vec<ColumnData> = columns.iter().filter(|c| c.primary).cloned().collect();

    // DELETE FROM t WHERE ("pk0", "pk1") = ($1::INT8, $2::STRING)
    let mut delete = format!("DELETE FROM {table} WHERE (");
    let mut delete_casts = String::new();
    let mut key_positions = Vec::new();
    let mut param = 0usize;
    for (pk_idx, col) in pks.iter().enumerate() {
        if col.ignored {
            continue;
        }
        if param > 0 {
            delete.push_str(", ");
            delete_casts.push_str(", ");
        }
        param += 1;
        let _ = write!(delete, "{}", col.name);
        let _ = write!(delete_casts, "${param}::{}", col.type_name);
        key_positions.push(pk_idx);
    }
    let _ = write!(delete, ") = ({delete_casts})");

    // UPSERT INTO t ("c0", "c1") VALUES ($1::INT8, $2::STRING)
    let mut names = String::new();
    let mut values = String::new();
    let mut bindings = Vec::new();
    let mut param = 0usize;
    for col in columns {
        if col.ignored {
            continue;
        }
        if !names.is_empty() {
            names.push_str(", ");
            values.push_str(", ");
        }
        let _ = write!(names, "{}", col.name);

        if let Some(expr) = config.exprs.get(&col.name) {
            if expr.contains(SUBSTITUTION_TOKEN) {
                param += 1;
                values.push_str(&expr.replace(SUBSTITUTION_TOKEN, &format!("${param}")));
                bindings.push(binding_for(col, config));
            } else {
                // A pure synthetic expression consumes no placeholder.
                values.push_str(expr);
            }
            continue;
        }

        param += 1;
        // GEO types arrive as GeoJSON and need the conversion helpers.
        match col.type_name.as_str() {
            "GEOGRAPHY" => {
                let _ = write!(values, "st_geogfromgeojson(${param}::jsonb)");
            }
            "GEOMETRY" => {
                let _ = write!(values, "st_geomfromgeojson(${param}::jsonb)");
            }
            other => {
                let _ = write!(values, "${param}::{other}");
            }
        }
        bindings.push(binding_for(col, config));
    }
    let upsert_sql = format!("UPSERT INTO {table} ({names}) VALUES ({values})");

    let known_payload_names = columns
        .iter()
        .map(|c| config.source_name(&c.name).to_string())
        .collect();

    TablePlan {
        delete: DeletePlan {
            sql: delete,
            key_positions,
        },
        upsert_sql,
        bindings,
        columns: columns.to_vec(),
        pks,
        known_payload_names,
    }
}

fn binding_for(col: &ColumnData, config: &ApplyConfig) -> UpsertBinding {
    let source = if config.extras.as_ref() == Some(&col.name) {
        BindSource::Extras
    } else {
        BindSource::Column {
            source_name: config.source_name(&col.name).to_string(),
            primary: col.primary,
        }
    };
    UpsertBinding {
        column: col.name.clone(),
        source,
    }
}
