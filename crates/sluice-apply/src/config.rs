//! Per-table apply configuration.
//!
//! Most tables need none of this; the applier maps incoming column
//! names straight onto target columns. The knobs here cover the rest:
//! renamed columns, synthetic SQL expressions, payload columns to drop,
//! and an extras column to absorb whatever the target does not model.

use std::collections::{BTreeMap, BTreeSet};

use sluice_core::ident::Ident;

/// The placeholder replaced by the positional bind parameter inside a
/// configured expression.
pub const SUBSTITUTION_TOKEN: &str = "$0";

/// Per-target-table apply configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApplyConfig {
    /// Incoming column names to drop from the payload. Dropped names
    /// are neither bound nor reported as unexpected.
    pub ignore: BTreeSet<String>,

    /// Alternate incoming name per target column. The applier looks up
    /// the mapped name in the payload instead of the column's own name.
    pub source_names: BTreeMap<Ident, String>,

    /// Substitution SQL expression per target column. The literal
    /// [`SUBSTITUTION_TOKEN`] inside the expression is replaced with
    /// the cast bind placeholder for that column's position.
    pub exprs: BTreeMap<Ident, String>,

    /// A JSONB target column that receives incoming values with no
    /// matching target column. When set, unexpected payload columns are
    /// collected there instead of failing the batch.
    pub extras: Option<Ident>,

    /// Per-table override of the applier chunk size.
    pub row_limit: Option<usize>,
}

impl ApplyConfig {
    /// Returns `true` when the configuration changes nothing.
    #[must_use]
    pub fn is_zero(&self) -> bool {
        self.ignore.is_empty()
            && self.source_names.is_empty()
            && self.exprs.is_empty()
            && self.extras.is_none()
            && self.row_limit.is_none()
    }

    /// Overlays any non-empty fields from `other` onto `self`.
    pub fn patch(&mut self, other: &ApplyConfig) {
        self.ignore.extend(other.ignore.iter().cloned());
        for (k, v) in &other.source_names {
            self.source_names.insert(k.clone(), v.clone());
        }
        for (k, v) in &other.exprs {
            self.exprs.insert(k.clone(), v.clone());
        }
        if other.extras.is_some() {
            self.extras.clone_from(&other.extras);
        }
        if other.row_limit.is_some() {
            self.row_limit = other.row_limit;
        }
    }

    /// The incoming payload name for `column`.
    #[must_use]
    pub fn source_name<'a>(&'a self, column: &'a Ident) -> &'a str {
        self.source_names
            .get(column)
            .map_or_else(|| column.raw(), String::as_str)
    }
}
