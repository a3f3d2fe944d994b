//! Target schema metadata and referential-integrity components.
//!
//! The schema watcher collaborator publishes [`SchemaData`] snapshots:
//! per-table column metadata plus the partition of all tables into
//! [`SchemaComponent`]s, maximal sets of tables connected by foreign-key
//! edges, each topologically ordered so parents precede children. The
//! sequencer uses components as its unit of coordination: tables in
//! different components never need cross-table ordering.

use std::collections::{BTreeMap, HashMap};

use tokio::sync::watch;

use crate::error::SchemaError;
use crate::ident::{Ident, TableId};
use crate::notify::Var;

/// Column metadata for one target column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnData {
    /// The column name, case preserved.
    pub name: Ident,
    /// The target SQL type, used verbatim in bind casts.
    pub type_name: String,
    /// Whether the column participates in the primary key.
    pub primary: bool,
    /// Whether the column is known but never written (computed columns
    /// and the like). Ignored columns keep their position for parameter
    /// numbering but contribute no bind values.
    pub ignored: bool,
    /// The column's default expression, when one exists.
    pub default_expr: Option<String>,
}

impl ColumnData {
    /// A primary-key column.
    pub fn pk(name: impl Into<Ident>, type_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            type_name: type_name.into(),
            primary: true,
            ignored: false,
            default_expr: None,
        }
    }

    /// A regular data column.
    pub fn col(name: impl Into<Ident>, type_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            type_name: type_name.into(),
            primary: false,
            ignored: false,
            default_expr: None,
        }
    }

    /// Marks the column as ignored.
    #[must_use]
    pub fn ignored(mut self) -> Self {
        self.ignored = true;
        self
    }
}

/// A maximal FK-connected set of tables, ordered parents-first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaComponent {
    /// Member tables in topological order by FK dependency.
    pub order: Vec<TableId>,
}

impl SchemaComponent {
    /// Returns `true` when the component holds exactly one table.
    #[must_use]
    pub fn is_singleton(&self) -> bool {
        self.order.len() == 1
    }

    /// Returns `true` when `table` belongs to this component.
    #[must_use]
    pub fn contains(&self, table: &TableId) -> bool {
        self.order.contains(table)
    }

    /// A stable label for leases and logs: the first table in order.
    #[must_use]
    pub fn group_name(&self) -> String {
        self.order
            .first()
            .map_or_else(String::new, ToString::to_string)
    }
}

/// One published snapshot of the target schema.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchemaData {
    /// Column metadata per table. Primary-key columns come first.
    pub columns: HashMap<TableId, Vec<ColumnData>>,
    /// The FK-connectivity partition of all known tables.
    pub components: Vec<SchemaComponent>,
}

impl SchemaData {
    /// Returns the column list for `table`, if known.
    #[must_use]
    pub fn columns_for(&self, table: &TableId) -> Option<&[ColumnData]> {
        self.columns.get(table).map(Vec::as_slice)
    }

    /// Returns the component enclosing `table`, if any.
    #[must_use]
    pub fn component_of(&self, table: &TableId) -> Option<&SchemaComponent> {
        self.components.iter().find(|c| c.contains(table))
    }
}

/// Publishes target schema snapshots and per-table column feeds.
///
/// The initial per-table publication must arrive promptly; the applier
/// gives up after its configured timeout. Dropping the returned receiver
/// cancels a per-table watch.
pub trait SchemaWatcher: Send + Sync {
    /// Returns the current schema snapshot.
    fn snapshot(&self) -> SchemaData;

    /// Returns the observable the snapshots are published through.
    fn notify(&self) -> &Var<SchemaData>;

    /// Subscribes to column updates for one table. The receiver holds
    /// the current column list immediately.
    ///
    /// # Errors
    ///
    /// Returns [`SchemaError::UnknownTable`] when the watcher has no
    /// metadata for `table`.
    fn watch(&self, table: &TableId) -> Result<watch::Receiver<Vec<ColumnData>>, SchemaError>;
}

/// Computes the FK-connectivity partition of `tables`.
///
/// `fk_edges` lists `(child, parent)` pairs. Components are the weakly
/// connected subgraphs of that edge set; within each component tables
/// are ordered topologically with parents first, ties broken by name so
/// the result is deterministic across runs. Cycles (self-references,
/// mutual FKs) are broken by emitting the remaining tables in name
/// order after the acyclic prefix.
#[must_use]
pub fn components_from_graph(
    tables: &[TableId],
    fk_edges: &[(TableId, TableId)],
) -> Vec<SchemaComponent> {
    let index: BTreeMap<&TableId, usize> = tables.iter().enumerate().map(|(i, t)| (t, i)).collect();
    let mut dsu = Dsu::new(tables.len());
    for (child, parent) in fk_edges {
        if let (Some(&c), Some(&p)) = (index.get(child), index.get(parent)) {
            dsu.union(c, p);
        }
    }

    // Group member indices by component root, in deterministic order.
    let mut groups: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
    let mut ordered: Vec<usize> = (0..tables.len()).collect();
    ordered.sort_by(|&a, &b| tables[a].cmp(&tables[b]));
    for idx in ordered {
        groups.entry(dsu.find(idx)).or_default().push(idx);
    }

    let mut components: Vec<SchemaComponent> = groups
        .into_values()
        .map(|members| SchemaComponent {
            order: topo_order(tables, fk_edges, &members),
        })
        .collect();
    components.sort_by(|a, b| a.order.cmp(&b.order));
    components
}

/// Kahn's algorithm over one component, parents first.
fn topo_order(tables: &[TableId], fk_edges: &[(TableId, TableId)], members: &[usize]) -> Vec<TableId> {
    let member_set: Vec<&TableId> = members.iter().map(|&i| &tables[i]).collect();
    let mut in_degree: BTreeMap<&TableId, usize> = member_set.iter().map(|t| (*t, 0)).collect();
    let mut children: BTreeMap<&TableId, Vec<&TableId>> = BTreeMap::new();
    for (child, parent) in fk_edges {
        if child == parent {
            continue;
        }
        if in_degree.contains_key(parent) {
            if let Some(deg) = in_degree.get_mut(child) {
                *deg += 1;
                children.entry(parent).or_default().push(child);
            }
        }
    }

    let mut ready: Vec<&TableId> = in_degree
        .iter()
        .filter(|&(_, &deg)| deg == 0)
        .map(|(t, _)| *t)
        .collect();
    ready.sort();

    let mut order = Vec::with_capacity(members.len());
    while !ready.is_empty() {
        let table = ready.remove(0);
        order.push(table.clone());
        for child in children.get(table).into_iter().flatten() {
            if let Some(deg) = in_degree.get_mut(child) {
                *deg -= 1;
                if *deg == 0 {
                    let pos = ready.binary_search(child).unwrap_or_else(|p| p);
                    ready.insert(pos, *child);
                }
            }
        }
    }

    // Any leftover tables sit on a cycle; emit them in name order.
    for table in member_set {
        if !order.contains(table) {
            order.push(table.clone());
        }
    }
    order
}

struct Dsu {
    parent: Vec<usize>,
}

impl Dsu {
    fn new(n: usize) -> Self {
        Self {
            parent: (0..n).collect(),
        }
    }

    fn find(&mut self, x: usize) -> usize {
        if self.parent[x] != x {
            let root = self.find(self.parent[x]);
            self.parent[x] = root;
        }
        self.parent[x]
    }

    fn union(&mut self, a: usize, b: usize) {
        let (ra, rb) = (self.find(a), self.find(b));
        if ra != rb {
            self.parent[ra.max(rb)] = ra.min(rb);
        }
    }
}
