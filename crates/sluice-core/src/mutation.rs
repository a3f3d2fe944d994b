//! Mutations and the batch shapes that carry them.
//!
//! A [`Mutation`] is one row change: the primary key as a JSON array, the
//! full row as a JSON object (empty for deletes), and the source
//! timestamp. Batches group mutations per table ([`TableBatch`]) or
//! across tables ([`MultiBatch`]) for the multi-table acceptor surface.

use bytes::Bytes;

use crate::hlc::Hlc;
use crate::ident::TableId;

/// One row change keyed by primary key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mutation {
    /// JSON array of primary-key values.
    pub key: Bytes,
    /// JSON object of all column values; empty for a delete.
    pub data: Bytes,
    /// Source timestamp.
    pub time: Hlc,
}

impl Mutation {
    /// Creates an upsert mutation.
    pub fn upsert(key: impl Into<Bytes>, data: impl Into<Bytes>, time: Hlc) -> Self {
        Self {
            key: key.into(),
            data: data.into(),
            time,
        }
    }

    /// Creates a delete mutation. Deletes carry no row data.
    pub fn delete(key: impl Into<Bytes>, time: Hlc) -> Self {
        Self {
            key: key.into(),
            data: Bytes::new(),
            time,
        }
    }

    /// A mutation is a delete iff its data payload is empty.
    #[must_use]
    pub fn is_delete(&self) -> bool {
        self.data.is_empty()
    }

    /// Returns the key as lossy UTF-8 for log and error messages.
    #[must_use]
    pub fn key_string(&self) -> String {
        String::from_utf8_lossy(&self.key).into_owned()
    }
}

/// A batch of mutations destined for a single table.
///
/// All mutations share `table`; staged batches typically also share
/// `time`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableBatch {
    /// The destination table.
    pub table: TableId,
    /// The batch timestamp, usually the common mutation time.
    pub time: Hlc,
    /// The mutations to apply.
    pub data: Vec<Mutation>,
}

impl TableBatch {
    /// Creates a batch holding a single mutation.
    #[must_use]
    pub fn single(table: TableId, mutation: Mutation) -> Self {
        Self {
            table,
            time: mutation.time,
            data: vec![mutation],
        }
    }

    /// Returns the number of mutations in the batch.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns `true` when the batch carries no mutations.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// A batch of mutations spanning multiple tables.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MultiBatch {
    /// Per-table batches, in arrival order.
    pub batches: Vec<TableBatch>,
}

impl MultiBatch {
    /// Creates an empty multi-table batch.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a mutation, merging it into an existing per-table batch
    /// when one is already present for `table`.
    pub fn push(&mut self, table: TableId, mutation: Mutation) {
        if let Some(batch) = self.batches.iter_mut().find(|b| b.table == table) {
            batch.time = batch.time.max(mutation.time);
            batch.data.push(mutation);
        } else {
            self.batches.push(TableBatch::single(table, mutation));
        }
    }

    /// Total mutation count across all tables.
    #[must_use]
    pub fn len(&self) -> usize {
        self.batches.iter().map(TableBatch::len).sum()
    }

    /// Returns `true` when no table has mutations.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delete_detection() {
        let del = Mutation::delete(&b"[1]"[..], Hlc::new(1, 0));
        let up = Mutation::upsert(&b"[1]"[..], &br#"{"id":1}"#[..], Hlc::new(1, 0));
        assert!(del.is_delete());
        assert!(!up.is_delete());
    }

    #[test]
    fn test_multi_batch_merges_per_table() {
        let t = TableId::new("public", "t");
        let mut mb = MultiBatch::new();
        mb.push(
            t.clone(),
            Mutation::upsert(&b"[1]"[..], &br#"{"id":1}"#[..], Hlc::new(1, 0)),
        );
        mb.push(
            t.clone(),
            Mutation::upsert(&b"[2]"[..], &br#"{"id":2}"#[..], Hlc::new(2, 0)),
        );
        mb.push(
            TableId::new("public", "u"),
            Mutation::delete(&b"[3]"[..], Hlc::new(1, 0)),
        );

        assert_eq!(mb.batches.len(), 2);
        assert_eq!(mb.len(), 3);
        let batch = mb.batches.iter().find(|b| b.table == t).unwrap();
        assert_eq!(batch.time, Hlc::new(2, 0));
    }
}
