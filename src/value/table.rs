// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Tables: ordered row records persisted as one batch.

use std::fmt;
use std::sync::{Arc, Mutex};

use super::slot::SaveSlot;
use super::{ToWeaveValue, WeaveValue};
use crate::refs::{Reference, TableRowRef};

/// Ordered rows saved together under one content digest.
///
/// Row references become available only after the table's own save resolves.
#[derive(Clone)]
pub struct Table {
    inner: Arc<TableInner>,
}

struct TableInner {
    rows: Vec<WeaveValue>,
    row_refs: Mutex<Vec<TableRowRef>>,
    slot: SaveSlot<Reference>,
}

impl Table {
    pub fn new(rows: Vec<WeaveValue>) -> Self {
        Self {
            inner: Arc::new(TableInner {
                rows,
                row_refs: Mutex::new(Vec::new()),
                slot: SaveSlot::new(),
            }),
        }
    }

    /// A table already persisted, with its row references known.
    pub(crate) fn saved(rows: Vec<WeaveValue>, reference: Reference, row_refs: Vec<TableRowRef>) -> Self {
        let table = Self::new(rows);
        table.inner.slot.set_resolved(reference);
        table.set_row_refs(row_refs);
        table
    }

    pub fn rows(&self) -> &[WeaveValue] {
        &self.inner.rows
    }

    pub fn len(&self) -> usize {
        self.inner.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.rows.is_empty()
    }

    /// Reference of row `index`, once the table has been saved.
    pub fn row_ref(&self, index: usize) -> Option<TableRowRef> {
        self.row_refs().get(index).cloned()
    }

    /// All row references; empty until the table's own save has resolved.
    pub fn row_refs(&self) -> Vec<TableRowRef> {
        if self.saved_ref().is_none() {
            return Vec::new();
        }
        self.inner
            .row_refs
            .lock()
            .map(|refs| refs.clone())
            .unwrap_or_default()
    }

    pub(crate) fn set_row_refs(&self, refs: Vec<TableRowRef>) {
        if let Ok(mut guard) = self.inner.row_refs.lock() {
            *guard = refs;
        }
    }

    pub fn saved_ref(&self) -> Option<Reference> {
        self.inner.slot.resolved()
    }

    pub(crate) fn slot(&self) -> &SaveSlot<Reference> {
        &self.inner.slot
    }

    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Table")
            .field("rows", &self.inner.rows.len())
            .field("saved", &self.inner.slot.is_started())
            .finish()
    }
}

impl ToWeaveValue for Table {
    fn to_weave_value(&self) -> WeaveValue {
        WeaveValue::Table(self.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::refs::TableRef;
    use serde_json::json;

    #[test]
    fn test_row_refs_empty_until_saved() {
        let table = Table::new(vec![WeaveValue::from(json!({"a": 1}))]);
        assert!(table.row_refs().is_empty());
        assert!(table.row_ref(0).is_none());
    }

    #[test]
    fn test_saved_table() {
        let table_ref = TableRef::new("e/p", "t1");
        let table = Table::saved(
            vec![WeaveValue::from(json!({"a": 1}))],
            table_ref.clone().into(),
            vec![table_ref.row("r1")],
        );
        assert_eq!(table.saved_ref(), Some(Reference::Table(table_ref.clone())));
        assert_eq!(table.row_ref(0), Some(table_ref.row("r1")));
    }

    #[test]
    fn test_row_refs_hidden_while_save_pending() {
        let table = Table::new(vec![WeaveValue::from(json!({"a": 1}))]);
        table.set_row_refs(vec![TableRef::new("e/p", "t1").row("r1")]);
        assert!(table.row_refs().is_empty());
    }
}
