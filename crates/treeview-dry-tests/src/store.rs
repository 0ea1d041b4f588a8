// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Call-recording [`RowStore`] wrapper.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use treeview_core::{
    Actor, Delta, Filter, Row, RowKey, RowQuery, RowStore, StoreError, TableSchema,
};

/// One call observed by [`RecordingStore`].
#[derive(Debug, Clone, PartialEq)]
pub enum StoreCall {
    /// `schema(table)`.
    Schema(String),
    /// `get_rows(query, _)`.
    GetRows(RowQuery),
    /// `get_row(table, key)`.
    GetRow(String, RowKey),
    /// `lookup_labels(table, label_field, keys)`.
    LookupLabels {
        /// Table.
        table: String,
        /// Keys requested.
        keys: Vec<RowKey>,
    },
    /// `insert_row(table, values, _)`.
    Insert {
        /// Table.
        table: String,
        /// Values written.
        values: Row,
    },
    /// `update_row(table, delta, key, _)`.
    Update {
        /// Table.
        table: String,
        /// Row key.
        key: RowKey,
        /// Fields written.
        delta: Delta,
    },
    /// `delete_rows(table, filter, _)`.
    Delete {
        /// Table.
        table: String,
        /// Selection.
        filter: Filter,
    },
}

impl StoreCall {
    /// True for insert, update and delete.
    pub fn is_write(&self) -> bool {
        matches!(
            self,
            Self::Insert { .. } | Self::Update { .. } | Self::Delete { .. }
        )
    }
}

#[derive(Default)]
struct Log {
    calls: Vec<StoreCall>,
    fail_writes: bool,
}

/// Wraps a store, recording every call and optionally failing writes.
///
/// # Example
///
/// ```
/// use treeview_core::{MemoryRowStore, RowStore};
/// use treeview_dry_tests::RecordingStore;
///
/// let store = RecordingStore::new(MemoryRowStore::new());
/// assert!(store.schema("missing").is_err());
/// assert_eq!(store.calls().len(), 1);
/// ```
#[derive(Clone)]
pub struct RecordingStore<S> {
    inner: S,
    log: Arc<Mutex<Log>>,
}

impl<S> RecordingStore<S> {
    /// Wrap `inner`.
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            log: Arc::default(),
        }
    }

    /// The wrapped store.
    pub fn inner(&self) -> &S {
        &self.inner
    }

    /// Make every write return a backend error (recorded first).
    pub fn set_fail_writes(&self, fail: bool) {
        self.log.lock().unwrap_or_else(|e| e.into_inner()).fail_writes = fail;
    }

    /// Calls so far, oldest first.
    pub fn calls(&self) -> Vec<StoreCall> {
        self.log
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .calls
            .clone()
    }

    /// Write calls so far.
    pub fn writes(&self) -> Vec<StoreCall> {
        self.calls().into_iter().filter(StoreCall::is_write).collect()
    }

    fn record(&self, call: StoreCall) -> Result<(), StoreError> {
        let mut log = self.log.lock().unwrap_or_else(|e| e.into_inner());
        let refuse = log.fail_writes && call.is_write();
        log.calls.push(call);
        if refuse {
            return Err(StoreError::Backend("simulated write failure".into()));
        }
        Ok(())
    }
}

impl<S: RowStore> RowStore for RecordingStore<S> {
    fn schema(&self, table: &str) -> Result<TableSchema, StoreError> {
        self.record(StoreCall::Schema(table.to_owned()))?;
        self.inner.schema(table)
    }

    fn get_rows(&self, query: &RowQuery, actor: &Actor) -> Result<Vec<Row>, StoreError> {
        self.record(StoreCall::GetRows(query.clone()))?;
        self.inner.get_rows(query, actor)
    }

    fn get_row(&self, table: &str, key: &RowKey) -> Result<Option<Row>, StoreError> {
        self.record(StoreCall::GetRow(table.to_owned(), key.clone()))?;
        self.inner.get_row(table, key)
    }

    fn lookup_labels(
        &self,
        table: &str,
        label_field: &str,
        keys: &[RowKey],
    ) -> Result<BTreeMap<RowKey, String>, StoreError> {
        self.record(StoreCall::LookupLabels {
            table: table.to_owned(),
            keys: keys.to_vec(),
        })?;
        self.inner.lookup_labels(table, label_field, keys)
    }

    fn insert_row(&self, table: &str, values: Row, actor: &Actor) -> Result<RowKey, StoreError> {
        self.record(StoreCall::Insert {
            table: table.to_owned(),
            values: values.clone(),
        })?;
        self.inner.insert_row(table, values, actor)
    }

    fn update_row(
        &self,
        table: &str,
        delta: &Delta,
        key: &RowKey,
        actor: &Actor,
    ) -> Result<(), StoreError> {
        self.record(StoreCall::Update {
            table: table.to_owned(),
            key: key.clone(),
            delta: delta.clone(),
        })?;
        self.inner.update_row(table, delta, key, actor)
    }

    fn delete_rows(&self, table: &str, filter: &Filter, actor: &Actor) -> Result<(), StoreError> {
        self.record(StoreCall::Delete {
            table: table.to_owned(),
            filter: filter.clone(),
        })?;
        self.inner.delete_rows(table, filter, actor)
    }
}
