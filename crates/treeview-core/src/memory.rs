// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! In-process [`RowStore`].
//!
//! Holds every table behind one lock so multi-table checks (foreign keys,
//! aggregates) see a consistent snapshot. Enforces the table's role policy and
//! per-row ownership; aggregates are computed on read under the column names
//! the builder expects.

use crate::annotation::{AggregateSpec, AggregateStat};
use crate::ports::{Filter, RowQuery, RowStore, StoreError};
use crate::row::{compare_values, values_equal, Delta, KeyKind, Row, RowKey};
use crate::schema::{Actor, TableSchema};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::debug;

/// A table and its initial rows, as loaded from a seed file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableSeed {
    /// Table shape and policy.
    pub schema: TableSchema,
    /// Initial rows.
    #[serde(default)]
    pub rows: Vec<Row>,
}

#[derive(Debug)]
struct MemoryTable {
    schema: TableSchema,
    rows: Vec<Row>,
}

impl MemoryTable {
    fn key_of(&self, row: &Row) -> Option<RowKey> {
        row.key(&self.schema.key_field, self.schema.key_kind)
    }

    fn position(&self, key: &RowKey) -> Option<usize> {
        self.rows
            .iter()
            .position(|r| self.key_of(r).as_ref() == Some(key))
    }

    fn next_key(&self) -> Result<RowKey, StoreError> {
        match self.schema.key_kind {
            KeyKind::Integer => Ok(RowKey::Int(
                self.rows
                    .iter()
                    .filter_map(|r| match self.key_of(r) {
                        Some(RowKey::Int(n)) => Some(n),
                        _ => None,
                    })
                    .max()
                    .unwrap_or(0)
                    + 1,
            )),
            KeyKind::Text => Err(StoreError::Invalid(format!(
                "`{}` needs an explicit `{}` value",
                self.schema.name, self.schema.key_field
            ))),
        }
    }
}

type Tables = BTreeMap<String, MemoryTable>;

fn table<'t>(tables: &'t Tables, name: &str) -> Result<&'t MemoryTable, StoreError> {
    tables
        .get(name)
        .ok_or_else(|| StoreError::UnknownTable(name.to_owned()))
}

fn table_mut<'t>(tables: &'t mut Tables, name: &str) -> Result<&'t mut MemoryTable, StoreError> {
    tables
        .get_mut(name)
        .ok_or_else(|| StoreError::UnknownTable(name.to_owned()))
}

/// Role gate with ownership fallback: a weak role may still write rows it owns.
fn authorize_write(schema: &TableSchema, row: &Row, actor: &Actor) -> Result<(), StoreError> {
    if actor.role.satisfies(schema.min_role_write) || schema.is_owner(row, actor) {
        return Ok(());
    }
    Err(StoreError::Forbidden(format!(
        "role {} may not write `{}`",
        actor.role.0, schema.name
    )))
}

/// Every field must exist; every set foreign key must name a loaded row.
fn check_fields(tables: &Tables, schema: &TableSchema, values: &Row) -> Result<(), StoreError> {
    for (field, value) in values.iter() {
        if schema.field_type(field).is_none() {
            return Err(StoreError::Invalid(format!(
                "unknown field `{field}` on `{}`",
                schema.name
            )));
        }
        let Some(target) = schema.field(field).and_then(|f| f.references.as_deref()) else {
            continue;
        };
        let Some(target) = tables.get(target) else {
            continue;
        };
        if value.is_null() {
            continue;
        }
        let key = RowKey::from_value(value)
            .map(|k| k.coerce(target.schema.key_kind))
            .ok_or_else(|| StoreError::Invalid(format!("`{field}` holds {value}, not a key")))?;
        if target.position(&key).is_none() {
            return Err(StoreError::NotFound {
                table: target.schema.name.clone(),
                key,
            });
        }
    }
    Ok(())
}

fn aggregate(tables: &Tables, spec: &AggregateSpec, key: &RowKey) -> Result<Value, StoreError> {
    if spec.filter.as_deref().is_some_and(|f| !f.trim().is_empty()) {
        return Err(StoreError::Backend(format!(
            "aggregate filter on `{}` needs a formula-capable store",
            spec.column
        )));
    }
    let related = table(tables, &spec.table)?;
    let needle = key.to_value();
    let values: Vec<&Value> = related
        .rows
        .iter()
        .filter(|r| r.get(&spec.via).is_some_and(|v| values_equal(v, &needle)))
        .filter_map(|r| r.get(&spec.field))
        .filter(|v| !v.is_null())
        .collect();

    Ok(match spec.stat {
        AggregateStat::Count => Value::from(values.len()),
        AggregateStat::CountUnique => {
            let mut unique: Vec<&Value> = Vec::new();
            for &v in &values {
                if !unique.iter().any(|u| values_equal(u, v)) {
                    unique.push(v);
                }
            }
            Value::from(unique.len())
        }
        AggregateStat::Sum => sum(&values),
        AggregateStat::Avg => {
            let numbers: Vec<f64> = values.iter().filter_map(|v| v.as_f64()).collect();
            if numbers.is_empty() {
                Value::Null
            } else {
                #[allow(clippy::cast_precision_loss)]
                let mean = numbers.iter().sum::<f64>() / numbers.len() as f64;
                Value::from(mean)
            }
        }
        AggregateStat::Max => values
            .iter()
            .copied()
            .max_by(|a, b| compare_values(Some(*a), Some(*b), false))
            .cloned()
            .unwrap_or(Value::Null),
        AggregateStat::Min => values
            .iter()
            .copied()
            .min_by(|a, b| compare_values(Some(*a), Some(*b), false))
            .cloned()
            .unwrap_or(Value::Null),
        AggregateStat::ArrayAgg => Value::Array(values.into_iter().cloned().collect()),
    })
}

fn sum(values: &[&Value]) -> Value {
    let ints: Option<i64> = values
        .iter()
        .try_fold(0_i64, |acc, v| v.as_i64().and_then(|n| acc.checked_add(n)));
    ints.map_or_else(
        || Value::from(values.iter().filter_map(|v| v.as_f64()).sum::<f64>()),
        Value::from,
    )
}

/// Thread-safe in-memory row store.
#[derive(Debug, Clone, Default)]
pub struct MemoryRowStore {
    inner: Arc<Mutex<Tables>>,
}

impl MemoryRowStore {
    /// Store with no tables.
    pub fn new() -> Self {
        Self::default()
    }

    /// Store loaded from seeds.
    pub fn from_seeds(seeds: impl IntoIterator<Item = TableSeed>) -> Self {
        let store = Self::new();
        for seed in seeds {
            store.add_table(seed.schema, seed.rows);
        }
        store
    }

    /// Builder-style [`add_table`](Self::add_table).
    pub fn with_table(self, schema: TableSchema, rows: Vec<Row>) -> Self {
        self.add_table(schema, rows);
        self
    }

    /// Register (or replace) a table.
    pub fn add_table(&self, schema: TableSchema, rows: Vec<Row>) {
        self.lock()
            .insert(schema.name.clone(), MemoryTable { schema, rows });
    }

    /// Snapshot of a table's rows in storage order.
    pub fn rows(&self, table_name: &str) -> Result<Vec<Row>, StoreError> {
        Ok(table(&self.lock(), table_name)?.rows.clone())
    }

    fn lock(&self) -> MutexGuard<'_, Tables> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl RowStore for MemoryRowStore {
    fn schema(&self, table_name: &str) -> Result<TableSchema, StoreError> {
        Ok(table(&self.lock(), table_name)?.schema.clone())
    }

    fn get_rows(&self, query: &RowQuery, actor: &Actor) -> Result<Vec<Row>, StoreError> {
        let tables = self.lock();
        let source = table(&tables, &query.table)?;
        if !actor.role.satisfies(source.schema.min_role_read) {
            return Err(StoreError::Forbidden(format!(
                "role {} may not read `{}`",
                actor.role.0, query.table
            )));
        }
        let mut rows: Vec<Row> = source
            .rows
            .iter()
            .filter(|r| query.filter.matches(r))
            .cloned()
            .collect();
        if let Some(order) = &query.order_by {
            rows.sort_by(|a, b| compare_values(a.get(&order.field), b.get(&order.field), order.nocase));
        }
        if !query.aggregates.is_empty() {
            for row in &mut rows {
                let Some(key) = source.key_of(row) else {
                    continue;
                };
                for spec in &query.aggregates {
                    let value = aggregate(&tables, spec, &key)?;
                    row.insert(spec.column.clone(), value);
                }
            }
        }
        debug!(table = %query.table, count = rows.len(), "rows read");
        Ok(rows)
    }

    fn get_row(&self, table_name: &str, key: &RowKey) -> Result<Option<Row>, StoreError> {
        let tables = self.lock();
        let source = table(&tables, table_name)?;
        Ok(source.position(key).map(|i| source.rows[i].clone()))
    }

    fn lookup_labels(
        &self,
        table_name: &str,
        label_field: &str,
        keys: &[RowKey],
    ) -> Result<BTreeMap<RowKey, String>, StoreError> {
        let tables = self.lock();
        let source = table(&tables, table_name)?;
        Ok(keys
            .iter()
            .filter_map(|key| {
                let kind_key = key.clone().coerce(source.schema.key_kind);
                source
                    .position(&kind_key)
                    .map(|i| (key.clone(), source.rows[i].text(label_field)))
            })
            .collect())
    }

    fn insert_row(&self, table_name: &str, mut values: Row, actor: &Actor) -> Result<RowKey, StoreError> {
        let mut tables = self.lock();
        let target = table(&tables, table_name)?;
        let schema = target.schema.clone();
        if let (Some(field), Some(user)) = (&schema.ownership_field, &actor.user_id) {
            if !values.is_set(field) {
                values.insert(field.clone(), user.to_value());
            }
        }
        authorize_write(&schema, &values, actor)?;
        check_fields(&tables, &schema, &values)?;

        let key = match values.key(&schema.key_field, schema.key_kind) {
            Some(key) if target.position(&key).is_some() => {
                return Err(StoreError::Invalid(format!(
                    "duplicate key {key} in `{table_name}`"
                )))
            }
            Some(key) => key,
            None => target.next_key()?,
        };
        values.insert(schema.key_field.clone(), key.to_value());
        table_mut(&mut tables, table_name)?.rows.push(values);
        debug!(table = table_name, %key, "row inserted");
        Ok(key)
    }

    fn update_row(
        &self,
        table_name: &str,
        delta: &Delta,
        key: &RowKey,
        actor: &Actor,
    ) -> Result<(), StoreError> {
        let mut tables = self.lock();
        let target = table(&tables, table_name)?;
        let schema = &target.schema;
        let index = target.position(key).ok_or_else(|| StoreError::NotFound {
            table: table_name.to_owned(),
            key: key.clone(),
        })?;
        if delta
            .key(&schema.key_field, schema.key_kind)
            .is_some_and(|k| &k != key)
        {
            return Err(StoreError::Invalid(format!(
                "`{}` cannot be changed",
                schema.key_field
            )));
        }
        authorize_write(schema, &target.rows[index], actor)?;
        check_fields(&tables, schema, delta)?;
        table_mut(&mut tables, table_name)?.rows[index].merge(delta);
        debug!(table = table_name, %key, fields = delta.len(), "row updated");
        Ok(())
    }

    fn delete_rows(&self, table_name: &str, filter: &Filter, actor: &Actor) -> Result<(), StoreError> {
        let mut tables = self.lock();
        let target = table_mut(&mut tables, table_name)?;
        let schema = &target.schema;
        for row in target.rows.iter().filter(|r| filter.matches(r)) {
            authorize_write(schema, row, actor)?;
        }
        let before = target.rows.len();
        target.rows.retain(|r| !filter.matches(r));
        debug!(table = table_name, removed = before - target.rows.len(), "rows deleted");
        Ok(())
    }
}
