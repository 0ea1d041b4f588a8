// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Collaborator ports: the row store and the formula evaluator.
//!
//! Both are synchronous and take `&self`; adapters that hold mutable state
//! keep it behind their own lock so a single instance can be shared across
//! concurrent requests.

use crate::annotation::AggregateSpec;
use crate::row::{values_equal, Delta, Row, RowKey};
use crate::schema::{Actor, TableSchema};
use serde_json::Value;
use std::collections::BTreeMap;
use thiserror::Error;

/// Condition on one field.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldMatch {
    /// Field equals the value.
    Eq(Value),
    /// Field equals any of the values.
    In(Vec<Value>),
    /// Field is null or absent.
    IsNull,
}

impl FieldMatch {
    /// Test a field value.
    pub fn matches(&self, value: Option<&Value>) -> bool {
        let value = value.unwrap_or(&Value::Null);
        match self {
            Self::Eq(expected) => values_equal(value, expected),
            Self::In(options) => options.iter().any(|o| values_equal(value, o)),
            Self::IsNull => value.is_null(),
        }
    }
}

/// Conjunction of per-field conditions.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter(BTreeMap<String, FieldMatch>);

impl Filter {
    /// Match everything.
    pub fn new() -> Self {
        Self::default()
    }

    /// Equality condition.
    pub fn equals(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(field.into(), FieldMatch::Eq(value.into()));
        self
    }

    /// Inclusion condition.
    pub fn any_of(mut self, field: impl Into<String>, values: Vec<Value>) -> Self {
        self.0.insert(field.into(), FieldMatch::In(values));
        self
    }

    /// Null condition.
    pub fn is_null(mut self, field: impl Into<String>) -> Self {
        self.0.insert(field.into(), FieldMatch::IsNull);
        self
    }

    /// Filter selecting one row by key.
    pub fn key(field: impl Into<String>, key: &RowKey) -> Self {
        Self::new().equals(field, key.to_value())
    }

    /// Condition on `field`, if any.
    pub fn get(&self, field: &str) -> Option<&FieldMatch> {
        self.0.get(field)
    }

    /// Iterate conditions in field order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &FieldMatch)> {
        self.0.iter()
    }

    /// True when the filter matches every row.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Test a row.
    pub fn matches(&self, row: &Row) -> bool {
        self.0.iter().all(|(field, m)| m.matches(row.get(field)))
    }
}

/// Sort request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderBy {
    /// Column.
    pub field: String,
    /// Case-insensitive text comparison.
    pub nocase: bool,
}

/// Row fetch request.
#[derive(Debug, Clone, PartialEq)]
pub struct RowQuery {
    /// Table to read.
    pub table: String,
    /// Row filter.
    pub filter: Filter,
    /// Optional ordering.
    pub order_by: Option<OrderBy>,
    /// Computed aggregate columns to attach to each row.
    pub aggregates: Vec<AggregateSpec>,
}

impl RowQuery {
    /// Unfiltered, unordered fetch of `table`.
    pub fn table(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            filter: Filter::new(),
            order_by: None,
            aggregates: Vec::new(),
        }
    }
}

/// Failures reported by a row store.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// The table is not known to the store.
    #[error("unknown table `{0}`")]
    UnknownTable(String),
    /// A referenced row does not exist.
    #[error("row {key} not found in `{table}`")]
    NotFound {
        /// Table searched.
        table: String,
        /// Missing key.
        key: RowKey,
    },
    /// Row-level access control rejected the operation.
    #[error("forbidden: {0}")]
    Forbidden(String),
    /// The write is malformed for this table.
    #[error("invalid write: {0}")]
    Invalid(String),
    /// Storage fault.
    #[error("backend failure: {0}")]
    Backend(String),
}

/// Storage, query and access control for rows.
pub trait RowStore: Send + Sync {
    /// Shape and policy of `table`.
    fn schema(&self, table: &str) -> Result<TableSchema, StoreError>;

    /// Rows matching `query`, visible to `actor`, with aggregates attached
    /// under their computed column names.
    fn get_rows(&self, query: &RowQuery, actor: &Actor) -> Result<Vec<Row>, StoreError>;

    /// One row by key. Absence is `Ok(None)`.
    fn get_row(&self, table: &str, key: &RowKey) -> Result<Option<Row>, StoreError>;

    /// Batched key → label lookup on `table`. Missing keys are left out.
    fn lookup_labels(
        &self,
        table: &str,
        label_field: &str,
        keys: &[RowKey],
    ) -> Result<BTreeMap<RowKey, String>, StoreError>;

    /// Insert a row, returning its key.
    fn insert_row(&self, table: &str, values: Row, actor: &Actor) -> Result<RowKey, StoreError>;

    /// Apply `delta` to one row as a single update.
    fn update_row(
        &self,
        table: &str,
        delta: &Delta,
        key: &RowKey,
        actor: &Actor,
    ) -> Result<(), StoreError>;

    /// Delete every row matching `filter`.
    fn delete_rows(&self, table: &str, filter: &Filter, actor: &Actor) -> Result<(), StoreError>;
}

/// Variables visible to a formula.
#[derive(Debug, Clone, Copy)]
pub enum Scope<'a> {
    /// Fields of an existing row.
    Row(&'a Row),
    /// A row being created under `parent` (`None` for a root).
    NewRow {
        /// The prospective parent row.
        parent: Option<&'a Row>,
    },
}

/// Formula evaluation failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FormulaError {
    /// The expression could not be evaluated.
    #[error("formula `{expr}` failed: {reason}")]
    Eval {
        /// Expression text.
        expr: String,
        /// Evaluator message.
        reason: String,
    },
    /// The expression uses syntax the evaluator does not support.
    #[error("formula `{0}` is not supported")]
    Unsupported(String),
}

/// Pure, read-only expression evaluation.
pub trait FormulaEvaluator: Send + Sync {
    /// Evaluate `expr` against `scope` on behalf of `actor`.
    fn evaluate(&self, expr: &str, scope: &Scope<'_>, actor: &Actor)
        -> Result<Value, FormulaError>;
}

/// Predicate truthiness: null, `false`, zero and `""` are falsy.
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn filter_matches_equality_inclusion_and_null() {
        let row = Row::new().with("a", 1).with("b", "x");
        assert!(Filter::new().equals("a", 1).matches(&row));
        assert!(Filter::new().equals("a", 1.0).matches(&row));
        assert!(!Filter::new().equals("a", 2).matches(&row));
        assert!(Filter::new()
            .any_of("b", vec![json!("y"), json!("x")])
            .matches(&row));
        assert!(Filter::new().is_null("missing").matches(&row));
        assert!(!Filter::new().is_null("a").matches(&row));
    }

    #[test]
    fn truthiness_follows_formula_conventions() {
        assert!(!is_truthy(&json!(null)));
        assert!(!is_truthy(&json!(0)));
        assert!(!is_truthy(&json!("")));
        assert!(is_truthy(&json!("no")));
        assert!(is_truthy(&json!([])));
    }
}
