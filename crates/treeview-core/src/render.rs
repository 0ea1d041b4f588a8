// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Render orchestration: filter state → row query → forest.

use crate::annotation::{aggregate_specs, AnnotationKind, AnnotationRule};
use crate::builder::{build, BuildContext, ChildLabels, RenderFlags, VirtualRoot};
use crate::config::{Linkage, LinkageError, ViewConfig};
use crate::ports::{is_truthy, Filter, FormulaEvaluator, OrderBy, RowQuery, RowStore, Scope, StoreError};
use crate::row::{Row, RowKey};
use crate::schema::{Actor, FieldType, TableSchema};
use crate::tree::Forest;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;
use tracing::{debug, warn};

/// Control key carrying the per-request leaf-expansion flag.
pub const EXPAND_LEAVES_KEY: &str = "_expand_leaves";

/// Per-request filter state: field → value, plus `_`-prefixed control keys.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FilterState(BTreeMap<String, Value>);

impl FilterState {
    /// Empty state.
    pub fn new() -> Self {
        Self::default()
    }

    /// State from query-string pairs. Values stay text until the schema is
    /// known; blank values are dropped.
    pub fn from_query<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self(
            pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .filter(|(_, v)| !v.is_empty())
                .map(|(k, v)| (k, Value::String(v)))
                .collect(),
        )
    }

    /// Builder-style setter.
    pub fn with(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(field.into(), value.into());
        self
    }

    /// Raw value of `field`.
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field).filter(|v| !v.is_null())
    }

    /// True when the request asks for aggregate leaves.
    pub fn expand_leaves(&self) -> bool {
        self.0.get(EXPAND_LEAVES_KEY).is_some_and(|v| match v {
            Value::String(s) => matches!(s.as_str(), "true" | "on" | "1"),
            other => is_truthy(other),
        })
    }

    fn key(&self, field: &str, schema: &TableSchema) -> Option<RowKey> {
        self.get(field)
            .and_then(RowKey::from_value)
            .map(|k| k.coerce(schema.key_kind))
    }
}

/// Normalize a posted state value to the column's type; unparsable text is
/// passed through and simply matches nothing.
fn coerce_state_value(value: &Value, ty: FieldType) -> Value {
    let Value::String(text) = value else {
        return value.clone();
    };
    let parsed = match ty {
        FieldType::Integer => text.trim().parse::<i64>().ok().map(Value::from),
        FieldType::Float => text.trim().parse::<f64>().ok().map(Value::from),
        FieldType::Bool => match text.as_str() {
            "true" | "on" => Some(Value::Bool(true)),
            "false" | "off" => Some(Value::Bool(false)),
            _ => None,
        },
        FieldType::String | FieldType::Date | FieldType::Json => None,
    };
    parsed.unwrap_or_else(|| value.clone())
}

/// A named view: saved configuration, its table and the validated linkage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ViewDefinition {
    /// View name.
    pub name: String,
    /// Saved configuration.
    pub config: ViewConfig,
    /// Tree table schema.
    pub schema: TableSchema,
    /// Resolved link structure.
    pub linkage: Linkage,
}

impl ViewDefinition {
    /// Validate `config` against `schema`.
    pub fn new(
        name: impl Into<String>,
        config: ViewConfig,
        schema: TableSchema,
    ) -> Result<Self, LinkageError> {
        let linkage = config.resolve(&schema)?;
        Ok(Self {
            name: name.into(),
            config,
            schema,
            linkage,
        })
    }

    /// Configured annotation rules.
    pub fn rules(&self) -> &[AnnotationRule] {
        &self.config.annotations
    }
}

/// Payload handed to the presentation layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenderedTree {
    /// Materialized nodes.
    pub forest: Forest,
    /// Primary-key column, used by the client to set the key filter.
    pub key_field: String,
    /// Node named by the key filter; only set on filtering views.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selected: Option<RowKey>,
    /// Selecting a node filters sibling views.
    pub filtering: bool,
    /// Nodes may be dragged.
    pub drag_and_drop: bool,
}

/// Render failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RenderError {
    /// The row store failed.
    #[error(transparent)]
    Store(#[from] StoreError),
    /// The root relation value in the filter state names no row.
    #[error("virtual root {key} not found in `{table}`")]
    NotFound {
        /// Referenced table.
        table: String,
        /// Requested key.
        key: RowKey,
    },
}

fn row_query(view: &ViewDefinition, state: &FilterState) -> RowQuery {
    let schema = &view.schema;
    let mut filter = Filter::new();
    for (field, value) in &state.0 {
        if field.starts_with('_') || *field == schema.key_field || value.is_null() {
            continue;
        }
        if let Some(ty) = schema.field_type(field) {
            filter = filter.equals(field.as_str(), coerce_state_value(value, ty));
        }
    }
    RowQuery {
        table: schema.name.clone(),
        filter,
        order_by: view.linkage.order.as_ref().map(|order| OrderBy {
            field: order.field.clone(),
            nocase: order.nocase(),
        }),
        aggregates: aggregate_specs(view.rules()),
    }
}

fn apply_include(
    rows: Vec<Row>,
    formula: Option<&str>,
    evaluator: &dyn FormulaEvaluator,
    actor: &Actor,
) -> Vec<Row> {
    let Some(expr) = formula else {
        return rows;
    };
    rows.into_iter()
        .filter(|row| match evaluator.evaluate(expr, &Scope::Row(row), actor) {
            Ok(value) => is_truthy(&value),
            Err(err) => {
                warn!(%err, "include formula failed; row hidden");
                false
            }
        })
        .collect()
}

fn virtual_root(
    view: &ViewDefinition,
    store: &dyn RowStore,
    state: &FilterState,
) -> Result<Option<VirtualRoot>, RenderError> {
    let Some(relation) = &view.linkage.root_relation else {
        return Ok(None);
    };
    let Some(raw) = state.get(&relation.field).and_then(RowKey::from_value) else {
        return Ok(None);
    };
    let kind = store.schema(&relation.table)?.key_kind;
    let key = raw.coerce(kind);
    let row = store
        .get_row(&relation.table, &key)?
        .ok_or_else(|| RenderError::NotFound {
            table: relation.table.clone(),
            key: key.clone(),
        })?;
    let label = relation
        .label_field
        .as_deref()
        .map_or_else(|| key.to_string(), |field| row.text(field));
    Ok(Some(VirtualRoot { key, label }))
}

/// One batched label lookup per child-links rule over every id in `rows`.
fn child_labels(
    rules: &[AnnotationRule],
    rows: &[Row],
    store: &dyn RowStore,
) -> Result<ChildLabels, StoreError> {
    let mut labels = ChildLabels::new();
    let mut seen = BTreeSet::new();
    for rule in rules {
        let AnnotationKind::ChildLinks(links) = &rule.kind else {
            continue;
        };
        let column = links.column();
        if !seen.insert((column.clone(), links.label_field.clone())) {
            continue;
        }
        let keys: BTreeSet<RowKey> = rows
            .iter()
            .filter_map(|row| row.get(&column))
            .filter_map(Value::as_array)
            .flatten()
            .filter_map(RowKey::from_value)
            .collect();
        if keys.is_empty() {
            continue;
        }
        let keys: Vec<RowKey> = keys.into_iter().collect();
        debug!(table = %links.table, count = keys.len(), "child label lookup");
        let found = store.lookup_labels(&links.table, &links.label_field, &keys)?;
        labels.insert(column, links.label_field.clone(), found);
    }
    Ok(labels)
}

/// Fetch, filter and build the tree for one request.
pub fn render_view(
    view: &ViewDefinition,
    store: &dyn RowStore,
    evaluator: &dyn FormulaEvaluator,
    actor: &Actor,
    state: &FilterState,
) -> Result<RenderedTree, RenderError> {
    let query = row_query(view, state);
    let rows = store.get_rows(&query, actor)?;
    let fetched = rows.len();
    let rows = apply_include(rows, view.config.include_formula(), evaluator, actor);
    debug!(view = %view.name, fetched, shown = rows.len(), "rows fetched");

    let selected = if view.config.filtering {
        state.key(&view.schema.key_field, &view.schema)
    } else {
        None
    };
    let ctx = BuildContext::new(evaluator, actor)
        .with_flags(RenderFlags {
            expand_leaves: state.expand_leaves(),
            expand_all: view.config.expand_all,
            selected: selected.clone(),
        })
        .with_virtual_root(virtual_root(view, store, state)?)
        .with_child_labels(child_labels(view.rules(), &rows, store)?);

    Ok(RenderedTree {
        forest: build(&rows, &view.linkage, view.rules(), &ctx),
        key_field: view.schema.key_field.clone(),
        selected,
        filtering: view.config.filtering,
        drag_and_drop: view.config.drag_and_drop,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::FieldInfo;
    use serde_json::json;

    fn view() -> ViewDefinition {
        let schema = TableSchema::new(
            "tasks",
            vec![
                FieldInfo::new("title", FieldType::String),
                FieldInfo::reference("parent", FieldType::Integer, "tasks"),
                FieldInfo::new("rank", FieldType::String),
                FieldInfo::new("done", FieldType::Bool),
            ],
        );
        let mut config = ViewConfig::new("title", "parent");
        config.order_field = Some("rank".into());
        ViewDefinition::new("outline", config, schema).unwrap()
    }

    #[test]
    fn query_skips_key_control_and_unknown_fields() {
        let state = FilterState::from_query([
            ("id", "4"),
            ("done", "true"),
            ("_expand_leaves", "on"),
            ("nope", "x"),
            ("title", ""),
        ]);
        let query = row_query(&view(), &state);
        assert_eq!(query.filter, Filter::new().equals("done", true));
        assert_eq!(
            query.order_by,
            Some(OrderBy {
                field: "rank".into(),
                nocase: true
            })
        );
        assert!(state.expand_leaves());
    }

    #[test]
    fn state_values_follow_column_types() {
        assert_eq!(coerce_state_value(&json!("12"), FieldType::Integer), json!(12));
        assert_eq!(coerce_state_value(&json!("1.5"), FieldType::Float), json!(1.5));
        assert_eq!(coerce_state_value(&json!("x"), FieldType::Integer), json!("x"));
        assert_eq!(coerce_state_value(&json!(3), FieldType::String), json!(3));
    }

    #[test]
    fn expand_leaves_defaults_off() {
        assert!(!FilterState::new().expand_leaves());
        assert!(!FilterState::new().with(EXPAND_LEAVES_KEY, "false").expand_leaves());
        assert!(FilterState::new().with(EXPAND_LEAVES_KEY, true).expand_leaves());
    }
}
