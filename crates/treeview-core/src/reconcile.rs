// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Mutation reconciler: user gestures → authorized row mutations.
//!
//! Every command ends in either an [`Effect`] or a [`ReconcileError`]. The
//! reconciler decides *what* to write; the write itself goes through the
//! [`RowStore`], as one call per command.

use crate::config::OrderSpec;
use crate::ports::{Filter, FormulaEvaluator, RowStore, Scope, StoreError};
use crate::render::ViewDefinition;
use crate::row::{display_value, Delta, KeyKind, Row, RowKey};
use crate::schema::{Actor, FieldType};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info};

/// Payload value meaning "no parent".
pub const ROOT_SENTINEL: &str = "root";

/// Parent designation in a command payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParentRef {
    /// No parent supplied (absent, `null` or `""`).
    Omitted,
    /// Explicit [`ROOT_SENTINEL`].
    Root,
    /// A parent row.
    Key(RowKey),
}

impl ParentRef {
    /// Read a `parent_id` payload value, normalizing keys to `kind`.
    pub fn from_payload(value: Option<&Value>, kind: KeyKind) -> Result<Self, ReconcileError> {
        match value {
            None | Some(Value::Null) => Ok(Self::Omitted),
            Some(Value::String(s)) if s.is_empty() => Ok(Self::Omitted),
            Some(Value::String(s)) if s == ROOT_SENTINEL => Ok(Self::Root),
            Some(other) => RowKey::from_value(other)
                .map(|k| Self::Key(k.coerce(kind)))
                .ok_or_else(|| ReconcileError::Validation(format!("invalid parent_id {other}"))),
        }
    }

    /// The parent key, or `None` for a root. Both null-parent forms collapse here.
    pub fn resolve(&self) -> Option<&RowKey> {
        match self {
            Self::Key(key) => Some(key),
            Self::Omitted | Self::Root => None,
        }
    }
}

/// Closed set of mutation commands.
#[derive(Debug, Clone, PartialEq)]
pub enum MutationCommand {
    /// Move a node under a new parent (or to the root).
    Reparent {
        /// Node moved.
        id: RowKey,
        /// New parent.
        parent: ParentRef,
    },
    /// Move a node and set its sibling position.
    ReorderAndReparent {
        /// Node moved.
        id: RowKey,
        /// New parent.
        parent: ParentRef,
        /// Requested order value.
        order: Value,
    },
    /// Delete a node. Children keep their now-dangling parent reference.
    Delete {
        /// Node deleted.
        id: RowKey,
    },
    /// Create a node.
    AddChild {
        /// Title of the new node.
        topic: String,
        /// Parent of the new node.
        parent: ParentRef,
        /// Root-relation value for the new row.
        root_value: Option<Value>,
    },
    /// Change a node's title.
    Rename {
        /// Node renamed.
        id: RowKey,
        /// New title.
        topic: String,
    },
}

fn required_id(payload: &Value, kind: KeyKind) -> Result<RowKey, ReconcileError> {
    payload
        .get("id")
        .and_then(RowKey::from_value)
        .map(|k| k.coerce(kind))
        .ok_or_else(|| ReconcileError::Validation("id is required".to_owned()))
}

fn required_topic(payload: &Value) -> Result<String, ReconcileError> {
    match payload.get("topic") {
        Some(v @ (Value::String(_) | Value::Number(_))) => Ok(display_value(v)),
        _ => Err(ReconcileError::Validation("topic is required".to_owned())),
    }
}

impl MutationCommand {
    /// Parse a posted route payload.
    ///
    /// Routes: `drag_drop {id, parent_id?, order_number?}`,
    /// `add_node {topic, parent_id?, root_value?}`, `delete_node {id}` and
    /// `edit_node {id, topic}`.
    pub fn from_route(route: &str, payload: &Value, kind: KeyKind) -> Result<Self, ReconcileError> {
        let parent = || ParentRef::from_payload(payload.get("parent_id"), kind);
        match route {
            "drag_drop" => {
                let id = required_id(payload, kind)?;
                let parent = parent()?;
                Ok(match payload.get("order_number") {
                    None | Some(Value::Null) => Self::Reparent { id, parent },
                    Some(order) => Self::ReorderAndReparent {
                        id,
                        parent,
                        order: order.clone(),
                    },
                })
            }
            "add_node" => Ok(Self::AddChild {
                topic: required_topic(payload)?,
                parent: parent()?,
                root_value: payload.get("root_value").filter(|v| !v.is_null()).cloned(),
            }),
            "delete_node" => Ok(Self::Delete {
                id: required_id(payload, kind)?,
            }),
            "edit_node" => Ok(Self::Rename {
                id: required_id(payload, kind)?,
                topic: required_topic(payload)?,
            }),
            other => Err(ReconcileError::Validation(format!("unknown route `{other}`"))),
        }
    }
}

/// A planned write.
#[derive(Debug, Clone, PartialEq)]
pub enum Mutation {
    /// Single update of one row.
    Update {
        /// Row updated.
        key: RowKey,
        /// Fields written.
        delta: Delta,
    },
    /// Delete by key.
    Delete {
        /// Row deleted.
        key: RowKey,
    },
    /// Insert a composed row.
    Insert {
        /// Field values.
        values: Row,
        /// Echoed title.
        title: String,
    },
}

/// Outcome of a successful command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    /// A row was updated.
    Updated {
        /// Row key.
        id: RowKey,
    },
    /// A row was deleted.
    Deleted {
        /// Row key.
        id: RowKey,
    },
    /// A row was created.
    Inserted {
        /// New key.
        id: RowKey,
        /// Title written.
        title: String,
    },
}

/// Mutation failures reported to the caller.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReconcileError {
    /// The view is read-only.
    #[error("Read only mode")]
    ReadOnly,
    /// Role too weak and rows have no owner to fall back on.
    #[error("not authorized")]
    NotAuthorized,
    /// A referenced row is absent.
    #[error("{0}")]
    NotFound(String),
    /// The payload is malformed.
    #[error("{0}")]
    Validation(String),
    /// Storage fault outside the kinds above.
    #[error("{0}")]
    Store(String),
}

impl ReconcileError {
    /// Stable snake_case code for the error envelope.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ReadOnly => "read_only",
            Self::NotAuthorized => "not_authorized",
            Self::NotFound(_) => "not_found",
            Self::Validation(_) => "validation",
            Self::Store(_) => "store",
        }
    }
}

impl From<StoreError> for ReconcileError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound { .. } => Self::NotFound(err.to_string()),
            StoreError::Forbidden(_) => Self::NotAuthorized,
            StoreError::Invalid(msg) => Self::Validation(msg),
            StoreError::UnknownTable(_) | StoreError::Backend(_) => Self::Store(err.to_string()),
        }
    }
}

/// Uniform wire envelope: `{"success":"ok",...}` or `{"error":..,"kind":..}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Envelope {
    /// Command applied.
    Success {
        /// Always `"ok"`.
        success: String,
        /// Key of a created row.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<RowKey>,
        /// Title of a created row.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        title: Option<String>,
    },
    /// Command rejected.
    Failure {
        /// Human-readable message.
        error: String,
        /// [`ReconcileError::kind`].
        kind: String,
    },
}

impl From<Result<Effect, ReconcileError>> for Envelope {
    fn from(result: Result<Effect, ReconcileError>) -> Self {
        let ok = |id, title| Self::Success {
            success: "ok".to_owned(),
            id,
            title,
        };
        match result {
            Ok(Effect::Inserted { id, title }) => ok(Some(id), Some(title)),
            Ok(Effect::Updated { .. } | Effect::Deleted { .. }) => ok(None, None),
            Err(err) => Self::Failure {
                error: err.to_string(),
                kind: err.kind().to_owned(),
            },
        }
    }
}

/// Order value for `order`, or `None` when the column is not reorderable.
fn order_value(order: &OrderSpec, key_field: &str, raw: &Value) -> Result<Option<Value>, ReconcileError> {
    if order.field == key_field || !order.ty.is_numeric() {
        return Ok(None);
    }
    let number = match raw {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
    .filter(|f| f.is_finite())
    .ok_or_else(|| ReconcileError::Validation(format!("order_number {raw} is not numeric")))?;

    if order.ty == FieldType::Integer {
        if let Some(n) = raw.as_i64() {
            return Ok(Some(Value::from(n)));
        }
        if number.fract() != 0.0 || number.abs() > 9.0e15 {
            return Err(ReconcileError::Validation(format!(
                "order_number {raw} is not an integer"
            )));
        }
        #[allow(clippy::cast_possible_truncation)]
        return Ok(Some(Value::from(number as i64)));
    }
    Ok(Some(Value::from(number)))
}

/// Validates and applies mutation commands against one view.
pub struct Reconciler<'a> {
    view: &'a ViewDefinition,
    store: &'a dyn RowStore,
    evaluator: &'a dyn FormulaEvaluator,
}

impl<'a> Reconciler<'a> {
    /// Reconciler over `view`.
    pub fn new(
        view: &'a ViewDefinition,
        store: &'a dyn RowStore,
        evaluator: &'a dyn FormulaEvaluator,
    ) -> Self {
        Self {
            view,
            store,
            evaluator,
        }
    }

    /// Read-only and role pre-checks. Never touches the store.
    pub fn authorize(&self, actor: &Actor) -> Result<(), ReconcileError> {
        if self.view.config.read_only {
            return Err(ReconcileError::ReadOnly);
        }
        let schema = &self.view.schema;
        if !actor.role.satisfies(schema.min_role_write) && !schema.has_ownership() {
            return Err(ReconcileError::NotAuthorized);
        }
        Ok(())
    }

    /// Compute the write for `command`. Only `AddChild` with a values formula
    /// reads the store (the parent row).
    pub fn plan(&self, command: &MutationCommand, actor: &Actor) -> Result<Mutation, ReconcileError> {
        let linkage = &self.view.linkage;
        match command {
            MutationCommand::Reparent { id, parent } => Ok(Mutation::Update {
                key: id.clone(),
                delta: self.reparent_delta(id, parent)?,
            }),
            MutationCommand::ReorderAndReparent { id, parent, order } => {
                let mut delta = self.reparent_delta(id, parent)?;
                if let Some(spec) = &linkage.order {
                    if let Some(value) = order_value(spec, &linkage.key_field, order)? {
                        delta.insert(spec.field.clone(), value);
                    }
                }
                Ok(Mutation::Update {
                    key: id.clone(),
                    delta,
                })
            }
            MutationCommand::Delete { id } => Ok(Mutation::Delete { key: id.clone() }),
            MutationCommand::Rename { id, topic } => Ok(Mutation::Update {
                key: id.clone(),
                delta: Row::new().with(linkage.title_field.clone(), topic.as_str()),
            }),
            MutationCommand::AddChild {
                topic,
                parent,
                root_value,
            } => self.plan_insert(topic, parent.resolve(), root_value.as_ref(), actor),
        }
    }

    fn reparent_delta(&self, id: &RowKey, parent: &ParentRef) -> Result<Delta, ReconcileError> {
        let parent = parent.resolve();
        if parent == Some(id) {
            return Err(ReconcileError::Validation(format!(
                "node {id} cannot be its own parent"
            )));
        }
        Ok(Row::new().with(
            self.view.linkage.parent_field.clone(),
            parent.map_or(Value::Null, RowKey::to_value),
        ))
    }

    fn plan_insert(
        &self,
        topic: &str,
        parent: Option<&RowKey>,
        root_value: Option<&Value>,
        actor: &Actor,
    ) -> Result<Mutation, ReconcileError> {
        let linkage = &self.view.linkage;
        let mut values = match self.view.config.field_values_formula() {
            None => Row::new(),
            Some(expr) => {
                let parent_row = match parent {
                    None => None,
                    Some(key) => Some(self.store.get_row(&linkage.table, key)?.ok_or_else(|| {
                        ReconcileError::NotFound(format!(
                            "parent {key} not found in `{}`",
                            linkage.table
                        ))
                    })?),
                };
                let scope = Scope::NewRow {
                    parent: parent_row.as_ref(),
                };
                match self.evaluator.evaluate(expr, &scope, actor) {
                    Ok(Value::Object(map)) => Row::from(map),
                    Ok(other) => {
                        return Err(ReconcileError::Validation(format!(
                            "field values formula produced {other}, expected an object"
                        )))
                    }
                    Err(err) => return Err(ReconcileError::Validation(err.to_string())),
                }
            }
        };

        values.insert(linkage.title_field.clone(), Value::String(topic.to_owned()));
        values.insert(
            linkage.parent_field.clone(),
            parent.map_or(Value::Null, RowKey::to_value),
        );
        if let (Some(relation), Some(value)) = (&linkage.root_relation, root_value) {
            if !values.is_set(&relation.field) {
                let kind = match self.view.schema.field_type(&relation.field) {
                    Some(FieldType::Integer) => KeyKind::Integer,
                    _ => KeyKind::Text,
                };
                let value = RowKey::from_value(value)
                    .map_or_else(|| value.clone(), |k| k.coerce(kind).to_value());
                values.insert(relation.field.clone(), value);
            }
        }
        Ok(Mutation::Insert {
            values,
            title: topic.to_owned(),
        })
    }

    /// Perform one planned write.
    pub fn apply(&self, mutation: Mutation, actor: &Actor) -> Result<Effect, ReconcileError> {
        let linkage = &self.view.linkage;
        let table = linkage.table.as_str();
        let effect = match mutation {
            Mutation::Update { key, delta } => {
                self.store.update_row(table, &delta, &key, actor)?;
                Effect::Updated { id: key }
            }
            Mutation::Delete { key } => {
                self.store
                    .delete_rows(table, &Filter::key(linkage.key_field.as_str(), &key), actor)?;
                Effect::Deleted { id: key }
            }
            Mutation::Insert { values, title } => {
                let id = self.store.insert_row(table, values, actor)?;
                Effect::Inserted { id, title }
            }
        };
        info!(view = %self.view.name, ?effect, "mutation applied");
        Ok(effect)
    }

    /// Authorize, plan and apply `command`.
    pub fn reconcile(&self, command: &MutationCommand, actor: &Actor) -> Result<Effect, ReconcileError> {
        self.authorize(actor)?;
        let mutation = self.plan(command, actor)?;
        debug!(view = %self.view.name, ?mutation, "mutation planned");
        self.apply(mutation, actor)
    }
}
