// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Operator-authored view configuration and its validated linkage.

use crate::annotation::AnnotationRule;
use crate::row::KeyKind;
use crate::schema::{FieldType, TableSchema};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Configuration of one tree view, as saved by an operator.
///
/// Optional text settings treat the empty string as unset, which is what form
/// posts produce for untouched selects.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViewConfig {
    /// Field supplying node labels.
    pub title_field: String,
    /// Field holding the parent row's key.
    pub parent_field: String,
    /// Field ordering siblings.
    #[serde(default)]
    pub order_field: Option<String>,
    /// Foreign key designating a virtual root when present in the filter state.
    #[serde(default)]
    pub root_relation_field: Option<String>,
    /// Label field of the virtual root's table.
    #[serde(default)]
    pub root_label_field: Option<String>,
    /// Nodes deeper than this level start collapsed.
    #[serde(default)]
    pub expand_to_level: Option<u32>,
    /// Per-node decorations.
    #[serde(default)]
    pub annotations: Vec<AnnotationRule>,
    /// Reject every mutation.
    #[serde(default)]
    pub read_only: bool,
    /// Only rows where this formula is truthy are shown.
    #[serde(default)]
    pub include_formula: Option<String>,
    /// Formula producing initial field values for added nodes.
    #[serde(default)]
    pub field_values_formula: Option<String>,
    /// Selecting a node sets the key filter.
    #[serde(default)]
    pub filtering: bool,
    /// Nodes may be dragged.
    #[serde(default)]
    pub drag_and_drop: bool,
    /// Render every node expanded.
    #[serde(default)]
    pub expand_all: bool,
}

fn non_empty(value: Option<&String>) -> Option<&str> {
    value.map(String::as_str).filter(|s| !s.trim().is_empty())
}

impl ViewConfig {
    /// Minimal config over a title and a parent field.
    pub fn new(title_field: impl Into<String>, parent_field: impl Into<String>) -> Self {
        Self {
            title_field: title_field.into(),
            parent_field: parent_field.into(),
            ..Self::default()
        }
    }

    /// Include formula, if set.
    pub fn include_formula(&self) -> Option<&str> {
        non_empty(self.include_formula.as_ref())
    }

    /// Field-values formula, if set.
    pub fn field_values_formula(&self) -> Option<&str> {
        non_empty(self.field_values_formula.as_ref())
    }

    /// Validate against the table and produce the immutable linkage.
    ///
    /// This is the only place malformed configuration is reported; building a
    /// tree from a resolved linkage never fails.
    pub fn resolve(&self, schema: &TableSchema) -> Result<Linkage, LinkageError> {
        let title = non_empty(Some(&self.title_field)).ok_or(LinkageError::Missing("title_field"))?;
        let parent =
            non_empty(Some(&self.parent_field)).ok_or(LinkageError::Missing("parent_field"))?;
        require_field(schema, title)?;

        let parent_info = schema
            .field(parent)
            .ok_or_else(|| unknown(schema, parent))?;
        if parent_info.references.as_deref() != Some(schema.name.as_str()) {
            return Err(LinkageError::NotSelfReference {
                table: schema.name.clone(),
                field: parent.to_owned(),
            });
        }

        let order = match non_empty(self.order_field.as_ref()) {
            None => None,
            Some(field) => {
                let ty = schema
                    .field_type(field)
                    .ok_or_else(|| unknown(schema, field))?;
                if !ty.is_orderable() {
                    return Err(LinkageError::UnsupportedOrderType {
                        field: field.to_owned(),
                        ty,
                    });
                }
                Some(OrderSpec {
                    field: field.to_owned(),
                    ty,
                })
            }
        };

        let root_relation = match non_empty(self.root_relation_field.as_ref()) {
            None => None,
            Some(field) => {
                let info = schema.field(field).ok_or_else(|| unknown(schema, field))?;
                let table = info
                    .references
                    .clone()
                    .ok_or_else(|| LinkageError::NotForeignKey {
                        field: field.to_owned(),
                    })?;
                Some(RootRelation {
                    field: field.to_owned(),
                    table,
                    label_field: non_empty(self.root_label_field.as_ref()).map(str::to_owned),
                })
            }
        };

        Ok(Linkage {
            table: schema.name.clone(),
            key_field: schema.key_field.clone(),
            key_kind: schema.key_kind,
            title_field: title.to_owned(),
            parent_field: parent.to_owned(),
            order,
            root_relation,
            expand_to_level: self.expand_to_level,
        })
    }
}

fn unknown(schema: &TableSchema, field: &str) -> LinkageError {
    LinkageError::UnknownField {
        table: schema.name.clone(),
        field: field.to_owned(),
    }
}

fn require_field(schema: &TableSchema, field: &str) -> Result<(), LinkageError> {
    schema
        .field_type(field)
        .map(|_| ())
        .ok_or_else(|| unknown(schema, field))
}

/// Configuration errors, reported when a view is saved or loaded.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LinkageError {
    /// A required setting is empty.
    #[error("{0} must be set")]
    Missing(&'static str),
    /// A configured field does not exist.
    #[error("field `{field}` does not exist on table `{table}`")]
    UnknownField {
        /// Table searched.
        table: String,
        /// Field requested.
        field: String,
    },
    /// The parent field is not a foreign key to the same table.
    #[error("parent field `{field}` must reference table `{table}`")]
    NotSelfReference {
        /// Tree table.
        table: String,
        /// Offending field.
        field: String,
    },
    /// The order field has a type siblings cannot be sorted by.
    #[error("order field `{field}` has unsupported type {ty:?}")]
    UnsupportedOrderType {
        /// Offending field.
        field: String,
        /// Its type.
        ty: FieldType,
    },
    /// The root relation field is not a foreign key.
    #[error("root relation field `{field}` is not a foreign key")]
    NotForeignKey {
        /// Offending field.
        field: String,
    },
}

/// Sibling order column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderSpec {
    /// Column name.
    pub field: String,
    /// Column type.
    pub ty: FieldType,
}

impl OrderSpec {
    /// Text order fields sort case-insensitively.
    pub fn nocase(&self) -> bool {
        self.ty == FieldType::String
    }
}

/// External table whose row becomes the virtual root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RootRelation {
    /// Foreign-key column on the tree table.
    pub field: String,
    /// Referenced table.
    pub table: String,
    /// Label column on the referenced table.
    pub label_field: Option<String>,
}

/// Validated, immutable link structure shared by the builder and reconciler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Linkage {
    /// Tree table.
    pub table: String,
    /// Primary-key column.
    pub key_field: String,
    /// Primary-key kind.
    pub key_kind: KeyKind,
    /// Label column.
    pub title_field: String,
    /// Parent-key column.
    pub parent_field: String,
    /// Sibling order.
    pub order: Option<OrderSpec>,
    /// Virtual-root relation.
    pub root_relation: Option<RootRelation>,
    /// Collapse hint.
    pub expand_to_level: Option<u32>,
}

impl Linkage {
    /// Integer-keyed linkage on `id` with no ordering.
    pub fn new(
        table: impl Into<String>,
        title_field: impl Into<String>,
        parent_field: impl Into<String>,
    ) -> Self {
        Self {
            table: table.into(),
            key_field: "id".to_owned(),
            key_kind: KeyKind::Integer,
            title_field: title_field.into(),
            parent_field: parent_field.into(),
            order: None,
            root_relation: None,
            expand_to_level: None,
        }
    }

    /// Builder-style order field.
    pub fn ordered_by(mut self, field: impl Into<String>, ty: FieldType) -> Self {
        self.order = Some(OrderSpec {
            field: field.into(),
            ty,
        });
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::FieldInfo;

    fn tasks() -> TableSchema {
        TableSchema::new(
            "tasks",
            vec![
                FieldInfo::new("title", FieldType::String),
                FieldInfo::reference("parent", FieldType::Integer, "tasks"),
                FieldInfo::new("position", FieldType::Integer),
                FieldInfo::new("done", FieldType::Bool),
                FieldInfo::reference("project", FieldType::Integer, "projects"),
            ],
        )
    }

    #[test]
    fn resolves_full_config() {
        let mut cfg = ViewConfig::new("title", "parent");
        cfg.order_field = Some("position".into());
        cfg.root_relation_field = Some("project".into());
        cfg.root_label_field = Some("name".into());
        cfg.expand_to_level = Some(2);
        let linkage = cfg.resolve(&tasks()).unwrap();
        assert_eq!(linkage.table, "tasks");
        assert_eq!(
            linkage.order,
            Some(OrderSpec {
                field: "position".into(),
                ty: FieldType::Integer
            })
        );
        let rel = linkage.root_relation.unwrap();
        assert_eq!(rel.table, "projects");
        assert_eq!(rel.label_field.as_deref(), Some("name"));
    }

    #[test]
    fn empty_optional_fields_are_unset() {
        let mut cfg = ViewConfig::new("title", "parent");
        cfg.order_field = Some(String::new());
        cfg.root_relation_field = Some(" ".into());
        let linkage = cfg.resolve(&tasks()).unwrap();
        assert!(linkage.order.is_none());
        assert!(linkage.root_relation.is_none());
    }

    #[test]
    fn rejects_missing_title_field() {
        let cfg = ViewConfig::new("name", "parent");
        assert_eq!(
            cfg.resolve(&tasks()),
            Err(LinkageError::UnknownField {
                table: "tasks".into(),
                field: "name".into()
            })
        );
    }

    #[test]
    fn rejects_parent_to_other_table() {
        let cfg = ViewConfig::new("title", "project");
        assert!(matches!(
            cfg.resolve(&tasks()),
            Err(LinkageError::NotSelfReference { .. })
        ));
    }

    #[test]
    fn rejects_bool_order_field() {
        let mut cfg = ViewConfig::new("title", "parent");
        cfg.order_field = Some("done".into());
        assert!(matches!(
            cfg.resolve(&tasks()),
            Err(LinkageError::UnsupportedOrderType { .. })
        ));
    }

    #[test]
    fn rejects_plain_root_relation() {
        let mut cfg = ViewConfig::new("title", "parent");
        cfg.root_relation_field = Some("position".into());
        assert!(matches!(
            cfg.resolve(&tasks()),
            Err(LinkageError::NotForeignKey { .. })
        ));
    }

    #[test]
    fn rejects_blank_title() {
        let cfg = ViewConfig::new("", "parent");
        assert_eq!(cfg.resolve(&tasks()), Err(LinkageError::Missing("title_field")));
    }
}
