// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Table shape and actor identity as reported by the row store.

use crate::row::{KeyKind, RowKey};
use serde::{Deserialize, Serialize};

/// Column type, as far as the tree core cares.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FieldType {
    /// Whole numbers.
    Integer,
    /// Floating point numbers.
    Float,
    /// Text.
    String,
    /// Booleans.
    Bool,
    /// Dates and timestamps.
    Date,
    /// Arbitrary JSON.
    #[serde(rename = "JSON")]
    Json,
}

impl FieldType {
    /// Integer or float.
    pub fn is_numeric(self) -> bool {
        matches!(self, Self::Integer | Self::Float)
    }

    /// Types usable as a sibling order field.
    pub fn is_orderable(self) -> bool {
        matches!(self, Self::Integer | Self::Float | Self::String)
    }
}

/// One column of a table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldInfo {
    /// Column name.
    pub name: String,
    /// Column type.
    #[serde(rename = "type")]
    pub ty: FieldType,
    /// Referenced table when the column is a foreign key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub references: Option<String>,
}

impl FieldInfo {
    /// Plain (non-key) column.
    pub fn new(name: impl Into<String>, ty: FieldType) -> Self {
        Self {
            name: name.into(),
            ty,
            references: None,
        }
    }

    /// Foreign-key column pointing at `table`.
    pub fn reference(name: impl Into<String>, ty: FieldType, table: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ty,
            references: Some(table.into()),
        }
    }
}

/// Numeric role id; lower is more privileged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Role(pub u32);

impl Role {
    /// Administrators.
    pub const ADMIN: Self = Self(1);
    /// Staff.
    pub const STAFF: Self = Self(4);
    /// Signed-in users.
    pub const USER: Self = Self(8);
    /// Anonymous visitors.
    pub const PUBLIC: Self = Self(10);

    /// True when this role meets a table's minimum role.
    pub fn satisfies(self, minimum: Self) -> bool {
        self.0 <= minimum.0
    }
}

impl Default for Role {
    fn default() -> Self {
        Self::PUBLIC
    }
}

/// The principal a request runs as.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Actor {
    /// Key of the user row; `None` for anonymous visitors.
    #[serde(default)]
    pub user_id: Option<RowKey>,
    /// Effective role.
    #[serde(default)]
    pub role: Role,
}

impl Actor {
    /// Anonymous visitor with the given public role.
    pub fn public(role: Role) -> Self {
        Self {
            user_id: None,
            role,
        }
    }

    /// Signed-in user.
    pub fn user(id: impl Into<RowKey>, role: Role) -> Self {
        Self {
            user_id: Some(id.into()),
            role,
        }
    }
}

fn default_key_field() -> String {
    "id".to_owned()
}

fn default_min_role() -> Role {
    Role::PUBLIC
}

fn default_min_role_write() -> Role {
    Role::ADMIN
}

/// Shape and access policy of a table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSchema {
    /// Table name.
    pub name: String,
    /// Primary-key column.
    #[serde(default = "default_key_field")]
    pub key_field: String,
    /// Primary-key kind.
    #[serde(default)]
    pub key_kind: KeyKind,
    /// Non-key columns (the key column may be listed too).
    pub fields: Vec<FieldInfo>,
    /// Least privileged role allowed to read.
    #[serde(default = "default_min_role")]
    pub min_role_read: Role,
    /// Least privileged role allowed to write.
    #[serde(default = "default_min_role_write")]
    pub min_role_write: Role,
    /// Column holding the owning user's id, when rows are user-owned.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ownership_field: Option<String>,
}

impl TableSchema {
    /// Integer-keyed table on `id`, public read, admin write.
    pub fn new(name: impl Into<String>, fields: Vec<FieldInfo>) -> Self {
        Self {
            name: name.into(),
            key_field: default_key_field(),
            key_kind: KeyKind::Integer,
            fields,
            min_role_read: default_min_role(),
            min_role_write: default_min_role_write(),
            ownership_field: None,
        }
    }

    /// Look up a column by name.
    pub fn field(&self, name: &str) -> Option<&FieldInfo> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Type of `name`, treating the key column as known even when unlisted.
    pub fn field_type(&self, name: &str) -> Option<FieldType> {
        self.field(name).map(|f| f.ty).or_else(|| {
            (name == self.key_field).then_some(match self.key_kind {
                KeyKind::Integer => FieldType::Integer,
                KeyKind::Text => FieldType::String,
            })
        })
    }

    /// True when rows carry a per-row ownership mechanism.
    pub fn has_ownership(&self) -> bool {
        self.ownership_field.is_some()
    }

    /// True when `actor` owns `row` under this table's ownership field.
    pub fn is_owner(&self, row: &crate::row::Row, actor: &Actor) -> bool {
        match (&self.ownership_field, &actor.user_id) {
            (Some(field), Some(user)) => row.key(field, user_kind(user)).as_ref() == Some(user),
            _ => false,
        }
    }
}

fn user_kind(user: &RowKey) -> KeyKind {
    match user {
        RowKey::Int(_) => KeyKind::Integer,
        RowKey::Text(_) => KeyKind::Text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::row::Row;
    use serde_json::json;

    #[test]
    fn lower_role_ids_are_more_privileged() {
        assert!(Role::ADMIN.satisfies(Role::USER));
        assert!(Role::USER.satisfies(Role::USER));
        assert!(!Role::PUBLIC.satisfies(Role::USER));
    }

    #[test]
    fn schema_defaults_fill_from_json() {
        let schema: TableSchema = serde_json::from_value(json!({
            "name": "tasks",
            "fields": [
                {"name": "title", "type": "String"},
                {"name": "parent", "type": "Integer", "references": "tasks"}
            ]
        }))
        .unwrap();
        assert_eq!(schema.key_field, "id");
        assert_eq!(schema.key_kind, KeyKind::Integer);
        assert_eq!(schema.min_role_write, Role::ADMIN);
        assert_eq!(
            schema.field("parent").and_then(|f| f.references.as_deref()),
            Some("tasks")
        );
        assert_eq!(schema.field_type("id"), Some(FieldType::Integer));
    }

    #[test]
    fn ownership_matches_user_id() {
        let mut schema = TableSchema::new("notes", vec![]);
        schema.ownership_field = Some("owner".into());
        let row = Row::new().with("owner", 7);
        assert!(schema.is_owner(&row, &Actor::user(7, Role::USER)));
        assert!(!schema.is_owner(&row, &Actor::user(8, Role::USER)));
        assert!(!schema.is_owner(&row, &Actor::public(Role::PUBLIC)));
    }
}
