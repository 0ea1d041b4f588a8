// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Canonical tables and views used across the test suites.
//!
//! `tasks(id, title, parent → tasks, position: Integer, rank: String,
//! project → projects, owner)` plus `projects(id, name)` and
//! `notes(id, task → tasks, body)`.

use serde_json::Value;
use treeview_core::{
    FieldInfo, FieldType, MemoryRowStore, Row, TableSchema, ViewConfig, ViewDefinition,
};

/// Tree table name.
pub const TASKS: &str = "tasks";

/// Schema of the tree table.
pub fn tasks_schema() -> TableSchema {
    TableSchema::new(
        TASKS,
        vec![
            FieldInfo::new("title", FieldType::String),
            FieldInfo::reference("parent", FieldType::Integer, TASKS),
            FieldInfo::new("position", FieldType::Integer),
            FieldInfo::new("weight", FieldType::Float),
            FieldInfo::new("rank", FieldType::String),
            FieldInfo::new("done", FieldType::Bool),
            FieldInfo::reference("project", FieldType::Integer, "projects"),
            FieldInfo::new("owner", FieldType::Integer),
        ],
    )
}

/// Schema of the virtual-root table.
pub fn projects_schema() -> TableSchema {
    TableSchema::new("projects", vec![FieldInfo::new("name", FieldType::String)])
}

/// Schema of a table related to tasks.
pub fn notes_schema() -> TableSchema {
    TableSchema::new(
        "notes",
        vec![
            FieldInfo::reference("task", FieldType::Integer, TASKS),
            FieldInfo::new("body", FieldType::String),
        ],
    )
}

/// `{id, parent, title}` task row.
pub fn task(id: i64, parent: Option<i64>, title: &str) -> Row {
    Row::new()
        .with("id", id)
        .with("parent", parent.map_or(Value::Null, Value::from))
        .with("title", title)
}

/// Store holding `rows` as tasks plus empty projects and notes tables.
pub fn task_store(rows: Vec<Row>) -> MemoryRowStore {
    MemoryRowStore::new()
        .with_table(projects_schema(), Vec::new())
        .with_table(notes_schema(), Vec::new())
        .with_table(tasks_schema(), rows)
}

/// `title`/`parent` config.
pub fn outline_config() -> ViewConfig {
    ViewConfig::new("title", "parent")
}

/// Resolved view over the tasks table.
///
/// # Panics
///
/// When `config` does not fit [`tasks_schema`].
#[allow(clippy::expect_used)]
pub fn outline_view(config: ViewConfig) -> ViewDefinition {
    ViewDefinition::new("outline", config, tasks_schema()).expect("fixture config must resolve")
}
