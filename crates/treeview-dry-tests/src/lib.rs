// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Shared test doubles and fixtures for tree view crates.
#![forbid(unsafe_code)]
//!
//! # Modules
//!
//! - [`config`] - Map-backed view config store with fault injection
//! - [`fixtures`] - Canonical task tables, rows and views
//! - [`formula`] - Scripted formula evaluator
//! - [`store`] - Call-recording row store wrapper

pub mod config;
pub mod fixtures;
pub mod formula;
pub mod store;

// Re-export commonly used items at crate root for convenience
pub use config::{ConfigOp, InMemoryConfigStore};
pub use fixtures::{
    notes_schema, outline_config, outline_view, projects_schema, task, task_store, tasks_schema,
    TASKS,
};
pub use formula::ScriptedEvaluator;
pub use store::{RecordingStore, StoreCall};
