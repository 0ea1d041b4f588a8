// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Saved tree views: validated persistence and the loaded registry.

use crate::config::{ConfigError, ConfigService, ConfigStore};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, warn};
use treeview_core::{RowStore, ViewConfig, ViewDefinition};

/// Persisted form of a view: its table plus the operator's configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SavedView {
    /// Tree table.
    pub table: String,
    /// View settings.
    #[serde(flatten)]
    pub config: ViewConfig,
}

/// Saves and loads views, validating each against its table before it is written.
pub struct ViewConfigService<S> {
    inner: ConfigService<S>,
}

impl<S> ViewConfigService<S>
where
    S: ConfigStore,
{
    /// Service over `store`.
    pub fn new(store: S) -> Self {
        Self {
            inner: ConfigService::new(store),
        }
    }

    /// Validate `view` against the store's schema and persist it under `name`.
    pub fn save_view(
        &self,
        name: &str,
        view: &SavedView,
        rows: &dyn RowStore,
    ) -> Result<ViewDefinition, ConfigError> {
        let definition = Self::define(name, view.clone(), rows)?;
        self.inner.save(name, view)?;
        info!(view = name, table = %view.table, "view saved");
        Ok(definition)
    }

    /// Saved view `name`, if any.
    pub fn load_view(&self, name: &str) -> Result<Option<SavedView>, ConfigError> {
        self.inner.load(name)
    }

    /// Delete saved view `name`. Deleting an unknown view is a no-op.
    pub fn delete_view(&self, name: &str) -> Result<(), ConfigError> {
        self.inner.remove(name)?;
        info!(view = name, "view deleted");
        Ok(())
    }

    /// Names of every saved view.
    pub fn view_names(&self) -> Result<Vec<String>, ConfigError> {
        self.inner.keys()
    }

    /// Resolve a saved view against its table.
    pub fn define(
        name: &str,
        view: SavedView,
        rows: &dyn RowStore,
    ) -> Result<ViewDefinition, ConfigError> {
        let schema = rows.schema(&view.table)?;
        Ok(ViewDefinition::new(name, view.config, schema)?)
    }
}

/// Loaded views by name. Immutable once built; shared behind `Arc`.
#[derive(Debug, Clone, Default)]
pub struct ViewRegistry {
    views: BTreeMap<String, Arc<ViewDefinition>>,
}

impl ViewRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Load every saved view. Views that no longer fit their table are
    /// skipped with a warning so one stale view cannot take the others down.
    pub fn load<S: ConfigStore>(
        service: &ViewConfigService<S>,
        rows: &dyn RowStore,
    ) -> Result<Self, ConfigError> {
        let mut registry = Self::new();
        for name in service.view_names()? {
            let Some(saved) = service.load_view(&name)? else {
                continue;
            };
            match ViewConfigService::<S>::define(&name, saved, rows) {
                Ok(definition) => registry.insert(definition),
                Err(err) => warn!(view = %name, %err, "view skipped"),
            }
        }
        info!(count = registry.len(), "views loaded");
        Ok(registry)
    }

    /// Add or replace a view.
    pub fn insert(&mut self, definition: ViewDefinition) {
        self.views
            .insert(definition.name.clone(), Arc::new(definition));
    }

    /// View `name`.
    pub fn get(&self, name: &str) -> Option<Arc<ViewDefinition>> {
        self.views.get(name).cloned()
    }

    /// Registered view names, sorted.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.views.keys().map(String::as_str)
    }

    /// Number of views.
    pub fn len(&self) -> usize {
        self.views.len()
    }

    /// True when no view is registered.
    pub fn is_empty(&self) -> bool {
        self.views.is_empty()
    }
}
