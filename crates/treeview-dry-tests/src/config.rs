// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Map-backed [`ConfigStore`] with per-operation counters and fault switches.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use treeview_app_core::config::{ConfigError, ConfigStore};

/// One [`ConfigStore`] method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ConfigOp {
    /// `load_raw`.
    Load,
    /// `save_raw`.
    Save,
    /// `remove_raw`.
    Remove,
    /// `list_keys`.
    List,
}

#[derive(Default)]
struct Blobs {
    entries: BTreeMap<String, Vec<u8>>,
    counts: BTreeMap<ConfigOp, usize>,
    faults: BTreeSet<ConfigOp>,
}

/// Shared in-memory view store. Clones see the same blobs.
///
/// # Example
///
/// ```
/// use treeview_app_core::config::ConfigService;
/// use treeview_dry_tests::{ConfigOp, InMemoryConfigStore};
///
/// let store = InMemoryConfigStore::new();
/// let service = ConfigService::new(store.clone());
/// service.save("outline", &serde_json::json!({"title_field": "title"})).unwrap();
/// assert_eq!(store.count(ConfigOp::Save), 1);
/// assert!(store.get("outline").is_some());
/// ```
#[derive(Clone, Default)]
pub struct InMemoryConfigStore {
    blobs: Arc<Mutex<Blobs>>,
}

impl InMemoryConfigStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `op` fail (or succeed again) from now on. Failed calls still count.
    pub fn fail(&self, op: ConfigOp, failing: bool) {
        let mut blobs = self.lock();
        if failing {
            blobs.faults.insert(op);
        } else {
            blobs.faults.remove(&op);
        }
    }

    /// Calls of `op` so far.
    pub fn count(&self, op: ConfigOp) -> usize {
        self.lock().counts.get(&op).copied().unwrap_or_default()
    }

    /// Raw bytes under `key`.
    pub fn get(&self, key: &str) -> Option<Vec<u8>> {
        self.lock().entries.get(key).cloned()
    }

    fn lock(&self) -> MutexGuard<'_, Blobs> {
        self.blobs.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn enter(&self, op: ConfigOp) -> Result<MutexGuard<'_, Blobs>, ConfigError> {
        let mut blobs = self.lock();
        *blobs.counts.entry(op).or_default() += 1;
        if blobs.faults.contains(&op) {
            return Err(ConfigError::Other(format!("injected {op:?} fault")));
        }
        Ok(blobs)
    }
}

impl ConfigStore for InMemoryConfigStore {
    fn load_raw(&self, key: &str) -> Result<Vec<u8>, ConfigError> {
        self.enter(ConfigOp::Load)?
            .entries
            .get(key)
            .cloned()
            .ok_or(ConfigError::NotFound)
    }

    fn save_raw(&self, key: &str, data: &[u8]) -> Result<(), ConfigError> {
        self.enter(ConfigOp::Save)?
            .entries
            .insert(key.to_owned(), data.to_vec());
        Ok(())
    }

    fn remove_raw(&self, key: &str) -> Result<(), ConfigError> {
        self.enter(ConfigOp::Remove)?.entries.remove(key);
        Ok(())
    }

    fn list_keys(&self) -> Result<Vec<String>, ConfigError> {
        Ok(self.enter(ConfigOp::List)?.entries.keys().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_share_blobs() {
        let store = InMemoryConfigStore::new();
        store.clone().save_raw("outline", b"{}").unwrap();
        assert_eq!(store.load_raw("outline").unwrap(), b"{}");
        assert!(matches!(store.load_raw("other"), Err(ConfigError::NotFound)));
        assert_eq!(store.count(ConfigOp::Load), 2);
    }

    #[test]
    fn faults_apply_per_operation() {
        let store = InMemoryConfigStore::new();
        store.fail(ConfigOp::Save, true);
        assert!(store.save_raw("a", b"x").is_err());
        assert_eq!(store.count(ConfigOp::Save), 1);
        assert!(store.list_keys().unwrap().is_empty());
        store.fail(ConfigOp::Save, false);
        store.save_raw("a", b"x").unwrap();
        store.remove_raw("a").unwrap();
        store.remove_raw("a").unwrap();
        assert_eq!(store.get("a"), None);
    }
}
