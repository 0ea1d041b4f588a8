// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Blob storage port for saved views and the JSON service on top of it.

use serde::{de::DeserializeOwned, Serialize};
use thiserror::Error;
use treeview_core::{LinkageError, StoreError};

/// Where saved view blobs live. Keys are view names.
pub trait ConfigStore {
    /// Bytes stored under `key`; [`ConfigError::NotFound`] when absent.
    fn load_raw(&self, key: &str) -> Result<Vec<u8>, ConfigError>;
    /// Replace the bytes under `key`.
    fn save_raw(&self, key: &str, data: &[u8]) -> Result<(), ConfigError>;
    /// Drop `key`. Removing an absent key is not an error.
    fn remove_raw(&self, key: &str) -> Result<(), ConfigError>;
    /// Every stored key, sorted.
    fn list_keys(&self) -> Result<Vec<String>, ConfigError>;
}

/// Failures while persisting or validating views.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Nothing stored under the key.
    #[error("view config not found")]
    NotFound,
    /// The key cannot name a stored blob.
    #[error("invalid view name `{0}`")]
    InvalidKey(String),
    /// Filesystem failure.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// Blob is not valid JSON for the requested type.
    #[error("malformed view config: {0}")]
    Serde(#[from] serde_json::Error),
    /// The view does not fit its table.
    #[error("invalid view: {0}")]
    Invalid(#[from] LinkageError),
    /// The table schema could not be read.
    #[error("schema lookup failed: {0}")]
    Store(#[from] StoreError),
    /// Backend-specific failure.
    #[error("config store: {0}")]
    Other(String),
}

/// JSON (de)serialization over a [`ConfigStore`].
pub struct ConfigService<S> {
    store: S,
}

impl<S> ConfigService<S> {
    /// Service writing through `store`.
    pub fn new(store: S) -> Self {
        Self { store }
    }
}

impl<S: ConfigStore> ConfigService<S> {
    /// Decode the value under `key`. Missing and empty blobs read as `None`.
    pub fn load<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, ConfigError> {
        let bytes = match self.store.load_raw(key) {
            Err(ConfigError::NotFound) => return Ok(None),
            other => other?,
        };
        if bytes.is_empty() {
            return Ok(None);
        }
        Ok(Some(serde_json::from_slice(&bytes)?))
    }

    /// Encode `value` as pretty JSON under `key`.
    pub fn save<T: Serialize>(&self, key: &str, value: &T) -> Result<(), ConfigError> {
        self.store.save_raw(key, &serde_json::to_vec_pretty(value)?)
    }

    /// Forget `key`.
    pub fn remove(&self, key: &str) -> Result<(), ConfigError> {
        self.store.remove_raw(key)
    }

    /// Stored keys, sorted.
    pub fn keys(&self) -> Result<Vec<String>, ConfigError> {
        self.store.list_keys()
    }
}
