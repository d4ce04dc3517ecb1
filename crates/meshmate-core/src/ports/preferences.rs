//! Key-value preference storage port.
//!
//! The host owns its preference storage; the core only reads and writes
//! string values by key. Structured values are stored as JSON.

use std::collections::HashMap;
use std::sync::RwLock;

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::CoreError;

/// Key holding the server configuration document.
pub const SERVERS_KEY: &str = "meshmate.servers";

/// Key holding the serialized [`Settings`](crate::settings::Settings).
pub const SETTINGS_KEY: &str = "meshmate.settings";

/// Host preference storage.
pub trait PreferenceStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, CoreError>;

    fn set(&self, key: &str, value: &str) -> Result<(), CoreError>;
}

/// Read a JSON value stored under `key`.
pub fn load_json<T: DeserializeOwned>(
    store: &dyn PreferenceStore,
    key: &str,
) -> Result<Option<T>, CoreError> {
    store
        .get(key)?
        .map(|raw| {
            serde_json::from_str(&raw)
                .map_err(|e| CoreError::Storage(format!("corrupt value under '{key}': {e}")))
        })
        .transpose()
}

/// Store `value` as JSON under `key`.
pub fn save_json<T: Serialize + ?Sized>(
    store: &dyn PreferenceStore,
    key: &str,
    value: &T,
) -> Result<(), CoreError> {
    let raw = serde_json::to_string_pretty(value)
        .map_err(|e| CoreError::Storage(format!("cannot serialize '{key}': {e}")))?;
    store.set(key, &raw)
}

/// In-memory store for tests and hosts without persistence.
#[derive(Debug, Default)]
pub struct MemoryPreferenceStore {
    values: RwLock<HashMap<String, String>>,
}

impl MemoryPreferenceStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PreferenceStore for MemoryPreferenceStore {
    fn get(&self, key: &str) -> Result<Option<String>, CoreError> {
        let values = self
            .values
            .read()
            .map_err(|_| CoreError::Storage("preference store lock poisoned".into()))?;
        Ok(values.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), CoreError> {
        let mut values = self
            .values
            .write()
            .map_err(|_| CoreError::Storage("preference store lock poisoned".into()))?;
        values.insert(key.to_string(), value.to_string());
        Ok(())
    }
}
