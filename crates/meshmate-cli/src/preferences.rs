//! JSON file preference store.
//!
//! All keys live in one JSON object on disk. Every `set` rewrites the file
//! through a temporary sibling and a rename, so a crash never leaves a
//! half-written file behind.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use meshmate_core::{CoreError, PreferenceStore};

#[derive(Debug)]
pub struct FilePreferenceStore {
    path: PathBuf,
    values: RwLock<BTreeMap<String, String>>,
}

impl FilePreferenceStore {
    /// Open the store at `path`. A missing file is an empty store.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, CoreError> {
        let path = path.into();
        let values = match fs::read_to_string(&path) {
            Ok(text) if text.trim().is_empty() => BTreeMap::new(),
            Ok(text) => serde_json::from_str(&text).map_err(|e| {
                CoreError::Storage(format!("corrupt preferences file {}: {e}", path.display()))
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => {
                return Err(CoreError::Storage(format!(
                    "cannot read {}: {e}",
                    path.display()
                )));
            }
        };
        tracing::debug!(path = %path.display(), keys = values.len(), "Preferences loaded");
        Ok(Self {
            path,
            values: RwLock::new(values),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write(&self, values: &BTreeMap<String, String>) -> Result<(), CoreError> {
        let storage = |e: std::io::Error| {
            CoreError::Storage(format!("cannot write {}: {e}", self.path.display()))
        };

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(storage)?;
        }
        let text = serde_json::to_string_pretty(values)
            .map_err(|e| CoreError::Storage(format!("cannot serialize preferences: {e}")))?;
        let staging = self.path.with_extension("json.tmp");
        fs::write(&staging, text).map_err(storage)?;
        fs::rename(&staging, &self.path).map_err(storage)
    }
}

impl PreferenceStore for FilePreferenceStore {
    fn get(&self, key: &str) -> Result<Option<String>, CoreError> {
        let values = self
            .values
            .read()
            .map_err(|_| CoreError::Storage("preferences lock poisoned".into()))?;
        Ok(values.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), CoreError> {
        let mut values = self
            .values
            .write()
            .map_err(|_| CoreError::Storage("preferences lock poisoned".into()))?;
        let mut next = values.clone();
        next.insert(key.to_string(), value.to_string());
        self.write(&next)?;
        *values = next;
        Ok(())
    }
}
