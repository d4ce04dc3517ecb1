//! Settings service - owns the live settings value.

use std::sync::{Arc, RwLock};

use crate::error::CoreError;
use crate::ports::{PreferenceStore, SETTINGS_KEY, load_json, save_json};
use crate::settings::{Settings, SettingsUpdate, validate_settings};

/// Holds the current [`Settings`] and persists every change.
pub struct SettingsService {
    store: Arc<dyn PreferenceStore>,
    current: RwLock<Settings>,
}

impl SettingsService {
    /// Load settings from `store`, falling back to defaults when none are saved.
    ///
    /// Missing fields in a stored value are filled from the defaults.
    pub fn load(store: Arc<dyn PreferenceStore>) -> Result<Self, CoreError> {
        let mut settings = Settings::with_defaults();
        if let Some(stored) = load_json::<Settings>(store.as_ref(), SETTINGS_KEY)? {
            settings.merge(&update_from(&stored));
        }
        validate_settings(&settings)?;

        Ok(Self {
            store,
            current: RwLock::new(settings),
        })
    }

    /// Snapshot of the current settings.
    pub fn get(&self) -> Settings {
        self.current
            .read()
            .map(|settings| settings.clone())
            .unwrap_or_else(|poisoned| poisoned.into_inner().clone())
    }

    /// Update settings with partial changes.
    pub fn update(&self, update: &SettingsUpdate) -> Result<Settings, CoreError> {
        let mut next = self.get();
        next.merge(update);
        self.save(&next)?;
        Ok(next)
    }

    /// Save complete settings (validates first).
    pub fn save(&self, settings: &Settings) -> Result<(), CoreError> {
        validate_settings(settings)?;
        save_json(self.store.as_ref(), SETTINGS_KEY, settings)?;

        let mut current = self
            .current
            .write()
            .map_err(|_| CoreError::Storage("settings lock poisoned".into()))?;
        *current = settings.clone();
        tracing::debug!("Settings saved");
        Ok(())
    }
}

/// Update that overwrites only the fields a stored value actually sets.
fn update_from(stored: &Settings) -> SettingsUpdate {
    SettingsUpdate {
        mcp_enabled: stored.mcp_enabled.map(Some),
        mcp_auto_connect: stored.mcp_auto_connect.map(Some),
        tool_block_threshold: stored.tool_block_threshold.map(Some),
        // `null` is meaningful here: confirmation switched off.
        tool_confirm_threshold: Some(stored.tool_confirm_threshold),
        script_block_threshold: stored.script_block_threshold.map(Some),
        code_execution_enabled: stored.code_execution_enabled.map(Some),
        sandbox_max_seconds: stored.sandbox_max_seconds.map(Some),
        sandbox_max_operations: stored.sandbox_max_operations.map(Some),
        max_tool_iterations: stored.max_tool_iterations.map(Some),
        resource_cache_ttl_secs: Some(stored.resource_cache_ttl_secs),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Severity;
    use crate::ports::MemoryPreferenceStore;

    #[test]
    fn test_get_default_settings() {
        let store = Arc::new(MemoryPreferenceStore::new());
        let service = SettingsService::load(store).unwrap();

        let settings = service.get();
        assert_eq!(settings.tool_block_threshold, Some(Severity::High));
    }

    #[test]
    fn test_update_settings_persists() {
        let store = Arc::new(MemoryPreferenceStore::new());
        let service = SettingsService::load(store.clone()).unwrap();

        let update = SettingsUpdate {
            mcp_auto_connect: Some(Some(true)),
            ..Default::default()
        };
        let updated = service.update(&update).unwrap();
        assert_eq!(updated.mcp_auto_connect, Some(true));

        // Verify persisted
        let reloaded = SettingsService::load(store).unwrap();
        assert_eq!(reloaded.get().mcp_auto_connect, Some(true));
    }

    #[test]
    fn test_invalid_update_is_rejected_and_not_applied() {
        let store = Arc::new(MemoryPreferenceStore::new());
        let service = SettingsService::load(store).unwrap();

        let update = SettingsUpdate {
            max_tool_iterations: Some(Some(0)),
            ..Default::default()
        };
        assert!(matches!(
            service.update(&update),
            Err(CoreError::Settings(_))
        ));
        assert_eq!(service.get().max_tool_iterations, Some(10));
    }

    #[test]
    fn test_partial_stored_value_keeps_defaults() {
        let store = Arc::new(MemoryPreferenceStore::new());
        store
            .set(SETTINGS_KEY, r#"{"tool_block_threshold":"critical","tool_confirm_threshold":null}"#)
            .unwrap();

        let settings = SettingsService::load(store).unwrap().get();
        assert_eq!(settings.tool_block_threshold, Some(Severity::Critical));
        assert_eq!(settings.tool_confirm_threshold, None);
        assert_eq!(settings.script_block_threshold, Some(Severity::High));
    }
}
