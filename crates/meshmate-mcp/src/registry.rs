//! Server configuration registry.
//!
//! The registry is the source of truth for which servers exist. It persists
//! to the host preference store as a Claude-Desktop style document:
//!
//! ```json
//! { "mcpServers": { "blender": { "command": "uvx", "args": ["blender-mcp"] } } }
//! ```
//!
//! The same shape is used for import and export.

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use meshmate_core::ports::{SERVERS_KEY, load_json, save_json};
use meshmate_core::{CoreError, ImportReport, PreferenceStore, ServerConfig};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Top-level key of the server document.
pub const MCP_SERVERS_KEY: &str = "mcpServers";

/// Name of the server seeded into an empty registry.
pub const DEFAULT_SERVER_NAME: &str = "sequential-thinking";

const fn default_enabled() -> bool {
    true
}

const fn default_timeout() -> u64 {
    meshmate_core::domain::DEFAULT_SERVER_TIMEOUT_SECS
}

/// One entry of the server document (the name is the map key).
#[derive(Debug, Clone, Serialize, Deserialize)]
struct ServerEntry {
    command: String,
    #[serde(default)]
    args: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    cwd: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    env: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    description: Option<String>,
    #[serde(default = "default_enabled")]
    enabled: bool,
    #[serde(default = "default_timeout")]
    timeout: u64,
}

impl ServerEntry {
    fn into_config(self, name: &str) -> ServerConfig {
        ServerConfig {
            name: name.to_string(),
            command: self.command,
            args: self.args,
            cwd: self.cwd,
            env: self.env,
            description: self.description,
            enabled: self.enabled,
            timeout: self.timeout,
        }
    }

    fn from_config(config: &ServerConfig) -> Self {
        Self {
            command: config.command.clone(),
            args: config.args.clone(),
            cwd: config.cwd.clone(),
            env: config.env.clone(),
            description: config.description.clone(),
            enabled: config.enabled,
            timeout: config.timeout,
        }
    }
}

/// Parse a server document. Accepts `{"mcpServers": {...}}` or a bare map.
///
/// Each entry is parsed and validated on its own; failures are reported in
/// the returned [`ImportReport`] and do not affect other entries. Fails only
/// when the document itself is not a JSON object.
pub fn parse_document(document: &Value) -> Result<(Vec<ServerConfig>, ImportReport), CoreError> {
    let servers = servers_map(document)?;

    let mut configs = Vec::new();
    let mut report = ImportReport::default();
    for (name, raw) in servers {
        let parsed = serde_json::from_value::<ServerEntry>(raw.clone())
            .map_err(|e| e.to_string())
            .map(|entry| entry.into_config(name))
            .and_then(|config| config.validate().map(|()| config).map_err(|e| e.to_string()));

        match parsed {
            Ok(config) => {
                report.imported.push(config.name.clone());
                configs.push(config);
            }
            Err(message) => report.push_issue(name.clone(), message),
        }
    }
    Ok((configs, report))
}

fn servers_map(document: &Value) -> Result<&Map<String, Value>, CoreError> {
    let root = document
        .as_object()
        .ok_or_else(|| CoreError::InvalidConfig("server document must be a JSON object".into()))?;

    match root.get(MCP_SERVERS_KEY) {
        Some(Value::Object(servers)) => Ok(servers),
        Some(_) => Err(CoreError::InvalidConfig(format!(
            "'{MCP_SERVERS_KEY}' must map server names to configs"
        ))),
        None => Ok(root),
    }
}

/// Serialize configs into the `mcpServers` document shape.
pub fn to_document<'a>(configs: impl IntoIterator<Item = &'a ServerConfig>) -> Value {
    let servers: Map<String, Value> = configs
        .into_iter()
        .filter_map(|config| {
            serde_json::to_value(ServerEntry::from_config(config))
                .ok()
                .map(|entry| (config.name.clone(), entry))
        })
        .collect();

    let mut document = Map::new();
    document.insert(MCP_SERVERS_KEY.to_string(), Value::Object(servers));
    Value::Object(document)
}

/// The server seeded into an empty registry. Disabled until the user opts in.
pub fn default_server() -> ServerConfig {
    ServerConfig::new(DEFAULT_SERVER_NAME, "npx")
        .with_args(["-y", "@modelcontextprotocol/server-sequential-thinking"])
        .with_description("Structured step-by-step reasoning")
        .with_enabled(false)
}

/// Registry of server configurations backed by a [`PreferenceStore`].
pub struct ServerRegistry {
    store: Arc<dyn PreferenceStore>,
    servers: RwLock<BTreeMap<String, ServerConfig>>,
}

impl std::fmt::Debug for ServerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerRegistry")
            .field("servers", &self.names())
            .finish_non_exhaustive()
    }
}

impl ServerRegistry {
    /// Load the registry from `store`. Invalid stored entries are logged and
    /// skipped so one bad entry cannot hide the rest.
    pub fn load(store: Arc<dyn PreferenceStore>) -> Result<Self, CoreError> {
        let mut servers = BTreeMap::new();

        if let Some(document) = load_json::<Value>(store.as_ref(), SERVERS_KEY)? {
            let (configs, report) = parse_document(&document)?;
            for issue in &report.issues {
                tracing::warn!(
                    server = %issue.name,
                    error = %issue.message,
                    "Skipping invalid stored server config"
                );
            }
            servers.extend(configs.into_iter().map(|c| (c.name.clone(), c)));
        }

        tracing::debug!(count = servers.len(), "Server registry loaded");
        Ok(Self {
            store,
            servers: RwLock::new(servers),
        })
    }

    /// Seed [`default_server`] when the registry is empty.
    pub fn with_defaults_if_empty(self) -> Result<Self, CoreError> {
        if self.is_empty() {
            self.upsert(default_server())?;
            tracing::info!(server = DEFAULT_SERVER_NAME, "Seeded default server config");
        }
        Ok(self)
    }

    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, BTreeMap<String, ServerConfig>>, CoreError> {
        self.servers
            .read()
            .map_err(|_| CoreError::Storage("server registry lock poisoned".into()))
    }

    /// Apply `change` to a copy, persist it, then commit.
    fn mutate<T>(
        &self,
        change: impl FnOnce(&mut BTreeMap<String, ServerConfig>) -> Result<T, CoreError>,
    ) -> Result<T, CoreError> {
        let mut servers = self
            .servers
            .write()
            .map_err(|_| CoreError::Storage("server registry lock poisoned".into()))?;

        let mut next = servers.clone();
        let result = change(&mut next)?;
        save_json(self.store.as_ref(), SERVERS_KEY, &to_document(next.values()))?;
        *servers = next;
        Ok(result)
    }

    pub fn list(&self) -> Vec<ServerConfig> {
        self.read()
            .map(|servers| servers.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn names(&self) -> Vec<String> {
        self.read()
            .map(|servers| servers.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn get(&self, name: &str) -> Option<ServerConfig> {
        self.read().ok().and_then(|servers| servers.get(name).cloned())
    }

    pub fn is_empty(&self) -> bool {
        self.read().map(|servers| servers.is_empty()).unwrap_or(true)
    }

    /// Insert or replace a config. Returns the previous config, if any.
    pub fn upsert(&self, config: ServerConfig) -> Result<Option<ServerConfig>, CoreError> {
        config.validate()?;
        let name = config.name.clone();
        let previous = self.mutate(|servers| Ok(servers.insert(config.name.clone(), config)))?;
        tracing::info!(server = %name, replaced = previous.is_some(), "Server config saved");
        Ok(previous)
    }

    /// Remove a config. Fails with `NotFound` if absent.
    pub fn remove(&self, name: &str) -> Result<ServerConfig, CoreError> {
        let removed = self.mutate(|servers| {
            servers
                .remove(name)
                .ok_or_else(|| CoreError::NotFound(format!("server '{name}'")))
        })?;
        tracing::info!(server = %name, "Server config removed");
        Ok(removed)
    }

    /// Import a document. Valid entries are inserted or replace existing ones;
    /// invalid ones are listed in the report.
    pub fn import_document(&self, document: &Value) -> Result<ImportReport, CoreError> {
        let (configs, report) = parse_document(document)?;
        if !configs.is_empty() {
            self.mutate(|servers| {
                servers.extend(configs.into_iter().map(|c| (c.name.clone(), c)));
                Ok(())
            })?;
        }
        tracing::info!(
            imported = report.imported.len(),
            rejected = report.issues.len(),
            "Server configs imported"
        );
        Ok(report)
    }

    /// Import from JSON text.
    pub fn import_str(&self, text: &str) -> Result<ImportReport, CoreError> {
        let document: Value = serde_json::from_str(text)
            .map_err(|e| CoreError::InvalidConfig(format!("server document is not JSON: {e}")))?;
        self.import_document(&document)
    }

    /// Export every config as an `mcpServers` document.
    pub fn export_document(&self) -> Value {
        self.read()
            .map(|servers| to_document(servers.values()))
            .unwrap_or_else(|_| to_document(std::iter::empty()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use meshmate_core::MemoryPreferenceStore;
    use serde_json::json;

    fn empty_registry() -> (Arc<MemoryPreferenceStore>, ServerRegistry) {
        let store = Arc::new(MemoryPreferenceStore::new());
        let registry = ServerRegistry::load(store.clone()).unwrap();
        (store, registry)
    }

    #[test]
    fn test_upsert_persists_and_reloads() {
        let (store, registry) = empty_registry();
        registry
            .upsert(ServerConfig::new("blender", "uvx").with_args(["blender-mcp"]))
            .unwrap();

        let raw = store.get(SERVERS_KEY).unwrap().unwrap();
        assert!(raw.contains("mcpServers"));

        let reloaded = ServerRegistry::load(store).unwrap();
        assert_eq!(reloaded.get("blender").unwrap().args, ["blender-mcp"]);
    }

    #[test]
    fn test_upsert_rejects_invalid_config() {
        let (_, registry) = empty_registry();
        assert!(matches!(
            registry.upsert(ServerConfig::new("", "uvx")),
            Err(CoreError::InvalidConfig(_))
        ));
        assert!(matches!(
            registry.upsert(ServerConfig::new("x", "")),
            Err(CoreError::InvalidConfig(_))
        ));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_remove_missing_is_not_found() {
        let (_, registry) = empty_registry();
        assert!(matches!(registry.remove("nope"), Err(CoreError::NotFound(_))));
    }

    #[test]
    fn test_import_reports_each_bad_entry() {
        let (_, registry) = empty_registry();
        let report = registry
            .import_document(&json!({
                "mcpServers": {
                    "good": {"command": "npx", "args": ["-y", "pkg"]},
                    "no-command": {"args": []},
                    "bad-timeout": {"command": "npx", "timeout": 0},
                    "spaced": {"command": "npx -y pkg"}
                }
            }))
            .unwrap();

        assert_eq!(report.imported, ["good"]);
        let mut rejected: Vec<&str> = report.issues.iter().map(|i| i.name.as_str()).collect();
        rejected.sort_unstable();
        assert_eq!(rejected, ["bad-timeout", "no-command", "spaced"]);
        assert_eq!(registry.names(), ["good"]);
    }

    #[test]
    fn test_import_accepts_bare_map() {
        let (_, registry) = empty_registry();
        let report = registry
            .import_str(r#"{"fs": {"command": "npx", "enabled": false}}"#)
            .unwrap();
        assert!(report.is_clean());
        assert!(!registry.get("fs").unwrap().enabled);
    }

    #[test]
    fn test_import_rejects_non_object() {
        let (_, registry) = empty_registry();
        assert!(registry.import_str("[1, 2]").is_err());
        assert!(registry.import_str("not json").is_err());
        assert!(registry.import_document(&json!({"mcpServers": 3})).is_err());
    }

    #[test]
    fn test_export_import_round_trip() {
        let (_, source) = empty_registry();
        source
            .upsert(
                ServerConfig::new("blender", "uvx")
                    .with_args(["blender-mcp"])
                    .with_env("BLENDER_PORT", "9876")
                    .with_timeout(45),
            )
            .unwrap();
        source
            .upsert(ServerConfig::new("fs", "npx").with_args(["-y", "fs-server", "/tmp"]).with_enabled(false))
            .unwrap();

        let (_, target) = empty_registry();
        let report = target.import_document(&source.export_document()).unwrap();
        assert!(report.is_clean());
        assert_eq!(target.list(), source.list());
    }

    #[test]
    fn test_defaults_seeded_only_when_empty() {
        let (_, registry) = empty_registry();
        let registry = registry.with_defaults_if_empty().unwrap();
        let seeded = registry.get(DEFAULT_SERVER_NAME).unwrap();
        assert!(!seeded.enabled);
        assert_eq!(seeded.command, "npx");

        let (_, other) = empty_registry();
        other.upsert(ServerConfig::new("mine", "uvx")).unwrap();
        let other = other.with_defaults_if_empty().unwrap();
        assert_eq!(other.names(), ["mine"]);
    }
}
