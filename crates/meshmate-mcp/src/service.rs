//! Orchestration over the registry, connections and invoker.
//!
//! Registry mutations that affect a live connection (replace, remove,
//! import) tear it down here so the registry itself stays synchronous.

use std::sync::Arc;
use std::time::Duration;

use meshmate_core::{
    ConnectionState, CoreError, CoreEvent, CoreEventEmitter, ExecutionResult, ImportReport,
    ResourceDescriptor, SecurityValidator, ServerConfig, ToolCallRequest, ToolDescriptor,
    ToolSchema,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::cache::CapabilityCache;
use crate::invoker::{InvokePolicy, ToolInvoker};
use crate::manager::{AutoConnectReport, ConnectionManager, ServerStatus};
use crate::registry::ServerRegistry;
use crate::transport::TransportFactory;

/// A configured server with its live status.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerInfo {
    pub config: ServerConfig,
    pub state: ConnectionState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    /// Tools discovered on the current connection.
    pub tools: Vec<ToolDescriptor>,
}

/// Entry point for everything tool-server related.
pub struct McpService {
    registry: Arc<ServerRegistry>,
    manager: Arc<ConnectionManager>,
    invoker: ToolInvoker,
    emitter: Arc<dyn CoreEventEmitter>,
}

impl McpService {
    pub fn new(
        registry: Arc<ServerRegistry>,
        factory: Arc<dyn TransportFactory>,
        validator: Arc<SecurityValidator>,
        emitter: Arc<dyn CoreEventEmitter>,
    ) -> Self {
        let manager = Arc::new(ConnectionManager::new(
            registry.clone(),
            factory,
            Arc::new(CapabilityCache::new()),
            emitter.clone(),
        ));
        let invoker = ToolInvoker::new(manager.clone(), validator, emitter.clone());
        Self {
            registry,
            manager,
            invoker,
            emitter,
        }
    }

    pub const fn registry(&self) -> &Arc<ServerRegistry> {
        &self.registry
    }

    pub const fn manager(&self) -> &Arc<ConnectionManager> {
        &self.manager
    }

    fn servers_changed(&self) {
        self.emitter.emit(CoreEvent::ServersChanged {
            names: self.registry.names(),
        });
    }

    // =========================================================================
    // Registry
    // =========================================================================

    /// Every configured server with its state and discovered tools.
    pub async fn list_servers(&self) -> Vec<ServerInfo> {
        let mut servers = Vec::new();
        for config in self.registry.list() {
            let state = self.manager.state(&config.name).await;
            let last_error = self.manager.last_error(&config.name).await;
            let tools = self.manager.cache().tools_for(&config.name).await;
            servers.push(ServerInfo {
                config,
                state,
                last_error,
                tools,
            });
        }
        servers
    }

    pub fn get_server(&self, name: &str) -> Option<ServerConfig> {
        self.registry.get(name)
    }

    /// Insert or replace a server. A live connection under the same name is
    /// dropped so the next connect picks up the new config.
    pub async fn upsert_server(&self, config: ServerConfig) -> Result<(), CoreError> {
        let name = config.name.clone();
        let previous = self.registry.upsert(config)?;
        if previous.is_some() && self.manager.state(&name).await != ConnectionState::Disconnected {
            self.manager.disconnect(&name).await?;
        }
        self.servers_changed();
        Ok(())
    }

    /// Remove a server, disconnecting it first.
    pub async fn remove_server(&self, name: &str) -> Result<ServerConfig, CoreError> {
        if self.registry.get(name).is_none() {
            return Err(CoreError::NotFound(format!("server '{name}'")));
        }
        self.manager.forget(name).await?;
        let removed = self.registry.remove(name)?;
        self.servers_changed();
        Ok(removed)
    }

    /// Import a `mcpServers` document. Imported names that are live are
    /// disconnected.
    pub async fn import(&self, document: &Value) -> Result<ImportReport, CoreError> {
        let report = self.registry.import_document(document)?;
        for name in &report.imported {
            if self.manager.state(name).await != ConnectionState::Disconnected {
                self.manager.disconnect(name).await?;
            }
        }
        self.servers_changed();
        Ok(report)
    }

    pub async fn import_str(&self, text: &str) -> Result<ImportReport, CoreError> {
        let document: Value = serde_json::from_str(text)
            .map_err(|e| CoreError::InvalidConfig(format!("server document is not JSON: {e}")))?;
        self.import(&document).await
    }

    /// Every config as a `mcpServers` document.
    pub fn export(&self) -> Value {
        self.registry.export_document()
    }

    // =========================================================================
    // Connections
    // =========================================================================

    pub async fn connect(&self, name: &str) -> Result<ConnectionState, CoreError> {
        self.manager.connect(name).await
    }

    pub async fn disconnect(&self, name: &str) -> Result<(), CoreError> {
        self.manager.disconnect(name).await
    }

    pub async fn auto_connect(&self) -> AutoConnectReport {
        self.manager.auto_connect_enabled_servers().await
    }

    pub async fn states(&self) -> Vec<ServerStatus> {
        self.manager.states().await
    }

    pub async fn refresh(&self, name: &str) -> Result<(usize, usize), CoreError> {
        self.manager.refresh(name).await
    }

    // =========================================================================
    // Capabilities
    // =========================================================================

    pub async fn list_tools(&self) -> Vec<ToolDescriptor> {
        self.manager.cache().list_tools().await
    }

    pub async fn list_resources(&self) -> Vec<ResourceDescriptor> {
        self.manager.cache().list_resources().await
    }

    pub async fn tool_schemas(&self) -> Vec<ToolSchema> {
        self.manager.cache().tool_schemas().await
    }

    pub async fn get_resource(
        &self,
        uri: &str,
        ttl: Option<Duration>,
    ) -> Result<ResourceDescriptor, CoreError> {
        self.manager.get_resource(uri, ttl).await
    }

    pub async fn evict_resource(&self, uri: &str) -> bool {
        self.manager.evict_resource(uri).await
    }

    pub async fn invoke(
        &self,
        request: &ToolCallRequest,
        policy: InvokePolicy,
    ) -> Result<ExecutionResult, CoreError> {
        self.invoker.invoke(request, policy).await
    }

    /// Disconnect every server.
    pub async fn shutdown(&self) {
        tracing::info!("Shutting down tool-server connections");
        self.manager.disconnect_all().await;
    }
}
