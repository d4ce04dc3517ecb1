//! Connection lifecycle management.
//!
//! One connection per enabled server, driven through
//! `disconnected → connecting → connected → disconnecting → disconnected`
//! with `failed` reachable from `connecting` and `connected`. `connect` and
//! `disconnect` for the same name are serialized by a per-name transition
//! lock; a disconnect cancels an in-flight handshake instead of waiting for it.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures_util::future::join_all;
use meshmate_core::{
    ConnectionState, CoreError, CoreEvent, CoreEventEmitter, ResourceDescriptor, ServerConfig,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{Mutex, RwLock, mpsc};
use tokio_util::sync::CancellationToken;

use crate::cache::CapabilityCache;
use crate::client::McpClient;
use crate::error::McpClientError;
use crate::protocol::{CallToolResult, NOTIFY_RESOURCES_CHANGED, NOTIFY_TOOLS_CHANGED};
use crate::registry::ServerRegistry;
use crate::transport::TransportFactory;
use crate::worker::{self, CloseReason, ServerNotification};

/// Snapshot of one server's connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerStatus {
    pub name: String,
    pub state: ConnectionState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

/// Per-server outcome of [`ConnectionManager::auto_connect_enabled_servers`].
#[derive(Debug, Default)]
pub struct AutoConnectReport {
    pub connected: Vec<String>,
    pub failed: Vec<(String, CoreError)>,
}

impl AutoConnectReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

#[derive(Debug, Default)]
struct SlotStatus {
    state: ConnectionState,
    last_error: Option<String>,
    client: Option<Arc<McpClient>>,
    /// Bumped on every connect attempt; stale monitors compare against it.
    generation: u64,
    /// Cancels the handshake currently in flight.
    pending: Option<CancellationToken>,
}

/// Everything the manager tracks for one server name.
#[derive(Debug)]
struct ServerSlot {
    name: String,
    transition: Mutex<()>,
    status: RwLock<SlotStatus>,
}

/// Shared pieces handed to monitor tasks.
#[derive(Clone)]
struct Shared {
    cache: Arc<CapabilityCache>,
    emitter: Arc<dyn CoreEventEmitter>,
}

impl Shared {
    fn emit_state(&self, server: &str, state: ConnectionState) {
        self.emitter.emit(CoreEvent::state_changed(server, state));
    }

    /// Move a connected slot to `failed` if it is still on `generation`.
    async fn fail(&self, slot: &ServerSlot, generation: u64, error: &str) {
        let client = {
            let mut status = slot.status.write().await;
            if status.generation != generation || status.state != ConnectionState::Connected {
                return;
            }
            status.state = ConnectionState::Failed;
            status.last_error = Some(error.to_string());
            status.client.take()
        };

        self.cache.invalidate(&slot.name).await;
        if let Some(client) = client {
            client.shutdown().await;
        }

        tracing::warn!(server = %slot.name, error = %error, "Connection failed");
        self.emitter.emit(CoreEvent::state_failed(&slot.name, error));
    }

    /// Replace the cached capabilities of `slot` only while it is still
    /// connected on `generation`. The status lock is held across the replace
    /// so a concurrent disconnect cannot invalidate first and be overwritten.
    async fn replace_if_current(
        &self,
        slot: &ServerSlot,
        generation: u64,
        tools: Vec<meshmate_core::ToolDescriptor>,
        resources: Vec<ResourceDescriptor>,
    ) -> bool {
        let status = slot.status.write().await;
        if status.generation != generation || status.state != ConnectionState::Connected {
            return false;
        }
        self.cache.replace(&slot.name, tools, resources).await;
        true
    }

    /// Re-run discovery on a connected slot and replace its cache entry.
    async fn refresh(&self, slot: &ServerSlot) -> Result<(usize, usize), CoreError> {
        let (client, generation) = {
            let status = slot.status.read().await;
            match (&status.client, status.state) {
                (Some(client), ConnectionState::Connected) => (client.clone(), status.generation),
                _ => return Err(CoreError::NotConnected(slot.name.clone())),
            }
        };

        match client.discover().await {
            Ok((tools, resources)) => {
                let counts = (tools.len(), resources.len());
                if !self.replace_if_current(slot, generation, tools, resources).await {
                    tracing::debug!(server = %slot.name, "Dropping refresh for a closed connection");
                    return Err(CoreError::NotConnected(slot.name.clone()));
                }
                tracing::info!(
                    server = %slot.name,
                    tool_count = counts.0,
                    resource_count = counts.1,
                    "Capabilities refreshed"
                );
                self.emitter.emit(CoreEvent::CapabilitiesDiscovered {
                    server: slot.name.clone(),
                    tool_count: counts.0,
                    resource_count: counts.1,
                });
                Ok(counts)
            }
            Err(e) => {
                if e.is_fatal() {
                    self.fail(slot, generation, &e.to_string()).await;
                }
                Err(e.into_core(&slot.name))
            }
        }
    }
}

/// Live connection and handshake state per server name.
pub struct ConnectionManager {
    registry: Arc<ServerRegistry>,
    factory: Arc<dyn TransportFactory>,
    shared: Shared,
    slots: RwLock<HashMap<String, Arc<ServerSlot>>>,
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}

struct Established {
    client: McpClient,
    notifications: mpsc::UnboundedReceiver<ServerNotification>,
    tools: Vec<meshmate_core::ToolDescriptor>,
    resources: Vec<ResourceDescriptor>,
}

impl ConnectionManager {
    pub fn new(
        registry: Arc<ServerRegistry>,
        factory: Arc<dyn TransportFactory>,
        cache: Arc<CapabilityCache>,
        emitter: Arc<dyn CoreEventEmitter>,
    ) -> Self {
        Self {
            registry,
            factory,
            shared: Shared { cache, emitter },
            slots: RwLock::new(HashMap::new()),
        }
    }

    pub fn cache(&self) -> &Arc<CapabilityCache> {
        &self.shared.cache
    }

    pub fn registry(&self) -> &Arc<ServerRegistry> {
        &self.registry
    }

    async fn slot(&self, name: &str) -> Option<Arc<ServerSlot>> {
        self.slots.read().await.get(name).cloned()
    }

    async fn slot_or_insert(&self, name: &str) -> Arc<ServerSlot> {
        if let Some(slot) = self.slot(name).await {
            return slot;
        }
        self.slots
            .write()
            .await
            .entry(name.to_string())
            .or_insert_with(|| {
                Arc::new(ServerSlot {
                    name: name.to_string(),
                    transition: Mutex::new(()),
                    status: RwLock::new(SlotStatus::default()),
                })
            })
            .clone()
    }

    /// Connect `name`.
    ///
    /// Returns the current state without doing anything when the server is
    /// already `connected` or `connecting`.
    pub async fn connect(&self, name: &str) -> Result<ConnectionState, CoreError> {
        let config = self
            .registry
            .get(name)
            .ok_or_else(|| CoreError::UnknownServer(name.to_string()))?;
        if !config.enabled {
            return Err(CoreError::Disabled(name.to_string()));
        }

        let slot = self.slot_or_insert(name).await;
        let seen_generation = {
            let status = slot.status.read().await;
            if status.state.is_live() {
                return Ok(status.state);
            }
            status.generation
        };

        let _transition = slot.transition.lock().await;

        let (token, generation) = {
            let mut status = slot.status.write().await;
            // Another caller finished a connect attempt while we waited.
            if status.generation != seen_generation {
                match status.state {
                    ConnectionState::Connected | ConnectionState::Connecting => {
                        return Ok(status.state);
                    }
                    ConnectionState::Failed => {
                        return Err(CoreError::transport(
                            name,
                            status.last_error.clone().unwrap_or_default(),
                        ));
                    }
                    _ => {}
                }
            }
            if status.state == ConnectionState::Connected {
                return Ok(ConnectionState::Connected);
            }

            let token = CancellationToken::new();
            status.generation += 1;
            status.state = ConnectionState::Connecting;
            status.last_error = None;
            status.pending = Some(token.clone());
            (token, status.generation)
        };
        self.shared.emit_state(name, ConnectionState::Connecting);
        tracing::info!(server = %name, command = %config.command, "Connecting");

        let timeout = config.timeout_duration();
        let outcome = tokio::select! {
            () = token.cancelled() => None,
            result = tokio::time::timeout(timeout, self.establish(&config)) => Some(result),
        };

        match outcome {
            None => {
                let mut status = slot.status.write().await;
                status.state = ConnectionState::Disconnecting;
                status.pending = None;
                drop(status);
                self.shared.emit_state(name, ConnectionState::Disconnecting);
                tracing::info!(server = %name, "Handshake cancelled");
                Err(CoreError::NotConnected(name.to_string()))
            }
            Some(Ok(Ok(established))) => Ok(self.finish_connect(&slot, generation, established).await),
            Some(Ok(Err(e))) => {
                let error = e.into_core(name);
                self.record_failure(&slot, &error).await;
                Err(error)
            }
            Some(Err(_)) => {
                let error = CoreError::timeout(format!("handshake with '{name}'"), timeout.as_secs());
                self.record_failure(&slot, &error).await;
                Err(error)
            }
        }
    }

    /// Launch, initialize and discover. Dropping the future releases the
    /// transport.
    async fn establish(&self, config: &ServerConfig) -> Result<Established, McpClientError> {
        let transport = self.factory.launch(config).await?;
        let (handle, notifications) = worker::spawn(&config.name, transport);
        let mut client = McpClient::new(handle, config.timeout_duration());

        let handshake = async {
            client.initialize().await?;
            client.discover().await
        };
        match handshake.await {
            Ok((tools, resources)) => Ok(Established {
                client,
                notifications,
                tools,
                resources,
            }),
            Err(e) => {
                client.shutdown().await;
                Err(e)
            }
        }
    }

    async fn finish_connect(
        &self,
        slot: &Arc<ServerSlot>,
        generation: u64,
        established: Established,
    ) -> ConnectionState {
        let Established {
            client,
            notifications,
            tools,
            resources,
        } = established;
        let client = Arc::new(client);
        let (tool_count, resource_count) = (tools.len(), resources.len());

        self.shared.cache.replace(&slot.name, tools, resources).await;
        {
            let mut status = slot.status.write().await;
            status.state = ConnectionState::Connected;
            status.client = Some(client.clone());
            status.pending = None;
        }

        tracing::info!(
            server = %slot.name,
            tool_count,
            resource_count,
            "Connected"
        );
        self.shared.emit_state(&slot.name, ConnectionState::Connected);
        self.shared.emitter.emit(CoreEvent::CapabilitiesDiscovered {
            server: slot.name.clone(),
            tool_count,
            resource_count,
        });

        self.spawn_monitor(slot.clone(), client, notifications, generation);
        ConnectionState::Connected
    }

    async fn record_failure(&self, slot: &ServerSlot, error: &CoreError) {
        {
            let mut status = slot.status.write().await;
            status.state = ConnectionState::Failed;
            status.last_error = Some(error.to_string());
            status.pending = None;
            status.client = None;
        }
        self.shared.cache.invalidate(&slot.name).await;
        tracing::warn!(server = %slot.name, error = %error, "Connect failed");
        self.shared
            .emitter
            .emit(CoreEvent::state_failed(&slot.name, error.to_string()));
    }

    /// Watch a live connection for loss and list-changed notifications.
    fn spawn_monitor(
        &self,
        slot: Arc<ServerSlot>,
        client: Arc<McpClient>,
        mut notifications: mpsc::UnboundedReceiver<ServerNotification>,
        generation: u64,
    ) {
        let shared = self.shared.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    reason = client.closed() => {
                        if let CloseReason::Lost(error) = reason {
                            shared.fail(&slot, generation, &error).await;
                        }
                        break;
                    }
                    Some(note) = notifications.recv() => {
                        if note.method == NOTIFY_TOOLS_CHANGED || note.method == NOTIFY_RESOURCES_CHANGED {
                            if let Err(e) = shared.refresh(&slot).await {
                                tracing::warn!(server = %slot.name, error = %e, "Refresh after list change failed");
                            }
                        }
                    }
                }
            }
        });
    }

    /// Disconnect `name`. Idempotent; unknown names are a no-op.
    pub async fn disconnect(&self, name: &str) -> Result<(), CoreError> {
        let Some(slot) = self.slot(name).await else {
            return Ok(());
        };

        if let Some(token) = slot.status.read().await.pending.clone() {
            token.cancel();
        }

        let _transition = slot.transition.lock().await;

        let (client, was) = {
            let mut status = slot.status.write().await;
            let was = status.state;
            if was == ConnectionState::Disconnected {
                return Ok(());
            }
            if was != ConnectionState::Failed {
                status.state = ConnectionState::Disconnecting;
            }
            (status.client.take(), was)
        };
        if was == ConnectionState::Connected {
            self.shared.emit_state(name, ConnectionState::Disconnecting);
        }

        if let Some(client) = client {
            client.shutdown().await;
        }
        self.shared.cache.invalidate(name).await;

        {
            let mut status = slot.status.write().await;
            status.state = ConnectionState::Disconnected;
            status.last_error = None;
            status.pending = None;
        }
        self.shared.emit_state(name, ConnectionState::Disconnected);
        tracing::info!(server = %name, "Disconnected");
        Ok(())
    }

    /// Disconnect and drop all tracking for `name` (used on removal).
    pub async fn forget(&self, name: &str) -> Result<(), CoreError> {
        self.disconnect(name).await?;
        self.slots.write().await.remove(name);
        Ok(())
    }

    /// Disconnect every server. Used by shutdown.
    pub async fn disconnect_all(&self) {
        let names: Vec<String> = self.slots.read().await.keys().cloned().collect();
        for result in join_all(names.iter().map(|name| self.disconnect(name))).await {
            if let Err(e) = result {
                tracing::warn!(error = %e, "Disconnect during shutdown failed");
            }
        }
    }

    /// Connect every enabled server concurrently. Failures do not affect
    /// other servers.
    pub async fn auto_connect_enabled_servers(&self) -> AutoConnectReport {
        let names: Vec<String> = self
            .registry
            .list()
            .into_iter()
            .filter(|config| config.enabled)
            .map(|config| config.name)
            .collect();

        let results = join_all(names.iter().map(|name| self.connect(name))).await;

        let mut report = AutoConnectReport::default();
        for (name, result) in names.into_iter().zip(results) {
            match result {
                Ok(_) => report.connected.push(name),
                Err(e) => report.failed.push((name, e)),
            }
        }
        tracing::info!(
            connected = report.connected.len(),
            failed = report.failed.len(),
            "Auto-connect finished"
        );
        report
    }

    /// Current state of `name`; `disconnected` when never connected.
    pub async fn state(&self, name: &str) -> ConnectionState {
        match self.slot(name).await {
            Some(slot) => slot.status.read().await.state,
            None => ConnectionState::Disconnected,
        }
    }

    pub async fn last_error(&self, name: &str) -> Option<String> {
        match self.slot(name).await {
            Some(slot) => slot.status.read().await.last_error.clone(),
            None => None,
        }
    }

    /// Status of every configured server, in registry order.
    pub async fn states(&self) -> Vec<ServerStatus> {
        let mut statuses = Vec::new();
        for name in self.registry.names() {
            let (state, last_error) = match self.slot(&name).await {
                Some(slot) => {
                    let status = slot.status.read().await;
                    (status.state, status.last_error.clone())
                }
                None => (ConnectionState::Disconnected, None),
            };
            statuses.push(ServerStatus {
                name,
                state,
                last_error,
            });
        }
        statuses
    }

    async fn connected_client(&self, name: &str) -> Result<(Arc<ServerSlot>, Arc<McpClient>, u64), CoreError> {
        let slot = self
            .slot(name)
            .await
            .ok_or_else(|| CoreError::NotConnected(name.to_string()))?;
        let (client, generation) = {
            let status = slot.status.read().await;
            match (&status.client, status.state) {
                (Some(client), ConnectionState::Connected) => (client.clone(), status.generation),
                _ => return Err(CoreError::NotConnected(name.to_string())),
            }
        };
        Ok((slot, client, generation))
    }

    async fn map_error(&self, slot: &ServerSlot, generation: u64, error: McpClientError) -> CoreError {
        if error.is_fatal() {
            self.shared.fail(slot, generation, &error.to_string()).await;
        }
        error.into_core(&slot.name)
    }

    /// Send a raw request to a connected server and wait for its result.
    ///
    /// A transport failure moves the connection to `failed`.
    pub async fn send(
        &self,
        name: &str,
        method: &str,
        params: Option<Value>,
    ) -> Result<Value, CoreError> {
        let (slot, client, generation) = self.connected_client(name).await?;
        match client.request_value(method, params).await {
            Ok(value) => Ok(value),
            Err(e) => Err(self.map_error(&slot, generation, e).await),
        }
    }

    /// `tools/call` on a connected server.
    pub async fn call_tool(
        &self,
        server: &str,
        tool: &str,
        arguments: Value,
    ) -> Result<CallToolResult, CoreError> {
        let (slot, client, generation) = self.connected_client(server).await?;
        match client.call_tool(tool, arguments).await {
            Ok(result) => Ok(result),
            Err(e) => Err(self.map_error(&slot, generation, e).await),
        }
    }

    /// Re-run discovery for a connected server.
    pub async fn refresh(&self, name: &str) -> Result<(usize, usize), CoreError> {
        let slot = self
            .slot(name)
            .await
            .ok_or_else(|| CoreError::NotConnected(name.to_string()))?;
        self.shared.refresh(&slot).await
    }

    /// Resource by URI, with content. Cached content younger than `ttl` (or
    /// any cached content when `ttl` is `None`) is returned as-is; otherwise
    /// the content is fetched through the owning connection and cached.
    pub async fn get_resource(
        &self,
        uri: &str,
        ttl: Option<Duration>,
    ) -> Result<ResourceDescriptor, CoreError> {
        let resource = self
            .shared
            .cache
            .find_resource(uri)
            .await
            .ok_or_else(|| CoreError::NotFound(format!("resource '{uri}'")))?;

        let ttl = ttl.and_then(|ttl| chrono::Duration::from_std(ttl).ok());
        if resource.has_fresh_content(Utc::now(), ttl) {
            return Ok(resource);
        }

        let (slot, client, generation) = self.connected_client(&resource.server).await?;
        let content = match client.read_resource(uri).await {
            Ok(content) => content,
            Err(e) => return Err(self.map_error(&slot, generation, e).await),
        };
        tracing::debug!(server = %resource.server, uri = %uri, "Resource fetched");

        self.shared
            .cache
            .store_content(&resource.server, uri, content, Utc::now())
            .await
            .ok_or_else(|| CoreError::NotFound(format!("resource '{uri}'")))
    }

    /// Drop cached content for `uri`.
    pub async fn evict_resource(&self, uri: &str) -> bool {
        self.shared.cache.evict_content(uri).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::StubServer;
    use meshmate_core::{MemoryPreferenceStore, NoopEmitter};

    fn manager_with(stub: &StubServer, configs: Vec<ServerConfig>) -> ConnectionManager {
        let registry = ServerRegistry::load(Arc::new(MemoryPreferenceStore::new())).unwrap();
        for config in configs {
            registry.upsert(config).unwrap();
        }
        ConnectionManager::new(
            Arc::new(registry),
            Arc::new(stub.clone()),
            Arc::new(CapabilityCache::new()),
            Arc::new(NoopEmitter::new()),
        )
    }

    #[tokio::test]
    async fn test_unknown_and_disabled() {
        let stub = StubServer::new().with_echo_tool();
        let manager = manager_with(&stub, vec![ServerConfig::new("off", "stub").with_enabled(false)]);

        assert!(matches!(manager.connect("nope").await, Err(CoreError::UnknownServer(_))));
        assert!(matches!(manager.connect("off").await, Err(CoreError::Disabled(_))));
        assert_eq!(stub.launches(), 0);
        assert_eq!(manager.state("off").await, ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_connect_is_idempotent() {
        let stub = StubServer::new().with_echo_tool();
        let manager = manager_with(&stub, vec![ServerConfig::new("echo", "stub")]);

        assert_eq!(manager.connect("echo").await.unwrap(), ConnectionState::Connected);
        assert_eq!(manager.connect("echo").await.unwrap(), ConnectionState::Connected);
        assert_eq!(stub.launches(), 1);
    }

    #[tokio::test]
    async fn test_launch_failure_records_error() {
        let stub = StubServer::new().refusing("broken");
        let manager = manager_with(&stub, vec![ServerConfig::new("broken", "stub")]);

        let err = manager.connect("broken").await.unwrap_err();
        assert!(err.is_transport());
        assert_eq!(manager.state("broken").await, ConnectionState::Failed);
        assert!(manager.last_error("broken").await.unwrap().contains("refused"));

        // Failed -> disconnected on explicit disconnect.
        manager.disconnect("broken").await.unwrap();
        assert_eq!(manager.state("broken").await, ConnectionState::Disconnected);
        assert!(manager.last_error("broken").await.is_none());
    }

    #[tokio::test]
    async fn test_send_requires_connection() {
        let stub = StubServer::new().with_echo_tool();
        let manager = manager_with(&stub, vec![ServerConfig::new("echo", "stub")]);
        assert!(matches!(
            manager.send("echo", "ping", None).await,
            Err(CoreError::NotConnected(_))
        ));

        manager.connect("echo").await.unwrap();
        assert!(manager.send("echo", "ping", None).await.is_ok());
    }

    #[tokio::test]
    async fn test_stale_discovery_is_not_cached() {
        let stub = StubServer::new().with_echo_tool();
        let manager = manager_with(&stub, vec![ServerConfig::new("echo", "stub")]);
        manager.connect("echo").await.unwrap();

        let slot = manager.slot("echo").await.unwrap();
        let (client, generation) = {
            let status = slot.status.read().await;
            (status.client.clone().unwrap(), status.generation)
        };
        // Discovery finished, then the server was disconnected before the
        // result was stored.
        let (tools, resources) = client.discover().await.unwrap();
        manager.disconnect("echo").await.unwrap();

        assert!(
            !manager
                .shared
                .replace_if_current(&slot, generation, tools.clone(), resources.clone())
                .await
        );
        assert!(manager.cache().list_tools().await.is_empty());

        // A newer connection rejects results from the old generation too.
        manager.connect("echo").await.unwrap();
        manager.cache().invalidate("echo").await;
        assert!(
            !manager
                .shared
                .replace_if_current(&slot, generation, tools.clone(), resources.clone())
                .await
        );
        assert!(manager.cache().list_tools().await.is_empty());

        let current = slot.status.read().await.generation;
        assert!(manager.shared.replace_if_current(&slot, current, tools, resources).await);
        assert_eq!(manager.cache().list_tools().await.len(), 1);
    }

    #[tokio::test]
    async fn test_states_cover_registry() {
        let stub = StubServer::new().with_echo_tool();
        let manager = manager_with(
            &stub,
            vec![ServerConfig::new("a", "stub"), ServerConfig::new("b", "stub")],
        );
        manager.connect("b").await.unwrap();

        let states = manager.states().await;
        assert_eq!(states.len(), 2);
        assert_eq!(states[0].state, ConnectionState::Disconnected);
        assert_eq!(states[1].state, ConnectionState::Connected);
    }
}
