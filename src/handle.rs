//! Synchronous host interface.
//!
//! The host calls in from a single thread that must not block for long.
//! [`CoreHandle`] owns a multi-threaded tokio runtime and blocks on the async
//! core; every call that reaches a tool server is bounded by that server's
//! timeout, and script runs by the sandbox limits.

use std::sync::Arc;
use std::time::Duration;

use meshmate_core::{
    ChatMessage, CompletionProvider, ConnectionState, CoreError, CoreEventEmitter,
    ExecutionResult, ImportReport, NoopEmitter, PreferenceStore, ResourceDescriptor,
    RiskAssessment, SecurityValidator, ServerConfig, Settings, SettingsService, SettingsUpdate,
    ToolCallRequest, ToolDescriptor, ToolSchema,
};
use meshmate_mcp::{
    AutoConnectReport, InvokePolicy, McpService, ServerInfo, ServerRegistry, ServerStatus,
    StdioTransportFactory, TransportFactory,
};
use meshmate_sandbox::{CodeSandbox, EmptyHost, HostSurface};
use serde_json::Value;
use thiserror::Error;
use tokio::runtime::Runtime;

use crate::assistant::{self, Assistant, Turn};

/// How long shutdown waits for connections to close.
const SHUTDOWN_DISCONNECT_TIMEOUT: Duration = Duration::from_secs(5);
/// How long shutdown waits for runtime tasks after disconnecting.
const SHUTDOWN_RUNTIME_TIMEOUT: Duration = Duration::from_secs(2);

/// Failure to bring the core up.
#[derive(Debug, Error)]
pub enum InitError {
    #[error("Failed to start async runtime: {0}")]
    Runtime(#[from] std::io::Error),

    #[error(transparent)]
    Core(#[from] CoreError),
}

/// Everything [`init`] needs from the host.
pub struct InitOptions {
    pub preferences: Arc<dyn PreferenceStore>,
    pub host: Arc<dyn HostSurface>,
    pub emitter: Arc<dyn CoreEventEmitter>,
    pub transports: Arc<dyn TransportFactory>,
    pub provider: Option<Arc<dyn CompletionProvider>>,
    /// Seed the default server config into an empty registry.
    pub seed_default_servers: bool,
}

impl InitOptions {
    /// Options with stdio transports, no host modules, no event listener and
    /// no completion provider.
    pub fn new(preferences: Arc<dyn PreferenceStore>) -> Self {
        Self {
            preferences,
            host: Arc::new(EmptyHost),
            emitter: Arc::new(NoopEmitter::new()),
            transports: Arc::new(StdioTransportFactory),
            provider: None,
            seed_default_servers: true,
        }
    }

    #[must_use]
    pub fn with_host(mut self, host: Arc<dyn HostSurface>) -> Self {
        self.host = host;
        self
    }

    #[must_use]
    pub fn with_emitter(mut self, emitter: Arc<dyn CoreEventEmitter>) -> Self {
        self.emitter = emitter;
        self
    }

    #[must_use]
    pub fn with_transports(mut self, transports: Arc<dyn TransportFactory>) -> Self {
        self.transports = transports;
        self
    }

    #[must_use]
    pub fn with_provider(mut self, provider: Arc<dyn CompletionProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    #[must_use]
    pub const fn without_default_servers(mut self) -> Self {
        self.seed_default_servers = false;
        self
    }
}

/// Bring the core up.
///
/// Loads settings and server configs from the preference store and starts
/// the runtime. When MCP and auto-connect are both enabled, enabled servers
/// are connected in the background so init itself returns promptly.
pub fn init(options: InitOptions) -> Result<CoreHandle, InitError> {
    let InitOptions {
        preferences,
        host,
        emitter,
        transports,
        provider,
        seed_default_servers,
    } = options;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .thread_name("meshmate-core")
        .build()?;

    let settings = Arc::new(SettingsService::load(preferences.clone())?);
    let mut registry = ServerRegistry::load(preferences)?;
    if seed_default_servers {
        registry = registry.with_defaults_if_empty()?;
    }

    let validator = Arc::new(SecurityValidator::default());
    let mcp = Arc::new(McpService::new(
        Arc::new(registry),
        transports,
        validator.clone(),
        emitter.clone(),
    ));
    let current = settings.get();
    let sandbox = Arc::new(
        CodeSandbox::new(validator, host)
            .with_emitter(emitter)
            .with_block_threshold(current.effective_script_block_threshold()),
    );
    let assistant = provider
        .map(|provider| Assistant::new(provider, mcp.clone(), sandbox.clone(), settings.clone()));

    if current.effective_mcp_enabled() && current.effective_auto_connect() {
        let mcp = mcp.clone();
        runtime.spawn(async move {
            let report = mcp.auto_connect().await;
            for (name, error) in &report.failed {
                tracing::warn!(server = %name, error = %error, "Auto-connect failed");
            }
            tracing::info!(
                connected = report.connected.len(),
                failed = report.failed.len(),
                "Auto-connect finished"
            );
        });
    }

    tracing::info!("meshmate core initialized");
    Ok(CoreHandle {
        runtime,
        settings,
        mcp,
        sandbox,
        assistant,
    })
}

/// Blocking facade over the async core. Drop it through [`CoreHandle::shutdown`].
pub struct CoreHandle {
    runtime: Runtime,
    settings: Arc<SettingsService>,
    mcp: Arc<McpService>,
    sandbox: Arc<CodeSandbox>,
    assistant: Option<Assistant>,
}

impl std::fmt::Debug for CoreHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoreHandle")
            .field("sandbox", &self.sandbox)
            .field("has_provider", &self.assistant.is_some())
            .finish_non_exhaustive()
    }
}

impl CoreHandle {
    /// The async service, for hosts that run their own executor.
    pub const fn mcp(&self) -> &Arc<McpService> {
        &self.mcp
    }

    pub const fn sandbox(&self) -> &Arc<CodeSandbox> {
        &self.sandbox
    }

    // =========================================================================
    // Settings
    // =========================================================================

    pub fn settings(&self) -> Settings {
        self.settings.get()
    }

    pub fn update_settings(&self, update: &SettingsUpdate) -> Result<Settings, CoreError> {
        self.settings.update(update)
    }

    fn mcp_enabled(&self) -> Result<(), CoreError> {
        if self.settings.get().effective_mcp_enabled() {
            Ok(())
        } else {
            Err(CoreError::InvalidConfig(
                "tool servers are disabled in settings".into(),
            ))
        }
    }

    // =========================================================================
    // Servers
    // =========================================================================

    pub fn list_servers(&self) -> Vec<ServerInfo> {
        self.runtime.block_on(self.mcp.list_servers())
    }

    pub fn upsert_server(&self, config: ServerConfig) -> Result<(), CoreError> {
        self.runtime.block_on(self.mcp.upsert_server(config))
    }

    pub fn remove_server(&self, name: &str) -> Result<ServerConfig, CoreError> {
        self.runtime.block_on(self.mcp.remove_server(name))
    }

    pub fn import_servers(&self, text: &str) -> Result<ImportReport, CoreError> {
        self.runtime.block_on(self.mcp.import_str(text))
    }

    pub fn export_servers(&self) -> Value {
        self.mcp.export()
    }

    pub fn connect(&self, name: &str) -> Result<ConnectionState, CoreError> {
        self.mcp_enabled()?;
        self.runtime.block_on(self.mcp.connect(name))
    }

    /// Connect every enabled server, reporting each failure separately.
    pub fn connect_enabled(&self) -> Result<AutoConnectReport, CoreError> {
        self.mcp_enabled()?;
        Ok(self.runtime.block_on(self.mcp.auto_connect()))
    }

    pub fn disconnect(&self, name: &str) -> Result<(), CoreError> {
        self.runtime.block_on(self.mcp.disconnect(name))
    }

    pub fn states(&self) -> Vec<ServerStatus> {
        self.runtime.block_on(self.mcp.states())
    }

    // =========================================================================
    // Capabilities
    // =========================================================================

    pub fn list_tools(&self) -> Vec<ToolDescriptor> {
        self.runtime.block_on(self.mcp.list_tools())
    }

    /// Tool schemas to advertise to a completion provider.
    pub fn tool_schemas(&self) -> Vec<ToolSchema> {
        self.runtime.block_on(self.mcp.tool_schemas())
    }

    pub fn list_resources(&self) -> Vec<ResourceDescriptor> {
        self.runtime.block_on(self.mcp.list_resources())
    }

    /// Read a resource, reusing cached content within the configured TTL.
    pub fn get_resource(&self, uri: &str) -> Result<ResourceDescriptor, CoreError> {
        let ttl = self
            .settings
            .get()
            .resource_cache_ttl_secs
            .map(Duration::from_secs);
        self.runtime.block_on(self.mcp.get_resource(uri, ttl))
    }

    pub fn evict_resource(&self, uri: &str) -> bool {
        self.runtime.block_on(self.mcp.evict_resource(uri))
    }

    /// Validate and run a tool call under the current thresholds.
    pub fn invoke(&self, request: &ToolCallRequest) -> Result<ExecutionResult, CoreError> {
        self.mcp_enabled()?;
        let policy = InvokePolicy::from_settings(&self.settings.get());
        self.runtime.block_on(self.mcp.invoke(request, policy))
    }

    // =========================================================================
    // Scripts
    // =========================================================================

    /// Static assessment of `script`. Nothing runs.
    pub fn check_script(&self, script: &str) -> RiskAssessment {
        self.sandbox.check(script)
    }

    pub fn run_script(&self, script: &str) -> ExecutionResult {
        let settings = self.settings.get();
        self.runtime
            .block_on(assistant::run_script(&self.sandbox, &settings, script))
    }

    // =========================================================================
    // Chat
    // =========================================================================

    /// Run one chat turn. Requires a completion provider at init.
    pub fn respond(&self, history: &mut Vec<ChatMessage>) -> Result<Turn, CoreError> {
        let assistant = self.assistant.as_ref().ok_or_else(|| {
            CoreError::InvalidConfig("no completion provider configured".into())
        })?;
        self.runtime.block_on(assistant.respond(history))
    }

    /// Disconnect every server, cancel sandbox runs and stop the runtime.
    pub fn shutdown(self) {
        tracing::info!("meshmate core shutting down");
        self.sandbox.shutdown();

        let mcp = self.mcp.clone();
        let disconnected = self.runtime.block_on(async move {
            tokio::time::timeout(SHUTDOWN_DISCONNECT_TIMEOUT, mcp.shutdown()).await
        });
        if disconnected.is_err() {
            tracing::warn!(
                timeout_secs = SHUTDOWN_DISCONNECT_TIMEOUT.as_secs(),
                "Timed out disconnecting servers during shutdown"
            );
        }

        self.runtime.shutdown_timeout(SHUTDOWN_RUNTIME_TIMEOUT);
    }
}
