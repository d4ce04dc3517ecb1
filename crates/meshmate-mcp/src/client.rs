//! MCP client over a connection worker.
//!
//! Speaks the handful of MCP methods the core needs: the `initialize`
//! handshake, paginated discovery, `tools/call` and `resources/read`.

use std::time::Duration;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use meshmate_core::{ResourceContent, ResourceDescriptor, ToolDescriptor};
use serde::de::DeserializeOwned;
use serde_json::{Value, json};

use crate::error::McpClientError;
use crate::protocol::{
    CallToolResult, InitializeResult, ListResourcesResult, ListToolsResult, METHOD_INITIALIZE,
    METHOD_INITIALIZED, METHOD_RESOURCES_LIST, METHOD_RESOURCES_READ, METHOD_TOOLS_CALL,
    METHOD_TOOLS_LIST, ReadResourceResult, ServerCapabilities, ServerInfo, initialize_params,
};
use crate::worker::{CloseReason, ConnectionHandle};

/// Upper bound on discovery pages, in case a server keeps returning cursors.
const MAX_PAGES: usize = 64;

/// How long `shutdown` waits for the worker to release the transport.
const SHUTDOWN_WAIT: Duration = Duration::from_secs(10);

/// Client for one initialized (or initializing) server connection.
#[derive(Debug)]
pub struct McpClient {
    handle: ConnectionHandle,
    timeout: Duration,
    server_info: Option<ServerInfo>,
    capabilities: ServerCapabilities,
    protocol_version: Option<String>,
}

impl McpClient {
    /// Wrap a worker handle. `timeout` bounds each request.
    pub fn new(handle: ConnectionHandle, timeout: Duration) -> Self {
        Self {
            handle,
            timeout,
            server_info: None,
            capabilities: ServerCapabilities::default(),
            protocol_version: None,
        }
    }

    pub fn server(&self) -> &str {
        self.handle.server()
    }

    pub const fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Perform the `initialize` handshake and send `notifications/initialized`.
    pub async fn initialize(&mut self) -> Result<InitializeResult, McpClientError> {
        let result: InitializeResult = self
            .request(METHOD_INITIALIZE, Some(initialize_params()))
            .await?;

        self.server_info = Some(result.server_info.clone());
        self.capabilities = result.capabilities.clone();
        self.protocol_version = Some(result.protocol_version.clone());

        self.handle.notify(METHOD_INITIALIZED, None)?;

        tracing::debug!(
            server = %self.server(),
            remote = %result.server_info.name,
            protocol = %result.protocol_version,
            "Handshake complete"
        );
        Ok(result)
    }

    pub const fn server_info(&self) -> Option<&ServerInfo> {
        self.server_info.as_ref()
    }

    pub const fn capabilities(&self) -> &ServerCapabilities {
        &self.capabilities
    }

    pub fn protocol_version(&self) -> Option<&str> {
        self.protocol_version.as_deref()
    }

    /// Discover tools and resources, each only if advertised.
    pub async fn discover(
        &self,
    ) -> Result<(Vec<ToolDescriptor>, Vec<ResourceDescriptor>), McpClientError> {
        let tools = self.list_tools().await?;
        let resources = self.list_resources().await?;
        Ok((tools, resources))
    }

    /// List tools across all pages. Empty when the server has no tools capability.
    pub async fn list_tools(&self) -> Result<Vec<ToolDescriptor>, McpClientError> {
        if self.capabilities.tools.is_none() {
            return Ok(Vec::new());
        }

        let mut tools = Vec::new();
        let mut cursor: Option<String> = None;
        for _ in 0..MAX_PAGES {
            let page: ListToolsResult = self
                .request(METHOD_TOOLS_LIST, cursor.as_ref().map(|c| json!({ "cursor": c })))
                .await?;

            tools.extend(page.tools.into_iter().map(|t| ToolDescriptor {
                name: t.name,
                server: self.server().to_string(),
                description: t.description,
                input_schema: t.input_schema,
            }));

            match page.next_cursor {
                Some(next) if cursor.as_deref() != Some(next.as_str()) => cursor = Some(next),
                _ => break,
            }
        }
        Ok(tools)
    }

    /// List resources across all pages. Empty when not advertised.
    pub async fn list_resources(&self) -> Result<Vec<ResourceDescriptor>, McpClientError> {
        if self.capabilities.resources.is_none() {
            return Ok(Vec::new());
        }

        let mut resources = Vec::new();
        let mut cursor: Option<String> = None;
        for _ in 0..MAX_PAGES {
            let page: ListResourcesResult = self
                .request(
                    METHOD_RESOURCES_LIST,
                    cursor.as_ref().map(|c| json!({ "cursor": c })),
                )
                .await?;

            resources.extend(page.resources.into_iter().map(|r| {
                let mut resource = ResourceDescriptor::new(self.server(), r.uri);
                resource.name = r.name;
                resource.description = r.description;
                resource.mime_type = r.mime_type;
                resource
            }));

            match page.next_cursor {
                Some(next) if cursor.as_deref() != Some(next.as_str()) => cursor = Some(next),
                _ => break,
            }
        }
        Ok(resources)
    }

    /// Read one resource. Base64 `blob` content is decoded.
    pub async fn read_resource(&self, uri: &str) -> Result<ResourceContent, McpClientError> {
        let result: ReadResourceResult = self
            .request(METHOD_RESOURCES_READ, Some(json!({ "uri": uri })))
            .await?;

        let entry = result
            .contents
            .iter()
            .find(|c| c.uri == uri)
            .or_else(|| result.contents.first())
            .ok_or_else(|| McpClientError::Protocol(format!("no contents returned for {uri}")))?;

        match (&entry.text, &entry.blob) {
            (Some(text), _) => Ok(ResourceContent::Text {
                text: text.clone(),
                mime_type: entry.mime_type.clone(),
            }),
            (None, Some(blob)) => {
                let data = BASE64
                    .decode(blob)
                    .map_err(|e| McpClientError::Protocol(format!("invalid base64 blob: {e}")))?;
                Ok(ResourceContent::Binary {
                    data,
                    mime_type: entry.mime_type.clone(),
                })
            }
            (None, None) => Err(McpClientError::Protocol(format!(
                "contents for {uri} carry neither text nor blob"
            ))),
        }
    }

    /// Call a tool by its server-local name.
    pub async fn call_tool(
        &self,
        name: &str,
        arguments: Value,
    ) -> Result<CallToolResult, McpClientError> {
        self.request(
            METHOD_TOOLS_CALL,
            Some(json!({ "name": name, "arguments": arguments })),
        )
        .await
    }

    /// Raw request returning the untyped result.
    pub async fn request_value(
        &self,
        method: &str,
        params: Option<Value>,
    ) -> Result<Value, McpClientError> {
        self.handle.request(method, params, self.timeout).await
    }

    async fn request<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Option<Value>,
    ) -> Result<T, McpClientError> {
        let value = self.request_value(method, params).await?;
        serde_json::from_value(value).map_err(|e| {
            McpClientError::Protocol(format!("malformed '{method}' result: {e}"))
        })
    }

    /// Stop the worker and wait, within [`SHUTDOWN_WAIT`], for the transport
    /// to be released.
    pub async fn shutdown(&self) -> CloseReason {
        self.handle.shutdown();
        match tokio::time::timeout(SHUTDOWN_WAIT, self.handle.closed()).await {
            Ok(reason) => reason,
            Err(_) => {
                tracing::warn!(server = %self.handle.server(), "Worker did not stop in time");
                CloseReason::Lost("worker did not stop in time".to_string())
            }
        }
    }

    /// Resolves when the connection stops for any reason.
    pub async fn closed(&self) -> CloseReason {
        self.handle.closed().await
    }

    pub fn is_closed(&self) -> bool {
        self.handle.is_closed()
    }
}
