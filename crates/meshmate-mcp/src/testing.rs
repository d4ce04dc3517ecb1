//! In-memory tool server for tests.
//!
//! [`StubServer`] is a [`TransportFactory`] whose transports answer MCP
//! requests from a scripted tool and resource list, without spawning
//! processes. It counts launches and requests so tests can assert on what
//! reached the "server".

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use meshmate_core::{ResourceContent, ServerConfig};
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::McpClientError;
use crate::protocol::{METHOD_NOT_FOUND, PROTOCOL_VERSION};
use crate::transport::{MessageTransport, TransportFactory};

#[derive(Debug, Clone)]
enum ToolBehavior {
    /// Reply with `arguments.message`, or the arguments as JSON.
    Echo,
    Text(String),
    Error(String),
    /// Never reply.
    Hang,
    /// Reply with a result whose `content` is not an array.
    Malformed,
    /// Stop reading requests, as a server with a full stdin pipe would.
    Stall,
}

#[derive(Debug, Clone)]
struct StubTool {
    name: String,
    description: String,
    schema: Value,
    behavior: ToolBehavior,
}

#[derive(Debug, Clone)]
struct StubResource {
    uri: String,
    content: ResourceContent,
}

struct Link {
    outbox: mpsc::UnboundedSender<String>,
    crash: CancellationToken,
}

#[derive(Default)]
struct StubState {
    tools: Mutex<Vec<StubTool>>,
    resources: Mutex<Vec<StubResource>>,
    page_size: Mutex<Option<usize>>,
    launch_delay: Mutex<Duration>,
    refuse: Mutex<Vec<String>>,
    silent: Mutex<bool>,
    launches: Mutex<HashMap<String, usize>>,
    requests: Mutex<HashMap<String, usize>>,
    notifications: Mutex<HashMap<String, usize>>,
    calls: Mutex<Vec<(String, Value)>>,
    closes: Mutex<usize>,
    links: Mutex<Vec<Link>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Scripted in-memory MCP server.
#[derive(Clone, Default)]
pub struct StubServer {
    state: Arc<StubState>,
}

impl StubServer {
    pub fn new() -> Self {
        Self::default()
    }

    fn push_tool(self, name: &str, description: &str, schema: Value, behavior: ToolBehavior) -> Self {
        lock(&self.state.tools).push(StubTool {
            name: name.to_string(),
            description: description.to_string(),
            schema,
            behavior,
        });
        self
    }

    /// `echo` tool taking a required string `message`.
    #[must_use]
    pub fn with_echo_tool(self) -> Self {
        self.push_tool(
            "echo",
            "Echo the message back",
            json!({
                "type": "object",
                "properties": {"message": {"type": "string"}},
                "required": ["message"]
            }),
            ToolBehavior::Echo,
        )
    }

    /// Tool that always answers `text`.
    #[must_use]
    pub fn with_text_tool(self, name: &str, text: &str) -> Self {
        self.push_tool(
            name,
            &format!("Returns {text}"),
            json!({"type": "object"}),
            ToolBehavior::Text(text.to_string()),
        )
    }

    /// Tool whose result has `isError` set.
    #[must_use]
    pub fn with_error_tool(self, name: &str, message: &str) -> Self {
        self.push_tool(
            name,
            "Always fails",
            json!({"type": "object"}),
            ToolBehavior::Error(message.to_string()),
        )
    }

    /// Tool that never answers.
    #[must_use]
    pub fn with_hanging_tool(self, name: &str) -> Self {
        self.push_tool(name, "Never returns", json!({"type": "object"}), ToolBehavior::Hang)
    }

    /// Tool whose result body does not parse.
    #[must_use]
    pub fn with_malformed_tool(self, name: &str) -> Self {
        self.push_tool(name, "Answers garbage", json!({"type": "object"}), ToolBehavior::Malformed)
    }

    /// Tool whose call is never read: the write of the request blocks
    /// forever.
    #[must_use]
    pub fn with_stalling_tool(self, name: &str) -> Self {
        self.push_tool(name, "Stops reading", json!({"type": "object"}), ToolBehavior::Stall)
    }

    #[must_use]
    pub fn with_text_resource(self, uri: &str, text: &str) -> Self {
        lock(&self.state.resources).push(StubResource {
            uri: uri.to_string(),
            content: ResourceContent::Text {
                text: text.to_string(),
                mime_type: Some("text/plain".to_string()),
            },
        });
        self
    }

    #[must_use]
    pub fn with_binary_resource(self, uri: &str, data: Vec<u8>, mime_type: &str) -> Self {
        lock(&self.state.resources).push(StubResource {
            uri: uri.to_string(),
            content: ResourceContent::Binary {
                data,
                mime_type: Some(mime_type.to_string()),
            },
        });
        self
    }

    /// Split list results into pages of `size`.
    #[must_use]
    pub fn with_page_size(self, size: usize) -> Self {
        *lock(&self.state.page_size) = Some(size.max(1));
        self
    }

    /// Sleep before each launch completes.
    #[must_use]
    pub fn with_launch_delay(self, delay: Duration) -> Self {
        *lock(&self.state.launch_delay) = delay;
        self
    }

    /// Fail launches for the named server.
    #[must_use]
    pub fn refusing(self, server: &str) -> Self {
        lock(&self.state.refuse).push(server.to_string());
        self
    }

    /// Never answer `initialize`.
    #[must_use]
    pub fn silent(self) -> Self {
        *lock(&self.state.silent) = true;
        self
    }

    /// Add a tool while connections are live (pair with [`Self::notify_all`]).
    pub fn add_text_tool(&self, name: &str, text: &str) {
        lock(&self.state.tools).push(StubTool {
            name: name.to_string(),
            description: format!("Returns {text}"),
            schema: json!({"type": "object"}),
            behavior: ToolBehavior::Text(text.to_string()),
        });
    }

    /// Total launches across all server names.
    pub fn launches(&self) -> usize {
        lock(&self.state.launches).values().sum()
    }

    pub fn launches_for(&self, server: &str) -> usize {
        lock(&self.state.launches).get(server).copied().unwrap_or(0)
    }

    pub fn requests_received(&self, method: &str) -> usize {
        lock(&self.state.requests).get(method).copied().unwrap_or(0)
    }

    pub fn notifications_received(&self, method: &str) -> usize {
        lock(&self.state.notifications)
            .get(method)
            .copied()
            .unwrap_or(0)
    }

    /// `(tool, arguments)` for every `tools/call` received.
    pub fn calls(&self) -> Vec<(String, Value)> {
        lock(&self.state.calls).clone()
    }

    /// Number of transports closed so far.
    pub fn closes(&self) -> usize {
        *lock(&self.state.closes)
    }

    /// Wait until `method` has been received `count` times. `false` on timeout.
    pub async fn wait_for_requests(&self, method: &str, count: usize, limit: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + limit;
        while self.requests_received(method) < count {
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        true
    }

    /// Push a notification to every live connection.
    pub fn notify_all(&self, method: &str) {
        let message = json!({"jsonrpc": "2.0", "method": method}).to_string();
        for link in lock(&self.state.links).iter() {
            let _ = link.outbox.send(message.clone());
        }
    }

    /// Make every live connection report end-of-stream.
    pub fn crash(&self) {
        for link in lock(&self.state.links).drain(..) {
            link.crash.cancel();
        }
    }
}

#[async_trait]
impl TransportFactory for StubServer {
    async fn launch(
        &self,
        config: &ServerConfig,
    ) -> Result<Box<dyn MessageTransport>, McpClientError> {
        *lock(&self.state.launches)
            .entry(config.name.clone())
            .or_default() += 1;

        let delay = *lock(&self.state.launch_delay);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        if lock(&self.state.refuse).contains(&config.name) {
            return Err(McpClientError::Launch(format!(
                "stub refused to start '{}'",
                config.name
            )));
        }

        let (outbox, inbox) = mpsc::unbounded_channel();
        let crash = CancellationToken::new();
        lock(&self.state.links).push(Link {
            outbox: outbox.clone(),
            crash: crash.clone(),
        });

        Ok(Box::new(StubTransport {
            state: self.state.clone(),
            outbox,
            inbox,
            crash,
        }))
    }
}

struct StubTransport {
    state: Arc<StubState>,
    outbox: mpsc::UnboundedSender<String>,
    inbox: mpsc::UnboundedReceiver<String>,
    crash: CancellationToken,
}

#[async_trait]
impl MessageTransport for StubTransport {
    async fn send(&mut self, message: String) -> Result<(), McpClientError> {
        if self.crash.is_cancelled() {
            return Err(McpClientError::Transport("broken pipe".to_string()));
        }

        let message: Value = serde_json::from_str(&message)?;
        let Some(method) = message.get("method").and_then(Value::as_str) else {
            return Ok(());
        };
        let params = message.get("params").cloned().unwrap_or(Value::Null);

        let Some(id) = message.get("id").cloned() else {
            *lock(&self.state.notifications)
                .entry(method.to_string())
                .or_default() += 1;
            return Ok(());
        };

        if method == "tools/call" && self.state.stalls(&params) {
            std::future::pending::<()>().await;
        }

        let reply = self.state.answer(method, &params);
        *lock(&self.state.requests)
            .entry(method.to_string())
            .or_default() += 1;

        if let Some(reply) = reply {
            let mut envelope = json!({"jsonrpc": "2.0", "id": id});
            match reply {
                Ok(result) => envelope["result"] = result,
                Err((code, text)) => envelope["error"] = json!({"code": code, "message": text}),
            }
            let _ = self.outbox.send(envelope.to_string());
        }
        Ok(())
    }

    async fn recv(&mut self) -> Result<Option<String>, McpClientError> {
        tokio::select! {
            () = self.crash.cancelled() => Ok(None),
            message = self.inbox.recv() => Ok(message),
        }
    }

    async fn close(&mut self) {
        *lock(&self.state.closes) += 1;
        self.crash.cancel();
    }
}

type Answer = Option<Result<Value, (i64, String)>>;

impl StubState {
    fn stalls(&self, params: &Value) -> bool {
        let name = params.get("name").and_then(Value::as_str).unwrap_or_default();
        lock(&self.tools)
            .iter()
            .any(|t| t.name == name && matches!(t.behavior, ToolBehavior::Stall))
    }

    fn answer(&self, method: &str, params: &Value) -> Answer {
        match method {
            "initialize" => {
                if *lock(&self.silent) {
                    return None;
                }
                let mut capabilities = json!({});
                if !lock(&self.tools).is_empty() {
                    capabilities["tools"] = json!({"listChanged": true});
                }
                if !lock(&self.resources).is_empty() {
                    capabilities["resources"] = json!({});
                }
                Some(Ok(json!({
                    "protocolVersion": PROTOCOL_VERSION,
                    "capabilities": capabilities,
                    "serverInfo": {"name": "stub", "version": "1.0.0"}
                })))
            }
            "tools/list" => {
                let tools: Vec<Value> = lock(&self.tools)
                    .iter()
                    .map(|t| json!({"name": t.name, "description": t.description, "inputSchema": t.schema}))
                    .collect();
                Some(Ok(self.page("tools", &tools, params)))
            }
            "resources/list" => {
                let resources: Vec<Value> = lock(&self.resources)
                    .iter()
                    .map(|r| json!({"uri": r.uri, "name": r.uri.rsplit('/').next()}))
                    .collect();
                Some(Ok(self.page("resources", &resources, params)))
            }
            "resources/read" => Some(self.read(params)),
            "tools/call" => self.call(params),
            "ping" => Some(Ok(json!({}))),
            other => Some(Err((METHOD_NOT_FOUND, format!("Method not found: {other}")))),
        }
    }

    fn page(&self, key: &str, items: &[Value], params: &Value) -> Value {
        let start = params
            .get("cursor")
            .and_then(Value::as_str)
            .and_then(|c| c.parse::<usize>().ok())
            .unwrap_or(0)
            .min(items.len());
        let size = lock(&self.page_size).unwrap_or(items.len().max(1));
        let end = (start + size).min(items.len());

        let mut page = serde_json::Map::new();
        page.insert(key.to_string(), Value::Array(items[start..end].to_vec()));
        if end < items.len() {
            page.insert("nextCursor".to_string(), json!(end.to_string()));
        }
        Value::Object(page)
    }

    fn read(&self, params: &Value) -> Result<Value, (i64, String)> {
        let uri = params.get("uri").and_then(Value::as_str).unwrap_or_default();
        let resources = lock(&self.resources);
        let resource = resources
            .iter()
            .find(|r| r.uri == uri)
            .ok_or_else(|| (-32002, format!("Resource not found: {uri}")))?;

        let entry = match &resource.content {
            ResourceContent::Text { text, mime_type } => {
                json!({"uri": uri, "mimeType": mime_type, "text": text})
            }
            ResourceContent::Binary { data, mime_type } => {
                json!({"uri": uri, "mimeType": mime_type, "blob": BASE64.encode(data)})
            }
        };
        Ok(json!({"contents": [entry]}))
    }

    fn call(&self, params: &Value) -> Answer {
        let name = params.get("name").and_then(Value::as_str).unwrap_or_default();
        let arguments = params.get("arguments").cloned().unwrap_or_else(|| json!({}));
        lock(&self.calls).push((name.to_string(), arguments.clone()));

        let behavior = lock(&self.tools)
            .iter()
            .find(|t| t.name == name)
            .map(|t| t.behavior.clone());

        let text_result = |text: String, is_error: bool| {
            Some(Ok(json!({
                "content": [{"type": "text", "text": text}],
                "isError": is_error
            })))
        };

        match behavior {
            None => Some(Err((-32602, format!("Unknown tool: {name}")))),
            Some(ToolBehavior::Hang | ToolBehavior::Stall) => None,
            Some(ToolBehavior::Malformed) => Some(Ok(json!({"content": "not-an-array"}))),
            Some(ToolBehavior::Echo) => {
                let text = arguments
                    .get("message")
                    .and_then(Value::as_str)
                    .map_or_else(|| arguments.to_string(), str::to_string);
                text_result(text, false)
            }
            Some(ToolBehavior::Text(text)) => text_result(text, false),
            Some(ToolBehavior::Error(message)) => text_result(message, true),
        }
    }
}
