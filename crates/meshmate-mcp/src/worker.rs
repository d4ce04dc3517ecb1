//! Per-connection worker task.
//!
//! The worker owns the transport. Callers hand it requests over a channel and
//! wait on a oneshot for the matching response, so a synchronous host can
//! block on a bounded future while reads and writes stay on the runtime.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde_json::Value;
use tokio::sync::{mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;

use crate::error::McpClientError;
use crate::protocol::{Incoming, JsonRpcNotification, JsonRpcRequest, reply_to_server_request};
use crate::transport::MessageTransport;

type Reply = oneshot::Sender<Result<Value, McpClientError>>;

/// How long one write may stay blocked before the server counts as gone.
const WRITE_TIMEOUT: Duration = Duration::from_secs(30);

/// Upper bound on releasing the transport once the worker stops.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

enum Command {
    Request {
        id: u64,
        method: String,
        params: Option<Value>,
        reply: Reply,
    },
    Notify {
        method: String,
        params: Option<Value>,
    },
    /// The caller stopped waiting for `id`.
    Abandon(u64),
    Shutdown,
}

/// Why a worker stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// Shut down on request.
    Requested,
    /// The transport failed or the server went away.
    Lost(String),
}

/// A notification pushed by the server.
#[derive(Debug, Clone)]
pub struct ServerNotification {
    pub method: String,
    pub params: Option<Value>,
}

/// Caller side of a connection worker.
#[derive(Debug)]
pub struct ConnectionHandle {
    server: String,
    commands: mpsc::UnboundedSender<Command>,
    next_id: AtomicU64,
    closed: watch::Receiver<Option<CloseReason>>,
    stop: CancellationToken,
}

impl std::fmt::Debug for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Request { id, method, .. } => write!(f, "Request({id}, {method})"),
            Self::Notify { method, .. } => write!(f, "Notify({method})"),
            Self::Abandon(id) => write!(f, "Abandon({id})"),
            Self::Shutdown => f.write_str("Shutdown"),
        }
    }
}

/// Start a worker for `transport`.
///
/// Returns the handle and the stream of server notifications. The worker
/// stops on [`ConnectionHandle::shutdown`], when every handle is dropped, or
/// when the transport fails; pending requests then fail with a transport
/// error.
pub fn spawn(
    server: impl Into<String>,
    transport: Box<dyn MessageTransport>,
) -> (ConnectionHandle, mpsc::UnboundedReceiver<ServerNotification>) {
    let server = server.into();
    let (commands_tx, commands_rx) = mpsc::unbounded_channel();
    let (notify_tx, notify_rx) = mpsc::unbounded_channel();
    let (closed_tx, closed_rx) = watch::channel(None);
    let stop = CancellationToken::new();

    let worker = Worker {
        server: server.clone(),
        transport,
        pending: HashMap::new(),
        notifications: notify_tx,
        stop: stop.clone(),
    };
    tokio::spawn(worker.run(commands_rx, closed_tx));

    let handle = ConnectionHandle {
        server,
        commands: commands_tx,
        next_id: AtomicU64::new(1),
        closed: closed_rx,
        stop,
    };
    (handle, notify_rx)
}

impl ConnectionHandle {
    pub fn server(&self) -> &str {
        &self.server
    }

    /// Send a request and wait at most `timeout` for its response.
    ///
    /// On timeout the pending entry is abandoned; a late response is dropped.
    pub async fn request(
        &self,
        method: &str,
        params: Option<Value>,
        timeout: Duration,
    ) -> Result<Value, McpClientError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (reply, response) = oneshot::channel();
        self.commands
            .send(Command::Request {
                id,
                method: method.to_string(),
                params,
                reply,
            })
            .map_err(|_| McpClientError::Closed)?;

        match tokio::time::timeout(timeout, response).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(McpClientError::Closed),
            Err(_) => {
                let _ = self.commands.send(Command::Abandon(id));
                Err(McpClientError::Timeout {
                    method: method.to_string(),
                    after: timeout,
                })
            }
        }
    }

    /// Queue a notification. Fails only if the worker has stopped.
    pub fn notify(&self, method: &str, params: Option<Value>) -> Result<(), McpClientError> {
        self.commands
            .send(Command::Notify {
                method: method.to_string(),
                params,
            })
            .map_err(|_| McpClientError::Closed)
    }

    /// Ask the worker to stop. Pending requests fail with a transport error.
    ///
    /// Also interrupts a write the server is not reading.
    pub fn shutdown(&self) {
        let _ = self.commands.send(Command::Shutdown);
        self.stop.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.borrow().is_some()
    }

    /// Wait until the worker has stopped and its transport is released.
    pub async fn closed(&self) -> CloseReason {
        let mut closed = self.closed.clone();
        match closed.wait_for(Option::is_some).await {
            Ok(reason) => reason.clone().unwrap_or(CloseReason::Requested),
            Err(_) => CloseReason::Lost("worker vanished".to_string()),
        }
    }
}

struct Worker {
    server: String,
    transport: Box<dyn MessageTransport>,
    pending: HashMap<u64, Reply>,
    notifications: mpsc::UnboundedSender<ServerNotification>,
    stop: CancellationToken,
}

enum Event {
    Command(Option<Command>),
    Line(Result<Option<String>, McpClientError>),
}

impl Worker {
    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        closed: watch::Sender<Option<CloseReason>>,
    ) {
        let reason = loop {
            let event = tokio::select! {
                () = self.stop.cancelled() => Event::Command(Some(Command::Shutdown)),
                command = commands.recv() => Event::Command(command),
                line = self.transport.recv() => Event::Line(line),
            };

            let step = match event {
                Event::Command(None | Some(Command::Shutdown)) => Err(CloseReason::Requested),
                Event::Command(Some(command)) => self.handle_command(command).await,
                Event::Line(Ok(Some(line))) => self.handle_line(&line).await,
                Event::Line(Ok(None)) => Err(CloseReason::Lost(
                    "server closed its output stream".to_string(),
                )),
                Event::Line(Err(e)) => Err(CloseReason::Lost(e.to_string())),
            };

            if let Err(reason) = step {
                break reason;
            }
        };

        let message = match &reason {
            CloseReason::Requested => "connection closed".to_string(),
            CloseReason::Lost(message) => message.clone(),
        };
        for (_, reply) in self.pending.drain() {
            let _ = reply.send(Err(McpClientError::Transport(message.clone())));
        }

        if tokio::time::timeout(CLOSE_TIMEOUT, self.transport.close()).await.is_err() {
            tracing::warn!(server = %self.server, "Transport did not close in time");
        }

        match &reason {
            CloseReason::Requested => tracing::debug!(server = %self.server, "Connection worker stopped"),
            CloseReason::Lost(message) => {
                tracing::warn!(server = %self.server, error = %message, "Connection lost");
            }
        }
        let _ = closed.send(Some(reason));
    }

    async fn handle_command(&mut self, command: Command) -> Result<(), CloseReason> {
        match command {
            Command::Request {
                id,
                method,
                params,
                reply,
            } => {
                let line = match serde_json::to_string(&JsonRpcRequest::new(
                    id,
                    &method,
                    params.as_ref(),
                )) {
                    Ok(line) => line,
                    Err(e) => {
                        let _ = reply.send(Err(e.into()));
                        return Ok(());
                    }
                };
                tracing::debug!(server = %self.server, id, method = %method, "Sending request");
                self.pending.insert(id, reply);
                self.write(line).await
            }
            Command::Notify { method, params } => {
                let line = serde_json::to_string(&JsonRpcNotification::new(&method, params.as_ref()))
                    .map_err(|e| CloseReason::Lost(e.to_string()))?;
                self.write(line).await
            }
            Command::Abandon(id) => {
                if self.pending.remove(&id).is_some() {
                    tracing::debug!(server = %self.server, id, "Request abandoned by caller");
                }
                Ok(())
            }
            Command::Shutdown => Err(CloseReason::Requested),
        }
    }

    async fn handle_line(&mut self, line: &str) -> Result<(), CloseReason> {
        match Incoming::parse(line) {
            Ok(Incoming::Response { id, result }) => {
                match self.pending.remove(&id) {
                    Some(reply) => {
                        let _ = reply.send(result.map_err(Into::into));
                    }
                    None => tracing::debug!(server = %self.server, id, "Dropping late response"),
                }
                Ok(())
            }
            Ok(Incoming::Notification { method, params }) => {
                tracing::debug!(server = %self.server, method = %method, "Server notification");
                let _ = self.notifications.send(ServerNotification { method, params });
                Ok(())
            }
            Ok(Incoming::Request { id, method }) => {
                let reply = reply_to_server_request(&id, &method);
                self.write(reply.to_string()).await
            }
            Err(e) => {
                tracing::warn!(server = %self.server, error = %e, "Ignoring unreadable message");
                Ok(())
            }
        }
    }

    /// Write one line. A write the server never drains is abandoned on
    /// shutdown or after [`WRITE_TIMEOUT`].
    async fn write(&mut self, line: String) -> Result<(), CloseReason> {
        tokio::select! {
            () = self.stop.cancelled() => Err(CloseReason::Requested),
            sent = tokio::time::timeout(WRITE_TIMEOUT, self.transport.send(line)) => match sent {
                Ok(Ok(())) => Ok(()),
                Ok(Err(e)) => Err(CloseReason::Lost(e.to_string())),
                Err(_) => Err(CloseReason::Lost(format!(
                    "server stopped reading its input for {}s",
                    WRITE_TIMEOUT.as_secs()
                ))),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;

    /// Answers every request with its own params; `hang` is never answered and
    /// `stall` blocks the write itself.
    struct LoopbackTransport {
        outbox: mpsc::UnboundedSender<String>,
        inbox: mpsc::UnboundedReceiver<String>,
        closed: std::sync::Arc<std::sync::atomic::AtomicBool>,
    }

    impl LoopbackTransport {
        fn new() -> (Self, std::sync::Arc<std::sync::atomic::AtomicBool>) {
            let (outbox, inbox) = mpsc::unbounded_channel();
            let closed = std::sync::Arc::new(std::sync::atomic::AtomicBool::new(false));
            (
                Self {
                    outbox,
                    inbox,
                    closed: closed.clone(),
                },
                closed,
            )
        }
    }

    #[async_trait]
    impl MessageTransport for LoopbackTransport {
        async fn send(&mut self, message: String) -> Result<(), McpClientError> {
            let request: Value = serde_json::from_str(&message)?;
            if request["method"] == "hang" || request.get("id").is_none() {
                return Ok(());
            }
            if request["method"] == "stall" {
                std::future::pending::<()>().await;
            }
            if request["method"] == "crash" {
                return Err(McpClientError::Transport("broken pipe".into()));
            }
            let reply = json!({"jsonrpc": "2.0", "id": request["id"], "result": request["params"]});
            let _ = self.outbox.send(reply.to_string());
            Ok(())
        }

        async fn recv(&mut self) -> Result<Option<String>, McpClientError> {
            Ok(self.inbox.recv().await)
        }

        async fn close(&mut self) {
            self.closed.store(true, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn test_request_round_trip() {
        let (transport, _) = LoopbackTransport::new();
        let (handle, _notes) = spawn("loop", Box::new(transport));

        let result = handle
            .request("echo", Some(json!({"x": 1})), Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(result, json!({"x": 1}));
    }

    #[tokio::test]
    async fn test_timeout_abandons_request() {
        let (transport, _) = LoopbackTransport::new();
        let (handle, _notes) = spawn("loop", Box::new(transport));

        let result = handle.request("hang", None, Duration::from_millis(50)).await;
        assert!(matches!(result, Err(McpClientError::Timeout { .. })));

        // The worker is still usable afterwards.
        let result = handle
            .request("echo", Some(json!(2)), Duration::from_secs(1))
            .await;
        assert_eq!(result.unwrap(), json!(2));
    }

    #[tokio::test]
    async fn test_shutdown_fails_pending_requests() {
        let (transport, closed) = LoopbackTransport::new();
        let (handle, _notes) = spawn("loop", Box::new(transport));
        let handle = std::sync::Arc::new(handle);

        let waiter = {
            let handle = handle.clone();
            tokio::spawn(async move { handle.request("hang", None, Duration::from_secs(10)).await })
        };
        tokio::task::yield_now().await;
        tokio::time::sleep(Duration::from_millis(20)).await;

        handle.shutdown();
        let result = waiter.await.unwrap();
        assert!(matches!(result, Err(McpClientError::Transport(_))));
        assert_eq!(handle.closed().await, CloseReason::Requested);
        assert!(closed.load(Ordering::SeqCst));
        assert!(handle.is_closed());
    }

    #[tokio::test]
    async fn test_shutdown_interrupts_blocked_write() {
        let (transport, closed) = LoopbackTransport::new();
        let (handle, _notes) = spawn("loop", Box::new(transport));

        let result = handle.request("stall", None, Duration::from_millis(50)).await;
        assert!(matches!(result, Err(McpClientError::Timeout { .. })));

        handle.shutdown();
        let reason = tokio::time::timeout(Duration::from_secs(2), handle.closed())
            .await
            .expect("worker stopped");
        assert_eq!(reason, CloseReason::Requested);
        assert!(closed.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn test_blocked_write_times_out() {
        let (transport, _) = LoopbackTransport::new();
        let (handle, _notes) = spawn("loop", Box::new(transport));

        let result = handle.request("stall", None, WRITE_TIMEOUT * 2).await;
        assert!(matches!(result, Err(McpClientError::Transport(ref m)) if m.contains("stopped reading")));
        assert!(matches!(handle.closed().await, CloseReason::Lost(_)));
    }

    #[tokio::test]
    async fn test_write_failure_is_lost() {
        let (transport, _) = LoopbackTransport::new();
        let (handle, _notes) = spawn("loop", Box::new(transport));

        let result = handle.request("crash", None, Duration::from_secs(1)).await;
        assert!(matches!(result, Err(McpClientError::Transport(ref m)) if m.contains("broken pipe")));
        assert!(matches!(handle.closed().await, CloseReason::Lost(_)));
        assert!(matches!(
            handle.request("echo", None, Duration::from_secs(1)).await,
            Err(McpClientError::Closed)
        ));
    }
}
