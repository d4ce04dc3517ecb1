//! Wire-level errors for tool-server connections.

use std::time::Duration;

use meshmate_core::CoreError;
use thiserror::Error;

/// Errors raised by the transport, the worker and the JSON-RPC client.
#[derive(Debug, Clone, Error)]
pub enum McpClientError {
    #[error("Failed to launch server: {0}")]
    Launch(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Connection closed")]
    Closed,

    #[error("No response to '{method}' within {}s", after.as_secs())]
    Timeout { method: String, after: Duration },

    #[error("Server error {code}: {message}")]
    Server { code: i64, message: String },

    #[error("Protocol error: {0}")]
    Protocol(String),
}

impl From<serde_json::Error> for McpClientError {
    fn from(e: serde_json::Error) -> Self {
        Self::Protocol(e.to_string())
    }
}

impl From<std::io::Error> for McpClientError {
    fn from(e: std::io::Error) -> Self {
        Self::Transport(e.to_string())
    }
}

impl McpClientError {
    /// Whether the connection can no longer be used after this error.
    ///
    /// A malformed result body only fails its own call; the stream itself
    /// is still framed correctly.
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Self::Launch(_) | Self::Transport(_) | Self::Closed)
    }

    /// Map into the core taxonomy for the named server.
    pub fn into_core(self, server: &str) -> CoreError {
        match self {
            Self::Timeout { method, after } => {
                CoreError::timeout(format!("{method} on '{server}'"), after.as_secs())
            }
            Self::Server { code, message } => {
                CoreError::ExecutionError(format!("'{server}' answered {code}: {message}"))
            }
            Self::Protocol(message) => {
                CoreError::ExecutionError(format!("'{server}' sent an unusable reply: {message}"))
            }
            Self::Closed => CoreError::transport(server, "connection closed"),
            Self::Launch(message) | Self::Transport(message) => CoreError::transport(server, message),
        }
    }
}
