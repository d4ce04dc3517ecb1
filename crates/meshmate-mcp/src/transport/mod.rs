//! Transport ports.
//!
//! A [`TransportFactory`] turns a [`ServerConfig`] into a live
//! [`MessageTransport`] that moves newline-free JSON strings. The stdio
//! implementation spawns a child process; tests use an in-memory stub.

pub mod path;
mod stdio;

use async_trait::async_trait;
use meshmate_core::ServerConfig;

use crate::error::McpClientError;

pub use stdio::{StdioTransport, StdioTransportFactory};

/// A bidirectional message pipe to one server.
///
/// Owned by exactly one connection worker.
#[async_trait]
pub trait MessageTransport: Send {
    /// Write one message.
    async fn send(&mut self, message: String) -> Result<(), McpClientError>;

    /// Read the next message. `Ok(None)` means the server closed the stream.
    ///
    /// Must be cancel-safe: the worker polls it inside `tokio::select!`.
    async fn recv(&mut self) -> Result<Option<String>, McpClientError>;

    /// Release the underlying resources. Called once by the worker.
    async fn close(&mut self);
}

/// Launches transports for server configs.
#[async_trait]
pub trait TransportFactory: Send + Sync {
    async fn launch(
        &self,
        config: &ServerConfig,
    ) -> Result<Box<dyn MessageTransport>, McpClientError>;
}
