//! Tool-server connections for meshmate.
//!
//! Speaks MCP (JSON-RPC 2.0 over newline-delimited stdio) to external tool
//! servers. [`McpService`] is the entry point: it owns the
//! [`ServerRegistry`], the [`ConnectionManager`] and the [`ToolInvoker`].

#![deny(unsafe_code)]
#![cfg_attr(not(test), deny(unused_crate_dependencies))]

pub mod cache;
pub mod client;
pub mod error;
pub mod invoker;
pub mod manager;
pub mod protocol;
pub mod registry;
pub mod service;
pub mod transport;
pub mod worker;

#[cfg(any(test, feature = "test-utils"))]
pub mod testing;

// Re-export domain types from core for convenience
pub use meshmate_core::{ConnectionState, ServerConfig, ToolDescriptor};

// Re-export this crate's public types
pub use cache::CapabilityCache;
pub use client::McpClient;
pub use error::McpClientError;
pub use invoker::{InvokePolicy, ToolInvoker};
pub use manager::{AutoConnectReport, ConnectionManager, ServerStatus};
pub use registry::ServerRegistry;
pub use service::{McpService, ServerInfo};
pub use transport::{MessageTransport, StdioTransportFactory, TransportFactory};
