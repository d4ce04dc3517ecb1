//! # meshmate
//!
//! AI assistant core for embedding in a 3D content-creation host.
//!
//! The host brings the process up with [`init`], talks to the returned
//! [`CoreHandle`] from its own thread, and tears everything down with
//! [`CoreHandle::shutdown`]. Workspace crates can also be used directly:
//!
//! - `meshmate_core` - domain types, settings, the security validator and ports
//! - `meshmate_mcp` - tool-server registry, connections and invocation
//! - `meshmate_sandbox` - validated script execution

#![deny(unsafe_code)]
#![cfg_attr(not(test), deny(unused_crate_dependencies))]

pub mod assistant;
pub mod handle;

pub use assistant::{Assistant, StopReason, Turn};
pub use handle::{CoreHandle, InitError, InitOptions, init};

pub use meshmate_core::{
    ChatMessage, CompletionProvider, CompletionReply, CompletionRequest, ConnectionState,
    CoreError, CoreEvent, CoreEventEmitter, ExecutionOutcome, ExecutionResult, PreferenceStore,
    RiskAssessment, ServerConfig, Settings, SettingsUpdate, Severity, ToolCallRequest,
};
pub use meshmate_sandbox::{HostSurface, MemoryScene};
