//! Core domain for meshmate.
//!
//! Pure types, the security validator and the ports that adapters implement.
//! Nothing in this crate spawns processes or touches the network.

#![cfg_attr(not(test), deny(unused_crate_dependencies))]

pub mod domain;
pub mod error;
pub mod events;
pub mod ports;
pub mod security;
pub mod services;
pub mod settings;

// Re-export commonly used types for convenience
pub use domain::{
    ChatMessage, ChatRole, ConnectionState, ExecutionOutcome, ExecutionResult, Finding,
    ImportIssue, ImportReport, ResourceContent, ResourceDescriptor, RiskAssessment, ServerConfig,
    Severity, SourceLocation, ToolCallRequest, ToolDescriptor, ToolSchema,
};
pub use error::{CoreError, ErrorCategory};
pub use events::CoreEvent;
pub use ports::{
    CompletionProvider, CompletionReply, CompletionRequest, CoreEventEmitter,
    MemoryPreferenceStore, NoopEmitter, PreferenceStore,
};
pub use security::{ScriptPolicy, SecurityValidator};
pub use services::SettingsService;
pub use settings::{Settings, SettingsError, SettingsUpdate, validate_settings};

