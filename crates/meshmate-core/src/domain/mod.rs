//! Domain types.
//!
//! These types describe tool servers, their capabilities and the results of
//! running tools and scripts, independent of any transport or interpreter.

mod capability;
mod chat;
mod execution;
mod risk;
mod server;

pub use capability::{
    QUALIFIED_NAME_SEPARATOR, ResourceContent, ResourceDescriptor, ToolDescriptor, ToolSchema,
};
pub use chat::{ChatMessage, ChatRole};
pub use execution::{
    DISPLAY_MAX_LINES, ExecutionOutcome, ExecutionResult, SourceLocation, ToolCallRequest,
    truncate_lines,
};
pub use risk::{Finding, RiskAssessment, Severity};
pub use server::{
    ConnectionState, DEFAULT_SERVER_TIMEOUT_SECS, ImportIssue, ImportReport, ServerConfig,
};
