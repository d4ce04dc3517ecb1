//! Core error taxonomy.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Canonical error type used across the core domain.
///
/// Adapters map this to their own shapes (CLI exit codes, host UI messages).
/// A policy refusal is normally reported as [`crate::ExecutionOutcome::Blocked`];
/// [`CoreError::Blocked`] exists for callers that need it as a hard error.
#[derive(Debug, Clone, Error)]
pub enum CoreError {
    /// Config failed validation.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Unknown server: {0}")]
    UnknownServer(String),

    #[error("Server '{0}' is disabled")]
    Disabled(String),

    #[error("Server '{0}' is not connected")]
    NotConnected(String),

    #[error("Timed out after {seconds}s waiting for {operation}")]
    Timeout { operation: String, seconds: u64 },

    /// I/O or framing failure on a server transport.
    #[error("Transport error on '{server}': {message}")]
    TransportError { server: String, message: String },

    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    #[error("Invalid tool name '{0}': only letters, digits, '.', '_' and '-' are allowed (max 100)")]
    InvalidToolName(String),

    #[error("Arguments for '{tool}' do not match its schema: {message}")]
    SchemaViolation { tool: String, message: String },

    #[error("Blocked by security policy: {0}")]
    Blocked(String),

    #[error("Execution error: {0}")]
    ExecutionError(String),

    #[error("Not found: {0}")]
    NotFound(String),

    /// Preference storage failed.
    #[error("Storage error: {0}")]
    Storage(String),

    /// Settings validation error.
    #[error(transparent)]
    Settings(#[from] crate::settings::SettingsError),
}

/// Stable category codes for UI handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    Configuration,
    Lookup,
    Connection,
    Timeout,
    Validation,
    Policy,
    Execution,
    Storage,
}

impl CoreError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::InvalidConfig(_) | Self::Settings(_) => ErrorCategory::Configuration,
            Self::UnknownServer(_) | Self::UnknownTool(_) | Self::NotFound(_) => {
                ErrorCategory::Lookup
            }
            Self::Disabled(_) | Self::NotConnected(_) | Self::TransportError { .. } => {
                ErrorCategory::Connection
            }
            Self::Timeout { .. } => ErrorCategory::Timeout,
            Self::InvalidToolName(_) | Self::SchemaViolation { .. } => ErrorCategory::Validation,
            Self::Blocked(_) => ErrorCategory::Policy,
            Self::ExecutionError(_) => ErrorCategory::Execution,
            Self::Storage(_) => ErrorCategory::Storage,
        }
    }

    pub fn timeout(operation: impl Into<String>, seconds: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            seconds,
        }
    }

    pub fn transport(server: impl Into<String>, message: impl Into<String>) -> Self {
        Self::TransportError {
            server: server.into(),
            message: message.into(),
        }
    }

    pub fn schema(tool: impl Into<String>, message: impl Into<String>) -> Self {
        Self::SchemaViolation {
            tool: tool.into(),
            message: message.into(),
        }
    }

    /// Whether this error should move the owning connection to `failed`.
    pub const fn is_transport(&self) -> bool {
        matches!(self, Self::TransportError { .. })
    }
}
