//! Events emitted to host UIs.

use serde::{Deserialize, Serialize};

use crate::domain::{ConnectionState, ExecutionOutcome, Severity};

/// Application event for host UIs (status bars, tool panels).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CoreEvent {
    /// A server moved to a new connection state.
    ServerStateChanged {
        server: String,
        state: ConnectionState,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },

    /// Capability discovery finished for a server.
    CapabilitiesDiscovered {
        server: String,
        tool_count: usize,
        resource_count: usize,
    },

    /// The server registry changed (upsert, removal or import).
    ServersChanged { names: Vec<String> },

    /// A tool call finished.
    ToolInvoked {
        tool: String,
        correlation_id: String,
        outcome: ExecutionOutcome,
    },

    /// A script run finished.
    ScriptExecuted {
        outcome: ExecutionOutcome,
        severity: Severity,
    },
}

impl CoreEvent {
    pub fn state_changed(server: impl Into<String>, state: ConnectionState) -> Self {
        Self::ServerStateChanged {
            server: server.into(),
            state,
            error: None,
        }
    }

    pub fn state_failed(server: impl Into<String>, error: impl Into<String>) -> Self {
        Self::ServerStateChanged {
            server: server.into(),
            state: ConnectionState::Failed,
            error: Some(error.into()),
        }
    }

    /// Server name this event concerns, if any.
    pub fn server(&self) -> Option<&str> {
        match self {
            Self::ServerStateChanged { server, .. } | Self::CapabilitiesDiscovered { server, .. } => {
                Some(server)
            }
            _ => None,
        }
    }
}
