//! Tool-server configuration and connection state types.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Handshake and per-call timeout applied when a config does not declare one.
pub const DEFAULT_SERVER_TIMEOUT_SECS: u64 = 30;

const fn default_enabled() -> bool {
    true
}

const fn default_timeout() -> u64 {
    DEFAULT_SERVER_TIMEOUT_SECS
}

/// Declarative configuration for one tool server.
///
/// Entries are replaced wholesale by the registry; a connection keeps the
/// copy it was launched with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Unique server name, also the prefix of every qualified tool name.
    pub name: String,

    /// Executable to launch (resolved through `PATH` when not absolute).
    pub command: String,

    /// Ordered arguments passed to `command`.
    #[serde(default)]
    pub args: Vec<String>,

    /// Working directory for the process.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cwd: Option<String>,

    /// Extra environment variables for the process.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,

    /// Human-readable description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Whether the server may be connected.
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Handshake and per-call timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout: u64,
}

impl ServerConfig {
    /// Create an enabled config with default timeout and no arguments.
    pub fn new(name: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            command: command.into(),
            args: Vec::new(),
            cwd: None,
            env: BTreeMap::new(),
            description: None,
            enabled: true,
            timeout: DEFAULT_SERVER_TIMEOUT_SECS,
        }
    }

    #[must_use]
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    #[must_use]
    pub const fn with_timeout(mut self, seconds: u64) -> Self {
        self.timeout = seconds;
        self
    }

    #[must_use]
    pub const fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Timeout as a [`Duration`].
    pub const fn timeout_duration(&self) -> Duration {
        Duration::from_secs(self.timeout)
    }

    /// Validate the config before it enters the registry.
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.name.trim().is_empty() {
            return Err(CoreError::InvalidConfig("server name cannot be empty".into()));
        }

        if self.command.trim().is_empty() {
            return Err(CoreError::InvalidConfig(format!(
                "server '{}' has an empty command",
                self.name
            )));
        }

        // Arguments go in `args`.
        if self.command.chars().any(char::is_whitespace) {
            return Err(CoreError::InvalidConfig(format!(
                "server '{}': command must not contain whitespace, put arguments in args",
                self.name
            )));
        }

        if self.timeout == 0 {
            return Err(CoreError::InvalidConfig(format!(
                "server '{}': timeout must be at least 1 second",
                self.name
            )));
        }

        if self.env.keys().any(|key| key.trim().is_empty()) {
            return Err(CoreError::InvalidConfig(format!(
                "server '{}': environment variable names cannot be empty",
                self.name
            )));
        }

        if let Some(cwd) = &self.cwd {
            if !Path::new(cwd).is_absolute() {
                return Err(CoreError::InvalidConfig(format!(
                    "server '{}': working directory must be absolute, got '{cwd}'",
                    self.name
                )));
            }
        }

        Ok(())
    }
}

/// Lifecycle state of a server connection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Disconnecting,
    Failed,
}

impl ConnectionState {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Disconnecting => "disconnecting",
            Self::Failed => "failed",
        }
    }

    /// `true` while a transport is (or is about to be) alive.
    #[must_use]
    pub const fn is_live(&self) -> bool {
        matches!(self, Self::Connecting | Self::Connected)
    }

    /// Whether the state machine allows moving from `self` to `next`.
    #[must_use]
    pub const fn can_transition_to(&self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Disconnected | Self::Failed, Self::Connecting)
                | (Self::Connecting, Self::Connected | Self::Failed | Self::Disconnecting)
                | (Self::Connected, Self::Disconnecting | Self::Failed)
                | (Self::Disconnecting | Self::Failed, Self::Disconnected)
        )
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One rejected entry from a config import.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportIssue {
    pub name: String,
    pub message: String,
}

/// Per-entry outcome of a config import.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportReport {
    /// Names that were inserted or replaced.
    pub imported: Vec<String>,
    /// Entries that failed validation, in document order.
    pub issues: Vec<ImportIssue>,
}

impl ImportReport {
    pub fn is_clean(&self) -> bool {
        self.issues.is_empty()
    }

    /// Record a rejected entry.
    pub fn push_issue(&mut self, name: impl Into<String>, message: impl Into<String>) {
        self.issues.push(ImportIssue {
            name: name.into(),
            message: message.into(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_from_json() {
        let config: ServerConfig =
            serde_json::from_str(r#"{"name":"echo","command":"echo","args":["hi"]}"#).unwrap();
        assert!(config.enabled);
        assert_eq!(config.timeout, DEFAULT_SERVER_TIMEOUT_SECS);
        assert_eq!(config.args, vec!["hi"]);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_empty_fields() {
        let missing_name = ServerConfig::new("  ", "npx");
        assert!(matches!(
            missing_name.validate(),
            Err(CoreError::InvalidConfig(_))
        ));

        let missing_command = ServerConfig::new("fs", "");
        assert!(matches!(
            missing_command.validate(),
            Err(CoreError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_validate_rejects_command_with_arguments() {
        let config = ServerConfig::new("fs", "npx -y server-filesystem");
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("whitespace"));
    }

    #[test]
    fn test_validate_rejects_zero_timeout_and_relative_cwd() {
        assert!(ServerConfig::new("a", "b").with_timeout(0).validate().is_err());

        let mut config = ServerConfig::new("a", "b");
        config.cwd = Some("relative/dir".into());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_state_machine_transitions() {
        use ConnectionState::*;

        assert!(Disconnected.can_transition_to(Connecting));
        assert!(Connecting.can_transition_to(Connected));
        assert!(Connected.can_transition_to(Disconnecting));
        assert!(Disconnecting.can_transition_to(Disconnected));
        assert!(Connected.can_transition_to(Failed));
        assert!(Failed.can_transition_to(Connecting));
        assert!(Failed.can_transition_to(Disconnected));

        assert!(!Disconnected.can_transition_to(Connected));
        assert!(!Failed.can_transition_to(Connected));
        assert!(!Disconnecting.can_transition_to(Connected));
    }
}
