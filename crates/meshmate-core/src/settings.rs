//! Settings domain types and validation.
//!
//! Settings are an explicitly owned value: loaded through a
//! [`PreferenceStore`](crate::ports::PreferenceStore), held by
//! [`SettingsService`](crate::services::SettingsService) and passed to the
//! components that need them. There is no process-wide instance.

use serde::{Deserialize, Serialize};

use crate::domain::Severity;

/// Default wall-clock limit for a sandboxed script, in seconds.
pub const DEFAULT_SANDBOX_MAX_SECONDS: f64 = 30.0;

/// Default operation budget for a sandboxed script.
pub const DEFAULT_SANDBOX_MAX_OPERATIONS: u64 = 10_000_000;

/// Default maximum number of tool-call rounds per assistant turn.
pub const DEFAULT_MAX_TOOL_ITERATIONS: u32 = 10;

/// Application settings structure.
///
/// All fields are optional to support partial updates and graceful defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Settings {
    /// Master switch for tool-server support.
    pub mcp_enabled: Option<bool>,

    /// Connect every enabled server during `init`.
    pub mcp_auto_connect: Option<bool>,

    /// Tool calls at or above this severity are refused.
    pub tool_block_threshold: Option<Severity>,

    /// Tool calls at or above this severity (but below the block threshold)
    /// need user confirmation. `None` disables confirmation.
    pub tool_confirm_threshold: Option<Severity>,

    /// Scripts at or above this severity are refused.
    pub script_block_threshold: Option<Severity>,

    /// Allow the assistant to run scripts.
    pub code_execution_enabled: Option<bool>,

    /// Wall-clock limit for one script run.
    pub sandbox_max_seconds: Option<f64>,

    /// Operation budget for one script run.
    pub sandbox_max_operations: Option<u64>,

    /// Maximum iterations for the tool calling loop.
    pub max_tool_iterations: Option<u32>,

    /// Cached resource content older than this is refetched. `None` keeps it
    /// until eviction or disconnect.
    pub resource_cache_ttl_secs: Option<u64>,
}

impl Settings {
    /// Create settings with sensible defaults.
    #[must_use]
    pub const fn with_defaults() -> Self {
        Self {
            mcp_enabled: Some(true),
            mcp_auto_connect: Some(false),
            tool_block_threshold: Some(Severity::High),
            tool_confirm_threshold: Some(Severity::Medium),
            script_block_threshold: Some(Severity::High),
            code_execution_enabled: Some(true),
            sandbox_max_seconds: Some(DEFAULT_SANDBOX_MAX_SECONDS),
            sandbox_max_operations: Some(DEFAULT_SANDBOX_MAX_OPERATIONS),
            max_tool_iterations: Some(DEFAULT_MAX_TOOL_ITERATIONS),
            resource_cache_ttl_secs: None,
        }
    }

    #[must_use]
    pub const fn effective_mcp_enabled(&self) -> bool {
        match self.mcp_enabled {
            Some(enabled) => enabled,
            None => true,
        }
    }

    #[must_use]
    pub const fn effective_auto_connect(&self) -> bool {
        match self.mcp_auto_connect {
            Some(auto) => auto,
            None => false,
        }
    }

    #[must_use]
    pub const fn effective_tool_block_threshold(&self) -> Severity {
        match self.tool_block_threshold {
            Some(threshold) => threshold,
            None => Severity::High,
        }
    }

    /// `None` when confirmation is switched off.
    #[must_use]
    pub const fn effective_tool_confirm_threshold(&self) -> Option<Severity> {
        self.tool_confirm_threshold
    }

    #[must_use]
    pub const fn effective_script_block_threshold(&self) -> Severity {
        match self.script_block_threshold {
            Some(threshold) => threshold,
            None => Severity::High,
        }
    }

    #[must_use]
    pub const fn effective_code_execution(&self) -> bool {
        match self.code_execution_enabled {
            Some(enabled) => enabled,
            None => true,
        }
    }

    #[must_use]
    pub fn effective_sandbox_max_seconds(&self) -> f64 {
        self.sandbox_max_seconds
            .unwrap_or(DEFAULT_SANDBOX_MAX_SECONDS)
    }

    #[must_use]
    pub const fn effective_sandbox_max_operations(&self) -> u64 {
        match self.sandbox_max_operations {
            Some(ops) => ops,
            None => DEFAULT_SANDBOX_MAX_OPERATIONS,
        }
    }

    #[must_use]
    pub const fn effective_max_tool_iterations(&self) -> u32 {
        match self.max_tool_iterations {
            Some(iters) => iters,
            None => DEFAULT_MAX_TOOL_ITERATIONS,
        }
    }

    /// Merge another settings into this one, only updating fields that are Some.
    pub fn merge(&mut self, other: &SettingsUpdate) {
        if let Some(enabled) = other.mcp_enabled {
            self.mcp_enabled = enabled;
        }
        if let Some(auto) = other.mcp_auto_connect {
            self.mcp_auto_connect = auto;
        }
        if let Some(threshold) = other.tool_block_threshold {
            self.tool_block_threshold = threshold;
        }
        if let Some(threshold) = other.tool_confirm_threshold {
            self.tool_confirm_threshold = threshold;
        }
        if let Some(threshold) = other.script_block_threshold {
            self.script_block_threshold = threshold;
        }
        if let Some(enabled) = other.code_execution_enabled {
            self.code_execution_enabled = enabled;
        }
        if let Some(seconds) = other.sandbox_max_seconds {
            self.sandbox_max_seconds = seconds;
        }
        if let Some(ops) = other.sandbox_max_operations {
            self.sandbox_max_operations = ops;
        }
        if let Some(iters) = other.max_tool_iterations {
            self.max_tool_iterations = iters;
        }
        if let Some(ttl) = other.resource_cache_ttl_secs {
            self.resource_cache_ttl_secs = ttl;
        }
    }
}

/// Partial settings update.
///
/// Each field is `Option<Option<T>>`:
/// - `None` = don't change this field
/// - `Some(None)` = set field to None/null
/// - `Some(Some(value))` = set field to value
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SettingsUpdate {
    pub mcp_enabled: Option<Option<bool>>,
    pub mcp_auto_connect: Option<Option<bool>>,
    pub tool_block_threshold: Option<Option<Severity>>,
    pub tool_confirm_threshold: Option<Option<Severity>>,
    pub script_block_threshold: Option<Option<Severity>>,
    pub code_execution_enabled: Option<Option<bool>>,
    pub sandbox_max_seconds: Option<Option<f64>>,
    pub sandbox_max_operations: Option<Option<u64>>,
    pub max_tool_iterations: Option<Option<u32>>,
    pub resource_cache_ttl_secs: Option<Option<u64>>,
}

/// Settings validation error.
#[derive(Debug, Clone, thiserror::Error)]
pub enum SettingsError {
    #[error("Sandbox time limit must be greater than 0 and at most 600 seconds, got {0}")]
    InvalidSandboxSeconds(f64),

    #[error("Sandbox operation budget must be at least 1000, got {0}")]
    InvalidSandboxOperations(u64),

    #[error("Max tool iterations must be between 1 and 100, got {0}")]
    InvalidToolIterations(u32),

    #[error(
        "Confirmation threshold ({confirm}) must be below the block threshold ({block}) to have any effect"
    )]
    ConfirmAboveBlock { confirm: Severity, block: Severity },

    #[error("Unknown setting '{0}'")]
    UnknownKey(String),

    #[error("Invalid value for '{key}': {message}")]
    InvalidValue { key: String, message: String },
}

/// Validate settings values.
pub fn validate_settings(settings: &Settings) -> Result<(), SettingsError> {
    if let Some(seconds) = settings.sandbox_max_seconds {
        if !(seconds > 0.0 && seconds <= 600.0) {
            return Err(SettingsError::InvalidSandboxSeconds(seconds));
        }
    }

    if let Some(ops) = settings.sandbox_max_operations {
        if ops < 1000 {
            return Err(SettingsError::InvalidSandboxOperations(ops));
        }
    }

    if let Some(iters) = settings.max_tool_iterations {
        if !(1..=100).contains(&iters) {
            return Err(SettingsError::InvalidToolIterations(iters));
        }
    }

    if let Some(confirm) = settings.tool_confirm_threshold {
        let block = settings.effective_tool_block_threshold();
        if confirm > block {
            return Err(SettingsError::ConfirmAboveBlock { confirm, block });
        }
    }

    Ok(())
}

/// Build a single-field update from a `key=value` pair, as typed on a command line.
pub fn parse_setting(key: &str, value: &str) -> Result<SettingsUpdate, SettingsError> {
    let invalid = |message: String| SettingsError::InvalidValue {
        key: key.to_string(),
        message,
    };
    let clear = matches!(value.trim(), "" | "none" | "null");

    let parse_bool = |v: &str| -> Result<Option<bool>, SettingsError> {
        if clear {
            return Ok(None);
        }
        match v.trim().to_ascii_lowercase().as_str() {
            "true" | "yes" | "on" | "1" => Ok(Some(true)),
            "false" | "no" | "off" | "0" => Ok(Some(false)),
            other => Err(invalid(format!("expected a boolean, got '{other}'"))),
        }
    };
    let parse_severity = |v: &str| -> Result<Option<Severity>, SettingsError> {
        if clear {
            return Ok(None);
        }
        v.parse::<Severity>().map(Some).map_err(invalid)
    };
    let parse_num = |v: &str| -> Result<Option<u64>, SettingsError> {
        if clear {
            return Ok(None);
        }
        v.trim()
            .parse::<u64>()
            .map(Some)
            .map_err(|e| invalid(e.to_string()))
    };

    let mut update = SettingsUpdate::default();
    match key {
        "mcp_enabled" => update.mcp_enabled = Some(parse_bool(value)?),
        "mcp_auto_connect" => update.mcp_auto_connect = Some(parse_bool(value)?),
        "tool_block_threshold" => update.tool_block_threshold = Some(parse_severity(value)?),
        "tool_confirm_threshold" => update.tool_confirm_threshold = Some(parse_severity(value)?),
        "script_block_threshold" => {
            update.script_block_threshold = Some(parse_severity(value)?);
        }
        "code_execution_enabled" => update.code_execution_enabled = Some(parse_bool(value)?),
        "sandbox_max_seconds" => {
            let seconds = if clear {
                None
            } else {
                Some(
                    value
                        .trim()
                        .parse::<f64>()
                        .map_err(|e| invalid(e.to_string()))?,
                )
            };
            update.sandbox_max_seconds = Some(seconds);
        }
        "sandbox_max_operations" => update.sandbox_max_operations = Some(parse_num(value)?),
        "max_tool_iterations" => {
            let iters = parse_num(value)?
                .map(u32::try_from)
                .transpose()
                .map_err(|e| invalid(e.to_string()))?;
            update.max_tool_iterations = Some(iters);
        }
        "resource_cache_ttl_secs" => update.resource_cache_ttl_secs = Some(parse_num(value)?),
        other => return Err(SettingsError::UnknownKey(other.to_string())),
    }
    Ok(update)
}
