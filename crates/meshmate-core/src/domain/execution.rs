//! Tool-call requests and the shared result shape for tool calls and scripts.

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::risk::RiskAssessment;

/// Lines of output kept by the [`fmt::Display`] rendering.
pub const DISPLAY_MAX_LINES: usize = 50;

/// A request to call a tool on behalf of the completion provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRequest {
    /// Qualified (`server.tool`) or, when unambiguous, bare tool name.
    pub tool: String,

    #[serde(default)]
    pub arguments: BTreeMap<String, Value>,

    /// Matches the eventual [`ExecutionResult`] back to this request.
    pub correlation_id: String,

    /// Set when the user has already approved a call that needed confirmation.
    #[serde(default)]
    pub confirmed: bool,
}

impl ToolCallRequest {
    /// Create a request with a fresh correlation id.
    pub fn new(tool: impl Into<String>) -> Self {
        Self {
            tool: tool.into(),
            arguments: BTreeMap::new(),
            correlation_id: uuid::Uuid::new_v4().to_string(),
            confirmed: false,
        }
    }

    #[must_use]
    pub fn with_argument(mut self, key: impl Into<String>, value: Value) -> Self {
        self.arguments.insert(key.into(), value);
        self
    }

    /// Replace the arguments from a JSON object. Non-object values are ignored.
    #[must_use]
    pub fn with_arguments(mut self, arguments: Value) -> Self {
        if let Value::Object(map) = arguments {
            self.arguments = map.into_iter().collect();
        }
        self
    }

    #[must_use]
    pub fn with_correlation_id(mut self, id: impl Into<String>) -> Self {
        self.correlation_id = id.into();
        self
    }

    #[must_use]
    pub const fn confirmed(mut self) -> Self {
        self.confirmed = true;
        self
    }

    /// Arguments as a JSON object, the shape sent over the wire.
    pub fn arguments_value(&self) -> Value {
        Value::Object(
            self.arguments
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        )
    }
}

/// How an execution ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionOutcome {
    Success,
    /// Refused by policy. Not a fault.
    Blocked,
    Timeout,
    Error,
}

impl ExecutionOutcome {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Blocked => "blocked",
            Self::Timeout => "timeout",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for ExecutionOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Line and column of a script failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceLocation {
    pub line: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub column: Option<usize>,
}

/// Result of a tool call or a script run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub outcome: ExecutionOutcome,

    /// Captured textual output.
    #[serde(default)]
    pub output: String,

    /// Captured error detail.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<SourceLocation>,

    pub elapsed_ms: u64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub risk: Option<RiskAssessment>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,

    /// Blocked only until the user confirms.
    #[serde(default)]
    pub requires_confirmation: bool,
}

impl ExecutionResult {
    fn with_outcome(outcome: ExecutionOutcome) -> Self {
        Self {
            outcome,
            output: String::new(),
            error: None,
            location: None,
            elapsed_ms: 0,
            risk: None,
            correlation_id: None,
            requires_confirmation: false,
        }
    }

    pub fn success(output: impl Into<String>) -> Self {
        let mut result = Self::with_outcome(ExecutionOutcome::Success);
        result.output = output.into();
        result
    }

    pub fn blocked(risk: RiskAssessment, reason: impl Into<String>) -> Self {
        let mut result = Self::with_outcome(ExecutionOutcome::Blocked);
        result.error = Some(reason.into());
        result.risk = Some(risk);
        result
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        let mut result = Self::with_outcome(ExecutionOutcome::Timeout);
        result.error = Some(message.into());
        result
    }

    pub fn error(message: impl Into<String>) -> Self {
        let mut result = Self::with_outcome(ExecutionOutcome::Error);
        result.error = Some(message.into());
        result
    }

    #[must_use]
    pub fn with_output(mut self, output: impl Into<String>) -> Self {
        self.output = output.into();
        self
    }

    #[must_use]
    pub fn with_elapsed(mut self, elapsed: Duration) -> Self {
        self.elapsed_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX);
        self
    }

    #[must_use]
    pub fn with_risk(mut self, risk: RiskAssessment) -> Self {
        self.risk = Some(risk);
        self
    }

    #[must_use]
    pub const fn with_location(mut self, location: SourceLocation) -> Self {
        self.location = Some(location);
        self
    }

    #[must_use]
    pub fn with_correlation_id(mut self, id: impl Into<String>) -> Self {
        self.correlation_id = Some(id.into());
        self
    }

    #[must_use]
    pub const fn needing_confirmation(mut self) -> Self {
        self.requires_confirmation = true;
        self
    }

    pub const fn elapsed(&self) -> Duration {
        Duration::from_millis(self.elapsed_ms)
    }

    pub fn is_success(&self) -> bool {
        self.outcome == ExecutionOutcome::Success
    }

    /// Text folded back into a conversation: output on success, error otherwise.
    pub fn conversation_text(&self) -> String {
        match (self.outcome, &self.error) {
            (ExecutionOutcome::Success, _) | (_, None) => self.output.clone(),
            (outcome, Some(error)) if self.output.is_empty() => format!("[{outcome}] {error}"),
            (outcome, Some(error)) => format!("{}\n[{outcome}] {error}", self.output),
        }
    }
}

/// Keep at most `max_lines` lines, noting how many were dropped.
pub fn truncate_lines(text: &str, max_lines: usize) -> String {
    let lines: Vec<&str> = text.lines().collect();
    if lines.len() <= max_lines {
        return text.to_string();
    }
    format!(
        "{}\n... ({} more lines truncated)",
        lines[..max_lines].join("\n"),
        lines.len() - max_lines
    )
}

impl fmt::Display for ExecutionResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self.outcome {
            ExecutionOutcome::Success => "Execution successful",
            ExecutionOutcome::Blocked if self.requires_confirmation => "Confirmation required",
            ExecutionOutcome::Blocked => "Execution blocked",
            ExecutionOutcome::Timeout => "Execution timed out",
            ExecutionOutcome::Error => "Execution failed",
        };
        writeln!(f, "{label} ({} ms)", self.elapsed_ms)?;

        if let Some(risk) = &self.risk {
            writeln!(f, "Risk level: {}", risk.severity())?;
            for warning in risk.warnings() {
                writeln!(f, "  - {warning}")?;
            }
        }

        if !self.output.is_empty() {
            writeln!(f, "Output:")?;
            writeln!(f, "{}", truncate_lines(&self.output, DISPLAY_MAX_LINES))?;
        }

        if let Some(error) = &self.error {
            match self.location {
                Some(SourceLocation {
                    line,
                    column: Some(column),
                }) => writeln!(f, "Error (line {line}, column {column}): {error}")?,
                Some(SourceLocation { line, column: None }) => {
                    writeln!(f, "Error (line {line}): {error}")?;
                }
                None => writeln!(f, "Error: {error}")?,
            }
        }

        Ok(())
    }
}
