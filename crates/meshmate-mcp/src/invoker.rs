//! Validated tool invocation.

use std::sync::Arc;
use std::time::Instant;

use meshmate_core::security::validate_tool_name;
use meshmate_core::{
    CoreError, CoreEvent, CoreEventEmitter, ExecutionResult, SecurityValidator, Settings,
    Severity, ToolCallRequest,
};

use crate::manager::ConnectionManager;

/// Thresholds applied to each call's risk assessment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvokePolicy {
    /// At or above this severity the call is refused outright.
    pub block_threshold: Severity,
    /// At or above this severity (and below the block threshold) the call
    /// needs an explicit confirmation. `None` switches confirmation off.
    pub confirm_threshold: Option<Severity>,
}

impl Default for InvokePolicy {
    fn default() -> Self {
        Self::from_settings(&Settings::with_defaults())
    }
}

impl InvokePolicy {
    pub const fn from_settings(settings: &Settings) -> Self {
        Self {
            block_threshold: settings.effective_tool_block_threshold(),
            confirm_threshold: settings.effective_tool_confirm_threshold(),
        }
    }
}

/// Runs tool calls through the security validator before any server is
/// contacted.
pub struct ToolInvoker {
    manager: Arc<ConnectionManager>,
    validator: Arc<SecurityValidator>,
    emitter: Arc<dyn CoreEventEmitter>,
}

impl ToolInvoker {
    pub fn new(
        manager: Arc<ConnectionManager>,
        validator: Arc<SecurityValidator>,
        emitter: Arc<dyn CoreEventEmitter>,
    ) -> Self {
        Self {
            manager,
            validator,
            emitter,
        }
    }

    /// Invoke a tool.
    ///
    /// Lookup and validation failures (`InvalidToolName`, `UnknownTool`,
    /// `SchemaViolation`, `NotConnected`) are errors. Everything that happens
    /// once a call is admitted, including policy refusals, is reported in the
    /// [`ExecutionResult`].
    pub async fn invoke(
        &self,
        request: &ToolCallRequest,
        policy: InvokePolicy,
    ) -> Result<ExecutionResult, CoreError> {
        let started = Instant::now();

        validate_tool_name(&request.tool)?;
        let tool = self.manager.cache().find_tool(&request.tool).await?;
        let risk = self.validator.assess_tool_call(&tool, request)?;
        let severity = risk.severity();
        let qualified = tool.qualified_name();

        let result = if risk.exceeds(policy.block_threshold) {
            tracing::warn!(
                tool = %qualified,
                severity = %severity,
                rules = ?risk.triggered_rules(),
                "Tool call blocked"
            );
            ExecutionResult::blocked(risk, format!("risk level {severity} is at or above the block threshold"))
        } else if policy
            .confirm_threshold
            .is_some_and(|threshold| risk.exceeds(threshold))
            && !request.confirmed
        {
            tracing::info!(tool = %qualified, severity = %severity, "Tool call needs confirmation");
            ExecutionResult::blocked(risk, format!("risk level {severity} requires confirmation"))
                .needing_confirmation()
        } else {
            let outcome = match self
                .manager
                .call_tool(&tool.server, &tool.name, request.arguments_value())
                .await
            {
                Ok(response) if response.is_error => ExecutionResult::error(response.text()),
                Ok(response) => ExecutionResult::success(response.text()),
                Err(error @ CoreError::Timeout { .. }) => ExecutionResult::timeout(error.to_string()),
                Err(error @ CoreError::NotConnected(_)) => return Err(error),
                Err(error) => ExecutionResult::error(error.to_string()),
            };
            outcome.with_risk(risk)
        };

        let result = result
            .with_elapsed(started.elapsed())
            .with_correlation_id(&request.correlation_id);

        tracing::info!(
            tool = %qualified,
            outcome = %result.outcome,
            elapsed_ms = result.elapsed_ms,
            correlation_id = %request.correlation_id,
            "Tool invoked"
        );
        self.emitter.emit(CoreEvent::ToolInvoked {
            tool: qualified,
            correlation_id: request.correlation_id.clone(),
            outcome: result.outcome,
        });

        Ok(result)
    }
}
