//! Security validation for tool calls and scripts.
//!
//! [`SecurityValidator`] is a read-only classifier. It never executes
//! anything and never decides to block: it returns a [`RiskAssessment`] and
//! callers compare it against their configured threshold.

pub mod lexer;
pub mod rules;
pub mod schema;
pub mod script;
pub mod tool_call;

use serde_json::Value;

use crate::domain::{RiskAssessment, ToolCallRequest, ToolDescriptor};
use crate::error::CoreError;

pub use lexer::{ScriptOutline, ScriptParseError, outline};
pub use rules::{HostOperationRule, ScriptPolicy};
pub use tool_call::{SHELL_METACHARACTERS, scan_arguments, validate_tool_name};

/// Two-mode validation pipeline.
pub struct SecurityValidator {
    policy: ScriptPolicy,
    host_rules: Vec<script::CompiledHostRule>,
}

impl Default for SecurityValidator {
    fn default() -> Self {
        Self::new(ScriptPolicy::default())
    }
}

impl std::fmt::Debug for SecurityValidator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecurityValidator")
            .field("allowed_modules", &self.policy.allowed_modules.len())
            .field("host_rules", &self.host_rules.len())
            .finish()
    }
}

impl SecurityValidator {
    pub fn new(policy: ScriptPolicy) -> Self {
        let host_rules = script::compile_host_rules(&policy.host_rules);
        Self { policy, host_rules }
    }

    pub const fn policy(&self) -> &ScriptPolicy {
        &self.policy
    }

    /// Whether the import enforcement layer may resolve `module`.
    pub fn is_module_allowed(&self, module: &str) -> bool {
        self.policy.is_allowed(module)
    }

    /// Tool-call mode.
    ///
    /// Fails with `InvalidToolName` or `SchemaViolation`; otherwise returns
    /// the argument scan.
    pub fn assess_tool_call(
        &self,
        tool: &ToolDescriptor,
        request: &ToolCallRequest,
    ) -> Result<RiskAssessment, CoreError> {
        validate_tool_name(&request.tool)?;

        let arguments = request.arguments_value();
        if let Some(schema) = &tool.input_schema {
            schema::check(schema, &arguments)
                .map_err(|message| CoreError::schema(tool.qualified_name(), message))?;
        }

        Ok(scan_arguments(&arguments))
    }

    /// Scan arbitrary argument JSON without schema or name checks.
    pub fn assess_arguments(&self, arguments: &Value) -> RiskAssessment {
        scan_arguments(arguments)
    }

    /// Script mode. Parse failures are reported as a critical finding.
    pub fn assess_script(&self, source: &str) -> RiskAssessment {
        let assessment = script::assess(source, &self.policy, &self.host_rules);
        tracing::debug!(
            severity = %assessment.severity(),
            findings = assessment.findings().len(),
            "Script assessed"
        );
        assessment
    }
}
