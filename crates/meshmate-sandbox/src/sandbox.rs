//! Validated script execution.
//!
//! A run is screened by the security validator first. Scripts that pass run
//! on the blocking thread pool in a fresh engine, bounded by an operation
//! budget, a wall-clock deadline and a cancellation token that shutdown
//! trips for every run at once.

use std::sync::Arc;
use std::time::{Duration, Instant};

use meshmate_core::security::script::RULE_PARSE_ERROR;
use meshmate_core::{
    CoreEvent, CoreEventEmitter, ExecutionResult, Finding, NoopEmitter, RiskAssessment,
    SecurityValidator, Settings, Severity, SourceLocation,
};
use rhai::{EvalAltResult, Position};
use tokio_util::sync::CancellationToken;

use crate::engine::{EngineLimits, OutputBuffer, TERMINATED_CANCELLED, build_engine};
use crate::host::HostSurface;
use crate::resolver::HostModuleResolver;

/// Extra wall-clock allowance past `max_seconds` before the caller stops
/// waiting on a run that has not noticed its deadline.
const DEADLINE_GRACE: Duration = Duration::from_secs(1);

/// Resource limits for one run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SandboxLimits {
    pub max_seconds: f64,
    pub max_operations: u64,
}

impl Default for SandboxLimits {
    fn default() -> Self {
        Self::from_settings(&Settings::with_defaults())
    }
}

impl SandboxLimits {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            max_seconds: settings.effective_sandbox_max_seconds(),
            max_operations: settings.effective_sandbox_max_operations(),
        }
    }

    fn wall_clock(&self) -> Duration {
        Duration::try_from_secs_f64(self.max_seconds.max(0.0)).unwrap_or(Duration::MAX)
    }
}

/// Runs scripts against a host surface.
pub struct CodeSandbox {
    validator: Arc<SecurityValidator>,
    host: Arc<dyn HostSurface>,
    emitter: Arc<dyn CoreEventEmitter>,
    block_threshold: Severity,
    shutdown: CancellationToken,
}

impl std::fmt::Debug for CodeSandbox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CodeSandbox")
            .field("block_threshold", &self.block_threshold)
            .field("shut_down", &self.shutdown.is_cancelled())
            .finish_non_exhaustive()
    }
}

impl CodeSandbox {
    pub fn new(validator: Arc<SecurityValidator>, host: Arc<dyn HostSurface>) -> Self {
        Self {
            validator,
            host,
            emitter: Arc::new(NoopEmitter::new()),
            block_threshold: Severity::High,
            shutdown: CancellationToken::new(),
        }
    }

    #[must_use]
    pub fn with_emitter(mut self, emitter: Arc<dyn CoreEventEmitter>) -> Self {
        self.emitter = emitter;
        self
    }

    /// Scripts at or above `threshold` are refused.
    #[must_use]
    pub const fn with_block_threshold(mut self, threshold: Severity) -> Self {
        self.block_threshold = threshold;
        self
    }

    pub const fn block_threshold(&self) -> Severity {
        self.block_threshold
    }

    /// Static assessment only. Nothing runs.
    pub fn check(&self, script: &str) -> RiskAssessment {
        self.validator.assess_script(script)
    }

    /// Host modules a script may import under the current policy.
    pub fn importable_modules(&self) -> Vec<String> {
        self.resolver().importable()
    }

    fn resolver(&self) -> HostModuleResolver {
        HostModuleResolver::new(self.validator.policy().clone(), self.host.clone())
    }

    /// Validate and run `script`.
    pub async fn run(&self, script: &str, limits: SandboxLimits) -> ExecutionResult {
        self.run_with_threshold(script, limits, self.block_threshold).await
    }

    /// Like [`run`](Self::run) with a per-call block threshold, for callers
    /// whose settings can change between runs.
    pub async fn run_with_threshold(
        &self,
        script: &str,
        limits: SandboxLimits,
        block_threshold: Severity,
    ) -> ExecutionResult {
        let started = Instant::now();
        let risk = self.check(script);

        let result = if risk.exceeds(block_threshold) {
            tracing::warn!(
                severity = %risk.severity(),
                rules = ?risk.triggered_rules(),
                "Script blocked"
            );
            let reason = format!("risk level {} is at or above the block threshold", risk.severity());
            ExecutionResult::blocked(risk.clone(), reason)
        } else if self.shutdown.is_cancelled() {
            ExecutionResult::error("sandbox is shut down").with_risk(risk.clone())
        } else {
            self.execute(script, limits, &risk).await.with_risk(risk.clone())
        };

        let result = result.with_elapsed(started.elapsed());
        tracing::info!(
            outcome = %result.outcome,
            severity = %risk.severity(),
            elapsed_ms = result.elapsed_ms,
            "Script finished"
        );
        self.emitter.emit(CoreEvent::ScriptExecuted {
            outcome: result.outcome,
            severity: risk.severity(),
        });
        result
    }

    async fn execute(
        &self,
        script: &str,
        limits: SandboxLimits,
        risk: &RiskAssessment,
    ) -> ExecutionResult {
        let cancel = self.shutdown.child_token();
        let wall_clock = limits.wall_clock();
        let engine_limits = EngineLimits {
            max_operations: limits.max_operations,
            deadline: Instant::now()
                .checked_add(wall_clock)
                .unwrap_or_else(|| Instant::now() + Duration::from_secs(u64::from(u32::MAX))),
            cancel: cancel.clone(),
        };
        let resolver = self.resolver();
        let source = script.to_string();
        let output = OutputBuffer::new();
        let sink = output.clone();

        let task = tokio::task::spawn_blocking(move || {
            let engine = build_engine(engine_limits, resolver, &sink);
            run_blocking(&engine, &source)
        });

        let outcome = tokio::select! {
            joined = task => joined,
            () = tokio::time::sleep(wall_clock.saturating_add(DEADLINE_GRACE)) => {
                cancel.cancel();
                return ExecutionResult::timeout(format!(
                    "script exceeded {:.1}s",
                    limits.max_seconds
                ))
                .with_output(output.contents());
            }
        };

        let captured = output.contents();
        match outcome {
            Ok(RunOutcome::Finished) => ExecutionResult::success(captured),
            Ok(RunOutcome::Compile { message, location }) => {
                let mut assessment = risk.clone();
                let mut finding = Finding::new(
                    RULE_PARSE_ERROR,
                    Severity::Critical,
                    format!("script failed to compile: {message}"),
                );
                if let Some(location) = location {
                    finding = finding.at_line(location.line);
                }
                assessment.record(finding);
                let mut result = ExecutionResult::blocked(assessment, message);
                if let Some(location) = location {
                    result = result.with_location(location);
                }
                result
            }
            Ok(RunOutcome::Stopped { cancelled: true }) => {
                ExecutionResult::timeout("script cancelled").with_output(captured)
            }
            Ok(RunOutcome::Stopped { cancelled: false }) => ExecutionResult::timeout(format!(
                "script exceeded its limits ({:.1}s or {} operations)",
                limits.max_seconds, limits.max_operations
            ))
            .with_output(captured),
            Ok(RunOutcome::Failed { message, location }) => {
                let result = ExecutionResult::error(message).with_output(captured);
                match location {
                    Some(location) => result.with_location(location),
                    None => result,
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "Script worker panicked");
                ExecutionResult::error(format!("script worker failed: {e}")).with_output(captured)
            }
        }
    }

    /// Cancel every in-flight run and refuse new ones.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    pub fn is_shut_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }
}

/// How a run on the blocking pool ended.
#[derive(Debug)]
enum RunOutcome {
    Finished,
    Compile {
        message: String,
        location: Option<SourceLocation>,
    },
    Stopped {
        cancelled: bool,
    },
    Failed {
        message: String,
        location: Option<SourceLocation>,
    },
}

fn location(pos: Position) -> Option<SourceLocation> {
    pos.line().map(|line| SourceLocation {
        line,
        column: pos.position(),
    })
}

fn run_blocking(engine: &rhai::Engine, source: &str) -> RunOutcome {
    let ast = match engine.compile(source) {
        Ok(ast) => ast,
        Err(e) => {
            return RunOutcome::Compile {
                message: e.err_type().to_string(),
                location: location(e.position()),
            };
        }
    };

    let Err(error) = engine.run_ast(&ast) else {
        return RunOutcome::Finished;
    };

    match *error {
        EvalAltResult::ErrorTerminated(ref token, _) => RunOutcome::Stopped {
            cancelled: token
                .clone()
                .into_string()
                .is_ok_and(|t| t == TERMINATED_CANCELLED),
        },
        EvalAltResult::ErrorTooManyOperations(_) => RunOutcome::Stopped { cancelled: false },
        ref other => {
            let pos = other.position();
            let mut inner = other;
            // Errors raised inside a function call carry the real cause inside.
            while let EvalAltResult::ErrorInFunctionCall(_, _, cause, _)
            | EvalAltResult::ErrorInModule(_, cause, _) = inner
            {
                inner = &**cause;
            }
            let message = match inner {
                EvalAltResult::ErrorRuntime(value, _) => value.to_string(),
                other => other.to_string(),
            };
            RunOutcome::Failed {
                message,
                location: location(pos),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::MemoryScene;
    use meshmate_core::ExecutionOutcome;
    use meshmate_core::security::script::RULE_DYNAMIC_IMPORT;

    fn sandbox() -> (CodeSandbox, MemoryScene) {
        let scene = MemoryScene::new();
        let sandbox = CodeSandbox::new(
            Arc::new(SecurityValidator::default()),
            Arc::new(scene.clone()),
        );
        (sandbox, scene)
    }

    fn limits(max_seconds: f64) -> SandboxLimits {
        SandboxLimits {
            max_seconds,
            max_operations: 10_000_000,
        }
    }

    #[tokio::test]
    async fn test_scene_script_runs() {
        let (sandbox, scene) = sandbox();
        let script = r#"
            import "scene" as scene;
            scene::add_cube("Box", 2.0);
            scene::add_sphere("Ball", 1);
            for name in scene::list_objects() { print(name); }
        "#;

        let result = sandbox.run(script, limits(5.0)).await;
        assert_eq!(result.outcome, ExecutionOutcome::Success, "{result}");
        assert_eq!(result.output, "Box\nBall");
        assert_eq!(scene.objects().len(), 2);
        assert_eq!(result.risk.map(|r| r.severity()), Some(Severity::Low));
    }

    #[tokio::test]
    async fn test_infinite_loop_times_out() {
        let (sandbox, _) = sandbox();
        let started = Instant::now();
        let result = sandbox.run("loop { }", limits(0.3)).await;

        assert_eq!(result.outcome, ExecutionOutcome::Timeout);
        assert!(started.elapsed() < Duration::from_millis(300) + DEADLINE_GRACE);
    }

    #[tokio::test]
    async fn test_operation_budget_times_out() {
        let (sandbox, _) = sandbox();
        let result = sandbox
            .run(
                "let x = 0; while true { x += 1; }",
                SandboxLimits {
                    max_seconds: 30.0,
                    max_operations: 1_000,
                },
            )
            .await;
        assert_eq!(result.outcome, ExecutionOutcome::Timeout);
    }

    #[tokio::test]
    async fn test_python_os_system_is_blocked() {
        let (sandbox, _) = sandbox();
        let result = sandbox
            .run("import os; os.system('ls')", limits(5.0))
            .await;

        assert_eq!(result.outcome, ExecutionOutcome::Blocked);
        let risk = result.risk.unwrap();
        assert!(risk.severity() >= Severity::High);
    }

    #[tokio::test]
    async fn test_unlisted_import_never_resolves() {
        let (sandbox, _) = sandbox();
        let sandbox = sandbox.with_block_threshold(Severity::Critical);

        let result = sandbox
            .run("import \"os\" as os;\nprint(\"after\");", limits(5.0))
            .await;
        assert_eq!(result.outcome, ExecutionOutcome::Error);
        assert!(result.error.unwrap().contains("not permitted"));
        assert!(result.output.is_empty());
    }

    #[tokio::test]
    async fn test_computed_import_is_blocked() {
        let (sandbox, _) = sandbox();
        let script = "import (\"os\") as x;\nprint(\"after\");";

        let risk = sandbox.check(script);
        assert!(risk.severity() >= Severity::High);
        assert!(risk.has_rule(RULE_DYNAMIC_IMPORT));

        let result = sandbox.run(script, limits(5.0)).await;
        assert_eq!(result.outcome, ExecutionOutcome::Blocked);
        assert!(result.output.is_empty());
    }

    #[tokio::test]
    async fn test_runtime_error_has_location() {
        let (sandbox, _) = sandbox();
        let result = sandbox
            .run("print(\"before\");\nthrow \"boom\";", limits(5.0))
            .await;

        assert_eq!(result.outcome, ExecutionOutcome::Error);
        assert_eq!(result.error.as_deref(), Some("boom"));
        assert_eq!(result.location.map(|l| l.line), Some(2));
        assert_eq!(result.output, "before");
    }

    #[tokio::test]
    async fn test_compile_failure_is_blocked() {
        let (sandbox, _) = sandbox();
        let result = sandbox.run("let = 5;", limits(5.0)).await;

        assert_eq!(result.outcome, ExecutionOutcome::Blocked);
        let risk = result.risk.unwrap();
        assert_eq!(risk.severity(), Severity::Critical);
        assert!(risk.has_rule(RULE_PARSE_ERROR));
    }

    #[tokio::test]
    async fn test_stubbed_builtin_raises() {
        let (sandbox, _) = sandbox();
        let sandbox = sandbox.with_block_threshold(Severity::Critical);
        let result = sandbox.run("system(\"ls\");", limits(5.0)).await;

        assert_eq!(result.outcome, ExecutionOutcome::Error);
        assert!(result.error.unwrap().contains("not available"));
    }

    #[tokio::test]
    async fn test_shutdown_cancels_running_script() {
        let (sandbox, _) = sandbox();
        let sandbox = Arc::new(sandbox);

        let running = {
            let sandbox = sandbox.clone();
            tokio::spawn(async move { sandbox.run("loop { }", limits(30.0)).await })
        };
        tokio::time::sleep(Duration::from_millis(100)).await;
        sandbox.shutdown();

        let result = tokio::time::timeout(Duration::from_secs(5), running)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(result.outcome, ExecutionOutcome::Timeout);
        assert_eq!(result.error.as_deref(), Some("script cancelled"));

        let after = sandbox.run("print(1);", limits(5.0)).await;
        assert_eq!(after.outcome, ExecutionOutcome::Error);
    }

    #[test]
    fn test_limits_from_settings() {
        let limits = SandboxLimits::default();
        assert!((limits.max_seconds - 30.0).abs() < f64::EPSILON);
        assert_eq!(limits.max_operations, 10_000_000);
        assert_eq!(
            SandboxLimits {
                max_seconds: -1.0,
                max_operations: 1
            }
            .wall_clock(),
            Duration::ZERO
        );
    }
}
