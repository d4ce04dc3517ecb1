//! Chat turn loop.
//!
//! One call to [`Assistant::respond`] is one user turn: the conversation and
//! the current tool schemas go to the completion provider, requested tools
//! are invoked and their results appended, and the provider is asked again
//! until it replies with text, asks for a script, or the iteration limit is
//! reached.

use std::sync::Arc;

use meshmate_core::{
    ChatMessage, CompletionProvider, CompletionReply, CompletionRequest, CoreError,
    ExecutionResult, RiskAssessment, Settings, SettingsService, ToolCallRequest,
};
use meshmate_mcp::{InvokePolicy, McpService};
use meshmate_sandbox::{CodeSandbox, SandboxLimits};
use serde::Serialize;

/// Why a turn ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// The provider answered with text.
    Replied,
    /// The provider asked for a script; it ran (or was refused) and the turn ended.
    ScriptRan,
    /// At least one tool call needs the user's confirmation before it can run.
    NeedsConfirmation,
    /// The provider kept requesting tools past `max_tool_iterations`.
    IterationLimit,
}

/// Result of one user turn.
#[derive(Debug, Clone, Serialize)]
pub struct Turn {
    pub stop: StopReason,
    /// Last text the provider produced, if any.
    pub reply: Option<String>,
    /// Every tool call and script run made during the turn, in order.
    pub executions: Vec<ExecutionResult>,
    /// Calls refused pending confirmation. Resubmit them with `confirmed`.
    pub pending_confirmation: Vec<ToolCallRequest>,
    /// Completion requests made.
    pub iterations: u32,
}

impl Turn {
    fn new() -> Self {
        Self {
            stop: StopReason::IterationLimit,
            reply: None,
            executions: Vec::new(),
            pending_confirmation: Vec::new(),
            iterations: 0,
        }
    }
}

pub struct Assistant {
    provider: Arc<dyn CompletionProvider>,
    mcp: Arc<McpService>,
    sandbox: Arc<CodeSandbox>,
    settings: Arc<SettingsService>,
}

impl Assistant {
    pub fn new(
        provider: Arc<dyn CompletionProvider>,
        mcp: Arc<McpService>,
        sandbox: Arc<CodeSandbox>,
        settings: Arc<SettingsService>,
    ) -> Self {
        Self {
            provider,
            mcp,
            sandbox,
            settings,
        }
    }

    /// Run one turn over `history`, appending every message produced.
    ///
    /// Provider failures end the turn with an error; tool and script
    /// failures are folded into the conversation as data.
    pub async fn respond(&self, history: &mut Vec<ChatMessage>) -> Result<Turn, CoreError> {
        let settings = self.settings.get();
        let max_iterations = settings.effective_max_tool_iterations();
        let policy = InvokePolicy::from_settings(&settings);
        let tools = if settings.effective_mcp_enabled() {
            self.mcp.tool_schemas().await
        } else {
            Vec::new()
        };

        let mut turn = Turn::new();
        while turn.iterations < max_iterations {
            turn.iterations += 1;
            let reply = self
                .provider
                .complete(CompletionRequest {
                    messages: history.clone(),
                    tools: tools.clone(),
                })
                .await?;

            match reply {
                CompletionReply::Text { content } => {
                    history.push(ChatMessage::assistant(content.clone()));
                    turn.reply = Some(content);
                    turn.stop = StopReason::Replied;
                    return Ok(turn);
                }
                CompletionReply::ToolCalls { content, calls } => {
                    if let Some(content) = content.filter(|c| !c.trim().is_empty()) {
                        history.push(ChatMessage::assistant(content.clone()));
                        turn.reply = Some(content);
                    }
                    for call in calls {
                        let result = self.invoke(&call, policy).await;
                        history.push(ChatMessage::tool(
                            call.correlation_id.clone(),
                            result.conversation_text(),
                        ));
                        if result.requires_confirmation {
                            turn.pending_confirmation.push(call);
                        }
                        turn.executions.push(result);
                    }
                    if !turn.pending_confirmation.is_empty() {
                        turn.stop = StopReason::NeedsConfirmation;
                        return Ok(turn);
                    }
                }
                CompletionReply::Script { source, content } => {
                    if let Some(content) = content.filter(|c| !c.trim().is_empty()) {
                        history.push(ChatMessage::assistant(content.clone()));
                        turn.reply = Some(content);
                    }
                    let result = self.run_script(&source).await;
                    history.push(ChatMessage::tool("script", result.conversation_text()));
                    turn.executions.push(result);
                    turn.stop = StopReason::ScriptRan;
                    return Ok(turn);
                }
            }
        }

        tracing::warn!(max_iterations, "Tool iteration limit reached");
        Ok(turn)
    }

    async fn invoke(&self, call: &ToolCallRequest, policy: InvokePolicy) -> ExecutionResult {
        match self.mcp.invoke(call, policy).await {
            Ok(result) => result,
            Err(e) => {
                tracing::warn!(tool = %call.tool, error = %e, "Tool call failed");
                ExecutionResult::error(e.to_string()).with_correlation_id(call.correlation_id.clone())
            }
        }
    }

    /// Run `source` under the current settings.
    pub async fn run_script(&self, source: &str) -> ExecutionResult {
        run_script(&self.sandbox, &self.settings.get(), source).await
    }
}

/// Run `source` in `sandbox` with the limits and threshold from `settings`.
pub(crate) async fn run_script(
    sandbox: &CodeSandbox,
    settings: &Settings,
    source: &str,
) -> ExecutionResult {
    if !settings.effective_code_execution() {
        return ExecutionResult::blocked(
            RiskAssessment::new(),
            "code execution is disabled in settings",
        );
    }
    sandbox
        .run_with_threshold(
            source,
            SandboxLimits::from_settings(settings),
            settings.effective_script_block_threshold(),
        )
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use meshmate_core::{
        ChatRole, ExecutionOutcome, MemoryPreferenceStore, NoopEmitter, SecurityValidator,
        ServerConfig, SettingsUpdate,
    };
    use meshmate_mcp::ServerRegistry;
    use meshmate_mcp::testing::StubServer;
    use meshmate_sandbox::MemoryScene;
    use mockall::Sequence;
    use serde_json::json;

    mockall::mock! {
        pub Provider {}

        #[async_trait]
        impl CompletionProvider for Provider {
            async fn complete(&self, request: CompletionRequest) -> Result<CompletionReply, CoreError>;
        }
    }

    struct Fixture {
        assistant: Assistant,
        settings: Arc<SettingsService>,
        scene: MemoryScene,
    }

    async fn fixture(provider: MockProvider) -> Fixture {
        let store = Arc::new(MemoryPreferenceStore::new());
        let settings = Arc::new(SettingsService::load(store.clone()).unwrap());
        let registry = Arc::new(ServerRegistry::load(store).unwrap());
        registry
            .upsert(ServerConfig::new("echo", "echo-server"))
            .unwrap();

        let validator = Arc::new(SecurityValidator::default());
        let mcp = Arc::new(McpService::new(
            registry,
            Arc::new(StubServer::new().with_echo_tool()),
            validator.clone(),
            Arc::new(NoopEmitter::new()),
        ));
        mcp.connect("echo").await.unwrap();

        let scene = MemoryScene::new();
        let sandbox = Arc::new(CodeSandbox::new(validator, Arc::new(scene.clone())));
        Fixture {
            assistant: Assistant::new(Arc::new(provider), mcp, sandbox, settings.clone()),
            settings,
            scene,
        }
    }

    fn echo_call(id: &str, message: &str) -> ToolCallRequest {
        ToolCallRequest::new("echo.echo")
            .with_argument("message", json!(message))
            .with_correlation_id(id)
    }

    #[tokio::test]
    async fn test_text_reply_ends_turn() {
        let mut provider = MockProvider::new();
        provider
            .expect_complete()
            .withf(|request| request.tools.iter().any(|t| t.name == "echo.echo"))
            .times(1)
            .returning(|_| {
                Ok(CompletionReply::Text {
                    content: "Hi there".into(),
                })
            });
        let fixture = fixture(provider).await;

        let mut history = vec![ChatMessage::user("hello")];
        let turn = fixture.assistant.respond(&mut history).await.unwrap();

        assert_eq!(turn.stop, StopReason::Replied);
        assert_eq!(turn.reply.as_deref(), Some("Hi there"));
        assert_eq!(turn.iterations, 1);
        assert_eq!(history.len(), 2);
        assert_eq!(history[1].role, ChatRole::Assistant);
    }

    #[tokio::test]
    async fn test_tool_results_are_folded_back() {
        let mut provider = MockProvider::new();
        let mut seq = Sequence::new();
        provider
            .expect_complete()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| {
                Ok(CompletionReply::ToolCalls {
                    content: None,
                    calls: vec![echo_call("call-1", "ping")],
                })
            });
        provider
            .expect_complete()
            .withf(|request| {
                request.messages.last().is_some_and(|m| {
                    m.role == ChatRole::Tool
                        && m.content == "ping"
                        && m.tool_call_id.as_deref() == Some("call-1")
                })
            })
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| {
                Ok(CompletionReply::Text {
                    content: "done".into(),
                })
            });
        let fixture = fixture(provider).await;

        let mut history = vec![ChatMessage::user("echo ping")];
        let turn = fixture.assistant.respond(&mut history).await.unwrap();

        assert_eq!(turn.stop, StopReason::Replied);
        assert_eq!(turn.iterations, 2);
        assert_eq!(turn.executions.len(), 1);
        assert!(turn.executions[0].is_success());
    }

    #[tokio::test]
    async fn test_iteration_limit() {
        let mut provider = MockProvider::new();
        provider.expect_complete().times(2).returning(|_| {
            Ok(CompletionReply::ToolCalls {
                content: None,
                calls: vec![echo_call("again", "loop")],
            })
        });
        let fixture = fixture(provider).await;
        fixture
            .settings
            .update(&SettingsUpdate {
                max_tool_iterations: Some(Some(2)),
                ..Default::default()
            })
            .unwrap();

        let mut history = vec![ChatMessage::user("go")];
        let turn = fixture.assistant.respond(&mut history).await.unwrap();

        assert_eq!(turn.stop, StopReason::IterationLimit);
        assert_eq!(turn.iterations, 2);
        assert_eq!(turn.executions.len(), 2);
    }

    #[tokio::test]
    async fn test_risky_call_waits_for_confirmation() {
        let mut provider = MockProvider::new();
        provider.expect_complete().times(1).returning(|_| {
            Ok(CompletionReply::ToolCalls {
                content: Some("Running it".into()),
                calls: vec![echo_call("risky", "hello; ls")],
            })
        });
        let fixture = fixture(provider).await;

        let mut history = vec![ChatMessage::user("go")];
        let turn = fixture.assistant.respond(&mut history).await.unwrap();

        assert_eq!(turn.stop, StopReason::NeedsConfirmation);
        assert_eq!(turn.pending_confirmation.len(), 1);
        assert_eq!(turn.pending_confirmation[0].correlation_id, "risky");
        assert_eq!(turn.executions[0].outcome, ExecutionOutcome::Blocked);
    }

    #[tokio::test]
    async fn test_script_reply_runs_in_sandbox() {
        let mut provider = MockProvider::new();
        provider.expect_complete().times(1).returning(|_| {
            Ok(CompletionReply::Script {
                source: "import \"scene\" as scene;\nscene::add_cube(\"Box\", 1.0);\nprint(scene::count());".into(),
                content: Some("Adding a cube".into()),
            })
        });
        let fixture = fixture(provider).await;

        let mut history = vec![ChatMessage::user("add a cube")];
        let turn = fixture.assistant.respond(&mut history).await.unwrap();

        assert_eq!(turn.stop, StopReason::ScriptRan);
        assert_eq!(turn.executions[0].outcome, ExecutionOutcome::Success);
        assert_eq!(turn.executions[0].output, "1");
        assert_eq!(fixture.scene.objects().len(), 1);
        assert_eq!(history.last().map(|m| m.content.as_str()), Some("1"));
    }

    #[tokio::test]
    async fn test_script_refused_when_code_execution_disabled() {
        let mut provider = MockProvider::new();
        provider.expect_complete().times(1).returning(|_| {
            Ok(CompletionReply::Script {
                source: "print(1);".into(),
                content: None,
            })
        });
        let fixture = fixture(provider).await;
        fixture
            .settings
            .update(&SettingsUpdate {
                code_execution_enabled: Some(Some(false)),
                ..Default::default()
            })
            .unwrap();

        let mut history = vec![ChatMessage::user("go")];
        let turn = fixture.assistant.respond(&mut history).await.unwrap();

        assert_eq!(turn.executions[0].outcome, ExecutionOutcome::Blocked);
        assert!(fixture.scene.objects().is_empty());
    }

    #[tokio::test]
    async fn test_provider_error_propagates() {
        let mut provider = MockProvider::new();
        provider
            .expect_complete()
            .times(1)
            .returning(|_| Err(CoreError::ExecutionError("provider offline".into())));
        let fixture = fixture(provider).await;

        let mut history = vec![ChatMessage::user("go")];
        let result = fixture.assistant.respond(&mut history).await;
        assert!(matches!(result, Err(CoreError::ExecutionError(_))));
        assert_eq!(history.len(), 1);
    }
}
