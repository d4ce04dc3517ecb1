//! Completion provider port.
//!
//! The language-model client is external; the core only needs to submit a
//! conversation with the current tool schemas and get back either text, tool
//! calls or a script to run.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::{ChatMessage, ToolCallRequest, ToolSchema};
use crate::error::CoreError;

/// Conversation plus advertised tools.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CompletionRequest {
    pub messages: Vec<ChatMessage>,
    pub tools: Vec<ToolSchema>,
}

/// What the provider wants to happen next.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CompletionReply {
    /// Plain reply; the turn is over.
    Text { content: String },

    /// One or more tool calls, optionally with accompanying text.
    ToolCalls {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        content: Option<String>,
        calls: Vec<ToolCallRequest>,
    },

    /// A script to run in the sandbox.
    Script {
        source: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        content: Option<String>,
    },
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionReply, CoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_provider_returns_reply() {
        let mut provider = MockCompletionProvider::new();
        provider
            .expect_complete()
            .withf(|request| request.messages.len() == 1 && request.tools.is_empty())
            .times(1)
            .returning(|_| {
                Ok(CompletionReply::Text {
                    content: "hello".into(),
                })
            });

        let reply = provider
            .complete(CompletionRequest {
                messages: vec![ChatMessage::user("hi")],
                tools: vec![],
            })
            .await;
        tokio_test::assert_ok!(&reply);
        assert_eq!(
            reply.unwrap(),
            CompletionReply::Text {
                content: "hello".into()
            }
        );
    }

    #[test]
    fn test_reply_serialization_tag() {
        let reply = CompletionReply::Script {
            source: "print(1);".into(),
            content: None,
        };
        let json = serde_json::to_value(&reply).unwrap();
        assert_eq!(json["kind"], "script");
    }
}
