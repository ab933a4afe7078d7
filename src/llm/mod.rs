//! Model capability
//!
//! The language model is opaque to the agent: it receives the ordered message
//! history plus the advertised tool schemas and answers either with text or
//! with tool calls.

use crate::models::{Message, TokenUsage, ToolCall};
use crate::tools::ToolSchema;
use crate::Result;
use async_trait::async_trait;
use futures::stream::{self, BoxStream};
use serde_json::Value;
use uuid::Uuid;

pub mod fixed;
pub mod openai;
pub mod scripted;

pub use fixed::FixedReplyModel;
pub use openai::OpenAiChatModel;
pub use scripted::{ScriptStep, ScriptedModel};

/// One complete model answer.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModelReply {
    pub content: String,
    pub tool_calls: Vec<ToolCall>,
    pub usage: Option<TokenUsage>,
}

impl ModelReply {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ..Self::default()
        }
    }

    pub fn tool_call(name: &str, arguments: Value) -> Self {
        Self::tool_calls(vec![(name, arguments)])
    }

    pub fn tool_calls(calls: Vec<(&str, Value)>) -> Self {
        Self {
            content: String::new(),
            tool_calls: calls
                .into_iter()
                .map(|(name, arguments)| ToolCall {
                    id: format!("call_{}", Uuid::new_v4().simple()),
                    name: name.to_string(),
                    arguments,
                })
                .collect(),
            usage: None,
        }
    }

    pub fn with_usage(mut self, prompt_tokens: u64, completion_tokens: u64) -> Self {
        self.usage = Some(TokenUsage {
            prompt_tokens,
            completion_tokens,
        });
        self
    }
}

/// Streaming output: content deltas, then exactly one final `Done`.
#[derive(Debug, Clone, PartialEq)]
pub enum ModelDelta {
    Content(String),
    Done(ModelReply),
}

pub type DeltaStream = BoxStream<'static, Result<ModelDelta>>;

#[async_trait]
pub trait ChatModel: Send + Sync {
    /// Model/deployment name used in traces and metrics
    fn name(&self) -> &str;

    async fn invoke(&self, messages: &[Message], tools: &[ToolSchema]) -> Result<ModelReply>;

    /// Streaming variant. The default wraps `invoke` in a single content delta.
    async fn stream(&self, messages: &[Message], tools: &[ToolSchema]) -> Result<DeltaStream> {
        let reply = self.invoke(messages, tools).await?;
        let mut items = Vec::with_capacity(2);
        if !reply.content.is_empty() {
            items.push(Ok(ModelDelta::Content(reply.content.clone())));
        }
        items.push(Ok(ModelDelta::Done(reply)));
        Ok(Box::pin(stream::iter(items)))
    }
}
