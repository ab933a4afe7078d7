//! Deterministic model for development & testing
//! Keeps the agent functional without a model endpoint

use super::{ChatModel, DeltaStream, ModelDelta, ModelReply};
use crate::error::AgentError;
use crate::models::Message;
use crate::tools::ToolSchema;
use crate::Result;
use async_trait::async_trait;
use futures::stream;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::Mutex;

#[derive(Debug, Clone)]
pub enum ScriptStep {
    Reply(ModelReply),
    Fail(String),
    /// Never answers; used to exercise cancellation
    Hang,
}

/// Replays a fixed script of replies and records every prompt it was given.
#[derive(Clone)]
pub struct ScriptedModel {
    steps: Arc<Mutex<VecDeque<ScriptStep>>>,
    repeat_last: bool,
    last: Arc<Mutex<Option<ScriptStep>>>,
    prompts: Arc<Mutex<Vec<Vec<Message>>>>,
}

impl ScriptedModel {
    pub fn new(steps: Vec<ScriptStep>) -> Self {
        Self {
            steps: Arc::new(Mutex::new(steps.into())),
            repeat_last: false,
            last: Arc::new(Mutex::new(None)),
            prompts: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn replies(replies: Vec<ModelReply>) -> Self {
        Self::new(replies.into_iter().map(ScriptStep::Reply).collect())
    }

    /// Keep answering with the final step once the script runs out.
    pub fn repeating(mut self) -> Self {
        self.repeat_last = true;
        self
    }

    /// Message lists received so far, one entry per model call.
    pub async fn prompts(&self) -> Vec<Vec<Message>> {
        self.prompts.lock().await.clone()
    }

    async fn next_step(&self, messages: &[Message]) -> Result<ModelReply> {
        self.prompts.lock().await.push(messages.to_vec());

        let step = {
            let mut steps = self.steps.lock().await;
            match steps.pop_front() {
                Some(step) => {
                    *self.last.lock().await = Some(step.clone());
                    step
                }
                None if self.repeat_last => self.last.lock().await.clone().ok_or_else(|| {
                    AgentError::ModelInvocation("scripted model has no steps".to_string())
                })?,
                None => {
                    return Err(AgentError::ModelInvocation(
                        "scripted model ran out of replies".to_string(),
                    ))
                }
            }
        };

        match step {
            ScriptStep::Reply(reply) => Ok(reply),
            ScriptStep::Fail(message) => Err(AgentError::ModelInvocation(message)),
            ScriptStep::Hang => futures::future::pending().await,
        }
    }
}

#[async_trait]
impl ChatModel for ScriptedModel {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn invoke(&self, messages: &[Message], _tools: &[ToolSchema]) -> Result<ModelReply> {
        self.next_step(messages).await
    }

    /// Streams the scripted content word by word.
    async fn stream(&self, messages: &[Message], _tools: &[ToolSchema]) -> Result<DeltaStream> {
        let reply = self.next_step(messages).await?;
        let mut items: Vec<Result<ModelDelta>> = split_tokens(&reply.content)
            .into_iter()
            .map(|token| Ok(ModelDelta::Content(token)))
            .collect();
        items.push(Ok(ModelDelta::Done(reply)));
        Ok(Box::pin(stream::iter(items)))
    }
}

/// Split text into chunks that keep their trailing whitespace, so that
/// concatenating the chunks reproduces the input exactly.
fn split_tokens(text: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut in_space = false;

    for ch in text.chars() {
        if ch.is_whitespace() {
            in_space = true;
        } else if in_space {
            tokens.push(std::mem::take(&mut current));
            in_space = false;
        }
        current.push(ch);
    }
    if !current.is_empty() {
        tokens.push(current);
    }
    tokens
}
