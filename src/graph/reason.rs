//! REASON step: one model call over the run's messages

use super::{AgentGraph, EventSink, RunState};
use crate::bridge::RunEvent;
use crate::error::AgentError;
use crate::llm::{ModelDelta, ModelReply};
use crate::models::Message;
use crate::telemetry;
use crate::tools::ToolSchema;
use crate::Result;
use futures::StreamExt;
use sha2::{Digest, Sha256};
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, field, info, info_span, warn, Instrument};

/// Size and identity of a prompt for tracing.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct PromptStats {
    pub chars: usize,
    pub approx_tokens: usize,
    pub fingerprint: String,
}

impl PromptStats {
    pub fn measure(prompt: &[Message]) -> Self {
        let mut hasher = Sha256::new();
        let mut chars = 0;
        for message in prompt {
            chars += message.content.chars().count();
            hasher.update(message.role.to_string().as_bytes());
            hasher.update(b":");
            hasher.update(message.content.as_bytes());
            hasher.update(b"\n");
        }

        let digest = hex::encode(hasher.finalize());
        Self {
            chars,
            approx_tokens: (chars + 3) / 4,
            fingerprint: digest[..16].to_string(),
        }
    }
}

impl AgentGraph {
    pub(super) async fn reason(
        &self,
        state: &RunState,
        context: Option<&str>,
        schemas: &[ToolSchema],
        events: &EventSink,
        cancel: &CancellationToken,
    ) -> Result<ModelReply> {
        let mut prompt = Vec::with_capacity(state.messages.len() + 1);
        if let Some(context) = context {
            prompt.push(Message::context(context));
        }
        prompt.extend(state.messages.iter().cloned());

        let stats = PromptStats::measure(&prompt);
        let span = info_span!(
            "reason",
            iteration = state.iterations + 1,
            message_count = prompt.len(),
            prompt_chars = stats.chars,
            prompt_tokens_estimate = stats.approx_tokens,
            prompt_fingerprint = %stats.fingerprint,
            tool_calls = field::Empty,
            prompt_tokens = field::Empty,
            completion_tokens = field::Empty,
            duration_ms = field::Empty,
        );

        let started = Instant::now();
        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(AgentError::Cancelled),
            reply = self.stream_reply(&prompt, schemas, events).instrument(span.clone()) => reply,
        };
        let elapsed = started.elapsed();
        span.record("duration_ms", elapsed.as_millis() as u64);

        let model = self.model.name();
        match &result {
            Ok(reply) => {
                span.record("tool_calls", reply.tool_calls.len());
                if let Some(usage) = reply.usage {
                    span.record("prompt_tokens", usage.prompt_tokens);
                    span.record("completion_tokens", usage.completion_tokens);
                    telemetry::record_llm_tokens(model, usage.prompt_tokens, usage.completion_tokens);
                }
                telemetry::record_llm_request(model, "success", elapsed);
                span.in_scope(|| {
                    info!(
                        tool_calls = reply.tool_calls.len(),
                        content_chars = reply.content.len(),
                        "Model replied"
                    )
                });
            }
            Err(AgentError::Cancelled) => {
                telemetry::record_llm_request(model, "cancelled", elapsed);
            }
            Err(e) => {
                telemetry::record_llm_request(model, "error", elapsed);
                span.in_scope(|| warn!(error = %e, "Model call failed"));
            }
        }

        result
    }

    async fn stream_reply(
        &self,
        prompt: &[Message],
        schemas: &[ToolSchema],
        events: &EventSink,
    ) -> Result<ModelReply> {
        let mut deltas = self.model.stream(prompt, schemas).await?;

        while let Some(delta) = deltas.next().await {
            match delta? {
                ModelDelta::Content(text) => {
                    if !text.is_empty() {
                        events.emit(RunEvent::Token(text)).await;
                    }
                }
                ModelDelta::Done(reply) => {
                    debug!(tool_calls = reply.tool_calls.len(), "Model stream complete");
                    return Ok(reply);
                }
            }
        }

        Err(AgentError::ModelInvocation(
            "Model stream ended without a final reply".to_string(),
        ))
    }
}
