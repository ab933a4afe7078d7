//! ACT step: run every tool call of the latest model message, in order

use super::{AgentGraph, EventSink, RunState};
use crate::bridge::RunEvent;
use crate::error::AgentError;
use crate::models::{Message, ToolCall};
use crate::telemetry;
use crate::tools::{is_error_payload, ToolSet};
use crate::Result;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, info_span, warn, Instrument};

impl AgentGraph {
    /// Returns one tool-result message per call. Unknown tools and
    /// undecodable arguments abort the run.
    pub(super) async fn act(
        &self,
        state: &RunState,
        calls: &[ToolCall],
        tools: &ToolSet,
        events: &EventSink,
        cancel: &CancellationToken,
    ) -> Result<Vec<Message>> {
        let mut results = Vec::with_capacity(calls.len());

        for call in calls {
            let span = info_span!(
                "tool",
                tool = %call.name,
                call_id = %call.id,
                account_id = state.account_id,
            );

            events
                .emit(RunEvent::ToolStart {
                    name: call.name.clone(),
                    input: call.arguments.clone(),
                })
                .await;

            let started = Instant::now();
            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => Err(AgentError::Cancelled),
                output = tools.dispatch(call).instrument(span.clone()) => output,
            };
            let elapsed = started.elapsed();

            let output = match outcome {
                Ok(output) => output,
                Err(e) => {
                    telemetry::record_tool_execution(&call.name, e.kind(), elapsed);
                    span.in_scope(|| warn!(error = %e, "Tool dispatch failed"));
                    return Err(e);
                }
            };

            let status = if is_error_payload(&output) { "error" } else { "success" };
            telemetry::record_tool_execution(&call.name, status, elapsed);
            span.in_scope(|| {
                info!(
                    status,
                    duration_ms = elapsed.as_millis() as u64,
                    output_chars = output.to_string().len(),
                    "Tool completed"
                )
            });

            results.push(Message::tool_result(call, &output));
            events
                .emit(RunEvent::ToolEnd {
                    name: call.name.clone(),
                    output,
                })
                .await;
        }

        Ok(results)
    }
}
