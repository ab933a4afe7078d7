//! Streaming/collection bridge for run events
//!
//! A run produces `RunEvent`s on a single channel. Streaming callers receive
//! them as `ChatChunk`s with user-facing status lines; collecting callers
//! fold them into the final text plus a tool trace.

use crate::models::ToolInvocationEvent;
use crate::Result;
use chrono::Utc;
use futures::stream::BoxStream;
use futures::Future;
use lazy_static::lazy_static;
use serde_json::Value;
use std::collections::HashMap;
use tokio::sync::mpsc;
use tokio_util::sync::DropGuard;
use tracing::debug;

/// Channel capacity between a run and its consumer
pub const EVENT_BUFFER: usize = 64;

#[derive(Debug, Clone, PartialEq)]
pub enum RunEvent {
    Token(String),
    ToolStart { name: String, input: Value },
    ToolEnd { name: String, output: Value },
}

#[derive(Debug, Clone, PartialEq)]
pub enum ChatChunk {
    Token(String),
    Status(String),
    Done,
    Error(String),
}

impl ChatChunk {
    /// Payload of the `data:` field on the SSE wire.
    pub fn sse_data(&self) -> String {
        match self {
            ChatChunk::Token(text) | ChatChunk::Status(text) => text.clone(),
            ChatChunk::Done => "[DONE]".to_string(),
            ChatChunk::Error(message) => format!("[ERROR: {}]", message),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ChatChunk::Done | ChatChunk::Error(_))
    }
}

pub type ChunkStream = BoxStream<'static, ChatChunk>;

lazy_static! {
    /// (start, completion) status lines per tool
    static ref TOOL_STATUS: HashMap<&'static str, (&'static str, &'static str)> = {
        let mut table = HashMap::new();
        table.insert(
            "get_portfolio_holdings",
            ("📊 Fetching your portfolio holdings...\n\n", "✓ Portfolio data retrieved\n\n"),
        );
        table.insert(
            "analyze_portfolio_performance",
            ("📈 Analyzing portfolio performance...\n\n", "✓ Analysis complete\n\n"),
        );
        table.insert(
            "compare_portfolio_performance",
            ("📊 Comparing portfolio performance...\n\n", "✓ Comparison complete\n\n"),
        );
        table.insert(
            "get_market_context",
            ("🌍 Getting market context...\n\n", "✓ Market context retrieved\n\n"),
        );
        table.insert(
            "get_market_sentiment",
            ("💭 Analyzing market sentiment...\n\n", "✓ Sentiment analysis complete\n\n"),
        );
        table.insert(
            "get_real_time_prices",
            ("💰 Fetching real-time stock prices...\n\n", "✓ Prices retrieved\n\n"),
        );
        table
    };
}

/// Status line for a tool event; `None` for tokens and unknown tools.
pub fn status_message(event: &RunEvent) -> Option<&'static str> {
    match event {
        RunEvent::Token(_) => None,
        RunEvent::ToolStart { name, .. } => TOOL_STATUS.get(name.as_str()).map(|(start, _)| *start),
        RunEvent::ToolEnd { name, .. } => TOOL_STATUS.get(name.as_str()).map(|(_, end)| *end),
    }
}

/// Map one run event to the chunk a streaming caller sees.
pub fn to_chunk(event: &RunEvent) -> Option<ChatChunk> {
    match event {
        RunEvent::Token(text) => Some(ChatChunk::Token(text.clone())),
        RunEvent::ToolStart { .. } | RunEvent::ToolEnd { .. } => {
            status_message(event).map(|status| ChatChunk::Status(status.to_string()))
        }
    }
}

/// Forward events as chunks, then finish with `Done` or `Error` once the run
/// resolves. Dropping the stream drops `cancel_on_drop`.
pub fn stream_chunks<F>(
    mut events: mpsc::Receiver<RunEvent>,
    finished: F,
    cancel_on_drop: DropGuard,
) -> ChunkStream
where
    F: Future<Output = Result<()>> + Send + 'static,
{
    Box::pin(async_stream::stream! {
        let _guard = cancel_on_drop;

        while let Some(event) = events.recv().await {
            if let Some(chunk) = to_chunk(&event) {
                yield chunk;
            }
        }

        match finished.await {
            Ok(()) => yield ChatChunk::Done,
            Err(e) => yield ChatChunk::Error(e.to_string()),
        }
    })
}

/// Folds events into the final text and an ordered tool trace.
#[derive(Debug, Default)]
pub struct Collector {
    text: String,
    tool_events: Vec<ToolInvocationEvent>,
}

impl Collector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn observe(&mut self, event: RunEvent) {
        match event {
            RunEvent::Token(text) => self.text.push_str(&text),
            RunEvent::ToolStart { name, input } => self.tool_events.push(ToolInvocationEvent {
                name,
                input,
                output: None,
                started_at: Utc::now(),
                ended_at: None,
            }),
            RunEvent::ToolEnd { name, output } => {
                // Most recent unmatched start with the same name
                match self
                    .tool_events
                    .iter_mut()
                    .rev()
                    .find(|e| e.name == name && e.output.is_none())
                {
                    Some(open) => {
                        open.output = Some(output);
                        open.ended_at = Some(Utc::now());
                    }
                    None => debug!(tool = %name, "Tool end without matching start"),
                }
            }
        }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn tool_events(&self) -> &[ToolInvocationEvent] {
        &self.tool_events
    }

    pub fn into_parts(self) -> (String, Vec<ToolInvocationEvent>) {
        (self.text, self.tool_events)
    }

    /// Drain a channel until the producer hangs up.
    pub async fn drain(mut self, mut events: mpsc::Receiver<RunEvent>) -> Self {
        while let Some(event) = events.recv().await {
            self.observe(event);
        }
        self
    }
}
