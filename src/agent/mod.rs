//! Chat service: the run boundary around the graph
//!
//! request → resolve thread → build tools → run graph → stream or collect

use crate::backend::BackendHandles;
use crate::bridge::{stream_chunks, ChunkStream, Collector, EVENT_BUFFER};
use crate::checkpoint::CheckpointStore;
use crate::config::AgentSettings;
use crate::error::AgentError;
use crate::graph::{AgentGraph, EventSink, RunInput, RunOutcome};
use crate::llm::ChatModel;
use crate::models::{ChatReply, ChatRequest};
use crate::prompts::PromptBuilder;
use crate::telemetry;
use crate::threads::ThreadManager;
use crate::tools::{build_tools, ToolSet};
use crate::Result;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, info_span, Instrument};

/// Streaming answer: the resolved thread plus the chunk sequence.
pub struct ChatStream {
    pub thread_id: i64,
    pub chunks: ChunkStream,
}

pub fn apology(error: &AgentError) -> String {
    format!("I apologize, but I encountered an error: {}", error)
}

fn status_label<T>(result: &Result<T>) -> &'static str {
    match result {
        Ok(_) => "success",
        Err(e) => e.kind(),
    }
}

pub struct AgentService {
    graph: Arc<AgentGraph>,
    threads: Arc<ThreadManager>,
    checkpoints: Arc<dyn CheckpointStore>,
    prompts: Arc<PromptBuilder>,
    settings: AgentSettings,
}

impl AgentService {
    pub fn new(
        model: Arc<dyn ChatModel>,
        threads: Arc<ThreadManager>,
        checkpoints: Arc<dyn CheckpointStore>,
        prompts: PromptBuilder,
        settings: AgentSettings,
    ) -> Self {
        let graph = AgentGraph::new(model).with_max_iterations(settings.max_iterations);
        Self {
            graph: Arc::new(graph),
            threads,
            checkpoints,
            prompts: Arc::new(prompts),
            settings,
        }
    }

    pub fn model_name(&self) -> &str {
        self.graph.model_name()
    }

    pub fn threads(&self) -> &ThreadManager {
        &self.threads
    }

    async fn prepare(&self, request: &ChatRequest, handles: &BackendHandles) -> Result<(RunInput, ToolSet)> {
        let thread = self
            .threads
            .resolve(request.account_id, request.thread_id)
            .await
            .map_err(|e| match e {
                AgentError::ThreadResolution(_) => e,
                other => AgentError::ThreadResolution(other.to_string()),
            })?;

        let tools = build_tools(
            request.account_id,
            handles,
            self.settings.price_fetch_concurrency,
        );

        info!(
            account_id = request.account_id,
            thread_id = thread.id,
            voice_mode = request.voice_mode,
            tools = tools.len(),
            "Prepared chat run"
        );

        let input = RunInput {
            account_id: request.account_id,
            thread_id: thread.id,
            user_message: request.user_message.clone(),
            context: self.prompts.context_for(request.account_id, request.voice_mode),
        };
        Ok((input, tools))
    }

    /// Start a run and hand back its chunks. Dropping the chunk stream
    /// cancels the run.
    pub async fn stream_chat(&self, request: ChatRequest, handles: &BackendHandles) -> Result<ChatStream> {
        let started = Instant::now();
        let (input, tools) = match self.prepare(&request, handles).await {
            Ok(prepared) => prepared,
            Err(e) => {
                telemetry::record_chat_request("stream", e.kind(), started.elapsed());
                return Err(e);
            }
        };
        let thread_id = input.thread_id;

        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        let cancel = CancellationToken::new();
        let span = info_span!("chat_stream", account_id = request.account_id, thread_id);

        let run = tokio::spawn(
            execute(
                self.graph.clone(),
                self.checkpoints.clone(),
                input,
                tools,
                EventSink::new(tx),
                cancel.clone(),
            )
            .instrument(span),
        );

        let finished = async move {
            let result = match run.await {
                Ok(result) => result,
                Err(join_error) => Err(AgentError::Task(join_error.to_string())),
            };
            telemetry::record_chat_request("stream", status_label(&result), started.elapsed());
            if let Err(e) = &result {
                error!(thread_id, error = %e, "Streaming run failed");
            }
            result.map(|_| ())
        };

        Ok(ChatStream {
            thread_id,
            chunks: stream_chunks(rx, finished, cancel.drop_guard()),
        })
    }

    /// Run to completion and collect the answer. Failures become an
    /// apology with an empty tool trace.
    pub async fn run_chat(&self, request: ChatRequest, handles: &BackendHandles) -> ChatReply {
        let started = Instant::now();
        let (input, tools) = match self.prepare(&request, handles).await {
            Ok(prepared) => prepared,
            Err(e) => {
                telemetry::record_chat_request("collect", e.kind(), started.elapsed());
                error!(account_id = request.account_id, error = %e, "Thread resolution failed");
                return ChatReply {
                    thread_id: None,
                    text: apology(&e),
                    tool_events: Vec::new(),
                };
            }
        };
        let thread_id = input.thread_id;

        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        let cancel = CancellationToken::new();
        let _cancel_on_drop = cancel.clone().drop_guard();
        let span = info_span!("chat_collect", account_id = request.account_id, thread_id);

        let run = execute(
            self.graph.clone(),
            self.checkpoints.clone(),
            input,
            tools,
            EventSink::new(tx),
            cancel,
        )
        .instrument(span);
        let (result, collector) = tokio::join!(run, Collector::new().drain(rx));

        telemetry::record_chat_request("collect", status_label(&result), started.elapsed());
        match result {
            Ok(_) => {
                let (text, tool_events) = collector.into_parts();
                ChatReply {
                    thread_id: Some(thread_id),
                    text,
                    tool_events,
                }
            }
            Err(e) => {
                error!(thread_id, error = %e, "Chat run failed");
                ChatReply {
                    thread_id: Some(thread_id),
                    text: apology(&e),
                    tool_events: Vec::new(),
                }
            }
        }
    }
}

/// One run with its own checkpoint session; the session and the event
/// sender are dropped when the run ends.
async fn execute(
    graph: Arc<AgentGraph>,
    checkpoints: Arc<dyn CheckpointStore>,
    input: RunInput,
    tools: ToolSet,
    events: EventSink,
    cancel: CancellationToken,
) -> Result<RunOutcome> {
    let mut session = checkpoints.connect().await?;
    graph
        .run(input, &tools, session.as_mut(), &events, &cancel)
        .await
}
