//! Reasoning/tool state graph
//!
//! REASON asks the model for the next message. If that message carries tool
//! calls the graph moves to ACT, runs them, and returns to REASON; otherwise
//! the run ends. A final answer is checkpointed on its own; a tool-call
//! message is only checkpointed together with all of its tool results.

use crate::bridge::RunEvent;
use crate::checkpoint::{checkpoint_key, Checkpoint, CheckpointSession};
use crate::config::DEFAULT_MAX_ITERATIONS;
use crate::error::AgentError;
use crate::llm::ChatModel;
use crate::models::Message;
use crate::tools::ToolSet;
use crate::Result;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, info_span, warn, Instrument};

mod act;
mod reason;

pub const ITERATION_LIMIT_MESSAGE: &str = "I wasn't able to finish answering within the allowed \
     number of reasoning steps. Please try a more specific question.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndReason {
    Completed,
    IterationLimit,
}

/// What one run starts from.
#[derive(Debug, Clone)]
pub struct RunInput {
    pub account_id: i64,
    pub thread_id: i64,
    pub user_message: String,
    /// Prepended to the first model call only; never persisted
    pub context: String,
}

/// Ephemeral state of one run.
#[derive(Debug, Clone)]
pub struct RunState {
    pub account_id: i64,
    pub thread_id: i64,
    pub messages: Vec<Message>,
    /// Last checkpoint step written for this thread
    pub step: u64,
    /// REASON steps taken in this run
    pub iterations: usize,
}

#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub messages: Vec<Message>,
    pub end_reason: EndReason,
    pub iterations: usize,
}

impl RunOutcome {
    pub fn final_message(&self) -> Option<&Message> {
        self.messages.last()
    }
}

/// Best-effort event emitter; a departed consumer is not an error.
#[derive(Clone)]
pub struct EventSink {
    tx: Option<mpsc::Sender<RunEvent>>,
}

impl EventSink {
    pub fn new(tx: mpsc::Sender<RunEvent>) -> Self {
        Self { tx: Some(tx) }
    }

    pub fn discard() -> Self {
        Self { tx: None }
    }

    pub async fn emit(&self, event: RunEvent) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(event).await;
        }
    }
}

pub struct AgentGraph {
    model: Arc<dyn ChatModel>,
    max_iterations: usize,
}

impl AgentGraph {
    pub fn new(model: Arc<dyn ChatModel>) -> Self {
        Self {
            model,
            max_iterations: DEFAULT_MAX_ITERATIONS,
        }
    }

    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations.max(1);
        self
    }

    pub fn model_name(&self) -> &str {
        self.model.name()
    }

    /// Execute one run to completion.
    ///
    /// The new user message is only committed together with the first
    /// completed step, so a failed model call or tool dispatch leaves the
    /// thread untouched.
    pub async fn run(
        &self,
        input: RunInput,
        tools: &ToolSet,
        session: &mut dyn CheckpointSession,
        events: &EventSink,
        cancel: &CancellationToken,
    ) -> Result<RunOutcome> {
        let span = info_span!(
            "agent_run",
            account_id = input.account_id,
            thread_id = input.thread_id,
            model = %self.model.name(),
        );

        self.run_inner(input, tools, session, events, cancel)
            .instrument(span)
            .await
    }

    async fn run_inner(
        &self,
        input: RunInput,
        tools: &ToolSet,
        session: &mut dyn CheckpointSession,
        events: &EventSink,
        cancel: &CancellationToken,
    ) -> Result<RunOutcome> {
        let key = checkpoint_key(input.account_id, input.thread_id);
        let prior = session.load_latest(&key).await?;

        let (mut messages, step) = match prior {
            Some(checkpoint) => (checkpoint.messages, checkpoint.step),
            None => (Vec::new(), 0),
        };
        info!(history = messages.len(), step, "Starting run");

        messages.push(Message::human(input.user_message));
        let mut state = RunState {
            account_id: input.account_id,
            thread_id: input.thread_id,
            messages,
            step,
            iterations: 0,
        };
        let schemas = tools.schemas();

        loop {
            if state.iterations >= self.max_iterations {
                warn!(iterations = state.iterations, "Iteration limit reached");
                events
                    .emit(RunEvent::Token(ITERATION_LIMIT_MESSAGE.to_string()))
                    .await;
                state
                    .messages
                    .push(Message::agent(ITERATION_LIMIT_MESSAGE, Vec::new()));
                self.commit(session, &key, &mut state, cancel).await?;
                return Ok(Self::finish(state, EndReason::IterationLimit));
            }

            // REASON
            let context = (state.iterations == 0).then_some(input.context.as_str());
            let reply = self
                .reason(&state, context, &schemas, events, cancel)
                .await?;
            state.iterations += 1;

            let request = Message::agent(reply.content, reply.tool_calls);
            if !request.has_tool_calls() {
                state.messages.push(request);
                self.commit(session, &key, &mut state, cancel).await?;
                return Ok(Self::finish(state, EndReason::Completed));
            }

            // ACT; the tool-call message is committed together with its results
            let results = self
                .act(&state, &request.tool_calls, tools, events, cancel)
                .await?;
            state.messages.push(request);
            state.messages.extend(results);
            self.commit(session, &key, &mut state, cancel).await?;
        }
    }

    async fn commit(
        &self,
        session: &mut dyn CheckpointSession,
        key: &str,
        state: &mut RunState,
        cancel: &CancellationToken,
    ) -> Result<()> {
        if cancel.is_cancelled() {
            return Err(AgentError::Cancelled);
        }

        let checkpoint = Checkpoint::new(state.step + 1, state.messages.clone());
        session.append(key, &checkpoint).await?;
        state.step = checkpoint.step;
        Ok(())
    }

    fn finish(state: RunState, end_reason: EndReason) -> RunOutcome {
        info!(
            iterations = state.iterations,
            messages = state.messages.len(),
            ?end_reason,
            "Run finished"
        );
        RunOutcome {
            messages: state.messages,
            end_reason,
            iterations: state.iterations,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{BackendHandles, InMemoryHoldings, InMemoryMarketData};
    use crate::checkpoint::{CheckpointStore, InMemoryCheckpointStore};
    use crate::llm::{ModelReply, ScriptStep, ScriptedModel};
    use crate::models::MessageRole;
    use crate::tools::build_tools;
    use serde_json::json;
    use std::time::Duration;

    fn input(message: &str) -> RunInput {
        RunInput {
            account_id: 11,
            thread_id: 3,
            user_message: message.to_string(),
            context: "You are a portfolio assistant for account 11.".to_string(),
        }
    }

    fn tools() -> ToolSet {
        let market = InMemoryMarketData::new()
            .with_price("AAPL.US", 190.0)
            .with_price("MSFT.US", 410.0);
        let handles = BackendHandles::new(Arc::new(InMemoryHoldings::new())).with_market(Arc::new(market));
        build_tools(11, &handles, 10)
    }

    async fn run_with(
        model: &ScriptedModel,
        store: &InMemoryCheckpointStore,
        message: &str,
        max_iterations: usize,
    ) -> Result<RunOutcome> {
        let graph = AgentGraph::new(Arc::new(model.clone())).with_max_iterations(max_iterations);
        let mut session = store.connect().await?;
        graph
            .run(
                input(message),
                &tools(),
                session.as_mut(),
                &EventSink::discard(),
                &CancellationToken::new(),
            )
            .await
    }

    #[tokio::test]
    async fn test_direct_answer_completes_in_one_step() {
        let model = ScriptedModel::replies(vec![ModelReply::text("Hello! How can I help?")]);
        let store = InMemoryCheckpointStore::new();

        let outcome = run_with(&model, &store, "hi", 10).await.unwrap();

        assert_eq!(outcome.end_reason, EndReason::Completed);
        assert_eq!(outcome.iterations, 1);
        let history = store.history(&checkpoint_key(11, 3)).await;
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].messages.len(), 2);
        assert_eq!(history[0].messages[0].role, MessageRole::Human);
    }

    #[tokio::test]
    async fn test_context_injected_only_on_first_reason() {
        let model = ScriptedModel::replies(vec![
            ModelReply::tool_call("get_real_time_prices", json!({"tickers": ["AAPL.US"]})),
            ModelReply::text("AAPL is at 190."),
        ]);
        let store = InMemoryCheckpointStore::new();

        run_with(&model, &store, "price of apple?", 10).await.unwrap();

        let prompts = model.prompts().await;
        assert_eq!(prompts.len(), 2);
        assert_eq!(prompts[0][0].role, MessageRole::Context);
        assert!(prompts[1].iter().all(|m| m.role != MessageRole::Context));

        let stored = store.history(&checkpoint_key(11, 3)).await;
        assert!(stored
            .iter()
            .flat_map(|c| &c.messages)
            .all(|m| m.role != MessageRole::Context));
    }

    #[tokio::test]
    async fn test_one_tool_result_per_call_in_order() {
        let model = ScriptedModel::replies(vec![
            ModelReply::tool_calls(vec![
                ("get_real_time_prices", json!({"tickers": ["MSFT.US"]})),
                ("get_real_time_prices", json!({"tickers": ["AAPL.US"]})),
            ]),
            ModelReply::text("Both fetched."),
        ]);
        let store = InMemoryCheckpointStore::new();

        let outcome = run_with(&model, &store, "prices", 10).await.unwrap();

        let calls = outcome.messages[1].tool_calls.clone();
        let results: Vec<&Message> = outcome
            .messages
            .iter()
            .filter(|m| m.role == MessageRole::Tool)
            .collect();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].tool_call_id.as_deref(), Some(calls[0].id.as_str()));
        assert_eq!(results[1].tool_call_id.as_deref(), Some(calls[1].id.as_str()));
        assert!(results[0].content.contains("MSFT.US"));
    }

    #[tokio::test]
    async fn test_history_carries_into_next_run() {
        let model = ScriptedModel::replies(vec![ModelReply::text("first"), ModelReply::text("second")]);
        let store = InMemoryCheckpointStore::new();

        run_with(&model, &store, "one", 10).await.unwrap();
        let outcome = run_with(&model, &store, "two", 10).await.unwrap();

        assert_eq!(outcome.messages.len(), 4);
        let second_prompt = &model.prompts().await[1];
        assert_eq!(second_prompt[0].role, MessageRole::Context);
        assert_eq!(second_prompt[1].content, "one");
        assert_eq!(second_prompt[3].content, "two");
    }

    #[tokio::test]
    async fn test_iteration_limit_ends_with_distinct_message() {
        let model = ScriptedModel::replies(vec![ModelReply::tool_call(
            "get_real_time_prices",
            json!({"tickers": ["AAPL.US"]}),
        )])
        .repeating();
        let store = InMemoryCheckpointStore::new();

        let outcome = run_with(&model, &store, "loop forever", 3).await.unwrap();

        assert_eq!(outcome.end_reason, EndReason::IterationLimit);
        assert_eq!(outcome.iterations, 3);
        assert_eq!(model.prompts().await.len(), 3);
        assert_eq!(outcome.final_message().unwrap().content, ITERATION_LIMIT_MESSAGE);
    }

    #[tokio::test]
    async fn test_failed_first_call_leaves_thread_untouched() {
        let model = ScriptedModel::new(vec![ScriptStep::Fail("upstream 500".to_string())]);
        let store = InMemoryCheckpointStore::new();

        let result = run_with(&model, &store, "hi", 10).await;

        assert!(matches!(result, Err(AgentError::ModelInvocation(_))));
        assert!(store.history(&checkpoint_key(11, 3)).await.is_empty());
        assert_eq!(store.open_sessions(), 0);
    }

    fn assert_tool_calls_answered(messages: &[Message]) {
        for (i, message) in messages.iter().enumerate() {
            if !message.has_tool_calls() {
                continue;
            }
            for call in &message.tool_calls {
                assert!(
                    messages[i + 1..]
                        .iter()
                        .any(|m| m.tool_call_id.as_deref() == Some(call.id.as_str())),
                    "tool call {} has no result",
                    call.id
                );
            }
        }
    }

    #[tokio::test]
    async fn test_unknown_tool_aborts_without_commit() {
        let model = ScriptedModel::replies(vec![ModelReply::tool_call("drop_tables", json!({}))]);
        let store = InMemoryCheckpointStore::new();

        let result = run_with(&model, &store, "hi", 10).await;

        assert!(matches!(result, Err(AgentError::ToolNotFound(_))));
        assert!(store.history(&checkpoint_key(11, 3)).await.is_empty());
    }

    #[tokio::test]
    async fn test_failed_dispatch_keeps_next_run_consistent() {
        let model = ScriptedModel::replies(vec![
            ModelReply::text("Welcome back."),
            ModelReply::tool_call("get_portfolio_holdings", json!("{\"date\": ")),
            ModelReply::text("Sorry about that."),
        ]);
        let store = InMemoryCheckpointStore::new();

        run_with(&model, &store, "hello", 10).await.unwrap();
        let failed = run_with(&model, &store, "show holdings", 10).await;
        assert!(matches!(failed, Err(AgentError::InvalidToolInput { .. })));

        let history = store.history(&checkpoint_key(11, 3)).await;
        assert_eq!(history.len(), 1);
        assert_tool_calls_answered(&history[0].messages);

        run_with(&model, &store, "try again", 10).await.unwrap();
        let prompts = model.prompts().await;
        let last = prompts.last().unwrap();
        assert_tool_calls_answered(last);
        assert!(last.iter().all(|m| m.content != "show holdings"));
    }

    #[tokio::test]
    async fn test_cancellation_during_tool_call_commits_nothing() {
        let market = InMemoryMarketData::new()
            .with_price("AAPL.US", 190.0)
            .with_latency(Duration::from_millis(500));
        let handles = BackendHandles::new(Arc::new(InMemoryHoldings::new())).with_market(Arc::new(market));
        let tools = build_tools(11, &handles, 10);

        let model = ScriptedModel::replies(vec![ModelReply::tool_call(
            "get_real_time_prices",
            json!({"tickers": ["AAPL.US"]}),
        )]);
        let store = InMemoryCheckpointStore::new();
        let graph = AgentGraph::new(Arc::new(model));
        let cancel = CancellationToken::new();

        let canceller = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            canceller.cancel();
        });

        let mut session = store.connect().await.unwrap();
        let result = graph
            .run(input("apple price"), &tools, session.as_mut(), &EventSink::discard(), &cancel)
            .await;
        drop(session);

        assert!(matches!(result, Err(AgentError::Cancelled)));
        assert!(store.history(&checkpoint_key(11, 3)).await.is_empty());

        let follow_up = ScriptedModel::replies(vec![ModelReply::text("AAPL is 190")]);
        run_with(&follow_up, &store, "apple price?", 10).await.unwrap();
        let prompt = &follow_up.prompts().await[0];
        assert_tool_calls_answered(prompt);
        assert_eq!(prompt.len(), 2);
    }

    #[test]
    fn test_reported_usage_reaches_token_metrics() {
        let recorder = metrics_exporter_prometheus::PrometheusBuilder::new().build_recorder();
        let handle = recorder.handle();
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();

        let model = ScriptedModel::replies(vec![ModelReply::text("All good.").with_usage(120, 8)]);
        let store = InMemoryCheckpointStore::new();
        let outcome = metrics::with_local_recorder(&recorder, || {
            runtime.block_on(run_with(&model, &store, "status?", 10))
        })
        .unwrap();
        assert_eq!(outcome.end_reason, EndReason::Completed);

        let rendered = handle.render();
        let token_line = |kind: &str, value: &str| {
            rendered.lines().any(|line| {
                line.starts_with("llm_tokens_total")
                    && line.contains(&format!("type=\"{}\"", kind))
                    && line.ends_with(value)
            })
        };
        assert!(token_line("prompt", " 120"));
        assert!(token_line("completion", " 8"));
        assert!(token_line("total", " 128"));
    }

    #[tokio::test]
    async fn test_cancellation_stops_hung_model() {
        let model = ScriptedModel::new(vec![ScriptStep::Hang]);
        let store = InMemoryCheckpointStore::new();
        let graph = AgentGraph::new(Arc::new(model));
        let cancel = CancellationToken::new();

        let canceller = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            canceller.cancel();
        });

        let mut session = store.connect().await.unwrap();
        let result = graph
            .run(input("hi"), &tools(), session.as_mut(), &EventSink::discard(), &cancel)
            .await;

        assert!(matches!(result, Err(AgentError::Cancelled)));
        assert!(store.history(&checkpoint_key(11, 3)).await.is_empty());
    }

    #[tokio::test]
    async fn test_events_follow_production_order() {
        let model = ScriptedModel::replies(vec![
            ModelReply::tool_call("get_real_time_prices", json!({"tickers": ["AAPL.US"]})),
            ModelReply::text("AAPL is 190"),
        ]);
        let store = InMemoryCheckpointStore::new();
        let graph = AgentGraph::new(Arc::new(model));
        let (tx, mut rx) = mpsc::channel(64);

        let mut session = store.connect().await.unwrap();
        graph
            .run(
                input("apple"),
                &tools(),
                session.as_mut(),
                &EventSink::new(tx),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }

        assert!(matches!(&events[0], RunEvent::ToolStart { name, .. } if name == "get_real_time_prices"));
        assert!(matches!(&events[1], RunEvent::ToolEnd { output, .. } if output["prices"]["AAPL.US"] == 190.0));
        let text: String = events
            .iter()
            .filter_map(|e| match e {
                RunEvent::Token(t) => Some(t.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(text, "AAPL is 190");
    }
}
