//! Core data models for the portfolio chat agent

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

//
// ================= Threads =================
//

/// Durable conversation session scoping multi-turn memory for one account.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConversationThread {
    pub id: i64,
    pub account_id: i64,
    pub title: String,
    pub last_activity: DateTime<Utc>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ConversationThread {
    pub fn idle_for(&self, now: DateTime<Utc>) -> Duration {
        now - self.last_activity
    }
}

//
// ================= Messages =================
//

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    /// One-time system/context message, never persisted
    Context,
    Human,
    Agent,
    Tool,
}

/// A tool call requested by the model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    pub role: MessageRole,
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    /// Set on tool results: the id of the call being answered
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    /// Set on tool results: the tool's name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl Message {
    fn with_role(role: MessageRole, content: String) -> Self {
        Self {
            role,
            content,
            tool_calls: Vec::new(),
            tool_call_id: None,
            name: None,
            timestamp: Utc::now(),
        }
    }

    pub fn context(content: impl Into<String>) -> Self {
        Self::with_role(MessageRole::Context, content.into())
    }

    pub fn human(content: impl Into<String>) -> Self {
        Self::with_role(MessageRole::Human, content.into())
    }

    pub fn agent(content: impl Into<String>, tool_calls: Vec<ToolCall>) -> Self {
        let mut message = Self::with_role(MessageRole::Agent, content.into());
        message.tool_calls = tool_calls;
        message
    }

    pub fn tool_result(call: &ToolCall, output: &Value) -> Self {
        let mut message = Self::with_role(MessageRole::Tool, output.to_string());
        message.tool_call_id = Some(call.id.clone());
        message.name = Some(call.name.clone());
        message
    }

    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }

    /// Approximate token count (chars / 4, rounded up)
    pub fn approx_tokens(&self) -> usize {
        (self.content.len() + 3) / 4
    }
}

/// Token usage reported by the model, when available.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
}

impl TokenUsage {
    pub fn total(&self) -> u64 {
        self.prompt_tokens + self.completion_tokens
    }
}

//
// ================= Tool Trace =================
//

/// One tool invocation observed during a run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolInvocationEvent {
    pub name: String,
    pub input: Value,
    pub output: Option<Value>,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
}

//
// ================= Requests =================
//

/// Inbound query consumed by the agent.
///
/// `account_id` comes from the authenticated context and is never taken from
/// a client payload.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub user_message: String,
    pub account_id: i64,
    pub thread_id: Option<i64>,
    pub voice_mode: bool,
}

impl ChatRequest {
    pub fn new(account_id: i64, user_message: impl Into<String>) -> Self {
        Self {
            user_message: user_message.into(),
            account_id,
            thread_id: None,
            voice_mode: false,
        }
    }

    pub fn with_thread(mut self, thread_id: i64) -> Self {
        self.thread_id = Some(thread_id);
        self
    }

    pub fn voice(mut self) -> Self {
        self.voice_mode = true;
        self
    }
}

/// Collected answer for non-streaming callers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatReply {
    pub thread_id: Option<i64>,
    pub text: String,
    pub tool_events: Vec<ToolInvocationEvent>,
}

impl fmt::Display for MessageRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MessageRole::Context => "context",
            MessageRole::Human => "human",
            MessageRole::Agent => "agent",
            MessageRole::Tool => "tool",
        };
        write!(f, "{}", s)
    }
}
