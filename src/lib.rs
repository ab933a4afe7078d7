//! Portfolio Chat Agent
//!
//! A conversational assistant over a portfolio-tracking backend:
//! - Resolves the conversation thread for an authenticated account
//! - Binds data-retrieval tools to that account for one request
//! - Runs a bounded reasoning/tool loop with checkpointed history
//! - Streams the answer token by token or collects it with a tool trace
//!
//! FLOW:
//! REQUEST → THREAD → TOOLS → REASON ⇄ ACT → STREAM | COLLECT

pub mod agent;
pub mod api;
pub mod backend;
pub mod bridge;
pub mod checkpoint;
pub mod config;
pub mod error;
pub mod graph;
pub mod llm;
pub mod models;
pub mod prompts;
pub mod telemetry;
pub mod threads;
pub mod tools;

pub use error::{AgentError, Result};

// Re-export common types
pub use agent::{AgentService, ChatStream};
pub use bridge::{ChatChunk, RunEvent};
pub use llm::{ChatModel, ModelReply};
pub use models::*;
