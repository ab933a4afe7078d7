//! Error types for the portfolio chat agent

use thiserror::Error;

/// Result type alias for agent operations
pub type Result<T> = std::result::Result<T, AgentError>;

#[derive(Error, Debug)]
pub enum AgentError {

    // =============================
    // Run Errors
    // =============================

    #[error("Model invocation error: {0}")]
    ModelInvocation(String),

    #[error("Tool execution error: {0}")]
    ToolExecution(String),

    #[error("Invalid tool input for {tool}: {message}")]
    InvalidToolInput { tool: String, message: String },

    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    #[error("Run cancelled")]
    Cancelled,

    #[error("Run task failed: {0}")]
    Task(String),

    // =============================
    // Durable State Errors
    // =============================

    #[error("Thread resolution error: {0}")]
    ThreadResolution(String),

    #[error("Checkpoint error: {0}")]
    Checkpoint(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Configuration error: {0}")]
    Config(String),

    // =============================
    // External Library Conversions
    // =============================

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("SQL error: {0}")]
    Sql(#[from] sqlx::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl AgentError {
    pub fn invalid_input(tool: &str, message: impl Into<String>) -> Self {
        Self::InvalidToolInput {
            tool: tool.to_string(),
            message: message.into(),
        }
    }

    /// Label used for the `status` dimension of metrics and spans.
    pub fn kind(&self) -> &'static str {
        match self {
            AgentError::ModelInvocation(_) => "model_error",
            AgentError::ToolExecution(_) => "tool_error",
            AgentError::InvalidToolInput { .. } => "invalid_tool_input",
            AgentError::ToolNotFound(_) => "tool_not_found",
            AgentError::Cancelled => "cancelled",
            AgentError::Task(_) => "task_error",
            AgentError::ThreadResolution(_) => "thread_error",
            AgentError::Checkpoint(_) => "checkpoint_error",
            AgentError::Database(_) | AgentError::Sql(_) => "database_error",
            AgentError::Config(_) => "config_error",
            AgentError::Serialization(_) => "serialization_error",
            AgentError::Http(_) => "http_error",
            AgentError::Io(_) => "io_error",
        }
    }
}
