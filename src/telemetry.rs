//! Logging and metrics setup
//!
//! Metric names follow the chat service's dashboards. Recording is a no-op
//! until a recorder is installed.

use metrics::{counter, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::time::Duration;
use tracing::warn;
use tracing_subscriber::EnvFilter;

/// Initialise the global tracing subscriber. `RUST_LOG` wins over `default_level`.
pub fn init_tracing(default_level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    if tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init()
        .is_err()
    {
        warn!("Tracing subscriber already initialised");
    }
}

/// Install the Prometheus recorder; the handle renders `/metrics`.
pub fn install_metrics_recorder() -> Option<PrometheusHandle> {
    match PrometheusBuilder::new().install_recorder() {
        Ok(handle) => Some(handle),
        Err(error) => {
            warn!("Failed to install metrics recorder: {}", error);
            None
        }
    }
}

pub fn record_llm_request(model: &str, status: &'static str, duration: Duration) {
    counter!("llm_requests_total", "model" => model.to_string(), "status" => status).increment(1);
    histogram!("llm_request_duration_seconds", "model" => model.to_string(), "status" => status)
        .record(duration.as_secs_f64());
}

pub fn record_llm_tokens(model: &str, prompt_tokens: u64, completion_tokens: u64) {
    counter!("llm_tokens_total", "model" => model.to_string(), "type" => "prompt")
        .increment(prompt_tokens);
    counter!("llm_tokens_total", "model" => model.to_string(), "type" => "completion")
        .increment(completion_tokens);
    counter!("llm_tokens_total", "model" => model.to_string(), "type" => "total")
        .increment(prompt_tokens + completion_tokens);
}

pub fn record_tool_execution(tool: &str, status: &'static str, duration: Duration) {
    counter!("tool_executions_total", "tool" => tool.to_string(), "status" => status).increment(1);
    histogram!("tool_execution_duration_seconds", "tool" => tool.to_string(), "status" => status)
        .record(duration.as_secs_f64());
}

pub fn record_chat_request(mode: &'static str, status: &'static str, duration: Duration) {
    counter!("ai_chat_requests_total", "mode" => mode, "status" => status).increment(1);
    histogram!("ai_chat_request_duration_seconds", "mode" => mode, "status" => status)
        .record(duration.as_secs_f64());
}
