//! Azure OpenAI / OpenAI-compatible chat completions client
//!
//! Uses a long-lived reqwest::Client for connection pooling. Streaming reads
//! the server-sent event body and reassembles tool-call fragments by index.

use super::{ChatModel, DeltaStream, ModelDelta, ModelReply};
use crate::config::LlmSettings;
use crate::error::AgentError;
use crate::models::{Message, MessageRole, TokenUsage, ToolCall};
use crate::tools::ToolSchema;
use crate::Result;
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, error};

/// Reusable chat completions client (connection-pooled)
pub struct OpenAiChatModel {
    client: Client,
    url: String,
    api_key: String,
    deployment: String,
}

impl OpenAiChatModel {
    pub fn new(settings: &LlmSettings) -> Result<Self> {
        if !settings.is_configured() {
            return Err(AgentError::Config(
                "LLM_ENDPOINT, LLM_API_KEY and LLM_DEPLOYMENT must be set".to_string(),
            ));
        }

        let client = Client::builder()
            .pool_idle_timeout(Duration::from_secs(90))
            .pool_max_idle_per_host(8)
            .timeout(Duration::from_secs(120))
            .build()?;

        let url = format!(
            "{}/openai/deployments/{}/chat/completions?api-version={}",
            settings.endpoint.trim_end_matches('/'),
            settings.deployment,
            settings.api_version
        );

        Ok(Self {
            client,
            url,
            api_key: settings.api_key.clone(),
            deployment: settings.deployment.clone(),
        })
    }

    async fn send(
        &self,
        messages: &[Message],
        tools: &[ToolSchema],
        stream: bool,
    ) -> Result<reqwest::Response> {
        let request = build_request(messages, tools, stream);

        debug!(
            deployment = %self.deployment,
            message_count = messages.len(),
            stream,
            "Calling chat completions"
        );

        let response = self
            .client
            .post(&self.url)
            .header("api-key", &self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                error!("Chat completions request failed: {}", e);
                AgentError::ModelInvocation(format!("Chat completions request failed: {}", e))
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            error!("Chat completions error response: {} {}", status, error_text);
            return Err(AgentError::ModelInvocation(format!(
                "Chat completions returned {}: {}",
                status, error_text
            )));
        }

        Ok(response)
    }
}

#[async_trait]
impl ChatModel for OpenAiChatModel {
    fn name(&self) -> &str {
        &self.deployment
    }

    async fn invoke(&self, messages: &[Message], tools: &[ToolSchema]) -> Result<ModelReply> {
        let response = self.send(messages, tools, false).await?;

        let completion: CompletionResponse = response.json().await.map_err(|e| {
            error!("Failed to parse chat completion: {}", e);
            AgentError::ModelInvocation(format!("Chat completion parse error: {}", e))
        })?;

        let choice = completion.choices.into_iter().next().ok_or_else(|| {
            AgentError::ModelInvocation("Chat completion returned no choices".to_string())
        })?;

        Ok(ModelReply {
            content: choice.message.content.unwrap_or_default(),
            tool_calls: choice
                .message
                .tool_calls
                .unwrap_or_default()
                .into_iter()
                .map(|call| ToolCall {
                    id: call.id,
                    name: call.function.name,
                    arguments: parse_arguments(&call.function.arguments),
                })
                .collect(),
            usage: completion.usage.map(Usage::into_token_usage),
        })
    }

    async fn stream(&self, messages: &[Message], tools: &[ToolSchema]) -> Result<DeltaStream> {
        let response = self.send(messages, tools, true).await?;
        let mut body = response.bytes_stream();

        let deltas = async_stream::stream! {
            let mut accumulator = StreamAccumulator::default();
            let mut buffer: Vec<u8> = Vec::new();

            'read: while let Some(chunk) = body.next().await {
                let chunk = match chunk {
                    Ok(chunk) => chunk,
                    Err(e) => {
                        yield Err(AgentError::ModelInvocation(format!("Stream read failed: {}", e)));
                        return;
                    }
                };
                buffer.extend_from_slice(&chunk);

                while let Some(newline) = buffer.iter().position(|b| *b == b'\n') {
                    let line: Vec<u8> = buffer.drain(..=newline).collect();
                    let line = String::from_utf8_lossy(&line);
                    match accumulator.push_line(&line) {
                        Ok(LineOutcome::Content(text)) => yield Ok(ModelDelta::Content(text)),
                        Ok(LineOutcome::Nothing) => {}
                        Ok(LineOutcome::Finished) => break 'read,
                        Err(e) => {
                            yield Err(e);
                            return;
                        }
                    }
                }
            }

            yield Ok(ModelDelta::Done(accumulator.finish()));
        };

        Ok(Box::pin(deltas))
    }
}

fn build_request(messages: &[Message], tools: &[ToolSchema], stream: bool) -> CompletionRequest {
    CompletionRequest {
        messages: messages.iter().map(WireMessage::from).collect(),
        tools: tools
            .iter()
            .map(|schema| WireTool {
                kind: "function",
                function: WireFunction {
                    name: schema.name.clone(),
                    description: schema.description.clone(),
                    parameters: schema.parameters.clone(),
                },
            })
            .collect(),
        stream,
        stream_options: stream.then_some(StreamOptions {
            include_usage: true,
        }),
    }
}

/// Garbled argument strings are kept verbatim so tool dispatch can reject them.
fn parse_arguments(raw: &str) -> Value {
    if raw.trim().is_empty() {
        return Value::Object(Default::default());
    }
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

//
// ================= Streaming =================
//

enum LineOutcome {
    Content(String),
    Nothing,
    Finished,
}

#[derive(Default)]
struct PartialToolCall {
    id: String,
    name: String,
    arguments: String,
}

#[derive(Default)]
struct StreamAccumulator {
    content: String,
    tool_calls: Vec<PartialToolCall>,
    usage: Option<TokenUsage>,
}

impl StreamAccumulator {
    fn push_line(&mut self, line: &str) -> Result<LineOutcome> {
        let Some(data) = line.trim().strip_prefix("data:") else {
            return Ok(LineOutcome::Nothing);
        };
        let data = data.trim();
        if data == "[DONE]" {
            return Ok(LineOutcome::Finished);
        }

        let chunk: StreamChunk = serde_json::from_str(data).map_err(|e| {
            AgentError::ModelInvocation(format!("Invalid stream chunk: {}", e))
        })?;

        if let Some(usage) = chunk.usage {
            self.usage = Some(usage.into_token_usage());
        }

        let mut text = String::new();
        for choice in chunk.choices {
            if let Some(content) = choice.delta.content {
                text.push_str(&content);
            }
            for fragment in choice.delta.tool_calls.unwrap_or_default() {
                while self.tool_calls.len() <= fragment.index {
                    self.tool_calls.push(PartialToolCall::default());
                }
                let partial = &mut self.tool_calls[fragment.index];
                if let Some(id) = fragment.id {
                    partial.id = id;
                }
                if let Some(function) = fragment.function {
                    if let Some(name) = function.name {
                        partial.name.push_str(&name);
                    }
                    if let Some(arguments) = function.arguments {
                        partial.arguments.push_str(&arguments);
                    }
                }
            }
        }

        if text.is_empty() {
            Ok(LineOutcome::Nothing)
        } else {
            self.content.push_str(&text);
            Ok(LineOutcome::Content(text))
        }
    }

    fn finish(self) -> ModelReply {
        ModelReply {
            content: self.content,
            tool_calls: self
                .tool_calls
                .into_iter()
                .filter(|call| !call.name.is_empty())
                .map(|call| ToolCall {
                    id: call.id,
                    name: call.name,
                    arguments: parse_arguments(&call.arguments),
                })
                .collect(),
            usage: self.usage,
        }
    }
}

//
// ================= Wire Types =================
//

#[derive(Debug, Serialize)]
struct CompletionRequest {
    messages: Vec<WireMessage>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<WireTool>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    stream_options: Option<StreamOptions>,
}

#[derive(Debug, Serialize)]
struct StreamOptions {
    include_usage: bool,
}

#[derive(Debug, Serialize)]
struct WireMessage {
    role: &'static str,
    content: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tool_calls: Vec<WireToolCall>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

impl From<&Message> for WireMessage {
    fn from(message: &Message) -> Self {
        let role = match message.role {
            MessageRole::Context => "system",
            MessageRole::Human => "user",
            MessageRole::Agent => "assistant",
            MessageRole::Tool => "tool",
        };

        Self {
            role,
            content: message.content.clone(),
            tool_calls: message
                .tool_calls
                .iter()
                .map(|call| WireToolCall {
                    id: call.id.clone(),
                    kind: "function".to_string(),
                    function: WireFunctionCall {
                        name: call.name.clone(),
                        arguments: call.arguments.to_string(),
                    },
                })
                .collect(),
            tool_call_id: message.tool_call_id.clone(),
        }
    }
}

#[derive(Debug, Serialize)]
struct WireTool {
    #[serde(rename = "type")]
    kind: &'static str,
    function: WireFunction,
}

#[derive(Debug, Serialize)]
struct WireFunction {
    name: String,
    description: String,
    parameters: Value,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireToolCall {
    id: String,
    #[serde(rename = "type", default)]
    kind: String,
    function: WireFunctionCall,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireFunctionCall {
    name: String,
    #[serde(default)]
    arguments: String,
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    choices: Vec<CompletionChoice>,
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct CompletionChoice {
    message: CompletionMessage,
}

#[derive(Debug, Deserialize)]
struct CompletionMessage {
    content: Option<String>,
    tool_calls: Option<Vec<WireToolCall>>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    prompt_tokens: u64,
    completion_tokens: u64,
}

impl Usage {
    fn into_token_usage(self) -> TokenUsage {
        TokenUsage {
            prompt_tokens: self.prompt_tokens,
            completion_tokens: self.completion_tokens,
        }
    }
}

#[derive(Debug, Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    delta: StreamDelta,
}

#[derive(Debug, Deserialize)]
struct StreamDelta {
    content: Option<String>,
    tool_calls: Option<Vec<ToolCallFragment>>,
}

#[derive(Debug, Deserialize)]
struct ToolCallFragment {
    index: usize,
    id: Option<String>,
    function: Option<FunctionFragment>,
}

#[derive(Debug, Deserialize)]
struct FunctionFragment {
    name: Option<String>,
    arguments: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_serialization() {
        let call = ToolCall {
            id: "call_1".to_string(),
            name: "get_portfolio_holdings".to_string(),
            arguments: json!({"date": "today"}),
        };
        let messages = vec![
            Message::context("You are a portfolio assistant"),
            Message::human("Show me my portfolio holdings"),
            Message::agent("", vec![call.clone()]),
            Message::tool_result(&call, &json!({"status": "success"})),
        ];
        let tools = vec![ToolSchema {
            name: "get_portfolio_holdings".to_string(),
            description: "Holdings".to_string(),
            parameters: json!({"type": "object"}),
        }];

        let value = serde_json::to_value(build_request(&messages, &tools, true)).unwrap();

        assert_eq!(value["messages"][0]["role"], "system");
        assert_eq!(value["messages"][1]["role"], "user");
        assert_eq!(value["messages"][2]["tool_calls"][0]["function"]["arguments"], "{\"date\":\"today\"}");
        assert_eq!(value["messages"][3]["tool_call_id"], "call_1");
        assert_eq!(value["tools"][0]["type"], "function");
        assert_eq!(value["stream_options"]["include_usage"], true);
    }

    #[test]
    fn test_stream_accumulator_reassembles_tool_calls() {
        let mut acc = StreamAccumulator::default();
        let lines = [
            r#"data: {"choices":[{"delta":{"content":"Let me "}}]}"#,
            r#"data: {"choices":[{"delta":{"content":"check."}}]}"#,
            r#"data: {"choices":[{"delta":{"tool_calls":[{"index":0,"id":"call_a","function":{"name":"get_real_time_prices","arguments":"{\"tick"}}]}}]}"#,
            r#"data: {"choices":[{"delta":{"tool_calls":[{"index":0,"function":{"arguments":"ers\":[\"AAPL.US\"]}"}}]}}]}"#,
            r#"data: {"choices":[],"usage":{"prompt_tokens":120,"completion_tokens":14}}"#,
        ];

        let mut streamed = String::new();
        for line in lines {
            if let LineOutcome::Content(text) = acc.push_line(line).unwrap() {
                streamed.push_str(&text);
            }
        }
        assert!(matches!(acc.push_line("data: [DONE]").unwrap(), LineOutcome::Finished));

        let reply = acc.finish();
        assert_eq!(streamed, "Let me check.");
        assert_eq!(reply.content, "Let me check.");
        assert_eq!(reply.tool_calls.len(), 1);
        assert_eq!(reply.tool_calls[0].id, "call_a");
        assert_eq!(reply.tool_calls[0].arguments, json!({"tickers": ["AAPL.US"]}));
        assert_eq!(reply.usage.unwrap().total(), 134);
    }

    #[test]
    fn test_garbled_arguments_kept_verbatim() {
        assert_eq!(parse_arguments("{not json"), Value::String("{not json".to_string()));
        assert_eq!(parse_arguments(""), json!({}));
    }

    #[test]
    fn test_unconfigured_settings_rejected() {
        let result = OpenAiChatModel::new(&LlmSettings::default());
        assert!(matches!(result, Err(AgentError::Config(_))));
    }
}
