//! OpenAI chat-completions adapter.
//!
//! Tool-call intent is a response-level signal here: the API reports
//! `finish_reason: "tool_calls"` when the model wants tools to run.

use crate::error::AdapterError;
use crate::traits::Adapter;
use crate::types::{
    AdapterContent, AdapterRequest, Completion, ModelInfo, RawEvent, StopReason, Usage,
};
use crate::vendors::sse::FrameBuffer;
use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;

const API_BASE: &str = "https://api.openai.com/v1";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);
// Idle bound per read, so a stalled stream aborts the call instead of
// hanging the turn
const READ_TIMEOUT: Duration = Duration::from_secs(60);

fn build_client(read_timeout: Duration) -> Client {
    Client::builder()
        .connect_timeout(Duration::from_secs(10))
        .read_timeout(read_timeout)
        .build()
        .unwrap_or_default()
}

/// Adapter for the OpenAI chat completions API.
pub struct OpenAiAdapter {
    client: Client,
    api_key: String,
    base_url: String,
}

impl OpenAiAdapter {
    /// Create a new OpenAI adapter with the given API key.
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            client: build_client(READ_TIMEOUT),
            api_key: api_key.into(),
            base_url: API_BASE.to_string(),
        }
    }

    /// Create with a custom base URL (for testing/proxy).
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    /// Override the per-read idle timeout.
    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.client = build_client(timeout);
        self
    }

    /// Build the JSON request body.
    fn build_request_body(&self, request: &AdapterRequest, streaming: bool) -> Value {
        let messages = self.convert_messages(request);

        let mut body = json!({
            "model": request.model,
            "messages": messages,
            "stream": streaming,
        });

        if let Some(max_tokens) = request.max_tokens {
            body["max_tokens"] = json!(max_tokens);
        }

        if !request.tools.is_empty() {
            body["tools"] = json!(request
                .tools
                .iter()
                .map(|t| {
                    json!({
                        "type": "function",
                        "function": {
                            "name": t.name,
                            "description": t.description,
                            "parameters": t.parameters,
                        }
                    })
                })
                .collect::<Vec<_>>());
        }

        // Thinking options are not representable on this API surface for the
        // models in the catalog; degrade by omitting them.
        body
    }

    /// Convert messages to OpenAI format.
    fn convert_messages(&self, request: &AdapterRequest) -> Vec<Value> {
        let mut messages = Vec::new();

        if let Some(ref system) = request.system {
            messages.push(json!({"role": "system", "content": system}));
        }

        for msg in &request.messages {
            let role = msg.role.as_str();

            // Tool results are sent as role=tool, one message per result
            let has_tool_results = msg
                .content
                .iter()
                .any(|c| matches!(c, AdapterContent::ToolResult { .. }));

            if has_tool_results {
                for block in &msg.content {
                    if let AdapterContent::ToolResult {
                        tool_call_id,
                        content,
                        ..
                    } = block
                    {
                        messages.push(json!({
                            "role": "tool",
                            "tool_call_id": tool_call_id,
                            "content": content,
                        }));
                    }
                }
                continue;
            }

            let has_tool_calls = msg
                .content
                .iter()
                .any(|c| matches!(c, AdapterContent::ToolCall { .. }));

            if has_tool_calls && role == "assistant" {
                let text_content = joined_text(&msg.content);

                let tool_calls: Vec<Value> = msg
                    .content
                    .iter()
                    .filter_map(|c| {
                        if let AdapterContent::ToolCall {
                            id,
                            name,
                            arguments,
                        } = c
                        {
                            Some(json!({
                                "id": id,
                                "type": "function",
                                "function": {
                                    "name": name,
                                    "arguments": arguments.to_string(),
                                }
                            }))
                        } else {
                            None
                        }
                    })
                    .collect();

                let mut msg_json = json!({
                    "role": "assistant",
                    "tool_calls": tool_calls,
                });
                if !text_content.is_empty() {
                    msg_json["content"] = json!(text_content);
                }
                messages.push(msg_json);
                continue;
            }

            messages.push(json!({"role": role, "content": joined_text(&msg.content)}));
        }

        messages
    }

    /// Parse one SSE `data:` payload into stream events.
    fn parse_sse_event(data: &str, open_call: &mut Option<String>) -> Vec<RawEvent> {
        if data == "[DONE]" {
            return Vec::new();
        }

        let chunk: OpenAiChunk = match serde_json::from_str(data) {
            Ok(c) => c,
            Err(_) => return Vec::new(),
        };

        let mut events = Vec::new();

        for choice in &chunk.choices {
            if let Some(ref content) = choice.delta.content {
                if !content.is_empty() {
                    events.push(RawEvent::TextDelta {
                        delta: content.clone(),
                    });
                }
            }

            if let Some(ref tool_calls) = choice.delta.tool_calls {
                for tc in tool_calls {
                    if let Some(ref func) = tc.function {
                        // A function name marks a new tool call. There is no
                        // explicit per-call terminator on this wire format, so
                        // the previous call ends when the next one starts or
                        // when the finish reason arrives.
                        if let Some(ref name) = func.name {
                            if let Some(prev) = open_call.take() {
                                events.push(RawEvent::ToolCallEnd { id: prev });
                            }
                            let id = tc.id.clone().unwrap_or_default();
                            *open_call = Some(id.clone());
                            events.push(RawEvent::ToolCallStart {
                                id,
                                name: name.clone(),
                            });
                        }
                        if let Some(ref args) = func.arguments {
                            if !args.is_empty() {
                                events.push(RawEvent::ToolCallDelta {
                                    id: tc
                                        .id
                                        .clone()
                                        .or_else(|| open_call.clone())
                                        .unwrap_or_default(),
                                    delta: args.clone(),
                                });
                            }
                        }
                    }
                }
            }

            if let Some(ref reason) = choice.finish_reason {
                if let Some(prev) = open_call.take() {
                    events.push(RawEvent::ToolCallEnd { id: prev });
                }
                events.push(RawEvent::Done {
                    reason: convert_finish_reason(reason),
                });
            }
        }

        events
    }
}

fn joined_text(content: &[AdapterContent]) -> String {
    content
        .iter()
        .filter_map(|c| {
            if let AdapterContent::Text { text } = c {
                Some(text.as_str())
            } else {
                None
            }
        })
        .collect::<Vec<_>>()
        .join("")
}

fn convert_finish_reason(reason: &str) -> StopReason {
    match reason {
        "stop" => StopReason::EndTurn,
        "tool_calls" => StopReason::ToolUse,
        "length" => StopReason::MaxTokens,
        _ => StopReason::EndTurn,
    }
}

#[async_trait]
impl Adapter for OpenAiAdapter {
    fn vendor(&self) -> &str {
        "openai"
    }

    fn models(&self) -> Vec<ModelInfo> {
        vec![
            ModelInfo {
                id: "gpt-4o".to_string(),
                name: "GPT-4o".to_string(),
                context_window: 128_000,
                max_output_tokens: 16_384,
                supports_thinking: false,
                supports_tools: true,
            },
            ModelInfo {
                id: "gpt-4o-mini".to_string(),
                name: "GPT-4o mini".to_string(),
                context_window: 128_000,
                max_output_tokens: 16_384,
                supports_thinking: false,
                supports_tools: true,
            },
        ]
    }

    async fn complete(&self, request: AdapterRequest) -> Result<Completion, AdapterError> {
        self.require_model(&request.model)?;
        let body = self.build_request_body(&request, false);
        let url = format!("{}/chat/completions", self.base_url);

        let response = self
            .client
            .post(&url)
            .timeout(REQUEST_TIMEOUT)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(AdapterError::Http)?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "unknown error".to_string());
            return Err(AdapterError::Api(format!("HTTP {status}: {body}")));
        }

        let resp: OpenAiResponse = response.json().await.map_err(AdapterError::Http)?;

        let choice = resp
            .choices
            .first()
            .ok_or_else(|| AdapterError::Stream("No choices in response".to_string()))?;

        let mut content = Vec::new();
        if let Some(ref text) = choice.message.content {
            if !text.is_empty() {
                content.push(AdapterContent::Text { text: text.clone() });
            }
        }
        for tc in choice.message.tool_calls.iter().flatten() {
            content.push(AdapterContent::ToolCall {
                id: tc.id.clone(),
                name: tc.function.name.clone(),
                arguments: parse_arguments(&tc.function.arguments),
            });
        }

        // The one wire signal this API gives for "run tools now".
        let wants_tool_calls = choice.finish_reason.as_deref() == Some("tool_calls");

        Ok(Completion {
            content,
            wants_tool_calls,
            usage: Usage {
                input_tokens: resp.usage.prompt_tokens,
                output_tokens: resp.usage.completion_tokens,
            },
        })
    }

    async fn stream(
        &self,
        request: AdapterRequest,
    ) -> Result<BoxStream<'_, Result<RawEvent, AdapterError>>, AdapterError> {
        self.require_model(&request.model)?;
        let body = self.build_request_body(&request, true);
        let url = format!("{}/chat/completions", self.base_url);

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(AdapterError::Http)?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "unknown error".to_string());
            return Err(AdapterError::Api(format!("HTTP {status}: {body}")));
        }

        let byte_stream = response.bytes_stream();
        let mut frames = FrameBuffer::new();
        let mut open_call: Option<String> = None;

        // Chunk boundaries are arbitrary; only complete frames are parsed
        let event_stream = byte_stream.flat_map(move |chunk| match chunk {
            Ok(bytes) => {
                let mut events: Vec<Result<RawEvent, AdapterError>> = Vec::new();
                for frame in frames.push(&bytes) {
                    for line in frame.lines() {
                        if let Some(data) = line.trim().strip_prefix("data: ") {
                            events.extend(
                                Self::parse_sse_event(data, &mut open_call)
                                    .into_iter()
                                    .map(Ok),
                            );
                        }
                    }
                }
                stream::iter(events).boxed()
            }
            Err(e) => stream::once(async move { Err(AdapterError::Http(e)) }).boxed(),
        });

        Ok(event_stream.boxed())
    }
}

/// Parse accumulated argument JSON; malformed arguments degrade to `{}`.
fn parse_arguments(raw: &str) -> Value {
    if raw.trim().is_empty() {
        return json!({});
    }
    serde_json::from_str(raw).unwrap_or_else(|_| {
        tracing::warn!(fragment = raw, "discarding malformed tool arguments");
        json!({})
    })
}

// — OpenAI response types for deserialization —

#[derive(Debug, Deserialize)]
struct OpenAiChunk {
    #[serde(default)]
    choices: Vec<OpenAiChunkChoice>,
}

#[derive(Debug, Deserialize)]
struct OpenAiChunkChoice {
    delta: OpenAiDelta,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenAiDelta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<OpenAiToolCallDelta>>,
}

#[derive(Debug, Deserialize)]
struct OpenAiToolCallDelta {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    function: Option<OpenAiFunctionDelta>,
}

#[derive(Debug, Deserialize)]
struct OpenAiFunctionDelta {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    arguments: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenAiResponse {
    choices: Vec<OpenAiResponseChoice>,
    #[serde(default)]
    usage: OpenAiUsage,
}

#[derive(Debug, Deserialize)]
struct OpenAiResponseChoice {
    message: OpenAiMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenAiMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<OpenAiToolCall>>,
}

#[derive(Debug, Deserialize)]
struct OpenAiToolCall {
    id: String,
    function: OpenAiFunction,
}

#[derive(Debug, Deserialize)]
struct OpenAiFunction {
    name: String,
    #[serde(default)]
    arguments: String,
}

#[derive(Debug, Default, Deserialize)]
struct OpenAiUsage {
    #[serde(default)]
    prompt_tokens: usize,
    #[serde(default)]
    completion_tokens: usize,
}
