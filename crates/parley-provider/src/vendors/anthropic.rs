//! Anthropic Messages API adapter with SSE streaming.
//!
//! This wire format has no single "run tools now" flag on the sync path that
//! we trust in isolation; tool-call intent is detected by scanning the
//! returned content blocks for a `tool_use` entry.

use crate::error::AdapterError;
use crate::traits::Adapter;
use crate::types::{
    AdapterContent, AdapterMessage, AdapterRequest, Completion, ModelInfo, RawEvent, StopReason,
    Usage,
};
use crate::vendors::sse::FrameBuffer;
use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::time::Duration;

const API_BASE: &str = "https://api.anthropic.com";
const API_VERSION: &str = "2023-06-01";
const DEFAULT_MAX_TOKENS: usize = 16_384;
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

/// Adapter for the Anthropic Messages API.
pub struct AnthropicAdapter {
    client: Client,
    api_key: String,
    base_url: String,
}

/// What kind of content block a stream index currently holds.
#[derive(Debug, Clone)]
enum StreamBlock {
    Text,
    Thinking,
    Tool { id: String },
}

impl AnthropicAdapter {
    /// Create a new Anthropic adapter with the given API key.
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

    /// Convert a vendor-neutral request into the Messages API request body.
    fn build_request_body(
        &self,
        request: &AdapterRequest,
        supports_thinking: bool,
        streaming: bool,
    ) -> Value {
        let messages: Vec<Value> = request
            .messages
            .iter()
            .filter_map(|msg| self.convert_message(msg))
            .collect();

        let mut body = json!({
            "model": request.model,
            "messages": messages,
            "max_tokens": request.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
            "stream": streaming,
        });

        if !request.tools.is_empty() {
            body["tools"] = json!(request
                .tools
                .iter()
                .map(|t| {
                    json!({
                        "name": t.name,
                        "description": t.description,
                        "input_schema": t.parameters,
                    })
                })
                .collect::<Vec<_>>());
        }

        if let Some(ref system) = request.system {
            body["system"] = json!(system);
        }

        // Models without the capability flag never see a thinking parameter.
        if supports_thinking {
            if let Some(ref thinking) = request.thinking {
                body["thinking"] = json!({
                    "type": "enabled",
                    "budget_tokens": thinking.budget_tokens,
                });
            }
        }

        body
    }

    /// Convert an AdapterMessage to the Anthropic JSON format.
    fn convert_message(&self, msg: &AdapterMessage) -> Option<Value> {
        // Only "user" and "assistant" roles exist on the wire
        let role = match msg.role.as_str() {
            "user" | "assistant" => msg.role.as_str(),
            "tool" => "user", // Tool results are sent as user messages
            _ => return None,
        };

        let content: Vec<Value> = msg
            .content
            .iter()
            .filter_map(|c| self.convert_content(c))
            .collect();

        if content.is_empty() {
            return None;
        }

        Some(json!({
            "role": role,
            "content": content,
        }))
    }

    fn convert_content(&self, content: &AdapterContent) -> Option<Value> {
        match content {
            AdapterContent::Text { text } => Some(json!({
                "type": "text",
                "text": text,
            })),
            // Thinking blocks are not replayed to the vendor
            AdapterContent::Thinking { .. } => None,
            AdapterContent::ToolCall {
                id,
                name,
                arguments,
            } => Some(json!({
                "type": "tool_use",
                "id": id,
                "name": name,
                "input": arguments,
            })),
            AdapterContent::ToolResult {
                tool_call_id,
                content,
                is_error,
            } => Some(json!({
                "type": "tool_result",
                "tool_use_id": tool_call_id,
                "content": content,
                "is_error": is_error,
            })),
        }
    }

    /// Translate one Anthropic SSE event into adapter stream events.
    fn parse_sse_event(
        event: &AnthropicEvent,
        blocks: &mut HashMap<usize, StreamBlock>,
    ) -> Vec<Result<RawEvent, AdapterError>> {
        match event {
            AnthropicEvent::ContentBlockStart {
                index,
                content_block,
            } => match content_block {
                ContentBlockInfo::Text { .. } => {
                    blocks.insert(*index, StreamBlock::Text);
                    vec![]
                }
                ContentBlockInfo::Thinking { .. } => {
                    blocks.insert(*index, StreamBlock::Thinking);
                    vec![]
                }
                ContentBlockInfo::ToolUse { id, name } => {
                    blocks.insert(*index, StreamBlock::Tool { id: id.clone() });
                    vec![Ok(RawEvent::ToolCallStart {
                        id: id.clone(),
                        name: name.clone(),
                    })]
                }
            },
            AnthropicEvent::ContentBlockDelta { index, delta } => match delta {
                Delta::Text { text } => vec![Ok(RawEvent::TextDelta {
                    delta: text.clone(),
                })],
                Delta::Thinking { thinking } => vec![Ok(RawEvent::ThinkingDelta {
                    delta: thinking.clone(),
                })],
                Delta::InputJson { partial_json } => {
                    // Fragments belong to whichever tool block owns this index
                    match blocks.get(index) {
                        Some(StreamBlock::Tool { id }) => vec![Ok(RawEvent::ToolCallDelta {
                            id: id.clone(),
                            delta: partial_json.clone(),
                        })],
                        _ => vec![],
                    }
                }
            },
            AnthropicEvent::ContentBlockStop { index } => match blocks.remove(index) {
                Some(StreamBlock::Tool { id }) => vec![Ok(RawEvent::ToolCallEnd { id })],
                _ => vec![],
            },
            AnthropicEvent::MessageStart { message } => {
                let mut events = Vec::new();
                if let Some(usage) = &message.usage {
                    events.push(Ok(RawEvent::Usage {
                        input: usage.input_tokens.unwrap_or(0),
                        output: usage.output_tokens.unwrap_or(0),
                    }));
                }
                events
            }
            AnthropicEvent::MessageDelta { delta, usage } => {
                let mut events = Vec::new();
                if let Some(usage) = usage {
                    events.push(Ok(RawEvent::Usage {
                        input: usage.input_tokens.unwrap_or(0),
                        output: usage.output_tokens.unwrap_or(0),
                    }));
                }
                if let Some(reason) = &delta.stop_reason {
                    events.push(Ok(RawEvent::Done {
                        reason: convert_stop_reason(reason),
                    }));
                }
                events
            }
            AnthropicEvent::MessageStop => vec![],
            AnthropicEvent::Ping => vec![],
            AnthropicEvent::Error { error } => vec![Err(AdapterError::Api(format!(
                "{}: {}",
                error.error_type, error.message
            )))],
        }
    }
}

fn convert_stop_reason(reason: &str) -> StopReason {
    match reason {
        "end_turn" => StopReason::EndTurn,
        "tool_use" => StopReason::ToolUse,
        "max_tokens" => StopReason::MaxTokens,
        "stop_sequence" => StopReason::StopSequence,
        _ => StopReason::EndTurn,
    }
}

#[async_trait]
impl Adapter for AnthropicAdapter {
    fn vendor(&self) -> &str {
        "anthropic"
    }

    fn models(&self) -> Vec<ModelInfo> {
        vec![
            ModelInfo {
                id: "claude-sonnet-4-20250514".to_string(),
                name: "Claude Sonnet 4".to_string(),
                context_window: 200_000,
                max_output_tokens: 16_384,
                supports_thinking: true,
                supports_tools: true,
            },
            ModelInfo {
                id: "claude-3-5-sonnet-20241022".to_string(),
                name: "Claude 3.5 Sonnet".to_string(),
                context_window: 200_000,
                max_output_tokens: 8_192,
                supports_thinking: false,
                supports_tools: true,
            },
        ]
    }

    async fn complete(&self, request: AdapterRequest) -> Result<Completion, AdapterError> {
        let model = self.require_model(&request.model)?;
        let body = self.build_request_body(&request, model.supports_thinking, false);

        let response = self
            .client
            .post(format!("{}/v1/messages", self.base_url))
            .timeout(REQUEST_TIMEOUT)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(AdapterError::Http)?;

        if !response.status().is_success() {
            let status = response.status();
            let error_body = response.text().await.unwrap_or_default();
            return Err(AdapterError::Api(format!("HTTP {status}: {error_body}")));
        }

        let resp: AnthropicResponse = response.json().await.map_err(AdapterError::Http)?;

        let mut content = Vec::new();
        for block in &resp.content {
            match block {
                ResponseBlock::Text { text } => {
                    content.push(AdapterContent::Text { text: text.clone() })
                }
                ResponseBlock::Thinking { thinking } => content.push(AdapterContent::Thinking {
                    thinking: thinking.clone(),
                }),
                ResponseBlock::ToolUse { id, name, input } => {
                    content.push(AdapterContent::ToolCall {
                        id: id.clone(),
                        name: name.clone(),
                        arguments: input.clone(),
                    })
                }
            }
        }

        // Intent detection: a tool_use block anywhere in the content
        let wants_tool_calls = resp
            .content
            .iter()
            .any(|b| matches!(b, ResponseBlock::ToolUse { .. }));

        Ok(Completion {
            content,
            wants_tool_calls,
            usage: Usage {
                input_tokens: resp.usage.input_tokens.unwrap_or(0),
                output_tokens: resp.usage.output_tokens.unwrap_or(0),
            },
        })
    }

    async fn stream(
        &self,
        request: AdapterRequest,
    ) -> Result<BoxStream<'_, Result<RawEvent, AdapterError>>, AdapterError> {
        let model = self.require_model(&request.model)?;
        let body = self.build_request_body(&request, model.supports_thinking, true);

        let response = self
            .client
            .post(format!("{}/v1/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(AdapterError::Http)?;

        if !response.status().is_success() {
            let status = response.status();
            let error_body = response.text().await.unwrap_or_default();
            return Err(AdapterError::Api(format!("HTTP {status}: {error_body}")));
        }

        let byte_stream = response.bytes_stream();
        let mut frames = FrameBuffer::new();
        let mut blocks: HashMap<usize, StreamBlock> = HashMap::new();

        // Chunk boundaries are arbitrary; only complete frames are parsed
        let event_stream = byte_stream.flat_map(move |chunk| match chunk {
            Ok(bytes) => {
                let mut events = Vec::new();
                for frame in frames.push(&bytes) {
                    for line in frame.lines() {
                        if let Some(data) = line.strip_prefix("data: ") {
                            // Unparseable events are skipped
                            if let Ok(event) = serde_json::from_str::<AnthropicEvent>(data) {
                                events.extend(Self::parse_sse_event(&event, &mut blocks));
                            }
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

// ──────────────────────────────────────────────────────────
// Anthropic wire types (internal)
// ──────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum AnthropicEvent {
    #[serde(rename = "message_start")]
    MessageStart { message: MessageStartData },

    #[serde(rename = "content_block_start")]
    ContentBlockStart {
        index: usize,
        content_block: ContentBlockInfo,
    },

    #[serde(rename = "content_block_delta")]
    ContentBlockDelta { index: usize, delta: Delta },

    #[serde(rename = "content_block_stop")]
    ContentBlockStop { index: usize },

    #[serde(rename = "message_delta")]
    MessageDelta {
        delta: MessageDeltaData,
        #[serde(default)]
        usage: Option<UsageData>,
    },

    #[serde(rename = "message_stop")]
    MessageStop,

    #[serde(rename = "ping")]
    Ping,

    #[serde(rename = "error")]
    Error { error: ErrorData },
}

#[derive(Debug, Deserialize)]
struct MessageStartData {
    #[serde(default)]
    usage: Option<UsageData>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum ContentBlockInfo {
    #[serde(rename = "text")]
    Text {
        #[serde(default)]
        #[allow(dead_code)]
        text: String,
    },

    #[serde(rename = "tool_use")]
    ToolUse { id: String, name: String },

    #[serde(rename = "thinking")]
    Thinking {
        #[serde(default)]
        #[allow(dead_code)]
        thinking: String,
    },
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
#[allow(clippy::enum_variant_names)]
enum Delta {
    #[serde(rename = "text_delta")]
    Text { text: String },

    #[serde(rename = "thinking_delta")]
    Thinking { thinking: String },

    #[serde(rename = "input_json_delta")]
    InputJson { partial_json: String },
}

#[derive(Debug, Deserialize)]
struct MessageDeltaData {
    #[serde(default)]
    stop_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UsageData {
    #[serde(default)]
    input_tokens: Option<usize>,
    #[serde(default)]
    output_tokens: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct ErrorData {
    #[serde(rename = "type", default)]
    error_type: String,
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    #[serde(default)]
    content: Vec<ResponseBlock>,
    #[serde(default)]
    usage: ResponseUsage,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum ResponseBlock {
    #[serde(rename = "text")]
    Text {
        #[serde(default)]
        text: String,
    },

    #[serde(rename = "thinking")]
    Thinking {
        #[serde(default)]
        thinking: String,
    },

    #[serde(rename = "tool_use")]
    ToolUse {
        id: String,
        name: String,
        #[serde(default)]
        input: Value,
    },
}

#[derive(Debug, Default, Deserialize)]
struct ResponseUsage {
    #[serde(default)]
    input_tokens: Option<usize>,
    #[serde(default)]
    output_tokens: Option<usize>,
}

// ──────────────────────────────────────────────────────────
// Tests
// ──────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ThinkingOptions, ToolSchema};

    fn request(model: &str) -> AdapterRequest {
        AdapterRequest {
            model: model.to_string(),
            system: Some("You are helpful.".to_string()),
            messages: vec![AdapterMessage {
                role: "user".to_string(),
                content: vec![AdapterContent::Text {
                    text: "Hello".to_string(),
                }],
            }],
            tools: vec![],
            max_tokens: Some(1024),
            thinking: None,
        }
    }

    #[test]
    fn test_vendor_name() {
        let a = AnthropicAdapter::new("test-key");
        assert_eq!(a.vendor(), "anthropic");
    }

    #[test]
    fn test_require_unknown_model() {
        let a = AnthropicAdapter::new("test-key");
        assert!(matches!(
            a.require_model("nonexistent-model"),
            Err(AdapterError::UnknownModel(_))
        ));
    }

    #[test]
    fn test_build_request_body() {
        let a = AnthropicAdapter::new("test-key");
        let body = a.build_request_body(&request("claude-sonnet-4-20250514"), true, true);
        assert_eq!(body["model"], "claude-sonnet-4-20250514");
        assert_eq!(body["max_tokens"], 1024);
        assert_eq!(body["system"], "You are helpful.");
        assert!(body["stream"].as_bool().unwrap());
    }

    #[test]
    fn test_build_request_with_tools() {
        let a = AnthropicAdapter::new("test-key");
        let mut req = request("claude-sonnet-4-20250514");
        req.tools = vec![ToolSchema {
            name: "lookup".to_string(),
            description: "Look something up".to_string(),
            parameters: json!({"type": "object"}),
        }];

        let body = a.build_request_body(&req, true, true);
        assert!(body["tools"].is_array());
        assert_eq!(body["tools"][0]["name"], "lookup");
        assert_eq!(body["tools"][0]["input_schema"]["type"], "object");
    }

    #[test]
    fn test_thinking_sent_only_when_supported() {
        let a = AnthropicAdapter::new("test-key");
        let mut req = request("claude-3-5-sonnet-20241022");
        req.thinking = Some(ThinkingOptions {
            budget_tokens: 2048,
        });

        let body = a.build_request_body(&req, false, true);
        assert!(body.get("thinking").is_none());

        let body = a.build_request_body(&req, true, true);
        assert_eq!(body["thinking"]["budget_tokens"], 2048);
    }

    #[test]
    fn test_tool_result_sent_as_user_message() {
        let a = AnthropicAdapter::new("test-key");
        let msg = AdapterMessage {
            role: "tool".to_string(),
            content: vec![AdapterContent::ToolResult {
                tool_call_id: "tc_1".to_string(),
                content: "{\"ok\":true}".to_string(),
                is_error: false,
            }],
        };

        let converted = a.convert_message(&msg).unwrap();
        assert_eq!(converted["role"], "user");
        assert_eq!(converted["content"][0]["type"], "tool_result");
        assert_eq!(converted["content"][0]["tool_use_id"], "tc_1");
    }

    #[test]
    fn test_parse_text_delta() {
        let mut blocks = HashMap::new();
        let event = AnthropicEvent::ContentBlockDelta {
            index: 0,
            delta: Delta::Text {
                text: "Hello".to_string(),
            },
        };

        let events = AnthropicAdapter::parse_sse_event(&event, &mut blocks);
        assert_eq!(events.len(), 1);
        match events[0].as_ref().unwrap() {
            RawEvent::TextDelta { delta } => assert_eq!(delta, "Hello"),
            other => panic!("Expected TextDelta, got: {other:?}"),
        }
    }

    #[test]
    fn test_tool_block_lifecycle() {
        let mut blocks = HashMap::new();

        let start = AnthropicEvent::ContentBlockStart {
            index: 1,
            content_block: ContentBlockInfo::ToolUse {
                id: "tc_1".to_string(),
                name: "lookup".to_string(),
            },
        };
        let events = AnthropicAdapter::parse_sse_event(&start, &mut blocks);
        assert!(matches!(
            events[0].as_ref().unwrap(),
            RawEvent::ToolCallStart { id, name } if id == "tc_1" && name == "lookup"
        ));

        let delta = AnthropicEvent::ContentBlockDelta {
            index: 1,
            delta: Delta::InputJson {
                partial_json: "{\"q\":".to_string(),
            },
        };
        let events = AnthropicAdapter::parse_sse_event(&delta, &mut blocks);
        assert!(matches!(
            events[0].as_ref().unwrap(),
            RawEvent::ToolCallDelta { id, delta } if id == "tc_1" && delta == "{\"q\":"
        ));

        let stop = AnthropicEvent::ContentBlockStop { index: 1 };
        let events = AnthropicAdapter::parse_sse_event(&stop, &mut blocks);
        assert!(matches!(
            events[0].as_ref().unwrap(),
            RawEvent::ToolCallEnd { id } if id == "tc_1"
        ));
        assert!(blocks.is_empty());
    }

    #[test]
    fn test_text_block_stop_emits_nothing() {
        let mut blocks = HashMap::new();
        blocks.insert(0, StreamBlock::Text);
        let stop = AnthropicEvent::ContentBlockStop { index: 0 };
        assert!(AnthropicAdapter::parse_sse_event(&stop, &mut blocks).is_empty());
    }

    #[test]
    fn test_message_delta_stop_reason() {
        let mut blocks = HashMap::new();
        let event = AnthropicEvent::MessageDelta {
            delta: MessageDeltaData {
                stop_reason: Some("tool_use".to_string()),
            },
            usage: Some(UsageData {
                input_tokens: Some(100),
                output_tokens: Some(200),
            }),
        };

        let events = AnthropicAdapter::parse_sse_event(&event, &mut blocks);
        assert_eq!(events.len(), 2); // Usage + Done
        assert!(matches!(
            events[1].as_ref().unwrap(),
            RawEvent::Done {
                reason: StopReason::ToolUse
            }
        ));
    }

    #[test]
    fn test_error_event_becomes_stream_error() {
        let mut blocks = HashMap::new();
        let event = AnthropicEvent::Error {
            error: ErrorData {
                error_type: "rate_limit".to_string(),
                message: "Too many requests".to_string(),
            },
        };

        let events = AnthropicAdapter::parse_sse_event(&event, &mut blocks);
        assert_eq!(events.len(), 1);
        match events[0].as_ref() {
            Err(AdapterError::Api(msg)) => assert!(msg.contains("rate_limit")),
            other => panic!("Expected Api error, got: {other:?}"),
        }
    }

    #[test]
    fn test_wire_event_deserialization() {
        let text_delta = r#"{"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":"Hello"}}"#;
        let event: AnthropicEvent = serde_json::from_str(text_delta).unwrap();
        assert!(matches!(
            event,
            AnthropicEvent::ContentBlockDelta {
                delta: Delta::Text { .. },
                ..
            }
        ));

        let tool_start = r#"{"type":"content_block_start","index":1,"content_block":{"type":"tool_use","id":"tc_1","name":"lookup"}}"#;
        let event: AnthropicEvent = serde_json::from_str(tool_start).unwrap();
        assert!(matches!(
            event,
            AnthropicEvent::ContentBlockStart {
                content_block: ContentBlockInfo::ToolUse { .. },
                ..
            }
        ));
    }

    #[test]
    fn test_sync_response_scans_blocks_for_tool_use() {
        let raw = r#"{
            "content": [
                {"type": "text", "text": "Checking."},
                {"type": "tool_use", "id": "tc_1", "name": "lookup", "input": {"q": "x"}}
            ],
            "stop_reason": "tool_use",
            "usage": {"input_tokens": 10, "output_tokens": 5}
        }"#;
        let resp: AnthropicResponse = serde_json::from_str(raw).unwrap();
        assert!(resp
            .content
            .iter()
            .any(|b| matches!(b, ResponseBlock::ToolUse { .. })));
    }

    #[tokio::test]
    async fn test_stalled_stream_times_out() {
        use tokio::io::AsyncReadExt;

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 1024];
            let _ = socket.read(&mut buf).await;
            // Hold the connection open without ever responding
            tokio::time::sleep(Duration::from_secs(60)).await;
        });

        let a = AnthropicAdapter::new("test-key")
            .with_base_url(format!("http://{addr}"))
            .with_read_timeout(Duration::from_millis(100));
        let err = match a.stream(request("claude-sonnet-4-20250514")).await {
            Ok(_) => panic!("expected stream to fail"),
            Err(e) => e,
        };
        assert!(matches!(err, AdapterError::Http(_)));
    }

    #[test]
    fn test_empty_response_tolerated() {
        let resp: AnthropicResponse = serde_json::from_str("{}").unwrap();
        assert!(resp.content.is_empty());
        assert!(resp.usage.input_tokens.is_none());
    }
}
