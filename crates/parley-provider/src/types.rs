//! Common types shared by the adapter trait and the vendor implementations.

use serde::{Deserialize, Serialize};

/// A role-tagged message in vendor-neutral format.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdapterMessage {
    /// Message role (user, assistant, tool).
    pub role: String,
    /// Content blocks.
    pub content: Vec<AdapterContent>,
}

/// Content block in vendor-neutral format.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum AdapterContent {
    /// Plain text.
    #[serde(rename = "text")]
    Text { text: String },

    /// Model reasoning output.
    #[serde(rename = "thinking")]
    Thinking { thinking: String },

    /// Tool invocation requested by the model.
    #[serde(rename = "tool_call")]
    ToolCall {
        id: String,
        name: String,
        arguments: serde_json::Value,
    },

    /// Result of a tool invocation, fed back to the model.
    #[serde(rename = "tool_result")]
    ToolResult {
        tool_call_id: String,
        content: String,
        is_error: bool,
    },
}

/// Tool declaration passed to the vendor API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSchema {
    /// Tool name.
    pub name: String,
    /// Human-readable description.
    pub description: String,
    /// JSON Schema for the tool's arguments.
    pub parameters: serde_json::Value,
}

/// Reasoning/thinking options for models that support it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThinkingOptions {
    /// Budget in tokens for thinking.
    pub budget_tokens: usize,
}

/// Vendor-neutral request built by the orchestrator.
#[derive(Debug, Clone)]
pub struct AdapterRequest {
    /// Model identifier; must be in the adapter's known set.
    pub model: String,
    /// System prompt.
    pub system: Option<String>,
    /// Conversation messages.
    pub messages: Vec<AdapterMessage>,
    /// Available tools.
    pub tools: Vec<ToolSchema>,
    /// Maximum tokens in the response.
    pub max_tokens: Option<usize>,
    /// Thinking options; ignored for models without thinking support.
    pub thinking: Option<ThinkingOptions>,
}

/// A tool call requested by the model inside an assistant response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRequest {
    /// Vendor-assigned call id, echoed back with the result.
    pub id: String,
    /// Tool name.
    pub name: String,
    /// Argument object; opaque until validated by the dispatcher.
    pub arguments: serde_json::Value,
}

/// Token usage information.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Usage {
    /// Input tokens consumed.
    pub input_tokens: usize,
    /// Output tokens generated.
    pub output_tokens: usize,
}

/// Reason the model stopped generating.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// Normal end of response.
    EndTurn,
    /// Model wants to use a tool.
    ToolUse,
    /// Max tokens reached.
    MaxTokens,
    /// Stop sequence matched.
    StopSequence,
}

/// Non-streaming response, already normalized by the adapter.
#[derive(Debug, Clone)]
pub struct Completion {
    /// Content blocks in the response.
    pub content: Vec<AdapterContent>,
    /// Whether the model is asking for tool calls before it can finish.
    ///
    /// Each adapter derives this from its own wire signal so the caller
    /// never needs vendor knowledge.
    pub wants_tool_calls: bool,
    /// Token usage, when the vendor reports it.
    pub usage: Usage,
}

impl Completion {
    /// Concatenated text content of the response.
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(|block| match block {
                AdapterContent::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("")
    }

    /// Concatenated thinking content of the response.
    pub fn thinking(&self) -> String {
        self.content
            .iter()
            .filter_map(|block| match block {
                AdapterContent::Thinking { thinking } => Some(thinking.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("")
    }

    /// Tool calls requested by the model, in emission order.
    pub fn tool_calls(&self) -> Vec<ToolCallRequest> {
        self.content
            .iter()
            .filter_map(|block| match block {
                AdapterContent::ToolCall {
                    id,
                    name,
                    arguments,
                } => Some(ToolCallRequest {
                    id: id.clone(),
                    name: name.clone(),
                    arguments: arguments.clone(),
                }),
                _ => None,
            })
            .collect()
    }
}

/// Incremental primitives emitted by an adapter's stream translator.
///
/// These are still un-normalized with respect to block boundaries: text and
/// thinking arrive as bare deltas, and only tool calls carry explicit
/// start/end markers (where the vendor provides them).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RawEvent {
    /// A chunk of text output.
    TextDelta { delta: String },
    /// A chunk of thinking/reasoning output.
    ThinkingDelta { delta: String },
    /// Start of a tool call.
    ToolCallStart { id: String, name: String },
    /// Verbatim fragment of a tool call's JSON arguments.
    ToolCallDelta { id: String, delta: String },
    /// The vendor confirmed a tool call's arguments are complete.
    ToolCallEnd { id: String },
    /// Token usage update.
    Usage { input: usize, output: usize },
    /// Stream completed.
    Done { reason: StopReason },
}

/// Information about a model supported by an adapter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelInfo {
    /// Model identifier (e.g., "claude-sonnet-4-20250514").
    pub id: String,
    /// Human-readable model name.
    pub name: String,
    /// Maximum context window in tokens.
    pub context_window: usize,
    /// Maximum output tokens.
    pub max_output_tokens: usize,
    /// Whether the model supports extended thinking.
    pub supports_thinking: bool,
    /// Whether the model supports tool use.
    pub supports_tools: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_completion_text_joins_blocks() {
        let completion = Completion {
            content: vec![
                AdapterContent::Text {
                    text: "Hello ".to_string(),
                },
                AdapterContent::ToolCall {
                    id: "tc_1".to_string(),
                    name: "lookup".to_string(),
                    arguments: json!({}),
                },
                AdapterContent::Text {
                    text: "world".to_string(),
                },
            ],
            wants_tool_calls: true,
            usage: Usage::default(),
        };
        assert_eq!(completion.text(), "Hello world");
    }

    #[test]
    fn test_completion_tool_calls_preserve_order() {
        let completion = Completion {
            content: vec![
                AdapterContent::ToolCall {
                    id: "a".to_string(),
                    name: "first".to_string(),
                    arguments: json!({"x": 1}),
                },
                AdapterContent::ToolCall {
                    id: "b".to_string(),
                    name: "second".to_string(),
                    arguments: json!({}),
                },
            ],
            wants_tool_calls: true,
            usage: Usage::default(),
        };

        let calls = completion.tool_calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].name, "first");
        assert_eq!(calls[1].name, "second");
    }

    #[test]
    fn test_content_block_serialization() {
        let block = AdapterContent::ToolResult {
            tool_call_id: "tc_1".to_string(),
            content: "ok".to_string(),
            is_error: false,
        };
        let json = serde_json::to_string(&block).unwrap();
        assert!(json.contains("\"type\":\"tool_result\""));

        let back: AdapterContent = serde_json::from_str(&json).unwrap();
        assert_eq!(back, block);
    }
}
