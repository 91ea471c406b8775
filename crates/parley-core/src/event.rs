//! Canonical event taxonomy for the streaming path.
//!
//! Exactly one producer per turn emits these; the live transport and the
//! transcript assembler both consume the same ordered sequence.

use serde::{Deserialize, Serialize};

/// A vendor-neutral incremental event.
///
/// Every `*_start` is followed by exactly one matching `*_end` before a block
/// of a different type may open; a turn's sequence ends with exactly one
/// `done` or `error`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TurnEvent {
    /// A text block opened.
    ContentStart,
    /// A chunk of text inside the open text block.
    Content { text: String },
    /// The open text block closed.
    ContentEnd,
    /// A thinking block opened.
    ThinkingStart,
    /// A chunk of reasoning inside the open thinking block.
    Thinking { text: String },
    /// The open thinking block closed.
    ThinkingEnd,
    /// A tool call is about to run.
    ToolStart { name: String },
    /// The tool call finished; result is the JSON-stringified payload.
    ToolEnd {
        name: String,
        params: serde_json::Value,
        result: String,
    },
    /// The turn aborted.
    Error { message: String },
    /// The turn finished; carries the full accumulated text and thinking.
    Done { text: String, thinking: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_tags_are_snake_case() {
        let json = serde_json::to_string(&TurnEvent::ContentStart).unwrap();
        assert_eq!(json, r#"{"type":"content_start"}"#);

        let json = serde_json::to_string(&TurnEvent::ToolStart {
            name: "lookup".to_string(),
        })
        .unwrap();
        assert!(json.contains(r#""type":"tool_start""#));

        let json = serde_json::to_string(&TurnEvent::Done {
            text: "hi".to_string(),
            thinking: String::new(),
        })
        .unwrap();
        assert!(json.contains(r#""type":"done""#));
    }

    #[test]
    fn test_round_trip() {
        let event = TurnEvent::ToolEnd {
            name: "lookup".to_string(),
            params: serde_json::json!({"q": "x"}),
            result: "{\"ok\":true}".to_string(),
        };
        let json = serde_json::to_string(&event).unwrap();
        let back: TurnEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(back, event);
    }
}
