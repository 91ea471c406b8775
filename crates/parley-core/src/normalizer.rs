//! Normalizes adapter stream primitives into canonical events.
//!
//! One normalizer instance covers one vendor response (one round). Block
//! boundaries are synthesized from delta-kind transitions, so the emitted
//! sequence always has matched, non-interleaved start/end pairs.

use crate::error::EngineError;
use crate::event::TurnEvent;
use parley_provider::{RawEvent, ToolCallRequest};
use serde_json::json;

/// What the normalizer currently has open.
#[derive(Debug)]
enum BlockState {
    Idle,
    Text,
    Thinking,
    Tool(PendingCall),
}

/// A tool call whose argument fragments are still arriving.
#[derive(Debug)]
struct PendingCall {
    id: String,
    name: String,
    fragments: String,
}

/// One unit of normalizer output.
#[derive(Debug)]
pub enum NormalizerOutput {
    /// A canonical event to forward and assemble.
    Event(TurnEvent),
    /// A tool call whose arguments are confirmed complete; the caller must
    /// dispatch it before consuming further stream input.
    ToolReady(ToolCallRequest),
}

/// Stateful translator from `RawEvent`s to canonical events.
#[derive(Debug, Default)]
pub struct StreamNormalizer {
    state: BlockState,
    text: String,
    thinking: String,
}

impl Default for BlockState {
    fn default() -> Self {
        BlockState::Idle
    }
}

impl StreamNormalizer {
    /// Create a normalizer for one vendor response.
    pub fn new() -> Self {
        Self::default()
    }

    /// Full text accumulated from this response so far.
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Full thinking accumulated from this response so far.
    pub fn thinking(&self) -> &str {
        &self.thinking
    }

    /// Consume one stream primitive; returns zero or more outputs.
    pub fn feed(&mut self, raw: RawEvent) -> Result<Vec<NormalizerOutput>, EngineError> {
        let mut out = Vec::new();

        match raw {
            RawEvent::TextDelta { delta } => {
                match self.state {
                    BlockState::Text => {}
                    BlockState::Idle => {
                        self.state = BlockState::Text;
                        out.push(NormalizerOutput::Event(TurnEvent::ContentStart));
                    }
                    BlockState::Thinking => {
                        self.state = BlockState::Text;
                        out.push(NormalizerOutput::Event(TurnEvent::ThinkingEnd));
                        out.push(NormalizerOutput::Event(TurnEvent::ContentStart));
                    }
                    BlockState::Tool(_) => {
                        return Err(EngineError::Protocol(
                            "text delta while a tool call is open".to_string(),
                        ));
                    }
                }
                self.text.push_str(&delta);
                out.push(NormalizerOutput::Event(TurnEvent::Content { text: delta }));
            }

            RawEvent::ThinkingDelta { delta } => {
                match self.state {
                    BlockState::Thinking => {}
                    BlockState::Idle => {
                        self.state = BlockState::Thinking;
                        out.push(NormalizerOutput::Event(TurnEvent::ThinkingStart));
                    }
                    BlockState::Text => {
                        self.state = BlockState::Thinking;
                        out.push(NormalizerOutput::Event(TurnEvent::ContentEnd));
                        out.push(NormalizerOutput::Event(TurnEvent::ThinkingStart));
                    }
                    BlockState::Tool(_) => {
                        return Err(EngineError::Protocol(
                            "thinking delta while a tool call is open".to_string(),
                        ));
                    }
                }
                self.thinking.push_str(&delta);
                out.push(NormalizerOutput::Event(TurnEvent::Thinking { text: delta }));
            }

            RawEvent::ToolCallStart { id, name } => {
                match std::mem::replace(&mut self.state, BlockState::Idle) {
                    BlockState::Idle => {}
                    BlockState::Text => {
                        out.push(NormalizerOutput::Event(TurnEvent::ContentEnd));
                    }
                    BlockState::Thinking => {
                        out.push(NormalizerOutput::Event(TurnEvent::ThinkingEnd));
                    }
                    BlockState::Tool(pending) => {
                        return Err(EngineError::Protocol(format!(
                            "tool call '{}' started while '{}' is open",
                            name, pending.name
                        )));
                    }
                }
                self.state = BlockState::Tool(PendingCall {
                    id,
                    name,
                    fragments: String::new(),
                });
            }

            RawEvent::ToolCallDelta { id, delta } => match &mut self.state {
                BlockState::Tool(pending) if pending.id == id || id.is_empty() => {
                    // Fragments are concatenated verbatim; parsed once on end
                    pending.fragments.push_str(&delta);
                }
                _ => {
                    tracing::warn!(call_id = %id, "ignoring stray tool argument fragment");
                }
            },

            RawEvent::ToolCallEnd { id } => match std::mem::replace(&mut self.state, BlockState::Idle)
            {
                BlockState::Tool(pending) => {
                    out.push(NormalizerOutput::ToolReady(finalize(pending)));
                }
                other => {
                    self.state = other;
                    return Err(EngineError::Protocol(format!(
                        "tool call '{id}' ended without a matching start"
                    )));
                }
            },

            // Usage and terminal markers carry no block content
            RawEvent::Usage { .. } | RawEvent::Done { .. } => {}
        }

        Ok(out)
    }

    /// Close whatever is still open at end of stream.
    ///
    /// A dangling tool call (a vendor with no explicit per-call terminator)
    /// is treated as complete here.
    pub fn finish(&mut self) -> Vec<NormalizerOutput> {
        match std::mem::replace(&mut self.state, BlockState::Idle) {
            BlockState::Idle => vec![],
            BlockState::Text => vec![NormalizerOutput::Event(TurnEvent::ContentEnd)],
            BlockState::Thinking => vec![NormalizerOutput::Event(TurnEvent::ThinkingEnd)],
            BlockState::Tool(pending) => vec![NormalizerOutput::ToolReady(finalize(pending))],
        }
    }
}

/// Parse the accumulated fragments; malformed arguments degrade to `{}`.
fn finalize(pending: PendingCall) -> ToolCallRequest {
    let arguments = if pending.fragments.trim().is_empty() {
        json!({})
    } else {
        serde_json::from_str(&pending.fragments).unwrap_or_else(|_| {
            tracing::warn!(
                tool = %pending.name,
                "malformed tool arguments; dispatching with empty object"
            );
            json!({})
        })
    };

    ToolCallRequest {
        id: pending.id,
        name: pending.name,
        arguments,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn events(outputs: &[NormalizerOutput]) -> Vec<&TurnEvent> {
        outputs
            .iter()
            .filter_map(|o| match o {
                NormalizerOutput::Event(e) => Some(e),
                NormalizerOutput::ToolReady(_) => None,
            })
            .collect()
    }

    #[test]
    fn test_text_block_synthesized() {
        let mut n = StreamNormalizer::new();
        let out = n
            .feed(RawEvent::TextDelta {
                delta: "Hello ".to_string(),
            })
            .unwrap();
        assert_eq!(
            events(&out),
            vec![
                &TurnEvent::ContentStart,
                &TurnEvent::Content {
                    text: "Hello ".to_string()
                }
            ]
        );

        // Continuation stays inside the open block
        let out = n
            .feed(RawEvent::TextDelta {
                delta: "world".to_string(),
            })
            .unwrap();
        assert_eq!(
            events(&out),
            vec![&TurnEvent::Content {
                text: "world".to_string()
            }]
        );
        assert_eq!(n.text(), "Hello world");

        assert!(matches!(
            n.finish().as_slice(),
            [NormalizerOutput::Event(TurnEvent::ContentEnd)]
        ));
    }

    #[test]
    fn test_text_closes_before_thinking_opens() {
        let mut n = StreamNormalizer::new();
        n.feed(RawEvent::TextDelta {
            delta: "a".to_string(),
        })
        .unwrap();
        let out = n
            .feed(RawEvent::ThinkingDelta {
                delta: "hmm".to_string(),
            })
            .unwrap();

        assert_eq!(
            events(&out),
            vec![
                &TurnEvent::ContentEnd,
                &TurnEvent::ThinkingStart,
                &TurnEvent::Thinking {
                    text: "hmm".to_string()
                }
            ]
        );
        assert_eq!(n.thinking(), "hmm");
    }

    #[test]
    fn test_tool_call_accumulates_fragments() {
        let mut n = StreamNormalizer::new();
        n.feed(RawEvent::ToolCallStart {
            id: "tc_1".to_string(),
            name: "lookup".to_string(),
        })
        .unwrap();
        n.feed(RawEvent::ToolCallDelta {
            id: "tc_1".to_string(),
            delta: "{\"q\":".to_string(),
        })
        .unwrap();
        n.feed(RawEvent::ToolCallDelta {
            id: String::new(), // continuation with no id
            delta: "\"x\"}".to_string(),
        })
        .unwrap();

        let out = n
            .feed(RawEvent::ToolCallEnd {
                id: "tc_1".to_string(),
            })
            .unwrap();
        match &out[0] {
            NormalizerOutput::ToolReady(call) => {
                assert_eq!(call.name, "lookup");
                assert_eq!(call.arguments, json!({"q": "x"}));
            }
            other => panic!("Expected ToolReady, got {other:?}"),
        }
    }

    #[test]
    fn test_malformed_fragments_become_empty_object() {
        let mut n = StreamNormalizer::new();
        n.feed(RawEvent::ToolCallStart {
            id: "tc_1".to_string(),
            name: "lookup".to_string(),
        })
        .unwrap();
        n.feed(RawEvent::ToolCallDelta {
            id: "tc_1".to_string(),
            delta: "{\"q\": ".to_string(), // truncated
        })
        .unwrap();

        let out = n
            .feed(RawEvent::ToolCallEnd {
                id: "tc_1".to_string(),
            })
            .unwrap();
        match &out[0] {
            NormalizerOutput::ToolReady(call) => assert_eq!(call.arguments, json!({})),
            other => panic!("Expected ToolReady, got {other:?}"),
        }
    }

    #[test]
    fn test_text_block_closed_before_tool_starts() {
        let mut n = StreamNormalizer::new();
        n.feed(RawEvent::TextDelta {
            delta: "checking".to_string(),
        })
        .unwrap();
        let out = n
            .feed(RawEvent::ToolCallStart {
                id: "tc_1".to_string(),
                name: "lookup".to_string(),
            })
            .unwrap();
        assert_eq!(events(&out), vec![&TurnEvent::ContentEnd]);
    }

    #[test]
    fn test_end_without_start_is_protocol_error() {
        let mut n = StreamNormalizer::new();
        let err = n
            .feed(RawEvent::ToolCallEnd {
                id: "tc_1".to_string(),
            })
            .unwrap_err();
        assert!(matches!(err, EngineError::Protocol(_)));
    }

    #[test]
    fn test_text_during_open_tool_is_protocol_error() {
        let mut n = StreamNormalizer::new();
        n.feed(RawEvent::ToolCallStart {
            id: "tc_1".to_string(),
            name: "lookup".to_string(),
        })
        .unwrap();
        let err = n
            .feed(RawEvent::TextDelta {
                delta: "nope".to_string(),
            })
            .unwrap_err();
        assert!(matches!(err, EngineError::Protocol(_)));
    }

    #[test]
    fn test_finish_flushes_dangling_tool_call() {
        let mut n = StreamNormalizer::new();
        n.feed(RawEvent::ToolCallStart {
            id: "tc_1".to_string(),
            name: "lookup".to_string(),
        })
        .unwrap();
        n.feed(RawEvent::ToolCallDelta {
            id: "tc_1".to_string(),
            delta: "{}".to_string(),
        })
        .unwrap();

        let out = n.finish();
        assert!(matches!(&out[0], NormalizerOutput::ToolReady(call) if call.name == "lookup"));
    }

    #[test]
    fn test_empty_fragments_become_empty_object() {
        let mut n = StreamNormalizer::new();
        n.feed(RawEvent::ToolCallStart {
            id: "tc_1".to_string(),
            name: "lookup".to_string(),
        })
        .unwrap();
        let out = n
            .feed(RawEvent::ToolCallEnd {
                id: "tc_1".to_string(),
            })
            .unwrap();
        assert!(matches!(
            &out[0],
            NormalizerOutput::ToolReady(call) if call.arguments == json!({})
        ));
    }
}
