//! Reassembles the canonical event sequence into ordered content blocks.
//!
//! Blocks are accumulated in memory during the stream and handed off whole at
//! turn completion; persistence itself lives outside this crate.

use crate::event::TurnEvent;
use serde::{Deserialize, Serialize};

/// A persisted unit of a finished turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TranscriptBlock {
    /// Assistant text.
    Text {
        content: String,
        #[serde(rename = "isComplete")]
        is_complete: bool,
    },
    /// Assistant reasoning.
    Thinking {
        content: String,
        #[serde(rename = "isComplete")]
        is_complete: bool,
    },
    /// A tool call with its eventual result.
    ToolCall {
        name: String,
        params: serde_json::Value,
        result: Option<String>,
        #[serde(rename = "isComplete")]
        is_complete: bool,
    },
}

/// Which open block kind the current accumulator points at.
#[derive(Debug, Clone, Copy, PartialEq)]
enum OpenKind {
    Text,
    Thinking,
}

/// Folds canonical events into an ordered block list.
///
/// Mirrors the normalizer's open/close discipline: at most one text or
/// thinking block is open at a time.
#[derive(Debug, Default)]
pub struct TranscriptAssembler {
    blocks: Vec<TranscriptBlock>,
    open: Option<(OpenKind, usize)>,
}

impl TranscriptAssembler {
    /// Create an empty assembler.
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one event into the block list.
    pub fn consume(&mut self, event: &TurnEvent) {
        match event {
            TurnEvent::ContentStart => {
                self.blocks.push(TranscriptBlock::Text {
                    content: String::new(),
                    is_complete: false,
                });
                self.open = Some((OpenKind::Text, self.blocks.len() - 1));
            }
            TurnEvent::Content { text } => {
                if let Some((OpenKind::Text, idx)) = self.open {
                    if let TranscriptBlock::Text { content, .. } = &mut self.blocks[idx] {
                        content.push_str(text);
                    }
                }
            }
            TurnEvent::ContentEnd => self.close_open(OpenKind::Text),

            TurnEvent::ThinkingStart => {
                self.blocks.push(TranscriptBlock::Thinking {
                    content: String::new(),
                    is_complete: false,
                });
                self.open = Some((OpenKind::Thinking, self.blocks.len() - 1));
            }
            TurnEvent::Thinking { text } => {
                if let Some((OpenKind::Thinking, idx)) = self.open {
                    if let TranscriptBlock::Thinking { content, .. } = &mut self.blocks[idx] {
                        content.push_str(text);
                    }
                }
            }
            TurnEvent::ThinkingEnd => self.close_open(OpenKind::Thinking),

            // Appended when the call is initiated so transcript order
            // reflects when it started, not when it finished
            TurnEvent::ToolStart { name } => {
                self.blocks.push(TranscriptBlock::ToolCall {
                    name: name.clone(),
                    params: serde_json::Value::Null,
                    result: None,
                    is_complete: false,
                });
            }
            TurnEvent::ToolEnd {
                name,
                params,
                result,
            } => {
                // Nearest incomplete call with this name, scanning backward
                for block in self.blocks.iter_mut().rev() {
                    if let TranscriptBlock::ToolCall {
                        name: block_name,
                        params: block_params,
                        result: block_result,
                        is_complete,
                    } = block
                    {
                        if !*is_complete && block_name == name {
                            *block_params = params.clone();
                            *block_result = Some(result.clone());
                            *is_complete = true;
                            break;
                        }
                    }
                }
            }

            TurnEvent::Done { .. } => {
                // A stream may end without an explicit block close; keep the
                // accumulated text rather than discarding it
                if let Some((kind, _)) = self.open {
                    self.close_open(kind);
                }
            }
            TurnEvent::Error { .. } => {}
        }
    }

    /// Hand off the assembled blocks.
    pub fn finalize(self) -> Vec<TranscriptBlock> {
        self.blocks
    }

    fn close_open(&mut self, kind: OpenKind) {
        if let Some((open_kind, idx)) = self.open.take() {
            if open_kind != kind {
                self.open = Some((open_kind, idx));
                return;
            }
            match &mut self.blocks[idx] {
                TranscriptBlock::Text { is_complete, .. }
                | TranscriptBlock::Thinking { is_complete, .. } => *is_complete = true,
                TranscriptBlock::ToolCall { .. } => {}
            }
        }
    }
}
