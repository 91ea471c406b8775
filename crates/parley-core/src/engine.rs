//! The round loop: drive one turn from user message to final answer.
//!
//! The engine owns a vendor adapter and a tool dispatcher and runs rounds
//! until the model stops asking for tools, the round cap is hit, or the
//! consumer goes away.

use crate::error::EngineError;
use crate::event::TurnEvent;
use crate::message::{ContentBlock, Message, Role};
use crate::normalizer::{NormalizerOutput, StreamNormalizer};
use crate::transcript::{TranscriptAssembler, TranscriptBlock};
use crate::turn::Turn;
use futures::StreamExt;
use parley_provider::{
    Adapter, AdapterContent, AdapterMessage, AdapterRequest, ModelInfo, RawEvent, ThinkingOptions,
    ToolCallRequest, ToolSchema, Usage,
};
use parley_tools::ToolDispatcher;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Hard cap on model round trips within one turn.
///
/// A model that still wants tools at the cap gets its accumulated output
/// returned as the final answer instead of another round.
pub const MAX_ROUNDS: usize = 10;

const DEFAULT_MAX_TOKENS: usize = 4096;

/// Engine tunables.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Round cap; lowering it below [`MAX_ROUNDS`] is allowed, raising it is
    /// clamped.
    pub max_rounds: usize,
    /// Response token limit passed to the vendor.
    pub max_tokens: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_rounds: MAX_ROUNDS,
            max_tokens: DEFAULT_MAX_TOKENS,
        }
    }
}

/// Everything a finished turn produced.
#[derive(Debug)]
pub struct TurnOutcome {
    /// Final answer text, concatenated across rounds.
    pub text: String,
    /// Thinking output, concatenated across rounds.
    pub thinking: String,
    /// The full in-memory message list, in append order.
    pub messages: Vec<Message>,
    /// Ordered transcript blocks ready for persistence.
    pub blocks: Vec<TranscriptBlock>,
    /// Rounds actually executed.
    pub rounds: usize,
    /// Token usage summed across rounds.
    pub usage: Usage,
}

/// Turn orchestrator over one adapter and one dispatcher.
pub struct Engine {
    adapter: Arc<dyn Adapter>,
    dispatcher: ToolDispatcher,
    config: EngineConfig,
}

impl Engine {
    /// Create an engine with default configuration.
    pub fn new(adapter: Arc<dyn Adapter>, dispatcher: ToolDispatcher) -> Self {
        Self {
            adapter,
            dispatcher,
            config: EngineConfig::default(),
        }
    }

    /// Override the configuration.
    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    fn max_rounds(&self) -> usize {
        self.config.max_rounds.min(MAX_ROUNDS)
    }

    /// Check the turn against this engine's adapter before any network call.
    fn validate(&self, turn: &Turn) -> Result<ModelInfo, EngineError> {
        if let Some(ref vendor) = turn.vendor {
            if vendor != self.adapter.vendor() {
                return Err(EngineError::Config(format!(
                    "turn expects vendor '{vendor}' but this engine serves '{}'",
                    self.adapter.vendor()
                )));
            }
        }
        Ok(self.adapter.require_model(&turn.model)?)
    }

    /// Tools offered to the model, filtered to what this caller may use.
    fn offered_tools(&self, turn: &Turn) -> Vec<ToolSchema> {
        self.dispatcher
            .registry()
            .all()
            .into_iter()
            .filter(|spec| match &spec.category {
                Some(category) => parley_tools::category_allows(category, &turn.context),
                None => true,
            })
            .map(|spec| ToolSchema {
                name: spec.name.clone(),
                description: spec.description.clone(),
                parameters: spec.parameters.clone(),
            })
            .collect()
    }

    fn build_request(&self, turn: &Turn, model: &ModelInfo, messages: &[Message]) -> AdapterRequest {
        let thinking = match turn.thinking_budget {
            Some(budget_tokens) if model.supports_thinking => {
                Some(ThinkingOptions { budget_tokens })
            }
            Some(_) => {
                // Degrade by omission for models without thinking support
                tracing::debug!(model = %model.id, "thinking requested but unsupported; omitted");
                None
            }
            None => None,
        };

        AdapterRequest {
            model: turn.model.clone(),
            system: turn.instructions.clone(),
            messages: messages.iter().map(convert_message).collect(),
            tools: self.offered_tools(turn),
            max_tokens: Some(self.config.max_tokens),
            thinking,
        }
    }

    /// Run a turn without streaming.
    ///
    /// Tool calls within each response are dispatched sequentially, in the
    /// order the model emitted them, and their results are appended in that
    /// same order before the next round.
    pub async fn run(&self, turn: Turn) -> Result<TurnOutcome, EngineError> {
        let model = self.validate(&turn)?;

        let mut messages = vec![Message::user(&turn.user_text)];
        let mut blocks = Vec::new();
        let mut text = String::new();
        let mut thinking = String::new();
        let mut usage = Usage::default();

        for round in 1..=self.max_rounds() {
            let request = self.build_request(&turn, &model, &messages);
            let completion = self.adapter.complete(request).await?;

            usage.input_tokens += completion.usage.input_tokens;
            usage.output_tokens += completion.usage.output_tokens;
            text.push_str(&completion.text());
            thinking.push_str(&completion.thinking());

            messages.push(Message::assistant(
                completion.content.iter().map(convert_content).collect(),
            ));

            let calls = completion.tool_calls();
            if !completion.wants_tool_calls || calls.is_empty() {
                blocks.extend(completion_blocks(&completion.content, &HashMap::new()));
                return Ok(TurnOutcome {
                    text,
                    thinking,
                    messages,
                    blocks,
                    rounds: round,
                    usage,
                });
            }

            let mut results = HashMap::new();
            for call in &calls {
                let value = self
                    .dispatcher
                    .dispatch(&call.name, &turn.context, call.arguments.clone())
                    .await;
                let is_error = result_is_error(&value);
                let result = value.to_string();
                results.insert(call.id.clone(), result.clone());
                messages.push(Message::tool_result(&call.id, result, is_error));
            }
            blocks.extend(completion_blocks(&completion.content, &results));

            tracing::debug!(round, calls = calls.len(), "round complete, continuing");
        }

        tracing::warn!(
            max_rounds = self.max_rounds(),
            "round cap reached with tool calls still pending; forcing final answer"
        );
        Ok(TurnOutcome {
            text,
            thinking,
            messages,
            blocks,
            rounds: self.max_rounds(),
            usage,
        })
    }

    /// Run a turn, streaming canonical events into `sink`.
    ///
    /// The sequence carries matched block boundaries and ends with exactly
    /// one `done` or `error` event. A closed receiver aborts the turn with
    /// [`EngineError::Cancelled`] before any further vendor call.
    pub async fn run_stream(
        &self,
        turn: Turn,
        sink: mpsc::Sender<TurnEvent>,
    ) -> Result<TurnOutcome, EngineError> {
        let mut assembler = TranscriptAssembler::new();
        match self.stream_rounds(&turn, &sink, &mut assembler).await {
            Ok(outcome) => Ok(outcome),
            Err(EngineError::Cancelled) => Err(EngineError::Cancelled),
            Err(e) => {
                // Best effort: the consumer may already be gone
                let _ = sink
                    .send(TurnEvent::Error {
                        message: e.to_string(),
                    })
                    .await;
                Err(e)
            }
        }
    }

    async fn stream_rounds(
        &self,
        turn: &Turn,
        sink: &mpsc::Sender<TurnEvent>,
        assembler: &mut TranscriptAssembler,
    ) -> Result<TurnOutcome, EngineError> {
        let model = self.validate(turn)?;

        let mut messages = vec![Message::user(&turn.user_text)];
        let mut text = String::new();
        let mut thinking = String::new();
        let mut usage = Usage::default();
        let mut rounds = 0;

        for round in 1..=self.max_rounds() {
            rounds = round;
            let request = self.build_request(turn, &model, &messages);
            let mut stream = self.adapter.stream(request).await?;
            let mut normalizer = StreamNormalizer::new();
            // Calls dispatched this round, with their serialized results
            let mut round_calls: Vec<(ToolCallRequest, String, bool)> = Vec::new();

            while let Some(item) = stream.next().await {
                let raw = item?;
                if let RawEvent::Usage { input, output } = &raw {
                    usage.input_tokens += input;
                    usage.output_tokens += output;
                }
                for output in normalizer.feed(raw)? {
                    self.handle_output(output, turn, sink, assembler, &mut round_calls)
                        .await?;
                }
            }
            for output in normalizer.finish() {
                self.handle_output(output, turn, sink, assembler, &mut round_calls)
                    .await?;
            }

            text.push_str(normalizer.text());
            thinking.push_str(normalizer.thinking());

            let mut content = Vec::new();
            if !normalizer.thinking().is_empty() {
                content.push(ContentBlock::Thinking {
                    thinking: normalizer.thinking().to_string(),
                });
            }
            if !normalizer.text().is_empty() {
                content.push(ContentBlock::Text {
                    text: normalizer.text().to_string(),
                });
            }
            for (call, _, _) in &round_calls {
                content.push(ContentBlock::ToolCall {
                    id: call.id.clone(),
                    name: call.name.clone(),
                    arguments: call.arguments.clone(),
                });
            }
            messages.push(Message::assistant(content));

            if round_calls.is_empty() {
                forward(
                    sink,
                    assembler,
                    TurnEvent::Done {
                        text: text.clone(),
                        thinking: thinking.clone(),
                    },
                )
                .await?;
                return Ok(TurnOutcome {
                    text,
                    thinking,
                    messages,
                    blocks: std::mem::take(assembler).finalize(),
                    rounds,
                    usage,
                });
            }

            for (call, result, is_error) in round_calls {
                messages.push(Message::tool_result(&call.id, result, is_error));
            }
            tracing::debug!(round, "round complete, continuing");
        }

        tracing::warn!(
            max_rounds = self.max_rounds(),
            "round cap reached with tool calls still pending; forcing final answer"
        );
        forward(
            sink,
            assembler,
            TurnEvent::Done {
                text: text.clone(),
                thinking: thinking.clone(),
            },
        )
        .await?;
        Ok(TurnOutcome {
            text,
            thinking,
            messages,
            blocks: std::mem::take(assembler).finalize(),
            rounds,
            usage,
        })
    }

    /// Forward one normalizer output; a completed tool call is dispatched
    /// before any further stream input is consumed.
    async fn handle_output(
        &self,
        output: NormalizerOutput,
        turn: &Turn,
        sink: &mpsc::Sender<TurnEvent>,
        assembler: &mut TranscriptAssembler,
        round_calls: &mut Vec<(ToolCallRequest, String, bool)>,
    ) -> Result<(), EngineError> {
        match output {
            NormalizerOutput::Event(event) => forward(sink, assembler, event).await,
            NormalizerOutput::ToolReady(call) => {
                forward(
                    sink,
                    assembler,
                    TurnEvent::ToolStart {
                        name: call.name.clone(),
                    },
                )
                .await?;

                let value = self
                    .dispatcher
                    .dispatch(&call.name, &turn.context, call.arguments.clone())
                    .await;
                let is_error = result_is_error(&value);
                let result = value.to_string();

                forward(
                    sink,
                    assembler,
                    TurnEvent::ToolEnd {
                        name: call.name.clone(),
                        params: call.arguments.clone(),
                        result: result.clone(),
                    },
                )
                .await?;

                round_calls.push((call, result, is_error));
                Ok(())
            }
        }
    }
}

/// Send one event to the live consumer and fold it into the transcript.
///
/// A send failure means the receiver was dropped; the turn is cancelled.
async fn forward(
    sink: &mpsc::Sender<TurnEvent>,
    assembler: &mut TranscriptAssembler,
    event: TurnEvent,
) -> Result<(), EngineError> {
    assembler.consume(&event);
    sink.send(event).await.map_err(|_| EngineError::Cancelled)
}

fn result_is_error(value: &serde_json::Value) -> bool {
    value
        .as_object()
        .map(|map| map.contains_key("error"))
        .unwrap_or(false)
}

fn convert_message(message: &Message) -> AdapterMessage {
    AdapterMessage {
        role: match message.role {
            Role::User => "user".to_string(),
            Role::Assistant => "assistant".to_string(),
            Role::Tool => "tool".to_string(),
        },
        content: message.content.iter().map(convert_block).collect(),
    }
}

fn convert_block(block: &ContentBlock) -> AdapterContent {
    match block {
        ContentBlock::Text { text } => AdapterContent::Text { text: text.clone() },
        ContentBlock::Thinking { thinking } => AdapterContent::Thinking {
            thinking: thinking.clone(),
        },
        ContentBlock::ToolCall {
            id,
            name,
            arguments,
        } => AdapterContent::ToolCall {
            id: id.clone(),
            name: name.clone(),
            arguments: arguments.clone(),
        },
        ContentBlock::ToolResult {
            tool_call_id,
            content,
            is_error,
        } => AdapterContent::ToolResult {
            tool_call_id: tool_call_id.clone(),
            content: content.clone(),
            is_error: *is_error,
        },
    }
}

fn convert_content(content: &AdapterContent) -> ContentBlock {
    match content {
        AdapterContent::Text { text } => ContentBlock::Text { text: text.clone() },
        AdapterContent::Thinking { thinking } => ContentBlock::Thinking {
            thinking: thinking.clone(),
        },
        AdapterContent::ToolCall {
            id,
            name,
            arguments,
        } => ContentBlock::ToolCall {
            id: id.clone(),
            name: name.clone(),
            arguments: arguments.clone(),
        },
        AdapterContent::ToolResult {
            tool_call_id,
            content,
            is_error,
        } => ContentBlock::ToolResult {
            tool_call_id: tool_call_id.clone(),
            content: content.clone(),
            is_error: *is_error,
        },
    }
}

/// Transcript blocks for one non-streaming completion, in content order.
fn completion_blocks(
    content: &[AdapterContent],
    results: &HashMap<String, String>,
) -> Vec<TranscriptBlock> {
    content
        .iter()
        .filter_map(|block| match block {
            AdapterContent::Text { text } => Some(TranscriptBlock::Text {
                content: text.clone(),
                is_complete: true,
            }),
            AdapterContent::Thinking { thinking } => Some(TranscriptBlock::Thinking {
                content: thinking.clone(),
                is_complete: true,
            }),
            AdapterContent::ToolCall {
                id,
                name,
                arguments,
            } => Some(TranscriptBlock::ToolCall {
                name: name.clone(),
                params: arguments.clone(),
                result: results.get(id).cloned(),
                is_complete: results.contains_key(id),
            }),
            AdapterContent::ToolResult { .. } => None,
        })
        .collect()
}
