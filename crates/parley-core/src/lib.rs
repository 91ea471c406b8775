//! parley-core: turn orchestration over a vendor adapter.

pub mod engine;
mod error;
pub mod event;
pub mod message;
pub mod normalizer;
pub mod transcript;
pub mod turn;

pub use engine::{Engine, EngineConfig, TurnOutcome, MAX_ROUNDS};
pub use error::EngineError;
pub use event::TurnEvent;
pub use message::{ContentBlock, Message, MessageId, Role};
pub use normalizer::{NormalizerOutput, StreamNormalizer};
pub use transcript::{TranscriptAssembler, TranscriptBlock};
pub use turn::Turn;
