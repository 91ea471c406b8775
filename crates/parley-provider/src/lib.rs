//! parley-provider: vendor adapter abstraction and implementations.

mod error;
pub mod traits;
pub mod types;
pub mod vendors;

pub use error::AdapterError;
pub use traits::Adapter;
pub use types::{
    AdapterContent, AdapterMessage, AdapterRequest, Completion, ModelInfo, RawEvent, StopReason,
    ThinkingOptions, ToolCallRequest, ToolSchema, Usage,
};
pub use vendors::anthropic::AnthropicAdapter;
pub use vendors::openai::OpenAiAdapter;
