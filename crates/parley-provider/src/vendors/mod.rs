//! Vendor adapter implementations.

pub mod anthropic;
pub mod openai;
pub(crate) mod sse;
