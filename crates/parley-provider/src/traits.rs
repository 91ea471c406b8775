//! Adapter trait definition.

use crate::error::AdapterError;
use crate::types::{AdapterRequest, Completion, ModelInfo, RawEvent};
use async_trait::async_trait;
use futures::stream::BoxStream;

/// Trait for vendor adapter implementations.
///
/// An adapter owns the mapping between the vendor-neutral request shape and
/// one vendor's wire format, in both directions. The orchestrator holds a
/// `dyn Adapter` and never branches on the vendor.
#[async_trait]
pub trait Adapter: Send + Sync {
    /// Vendor identifier (e.g., "anthropic", "openai").
    fn vendor(&self) -> &str;

    /// Models this adapter knows how to call.
    fn models(&self) -> Vec<ModelInfo>;

    /// Look up a known model, or fail locally without a network round trip.
    fn require_model(&self, model: &str) -> Result<ModelInfo, AdapterError> {
        self.models()
            .into_iter()
            .find(|m| m.id == model)
            .ok_or_else(|| AdapterError::UnknownModel(model.to_string()))
    }

    /// Send a non-streaming request and return the normalized response.
    async fn complete(&self, request: AdapterRequest) -> Result<Completion, AdapterError>;

    /// Send a streaming request.
    ///
    /// Returns incremental `RawEvent`s as the model generates its response.
    async fn stream(
        &self,
        request: AdapterRequest,
    ) -> Result<BoxStream<'_, Result<RawEvent, AdapterError>>, AdapterError>;
}

// Compile-time check: Adapter must be object-safe
const _: () = {
    fn _assert_object_safe(_: &dyn Adapter) {}
};
