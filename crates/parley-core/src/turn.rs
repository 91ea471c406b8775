//! One user turn, created at request entry and discarded at completion.

use parley_tools::ToolCallContext;

/// Everything the engine needs to drive one user message to a final answer.
#[derive(Debug, Clone)]
pub struct Turn {
    /// System prompt text.
    pub instructions: Option<String>,
    /// The user's message.
    pub user_text: String,
    /// Selected model identifier.
    pub model: String,
    /// Expected vendor; rejected if it does not match the engine's adapter.
    pub vendor: Option<String>,
    /// Thinking budget in tokens, for models that support it.
    pub thinking_budget: Option<usize>,
    /// Server-injected caller context for tool dispatch.
    pub context: ToolCallContext,
}

impl Turn {
    /// Create a turn for the given model and user message.
    pub fn new(model: impl Into<String>, user_text: impl Into<String>) -> Self {
        Self {
            instructions: None,
            user_text: user_text.into(),
            model: model.into(),
            vendor: None,
            thinking_budget: None,
            context: ToolCallContext::default(),
        }
    }

    /// Set the system prompt.
    pub fn with_instructions(mut self, instructions: impl Into<String>) -> Self {
        self.instructions = Some(instructions.into());
        self
    }

    /// Pin the expected vendor.
    pub fn with_vendor(mut self, vendor: impl Into<String>) -> Self {
        self.vendor = Some(vendor.into());
        self
    }

    /// Request extended thinking with the given token budget.
    pub fn with_thinking_budget(mut self, budget_tokens: usize) -> Self {
        self.thinking_budget = Some(budget_tokens);
        self
    }

    /// Attach the caller context used for tool dispatch.
    pub fn with_context(mut self, context: ToolCallContext) -> Self {
        self.context = context;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder() {
        let turn = Turn::new("gpt-4o", "hello")
            .with_instructions("be brief")
            .with_vendor("openai")
            .with_thinking_budget(2048);

        assert_eq!(turn.model, "gpt-4o");
        assert_eq!(turn.user_text, "hello");
        assert_eq!(turn.instructions.as_deref(), Some("be brief"));
        assert_eq!(turn.vendor.as_deref(), Some("openai"));
        assert_eq!(turn.thinking_budget, Some(2048));
    }
}
