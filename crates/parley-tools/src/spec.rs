//! Tool definitions: schema, access declaration, and executor capability.

use crate::error::ToolError;
use futures::future::BoxFuture;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

/// A synchronous executor; runs on a blocking worker when dispatched from an
/// async context.
pub type SyncExecutor = Arc<dyn Fn(Value) -> Result<Value, ToolError> + Send + Sync>;

/// An asynchronous executor; awaited directly.
pub type AsyncExecutor =
    Arc<dyn Fn(Value) -> BoxFuture<'static, Result<Value, ToolError>> + Send + Sync>;

/// Execution capability, declared up front rather than probed at call time.
#[derive(Clone)]
pub enum Executor {
    Sync(SyncExecutor),
    Async(AsyncExecutor),
}

impl fmt::Debug for Executor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Executor::Sync(_) => f.write_str("Executor::Sync"),
            Executor::Async(_) => f.write_str("Executor::Async"),
        }
    }
}

/// Everything the registry knows about one tool.
#[derive(Debug, Clone)]
pub struct ToolSpec {
    /// Machine-readable tool name (e.g., "lookup_record").
    pub name: String,
    /// Description offered to the model.
    pub description: String,
    /// JSON Schema for the tool's arguments.
    pub parameters: Value,
    /// Access category the caller must satisfy, if any.
    pub category: Option<String>,
    /// Whether the caller's user id is merged into the arguments.
    pub needs_user_id: bool,
    /// Whether the active conversation id is merged into the arguments.
    pub needs_conversation_id: bool,
    /// The executor and its declared capability.
    pub executor: Executor,
}

impl ToolSpec {
    /// Define a tool with a synchronous executor.
    pub fn sync<F>(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: Value,
        executor: F,
    ) -> Self
    where
        F: Fn(Value) -> Result<Value, ToolError> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
            category: None,
            needs_user_id: false,
            needs_conversation_id: false,
            executor: Executor::Sync(Arc::new(executor)),
        }
    }

    /// Define a tool with an asynchronous executor.
    pub fn asynchronous<F>(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: Value,
        executor: F,
    ) -> Self
    where
        F: Fn(Value) -> BoxFuture<'static, Result<Value, ToolError>> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
            category: None,
            needs_user_id: false,
            needs_conversation_id: false,
            executor: Executor::Async(Arc::new(executor)),
        }
    }

    /// Require an access category.
    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    /// Declare that the executor receives the caller's user id.
    pub fn needs_user_id(mut self) -> Self {
        self.needs_user_id = true;
        self
    }

    /// Declare that the executor receives the active conversation id.
    pub fn needs_conversation_id(mut self) -> Self {
        self.needs_conversation_id = true;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_sync_spec_defaults() {
        let spec = ToolSpec::sync("echo", "Echo back", json!({"type": "object"}), |args| {
            Ok(args)
        });
        assert_eq!(spec.name, "echo");
        assert!(spec.category.is_none());
        assert!(!spec.needs_user_id);
        assert!(matches!(spec.executor, Executor::Sync(_)));
    }

    #[test]
    fn test_async_executor_invocation() {
        use futures::FutureExt;

        let spec = ToolSpec::asynchronous(
            "lookup",
            "Async lookup",
            json!({"type": "object"}),
            |args| async move { Ok(json!({"found": args["q"]})) }.boxed(),
        );
        let Executor::Async(exec) = &spec.executor else {
            panic!("Expected async executor");
        };
        let result = tokio_test::block_on(exec(json!({"q": "x"}))).unwrap();
        assert_eq!(result, json!({"found": "x"}));
    }

    #[test]
    fn test_builder_flags() {
        let spec = ToolSpec::sync("save", "Save", json!({"type": "object"}), |args| Ok(args))
            .with_category("memory")
            .needs_user_id()
            .needs_conversation_id();
        assert_eq!(spec.category.as_deref(), Some("memory"));
        assert!(spec.needs_user_id);
        assert!(spec.needs_conversation_id);
    }
}
