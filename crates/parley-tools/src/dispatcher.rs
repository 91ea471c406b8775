//! Tool dispatch: lookup, access check, context injection, execution.

use crate::access::{category_allows, ToolCallContext};
use crate::registry::ToolRegistry;
use crate::spec::Executor;
use serde_json::{json, Map, Value};

/// Misuse of the blocking entry point.
///
/// Distinct from tool failures, which are returned as data; this one means
/// the calling code itself is wrong.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    /// `dispatch_blocking` was called from inside the async runtime.
    #[error("refusing to block on tool '{0}' from inside the async runtime")]
    WouldDeadlock(String),

    /// The private blocking runtime could not be built.
    #[error("failed to start blocking runtime: {0}")]
    Runtime(#[from] std::io::Error),
}

/// Resolves tool names to executors and runs them.
///
/// Every outcome, including failure, is returned as a JSON value so the model
/// can read the error and decide how to respond; nothing here aborts a turn.
#[derive(Clone)]
pub struct ToolDispatcher {
    registry: ToolRegistry,
}

impl ToolDispatcher {
    /// Create a dispatcher over the given registry.
    pub fn new(registry: ToolRegistry) -> Self {
        Self { registry }
    }

    /// The registry this dispatcher resolves against.
    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    /// Dispatch one tool call.
    ///
    /// The access check is defense-in-depth: the caller is expected to have
    /// filtered the tool list offered to the model, but the model can name
    /// any tool regardless of what was offered.
    pub async fn dispatch(&self, name: &str, ctx: &ToolCallContext, args: Value) -> Value {
        let Some(spec) = self.registry.get(name) else {
            return json!({"error": format!("Tool '{name}' not found.")});
        };

        if let Some(ref category) = spec.category {
            if !category_allows(category, ctx) {
                tracing::warn!(tool = name, role = %ctx.role, "access denied");
                return json!({
                    "error": format!(
                        "Permission denied: tool '{name}' requires the '{category}' category."
                    )
                });
            }
        }

        let args = self.inject_context(&spec, ctx, args);

        tracing::debug!(tool = name, "dispatching");

        let result = match &spec.executor {
            Executor::Sync(exec) => {
                let exec = exec.clone();
                let run = tokio::task::spawn_blocking(move || exec(args));
                match tokio::time::timeout(ctx.timeout, run).await {
                    Ok(Ok(result)) => result,
                    Ok(Err(join_err)) => {
                        Err(crate::ToolError::Execution(format!(
                            "executor panicked: {join_err}"
                        )))
                    }
                    Err(_) => Err(crate::ToolError::Timeout(ctx.timeout)),
                }
            }
            Executor::Async(exec) => match tokio::time::timeout(ctx.timeout, exec(args)).await {
                Ok(result) => result,
                Err(_) => Err(crate::ToolError::Timeout(ctx.timeout)),
            },
        };

        match result {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!(tool = name, error = %e, "tool execution failed");
                json!({"error": e.to_string()})
            }
        }
    }

    /// Dispatch from synchronous code.
    ///
    /// Fails loudly rather than deadlocking when called from a thread that is
    /// already driving the async runtime.
    pub fn dispatch_blocking(
        &self,
        name: &str,
        ctx: &ToolCallContext,
        args: Value,
    ) -> Result<Value, DispatchError> {
        if tokio::runtime::Handle::try_current().is_ok() {
            return Err(DispatchError::WouldDeadlock(name.to_string()));
        }

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        Ok(runtime.block_on(self.dispatch(name, ctx, args)))
    }

    /// Merge only the context fields this tool declares it needs.
    fn inject_context(
        &self,
        spec: &crate::ToolSpec,
        ctx: &ToolCallContext,
        args: Value,
    ) -> Value {
        // Malformed argument payloads from the model degrade to an empty map
        let mut map = match args {
            Value::Object(map) => map,
            _ => Map::new(),
        };

        if spec.needs_user_id {
            if let Some(ref user_id) = ctx.user_id {
                map.insert("user_id".to_string(), json!(user_id));
            }
        }
        if spec.needs_conversation_id {
            if let Some(ref conversation_id) = ctx.conversation_id {
                map.insert("conversation_id".to_string(), json!(conversation_id));
            }
        }

        Value::Object(map)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ToolError;
    use crate::spec::ToolSpec;
    use futures::FutureExt;
    use std::time::Duration;

    fn registry() -> ToolRegistry {
        let mut registry = ToolRegistry::new();

        registry.register(ToolSpec::sync(
            "echo",
            "Echo arguments back",
            json!({"type": "object"}),
            Ok,
        ));

        registry.register(
            ToolSpec::sync(
                "admin_only_tool",
                "Requires the admin category",
                json!({"type": "object"}),
                |_| Ok(json!({"ok": true})),
            )
            .with_category("admin"),
        );

        registry.register(
            ToolSpec::sync(
                "whoami",
                "Reports the injected context",
                json!({"type": "object"}),
                Ok,
            )
            .needs_user_id(),
        );

        registry.register(ToolSpec::sync(
            "explode",
            "Always fails",
            json!({"type": "object"}),
            |_| Err(ToolError::Execution("bad input".to_string())),
        ));

        registry.register(ToolSpec::asynchronous(
            "lookup_record",
            "Async lookup",
            json!({"type": "object"}),
            |args| async move { Ok(json!({"found": args["q"]})) }.boxed(),
        ));

        registry.register(ToolSpec::asynchronous(
            "stall",
            "Never returns",
            json!({"type": "object"}),
            |_| {
                async {
                    futures::future::pending::<()>().await;
                    Ok(Value::Null)
                }
                .boxed()
            },
        ));

        registry
    }

    fn dispatcher() -> ToolDispatcher {
        ToolDispatcher::new(registry())
    }

    #[tokio::test]
    async fn test_unknown_tool_returns_error_value() {
        let result = dispatcher()
            .dispatch("nonexistent", &ToolCallContext::default(), json!({}))
            .await;
        assert_eq!(result["error"], "Tool 'nonexistent' not found.");
    }

    #[tokio::test]
    async fn test_permission_denied_for_plain_user() {
        let ctx = ToolCallContext::with_role("user");
        let result = dispatcher()
            .dispatch("admin_only_tool", &ctx, json!({}))
            .await;
        assert!(result["error"]
            .as_str()
            .unwrap()
            .starts_with("Permission denied"));
    }

    #[tokio::test]
    async fn test_admin_passes_category_check() {
        let ctx = ToolCallContext::with_role("admin");
        let result = dispatcher()
            .dispatch("admin_only_tool", &ctx, json!({}))
            .await;
        assert_eq!(result, json!({"ok": true}));
    }

    #[tokio::test]
    async fn test_default_role_is_denied() {
        let result = dispatcher()
            .dispatch("admin_only_tool", &ToolCallContext::default(), json!({}))
            .await;
        assert!(result["error"]
            .as_str()
            .unwrap()
            .starts_with("Permission denied"));
    }

    #[tokio::test]
    async fn test_context_injected_only_when_declared() {
        let ctx = ToolCallContext::with_role("user")
            .with_user_id("u-1")
            .with_conversation_id("c-1");
        let d = dispatcher();

        let result = d.dispatch("whoami", &ctx, json!({"x": 1})).await;
        assert_eq!(result["user_id"], "u-1");
        assert_eq!(result["x"], 1);
        // Not declared, never injected
        assert!(result.get("conversation_id").is_none());

        let result = d.dispatch("echo", &ctx, json!({})).await;
        assert!(result.get("user_id").is_none());
    }

    #[tokio::test]
    async fn test_malformed_args_degrade_to_empty_object() {
        let result = dispatcher()
            .dispatch("echo", &ToolCallContext::default(), Value::Null)
            .await;
        assert_eq!(result, json!({}));
    }

    #[tokio::test]
    async fn test_executor_failure_is_data_not_err() {
        let result = dispatcher()
            .dispatch("explode", &ToolCallContext::default(), json!({}))
            .await;
        assert_eq!(result, json!({"error": "bad input"}));
    }

    #[tokio::test]
    async fn test_async_executor_runs() {
        let result = dispatcher()
            .dispatch("lookup_record", &ToolCallContext::default(), json!({"q": "x"}))
            .await;
        assert_eq!(result, json!({"found": "x"}));
    }

    #[tokio::test]
    async fn test_timeout_becomes_error_value() {
        let mut ctx = ToolCallContext::default();
        ctx.timeout = Duration::from_millis(10);
        let result = dispatcher().dispatch("stall", &ctx, json!({})).await;
        assert!(result["error"].as_str().unwrap().contains("timed out"));
    }

    #[tokio::test]
    async fn test_dispatch_blocking_refuses_inside_runtime() {
        let err = dispatcher()
            .dispatch_blocking("echo", &ToolCallContext::default(), json!({}))
            .unwrap_err();
        assert!(matches!(err, DispatchError::WouldDeadlock(_)));
    }

    #[test]
    fn test_dispatch_blocking_outside_runtime() {
        let result = dispatcher()
            .dispatch_blocking("echo", &ToolCallContext::default(), json!({"a": 1}))
            .unwrap();
        assert_eq!(result, json!({"a": 1}));
    }
}
