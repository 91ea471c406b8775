//! parley-tools: tool registry, access policy, and dispatcher.

pub mod access;
mod dispatcher;
mod error;
mod registry;
mod spec;

pub use access::{category_allows, ToolCallContext, RESTRICTED_ROLE};
pub use dispatcher::{DispatchError, ToolDispatcher};
pub use error::ToolError;
pub use registry::ToolRegistry;
pub use spec::{AsyncExecutor, Executor, SyncExecutor, ToolSpec};
