//! Access categories and the per-call caller context.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Role assumed when the caller supplies none.
pub const RESTRICTED_ROLE: &str = "restricted";

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Server-side context threaded into every dispatch.
///
/// Fields are injected into a tool's arguments only when the tool declares it
/// needs them; the role and specialty set drive the access check.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallContext {
    /// Caller's resolved role.
    pub role: String,
    /// Additional access categories granted to this caller.
    pub specialties: Vec<String>,
    /// Authenticated user id, if any.
    pub user_id: Option<String>,
    /// Active conversation id, if any.
    pub conversation_id: Option<String>,
    /// Deadline applied to each executor run.
    #[serde(skip, default = "default_timeout")]
    pub timeout: Duration,
}

fn default_timeout() -> Duration {
    DEFAULT_TIMEOUT
}

impl Default for ToolCallContext {
    fn default() -> Self {
        Self {
            role: RESTRICTED_ROLE.to_string(),
            specialties: Vec::new(),
            user_id: None,
            conversation_id: None,
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

impl ToolCallContext {
    /// Context for a caller with the given role.
    pub fn with_role(role: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            ..Self::default()
        }
    }

    /// Add an access specialty.
    pub fn with_specialty(mut self, specialty: impl Into<String>) -> Self {
        self.specialties.push(specialty.into());
        self
    }

    /// Attach the authenticated user id.
    pub fn with_user_id(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    /// Attach the active conversation id.
    pub fn with_conversation_id(mut self, conversation_id: impl Into<String>) -> Self {
        self.conversation_id = Some(conversation_id.into());
        self
    }
}

/// Whether a caller's role and specialty set satisfy a tool's category.
///
/// The "admin" role satisfies every category; any other caller needs the
/// category as their role or in their specialty set.
pub fn category_allows(category: &str, context: &ToolCallContext) -> bool {
    context.role == "admin"
        || context.role == category
        || context.specialties.iter().any(|s| s == category)
}
