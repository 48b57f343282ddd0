//! Context type for tracking execution origin and causality

use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Context for tracking the origin and causality of block executions
///
/// Every background task carries a Context identifying the tab it runs
/// for. Tasks started by a hat subscription get a child context of the
/// task that subscribed, so the chain of executions can be traced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Context {
    /// Unique identifier for this context (ULID)
    pub id: String,

    /// Tab the execution belongs to (if any)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tab_id: Option<String>,

    /// Parent context ID for tracking causality chains
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
}

impl Context {
    /// Create a new context with a fresh ULID
    pub fn new() -> Self {
        Self {
            id: Ulid::new().to_string(),
            tab_id: None,
            parent_id: None,
        }
    }

    /// Create a new context bound to a tab
    pub fn for_tab(tab_id: impl Into<String>) -> Self {
        Self {
            id: Ulid::new().to_string(),
            tab_id: Some(tab_id.into()),
            parent_id: None,
        }
    }

    /// Create a child context with this context as parent
    pub fn child(&self) -> Self {
        Self {
            id: Ulid::new().to_string(),
            tab_id: self.tab_id.clone(),
            parent_id: Some(self.id.clone()),
        }
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}
