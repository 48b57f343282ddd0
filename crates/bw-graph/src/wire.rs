//! Persisted workspace format
//!
//! The editor saves a tab as `{ "target": { "blocks": { <id>: {...} }, ... } }`.
//! These types mirror that layout; [`crate::BlockGraph`] is built from them.

use bw_core::{EngineError, EngineResult};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Keys of `target` whose content makes a tab non-empty
pub const CONTENT_GROUPS: [&str; 6] = [
    "variables",
    "lists",
    "backup_lists",
    "bool_variables",
    "group_variables",
    "blocks",
];

/// Top level persisted document
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkspaceContent {
    pub target: Target,
}

/// The `target` section: blocks plus editor-owned groups we keep verbatim
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Target {
    #[serde(default)]
    pub blocks: IndexMap<String, Value>,

    #[serde(flatten)]
    pub other: Map<String, Value>,
}

/// One persisted block entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawBlock {
    #[serde(default)]
    pub opcode: Option<String>,

    #[serde(default)]
    pub shadow: bool,

    #[serde(default, rename = "topLevel")]
    pub top_level: Option<bool>,

    #[serde(default)]
    pub parent: Option<String>,

    #[serde(default)]
    pub next: Option<String>,

    #[serde(default)]
    pub fields: IndexMap<String, Value>,

    #[serde(default)]
    pub inputs: IndexMap<String, Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mutation: Option<Map<String, Value>>,

    /// Editor data we do not interpret (x, y, comment...)
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Parse the persisted document
pub fn parse_content(content: &str) -> EngineResult<WorkspaceContent> {
    serde_json::from_str(content).map_err(|e| EngineError::MalformedGraph(e.to_string()))
}

/// Whether persisted tab content holds nothing worth keeping
///
/// A tab is empty when its content is blank or when every one of
/// [`CONTENT_GROUPS`] is absent or empty.
pub fn is_empty_content(content: &str) -> EngineResult<bool> {
    if content.trim().is_empty() {
        return Ok(true);
    }
    let document: Value =
        serde_json::from_str(content).map_err(|e| EngineError::MalformedGraph(e.to_string()))?;
    let Some(target) = document.get("target") else {
        return Ok(true);
    };

    for key in CONTENT_GROUPS {
        let non_empty = match target.get(key) {
            Some(Value::Object(map)) => !map.is_empty(),
            Some(Value::Array(items)) => !items.is_empty(),
            _ => false,
        };
        if non_empty {
            return Ok(false);
        }
    }
    Ok(true)
}
