//! Opcode identifier representing an extension_opcode pair

use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::fmt;
use std::str::FromStr;

/// Represents a persisted block opcode (e.g., "control_repeat")
///
/// The raw opcode is split on its first `_`: the part before it is the
/// extension id, the rest is the opcode inside that extension. A raw opcode
/// without `_` belongs to the built-in (empty) extension.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct OpcodeId {
    extension_id: String,
    opcode: String,
}

impl OpcodeId {
    /// Create a new OpcodeId from its two parts
    pub fn new(extension_id: impl Into<String>, opcode: impl Into<String>) -> Self {
        Self {
            extension_id: extension_id.into(),
            opcode: opcode.into(),
        }
    }

    /// Split a raw persisted opcode on its first `_`
    pub fn from_raw(raw: &str) -> Self {
        match raw.split_once('_') {
            Some((extension_id, opcode)) => Self::new(extension_id, opcode),
            None => Self::new("", raw),
        }
    }

    /// Get the extension part
    pub fn extension_id(&self) -> &str {
        &self.extension_id
    }

    /// Get the opcode part
    pub fn opcode(&self) -> &str {
        &self.opcode
    }

    /// Whether this id names the given extension and opcode
    pub fn is(&self, extension_id: &str, opcode: &str) -> bool {
        self.extension_id == extension_id && self.opcode == opcode
    }

    /// Human readable form used in logs: "ext -> opcode"
    pub fn describe(&self) -> String {
        format!("{} -> {}", self.extension_id, self.opcode)
    }
}

impl FromStr for OpcodeId {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::from_raw(s))
    }
}

impl From<String> for OpcodeId {
    fn from(s: String) -> Self {
        Self::from_raw(&s)
    }
}

impl From<&str> for OpcodeId {
    fn from(s: &str) -> Self {
        Self::from_raw(s)
    }
}

impl From<OpcodeId> for String {
    fn from(id: OpcodeId) -> Self {
        id.to_string()
    }
}

impl fmt::Display for OpcodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.extension_id.is_empty() {
            write!(f, "{}", self.opcode)
        } else {
            write!(f, "{}_{}", self.extension_id, self.opcode)
        }
    }
}
