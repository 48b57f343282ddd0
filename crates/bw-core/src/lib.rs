//! Core types for the block engine
//!
//! This crate provides the fundamental types shared by every other crate of
//! the workspace: opcode identifiers, runtime value helpers, execution
//! contexts, the engine error taxonomy and the operator notification sink.

mod context;
mod error;
mod notification;
mod opcode;
pub mod value;

pub use context::Context;
pub use error::{EngineError, EngineResult};
pub use notification::{Notification, NotificationLevel, Notifications};
pub use opcode::OpcodeId;

/// Runtime value flowing between blocks
pub type Value = serde_json::Value;

/// Identifier of a block inside one tab
pub type BlockId = String;

/// Identifier of a tab (one saved automation program)
pub type TabId = String;

/// Id of the reserved tab that always exists
pub const GENERAL_TAB: &str = "main";

/// Named value a reporter stores its last result under
pub const VALUE_KEY: &str = "value";

/// Named value loops expose their iteration counter under
pub const INDEX_KEY: &str = "INDEX";

/// Lock key helpers shared by the interpreter and the core extensions
pub mod keys {
    use std::collections::hash_map::DefaultHasher;
    use std::hash::{Hash, Hasher};

    /// Lock key of a broadcast message
    pub fn broadcast(id: &str) -> String {
        format!("broadcast:{}", id)
    }

    /// Lock key signaled whenever a variable is written
    pub fn variable(id: &str) -> String {
        format!("variable:{}", id)
    }

    /// Lock key a device-value source block signals new values on
    pub fn block_value(block_id: &str) -> String {
        format!("value:{}", block_id)
    }

    /// Lock key a block signals when something it watches changes
    pub fn event(block_id: &str) -> String {
        format!("event:{}", block_id)
    }

    /// Lock key a procedure definition listens for calls on
    pub fn procedure(proccode: &str) -> String {
        format!("procedure:{:016x}", signature_hash(proccode))
    }

    /// Lock key a procedure definition reports finished calls on
    pub fn procedure_return(proccode: &str) -> String {
        format!("procedure_return:{:016x}", signature_hash(proccode))
    }

    fn signature_hash(proccode: &str) -> u64 {
        let mut hasher = DefaultHasher::new();
        proccode.hash(&mut hasher);
        hasher.finish()
    }
}
