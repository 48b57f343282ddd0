//! Core block library
//!
//! This crate provides the extensions every workspace relies on: control
//! flow, broadcasts, variables, operators, procedures, procedure arguments
//! and debug output. Hosts register them once at startup with
//! [`register_core_extensions`].
//!
//! # Extensions
//!
//! - `control` - loops, conditionals, waits, input watchers and `stop`
//! - `event` - broadcasts and the hats listening for them
//! - `data` - variables, variable-change hats and value links
//! - `operator` - arithmetic, comparison, logic and text reporters
//! - `procedures` / `argument` - user defined blocks and their arguments
//! - `debug` - `print`

mod argument;
mod control;
mod data;
mod debug;
mod event;
mod operator;
mod procedures;

use bw_core::OpcodeId;
use bw_interpreter::{BlockExtension, BlockRegistry};
use bw_registry::RegistryResult;
use tracing::info;

pub use data::ChangeOperator;

/// Top-level opcodes handled once while a tab loads instead of getting a task
pub const ONCE_EXECUTION: &[&str] = &[
    "procedures_definition",
    "data_boolean_link",
    "data_group_variable_link",
];

/// Whether a top-level block of this opcode runs once at load time
pub fn is_once_execution(opcode: &OpcodeId) -> bool {
    let raw = opcode.to_string();
    ONCE_EXECUTION.contains(&raw.as_str())
}

/// Every extension of the core library, in registration order
pub fn core_extensions() -> Vec<BlockExtension> {
    vec![
        control::extension(),
        event::extension(),
        data::extension(),
        operator::extension(),
        procedures::extension(),
        argument::extension(),
        debug::extension(),
    ]
}

/// Register the core library into `registry`
pub fn register_core_extensions(registry: &BlockRegistry) -> RegistryResult<()> {
    let extensions = core_extensions();
    let count = extensions.len();
    for extension in extensions {
        registry.register(extension)?;
    }
    info!(extensions = count, "Core block extensions registered");
    Ok(())
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use bw_core::{NotificationLevel, Notifications, Value};
    use bw_graph::BlockGraph;
    use bw_interpreter::{EngineContext, EngineSettings, SharedEngine, TabRuntime};
    use bw_locks::LockManager;
    use bw_variables::MemoryVariableStore;
    use serde_json::json;
    use std::sync::Arc;
    use std::time::Duration;

    pub(crate) struct Harness {
        pub engine: SharedEngine,
        pub locks: Arc<LockManager>,
        pub variables: Arc<MemoryVariableStore>,
        pub notifications: Arc<Notifications>,
    }

    impl Harness {
        /// Messages of the info notifications, oldest first
        pub fn printed(&self) -> Vec<String> {
            self.notifications
                .with_level(NotificationLevel::Info)
                .into_iter()
                .map(|n| n.message)
                .collect()
        }

        pub fn runtime(&self, blocks: Value) -> Arc<TabRuntime> {
            let graph =
                BlockGraph::from_value(json!({"target": {"blocks": blocks}})).unwrap();
            TabRuntime::new(self.engine.clone(), "main", "Main", graph)
        }
    }

    pub(crate) fn harness() -> Harness {
        let registry = Arc::new(BlockRegistry::new());
        register_core_extensions(&registry).unwrap();

        let locks = Arc::new(LockManager::new());
        let variables = Arc::new(MemoryVariableStore::new(locks.clone()));
        let notifications = Arc::new(Notifications::new());
        let engine = EngineContext::new(
            registry,
            locks.clone(),
            variables.clone(),
            notifications.clone(),
        )
        .with_settings(EngineSettings {
            poll_interval: Duration::from_millis(20),
            ..Default::default()
        });

        Harness {
            engine: Arc::new(engine),
            locks,
            variables,
            notifications,
        }
    }

    /// `debug_print` block with a literal text
    pub(crate) fn print(text: &str, parent: Option<&str>, next: Option<&str>) -> Value {
        json!({
            "opcode": "debug_print",
            "topLevel": parent.is_none(),
            "parent": parent,
            "next": next,
            "inputs": {"TEXT": [1, [10, text]]}
        })
    }

    /// Let spawned tasks run
    pub(crate) async fn settle() {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}
