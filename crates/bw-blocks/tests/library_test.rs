//! Core library registration and programs mixing several extensions

use bw_blocks::{core_extensions, register_core_extensions};
use bw_core::{NotificationLevel, Notifications, OpcodeId};
use bw_graph::BlockGraph;
use bw_interpreter::{BlockRegistry, EngineContext, TabRuntime};
use bw_locks::LockManager;
use bw_registry::{BlockKind, ControlSignal};
use bw_variables::{MemoryVariableStore, VariableStore};
use serde_json::json;
use std::sync::Arc;

#[test]
fn test_block_kinds() {
    let registry = BlockRegistry::new();
    register_core_extensions(&registry).unwrap();

    let expected = [
        ("control", "forever", BlockKind::Command),
        ("control", "wait_until", BlockKind::Command),
        ("control", "stop_timeout", BlockKind::Command),
        ("control", "when_value_changed", BlockKind::Command),
        ("control", "when_condition_changed", BlockKind::Command),
        ("event", "gotbroadcast", BlockKind::Hat),
        ("data", "onchange_variable_to", BlockKind::Hat),
        ("data", "boolean_link", BlockKind::Hat),
        ("data", "variable", BlockKind::Reporter),
        ("data", "prev_variable", BlockKind::Reporter),
        ("operator", "mathop", BlockKind::Reporter),
        ("operator", "random", BlockKind::Reporter),
        ("procedures", "definition", BlockKind::Hat),
        ("procedures", "call", BlockKind::Command),
        ("procedures", "prototype", BlockKind::Reporter),
        ("argument", "reporter_boolean", BlockKind::Reporter),
        ("debug", "print", BlockKind::Command),
    ];
    for (extension, opcode, kind) in expected {
        assert_eq!(
            registry.block_kind(extension, opcode),
            Some(kind),
            "{}_{}",
            extension,
            opcode
        );
    }

    assert_eq!(registry.block_count(), 43);
    assert_eq!(core_extensions().len(), 7);
    assert!(registry.lookup(&OpcodeId::from_raw("operator_mod")).is_err());
}

#[tokio::test]
async fn test_counting_program() {
    let registry = Arc::new(BlockRegistry::new());
    register_core_extensions(&registry).unwrap();
    let locks = Arc::new(LockManager::new());
    let variables = Arc::new(MemoryVariableStore::new(locks.clone()));
    let notifications = Arc::new(Notifications::new());
    let engine = Arc::new(EngineContext::new(
        registry,
        locks,
        variables.clone(),
        notifications.clone(),
    ));

    let graph = BlockGraph::from_value(json!({"target": {
        "variables": {"c1": ["count", 0]},
        "blocks": {
            "reset": {
                "opcode": "data_setvariableto",
                "topLevel": true,
                "next": "loop",
                "fields": {"VARIABLE": ["count", "c1"]},
                "inputs": {"ITEM": [1, [10, "0"]]}
            },
            "loop": {
                "opcode": "control_repeat",
                "topLevel": false,
                "parent": "reset",
                "next": "show",
                "inputs": {"TIMES": [1, [6, "4"]], "SUBSTACK": [2, "inc"]}
            },
            "inc": {
                "opcode": "data_changevariableby",
                "topLevel": false,
                "parent": "loop",
                "fields": {"VARIABLE": ["count", "c1"]},
                "inputs": {"ITEM": [1, [4, "1"]]}
            },
            "show": {
                "opcode": "debug_print",
                "topLevel": false,
                "parent": "loop",
                "inputs": {"TEXT": [3, "sum", [10, ""]]}
            },
            "sum": {
                "opcode": "operator_add",
                "topLevel": false,
                "parent": "show",
                "inputs": {"NUM1": [3, "read", [4, ""]], "NUM2": [1, [4, "0.5"]]}
            },
            "read": {
                "opcode": "data_variable",
                "topLevel": false,
                "parent": "sum",
                "fields": {"VARIABLE": ["count", "c1"]}
            }
        }
    }}))
    .unwrap();
    let runtime = TabRuntime::new(engine, "main", "Main", graph);

    let signal = runtime.block("reset").unwrap().handle().await.unwrap();

    assert_eq!(signal, ControlSignal::Continue);
    assert_eq!(variables.get("c1"), Some(json!(4)));
    let printed: Vec<String> = notifications
        .with_level(NotificationLevel::Info)
        .into_iter()
        .map(|n| n.message)
        .collect();
    assert_eq!(printed, vec!["4.5"]);
}
