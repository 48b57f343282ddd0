//! `debug` extension

use bw_core::EngineResult;
use bw_interpreter::{BlockContext, BlockExtension};
use bw_registry::ControlSignal;
use tracing::debug;

pub(crate) fn extension() -> BlockExtension {
    BlockExtension::new("debug").command("print", print)
}

/// Log `TEXT` and show it to the operator
async fn print(ctx: BlockContext) -> EngineResult<ControlSignal> {
    let text = ctx.input_string("TEXT").await?;
    debug!(block_id = %ctx.id(), "print");
    ctx.engine()
        .notifications()
        .info(Some(ctx.tab_id()), text);
    Ok(ControlSignal::Continue)
}

#[cfg(test)]
mod tests {
    use crate::testing::{harness, print};
    use serde_json::json;

    #[tokio::test]
    async fn test_print_chain_in_order() {
        let h = harness();
        let rt = h.runtime(json!({
            "a": print("a", None, Some("b")),
            "b": print("b", Some("a"), None)
        }));

        rt.block("a").unwrap().handle().await.unwrap();

        assert_eq!(h.printed(), vec!["a", "b"]);
        let notes = h.notifications.list();
        assert!(notes.iter().all(|n| n.tab.as_deref() == Some("main")));
    }

    #[tokio::test]
    async fn test_print_evaluates_nested_reporter() {
        let h = harness();
        let rt = h.runtime(json!({
            "out": {
                "opcode": "debug_print",
                "topLevel": true,
                "inputs": {"TEXT": [3, "sum", [10, ""]]}
            },
            "sum": {
                "opcode": "operator_add",
                "topLevel": false,
                "parent": "out",
                "inputs": {"NUM1": [1, [4, "2"]], "NUM2": [1, [4, "0.5"]]}
            }
        }));

        rt.block("out").unwrap().handle().await.unwrap();
        assert_eq!(h.printed(), vec!["2.5"]);
    }
}
