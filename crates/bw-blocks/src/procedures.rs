//! `procedures` extension: user defined blocks
//!
//! A `definition` listens on a lock keyed by a hash of its signature
//! (`proccode`). A `call` signals that lock with its resolved arguments and
//! a fresh call id, then waits on the procedure's return lock for the reply
//! carrying the same id. The definition runs its body in a task of its own,
//! exposing every argument as a named value under its argument name.

use bw_core::{keys, EngineError, EngineResult, Value};
use bw_graph::Mutation;
use bw_interpreter::{BlockContext, BlockExtension};
use bw_locks::{callback, predicate};
use bw_registry::ControlSignal;
use serde_json::{json, Map};
use tracing::{debug, trace};
use ulid::Ulid;

pub(crate) fn extension() -> BlockExtension {
    BlockExtension::new("procedures")
        .hat("definition", definition)
        .command("call", call)
        .reporter("prototype", prototype)
}

/// Mutation carrying the signature of a definition
///
/// The editor stores it either on the definition itself or on the prototype
/// shadow plugged into its `custom_block` input.
fn signature(ctx: &BlockContext) -> EngineResult<Mutation> {
    if ctx.block().proccode().is_some() {
        if let Some(mutation) = &ctx.block().mutation {
            return Ok(mutation.clone());
        }
    }
    let prototype = ctx.input_block("custom_block")?;
    prototype
        .and_then(|p| p.block().mutation.clone())
        .filter(|m| m.proccode.is_some())
        .ok_or_else(|| {
            EngineError::MalformedGraph(format!("procedure '{}' has no signature", ctx.id()))
        })
}

async fn definition(ctx: BlockContext) -> EngineResult<ControlSignal> {
    let mutation = signature(&ctx)?;
    let proccode = mutation.proccode.clone().unwrap_or_default();
    let arguments: Vec<(String, String)> = mutation
        .argument_ids
        .iter()
        .cloned()
        .zip(mutation.argument_names.iter().cloned())
        .collect();

    let locks = ctx.engine().locks();
    let calls = locks.get_or_create_lock(ctx.tab_id(), ctx.id(), &keys::procedure(&proccode));
    let returns =
        locks.get_or_create_lock(ctx.tab_id(), ctx.id(), &keys::procedure_return(&proccode));

    let procedure = ctx.clone();
    let subscription = calls.subscribe(
        None,
        callback(move |request| {
            // The body runs under the context of its task
            let body = procedure.with_context(procedure.context().child());
            let task = body.context().clone();
            let arguments = arguments.clone();
            let returns = returns.clone();
            procedure.runtime().spawn(procedure.description(), task, async move {
                let call_id = request.get("call_id").cloned().unwrap_or(Value::Null);
                let args = request.get("args");
                for (id, name) in &arguments {
                    let value = args.and_then(|a| a.get(id)).cloned().unwrap_or(Value::Null);
                    body.set_value(name, value);
                }

                let result = match body.next() {
                    Some(first) => first.handle().await,
                    None => Ok(ControlSignal::Continue),
                };
                let reply = match &result {
                    Ok(signal) => json!({
                        "call_id": call_id,
                        "stop": *signal == ControlSignal::Stop,
                    }),
                    Err(err) => {
                        debug!(error = %err, "Procedure body failed");
                        json!({"call_id": call_id, "error": err.to_string()})
                    }
                };
                // The caller owns the failure and reports it
                returns.signal_all(reply);
                Ok(ControlSignal::Continue)
            });
        }),
    );
    debug!(proccode = %proccode, "Procedure defined");

    ctx.on_release(move || {
        calls.unsubscribe(subscription);
    });
    Ok(ControlSignal::Continue)
}

async fn call(ctx: BlockContext) -> EngineResult<ControlSignal> {
    let mutation = ctx
        .block()
        .mutation
        .clone()
        .filter(|m| m.proccode.is_some())
        .ok_or_else(|| {
            EngineError::MalformedGraph(format!("procedure call '{}' has no signature", ctx.id()))
        })?;
    let proccode = mutation.proccode.unwrap_or_default();

    let mut args = Map::new();
    for id in &mutation.argument_ids {
        let value = if ctx.has_input(id) {
            ctx.input_value(id).await?
        } else {
            Value::Null
        };
        args.insert(id.clone(), value);
    }

    let locks = ctx.engine().locks();
    let calls = locks.get_lock_required(ctx.tab_id(), &keys::procedure(&proccode))?;
    let returns =
        locks.get_or_create_lock(ctx.tab_id(), ctx.id(), &keys::procedure_return(&proccode));

    let call_id = Ulid::new().to_string();
    let expected = call_id.clone();
    // Registered before signaling so a fast reply is not missed
    let pending = returns.register_waiter(Some(predicate(move |reply| {
        reply.get("call_id").and_then(Value::as_str) == Some(expected.as_str())
    })));

    trace!(proccode = %proccode, call_id = %call_id, "Calling procedure");
    if calls.signal_all(json!({"call_id": call_id, "args": args})) == 0 {
        return Err(EngineError::handler(format!(
            "procedure '{}' is not listening",
            proccode
        )));
    }

    let reply = pending.wait(None).await?.unwrap_or(Value::Null);
    if let Some(error) = reply.get("error").and_then(Value::as_str) {
        return Err(EngineError::handler(format!(
            "procedure '{}' failed: {}",
            proccode, error
        )));
    }
    if reply.get("stop").and_then(Value::as_bool).unwrap_or(false) {
        return Ok(ControlSignal::Stop);
    }
    Ok(ControlSignal::Continue)
}

async fn prototype(ctx: BlockContext) -> EngineResult<Value> {
    Ok(ctx
        .block()
        .proccode()
        .map(|p| Value::String(p.to_string()))
        .unwrap_or(Value::Null))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{harness, print};
    use bw_core::keys;
    use std::time::Duration;

    fn blink_mutation() -> Value {
        json!({
            "proccode": "blink %s",
            "argumentids": "[\"a1\"]",
            "argumentnames": "[\"color\"]"
        })
    }

    fn blocks(body_next: Option<&str>) -> Value {
        json!({
            "def": {
                "opcode": "procedures_definition",
                "topLevel": true,
                "next": "body",
                "inputs": {"custom_block": [1, "proto"]}
            },
            "proto": {
                "opcode": "procedures_prototype",
                "topLevel": false,
                "shadow": true,
                "parent": "def",
                "mutation": blink_mutation()
            },
            "body": {
                "opcode": "debug_print",
                "topLevel": false,
                "parent": "def",
                "next": body_next,
                "inputs": {"TEXT": [3, "arg", [10, ""]]}
            },
            "arg": {
                "opcode": "argument_reporter_string_number",
                "topLevel": false,
                "parent": "body",
                "fields": {"VALUE": ["color", null]}
            },
            "halt": {"opcode": "control_stop", "topLevel": false, "parent": "body"},
            "call": {
                "opcode": "procedures_call",
                "topLevel": true,
                "next": "after",
                "mutation": blink_mutation(),
                "inputs": {"a1": [1, [10, "red"]]}
            },
            "after": print("after", Some("call"), None)
        })
    }

    #[tokio::test]
    async fn test_call_runs_definition_with_arguments() {
        let h = harness();
        let rt = h.runtime(blocks(None));

        rt.block("def").unwrap().handle().await.unwrap();
        assert_eq!(h.locks.subscriber_count("main", &keys::procedure("blink %s")), 1);

        let signal = tokio::time::timeout(
            Duration::from_secs(2),
            rt.block("call").unwrap().handle(),
        )
        .await
        .unwrap()
        .unwrap();

        assert_eq!(signal, ControlSignal::Continue);
        assert_eq!(h.printed(), vec!["red", "after"]);
        assert_eq!(rt.own_value("def", "color"), Some(json!("red")));
    }

    #[tokio::test]
    async fn test_stop_in_body_stops_caller() {
        let h = harness();
        let rt = h.runtime(blocks(Some("halt")));

        rt.block("def").unwrap().handle().await.unwrap();
        let signal = tokio::time::timeout(
            Duration::from_secs(2),
            rt.block("call").unwrap().handle(),
        )
        .await
        .unwrap()
        .unwrap();

        assert_eq!(signal, ControlSignal::Stop);
        assert_eq!(h.printed(), vec!["red"]);
    }

    #[tokio::test]
    async fn test_call_without_definition_fails() {
        let h = harness();
        let rt = h.runtime(blocks(None));

        let err = rt.block("call").unwrap().handle().await.unwrap_err();
        assert!(matches!(err.root_cause(), EngineError::LockNotFound { .. }));
    }

    #[tokio::test]
    async fn test_prototype_reports_proccode() {
        let h = harness();
        let rt = h.runtime(blocks(None));

        let proccode = rt.block("proto").unwrap().evaluate().await.unwrap();
        assert_eq!(proccode, json!("blink %s"));
    }
}
