//! `event` extension: broadcasts

use bw_core::{keys, value, EngineResult, Value};
use bw_interpreter::{BlockContext, BlockExtension, InputMode};
use bw_locks::callback;
use bw_registry::ControlSignal;
use tracing::debug;

pub(crate) fn extension() -> BlockExtension {
    BlockExtension::new("event")
        .command("broadcast", broadcast)
        .hat("gotbroadcast", got_broadcast)
}

async fn broadcast(ctx: BlockContext) -> EngineResult<ControlSignal> {
    let message = value::to_string(&ctx.input("BROADCAST_INPUT", InputMode::Reference).await?);
    let lock = ctx.engine().locks().get_or_create_lock(
        ctx.tab_id(),
        ctx.id(),
        &keys::broadcast(&message),
    );
    let accepted = lock.signal_all(Value::String(message.clone()));
    debug!(message = %message, accepted, "Broadcast sent");
    Ok(ControlSignal::Continue)
}

/// Starts the hat's chain on every broadcast of the selected message
async fn got_broadcast(ctx: BlockContext) -> EngineResult<ControlSignal> {
    let message = ctx.field_id("BROADCAST_OPTION");
    let lock = ctx.engine().locks().get_or_create_lock(
        ctx.tab_id(),
        ctx.id(),
        &keys::broadcast(&message),
    );

    let hat = ctx.clone();
    let subscription = lock.subscribe(
        None,
        callback(move |_| {
            hat.spawn_next();
        }),
    );
    debug!(message = %message, "Listening for broadcast");

    ctx.on_release(move || {
        lock.unsubscribe(subscription);
    });
    Ok(ControlSignal::Continue)
}

#[cfg(test)]
mod tests {
    use crate::testing::{harness, print, settle};
    use bw_core::keys;
    use serde_json::json;

    fn listener(message_id: &str, body: &str) -> serde_json::Value {
        json!({
            "opcode": "event_gotbroadcast",
            "topLevel": true,
            "next": body,
            "fields": {"BROADCAST_OPTION": ["lights", message_id]}
        })
    }

    #[tokio::test]
    async fn test_broadcast_runs_every_listener() {
        let h = harness();
        let rt = h.runtime(json!({
            "hat1": listener("msg-1", "body1"),
            "body1": print("first", Some("hat1"), None),
            "hat2": listener("msg-1", "body2"),
            "body2": print("second", Some("hat2"), None),
            "send": {
                "opcode": "event_broadcast",
                "topLevel": true,
                "inputs": {"BROADCAST_INPUT": [1, [11, "lights", "msg-1"]]}
            }
        }));

        rt.block("hat1").unwrap().handle().await.unwrap();
        rt.block("hat2").unwrap().handle().await.unwrap();
        // Hats never run their chain synchronously
        assert!(h.printed().is_empty());
        assert_eq!(h.locks.subscriber_count("main", &keys::broadcast("msg-1")), 2);

        rt.block("send").unwrap().handle().await.unwrap();
        settle().await;

        // Listeners run in the order they subscribed
        assert_eq!(h.printed(), vec!["first", "second"]);

        rt.block("send").unwrap().handle().await.unwrap();
        settle().await;
        assert_eq!(h.printed().len(), 4);
    }

    #[tokio::test]
    async fn test_release_unsubscribes_listener() {
        let h = harness();
        let rt = h.runtime(json!({
            "hat": listener("msg-2", "body"),
            "body": print("heard", Some("hat"), None)
        }));

        rt.block("hat").unwrap().handle().await.unwrap();
        assert_eq!(h.locks.subscriber_count("main", &keys::broadcast("msg-2")), 1);

        assert_eq!(rt.release_blocks(), 1);
        assert_eq!(h.locks.subscriber_count("main", &keys::broadcast("msg-2")), 0);

        h.locks.signal("main", &keys::broadcast("msg-2"), json!("msg-2"));
        settle().await;
        assert!(h.printed().is_empty());
    }
}
