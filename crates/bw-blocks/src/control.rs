//! `control` extension: loops, conditionals and waits
//!
//! Loop bodies live in the `SUBSTACK` input. Every loop pauses at least the
//! configured loop interval between iterations and exposes its iteration
//! number as the `INDEX` named value. A `stop` inside a body ends the loop
//! and everything enclosing it.
//!
//! `when_value_changed` and `when_condition_changed` watch an input every
//! poll interval and signal the block's `event:<id>` lock on a change; each
//! signal runs the `SUBSTACK` in a task of its own.

use bw_core::{keys, EngineError, EngineResult, Value, VALUE_KEY};
use bw_interpreter::{BlockContext, BlockExtension};
use bw_locks::{callback, Lock};
use bw_registry::ControlSignal;
use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace};

const SUBSTACK: &str = "SUBSTACK";
const SUBSTACK2: &str = "SUBSTACK2";
const CONDITION: &str = "CONDITION";
const VALUE: &str = "VALUE";

/// Longest `wait`, in seconds
const MAX_WAIT_SECS: i64 = 3600;

/// Shortest delay before `stop_timeout` ends its chain
const MIN_STOP_TIMEOUT: Duration = Duration::from_millis(100);

pub(crate) fn extension() -> BlockExtension {
    BlockExtension::new("control")
        .command("forever", forever)
        .command("repeat", repeat)
        .command("repeat_until", repeat_until)
        .command("schedule", schedule)
        .command("if", if_then)
        .command("if_else", if_else)
        .command("wait", wait)
        .command("wait_until", wait_until)
        .command("stop", |_| async { Ok(ControlSignal::Stop) })
        .command("stop_timeout", stop_timeout)
        .command("when_value_changed", |ctx: BlockContext| {
            watch_input(ctx, VALUE, Watch::Value)
        })
        .command("when_condition_changed", |ctx: BlockContext| {
            watch_input(ctx, CONDITION, Watch::Condition)
        })
}

/// Run one iteration of a loop body
async fn iterate(body: &BlockContext) -> EngineResult<ControlFlow<ControlSignal>> {
    Ok(match body.handle().await? {
        ControlSignal::Stop => ControlFlow::Break(ControlSignal::Stop),
        ControlSignal::Continue => ControlFlow::Continue(()),
    })
}

async fn forever(ctx: BlockContext) -> EngineResult<ControlSignal> {
    let Some(body) = ctx.input_block(SUBSTACK)? else {
        return Ok(ControlSignal::Continue);
    };
    ctx.repeat_every(Duration::ZERO, |_| iterate(&body)).await
}

async fn repeat(ctx: BlockContext) -> EngineResult<ControlSignal> {
    let Some(body) = ctx.input_block(SUBSTACK)? else {
        return Ok(ControlSignal::Continue);
    };
    let times = ctx.input_integer("TIMES").await?;
    if times <= 0 {
        return Ok(ControlSignal::Continue);
    }
    let times = times as u64;

    ctx.repeat_every(Duration::ZERO, |index| {
        let body = &body;
        async move {
            if let ControlFlow::Break(signal) = iterate(body).await? {
                return Ok(ControlFlow::Break(signal));
            }
            if index + 1 >= times {
                Ok(ControlFlow::Break(ControlSignal::Continue))
            } else {
                Ok(ControlFlow::Continue(()))
            }
        }
    })
    .await
}

/// Runs the body for as long as `CONDITION` holds
async fn repeat_until(ctx: BlockContext) -> EngineResult<ControlSignal> {
    let Some(body) = ctx.input_block(SUBSTACK)? else {
        return Ok(ControlSignal::Continue);
    };
    if !ctx.has_input(CONDITION) {
        return Ok(ControlSignal::Continue);
    }

    ctx.repeat_every(Duration::ZERO, |_| {
        let (ctx, body) = (&ctx, &body);
        async move {
            if !ctx.input_bool(CONDITION).await? {
                return Ok(ControlFlow::Break(ControlSignal::Continue));
            }
            iterate(body).await
        }
    })
    .await
}

/// Time unit names as the editor stores them in the `UNIT` field
fn unit_duration(unit: &str, amount: u64) -> Option<Duration> {
    let duration = match unit {
        "NANOSECONDS" => Duration::from_nanos(amount),
        "MICROSECONDS" => Duration::from_micros(amount),
        "MILLISECONDS" => Duration::from_millis(amount),
        "SECONDS" => Duration::from_secs(amount),
        "MINUTES" => Duration::from_secs(amount.saturating_mul(60)),
        "HOURS" => Duration::from_secs(amount.saturating_mul(3600)),
        "DAYS" => Duration::from_secs(amount.saturating_mul(86_400)),
        _ => return None,
    };
    Some(duration)
}

/// Amount read from `input` in the unit selected by the `UNIT` field
async fn input_duration(ctx: &BlockContext, input: &str) -> EngineResult<Duration> {
    let amount = ctx.input_integer(input).await?.max(0) as u64;
    let unit = ctx.field("UNIT");
    unit_duration(&unit, amount).ok_or_else(|| EngineError::MalformedInput {
        input: "UNIT".to_string(),
        reason: format!("unknown time unit '{}'", unit),
    })
}

async fn schedule(ctx: BlockContext) -> EngineResult<ControlSignal> {
    let Some(body) = ctx.input_block(SUBSTACK)? else {
        return Ok(ControlSignal::Continue);
    };
    let interval = input_duration(&ctx, "TIME").await?;

    debug!(block_id = %ctx.id(), ?interval, "Starting schedule");
    ctx.repeat_every(interval, |_| iterate(&body)).await
}

async fn if_then(ctx: BlockContext) -> EngineResult<ControlSignal> {
    if ctx.input_bool(CONDITION).await? {
        ctx.handle_input(SUBSTACK).await
    } else {
        Ok(ControlSignal::Continue)
    }
}

async fn if_else(ctx: BlockContext) -> EngineResult<ControlSignal> {
    let branch = if ctx.input_bool(CONDITION).await? {
        SUBSTACK
    } else {
        SUBSTACK2
    };
    ctx.handle_input(branch).await
}

async fn wait(ctx: BlockContext) -> EngineResult<ControlSignal> {
    let seconds = ctx.input_integer("DURATION").await?;
    if !(1..=MAX_WAIT_SECS).contains(&seconds) {
        return Err(EngineError::handler(format!(
            "wait duration must be between 1 and {} seconds, got {}",
            MAX_WAIT_SECS, seconds
        )));
    }
    tokio::time::sleep(Duration::from_secs(seconds as u64)).await;
    Ok(ControlSignal::Continue)
}

/// Suspends until `CONDITION` holds
///
/// The condition is re-checked every poll interval. Between checks the block
/// parks on its `event:<id>` lock, so releasing the tab's locks ends the
/// wait with [`EngineError::LockReleased`].
async fn wait_until(ctx: BlockContext) -> EngineResult<ControlSignal> {
    let poll = ctx.engine().settings().poll_interval;
    let lock = ctx
        .engine()
        .locks()
        .get_or_create_lock(ctx.tab_id(), ctx.id(), &keys::event(ctx.id()));
    while !ctx.input_bool(CONDITION).await? {
        lock.await_signal(None, Some(poll)).await?;
    }
    Ok(ControlSignal::Continue)
}

/// Ends the task running this chain once the timeout elapses
///
/// `TIMES` is read in the unit of the `UNIT` field; anything below 100ms
/// is raised to 100ms. A chain that finishes first is left alone.
async fn stop_timeout(ctx: BlockContext) -> EngineResult<ControlSignal> {
    let timeout = input_duration(&ctx, "TIMES").await?.max(MIN_STOP_TIMEOUT);
    let runtime = ctx.runtime().clone();
    let chain = ctx.context().id.clone();

    debug!(block_id = %ctx.id(), ?timeout, "Chain stops after timeout");
    ctx.spawn(async move {
        tokio::time::sleep(timeout).await;
        if runtime.cancel_context(&chain) > 0 {
            debug!(context = %chain, "Stopped chain on timeout");
        }
        Ok(ControlSignal::Continue)
    });
    Ok(ControlSignal::Continue)
}

/// What a watcher compares between polls
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Watch {
    /// The raw value; the first non-null value counts as a change
    Value,
    /// The input read as a boolean; the first reading counts as a change
    Condition,
}

/// Runs `SUBSTACK` every time the value of `input` changes
async fn watch_input(
    ctx: BlockContext,
    input: &'static str,
    watch: Watch,
) -> EngineResult<ControlSignal> {
    let Some(body) = ctx.input_block(SUBSTACK)? else {
        return Ok(ControlSignal::Continue);
    };
    if !ctx.has_input(input) {
        return Ok(ControlSignal::Continue);
    }

    let lock = ctx
        .engine()
        .locks()
        .get_or_create_lock(ctx.tab_id(), ctx.id(), &keys::event(ctx.id()));
    let owner = ctx.clone();
    let subscription = lock.subscribe(
        None,
        callback(move |changed| {
            owner.set_value(VALUE_KEY, changed);
            owner.spawn_chain(&body);
        }),
    );
    let subscribed = lock.clone();
    ctx.on_release(move || {
        subscribed.unsubscribe(subscription);
    });

    let watcher = ctx.clone();
    ctx.spawn(async move { poll_changes(watcher, lock, input, watch).await });
    debug!(block_id = %ctx.id(), input, ?watch, "Watching input");
    Ok(ControlSignal::Continue)
}

/// Evaluates `input` every poll interval until the lock is released
async fn poll_changes(
    ctx: BlockContext,
    lock: Arc<Lock>,
    input: &str,
    watch: Watch,
) -> EngineResult<ControlSignal> {
    let poll = ctx.engine().settings().poll_interval;
    let mut last = match watch {
        Watch::Value => Some(Value::Null),
        Watch::Condition => None,
    };
    while !lock.is_released() {
        let current = match watch {
            Watch::Value => ctx.input_value(input).await?,
            Watch::Condition => Value::Bool(ctx.input_bool(input).await?),
        };
        if last.as_ref() != Some(&current) {
            trace!(block_id = %ctx.id(), value = %current, "Watched input changed");
            last = Some(current.clone());
            lock.signal_all(current);
        }
        tokio::time::sleep(poll).await;
    }
    Ok(ControlSignal::Continue)
}
