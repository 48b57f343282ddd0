//! `data` extension: variables
//!
//! Variables are addressed by the reference id stored in the block's
//! `VARIABLE` field. Writes go through the engine's variable store, which
//! signals `variable:<id>` in every tab; the change hats subscribe to that
//! lock and keep the value that fired them, which `prev_variable` reads
//! from inside their chain.

use bw_core::{keys, value, EngineError, EngineResult, Value, VALUE_KEY};
use bw_interpreter::{BlockContext, BlockExtension, InputMode};
use bw_locks::{callback, predicate, Predicate};
use bw_registry::ControlSignal;
use regex::Regex;
use std::str::FromStr;
use tracing::{debug, trace};

const VARIABLE: &str = "VARIABLE";
const ITEM: &str = "ITEM";
const OPERATOR_FIELD: &str = "OPERATOR";

pub(crate) fn extension() -> BlockExtension {
    BlockExtension::new("data")
        .reporter("variable", variable)
        .reporter("prev_variable", prev_variable)
        .command("setvariableto", set_variable)
        .command("changevariableby", change_variable)
        .hat("onchange_variable", on_change)
        .hat("onchange_variable_to", on_change_to)
        .hat("group_variable_link", |ctx: BlockContext| {
            link(ctx, "group_variables_group", LinkKind::Value)
        })
        .hat("boolean_link", |ctx: BlockContext| {
            link(ctx, "bool_variables_group", LinkKind::Boolean)
        })
}

async fn variable(ctx: BlockContext) -> EngineResult<Value> {
    let id = ctx.field_id(VARIABLE);
    Ok(ctx.engine().variables().get(&id).unwrap_or(Value::Null))
}

/// Last value stored by the closest enclosing block that has one
///
/// Inside a change hat's chain that is the value which fired the hat.
async fn prev_variable(ctx: BlockContext) -> EngineResult<Value> {
    Ok(ctx
        .parent()
        .and_then(|parent| parent.get_value(VALUE_KEY))
        .unwrap_or(Value::Null))
}

async fn set_variable(ctx: BlockContext) -> EngineResult<ControlSignal> {
    let id = ctx.field_id(VARIABLE);
    let item = ctx.input_value(ITEM).await?;
    if !item.is_null() {
        ctx.engine().variables().set(&id, item);
    }
    Ok(ControlSignal::Continue)
}

async fn change_variable(ctx: BlockContext) -> EngineResult<ControlSignal> {
    let id = ctx.field_id(VARIABLE);
    let delta = ctx.input_float(ITEM).await?;
    let variables = ctx.engine().variables();
    let current = variables
        .get(&id)
        .as_ref()
        .and_then(value::to_f64)
        .unwrap_or(0.0);
    variables.set(&id, value::number(current + delta));
    Ok(ControlSignal::Continue)
}

/// Subscribe the hat to writes of its variable
fn listen<F>(ctx: &BlockContext, on_change: F)
where
    F: Fn(&BlockContext, Value) + Send + Sync + 'static,
{
    let id = ctx.field_id(VARIABLE);
    let lock = ctx
        .engine()
        .locks()
        .get_or_create_lock(ctx.tab_id(), ctx.id(), &keys::variable(&id));

    let hat = ctx.clone();
    let subscription = lock.subscribe(
        None,
        callback(move |v| {
            hat.set_value(VALUE_KEY, v.clone());
            on_change(&hat, v)
        }),
    );
    debug!(variable = %id, "Listening for variable changes");

    ctx.on_release(move || {
        lock.unsubscribe(subscription);
    });
}

async fn on_change(ctx: BlockContext) -> EngineResult<ControlSignal> {
    listen(&ctx, |hat, _| {
        hat.spawn_next();
    });
    Ok(ControlSignal::Continue)
}

/// Comparison an `onchange_variable_to` hat applies to new values
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeOperator {
    Greater,
    Less,
    Equal,
    NotEqual,
    Regex,
    Any,
}

impl FromStr for ChangeOperator {
    type Err = EngineError;

    fn from_str(op: &str) -> Result<Self, Self::Err> {
        match op {
            ">" => Ok(Self::Greater),
            "<" => Ok(Self::Less),
            "=" => Ok(Self::Equal),
            "!=" => Ok(Self::NotEqual),
            "regex" => Ok(Self::Regex),
            "any" => Ok(Self::Any),
            other => Err(EngineError::MalformedInput {
                input: OPERATOR_FIELD.to_string(),
                reason: format!("unknown compare operator '{}'", other),
            }),
        }
    }
}

impl ChangeOperator {
    /// Build the filter matching new values against `item`
    ///
    /// Numeric operators need a numeric `item`; a new value that is not a
    /// number never matches them. `regex` must match the whole value.
    pub fn predicate(self, item: &Value) -> EngineResult<Predicate> {
        let text = value::to_string(item);
        let filter = match self {
            Self::Any => predicate(|_| true),
            Self::Equal => predicate(move |v| value::to_string(v) == text),
            Self::NotEqual => predicate(move |v| value::to_string(v) != text),
            Self::Greater | Self::Less => {
                let bound =
                    value::to_f64(item).ok_or_else(|| EngineError::InvalidNumericInput {
                        input: ITEM.to_string(),
                        value: text.clone(),
                    })?;
                let greater = self == Self::Greater;
                predicate(move |v| match value::to_f64(v) {
                    Some(n) if greater => n > bound,
                    Some(n) => n < bound,
                    None => false,
                })
            }
            Self::Regex => {
                let pattern = Regex::new(&format!("^(?:{})$", text)).map_err(|e| {
                    EngineError::handler(format!("invalid pattern '{}': {}", text, e))
                })?;
                predicate(move |v| pattern.is_match(&value::to_string(v)))
            }
        };
        Ok(filter)
    }
}

/// Like `onchange_variable`, filtered by `OPERATOR` against `ITEM`
///
/// `ITEM` is evaluated again for every change, so it can follow another
/// variable or a reporter.
async fn on_change_to(ctx: BlockContext) -> EngineResult<ControlSignal> {
    let operator: ChangeOperator = ctx.field(OPERATOR_FIELD).parse()?;
    listen(&ctx, move |hat, new_value| {
        let source = hat.clone();
        hat.spawn_next_if(async move {
            let item = if source.has_input(ITEM) {
                source.input_value(ITEM).await?
            } else {
                Value::Null
            };
            trace!(?operator, item = %item, value = %new_value, "Variable change filter");
            let accepts = operator.predicate(&item)?;
            Ok(accepts(&new_value))
        });
    });
    Ok(ControlSignal::Continue)
}

#[derive(Debug, Clone, Copy)]
enum LinkKind {
    Value,
    Boolean,
}

/// Keep a variable in sync with the value a `SOURCE` block reports
async fn link(
    ctx: BlockContext,
    group_field: &str,
    kind: LinkKind,
) -> EngineResult<ControlSignal> {
    let source = value::to_string(&ctx.input("SOURCE", InputMode::Reference).await?);
    if source.is_empty() {
        return Err(EngineError::MalformedInput {
            input: "SOURCE".to_string(),
            reason: "no source block to link".to_string(),
        });
    }
    ctx.runtime().graph().block(&source)?;

    let variable = ctx.field_id(group_field);
    let lock = ctx
        .engine()
        .locks()
        .get_or_create_lock(ctx.tab_id(), ctx.id(), &keys::block_value(&source));

    let variables = ctx.engine().variables().clone();
    let target = variable.clone();
    let subscription = lock.subscribe(
        None,
        callback(move |v| {
            let v = match kind {
                LinkKind::Value => v,
                LinkKind::Boolean => Value::Bool(value::to_bool(&v)),
            };
            variables.set(&target, v);
        }),
    );
    debug!(source = %source, variable = %variable, ?kind, "Linked block value to variable");

    ctx.on_release(move || {
        lock.unsubscribe(subscription);
    });
    Ok(ControlSignal::Continue)
}
