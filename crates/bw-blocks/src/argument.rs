//! `argument` extension: procedure arguments inside a definition body

use bw_core::{value, Value};
use bw_interpreter::{BlockContext, BlockExtension};

pub(crate) fn extension() -> BlockExtension {
    BlockExtension::new("argument")
        .reporter("reporter_string_number", |ctx: BlockContext| async move {
            Ok(argument(&ctx).unwrap_or(Value::Null))
        })
        .reporter("reporter_boolean", |ctx: BlockContext| async move {
            Ok(Value::Bool(
                argument(&ctx).map(|v| value::to_bool(&v)).unwrap_or(false),
            ))
        })
}

/// Value the enclosing definition stored under the name in `VALUE`
fn argument(ctx: &BlockContext) -> Option<Value> {
    ctx.get_value(&ctx.field("VALUE"))
}
