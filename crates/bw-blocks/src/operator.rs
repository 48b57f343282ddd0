//! `operator` extension: arithmetic, comparison, logic and text reporters

use bw_core::{value, EngineError, EngineResult, Value};
use bw_interpreter::{BlockContext, BlockExtension};
use rand::Rng;

pub(crate) fn extension() -> BlockExtension {
    BlockExtension::new("operator")
        .reporter("add", |ctx: BlockContext| arithmetic(ctx, |a, b| a + b))
        .reporter("subtract", |ctx: BlockContext| arithmetic(ctx, |a, b| a - b))
        .reporter("multiply", |ctx: BlockContext| arithmetic(ctx, |a, b| a * b))
        .reporter("divide", |ctx: BlockContext| arithmetic(ctx, |a, b| a / b))
        .reporter("random", random)
        .reporter("lt", |ctx: BlockContext| compare(ctx, |a, b| a < b))
        .reporter("gt", |ctx: BlockContext| compare(ctx, |a, b| a > b))
        .reporter("equals", |ctx: BlockContext| compare(ctx, |a, b| a == b))
        .reporter("and", and)
        .reporter("or", or)
        .reporter("not", not)
        .reporter("join", join)
        .reporter("mathop", math_op)
        .reporter("bool_to_num", bool_to_num)
        .reporter("bool_if_else", bool_if_else)
}

async fn arithmetic(ctx: BlockContext, op: fn(f64, f64) -> f64) -> EngineResult<Value> {
    let a = ctx.input_float("NUM1").await?;
    let b = ctx.input_float("NUM2").await?;
    Ok(value::number(op(a, b)))
}

/// Whole number between `FROM` and `TO`, both included, in either order
async fn random(ctx: BlockContext) -> EngineResult<Value> {
    let from = ctx.input_integer("FROM").await?;
    let to = ctx.input_integer("TO").await?;
    let (low, high) = if from <= to { (from, to) } else { (to, from) };
    Ok(Value::from(rand::thread_rng().gen_range(low..=high)))
}

async fn compare(ctx: BlockContext, op: fn(f64, f64) -> bool) -> EngineResult<Value> {
    let a = ctx.input_float("OPERAND1").await?;
    let b = ctx.input_float("OPERAND2").await?;
    Ok(Value::Bool(op(a, b)))
}

async fn and(ctx: BlockContext) -> EngineResult<Value> {
    let result = ctx.input_bool("OPERAND1").await? && ctx.input_bool("OPERAND2").await?;
    Ok(Value::Bool(result))
}

async fn or(ctx: BlockContext) -> EngineResult<Value> {
    let result = ctx.input_bool("OPERAND1").await? || ctx.input_bool("OPERAND2").await?;
    Ok(Value::Bool(result))
}

async fn not(ctx: BlockContext) -> EngineResult<Value> {
    Ok(Value::Bool(!ctx.input_bool("OPERAND").await?))
}

async fn join(ctx: BlockContext) -> EngineResult<Value> {
    let mut text = ctx.input_string("STRING1").await?;
    text.push_str(&ctx.input_string("STRING2").await?);
    Ok(Value::String(text))
}

/// Unary function selected by the `OPERATOR` field of `mathop`
fn math_function(name: &str) -> Option<fn(f64) -> f64> {
    let f: fn(f64) -> f64 = match name {
        "abs" => f64::abs,
        // Halves round up, also for negative numbers
        "round" => |a: f64| (a + 0.5).floor(),
        "floor" => f64::floor,
        "ceiling" => f64::ceil,
        "sqrt" => f64::sqrt,
        "sin" => f64::sin,
        "cos" => f64::cos,
        "tan" => f64::tan,
        "asin" => f64::asin,
        "acos" => f64::acos,
        "atan" => f64::atan,
        "log" => f64::ln,
        _ => return None,
    };
    Some(f)
}

async fn math_op(ctx: BlockContext) -> EngineResult<Value> {
    let name = ctx.field("OPERATOR");
    let f = math_function(&name).ok_or_else(|| EngineError::MalformedInput {
        input: "OPERATOR".to_string(),
        reason: format!("unknown math function '{}'", name),
    })?;
    Ok(value::number(f(ctx.input_float("NUM").await?)))
}

async fn bool_to_num(ctx: BlockContext) -> EngineResult<Value> {
    let on = ctx.input_bool("OPERAND").await?;
    Ok(Value::from(if on { 1 } else { 0 }))
}

async fn bool_if_else(ctx: BlockContext) -> EngineResult<Value> {
    let branch = if ctx.input_bool("OPERAND").await? {
        "THEN"
    } else {
        "ELSE"
    };
    Ok(value::number(ctx.input_float(branch).await?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::harness;
    use serde_json::json;

    fn binary(opcode: &str, a: &str, b: &str) -> Value {
        let (left, right) = if opcode.starts_with("operator_join") {
            ("STRING1", "STRING2")
        } else if ["operator_lt", "operator_gt", "operator_equals"].contains(&opcode) {
            ("OPERAND1", "OPERAND2")
        } else {
            ("NUM1", "NUM2")
        };
        json!({
            "opcode": opcode,
            "topLevel": true,
            "inputs": {left: [1, [4, a]], right: [1, [4, b]]}
        })
    }

    async fn eval(blocks: Value, id: &str) -> EngineResult<Value> {
        let h = harness();
        let rt = h.runtime(blocks);
        rt.block(id).unwrap().evaluate().await
    }

    #[test]
    fn test_math_functions() {
        assert_eq!(math_function("abs").unwrap()(-2.0), 2.0);
        assert_eq!(math_function("round").unwrap()(2.5), 3.0);
        assert_eq!(math_function("round").unwrap()(-2.5), -2.0);
        assert_eq!(math_function("ceiling").unwrap()(1.2), 2.0);
        assert!(math_function("cbrt").is_none());
    }

    #[tokio::test]
    async fn test_arithmetic() {
        let cases = [
            ("operator_add", "2", "3", json!(5)),
            ("operator_subtract", "2", "3", json!(-1)),
            ("operator_multiply", "1.5", "2", json!(3)),
            ("operator_divide", "1", "4", json!(0.25)),
        ];
        for (opcode, a, b, expected) in cases {
            let result = eval(json!({"op": binary(opcode, a, b)}), "op").await.unwrap();
            assert_eq!(result, expected, "{}", opcode);
        }
    }

    #[tokio::test]
    async fn test_random_stays_in_range() {
        let h = harness();
        let rt = h.runtime(json!({
            "dice": {
                "opcode": "operator_random",
                "topLevel": true,
                "inputs": {"FROM": [1, [4, "1"]], "TO": [1, [4, "6"]]}
            },
            "reversed": {
                "opcode": "operator_random",
                "topLevel": true,
                "inputs": {"FROM": [1, [4, "10"]], "TO": [1, [4, "8"]]}
            },
            "fixed": {
                "opcode": "operator_random",
                "topLevel": true,
                "inputs": {"FROM": [1, [4, "4"]], "TO": [1, [4, "4"]]}
            }
        }));

        for _ in 0..50 {
            let roll = rt.block("dice").unwrap().evaluate().await.unwrap();
            assert!((1..=6).contains(&roll.as_i64().unwrap()), "{}", roll);
            let roll = rt.block("reversed").unwrap().evaluate().await.unwrap();
            assert!((8..=10).contains(&roll.as_i64().unwrap()), "{}", roll);
        }
        let fixed = rt.block("fixed").unwrap().evaluate().await.unwrap();
        assert_eq!(fixed, json!(4));
    }

    #[tokio::test]
    async fn test_comparisons_and_join() {
        let lt = eval(json!({"op": binary("operator_lt", "1", "2")}), "op").await;
        assert_eq!(lt.unwrap(), json!(true));

        let eq = eval(json!({"op": binary("operator_equals", "2.0", "2")}), "op").await;
        assert_eq!(eq.unwrap(), json!(true));

        let joined = eval(json!({"op": binary("operator_join", "kitchen", " lamp")}), "op").await;
        assert_eq!(joined.unwrap(), json!("kitchen lamp"));
    }

    #[tokio::test]
    async fn test_non_numeric_operand_fails() {
        let err = eval(json!({"op": binary("operator_add", "two", "3")}), "op")
            .await
            .unwrap_err();
        match err.root_cause() {
            EngineError::InvalidNumericInput { input, value } => {
                assert_eq!(input, "NUM1");
                assert_eq!(value, "two");
            }
            other => panic!("unexpected error {:?}", other),
        }
        assert!(err.to_string().contains("operator -> add"));
    }

    #[tokio::test]
    async fn test_logic_on_nested_blocks() {
        let blocks = json!({
            "not": {
                "opcode": "operator_not",
                "topLevel": true,
                "inputs": {"OPERAND": [2, "and"]}
            },
            "and": {
                "opcode": "operator_and",
                "topLevel": false,
                "parent": "not",
                "inputs": {"OPERAND1": [2, "gt"]}
            },
            "gt": {
                "opcode": "operator_gt",
                "topLevel": false,
                "parent": "and",
                "inputs": {"OPERAND1": [1, [4, "3"]], "OPERAND2": [1, [4, "1"]]}
            }
        });

        // Missing OPERAND2 reads as false
        assert_eq!(eval(blocks, "not").await.unwrap(), json!(true));
    }

    #[tokio::test]
    async fn test_mathop_and_bool_helpers() {
        let blocks = json!({
            "sqrt": {
                "opcode": "operator_mathop",
                "topLevel": true,
                "fields": {"OPERATOR": ["sqrt", null]},
                "inputs": {"NUM": [1, [4, "16"]]}
            },
            "pick": {
                "opcode": "operator_bool_if_else",
                "topLevel": true,
                "inputs": {
                    "OPERAND": [1, [10, "off"]],
                    "THEN": [1, [4, "1"]],
                    "ELSE": [1, [4, "7"]]
                }
            },
            "num": {
                "opcode": "operator_bool_to_num",
                "topLevel": true,
                "inputs": {"OPERAND": [1, [10, "true"]]}
            }
        });

        assert_eq!(eval(blocks.clone(), "sqrt").await.unwrap(), json!(4));
        assert_eq!(eval(blocks.clone(), "pick").await.unwrap(), json!(7));
        assert_eq!(eval(blocks, "num").await.unwrap(), json!(1));
    }
}
