//! Coercions for runtime values
//!
//! Blocks exchange plain JSON values. Inputs are loosely typed, so every
//! consumer coerces through these helpers instead of matching on the value.

use crate::Value;

/// Convert a value to its string form
///
/// Strings are returned verbatim (no quotes), `null` maps to `default`.
pub fn to_string_or(value: &Value, default: &str) -> String {
    match value {
        Value::Null => default.to_string(),
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => format_number(n),
        other => other.to_string(),
    }
}

/// Convert a value to a string, `null` becomes the empty string
pub fn to_string(value: &Value) -> String {
    to_string_or(value, "")
}

/// Whether the value carries no content (null or empty string)
pub fn is_empty(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        _ => false,
    }
}

/// Truthiness of a value
pub fn to_bool(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
        Value::String(s) => is_truthy(s),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

/// Check if a string value is truthy
pub fn is_truthy(value: &str) -> bool {
    let trimmed = value.trim().to_lowercase();

    if trimmed.is_empty() {
        return false;
    }

    !matches!(trimmed.as_str(), "false" | "no" | "off" | "0" | "none")
}

/// Numeric form of a value, if it has one
pub fn to_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

/// Build a number value, falling back to `null` for NaN/infinite results
pub fn number(n: f64) -> Value {
    if n.fract() == 0.0 && n.abs() < i64::MAX as f64 {
        return Value::from(n as i64);
    }
    serde_json::Number::from_f64(n)
        .map(Value::Number)
        .unwrap_or(Value::Null)
}

fn format_number(n: &serde_json::Number) -> String {
    if let Some(i) = n.as_i64() {
        return i.to_string();
    }
    match n.as_f64() {
        Some(f) if f.fract() == 0.0 && f.abs() < i64::MAX as f64 => (f as i64).to_string(),
        _ => n.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_to_string() {
        assert_eq!(to_string(&json!("hello")), "hello");
        assert_eq!(to_string(&json!(null)), "");
        assert_eq!(to_string_or(&json!(null), "0"), "0");
        assert_eq!(to_string(&json!(3)), "3");
        assert_eq!(to_string(&json!(3.0)), "3");
        assert_eq!(to_string(&json!(2.5)), "2.5");
        assert_eq!(to_string(&json!(true)), "true");
    }

    #[test]
    fn test_to_bool() {
        assert!(to_bool(&json!(true)));
        assert!(to_bool(&json!("on")));
        assert!(to_bool(&json!(1)));
        assert!(!to_bool(&json!(0)));
        assert!(!to_bool(&json!("false")));
        assert!(!to_bool(&json!("")));
        assert!(!to_bool(&json!(null)));
    }

    #[test]
    fn test_to_f64() {
        assert_eq!(to_f64(&json!("4.5")), Some(4.5));
        assert_eq!(to_f64(&json!(" 7 ")), Some(7.0));
        assert_eq!(to_f64(&json!(2)), Some(2.0));
        assert_eq!(to_f64(&json!("abc")), None);
    }

    #[test]
    fn test_number_prefers_integers() {
        assert_eq!(number(4.0), json!(4));
        assert_eq!(number(1.5), json!(1.5));
        assert_eq!(number(f64::NAN), Value::Null);
    }

    #[test]
    fn test_is_empty() {
        assert!(is_empty(&json!(null)));
        assert!(is_empty(&json!("")));
        assert!(!is_empty(&json!(0)));
    }
}
