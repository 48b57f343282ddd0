//! Tagged input decoding
//!
//! The editor persists every block input as `[tag, payload, ...]`. The tag
//! says how the payload is shaped; the payload is either a literal, the id of
//! another block, or a primitive array `[kind, value, id?]`.

use bw_core::{BlockId, EngineError, EngineResult, Value};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Wire tag of a persisted input
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InputTag {
    /// `1`: menu or shadow value, always resolved as a reference
    Shadow,
    /// `2`: plain reference to another block
    Reference,
    /// `3`: a block covering a shadow primitive
    Obscured,
    /// `5`: direct literal
    Literal,
}

impl InputTag {
    /// Map a persisted tag number
    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            1 => Some(Self::Shadow),
            2 => Some(Self::Reference),
            3 => Some(Self::Obscured),
            5 => Some(Self::Literal),
            _ => None,
        }
    }

    /// The persisted tag number
    pub fn code(self) -> i64 {
        match self {
            Self::Shadow => 1,
            Self::Reference => 2,
            Self::Obscured => 3,
            Self::Literal => 5,
        }
    }
}

/// Kind of a primitive array, by persisted ordinal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PrimitiveKind {
    Undefined,
    InputSameBlockShadow,
    InputBlockNoShadow,
    InputDiffBlockShadow,
    MathNumber,
    PositiveNumber,
    WholeNumber,
    IntegerNumber,
    CheckboxNumber,
    ColorPicker,
    Text,
    Broadcast,
    Variable,
    List,
    FontAwesome,
}

/// Runtime value of a primitive, before any store lookup
#[derive(Debug, Clone, PartialEq)]
pub enum PrimitiveValue {
    /// The value is carried by the payload itself
    Literal(Value),
    /// The value lives in the variable store under `id`
    Variable { name: String, id: String },
}

impl PrimitiveKind {
    const ALL: [PrimitiveKind; 15] = [
        Self::Undefined,
        Self::InputSameBlockShadow,
        Self::InputBlockNoShadow,
        Self::InputDiffBlockShadow,
        Self::MathNumber,
        Self::PositiveNumber,
        Self::WholeNumber,
        Self::IntegerNumber,
        Self::CheckboxNumber,
        Self::ColorPicker,
        Self::Text,
        Self::Broadcast,
        Self::Variable,
        Self::List,
        Self::FontAwesome,
    ];

    /// Map a persisted ordinal
    pub fn from_ordinal(ordinal: u64) -> Option<Self> {
        Self::ALL.get(ordinal as usize).copied()
    }

    /// The persisted ordinal
    pub fn ordinal(self) -> u64 {
        Self::ALL
            .iter()
            .position(|k| *k == self)
            .map(|p| p as u64)
            .unwrap_or_default()
    }

    /// Reference string of a primitive array (menu and identity lookups)
    pub fn reference(self, payload: &[Value]) -> String {
        match self {
            Self::Broadcast => element(payload, 2),
            Self::Undefined
            | Self::InputSameBlockShadow
            | Self::InputBlockNoShadow
            | Self::InputDiffBlockShadow
            | Self::MathNumber
            | Self::PositiveNumber
            | Self::WholeNumber
            | Self::IntegerNumber
            | Self::CheckboxNumber
            | Self::ColorPicker
            | Self::Text
            | Self::Variable
            | Self::List
            | Self::FontAwesome => element(payload, 1),
        }
    }

    /// Runtime value of a primitive array
    pub fn value(self, payload: &[Value]) -> PrimitiveValue {
        match self {
            Self::CheckboxNumber => {
                PrimitiveValue::Literal(payload.get(2).cloned().unwrap_or(Value::Null))
            }
            Self::Broadcast => PrimitiveValue::Literal(Value::String(element(payload, 2))),
            Self::Variable => PrimitiveValue::Variable {
                name: element(payload, 1),
                id: element(payload, 2),
            },
            Self::Undefined
            | Self::InputSameBlockShadow
            | Self::InputBlockNoShadow
            | Self::InputDiffBlockShadow
            | Self::MathNumber
            | Self::PositiveNumber
            | Self::WholeNumber
            | Self::IntegerNumber
            | Self::ColorPicker
            | Self::Text
            | Self::List
            | Self::FontAwesome => {
                PrimitiveValue::Literal(payload.get(1).cloned().unwrap_or(Value::Null))
            }
        }
    }
}

impl fmt::Display for PrimitiveKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

fn element(payload: &[Value], index: usize) -> String {
    payload
        .get(index)
        .map(bw_core::value::to_string)
        .unwrap_or_default()
}

/// Decoded form of a raw input
#[derive(Debug, Clone, PartialEq)]
pub enum InputVariant {
    Literal(Value),
    BlockRef(BlockId),
    PrimitiveRef {
        kind: PrimitiveKind,
        payload: Vec<Value>,
    },
}

/// A decoded input together with its wire tag
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedInput {
    pub tag: InputTag,
    pub variant: InputVariant,
}

impl DecodedInput {
    /// Tag-1 inputs never evaluate their target
    pub fn always_reference(&self) -> bool {
        self.tag == InputTag::Shadow
    }
}

/// Whether a raw input counts as present
///
/// Every known tag is present, except a tag-1 input with a null payload.
pub fn is_present(raw: &[Value]) -> bool {
    match raw.first().and_then(Value::as_i64).and_then(InputTag::from_code) {
        Some(InputTag::Shadow) => raw.get(1).map(|v| !v.is_null()).unwrap_or(false),
        Some(_) => true,
        None => false,
    }
}

/// Decode a raw `[tag, payload, ...]` input
pub fn decode(name: &str, raw: &[Value]) -> EngineResult<DecodedInput> {
    let malformed = |reason: String| EngineError::MalformedInput {
        input: name.to_string(),
        reason,
    };

    let code = raw
        .first()
        .and_then(Value::as_i64)
        .ok_or_else(|| malformed("missing input tag".to_string()))?;
    let tag = InputTag::from_code(code).ok_or_else(|| malformed(format!("unknown tag {}", code)))?;
    let payload = raw.get(1).cloned().unwrap_or(Value::Null);

    let variant = match (tag, payload) {
        (InputTag::Literal, payload) => InputVariant::Literal(payload),
        (InputTag::Reference, Value::String(id)) => InputVariant::BlockRef(id),
        (InputTag::Obscured | InputTag::Shadow, Value::String(id)) => InputVariant::BlockRef(id),
        (InputTag::Obscured | InputTag::Shadow, Value::Array(items)) => {
            primitive(&items).map_err(malformed)?
        }
        (_, Value::Null) => return Err(malformed("input has no value".to_string())),
        (_, other) => return Err(malformed(format!("unexpected payload {}", other))),
    };

    Ok(DecodedInput { tag, variant })
}

fn primitive(items: &[Value]) -> Result<InputVariant, String> {
    let ordinal = items
        .first()
        .and_then(Value::as_u64)
        .ok_or_else(|| "primitive without kind".to_string())?;
    let kind = PrimitiveKind::from_ordinal(ordinal)
        .ok_or_else(|| format!("unknown primitive kind {}", ordinal))?;
    Ok(InputVariant::PrimitiveRef {
        kind,
        payload: items.to_vec(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn raw(value: Value) -> Vec<Value> {
        value.as_array().cloned().unwrap()
    }

    #[test]
    fn test_decode_literal() {
        let decoded = decode("TEXT", &raw(json!([5, "hello"]))).unwrap();
        assert_eq!(decoded.variant, InputVariant::Literal(json!("hello")));
        assert!(!decoded.always_reference());
    }

    #[test]
    fn test_decode_block_reference() {
        let decoded = decode("CONDITION", &raw(json!([2, "b7"]))).unwrap();
        assert_eq!(decoded.variant, InputVariant::BlockRef("b7".into()));
    }

    #[test]
    fn test_decode_obscured_shapes() {
        let prim = decode("TIMES", &raw(json!([3, [4, "10"], [4, "1"]]))).unwrap();
        assert!(matches!(
            prim.variant,
            InputVariant::PrimitiveRef { kind: PrimitiveKind::MathNumber, .. }
        ));

        let block = decode("TIMES", &raw(json!([3, "b2", [4, "1"]]))).unwrap();
        assert_eq!(block.variant, InputVariant::BlockRef("b2".into()));
    }

    #[test]
    fn test_decode_shadow_is_reference_only() {
        let decoded = decode("ENTITY", &raw(json!([1, "menu1"]))).unwrap();
        assert!(decoded.always_reference());
        assert_eq!(decoded.variant, InputVariant::BlockRef("menu1".into()));
    }

    #[test]
    fn test_unknown_tag_is_malformed() {
        let err = decode("X", &raw(json!([4, "a"]))).unwrap_err();
        assert!(matches!(err, EngineError::MalformedInput { .. }));
    }

    #[test]
    fn test_null_shadow_payload() {
        let input = raw(json!([1, null]));
        assert!(!is_present(&input));
        assert!(decode("X", &input).is_err());
        assert!(is_present(&raw(json!([2, "b"]))));
        assert!(is_present(&raw(json!([5, ""]))));
    }

    #[test]
    fn test_primitive_reference_and_value() {
        let broadcast = raw(json!([11, "message1", "brd-id"]));
        assert_eq!(PrimitiveKind::Broadcast.reference(&broadcast), "brd-id");
        assert_eq!(
            PrimitiveKind::Broadcast.value(&broadcast),
            PrimitiveValue::Literal(json!("brd-id"))
        );

        let checkbox = raw(json!([8, true, "on"]));
        assert_eq!(PrimitiveKind::CheckboxNumber.reference(&checkbox), "true");
        assert_eq!(
            PrimitiveKind::CheckboxNumber.value(&checkbox),
            PrimitiveValue::Literal(json!("on"))
        );

        let variable = raw(json!([12, "counter", "var-1"]));
        assert_eq!(PrimitiveKind::Variable.reference(&variable), "counter");
        assert_eq!(
            PrimitiveKind::Variable.value(&variable),
            PrimitiveValue::Variable {
                name: "counter".into(),
                id: "var-1".into()
            }
        );
    }

    #[test]
    fn test_ordinals() {
        assert_eq!(PrimitiveKind::from_ordinal(0), Some(PrimitiveKind::Undefined));
        assert_eq!(PrimitiveKind::from_ordinal(14), Some(PrimitiveKind::FontAwesome));
        assert_eq!(PrimitiveKind::from_ordinal(15), None);
        assert_eq!(PrimitiveKind::Variable.ordinal(), 12);
    }
}
