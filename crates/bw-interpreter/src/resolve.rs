//! Input resolution
//!
//! Turns a block's decoded inputs into runtime values (`Value` mode) or into
//! the ids and names they point at (`Reference` mode), and reads menu
//! selections.

use crate::block::BlockContext;
use bw_core::{value, EngineError, EngineResult, Value};
use bw_graph::{InputVariant, PrimitiveValue};
use bw_registry::MenuBlock;
use tracing::trace;

/// How an input is resolved
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputMode {
    /// Execute referenced blocks and look up variables
    Value,
    /// Return ids and names without executing anything
    Reference,
}

/// Type a menu selection is converted to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MenuTarget<'a> {
    /// The raw option string
    Text,
    /// Option parsed as an integer
    Integer,
    /// One member of a closed set, matched by exact name
    Enum(&'a [&'a str]),
    /// Entity looked up through the engine's entity resolver
    Entity,
    /// Any other type; not convertible by the engine
    Custom(&'a str),
}

impl BlockContext {
    /// Resolve an input
    ///
    /// Tag-1 inputs always resolve as references, whatever `mode` asks for.
    pub async fn input(&self, key: &str, mode: InputMode) -> EngineResult<Value> {
        let decoded = self
            .block()
            .input(key)?
            .ok_or_else(|| EngineError::MalformedInput {
                input: key.to_string(),
                reason: "block has no such input".to_string(),
            })?;
        let mode = if decoded.always_reference() {
            InputMode::Reference
        } else {
            mode
        };

        match (decoded.variant, mode) {
            (InputVariant::Literal(literal), _) => Ok(literal),
            (InputVariant::BlockRef(id), InputMode::Reference) => Ok(Value::String(id)),
            (InputVariant::BlockRef(id), InputMode::Value) => {
                trace!(input = %key, block_id = %id, "Evaluating input block");
                self.child(&id)?.evaluate().await
            }
            (InputVariant::PrimitiveRef { kind, payload }, InputMode::Reference) => {
                Ok(Value::String(kind.reference(&payload)))
            }
            (InputVariant::PrimitiveRef { kind, payload }, InputMode::Value) => {
                match kind.value(&payload) {
                    PrimitiveValue::Literal(literal) => Ok(literal),
                    PrimitiveValue::Variable { name, id } => self.variable_value(name, id),
                }
            }
        }
    }

    fn variable_value(&self, name: String, id: String) -> EngineResult<Value> {
        let stored = self
            .engine()
            .variables()
            .get(&id)
            .ok_or(EngineError::UnresolvedVariable { name, id })?;
        if value::is_empty(&stored) {
            Ok(Value::String("0".to_string()))
        } else {
            Ok(stored)
        }
    }

    /// Whether the input exists and carries a value
    pub fn has_input(&self, key: &str) -> bool {
        self.block().has_input(key)
    }

    pub async fn input_value(&self, key: &str) -> EngineResult<Value> {
        self.input(key, InputMode::Value).await
    }

    pub async fn input_string(&self, key: &str) -> EngineResult<String> {
        Ok(value::to_string(&self.input_value(key).await?))
    }

    pub async fn input_float(&self, key: &str) -> EngineResult<f64> {
        let raw = self.input_value(key).await?;
        value::to_f64(&raw).ok_or_else(|| EngineError::InvalidNumericInput {
            input: key.to_string(),
            value: value::to_string(&raw),
        })
    }

    /// Numeric input truncated to an integer
    pub async fn input_integer(&self, key: &str) -> EngineResult<i64> {
        Ok(self.input_float(key).await?.trunc() as i64)
    }

    /// Boolean input; an empty condition slot is `false`
    pub async fn input_bool(&self, key: &str) -> EngineResult<bool> {
        if !self.has_input(key) {
            return Ok(false);
        }
        Ok(value::to_bool(&self.input_value(key).await?))
    }

    /// Context of the block plugged into an input, if any
    pub fn input_block(&self, key: &str) -> EngineResult<Option<BlockContext>> {
        if !self.has_input(key) {
            return Ok(None);
        }
        match self.block().input(key)?.map(|d| d.variant) {
            Some(InputVariant::BlockRef(id)) => self.child(&id).map(Some),
            _ => Ok(None),
        }
    }

    /// Input as JSON; strings holding JSON documents are parsed
    pub async fn input_json(&self, key: &str) -> EngineResult<Value> {
        match self.input_value(key).await? {
            Value::String(text) => Ok(serde_json::from_str(&text).unwrap_or(Value::String(text))),
            other => Ok(other),
        }
    }

    // --- menus ---

    /// Menu declared for an input of this block
    ///
    /// Blocks that declare no menu read the first field of the menu block.
    pub fn declared_menu(&self, key: &str) -> Option<MenuBlock> {
        self.engine()
            .registry()
            .lookup(self.opcode())
            .ok()
            .and_then(|spec| spec.menu(key).cloned())
    }

    /// Raw option selected in the menu block an input points to
    fn menu_selection(&self, key: &str, menu: Option<&MenuBlock>) -> EngineResult<String> {
        let reference = self
            .block()
            .raw_input(key)
            .and_then(|raw| raw.get(1))
            .and_then(Value::as_str)
            .ok_or_else(|| EngineError::MalformedInput {
                input: key.to_string(),
                reason: "input does not reference a menu block".to_string(),
            })?;
        let menu_block = self.runtime().graph().block(reference)?;

        let selection = match menu {
            Some(menu) => menu_block.field_value(&menu.field),
            None => menu_block
                .first_field()
                .map(|(_, field)| value::to_string(&field.value)),
        };
        let selection = selection.unwrap_or_default();

        if menu.map(MenuBlock::is_required).unwrap_or(false)
            && (selection.is_empty() || selection == "-")
        {
            return Err(EngineError::MalformedInput {
                input: key.to_string(),
                reason: "menu value not found".to_string(),
            });
        }
        Ok(selection)
    }

    /// Convert the selection of a menu input
    pub fn menu_value(&self, key: &str, target: MenuTarget<'_>) -> EngineResult<Value> {
        let menu = self.declared_menu(key);
        let selection = self.menu_selection(key, menu.as_ref())?;
        self.convert_menu_item(key, selection, target)
    }

    /// Convert a multi-value menu selection split on `delimiter`
    pub fn menu_values(
        &self,
        key: &str,
        target: MenuTarget<'_>,
        delimiter: &str,
    ) -> EngineResult<Vec<Value>> {
        let menu = self.declared_menu(key);
        let selection = self.menu_selection(key, menu.as_ref())?;
        selection
            .split(delimiter)
            .filter(|item| !item.is_empty())
            .map(|item| self.convert_menu_item(key, item.to_string(), target))
            .collect()
    }

    fn convert_menu_item(
        &self,
        key: &str,
        item: String,
        target: MenuTarget<'_>,
    ) -> EngineResult<Value> {
        match target {
            MenuTarget::Text => Ok(Value::String(item)),
            MenuTarget::Integer => item
                .trim()
                .parse::<i64>()
                .map(Value::from)
                .map_err(|_| EngineError::InvalidNumericInput {
                    input: key.to_string(),
                    value: item,
                }),
            MenuTarget::Enum(members) => members
                .iter()
                .find(|m| **m == item)
                .map(|m| Value::String(m.to_string()))
                .ok_or_else(|| EngineError::MalformedInput {
                    input: key.to_string(),
                    reason: format!("'{}' is not one of {:?}", item, members),
                }),
            MenuTarget::Entity => {
                let resolver = self.engine().entities().ok_or_else(|| {
                    EngineError::UnsupportedMenuType {
                        target: "entity".to_string(),
                    }
                })?;
                resolver
                    .resolve(&item)
                    .ok_or_else(|| EngineError::MalformedInput {
                        input: key.to_string(),
                        reason: format!("entity '{}' not found", item),
                    })
            }
            MenuTarget::Custom(name) => Err(EngineError::UnsupportedMenuType {
                target: name.to_string(),
            }),
        }
    }
}
