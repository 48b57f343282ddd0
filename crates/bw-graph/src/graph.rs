//! Blocks and the per-tab block graph

use crate::input::{self, DecodedInput};
use crate::wire::{self, RawBlock, Target, WorkspaceContent};
use bw_core::{BlockId, EngineError, EngineResult, OpcodeId, Value};
use indexmap::IndexMap;
use serde_json::{json, Map};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// A field value as persisted: `[displayValue, refId?]`
#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    pub value: Value,
    pub id: Option<String>,
}

impl Field {
    fn from_raw(name: &str, raw: &Value) -> EngineResult<Self> {
        let items = raw.as_array().ok_or_else(|| {
            EngineError::MalformedGraph(format!("field '{}' is not an array", name))
        })?;
        Ok(Self {
            value: items.first().cloned().unwrap_or(Value::Null),
            id: items.get(1).and_then(Value::as_str).map(str::to_string),
        })
    }

    fn to_value(&self) -> Value {
        match &self.id {
            Some(id) => json!([self.value, id]),
            None => json!([self.value, null]),
        }
    }
}

/// Procedure metadata attached to definition, prototype and call blocks
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Mutation {
    pub proccode: Option<String>,
    pub argument_ids: Vec<String>,
    pub argument_names: Vec<String>,
    /// Everything as persisted, so the mutation survives a round trip
    pub raw: Map<String, Value>,
}

impl Mutation {
    fn from_raw(raw: Map<String, Value>) -> Self {
        Self {
            proccode: raw.get("proccode").and_then(Value::as_str).map(str::to_string),
            argument_ids: string_list(raw.get("argumentids")),
            argument_names: string_list(raw.get("argumentnames")),
            raw,
        }
    }
}

/// The editor stores argument lists as JSON arrays encoded in a string
fn string_list(value: Option<&Value>) -> Vec<String> {
    let parsed = match value {
        Some(Value::String(encoded)) => serde_json::from_str::<Value>(encoded).ok(),
        Some(other) => Some(other.clone()),
        None => None,
    };
    match parsed {
        Some(Value::Array(items)) => items.iter().map(bw_core::value::to_string).collect(),
        _ => Vec::new(),
    }
}

/// One node of the program graph
#[derive(Debug, Clone, Default)]
pub struct Block {
    pub id: BlockId,
    pub opcode: OpcodeId,
    pub shadow: bool,
    pub top_level: bool,
    pub parent: Option<BlockId>,
    pub next: Option<BlockId>,
    pub fields: IndexMap<String, Field>,
    pub inputs: IndexMap<String, Vec<Value>>,
    pub mutation: Option<Mutation>,
    /// Editor data carried through untouched
    pub extra: Map<String, Value>,
    defined: bool,
}

impl Block {
    fn placeholder(id: &str) -> Self {
        Self {
            id: id.to_string(),
            ..Default::default()
        }
    }

    /// Display value of a field, as a string
    pub fn field_value(&self, name: &str) -> Option<String> {
        self.fields
            .get(name)
            .map(|f| bw_core::value::to_string(&f.value))
    }

    /// Reference id stored in a field
    pub fn field_id(&self, name: &str) -> Option<&str> {
        self.fields.get(name).and_then(|f| f.id.as_deref())
    }

    pub fn has_field(&self, name: &str) -> bool {
        self.fields.contains_key(name)
    }

    /// First field present on the block, in declaration order
    pub fn first_field(&self) -> Option<(&str, &Field)> {
        self.fields.iter().next().map(|(k, v)| (k.as_str(), v))
    }

    /// Raw input by name
    pub fn raw_input(&self, name: &str) -> Option<&[Value]> {
        self.inputs.get(name).map(Vec::as_slice)
    }

    /// Decode an input; `Ok(None)` when the block has no such input
    pub fn input(&self, name: &str) -> EngineResult<Option<DecodedInput>> {
        self.raw_input(name)
            .map(|raw| input::decode(name, raw))
            .transpose()
    }

    /// Whether the input exists and carries a value
    pub fn has_input(&self, name: &str) -> bool {
        self.raw_input(name).map(input::is_present).unwrap_or(false)
    }

    /// Procedure signature, if the block carries one
    pub fn proccode(&self) -> Option<&str> {
        self.mutation.as_ref().and_then(|m| m.proccode.as_deref())
    }

    fn populate(&mut self, raw: RawBlock) -> EngineResult<()> {
        let opcode = raw.opcode.ok_or_else(|| {
            EngineError::MalformedGraph(format!("block '{}' has no opcode", self.id))
        })?;
        let top_level = raw.top_level.ok_or_else(|| {
            EngineError::MalformedGraph(format!("block '{}' has no topLevel flag", self.id))
        })?;

        self.opcode = OpcodeId::from_raw(&opcode);
        self.shadow = raw.shadow;
        self.top_level = top_level;
        self.parent = raw.parent;
        self.next = raw.next;

        self.fields = raw
            .fields
            .iter()
            .map(|(name, value)| Ok((name.clone(), Field::from_raw(name, value)?)))
            .collect::<EngineResult<_>>()?;

        self.inputs = IndexMap::with_capacity(raw.inputs.len());
        for (name, value) in raw.inputs {
            match value {
                Value::Array(items) => {
                    self.inputs.insert(name, items);
                }
                _ => {
                    return Err(EngineError::MalformedGraph(format!(
                        "input '{}' of block '{}' is not an array",
                        name, self.id
                    )))
                }
            }
        }

        self.mutation = raw.mutation.map(Mutation::from_raw);
        self.extra = raw.extra;
        self.defined = true;
        Ok(())
    }

    fn to_value(&self) -> Value {
        let mut entry = self.extra.clone();
        entry.insert("opcode".into(), Value::String(self.opcode.to_string()));
        entry.insert("shadow".into(), Value::Bool(self.shadow));
        entry.insert("topLevel".into(), Value::Bool(self.top_level));
        entry.insert("parent".into(), json!(self.parent));
        entry.insert("next".into(), json!(self.next));
        entry.insert(
            "fields".into(),
            Value::Object(
                self.fields
                    .iter()
                    .map(|(k, f)| (k.clone(), f.to_value()))
                    .collect(),
            ),
        );
        entry.insert(
            "inputs".into(),
            Value::Object(
                self.inputs
                    .iter()
                    .map(|(k, v)| (k.clone(), Value::Array(v.clone())))
                    .collect(),
            ),
        );
        if let Some(mutation) = &self.mutation {
            entry.insert("mutation".into(), Value::Object(mutation.raw.clone()));
        }
        Value::Object(entry)
    }
}

/// All blocks of one tab, addressable by id, in document order
#[derive(Debug, Clone, Default)]
pub struct BlockGraph {
    blocks: IndexMap<BlockId, Arc<Block>>,
    /// Non-block content of `target` (variables, lists...)
    target_extra: Map<String, Value>,
}

impl BlockGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Existing block, or a fresh placeholder registered under `id`
    pub fn get_or_create(&mut self, id: &str) -> &mut Block {
        let block = self
            .blocks
            .entry(id.to_string())
            .or_insert_with(|| Arc::new(Block::placeholder(id)));
        Arc::make_mut(block)
    }

    /// Parse persisted tab content
    pub fn parse(content: &str) -> EngineResult<Self> {
        Self::from_content(wire::parse_content(content)?)
    }

    /// Build a graph from an already decoded JSON document
    pub fn from_value(document: Value) -> EngineResult<Self> {
        let content: WorkspaceContent = serde_json::from_value(document)
            .map_err(|e| EngineError::MalformedGraph(e.to_string()))?;
        Self::from_content(content)
    }

    fn from_content(content: WorkspaceContent) -> EngineResult<Self> {
        let Target { blocks, other } = content.target;
        let mut graph = Self {
            blocks: IndexMap::with_capacity(blocks.len()),
            target_extra: other,
        };

        // Register every block first so document order survives forward links
        for (id, entry) in &blocks {
            if entry.is_object() {
                graph.get_or_create(id);
            }
        }

        for (id, entry) in blocks {
            if !entry.is_object() {
                trace!(block_id = %id, "Skipping non-block entry");
                continue;
            }
            let raw: RawBlock = serde_json::from_value(entry).map_err(|e| {
                EngineError::MalformedGraph(format!("block '{}': {}", id, e))
            })?;

            if let Some(parent) = &raw.parent {
                graph.get_or_create(parent);
            }
            if let Some(next) = &raw.next {
                graph.get_or_create(next);
            }
            graph.get_or_create(&id).populate(raw)?;
        }

        if let Some(dangling) = graph.blocks.values().find(|b| !b.defined) {
            return Err(EngineError::MalformedGraph(format!(
                "block '{}' is referenced but never defined",
                dangling.id
            )));
        }

        debug!(blocks = graph.blocks.len(), "Parsed block graph");
        Ok(graph)
    }

    pub fn get(&self, id: &str) -> Option<&Block> {
        self.blocks.get(id).map(Arc::as_ref)
    }

    /// Shared handle to a block, for holders that outlive the borrow
    pub fn get_shared(&self, id: &str) -> Option<Arc<Block>> {
        self.blocks.get(id).cloned()
    }

    /// Block by id, failing for ids that do not resolve
    pub fn block(&self, id: &str) -> EngineResult<&Block> {
        self.get(id).ok_or_else(|| {
            EngineError::MalformedGraph(format!("block '{}' not found", id))
        })
    }

    pub fn next_of(&self, id: &str) -> Option<&Block> {
        self.get(id)?.next.as_deref().and_then(|n| self.get(n))
    }

    pub fn parent_of(&self, id: &str) -> Option<&Block> {
        self.get(id)?.parent.as_deref().and_then(|p| self.get(p))
    }

    /// Valid roots of execution trees, in document order
    pub fn top_level_roots(&self) -> impl Iterator<Item = &Block> {
        self.blocks
            .values()
            .map(Arc::as_ref)
            .filter(|b| b.top_level && !b.shadow)
    }

    /// Ids along the `next` chain starting at `start`
    ///
    /// Stops at the first id already visited.
    pub fn chain(&self, start: &str) -> Vec<BlockId> {
        let mut seen = HashSet::new();
        let mut ids = Vec::new();
        let mut current = self.get(start);

        while let Some(block) = current {
            if !seen.insert(block.id.as_str()) {
                warn!(block_id = %block.id, "Cycle in block chain");
                break;
            }
            ids.push(block.id.clone());
            current = block.next.as_deref().and_then(|n| self.get(n));
        }
        ids
    }

    /// Variables declared in the document as `(id, name, initial value)`
    ///
    /// The editor stores them as `"variables": { "<id>": ["<name>", value] }`.
    pub fn declared_variables(&self) -> Vec<(String, String, Value)> {
        let Some(Value::Object(variables)) = self.target_extra.get("variables") else {
            return Vec::new();
        };
        variables
            .iter()
            .filter_map(|(id, entry)| {
                let items = entry.as_array()?;
                let name = items.first().map(bw_core::value::to_string)?;
                let initial = items.get(1).cloned().unwrap_or(Value::Null);
                Some((id.clone(), name, initial))
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Block> {
        self.blocks.values().map(Arc::as_ref)
    }

    /// Serialize back into the persisted document format
    pub fn to_value(&self) -> Value {
        let mut target = self.target_extra.clone();
        target.insert(
            "blocks".into(),
            Value::Object(
                self.blocks
                    .iter()
                    .map(|(id, block)| (id.clone(), block.to_value()))
                    .collect(),
            ),
        );
        json!({ "target": target })
    }

    pub fn to_json(&self) -> String {
        self.to_value().to_string()
    }
}
