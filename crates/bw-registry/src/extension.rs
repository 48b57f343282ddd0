//! Extension bundles and block descriptions

use crate::{BlockFuture, CommandHandler, ControlSignal, ReporterHandler};
use bw_core::{EngineResult, Value};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;

/// How a block participates in execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BlockKind {
    /// Statement; the interpreter continues with `next`
    Command,
    /// Event entry point; never proceeds synchronously to `next`
    Hat,
    /// Expression returning a value
    Reporter,
}

/// Where the options of a menu come from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum MenuKind {
    /// Fixed list of options
    Static { items: Vec<String> },
    /// Options served by the host; `require` rejects empty selections
    Server { url: String, require: bool },
}

/// Menu declared by a block argument
///
/// The selected option is stored in the `field` of the menu shadow block
/// that the argument's input points to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MenuBlock {
    pub name: String,
    pub field: String,
    pub kind: MenuKind,
}

impl MenuBlock {
    pub fn new(name: impl Into<String>, field: impl Into<String>, kind: MenuKind) -> Self {
        Self {
            name: name.into(),
            field: field.into(),
            kind,
        }
    }

    /// Menu with a fixed list of options
    pub fn static_items(name: &str, field: &str, items: &[&str]) -> Self {
        Self::new(
            name,
            field,
            MenuKind::Static {
                items: items.iter().map(|s| s.to_string()).collect(),
            },
        )
    }

    /// Whether an empty selection is an error
    pub fn is_required(&self) -> bool {
        matches!(self.kind, MenuKind::Server { require: true, .. })
    }
}

/// Typed handler of a block
pub enum Handler<C> {
    Command(CommandHandler<C>),
    Reporter(ReporterHandler<C>),
}

impl<C> Clone for Handler<C> {
    fn clone(&self) -> Self {
        match self {
            Self::Command(f) => Self::Command(f.clone()),
            Self::Reporter(f) => Self::Reporter(f.clone()),
        }
    }
}

/// One registered block
pub struct BlockSpec<C> {
    opcode: String,
    kind: BlockKind,
    handler: Handler<C>,
    menus: IndexMap<String, MenuBlock>,
}

impl<C> Clone for BlockSpec<C> {
    fn clone(&self) -> Self {
        Self {
            opcode: self.opcode.clone(),
            kind: self.kind,
            handler: self.handler.clone(),
            menus: self.menus.clone(),
        }
    }
}

impl<C> std::fmt::Debug for BlockSpec<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockSpec")
            .field("opcode", &self.opcode)
            .field("kind", &self.kind)
            .field("menus", &self.menus)
            .finish()
    }
}

impl<C> BlockSpec<C> {
    pub fn opcode(&self) -> &str {
        &self.opcode
    }

    pub fn kind(&self) -> BlockKind {
        self.kind
    }

    pub fn handler(&self) -> &Handler<C> {
        &self.handler
    }

    /// Menu declared for an input
    pub fn menu(&self, input: &str) -> Option<&MenuBlock> {
        self.menus.get(input)
    }
}

/// A named bundle of blocks
pub struct Extension<C> {
    id: String,
    blocks: IndexMap<String, BlockSpec<C>>,
}

impl<C: 'static> Extension<C> {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            blocks: IndexMap::new(),
        }
    }

    fn insert(mut self, opcode: &str, kind: BlockKind, handler: Handler<C>) -> Self {
        self.blocks.insert(
            opcode.to_string(),
            BlockSpec {
                opcode: opcode.to_string(),
                kind,
                handler,
                menus: IndexMap::new(),
            },
        );
        self
    }

    fn command_handler<F, Fut>(handler: F) -> Handler<C>
    where
        F: Fn(C) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = EngineResult<ControlSignal>> + Send + 'static,
    {
        Handler::Command(Arc::new(move |ctx| {
            Box::pin(handler(ctx)) as BlockFuture<ControlSignal>
        }))
    }

    /// Add a command block
    pub fn command<F, Fut>(self, opcode: &str, handler: F) -> Self
    where
        F: Fn(C) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = EngineResult<ControlSignal>> + Send + 'static,
    {
        self.insert(opcode, BlockKind::Command, Self::command_handler(handler))
    }

    /// Add a hat block
    pub fn hat<F, Fut>(self, opcode: &str, handler: F) -> Self
    where
        F: Fn(C) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = EngineResult<ControlSignal>> + Send + 'static,
    {
        self.insert(opcode, BlockKind::Hat, Self::command_handler(handler))
    }

    /// Add a reporter block
    pub fn reporter<F, Fut>(self, opcode: &str, handler: F) -> Self
    where
        F: Fn(C) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = EngineResult<Value>> + Send + 'static,
    {
        let handler: ReporterHandler<C> =
            Arc::new(move |ctx| Box::pin(handler(ctx)) as BlockFuture<Value>);
        self.insert(opcode, BlockKind::Reporter, Handler::Reporter(handler))
    }

    /// Declare a menu for an input of an already added block
    pub fn menu(mut self, opcode: &str, input: &str, menu: MenuBlock) -> Self {
        if let Some(block) = self.blocks.get_mut(opcode) {
            block.menus.insert(input.to_string(), menu);
        }
        self
    }
}

impl<C> Extension<C> {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn block(&self, opcode: &str) -> Option<&BlockSpec<C>> {
        self.blocks.get(opcode)
    }

    /// Opcodes in registration order
    pub fn opcodes(&self) -> impl Iterator<Item = &str> {
        self.blocks.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }
}
