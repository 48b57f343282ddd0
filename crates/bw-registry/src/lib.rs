//! Opcode registry for block extensions
//!
//! This crate provides the Registry, which maps `(extension id, opcode)`
//! pairs to block handlers. Extensions are registered once at startup and
//! looked up by the interpreter for every block it runs.
//!
//! The registry is generic over the context type handed to handlers, so the
//! interpreter decides what a handler can see.

mod extension;

pub use extension::{BlockKind, BlockSpec, Extension, Handler, MenuBlock, MenuKind};

use bw_core::{EngineError, EngineResult, OpcodeId, Value};
use dashmap::DashMap;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, OnceLock};
use thiserror::Error;
use tracing::{debug, instrument, warn};

/// Outcome of a command handler
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ControlSignal {
    /// Proceed with the next block
    Continue,
    /// End the chain and every enclosing loop
    Stop,
}

/// Future type for async block handlers
pub type BlockFuture<T> = Pin<Box<dyn Future<Output = EngineResult<T>> + Send>>;

/// Handler of command and hat blocks
pub type CommandHandler<C> = Arc<dyn Fn(C) -> BlockFuture<ControlSignal> + Send + Sync>;

/// Handler of reporter blocks
pub type ReporterHandler<C> = Arc<dyn Fn(C) -> BlockFuture<Value> + Send + Sync>;

/// Errors raised while registering extensions
#[derive(Debug, Clone, Error)]
pub enum RegistryError {
    #[error("invalid extension id '{0}': only letters, digits, '_' and '-' are allowed")]
    InvalidExtensionId(String),

    #[error("extension '{0}' is already registered")]
    DuplicateExtension(String),
}

/// Result type for registry operations
pub type RegistryResult<T> = Result<T, RegistryError>;

fn valid_extension_id(id: &str) -> bool {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"^[\w-]*$").ok())
        .as_ref()
        .map(|re| re.is_match(id))
        .unwrap_or(false)
}

/// Registry of block extensions
///
/// The Registry is responsible for:
/// - Validating and registering extensions
/// - Resolving persisted opcodes to handlers
/// - Providing introspection over registered blocks
pub struct Registry<C> {
    extensions: DashMap<String, Arc<Extension<C>>>,
}

impl<C> Registry<C> {
    pub fn new() -> Self {
        Self {
            extensions: DashMap::new(),
        }
    }

    /// Register an extension
    ///
    /// Fails when the id is not `[\w-]*` or is already registered.
    #[instrument(skip(self, extension), fields(extension = %extension.id()))]
    pub fn register(&self, extension: Extension<C>) -> RegistryResult<()> {
        let id = extension.id().to_string();
        if !valid_extension_id(&id) {
            warn!("Rejecting extension with invalid id");
            return Err(RegistryError::InvalidExtensionId(id));
        }

        match self.extensions.entry(id.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                Err(RegistryError::DuplicateExtension(id))
            }
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                debug!(blocks = extension.len(), "Registering extension");
                slot.insert(Arc::new(extension));
                Ok(())
            }
        }
    }

    /// Resolve a block opcode
    pub fn lookup(&self, opcode: &OpcodeId) -> EngineResult<BlockSpec<C>> {
        let extension = self
            .extensions
            .get(opcode.extension_id())
            .map(|e| e.value().clone())
            .ok_or_else(|| EngineError::UnknownExtension {
                extension: opcode.extension_id().to_string(),
            })?;

        extension
            .block(opcode.opcode())
            .cloned()
            .ok_or_else(|| EngineError::UnknownOpcode {
                extension: opcode.extension_id().to_string(),
                opcode: opcode.opcode().to_string(),
            })
    }

    pub fn extension(&self, id: &str) -> Option<Arc<Extension<C>>> {
        self.extensions.get(id).map(|e| e.value().clone())
    }

    pub fn has_extension(&self, id: &str) -> bool {
        self.extensions.contains_key(id)
    }

    /// Registered extension ids, sorted
    pub fn extensions(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.extensions.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }

    /// Kind of a registered block
    pub fn block_kind(&self, extension: &str, opcode: &str) -> Option<BlockKind> {
        self.extensions
            .get(extension)
            .and_then(|e| e.block(opcode).map(|b| b.kind()))
    }

    /// Total number of registered blocks
    pub fn block_count(&self) -> usize {
        self.extensions.iter().map(|e| e.len()).sum()
    }
}

impl<C> Default for Registry<C> {
    fn default() -> Self {
        Self::new()
    }
}
