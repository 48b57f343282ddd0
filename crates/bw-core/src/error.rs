//! Engine error taxonomy

use thiserror::Error;

/// Result type for engine operations
pub type EngineResult<T> = Result<T, EngineError>;

/// Errors raised while loading or executing a block graph
#[derive(Debug, Clone, Error)]
pub enum EngineError {
    #[error("malformed block graph: {0}")]
    MalformedGraph(String),

    #[error("no block extension <{extension}> found")]
    UnknownExtension { extension: String },

    #[error("no block <{opcode}> found in extension <{extension}>")]
    UnknownOpcode { extension: String, opcode: String },

    #[error("malformed input '{input}': {reason}")]
    MalformedInput { input: String, reason: String },

    #[error("unable to find variable '{name}' (id: {id})")]
    UnresolvedVariable { name: String, id: String },

    #[error("unable to parse value '{value}' of input '{input}' as a number")]
    InvalidNumericInput { input: String, value: String },

    #[error("unable to handle menu value with type: {target}")]
    UnsupportedMenuType { target: String },

    #[error("lock '{key}' not found in tab '{tab}'")]
    LockNotFound { tab: String, key: String },

    #[error("lock '{key}' was released while waiting")]
    LockReleased { key: String },

    #[error("{0}")]
    Handler(String),

    #[error("[{tab}] {extension} -> {opcode} ({block_id}): {source}")]
    Block {
        tab: String,
        block_id: String,
        extension: String,
        opcode: String,
        #[source]
        source: Box<EngineError>,
    },
}

impl EngineError {
    /// Shorthand for a free-form handler failure
    pub fn handler(message: impl Into<String>) -> Self {
        Self::Handler(message.into())
    }

    /// Annotate the error with the block it was raised in
    ///
    /// The innermost block wins: an error that already names a block is
    /// returned unchanged, so nested evaluation reports the real culprit.
    pub fn at_block(self, tab: &str, block_id: &str, extension: &str, opcode: &str) -> Self {
        match self {
            Self::Block { .. } => self,
            other => Self::Block {
                tab: tab.to_string(),
                block_id: block_id.to_string(),
                extension: extension.to_string(),
                opcode: opcode.to_string(),
                source: Box::new(other),
            },
        }
    }

    /// The error without its block annotation
    pub fn root_cause(&self) -> &EngineError {
        match self {
            Self::Block { source, .. } => source.root_cause(),
            other => other,
        }
    }
}
