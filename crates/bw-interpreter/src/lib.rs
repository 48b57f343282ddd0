//! Block interpreter
//!
//! This crate executes block graphs. Each tab generation gets a
//! [`TabRuntime`]; handlers receive a [`BlockContext`] through which they
//! read inputs, store named values, wait on locks and start tracked tasks.
//!
//! # Key Types
//!
//! - [`EngineContext`] - Registry, locks, variables and notifications
//! - [`TabRuntime`] - Graph, named values and tasks of one tab generation
//! - [`BlockContext`] - Statement (`handle`) and expression (`evaluate`) execution

pub mod block;
pub mod engine;
pub mod resolve;
pub mod runtime;

pub use block::BlockContext;
pub use engine::{EngineContext, EngineSettings, EntityResolver, SharedEngine, MIN_LOOP_INTERVAL};
pub use resolve::{InputMode, MenuTarget};
pub use runtime::{TabRuntime, TaskInfo};

/// Registry specialised to interpreter handlers
pub type BlockRegistry = bw_registry::Registry<BlockContext>;

/// Extension specialised to interpreter handlers
pub type BlockExtension = bw_registry::Extension<BlockContext>;
