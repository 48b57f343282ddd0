//! Tab supervisor
//!
//! This crate owns the lifecycle of tabs: it keeps their content, parses it
//! into a fresh [`TabRuntime`](bw_interpreter::TabRuntime) generation,
//! starts one tracked task per top-level tree and tears the generation down
//! again on reload, delete or shutdown.
//!
//! # Starting a tab
//!
//! 1. Locks of the previous generation are released, then its release
//!    listeners run and its tasks are cancelled and awaited
//! 2. The content is parsed and its declared variables registered
//! 3. Once-execution roots (procedure definitions, links) are handled inline
//! 4. Hat roots are started and given a moment to subscribe
//! 5. Every other root gets a task

pub mod error;
pub mod supervisor;

pub use error::{SupervisorError, SupervisorResult};
pub use supervisor::{SharedSupervisor, Supervisor, TabInfo, TabSource, TabStatus};
