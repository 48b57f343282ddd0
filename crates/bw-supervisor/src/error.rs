//! Supervisor error types

use bw_core::EngineError;
use thiserror::Error;

/// Errors raised while managing tabs
#[derive(Debug, Clone, Error)]
pub enum SupervisorError {
    #[error("tab '{0}' not found")]
    TabNotFound(String),

    #[error("tab '{0}' already exists")]
    TabExists(String),

    #[error("the general tab '{0}' can not be deleted")]
    GeneralTabNotDeletable(String),

    #[error("tab '{0}' still has content and can not be deleted")]
    TabNotEmpty(String),

    #[error("tab '{0}' is not running")]
    NotRunning(String),

    #[error(transparent)]
    Engine(#[from] EngineError),
}

/// Result type for supervisor operations
pub type SupervisorResult<T> = Result<T, SupervisorError>;
