//! Shared engine collaborators

use crate::BlockRegistry;
use bw_core::{Notifications, Value};
use bw_locks::LockManager;
use bw_variables::VariableStore;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Lower bound for the interval between loop iterations
pub const MIN_LOOP_INTERVAL: Duration = Duration::from_millis(100);

/// Runtime tunables of the interpreter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineSettings {
    /// Pause between iterations of unbounded loops
    pub loop_interval: Duration,
    /// Timeout of each lock await in polling blocks such as `wait_until`
    pub poll_interval: Duration,
    /// Maximum nesting of evaluated blocks
    pub max_depth: usize,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            loop_interval: MIN_LOOP_INTERVAL,
            poll_interval: Duration::from_secs(1),
            max_depth: 256,
        }
    }
}

impl EngineSettings {
    /// Settings with the loop interval clamped to [`MIN_LOOP_INTERVAL`]
    pub fn normalized(mut self) -> Self {
        self.loop_interval = self.loop_interval.max(MIN_LOOP_INTERVAL);
        self.max_depth = self.max_depth.max(1);
        self
    }
}

/// Resolves entity ids selected in menus
pub trait EntityResolver: Send + Sync {
    fn resolve(&self, entity_id: &str) -> Option<Value>;
}

/// Everything block handlers can reach besides their own tab
///
/// Passed explicitly to every runtime; there are no process-wide singletons.
pub struct EngineContext {
    registry: Arc<BlockRegistry>,
    locks: Arc<LockManager>,
    variables: Arc<dyn VariableStore>,
    notifications: Arc<Notifications>,
    entities: Option<Arc<dyn EntityResolver>>,
    settings: EngineSettings,
}

impl EngineContext {
    pub fn new(
        registry: Arc<BlockRegistry>,
        locks: Arc<LockManager>,
        variables: Arc<dyn VariableStore>,
        notifications: Arc<Notifications>,
    ) -> Self {
        Self {
            registry,
            locks,
            variables,
            notifications,
            entities: None,
            settings: EngineSettings::default(),
        }
    }

    pub fn with_settings(mut self, settings: EngineSettings) -> Self {
        self.settings = settings.normalized();
        self
    }

    pub fn with_entity_resolver(mut self, resolver: Arc<dyn EntityResolver>) -> Self {
        self.entities = Some(resolver);
        self
    }

    pub fn registry(&self) -> &Arc<BlockRegistry> {
        &self.registry
    }

    pub fn locks(&self) -> &Arc<LockManager> {
        &self.locks
    }

    pub fn variables(&self) -> &Arc<dyn VariableStore> {
        &self.variables
    }

    pub fn notifications(&self) -> &Arc<Notifications> {
        &self.notifications
    }

    pub fn entities(&self) -> Option<&Arc<dyn EntityResolver>> {
        self.entities.as_ref()
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }
}

/// Thread-safe wrapper for EngineContext
pub type SharedEngine = Arc<EngineContext>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settings_clamp_loop_interval() {
        let settings = EngineSettings {
            loop_interval: Duration::from_millis(5),
            poll_interval: Duration::from_millis(50),
            max_depth: 0,
        }
        .normalized();

        assert_eq!(settings.loop_interval, MIN_LOOP_INTERVAL);
        assert_eq!(settings.max_depth, 1);
    }
}
