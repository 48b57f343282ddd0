//! Blockwork Server
//!
//! Loads the configuration and every tab of the tabs directory, then runs
//! them until interrupted.
//!
//! Usage: `blockwork [CONFIG_DIR]` (defaults to the current directory)

mod tabs;

use anyhow::Result;
use bw_config::EngineConfig;
use bw_core::Notifications;
use bw_interpreter::{BlockRegistry, EngineContext};
use bw_locks::LockManager;
use bw_supervisor::Supervisor;
use bw_variables::MemoryVariableStore;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// The running engine
pub struct Blockwork {
    pub config: EngineConfig,
    pub supervisor: Arc<Supervisor>,
}

impl Blockwork {
    /// Build the engine described by `config`
    pub fn new(config: EngineConfig) -> Result<Self> {
        let registry = Arc::new(BlockRegistry::new());
        bw_blocks::register_core_extensions(&registry)?;

        let locks = Arc::new(LockManager::new());
        let variables = Arc::new(MemoryVariableStore::new(locks.clone()));
        let notifications = Arc::new(Notifications::with_capacity(config.notification_capacity));
        let engine = EngineContext::new(registry, locks, variables, notifications)
            .with_settings(config.to_settings());

        let supervisor =
            Supervisor::new(Arc::new(engine)).with_general_tab(config.general_tab.clone());

        Ok(Self {
            config,
            supervisor: Arc::new(supervisor),
        })
    }

    /// Load and start every tab of the tabs directory
    pub async fn start(&self) -> Result<usize> {
        let sources = tabs::load_tab_sources(&self.config.tabs_dir)?;
        info!(
            tabs = sources.len(),
            dir = ?self.config.tabs_dir,
            "Loading tabs"
        );
        Ok(self.supervisor.load_all(sources).await)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let config_dir = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."));
    let config = EngineConfig::load_or_default(&config_dir)?;

    // RUST_LOG wins over the configured level
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))?;
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(true)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    info!("Starting Blockwork");

    let blockwork = Blockwork::new(config)?;
    let loaded = blockwork.start().await?;

    info!(loaded, "Blockwork is running");

    tokio::signal::ctrl_c().await?;
    info!("Shutting down...");
    blockwork.supervisor.shutdown().await;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use bw_supervisor::TabStatus;
    use std::fs;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_start_loads_tabs_directory() {
        let dir = TempDir::new().unwrap();
        let config = EngineConfig {
            tabs_dir: dir.path().to_path_buf(),
            ..Default::default()
        };
        fs::write(
            dir.path().join("hello.json"),
            r#"{"target": {"blocks": {"p": {
                "opcode": "debug_print",
                "topLevel": true,
                "inputs": {"TEXT": [1, [10, "hello"]]}
            }}}}"#,
        )
        .unwrap();

        let blockwork = Blockwork::new(config).unwrap();
        assert_eq!(blockwork.start().await.unwrap(), 2);

        let tabs = blockwork.supervisor.tabs().await;
        let ids: Vec<&str> = tabs.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, vec!["hello", "main"]);
        assert_eq!(tabs[1].status, TabStatus::Unloaded);

        blockwork.supervisor.shutdown().await;
    }
}
