//! YAML configuration for the block engine
//!
//! A single `blockwork.yaml` file configures where tabs are stored, the
//! default log filter and the interpreter tunables. Every key is optional.
//!
//! # Example
//!
//! ```yaml
//! tabs_dir: /var/lib/blockwork/tabs
//! general_tab: main
//! log_level: info
//! loop_interval_ms: 250
//! poll_interval_ms: 1000
//! max_depth: 256
//! notification_capacity: 500
//! ```

mod engine_config;
mod error;

pub use engine_config::{EngineConfig, CONFIG_FILE};
pub use error::{ConfigError, ConfigResult};
