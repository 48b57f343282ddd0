//! Engine configuration
//!
//! Parses `blockwork.yaml` into [`EngineConfig`]

use crate::error::{ConfigError, ConfigResult};
use bw_interpreter::{EngineSettings, MIN_LOOP_INTERVAL};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

/// Default configuration file name inside the config directory
pub const CONFIG_FILE: &str = "blockwork.yaml";

/// Engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EngineConfig {
    /// Directory holding one `<tab id>.json` file per tab
    #[serde(default = "default_tabs_dir")]
    pub tabs_dir: PathBuf,

    /// Id of the tab that always exists
    #[serde(default = "default_general_tab")]
    pub general_tab: String,

    /// Log filter used when `RUST_LOG` is not set
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Pause between iterations of unbounded loops, at least 100
    #[serde(default = "default_loop_interval_ms")]
    pub loop_interval_ms: u64,

    /// Timeout of each lock await in polling blocks
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Maximum nesting of evaluated blocks
    #[serde(default = "default_max_depth")]
    pub max_depth: usize,

    /// Number of operator notifications kept
    #[serde(default = "default_notification_capacity")]
    pub notification_capacity: usize,
}

fn default_tabs_dir() -> PathBuf {
    PathBuf::from("tabs")
}

fn default_general_tab() -> String {
    bw_core::GENERAL_TAB.to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_loop_interval_ms() -> u64 {
    MIN_LOOP_INTERVAL.as_millis() as u64
}

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_max_depth() -> usize {
    256
}

fn default_notification_capacity() -> usize {
    500
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            tabs_dir: default_tabs_dir(),
            general_tab: default_general_tab(),
            log_level: default_log_level(),
            loop_interval_ms: default_loop_interval_ms(),
            poll_interval_ms: default_poll_interval_ms(),
            max_depth: default_max_depth(),
            notification_capacity: default_notification_capacity(),
        }
    }
}

impl EngineConfig {
    /// Load configuration from a YAML file
    ///
    /// Relative `tabs_dir` paths are resolved against the file's directory.
    pub fn load(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let path = path.as_ref();
        debug!("Loading configuration file: {:?}", path);

        let content = fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
            path: path.to_path_buf(),
            source: e,
        })?;
        let mut config = Self::from_yaml_str(&content, path)?;

        if config.tabs_dir.is_relative() {
            if let Some(base) = path.parent() {
                config.tabs_dir = base.join(&config.tabs_dir);
            }
        }
        Ok(config)
    }

    /// Load `blockwork.yaml` from a config directory, or use defaults when
    /// the file does not exist
    pub fn load_or_default(config_dir: impl AsRef<Path>) -> ConfigResult<Self> {
        let config_dir = config_dir.as_ref();
        let path = config_dir.join(CONFIG_FILE);
        if !path.exists() {
            debug!("No {} found at {:?}, using defaults", CONFIG_FILE, path);
            return Ok(Self {
                tabs_dir: config_dir.join(default_tabs_dir()),
                ..Default::default()
            });
        }
        Self::load(path)
    }

    /// Parse configuration from YAML text
    ///
    /// An empty document yields the defaults.
    pub fn from_yaml_str(content: &str, source_path: &Path) -> ConfigResult<Self> {
        let config: Self = if content.trim().is_empty() {
            Self::default()
        } else {
            serde_yaml::from_str(content).map_err(|e| ConfigError::ParseYaml {
                path: source_path.to_path_buf(),
                source: e,
            })?
        };
        config.validate()?;
        Ok(config)
    }

    /// Reject values the engine can not run with
    pub fn validate(&self) -> ConfigResult<()> {
        if self.general_tab.trim().is_empty() {
            return Err(invalid("general_tab", "must not be empty"));
        }
        if self.poll_interval_ms == 0 {
            return Err(invalid("poll_interval_ms", "must be greater than zero"));
        }
        if self.max_depth == 0 {
            return Err(invalid("max_depth", "must be greater than zero"));
        }
        if self.notification_capacity == 0 {
            return Err(invalid("notification_capacity", "must be greater than zero"));
        }
        Ok(())
    }

    /// Interpreter tunables
    ///
    /// A loop interval below the minimum is raised to it.
    pub fn to_settings(&self) -> EngineSettings {
        let mut loop_interval = Duration::from_millis(self.loop_interval_ms);
        if loop_interval < MIN_LOOP_INTERVAL {
            warn!(
                configured_ms = self.loop_interval_ms,
                minimum_ms = MIN_LOOP_INTERVAL.as_millis() as u64,
                "Loop interval below minimum, using minimum"
            );
            loop_interval = MIN_LOOP_INTERVAL;
        }
        EngineSettings {
            loop_interval,
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            max_depth: self.max_depth,
        }
    }
}

fn invalid(key: &str, reason: &str) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    fn parse(yaml: &str) -> ConfigResult<EngineConfig> {
        EngineConfig::from_yaml_str(yaml, Path::new("blockwork.yaml"))
    }

    #[test]
    fn test_default_config() {
        let config = EngineConfig::default();
        assert_eq!(config.general_tab, "main");
        assert_eq!(config.log_level, "info");
        assert_eq!(config.loop_interval_ms, 100);
        assert_eq!(config.tabs_dir, PathBuf::from("tabs"));
    }

    #[test]
    fn test_empty_document_uses_defaults() {
        assert_eq!(parse("").unwrap(), EngineConfig::default());
    }

    #[test]
    fn test_parse_from_yaml() {
        let config = parse(
            r#"
general_tab: home
log_level: debug
loop_interval_ms: 250
poll_interval_ms: 500
"#,
        )
        .unwrap();

        assert_eq!(config.general_tab, "home");
        assert_eq!(config.log_level, "debug");
        assert_eq!(config.loop_interval_ms, 250);
        assert_eq!(config.max_depth, 256);

        let settings = config.to_settings();
        assert_eq!(settings.loop_interval, Duration::from_millis(250));
        assert_eq!(settings.poll_interval, Duration::from_millis(500));
    }

    #[test]
    fn test_loop_interval_is_clamped() {
        let config = parse("loop_interval_ms: 10").unwrap();
        assert_eq!(config.to_settings().loop_interval, MIN_LOOP_INTERVAL);
    }

    #[test]
    fn test_invalid_values() {
        for yaml in ["poll_interval_ms: 0", "max_depth: 0", "general_tab: ''"] {
            assert!(
                matches!(parse(yaml), Err(ConfigError::InvalidValue { .. })),
                "{}",
                yaml
            );
        }
        assert!(matches!(
            parse("tab_dir: typo"),
            Err(ConfigError::ParseYaml { .. })
        ));
    }

    #[test]
    fn test_load_resolves_tabs_dir() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        let mut file = fs::File::create(&path).unwrap();
        writeln!(file, "tabs_dir: workspaces").unwrap();

        let config = EngineConfig::load(&path).unwrap();
        assert_eq!(config.tabs_dir, dir.path().join("workspaces"));
    }

    #[test]
    fn test_load_or_default_without_file() {
        let dir = TempDir::new().unwrap();
        let config = EngineConfig::load_or_default(dir.path()).unwrap();
        assert_eq!(config.tabs_dir, dir.path().join("tabs"));
        assert_eq!(config.poll_interval_ms, 1000);
    }

    #[test]
    fn test_missing_file_errors() {
        let dir = TempDir::new().unwrap();
        let err = EngineConfig::load(dir.path().join("absent.yaml")).unwrap_err();
        assert!(matches!(err, ConfigError::ReadFile { .. }));
    }
}
