//! Minimal configuration loading for eegscope.
//!
//! Configuration is split into two categories:
//!
//! - **Infrastructure** (`InfraConfig`): paths, bind address, telemetry.
//!   Fixed for the lifetime of the process.
//!
//! - **Bootstrap** (`BootstrapConfig`): session lifecycle and pipeline
//!   defaults that seed the runtime.
//!
//! # Config File Locations
//!
//! Files are loaded in order (later wins):
//! 1. `/etc/eegscope/config.toml` (system)
//! 2. `~/.config/eegscope/config.toml` (user)
//! 3. `./eegscope.toml` (local override, replaced by an explicit `--config`)
//! 4. Environment variables (`EEGSCOPE_*`)
//!
//! # Example Config
//!
//! ```toml
//! [paths]
//! data_root = "~/eeg-data"
//!
//! [bind]
//! host = "0.0.0.0"
//! http_port = 8000
//!
//! [telemetry]
//! log_level = "info"
//! otlp_endpoint = ""
//!
//! [sessions]
//! idle_threshold = "5h"
//! sweep_interval = "10m"
//!
//! [pipeline]
//! montage = "standard_1020"
//! data_suffixes = ["data.bdf"]
//! experiments = ["RSVP", "MI", "SSVEP"]
//! ```

pub mod bootstrap;
pub mod infra;
pub mod loader;

pub use bootstrap::{parse_duration, BootstrapConfig, PipelineConfig, SessionsConfig};
pub use infra::{BindConfig, InfraConfig, PathsConfig, TelemetryConfig};
pub use loader::{discover_config_files_with_override, ConfigSources};

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Configuration loading errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("Invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },
}

/// Complete eegscope configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EegscopeConfig {
    #[serde(flatten)]
    pub infra: InfraConfig,

    #[serde(flatten)]
    pub bootstrap: BootstrapConfig,
}

impl EegscopeConfig {
    /// Load configuration from all standard sources.
    pub fn load() -> Result<Self, ConfigError> {
        let (config, _sources) = Self::load_with_sources_from(None)?;
        Ok(config)
    }

    /// Load configuration, letting `config_path` replace `./eegscope.toml`.
    pub fn load_from(config_path: Option<&Path>) -> Result<Self, ConfigError> {
        let (config, _sources) = Self::load_with_sources_from(config_path)?;
        Ok(config)
    }

    /// Load configuration and report which files and env vars contributed.
    pub fn load_with_sources_from(
        config_path: Option<&Path>,
    ) -> Result<(Self, ConfigSources), ConfigError> {
        let mut sources = ConfigSources::default();
        let mut merged = toml::Table::new();

        for path in loader::discover_config_files_with_override(config_path) {
            let table = loader::load_table(&path)?;
            loader::merge_tables(&mut merged, table);
            sources.files.push(path);
        }

        let mut config = loader::from_table(merged, sources.files.last().map(PathBuf::as_path))?;
        loader::apply_env_overrides(&mut config, &mut sources);
        config.infra.paths.data_root =
            loader::expand_path(&config.infra.paths.data_root.to_string_lossy());

        config.validate()?;
        Ok((config, sources))
    }

    /// Check values that only fail when used.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.bootstrap.sessions.idle_threshold()?;
        self.bootstrap.sessions.sweep_interval()?;
        if self.bootstrap.pipeline.data_suffixes.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "pipeline.data_suffixes".to_string(),
                message: "at least one suffix is required".to_string(),
            });
        }
        Ok(())
    }

    /// Serialize config to TOML string.
    pub fn to_toml(&self) -> String {
        let mut output = String::from("# eegscope configuration\n\n");
        match toml::to_string_pretty(self) {
            Ok(body) => output.push_str(&body),
            Err(e) => output.push_str(&format!("# failed to render config: {}\n", e)),
        }
        output
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = EegscopeConfig::default();
        assert_eq!(config.infra.bind.http_port, 8000);
        assert_eq!(config.bootstrap.pipeline.montage, "standard_1020");
        assert!(!config.infra.telemetry.otlp_enabled());
    }

    #[test]
    fn test_to_toml() {
        let config = EegscopeConfig::default();
        let toml = config.to_toml();
        assert!(toml.contains("[paths]"));
        assert!(toml.contains("[bind]"));
        assert!(toml.contains("[sessions]"));
        assert!(toml.contains("standard_1020"));
    }

    #[test]
    fn test_empty_suffixes_rejected() {
        let mut config = EegscopeConfig::default();
        config.bootstrap.pipeline.data_suffixes.clear();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { .. })
        ));
    }
}
