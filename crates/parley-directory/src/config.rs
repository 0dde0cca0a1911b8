//! Directory service configuration: TOML file + CLI overrides.

use parley_core::{ParleyError, ParleyResult};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use tracing::info;

/// Top-level config file structure.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub directory: DirectorySection,
}

/// `[directory]` section of the config TOML.
#[derive(Debug, Clone, Deserialize)]
pub struct DirectorySection {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
    /// Probe `GET /health` on online gateways during each sweep.
    #[serde(default)]
    pub probe_health: bool,
}

impl Default for DirectorySection {
    fn default() -> Self {
        Self {
            port: default_port(),
            sweep_interval_secs: default_sweep_interval_secs(),
            probe_health: false,
        }
    }
}

fn default_port() -> u16 {
    8080
}
fn default_sweep_interval_secs() -> u64 {
    300
}

/// Resolved configuration (CLI overrides applied).
#[derive(Debug, Clone)]
pub struct DirectoryConfig {
    pub port: u16,
    pub sweep_interval: Duration,
    pub probe_health: bool,
}

impl DirectoryConfig {
    pub fn load(
        config_path: Option<&Path>,
        cli_port: Option<u16>,
        cli_probe_health: bool,
    ) -> ParleyResult<Self> {
        let file_config = match config_path {
            Some(path) if path.exists() => {
                info!(path = %path.display(), "loading config file");
                let content = std::fs::read_to_string(path)?;
                toml::from_str::<ConfigFile>(&content)
                    .map_err(|e| ParleyError::Validation(format!("config parse error: {e}")))?
            }
            Some(path) => {
                info!(path = %path.display(), "config file not found, using defaults");
                ConfigFile::default()
            }
            None => ConfigFile::default(),
        };

        let section = file_config.directory;
        Ok(Self {
            port: cli_port.unwrap_or(section.port),
            sweep_interval: Duration::from_secs(section.sweep_interval_secs.max(1)),
            probe_health: cli_probe_health || section.probe_health,
        })
    }
}
