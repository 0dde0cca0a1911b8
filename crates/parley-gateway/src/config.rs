//! Gateway configuration: TOML file + CLI overrides.

use crate::moderation::SpamConfig;
use parley_core::{ParleyError, ParleyResult};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::path::Path;
use std::time::Duration;
use tracing::info;

/// Top-level config file structure.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub gateway: GatewaySection,
    #[serde(default)]
    pub directory: DirectorySection,
    #[serde(default)]
    pub moderation: ModerationSection,
}

/// `[gateway]` section of the config TOML.
#[derive(Debug, Clone, Deserialize)]
pub struct GatewaySection {
    #[serde(default = "default_name")]
    pub name: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_public_host")]
    pub public_host: String,
    #[serde(default = "default_max_users")]
    pub max_users: usize,
    /// Entry password; empty means open access.
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub description: String,
    /// Key required on `/admin/*` requests; empty disables the admin surface.
    #[serde(default)]
    pub operator_key: String,
}

impl Default for GatewaySection {
    fn default() -> Self {
        Self {
            name: default_name(),
            port: default_port(),
            public_host: default_public_host(),
            max_users: default_max_users(),
            password: String::new(),
            description: String::new(),
            operator_key: String::new(),
        }
    }
}

/// `[directory]` section of the config TOML.
#[derive(Debug, Clone, Deserialize)]
pub struct DirectorySection {
    /// Base URL of the directory service; empty runs the gateway unlisted.
    #[serde(default)]
    pub url: String,
    #[serde(default = "default_heartbeat_secs")]
    pub heartbeat_secs: u64,
    #[serde(default = "default_register_attempts")]
    pub register_attempts: u32,
    #[serde(default = "default_register_delay_secs")]
    pub register_delay_secs: u64,
}

impl Default for DirectorySection {
    fn default() -> Self {
        Self {
            url: String::new(),
            heartbeat_secs: default_heartbeat_secs(),
            register_attempts: default_register_attempts(),
            register_delay_secs: default_register_delay_secs(),
        }
    }
}

/// `[moderation]` section of the config TOML.
#[derive(Debug, Clone, Deserialize)]
pub struct ModerationSection {
    #[serde(default = "default_spam_limit")]
    pub spam_limit: u32,
    #[serde(default = "default_warning_threshold")]
    pub warning_threshold: u32,
    #[serde(default = "default_spam_window_secs")]
    pub spam_window_secs: u64,
    #[serde(default = "default_spam_ban_minutes")]
    pub spam_ban_minutes: u64,
}

impl Default for ModerationSection {
    fn default() -> Self {
        Self {
            spam_limit: default_spam_limit(),
            warning_threshold: default_warning_threshold(),
            spam_window_secs: default_spam_window_secs(),
            spam_ban_minutes: default_spam_ban_minutes(),
        }
    }
}

fn default_name() -> String {
    "parley".to_string()
}
fn default_port() -> u16 {
    8100
}
fn default_public_host() -> String {
    "127.0.0.1".to_string()
}
fn default_max_users() -> usize {
    100
}
fn default_heartbeat_secs() -> u64 {
    30
}
fn default_register_attempts() -> u32 {
    5
}
fn default_register_delay_secs() -> u64 {
    60
}
fn default_spam_limit() -> u32 {
    10
}
fn default_warning_threshold() -> u32 {
    8
}
fn default_spam_window_secs() -> u64 {
    60
}
fn default_spam_ban_minutes() -> u64 {
    60
}

/// Resolved gateway configuration (CLI overrides applied).
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub name: String,
    /// HTTP port; the WebSocket listener binds `port + 1`.
    pub port: u16,
    pub public_host: String,
    pub max_users: usize,
    /// SHA-256 of the entry password; `None` means open access.
    pub password_hash: Option<Vec<u8>>,
    pub description: String,
    pub operator_key: Option<String>,
    pub directory_url: Option<String>,
    pub heartbeat_interval: Duration,
    pub register_attempts: u32,
    pub register_delay: Duration,
    pub spam: SpamConfig,
}

impl GatewayConfig {
    /// Load config from TOML file, then apply CLI overrides.
    pub fn load(
        config_path: Option<&Path>,
        cli_name: Option<&str>,
        cli_port: Option<u16>,
        cli_directory_url: Option<&str>,
        cli_max_users: Option<usize>,
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

        let gateway = file_config.gateway;
        let directory = file_config.directory;
        let moderation = file_config.moderation;

        let name = cli_name.map(str::to_string).unwrap_or(gateway.name);
        if name.trim().is_empty() {
            return Err(ParleyError::Validation("gateway name is empty".into()));
        }

        let directory_url = cli_directory_url
            .map(str::to_string)
            .unwrap_or(directory.url);

        Ok(Self {
            name,
            port: cli_port.unwrap_or(gateway.port),
            public_host: gateway.public_host,
            max_users: cli_max_users.unwrap_or(gateway.max_users),
            password_hash: non_empty(gateway.password)
                .map(|p| Sha256::digest(p.as_bytes()).to_vec()),
            description: gateway.description,
            operator_key: non_empty(gateway.operator_key),
            directory_url: non_empty(directory_url).map(|u| u.trim_end_matches('/').to_string()),
            heartbeat_interval: Duration::from_secs(directory.heartbeat_secs.max(1)),
            register_attempts: directory.register_attempts.max(1),
            register_delay: Duration::from_secs(directory.register_delay_secs),
            spam: SpamConfig {
                spam_limit: moderation.spam_limit,
                warning_threshold: moderation.warning_threshold,
                window: Duration::from_secs(moderation.spam_window_secs.max(1)),
                ban_minutes: moderation.spam_ban_minutes,
                ..SpamConfig::default()
            },
        })
    }

    /// Port the WebSocket listener binds.
    pub fn ws_port(&self) -> u16 {
        self.port + 1
    }

    pub fn password_required(&self) -> bool {
        self.password_hash.is_some()
    }

    /// Check a supplied password against the stored hash. Open gateways
    /// accept anything, including no password at all.
    pub fn password_matches(&self, provided: Option<&str>) -> bool {
        match &self.password_hash {
            None => true,
            Some(hash) => provided
                .is_some_and(|p| Sha256::digest(p.as_bytes()).as_slice() == hash.as_slice()),
        }
    }
}

fn non_empty(s: String) -> Option<String> {
    let trimmed = s.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_without_file() {
        let config = GatewayConfig::load(None, None, None, None, None).unwrap();
        assert_eq!(config.port, 8100);
        assert_eq!(config.ws_port(), 8101);
        assert_eq!(config.max_users, 100);
        assert!(!config.password_required());
        assert!(config.password_matches(None));
        assert!(config.directory_url.is_none());
        assert_eq!(config.heartbeat_interval, Duration::from_secs(30));
        assert_eq!(config.spam.spam_limit, 10);
    }

    #[test]
    fn cli_overrides_file_values() {
        let config =
            GatewayConfig::load(None, Some("lobby"), Some(9000), Some("http://dir:8080/"), None)
                .unwrap();
        assert_eq!(config.name, "lobby");
        assert_eq!(config.port, 9000);
        // Trailing slash is normalized away.
        assert_eq!(config.directory_url.as_deref(), Some("http://dir:8080"));
    }

    #[test]
    fn toml_sections_parse() {
        let parsed: ConfigFile = toml::from_str(
            r#"
            [gateway]
            name = "harbor"
            port = 8200
            password = "sekrit"

            [directory]
            url = "http://localhost:8080"
            heartbeat_secs = 15

            [moderation]
            spam_limit = 20
            "#,
        )
        .unwrap();
        assert_eq!(parsed.gateway.name, "harbor");
        assert_eq!(parsed.gateway.port, 8200);
        assert_eq!(parsed.directory.heartbeat_secs, 15);
        assert_eq!(parsed.moderation.spam_limit, 20);
        // Unset fields fall back to section defaults.
        assert_eq!(parsed.moderation.warning_threshold, 8);
    }

    #[test]
    fn password_is_stored_hashed() {
        let dir = std::env::temp_dir().join("parley-gateway-config-test");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("protected.toml");
        std::fs::write(&path, "[gateway]\npassword = \"sekrit\"\n").unwrap();

        let config = GatewayConfig::load(Some(&path), None, None, None, None).unwrap();
        assert!(config.password_required());
        assert!(config.password_matches(Some("sekrit")));
        assert!(!config.password_matches(Some("wrong")));
        assert!(!config.password_matches(None));
        // The plaintext never survives loading.
        assert_ne!(config.password_hash.as_deref(), Some(b"sekrit".as_slice()));
    }

    #[test]
    fn blank_name_is_rejected() {
        let dir = std::env::temp_dir().join("parley-gateway-config-test");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("bad.toml");
        std::fs::write(&path, "[gateway]\nname = \"  \"\n").unwrap();
        let err = GatewayConfig::load(Some(&path), None, None, None, None).unwrap_err();
        assert!(matches!(err, ParleyError::Validation(_)));
    }
}
