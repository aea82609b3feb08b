//! Configuration management
//!
//! Config directory: ~/.cirrus/ (cross-platform)
//!
//! Config file format (~/.cirrus/config.toml):
//! ```toml
//! [cloud]
//! dispatcher_url = "https://dispatcher.cloud.mail.ru"
//! client_id = "cloud-win"
//!
//! [auth]
//! token = "..."
//! crypt_password = "..."
//!
//! [download]
//! retry_attempts = 2
//! retry_delay_ms = 1000
//! timeout_secs = 15
//! ```
//!
//! Environment variables fill in missing values; command-line flags
//! override both.

use anyhow::{Context, Result};
use cirrus_client::config::{ClientConfig, DEFAULT_CLIENT_ID, DEFAULT_DISPATCHER_URL};
use cirrus_core::retry::{RetryPolicy, DOWNLOAD_RETRY_ATTEMPTS, DOWNLOAD_RETRY_DELAY};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Structure of ~/.cirrus/config.toml
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CirrusConfig {
    #[serde(default)]
    pub cloud: CloudSettings,

    #[serde(default)]
    pub auth: AuthSettings,

    #[serde(default)]
    pub download: DownloadSettings,
}

/// Endpoint settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CloudSettings {
    /// Dispatcher handing out shard endpoints
    #[serde(default = "default_dispatcher_url")]
    pub dispatcher_url: String,

    #[serde(default = "default_client_id")]
    pub client_id: String,
}

impl Default for CloudSettings {
    fn default() -> Self {
        Self {
            dispatcher_url: default_dispatcher_url(),
            client_id: default_client_id(),
        }
    }
}

fn default_dispatcher_url() -> String {
    std::env::var("CIRRUS_DISPATCHER_URL").unwrap_or_else(|_| DEFAULT_DISPATCHER_URL.to_string())
}

fn default_client_id() -> String {
    DEFAULT_CLIENT_ID.to_string()
}

/// Credentials
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AuthSettings {
    /// Download access token
    #[serde(default = "default_token", skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,

    /// Password protecting encrypted files
    #[serde(default = "default_crypt_password", skip_serializing_if = "Option::is_none")]
    pub crypt_password: Option<String>,
}

fn default_token() -> Option<String> {
    std::env::var("CIRRUS_TOKEN").ok()
}

fn default_crypt_password() -> Option<String> {
    std::env::var("CIRRUS_CRYPT_PASSWORD").ok()
}

/// Download tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadSettings {
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,

    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for DownloadSettings {
    fn default() -> Self {
        Self {
            retry_attempts: default_retry_attempts(),
            retry_delay_ms: default_retry_delay_ms(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_retry_attempts() -> u32 {
    DOWNLOAD_RETRY_ATTEMPTS
}

fn default_retry_delay_ms() -> u64 {
    DOWNLOAD_RETRY_DELAY.as_millis() as u64
}

fn default_timeout_secs() -> u64 {
    15
}

impl CirrusConfig {
    /// Parse a config file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        toml::from_str(&content).context("Failed to parse config file")
    }

    /// Client settings derived from this config
    pub fn client_config(&self) -> ClientConfig {
        let mut config = ClientConfig::new(self.cloud.dispatcher_url.clone())
            .with_client_id(self.cloud.client_id.clone())
            .with_download_retry(RetryPolicy::new(
                self.download.retry_attempts,
                Duration::from_millis(self.download.retry_delay_ms),
            ));
        config.timeout = Duration::from_secs(self.download.timeout_secs);
        config
    }

    /// Update a value by dotted key
    pub fn set(&mut self, key: &str, value: String) -> Result<()> {
        match key {
            "cloud.dispatcher_url" => self.cloud.dispatcher_url = value,
            "cloud.client_id" => self.cloud.client_id = value,
            "auth.token" => self.auth.token = Some(value),
            "auth.crypt_password" => self.auth.crypt_password = Some(value),
            "download.retry_attempts" => {
                self.download.retry_attempts = value.parse().context("retry_attempts must be a number")?
            }
            "download.retry_delay_ms" => {
                self.download.retry_delay_ms = value.parse().context("retry_delay_ms must be a number")?
            }
            "download.timeout_secs" => {
                self.download.timeout_secs = value.parse().context("timeout_secs must be a number")?
            }
            _ => anyhow::bail!(
                "Unknown config key: {}. Valid keys: cloud.dispatcher_url, cloud.client_id, auth.token, auth.crypt_password, download.retry_attempts, download.retry_delay_ms, download.timeout_secs",
                key
            ),
        }
        Ok(())
    }
}

/// Get the config directory path (~/.cirrus/)
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir().context("Could not determine home directory")?;
    Ok(home.join(".cirrus"))
}

/// Get the config file path
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join("config.toml"))
}

/// Load configuration from ~/.cirrus/config.toml.
/// Falls back to defaults if the file doesn't exist or is unreadable.
pub fn load_config() -> CirrusConfig {
    match config_file_path() {
        Ok(path) if path.exists() => match CirrusConfig::from_file(&path) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Ignoring config file");
                CirrusConfig::default()
            }
        },
        _ => CirrusConfig::default(),
    }
}

/// Save configuration to ~/.cirrus/config.toml
pub fn save_config(config: &CirrusConfig) -> Result<()> {
    let dir = config_dir()?;
    fs::create_dir_all(&dir).context("Failed to create config directory ~/.cirrus/")?;

    let path = dir.join("config.toml");
    let content = toml::to_string_pretty(config).context("Failed to serialize config")?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::write(&path, &content).context("Failed to write config file")?;
        // The file may hold a token and the crypt password
        fs::set_permissions(&path, fs::Permissions::from_mode(0o600))?;
    }

    #[cfg(not(unix))]
    {
        fs::write(&path, content).context("Failed to write config file")?;
    }

    Ok(())
}
