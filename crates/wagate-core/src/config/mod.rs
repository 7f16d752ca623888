mod defaults;


use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::WagateError;
use defaults::*;

/// Top-level wagate configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub wagate: WagateConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub whatsapp: WhatsAppConfig,
    #[serde(default)]
    pub uploads: UploadConfig,
    #[serde(default)]
    pub bulk: BulkConfig,
}

/// General settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WagateConfig {
    #[serde(default = "default_name")]
    pub name: String,
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for WagateConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            data_dir: default_data_dir(),
            log_level: default_log_level(),
        }
    }
}

/// SQLite store config.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_db_path")]
    pub db_path: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
        }
    }
}

/// HTTP API configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_api_host")]
    pub host: String,
    #[serde(default = "default_api_port")]
    pub port: u16,
    /// Bearer token for API authentication. Empty = no auth (for local-only use).
    #[serde(default)]
    pub api_key: String,
    /// Maximum request body size in megabytes.
    #[serde(default = "default_max_body_mb")]
    pub max_body_mb: usize,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: default_api_host(),
            port: default_api_port(),
            api_key: String::new(),
            max_body_mb: default_max_body_mb(),
        }
    }
}

/// WhatsApp session settings, shared by every account.
///
/// Device state for each account lives in the main database, keyed by account id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WhatsAppConfig {
    /// Name shown under "Linked devices" on the phone.
    #[serde(default = "default_device_name")]
    pub device_name: String,
    /// Reconnect accounts that were connected when the process last stopped.
    #[serde(default = "default_true")]
    pub auto_reconnect: bool,
    /// How long `connect` waits for the first QR code.
    #[serde(default = "default_qr_timeout")]
    pub qr_timeout_secs: u64,
    /// How long the pairing status endpoint long-polls.
    #[serde(default = "default_pair_timeout")]
    pub pair_timeout_secs: u64,
    /// Text longer than this is split into several messages.
    #[serde(default = "default_max_message_len")]
    pub max_message_len: usize,
}

impl Default for WhatsAppConfig {
    fn default() -> Self {
        Self {
            device_name: default_device_name(),
            auto_reconnect: true,
            qr_timeout_secs: default_qr_timeout(),
            pair_timeout_secs: default_pair_timeout(),
            max_message_len: default_max_message_len(),
        }
    }
}

/// Media upload handling.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadConfig {
    /// Directory for temporary upload files.
    #[serde(default = "default_upload_dir")]
    pub dir: String,
    #[serde(default = "default_max_file_mb")]
    pub max_file_mb: usize,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            dir: default_upload_dir(),
            max_file_mb: default_max_file_mb(),
        }
    }
}

impl UploadConfig {
    /// Maximum upload size in bytes.
    pub fn max_file_bytes(&self) -> usize {
        self.max_file_mb * 1024 * 1024
    }
}

/// Bulk send pacing and limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BulkConfig {
    /// Pause between two consecutive sends.
    #[serde(default = "default_bulk_delay")]
    pub delay_ms: u64,
    #[serde(default = "default_max_recipients")]
    pub max_recipients: usize,
}

impl Default for BulkConfig {
    fn default() -> Self {
        Self {
            delay_ms: default_bulk_delay(),
            max_recipients: default_max_recipients(),
        }
    }
}

/// Expand `~` to home directory.
pub fn shellexpand(path: &str) -> String {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = std::env::var_os("HOME") {
            return format!("{}/{rest}", home.to_string_lossy());
        }
    }
    path.to_string()
}

/// Load configuration from a TOML file.
///
/// Falls back to defaults if the file does not exist.
pub fn load(path: &str) -> Result<Config, WagateError> {
    let path = Path::new(path);
    if !path.exists() {
        tracing::info!(
            "Config file not found at {}, using defaults",
            path.display()
        );
        return Ok(Config::default());
    }

    let content = std::fs::read_to_string(path)
        .map_err(|e| WagateError::Config(format!("failed to read {}: {}", path.display(), e)))?;

    parse(&content)
}

/// Parse configuration from TOML text.
pub fn parse(content: &str) -> Result<Config, WagateError> {
    toml::from_str(content).map_err(|e| WagateError::Config(format!("failed to parse config: {e}")))
}

/// Render a config as TOML (used by `wagate init`).
pub fn render(config: &Config) -> Result<String, WagateError> {
    toml::to_string_pretty(config)
        .map_err(|e| WagateError::Config(format!("failed to render config: {e}")))
}
