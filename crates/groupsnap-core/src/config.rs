//! Configuration management for groupsnap.
//!
//! Loads configuration from a TOML file with sensible defaults. Every section
//! is optional; a missing file yields `Config::default()`.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};

/// Audience tag attached to every submission, resolved from the conversation id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum GroupType {
    Dev,
    Prod,
}

impl GroupType {
    pub fn as_str(self) -> &'static str {
        match self {
            GroupType::Dev => "DEV",
            GroupType::Prod => "PROD",
        }
    }
}

impl fmt::Display for GroupType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// HTTP ingress settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Maximum accepted webhook body size in bytes.
    pub max_request_bytes: usize,
    pub enable_cors: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            max_request_bytes: 10 * 1024 * 1024,
            enable_cors: true,
        }
    }
}

/// Chat gateway (WAHA-compatible) settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub api_url: String,
    pub session: String,
    /// Sent as `X-Api-Key` when non-empty.
    pub api_key: String,
    pub send_timeout_ms: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            api_url: String::new(),
            session: "default".to_string(),
            api_key: String::new(),
            send_timeout_ms: 10_000,
        }
    }
}

impl GatewayConfig {
    /// API key with the environment override applied, `None` when unset.
    pub fn effective_api_key(&self) -> Option<String> {
        std::env::var("GROUPSNAP_GATEWAY_API_KEY")
            .ok()
            .as_deref()
            .and_then(normalize_string)
            .or_else(|| normalize_string(&self.api_key))
    }

    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.send_timeout_ms)
    }
}

/// Conversations the router accepts.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GroupsConfig {
    pub dev: String,
    pub prod: String,
}

impl GroupsConfig {
    /// Returns the audience tag for an allowed conversation, `None` otherwise.
    ///
    /// Empty ids never match, so an unconfigured PROD slot cannot accept
    /// messages with an empty chat id.
    pub fn resolve(&self, chat_id: &str) -> Option<GroupType> {
        let chat_id = chat_id.trim();
        if chat_id.is_empty() {
            return None;
        }
        if self.dev.trim() == chat_id {
            Some(GroupType::Dev)
        } else if self.prod.trim() == chat_id {
            Some(GroupType::Prod)
        } else {
            None
        }
    }

    pub fn is_empty(&self) -> bool {
        self.dev.trim().is_empty() && self.prod.trim().is_empty()
    }
}

/// Downstream analysis webhook settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// Empty disables submission; batches then get the generic acknowledgment.
    pub webhook_url: String,
    pub timeout_ms: u64,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            webhook_url: String::new(),
            timeout_ms: 30_000,
        }
    }
}

impl AnalysisConfig {
    pub fn webhook_url(&self) -> Option<&str> {
        let trimmed = self.webhook_url.trim();
        (!trimmed.is_empty()).then_some(trimmed)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Aggregation buffer policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BufferConfig {
    pub debounce_ms: u64,
    /// Opt-in cap: a batch reaching this size flushes immediately. 0 (the
    /// default) leaves batching to the debounce window alone.
    pub max_images: usize,
    pub download_timeout_ms: u64,
    /// How long a captionless batch waits for a text reply (0 drops it).
    pub context_hold_ms: u64,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            debounce_ms: 2_000,
            max_images: 0,
            download_timeout_ms: 30_000,
            context_hold_ms: 0,
        }
    }
}

impl BufferConfig {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn download_timeout(&self) -> Duration {
        Duration::from_millis(self.download_timeout_ms)
    }

    pub fn context_hold(&self) -> Option<Duration> {
        (self.context_hold_ms > 0).then(|| Duration::from_millis(self.context_hold_ms))
    }
}

/// Composite rendering parameters.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct CompositorConfig {
    /// Vertical gap between stacked images, in pixels.
    pub padding: u32,
    /// JPEG quality, 1..=100.
    pub jpeg_quality: u8,
}

impl Default for CompositorConfig {
    fn default() -> Self {
        Self {
            padding: 10,
            jpeg_quality: 90,
        }
    }
}

/// Log output settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    /// Directory for daily rolling log files; empty logs to stderr only.
    pub directory: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            directory: String::new(),
        }
    }
}

impl LoggingConfig {
    pub fn directory(&self) -> Option<PathBuf> {
        normalize_string(&self.directory).map(PathBuf::from)
    }
}

/// Main configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub gateway: GatewayConfig,
    pub groups: GroupsConfig,
    pub analysis: AnalysisConfig,
    pub buffer: BufferConfig,
    pub compositor: CompositorConfig,
    pub logging: LoggingConfig,
}

pub mod paths {
    //! Config file resolution.
    //!
    //! Resolution order:
    //! 1. explicit path (`--config`)
    //! 2. GROUPSNAP_CONFIG environment variable
    //! 3. ./groupsnap.toml

    use std::path::{Path, PathBuf};

    pub const DEFAULT_FILE_NAME: &str = "groupsnap.toml";

    pub fn config_path(explicit: Option<&Path>) -> PathBuf {
        if let Some(path) = explicit {
            return path.to_path_buf();
        }
        if let Ok(path) = std::env::var("GROUPSNAP_CONFIG")
            && !path.trim().is_empty()
        {
            return PathBuf::from(path.trim());
        }
        PathBuf::from(DEFAULT_FILE_NAME)
    }
}

/// Returns the default config template with comments.
fn default_config_template() -> &'static str {
    include_str!("../default_config.toml")
}

impl Config {
    /// Loads configuration from a specific path.
    /// Returns defaults if the file doesn't exist.
    ///
    /// # Errors
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let contents = fs::read_to_string(path)
                .with_context(|| format!("Failed to read config from {}", path.display()))?;
            toml::from_str(&contents)
                .with_context(|| format!("Failed to parse config from {}", path.display()))
        } else {
            Ok(Config::default())
        }
    }

    /// Applies `GROUPSNAP_HOST` / `GROUPSNAP_PORT` overrides.
    pub fn apply_env_overrides(&mut self) {
        if let Some(host) = std::env::var("GROUPSNAP_HOST")
            .ok()
            .as_deref()
            .and_then(normalize_string)
        {
            self.server.host = host;
        }
        if let Some(port) = std::env::var("GROUPSNAP_PORT")
            .ok()
            .and_then(|value| value.trim().parse::<u16>().ok())
        {
            self.server.port = port;
        }
    }

    /// Checks the settings `serve` cannot run without.
    ///
    /// # Errors
    /// Returns an error naming the first missing setting.
    pub fn validate_for_serve(&self) -> Result<()> {
        if self.gateway.api_url.trim().is_empty() {
            bail!("gateway.api_url is required");
        }
        if self.groups.is_empty() {
            bail!("groups.dev or groups.prod must be set");
        }
        if !(1..=100).contains(&self.compositor.jpeg_quality) {
            bail!("compositor.jpeg_quality must be between 1 and 100");
        }
        Ok(())
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }

    /// Writes the commented default template to `path`.
    ///
    /// # Errors
    /// Fails if the file already exists or cannot be written.
    pub fn init(path: &Path) -> Result<()> {
        if path.exists() {
            bail!("Config file already exists at {}", path.display());
        }
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        fs::write(path, default_config_template())
            .with_context(|| format!("Failed to write config to {}", path.display()))
    }
}

fn normalize_string(value: &str) -> Option<String> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}
