//! Configuration for the relay: intake server, queue file, watcher and chat bridges.

use crate::backend::FailurePolicy;
use crate::error::RelayError;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

/// Which chat-client integration delivers messages
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelType {
    /// Web-protocol client (variant A): aborts on the first unresolved name
    #[default]
    Wx,
    /// PC-hook client (variant B): skips unresolved names with a warning
    Ntchat,
}

impl ChannelType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Wx => "wx",
            Self::Ntchat => "ntchat",
        }
    }
}

impl fmt::Display for ChannelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChannelType {
    type Err = RelayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "wx" => Ok(Self::Wx),
            "ntchat" => Ok(Self::Ntchat),
            other => Err(RelayError::Configuration(format!(
                "unsupported channel_type '{}' (expected \"wx\" or \"ntchat\")",
                other
            ))),
        }
    }
}

/// Top-level relay configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RelayConfig {
    /// Backend selector: "wx" (default) or "ntchat"
    #[serde(default = "default_channel_type")]
    pub channel_type: String,

    #[serde(default)]
    pub intake: IntakeConfig,

    #[serde(default)]
    pub queue: QueueConfig,

    #[serde(default)]
    pub watch: WatchConfig,

    #[serde(default)]
    pub download: DownloadConfig,

    /// Bridge to the web-protocol client
    #[serde(default = "default_wx_bridge")]
    pub wx: BridgeConfig,

    /// Bridge to the PC-hook client
    #[serde(default = "default_ntchat_bridge")]
    pub ntchat: BridgeConfig,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            channel_type: default_channel_type(),
            intake: IntakeConfig::default(),
            queue: QueueConfig::default(),
            watch: WatchConfig::default(),
            download: DownloadConfig::default(),
            wx: default_wx_bridge(),
            ntchat: default_ntchat_bridge(),
        }
    }
}

fn default_channel_type() -> String {
    "wx".to_string()
}

fn default_wx_bridge() -> BridgeConfig {
    BridgeConfig::with_base_url("http://127.0.0.1:5700")
}

fn default_ntchat_bridge() -> BridgeConfig {
    BridgeConfig::with_base_url("http://127.0.0.1:5800")
}

impl RelayConfig {
    /// Load from a TOML file. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("reading config {}", path.display()))?;
            toml::from_str::<RelayConfig>(&raw)
                .with_context(|| format!("parsing config {}", path.display()))?
        } else {
            tracing::debug!(path = %path.display(), "config file not found, using defaults");
            RelayConfig::default()
        };

        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Apply `MSGRELAY_*` environment overrides
    pub fn apply_env_overrides(&mut self) {
        if let Ok(channel) = std::env::var("MSGRELAY_CHANNEL_TYPE") {
            self.channel_type = channel;
        }

        if let Ok(port) = std::env::var("MSGRELAY_PORT") {
            match port.parse() {
                Ok(p) => self.intake.port = p,
                Err(_) => tracing::warn!(value = %port, "ignoring invalid MSGRELAY_PORT"),
            }
        }

        if let Ok(path) = std::env::var("MSGRELAY_QUEUE_PATH") {
            self.queue.path = path;
        }
    }

    /// Reject settings the relay cannot run with
    pub fn validate(&self) -> Result<(), RelayError> {
        self.channel()?;
        if self.download.timeout_secs == 0 {
            return Err(RelayError::Configuration(
                "download.timeout_secs must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    /// The selected backend variant
    pub fn channel(&self) -> Result<ChannelType, RelayError> {
        self.channel_type.parse()
    }

    /// Bridge settings for the selected variant
    pub fn bridge(&self) -> Result<&BridgeConfig, RelayError> {
        Ok(match self.channel()? {
            ChannelType::Wx => &self.wx,
            ChannelType::Ntchat => &self.ntchat,
        })
    }
}

/// HTTP intake listener
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct IntakeConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    5688
}

impl Default for IntakeConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl IntakeConfig {
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Location of the queue artifact
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct QueueConfig {
    /// Path to the JSON queue file (supports ~ expansion)
    #[serde(default = "default_queue_path")]
    pub path: String,
}

fn default_queue_path() -> String {
    "data.json".to_string()
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            path: default_queue_path(),
        }
    }
}

impl QueueConfig {
    pub fn resolve_path(&self) -> PathBuf {
        expand_home(&self.path)
    }
}

/// File-watch settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WatchConfig {
    /// Start watching the queue file at launch
    #[serde(default = "default_autostart")]
    pub autostart: bool,

    /// Debounce window for change notifications
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
}

fn default_autostart() -> bool {
    true
}

fn default_debounce_ms() -> u64 {
    500
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            autostart: default_autostart(),
            debounce_ms: default_debounce_ms(),
        }
    }
}

impl WatchConfig {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}

/// Attachment download settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DownloadConfig {
    /// Directory for temporary attachment copies; defaults to the system temp dir
    #[serde(default)]
    pub dir: Option<String>,

    #[serde(default = "default_download_timeout")]
    pub timeout_secs: u64,
}

fn default_download_timeout() -> u64 {
    22
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            dir: None,
            timeout_secs: default_download_timeout(),
        }
    }
}

impl DownloadConfig {
    pub fn resolve_dir(&self) -> PathBuf {
        match &self.dir {
            Some(dir) => expand_home(dir),
            None => std::env::temp_dir().join("msgrelay"),
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Connection to a local chat-client bridge
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BridgeConfig {
    pub base_url: String,

    /// Access token (or env var reference like ${WX_BRIDGE_TOKEN})
    #[serde(default)]
    pub token: Option<String>,

    /// Per-call timeout for lookups and sends
    #[serde(default = "default_bridge_timeout")]
    pub timeout_secs: u64,

    /// Override the variant's partial-failure policy
    #[serde(default)]
    pub failure_policy: Option<FailurePolicy>,
}

fn default_bridge_timeout() -> u64 {
    30
}

impl BridgeConfig {
    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            token: None,
            timeout_secs: default_bridge_timeout(),
            failure_policy: None,
        }
    }

    /// Resolve token from environment if needed
    pub fn resolve_token(&self) -> Option<String> {
        self.token.as_ref().and_then(|token| {
            if token.starts_with("${") && token.ends_with('}') {
                let env_var = &token[2..token.len() - 1];
                std::env::var(env_var).ok()
            } else {
                Some(token.clone())
            }
        })
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Expand a leading ~/ to the home directory
fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}
