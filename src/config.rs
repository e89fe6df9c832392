//! Configuration management for mpc-presence

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// MPC-HC web interface default, written into freshly created config files
const DEFAULT_MPC_PORT: u16 = 13579;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Media Player Classic web interface
    #[serde(default)]
    pub media: MediaConfig,

    /// Discord application used for Rich Presence
    #[serde(default)]
    pub discord: DiscordConfig,

    /// Snapshot thumbnail upload
    #[serde(default)]
    pub snapshot: SnapshotConfig,

    /// Poll, refresh and retry intervals
    #[serde(default)]
    pub timing: TimingConfig,

    /// How playback is rendered into the presence payload
    #[serde(default)]
    pub presence: PresenceConfig,

    /// Path to config file (not serialized)
    #[serde(skip)]
    config_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaConfig {
    /// Host the web interface listens on
    #[serde(default = "default_host")]
    pub host: String,

    /// Port set in MPC's Options > Player > Web Interface.
    /// Required: a missing value is a startup error.
    pub port: Option<u16>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscordConfig {
    /// Discord application (client) id
    #[serde(default = "default_app_id")]
    pub app_id: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotConfig {
    /// Whether snapshot thumbnails are uploaded at all
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Image host upload endpoint
    #[serde(default = "default_upload_endpoint")]
    pub upload_endpoint: String,

    /// Image host API key. Defaults to imgcdn.dev's public key; snapshots
    /// are skipped when set to an empty value.
    #[serde(default = "default_api_key")]
    pub api_key: Option<String>,

    /// Longest edge of the uploaded square thumbnail (pixels)
    #[serde(default = "default_max_edge")]
    pub max_edge: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimingConfig {
    /// Poll interval while MPC is reachable (seconds)
    #[serde(default = "default_fast_poll")]
    pub fast_poll_secs: u64,

    /// Poll interval while MPC is unreachable (seconds)
    #[serde(default = "default_slow_poll")]
    pub slow_poll_secs: u64,

    /// Snapshot refresh interval (seconds)
    #[serde(default = "default_snapshot")]
    pub snapshot_secs: u64,

    /// Discord login retry interval (seconds)
    #[serde(default = "default_rpc_retry")]
    pub rpc_retry_secs: u64,

    /// Timeout for a single status poll (ms). Must stay below the fast interval.
    #[serde(default = "default_poll_timeout")]
    pub poll_timeout_ms: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PresenceConfig {
    /// Show time left instead of time elapsed while playing
    #[serde(default)]
    pub show_remaining_time: bool,

    /// Drop `[group]` and `(tag)` sections from file names
    #[serde(default)]
    pub ignore_brackets: bool,

    /// Drop the file extension
    #[serde(default)]
    pub ignore_file_extension: bool,

    /// Render underscores as spaces
    #[serde(default)]
    pub replace_underscores: bool,
}

// Default value functions
fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_app_id() -> i64 {
    1108520115466678332
}

fn default_true() -> bool {
    true
}

fn default_upload_endpoint() -> String {
    "https://imgcdn.dev/api/1/upload/".to_string()
}

/// Public guest key of imgcdn.dev
const PUBLIC_IMGCDN_KEY: &str = "5386e05a3562c7a8f984e73401540836";

fn default_api_key() -> Option<String> {
    Some(PUBLIC_IMGCDN_KEY.to_string())
}

fn default_max_edge() -> u32 {
    512
}

fn default_fast_poll() -> u64 {
    5
}

fn default_slow_poll() -> u64 {
    15
}

fn default_snapshot() -> u64 {
    120
}

fn default_rpc_retry() -> u64 {
    10
}

fn default_poll_timeout() -> u64 {
    4000
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: None,
        }
    }
}

impl Default for DiscordConfig {
    fn default() -> Self {
        Self {
            app_id: default_app_id(),
        }
    }
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            upload_endpoint: default_upload_endpoint(),
            api_key: default_api_key(),
            max_edge: default_max_edge(),
        }
    }
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            fast_poll_secs: default_fast_poll(),
            slow_poll_secs: default_slow_poll(),
            snapshot_secs: default_snapshot(),
            rpc_retry_secs: default_rpc_retry(),
            poll_timeout_ms: default_poll_timeout(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            media: MediaConfig::default(),
            discord: DiscordConfig::default(),
            snapshot: SnapshotConfig::default(),
            timing: TimingConfig::default(),
            presence: PresenceConfig::default(),
            config_path: None,
        }
    }
}

impl TimingConfig {
    pub fn fast_poll(&self) -> Duration {
        Duration::from_secs(self.fast_poll_secs)
    }

    pub fn slow_poll(&self) -> Duration {
        Duration::from_secs(self.slow_poll_secs)
    }

    pub fn snapshot(&self) -> Duration {
        Duration::from_secs(self.snapshot_secs)
    }

    pub fn rpc_retry(&self) -> Duration {
        Duration::from_secs(self.rpc_retry_secs)
    }

    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms)
    }
}

impl Config {
    /// Load configuration from the default location, creating it if missing
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::default_config_path()?)
    }

    /// Load configuration from an explicit path, creating it if missing
    pub fn load_from(config_path: &Path) -> Result<Self> {
        if config_path.exists() {
            let contents = std::fs::read_to_string(config_path)
                .with_context(|| format!("Failed to read config file: {:?}", config_path))?;

            let mut config = Self::parse(&contents)
                .with_context(|| format!("Failed to parse config file: {:?}", config_path))?;

            config.config_path = Some(config_path.to_path_buf());
            Ok(config)
        } else {
            let mut config = Config {
                config_path: Some(config_path.to_path_buf()),
                ..Config::default()
            };
            config.media.port = Some(DEFAULT_MPC_PORT);
            config.save()?;
            Ok(config)
        }
    }

    /// Parse configuration from TOML text
    pub fn parse(contents: &str) -> Result<Self> {
        Ok(toml::from_str(contents)?)
    }

    /// Save configuration to file
    pub fn save(&self) -> Result<()> {
        let config_path = match self.config_path.clone() {
            Some(path) => path,
            None => Self::default_config_path()?,
        };

        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config directory: {:?}", parent))?;
        }

        let contents = toml::to_string_pretty(self).context("Failed to serialize config")?;

        std::fs::write(&config_path, contents)
            .with_context(|| format!("Failed to write config file: {:?}", config_path))?;

        Ok(())
    }

    /// Get the config file path, if known
    pub fn config_path(&self) -> Option<&Path> {
        self.config_path.as_deref()
    }

    /// Get default config path
    fn default_config_path() -> Result<PathBuf> {
        let proj_dirs = directories::ProjectDirs::from("dev", "mpc-presence", "bridge")
            .context("Failed to determine config directory")?;

        Ok(proj_dirs.config_dir().join("config.toml"))
    }

    /// Reject settings the bridge cannot run with.
    ///
    /// Must be called before any network activity starts.
    pub fn validate(&self) -> Result<()> {
        match self.media.port {
            None | Some(0) => bail!(
                "Port is empty or invalid! Please set a valid port number under [media] in {}",
                self.config_path
                    .as_ref()
                    .map(|p| p.display().to_string())
                    .unwrap_or_else(|| "config.toml".to_string())
            ),
            Some(_) => {}
        }

        let timing = &self.timing;
        if timing.fast_poll_secs == 0
            || timing.slow_poll_secs == 0
            || timing.snapshot_secs == 0
            || timing.rpc_retry_secs == 0
        {
            bail!("Intervals under [timing] must be greater than zero");
        }

        if timing.poll_timeout() >= timing.fast_poll() {
            bail!(
                "poll_timeout_ms ({}) must be below fast_poll_secs ({}s)",
                timing.poll_timeout_ms,
                timing.fast_poll_secs
            );
        }

        if self.snapshot.max_edge == 0 {
            bail!("snapshot.max_edge must be greater than zero");
        }

        Ok(())
    }

    /// The validated media port
    pub fn port(&self) -> u16 {
        self.media.port.unwrap_or_default()
    }

    /// Base URL of the MPC web interface
    pub fn media_base_url(&self) -> String {
        format!("http://{}:{}", self.media.host, self.port())
    }

    /// Whether snapshot uploads can run with the current settings
    pub fn snapshots_enabled(&self) -> bool {
        self.snapshot.enabled
            && self
                .snapshot
                .api_key
                .as_deref()
                .is_some_and(|key| !key.trim().is_empty())
    }
}
