use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use super::platform;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub daemon: DaemonConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub mpv: MpvConfig,
    #[serde(default)]
    pub hls: HlsConfig,
    #[serde(default)]
    pub sleep_timer: SleepTimerConfig,
    #[serde(default)]
    pub media_session: MediaSessionConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    #[serde(default = "default_pid_file")]
    pub pid_file: PathBuf,
    /// Volume and selection (`state.json`).
    #[serde(default = "default_state_file")]
    pub state_file: PathBuf,
    /// Station list and favorites (`stations.json`).
    #[serde(default = "default_catalog_file")]
    pub catalog_file: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_http_enabled")]
    pub enabled: bool,
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MpvConfig {
    /// Used when no state file exists yet.
    #[serde(default = "default_volume")]
    pub default_volume: f32,
    /// mpv executable.  Looked up next to the daemon and on `PATH` when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub binary: Option<PathBuf>,
}

/// Segmented (HLS) adapter settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HlsConfig {
    #[serde(default = "default_true")]
    pub low_latency: bool,
    #[serde(default = "default_retries")]
    pub max_manifest_retries: u32,
    #[serde(default = "default_retries")]
    pub max_level_retries: u32,
    #[serde(default = "default_back_buffer_secs")]
    pub back_buffer_secs: u32,
    /// Base delay between manifest/level retries; grows linearly per attempt.
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SleepTimerConfig {
    /// Length of the volume fade before the timer fires.
    #[serde(default = "default_fade_window_secs")]
    pub fade_window_secs: u64,
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,
}

/// Lock-screen / now-playing integration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaSessionConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            pid_file: default_pid_file(),
            state_file: default_state_file(),
            catalog_file: default_catalog_file(),
        }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            enabled: default_http_enabled(),
            bind_address: default_bind_address(),
            port: default_port(),
        }
    }
}

impl Default for MpvConfig {
    fn default() -> Self {
        Self {
            default_volume: default_volume(),
            binary: None,
        }
    }
}

impl Default for HlsConfig {
    fn default() -> Self {
        Self {
            low_latency: true,
            max_manifest_retries: default_retries(),
            max_level_retries: default_retries(),
            back_buffer_secs: default_back_buffer_secs(),
            retry_delay_ms: default_retry_delay_ms(),
        }
    }
}

impl Default for SleepTimerConfig {
    fn default() -> Self {
        Self {
            fade_window_secs: default_fade_window_secs(),
            tick_interval_ms: default_tick_interval_ms(),
        }
    }
}

impl Default for MediaSessionConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

fn default_pid_file() -> PathBuf {
    platform::data_dir().join("daemon.pid")
}

fn default_state_file() -> PathBuf {
    platform::data_dir().join("state.json")
}

fn default_catalog_file() -> PathBuf {
    platform::data_dir().join("stations.json")
}

fn default_http_enabled() -> bool {
    true
}

fn default_bind_address() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8989
}

fn default_volume() -> f32 {
    0.5
}

fn default_true() -> bool {
    true
}

fn default_retries() -> u32 {
    5
}

fn default_back_buffer_secs() -> u32 {
    60
}

fn default_retry_delay_ms() -> u64 {
    1000
}

fn default_fade_window_secs() -> u64 {
    30
}

fn default_tick_interval_ms() -> u64 {
    250
}

impl Config {
    pub fn load() -> anyhow::Result<Self> {
        let config_path = Self::config_path();

        if !config_path.exists() {
            let config = Self::default();
            config.save()?;
            return Ok(config);
        }

        let content = std::fs::read_to_string(&config_path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn save(&self) -> anyhow::Result<()> {
        let config_path = Self::config_path();
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(&config_path, content)?;
        Ok(())
    }

    pub fn config_path() -> PathBuf {
        platform::config_dir().join("config.toml")
    }
}
