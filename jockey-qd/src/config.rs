//! Daemon configuration
//!
//! Settings resolve in priority order: command-line argument, then
//! environment variable (both handled by clap), then TOML config file,
//! then compiled default. The config file lives at
//! `~/.config/jockey/config.toml` unless a path is given explicitly.

use crate::error::{Error, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

pub const DEFAULT_PORT: u16 = 6820;
pub const DEFAULT_RESOLVER_URL: &str = "http://127.0.0.1:6821";
pub const DEFAULT_GATEWAY_URL: &str = "http://127.0.0.1:6822";
pub const DEFAULT_RESOLUTION_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_IDLE_SESSION_TIMEOUT_SECS: u64 = 900;
pub const DEFAULT_EVENT_CAPACITY: usize = 100;

/// Fully resolved daemon settings.
#[derive(Debug, Clone)]
pub struct Config {
    /// HTTP listen port
    pub port: u16,
    /// Directory for persistent state (blacklist document)
    pub data_dir: PathBuf,
    /// Base URL of the media resolver sidecar
    pub resolver_url: String,
    /// Base URL of the voice gateway sidecar
    pub gateway_url: String,
    /// Ceiling on one resolution round-trip
    pub resolution_timeout_secs: u64,
    /// Idle sessions untouched this long are evicted
    pub idle_session_timeout_secs: u64,
    /// Event bus ring-buffer capacity
    pub event_capacity: usize,
}

/// Values taken from the command line / environment; None falls
/// through to the config file and then the default.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub config_file: Option<PathBuf>,
    pub port: Option<u16>,
    pub data_dir: Option<PathBuf>,
    pub resolver_url: Option<String>,
    pub gateway_url: Option<String>,
    pub resolution_timeout_secs: Option<u64>,
    pub idle_session_timeout_secs: Option<u64>,
}

/// TOML file shape; every key optional.
#[derive(Debug, Default, Deserialize)]
struct FileConfig {
    port: Option<u16>,
    data_dir: Option<PathBuf>,
    resolver_url: Option<String>,
    gateway_url: Option<String>,
    resolution_timeout_secs: Option<u64>,
    idle_session_timeout_secs: Option<u64>,
    event_capacity: Option<usize>,
}

impl Config {
    /// Resolve the full configuration from overrides + file + defaults.
    pub fn resolve(overrides: &Overrides) -> Result<Self> {
        let file = load_file(overrides.config_file.as_deref())?;

        Ok(Self {
            port: overrides.port.or(file.port).unwrap_or(DEFAULT_PORT),
            data_dir: overrides
                .data_dir
                .clone()
                .or(file.data_dir)
                .unwrap_or_else(default_data_dir),
            resolver_url: overrides
                .resolver_url
                .clone()
                .or(file.resolver_url)
                .unwrap_or_else(|| DEFAULT_RESOLVER_URL.to_string()),
            gateway_url: overrides
                .gateway_url
                .clone()
                .or(file.gateway_url)
                .unwrap_or_else(|| DEFAULT_GATEWAY_URL.to_string()),
            resolution_timeout_secs: overrides
                .resolution_timeout_secs
                .or(file.resolution_timeout_secs)
                .unwrap_or(DEFAULT_RESOLUTION_TIMEOUT_SECS),
            idle_session_timeout_secs: overrides
                .idle_session_timeout_secs
                .or(file.idle_session_timeout_secs)
                .unwrap_or(DEFAULT_IDLE_SESSION_TIMEOUT_SECS),
            event_capacity: file.event_capacity.unwrap_or(DEFAULT_EVENT_CAPACITY),
        })
    }

    pub fn blacklist_path(&self) -> PathBuf {
        self.data_dir.join("blacklist.json")
    }
}

/// Read the config file. An explicit path must exist and parse; the
/// default location is optional.
fn load_file(explicit: Option<&Path>) -> Result<FileConfig> {
    let path = match explicit {
        Some(path) => path.to_path_buf(),
        None => match default_config_path() {
            Some(path) if path.exists() => path,
            _ => return Ok(FileConfig::default()),
        },
    };

    let raw = std::fs::read_to_string(&path)
        .map_err(|e| Error::Config(format!("cannot read {}: {e}", path.display())))?;
    toml::from_str(&raw).map_err(|e| Error::Config(format!("invalid {}: {e}", path.display())))
}

fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("jockey").join("config.toml"))
}

fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("jockey"))
        .unwrap_or_else(|| PathBuf::from("./jockey_data"))
}
