//! Client configuration

use ledgerly_session::RefreshMode;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::error::CoreError;
use crate::Result;

pub const DEFAULT_API_URL: &str = "http://localhost:8000";

pub const API_URL_VAR: &str = "LEDGERLY_API_URL";
pub const DATA_DIR_VAR: &str = "LEDGERLY_DATA_DIR";
pub const SINGLE_FLIGHT_VAR: &str = "LEDGERLY_SINGLE_FLIGHT_REFRESH";
pub const TIMEOUT_VAR: &str = "LEDGERLY_REQUEST_TIMEOUT_SECS";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Base URL of the accounting API; endpoint paths are relative to it
    pub api_url: String,
    /// Path to the session database file
    pub database_path: PathBuf,
    /// Coordination of concurrent token refreshes
    pub refresh_mode: RefreshMode,
    /// Per-request timeout; none by default
    pub request_timeout: Option<Duration>,
}

impl Config {
    pub fn new(data_dir: PathBuf) -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            database_path: data_dir.join("session.db"),
            refresh_mode: RefreshMode::default(),
            request_timeout: None,
        }
    }

    /// Per-user data directory for the session database
    pub fn data_dir() -> PathBuf {
        Self::default_data_dir(|key| std::env::var(key).ok())
    }

    fn default_data_dir<F>(lookup: F) -> PathBuf
    where
        F: Fn(&str) -> Option<String>,
    {
        let base = if cfg!(target_os = "windows") {
            lookup("LOCALAPPDATA").map(PathBuf::from)
        } else if cfg!(target_os = "macos") {
            lookup("HOME").map(|home| PathBuf::from(home).join("Library/Application Support"))
        } else {
            lookup("XDG_DATA_HOME")
                .map(PathBuf::from)
                .or_else(|| lookup("HOME").map(|home| PathBuf::from(home).join(".local/share")))
        };

        match base {
            Some(base) => base.join("ledgerly"),
            None => PathBuf::from(".ledgerly"),
        }
    }

    /// Defaults overridden by `LEDGERLY_*` environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let data_dir = lookup(DATA_DIR_VAR)
            .filter(|v| !v.trim().is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| Self::default_data_dir(&lookup));

        let mut config = Self::new(data_dir);

        if let Some(url) = lookup(API_URL_VAR).filter(|v| !v.trim().is_empty()) {
            config.api_url = url.trim().to_string();
        }

        if let Some(raw) = lookup(SINGLE_FLIGHT_VAR) {
            config.refresh_mode = match raw.trim().to_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => RefreshMode::SingleFlight,
                "0" | "false" | "no" | "off" => RefreshMode::PerRequest,
                other => {
                    return Err(CoreError::Config(format!(
                        "{SINGLE_FLIGHT_VAR} must be true or false, got {other:?}"
                    )))
                }
            };
        }

        if let Some(raw) = lookup(TIMEOUT_VAR) {
            let secs: u64 = raw.trim().parse().map_err(|_| {
                CoreError::Config(format!("{TIMEOUT_VAR} must be whole seconds, got {raw:?}"))
            })?;
            config.request_timeout = (secs > 0).then(|| Duration::from_secs(secs));
        }

        Ok(config)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new(Self::data_dir())
    }
}
