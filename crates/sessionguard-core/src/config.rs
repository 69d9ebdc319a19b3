//! Application configuration management.
//!
//! This module handles loading and saving the client configuration: the
//! identity service base URL, request/refresh timing and the token storage
//! backend.
//!
//! Configuration is stored at `~/.config/sessionguard/config.json`. Values can
//! be overridden through `SESSIONGUARD_*` environment variables.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Application name used for config/cache directory paths
pub const APP_NAME: &str = "sessionguard";

/// Config file name
const CONFIG_FILE: &str = "config.json";

/// Default identity service location (gateway prefix included).
const DEFAULT_BASE_URL: &str = "http://localhost:8000/api/v1";

/// HTTP request timeout in seconds.
/// A timed-out request is reported as a network failure and never retried.
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// How often the auto-refresh scheduler inspects the access token.
const DEFAULT_REFRESH_INTERVAL_SECS: u64 = 60;

/// Refresh proactively when less than this much lifetime remains (15 minutes).
const DEFAULT_EXPIRY_WINDOW_SECS: u64 = 15 * 60;

/// Backoff used for a 429 that carries no Retry-After header.
const DEFAULT_RATE_LIMIT_DELAY_MS: u64 = 1000;

/// Upper bound for a server-advertised Retry-After delay.
const DEFAULT_MAX_RATE_LIMIT_DELAY_MS: u64 = 60_000;

/// Where persisted tokens live.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageKind {
    /// JSON file in the cache directory
    #[default]
    File,
    /// OS keychain
    Keyring,
    /// Process memory only; nothing survives a restart
    Memory,
}

impl FromStr for StorageKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "file" => Ok(StorageKind::File),
            "keyring" | "keychain" => Ok(StorageKind::Keyring),
            "memory" => Ok(StorageKind::Memory),
            other => Err(anyhow::anyhow!("Unknown storage kind: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub base_url: String,
    pub request_timeout_secs: u64,
    pub refresh_interval_secs: u64,
    pub expiry_window_secs: u64,
    pub rate_limit_delay_ms: u64,
    pub max_rate_limit_delay_ms: u64,
    pub storage: StorageKind,
    pub last_username: Option<String>,
    pub log_dir: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            refresh_interval_secs: DEFAULT_REFRESH_INTERVAL_SECS,
            expiry_window_secs: DEFAULT_EXPIRY_WINDOW_SECS,
            rate_limit_delay_ms: DEFAULT_RATE_LIMIT_DELAY_MS,
            max_rate_limit_delay_ms: DEFAULT_MAX_RATE_LIMIT_DELAY_MS,
            storage: StorageKind::default(),
            last_username: None,
            log_dir: None,
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        Self::load_from(&path)
    }

    pub fn load_from(path: &std::path::Path) -> Result<Self> {
        if path.exists() {
            let contents = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file {}", path.display()))?;
            serde_json::from_str(&contents).context("Failed to parse config file")
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self) -> Result<()> {
        let path = Self::config_path()?;
        self.save_to(&path)
    }

    pub fn save_to(&self, path: &std::path::Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    pub fn cache_dir(&self) -> Result<PathBuf> {
        let cache_dir = dirs::cache_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find cache directory"))?;
        Ok(cache_dir.join(APP_NAME))
    }

    /// Apply `SESSIONGUARD_*` environment overrides.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(url) = std::env::var("SESSIONGUARD_BASE_URL") {
            if !url.trim().is_empty() {
                self.base_url = url;
            }
        }
        if let Ok(username) = std::env::var("SESSIONGUARD_USERNAME") {
            if !username.trim().is_empty() {
                self.last_username = Some(username);
            }
        }
        if let Ok(kind) = std::env::var("SESSIONGUARD_STORAGE") {
            match kind.parse() {
                Ok(kind) => self.storage = kind,
                Err(e) => warn!(error = %e, "Ignoring SESSIONGUARD_STORAGE"),
            }
        }
    }

    /// Join an endpoint path onto the base URL.
    pub fn endpoint(&self, path: &str) -> String {
        join_url(&self.base_url, path)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs.max(1))
    }

    pub fn expiry_window(&self) -> Duration {
        Duration::from_secs(self.expiry_window_secs)
    }

    pub fn rate_limit_delay(&self) -> Duration {
        Duration::from_millis(self.rate_limit_delay_ms)
    }

    pub fn max_rate_limit_delay(&self) -> Duration {
        Duration::from_millis(self.max_rate_limit_delay_ms)
    }
}

pub(crate) fn join_url(base: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}
