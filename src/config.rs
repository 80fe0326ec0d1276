//! Engine configuration, stored at `~/.adpulse/config.json`.

use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::api::RetryPolicy;
use crate::error::SyncError;

/// Tunables for the sync engine. Every field has a default so a partial
/// (or absent) config file is fine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncConfig {
    /// Base URL of the remote metrics API.
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,
    /// Overall deadline for one fetch cycle, retries included.
    #[serde(default = "default_deadline_secs")]
    pub deadline_secs: u64,
    /// Extra attempts when a retry-eligible range comes back all-zero.
    #[serde(default = "default_empty_retries")]
    pub empty_retries: u32,
    /// Fixed delay between empty-result attempts.
    #[serde(default = "default_empty_retry_delay_ms")]
    pub empty_retry_delay_ms: u64,
    /// Debounce window for rapidly-changing date-range input.
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
    /// Override for the cache/state directory (defaults to `~/.adpulse`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_dir: Option<PathBuf>,
    /// Fire platform sync commands (campaign sync, ad-set budget refresh)
    /// after a fresh successful fetch.
    #[serde(default)]
    pub trigger_platform_sync: bool,
    /// Transport-level retry for individual metrics requests.
    #[serde(default)]
    pub retry: RetryPolicy,
}

impl SyncConfig {
    /// Directory holding the cache and other engine state: `cache_dir`
    /// when set, `~/.adpulse` otherwise.
    pub fn state_dir(&self) -> PathBuf {
        self.cache_dir.clone().unwrap_or_else(|| {
            dirs::home_dir().unwrap_or_default().join(".adpulse")
        })
    }

    /// The configured debounce window as a `Duration`.
    pub fn debounce_window(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}

fn default_api_base_url() -> String {
    "http://localhost:4000/api/".to_string()
}

fn default_deadline_secs() -> u64 {
    30
}

fn default_empty_retries() -> u32 {
    2
}

fn default_empty_retry_delay_ms() -> u64 {
    1_000
}

fn default_debounce_ms() -> u64 {
    300
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            api_base_url: default_api_base_url(),
            deadline_secs: default_deadline_secs(),
            empty_retries: default_empty_retries(),
            empty_retry_delay_ms: default_empty_retry_delay_ms(),
            debounce_ms: default_debounce_ms(),
            cache_dir: None,
            trigger_platform_sync: false,
            retry: RetryPolicy::default(),
        }
    }
}

/// Canonical config file path (`~/.adpulse/config.json`).
pub fn config_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_default()
        .join(".adpulse")
        .join("config.json")
}

/// Load configuration from disk. A missing file yields the defaults; a
/// malformed file is an error the caller should surface.
pub fn load_config() -> Result<SyncConfig, SyncError> {
    let path = config_path();
    if !path.exists() {
        return Ok(SyncConfig::default());
    }
    let content = fs::read_to_string(&path)?;
    let config = serde_json::from_str(&content)?;
    Ok(config)
}

/// Load configuration, falling back to defaults on any failure. Used where
/// a bad config file must not take the dashboard down.
pub fn load_or_default() -> SyncConfig {
    match load_config() {
        Ok(config) => config,
        Err(e) => {
            log::warn!("config: falling back to defaults: {}", e);
            SyncConfig::default()
        }
    }
}
