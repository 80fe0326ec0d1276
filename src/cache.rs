//! Last-known-good cache for brand metrics.
//!
//! A brand-keyed key-value store backing the engine's fallback path: served
//! instantly on mount while a fresh fetch is pending, and consulted when a
//! fetch fails. Persisted as one JSON file under the state directory
//! (`~/.adpulse/metrics_cache.json` by default). Last write wins per brand;
//! no TTL — staleness is judged by callers via `fetched_at`.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{Duration, Utc};
use parking_lot::Mutex;

use crate::config::SyncConfig;
use crate::error::SyncError;
use crate::types::{CacheEntry, ComparisonResult, DateRange};

const CACHE_FILE: &str = "metrics_cache.json";

/// Persistent brand-keyed metrics cache.
pub struct CacheStore {
    path: PathBuf,
    entries: Mutex<HashMap<String, CacheEntry>>,
}

impl CacheStore {
    /// Open the cache in the default state directory (`~/.adpulse`).
    pub fn open_default() -> Result<Self, SyncError> {
        Self::open(&SyncConfig::default().state_dir())
    }

    /// Open the cache in the configured state directory, honoring the
    /// `cacheDir` override.
    pub fn open_configured(config: &SyncConfig) -> Result<Self, SyncError> {
        Self::open(&config.state_dir())
    }

    /// Open the cache under an explicit directory, creating it if needed.
    pub fn open(dir: &Path) -> Result<Self, SyncError> {
        if !dir.exists() {
            fs::create_dir_all(dir)?;
        }
        let path = dir.join(CACHE_FILE);
        let entries = if path.exists() {
            match fs::read_to_string(&path) {
                Ok(content) => match serde_json::from_str(&content) {
                    Ok(map) => map,
                    Err(e) => {
                        log::warn!("cache: discarding unreadable {}: {}", path.display(), e);
                        HashMap::new()
                    }
                },
                Err(e) => {
                    log::warn!("cache: failed to read {}: {}", path.display(), e);
                    HashMap::new()
                }
            }
        } else {
            HashMap::new()
        };

        Ok(Self {
            path,
            entries: Mutex::new(entries),
        })
    }

    /// Last-known-good entry for a brand.
    pub fn get(&self, brand_id: &str) -> Option<CacheEntry> {
        self.entries.lock().get(brand_id).cloned()
    }

    /// Store the result of a successful fetch cycle, overwriting any
    /// previous entry for the brand. Persistence failures are logged, never
    /// surfaced — a cache that cannot write is degraded, not broken.
    pub fn put(&self, brand_id: &str, range: DateRange, comparison: ComparisonResult) {
        let entry = CacheEntry {
            brand_id: brand_id.to_string(),
            range,
            comparison,
            fetched_at: Utc::now(),
        };
        let snapshot = {
            let mut entries = self.entries.lock();
            entries.insert(brand_id.to_string(), entry);
            entries.clone()
        };
        if let Err(e) = self.persist(&snapshot) {
            log::warn!("cache: failed to persist {}: {}", self.path.display(), e);
        }
    }

    /// Explicit cache clear — the only deletion path.
    pub fn clear(&self) {
        let snapshot = {
            let mut entries = self.entries.lock();
            entries.clear();
            entries.clone()
        };
        if let Err(e) = self.persist(&snapshot) {
            log::warn!("cache: failed to persist {}: {}", self.path.display(), e);
        }
    }

    /// True when an entry is older than `max_age`.
    pub fn is_stale(entry: &CacheEntry, max_age: Duration) -> bool {
        Utc::now() - entry.fetched_at >= max_age
    }

    fn persist(&self, entries: &HashMap<String, CacheEntry>) -> Result<(), SyncError> {
        let content = serde_json::to_string_pretty(entries)?;
        fs::write(&self.path, content)?;
        Ok(())
    }
}
