//! The metrics sync engine.
//!
//! One entry point, `fetch_comparison`: given `(brand, range)` produce a
//! validated comparison snapshot by fetching the current and previous
//! periods, retrying suspicious empty results, and falling back to the
//! last-known-good cache entry on failure. The per-brand lock rejects
//! overlapping triggers outright — a second caller gets `Busy`, never a
//! queue slot.
//!
//! Every failure past the lock is absorbed into a recoverable outcome
//! wherever cached data exists; the worst case is a stale widget, never a
//! crash and never a flash-to-empty.

use std::sync::Arc;
use std::time::Duration;

use chrono::{Local, NaiveDate, Utc};
use dashmap::DashMap;

use crate::api::{MetricsApi, MetricsQuery, MetricsResponse};
use crate::cache::CacheStore;
use crate::change::ChangeDetector;
use crate::config::SyncConfig;
use crate::coordinator::{FetchCoordinator, FetchGuard};
use crate::error::SyncError;
use crate::period::resolve_previous_period;
use crate::types::{
    ComparisonResult, DataSource, DateRange, FetchOutcome, FetchState, RangePreset,
};

/// Orchestrates metric fetches for all mounted dashboard widgets.
pub struct MetricsSyncEngine {
    api: Arc<dyn MetricsApi>,
    coordinator: FetchCoordinator,
    cache: CacheStore,
    change: ChangeDetector,
    /// Informational per-brand lifecycle, for badges/spinners. The
    /// coordinator lock is the actual mutual-exclusion mechanism.
    states: DashMap<String, FetchState>,
    config: SyncConfig,
}

impl MetricsSyncEngine {
    pub fn new(api: Arc<dyn MetricsApi>, cache: CacheStore, config: SyncConfig) -> Self {
        Self {
            api,
            coordinator: FetchCoordinator::new(),
            cache,
            change: ChangeDetector::new(),
            states: DashMap::new(),
            config,
        }
    }

    pub fn coordinator(&self) -> &FetchCoordinator {
        &self.coordinator
    }

    pub fn cache(&self) -> &CacheStore {
        &self.cache
    }

    /// Current lifecycle state for a brand.
    pub fn state(&self, brand_id: &str) -> FetchState {
        self.states
            .get(brand_id)
            .map(|s| *s)
            .unwrap_or_default()
    }

    fn set_state(&self, brand_id: &str, state: FetchState) {
        self.states.insert(brand_id.to_string(), state);
    }

    /// Fetch a comparison snapshot relative to the viewer's local calendar.
    pub async fn fetch_comparison(
        &self,
        brand_id: &str,
        range: DateRange,
    ) -> Result<FetchOutcome, SyncError> {
        self.fetch_comparison_at(brand_id, range, Local::now().date_naive())
            .await
    }

    /// Same as [`fetch_comparison`](Self::fetch_comparison) with an explicit
    /// "today", for callers pinned to a specific calendar date.
    pub async fn fetch_comparison_at(
        &self,
        brand_id: &str,
        range: DateRange,
        today: NaiveDate,
    ) -> Result<FetchOutcome, SyncError> {
        if range.from > range.to {
            return Err(SyncError::InvalidRange {
                from: range.from,
                to: range.to,
            });
        }

        // Fail fast while another cycle is in flight. The guard releases on
        // drop, so a caller cancelled mid-cycle cannot orphan the lock.
        let mut guard = self
            .coordinator
            .acquire(brand_id)
            .ok_or_else(|| SyncError::Busy(brand_id.to_string()))?;
        self.set_state(brand_id, FetchState::Fetching);

        let deadline = Duration::from_secs(self.config.deadline_secs);
        let result = match tokio::time::timeout(
            deadline,
            self.run_cycle(&mut guard, brand_id, range, today),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(SyncError::Timeout(self.config.deadline_secs)),
        };

        match result {
            Ok(comparison) => {
                self.cache.put(brand_id, range, comparison.clone());
                let changed = self.change.observe(brand_id, &comparison);
                self.set_state(brand_id, FetchState::Success);
                if self.config.trigger_platform_sync {
                    self.spawn_platform_sync(brand_id);
                }
                Ok(FetchOutcome {
                    comparison,
                    source: DataSource::Network,
                    changed,
                    stale: false,
                })
            }
            Err(e) if e.is_transient() => {
                self.set_state(brand_id, FetchState::Failed);
                match self.cache.get(brand_id) {
                    Some(entry) => {
                        log::warn!(
                            "engine: fetch failed for {} ({}), serving cached data from {}",
                            brand_id,
                            e,
                            entry.fetched_at
                        );
                        let changed = self.change.observe(brand_id, &entry.comparison);
                        Ok(FetchOutcome {
                            comparison: entry.comparison,
                            source: DataSource::Cache,
                            changed,
                            stale: true,
                        })
                    }
                    None => {
                        log::warn!("engine: fetch failed for {} ({}), no cache", brand_id, e);
                        Err(SyncError::NoData(brand_id.to_string()))
                    }
                }
            }
            Err(e) => {
                self.set_state(brand_id, FetchState::Failed);
                Err(e)
            }
        }
    }

    /// One fetch cycle: resolve the comparison period, fetch both periods
    /// concurrently, validate the echoed ranges, and apply the empty-result
    /// retry policy.
    async fn run_cycle(
        &self,
        guard: &mut FetchGuard,
        brand_id: &str,
        range: DateRange,
        today: NaiveDate,
    ) -> Result<ComparisonResult, SyncError> {
        let previous = resolve_previous_period(&range, today);
        let prev_range = previous.range();

        // Zero is a legitimate in-progress value for today; everything else
        // gets the empty-result retries.
        let retry_exempt = matches!(range.preset, Some(RangePreset::Today));
        let empty_budget = if retry_exempt {
            0
        } else {
            self.config.empty_retries
        };
        // Tracked separately: a discarded mismatch must not eat into the
        // empty-result retries.
        let mut mismatch_budget: u32 = 1;
        let mut empty_used: u32 = 0;
        let mut resend = false;

        loop {
            // Any repeat send asks the server to skip its own cache
            let bypass_cache = resend;
            let current_query = MetricsQuery {
                brand_id: brand_id.to_string(),
                range,
                bypass_cache,
                request_id: guard.subrequest(),
            };
            let previous_query = MetricsQuery {
                brand_id: brand_id.to_string(),
                range: prev_range,
                bypass_cache,
                request_id: guard.subrequest(),
            };

            // Both periods must complete before anything is published.
            let (current_resp, previous_resp) = tokio::join!(
                self.api.fetch_metrics(&current_query),
                self.api.fetch_metrics(&previous_query),
            );
            let current_resp = current_resp?;
            let previous_resp = previous_resp?;

            if !current_resp.echoes(&range) || !previous_resp.echoes(&prev_range) {
                if mismatch_budget > 0 {
                    mismatch_budget -= 1;
                    resend = true;
                    log::warn!(
                        "engine: {} echoed a different range than requested, retrying once",
                        brand_id
                    );
                    continue;
                }
                return Err(SyncError::RangeMismatch {
                    requested: range.fingerprint(),
                    echoed: describe_echo(&current_resp, &previous_resp),
                });
            }

            let current = current_resp.into_snapshot();
            if current.is_empty() && empty_used < empty_budget {
                empty_used += 1;
                resend = true;
                log::info!(
                    "engine: {} returned no data for {} (empty retry {}/{})",
                    brand_id,
                    range.fingerprint(),
                    empty_used,
                    empty_budget
                );
                tokio::time::sleep(Duration::from_millis(self.config.empty_retry_delay_ms)).await;
                continue;
            }

            return Ok(ComparisonResult {
                current,
                previous: previous_resp.into_snapshot(),
                previous_label: previous.label.clone(),
                fetched_at: Utc::now(),
            });
        }
    }

    /// Refresh several brands in one coordinated sweep. Brands whose lock
    /// is held are skipped with `Busy`, not queued.
    pub async fn refresh_all(
        &self,
        brand_ids: &[String],
        range: DateRange,
    ) -> Vec<(String, Result<FetchOutcome, SyncError>)> {
        let today = Local::now().date_naive();
        let mut results = Vec::with_capacity(brand_ids.len());
        for brand_id in brand_ids {
            let result = self.fetch_comparison_at(brand_id, range, today).await;
            if let Err(e) = &result {
                log::warn!("refresh_all: {} -> {}", brand_id, e);
            }
            results.push((brand_id.clone(), result));
        }
        results
    }

    /// Fire-and-forget platform sync commands after a fresh success. Their
    /// outcome never blocks or invalidates the snapshot.
    fn spawn_platform_sync(&self, brand_id: &str) {
        let api = Arc::clone(&self.api);
        let brand_id = brand_id.to_string();
        tokio::spawn(async move {
            if let Err(e) = api.sync_campaigns(&brand_id).await {
                log::debug!("platform sync (campaigns) failed for {}: {}", brand_id, e);
            }
            if let Err(e) = api.refresh_adset_budgets(&brand_id).await {
                log::debug!("platform sync (ad sets) failed for {}: {}", brand_id, e);
            }
        });
    }
}

fn describe_echo(current: &MetricsResponse, previous: &MetricsResponse) -> String {
    let describe = |response: &MetricsResponse| {
        response
            .date_range
            .map(|r| format!("{}..{}", r.from, r.to))
            .unwrap_or_else(|| "missing".to_string())
    };
    format!("{} / {}", describe(current), describe(previous))
}
