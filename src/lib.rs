//! adpulse — client-side metrics sync for the marketing dashboard.
//!
//! Keeps dashboard widgets consistent with the remote metrics API: derives
//! the comparison period for any selected date range, fetches current and
//! previous periods under a per-brand lock, validates and retries
//! suspicious responses, and falls back to a persistent last-known-good
//! cache so the UI never flashes to empty.

pub mod api;
pub mod cache;
pub mod change;
pub mod config;
pub mod coordinator;
pub mod debounce;
pub mod engine;
pub mod error;
pub mod period;
pub mod types;

pub use api::{HttpMetricsApi, MetricsApi, MetricsQuery, MetricsResponse, RetryPolicy};
pub use cache::CacheStore;
pub use change::{should_update, ChangeDetector};
pub use config::{load_config, load_or_default, SyncConfig};
pub use coordinator::{FetchCoordinator, FetchGuard, RequestId};
pub use debounce::{debounce, debounce_configured, Debouncer};
pub use engine::MetricsSyncEngine;
pub use error::SyncError;
pub use period::{resolve_previous_period, PreviousPeriod};
pub use types::{
    CacheEntry, ComparisonResult, DailyMetrics, DataSource, DateRange, FetchOutcome, FetchState,
    MetricsSnapshot, RangePreset,
};
