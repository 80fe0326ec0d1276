//! Error types for metrics synchronization.
//!
//! Errors are classified by how callers should react:
//! - Busy: another fetch holds the brand lock; no-op, do not retry immediately
//! - Transient: transport failures, timeouts, echoed-range mismatches —
//!   recoverable, cached data keeps being displayed
//! - Non-recoverable: bad input or broken local state

use chrono::NaiveDate;
use thiserror::Error;

/// Errors surfaced by the sync engine and its collaborators.
#[derive(Debug, Error)]
pub enum SyncError {
    /// A fetch for this brand is already in flight. Callers must no-op or
    /// schedule a debounced retry, never spin.
    #[error("fetch already in progress for brand {0}")]
    Busy(String),

    /// The server echoed a different date range than was requested; the
    /// response was discarded rather than displayed.
    #[error("server echoed range {echoed} but {requested} was requested")]
    RangeMismatch { requested: String, echoed: String },

    /// The fetch failed and no cached data exists for the brand.
    #[error("no data available for brand {0}")]
    NoData(String),

    /// The overall fetch deadline was exceeded.
    #[error("fetch exceeded the {0}s deadline")]
    Timeout(u64),

    #[error("HTTP: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error {status}: {message}")]
    Api { status: u16, message: String },

    #[error("invalid date range: {from} is after {to}")]
    InvalidRange { from: NaiveDate, to: NaiveDate },

    #[error("invalid API base URL: {0}")]
    InvalidBaseUrl(String),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO: {0}")]
    Io(#[from] std::io::Error),
}

impl SyncError {
    /// True for failures where falling back to cached data is appropriate.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            SyncError::RangeMismatch { .. }
                | SyncError::Timeout(_)
                | SyncError::Http(_)
                | SyncError::Api { .. }
        )
    }

    /// True when the failure is the busy-lock rejection.
    pub fn is_busy(&self) -> bool {
        matches!(self, SyncError::Busy(_))
    }
}
