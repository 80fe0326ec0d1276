//! Core data model: date ranges, metric snapshots, comparison results.
//!
//! Wire types use camelCase field names to stay compatible with the
//! dashboard frontend and the remote metrics API.

use chrono::{DateTime, Datelike, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::error::SyncError;

/// Named shorthand for a date range, carried alongside the resolved
/// endpoints so the engine can apply preset-specific behavior (e.g. the
/// `Today` retry exemption).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RangePreset {
    Today,
    Yesterday,
    Last7Days,
    Last30Days,
    ThisMonth,
    LastMonth,
    ThisYear,
    LastYear,
    Custom,
}

/// An inclusive day-granularity date range in the viewer's local calendar.
///
/// `NaiveDate` carries no time-of-day, so both endpoints are already
/// normalized to midnight by construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DateRange {
    pub from: NaiveDate,
    pub to: NaiveDate,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preset: Option<RangePreset>,
}

impl DateRange {
    /// Build a range, enforcing `from <= to`.
    pub fn new(from: NaiveDate, to: NaiveDate) -> Result<Self, SyncError> {
        if from > to {
            return Err(SyncError::InvalidRange { from, to });
        }
        Ok(Self {
            from,
            to,
            preset: None,
        })
    }

    /// Single-day range.
    pub fn single_day(day: NaiveDate) -> Self {
        Self {
            from: day,
            to: day,
            preset: None,
        }
    }

    /// Attach a preset tag.
    pub fn with_preset(mut self, preset: RangePreset) -> Self {
        self.preset = Some(preset);
        self
    }

    /// Resolve a named preset to concrete endpoints relative to `today`.
    pub fn from_preset(preset: RangePreset, today: NaiveDate) -> Self {
        let yesterday = today - Duration::days(1);
        let (from, to) = match preset {
            RangePreset::Today => (today, today),
            RangePreset::Yesterday => (yesterday, yesterday),
            RangePreset::Last7Days => (today - Duration::days(7), yesterday),
            RangePreset::Last30Days => (today - Duration::days(30), yesterday),
            RangePreset::ThisMonth => (first_of_month(today), today),
            RangePreset::LastMonth => {
                let first = first_of_prev_month(today);
                (first, last_of_month(first))
            }
            RangePreset::ThisYear => (jan_first(today.year()), today),
            RangePreset::LastYear => {
                let year = today.year() - 1;
                (
                    jan_first(year),
                    NaiveDate::from_ymd_opt(year, 12, 31).unwrap_or(today),
                )
            }
            RangePreset::Custom => (today, today),
        };
        Self {
            from,
            to,
            preset: Some(preset),
        }
    }

    /// Number of calendar days covered (inclusive).
    pub fn days(&self) -> i64 {
        (self.to - self.from).num_days() + 1
    }

    /// Stable identity string, used for change detection and diagnostics.
    pub fn fingerprint(&self) -> String {
        format!("{}..{}", self.from, self.to)
    }
}

/// First day of the month containing `day`.
pub(crate) fn first_of_month(day: NaiveDate) -> NaiveDate {
    NaiveDate::from_ymd_opt(day.year(), day.month(), 1).unwrap_or(day)
}

/// First day of the month before the one containing `day`.
pub(crate) fn first_of_prev_month(day: NaiveDate) -> NaiveDate {
    let (year, month) = if day.month() == 1 {
        (day.year() - 1, 12)
    } else {
        (day.year(), day.month() - 1)
    };
    NaiveDate::from_ymd_opt(year, month, 1).unwrap_or(day)
}

/// Last day of the month containing `day`.
pub(crate) fn last_of_month(day: NaiveDate) -> NaiveDate {
    let (year, month) = if day.month() == 12 {
        (day.year() + 1, 1)
    } else {
        (day.year(), day.month() + 1)
    };
    NaiveDate::from_ymd_opt(year, month, 1)
        .map(|first_of_next| first_of_next - Duration::days(1))
        .unwrap_or(day)
}

/// January 1st of `year`.
pub(crate) fn jan_first(year: i32) -> NaiveDate {
    NaiveDate::from_ymd_opt(year, 1, 1).unwrap_or(NaiveDate::MIN)
}

/// One calendar day of the daily series.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DailyMetrics {
    pub date: NaiveDate,
    #[serde(default)]
    pub spend: f64,
    #[serde(default)]
    pub impressions: f64,
    #[serde(default)]
    pub clicks: f64,
    #[serde(default)]
    pub conversions: f64,
    #[serde(default)]
    pub ctr: f64,
    #[serde(default)]
    pub roas: f64,
}

/// Aggregate metrics for one period plus the chronological daily series.
///
/// After [`MetricsSnapshot::sanitize`] every numeric field is finite and
/// non-negative, and the daily series is sorted by date.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSnapshot {
    #[serde(default)]
    pub spend: f64,
    #[serde(default)]
    pub impressions: f64,
    #[serde(default)]
    pub clicks: f64,
    #[serde(default)]
    pub conversions: f64,
    #[serde(default)]
    pub ctr: f64,
    #[serde(default)]
    pub cpc: f64,
    #[serde(default)]
    pub cost_per_result: f64,
    #[serde(default)]
    pub roas: f64,
    #[serde(default)]
    pub reach: f64,
    #[serde(default)]
    pub budget: f64,
    #[serde(default)]
    pub frequency: f64,
    #[serde(default)]
    pub link_clicks: f64,
    #[serde(default)]
    pub daily_series: Vec<DailyMetrics>,
}

/// Clamp a metric to a finite, non-negative value. Anything else is 0.
fn clamp_metric(value: f64) -> f64 {
    if value.is_finite() && value >= 0.0 {
        value
    } else {
        0.0
    }
}

impl MetricsSnapshot {
    /// Normalize all numeric fields and order the daily series.
    pub fn sanitize(mut self) -> Self {
        self.spend = clamp_metric(self.spend);
        self.impressions = clamp_metric(self.impressions);
        self.clicks = clamp_metric(self.clicks);
        self.conversions = clamp_metric(self.conversions);
        self.ctr = clamp_metric(self.ctr);
        self.cpc = clamp_metric(self.cpc);
        self.cost_per_result = clamp_metric(self.cost_per_result);
        self.roas = clamp_metric(self.roas);
        self.reach = clamp_metric(self.reach);
        self.budget = clamp_metric(self.budget);
        self.frequency = clamp_metric(self.frequency);
        self.link_clicks = clamp_metric(self.link_clicks);
        for day in &mut self.daily_series {
            day.spend = clamp_metric(day.spend);
            day.impressions = clamp_metric(day.impressions);
            day.clicks = clamp_metric(day.clicks);
            day.conversions = clamp_metric(day.conversions);
            day.ctr = clamp_metric(day.ctr);
            day.roas = clamp_metric(day.roas);
        }
        self.daily_series.sort_by_key(|d| d.date);
        self
    }

    /// True when every aggregate is zero and the daily series is empty.
    /// This is what the empty-result retry policy keys on.
    pub fn is_empty(&self) -> bool {
        self.spend == 0.0
            && self.impressions == 0.0
            && self.clicks == 0.0
            && self.conversions == 0.0
            && self.ctr == 0.0
            && self.cpc == 0.0
            && self.cost_per_result == 0.0
            && self.roas == 0.0
            && self.reach == 0.0
            && self.budget == 0.0
            && self.frequency == 0.0
            && self.link_clicks == 0.0
            && self.daily_series.is_empty()
    }
}

/// The output of one successful fetch cycle: current period, comparison
/// period, and the human-readable comparison label. Never mutated in place;
/// each cycle replaces it wholesale.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComparisonResult {
    pub current: MetricsSnapshot,
    pub previous: MetricsSnapshot,
    pub previous_label: String,
    pub fetched_at: DateTime<Utc>,
}

/// Last-known-good data for a brand, persisted by [`crate::cache::CacheStore`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry {
    pub brand_id: String,
    pub range: DateRange,
    pub comparison: ComparisonResult,
    pub fetched_at: DateTime<Utc>,
}

/// Per-brand fetch lifecycle. One enum instead of independent
/// `isLoading`/`isRefreshing` booleans, so contradictory combinations
/// cannot be represented.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FetchState {
    #[default]
    Idle,
    Fetching,
    Success,
    Failed,
}

/// Where the data in a [`FetchOutcome`] came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataSource {
    Network,
    Cache,
}

/// Recoverable result of a fetch cycle. A cache fallback is a success with
/// `source == Cache` and `stale == true` — consumers keep rendering
/// last-known-good data instead of flashing to empty.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FetchOutcome {
    pub comparison: ComparisonResult,
    pub source: DataSource,
    /// False when the change detector judged the new data identical to the
    /// previously published cycle for this brand.
    pub changed: bool,
    pub stale: bool,
}
