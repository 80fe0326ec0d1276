//! Remote metrics API boundary.
//!
//! The engine talks to the platform through the [`MetricsApi`] trait so
//! tests can substitute a scripted backend. The production implementation
//! is [`HttpMetricsApi`]: direct HTTP via reqwest with a transport-level
//! retry layer (429/5xx/timeout/connect are retryable, exponential backoff
//! with jitter, `Retry-After` honored).
//!
//! Transport retries here are distinct from the engine's empty-result
//! retry policy: this layer re-sends requests that never produced a usable
//! response, the engine re-issues whole cycles that produced suspicious
//! (all-zero) data.

use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::config::SyncConfig;
use crate::coordinator::RequestId;
use crate::error::SyncError;
use crate::types::{DailyMetrics, DateRange, MetricsSnapshot, RangePreset};

// ============================================================================
// Query + response wire types
// ============================================================================

/// One metrics request: brand, range, and the request id it runs under.
#[derive(Debug, Clone)]
pub struct MetricsQuery {
    pub brand_id: String,
    pub range: DateRange,
    /// Ask the server to skip its own response cache (used on retries so a
    /// stale empty result is not served back verbatim).
    pub bypass_cache: bool,
    pub request_id: RequestId,
}

/// Date range echoed by the server, used to validate the response actually
/// answers the question that was asked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EchoedRange {
    pub from: NaiveDate,
    pub to: NaiveDate,
}

/// Raw metrics payload from `GET /metrics`. Every field defaults so a
/// sparse response still parses; sanitization happens in
/// [`MetricsResponse::into_snapshot`].
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsResponse {
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
    pub daily_data: Vec<DailyMetrics>,
    #[serde(default, rename = "_dateRange")]
    pub date_range: Option<EchoedRange>,
}

impl MetricsResponse {
    /// True when the echoed range matches the requested one. A missing echo
    /// is treated as a mismatch — unverifiable data is not displayed.
    pub fn echoes(&self, range: &DateRange) -> bool {
        self.date_range
            .map(|echoed| echoed.from == range.from && echoed.to == range.to)
            .unwrap_or(false)
    }

    /// Convert to a sanitized snapshot (finite, non-negative, sorted).
    pub fn into_snapshot(self) -> MetricsSnapshot {
        MetricsSnapshot {
            spend: self.spend,
            impressions: self.impressions,
            clicks: self.clicks,
            conversions: self.conversions,
            ctr: self.ctr,
            cpc: self.cpc,
            cost_per_result: self.cost_per_result,
            roas: self.roas,
            reach: self.reach,
            budget: self.budget,
            frequency: self.frequency,
            link_clicks: self.link_clicks,
            daily_series: self.daily_data,
        }
        .sanitize()
    }
}

/// Error body for non-2xx responses: `{"error": "..."}`.
#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    #[serde(default)]
    error: String,
}

impl RangePreset {
    /// Query-string form, matching the serde camelCase representation.
    pub fn as_query(&self) -> &'static str {
        match self {
            RangePreset::Today => "today",
            RangePreset::Yesterday => "yesterday",
            RangePreset::Last7Days => "last7Days",
            RangePreset::Last30Days => "last30Days",
            RangePreset::ThisMonth => "thisMonth",
            RangePreset::LastMonth => "lastMonth",
            RangePreset::ThisYear => "thisYear",
            RangePreset::LastYear => "lastYear",
            RangePreset::Custom => "custom",
        }
    }
}

// ============================================================================
// The API seam
// ============================================================================

/// Abstract metrics backend. One production HTTP implementation; tests use
/// scripted mocks.
#[async_trait]
pub trait MetricsApi: Send + Sync {
    /// Fetch aggregate + daily metrics for one brand and range.
    async fn fetch_metrics(&self, query: &MetricsQuery) -> Result<MetricsResponse, SyncError>;

    /// Fire-and-forget: ask the platform to re-sync campaign structures.
    /// The outcome never blocks a metrics snapshot.
    async fn sync_campaigns(&self, brand_id: &str) -> Result<(), SyncError>;

    /// Fire-and-forget: ask the platform to refresh ad-set budgets.
    async fn refresh_adset_budgets(&self, brand_id: &str) -> Result<(), SyncError>;
}

// ============================================================================
// Transport retry policy
// ============================================================================

/// How often a metrics request is re-sent before the engine gives up on
/// the transport. Part of [`SyncConfig`] so deployments behind flaky
/// proxies can loosen it without code changes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryPolicy {
    /// Total sends per request, first attempt included.
    #[serde(default = "default_retry_attempts")]
    pub attempts: u32,
    /// Delay before the second send; doubles on each attempt after that.
    #[serde(default = "default_retry_base_delay_ms")]
    pub base_delay_ms: u64,
    /// Ceiling for the doubled delay.
    #[serde(default = "default_retry_max_delay_ms")]
    pub max_delay_ms: u64,
}

fn default_retry_attempts() -> u32 {
    3
}

fn default_retry_base_delay_ms() -> u64 {
    300
}

fn default_retry_max_delay_ms() -> u64 {
    3_000
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: default_retry_attempts(),
            base_delay_ms: default_retry_base_delay_ms(),
            max_delay_ms: default_retry_max_delay_ms(),
        }
    }
}

/// `Retry-After` hints above this are an outage, not a delay worth
/// waiting out inside a dashboard fetch.
const RETRY_AFTER_CAP: Duration = Duration::from_secs(10);

impl RetryPolicy {
    /// Statuses the metrics backend emits transiently: rate limiting and
    /// gateway/server hiccups. Everything else means the request itself
    /// is wrong and re-sending it cannot help.
    fn should_resend(status: reqwest::StatusCode) -> bool {
        status == reqwest::StatusCode::TOO_MANY_REQUESTS
            || status == reqwest::StatusCode::REQUEST_TIMEOUT
            || status.is_server_error()
    }

    /// Delay before send number `next_attempt`. The server's `Retry-After`
    /// hint wins when present (capped); otherwise the base delay doubles
    /// per attempt up to the ceiling. No jitter: the per-brand lock keeps
    /// concurrent request counts far too low to stampede the backend.
    fn delay_before(&self, next_attempt: u32, retry_after: Option<Duration>) -> Duration {
        if let Some(hinted) = retry_after {
            return hinted.min(RETRY_AFTER_CAP);
        }
        let shift = next_attempt.saturating_sub(2).min(16);
        let doubled = self.base_delay_ms.saturating_mul(1u64 << shift);
        Duration::from_millis(doubled.min(self.max_delay_ms))
    }
}

fn retry_after_hint(response: &reqwest::Response) -> Option<Duration> {
    response
        .headers()
        .get(reqwest::header::RETRY_AFTER)?
        .to_str()
        .ok()?
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

/// Send a request, re-sending it on transient transport failures. The
/// final attempt's response is returned as-is; the caller decides what a
/// non-2xx status means.
pub async fn send_with_retry(
    request: reqwest::RequestBuilder,
    policy: &RetryPolicy,
) -> Result<reqwest::Response, SyncError> {
    let attempts = policy.attempts.max(1);
    let mut attempt: u32 = 1;
    loop {
        let Some(send) = request.try_clone() else {
            // Unclonable (streaming) bodies get a single shot
            return request.send().await.map_err(SyncError::Http);
        };

        let last = attempt >= attempts;
        let (reason, hint) = match send.send().await {
            Ok(response) if !last && RetryPolicy::should_resend(response.status()) => (
                format!("status {}", response.status()),
                retry_after_hint(&response),
            ),
            Ok(response) => return Ok(response),
            Err(err) if !last && (err.is_timeout() || err.is_connect()) => {
                (err.to_string(), None)
            }
            Err(err) => return Err(SyncError::Http(err)),
        };

        attempt += 1;
        let delay = policy.delay_before(attempt, hint);
        log::warn!(
            "metrics request attempt {}/{} failed ({}), next try in {:?}",
            attempt - 1,
            attempts,
            reason,
            delay
        );
        tokio::time::sleep(delay).await;
    }
}

// ============================================================================
// HTTP implementation
// ============================================================================

/// Production metrics client.
pub struct HttpMetricsApi {
    client: reqwest::Client,
    base_url: Url,
    retry: RetryPolicy,
}

impl HttpMetricsApi {
    pub fn new(base_url: &str) -> Result<Self, SyncError> {
        Self::with_retry(base_url, RetryPolicy::default())
    }

    /// Build the client from configuration: base URL plus retry policy.
    pub fn from_config(config: &SyncConfig) -> Result<Self, SyncError> {
        Self::with_retry(&config.api_base_url, config.retry.clone())
    }

    pub fn with_retry(base_url: &str, retry: RetryPolicy) -> Result<Self, SyncError> {
        let base_url =
            Url::parse(base_url).map_err(|e| SyncError::InvalidBaseUrl(e.to_string()))?;
        Ok(Self {
            client: reqwest::Client::new(),
            base_url,
            retry,
        })
    }

    fn endpoint(&self, path: &str) -> Result<Url, SyncError> {
        self.base_url
            .join(path)
            .map_err(|e| SyncError::InvalidBaseUrl(e.to_string()))
    }

    /// Surface a non-2xx response as an API error with the server's
    /// `{"error": ...}` message when one is present.
    async fn into_api_error(response: reqwest::Response) -> SyncError {
        let status = response.status().as_u16();
        let message = match response.json::<ApiErrorBody>().await {
            Ok(body) if !body.error.is_empty() => body.error,
            _ => "unknown error".to_string(),
        };
        SyncError::Api { status, message }
    }
}

#[async_trait]
impl MetricsApi for HttpMetricsApi {
    async fn fetch_metrics(&self, query: &MetricsQuery) -> Result<MetricsResponse, SyncError> {
        let url = self.endpoint("metrics")?;
        let mut request = self
            .client
            .get(url)
            .query(&[
                ("brandId", query.brand_id.as_str()),
                ("from", &query.range.from.to_string()),
                ("to", &query.range.to.to_string()),
            ])
            .query(&[("bypassCache", query.bypass_cache)]);
        if let Some(preset) = query.range.preset {
            request = request.query(&[("preset", preset.as_query())]);
        }

        log::debug!(
            "fetch_metrics {} {} ({})",
            query.brand_id,
            query.range.fingerprint(),
            query.request_id
        );

        let response = send_with_retry(request, &self.retry).await?;
        if !response.status().is_success() {
            return Err(Self::into_api_error(response).await);
        }

        response.json::<MetricsResponse>().await.map_err(SyncError::Http)
    }

    async fn sync_campaigns(&self, brand_id: &str) -> Result<(), SyncError> {
        let url = self.endpoint(&format!("brands/{brand_id}/sync/campaigns"))?;
        let response = send_with_retry(self.client.post(url), &self.retry).await?;
        if !response.status().is_success() {
            return Err(Self::into_api_error(response).await);
        }
        Ok(())
    }

    async fn refresh_adset_budgets(&self, brand_id: &str) -> Result<(), SyncError> {
        let url = self.endpoint(&format!("brands/{brand_id}/sync/adsets"))?;
        let response = send_with_retry(self.client.post(url), &self.retry).await?;
        if !response.status().is_success() {
            return Err(Self::into_api_error(response).await);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn test_transient_statuses_resend() {
        use reqwest::StatusCode;
        assert!(RetryPolicy::should_resend(StatusCode::TOO_MANY_REQUESTS));
        assert!(RetryPolicy::should_resend(StatusCode::REQUEST_TIMEOUT));
        assert!(RetryPolicy::should_resend(StatusCode::BAD_GATEWAY));
        assert!(RetryPolicy::should_resend(StatusCode::INTERNAL_SERVER_ERROR));
        assert!(!RetryPolicy::should_resend(StatusCode::BAD_REQUEST));
        assert!(!RetryPolicy::should_resend(StatusCode::UNAUTHORIZED));
        assert!(!RetryPolicy::should_resend(StatusCode::NOT_FOUND));
    }

    #[test]
    fn test_delay_prefers_server_hint() {
        let policy = RetryPolicy::default();
        assert_eq!(
            policy.delay_before(2, Some(Duration::from_secs(3))),
            Duration::from_secs(3)
        );
        // An outage-sized hint is capped
        assert_eq!(
            policy.delay_before(2, Some(Duration::from_secs(999))),
            RETRY_AFTER_CAP
        );
    }

    #[test]
    fn test_delay_doubles_up_to_ceiling() {
        let policy = RetryPolicy {
            attempts: 6,
            base_delay_ms: 100,
            max_delay_ms: 1_000,
        };
        assert_eq!(policy.delay_before(2, None), Duration::from_millis(100));
        assert_eq!(policy.delay_before(3, None), Duration::from_millis(200));
        assert_eq!(policy.delay_before(5, None), Duration::from_millis(800));
        assert_eq!(policy.delay_before(12, None), Duration::from_millis(1_000));
    }

    #[test]
    fn test_retry_policy_wire_format() {
        let policy: RetryPolicy =
            serde_json::from_str(r#"{"attempts": 5, "baseDelayMs": 100}"#).unwrap();
        assert_eq!(policy.attempts, 5);
        assert_eq!(policy.base_delay_ms, 100);
        // Unlisted fields keep their defaults
        assert_eq!(policy.max_delay_ms, 3_000);
    }

    #[test]
    fn test_response_parsing_with_echoed_range() {
        let json = r#"{
            "spend": 250.0,
            "clicks": 1200,
            "dailyData": [
                {"date": "2024-03-22", "spend": 130.0},
                {"date": "2024-03-21", "spend": 120.0}
            ],
            "_dateRange": {"from": "2024-03-21", "to": "2024-03-27"}
        }"#;
        let response: MetricsResponse = serde_json::from_str(json).unwrap();

        let requested = DateRange::new(d(2024, 3, 21), d(2024, 3, 27)).unwrap();
        assert!(response.echoes(&requested));
        let other = DateRange::new(d(2024, 3, 14), d(2024, 3, 20)).unwrap();
        assert!(!response.echoes(&other));

        let snapshot = response.into_snapshot();
        assert_eq!(snapshot.spend, 250.0);
        // into_snapshot sorts the daily series chronologically
        assert_eq!(snapshot.daily_series[0].date, d(2024, 3, 21));
    }

    #[test]
    fn test_missing_echo_is_a_mismatch() {
        let response: MetricsResponse = serde_json::from_str(r#"{"spend": 1.0}"#).unwrap();
        let requested = DateRange::new(d(2024, 3, 21), d(2024, 3, 27)).unwrap();
        assert!(!response.echoes(&requested));
    }

    #[test]
    fn test_preset_query_form_matches_serde() {
        for preset in [
            RangePreset::Today,
            RangePreset::Yesterday,
            RangePreset::Last7Days,
            RangePreset::Last30Days,
            RangePreset::ThisMonth,
            RangePreset::LastMonth,
            RangePreset::ThisYear,
            RangePreset::LastYear,
            RangePreset::Custom,
        ] {
            let serialized = serde_json::to_string(&preset).unwrap();
            assert_eq!(serialized, format!("\"{}\"", preset.as_query()));
        }
    }

    #[test]
    fn test_invalid_base_url_rejected() {
        assert!(matches!(
            HttpMetricsApi::new("not a url"),
            Err(SyncError::InvalidBaseUrl(_))
        ));
    }
}
