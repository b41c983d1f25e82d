//! Rate-limited ledger API client
//!
//! Issues one paginated request at a time and classifies the outcome. A
//! 429 is absorbed with a long cooldown and a transport failure with a
//! short one, both bounded by the attempt budget; any other non-2xx
//! status is terminal for that page. A page that exhausts its attempts
//! yields an empty record list plus a structured failure rather than an
//! error: the caller treats "no data" as the accepted approximation for
//! an unfetchable page and reports the run as degraded.

use crate::settings::FetchPolicy;
use chrono::NaiveDate;
use serde_json::Value;
use std::fmt;
use std::future::Future;
use thiserror::Error;

/// Classified failure for a single page attempt.
#[derive(Debug, Clone, Error)]
pub enum FetchError {
    /// Transport-level failure (timeout, connection reset)
    #[error("network error: {0}")]
    Network(String),

    /// Provider throttled the request (HTTP 429)
    #[error("rate limit exceeded")]
    Throttled,

    /// Non-retryable HTTP status
    #[error("API error {0}")]
    Status(u16),

    /// Response body was not a JSON array
    #[error("parse error: {0}")]
    Parse(String),
}

/// One bounded unit of remote fetch work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PageQuery {
    /// Offset/limit slice over identifier-ordered records.
    Offset { start: i64, limit: u32 },
    /// Every record dated exactly this day.
    Date(NaiveDate),
}

impl fmt::Display for PageQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PageQuery::Offset { start, limit } => write!(f, "start={start} limit={limit}"),
            PageQuery::Date(date) => write!(f, "date={date}"),
        }
    }
}

/// Terminal failure for one page, kept for the run summary.
#[derive(Debug, Clone)]
pub struct PageFailure {
    pub query: PageQuery,
    pub attempts: u32,
    pub error: FetchError,
}

/// Result of driving one page to completion.
#[derive(Debug, Clone)]
pub struct PageOutcome {
    pub query: PageQuery,
    pub records: Vec<Value>,
    pub failure: Option<PageFailure>,
}

impl PageOutcome {
    fn ok(query: PageQuery, records: Vec<Value>) -> Self {
        Self { query, records, failure: None }
    }

    fn failed(query: PageQuery, attempts: u32, error: FetchError) -> Self {
        Self {
            query,
            records: Vec::new(),
            failure: Some(PageFailure { query, attempts, error }),
        }
    }
}

/// Record families the ledger API exposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordKind {
    Invoices,
    Bills,
}

impl RecordKind {
    fn path(self) -> &'static str {
        match self {
            RecordKind::Invoices => "invoices",
            RecordKind::Bills => "bills",
        }
    }
}

/// HTTP client for the ledger API.
pub struct LedgerClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    policy: FetchPolicy,
}

impl LedgerClient {
    pub fn new(base_url: &str, api_key: &str, policy: FetchPolicy) -> Result<Self, FetchError> {
        let http = reqwest::Client::builder()
            .timeout(policy.request_timeout)
            .build()
            .map_err(|e| FetchError::Network(e.to_string()))?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            policy,
        })
    }

    fn page_url(&self, kind: RecordKind, query: &PageQuery) -> String {
        let base = format!("{}/{}", self.base_url, kind.path());
        match query {
            PageQuery::Offset { start, limit } => {
                format!("{base}?start={start}&limit={limit}&order_direction=ASC&order_field=id")
            }
            PageQuery::Date(date) => match kind {
                // Bills share their endpoint with other purchase documents
                RecordKind::Bills => format!(
                    "{base}?date={date}&limit={}&order_field=date&type=bill",
                    self.policy.page_size
                ),
                RecordKind::Invoices => {
                    format!("{base}?date={date}&limit={}&order_field=date", self.policy.page_size)
                }
            },
        }
    }

    /// One attempt against one URL.
    async fn attempt(&self, url: &str) -> Result<Vec<Value>, FetchError> {
        let response = self
            .http
            .get(url)
            .header("accept", "application/json")
            .header("authorization", format!("Basic {}", self.api_key))
            .send()
            .await
            .map_err(|e| FetchError::Network(e.to_string()))?;

        let status = response.status();
        if status.as_u16() == 429 {
            return Err(FetchError::Throttled);
        }
        if !status.is_success() {
            return Err(FetchError::Status(status.as_u16()));
        }

        let body = response
            .text()
            .await
            .map_err(|e| FetchError::Network(e.to_string()))?;
        if body.trim().is_empty() {
            return Ok(Vec::new());
        }
        serde_json::from_str::<Vec<Value>>(&body).map_err(|e| FetchError::Parse(e.to_string()))
    }

    /// Drive one page to completion under the retry policy.
    pub async fn fetch_page(&self, kind: RecordKind, query: PageQuery) -> PageOutcome {
        let url = self.page_url(kind, &query);
        fetch_with_policy(&self.policy, query, || self.attempt(&url)).await
    }

    /// Newest record identifier dated at or before `before`.
    ///
    /// Pins the far end of an identifier fetch range. Runs under the same
    /// retry policy as a page; `Ok(None)` means the remote has nothing
    /// there, `Err` that the probe itself could not be completed.
    pub async fn latest_id_before(
        &self,
        kind: RecordKind,
        before: NaiveDate,
    ) -> Result<Option<i64>, FetchError> {
        let url = format!(
            "{}/{}?date_beforeOrNow={before}&order_direction=DESC&limit=1",
            self.base_url,
            kind.path()
        );
        let outcome = fetch_with_policy(&self.policy, PageQuery::Date(before), || {
            self.attempt(&url)
        })
        .await;

        if let Some(failure) = outcome.failure {
            return Err(failure.error);
        }
        Ok(outcome
            .records
            .first()
            .and_then(|record| crate::models::coerce_i64(record.get("id"))))
    }
}

/// Apply the retry policy to an arbitrary page attempt.
///
/// Split from [`LedgerClient`] so the loop can be exercised with scripted
/// attempts: an always-throttled page must be retried exactly
/// `max_attempts` times and then yield empty.
pub async fn fetch_with_policy<F, Fut>(
    policy: &FetchPolicy,
    query: PageQuery,
    mut attempt: F,
) -> PageOutcome
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Vec<Value>, FetchError>>,
{
    let mut last_error = FetchError::Throttled;
    for attempt_no in 1..=policy.max_attempts {
        match attempt().await {
            Ok(records) => {
                tracing::debug!(page = %query, count = records.len(), "page fetched");
                return PageOutcome::ok(query, records);
            }
            Err(FetchError::Throttled) => {
                tracing::warn!(
                    page = %query,
                    attempt = attempt_no,
                    max_attempts = policy.max_attempts,
                    "throttled by provider, cooling down"
                );
                last_error = FetchError::Throttled;
                tokio::time::sleep(policy.throttle_delay).await;
            }
            Err(FetchError::Network(message)) => {
                tracing::warn!(
                    page = %query,
                    attempt = attempt_no,
                    max_attempts = policy.max_attempts,
                    error = %message,
                    "network failure, retrying"
                );
                last_error = FetchError::Network(message);
                tokio::time::sleep(policy.network_delay).await;
            }
            Err(error @ (FetchError::Status(_) | FetchError::Parse(_))) => {
                // Client/server errors do not improve on retry; spend the
                // attempt budget on throttling instead.
                tracing::error!(page = %query, error = %error, "terminal page failure");
                return PageOutcome::failed(query, attempt_no, error);
            }
        }
    }

    tracing::error!(
        page = %query,
        attempts = policy.max_attempts,
        error = %last_error,
        "page failed after all attempts, assuming no data"
    );
    PageOutcome::failed(query, policy.max_attempts, last_error)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    fn instant_policy() -> FetchPolicy {
        FetchPolicy {
            throttle_delay: Duration::ZERO,
            network_delay: Duration::ZERO,
            ..FetchPolicy::default()
        }
    }

    #[test]
    fn client_creation() {
        let client = LedgerClient::new("https://api.example.com/api/v1/", "key", instant_policy());
        assert!(client.is_ok());
    }

    #[test]
    fn page_urls_carry_paging_parameters() {
        let client =
            LedgerClient::new("https://api.example.com/api/v1", "key", instant_policy()).unwrap();

        let offset = client.page_url(RecordKind::Invoices, &PageQuery::Offset { start: 60, limit: 30 });
        assert_eq!(
            offset,
            "https://api.example.com/api/v1/invoices?start=60&limit=30&order_direction=ASC&order_field=id"
        );

        let day = NaiveDate::from_ymd_opt(2024, 5, 10).unwrap();
        let date = client.page_url(RecordKind::Bills, &PageQuery::Date(day));
        assert_eq!(
            date,
            "https://api.example.com/api/v1/bills?date=2024-05-10&limit=30&order_field=date&type=bill"
        );
    }

    #[tokio::test]
    async fn always_throttled_page_stops_after_max_attempts() {
        let policy = instant_policy();
        let attempts = AtomicU32::new(0);

        let outcome = fetch_with_policy(&policy, PageQuery::Offset { start: 0, limit: 30 }, || {
            attempts.fetch_add(1, Ordering::SeqCst);
            async { Err::<Vec<Value>, _>(FetchError::Throttled) }
        })
        .await;

        assert_eq!(attempts.load(Ordering::SeqCst), policy.max_attempts);
        assert!(outcome.records.is_empty());
        let failure = outcome.failure.expect("failure recorded");
        assert_eq!(failure.attempts, policy.max_attempts);
    }

    #[tokio::test]
    async fn non_retryable_status_fails_without_retry() {
        let policy = instant_policy();
        let attempts = AtomicU32::new(0);

        let outcome = fetch_with_policy(&policy, PageQuery::Offset { start: 0, limit: 30 }, || {
            attempts.fetch_add(1, Ordering::SeqCst);
            async { Err::<Vec<Value>, _>(FetchError::Status(500)) }
        })
        .await;

        assert_eq!(attempts.load(Ordering::SeqCst), 1);
        let failure = outcome.failure.expect("failure recorded");
        assert_eq!(failure.attempts, 1);
    }

    #[tokio::test]
    async fn network_failure_then_success_recovers() {
        let policy = instant_policy();
        let attempts = AtomicU32::new(0);

        let outcome = fetch_with_policy(&policy, PageQuery::Offset { start: 0, limit: 30 }, || {
            let n = attempts.fetch_add(1, Ordering::SeqCst);
            async move {
                if n == 0 {
                    Err(FetchError::Network("connection reset".to_string()))
                } else {
                    Ok(vec![json!({"id": 1})])
                }
            }
        })
        .await;

        assert_eq!(attempts.load(Ordering::SeqCst), 2);
        assert!(outcome.failure.is_none());
        assert_eq!(outcome.records.len(), 1);
    }

    #[tokio::test]
    async fn empty_page_is_success_not_failure() {
        let policy = instant_policy();

        let outcome = fetch_with_policy(&policy, PageQuery::Offset { start: 900, limit: 30 }, || async {
            Ok(Vec::new())
        })
        .await;

        assert!(outcome.failure.is_none());
        assert!(outcome.records.is_empty());
    }
}
