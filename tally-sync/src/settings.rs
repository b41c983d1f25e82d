//! Engine tuning knobs
//!
//! Every component takes these values by parameter rather than reading
//! ambient globals, so tests can run with zero delays and a concurrency
//! of one without touching process-wide state.

use chrono::NaiveDate;
use std::time::Duration;

/// Fetch and retry policy for one ledger client.
#[derive(Debug, Clone)]
pub struct FetchPolicy {
    /// Records per page; the provider caps pages at 30.
    pub page_size: u32,
    /// Attempts per page before the page is declared failed.
    pub max_attempts: u32,
    /// Cooldown after a 429 response.
    pub throttle_delay: Duration,
    /// Wait after a transport-level failure. Shorter than the throttle
    /// cooldown: network blips clear faster than provider throttling.
    pub network_delay: Duration,
    /// Per-request timeout.
    pub request_timeout: Duration,
}

impl Default for FetchPolicy {
    fn default() -> Self {
        Self {
            page_size: 30,
            max_attempts: 5,
            throttle_delay: Duration::from_secs(60),
            network_delay: Duration::from_secs(5),
            request_timeout: Duration::from_secs(30),
        }
    }
}

/// Tuning for one sync run.
#[derive(Debug, Clone)]
pub struct SyncSettings {
    pub fetch: FetchPolicy,
    /// Simultaneous in-flight page requests. Must stay below the provider's
    /// throttle threshold; raising it trades 429 churn for throughput.
    pub concurrency: usize,
    /// Days subtracted from today when probing the newest remote
    /// identifier, so a period the provider is still filling in never
    /// becomes the checkpoint.
    pub days_buffer: i64,
    /// Nominal date of the bootstrap rows seeded on a first run.
    pub bootstrap_date: NaiveDate,
    /// Batch-append attempts against the store before giving up.
    pub store_attempts: u32,
    /// Base delay for store retry backoff; doubles per attempt.
    pub store_retry_delay: Duration,
}

impl SyncSettings {
    /// Defaults for the sales (identifier-paged) extractor.
    pub fn sales() -> Self {
        Self {
            concurrency: 7,
            ..Self::base()
        }
    }

    /// Defaults for the vendor-bill (date-paged) extractor.
    pub fn bills() -> Self {
        Self {
            concurrency: 4,
            ..Self::base()
        }
    }

    fn base() -> Self {
        Self {
            fetch: FetchPolicy::default(),
            concurrency: 4,
            days_buffer: 3,
            bootstrap_date: NaiveDate::from_ymd_opt(2023, 1, 1).expect("valid bootstrap date"),
            store_attempts: 3,
            store_retry_delay: Duration::from_secs(5),
        }
    }
}
