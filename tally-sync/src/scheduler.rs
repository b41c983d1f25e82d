//! Concurrent page scheduler
//!
//! Fans a set of page queries out over a bounded number of in-flight
//! fetches and collects every outcome keyed by its originating query.
//! Pages are independent: one page's terminal failure never disturbs its
//! siblings, and arrival order carries no meaning — callers reassemble by
//! page descriptor.

use crate::client::{LedgerClient, PageOutcome, PageQuery, RecordKind};
use futures::stream::{self, StreamExt};
use std::future::Future;

/// Drive `run` over every item with at most `concurrency` in flight.
pub async fn fan_out<I, T, F, Fut>(items: Vec<I>, concurrency: usize, run: F) -> Vec<T>
where
    F: Fn(I) -> Fut,
    Fut: Future<Output = T>,
{
    stream::iter(items)
        .map(run)
        .buffer_unordered(concurrency.max(1))
        .collect()
        .await
}

/// Fetch every page concurrently.
///
/// Returns all outcomes, failed ones included, so the caller can report
/// degradation per page descriptor.
pub async fn fetch_all(
    client: &LedgerClient,
    kind: RecordKind,
    queries: Vec<PageQuery>,
    concurrency: usize,
) -> Vec<PageOutcome> {
    let total = queries.len();
    tracing::debug!(pages = total, concurrency, "scheduling page fetches");
    fan_out(queries, concurrency, |query| client.fetch_page(kind, query)).await
}
