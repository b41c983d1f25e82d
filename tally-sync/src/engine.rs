//! Run orchestration
//!
//! Wires the reconciler, scheduler, flattener, and writer together for
//! one record type. The reconciler's repair commits before any fetch for
//! the repaired period is scheduled; the page fetches themselves run
//! unordered under the concurrency ceiling.

use crate::client::{LedgerClient, PageQuery, RecordKind};
use crate::export;
use crate::flatten;
use crate::reconcile::{self, IdRange};
use crate::report::{RunSummary, Variant};
use crate::scheduler;
use crate::settings::SyncSettings;
use crate::store::LedgerStore;
use chrono::{Local, NaiveDate};
use std::path::PathBuf;
use tally_common::{Error, Result};

/// Everything a run needs, resolved by the binary before the engine starts.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub database: PathBuf,
    pub base_url: String,
    pub api_key: String,
    pub export_dir: PathBuf,
    pub settings: SyncSettings,
}

impl EngineConfig {
    fn client(&self) -> Result<LedgerClient> {
        LedgerClient::new(&self.base_url, &self.api_key, self.settings.fetch.clone())
            .map_err(|e| Error::Api(e.to_string()))
    }
}

/// Synchronize sales invoices (identifier-paged).
pub async fn run_sales(config: &EngineConfig) -> Result<RunSummary> {
    run_sales_as_of(config, Local::now().date_naive()).await
}

/// Identifier-paged run against an explicit "today" (tests pin this).
pub async fn run_sales_as_of(config: &EngineConfig, today: NaiveDate) -> Result<RunSummary> {
    let mut store = LedgerStore::connect(&config.database).await?;
    store.ensure_schema().await?;
    let client = config.client()?;

    let mut summary = RunSummary::empty(Variant::Sales);

    let range = reconcile::resolve_sales_range(&mut store, &client, &config.settings, today).await?;
    if let Some(range) = range {
        let queries = offset_pages(&range, config.settings.fetch.page_size);
        summary.pages_total = queries.len();
        tracing::info!(
            first = range.first,
            last = range.last,
            pages = queries.len(),
            "fetching invoice range"
        );

        let outcomes =
            scheduler::fetch_all(&client, RecordKind::Invoices, queries, config.settings.concurrency)
                .await;

        let mut records = Vec::new();
        for outcome in outcomes {
            if let Some(failure) = outcome.failure {
                summary.pages_failed.push(failure);
            }
            records.extend(outcome.records);
        }
        summary.records_seen = records.len();

        // Offset pages can straddle the planned range; the window filter
        // keeps already-persisted identifiers out on re-runs.
        let (rows, stats) = flatten::flatten_invoices(&records, Some((range.first - 1, range.last)));
        summary.skipped_records = stats.skipped_records;
        summary.skipped_items = stats.skipped_items;

        if rows.is_empty() {
            tracing::info!("no invoice lines survived flattening");
        } else {
            summary.rows_written = store.append_sales(&rows, &config.settings).await?;
        }
    }

    let mirror = config.export_dir.join("sale_lines.csv");
    summary.mirror_rows = export::export_sales(&store, &mirror).await?;
    summary.log();
    Ok(summary)
}

/// Synchronize vendor bills (date-paged).
pub async fn run_bills(config: &EngineConfig) -> Result<RunSummary> {
    run_bills_as_of(config, Local::now().date_naive()).await
}

/// Date-paged run against an explicit "today" (tests pin this).
pub async fn run_bills_as_of(config: &EngineConfig, today: NaiveDate) -> Result<RunSummary> {
    let mut store = LedgerStore::connect(&config.database).await?;
    store.ensure_schema().await?;
    let client = config.client()?;

    let mut summary = RunSummary::empty(Variant::Bills);

    // Any boundary repair commits inside the resolve call, before a fetch
    // for the repaired day can be scheduled below.
    let first = reconcile::resolve_bills_start(&mut store, &client, &config.settings).await?;
    let days = reconcile::date_pages(first, today);

    if days.is_empty() {
        tracing::info!(resume = %first, "no new bill days to process");
    } else {
        summary.pages_total = days.len();
        tracing::info!(first = %first, last = %today, pages = days.len(), "fetching bill range");

        let queries: Vec<PageQuery> = days.into_iter().map(PageQuery::Date).collect();
        let outcomes =
            scheduler::fetch_all(&client, RecordKind::Bills, queries, config.settings.concurrency)
                .await;

        let mut rows = Vec::new();
        for outcome in outcomes {
            let PageQuery::Date(page_date) = outcome.query else {
                continue;
            };
            if let Some(failure) = outcome.failure {
                summary.pages_failed.push(failure);
            }
            summary.records_seen += outcome.records.len();

            let (day_rows, stats) = flatten::flatten_bills(&outcome.records, page_date);
            summary.skipped_records += stats.skipped_records;
            summary.skipped_items += stats.skipped_items;
            rows.extend(day_rows);
        }

        // Pages arrive in completion order; persist in calendar order so
        // the surrogate key follows the ledger's own timeline.
        rows.sort_by_key(|row| row.billed_on);

        if rows.is_empty() {
            tracing::info!("no bill lines survived flattening");
        } else {
            summary.rows_written = store.append_bills(&rows, &config.settings).await?;
        }
    }

    store.renumber_bill_lines().await?;
    let mirror = config.export_dir.join("bill_lines.csv");
    summary.mirror_rows = export::export_bills(&store, &mirror).await?;
    summary.log();
    Ok(summary)
}

/// Offset pages covering an identifier range.
fn offset_pages(range: &IdRange, page_size: u32) -> Vec<PageQuery> {
    let mut queries = Vec::new();
    let mut start = range.first;
    while start <= range.last {
        queries.push(PageQuery::Offset { start, limit: page_size });
        start += i64::from(page_size);
    }
    queries
}
