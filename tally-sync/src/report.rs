//! Structured run outcomes
//!
//! Components hand counters and failures back up the stack instead of
//! logging and moving on; this module carries them and owns the single
//! translation into log lines, so correctness tests read values rather
//! than scrape logs.

use crate::client::PageFailure;
use std::fmt;

/// Which extractor produced a summary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Variant {
    Sales,
    Bills,
}

impl fmt::Display for Variant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Variant::Sales => write!(f, "sales"),
            Variant::Bills => write!(f, "bills"),
        }
    }
}

/// Aggregate outcome of one engine run.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub variant: Variant,
    pub pages_total: usize,
    pub pages_failed: Vec<PageFailure>,
    pub records_seen: usize,
    pub rows_written: u64,
    pub skipped_records: usize,
    pub skipped_items: usize,
    pub mirror_rows: u64,
}

impl RunSummary {
    pub fn empty(variant: Variant) -> Self {
        Self {
            variant,
            pages_total: 0,
            pages_failed: Vec::new(),
            records_seen: 0,
            rows_written: 0,
            skipped_records: 0,
            skipped_items: 0,
            mirror_rows: 0,
        }
    }

    /// A run is degraded when any page exhausted its retries: the store
    /// may under-count the remote source until those pages re-validate.
    pub fn degraded(&self) -> bool {
        !self.pages_failed.is_empty()
    }

    /// Translate the summary into log lines.
    pub fn log(&self) {
        for failure in &self.pages_failed {
            tracing::warn!(
                variant = %self.variant,
                page = %failure.query,
                attempts = failure.attempts,
                error = %failure.error,
                "page permanently failed; its data is absent from this run"
            );
        }
        if self.degraded() {
            tracing::warn!(
                variant = %self.variant,
                failed_pages = self.pages_failed.len(),
                "run degraded: remote data assumed absent for failed pages"
            );
        }
        tracing::info!(
            variant = %self.variant,
            pages = self.pages_total,
            records = self.records_seen,
            rows = self.rows_written,
            skipped_records = self.skipped_records,
            skipped_items = self.skipped_items,
            mirror_rows = self.mirror_rows,
            "sync run complete"
        );
    }
}
