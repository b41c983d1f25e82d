//! Durable mirror export
//!
//! The store is authoritative; the mirror is a disposable projection. It
//! is rewritten wholesale from the full table after every run — even a
//! no-op one — so it can never drift from the store the way an appended
//! file could. Internal bookkeeping columns (surrogate key, creation
//! timestamp) stay out of the file.

use crate::store::LedgerStore;
use serde::Serialize;
use std::path::Path;
use tally_common::{Error, Result};

/// Rewrite the sales mirror from the full table contents.
pub async fn export_sales(store: &LedgerStore, path: &Path) -> Result<u64> {
    let rows = store.all_sales().await?;
    let written = write_csv(path, &rows)?;
    tracing::info!(rows = written, mirror = %path.display(), "sales mirror rewritten");
    Ok(written)
}

/// Rewrite the bills mirror from the full table contents.
pub async fn export_bills(store: &LedgerStore, path: &Path) -> Result<u64> {
    let rows = store.all_bills().await?;
    let written = write_csv(path, &rows)?;
    tracing::info!(rows = written, mirror = %path.display(), "bills mirror rewritten");
    Ok(written)
}

/// Serialize rows to a temp file, then swap it into place so readers
/// never observe a half-written mirror.
fn write_csv<T: Serialize>(path: &Path, rows: &[T]) -> Result<u64> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let tmp = path.with_extension("csv.tmp");
    let mut writer = csv::Writer::from_path(&tmp)
        .map_err(|e| Error::Internal(format!("mirror open failed: {e}")))?;
    for row in rows {
        writer
            .serialize(row)
            .map_err(|e| Error::Internal(format!("mirror write failed: {e}")))?;
    }
    writer
        .flush()
        .map_err(|e| Error::Internal(format!("mirror flush failed: {e}")))?;
    drop(writer);

    std::fs::rename(&tmp, path)?;
    Ok(rows.len() as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flatten::BillLine;
    use crate::settings::SyncSettings;
    use chrono::NaiveDate;
    use sqlx::SqlitePool;
    use std::time::Duration;

    #[tokio::test]
    async fn mirror_is_a_full_snapshot_without_bookkeeping_columns() {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        let mut store = LedgerStore::from_pool(pool);
        store.ensure_schema().await.unwrap();

        let settings = SyncSettings {
            store_retry_delay: Duration::ZERO,
            ..SyncSettings::bills()
        };
        let d = NaiveDate::from_ymd_opt(2024, 5, 10).unwrap();
        let rows: Vec<BillLine> = (1..=2)
            .map(|n| BillLine {
                bill_id: 9,
                item_id: n,
                billed_on: d,
                item_name: format!("item {n}"),
                unit_price: 1.5,
                quantity: 2.0,
                line_total: 3.0,
                bill_total: 6.0,
                supplier: "Acme Supply".to_string(),
            })
            .collect();
        store.append_bills(&rows, &settings).await.unwrap();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bill_lines.csv");
        let written = export_bills(&store, &path).await.unwrap();
        assert_eq!(written, 2);

        let content = std::fs::read_to_string(&path).unwrap();
        let mut lines = content.lines();
        let header = lines.next().unwrap();
        assert_eq!(
            header,
            "bill_id,item_id,billed_on,item_name,unit_price,quantity,line_total,bill_total,supplier"
        );
        assert_eq!(lines.count(), 2);

        // A second export overwrites rather than appends
        export_bills(&store, &path).await.unwrap();
        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content.lines().count(), 3);
    }
}
