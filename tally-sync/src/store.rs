//! Persistent store for flattened ledger rows
//!
//! Append-only SQLite tables with a gap-free AUTOINCREMENT surrogate key.
//! Batches commit atomically: a partial insert would break the gap-free
//! sequence, so the whole batch lands or none of it does. Connection-class
//! failures reconnect the pool and retry the batch; integrity failures do
//! not retry. The surrogate sequence is mutated in exactly two places —
//! normal appends, and the reconciler's boundary repair (delete plus
//! sequence reset).

use crate::flatten::{BillLine, SaleLine};
use crate::settings::SyncSettings;
use chrono::NaiveDate;
use sqlx::{Row, SqlitePool};
use std::path::Path;
use tally_common::Result;

/// Sales table name, as recorded in `sqlite_sequence`.
pub const SALES_TABLE: &str = "sale_lines";
/// Bills table name, as recorded in `sqlite_sequence`.
pub const BILLS_TABLE: &str = "bill_lines";

/// Owned handle on the ledger store.
///
/// Keeps the database URL alongside the pool so a connection-class write
/// failure can rebuild the pool and retry against the same file.
pub struct LedgerStore {
    url: String,
    pool: SqlitePool,
}

impl LedgerStore {
    /// Open (or create) the store at a database file path.
    pub async fn connect(db_path: &Path) -> Result<Self> {
        let pool = tally_common::db::init_database_pool(db_path).await?;
        Ok(Self {
            url: tally_common::db::database_url(db_path),
            pool,
        })
    }

    /// Wrap an existing pool. Reconnection is disabled (there is no URL to
    /// rebuild from); in-memory test databases rely on this.
    pub fn from_pool(pool: SqlitePool) -> Self {
        Self {
            url: String::new(),
            pool,
        }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Create tables and indexes if missing.
    ///
    /// Everything is IF NOT EXISTS so pipeline stages can race to
    /// initialize without tripping over each other.
    pub async fn ensure_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS sale_lines (
                line_id INTEGER PRIMARY KEY AUTOINCREMENT,
                invoice_id INTEGER NOT NULL,
                item_id INTEGER NOT NULL,
                sold_on DATE NOT NULL,
                sold_at TEXT NOT NULL,
                item_name TEXT NOT NULL,
                unit_price REAL NOT NULL,
                quantity INTEGER NOT NULL,
                line_total REAL NOT NULL,
                client TEXT NOT NULL,
                invoice_total REAL NOT NULL,
                payment_method TEXT NOT NULL,
                seller TEXT NOT NULL,
                created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_sale_lines_invoice ON sale_lines(invoice_id)")
            .execute(&self.pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_sale_lines_date ON sale_lines(sold_on)")
            .execute(&self.pool)
            .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS bill_lines (
                line_id INTEGER PRIMARY KEY AUTOINCREMENT,
                bill_id INTEGER NOT NULL,
                item_id INTEGER NOT NULL,
                billed_on DATE NOT NULL,
                item_name TEXT NOT NULL,
                unit_price REAL NOT NULL,
                quantity REAL NOT NULL,
                line_total REAL NOT NULL,
                bill_total REAL NOT NULL,
                supplier TEXT NOT NULL,
                created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_bill_lines_bill ON bill_lines(bill_id)")
            .execute(&self.pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_bill_lines_date ON bill_lines(billed_on)")
            .execute(&self.pool)
            .await?;

        tracing::debug!("store schema ensured (sale_lines, bill_lines)");
        Ok(())
    }

    /// Append one batch of sales rows atomically, retrying connection-class
    /// failures with doubling backoff. Integrity failures propagate on the
    /// first attempt: retrying the same malformed batch cannot succeed.
    pub async fn append_sales(&mut self, rows: &[SaleLine], settings: &SyncSettings) -> Result<u64> {
        let mut attempt = 1;
        loop {
            match insert_sales(&self.pool, rows).await {
                Ok(written) => {
                    tracing::info!(rows = written, "sales batch committed");
                    return Ok(written);
                }
                Err(err) if is_connection_error(&err) && attempt < settings.store_attempts => {
                    let wait = settings.store_retry_delay * 2u32.pow(attempt - 1);
                    tracing::warn!(
                        attempt,
                        max_attempts = settings.store_attempts,
                        error = %err,
                        "sales batch write failed, reconnecting in {:?}",
                        wait
                    );
                    tokio::time::sleep(wait).await;
                    self.reconnect().await;
                    attempt += 1;
                }
                Err(err) => return Err(err.into()),
            }
        }
    }

    /// Append one batch of bill rows atomically; same retry contract as
    /// [`LedgerStore::append_sales`].
    pub async fn append_bills(&mut self, rows: &[BillLine], settings: &SyncSettings) -> Result<u64> {
        let mut attempt = 1;
        loop {
            match insert_bills(&self.pool, rows).await {
                Ok(written) => {
                    tracing::info!(rows = written, "bills batch committed");
                    return Ok(written);
                }
                Err(err) if is_connection_error(&err) && attempt < settings.store_attempts => {
                    let wait = settings.store_retry_delay * 2u32.pow(attempt - 1);
                    tracing::warn!(
                        attempt,
                        max_attempts = settings.store_attempts,
                        error = %err,
                        "bills batch write failed, reconnecting in {:?}",
                        wait
                    );
                    tokio::time::sleep(wait).await;
                    self.reconnect().await;
                    attempt += 1;
                }
                Err(err) => return Err(err.into()),
            }
        }
    }

    async fn reconnect(&mut self) {
        if self.url.is_empty() {
            return;
        }
        match tally_common::db::connect_pool(&self.url).await {
            Ok(pool) => {
                self.pool = pool;
                tracing::info!("store connection re-established");
            }
            Err(err) => tracing::error!(error = %err, "store reconnect failed"),
        }
    }

    /// Highest persisted remote invoice identifier.
    pub async fn max_invoice_id(&self) -> Result<Option<i64>> {
        let id: Option<i64> = sqlx::query_scalar("SELECT MAX(invoice_id) FROM sale_lines")
            .fetch_one(&self.pool)
            .await?;
        Ok(id)
    }

    /// Most recent persisted bill date — the boundary key.
    pub async fn last_bill_date(&self) -> Result<Option<NaiveDate>> {
        let date: Option<NaiveDate> = sqlx::query_scalar("SELECT MAX(billed_on) FROM bill_lines")
            .fetch_one(&self.pool)
            .await?;
        Ok(date)
    }

    /// Persisted line count for one bill day.
    pub async fn count_bills_on(&self, day: NaiveDate) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM bill_lines WHERE billed_on = ?")
            .bind(day)
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    /// Delete every row for one boundary day and pull the surrogate
    /// sequence back to the surviving maximum, in one transaction, so the
    /// next append continues gap-free.
    pub async fn delete_bills_on(&self, day: NaiveDate) -> Result<u64> {
        let mut tx = self.pool.begin().await?;

        let deleted = sqlx::query("DELETE FROM bill_lines WHERE billed_on = ?")
            .bind(day)
            .execute(&mut *tx)
            .await?
            .rows_affected();

        let max_id: i64 = sqlx::query_scalar("SELECT COALESCE(MAX(line_id), 0) FROM bill_lines")
            .fetch_one(&mut *tx)
            .await?;
        sqlx::query("UPDATE sqlite_sequence SET seq = ? WHERE name = ?")
            .bind(max_id)
            .bind(BILLS_TABLE)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(deleted)
    }

    /// Rewrite `line_id` as a dense 1..=N sequence when deletes have left
    /// gaps, ordered by date then original key. Run before each mirror
    /// export; a no-op when the sequence is already dense.
    pub async fn renumber_bill_lines(&self) -> Result<()> {
        let gaps: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM (
                SELECT line_id, ROW_NUMBER() OVER (ORDER BY line_id) AS expected
                FROM bill_lines
            ) WHERE line_id != expected
            "#,
        )
        .fetch_one(&self.pool)
        .await?;

        if gaps == 0 {
            return Ok(());
        }

        tracing::info!(gaps, "surrogate key gaps detected, renumbering bill lines");
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            CREATE TEMP TABLE bill_lines_renumbered AS
            SELECT ROW_NUMBER() OVER (ORDER BY billed_on, line_id) AS new_id,
                   bill_id, item_id, billed_on, item_name, unit_price, quantity,
                   line_total, bill_total, supplier, created_at
            FROM bill_lines
            "#,
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM bill_lines").execute(&mut *tx).await?;

        sqlx::query(
            r#"
            INSERT INTO bill_lines
                (line_id, bill_id, item_id, billed_on, item_name, unit_price,
                 quantity, line_total, bill_total, supplier, created_at)
            SELECT new_id, bill_id, item_id, billed_on, item_name, unit_price,
                   quantity, line_total, bill_total, supplier, created_at
            FROM bill_lines_renumbered
            ORDER BY new_id
            "#,
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query("DROP TABLE bill_lines_renumbered")
            .execute(&mut *tx)
            .await?;

        let max_id: i64 = sqlx::query_scalar("SELECT COALESCE(MAX(line_id), 0) FROM bill_lines")
            .fetch_one(&mut *tx)
            .await?;
        sqlx::query("UPDATE sqlite_sequence SET seq = ? WHERE name = ?")
            .bind(max_id)
            .bind(BILLS_TABLE)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    /// Full sales table in surrogate-key order, for the mirror export.
    pub async fn all_sales(&self) -> Result<Vec<SaleLine>> {
        let rows = sqlx::query(
            r#"
            SELECT invoice_id, item_id, sold_on, sold_at, item_name, unit_price,
                   quantity, line_total, client, invoice_total, payment_method, seller
            FROM sale_lines
            ORDER BY line_id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| SaleLine {
                invoice_id: row.get("invoice_id"),
                item_id: row.get("item_id"),
                sold_on: row.get("sold_on"),
                sold_at: row.get("sold_at"),
                item_name: row.get("item_name"),
                unit_price: row.get("unit_price"),
                quantity: row.get("quantity"),
                line_total: row.get("line_total"),
                client: row.get("client"),
                invoice_total: row.get("invoice_total"),
                payment_method: row.get("payment_method"),
                seller: row.get("seller"),
            })
            .collect())
    }

    /// Full bills table in surrogate-key order, for the mirror export.
    pub async fn all_bills(&self) -> Result<Vec<BillLine>> {
        let rows = sqlx::query(
            r#"
            SELECT bill_id, item_id, billed_on, item_name, unit_price,
                   quantity, line_total, bill_total, supplier
            FROM bill_lines
            ORDER BY line_id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| BillLine {
                bill_id: row.get("bill_id"),
                item_id: row.get("item_id"),
                billed_on: row.get("billed_on"),
                item_name: row.get("item_name"),
                unit_price: row.get("unit_price"),
                quantity: row.get("quantity"),
                line_total: row.get("line_total"),
                bill_total: row.get("bill_total"),
                supplier: row.get("supplier"),
            })
            .collect())
    }

    /// Surrogate keys of the bills table, ascending.
    pub async fn bill_line_ids(&self) -> Result<Vec<i64>> {
        let ids: Vec<i64> = sqlx::query_scalar("SELECT line_id FROM bill_lines ORDER BY line_id")
            .fetch_all(&self.pool)
            .await?;
        Ok(ids)
    }
}

/// Connection-class errors are worth a reconnect-and-retry; everything
/// else (constraint violations, decode errors) is not.
fn is_connection_error(err: &sqlx::Error) -> bool {
    matches!(
        err,
        sqlx::Error::Io(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::Tls(_)
    )
}

async fn insert_sales(pool: &SqlitePool, rows: &[SaleLine]) -> sqlx::Result<u64> {
    let mut tx = pool.begin().await?;
    for row in rows {
        sqlx::query(
            r#"
            INSERT INTO sale_lines
                (invoice_id, item_id, sold_on, sold_at, item_name, unit_price,
                 quantity, line_total, client, invoice_total, payment_method, seller)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(row.invoice_id)
        .bind(row.item_id)
        .bind(row.sold_on)
        .bind(&row.sold_at)
        .bind(&row.item_name)
        .bind(row.unit_price)
        .bind(row.quantity)
        .bind(row.line_total)
        .bind(&row.client)
        .bind(row.invoice_total)
        .bind(&row.payment_method)
        .bind(&row.seller)
        .execute(&mut *tx)
        .await?;
    }
    tx.commit().await?;
    Ok(rows.len() as u64)
}

async fn insert_bills(pool: &SqlitePool, rows: &[BillLine]) -> sqlx::Result<u64> {
    let mut tx = pool.begin().await?;
    for row in rows {
        sqlx::query(
            r#"
            INSERT INTO bill_lines
                (bill_id, item_id, billed_on, item_name, unit_price,
                 quantity, line_total, bill_total, supplier)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(row.bill_id)
        .bind(row.item_id)
        .bind(row.billed_on)
        .bind(&row.item_name)
        .bind(row.unit_price)
        .bind(row.quantity)
        .bind(row.line_total)
        .bind(row.bill_total)
        .bind(&row.supplier)
        .execute(&mut *tx)
        .await?;
    }
    tx.commit().await?;
    Ok(rows.len() as u64)
}
