//! Database initialization
//!
//! Opens (or creates) the SQLite store and applies connection pragmas.

use crate::Result;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;
use std::path::Path;
use tracing::info;

/// SQLite URL for a database file, in read-write-create mode.
pub fn database_url(db_path: &Path) -> String {
    format!("sqlite://{}?mode=rwc", db_path.display())
}

/// Initialize database connection pool, creating the file if needed.
pub async fn init_database_pool(db_path: &Path) -> Result<SqlitePool> {
    let newly_created = !db_path.exists();

    // Ensure parent directory exists
    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let pool = connect_pool(&database_url(db_path)).await?;

    if newly_created {
        info!("Initialized new database: {}", db_path.display());
    } else {
        info!("Opened existing database: {}", db_path.display());
    }

    Ok(pool)
}

/// Connect a pool to an already-formed SQLite URL.
///
/// Split out from [`init_database_pool`] so the store writer can rebuild
/// its pool from the same URL when it reconnects after a connection-class
/// write failure.
pub async fn connect_pool(db_url: &str) -> Result<SqlitePool> {
    tracing::debug!("Connecting to database: {}", db_url);

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect(db_url)
        .await?;

    // WAL keeps the mirror export readable while a write transaction is open
    sqlx::query("PRAGMA journal_mode = WAL").execute(&pool).await?;
    sqlx::query("PRAGMA busy_timeout = 5000").execute(&pool).await?;

    Ok(pool)
}
