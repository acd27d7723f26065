//! SQLite connection handling for the embedding cache.

use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;

use crate::config::DbConfig;
use crate::error::Result;
use crate::migrate;

/// Open the cache database, creating the file (and any missing parent
/// folders) on first use. WAL keeps readers cheap while an ingestion run
/// writes.
pub async fn connect(db: &DbConfig) -> Result<SqlitePool> {
    if let Some(parent) = db.path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", db.path.display()))?
        .create_if_missing(true)
        .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal);

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await?;

    Ok(pool)
}

/// Connect and pass the schema gate. Every command except `init` opens the
/// cache through here, so an uninitialized or mismatched schema fails fast
/// as `CacheCorruption` instead of silently rebuilding the index.
pub async fn open_verified(db: &DbConfig) -> Result<SqlitePool> {
    let pool = connect(db).await?;
    migrate::verify_schema(&pool).await?;
    Ok(pool)
}
