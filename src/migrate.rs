//! Schema creation and the startup corruption gate.
//!
//! `run_migrations` is idempotent. `verify_schema` runs before any pipeline
//! operation: a missing or mismatched schema version means the persisted
//! index cannot be trusted and is surfaced as a fatal `CacheCorruption`
//! error rather than silently re-embedding the corpus.

use sqlx::SqlitePool;

use crate::error::{Error, Result};

/// Bumped whenever the persisted layout changes incompatibly.
pub const SCHEMA_VERSION: i64 = 1;

pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    let existing: Option<i64> = sqlx::query_scalar("SELECT version FROM schema_version LIMIT 1")
        .fetch_optional(pool)
        .await?;
    match existing {
        None => {
            sqlx::query("INSERT INTO schema_version (version) VALUES (?)")
                .bind(SCHEMA_VERSION)
                .execute(pool)
                .await?;
        }
        Some(v) if v == SCHEMA_VERSION => {}
        Some(v) => {
            return Err(Error::CacheCorruption(format!(
                "embedding cache schema version {} does not match expected {}",
                v, SCHEMA_VERSION
            )));
        }
    }

    // Document fingerprint manifest. One row per ingested document; the
    // content hash detects source changes, chunk_count supports status
    // reporting.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS documents (
            identity TEXT PRIMARY KEY,
            content_hash TEXT NOT NULL,
            chunk_count INTEGER NOT NULL,
            ingested_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Embedding index, keyed by content fingerprint. The primary key makes
    // compare-and-insert (INSERT .. ON CONFLICT DO NOTHING) race-free.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS embeddings (
            fingerprint TEXT PRIMARY KEY,
            document TEXT NOT NULL,
            chunk_index INTEGER NOT NULL,
            start_offset INTEGER NOT NULL,
            end_offset INTEGER NOT NULL,
            text TEXT NOT NULL,
            model TEXT NOT NULL,
            dims INTEGER NOT NULL,
            vector BLOB NOT NULL,
            created_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_embeddings_document ON embeddings(document)")
        .execute(pool)
        .await?;

    // Token usage log: append-only, cleared only by the operator.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS usage_log (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            question TEXT NOT NULL,
            prompt_tokens INTEGER NOT NULL,
            completion_tokens INTEGER NOT NULL,
            created_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Check the persisted schema without modifying it. Called at pipeline
/// startup; any mismatch is fatal.
pub async fn verify_schema(pool: &SqlitePool) -> Result<()> {
    let has_version_table: bool = sqlx::query_scalar(
        "SELECT COUNT(*) > 0 FROM sqlite_master WHERE type = 'table' AND name = 'schema_version'",
    )
    .fetch_one(pool)
    .await
    .map_err(|e| Error::CacheCorruption(format!("cannot read embedding cache: {}", e)))?;

    if !has_version_table {
        return Err(Error::CacheCorruption(
            "embedding cache is not initialized (run `leaseqa init`)".to_string(),
        ));
    }

    let version: Option<i64> = sqlx::query_scalar("SELECT version FROM schema_version LIMIT 1")
        .fetch_optional(pool)
        .await
        .map_err(|e| Error::CacheCorruption(format!("cannot read schema version: {}", e)))?;

    match version {
        Some(v) if v == SCHEMA_VERSION => Ok(()),
        Some(v) => Err(Error::CacheCorruption(format!(
            "embedding cache schema version {} does not match expected {}",
            v, SCHEMA_VERSION
        ))),
        None => Err(Error::CacheCorruption(
            "embedding cache has no schema version row".to_string(),
        )),
    }
}
