//! Token usage accounting.
//!
//! One append-only row per answered question with the provider-reported
//! token counts. Refusals, document listings, and failed calls append a
//! zero-cost row so the log still shows every question asked.

use sqlx::{Row, SqlitePool};

use crate::error::Result;
use crate::models::TokenUsage;

/// Append one usage row for an answered (or refused) question.
pub async fn append(pool: &SqlitePool, question: &str, usage: &TokenUsage) -> Result<()> {
    let now = chrono::Utc::now().timestamp();
    sqlx::query(
        r#"
        INSERT INTO usage_log (question, prompt_tokens, completion_tokens, created_at)
        VALUES (?, ?, ?, ?)
        "#,
    )
    .bind(question)
    .bind(usage.prompt_tokens as i64)
    .bind(usage.completion_tokens as i64)
    .bind(now)
    .execute(pool)
    .await?;
    Ok(())
}

/// Sum of all logged token counts.
pub async fn total(pool: &SqlitePool) -> Result<TokenUsage> {
    let row = sqlx::query(
        r#"
        SELECT COALESCE(SUM(prompt_tokens), 0) AS prompt,
               COALESCE(SUM(completion_tokens), 0) AS completion
        FROM usage_log
        "#,
    )
    .fetch_one(pool)
    .await?;

    let prompt: i64 = row.get("prompt");
    let completion: i64 = row.get("completion");
    Ok(TokenUsage {
        prompt_tokens: prompt as u64,
        completion_tokens: completion as u64,
    })
}

/// Number of questions logged.
pub async fn count(pool: &SqlitePool) -> Result<i64> {
    let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM usage_log")
        .fetch_one(pool)
        .await?;
    Ok(n)
}

/// Clear the log. Operator action only.
pub async fn reset(pool: &SqlitePool) -> Result<()> {
    sqlx::query("DELETE FROM usage_log").execute(pool).await?;
    Ok(())
}
