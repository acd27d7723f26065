//! Similarity retrieval over the persisted embedding index.
//!
//! Brute-force cosine scan, which is the right trade-off at lease-corpus
//! scale (tens of documents, thousands of chunks). Ranking is fully
//! deterministic: score descending, then document identity ascending, then
//! chunk start offset ascending.

use sqlx::{Row, SqlitePool};
use std::cmp::Ordering;

use crate::embedding;
use crate::error::Result;
use crate::models::{EmbeddingRecord, ScoredChunk};

/// Score and rank candidate chunks against a query vector. Pure function
/// so the ordering rules are testable without a database.
pub fn rank(records: &[EmbeddingRecord], query: &[f32], k: usize) -> Vec<ScoredChunk> {
    let mut scored: Vec<ScoredChunk> = records
        .iter()
        .map(|r| ScoredChunk {
            document: r.document.clone(),
            chunk_index: r.chunk_index,
            start: r.start,
            text: r.text.clone(),
            score: embedding::cosine_similarity(&r.vector, query) as f64,
        })
        .collect();

    scored.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.document.cmp(&b.document))
            .then_with(|| a.start.cmp(&b.start))
    });

    scored.truncate(k);
    scored
}

/// Load every embedding record and return the top-k chunks for the query.
/// An empty index yields an empty result, never an error.
pub async fn search(pool: &SqlitePool, query: &[f32], k: usize) -> Result<Vec<ScoredChunk>> {
    let rows = sqlx::query(
        r#"
        SELECT fingerprint, document, chunk_index, start_offset, end_offset,
               text, model, vector
        FROM embeddings
        "#,
    )
    .fetch_all(pool)
    .await?;

    let records: Vec<EmbeddingRecord> = rows.into_iter().map(record_from_row).collect();
    Ok(rank(&records, query, k))
}

/// Top-k chunks for the query restricted to a single document. Used by the
/// comparison flow, which summarizes each document separately.
pub async fn search_document(
    pool: &SqlitePool,
    query: &[f32],
    document: &str,
    k: usize,
) -> Result<Vec<ScoredChunk>> {
    let rows = sqlx::query(
        r#"
        SELECT fingerprint, document, chunk_index, start_offset, end_offset,
               text, model, vector
        FROM embeddings WHERE document = ?
        "#,
    )
    .bind(document)
    .fetch_all(pool)
    .await?;

    let records: Vec<EmbeddingRecord> = rows.into_iter().map(record_from_row).collect();
    Ok(rank(&records, query, k))
}

fn record_from_row(r: sqlx::sqlite::SqliteRow) -> EmbeddingRecord {
    let blob: Vec<u8> = r.get("vector");
    EmbeddingRecord {
        fingerprint: r.get("fingerprint"),
        document: r.get("document"),
        chunk_index: r.get("chunk_index"),
        start: r.get("start_offset"),
        end: r.get("end_offset"),
        text: r.get("text"),
        model: r.get("model"),
        vector: embedding::blob_to_vec(&blob),
    }
}
