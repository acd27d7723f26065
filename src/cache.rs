//! Persistent embedding cache keyed by content fingerprint.
//!
//! The cache is the sole writer of the embedding index and the document
//! manifest. A fingerprint covers the document identity, chunk index,
//! chunk text, and the chunking parameters, so identical content ingested
//! with identical parameters always hits.
//!
//! Concurrency: an in-process per-fingerprint lock gives at most one
//! provider call in flight per fingerprint, and persistence uses
//! compare-and-insert (`INSERT .. ON CONFLICT DO NOTHING` against the
//! fingerprint primary key) so duplicate completions are discarded rather
//! than double-stored. A provider failure leaves the cache unmodified.

use sha2::{Digest, Sha256};
use sqlx::{Row, SqlitePool};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::embedding::{self, EmbeddingProvider};
use crate::error::{Error, Result};
use crate::models::{Chunk, EmbeddingRecord};

pub struct EmbeddingCache {
    pool: SqlitePool,
    provider: Arc<dyn EmbeddingProvider>,
    chunk_size: usize,
    overlap: usize,
    in_flight: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl EmbeddingCache {
    pub fn new(
        pool: SqlitePool,
        provider: Arc<dyn EmbeddingProvider>,
        chunk_size: usize,
        overlap: usize,
    ) -> Self {
        Self {
            pool,
            provider,
            chunk_size,
            overlap,
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    /// Deterministic cache key: identical content + chunking parameters
    /// always yield the same fingerprint.
    pub fn fingerprint(&self, chunk: &Chunk) -> String {
        let mut hasher = Sha256::new();
        hasher.update(chunk.document.as_bytes());
        hasher.update([0]);
        hasher.update(chunk.index.to_le_bytes());
        hasher.update(chunk.text.as_bytes());
        hasher.update((self.chunk_size as u64).to_le_bytes());
        hasher.update((self.overlap as u64).to_le_bytes());
        format!("{:x}", hasher.finalize())
    }

    /// Return the cached record for this chunk, computing and persisting it
    /// first if absent. The boolean is true on a cache hit (no provider
    /// call was made).
    pub async fn get_or_compute(&self, chunk: &Chunk) -> Result<(EmbeddingRecord, bool)> {
        let fingerprint = self.fingerprint(chunk);

        // At most one in-flight computation per fingerprint.
        let lock = {
            let mut map = self.in_flight.lock().await;
            map.entry(fingerprint.clone())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };

        let result = {
            let _guard = lock.lock().await;
            self.compute(&fingerprint, chunk).await
        };

        // Drop the map entry once no other task waits on it. Correctness
        // never depends on the map (compare-and-insert dedupes storage);
        // it only spares duplicate provider calls, so a racing lookup that
        // recreates the entry after a removal is harmless.
        {
            let mut map = self.in_flight.lock().await;
            let done = map
                .get(&fingerprint)
                .is_some_and(|l| Arc::strong_count(l) <= 2);
            if done {
                map.remove(&fingerprint);
            }
        }

        result
    }

    async fn compute(&self, fingerprint: &str, chunk: &Chunk) -> Result<(EmbeddingRecord, bool)> {
        if let Some(record) = self.fetch(fingerprint).await? {
            return Ok((record, true));
        }

        let vectors = self.provider.embed(&[chunk.text.clone()]).await?;
        let vector = vectors.into_iter().next().ok_or_else(|| {
            Error::ProviderUnavailable("empty embedding response".to_string())
        })?;

        let now = chrono::Utc::now().timestamp();
        sqlx::query(
            r#"
            INSERT INTO embeddings
                (fingerprint, document, chunk_index, start_offset, end_offset,
                 text, model, dims, vector, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(fingerprint) DO NOTHING
            "#,
        )
        .bind(fingerprint)
        .bind(&chunk.document)
        .bind(chunk.index)
        .bind(chunk.start as i64)
        .bind(chunk.end as i64)
        .bind(&chunk.text)
        .bind(self.provider.model_name())
        .bind(self.provider.dims() as i64)
        .bind(embedding::vec_to_blob(&vector))
        .bind(now)
        .execute(&self.pool)
        .await?;

        let record = self.fetch(fingerprint).await?.ok_or_else(|| {
            Error::CacheCorruption(format!("record vanished after insert: {}", fingerprint))
        })?;
        Ok((record, false))
    }

    /// Drop the manifest row and every embedding record belonging to a
    /// removed or changed document.
    pub async fn invalidate(&self, document: &str) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM embeddings WHERE document = ?")
            .bind(document)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM documents WHERE identity = ?")
            .bind(document)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    /// Manifest lookup: (content_hash, chunk_count) for an ingested
    /// document, or None if it was never fully ingested.
    pub async fn manifest_entry(&self, identity: &str) -> Result<Option<(String, i64)>> {
        let row = sqlx::query(
            "SELECT content_hash, chunk_count FROM documents WHERE identity = ?",
        )
        .bind(identity)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|r| (r.get("content_hash"), r.get("chunk_count"))))
    }

    /// Record a document as fully ingested. Written only after every chunk
    /// of the document has an embedding record.
    pub async fn record_manifest(
        &self,
        identity: &str,
        content_hash: &str,
        chunk_count: i64,
    ) -> Result<()> {
        let now = chrono::Utc::now().timestamp();
        sqlx::query(
            r#"
            INSERT INTO documents (identity, content_hash, chunk_count, ingested_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(identity) DO UPDATE SET
                content_hash = excluded.content_hash,
                chunk_count = excluded.chunk_count,
                ingested_at = excluded.ingested_at
            "#,
        )
        .bind(identity)
        .bind(content_hash)
        .bind(chunk_count)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    #[cfg(test)]
    pub(crate) async fn in_flight_len(&self) -> usize {
        self.in_flight.lock().await.len()
    }

    async fn fetch(&self, fingerprint: &str) -> Result<Option<EmbeddingRecord>> {
        let row = sqlx::query(
            r#"
            SELECT fingerprint, document, chunk_index, start_offset, end_offset,
                   text, model, vector
            FROM embeddings WHERE fingerprint = ?
            "#,
        )
        .bind(fingerprint)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| {
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
        }))
    }
}
