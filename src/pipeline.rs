//! Pipeline orchestration: ingestion and question answering.
//!
//! `Pipeline` owns the database pool, the providers, the embedding cache,
//! and the PII filter, and exposes the operations the CLI drives. One
//! ingestion runs at a time; a second concurrent call is rejected rather
//! than queued.

use sqlx::SqlitePool;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::cache::EmbeddingCache;
use crate::chunk;
use crate::config::Config;
use crate::db;
use crate::documents;
use crate::embedding::{self, EmbeddingProvider};
use crate::error::{Error, Result};
use crate::filter::SensitiveDataFilter;
use crate::llm::{self, LlmProvider};
use crate::migrate;
use crate::models::{
    AnswerResult, CorpusFile, IngestError, IngestionReport, TokenUsage,
};
use crate::retrieve;
use crate::synth;
use crate::usage;

/// Questions that ask what documents the system has, answered from the
/// manifest without any model call.
const LISTING_KEYWORDS: &[&str] = &[
    "documents",
    "files",
    "leases",
    "contracts",
    "available",
    "access",
    "what do you have",
    "what files",
    "which documents",
    "list documents",
    "show me documents",
    "what leases",
    "what contracts",
];

/// Questions that ask for a cross-document comparison; answered by the
/// per-document summarize-then-compare flow.
const COMPARISON_KEYWORDS: &[&str] = &[
    "compare",
    "difference",
    "differences",
    "across documents",
    "between documents",
    "all documents",
    "each document",
    "contrast",
];

/// Counts reported by the `status` command.
#[derive(Debug, Clone)]
pub struct StatusReport {
    pub documents: i64,
    pub chunks: i64,
    pub questions: i64,
    pub usage: TokenUsage,
}

pub struct Pipeline {
    config: Config,
    pool: SqlitePool,
    cache: EmbeddingCache,
    embedder: Arc<dyn EmbeddingProvider>,
    llm: Arc<dyn LlmProvider>,
    filter: SensitiveDataFilter,
    ingest_guard: Mutex<()>,
}

/// Create or migrate the embedding cache. The only operation allowed to
/// modify the schema.
pub async fn init(config: &Config) -> Result<()> {
    let pool = db::connect(&config.db).await?;
    migrate::run_migrations(&pool).await?;
    Ok(())
}

impl Pipeline {
    /// Open against an initialized cache with the configured providers.
    pub async fn open(config: Config) -> Result<Self> {
        let embedder = embedding::create_provider(&config.embedding)?;
        let llm = llm::create_provider(&config.llm)?;
        Self::open_with_providers(config, embedder, llm).await
    }

    /// Open with caller-supplied providers. Used by tests to run the whole
    /// pipeline offline.
    pub async fn open_with_providers(
        config: Config,
        embedder: Arc<dyn EmbeddingProvider>,
        llm: Arc<dyn LlmProvider>,
    ) -> Result<Self> {
        let pool = db::open_verified(&config.db).await?;

        let cache = EmbeddingCache::new(
            pool.clone(),
            embedder.clone(),
            config.chunking.chunk_size,
            config.chunking.overlap,
        );

        Ok(Self {
            config,
            pool,
            cache,
            embedder,
            llm,
            filter: SensitiveDataFilter::new(),
            ingest_guard: Mutex::new(()),
        })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Scan the corpus and bring the embedding cache up to date.
    ///
    /// Per-document failures are collected in the report; the rest of the
    /// corpus still processes. Returns `AlreadyInProgress` if another
    /// ingestion holds the guard.
    pub async fn ingest(&self) -> Result<IngestionReport> {
        let _guard = self
            .ingest_guard
            .try_lock()
            .map_err(|_| Error::AlreadyInProgress)?;

        let files = documents::scan_corpus(&self.config.corpus)?;
        let mut report = IngestionReport::default();

        for file in &files {
            match self.ingest_file(file, &mut report).await {
                Ok(()) => report.documents_processed += 1,
                Err(e) => report.errors.push(IngestError {
                    document: file.identity.clone(),
                    message: e.to_string(),
                }),
            }
        }

        Ok(report)
    }

    async fn ingest_file(&self, file: &CorpusFile, report: &mut IngestionReport) -> Result<()> {
        let doc = documents::load_document(file)?;

        if let Some((hash, chunk_count)) = self.cache.manifest_entry(&doc.identity).await? {
            if hash == doc.content_hash {
                report.chunks_skipped_cached += chunk_count as u64;
                return Ok(());
            }
            // Source changed: drop the stale records, then re-embed below.
            self.cache.invalidate(&doc.identity).await?;
        }

        // Mask before chunking so raw PII never reaches the index or the
        // embedding provider.
        let (masked_text, _spans) = self.filter.scan(&doc.text);
        let chunks = chunk::chunk_text(
            &doc.identity,
            &masked_text,
            self.config.chunking.chunk_size,
            self.config.chunking.overlap,
        );

        for c in &chunks {
            let (_record, hit) = self.cache.get_or_compute(c).await?;
            if hit {
                report.chunks_skipped_cached += 1;
            } else {
                report.chunks_embedded += 1;
            }
        }

        // Manifest only after every chunk is persisted: a document that
        // fails partway is retried next run, with the stored chunks as
        // cache hits.
        self.cache
            .record_manifest(&doc.identity, &doc.content_hash, chunks.len() as i64)
            .await?;
        Ok(())
    }

    /// Answer one question against the ingested corpus.
    pub async fn answer(&self, question: &str) -> Result<AnswerResult> {
        let question = question.trim();
        if question.is_empty() {
            return Err(Error::Input("No question provided".to_string()));
        }

        // Input-side firewall first: sensitive questions are refused before
        // any other routing, retrieval, or model call, at zero token cost.
        if self.filter.is_sensitive_query(question) {
            let text = self.filter.refusal_message(question);
            usage::append(&self.pool, question, &TokenUsage::default()).await?;
            return Ok(AnswerResult {
                text,
                refused: true,
                usage: TokenUsage::default(),
            });
        }

        // Comparison before listing: "across documents" phrasing would
        // otherwise hit the listing keywords.
        if is_comparison_question(question) {
            return self.answer_comparison(question).await;
        }

        if is_listing_question(question) {
            let text = self.document_listing().await?;
            usage::append(&self.pool, question, &TokenUsage::default()).await?;
            return Ok(AnswerResult {
                text,
                refused: false,
                usage: TokenUsage::default(),
            });
        }

        let query_vec = self.embed_question(question).await?;

        let chunks = retrieve::search(&self.pool, &query_vec, self.config.retrieval.top_k).await?;
        if chunks.is_empty() {
            usage::append(&self.pool, question, &TokenUsage::default()).await?;
            return Ok(AnswerResult {
                text: synth::NOT_SPECIFIED.to_string(),
                refused: false,
                usage: TokenUsage::default(),
            });
        }

        let (text, token_usage) =
            synth::synthesize(self.llm.as_ref(), &self.filter, question, &chunks).await?;
        usage::append(&self.pool, question, &token_usage).await?;

        Ok(AnswerResult {
            text,
            refused: false,
            usage: token_usage,
        })
    }

    /// Cross-document comparison: retrieve and summarize per document, then
    /// compare the summaries in one final call. Documents with no relevant
    /// chunks get a fixed placeholder summary at zero cost. Token usage
    /// accumulates across every call and is logged once.
    async fn answer_comparison(&self, question: &str) -> Result<AnswerResult> {
        let identities: Vec<String> =
            sqlx::query_scalar("SELECT identity FROM documents ORDER BY identity")
                .fetch_all(&self.pool)
                .await?;

        if identities.is_empty() {
            usage::append(&self.pool, question, &TokenUsage::default()).await?;
            return Ok(AnswerResult {
                text: "I couldn't find any documents to compare.".to_string(),
                refused: false,
                usage: TokenUsage::default(),
            });
        }

        let query_vec = self.embed_question(question).await?;
        let mut total = TokenUsage::default();
        let mut summaries: Vec<(String, String)> = Vec::new();

        for identity in &identities {
            let chunks = retrieve::search_document(
                &self.pool,
                &query_vec,
                identity,
                self.config.retrieval.top_k,
            )
            .await?;

            if chunks.is_empty() {
                summaries.push((identity.clone(), synth::NO_DETAILS.to_string()));
                continue;
            }

            let prompt = synth::build_summary_prompt(question, identity, &chunks);
            let (summary, used) =
                synth::complete_masked(self.llm.as_ref(), &self.filter, &prompt).await?;
            total.add(used);
            summaries.push((identity.clone(), summary));
        }

        let prompt = synth::build_comparison_prompt(question, &summaries);
        let (text, used) =
            synth::complete_masked(self.llm.as_ref(), &self.filter, &prompt).await?;
        total.add(used);

        usage::append(&self.pool, question, &total).await?;
        Ok(AnswerResult {
            text,
            refused: false,
            usage: total,
        })
    }

    async fn embed_question(&self, question: &str) -> Result<Vec<f32>> {
        let mut vectors = self.embedder.embed(&[question.to_string()]).await?;
        if vectors.is_empty() {
            return Err(Error::ProviderUnavailable(
                "empty embedding response".to_string(),
            ));
        }
        Ok(vectors.swap_remove(0))
    }

    /// Plain-text listing of the corpus, with per-document ingest state.
    async fn document_listing(&self) -> Result<String> {
        let files = match documents::scan_corpus(&self.config.corpus) {
            Ok(files) => files,
            Err(_) => Vec::new(),
        };

        if files.is_empty() {
            return Ok(format!(
                "I don't currently have access to any documents. \
                 Please ensure PDF files are placed in the '{}' folder.",
                self.config.corpus.root.display()
            ));
        }

        let mut lines = vec!["I have access to the following documents:".to_string()];
        for (i, file) in files.iter().enumerate() {
            let state = match self.cache.manifest_entry(&file.identity).await? {
                Some(_) => "indexed",
                None => "not ingested",
            };
            lines.push(format!(
                "  {}. {} ({:.1} MB) - {}",
                i + 1,
                file.identity,
                file.size_bytes as f64 / (1024.0 * 1024.0),
                state
            ));
        }
        lines.push(String::new());
        lines.push("You can ask questions such as:".to_string());
        lines.push("  - What is the lease term in [filename]?".to_string());
        lines.push("  - What is the monthly rent in [filename]?".to_string());
        lines.push("  - What are the tenant responsibilities in [filename]?".to_string());

        Ok(lines.join("\n"))
    }

    pub async fn status(&self) -> Result<StatusReport> {
        status(&self.pool).await
    }

    pub async fn usage_total(&self) -> Result<TokenUsage> {
        usage::total(&self.pool).await
    }

    pub async fn reset_usage(&self) -> Result<()> {
        usage::reset(&self.pool).await
    }
}

/// Cache and usage counts. Takes a bare pool so read-only commands can
/// report without constructing providers.
pub async fn status(pool: &SqlitePool) -> Result<StatusReport> {
    let documents: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM documents")
        .fetch_one(pool)
        .await?;
    let chunks: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM embeddings")
        .fetch_one(pool)
        .await?;
    let questions = usage::count(pool).await?;
    let usage = usage::total(pool).await?;

    Ok(StatusReport {
        documents,
        chunks,
        questions,
        usage,
    })
}

fn is_listing_question(question: &str) -> bool {
    let q = question.to_lowercase();
    LISTING_KEYWORDS.iter().any(|kw| q.contains(kw))
}

fn is_comparison_question(question: &str) -> bool {
    let q = question.to_lowercase();
    COMPARISON_KEYWORDS.iter().any(|kw| q.contains(kw))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn listing_detection() {
        assert!(is_listing_question("What documents do you have?"));
        assert!(is_listing_question("list documents"));
        assert!(is_listing_question("Which leases can I ask about?"));
        assert!(!is_listing_question("What is the monthly rent?"));
    }

    #[test]
    fn comparison_detection() {
        assert!(is_comparison_question("Compare the monthly rent."));
        assert!(is_comparison_question("What are the differences in notice periods?"));
        assert!(is_comparison_question("Contrast the parking terms across documents"));
        assert!(!is_comparison_question("What is the monthly rent?"));
        assert!(!is_comparison_question("What documents do you have?"));
    }
}
