//! Core data models used throughout the lease Q&A pipeline.
//!
//! These types represent the documents, chunks, embedding records, and
//! results that flow through ingestion and answering.

/// A PDF discovered in the corpus folder, before any reading.
#[derive(Debug, Clone)]
pub struct CorpusFile {
    /// Path relative to the corpus root; the document's identity.
    pub identity: String,
    /// Absolute path on disk.
    pub path: std::path::PathBuf,
    pub size_bytes: u64,
}

/// A document with its extracted text. Immutable once ingested; replaced
/// wholesale if the source file changes.
#[derive(Debug, Clone)]
pub struct RawDocument {
    pub identity: String,
    pub text: String,
    /// SHA-256 of the file bytes, used to detect source changes.
    pub content_hash: String,
}

/// A bounded span of a document's text.
///
/// Consecutive chunks overlap by a fixed window; together they cover the
/// document text exactly. Offsets are byte offsets into the document text,
/// always on UTF-8 boundaries.
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    pub document: String,
    pub index: i64,
    pub start: usize,
    pub end: usize,
    pub text: String,
}

/// A persisted embedding for one chunk, keyed by content fingerprint.
///
/// Created once per unique fingerprint; survives process restarts; removed
/// only when its source document is invalidated.
#[derive(Debug, Clone)]
pub struct EmbeddingRecord {
    pub fingerprint: String,
    pub document: String,
    pub chunk_index: i64,
    pub start: i64,
    pub end: i64,
    /// Masked chunk text — PII is filtered before embedding, so the index
    /// never stores raw sensitive values.
    pub text: String,
    pub model: String,
    pub vector: Vec<f32>,
}

/// A retrieval hit: an embedding record plus its similarity to the query.
#[derive(Debug, Clone)]
pub struct ScoredChunk {
    pub document: String,
    pub chunk_index: i64,
    pub start: i64,
    pub text: String,
    pub score: f64,
}

/// Token counts for one language-model call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
}

impl TokenUsage {
    pub fn total(&self) -> u64 {
        self.prompt_tokens + self.completion_tokens
    }

    pub fn add(&mut self, other: TokenUsage) {
        self.prompt_tokens += other.prompt_tokens;
        self.completion_tokens += other.completion_tokens;
    }
}

/// Raw output of a language-model provider call.
#[derive(Debug, Clone)]
pub struct Completion {
    pub text: String,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
}

/// A per-document failure collected during ingestion.
#[derive(Debug, Clone)]
pub struct IngestError {
    pub document: String,
    pub message: String,
}

/// Outcome of one ingestion run. Failures are partial: documents that
/// could not be read or embedded appear in `errors` while the rest of the
/// corpus is processed normally.
#[derive(Debug, Clone, Default)]
pub struct IngestionReport {
    pub documents_processed: u64,
    pub chunks_embedded: u64,
    pub chunks_skipped_cached: u64,
    pub errors: Vec<IngestError>,
}

/// Outcome of one `answer` call.
///
/// `refused = true` means the sensitive-query firewall blocked the question
/// before any retrieval or model call; the fixed refusal text is in `text`
/// and `usage` is zero.
#[derive(Debug, Clone)]
pub struct AnswerResult {
    pub text: String,
    pub refused: bool,
    pub usage: TokenUsage,
}
