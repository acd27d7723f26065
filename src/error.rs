//! Error types for the lease Q&A core.

use thiserror::Error;

/// Result type alias using the crate's [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for ingestion and answering operations.
///
/// A refused query is not an error — it is a normal
/// [`AnswerResult`](crate::models::AnswerResult) with `refused = true`.
#[derive(Error, Debug)]
pub enum Error {
    /// Malformed or unreadable input document. During ingestion these are
    /// collected per document and reported; they never abort the run.
    #[error("Input error: {0}")]
    Input(String),

    /// Embedding or language-model API unreachable (network/auth).
    /// No partial cache state is left behind.
    #[error("Provider unavailable: {0}")]
    ProviderUnavailable(String),

    /// Provider rate limit still in effect after the bounded backoff.
    #[error("Rate limited: {0}")]
    RateLimited(String),

    /// An ingestion run is already executing.
    #[error("Ingestion already in progress")]
    AlreadyInProgress,

    /// Persisted embedding index unreadable or schema mismatch.
    /// Fatal at startup; requires operator intervention.
    #[error("Cache corruption: {0}")]
    CacheCorruption(String),

    /// Database operation failed (wraps sqlx::Error).
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// File I/O operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
