//! Embedding provider abstraction and implementations.
//!
//! - [`OpenAiEmbeddings`] calls the OpenAI embeddings API with bounded
//!   exponential backoff (1s, 2s, 4s, ... capped at 2^5).
//! - [`MockEmbeddings`] produces deterministic vectors offline, for tests
//!   and dry setups; it counts calls and can simulate an outage.
//!
//! Also provides the vector utilities used by the cache and retriever:
//! [`cosine_similarity`], [`vec_to_blob`], [`blob_to_vec`].
//!
//! Failure mapping: network errors and non-retryable HTTP statuses become
//! `ProviderUnavailable`; a 429 that survives every backoff attempt becomes
//! `RateLimited`.

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use crate::config::{self, EmbeddingConfig};
use crate::error::{Error, Result};

#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Model identifier recorded on each embedding record.
    fn model_name(&self) -> &str;
    /// Embedding vector dimensionality.
    fn dims(&self) -> usize;
    /// Embed a batch of texts, one vector per input, in input order.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

/// Instantiate the provider named in the configuration.
pub fn create_provider(config: &EmbeddingConfig) -> Result<std::sync::Arc<dyn EmbeddingProvider>> {
    match config.provider.as_str() {
        "openai" => Ok(std::sync::Arc::new(OpenAiEmbeddings::new(config)?)),
        "mock" => Ok(std::sync::Arc::new(MockEmbeddings::new(config.dims))),
        other => Err(Error::Input(format!(
            "Unknown embedding provider: {}",
            other
        ))),
    }
}

// ============ OpenAI provider ============

pub struct OpenAiEmbeddings {
    model: String,
    dims: usize,
    api_key: String,
    max_retries: u32,
    timeout_secs: u64,
}

impl OpenAiEmbeddings {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        Ok(Self {
            model: config.model.clone(),
            dims: config.dims,
            api_key: config::openai_api_key()?,
            max_retries: config.max_retries,
            timeout_secs: config.timeout_secs,
        })
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAiEmbeddings {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(self.timeout_secs))
            .build()
            .map_err(|e| Error::ProviderUnavailable(e.to_string()))?;

        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });

        let mut last_err: Option<Error> = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                tokio::time::sleep(delay).await;
            }

            let resp = client
                .post("https://api.openai.com/v1/embeddings")
                .header("Authorization", format!("Bearer {}", self.api_key))
                .header("Content-Type", "application/json")
                .json(&body)
                .send()
                .await;

            match resp {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        let json: serde_json::Value = response
                            .json()
                            .await
                            .map_err(|e| Error::ProviderUnavailable(e.to_string()))?;
                        return parse_openai_response(&json);
                    }

                    let retryable = status.as_u16() == 429 || status.is_server_error();
                    let body_text = response.text().await.unwrap_or_default();
                    let err = if status.as_u16() == 429 {
                        Error::RateLimited(format!("OpenAI embeddings: {}", body_text))
                    } else {
                        Error::ProviderUnavailable(format!(
                            "OpenAI embeddings error {}: {}",
                            status, body_text
                        ))
                    };
                    if retryable {
                        last_err = Some(err);
                        continue;
                    }
                    return Err(err);
                }
                Err(e) => {
                    last_err = Some(Error::ProviderUnavailable(e.to_string()));
                    continue;
                }
            }
        }

        Err(last_err
            .unwrap_or_else(|| Error::ProviderUnavailable("embedding failed after retries".into())))
    }
}

fn parse_openai_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>> {
    let data = json
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| {
            Error::ProviderUnavailable("invalid OpenAI response: missing data array".to_string())
        })?;

    let mut embeddings = Vec::with_capacity(data.len());
    for item in data {
        let embedding = item
            .get("embedding")
            .and_then(|e| e.as_array())
            .ok_or_else(|| {
                Error::ProviderUnavailable("invalid OpenAI response: missing embedding".to_string())
            })?;
        let vec: Vec<f32> = embedding
            .iter()
            .map(|v| v.as_f64().unwrap_or(0.0) as f32)
            .collect();
        embeddings.push(vec);
    }

    Ok(embeddings)
}

// ============ Mock provider ============

/// Deterministic offline provider: the vector is derived from a SHA-256 of
/// the text, so identical text always embeds identically. Tracks call
/// counts and can be switched into an "unavailable" state to exercise the
/// provider-failure paths.
pub struct MockEmbeddings {
    dims: usize,
    calls: AtomicUsize,
    unavailable: AtomicBool,
}

impl MockEmbeddings {
    pub fn new(dims: usize) -> Self {
        Self {
            dims,
            calls: AtomicUsize::new(0),
            unavailable: AtomicBool::new(false),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }
}

#[async_trait]
impl EmbeddingProvider for MockEmbeddings {
    fn model_name(&self) -> &str {
        "mock-embedding"
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(Error::ProviderUnavailable(
                "mock embedding provider is offline".to_string(),
            ));
        }
        self.calls.fetch_add(texts.len(), Ordering::SeqCst);
        Ok(texts.iter().map(|t| hash_vector(t, self.dims)).collect())
    }
}

fn hash_vector(text: &str, dims: usize) -> Vec<f32> {
    let mut out = Vec::with_capacity(dims);
    let mut counter: u64 = 0;
    while out.len() < dims {
        let mut hasher = Sha256::new();
        hasher.update(text.as_bytes());
        hasher.update(counter.to_le_bytes());
        let digest = hasher.finalize();
        for byte in digest {
            if out.len() == dims {
                break;
            }
            out.push((byte as f32 - 127.5) / 127.5);
        }
        counter += 1;
    }
    out
}

// ============ Vector utilities ============

/// Encode a float vector as little-endian f32 bytes for BLOB storage.
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode a BLOB produced by [`vec_to_blob`].
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Cosine similarity in [-1.0, 1.0]. Returns 0.0 for empty or
/// mismatched-length vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }

    dot / denom
}
