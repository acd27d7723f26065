use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub corpus: CorpusConfig,
    pub db: DbConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    pub embedding: EmbeddingConfig,
    pub llm: LlmConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct CorpusConfig {
    /// Folder containing the lease-contract PDFs.
    pub root: PathBuf,
    #[serde(default = "default_include_globs")]
    pub include_globs: Vec<String>,
    #[serde(default = "default_recursive")]
    pub recursive: bool,
}

fn default_include_globs() -> Vec<String> {
    vec!["**/*.pdf".to_string()]
}

fn default_recursive() -> bool {
    true
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    /// Path to the SQLite embedding cache.
    pub path: PathBuf,
}

/// Chunking parameters. Both values participate in the cache fingerprint,
/// so changing either re-embeds the corpus.
#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_overlap")]
    pub overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            overlap: default_overlap(),
        }
    }
}

fn default_chunk_size() -> usize {
    1500
}
fn default_overlap() -> usize {
    100
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
        }
    }
}

fn default_top_k() -> usize {
    4
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    /// `"openai"` or `"mock"`.
    pub provider: String,
    #[serde(default = "default_embedding_model")]
    pub model: String,
    #[serde(default = "default_dims")]
    pub dims: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_embedding_model() -> String {
    "text-embedding-3-small".to_string()
}
fn default_dims() -> usize {
    1536
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    /// `"openai"` or `"mock"`.
    pub provider: String,
    #[serde(default = "default_llm_model")]
    pub model: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default)]
    pub temperature: f64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_llm_model() -> String {
    "gpt-4o-mini".to_string()
}
fn default_max_tokens() -> u32 {
    300
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        Error::Input(format!("Failed to read config file {}: {}", path.display(), e))
    })?;

    let config: Config = toml::from_str(&content)
        .map_err(|e| Error::Input(format!("Failed to parse config file: {}", e)))?;

    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    if config.chunking.chunk_size == 0 {
        return Err(Error::Input("chunking.chunk_size must be > 0".to_string()));
    }
    if config.chunking.overlap >= config.chunking.chunk_size {
        return Err(Error::Input(
            "chunking.overlap must be < chunking.chunk_size".to_string(),
        ));
    }
    if config.retrieval.top_k == 0 {
        return Err(Error::Input("retrieval.top_k must be >= 1".to_string()));
    }
    if config.embedding.dims == 0 {
        return Err(Error::Input("embedding.dims must be > 0".to_string()));
    }
    for (section, provider) in [
        ("embedding", config.embedding.provider.as_str()),
        ("llm", config.llm.provider.as_str()),
    ] {
        match provider {
            "openai" | "mock" => {}
            other => {
                return Err(Error::Input(format!(
                    "Unknown {} provider: '{}'. Must be openai or mock.",
                    section, other
                )))
            }
        }
    }
    Ok(())
}

/// Resolve the OpenAI API key: the `OPENAI_API_KEY` environment variable,
/// falling back to an `openai.txt` file in the working directory.
pub fn openai_api_key() -> Result<String> {
    if let Ok(key) = std::env::var("OPENAI_API_KEY") {
        if !key.trim().is_empty() {
            return Ok(key.trim().to_string());
        }
    }
    if let Ok(contents) = std::fs::read_to_string("openai.txt") {
        let key = contents.trim();
        if !key.is_empty() {
            return Ok(key.to_string());
        }
    }
    Err(Error::ProviderUnavailable(
        "OPENAI_API_KEY not set and openai.txt not found".to_string(),
    ))
}
