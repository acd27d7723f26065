//! # Lease Q&A
//!
//! A local-first question-answering core for lease-contract PDFs.
//!
//! Lease Q&A ingests a folder of lease PDFs, masks sensitive personal data,
//! chunks and embeds the text into a persistent SQLite cache, and answers
//! natural-language questions grounded strictly in the retrieved contract
//! text. Sensitive questions are refused before any model call; answers are
//! re-filtered on the way out.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌───────────────────┐   ┌───────────┐
//! │ Lease PDFs   │──▶│ Mask+Chunk+Embed  │──▶│  SQLite    │
//! │ (corpus dir) │   │   (ingestion)     │   │ embedding │
//! └──────────────┘   └───────────────────┘   │   cache   │
//!                                            └─────┬─────┘
//!                    ┌───────────────────┐         │
//!    question ──────▶│ Firewall+Retrieve │◀────────┘
//!                    │   +Synthesize     │──▶ grounded answer
//!                    └───────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! leaseqa init                        # create the embedding cache
//! leaseqa ingest                      # index the corpus folder
//! leaseqa ask "What is the monthly rent?"
//! leaseqa status                      # cache and usage counts
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`documents`] | Corpus scan and PDF text extraction |
//! | [`chunk`] | Overlapping text chunking |
//! | [`filter`] | PII detection, masking, and query refusal |
//! | [`cache`] | Fingerprint-keyed persistent embedding cache |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`retrieve`] | Cosine-similarity retrieval |
//! | [`llm`] | Language-model provider abstraction |
//! | [`synth`] | Grounded prompt construction and answer masking |
//! | [`pipeline`] | Ingestion and answering orchestration |
//! | [`usage`] | Token usage accounting |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod cache;
pub mod chunk;
pub mod config;
pub mod db;
pub mod documents;
pub mod embedding;
pub mod error;
pub mod filter;
pub mod llm;
pub mod migrate;
pub mod models;
pub mod pipeline;
pub mod retrieve;
pub mod synth;
pub mod usage;
