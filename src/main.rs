//! # Lease Q&A CLI (`leaseqa`)
//!
//! The `leaseqa` binary drives the lease-contract question-answering core:
//! cache initialization, corpus ingestion, grounded question answering, and
//! token usage reporting.
//!
//! ## Usage
//!
//! ```bash
//! leaseqa --config ./config/leaseqa.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `leaseqa init` | Create the SQLite embedding cache and run migrations |
//! | `leaseqa ingest` | Scan the corpus folder, mask, chunk, and embed new content |
//! | `leaseqa ask "<question>"` | Answer a question grounded in the indexed leases |
//! | `leaseqa status` | Show indexed documents, cached chunks, and usage totals |
//! | `leaseqa usage show` | Show accumulated token usage |
//! | `leaseqa usage reset` | Clear the token usage log |

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use lease_qa::config;
use lease_qa::pipeline::{self, Pipeline};
use lease_qa::{db, usage};

/// Lease Q&A — a local-first, privacy-filtered question-answering core
/// for lease-contract PDFs.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/leaseqa.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "leaseqa",
    about = "Lease Q&A — grounded question answering over lease-contract PDFs",
    version,
    long_about = "Lease Q&A ingests a folder of lease-contract PDFs, masks sensitive personal \
    data, embeds the text into a persistent SQLite cache, and answers natural-language \
    questions strictly from the retrieved contract text."
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/leaseqa.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Initialize the embedding cache.
    ///
    /// Creates the SQLite database file and all required tables (documents,
    /// embeddings, usage_log). Idempotent — running it again is safe.
    Init,

    /// Ingest the corpus folder.
    ///
    /// Scans for PDFs, masks sensitive data, chunks the text, and embeds
    /// anything not already cached. Unchanged documents cost no provider
    /// calls; changed documents are re-embedded from scratch.
    Ingest,

    /// Ask a question about the indexed leases.
    ///
    /// Sensitive questions are refused without any model call. Everything
    /// else is answered strictly from the retrieved contract text, with the
    /// answer re-filtered before it is printed.
    Ask {
        /// The question to answer.
        question: String,
    },

    /// Show cache and usage counts.
    Status,

    /// Token usage accounting.
    Usage {
        #[command(subcommand)]
        action: UsageAction,
    },
}

/// Usage log subcommands.
#[derive(Subcommand)]
enum UsageAction {
    /// Show accumulated token totals.
    Show,
    /// Clear the usage log.
    Reset,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            pipeline::init(&cfg).await?;
            println!("Embedding cache initialized successfully.");
        }
        Commands::Ingest => {
            let pipeline = Pipeline::open(cfg).await?;
            let report = pipeline.ingest().await?;
            println!(
                "Ingested {} document(s): {} chunk(s) embedded, {} served from cache.",
                report.documents_processed, report.chunks_embedded, report.chunks_skipped_cached
            );
            for err in &report.errors {
                eprintln!("  failed {}: {}", err.document, err.message);
            }
            if !report.errors.is_empty() {
                eprintln!(
                    "{} document(s) failed; they will be retried on the next ingest.",
                    report.errors.len()
                );
            }
        }
        Commands::Ask { question } => {
            let pipeline = Pipeline::open(cfg).await?;
            let result = pipeline.answer(&question).await?;
            println!("{}", result.text);
            println!(
                "\n[tokens: {} prompt + {} completion = {}]",
                result.usage.prompt_tokens,
                result.usage.completion_tokens,
                result.usage.total()
            );
        }
        Commands::Status => {
            let pool = db::open_verified(&cfg.db).await?;
            let status = pipeline::status(&pool).await?;
            println!("Documents indexed:  {}", status.documents);
            println!("Chunks cached:      {}", status.chunks);
            println!("Questions answered: {}", status.questions);
            println!(
                "Tokens used:        {} prompt + {} completion = {}",
                status.usage.prompt_tokens,
                status.usage.completion_tokens,
                status.usage.total()
            );
        }
        Commands::Usage { action } => {
            let pool = db::open_verified(&cfg.db).await?;
            match action {
                UsageAction::Show => {
                    let total = usage::total(&pool).await?;
                    println!(
                        "Tokens used: {} prompt + {} completion = {}",
                        total.prompt_tokens,
                        total.completion_tokens,
                        total.total()
                    );
                }
                UsageAction::Reset => {
                    usage::reset(&pool).await?;
                    println!("Usage log cleared.");
                }
            }
        }
    }

    Ok(())
}
