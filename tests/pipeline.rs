//! End-to-end pipeline tests with offline providers.
//!
//! Every test runs against a temporary corpus and database, with mock
//! embedding and language-model providers. No network access.

use async_trait::async_trait;
use std::sync::Arc;
use tempfile::TempDir;

use lease_qa::config::Config;
use lease_qa::embedding::{EmbeddingProvider, MockEmbeddings};
use lease_qa::error::Error;
use lease_qa::llm::MockLlm;
use lease_qa::pipeline::{self, Pipeline};
use lease_qa::synth;

/// Build a one-page PDF whose text stream carries `text`. Enough structure
/// for pdf-extract to recover the phrase.
fn minimal_pdf(text: &str) -> Vec<u8> {
    let stream = format!("BT /F1 12 Tf 100 700 Td ({}) Tj ET\n", text);
    let mut out = Vec::new();
    out.extend_from_slice(b"%PDF-1.4\n");
    let o1 = out.len();
    out.extend_from_slice(b"1 0 obj << /Type /Catalog /Pages 2 0 R >> endobj\n");
    let o2 = out.len();
    out.extend_from_slice(b"2 0 obj << /Type /Pages /Kids [3 0 R] /Count 1 >> endobj\n");
    let o3 = out.len();
    out.extend_from_slice(b"3 0 obj << /Type /Page /Parent 2 0 R /MediaBox [0 0 612 792] /Contents 4 0 R /Resources << /Font << /F1 5 0 R >> >> >> endobj\n");
    let o4 = out.len();
    out.extend_from_slice(
        format!("4 0 obj << /Length {} >> stream\n{}endstream endobj\n", stream.len(), stream)
            .as_bytes(),
    );
    let o5 = out.len();
    out.extend_from_slice(
        b"5 0 obj << /Type /Font /Subtype /Type1 /BaseFont /Helvetica >> endobj\n",
    );
    let xref_start = out.len();
    out.extend_from_slice(b"xref\n0 6\n");
    out.extend_from_slice(format!("{:010} 65535 f \n", 0).as_bytes());
    for offset in [o1, o2, o3, o4, o5] {
        out.extend_from_slice(format!("{:010} 00000 n \n", offset).as_bytes());
    }
    out.extend_from_slice(b"trailer << /Size 6 /Root 1 0 R >>\nstartxref\n");
    out.extend_from_slice(format!("{}\n", xref_start).as_bytes());
    out.extend_from_slice(b"%%EOF\n");
    out
}

fn test_config(tmp: &TempDir) -> Config {
    let corpus = tmp.path().join("leases");
    std::fs::create_dir_all(&corpus).unwrap();
    let toml_str = format!(
        r#"
[corpus]
root = "{}"

[db]
path = "{}"

[chunking]
chunk_size = 200
overlap = 20

[embedding]
provider = "mock"
dims = 16

[llm]
provider = "mock"
"#,
        corpus.display(),
        tmp.path().join("cache.sqlite").display()
    );
    toml::from_str(&toml_str).unwrap()
}

fn write_pdf(config: &Config, name: &str, text: &str) {
    std::fs::write(config.corpus.root.join(name), minimal_pdf(text)).unwrap();
}

async fn open_pipeline(
    config: &Config,
    embedder: Arc<MockEmbeddings>,
    llm: Arc<MockLlm>,
) -> Pipeline {
    pipeline::init(config).await.unwrap();
    Pipeline::open_with_providers(config.clone(), embedder, llm)
        .await
        .unwrap()
}

#[tokio::test]
async fn reingest_is_free_once_cached() {
    let tmp = tempfile::tempdir().unwrap();
    let config = test_config(&tmp);
    write_pdf(&config, "lease_a.pdf", "The monthly rent is 1,500 dollars payable in advance.");

    let embedder = Arc::new(MockEmbeddings::new(16));
    let pipeline = open_pipeline(&config, embedder.clone(), Arc::new(MockLlm::new())).await;

    let first = pipeline.ingest().await.unwrap();
    assert_eq!(first.documents_processed, 1);
    assert!(first.chunks_embedded > 0);
    assert!(first.errors.is_empty());
    let calls_after_first = embedder.calls();

    let second = pipeline.ingest().await.unwrap();
    assert_eq!(second.documents_processed, 1);
    assert_eq!(second.chunks_embedded, 0);
    assert_eq!(second.chunks_skipped_cached, first.chunks_embedded);
    assert_eq!(embedder.calls(), calls_after_first);
}

#[tokio::test]
async fn changed_document_is_reembedded() {
    let tmp = tempfile::tempdir().unwrap();
    let config = test_config(&tmp);
    write_pdf(&config, "lease_a.pdf", "Rent is 1,200 dollars.");

    let pipeline = open_pipeline(&config, Arc::new(MockEmbeddings::new(16)), Arc::new(MockLlm::new())).await;
    pipeline.ingest().await.unwrap();

    write_pdf(&config, "lease_a.pdf", "Rent is 1,800 dollars after renewal.");
    let report = pipeline.ingest().await.unwrap();
    assert!(report.chunks_embedded > 0);

    let texts: Vec<String> = sqlx::query_scalar("SELECT text FROM embeddings")
        .fetch_all(pipeline.pool())
        .await
        .unwrap();
    assert!(texts.iter().all(|t| !t.contains("1,200")));
    assert!(texts.iter().any(|t| t.contains("1,800")));
}

#[tokio::test]
async fn index_never_stores_raw_pii() {
    let tmp = tempfile::tempdir().unwrap();
    let config = test_config(&tmp);
    write_pdf(
        &config,
        "lease_a.pdf",
        "Tenant SSN 123-45-6789 agrees to pay rent monthly.",
    );

    let pipeline = open_pipeline(&config, Arc::new(MockEmbeddings::new(16)), Arc::new(MockLlm::new())).await;
    pipeline.ingest().await.unwrap();

    let texts: Vec<String> = sqlx::query_scalar("SELECT text FROM embeddings")
        .fetch_all(pipeline.pool())
        .await
        .unwrap();
    assert!(!texts.is_empty());
    assert!(texts.iter().all(|t| !t.contains("123-45-6789")));
    assert!(texts.iter().any(|t| t.contains("[SSN_MASKED_")));
}

#[tokio::test]
async fn sensitive_question_is_refused_at_zero_cost() {
    let tmp = tempfile::tempdir().unwrap();
    let config = test_config(&tmp);
    write_pdf(&config, "lease_a.pdf", "Rent is 1,500 dollars monthly.");

    let embedder = Arc::new(MockEmbeddings::new(16));
    let llm = Arc::new(MockLlm::new());
    let pipeline = open_pipeline(&config, embedder.clone(), llm.clone()).await;
    pipeline.ingest().await.unwrap();
    let calls_after_ingest = embedder.calls();

    let result = pipeline
        .answer("What is the tenant's social security number?")
        .await
        .unwrap();

    assert!(result.refused);
    assert!(result.text.contains("cannot provide sensitive information"));
    assert!(result.text.contains("social security numbers"));
    assert_eq!(result.usage.total(), 0);
    assert_eq!(llm.calls(), 0);
    assert_eq!(embedder.calls(), calls_after_ingest);

    // The refusal still shows up in the usage log, at zero tokens.
    let status = pipeline.status().await.unwrap();
    assert_eq!(status.questions, 1);
    assert_eq!(status.usage.total(), 0);
}

#[tokio::test]
async fn grounded_answer_draws_on_retrieved_context() {
    let tmp = tempfile::tempdir().unwrap();
    let config = test_config(&tmp);
    write_pdf(
        &config,
        "lease_a.pdf",
        "The monthly rent is 1,500 dollars due on the first of each month.",
    );

    let llm = Arc::new(MockLlm::new()); // echoes the grounded prompt
    let pipeline = open_pipeline(&config, Arc::new(MockEmbeddings::new(16)), llm.clone()).await;
    pipeline.ingest().await.unwrap();

    let result = pipeline.answer("What is the monthly rent?").await.unwrap();
    assert!(!result.refused);
    assert!(result.text.contains("1,500"), "answer: {}", result.text);
    assert!(result.usage.total() > 0);
    assert_eq!(llm.calls(), 1);

    let total = pipeline.usage_total().await.unwrap();
    assert_eq!(total, result.usage);
}

#[tokio::test]
async fn empty_index_yields_fixed_fallback_without_model_call() {
    let tmp = tempfile::tempdir().unwrap();
    let config = test_config(&tmp);

    let llm = Arc::new(MockLlm::new());
    let pipeline = open_pipeline(&config, Arc::new(MockEmbeddings::new(16)), llm.clone()).await;

    let result = pipeline.answer("What is the monthly rent?").await.unwrap();
    assert_eq!(result.text, synth::NOT_SPECIFIED);
    assert!(!result.refused);
    assert_eq!(result.usage.total(), 0);
    assert_eq!(llm.calls(), 0);
}

#[tokio::test]
async fn blank_question_is_an_input_error() {
    let tmp = tempfile::tempdir().unwrap();
    let config = test_config(&tmp);
    let pipeline = open_pipeline(&config, Arc::new(MockEmbeddings::new(16)), Arc::new(MockLlm::new())).await;

    let err = pipeline.answer("   ").await.unwrap_err();
    assert!(matches!(err, Error::Input(_)));
}

#[tokio::test]
async fn listing_question_names_documents_without_model_call() {
    let tmp = tempfile::tempdir().unwrap();
    let config = test_config(&tmp);
    write_pdf(&config, "lease_a.pdf", "Rent is 1,500 dollars.");
    write_pdf(&config, "lease_b.pdf", "Parking is included.");

    let llm = Arc::new(MockLlm::new());
    let pipeline = open_pipeline(&config, Arc::new(MockEmbeddings::new(16)), llm.clone()).await;
    pipeline.ingest().await.unwrap();

    let result = pipeline.answer("Which documents do you have?").await.unwrap();
    assert!(result.text.contains("lease_a.pdf"));
    assert!(result.text.contains("lease_b.pdf"));
    assert!(result.text.contains("indexed"));
    assert!(!result.refused);
    assert_eq!(result.usage.total(), 0);
    assert_eq!(llm.calls(), 0);
}

#[tokio::test]
async fn comparison_question_summarizes_each_document_then_compares() {
    let tmp = tempfile::tempdir().unwrap();
    let config = test_config(&tmp);
    write_pdf(&config, "lease_a.pdf", "The monthly rent is 1,500 dollars.");
    write_pdf(&config, "lease_b.pdf", "The monthly rent is 900 dollars.");

    let llm = Arc::new(MockLlm::new()); // echoes, so document names flow through
    let pipeline = open_pipeline(&config, Arc::new(MockEmbeddings::new(16)), llm.clone()).await;
    pipeline.ingest().await.unwrap();

    let result = pipeline.answer("Compare the monthly rent.").await.unwrap();
    assert!(!result.refused);
    // One summary call per document plus the final comparison call.
    assert_eq!(llm.calls(), 3);
    assert!(result.text.contains("lease_a.pdf"), "answer: {}", result.text);
    assert!(result.text.contains("lease_b.pdf"), "answer: {}", result.text);
    assert!(result.usage.total() > 0);

    // The accumulated usage of all three calls is logged as one question.
    let status = pipeline.status().await.unwrap();
    assert_eq!(status.questions, 1);
    assert_eq!(status.usage, result.usage);
}

#[tokio::test]
async fn comparison_with_empty_corpus_reports_nothing_to_compare() {
    let tmp = tempfile::tempdir().unwrap();
    let config = test_config(&tmp);

    let embedder = Arc::new(MockEmbeddings::new(16));
    let llm = Arc::new(MockLlm::new());
    let pipeline = open_pipeline(&config, embedder.clone(), llm.clone()).await;

    let result = pipeline
        .answer("What are the differences in notice periods?")
        .await
        .unwrap();
    assert_eq!(result.text, "I couldn't find any documents to compare.");
    assert!(!result.refused);
    assert_eq!(result.usage.total(), 0);
    assert_eq!(llm.calls(), 0);
    assert_eq!(embedder.calls(), 0);
}

#[tokio::test]
async fn provider_outage_fails_only_uncached_documents() {
    let tmp = tempfile::tempdir().unwrap();
    let config = test_config(&tmp);
    write_pdf(&config, "lease_a.pdf", "Rent is 1,500 dollars.");

    let embedder = Arc::new(MockEmbeddings::new(16));
    let pipeline = open_pipeline(&config, embedder.clone(), Arc::new(MockLlm::new())).await;
    pipeline.ingest().await.unwrap();

    // Two new documents arrive while the provider is down. The cached
    // document still reports fine; each new one fails with its own error,
    // nothing partial persists, and both retry cleanly once the provider
    // recovers.
    write_pdf(&config, "lease_b.pdf", "Security deposit is one month of rent.");
    write_pdf(&config, "lease_c.pdf", "Parking space 12 is assigned to the tenant.");
    embedder.set_unavailable(true);

    let report = pipeline.ingest().await.unwrap();
    assert_eq!(report.documents_processed, 1);
    assert_eq!(report.errors.len(), 2);
    let failed: Vec<&str> = report.errors.iter().map(|e| e.document.as_str()).collect();
    assert_eq!(failed, vec!["lease_b.pdf", "lease_c.pdf"]);

    let documents: Vec<String> = sqlx::query_scalar("SELECT identity FROM documents")
        .fetch_all(pipeline.pool())
        .await
        .unwrap();
    assert_eq!(documents, vec!["lease_a.pdf".to_string()]);

    embedder.set_unavailable(false);
    let retry = pipeline.ingest().await.unwrap();
    assert_eq!(retry.documents_processed, 3);
    assert!(retry.errors.is_empty());
    assert!(retry.chunks_embedded > 0);
}

/// Embedding provider that holds each call long enough for a second ingest
/// to observe the guard.
struct SlowEmbeddings {
    inner: MockEmbeddings,
}

#[async_trait]
impl EmbeddingProvider for SlowEmbeddings {
    fn model_name(&self) -> &str {
        self.inner.model_name()
    }

    fn dims(&self) -> usize {
        self.inner.dims()
    }

    async fn embed(&self, texts: &[String]) -> lease_qa::error::Result<Vec<Vec<f32>>> {
        tokio::time::sleep(std::time::Duration::from_millis(150)).await;
        self.inner.embed(texts).await
    }
}

#[tokio::test]
async fn concurrent_ingest_is_rejected_not_queued() {
    let tmp = tempfile::tempdir().unwrap();
    let config = test_config(&tmp);
    write_pdf(&config, "lease_a.pdf", "Rent is 1,500 dollars.");

    let embedder = Arc::new(SlowEmbeddings {
        inner: MockEmbeddings::new(16),
    });
    pipeline::init(&config).await.unwrap();
    let pipeline = Arc::new(
        Pipeline::open_with_providers(config, embedder, Arc::new(MockLlm::new()))
            .await
            .unwrap(),
    );

    let (a, b) = tokio::join!(pipeline.ingest(), pipeline.ingest());
    let outcomes = [a, b];
    let ok = outcomes.iter().filter(|r| r.is_ok()).count();
    let rejected = outcomes
        .iter()
        .filter(|r| matches!(r, Err(Error::AlreadyInProgress)))
        .count();
    assert_eq!(ok, 1);
    assert_eq!(rejected, 1);
}

#[tokio::test]
async fn leaked_pii_in_model_output_is_masked() {
    let tmp = tempfile::tempdir().unwrap();
    let config = test_config(&tmp);
    write_pdf(&config, "lease_a.pdf", "Rent is 1,500 dollars.");

    let llm = Arc::new(MockLlm::with_reply(
        "Call the landlord at 555-123-4567 about the rent.",
    ));
    let pipeline = open_pipeline(&config, Arc::new(MockEmbeddings::new(16)), llm).await;
    pipeline.ingest().await.unwrap();

    let result = pipeline.answer("How do I reach the landlord?").await.unwrap();
    assert!(!result.text.contains("555-123-4567"));
    assert!(result.text.contains("[PHONE_MASKED_"));
}

#[tokio::test]
async fn missing_corpus_folder_is_an_input_error() {
    let tmp = tempfile::tempdir().unwrap();
    let config = test_config(&tmp);
    std::fs::remove_dir(&config.corpus.root).unwrap();

    let pipeline_err = {
        let p = open_pipeline(&config, Arc::new(MockEmbeddings::new(16)), Arc::new(MockLlm::new())).await;
        p.ingest().await.unwrap_err()
    };
    assert!(matches!(pipeline_err, Error::Input(_)));
}
