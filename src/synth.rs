//! Answer synthesis: grounded prompt construction and output-side masking.
//!
//! The system instructions pin the model to the supplied context and to a
//! short answer format. When retrieval finds nothing, the fixed fallback
//! sentence is returned directly and the model is never invoked.
//!
//! Also builds the prompts for the multi-document comparison flow: one
//! summary prompt per document, then a final comparison prompt over the
//! collected summaries. Each builder still costs exactly one model call
//! per invocation; the pipeline owns the loop.

use crate::error::Result;
use crate::filter::SensitiveDataFilter;
use crate::llm::{LlmProvider, Prompt};
use crate::models::{ScoredChunk, TokenUsage};

/// The exact reply required when the context does not state the answer.
/// Also returned verbatim when retrieval yields no chunks at all.
pub const NOT_SPECIFIED: &str = "Not specified in the provided documents.";

/// Per-document summary placeholder when retrieval finds nothing in a
/// document during a comparison; no model call is made for it.
pub const NO_DETAILS: &str = "No explicit details found.";

const SYSTEM_INSTRUCTIONS: &str = "You are a concise assistant for lease documents. \
Answer ONLY the subject(s) explicitly asked by the user and strictly use the provided CONTEXT. \
If the question is about a specific topic (e.g., parking), DO NOT include other topics \
(e.g., responsibilities, remedies, notice periods). \
If the answer is not clearly stated in the context, reply exactly: Not specified in the provided documents. \
Do not add extra commentary or unrelated details. \
Unless the user explicitly asks to compare across documents, do not synthesize multi-document comparisons. \
Respond with either a short paragraph (<= 3 sentences) or up to 3 concise bullet points.";

const SUMMARY_INSTRUCTIONS: &str = "You are analyzing a single lease document. \
Based ONLY on the CONTEXT, summarize the parts relevant to the user's request as short bullets. \
If the information is not clearly present, say 'No explicit details found.'";

const COMPARISON_INSTRUCTIONS: &str = "Compare the tenant-related terms across these documents. \
Answer ONLY the subject(s) explicitly asked by the user and strictly use the provided CONTEXT. \
If the question is about a specific topic (e.g., parking), DO NOT include other topics \
(e.g., responsibilities, remedies, notice periods). \
If the answer is not clearly stated in the context, reply exactly: Not specified in the provided documents. \
Do not add extra commentary or unrelated details. \
Be specific and attribute differences to document names.";

/// Assemble the grounded prompt: retrieved chunks labelled by source
/// document, in retrieval rank order.
pub fn build_prompt(question: &str, chunks: &[ScoredChunk]) -> Prompt {
    let context = chunks
        .iter()
        .map(|c| format!("[{}] {}", c.document, c.text))
        .collect::<Vec<_>>()
        .join("\n\n");

    Prompt {
        system: SYSTEM_INSTRUCTIONS.to_string(),
        user: format!("Question: {}\n\nCONTEXT:\n{}\n\nAnswer:", question, context),
    }
}

/// Per-document summary prompt used inside a multi-document comparison.
pub fn build_summary_prompt(question: &str, document: &str, chunks: &[ScoredChunk]) -> Prompt {
    let context = chunks
        .iter()
        .map(|c| c.text.as_str())
        .collect::<Vec<_>>()
        .join("\n\n");

    Prompt {
        system: SUMMARY_INSTRUCTIONS.to_string(),
        user: format!(
            "DOCUMENT: {}\nUSER REQUEST: {}\nCONTEXT:\n{}\n\nOutput as short bullet points.",
            document, question, context
        ),
    }
}

/// Final comparison prompt over per-document summaries, in manifest order.
pub fn build_comparison_prompt(question: &str, summaries: &[(String, String)]) -> Prompt {
    let body = summaries
        .iter()
        .map(|(document, summary)| format!("{}:\n{}", document, summary))
        .collect::<Vec<_>>()
        .join("\n\n");

    Prompt {
        system: COMPARISON_INSTRUCTIONS.to_string(),
        user: format!(
            "USER REQUEST: {}\n\nINPUT SUMMARIES:\n{}\n\n\
             Return a clear, structured list of differences, grouped by topic.",
            question, body
        ),
    }
}

/// One model call, then output-side masking. The returned text has passed
/// the same redaction as ingested documents, so even a model that leaks a
/// raw value from its prompt cannot surface it.
pub async fn complete_masked(
    llm: &dyn LlmProvider,
    filter: &SensitiveDataFilter,
    prompt: &Prompt,
) -> Result<(String, TokenUsage)> {
    let completion = llm.complete(prompt).await?;
    let (masked, _spans) = filter.scan(&completion.text);
    Ok((
        masked,
        TokenUsage {
            prompt_tokens: completion.prompt_tokens,
            completion_tokens: completion.completion_tokens,
        },
    ))
}

/// Grounded single-question synthesis: build the prompt, call the model
/// once, mask the output.
pub async fn synthesize(
    llm: &dyn LlmProvider,
    filter: &SensitiveDataFilter,
    question: &str,
    chunks: &[ScoredChunk],
) -> Result<(String, TokenUsage)> {
    let prompt = build_prompt(question, chunks);
    complete_masked(llm, filter, &prompt).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::MockLlm;

    fn chunk(document: &str, text: &str) -> ScoredChunk {
        ScoredChunk {
            document: document.to_string(),
            chunk_index: 0,
            start: 0,
            text: text.to_string(),
            score: 0.9,
        }
    }

    #[test]
    fn prompt_carries_question_and_labelled_context() {
        let chunks = vec![
            chunk("lease_a.pdf", "Monthly rent is $1,500."),
            chunk("lease_b.pdf", "Rent is due on the first."),
        ];
        let prompt = build_prompt("What is the rent?", &chunks);
        assert!(prompt.user.contains("Question: What is the rent?"));
        assert!(prompt.user.contains("[lease_a.pdf] Monthly rent is $1,500."));
        assert!(prompt.user.contains("[lease_b.pdf] Rent is due on the first."));
        assert!(prompt.system.contains("Not specified in the provided documents."));
    }

    #[test]
    fn summary_prompt_names_the_document() {
        let chunks = vec![chunk("lease_a.pdf", "Monthly rent is $1,500.")];
        let prompt = build_summary_prompt("Compare the rent.", "lease_a.pdf", &chunks);
        assert!(prompt.user.contains("DOCUMENT: lease_a.pdf"));
        assert!(prompt.user.contains("Monthly rent is $1,500."));
        assert!(prompt.system.contains("single lease document"));
    }

    #[test]
    fn comparison_prompt_groups_summaries_by_document() {
        let summaries = vec![
            ("lease_a.pdf".to_string(), "- rent: $1,500".to_string()),
            ("lease_b.pdf".to_string(), "- rent: $900".to_string()),
        ];
        let prompt = build_comparison_prompt("Compare the rent.", &summaries);
        assert!(prompt.user.contains("lease_a.pdf:\n- rent: $1,500"));
        assert!(prompt.user.contains("lease_b.pdf:\n- rent: $900"));
        assert!(prompt.system.contains("attribute differences to document names"));
    }

    #[tokio::test]
    async fn synthesized_answer_is_masked_on_the_way_out() {
        let llm = MockLlm::with_reply("The tenant's SSN is 123-45-6789.");
        let filter = SensitiveDataFilter::new();
        let (answer, usage) = synthesize(&llm, &filter, "ignore", &[]).await.unwrap();
        assert!(!answer.contains("123-45-6789"));
        assert!(answer.contains("_MASKED_"));
        assert!(usage.completion_tokens > 0);
    }

    #[tokio::test]
    async fn clean_answer_passes_through_unchanged() {
        let llm = MockLlm::with_reply("The rent is $1,500 per month.");
        let filter = SensitiveDataFilter::new();
        let (answer, _) = synthesize(&llm, &filter, "rent?", &[]).await.unwrap();
        assert_eq!(answer, "The rent is $1,500 per month.");
    }
}
