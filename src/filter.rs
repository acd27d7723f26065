//! Sensitive-data filter: detection and masking of PII.
//!
//! The taxonomy is a fixed, enumerated set of categories, each backed by
//! explicit regex matchers held in a registered-matcher list. The filter
//! runs twice in the pipeline: over chunk text before embedding (so the
//! vector index never stores raw PII) and over the synthesized answer
//! before it leaves the system.
//!
//! Masking is best-effort and biased toward safety: false positives
//! (over-masking) are acceptable, false negatives are tolerated. Masking is
//! idempotent — mask tokens are recognized and never re-matched, so
//! scanning already-masked text returns it unchanged with zero spans.

use regex::Regex;
use sha2::{Digest, Sha256};

/// Fixed PII taxonomy. Extending the filter means adding a category here
/// and registering its matchers in [`SensitiveDataFilter::new`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PiiCategory {
    Ssn,
    CreditCard,
    BankAccount,
    Phone,
    Email,
    StreetAddress,
}

impl PiiCategory {
    /// Uppercase label used inside mask tokens.
    pub fn label(&self) -> &'static str {
        match self {
            PiiCategory::Ssn => "SSN",
            PiiCategory::CreditCard => "CREDIT_CARD",
            PiiCategory::BankAccount => "BANK_ACCOUNT",
            PiiCategory::Phone => "PHONE",
            PiiCategory::Email => "EMAIL",
            PiiCategory::StreetAddress => "STREET_ADDRESS",
        }
    }

    /// Human-readable form used in refusal messages.
    pub fn description(&self) -> &'static str {
        match self {
            PiiCategory::Ssn => "social security numbers",
            PiiCategory::CreditCard => "credit card numbers",
            PiiCategory::BankAccount => "bank account details",
            PiiCategory::Phone => "phone numbers",
            PiiCategory::Email => "email addresses",
            PiiCategory::StreetAddress => "street addresses",
        }
    }
}

/// Record of one masked occurrence, in offsets of the text that was
/// scanned. Kept for audit; never used to reconstruct the original value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedactionSpan {
    pub category: PiiCategory,
    pub start: usize,
    pub end: usize,
    pub original_len: usize,
}

struct Matcher {
    category: PiiCategory,
    pattern: Regex,
}

/// Stateless PII detector/masker plus the sensitive-query keyword list.
pub struct SensitiveDataFilter {
    matchers: Vec<Matcher>,
    mask_token: Regex,
    keywords: Vec<(&'static str, Option<PiiCategory>)>,
}

impl Default for SensitiveDataFilter {
    fn default() -> Self {
        Self::new()
    }
}

impl SensitiveDataFilter {
    pub fn new() -> Self {
        let patterns: Vec<(PiiCategory, &str)> = vec![
            (PiiCategory::Ssn, r"\b\d{3}-\d{2}-\d{4}\b"),
            (PiiCategory::Ssn, r"\b\d{3} \d{2} \d{4}\b"),
            (PiiCategory::Ssn, r"\b\d{9}\b"),
            (
                PiiCategory::CreditCard,
                r"\b\d{4}[- ]?\d{4}[- ]?\d{4}[- ]?\d{4}\b",
            ),
            (PiiCategory::CreditCard, r"\b\d{13,19}\b"),
            (PiiCategory::BankAccount, r"(?i)routing\D{0,20}\d{9}"),
            (PiiCategory::BankAccount, r"\b\d{8,12}\b"),
            (PiiCategory::Phone, r"\b\d{3}[-.]\d{3}[-.]\d{4}\b"),
            (PiiCategory::Phone, r"\(\d{3}\)\s?\d{3}[-.]?\d{4}"),
            (
                PiiCategory::Email,
                r"\b[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}\b",
            ),
            (
                PiiCategory::StreetAddress,
                r"\b\d+\s+[A-Za-z][A-Za-z ]*(?:Street|St|Avenue|Ave|Road|Rd|Drive|Dr|Lane|Ln|Boulevard|Blvd)\b",
            ),
        ];

        let matchers = patterns
            .into_iter()
            .map(|(category, p)| Matcher {
                category,
                pattern: Regex::new(p).expect("hard-coded PII pattern compiles"),
            })
            .collect();

        let mask_token = Regex::new(
            r"\[(?:SSN|CREDIT_CARD|BANK_ACCOUNT|PHONE|EMAIL|STREET_ADDRESS)_MASKED_[0-9a-f]{8}\]",
        )
        .expect("hard-coded mask-token pattern compiles");

        // Keyword order matters: more specific phrases first so the refusal
        // message names the right category.
        let keywords: Vec<(&'static str, Option<PiiCategory>)> = vec![
            ("social security", Some(PiiCategory::Ssn)),
            ("ssn", Some(PiiCategory::Ssn)),
            ("credit card", Some(PiiCategory::CreditCard)),
            ("card number", Some(PiiCategory::CreditCard)),
            ("bank account", Some(PiiCategory::BankAccount)),
            ("account number", Some(PiiCategory::BankAccount)),
            ("routing number", Some(PiiCategory::BankAccount)),
            ("phone number", Some(PiiCategory::Phone)),
            ("email address", Some(PiiCategory::Email)),
            ("address", Some(PiiCategory::StreetAddress)),
            ("personal information", None),
            ("private information", None),
            ("confidential", None),
            ("sensitive", None),
        ];

        Self {
            matchers,
            mask_token,
            keywords,
        }
    }

    /// Detect and mask PII. Returns the masked text and the redaction
    /// spans in offsets of the input text, ordered by start.
    ///
    /// Overlapping matches resolve to the earliest-starting, longest one;
    /// at equal span, matcher registration order wins.
    pub fn scan(&self, text: &str) -> (String, Vec<RedactionSpan>) {
        // Regions already masked by a previous pass are off-limits.
        let masked_regions: Vec<(usize, usize)> = self
            .mask_token
            .find_iter(text)
            .map(|m| (m.start(), m.end()))
            .collect();

        let mut candidates: Vec<(usize, usize, PiiCategory, usize)> = Vec::new();
        for (order, matcher) in self.matchers.iter().enumerate() {
            for m in matcher.pattern.find_iter(text) {
                let overlaps_mask = masked_regions
                    .iter()
                    .any(|&(s, e)| m.start() < e && s < m.end());
                if !overlaps_mask {
                    candidates.push((m.start(), m.end(), matcher.category, order));
                }
            }
        }

        candidates.sort_by(|a, b| {
            a.0.cmp(&b.0)
                .then(b.1.cmp(&a.1)) // longer match first at equal start
                .then(a.3.cmp(&b.3))
        });

        let mut spans: Vec<RedactionSpan> = Vec::new();
        let mut masked = String::with_capacity(text.len());
        let mut cursor = 0usize;

        for (start, end, category, _) in candidates {
            if start < cursor {
                continue; // overlaps an already-selected span
            }
            masked.push_str(&text[cursor..start]);
            masked.push_str(&mask_for(category, &text[start..end]));
            spans.push(RedactionSpan {
                category,
                start,
                end,
                original_len: end - start,
            });
            cursor = end;
        }
        masked.push_str(&text[cursor..]);

        (masked, spans)
    }

    /// Whether a question explicitly solicits PII. Deterministic
    /// case-insensitive keyword check; used to refuse before any retrieval.
    pub fn is_sensitive_query(&self, question: &str) -> bool {
        let q = question.to_lowercase();
        self.keywords.iter().any(|(kw, _)| q.contains(kw))
    }

    /// Fixed refusal text naming the solicited categories. Distinct from
    /// the generic "unable to answer" failure message so callers can tell
    /// "blocked for safety" from "system error".
    pub fn refusal_message(&self, question: &str) -> String {
        let q = question.to_lowercase();
        let mut types: Vec<&'static str> = Vec::new();
        for (kw, category) in &self.keywords {
            if q.contains(kw) {
                if let Some(c) = category {
                    if !types.contains(&c.description()) {
                        types.push(c.description());
                    }
                }
            }
        }
        for span in self.scan(question).1 {
            if !types.contains(&span.category.description()) {
                types.push(span.category.description());
            }
        }
        if types.is_empty() {
            types.push("personal information");
        }

        format!(
            "I cannot provide sensitive information such as {}.\n\n\
             This information is protected for privacy and security reasons. \
             If you need specific details from the lease documents, please ask \
             about non-sensitive information such as:\n\n\
             - Lease terms and dates\n\
             - Rent amounts and payment schedules\n\
             - Property details and amenities\n\
             - Tenant and landlord responsibilities\n\
             - Maintenance procedures\n\
             - Lease renewal terms\n\n\
             For sensitive information, please contact the appropriate parties directly.",
            types.join(", ")
        )
    }
}

fn mask_for(category: PiiCategory, original: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(original.as_bytes());
    let digest = format!("{:x}", hasher.finalize());
    format!("[{}_MASKED_{}]", category.label(), &digest[..8])
}
