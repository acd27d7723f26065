//! Language-model provider abstraction and implementations.
//!
//! [`OpenAiChat`] calls the chat completions API with the same bounded
//! backoff policy as the embedding provider. [`MockLlm`] is the offline
//! counterpart: it never touches the network, counts its calls (so tests
//! can assert the refusal path costs zero), and by default echoes the user
//! prompt so answers stay grounded in the supplied context.

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use crate::config::{self, LlmConfig};
use crate::error::{Error, Result};
use crate::models::Completion;

/// A grounded prompt: fixed system instructions plus the per-question user
/// message carrying the retrieved context.
#[derive(Debug, Clone)]
pub struct Prompt {
    pub system: String,
    pub user: String,
}

#[async_trait]
pub trait LlmProvider: Send + Sync {
    fn model_name(&self) -> &str;
    /// Invoke the model exactly once (transient retries happen inside).
    async fn complete(&self, prompt: &Prompt) -> Result<Completion>;
}

/// Instantiate the provider named in the configuration.
pub fn create_provider(config: &LlmConfig) -> Result<std::sync::Arc<dyn LlmProvider>> {
    match config.provider.as_str() {
        "openai" => Ok(std::sync::Arc::new(OpenAiChat::new(config)?)),
        "mock" => Ok(std::sync::Arc::new(MockLlm::new())),
        other => Err(Error::Input(format!("Unknown llm provider: {}", other))),
    }
}

// ============ OpenAI provider ============

pub struct OpenAiChat {
    model: String,
    api_key: String,
    max_tokens: u32,
    temperature: f64,
    max_retries: u32,
    timeout_secs: u64,
}

impl OpenAiChat {
    pub fn new(config: &LlmConfig) -> Result<Self> {
        Ok(Self {
            model: config.model.clone(),
            api_key: config::openai_api_key()?,
            max_tokens: config.max_tokens,
            temperature: config.temperature,
            max_retries: config.max_retries,
            timeout_secs: config.timeout_secs,
        })
    }
}

#[async_trait]
impl LlmProvider for OpenAiChat {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, prompt: &Prompt) -> Result<Completion> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(self.timeout_secs))
            .build()
            .map_err(|e| Error::ProviderUnavailable(e.to_string()))?;

        let body = serde_json::json!({
            "model": self.model,
            "max_tokens": self.max_tokens,
            "temperature": self.temperature,
            "messages": [
                { "role": "system", "content": prompt.system },
                { "role": "user", "content": prompt.user },
            ],
        });

        let mut last_err: Option<Error> = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                tokio::time::sleep(delay).await;
            }

            let resp = client
                .post("https://api.openai.com/v1/chat/completions")
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
                        return parse_chat_response(&json);
                    }

                    let retryable = status.as_u16() == 429 || status.is_server_error();
                    let body_text = response.text().await.unwrap_or_default();
                    let err = if status.as_u16() == 429 {
                        Error::RateLimited(format!("OpenAI chat: {}", body_text))
                    } else {
                        Error::ProviderUnavailable(format!(
                            "OpenAI chat error {}: {}",
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
            .unwrap_or_else(|| Error::ProviderUnavailable("completion failed after retries".into())))
    }
}

fn parse_chat_response(json: &serde_json::Value) -> Result<Completion> {
    let text = json
        .get("choices")
        .and_then(|c| c.as_array())
        .and_then(|c| c.first())
        .and_then(|c| c.get("message"))
        .and_then(|m| m.get("content"))
        .and_then(|t| t.as_str())
        .ok_or_else(|| {
            Error::ProviderUnavailable("invalid chat response: missing content".to_string())
        })?
        .to_string();

    let usage = json.get("usage");
    let prompt_tokens = usage
        .and_then(|u| u.get("prompt_tokens"))
        .and_then(|v| v.as_u64())
        .unwrap_or(0);
    let completion_tokens = usage
        .and_then(|u| u.get("completion_tokens"))
        .and_then(|v| v.as_u64())
        .unwrap_or(0);

    Ok(Completion {
        text,
        prompt_tokens,
        completion_tokens,
    })
}

// ============ Mock provider ============

/// Offline model for tests. With no scripted reply it echoes the user
/// prompt, so assertions can check that answers are built from retrieved
/// context. Token counts approximate 4 chars per token.
pub struct MockLlm {
    reply: Mutex<Option<String>>,
    calls: AtomicUsize,
    unavailable: AtomicBool,
}

impl Default for MockLlm {
    fn default() -> Self {
        Self::new()
    }
}

impl MockLlm {
    pub fn new() -> Self {
        Self {
            reply: Mutex::new(None),
            calls: AtomicUsize::new(0),
            unavailable: AtomicBool::new(false),
        }
    }

    pub fn with_reply(reply: &str) -> Self {
        let mock = Self::new();
        mock.set_reply(reply);
        mock
    }

    pub fn set_reply(&self, reply: &str) {
        *self.reply.lock().expect("mock reply lock") = Some(reply.to_string());
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }
}

#[async_trait]
impl LlmProvider for MockLlm {
    fn model_name(&self) -> &str {
        "mock-llm"
    }

    async fn complete(&self, prompt: &Prompt) -> Result<Completion> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(Error::ProviderUnavailable(
                "mock llm provider is offline".to_string(),
            ));
        }
        self.calls.fetch_add(1, Ordering::SeqCst);

        let text = self
            .reply
            .lock()
            .expect("mock reply lock")
            .clone()
            .unwrap_or_else(|| prompt.user.clone());

        Ok(Completion {
            prompt_tokens: ((prompt.system.len() + prompt.user.len()) / 4) as u64,
            completion_tokens: (text.len() / 4).max(1) as u64,
            text,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn mock_echoes_user_prompt() {
        let llm = MockLlm::new();
        let prompt = Prompt {
            system: "be brief".to_string(),
            user: "CONTEXT: rent is $1,500/month".to_string(),
        };
        let completion = llm.complete(&prompt).await.unwrap();
        assert!(completion.text.contains("1,500"));
        assert!(completion.prompt_tokens > 0);
        assert_eq!(llm.calls(), 1);
    }

    #[tokio::test]
    async fn mock_scripted_reply() {
        let llm = MockLlm::with_reply("The rent is $1,500 per month.");
        let prompt = Prompt {
            system: String::new(),
            user: "q".to_string(),
        };
        let completion = llm.complete(&prompt).await.unwrap();
        assert_eq!(completion.text, "The rent is $1,500 per month.");
    }

    #[test]
    fn parse_chat_response_extracts_usage() {
        let json = serde_json::json!({
            "choices": [{ "message": { "content": "hello" } }],
            "usage": { "prompt_tokens": 12, "completion_tokens": 3 },
        });
        let completion = parse_chat_response(&json).unwrap();
        assert_eq!(completion.text, "hello");
        assert_eq!(completion.prompt_tokens, 12);
        assert_eq!(completion.completion_tokens, 3);
    }
}
