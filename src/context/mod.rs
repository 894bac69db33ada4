//! Context service: enriches each chunk with surrounding-document context
//! before indexing, to improve retrieval relevance.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::config::ContextConfig;
use crate::error::{KbragError, Result};

/// Document text sent along with each chunk is capped to keep prompts
/// within model context limits.
const MAX_DOC_CHARS: usize = 12_000;

/// Contextualization seam consumed by the orchestration service.
///
/// Same arity in and out: output chunk N corresponds to input chunk N,
/// augmented with surrounding-document context. Each per-chunk call is
/// independently retryable; callers must tolerate model non-determinism.
#[async_trait]
pub trait ContextGenerator: Send + Sync {
    async fn create_context_chunks(
        &self,
        full_text: &str,
        chunks: &[String],
    ) -> Result<Vec<String>>;
}

/// No-op contextualizer used when no LLM is configured; chunks pass
/// through unenriched.
pub struct PassthroughContext;

#[async_trait]
impl ContextGenerator for PassthroughContext {
    async fn create_context_chunks(
        &self,
        _full_text: &str,
        chunks: &[String],
    ) -> Result<Vec<String>> {
        Ok(chunks.to_vec())
    }
}

#[derive(Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    max_tokens: u32,
}

#[derive(Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

/// Chat-completions-backed contextualizer.
///
/// One API call per chunk: the model is shown the (truncated) document and
/// the chunk, and answers with a short situating context that is prepended
/// to the chunk. Retries 429/5xx responses with exponential backoff.
pub struct OpenAiContextGenerator {
    client: Client,
    api_key: String,
    model: String,
    max_retries: usize,
}

impl OpenAiContextGenerator {
    pub fn new(api_key: String, config: &ContextConfig) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .expect("Failed to build HTTP client");

        Self {
            client,
            api_key,
            model: config.model.clone(),
            max_retries: config.max_retries,
        }
    }

    async fn situate_chunk(&self, document: &str, chunk: &str) -> Result<String> {
        let prompt = format!(
            "<document>\n{}\n</document>\n\nHere is a chunk from the document above:\n<chunk>\n{}\n</chunk>\n\nWrite a short context (one or two sentences) situating this chunk within the overall document, to improve search retrieval of the chunk. Answer with the context only.",
            truncate_chars(document, MAX_DOC_CHARS),
            chunk
        );

        let request = ChatRequest {
            model: self.model.clone(),
            messages: vec![ChatMessage {
                role: "user".to_string(),
                content: prompt,
            }],
            max_tokens: 200,
        };

        let mut attempt = 0;
        let mut delay = Duration::from_secs(1);
        loop {
            match self.send_request(&request).await {
                Ok(context) => return Ok(context),
                Err(e) if attempt < self.max_retries && is_retryable(&e) => {
                    log::warn!(
                        "Context generation retry {}/{} after error: {}",
                        attempt + 1,
                        self.max_retries,
                        e
                    );
                    tokio::time::sleep(delay).await;
                    delay *= 2;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn send_request(&self, request: &ChatRequest) -> Result<String> {
        let response = self
            .client
            .post("https://api.openai.com/v1/chat/completions")
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(request)
            .send()
            .await
            .map_err(|e| KbragError::ExternalService(format!("Network error: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unable to read error response".to_string());
            return Err(KbragError::ExternalService(format!(
                "Context API error {}: {}",
                status, body
            )));
        }

        let result: ChatResponse = response
            .json()
            .await
            .map_err(|e| KbragError::ExternalService(format!("Failed to parse response: {}", e)))?;

        result
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content.trim().to_string())
            .ok_or_else(|| {
                KbragError::ExternalService("Empty response from context API".to_string())
            })
    }
}

#[async_trait]
impl ContextGenerator for OpenAiContextGenerator {
    async fn create_context_chunks(
        &self,
        full_text: &str,
        chunks: &[String],
    ) -> Result<Vec<String>> {
        let mut enriched = Vec::with_capacity(chunks.len());
        for chunk in chunks {
            let context = self.situate_chunk(full_text, chunk).await?;
            if context.is_empty() {
                enriched.push(chunk.clone());
            } else {
                enriched.push(format!("{}\n\n{}", context, chunk));
            }
        }
        Ok(enriched)
    }
}

fn is_retryable(e: &KbragError) -> bool {
    let msg = e.to_string();
    msg.contains("429")
        || msg.contains("500")
        || msg.contains("502")
        || msg.contains("503")
        || msg.contains("504")
}

/// Truncate at a character boundary without slicing multi-byte characters.
fn truncate_chars(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        text.to_string()
    } else {
        text.chars().take(max_chars).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_passthrough_preserves_arity_and_content() {
        let chunks = vec!["one".to_string(), "two".to_string()];
        let out = PassthroughContext
            .create_context_chunks("full text", &chunks)
            .await
            .unwrap();
        assert_eq!(out, chunks);
    }

    #[test]
    fn test_truncate_chars_multibyte() {
        let text = "äöü".repeat(10);
        let truncated = truncate_chars(&text, 5);
        assert_eq!(truncated.chars().count(), 5);
    }

    #[test]
    fn test_is_retryable() {
        assert!(is_retryable(&KbragError::ExternalService(
            "Context API error 429 Too Many Requests: slow down".to_string()
        )));
        assert!(is_retryable(&KbragError::ExternalService(
            "Context API error 503 Service Unavailable: busy".to_string()
        )));
        assert!(!is_retryable(&KbragError::ExternalService(
            "Context API error 401 Unauthorized: bad key".to_string()
        )));
    }

    // Integration tests for the OpenAI-backed generator require a real API
    // key and are not part of the unit suite.
}
