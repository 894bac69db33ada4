//! Embeddings provider: text in, vectors out. The vector DB service
//! consumes this through the [`Embedder`] trait so backends can be swapped
//! at composition time.

pub mod cache;

pub use cache::EmbeddingCache;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use crate::error::{KbragError, Result};

/// Embeddings seam: maps text to fixed-dimension vectors.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embed a batch of texts; output order matches input order.
    async fn embed_batch(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>>;

    /// Embed a single query string.
    async fn embed_query(&self, text: &str) -> Result<Vec<f32>>;

    /// Dimension of every vector this embedder produces.
    fn dimensions(&self) -> usize;
}

/// Request structure for OpenAI embeddings API
#[derive(Serialize)]
struct EmbeddingRequest {
    model: String,
    input: Vec<String>,
}

/// Response structure from OpenAI embeddings API
#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

/// OpenAI embeddings client
///
/// Handles batch embedding generation with retry logic and rate limiting.
/// Optionally caches query embeddings to reduce API calls.
pub struct OpenAiEmbedder {
    client: Client,
    api_key: String,
    model: String,
    batch_size: usize,
    dimensions: usize,
    cache: Option<Arc<EmbeddingCache>>,
}

impl OpenAiEmbedder {
    /// Create a new OpenAI embedder.
    ///
    /// `batch_size` is capped at 2048, the API's per-request maximum.
    ///
    /// # Panics
    ///
    /// Panics if the HTTP client cannot be created (should not happen in
    /// normal operation).
    pub fn new(
        api_key: String,
        model: String,
        batch_size: usize,
        dimensions: usize,
        cache: Option<Arc<EmbeddingCache>>,
    ) -> Self {
        let batch_size = batch_size.min(2048);

        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .expect("Failed to build HTTP client");

        Self {
            client,
            api_key,
            model,
            batch_size,
            dimensions,
            cache,
        }
    }

    async fn embed_batch_internal(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
        let request = EmbeddingRequest {
            model: self.model.clone(),
            input: texts,
        };

        let response = self
            .client
            .post("https://api.openai.com/v1/embeddings")
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&request)
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
                "Embeddings API error {}: {}",
                status, body
            )));
        }

        let result: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| KbragError::ExternalService(format!("Failed to parse response: {}", e)))?;

        let embeddings: Vec<Vec<f32>> = result.data.into_iter().map(|d| d.embedding).collect();
        for embedding in &embeddings {
            if embedding.len() != self.dimensions {
                return Err(KbragError::ExternalService(format!(
                    "Unexpected embedding dimension: expected {}, got {}",
                    self.dimensions,
                    embedding.len()
                )));
            }
        }
        Ok(embeddings)
    }

    async fn embed_with_retry(&self, text: &str, max_retries: usize) -> Result<Vec<f32>> {
        let start = std::time::Instant::now();
        let mut attempt = 0;
        let mut delay = Duration::from_secs(1);

        loop {
            match self.embed_batch_internal(vec![text.to_string()]).await {
                Ok(mut embeddings) => {
                    if embeddings.is_empty() {
                        return Err(KbragError::ExternalService(
                            "Empty response from embeddings API".to_string(),
                        ));
                    }
                    log::debug!(
                        "Embedding API call took {:?} (attempt {})",
                        start.elapsed(),
                        attempt + 1
                    );
                    return Ok(embeddings.remove(0));
                }
                Err(e) if attempt < max_retries => {
                    // Only retry rate limits and server errors
                    let msg = e.to_string();
                    let should_retry = msg.contains("429")
                        || msg.contains("500")
                        || msg.contains("502")
                        || msg.contains("503")
                        || msg.contains("504");

                    if should_retry {
                        log::warn!("Retry {}/{} after error: {}", attempt + 1, max_retries, e);
                        tokio::time::sleep(delay).await;
                        delay *= 2;
                        attempt += 1;
                    } else {
                        return Err(e);
                    }
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[async_trait]
impl Embedder for OpenAiEmbedder {
    async fn embed_batch(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let mut all_embeddings = Vec::new();
        for chunk in texts.chunks(self.batch_size) {
            let embeddings = self.embed_batch_internal(chunk.to_vec()).await?;
            all_embeddings.extend(embeddings);

            // Small delay between full batches to stay under rate limits
            if chunk.len() == self.batch_size {
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
        }
        Ok(all_embeddings)
    }

    async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        if let Some(cache) = &self.cache {
            if let Some(cached) = cache.get(&self.model, text) {
                log::debug!("Embedding cache hit for query");
                return Ok(cached);
            }
        }

        let embedding = self.embed_with_retry(text, 3).await?;

        if let Some(cache) = &self.cache {
            cache.put(&self.model, text, embedding.clone());
        }
        Ok(embedding)
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }
}
