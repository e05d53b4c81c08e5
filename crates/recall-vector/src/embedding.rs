//! Embedding service trait and implementations.
//!
//! - `OllamaEmbedding` calls a local Ollama server over HTTP. This is the
//!   production embedding backend.
//! - `MockEmbedding` provides deterministic hash-based vectors for testing.

use std::collections::hash_map::DefaultHasher;
use std::future::Future;
use std::hash::{Hash, Hasher};
use std::pin::Pin;
use std::time::Duration;

use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use recall_core::config::EmbeddingConfig;
use recall_core::error::{RecallError, Result};

/// Service for generating text embeddings.
///
/// Implementations convert text into fixed-dimensional vectors that capture
/// semantic meaning. Used for both ingestion (indexing) and search (query).
pub trait EmbeddingService: Send + Sync {
    /// Generate an embedding vector for the given text.
    fn embed(&self, text: &str) -> impl Future<Output = Result<Vec<f32>>> + Send;

    /// Embed several texts, returning vectors in input order.
    ///
    /// The default embeds one at a time and fails on the first error.
    fn embed_many(&self, texts: &[String]) -> impl Future<Output = Result<Vec<Vec<f32>>>> + Send {
        async move {
            let mut vectors = Vec::with_capacity(texts.len());
            for text in texts {
                vectors.push(self.embed(text).await?);
            }
            Ok(vectors)
        }
    }

    /// Return the dimensionality of vectors produced by this service.
    fn dimensions(&self) -> usize;

    /// Short provider name for logs.
    fn name(&self) -> &str;
}

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Object-safe version of [`EmbeddingService`] for dynamic dispatch.
///
/// A blanket implementation is provided so that every `EmbeddingService`
/// automatically implements `DynEmbeddingService`.
pub trait DynEmbeddingService: Send + Sync {
    fn embed_boxed<'a>(&'a self, text: &'a str) -> BoxFuture<'a, Result<Vec<f32>>>;

    fn embed_many_boxed<'a>(&'a self, texts: &'a [String]) -> BoxFuture<'a, Result<Vec<Vec<f32>>>>;

    fn dimensions(&self) -> usize;

    fn name(&self) -> &str;
}

impl<T: EmbeddingService> DynEmbeddingService for T {
    fn embed_boxed<'a>(&'a self, text: &'a str) -> BoxFuture<'a, Result<Vec<f32>>> {
        Box::pin(self.embed(text))
    }

    fn embed_many_boxed<'a>(&'a self, texts: &'a [String]) -> BoxFuture<'a, Result<Vec<Vec<f32>>>> {
        Box::pin(self.embed_many(texts))
    }

    fn dimensions(&self) -> usize {
        EmbeddingService::dimensions(self)
    }

    fn name(&self) -> &str {
        EmbeddingService::name(self)
    }
}

/// Build the provider named by `config.provider`.
pub fn build_embedder(config: &EmbeddingConfig) -> Result<Box<dyn DynEmbeddingService>> {
    match config.provider.as_str() {
        "ollama" => Ok(Box::new(OllamaEmbedding::new(
            &config.base_url,
            &config.model,
            config.dimension,
            config.timeout(),
        )?)),
        "mock" => Ok(Box::new(MockEmbedding::new(config.dimension))),
        other => Err(RecallError::Config(format!(
            "unknown embedding provider '{}'",
            other
        ))),
    }
}

// ---------------------------------------------------------------------------
// OllamaEmbedding - HTTP client for a local Ollama server
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct OllamaRequest<'a> {
    model: &'a str,
    prompt: &'a str,
}

#[derive(Debug, Deserialize)]
struct OllamaResponse {
    embedding: Vec<f32>,
}

/// Embeds text through Ollama's `/api/embeddings` endpoint.
///
/// Every failure, including a vector of the wrong length, surfaces as
/// `RecallError::Provider`. No zero-vector fallback happens here.
#[derive(Debug, Clone)]
pub struct OllamaEmbedding {
    client: Client,
    endpoint: String,
    model: String,
    dimensions: usize,
}

impl OllamaEmbedding {
    pub fn new(base_url: &str, model: &str, dimensions: usize, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RecallError::Provider(format!("Failed to create HTTP client: {}", e)))?;
        let endpoint = format!("{}/api/embeddings", base_url.trim_end_matches('/'));

        info!(endpoint = %endpoint, model, dimensions, "Configured Ollama embeddings");

        Ok(Self {
            client,
            endpoint,
            model: model.to_string(),
            dimensions,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

impl EmbeddingService for OllamaEmbedding {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(&OllamaRequest {
                model: &self.model,
                prompt: text,
            })
            .send()
            .await
            .map_err(|e| RecallError::Provider(format!("Embedding request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(RecallError::Provider(format!(
                "Embedding request failed: HTTP {} - {}",
                status, body
            )));
        }

        let parsed: OllamaResponse = response
            .json()
            .await
            .map_err(|e| RecallError::Provider(format!("Failed to parse response: {}", e)))?;

        if parsed.embedding.len() != self.dimensions {
            return Err(RecallError::Provider(format!(
                "model {} returned {} dimensions, expected {}",
                self.model,
                parsed.embedding.len(),
                self.dimensions
            )));
        }
        debug!(chars = text.len(), "Embedded text via Ollama");
        Ok(parsed.embedding)
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn name(&self) -> &str {
        "ollama"
    }
}

// ---------------------------------------------------------------------------
// MockEmbedding - deterministic hash-based vectors for testing
// ---------------------------------------------------------------------------

/// Mock embedding service that returns deterministic unit vectors.
///
/// The output is derived from a hash of the input text, so identical inputs
/// always produce identical outputs. This allows testing deduplication and
/// search without a real model.
#[derive(Debug, Clone)]
pub struct MockEmbedding {
    dimensions: usize,
}

impl Default for MockEmbedding {
    fn default() -> Self {
        Self::new(384)
    }
}

impl MockEmbedding {
    pub fn new(dimensions: usize) -> Self {
        Self { dimensions }
    }

    fn hash_to_vector(&self, text: &str) -> Vec<f32> {
        let mut result: Vec<f32> = (0..self.dimensions)
            .map(|i| {
                let mut hasher = DefaultHasher::new();
                text.hash(&mut hasher);
                i.hash(&mut hasher);
                let h = hasher.finish();
                (((h as f64) / (u64::MAX as f64)) * 2.0 - 1.0) as f32
            })
            .collect();

        let norm: f32 = result.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for val in &mut result {
                *val /= norm;
            }
        }
        result
    }
}

impl EmbeddingService for MockEmbedding {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        if text.is_empty() {
            return Err(RecallError::Provider("Cannot embed empty text".to_string()));
        }
        Ok(self.hash_to_vector(text))
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn name(&self) -> &str {
        "mock"
    }
}
