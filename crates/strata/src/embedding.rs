//! Embedding providers
//!
//! Remote model adapters implement [`EmbeddingProvider`] outside this
//! crate. [`HashingEmbedder`] is a deterministic local provider that needs
//! no model, and [`FallbackEmbedder`] chains providers in order.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::error::{Result, StrataError};
use crate::math::stable_hash;

/// Turns text into fixed-length vectors
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    async fn embed_text(&self, text: &str) -> Result<Vec<f32>>;

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut embeddings = Vec::with_capacity(texts.len());
        for text in texts {
            embeddings.push(self.embed_text(text).await?);
        }
        Ok(embeddings)
    }

    /// Length of every vector this provider returns
    fn dimension(&self) -> usize;

    fn name(&self) -> &'static str;
}

/// Default dimension for [`HashingEmbedder`]
pub const DEFAULT_HASHING_DIMENSION: usize = 384;

/// Feature-hashing embedder.
///
/// Each lower-cased token adds ±1 to a bucket chosen by its stable hash,
/// and the result is L2-normalized. Texts sharing words end up close.
#[derive(Debug, Clone, Copy)]
pub struct HashingEmbedder {
    dimension: usize,
}

impl HashingEmbedder {
    pub fn new(dimension: usize) -> Result<Self> {
        if dimension == 0 {
            return Err(StrataError::Validation(
                "embedding dimension must be positive".to_string(),
            ));
        }
        Ok(Self { dimension })
    }

    /// Synchronous embedding, shared by the async trait methods
    pub fn embed(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimension];
        for token in text.split_whitespace() {
            let token = token.to_lowercase();
            let hash = stable_hash(&token);
            let bucket = hash.rem_euclid(self.dimension as i64) as usize;
            let sign = if hash & (1 << 40) == 0 { 1.0 } else { -1.0 };
            vector[bucket] += sign;
        }

        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in &mut vector {
                *v /= norm;
            }
        }
        vector
    }
}

impl Default for HashingEmbedder {
    fn default() -> Self {
        Self {
            dimension: DEFAULT_HASHING_DIMENSION,
        }
    }
}

#[async_trait]
impl EmbeddingProvider for HashingEmbedder {
    async fn embed_text(&self, text: &str) -> Result<Vec<f32>> {
        Ok(self.embed(text))
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn name(&self) -> &'static str {
        "hashing"
    }
}

/// Tries each provider in order, returning the first success
pub struct FallbackEmbedder {
    providers: Vec<Arc<dyn EmbeddingProvider>>,
}

impl FallbackEmbedder {
    /// All providers must agree on dimension
    pub fn new(providers: Vec<Arc<dyn EmbeddingProvider>>) -> Result<Self> {
        let Some(first) = providers.first() else {
            return Err(StrataError::Config(
                "fallback embedder needs at least one provider".to_string(),
            ));
        };
        let dimension = first.dimension();
        if let Some(odd) = providers.iter().find(|p| p.dimension() != dimension) {
            return Err(StrataError::Config(format!(
                "provider '{}' has dimension {}, expected {dimension}",
                odd.name(),
                odd.dimension()
            )));
        }
        Ok(Self { providers })
    }
}

#[async_trait]
impl EmbeddingProvider for FallbackEmbedder {
    async fn embed_text(&self, text: &str) -> Result<Vec<f32>> {
        let mut last_error = None;
        for provider in &self.providers {
            match provider.embed_text(text).await {
                Ok(embedding) => {
                    debug!(provider = provider.name(), "Embedding succeeded");
                    return Ok(embedding);
                }
                Err(e) => {
                    warn!(provider = provider.name(), error = %e, "Embedding failed, trying next provider");
                    last_error = Some(e);
                }
            }
        }

        Err(StrataError::backend(
            "embedding",
            last_error.map_or_else(|| "no providers".to_string(), |e| e.to_string()),
        ))
    }

    fn dimension(&self) -> usize {
        self.providers.first().map_or(0, |p| p.dimension())
    }

    fn name(&self) -> &'static str {
        "fallback"
    }
}
