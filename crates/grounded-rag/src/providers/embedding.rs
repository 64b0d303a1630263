//! Embedding provider trait for generating text embeddings

use async_trait::async_trait;

use crate::error::Result;

/// Trait for turning text into a fixed-dimension vector
///
/// Implementations:
/// - `OllamaClient`: Local Ollama server (nomic-embed-text)
///
/// Failures are reported as [`crate::Error::Embedding`].
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Generate embedding for a single text
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Get provider name for logging
    fn name(&self) -> &str {
        "embedding"
    }
}
