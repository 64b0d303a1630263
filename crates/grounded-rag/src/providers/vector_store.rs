//! Vector store provider trait for nearest-neighbour chunk lookup

use async_trait::async_trait;

use crate::error::Result;
use crate::types::Chunk;

/// Search result from vector store
#[derive(Debug, Clone)]
pub struct VectorMatch {
    /// The matched chunk
    pub chunk: Chunk,
    /// Similarity score (provider-native scale, higher is more similar)
    pub score: f32,
}

/// Trait for similarity search over stored chunk vectors
///
/// Implementations:
/// - `InMemoryVectorStore`: cosine similarity over an in-process index
///
/// Failures are reported as [`crate::Error::Retrieval`].
#[async_trait]
pub trait VectorStoreProvider: Send + Sync {
    /// Return up to `top_k` nearest chunks, most similar first
    async fn query(
        &self,
        vector: &[f32],
        top_k: usize,
        namespace: Option<&str>,
    ) -> Result<Vec<VectorMatch>>;

    /// Get provider name for logging
    fn name(&self) -> &str {
        "vector_store"
    }
}
