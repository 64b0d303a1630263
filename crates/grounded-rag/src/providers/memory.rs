//! In-process vector store using brute-force cosine similarity

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::error::{Error, Result};
use crate::types::Chunk;

use super::vector_store::{VectorMatch, VectorStoreProvider};

struct StoredChunk {
    chunk: Chunk,
    vector: Vec<f32>,
    namespace: Option<String>,
}

/// Vector store kept in memory
///
/// Chunks inserted without a namespace are global and visible to every
/// query; namespaced chunks are only visible to queries for that namespace.
#[derive(Default)]
pub struct InMemoryVectorStore {
    entries: RwLock<Vec<StoredChunk>>,
}

impl InMemoryVectorStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a chunk with its embedding
    pub fn insert(&self, chunk: Chunk, vector: Vec<f32>, namespace: Option<&str>) -> Result<()> {
        if vector.is_empty() {
            return Err(Error::retrieval(format!("Chunk {} has no embedding", chunk.id)));
        }

        let mut entries = self.entries.write();
        if let Some(existing) = entries.first() {
            if existing.vector.len() != vector.len() {
                return Err(Error::retrieval(format!(
                    "Dimension mismatch for chunk {}: expected {}, got {}",
                    chunk.id,
                    existing.vector.len(),
                    vector.len()
                )));
            }
        }

        // Re-inserting an ID replaces the previous entry
        entries.retain(|e| e.chunk.id != chunk.id);
        entries.push(StoredChunk {
            chunk,
            vector,
            namespace: namespace.map(str::to_string),
        });
        Ok(())
    }

    /// Delete all chunks for a document
    pub fn delete_document(&self, document_id: &str) -> usize {
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|e| e.chunk.document_id != document_id);
        before - entries.len()
    }

    /// Get chunk count
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Cosine similarity clamped to [0, 1]
fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    (dot / (norm_a * norm_b)).clamp(0.0, 1.0)
}

#[async_trait]
impl VectorStoreProvider for InMemoryVectorStore {
    async fn query(
        &self,
        vector: &[f32],
        top_k: usize,
        namespace: Option<&str>,
    ) -> Result<Vec<VectorMatch>> {
        let entries = self.entries.read();

        if let Some(existing) = entries.first() {
            if existing.vector.len() != vector.len() {
                return Err(Error::retrieval(format!(
                    "Query vector has {} dimensions, index has {}",
                    vector.len(),
                    existing.vector.len()
                )));
            }
        }

        let mut matches: Vec<VectorMatch> = entries
            .iter()
            .filter(|e| match (namespace, e.namespace.as_deref()) {
                (_, None) => true,
                (Some(wanted), Some(ns)) => wanted == ns,
                (None, Some(_)) => false,
            })
            .map(|e| VectorMatch {
                chunk: e.chunk.clone(),
                score: cosine_similarity(vector, &e.vector),
            })
            .collect();

        matches.sort_by(|a, b| b.score.total_cmp(&a.score));
        matches.truncate(top_k);

        tracing::debug!("In-memory store returned {} matches", matches.len());
        Ok(matches)
    }

    fn name(&self) -> &str {
        "in_memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(id: &str, doc: &str) -> Chunk {
        Chunk::new(id, doc, format!("{}.pdf", doc), 0, format!("content of {}", id))
    }

    #[tokio::test]
    async fn test_query_ranks_by_cosine() {
        let store = InMemoryVectorStore::new();
        store.insert(chunk("a", "d1"), vec![1.0, 0.0], None).unwrap();
        store.insert(chunk("b", "d1"), vec![0.6, 0.8], None).unwrap();
        store.insert(chunk("c", "d2"), vec![0.0, 1.0], None).unwrap();

        let results = store.query(&[1.0, 0.0], 2, None).await.unwrap();

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].chunk.id, "a");
        assert!((results[0].score - 1.0).abs() < 1e-6);
        assert_eq!(results[1].chunk.id, "b");
        assert!((results[1].score - 0.6).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_namespace_sees_global_and_own_chunks() {
        let store = InMemoryVectorStore::new();
        store.insert(chunk("global", "d1"), vec![1.0, 0.0], None).unwrap();
        store.insert(chunk("mine", "d2"), vec![1.0, 0.0], Some("user-1")).unwrap();
        store.insert(chunk("theirs", "d3"), vec![1.0, 0.0], Some("user-2")).unwrap();

        let ids: Vec<String> = store
            .query(&[1.0, 0.0], 10, Some("user-1"))
            .await
            .unwrap()
            .into_iter()
            .map(|m| m.chunk.id)
            .collect();
        assert_eq!(ids, vec!["global", "mine"]);

        let unscoped = store.query(&[1.0, 0.0], 10, None).await.unwrap();
        assert_eq!(unscoped.len(), 1);
    }

    #[test]
    fn test_dimension_mismatch_rejected() {
        let store = InMemoryVectorStore::new();
        store.insert(chunk("a", "d1"), vec![1.0, 0.0], None).unwrap();
        let err = store.insert(chunk("b", "d1"), vec![1.0], None).unwrap_err();
        assert_eq!(err.kind(), "retrieval_error");
        assert_eq!(store.delete_document("d1"), 1);
        assert!(store.is_empty());
    }
}
