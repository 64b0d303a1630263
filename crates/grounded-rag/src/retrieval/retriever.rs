//! Vector retrieval: embed the query, look up neighbours, filter and dedupe

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{Error, Port, Result};
use crate::providers::{EmbeddingProvider, RetryPolicy, VectorStoreProvider};
use crate::types::ScoredChunk;

/// Returns ranked, deduplicated candidate chunks for a query string
#[derive(Clone)]
pub struct Retriever {
    embedder: Arc<dyn EmbeddingProvider>,
    store: Arc<dyn VectorStoreProvider>,
    retry: RetryPolicy,
    namespace: Option<String>,
}

impl Retriever {
    pub fn new(
        embedder: Arc<dyn EmbeddingProvider>,
        store: Arc<dyn VectorStoreProvider>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            embedder,
            store,
            retry,
            namespace: None,
        }
    }

    /// Restrict lookups to a vector store namespace
    pub fn with_namespace(mut self, namespace: Option<String>) -> Self {
        self.namespace = namespace;
        self
    }

    /// Chunks scoring at least `score_threshold`, best first, unique by ID
    ///
    /// Duplicates are only merged within this call; chunks found again by a
    /// later call are merged by the context assembler.
    pub async fn retrieve(
        &self,
        query_text: &str,
        top_k: usize,
        score_threshold: f32,
    ) -> Result<Vec<ScoredChunk>> {
        if top_k == 0 {
            return Ok(Vec::new());
        }

        let embedder = &self.embedder;
        let embedding = self
            .retry
            .call(Port::Embedding, "Query embedding", move || async move {
                embedder
                    .embed(query_text)
                    .await
                    .map_err(|e| e.for_port(Port::Embedding))
            })
            .await?;

        if embedding.is_empty() {
            return Err(Error::embedding(format!(
                "{} returned an empty embedding",
                self.embedder.name()
            )));
        }

        let store = &self.store;
        let vector = embedding.as_slice();
        let namespace = self.namespace.as_deref();
        let matches = self
            .retry
            .call(Port::VectorStore, "Vector search", move || async move {
                store
                    .query(vector, top_k, namespace)
                    .await
                    .map_err(|e| e.for_port(Port::VectorStore))
            })
            .await?;

        let returned = matches.len();
        let mut results: Vec<ScoredChunk> = Vec::with_capacity(returned);
        let mut seen: HashMap<String, usize> = HashMap::new();

        for m in matches {
            if m.score.is_nan() || m.score < score_threshold {
                continue;
            }
            match seen.get(&m.chunk.id) {
                Some(&i) => {
                    if m.score > results[i].score {
                        results[i].score = m.score;
                    }
                }
                None => {
                    seen.insert(m.chunk.id.clone(), results.len());
                    results.push(ScoredChunk::new(m.chunk, m.score, query_text));
                }
            }
        }

        results.sort_by(|a, b| b.score.total_cmp(&a.score));

        tracing::debug!(
            "Retrieved {} of {} chunks above threshold {} for \"{}\"",
            results.len(),
            returned,
            score_threshold,
            query_text
        );

        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::VectorMatch;
    use crate::types::Chunk;
    use async_trait::async_trait;

    struct FixedEmbedder;

    #[async_trait]
    impl EmbeddingProvider for FixedEmbedder {
        async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
            Ok(vec![1.0, 0.0])
        }
    }

    struct FixedStore(Vec<(&'static str, f32)>);

    #[async_trait]
    impl VectorStoreProvider for FixedStore {
        async fn query(&self, _vector: &[f32], top_k: usize, _ns: Option<&str>) -> Result<Vec<VectorMatch>> {
            Ok(self
                .0
                .iter()
                .take(top_k)
                .map(|(id, score)| VectorMatch {
                    chunk: Chunk::new(*id, "doc", "doc.pdf", 0, format!("text {}", id)),
                    score: *score,
                })
                .collect())
        }
    }

    struct FailingEmbedder;

    #[async_trait]
    impl EmbeddingProvider for FailingEmbedder {
        async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
            Err(Error::internal("provider exploded"))
        }
    }

    fn retriever(store: FixedStore) -> Retriever {
        Retriever::new(Arc::new(FixedEmbedder), Arc::new(store), RetryPolicy::default())
    }

    #[tokio::test]
    async fn test_threshold_drops_low_scores() {
        let store = FixedStore(vec![("c1", 0.92), ("c2", 0.81), ("c3", 0.40)]);
        let results = retriever(store)
            .retrieve("What are the symptoms of diabetes?", 3, 0.5)
            .await
            .unwrap();

        let ids: Vec<&str> = results.iter().map(|r| r.id()).collect();
        assert_eq!(ids, vec!["c1", "c2"]);
        assert_eq!(results[0].retrieved_for, "What are the symptoms of diabetes?");
    }

    #[tokio::test]
    async fn test_duplicate_ids_within_call_are_merged() {
        let store = FixedStore(vec![("c1", 0.6), ("c2", 0.7), ("c1", 0.9)]);
        let results = retriever(store).retrieve("q", 10, 0.0).await.unwrap();

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].id(), "c1");
        assert_eq!(results[0].score, 0.9);
    }

    #[tokio::test]
    async fn test_embedding_failure_is_embedding_error() {
        let retriever = Retriever::new(
            Arc::new(FailingEmbedder),
            Arc::new(FixedStore(vec![])),
            RetryPolicy::default(),
        );
        let err = retriever.retrieve("q", 3, 0.5).await.unwrap_err();
        assert_eq!(err.kind(), "embedding_error");
    }
}
