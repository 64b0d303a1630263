//! Port abstractions for embeddings, vector search and LLM generation
//!
//! The pipeline only talks to these traits; concrete providers (the Ollama
//! client, the in-memory store, or anything a host application supplies)
//! are swapped in behind `Arc<dyn ...>`.

pub mod embedding;
pub mod llm;
pub mod memory;
pub mod ollama;
pub mod retry;
pub mod vector_store;

pub use embedding::EmbeddingProvider;
pub use llm::{FragmentStream, Generation, LlmProvider, StreamItem};
pub use memory::InMemoryVectorStore;
pub use ollama::OllamaClient;
pub use retry::RetryPolicy;
pub use vector_store::{VectorMatch, VectorStoreProvider};
