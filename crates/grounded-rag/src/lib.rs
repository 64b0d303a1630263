//! grounded-rag: retrieval-augmented generation with verifiable citations
//!
//! This crate orchestrates a RAG run over pluggable embedding, vector store
//! and LLM providers: query rewriting, optional multi-hop decomposition,
//! retrieval, token-budgeted context assembly, streaming generation and
//! citation extraction. Every citation points at a chunk that was actually
//! in the model's context.

pub mod config;
pub mod error;
pub mod generation;
pub mod orchestrator;
pub mod providers;
pub mod query;
pub mod retrieval;
pub mod types;

#[cfg(test)]
mod testing;

pub use config::RagConfig;
pub use error::{Error, Result};
pub use orchestrator::{CancelHandle, RagOrchestrator, RagRun};
pub use types::{
    chunk::{Chunk, ScoredChunk},
    context::ContextWindow,
    query::{Query, RagRequest, RunMode, RunOptions, SubQuestion, Turn},
    response::{Citation, RagEvent, RagResult, RunFailure, RunState},
};
