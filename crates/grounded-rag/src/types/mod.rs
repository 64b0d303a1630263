//! Core types for the RAG pipeline

pub mod chunk;
pub mod context;
pub mod query;
pub mod response;

pub use chunk::{Chunk, ScoredChunk};
pub use context::{ContextEntry, ContextWindow};
pub use query::{Query, RagRequest, RewrittenQuery, Role, RunMode, RunOptions, SubQuestion, Turn};
pub use response::{Citation, RagEvent, RagResult, RunFailure, RunState};
