//! Query preparation: rewriting and multi-hop decomposition

pub mod decomposer;
pub mod rewriter;

pub use decomposer::QueryDecomposer;
pub use rewriter::QueryRewriter;
