//! Vector retrieval and context window assembly

pub mod assembler;
pub mod retriever;

pub use assembler::{CharRatioEstimator, ContextAssembler, TokenEstimator, WordEstimator};
pub use retriever::Retriever;
