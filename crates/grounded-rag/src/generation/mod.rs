//! Prompt construction and citation handling

pub mod citation;
pub mod prompt;

pub use citation::CitationExtractor;
pub use prompt::PromptBuilder;
