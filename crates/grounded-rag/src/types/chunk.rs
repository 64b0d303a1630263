//! Chunk types with source tracking for citations

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Immutable slice of a source document, as stored in the vector store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    /// Unique chunk ID
    pub id: String,
    /// Owning document ID
    pub document_id: String,
    /// Display name of the source document (e.g. "diabetes_guide.pdf")
    pub document_name: String,
    /// Page number (if applicable)
    pub page_number: Option<u32>,
    /// Position of the chunk within its document
    pub chunk_index: u32,
    /// Chunk text
    pub content: String,
    /// Provider-specific metadata
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl Chunk {
    /// Create a chunk without page or metadata
    pub fn new(
        id: impl Into<String>,
        document_id: impl Into<String>,
        document_name: impl Into<String>,
        chunk_index: u32,
        content: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            document_id: document_id.into(),
            document_name: document_name.into(),
            page_number: None,
            chunk_index,
            content: content.into(),
            metadata: HashMap::new(),
        }
    }

    /// Set the page number
    pub fn with_page(mut self, page: u32) -> Self {
        self.page_number = Some(page);
        self
    }

    /// Human-readable source reference, e.g. "guide.pdf, Page 3"
    pub fn source_label(&self) -> String {
        match self.page_number {
            Some(page) => format!("{}, Page {}", self.document_name, page),
            None => self.document_name.clone(),
        }
    }
}

/// A chunk together with the score it was retrieved with
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredChunk {
    /// The retrieved chunk
    pub chunk: Chunk,
    /// Similarity score, higher is more relevant
    pub score: f32,
    /// Query or sub-question text that retrieved it
    pub retrieved_for: String,
}

impl ScoredChunk {
    pub fn new(chunk: Chunk, score: f32, retrieved_for: impl Into<String>) -> Self {
        Self {
            chunk,
            score,
            retrieved_for: retrieved_for.into(),
        }
    }

    /// Chunk ID shortcut
    pub fn id(&self) -> &str {
        &self.chunk.id
    }
}
