//! Bounded context window handed to the generator

use serde::Serialize;

use super::chunk::ScoredChunk;

/// A chunk admitted to the window with its estimated token cost
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ContextEntry {
    pub scored: ScoredChunk,
    pub tokens: usize,
}

/// Ordered, deduplicated chunks whose token total stays within `token_budget`
///
/// Only [`crate::retrieval::ContextAssembler`] constructs non-empty windows,
/// which is what upholds the budget and unique-id invariants.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ContextWindow {
    entries: Vec<ContextEntry>,
    token_count: usize,
    token_budget: usize,
}

impl ContextWindow {
    /// Empty window for the given budget
    pub fn empty(token_budget: usize) -> Self {
        Self {
            entries: Vec::new(),
            token_count: 0,
            token_budget,
        }
    }

    pub(crate) fn from_entries(entries: Vec<ContextEntry>, token_budget: usize) -> Self {
        let token_count = entries.iter().map(|e| e.tokens).sum();
        debug_assert!(token_count <= token_budget);
        Self {
            entries,
            token_count,
            token_budget,
        }
    }

    pub fn entries(&self) -> &[ContextEntry] {
        &self.entries
    }

    /// Scored chunks in window order
    pub fn chunks(&self) -> impl Iterator<Item = &ScoredChunk> {
        self.entries.iter().map(|e| &e.scored)
    }

    /// Chunk IDs in window order
    pub fn chunk_ids(&self) -> Vec<String> {
        self.chunks().map(|c| c.chunk.id.clone()).collect()
    }

    /// Look up an entry by chunk ID
    pub fn get(&self, chunk_id: &str) -> Option<&ScoredChunk> {
        self.chunks().find(|c| c.chunk.id == chunk_id)
    }

    pub fn contains(&self, chunk_id: &str) -> bool {
        self.get(chunk_id).is_some()
    }

    /// Entry at a 1-based source label, as used in prompts (`[1]`, `[2]`, ...)
    pub fn by_label(&self, label: usize) -> Option<&ScoredChunk> {
        label.checked_sub(1).and_then(|i| self.entries.get(i)).map(|e| &e.scored)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Estimated tokens used
    pub fn token_count(&self) -> usize {
        self.token_count
    }

    /// Budget the window was assembled under
    pub fn token_budget(&self) -> usize {
        self.token_budget
    }
}
