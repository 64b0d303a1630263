//! Context window assembly under a token budget
//!
//! Algorithm:
//! 1. Merge duplicate chunk IDs, keeping the maximum score.
//! 2. Sort by score (desc), then document order of first appearance,
//!    page, chunk position and ID (all asc).
//! 3. Greedily admit chunks while the running token estimate stays within
//!    the budget. Chunks are atomic; the first chunk that does not fit ends
//!    assembly. Oversized chunks ahead of the first admitted one are skipped
//!    so the window is empty only when nothing fits at all.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::types::{ContextEntry, ContextWindow, ScoredChunk};

/// Pluggable token counting
pub trait TokenEstimator: Send + Sync {
    /// Estimated token count of `text`
    fn estimate(&self, text: &str) -> usize;
}

/// Length-based estimate: one token per `chars_per_token` characters, rounded up
#[derive(Debug, Clone)]
pub struct CharRatioEstimator {
    chars_per_token: usize,
}

impl CharRatioEstimator {
    pub fn new(chars_per_token: usize) -> Self {
        Self {
            chars_per_token: chars_per_token.max(1),
        }
    }
}

impl Default for CharRatioEstimator {
    fn default() -> Self {
        Self::new(4)
    }
}

impl TokenEstimator for CharRatioEstimator {
    fn estimate(&self, text: &str) -> usize {
        text.chars().count().div_ceil(self.chars_per_token)
    }
}

/// One token per whitespace-separated word
#[derive(Debug, Clone, Default)]
pub struct WordEstimator;

impl TokenEstimator for WordEstimator {
    fn estimate(&self, text: &str) -> usize {
        text.split_whitespace().count()
    }
}

/// Selects and orders chunks into a bounded [`ContextWindow`]
#[derive(Clone)]
pub struct ContextAssembler {
    estimator: Arc<dyn TokenEstimator>,
}

impl ContextAssembler {
    pub fn new(estimator: Arc<dyn TokenEstimator>) -> Self {
        Self { estimator }
    }

    /// Token cost of one chunk
    pub fn cost(&self, scored: &ScoredChunk) -> usize {
        self.estimator.estimate(&scored.chunk.content)
    }

    /// Build a window; empty input or an unfittable budget gives an empty window
    pub fn assemble(
        &self,
        scored_chunks: impl IntoIterator<Item = ScoredChunk>,
        token_budget: usize,
    ) -> ContextWindow {
        let candidates = merge_and_sort(scored_chunks);

        let mut entries = Vec::new();
        let mut used = 0usize;
        let mut skipped = 0usize;

        for scored in candidates {
            let tokens = self.cost(&scored);
            if used + tokens > token_budget {
                if entries.is_empty() {
                    tracing::debug!(
                        "Chunk {} ({} tokens) exceeds budget {}, skipping",
                        scored.chunk.id,
                        tokens,
                        token_budget
                    );
                    skipped += 1;
                    continue;
                }
                break;
            }
            used += tokens;
            entries.push(ContextEntry { scored, tokens });
        }

        if skipped > 0 {
            tracing::warn!("{} leading chunks larger than the {}-token budget were skipped", skipped, token_budget);
        }

        ContextWindow::from_entries(entries, token_budget)
    }

    /// Like [`assemble`](Self::assemble), but reports a non-empty candidate
    /// set that yields an empty window as [`Error::BudgetExceeded`]
    pub fn assemble_checked(
        &self,
        scored_chunks: Vec<ScoredChunk>,
        token_budget: usize,
    ) -> Result<ContextWindow> {
        self.check_budget(&scored_chunks, token_budget)?;
        Ok(self.assemble(scored_chunks, token_budget))
    }

    /// Fails when `candidates` is non-empty and even the cheapest one is
    /// larger than `token_budget`
    pub fn check_budget<'a>(
        &self,
        candidates: impl IntoIterator<Item = &'a ScoredChunk>,
        token_budget: usize,
    ) -> Result<()> {
        match candidates.into_iter().map(|c| self.cost(c)).min() {
            Some(smallest) if smallest > token_budget => Err(Error::BudgetExceeded {
                budget: token_budget,
                smallest,
            }),
            _ => Ok(()),
        }
    }
}

impl Default for ContextAssembler {
    fn default() -> Self {
        Self::new(Arc::new(CharRatioEstimator::default()))
    }
}

/// Deduplicate by chunk ID (max score wins) and apply the deterministic order
fn merge_and_sort(scored_chunks: impl IntoIterator<Item = ScoredChunk>) -> Vec<ScoredChunk> {
    let mut merged: Vec<ScoredChunk> = Vec::new();
    let mut by_id: HashMap<String, usize> = HashMap::new();
    let mut doc_rank: HashMap<String, usize> = HashMap::new();

    for scored in scored_chunks {
        let next_rank = doc_rank.len();
        doc_rank.entry(scored.chunk.document_id.clone()).or_insert(next_rank);

        match by_id.get(&scored.chunk.id) {
            Some(&i) => {
                if scored.score > merged[i].score {
                    merged[i].score = scored.score;
                    merged[i].retrieved_for = scored.retrieved_for;
                }
            }
            None => {
                by_id.insert(scored.chunk.id.clone(), merged.len());
                merged.push(scored);
            }
        }
    }

    merged.sort_by(|a, b| {
        b.score
            .total_cmp(&a.score)
            .then_with(|| doc_rank[&a.chunk.document_id].cmp(&doc_rank[&b.chunk.document_id]))
            .then_with(|| page_order(a, b))
            .then_with(|| a.chunk.chunk_index.cmp(&b.chunk.chunk_index))
            .then_with(|| a.chunk.id.cmp(&b.chunk.id))
    });
    merged
}

fn page_order(a: &ScoredChunk, b: &ScoredChunk) -> Ordering {
    let a = a.chunk.page_number.unwrap_or(u32::MAX);
    let b = b.chunk.page_number.unwrap_or(u32::MAX);
    a.cmp(&b)
}
