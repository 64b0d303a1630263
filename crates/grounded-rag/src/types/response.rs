//! Run results, citations and streamed events

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::chunk::ScoredChunk;
use super::query::{RunMode, SubQuestion};

/// Link from the generated answer to one context chunk
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Citation {
    /// Chunk ID (always present in the answer's context window)
    pub chunk_id: String,
    /// Document ID
    pub document_id: String,
    /// Source document name
    pub document_name: String,
    /// Page number (if applicable)
    pub page_number: Option<u32>,
    /// Short excerpt of the chunk text
    pub preview: String,
    /// Retrieval score of the chunk
    pub relevance_score: f32,
    /// 1-based source label of the chunk in the prompt
    pub source_label: usize,
}

impl Citation {
    /// Build a citation for a context chunk
    pub fn from_scored(scored: &ScoredChunk, source_label: usize, preview: String) -> Self {
        Self {
            chunk_id: scored.chunk.id.clone(),
            document_id: scored.chunk.document_id.clone(),
            document_name: scored.chunk.document_name.clone(),
            page_number: scored.chunk.page_number,
            preview,
            relevance_score: scored.score,
            source_label,
        }
    }

    /// Format citation for display in text
    pub fn format_inline(&self) -> String {
        match self.page_number {
            Some(page) => format!("[Source: {}, Page {}]", self.document_name, page),
            None => format!("[Source: {}]", self.document_name),
        }
    }
}

/// Orchestrator state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunState {
    Rewriting,
    Decomposing,
    Retrieving,
    Assembling,
    Generating,
    ExtractingCitations,
    Done,
    Failed,
}

impl RunState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }
}

impl std::fmt::Display for RunState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Rewriting => "REWRITING",
            Self::Decomposing => "DECOMPOSING",
            Self::Retrieving => "RETRIEVING",
            Self::Assembling => "ASSEMBLING",
            Self::Generating => "GENERATING",
            Self::ExtractingCitations => "EXTRACTING_CITATIONS",
            Self::Done => "DONE",
            Self::Failed => "FAILED",
        };
        f.write_str(name)
    }
}

/// Final output of a completed run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RagResult {
    /// Run identifier
    pub run_id: Uuid,
    /// Single-hop or multi-hop
    pub mode: RunMode,
    /// Generated answer (partial when `cancelled`)
    pub answer: String,
    /// Citations in order of first reference, unique by chunk
    pub citations: Vec<Citation>,
    /// Sub-questions with intermediate answers (multi-hop only)
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub sub_questions: Vec<SubQuestion>,
    /// Query text used for retrieval
    pub rewritten_query: String,
    /// States visited, in order
    pub stages: Vec<RunState>,
    /// Candidate chunks returned by retrieval (before assembly)
    pub chunks_retrieved: usize,
    /// Chunk IDs of the context window used for the final answer
    pub context_chunk_ids: Vec<String>,
    /// Estimated tokens of that window
    pub context_tokens: usize,
    /// Caller stopped generation early
    pub cancelled: bool,
    /// Run start time
    pub created_at: DateTime<Utc>,
    /// Wall time in milliseconds
    pub processing_time_ms: u64,
}

/// Failure report for a run that ended in FAILED
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunFailure {
    /// State the run was in when it failed
    pub state: RunState,
    /// Stable error identifier (see [`crate::Error::kind`])
    pub kind: String,
    /// Human-readable message
    pub message: String,
}

/// Item of the lazy event sequence produced by a run
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RagEvent {
    /// Incremental answer text
    Fragment { content: String },
    /// Terminal success event
    Final { result: RagResult },
    /// Terminal failure event
    Failed { failure: RunFailure },
}

impl RagEvent {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Fragment { .. })
    }
}
