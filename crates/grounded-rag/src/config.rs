//! Configuration for the RAG pipeline

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::{Error, Result};

/// Main RAG pipeline configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RagConfig {
    /// Retrieval configuration
    pub retrieval: RetrievalConfig,
    /// Context window configuration
    pub context: ContextConfig,
    /// Multi-hop configuration
    pub multi_hop: MultiHopConfig,
    /// Query rewriting configuration
    pub rewrite: RewriteConfig,
    /// Citation extraction configuration
    pub citation: CitationConfig,
    /// Retry and timeout policy for port calls
    pub retry: RetryConfig,
    /// Ollama/LLM configuration
    pub llm: LlmConfig,
}

impl RagConfig {
    /// Parse a TOML document; missing sections fall back to defaults
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&raw)
    }

    /// Reject values the pipeline cannot run with
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.citation.min_overlap) {
            return Err(Error::config("citation.min_overlap must be within [0, 1]"));
        }
        if self.context.chars_per_token == 0 {
            return Err(Error::config("context.chars_per_token must be at least 1"));
        }
        if self.multi_hop.max_subquestions == 0 {
            return Err(Error::config("multi_hop.max_subquestions must be at least 1"));
        }
        if self.retry.timeout_secs == 0 {
            return Err(Error::config("retry.timeout_secs must be at least 1"));
        }
        if self.retry.base_delay_ms > self.retry.max_delay_ms {
            return Err(Error::config("retry.base_delay_ms exceeds retry.max_delay_ms"));
        }
        Ok(())
    }
}

/// Vector retrieval configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    /// Number of nearest chunks requested per query
    pub top_k: usize,
    /// Results scoring below this are discarded
    pub score_threshold: f32,
    /// Vector store namespace (e.g. per-user partition)
    pub namespace: Option<String>,
    /// Issue per-hop retrievals concurrently in multi-hop runs
    pub parallel_hop_retrieval: bool,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: 5,
            score_threshold: 0.5,
            namespace: None,
            parallel_hop_retrieval: true,
        }
    }
}

/// Context window configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextConfig {
    /// Total token budget for the final context window
    pub token_budget: usize,
    /// Characters per token for the length-based estimator
    pub chars_per_token: usize,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            token_budget: 3000,
            chars_per_token: 4,
        }
    }
}

/// Multi-hop decomposition configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MultiHopConfig {
    /// Upper bound on sub-questions (and therefore hops)
    pub max_subquestions: usize,
}

impl Default for MultiHopConfig {
    fn default() -> Self {
        Self { max_subquestions: 3 }
    }
}

/// Query rewriting configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RewriteConfig {
    /// When false the original query is used for retrieval as-is
    pub enabled: bool,
    /// Number of most recent conversation turns shown to the rewriter
    pub history_turns: usize,
}

impl Default for RewriteConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            history_turns: 6,
        }
    }
}

/// Citation extraction configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CitationConfig {
    /// Minimum fraction of a sentence's terms found in a chunk
    pub min_overlap: f32,
    /// Sentences with fewer content terms are not attributed
    pub min_sentence_terms: usize,
    /// Length of the citation preview in characters
    pub preview_chars: usize,
}

impl Default for CitationConfig {
    fn default() -> Self {
        Self {
            min_overlap: 0.5,
            min_sentence_terms: 3,
            preview_chars: 150,
        }
    }
}

/// Retry policy for external port calls
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Retries after the first attempt
    pub max_retries: u32,
    /// Delay before the first retry, doubled on each further retry
    pub base_delay_ms: u64,
    /// Upper bound on a single backoff delay
    pub max_delay_ms: u64,
    /// Deadline for a single port call
    pub timeout_secs: u64,
}

impl RetryConfig {
    /// Per-call deadline
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_delay_ms: 500,
            max_delay_ms: 8000,
            timeout_secs: 60,
        }
    }
}

/// LLM (Ollama) configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// Ollama base URL
    pub base_url: String,
    /// Embedding model name
    pub embed_model: String,
    /// Generation model name
    pub generate_model: String,
    /// Temperature for generation
    pub temperature: f32,
    /// HTTP timeout in seconds: whole request when not streaming, connect
    /// only when streaming
    pub timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:11434".to_string(),
            embed_model: "nomic-embed-text".to_string(),
            generate_model: "llama3.2:3b".to_string(),
            temperature: 0.3,
            timeout_secs: 120,
        }
    }
}
