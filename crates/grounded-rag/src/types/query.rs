//! Query, conversation and run request types

use serde::{Deserialize, Serialize};

use crate::config::RagConfig;

/// Raw user question, fixed for the lifetime of one run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Query {
    text: String,
}

impl Query {
    /// Create a query from user input (surrounding whitespace is dropped)
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into().trim().to_string(),
        }
    }

    /// Query text
    pub fn as_str(&self) -> &str {
        &self.text
    }

    /// True when the query has no content
    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }
}

impl std::fmt::Display for Query {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.text)
    }
}

/// Speaker of a conversation turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// One prior message in the conversation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub content: String,
}

impl Turn {
    /// A user message
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    /// An assistant message
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Retrieval-oriented restatement of a [`Query`]; never shown to the user
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RewrittenQuery {
    /// Text used for retrieval
    pub text: String,
    /// The query this was derived from
    pub source: Query,
    /// True when rewriting failed and `text` is the original query
    pub fell_back: bool,
}

impl RewrittenQuery {
    /// Use the original query unchanged
    pub fn passthrough(source: Query) -> Self {
        Self {
            text: source.as_str().to_string(),
            source,
            fell_back: true,
        }
    }
}

/// One step of a multi-hop decomposition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubQuestion {
    /// Execution order, 0-based
    pub index: usize,
    /// Sub-question text
    pub text: String,
    /// Intermediate answer, set once the hop has been generated
    #[serde(skip_serializing_if = "Option::is_none")]
    pub answer: Option<String>,
}

impl SubQuestion {
    pub fn new(index: usize, text: impl Into<String>) -> Self {
        Self {
            index,
            text: text.into(),
            answer: None,
        }
    }
}

/// Orchestration strategy for a run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    #[default]
    SingleHop,
    MultiHop,
}

impl RunMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SingleHop => "single_hop",
            Self::MultiHop => "multi_hop",
        }
    }
}

/// Per-run tuning knobs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunOptions {
    /// Nearest chunks requested per retrieval
    pub top_k: usize,
    /// Token budget of the final context window
    pub token_budget: usize,
    /// Hop limit for multi-hop runs
    pub max_subquestions: usize,
    /// Minimum similarity kept from the vector store
    pub score_threshold: f32,
}

impl RunOptions {
    /// Defaults taken from the pipeline configuration
    pub fn from_config(config: &RagConfig) -> Self {
        Self {
            top_k: config.retrieval.top_k,
            token_budget: config.context.token_budget,
            max_subquestions: config.multi_hop.max_subquestions,
            score_threshold: config.retrieval.score_threshold,
        }
    }
}

impl Default for RunOptions {
    fn default() -> Self {
        Self::from_config(&RagConfig::default())
    }
}

/// Input of one orchestration run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RagRequest {
    /// The user's question
    pub query: String,
    /// Prior turns, oldest first
    #[serde(default)]
    pub history: Vec<Turn>,
    /// Single-hop or multi-hop
    #[serde(default)]
    pub mode: RunMode,
    /// Retrieval and budget options
    #[serde(default)]
    pub options: RunOptions,
    /// Emit the answer as incremental fragments
    #[serde(default = "default_stream")]
    pub stream: bool,
}

fn default_stream() -> bool {
    true
}

impl RagRequest {
    /// Create a streaming single-hop request with default options
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            history: Vec::new(),
            mode: RunMode::SingleHop,
            options: RunOptions::default(),
            stream: true,
        }
    }

    /// Attach conversation history
    pub fn with_history(mut self, history: Vec<Turn>) -> Self {
        self.history = history;
        self
    }

    /// Switch to multi-hop mode
    pub fn multi_hop(mut self) -> Self {
        self.mode = RunMode::MultiHop;
        self
    }

    /// Replace run options
    pub fn with_options(mut self, options: RunOptions) -> Self {
        self.options = options;
        self
    }

    /// Return the answer in one piece instead of fragments
    pub fn without_streaming(mut self) -> Self {
        self.stream = false;
        self
    }
}
