//! Error types for the RAG orchestration pipeline

use std::time::Duration;
use thiserror::Error;

/// Result type alias for RAG operations
pub type Result<T> = std::result::Result<T, Error>;

/// External capability a failure originated from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Port {
    /// Text embedding provider
    Embedding,
    /// Nearest-neighbour chunk store
    VectorStore,
    /// LLM text generation
    Generation,
}

impl Port {
    /// Short name for logging
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Embedding => "embedding",
            Self::VectorStore => "vector_store",
            Self::Generation => "generation",
        }
    }
}

/// RAG system errors
#[derive(Debug, Error)]
pub enum Error {
    /// Embedding provider failed
    #[error("Embedding generation failed: {message}")]
    Embedding { message: String, transient: bool },

    /// Vector store lookup failed
    #[error("Vector retrieval failed: {message}")]
    Retrieval { message: String, transient: bool },

    /// LLM generation failed
    #[error("LLM generation failed: {message}")]
    Generation { message: String, transient: bool },

    /// Decomposer output could not be parsed into sub-questions
    #[error("Query decomposition failed: {0}")]
    Decomposition(String),

    /// No candidate chunk fits into the token budget
    #[error("Token budget of {budget} is smaller than the cheapest candidate chunk ({smallest} tokens)")]
    BudgetExceeded { budget: usize, smallest: usize },

    /// Request rejected before any port was called
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// TOML config parse error
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    /// HTTP request error
    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a permanent embedding error
    pub fn embedding(message: impl Into<String>) -> Self {
        Self::Embedding {
            message: message.into(),
            transient: false,
        }
    }

    /// Create a permanent retrieval error
    pub fn retrieval(message: impl Into<String>) -> Self {
        Self::Retrieval {
            message: message.into(),
            transient: false,
        }
    }

    /// Create a permanent generation error
    pub fn generation(message: impl Into<String>) -> Self {
        Self::Generation {
            message: message.into(),
            transient: false,
        }
    }

    /// Create a retryable error attributed to `port`
    pub fn transient(port: Port, message: impl Into<String>) -> Self {
        let message = message.into();
        match port {
            Port::Embedding => Self::Embedding { message, transient: true },
            Port::VectorStore => Self::Retrieval { message, transient: true },
            Port::Generation => Self::Generation { message, transient: true },
        }
    }

    /// A port call that exceeded its deadline
    pub fn timeout(port: Port, after: Duration) -> Self {
        Self::transient(port, format!("{} call timed out after {:?}", port.as_str(), after))
    }

    /// Map a transport error onto a port, keeping retryability
    pub fn from_http(port: Port, err: reqwest::Error) -> Self {
        let transient = err.is_timeout()
            || err.is_connect()
            || err
                .status()
                .map(|s| s.as_u16() == 429 || s.is_server_error())
                .unwrap_or(false);
        let message = err.to_string();
        match port {
            Port::Embedding => Self::Embedding { message, transient },
            Port::VectorStore => Self::Retrieval { message, transient },
            Port::Generation => Self::Generation { message, transient },
        }
    }

    /// Attribute an error to `port` unless it already names one
    pub fn for_port(self, port: Port) -> Self {
        match self {
            Self::Embedding { .. } | Self::Retrieval { .. } | Self::Generation { .. } => self,
            other => {
                let transient = other.is_transient();
                let message = other.to_string();
                match port {
                    Port::Embedding => Self::Embedding { message, transient },
                    Port::VectorStore => Self::Retrieval { message, transient },
                    Port::Generation => Self::Generation { message, transient },
                }
            }
        }
    }

    /// Create a decomposition error
    pub fn decomposition(message: impl Into<String>) -> Self {
        Self::Decomposition(message.into())
    }

    /// Create an invalid request error
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::InvalidRequest(message.into())
    }

    /// Create a config error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Whether retrying the same call may succeed
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Embedding { transient, .. }
            | Self::Retrieval { transient, .. }
            | Self::Generation { transient, .. } => *transient,
            Self::Http(err) => err.is_timeout() || err.is_connect(),
            _ => false,
        }
    }

    /// Stable identifier for rendering failures outside the crate
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Embedding { .. } => "embedding_error",
            Self::Retrieval { .. } => "retrieval_error",
            Self::Generation { .. } => "generation_error",
            Self::Decomposition(_) => "decomposition_error",
            Self::BudgetExceeded { .. } => "budget_exceeded",
            Self::InvalidRequest(_) => "invalid_request",
            Self::Config(_) => "config_error",
            Self::Io(_) => "io_error",
            Self::Toml(_) => "toml_error",
            Self::Http(_) => "http_error",
            Self::Internal(_) => "internal_error",
        }
    }
}
