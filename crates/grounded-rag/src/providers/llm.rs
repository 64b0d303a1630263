//! LLM provider trait for text generation

use async_trait::async_trait;
use futures::stream::{Stream, StreamExt};
use std::pin::Pin;

use crate::error::{Error, Result};

/// One item of a streamed generation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamItem {
    /// Next piece of generated text
    Fragment(String),
    /// Explicit end-of-stream marker
    End,
}

/// Lazy, ordered sequence of generated fragments
pub type FragmentStream = Pin<Box<dyn Stream<Item = Result<StreamItem>> + Send>>;

/// Output of a generation call
pub enum Generation {
    /// Complete text (non-streaming call)
    Text(String),
    /// Incremental fragments terminated by [`StreamItem::End`]
    Stream(FragmentStream),
}

impl std::fmt::Debug for Generation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Text(text) => f.debug_tuple("Text").field(text).finish(),
            Self::Stream(_) => f.write_str("Stream(..)"),
        }
    }
}

impl Generation {
    /// Collect the full text, draining the stream if needed
    pub async fn into_text(self) -> Result<String> {
        match self {
            Self::Text(text) => Ok(text),
            Self::Stream(mut stream) => {
                let mut text = String::new();
                while let Some(item) = stream.next().await {
                    match item? {
                        StreamItem::Fragment(fragment) => text.push_str(&fragment),
                        StreamItem::End => return Ok(text),
                    }
                }
                Err(Error::generation("stream ended without end-of-stream marker"))
            }
        }
    }
}

/// Trait for LLM-based text generation
///
/// Implementations:
/// - `OllamaClient`: Local Ollama server (llama3.2, phi3, etc.)
///
/// Failures are reported as [`crate::Error::Generation`]. When `stream` is
/// true an implementation may still return [`Generation::Text`]; callers
/// handle both shapes.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Generate text for a prompt
    async fn generate(&self, prompt: &str, stream: bool) -> Result<Generation>;

    /// Get provider name for logging
    fn name(&self) -> &str {
        "llm"
    }
}
