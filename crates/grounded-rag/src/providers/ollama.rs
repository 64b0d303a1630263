//! Ollama HTTP client implementing the embedding and generation ports
//!
//! Retries and per-call deadlines are applied by the pipeline
//! ([`super::RetryPolicy`]); this client only classifies failures as
//! transient (connect errors, timeouts, HTTP 429/5xx) or permanent.

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{self, BoxStream, StreamExt};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::time::Duration;

use crate::config::LlmConfig;
use crate::error::{Error, Port, Result};

use super::embedding::EmbeddingProvider;
use super::llm::{Generation, LlmProvider, StreamItem};

/// Ollama API client
#[derive(Clone)]
pub struct OllamaClient {
    /// HTTP client
    client: Client,
    /// Configuration
    config: LlmConfig,
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    options: GenerateOptions,
}

#[derive(Serialize)]
struct GenerateOptions {
    temperature: f32,
}

#[derive(Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    response: String,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    prompt: &'a str,
}

#[derive(Deserialize)]
struct EmbedResponse {
    embedding: Vec<f32>,
}

impl OllamaClient {
    /// Create a new Ollama client
    pub fn new(config: &LlmConfig) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(config.timeout_secs))
            .pool_max_idle_per_host(5)
            .build()?;

        Ok(Self {
            client,
            config: config.clone(),
        })
    }

    /// Deadline for a whole request, body included
    ///
    /// Streamed bodies get none: the pipeline bounds the wait for each
    /// fragment instead, so long answers are not cut off.
    fn request_timeout(&self, stream: bool) -> Option<Duration> {
        (!stream).then(|| Duration::from_secs(self.config.timeout_secs))
    }

    /// Check if Ollama is available
    pub async fn health_check(&self) -> bool {
        let url = format!("{}/api/tags", self.config.base_url);
        let mut request = self.client.get(&url);
        if let Some(timeout) = self.request_timeout(false) {
            request = request.timeout(timeout);
        }

        match request.send().await {
            Ok(response) => response.status().is_success(),
            Err(_) => false,
        }
    }

    async fn post_generate(&self, prompt: &str, stream: bool) -> Result<reqwest::Response> {
        let url = format!("{}/api/generate", self.config.base_url);
        let request = GenerateRequest {
            model: &self.config.generate_model,
            prompt,
            stream,
            options: GenerateOptions {
                temperature: self.config.temperature,
            },
        };

        let mut builder = self.client.post(&url).json(&request);
        if let Some(timeout) = self.request_timeout(stream) {
            builder = builder.timeout(timeout);
        }

        builder
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| Error::from_http(Port::Generation, e))
    }
}

#[async_trait]
impl EmbeddingProvider for OllamaClient {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let url = format!("{}/api/embeddings", self.config.base_url);
        let request = EmbedRequest {
            model: &self.config.embed_model,
            prompt: text,
        };

        let mut builder = self.client.post(&url).json(&request);
        if let Some(timeout) = self.request_timeout(false) {
            builder = builder.timeout(timeout);
        }

        let response: EmbedResponse = builder
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| Error::from_http(Port::Embedding, e))?
            .json()
            .await
            .map_err(|e| Error::embedding(format!("Failed to parse embedding response: {}", e)))?;

        if response.embedding.is_empty() {
            return Err(Error::embedding("Ollama returned an empty embedding"));
        }

        Ok(response.embedding)
    }

    fn name(&self) -> &str {
        "ollama"
    }
}

#[async_trait]
impl LlmProvider for OllamaClient {
    async fn generate(&self, prompt: &str, stream: bool) -> Result<Generation> {
        tracing::debug!(
            "Generating with model {} (stream: {})",
            self.config.generate_model,
            stream
        );

        let response = self.post_generate(prompt, stream).await?;

        if !stream {
            let body: GenerateResponse = response
                .json()
                .await
                .map_err(|e| Error::generation(format!("Failed to parse generation response: {}", e)))?;
            if let Some(message) = body.error {
                return Err(Error::generation(message));
            }
            return Ok(Generation::Text(body.response));
        }

        Ok(Generation::Stream(ndjson_fragments(response.bytes_stream().boxed())))
    }

    fn name(&self) -> &str {
        "ollama"
    }
}

struct NdjsonState {
    body: BoxStream<'static, reqwest::Result<Bytes>>,
    buffer: Vec<u8>,
    pending: VecDeque<Result<StreamItem>>,
    finished: bool,
}

/// Turn Ollama's newline-delimited JSON body into fragments
fn ndjson_fragments(
    body: BoxStream<'static, reqwest::Result<Bytes>>,
) -> super::llm::FragmentStream {
    let state = NdjsonState {
        body,
        buffer: Vec::new(),
        pending: VecDeque::new(),
        finished: false,
    };

    Box::pin(stream::unfold(state, |mut st| async move {
        loop {
            if let Some(item) = st.pending.pop_front() {
                if matches!(item, Ok(StreamItem::End) | Err(_)) {
                    st.pending.clear();
                    st.finished = true;
                }
                return Some((item, st));
            }
            if st.finished {
                return None;
            }

            match st.body.next().await {
                Some(Ok(bytes)) => {
                    st.buffer.extend_from_slice(&bytes);
                    while let Some(pos) = st.buffer.iter().position(|b| *b == b'\n') {
                        let line: Vec<u8> = st.buffer.drain(..=pos).collect();
                        if let Err(e) = parse_line(&line, &mut st.pending) {
                            st.pending.push_back(Err(e));
                            break;
                        }
                    }
                }
                Some(Err(e)) => {
                    st.finished = true;
                    return Some((Err(Error::from_http(Port::Generation, e)), st));
                }
                None => {
                    st.finished = true;
                    let rest = std::mem::take(&mut st.buffer);
                    if let Err(e) = parse_line(&rest, &mut st.pending) {
                        st.pending.push_back(Err(e));
                    }
                }
            }
        }
    }))
}

fn parse_line(line: &[u8], pending: &mut VecDeque<Result<StreamItem>>) -> Result<()> {
    let line = String::from_utf8_lossy(line);
    let line = line.trim();
    if line.is_empty() {
        return Ok(());
    }

    let chunk: GenerateResponse = serde_json::from_str(line)
        .map_err(|e| Error::generation(format!("Malformed stream line: {}", e)))?;

    if let Some(message) = chunk.error {
        return Err(Error::generation(message));
    }
    if !chunk.response.is_empty() {
        pending.push_back(Ok(StreamItem::Fragment(chunk.response)));
    }
    if chunk.done {
        pending.push_back(Ok(StreamItem::End));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn body(parts: &[&'static str]) -> BoxStream<'static, reqwest::Result<Bytes>> {
        let parts: Vec<reqwest::Result<Bytes>> =
            parts.iter().copied().map(|p| Ok(Bytes::from_static(p.as_bytes()))).collect();
        stream::iter(parts).boxed()
    }

    #[test]
    fn test_streamed_requests_have_no_body_deadline() {
        let client = OllamaClient::new(&LlmConfig::default()).unwrap();

        assert_eq!(client.request_timeout(false), Some(Duration::from_secs(120)));
        assert_eq!(client.request_timeout(true), None);
    }

    #[tokio::test]
    async fn test_ndjson_lines_split_across_chunks() {
        let stream = ndjson_fragments(body(&[
            "{\"response\":\"Type 2 \",\"done\":false}\n{\"resp",
            "onse\":\"diabetes\",\"done\":false}\n",
            "{\"response\":\"\",\"done\":true}\n",
        ]));

        let items: Vec<StreamItem> = stream.map(|r| r.unwrap()).collect().await;
        assert_eq!(
            items,
            vec![
                StreamItem::Fragment("Type 2 ".to_string()),
                StreamItem::Fragment("diabetes".to_string()),
                StreamItem::End,
            ]
        );
    }

    #[tokio::test]
    async fn test_missing_done_yields_no_end_marker() {
        let stream = ndjson_fragments(body(&["{\"response\":\"cut\",\"done\":false}"]));
        let generation = Generation::Stream(stream);
        assert!(generation.into_text().await.is_err());
    }

    #[tokio::test]
    async fn test_error_line_surfaces_generation_error() {
        let mut stream = ndjson_fragments(body(&["{\"error\":\"model not found\"}\n"]));
        let first = stream.next().await.unwrap();
        assert!(matches!(first, Err(Error::Generation { .. })));
        assert!(stream.next().await.is_none());
    }
}
