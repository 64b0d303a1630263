//! Deterministic providers shared by the integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use grounded_rag::error::{Error, Port, Result};
use grounded_rag::providers::{EmbeddingProvider, Generation, LlmProvider, StreamItem, VectorMatch, VectorStoreProvider};
use grounded_rag::{Chunk, RagConfig, RagEvent, RagRun};

const VOCABULARY: &[&str] = &[
    "diabetes", "insulin", "glucose", "pancreas", "thirst", "urination", "metformin", "kidney",
    "anemia", "iron",
];

/// Bag-of-words embedding over a small fixed vocabulary
pub struct KeywordEmbedder;

#[async_trait]
impl EmbeddingProvider for KeywordEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let lower = text.to_lowercase();
        Ok(VOCABULARY
            .iter()
            .map(|word| lower.matches(word).count() as f32)
            .collect())
    }

    fn name(&self) -> &str {
        "keyword"
    }
}

/// Store that returns the same scored chunks for every query
pub struct StaticStore {
    matches: Vec<(Chunk, f32)>,
    queries: AtomicUsize,
}

impl StaticStore {
    pub fn new(matches: Vec<(Chunk, f32)>) -> Self {
        Self {
            matches,
            queries: AtomicUsize::new(0),
        }
    }

    pub fn queries(&self) -> usize {
        self.queries.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl VectorStoreProvider for StaticStore {
    async fn query(&self, _vector: &[f32], top_k: usize, _namespace: Option<&str>) -> Result<Vec<VectorMatch>> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .matches
            .iter()
            .take(top_k)
            .map(|(chunk, score)| VectorMatch {
                chunk: chunk.clone(),
                score: *score,
            })
            .collect())
    }
}

/// What the scripted LLM does on its next call
pub enum Step {
    /// Complete text
    Reply(String),
    /// Fragments followed by the end marker
    Stream(Vec<String>),
    /// Fragments, then nothing ever again
    Endless(Vec<String>),
    /// Fragments, then a connection error
    BrokenStream(Vec<String>),
    /// Never answers within any sane timeout
    Hang,
    /// Immediate error
    Fail(Error),
}

pub fn reply(text: &str) -> Step {
    Step::Reply(text.to_string())
}

pub fn streamed(fragments: &[&str]) -> Step {
    Step::Stream(fragments.iter().map(|f| f.to_string()).collect())
}

#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub prompt: String,
    pub stream: bool,
}

/// LLM that replays a script and records every call
pub struct ScriptedLlm {
    steps: Mutex<VecDeque<Step>>,
    calls: Mutex<Vec<RecordedCall>>,
}

impl ScriptedLlm {
    pub fn new(steps: Vec<Step>) -> Self {
        Self {
            steps: Mutex::new(steps.into()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().clone()
    }

    pub fn prompts(&self) -> Vec<String> {
        self.calls().into_iter().map(|c| c.prompt).collect()
    }
}

fn fragments(items: Vec<String>) -> Vec<Result<StreamItem>> {
    items.into_iter().map(|f| Ok(StreamItem::Fragment(f))).collect()
}

#[async_trait]
impl LlmProvider for ScriptedLlm {
    async fn generate(&self, prompt: &str, stream: bool) -> Result<Generation> {
        self.calls.lock().push(RecordedCall {
            prompt: prompt.to_string(),
            stream,
        });
        let step = self.steps.lock().pop_front();

        match step {
            Some(Step::Reply(text)) => Ok(Generation::Text(text)),
            Some(Step::Stream(items)) => {
                let mut items = fragments(items);
                items.push(Ok(StreamItem::End));
                Ok(Generation::Stream(Box::pin(stream::iter(items))))
            }
            Some(Step::Endless(items)) => Ok(Generation::Stream(Box::pin(
                stream::iter(fragments(items)).chain(stream::pending()),
            ))),
            Some(Step::BrokenStream(items)) => {
                let mut items = fragments(items);
                items.push(Err(Error::transient(Port::Generation, "connection reset")));
                Ok(Generation::Stream(Box::pin(stream::iter(items))))
            }
            Some(Step::Hang) => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Err(Error::generation("hung call returned"))
            }
            Some(Step::Fail(e)) => Err(e),
            None => Err(Error::generation("script exhausted")),
        }
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

pub fn chunk(id: &str, document: &str, index: u32, content: &str) -> Chunk {
    Chunk::new(id, document, format!("{}.pdf", document), index, content)
}

/// Defaults with rewriting off, so scripts only cover the answer path
pub fn config_without_rewrite() -> RagConfig {
    let mut config = RagConfig::default();
    config.rewrite.enabled = false;
    config
}

/// Fragments in order, then the terminal event
pub async fn drain(mut run: RagRun) -> (Vec<String>, RagEvent) {
    let mut fragments = Vec::new();
    let mut events = Vec::new();
    while let Some(event) = run.next().await {
        if event.is_terminal() {
            events.push(event);
            continue;
        }
        assert!(events.is_empty(), "fragment after terminal event");
        if let RagEvent::Fragment { content } = event {
            fragments.push(content);
        }
    }
    assert_eq!(events.len(), 1, "expected exactly one terminal event");
    (fragments, events.remove(0))
}
