//! Scripted providers for unit tests

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;

use crate::error::{Error, Result};
use crate::providers::{Generation, LlmProvider};

/// LLM that replays queued responses and records prompts
#[derive(Default)]
pub struct ScriptedLlm {
    responses: Mutex<VecDeque<Result<String>>>,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedLlm {
    pub fn new(responses: Vec<Result<String>>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn replying(text: &str) -> Self {
        Self::new(vec![Ok(text.to_string())])
    }

    pub fn calls(&self) -> usize {
        self.prompts.lock().len()
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().clone()
    }
}

#[async_trait]
impl LlmProvider for ScriptedLlm {
    async fn generate(&self, prompt: &str, _stream: bool) -> Result<Generation> {
        self.prompts.lock().push(prompt.to_string());
        let next = self
            .responses
            .lock()
            .pop_front()
            .unwrap_or_else(|| Err(Error::generation("script exhausted")));
        next.map(Generation::Text)
    }
}
