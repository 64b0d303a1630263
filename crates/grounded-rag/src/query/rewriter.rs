//! Query rewriting for retrieval

use once_cell::sync::Lazy;
use regex::Regex;
use std::sync::Arc;

use crate::config::RewriteConfig;
use crate::error::{Port, Result};
use crate::generation::PromptBuilder;
use crate::providers::{LlmProvider, RetryPolicy};
use crate::types::{Query, RewrittenQuery, Turn};

static LABEL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^(?:rewritten\s+query|search\s+query|query)\s*:\s*").expect("Invalid regex")
});

/// Rewrites longer than this are treated as rambling model output
const MAX_REWRITE_CHARS: usize = 1000;

/// Reformulates the user query into a self-contained search query
#[derive(Clone)]
pub struct QueryRewriter {
    llm: Arc<dyn LlmProvider>,
    retry: RetryPolicy,
    config: RewriteConfig,
}

impl QueryRewriter {
    pub fn new(llm: Arc<dyn LlmProvider>, retry: RetryPolicy, config: RewriteConfig) -> Self {
        Self { llm, retry, config }
    }

    /// Rewrite `query` against the conversation; never fails
    ///
    /// Makes exactly one generation call. Any failure, timeout or unusable
    /// output falls back to the original query text.
    pub async fn rewrite(&self, query: &Query, history: &[Turn]) -> RewrittenQuery {
        if !self.config.enabled || query.is_empty() {
            return RewrittenQuery::passthrough(query.clone());
        }

        let recent = &history[history.len().saturating_sub(self.config.history_turns)..];
        let prompt = PromptBuilder::build_rewrite_prompt(query.as_str(), recent);

        match self.generate(&prompt).await {
            Ok(raw) => match clean_rewrite(&raw) {
                Some(text) => {
                    tracing::info!("Rewrote query \"{}\" -> \"{}\"", query, text);
                    RewrittenQuery {
                        text,
                        source: query.clone(),
                        fell_back: false,
                    }
                }
                None => {
                    tracing::warn!("Rewriter returned unusable output, using original query");
                    RewrittenQuery::passthrough(query.clone())
                }
            },
            Err(e) => {
                tracing::warn!("Query rewriting failed, using original query: {}", e);
                RewrittenQuery::passthrough(query.clone())
            }
        }
    }

    async fn generate(&self, prompt: &str) -> Result<String> {
        let llm = &self.llm;
        self.retry
            .once(Port::Generation, move || async move {
                llm.generate(prompt, false).await?.into_text().await
            })
            .await
    }
}

/// First meaningful line of the model output, without labels or quotes
fn clean_rewrite(raw: &str) -> Option<String> {
    let line = raw.lines().map(str::trim).find(|l| !l.is_empty())?;
    let line = LABEL.replace(line, "");
    let text = line
        .trim()
        .trim_matches(|c| c == '"' || c == '\'' || c == '`')
        .trim();

    if text.is_empty() || text.chars().count() > MAX_REWRITE_CHARS {
        return None;
    }
    if !text.chars().any(char::is_alphanumeric) {
        return None;
    }
    Some(text.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::testing::ScriptedLlm;

    fn rewriter(llm: Arc<ScriptedLlm>) -> QueryRewriter {
        QueryRewriter::new(llm, RetryPolicy::default(), RewriteConfig::default())
    }

    #[tokio::test]
    async fn test_rewrite_resolves_with_history() {
        let llm = Arc::new(ScriptedLlm::replying("Rewritten query: \"side effects of metformin\"\n"));
        let history = vec![Turn::user("Tell me about metformin"), Turn::assistant("It treats diabetes.")];

        let rewritten = rewriter(llm.clone())
            .rewrite(&Query::new("What are its side effects?"), &history)
            .await;

        assert_eq!(rewritten.text, "side effects of metformin");
        assert!(!rewritten.fell_back);
        assert_eq!(llm.calls(), 1);
        assert!(llm.prompts()[0].contains("User: Tell me about metformin"));
    }

    #[tokio::test]
    async fn test_failure_falls_back_without_retry() {
        let llm = Arc::new(ScriptedLlm::new(vec![
            Err(Error::transient(Port::Generation, "rate limited")),
            Ok("never used".to_string()),
        ]));

        let rewritten = rewriter(llm.clone()).rewrite(&Query::new("symptoms of anemia"), &[]).await;

        assert_eq!(rewritten.text, "symptoms of anemia");
        assert!(rewritten.fell_back);
        assert_eq!(llm.calls(), 1);
    }

    #[tokio::test]
    async fn test_degenerate_output_falls_back() {
        for output in ["", "   \n  ", "\"\"", "..."] {
            let llm = Arc::new(ScriptedLlm::replying(output));
            let rewritten = rewriter(llm).rewrite(&Query::new("what is insulin"), &[]).await;
            assert_eq!(rewritten.text, "what is insulin", "output {:?}", output);
        }
    }

    #[tokio::test]
    async fn test_history_is_limited_to_recent_turns() {
        let llm = Arc::new(ScriptedLlm::replying("recent question"));
        let config = RewriteConfig {
            enabled: true,
            history_turns: 1,
        };
        let history = vec![Turn::user("old topic"), Turn::assistant("latest reply")];

        QueryRewriter::new(llm.clone(), RetryPolicy::default(), config)
            .rewrite(&Query::new("and then?"), &history)
            .await;

        let prompt = &llm.prompts()[0];
        assert!(!prompt.contains("old topic"));
        assert!(prompt.contains("Assistant: latest reply"));
    }
}
