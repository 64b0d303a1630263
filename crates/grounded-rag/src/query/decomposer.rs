//! Multi-hop question decomposition
//!
//! The model is asked for a JSON array of sub-questions, but real models
//! answer in several shapes. Accepted outputs:
//! - `["q1", "q2"]`, optionally inside a fenced code block
//! - `{"sub_questions": ["q1", "q2"]}`
//! - `MULTI_HOP: ["q1", "q2"]`
//! - `DIRECT: <reason>`, meaning the question needs no decomposition
//! - a numbered or bulleted list, one sub-question per line

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use std::sync::Arc;

use crate::error::{Error, Port, Result};
use crate::generation::PromptBuilder;
use crate::providers::{LlmProvider, RetryPolicy};
use crate::types::{RewrittenQuery, SubQuestion};

static LIST_ITEM: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*(?:\d+[.)]|[-*•])\s+(.+?)\s*$").expect("Invalid regex"));

static CODE_FENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)```(?:json)?\s*(.*?)\s*```").expect("Invalid regex"));

/// Parsed decomposer verdict
#[derive(Debug, PartialEq)]
enum Plan {
    Direct,
    Steps(Vec<String>),
}

/// Splits a complex question into ordered, sequentially answerable parts
#[derive(Clone)]
pub struct QueryDecomposer {
    llm: Arc<dyn LlmProvider>,
    retry: RetryPolicy,
}

impl QueryDecomposer {
    pub fn new(llm: Arc<dyn LlmProvider>, retry: RetryPolicy) -> Self {
        Self { llm, retry }
    }

    /// Between 1 and `max_subquestions` sub-questions, in execution order
    ///
    /// One generation call. Malformed or failed output degrades to a single
    /// sub-question equal to the rewritten query.
    pub async fn decompose(&self, query: &RewrittenQuery, max_subquestions: usize) -> Vec<SubQuestion> {
        let max = max_subquestions.max(1);
        let prompt = PromptBuilder::build_decompose_prompt(&query.text, max);

        let steps = match self.generate(&prompt).await.and_then(|raw| parse_plan(&raw)) {
            Ok(Plan::Steps(mut steps)) => {
                if steps.len() > max {
                    tracing::warn!(
                        "Decomposer returned {} sub-questions, keeping the first {}",
                        steps.len(),
                        max
                    );
                    steps.truncate(max);
                }
                steps
            }
            Ok(Plan::Direct) => {
                tracing::debug!("Decomposer judged the question answerable directly");
                vec![query.text.clone()]
            }
            Err(e) => {
                tracing::warn!("Decomposition degraded to a single hop: {}", e);
                vec![query.text.clone()]
            }
        };

        let sub_questions: Vec<SubQuestion> = steps
            .into_iter()
            .enumerate()
            .map(|(index, text)| SubQuestion::new(index, text))
            .collect();

        tracing::info!("Decomposed into {} sub-questions", sub_questions.len());
        sub_questions
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

fn parse_plan(raw: &str) -> Result<Plan> {
    let mut text = raw.trim();
    if let Some(fenced) = CODE_FENCE.captures(text).and_then(|c| c.get(1)) {
        text = fenced.as_str().trim();
    }

    if starts_with_ignore_case(text, "DIRECT") {
        return Ok(Plan::Direct);
    }
    if starts_with_ignore_case(text, "MULTI_HOP") {
        text = text["MULTI_HOP".len()..].trim_start_matches(':').trim();
    }

    let steps = parse_json(text).unwrap_or_else(|| parse_list(text));
    let steps: Vec<String> = steps
        .into_iter()
        .map(|s| s.trim().to_string())
        .filter(|s| s.chars().any(char::is_alphanumeric))
        .collect();

    if steps.is_empty() {
        return Err(Error::decomposition(format!(
            "no sub-questions in model output: {:?}",
            truncate(raw, 120)
        )));
    }
    Ok(Plan::Steps(steps))
}

/// A JSON array of strings, or an object holding one
fn parse_json(text: &str) -> Option<Vec<String>> {
    let start = text.find(['[', '{'])?;
    let end = text.rfind([']', '}'])?;
    if end < start {
        return None;
    }

    let value: Value = serde_json::from_str(&text[start..=end]).ok()?;
    let items = match value {
        Value::Array(items) => items,
        Value::Object(mut map) => match ["sub_questions", "subquestions", "questions"]
            .iter()
            .find_map(|key| map.remove(*key))
        {
            Some(Value::Array(items)) => items,
            _ => return None,
        },
        _ => return None,
    };

    Some(
        items
            .into_iter()
            .filter_map(|item| match item {
                Value::String(s) => Some(s),
                Value::Object(mut obj) => match obj.remove("question") {
                    Some(Value::String(s)) => Some(s),
                    _ => None,
                },
                _ => None,
            })
            .collect(),
    )
}

fn parse_list(text: &str) -> Vec<String> {
    text.lines()
        .filter_map(|line| LIST_ITEM.captures(line))
        .filter_map(|c| c.get(1).map(|m| m.as_str().to_string()))
        .collect()
}

fn starts_with_ignore_case(text: &str, prefix: &str) -> bool {
    text.get(..prefix.len())
        .map(|head| head.eq_ignore_ascii_case(prefix))
        .unwrap_or(false)
}

fn truncate(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedLlm;
    use crate::types::Query;

    fn rewritten(text: &str) -> RewrittenQuery {
        RewrittenQuery::passthrough(Query::new(text))
    }

    async fn decompose_with(output: &str, max: usize) -> Vec<SubQuestion> {
        let llm = Arc::new(ScriptedLlm::replying(output));
        QueryDecomposer::new(llm, RetryPolicy::default())
            .decompose(&rewritten("Compare metformin and insulin for type 2 diabetes"), max)
            .await
    }

    fn texts(sub_questions: &[SubQuestion]) -> Vec<&str> {
        sub_questions.iter().map(|sq| sq.text.as_str()).collect()
    }

    #[test]
    fn test_parse_formats() {
        let expected = Plan::Steps(vec!["What is A?".to_string(), "How does A affect B?".to_string()]);

        assert_eq!(parse_plan(r#"["What is A?", "How does A affect B?"]"#).unwrap(), expected);
        assert_eq!(
            parse_plan("```json\n[\"What is A?\", \"How does A affect B?\"]\n```").unwrap(),
            expected
        );
        assert_eq!(
            parse_plan(r#"{"sub_questions": ["What is A?", "How does A affect B?"]}"#).unwrap(),
            expected
        );
        assert_eq!(
            parse_plan(r#"MULTI_HOP: ["What is A?", "How does A affect B?"]"#).unwrap(),
            expected
        );
        assert_eq!(
            parse_plan("Here you go:\n1. What is A?\n2) How does A affect B?").unwrap(),
            expected
        );
        assert_eq!(parse_plan("- What is A?\n* How does A affect B?").unwrap(), expected);
        assert_eq!(parse_plan("DIRECT: simple lookup").unwrap(), Plan::Direct);
    }

    #[test]
    fn test_parse_failure() {
        assert!(matches!(parse_plan("I cannot help with that."), Err(Error::Decomposition(_))));
        assert!(matches!(parse_plan("[]"), Err(Error::Decomposition(_))));
    }

    #[tokio::test]
    async fn test_truncates_to_max_in_order() {
        let sub_questions = decompose_with(r#"["q1 a", "q2 b", "q3 c", "q4 d", "q5 e"]"#, 3).await;

        assert_eq!(texts(&sub_questions), vec!["q1 a", "q2 b", "q3 c"]);
        let indices: Vec<usize> = sub_questions.iter().map(|sq| sq.index).collect();
        assert_eq!(indices, vec![0, 1, 2]);
        assert!(sub_questions.iter().all(|sq| sq.answer.is_none()));
    }

    #[tokio::test]
    async fn test_malformed_output_degrades_to_query() {
        let sub_questions = decompose_with("no idea", 3).await;
        assert_eq!(
            texts(&sub_questions),
            vec!["Compare metformin and insulin for type 2 diabetes"]
        );
    }

    #[tokio::test]
    async fn test_generation_failure_degrades_to_query() {
        let llm = Arc::new(ScriptedLlm::new(vec![Err(Error::generation("model not found"))]));
        let sub_questions = QueryDecomposer::new(llm.clone(), RetryPolicy::default())
            .decompose(&rewritten("What is HbA1c?"), 3)
            .await;

        assert_eq!(texts(&sub_questions), vec!["What is HbA1c?"]);
        assert_eq!(llm.calls(), 1);
    }

    #[tokio::test]
    async fn test_direct_verdict_is_single_hop() {
        let sub_questions = decompose_with("DIRECT: one fact", 3).await;
        assert_eq!(sub_questions.len(), 1);
    }
}
