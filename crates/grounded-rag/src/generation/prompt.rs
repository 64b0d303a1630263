//! Prompt templates for rewriting, decomposition and grounded generation

use crate::types::{ContextWindow, Role, SubQuestion, Turn};

/// Shown in place of context when retrieval found nothing
pub const NO_CONTEXT: &str = "No relevant documents were found in the indexed files.";

/// Prompt builder for RAG runs
pub struct PromptBuilder;

impl PromptBuilder {
    /// Build context block from a window, labelling chunks `[1]`, `[2]`, ...
    pub fn build_context(window: &ContextWindow) -> String {
        if window.is_empty() {
            return NO_CONTEXT.to_string();
        }

        let mut context = String::new();
        for (i, scored) in window.chunks().enumerate() {
            context.push_str(&format!(
                "[{}] {}\n\nContent:\n{}\n\n---\n\n",
                i + 1,
                scored.chunk.source_label(),
                scored.chunk.content
            ));
        }
        context
    }

    /// Ask for a self-contained, retrieval-friendly restatement of the query
    pub fn build_rewrite_prompt(query: &str, history: &[Turn]) -> String {
        let conversation = if history.is_empty() {
            "(no previous turns)".to_string()
        } else {
            history
                .iter()
                .map(|turn| {
                    let speaker = match turn.role {
                        Role::User => "User",
                        Role::Assistant => "Assistant",
                    };
                    format!("{}: {}", speaker, turn.content.trim())
                })
                .collect::<Vec<_>>()
                .join("\n")
        };

        format!(
            r#"You are a query rewriting assistant. Rewrite the user's latest question so it can be used on its own to search a document collection.

RULES:
1. Resolve pronouns and ellipsis using the conversation (e.g. "it" becomes the thing it refers to)
2. Be specific and clear; include relevant domain terminology
3. Keep the original intent; do not answer the question
4. Return ONLY the rewritten query on a single line, nothing else

CONVERSATION:
{conversation}

LATEST QUESTION: {query}

Rewritten query:"#,
            conversation = conversation,
            query = query
        )
    }

    /// Ask for an ordered list of sequentially answerable sub-questions
    pub fn build_decompose_prompt(query: &str, max_subquestions: usize) -> String {
        format!(
            r#"You are a reasoning assistant. Break the question below into the MINIMUM number of sub-questions needed to answer it, at most {max}.

RULES:
1. List sub-questions in the order they must be answered
2. Each sub-question may rely only on the original question and on answers to EARLIER sub-questions, never later ones
3. If the question can be answered directly, return it as the only sub-question
4. Return ONLY a JSON array of strings, for example: ["first sub-question", "second sub-question"]

QUESTION: {query}

Sub-questions:"#,
            max = max_subquestions,
            query = query
        )
    }

    /// Build the grounded answer prompt
    pub fn build_answer_prompt(question: &str, context: &str) -> String {
        format!(
            r#"You are a document-grounded assistant.

GROUNDING RULES:
1. Use the CONTEXT below to answer; if the answer is not in the context, say you don't know
2. Do not invent facts that are not stated in the context
3. Cite the numbered source after each claim it supports, e.g. [1] or [2, 3]
4. Be helpful, clear and concise

CONTEXT FROM DOCUMENTS:
{context}

QUESTION: {question}

Answer:"#,
            context = context,
            question = question
        )
    }

    /// Build the prompt for one intermediate hop of a multi-hop run
    pub fn build_hop_prompt(sub_question: &str, earlier: &[SubQuestion], context: &str) -> String {
        let findings = Self::format_findings(earlier);

        format!(
            r#"You are answering one step of a larger question. Answer ONLY this step, briefly, using the context and earlier findings. If the context does not contain the answer, say so.

EARLIER FINDINGS:
{findings}

CONTEXT FROM DOCUMENTS:
{context}

STEP QUESTION: {sub_question}

Short answer:"#,
            findings = findings,
            context = context,
            sub_question = sub_question
        )
    }

    /// Build the final synthesis prompt of a multi-hop run
    pub fn build_synthesis_prompt(question: &str, sub_questions: &[SubQuestion], context: &str) -> String {
        format!(
            r#"You are a document-grounded assistant. Synthesize the findings and the context to answer the original question comprehensively.

GROUNDING RULES:
1. Use only the findings and the CONTEXT below; if they do not answer the question, say you don't know
2. Cite the numbered source after each claim it supports, e.g. [1] or [2, 3]

SUB-QUESTIONS EXPLORED:
{findings}

CONTEXT FROM DOCUMENTS:
{context}

ORIGINAL QUESTION: {question}

Comprehensive answer:"#,
            findings = Self::format_findings(sub_questions),
            context = context,
            question = question
        )
    }

    fn format_findings(sub_questions: &[SubQuestion]) -> String {
        if sub_questions.is_empty() {
            return "(none yet)".to_string();
        }
        sub_questions
            .iter()
            .map(|sq| {
                format!(
                    "- {}\n  Answer: {}",
                    sq.text,
                    sq.answer.as_deref().unwrap_or("(not answered)")
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rewrite_prompt_includes_history() {
        let history = vec![
            Turn::user("Tell me about metformin"),
            Turn::assistant("Metformin is a first-line drug for type 2 diabetes."),
        ];
        let prompt = PromptBuilder::build_rewrite_prompt("What are its side effects?", &history);

        assert!(prompt.contains("User: Tell me about metformin"));
        assert!(prompt.contains("Assistant: Metformin is a first-line"));
        assert!(prompt.contains("LATEST QUESTION: What are its side effects?"));
    }

    #[test]
    fn test_empty_window_uses_no_context_notice() {
        let context = PromptBuilder::build_context(&ContextWindow::empty(100));
        assert_eq!(context, NO_CONTEXT);
    }

    #[test]
    fn test_findings_list_answers_in_order() {
        let mut first = SubQuestion::new(0, "What is HbA1c?");
        first.answer = Some("A marker of average blood glucose.".to_string());
        let second = SubQuestion::new(1, "What level indicates diabetes?");

        let prompt = PromptBuilder::build_hop_prompt(&second.text, &[first], "ctx");
        assert!(prompt.contains("- What is HbA1c?\n  Answer: A marker of average blood glucose."));
        assert!(prompt.contains("STEP QUESTION: What level indicates diabetes?"));
    }
}
