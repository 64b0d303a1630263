//! Citation extraction and alignment against the context window
//!
//! Two strategies, tried in order:
//! 1. Explicit markers emitted by the model: `[2]`, `[1, 3]`, `[Source 2]`,
//!    a bracketed chunk ID, or `[Source: file.pdf, Page 4]`.
//! 2. Lexical overlap: each answer sentence is attributed to the context
//!    chunk sharing the largest fraction of its content terms, if that
//!    fraction reaches `min_overlap`.
//!
//! Every citation is built from a window entry, so a chunk outside the
//! window can never be cited.

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashSet;
use unicode_segmentation::UnicodeSegmentation;

use crate::config::CitationConfig;
use crate::types::{Citation, ContextWindow};

static MARKER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\[([^\[\]\n]{1,200})\]").expect("Invalid regex"));

static SOURCE_PREFIX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^(?:sources?|chunk)\s*[:#]?\s*").expect("Invalid regex"));

static PAGE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)^page\s*(\d+)$").expect("Invalid regex"));

const STOPWORDS: &[&str] = &[
    "the", "and", "for", "are", "but", "not", "you", "all", "any", "can", "her", "was", "one",
    "our", "out", "has", "have", "had", "his", "how", "its", "may", "who", "did", "does", "with",
    "this", "that", "these", "those", "from", "they", "them", "their", "there", "been", "were",
    "which", "what", "when", "where", "while", "will", "would", "should", "could", "also",
    "into", "than", "then", "such", "some", "more", "most", "other", "about", "over", "only",
    "very", "each", "both", "being", "because",
];

/// Maps answer text back to the context chunks that support it
#[derive(Debug, Clone)]
pub struct CitationExtractor {
    min_overlap: f32,
    min_sentence_terms: usize,
    preview_chars: usize,
}

impl CitationExtractor {
    pub fn new(config: &CitationConfig) -> Self {
        Self {
            min_overlap: config.min_overlap,
            min_sentence_terms: config.min_sentence_terms,
            preview_chars: config.preview_chars,
        }
    }

    /// Citations in order of first reference in `answer`, unique by chunk
    pub fn extract(&self, answer: &str, context: &ContextWindow) -> Vec<Citation> {
        if context.is_empty() || answer.trim().is_empty() {
            return Vec::new();
        }

        let mut labels = labels_from_markers(answer, context);
        if labels.is_empty() {
            labels = self.labels_from_overlap(answer, context);
            tracing::debug!("No inline markers, lexical overlap matched {} chunks", labels.len());
        }

        labels
            .into_iter()
            .filter_map(|label| {
                context.by_label(label).map(|scored| {
                    let preview = truncate_preview(&scored.chunk.content, self.preview_chars);
                    Citation::from_scored(scored, label, preview)
                })
            })
            .collect()
    }

    fn labels_from_overlap(&self, answer: &str, context: &ContextWindow) -> Vec<usize> {
        let chunk_terms: Vec<HashSet<String>> =
            context.chunks().map(|c| content_terms(&c.chunk.content)).collect();

        let mut labels = Vec::new();
        for sentence in answer.unicode_sentences() {
            let terms = content_terms(sentence);
            if terms.is_empty() || terms.len() < self.min_sentence_terms {
                continue;
            }

            let mut best: Option<(usize, f32)> = None;
            for (i, chunk) in chunk_terms.iter().enumerate() {
                let shared = terms.iter().filter(|t| chunk.contains(*t)).count();
                let overlap = shared as f32 / terms.len() as f32;
                if best.map_or(true, |(_, score)| overlap > score) {
                    best = Some((i, overlap));
                }
            }

            if let Some((i, overlap)) = best {
                if overlap >= self.min_overlap {
                    push_unique(&mut labels, i + 1);
                }
            }
        }
        labels
    }
}

impl Default for CitationExtractor {
    fn default() -> Self {
        Self::new(&CitationConfig::default())
    }
}

fn push_unique(labels: &mut Vec<usize>, label: usize) {
    if !labels.contains(&label) {
        labels.push(label);
    }
}

/// Resolve bracketed markers to 1-based window labels
fn labels_from_markers(answer: &str, context: &ContextWindow) -> Vec<usize> {
    let mut labels = Vec::new();

    for cap in MARKER.captures_iter(answer) {
        let inner = cap.get(1).map(|m| m.as_str().trim()).unwrap_or("");
        for label in resolve_marker(inner, context) {
            push_unique(&mut labels, label);
        }
    }
    labels
}

fn resolve_marker(inner: &str, context: &ContextWindow) -> Vec<usize> {
    if let Some(label) = label_for_chunk_id(inner, context) {
        return vec![label];
    }

    let body = SOURCE_PREFIX.replace(inner, "");
    if let Some(label) = label_for_chunk_id(&body, context) {
        return vec![label];
    }

    let parts: Vec<&str> = body
        .split([',', ';'])
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .collect();

    if !parts.is_empty() && parts.iter().all(|p| p.parse::<usize>().is_ok()) {
        return parts
            .iter()
            .filter_map(|p| p.parse::<usize>().ok())
            .filter(|label| context.by_label(*label).is_some())
            .collect();
    }

    label_for_source_name(&parts, context).into_iter().collect()
}

fn label_for_chunk_id(candidate: &str, context: &ContextWindow) -> Option<usize> {
    context
        .chunks()
        .position(|c| c.chunk.id == candidate)
        .map(|i| i + 1)
}

/// `[Source: file.pdf, Page 4]` style markers
fn label_for_source_name(parts: &[&str], context: &ContextWindow) -> Option<usize> {
    let (name, rest) = parts.split_first()?;
    let name = name.to_lowercase();
    let page: Option<u32> = rest
        .iter()
        .find_map(|p| PAGE.captures(p))
        .and_then(|cap| cap.get(1))
        .and_then(|m| m.as_str().parse().ok());

    let mut name_match = None;
    for (i, scored) in context.chunks().enumerate() {
        if scored.chunk.document_name.to_lowercase() != name {
            continue;
        }
        match page {
            Some(p) if scored.chunk.page_number == Some(p) => return Some(i + 1),
            Some(_) => {}
            None => return Some(i + 1),
        }
        name_match.get_or_insert(i + 1);
    }
    name_match
}

fn content_terms(text: &str) -> HashSet<String> {
    text.unicode_words()
        .map(str::to_lowercase)
        .filter(|w| w.chars().count() >= 3 && !STOPWORDS.contains(&w.as_str()))
        .collect()
}

/// Truncate text to a maximum number of characters at a word boundary
pub fn truncate_preview(text: &str, max_chars: usize) -> String {
    let text = text.trim();
    if text.chars().count() <= max_chars {
        return text.to_string();
    }

    let end = text
        .char_indices()
        .nth(max_chars)
        .map(|(i, _)| i)
        .unwrap_or(text.len());

    // Try to end at a word boundary
    if let Some(pos) = text[..end].rfind(' ') {
        if pos > 0 {
            return format!("{}...", text[..pos].trim_end());
        }
    }

    format!("{}...", &text[..end])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retrieval::ContextAssembler;
    use crate::types::{Chunk, ScoredChunk};
    use proptest::prelude::*;

    fn window() -> ContextWindow {
        window_within(10_000)
    }

    fn window_within(token_budget: usize) -> ContextWindow {
        let chunks = vec![
            ScoredChunk::new(
                Chunk::new("c-thirst", "d1", "diabetes.pdf", 0, "Common symptoms of diabetes include increased thirst, frequent urination and fatigue.").with_page(2),
                0.92,
                "q",
            ),
            ScoredChunk::new(
                Chunk::new("c-vision", "d1", "diabetes.pdf", 1, "Blurred vision and slow healing of wounds can also occur in diabetic patients.").with_page(3),
                0.81,
                "q",
            ),
        ];
        ContextAssembler::default().assemble(chunks, token_budget)
    }

    #[test]
    fn test_numeric_markers_in_first_reference_order() {
        let answer = "Vision may blur [2]. Thirst increases [1]. Both are typical [1, 2].";
        let citations = CitationExtractor::default().extract(answer, &window());

        let ids: Vec<&str> = citations.iter().map(|c| c.chunk_id.as_str()).collect();
        assert_eq!(ids, vec!["c-vision", "c-thirst"]);
        assert_eq!(citations[0].page_number, Some(3));
        assert_eq!(citations[0].source_label, 2);
    }

    #[test]
    fn test_out_of_window_markers_are_ignored() {
        let answer = "See [7] and [c-unknown] and [Source 1].";
        let citations = CitationExtractor::default().extract(answer, &window());

        assert_eq!(citations.len(), 1);
        assert_eq!(citations[0].chunk_id, "c-thirst");
    }

    #[test]
    fn test_chunk_id_and_filename_markers() {
        let extractor = CitationExtractor::default();
        let by_id = extractor.extract("Wounds heal slowly [c-vision].", &window());
        assert_eq!(by_id[0].chunk_id, "c-vision");

        let by_name = extractor.extract("Wounds heal slowly [Source: diabetes.pdf, Page 3].", &window());
        assert_eq!(by_name[0].chunk_id, "c-vision");
    }

    #[test]
    fn test_overlap_fallback_attributes_sentences() {
        let answer = "Patients often report increased thirst and frequent urination. \
                      Blurred vision is another sign.";
        let citations = CitationExtractor::default().extract(answer, &window());

        let ids: Vec<&str> = citations.iter().map(|c| c.chunk_id.as_str()).collect();
        assert_eq!(ids, vec!["c-thirst", "c-vision"]);
    }

    #[test]
    fn test_no_overlap_gives_empty_citations() {
        let answer = "The stock market closed higher today after strong earnings reports.";
        assert!(CitationExtractor::default().extract(answer, &window()).is_empty());
    }

    #[test]
    fn test_truncate_preview() {
        let snippet = "This is a very long snippet that needs to be truncated.";
        let truncated = truncate_preview(snippet, 20);

        assert!(truncated.chars().count() <= 23); // 20 + "..."
        assert!(truncated.ends_with("..."));
        assert_eq!(truncate_preview("short", 20), "short");
    }

    const ANSWER_PIECES: &[&str] = &[
        "[1]", "[2]", "[3]", "[0]", "[1, 2]", "[2, 9]", "[c-thirst]", "[c-vision]", "[c-unknown]",
        "[Source 2]", "[Source: diabetes.pdf, Page 3]", "[Source: other.pdf]", "thirst", "vision",
        "blurred", "diabetes", "urination", "fatigue", "wounds", "bananas", ".", "and", "\n",
    ];

    fn answers() -> impl Strategy<Value = String> {
        prop_oneof![
            prop::collection::vec(prop::sample::select(ANSWER_PIECES), 0..40).prop_map(|p| p.join(" ")),
            ".{0,200}",
        ]
    }

    proptest! {
        #[test]
        fn test_citations_only_name_window_chunks(answer in answers(), budget in 0usize..60) {
            let window = window_within(budget);
            let citations = CitationExtractor::default().extract(&answer, &window);

            let ids = window.chunk_ids();
            prop_assert!(citations.iter().all(|c| ids.contains(&c.chunk_id)));
            let unique: HashSet<&str> = citations.iter().map(|c| c.chunk_id.as_str()).collect();
            prop_assert_eq!(unique.len(), citations.len());
        }
    }
}
