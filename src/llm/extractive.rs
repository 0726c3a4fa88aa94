//! Deterministic extractive reducer
//!
//! The last strategy of the condensation chain. It works on the text alone,
//! so it cannot fail: leading whole sentences are kept while they fit, and
//! when even the first sentence is too long the text is cut at the nearest
//! preceding word boundary. No ellipsis is appended.

use crate::llm::provider::{char_len, normalize_whitespace};

const SENTENCE_TERMINALS: [char; 4] = ['.', '!', '?', '…'];

/// Extractive reducer, always available
#[derive(Debug, Clone, Copy, Default)]
pub struct ExtractiveReducer;

impl ExtractiveReducer {
    pub const NAME: &'static str = "extractive";

    pub fn new() -> Self {
        Self
    }

    /// Reduce `text` to at most `budget` characters
    pub fn reduce(&self, text: &str, budget: usize) -> String {
        let text = normalize_whitespace(text);
        if char_len(&text) <= budget {
            return text;
        }

        let mut kept = String::new();
        let mut kept_len = 0usize;
        for sentence in split_sentences(&text) {
            let separator = usize::from(!kept.is_empty());
            let sentence_len = char_len(sentence);
            if kept_len + separator + sentence_len > budget {
                break;
            }
            if separator == 1 {
                kept.push(' ');
            }
            kept.push_str(sentence);
            kept_len += separator + sentence_len;
        }

        if !kept.is_empty() {
            return kept;
        }

        truncate_at_word_boundary(&text, budget)
    }
}

/// Split normalized text into sentences
///
/// A sentence ends at a run of terminal punctuation followed by whitespace
/// or the end of the text, so "3.5" or "v1.2" never split.
pub fn split_sentences(text: &str) -> Vec<&str> {
    let mut sentences = Vec::new();
    let mut start = 0usize;
    let mut chars = text.char_indices().peekable();

    while let Some((idx, c)) = chars.next() {
        if !SENTENCE_TERMINALS.contains(&c) {
            continue;
        }
        let boundary = match chars.peek() {
            None => true,
            Some((_, next)) => next.is_whitespace(),
        };
        if boundary {
            let end = idx + c.len_utf8();
            let sentence = text[start..end].trim();
            if !sentence.is_empty() {
                sentences.push(sentence);
            }
            start = end;
        }
    }

    let tail = text[start..].trim();
    if !tail.is_empty() {
        sentences.push(tail);
    }
    sentences
}

/// Cut `text` to at most `budget` characters without splitting a word
///
/// A single word longer than the budget is the one case that is cut
/// mid-word, since an empty result carries nothing.
pub fn truncate_at_word_boundary(text: &str, budget: usize) -> String {
    let Some((cut, next)) = text.char_indices().nth(budget) else {
        return text.trim_end().to_string();
    };

    let prefix = &text[..cut];
    if next.is_whitespace() {
        return prefix.trim_end().to_string();
    }

    match prefix.rfind(char::is_whitespace) {
        Some(space) if !prefix[..space].trim_end().is_empty() => {
            prefix[..space].trim_end().to_string()
        }
        _ => prefix.to_string(),
    }
}
