use regex::Regex;
use std::ops::Range;
use std::sync::OnceLock;

/// A sentence of a message. `start..end` is the untrimmed byte range of the
/// sentence inside the message text; `text` is the trimmed sentence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentenceSpan {
    pub text: String,
    pub start: usize,
    pub end: usize,
}

impl SentenceSpan {
    pub fn range(&self) -> Range<usize> {
        self.start..self.end
    }

    pub fn contains(&self, pos: usize) -> bool {
        pos >= self.start && pos < self.end
    }
}

// Anything up to a run of terminal punctuation (plus an optional closing
// quote), or up to the end of the text.
fn sentence_regex() -> &'static Regex {
    static SENTENCE_RE: OnceLock<Regex> = OnceLock::new();
    SENTENCE_RE.get_or_init(|| {
        Regex::new(r#"[^.!?]+(?:[.!?]+["']?|$)"#).expect("sentence pattern is valid")
    })
}

pub fn segment(text: &str) -> Vec<SentenceSpan> {
    if text.is_empty() {
        return Vec::new();
    }
    sentence_regex()
        .find_iter(text)
        .filter_map(|m| {
            let trimmed = m.as_str().trim();
            if trimmed.is_empty() {
                None
            } else {
                Some(SentenceSpan {
                    text: trimmed.to_string(),
                    start: m.start(),
                    end: m.end(),
                })
            }
        })
        .collect()
}

/// Index of the sentence containing byte position `pos`, if any.
pub fn sentence_at(spans: &[SentenceSpan], pos: usize) -> Option<usize> {
    spans.iter().position(|s| s.contains(pos))
}

const WORD_EDGE_PUNCTUATION: &[char] = &[
    '.', ',', '!', '?', ';', ':', '"', '\'', '(', ')', '[', ']', '{', '}',
];

/// The whitespace-delimited token around byte position `pos`, with
/// surrounding punctuation removed. `None` on whitespace, outside the text,
/// or when the token is only punctuation.
pub fn word_at(text: &str, pos: usize) -> Option<&str> {
    if pos >= text.len() || !text.is_char_boundary(pos) {
        return None;
    }
    let ch = text[pos..].chars().next()?;
    if ch.is_whitespace() {
        return None;
    }

    let start = text[..pos]
        .char_indices()
        .rev()
        .find(|(_, c)| c.is_whitespace())
        .map_or(0, |(i, c)| i + c.len_utf8());
    let end = text[pos..]
        .char_indices()
        .find(|(_, c)| c.is_whitespace())
        .map_or(text.len(), |(i, _)| pos + i);

    let word = text[start..end].trim_matches(WORD_EDGE_PUNCTUATION);
    if word.is_empty() {
        None
    } else {
        Some(word)
    }
}
