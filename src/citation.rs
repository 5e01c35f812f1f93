//! Citation and highlight normalization.
//!
//! A [`Citation`] is a structured reference into a loaded document; a
//! highlight is a short normalized string. Both are produced by the
//! structural scanner, the sandbox runtime, and the result assembler's
//! merge step.

use serde::{Deserialize, Serialize};

/// Maximum visible length of a citation's `signal` field.
pub const MAX_SIGNAL_LEN: usize = 48;
/// Maximum visible length of a citation's `snippet` field.
pub const MAX_SNIPPET_LEN: usize = 220;
/// Maximum visible length of a normalized highlight string.
pub const MAX_HIGHLIGHT_LEN: usize = 240;

/// A structured reference to a range of lines in a loaded document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Citation {
    /// Document path this citation refers to (or a fallback path).
    pub path: String,
    /// 1-based start line, inclusive.
    pub start_line: usize,
    /// 1-based end line, inclusive (`>= start_line`).
    pub end_line: usize,
    /// Short label describing why this range was cited.
    pub signal: String,
    /// Short excerpt of the cited text.
    #[serde(default)]
    pub snippet: String,
}

impl Citation {
    /// Builds a normalized citation: clamps the line range, truncates
    /// `signal`/`snippet` to their visible-character caps, and collapses
    /// whitespace in the snippet.
    #[must_use]
    pub fn new(
        path: impl Into<String>,
        start_line: usize,
        end_line: usize,
        signal: impl Into<String>,
        snippet: impl AsRef<str>,
    ) -> Self {
        let start_line = start_line.max(1);
        let end_line = end_line.max(start_line);
        Self {
            path: path.into(),
            start_line,
            end_line,
            signal: truncate_chars(&signal.into(), MAX_SIGNAL_LEN),
            snippet: truncate_chars(&collapse_whitespace(snippet.as_ref()), MAX_SNIPPET_LEN),
        }
    }
}

/// Normalizes raw text to a single-line, whitespace-collapsed highlight
/// truncated to [`MAX_HIGHLIGHT_LEN`] characters.
#[must_use]
pub fn normalize_highlight(text: &str) -> String {
    truncate_chars(&collapse_whitespace(text), MAX_HIGHLIGHT_LEN)
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn truncate_chars(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        text.to_string()
    } else {
        text.chars().take(max).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_clamps_line_range() {
        let citation = Citation::new("a.py", 5, 2, "class", "class A:");
        assert_eq!(citation.start_line, 5);
        assert_eq!(citation.end_line, 5);
    }

    #[test]
    fn test_normalize_highlight_collapses_whitespace() {
        assert_eq!(normalize_highlight("  a   b\tc\n"), "a b c");
    }

    #[test]
    fn test_normalize_highlight_is_idempotent() {
        let once = normalize_highlight("hello   world");
        let twice = normalize_highlight(&once);
        assert_eq!(once, twice);
    }
}
