//! Structural scanner.
//!
//! Runs a fixed set of line-oriented regular expressions over all loaded
//! documents to produce global signal counts and a bounded set of
//! fallback citations, used when the sandbox run produces none of its own.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;

use crate::citation::Citation;
use crate::document::Document;

/// Cap on fallback citations produced by a single scan.
const MAX_FALLBACK_CITATIONS: usize = 120;

struct Pattern {
    signal: &'static str,
    regex: LazyLock<Regex>,
}

macro_rules! pattern {
    ($signal:expr, $re:expr) => {
        Pattern {
            signal: $signal,
            regex: LazyLock::new(|| Regex::new($re).unwrap_or_else(|e| panic!("bad scanner pattern: {e}"))),
        }
    };
}

static PATTERNS: [Pattern; 7] = [
    pattern!("class", r"^\s*class\s+\w+"),
    pattern!("python_def", r"^\s*def\s+\w+\s*\("),
    pattern!(
        "function",
        r"^\s*(?:export\s+)?(?:async\s+)?function\s+\w+\s*\("
    ),
    pattern!("arrow_function", r"^\s*(?:export\s+)?const\s+\w+\s*=\s*\("),
    pattern!("test", r"\b(?:describe|it|test)\s*\("),
    pattern!("todo", r"\b(?:TODO|FIXME)\b"),
    pattern!("error", r"(?i)\b(?:error|fail|exception)\b"),
];

/// Result of a structural scan over a set of documents.
#[derive(Debug, Clone, Default)]
pub struct ScanResult {
    /// Signal name to match count, across all documents.
    pub signal_counts: BTreeMap<String, usize>,
    /// Bounded list of citations pointing at matched lines.
    pub fallback_citations: Vec<Citation>,
}

/// Scans every document with the fixed pattern set.
#[must_use]
pub fn scan(documents: &[Document]) -> ScanResult {
    let mut result = ScanResult::default();

    'documents: for document in documents {
        for (line_no, line) in document.lines().iter().enumerate() {
            for pattern in &PATTERNS {
                if pattern.regex.is_match(line) {
                    *result
                        .signal_counts
                        .entry(pattern.signal.to_string())
                        .or_insert(0) += 1;

                    if result.fallback_citations.len() < MAX_FALLBACK_CITATIONS {
                        let line_number = line_no + 1;
                        result.fallback_citations.push(Citation::new(
                            document.path(),
                            line_number,
                            line_number,
                            pattern.signal,
                            line,
                        ));
                    } else {
                        continue 'documents;
                    }
                }
            }
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(path: &str, text: &str) -> Document {
        crate::document::test_support::make_document(path, text)
    }

    #[test]
    fn test_scan_detects_class_and_def() {
        let documents = vec![doc("a.py", "class A:\n    def run(self):\n        pass\n")];
        let result = scan(&documents);
        assert_eq!(result.signal_counts.get("class"), Some(&1));
        assert_eq!(result.signal_counts.get("python_def"), Some(&1));
    }

    #[test]
    fn test_scan_detects_todo_and_error_case_insensitive() {
        let documents = vec![doc(
            "b.rs",
            "// TODO: fix this\nfn handle() -> Result<(), Error> { unreachable!() }\n",
        )];
        let result = scan(&documents);
        assert_eq!(result.signal_counts.get("todo"), Some(&1));
        assert!(result.signal_counts.get("error").copied().unwrap_or(0) >= 1);
    }

    #[test]
    fn test_scan_caps_fallback_citations() {
        let text: String = (0..200).map(|_| "TODO here\n").collect();
        let documents = vec![doc("many.txt", &text)];
        let result = scan(&documents);
        assert_eq!(result.fallback_citations.len(), MAX_FALLBACK_CITATIONS);
    }

    #[test]
    fn test_scan_empty_documents() {
        let result = scan(&[]);
        assert!(result.signal_counts.is_empty());
        assert!(result.fallback_citations.is_empty());
    }
}
