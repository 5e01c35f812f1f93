//! Document loading.
//!
//! Reads a newline-delimited list of file paths and returns an immutable
//! collection of [`Document`] records, deduplicated by raw path.

use std::fs;
use std::path::Path;

/// A single loaded text file.
///
/// Immutable once constructed; identity is by [`Document::path`].
#[derive(Debug, Clone)]
pub struct Document {
    path: String,
    text: String,
    lines: Vec<String>,
}

impl Document {
    /// Repo-relative (or original, if outside the repo) path.
    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Full file content.
    #[must_use]
    pub fn text(&self) -> &str {
        &self.text
    }

    /// The file split into lines (no trailing newline per element).
    #[must_use]
    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    /// Number of lines.
    #[must_use]
    pub fn line_count(&self) -> usize {
        self.lines.len()
    }

    /// 1-based inclusive line slice. Clamps `start` to at least 1 and
    /// `end` to at least `start`. Returns an empty string if `start`
    /// exceeds the line count.
    #[must_use]
    pub fn slice_lines(&self, start: usize, end: usize) -> String {
        let start = start.max(1);
        let end = end.max(start);
        if start > self.lines.len() {
            return String::new();
        }
        let end_idx = end.min(self.lines.len());
        self.lines[start - 1..end_idx].join("\n")
    }
}

/// Reads `list_file` (newline-delimited absolute paths) and loads each
/// into a [`Document`], relativizing against `repo_root` when possible.
///
/// Deduplicates by raw path, preserving first-occurrence order. Missing
/// or unreadable files are skipped silently, except their raw existence
/// check: a path that exists but fails to read yields an empty-text
/// Document (still counted). A missing `list_file` yields an empty
/// sequence rather than an error.
#[must_use]
pub fn load_documents(list_file: &Path, repo_root: &Path) -> Vec<Document> {
    let Ok(contents) = fs::read_to_string(list_file) else {
        return Vec::new();
    };

    let mut seen = std::collections::HashSet::new();
    let mut documents = Vec::new();

    for raw_line in contents.lines() {
        let raw_path = raw_line.trim();
        if raw_path.is_empty() || !seen.insert(raw_path.to_string()) {
            continue;
        }

        let path = Path::new(raw_path);
        if !path.is_file() {
            continue;
        }

        let text = fs::read_to_string(path).unwrap_or_default();
        let lines: Vec<String> = text.lines().map(ToString::to_string).collect();
        let relative = relativize(path, repo_root);

        documents.push(Document {
            path: relative,
            text,
            lines,
        });
    }

    documents
}

/// Returns `path` relative to `repo_root` if it is contained within it,
/// otherwise the original path string unchanged.
fn relativize(path: &Path, repo_root: &Path) -> String {
    let canonical_path = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
    let canonical_root = repo_root
        .canonicalize()
        .unwrap_or_else(|_| repo_root.to_path_buf());

    canonical_path
        .strip_prefix(&canonical_root)
        .map(|p| p.to_string_lossy().into_owned())
        .unwrap_or_else(|_| path.to_string_lossy().into_owned())
}

/// Test-only constructor shared by other modules' unit tests.
pub(crate) mod test_support {
    use super::Document;

    pub(crate) fn make_document(path: &str, text: &str) -> Document {
        Document {
            path: path.to_string(),
            text: text.to_string(),
            lines: text.lines().map(ToString::to_string).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_missing_list_file_yields_empty() {
        let docs = load_documents(Path::new("/nonexistent/list.txt"), Path::new("/"));
        assert!(docs.is_empty());
    }

    #[test]
    fn test_dedup_and_relativize() {
        let dir = tempfile::tempdir().unwrap_or_else(|e| panic!("tempdir failed: {e}"));
        let file_path = dir.path().join("a.py");
        fs::write(&file_path, "class A:\n    pass\n")
            .unwrap_or_else(|e| panic!("write failed: {e}"));

        let list_path = dir.path().join("list.txt");
        let mut list = fs::File::create(&list_path).unwrap_or_else(|e| panic!("create failed: {e}"));
        writeln!(list, "{}", file_path.display()).unwrap_or_else(|e| panic!("write failed: {e}"));
        writeln!(list, "{}", file_path.display()).unwrap_or_else(|e| panic!("write failed: {e}"));

        let docs = load_documents(&list_path, dir.path());
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].path(), "a.py");
        assert_eq!(docs[0].line_count(), 2);
    }

    #[test]
    fn test_slice_lines_out_of_range_is_empty() {
        let doc = Document {
            path: "x.txt".to_string(),
            text: "one\ntwo\n".to_string(),
            lines: vec!["one".to_string(), "two".to_string()],
        };
        assert_eq!(doc.slice_lines(5, 10), "");
        assert_eq!(doc.slice_lines(1, 1), "one");
        assert_eq!(doc.slice_lines(1, 100), "one\ntwo");
    }
}
