//! Result assembler.
//!
//! Merges sandbox-declared highlights and citations with structural
//! fallbacks, builds per-file summaries, and assembles the single JSON
//! result record this worker prints on exit. Success and failure
//! records share a schema skeleton (spec §4.8/§6).

use serde::Serialize;
use serde_json::{Value as JsonValue, json};

use crate::citation::Citation;
use crate::config::WorkerConfig;
use crate::document::Document;
use crate::error::WorkerError;
use crate::repl::{ExecutionState, estimate_tokens};
use crate::sandbox::runtime::SandboxRuntime;
use crate::sandbox::value::Value;
use crate::scanner::ScanResult;

const MAX_HIGHLIGHTS: usize = 80;
const MAX_CITATIONS: usize = 120;

/// Per-file line/char counts surfaced in a success record's `files` array.
#[derive(Debug, Clone, Serialize)]
pub struct FileSummary {
    pub path: String,
    pub line_count: usize,
    pub char_count: usize,
}

fn build_file_summaries(documents: &[Document]) -> Vec<FileSummary> {
    documents
        .iter()
        .map(|document| FileSummary {
            path: document.path().to_string(),
            line_count: document.line_count(),
            char_count: document.text().chars().count(),
        })
        .collect()
}

/// `metadata` if non-empty, otherwise JSON `null` (an empty metadata
/// object is never echoed as `{}`).
fn metadata_or_null(metadata: &serde_json::Value) -> serde_json::Value {
    match metadata.as_object() {
        Some(map) if map.is_empty() => serde_json::Value::Null,
        _ => metadata.clone(),
    }
}

fn generated_at() -> String {
    chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string()
}

fn round3(seconds: f64) -> f64 {
    (seconds * 1000.0).round() / 1000.0
}

/// Builds the merged highlight list: `final`-declared highlights (if
/// `final` is a JSON object), then sandbox-recorded highlights, falling
/// back to synthesized descriptive text only when both are empty.
fn merge_highlights(
    final_value: Option<&Value>,
    sandbox_highlights: &[String],
    signals: &std::collections::BTreeMap<String, usize>,
    file_count: usize,
) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();

    if let Some(Value::Dict(pairs)) = final_value {
        for (key, value) in pairs.borrow().iter() {
            if key.as_str().ok().as_deref().map(String::as_str) != Some("highlights") {
                continue;
            }
            if let Value::List(items) = value {
                for item in items.borrow().iter() {
                    let text = crate::citation::normalize_highlight(&item.display());
                    if !text.is_empty() && !out.contains(&text) {
                        out.push(text);
                    }
                }
            }
        }
    }

    for item in sandbox_highlights {
        if !item.is_empty() && !out.contains(item) {
            out.push(item.clone());
        }
    }

    if out.is_empty() {
        out.push(format!("Processed {file_count} file(s) via REPL RLMS"));
        let class_count = signals.get("class").copied().unwrap_or(0);
        if class_count > 0 {
            out.push(format!("Detected {class_count} class declaration(s)"));
        }
        let def_count = signals.get("python_def").copied().unwrap_or(0) + signals.get("function").copied().unwrap_or(0);
        if def_count > 0 {
            out.push(format!("Detected {def_count} named function definition(s)"));
        }
    }

    out.truncate(MAX_HIGHLIGHTS);
    out
}

/// Builds the merged citation list: `final.citations` normalized, then
/// sandbox citations, falling back to structural citations only when
/// both are empty, then to synthesized `file_reference` fallbacks only
/// when `require_citations` is set and the list is still empty.
fn merge_citations(
    final_value: Option<&Value>,
    sandbox_citations: &[Citation],
    structural_citations: &[Citation],
    require_citations: bool,
    documents: &[Document],
) -> Vec<Citation> {
    let mut items: Vec<Citation> = Vec::new();

    if let Some(Value::Dict(pairs)) = final_value {
        for (key, value) in pairs.borrow().iter() {
            if key.as_str().ok().as_deref().map(String::as_str) != Some("citations") {
                continue;
            }
            if let Value::List(raw_citations) = value {
                for raw in raw_citations.borrow().iter() {
                    if let Some(citation) = normalize_citation_value(raw) {
                        items.push(citation);
                    }
                }
            }
        }
    }

    items.extend(sandbox_citations.iter().cloned());

    if items.is_empty() {
        items.extend(structural_citations.iter().take(MAX_CITATIONS).cloned());
    }

    if require_citations && items.is_empty() {
        for document in documents.iter().take(8) {
            items.push(Citation::new(
                document.path(),
                1,
                1,
                "file_reference",
                "Fallback citation generated because no explicit citation was produced",
            ));
        }
    }

    dedupe_citations(items)
}

/// Normalizes a sandbox [`Value`] shaped like `{path, start_line, end_line, signal, snippet}`
/// (or the `line`-only shorthand) into a [`Citation`]. Returns `None` if
/// `path` is missing or blank.
fn normalize_citation_value(raw: &Value) -> Option<Citation> {
    let Value::Dict(pairs) = raw else { return None };
    let pairs = pairs.borrow();

    let lookup = |key: &str| -> Option<Value> {
        pairs
            .iter()
            .find(|(k, _)| k.as_str().ok().as_deref().map(String::as_str) == Some(key))
            .map(|(_, v)| v.clone())
    };

    let path = lookup("path").and_then(|v| v.as_str().ok().map(|s| s.as_str().to_string()))?;
    let path = path.trim().to_string();
    if path.is_empty() {
        return None;
    }

    let start = lookup("start_line")
        .or_else(|| lookup("line"))
        .and_then(|v| v.as_int().ok())
        .unwrap_or(1)
        .max(1);
    let end = lookup("end_line").and_then(|v| v.as_int().ok()).unwrap_or(start).max(start);

    let snippet = lookup("snippet")
        .and_then(|v| v.as_str().ok().map(|s| s.as_str().to_string()))
        .unwrap_or_default();
    let signal = lookup("signal")
        .and_then(|v| v.as_str().ok().map(|s| s.as_str().to_string()))
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "reference".to_string());

    Some(Citation::new(path, start as usize, end as usize, signal, snippet))
}

fn dedupe_citations(items: Vec<Citation>) -> Vec<Citation> {
    let mut seen = std::collections::HashSet::new();
    let mut out = Vec::new();
    for citation in items {
        let key = (
            citation.path.clone(),
            citation.start_line,
            citation.end_line,
            citation.signal.clone(),
            citation.snippet.clone(),
        );
        if seen.insert(key) {
            out.push(citation);
        }
        if out.len() >= MAX_CITATIONS {
            break;
        }
    }
    out
}

/// Builds the success result record (spec §4.8).
#[must_use]
pub fn assemble_success(
    config: &WorkerConfig,
    documents: &[Document],
    scan: &ScanResult,
    runtime: &SandboxRuntime,
    state: &ExecutionState,
) -> JsonValue {
    let total_chars: usize = documents.iter().map(|d| d.text().chars().count()).sum();
    let total_lines: usize = documents.iter().map(Document::line_count).sum();

    let highlights = merge_highlights(runtime.final_value(), runtime.highlights(), &scan.signal_counts, documents.len());
    let citations = merge_citations(
        runtime.final_value(),
        runtime.citations(),
        &scan.fallback_citations,
        config.require_citations,
        documents,
    );

    json!({
        "ok": true,
        "generated_at": generated_at(),
        "loop_id": config.loop_id,
        "role": config.role,
        "iteration": config.iteration,
        "format": config.format,
        "limits": {
            "max_steps": config.max_steps,
            "max_depth": config.max_depth,
            "timeout_seconds": config.timeout_seconds,
            "max_subcalls": config.max_subcalls,
        },
        "stats": {
            "file_count": documents.len(),
            "line_count": total_lines,
            "char_count": total_chars,
            "estimated_tokens": estimate_tokens(total_chars),
            "step_count": state.step_count(),
            "subcall_count": runtime.subcall_count(),
            "elapsed_seconds": round3(state.elapsed_seconds()),
        },
        "signals": scan.signal_counts,
        "highlights": highlights,
        "citations": citations,
        "files": build_file_summaries(documents),
        "trace": state.recent_history(),
        "final": runtime.final_value().map_or(JsonValue::Null, Value::to_json),
        "metadata": metadata_or_null(&config.metadata),
    })
}

/// Builds a failure record for a configuration error caught before any
/// execution state exists (`invalid_config`, `missing_root_command`):
/// no `stats`/`trace`, matching the original's pre-state failure shape.
#[must_use]
pub fn assemble_config_failure(
    loop_id: &str,
    role: &str,
    iteration: u64,
    error: &WorkerError,
    metadata: &serde_json::Value,
) -> JsonValue {
    json!({
        "ok": false,
        "generated_at": generated_at(),
        "loop_id": loop_id,
        "role": role,
        "iteration": iteration,
        "error": error.to_string(),
        "error_code": error.error_code(),
        "metadata": metadata_or_null(metadata),
    })
}

/// Builds a failure record for an error raised during or after the REPL
/// ran (`limit_exceeded`, `sandbox_violation`, `model_invocation_failed`,
/// `worker_failure`): includes the partial `stats`/`trace` accumulated
/// before the failure.
#[must_use]
pub fn assemble_run_failure(
    config: &WorkerConfig,
    error: &WorkerError,
    state: &ExecutionState,
    subcall_count: usize,
) -> JsonValue {
    json!({
        "ok": false,
        "generated_at": generated_at(),
        "loop_id": config.loop_id,
        "role": config.role,
        "iteration": config.iteration,
        "error": error.to_string(),
        "error_code": error.error_code(),
        "stats": {
            "step_count": state.step_count(),
            "subcall_count": subcall_count,
            "elapsed_seconds": round3(state.elapsed_seconds()),
        },
        "trace": state.recent_history(),
        "metadata": metadata_or_null(&config.metadata),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::test_support::make_document;

    fn dict(pairs: Vec<(&str, Value)>) -> Value {
        Value::dict(pairs.into_iter().map(|(k, v)| (Value::str(k), v)).collect())
    }

    #[test]
    fn test_merge_highlights_prefers_final_then_sandbox_then_fallback() {
        let signals = std::collections::BTreeMap::new();
        let from_final = dict(vec![("highlights", Value::list(vec![Value::str("A")]))]);
        assert_eq!(
            merge_highlights(Some(&from_final), &[], &signals, 1),
            vec!["A".to_string()]
        );

        let sandbox = vec!["B".to_string()];
        assert_eq!(merge_highlights(None, &sandbox, &signals, 1), vec!["B".to_string()]);

        let fallback = merge_highlights(None, &[], &signals, 3);
        assert_eq!(fallback, vec!["Processed 3 file(s) via REPL RLMS".to_string()]);
    }

    #[test]
    fn test_merge_highlights_dedupes() {
        let signals = std::collections::BTreeMap::new();
        let sandbox = vec!["same".to_string(), "same".to_string()];
        assert_eq!(merge_highlights(None, &sandbox, &signals, 1), vec!["same".to_string()]);
    }

    #[test]
    fn test_merge_citations_falls_back_to_structural_then_synthesized() {
        let documents = vec![make_document("a.py", "class A:\n")];
        let structural = vec![Citation::new("a.py", 1, 1, "class", "class A:")];

        let from_structural = merge_citations(None, &[], &structural, false, &documents);
        assert_eq!(from_structural.len(), 1);
        assert_eq!(from_structural[0].signal, "class");

        let synthesized = merge_citations(None, &[], &[], true, &documents);
        assert_eq!(synthesized.len(), 1);
        assert_eq!(synthesized[0].signal, "file_reference");

        let none_required = merge_citations(None, &[], &[], false, &documents);
        assert!(none_required.is_empty());
    }

    #[test]
    fn test_merge_citations_final_citations_take_priority() {
        let documents = vec![make_document("a.py", "x\n")];
        let structural = vec![Citation::new("a.py", 1, 1, "class", "class A:")];
        let raw_citation = dict(vec![
            ("path", Value::str("a.py")),
            ("start_line", Value::Int(2)),
            ("end_line", Value::Int(2)),
            ("signal", Value::str("declared")),
            ("snippet", Value::str("x")),
        ]);
        let final_value = dict(vec![("citations", Value::list(vec![raw_citation]))]);

        let merged = merge_citations(Some(&final_value), &[], &structural, false, &documents);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].signal, "declared");
    }

    #[test]
    fn test_metadata_or_null_empty_object_is_null() {
        assert_eq!(metadata_or_null(&serde_json::json!({})), serde_json::Value::Null);
        assert_eq!(
            metadata_or_null(&serde_json::json!({"k": 1})),
            serde_json::json!({"k": 1})
        );
    }
}
