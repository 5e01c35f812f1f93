//! Sandbox runtime: implements the fixed helper API against the loaded
//! document set, the execution state's budgets, and the subcall CLI.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use regex::RegexBuilder;

use super::value::Value;
use crate::citation::Citation;
use crate::cli_invoker;
use crate::config::CliSpec;
use crate::document::Document;
use crate::error::WorkerError;

const MAX_HIGHLIGHTS: usize = 80;
const MAX_CITATIONS: usize = 120;
const MAX_SUBCALL_PROMPT_CHARS: usize = 120_000;
const DEFAULT_GREP_MAX_MATCHES: i64 = 80;
const GREP_MAX_MATCHES_CEILING: i64 = 500;

/// One `subcall`-type trace row recorded by [`SandboxRuntime::sub_rlm`].
#[derive(Debug, Clone, serde::Serialize)]
pub struct SubcallTrace {
    pub prompt_chars: usize,
    pub depth: usize,
    pub returncode: i32,
    pub duration_ms: u64,
    pub stdout_preview: String,
    pub ok: bool,
}

/// Owns everything a running code fragment can observe or mutate:
/// the document index, accumulated highlights/citations/final value,
/// and the subcall budget and CLI handle.
pub struct SandboxRuntime {
    documents: Vec<Document>,
    repo: PathBuf,
    subcall_cli: CliSpec,
    started_at_monotonic: Instant,
    timeout: Duration,
    max_depth: usize,
    max_subcalls: usize,
    subcall_count: usize,
    highlights: Vec<String>,
    citations: Vec<Citation>,
    final_value: Option<Value>,
    subcall_traces: Vec<SubcallTrace>,
}

impl SandboxRuntime {
    pub fn new(
        documents: Vec<Document>,
        repo: PathBuf,
        subcall_cli: CliSpec,
        started_at_monotonic: Instant,
        timeout: Duration,
        max_depth: usize,
        max_subcalls: usize,
    ) -> Self {
        Self {
            documents,
            repo,
            subcall_cli,
            started_at_monotonic,
            timeout,
            max_depth,
            max_subcalls,
            subcall_count: 0,
            highlights: Vec::new(),
            citations: Vec::new(),
            final_value: None,
            subcall_traces: Vec::new(),
        }
    }

    #[cfg(test)]
    pub fn new_for_test() -> Self {
        Self::new(
            Vec::new(),
            PathBuf::from("."),
            CliSpec {
                command: vec!["/bin/true".to_string()],
                args: Vec::new(),
                prompt_mode: crate::config::PromptMode::Stdin,
                label: "subcall".to_string(),
            },
            Instant::now(),
            Duration::from_secs(60),
            2,
            10,
        )
    }

    pub fn highlights(&self) -> &[String] {
        &self.highlights
    }

    pub fn citations(&self) -> &[Citation] {
        &self.citations
    }

    pub fn final_value(&self) -> Option<&Value> {
        self.final_value.as_ref()
    }

    pub fn subcall_traces(&self) -> &[SubcallTrace] {
        &self.subcall_traces
    }

    pub fn subcall_count(&self) -> usize {
        self.subcall_count
    }

    /// Dispatches a call to one of the fixed helper names.
    ///
    /// # Errors
    ///
    /// Returns [`WorkerError::SandboxViolation`] on bad arguments,
    /// [`WorkerError::LimitExceeded`] when a subcall budget is exhausted,
    /// and [`WorkerError::ModelInvocationFailed`] when a subcall's child
    /// process fails or times out.
    pub async fn call_helper(
        &mut self,
        name: &str,
        args: &[Value],
        kwargs: &HashMap<String, Value>,
    ) -> Result<Value, WorkerError> {
        match name {
            "list_files" => self.list_files(),
            "read_file" => self.read_file(args, kwargs),
            "grep" => self.grep(args, kwargs),
            "slice_text" => self.slice_text(args, kwargs),
            "append_highlight" => self.append_highlight(args),
            "add_citation" => self.add_citation(args, kwargs),
            "set_final" => self.set_final(args),
            "sub_rlm" => self.sub_rlm(args, kwargs).await,
            other => Err(WorkerError::sandbox(format!("unknown helper: {other}"))),
        }
    }

    fn find_document(&self, path: &str) -> Option<&Document> {
        self.documents.iter().find(|d| d.path() == path)
    }

    /// Fails with `limit_exceeded` if the wall-clock budget is already
    /// spent, checked on entry to every helper that can run unboundedly
    /// often inside a single fragment (a `while`/`for` loop body).
    fn check_timeout(&self) -> Result<(), WorkerError> {
        if self.started_at_monotonic.elapsed() >= self.timeout {
            return Err(WorkerError::limit("wall-clock timeout exceeded"));
        }
        Ok(())
    }

    fn list_files(&mut self) -> Result<Value, WorkerError> {
        self.check_timeout()?;
        let mut paths: Vec<String> = self.documents.iter().map(|d| d.path().to_string()).collect();
        paths.sort();
        Ok(Value::list(paths.into_iter().map(Value::str).collect()))
    }

    fn read_file(&mut self, args: &[Value], kwargs: &HashMap<String, Value>) -> Result<Value, WorkerError> {
        self.check_timeout()?;
        let path = arg_str(args, kwargs, 0, "path")?;
        let start_line = arg_int_or(args, kwargs, 1, "start_line", 1)?;
        let end_line = arg_int_opt(args, kwargs, 2, "end_line")?;

        let document = self
            .find_document(&path)
            .ok_or_else(|| WorkerError::sandbox(format!("unknown file: {path}")))?;

        let end = end_line.unwrap_or_else(|| document.line_count() as i64);
        Ok(Value::str(document.slice_lines(start_line.max(1) as usize, end.max(start_line) as usize)))
    }

    fn grep(&mut self, args: &[Value], kwargs: &HashMap<String, Value>) -> Result<Value, WorkerError> {
        self.check_timeout()?;
        let pattern = arg_str(args, kwargs, 0, "pattern")?;
        let path = arg_str_opt(args, kwargs, 1, "path")?;
        let max_matches = arg_int_or(args, kwargs, 2, "max_matches", DEFAULT_GREP_MAX_MATCHES)?
            .clamp(1, GREP_MAX_MATCHES_CEILING) as usize;
        let flags = arg_str_opt(args, kwargs, 3, "flags")?.unwrap_or_default();

        let regex = RegexBuilder::new(&pattern)
            .case_insensitive(flags.contains('i'))
            .multi_line(flags.contains('m'))
            .build()
            .map_err(|e| WorkerError::sandbox(format!("invalid grep pattern: {e}")))?;

        let mut matches = Vec::new();
        for document in &self.documents {
            if let Some(path) = &path {
                if document.path() != path {
                    continue;
                }
            }
            for (idx, line) in document.lines().iter().enumerate() {
                if regex.is_match(line) {
                    let line_number = (idx + 1) as i64;
                    matches.push(Value::dict(vec![
                        (Value::str("path"), Value::str(document.path().to_string())),
                        (Value::str("start_line"), Value::Int(line_number)),
                        (Value::str("end_line"), Value::Int(line_number)),
                        (Value::str("signal"), Value::str("regex_match")),
                        (Value::str("snippet"), Value::str(crate::citation::normalize_highlight(line))),
                    ]));
                    if matches.len() >= max_matches {
                        return Ok(Value::list(matches));
                    }
                }
            }
        }
        Ok(Value::list(matches))
    }

    fn slice_text(&mut self, args: &[Value], kwargs: &HashMap<String, Value>) -> Result<Value, WorkerError> {
        self.check_timeout()?;
        let text = arg_str(args, kwargs, 0, "text")?;
        let chars: Vec<char> = text.chars().collect();
        let start = arg_int_or(args, kwargs, 1, "start", 0)?;
        let end = arg_int_opt(args, kwargs, 2, "end")?.unwrap_or(chars.len() as i64);

        let len = chars.len() as i64;
        let clamp = |v: i64| -> usize {
            let resolved = if v < 0 { v + len } else { v };
            resolved.clamp(0, len) as usize
        };
        let (lo, hi) = (clamp(start), clamp(end));
        if hi <= lo {
            return Ok(Value::str(String::new()));
        }
        Ok(Value::str(chars[lo..hi].iter().collect::<String>()))
    }

    fn append_highlight(&mut self, args: &[Value]) -> Result<Value, WorkerError> {
        let text = args.first().ok_or_else(|| WorkerError::sandbox("append_highlight() requires text"))?;
        let normalized = crate::citation::normalize_highlight(&text.display());
        if !self.highlights.contains(&normalized) && self.highlights.len() < MAX_HIGHLIGHTS {
            self.highlights.push(normalized);
        }
        Ok(Value::None)
    }

    fn add_citation(&mut self, args: &[Value], kwargs: &HashMap<String, Value>) -> Result<Value, WorkerError> {
        let path = arg_str(args, kwargs, 0, "path")?;
        let start_line = arg_int(args, kwargs, 1, "start_line")?;
        let end_line = arg_int_or(args, kwargs, 2, "end_line", start_line)?;
        let signal = arg_str_opt(args, kwargs, 3, "signal")?.unwrap_or_else(|| "reference".to_string());
        let snippet = arg_str_opt(args, kwargs, 4, "snippet")?.unwrap_or_default();

        if self.find_document(&path).is_none() {
            return Err(WorkerError::sandbox(format!("unknown file: {path}")));
        }

        if self.citations.len() < MAX_CITATIONS {
            self.citations.push(Citation::new(
                path,
                start_line.max(1) as usize,
                end_line.max(1) as usize,
                signal,
                snippet,
            ));
        }
        Ok(Value::None)
    }

    fn set_final(&mut self, args: &[Value]) -> Result<Value, WorkerError> {
        let value = args.first().ok_or_else(|| WorkerError::sandbox("set_final() requires a value"))?;
        self.final_value = Some(value.clone());
        Ok(Value::None)
    }

    async fn sub_rlm(&mut self, args: &[Value], kwargs: &HashMap<String, Value>) -> Result<Value, WorkerError> {
        let prompt = arg_str(args, kwargs, 0, "prompt")?;
        let depth = arg_int_or(args, kwargs, 1, "depth", 1)?;

        if depth < 1 || depth as usize > self.max_depth {
            return Err(WorkerError::limit(format!(
                "sub_rlm depth {depth} exceeds max_depth {}",
                self.max_depth
            )));
        }

        self.subcall_count += 1;
        if self.subcall_count > self.max_subcalls {
            return Err(WorkerError::limit(format!(
                "subcall budget exceeded: {} > {}",
                self.subcall_count, self.max_subcalls
            )));
        }

        let elapsed = self.started_at_monotonic.elapsed();
        if elapsed >= self.timeout {
            return Err(WorkerError::limit("wall-clock timeout exceeded before subcall"));
        }
        let remaining = self.timeout - elapsed;

        let truncated_prompt: String = prompt.chars().take(MAX_SUBCALL_PROMPT_CHARS).collect();

        let result = cli_invoker::invoke(&self.subcall_cli, &self.repo, &truncated_prompt, remaining).await?;

        self.subcall_traces.push(SubcallTrace {
            prompt_chars: truncated_prompt.chars().count(),
            depth: depth as usize,
            returncode: result.returncode,
            duration_ms: result.duration_ms,
            stdout_preview: crate::citation::normalize_highlight(&result.stdout),
            ok: result.ok,
        });

        if !result.ok {
            return Err(WorkerError::model_invocation(format!(
                "sub_rlm child process exited with code {}",
                result.returncode
            )));
        }

        Ok(Value::str(result.stdout.trim().to_string()))
    }
}

fn arg_value<'a>(
    args: &'a [Value],
    kwargs: &'a HashMap<String, Value>,
    position: usize,
    name: &str,
) -> Option<&'a Value> {
    args.get(position).or_else(|| kwargs.get(name))
}

fn arg_str(args: &[Value], kwargs: &HashMap<String, Value>, position: usize, name: &str) -> Result<String, WorkerError> {
    arg_value(args, kwargs, position, name)
        .ok_or_else(|| WorkerError::sandbox(format!("missing required argument: {name}")))
        .and_then(|v| Ok(v.as_str()?.as_str().to_string()))
}

fn arg_str_opt(
    args: &[Value],
    kwargs: &HashMap<String, Value>,
    position: usize,
    name: &str,
) -> Result<Option<String>, WorkerError> {
    match arg_value(args, kwargs, position, name) {
        Some(Value::None) | None => Ok(None),
        Some(v) => Ok(Some(v.as_str()?.as_str().to_string())),
    }
}

fn arg_int(args: &[Value], kwargs: &HashMap<String, Value>, position: usize, name: &str) -> Result<i64, WorkerError> {
    arg_value(args, kwargs, position, name)
        .ok_or_else(|| WorkerError::sandbox(format!("missing required argument: {name}")))
        .and_then(Value::as_int)
}

fn arg_int_or(
    args: &[Value],
    kwargs: &HashMap<String, Value>,
    position: usize,
    name: &str,
    default: i64,
) -> Result<i64, WorkerError> {
    match arg_value(args, kwargs, position, name) {
        Some(Value::None) | None => Ok(default),
        Some(v) => v.as_int(),
    }
}

fn arg_int_opt(
    args: &[Value],
    kwargs: &HashMap<String, Value>,
    position: usize,
    name: &str,
) -> Result<Option<i64>, WorkerError> {
    match arg_value(args, kwargs, position, name) {
        Some(Value::None) | None => Ok(None),
        Some(v) => Ok(Some(v.as_int()?)),
    }
}

impl Value {
    /// Converts a runtime value into the serde JSON representation used by
    /// the final result record.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::None => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Int(n) => serde_json::Value::from(*n),
            Value::Float(f) => serde_json::Number::from_f64(*f)
                .map_or(serde_json::Value::Null, serde_json::Value::Number),
            Value::Str(s) => serde_json::Value::String(s.as_str().to_string()),
            Value::List(items) => serde_json::Value::Array(items.borrow().iter().map(Value::to_json).collect()),
            Value::Tuple(items) => serde_json::Value::Array(items.iter().map(Value::to_json).collect()),
            Value::Set(items) => serde_json::Value::Array(items.borrow().iter().map(Value::to_json).collect()),
            Value::Dict(pairs) => {
                let mut map = serde_json::Map::new();
                for (k, v) in pairs.borrow().iter() {
                    map.insert(k.display(), v.to_json());
                }
                serde_json::Value::Object(map)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_list_files_reflects_document_paths() {
        let mut runtime = SandboxRuntime::new_for_test();
        let value = runtime.list_files().unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(value, Value::list(Vec::new()));
    }

    #[test]
    fn test_append_highlight_caps_at_max() {
        let mut runtime = SandboxRuntime::new_for_test();
        for i in 0..(MAX_HIGHLIGHTS + 10) {
            runtime
                .append_highlight(&[Value::str(format!("highlight {i}"))])
                .unwrap_or_else(|e| panic!("{e}"));
        }
        assert_eq!(runtime.highlights().len(), MAX_HIGHLIGHTS);
    }

    #[test]
    fn test_append_highlight_dedupes_repeats() {
        let mut runtime = SandboxRuntime::new_for_test();
        runtime.append_highlight(&[Value::str("X")]).unwrap_or_else(|e| panic!("{e}"));
        runtime.append_highlight(&[Value::str("X")]).unwrap_or_else(|e| panic!("{e}"));
        runtime.append_highlight(&[Value::str("Y")]).unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(runtime.highlights(), &["X".to_string(), "Y".to_string()]);
    }

    #[test]
    fn test_helpers_reject_calls_once_timeout_elapsed() {
        let mut runtime = SandboxRuntime::new(
            Vec::new(),
            PathBuf::from("."),
            CliSpec {
                command: vec!["/bin/true".to_string()],
                args: Vec::new(),
                prompt_mode: crate::config::PromptMode::Stdin,
                label: "subcall".to_string(),
            },
            Instant::now(),
            Duration::from_secs(0),
            2,
            10,
        );
        assert!(matches!(runtime.list_files(), Err(WorkerError::LimitExceeded { .. })));
        assert!(matches!(
            runtime.slice_text(&[Value::str("x")], &HashMap::new()),
            Err(WorkerError::LimitExceeded { .. })
        ));
    }

    #[test]
    fn test_add_citation_rejects_unknown_path() {
        let mut runtime = SandboxRuntime::new_for_test();
        let mut kwargs = HashMap::new();
        kwargs.insert("path".to_string(), Value::str("missing.rs"));
        let result = runtime.add_citation(&[], &kwargs);
        assert!(matches!(result, Err(WorkerError::SandboxViolation { .. })));
    }

    #[test]
    fn test_set_final_stores_value() {
        let mut runtime = SandboxRuntime::new_for_test();
        runtime.set_final(&[Value::str("done")]).unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(runtime.final_value(), Some(&Value::str("done")));
    }
}
