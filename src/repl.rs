//! Bounded REPL controller.
//!
//! Drives the root model ↔ sandbox round-trip: builds a prompt, invokes
//! the root CLI, extracts code, validates and executes it against the
//! sandbox runtime, appends to a bounded history, and repeats until the
//! sandbox signals `final` or a budget is exhausted.

use std::sync::LazyLock;
use std::time::{Duration, Instant};

use regex::Regex;
use serde::Serialize;
use tracing::debug;

use crate::cli_invoker;
use crate::config::WorkerConfig;
use crate::document::Document;
use crate::error::WorkerError;
use crate::sandbox::{self, runtime::SandboxRuntime};

/// Most recent history rows surfaced in a built prompt or result record.
const HISTORY_SURFACE_LEN: usize = 8;
/// Cap on the controller's own bounded history.
const HISTORY_CAP: usize = 200;
/// Maximum file-index entries listed in a root prompt before the
/// remainder is summarized as an omitted count.
const FILE_INDEX_LIMIT: usize = 160;

/// One row of the controller's execution history: either a root-model
/// step or a `sub_rlm` call, sharing a flat shape so both serialize into
/// the same `trace` array.
#[derive(Debug, Clone, Serialize)]
pub struct TraceRow {
    /// Step index this row was recorded during (1-based).
    pub step: usize,
    /// `"root"` for a root-model iteration, `"subcall"` for a `sub_rlm` call.
    #[serde(rename = "type")]
    pub kind: &'static str,
    /// Process exit code of the underlying CLI invocation.
    pub returncode: i32,
    /// Wall-clock duration of the underlying invocation, in milliseconds.
    pub duration_ms: u64,
    /// Truncated view of the code executed this step (root rows only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code_preview: Option<String>,
    /// Truncated view of the invocation's captured standard output.
    pub stdout_preview: String,
}

/// The controller's mutable ledger (spec §3 `ExecutionState`).
pub struct ExecutionState {
    started_at_monotonic: Instant,
    max_steps: usize,
    max_depth: usize,
    timeout: Duration,
    max_subcalls: usize,
    step_count: usize,
    history: Vec<TraceRow>,
}

impl ExecutionState {
    #[must_use]
    pub fn new(max_steps: usize, max_depth: usize, timeout: Duration, max_subcalls: usize) -> Self {
        Self {
            started_at_monotonic: Instant::now(),
            max_steps,
            max_depth,
            timeout,
            max_subcalls,
            step_count: 0,
            history: Vec::new(),
        }
    }

    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.started_at_monotonic.elapsed()
    }

    #[must_use]
    pub fn elapsed_seconds(&self) -> f64 {
        self.elapsed().as_secs_f64()
    }

    #[must_use]
    pub fn started_at_monotonic(&self) -> Instant {
        self.started_at_monotonic
    }

    #[must_use]
    pub fn step_count(&self) -> usize {
        self.step_count
    }

    #[must_use]
    pub fn history(&self) -> &[TraceRow] {
        &self.history
    }

    /// The most recent [`HISTORY_SURFACE_LEN`] rows, oldest first.
    #[must_use]
    pub fn recent_history(&self) -> &[TraceRow] {
        let start = self.history.len().saturating_sub(HISTORY_SURFACE_LEN);
        &self.history[start..]
    }

    fn remaining_timeout(&self) -> Duration {
        self.timeout.saturating_sub(self.elapsed())
    }

    fn timed_out(&self) -> bool {
        self.elapsed() >= self.timeout
    }

    fn push(&mut self, row: TraceRow) {
        self.history.push(row);
        if self.history.len() > HISTORY_CAP {
            let overflow = self.history.len() - HISTORY_CAP;
            self.history.drain(0..overflow);
        }
    }
}

/// Outcome of a completed (successful) REPL run: the runtime holding
/// accumulated highlights/citations/final value, and the controller's
/// execution ledger.
pub struct ReplOutcome {
    pub runtime: SandboxRuntime,
    pub state: ExecutionState,
}

/// A REPL run that terminated with an error, carrying the partial
/// execution ledger and runtime so the result assembler can still build
/// a failure record with accurate `stats`/`trace` fields.
pub struct ReplFailure {
    pub error: WorkerError,
    pub runtime: SandboxRuntime,
    pub state: ExecutionState,
}

/// Runs the bounded REPL to completion: either the sandbox sets `final`,
/// or a budget is exhausted and an error is returned alongside the
/// partial ledger accumulated before the failure.
pub async fn run(documents: Vec<Document>, config: &WorkerConfig) -> Result<ReplOutcome, ReplFailure> {
    let timeout = Duration::from_secs(config.timeout_seconds);
    let mut state = ExecutionState::new(config.max_steps, config.max_depth, timeout, config.max_subcalls);
    let mut runtime = SandboxRuntime::new(
        documents.clone(),
        config.repo.clone(),
        config.subcall_cli.clone(),
        state.started_at_monotonic(),
        timeout,
        config.max_depth,
        config.max_subcalls,
    );

    match run_steps(&mut state, &mut runtime, &documents, config).await {
        Ok(()) => Ok(ReplOutcome { runtime, state }),
        Err(error) => Err(ReplFailure { error, runtime, state }),
    }
}

async fn run_steps(
    state: &mut ExecutionState,
    runtime: &mut SandboxRuntime,
    documents: &[Document],
    config: &WorkerConfig,
) -> Result<(), WorkerError> {
    loop {
        if runtime.final_value().is_some() {
            return Ok(());
        }

        state.step_count += 1;
        if state.timed_out() {
            return Err(WorkerError::limit(format!(
                "timeout exceeded ({}s)",
                config.timeout_seconds
            )));
        }

        let prompt = build_root_prompt(state, runtime, documents, config);
        let remaining = state.remaining_timeout();

        let response = cli_invoker::invoke(&config.root_cli, &config.repo, &prompt, remaining).await?;
        if !response.ok {
            return Err(WorkerError::model_invocation(format!(
                "root command failed (rc={}): {}",
                response.returncode,
                compact_preview(&response.stderr, 260)
            )));
        }

        let code = extract_python_code(&response.stdout)
            .ok_or_else(|| WorkerError::sandbox("root model returned empty response"))?;

        debug!(step = state.step_count, code_len = code.len(), "executing extracted fragment");

        let subcalls_before = runtime.subcall_traces().len();
        let outcome = sandbox::validate_and_execute(&code, runtime).await?;

        for trace in &runtime.subcall_traces()[subcalls_before..] {
            state.push(TraceRow {
                step: state.step_count,
                kind: "subcall",
                returncode: trace.returncode,
                duration_ms: trace.duration_ms,
                code_preview: None,
                stdout_preview: trace.stdout_preview.clone(),
            });
        }

        state.push(TraceRow {
            step: state.step_count,
            kind: "root",
            returncode: response.returncode,
            duration_ms: response.duration_ms,
            code_preview: Some(compact_preview(&code, 220)),
            stdout_preview: outcome.stdout_preview.clone(),
        });

        if runtime.final_value().is_none() && state.step_count >= state.max_steps {
            return Err(WorkerError::limit("final value was not set before max_steps"));
        }
    }
}

/// Whitespace-collapses and truncates to `max` visible characters,
/// matching the original worker's `compact_text` used for previews.
fn compact_preview(text: &str, max: usize) -> String {
    let collapsed = crate::citation::normalize_highlight(text);
    if collapsed.chars().count() <= max {
        collapsed
    } else {
        collapsed.chars().take(max).collect()
    }
}

/// Builds the root prompt: persona, identity, helper catalog, rules,
/// metadata, file index, then recent history — in that stable order
/// (spec §4.6).
fn build_root_prompt(
    state: &ExecutionState,
    runtime: &SandboxRuntime,
    documents: &[Document],
    config: &WorkerConfig,
) -> String {
    let mut prompt = String::new();

    prompt.push_str(
        "You are the root model in a recursive language model scaffold.\n\
         Output only restricted-language code. No prose.\n\n",
    );

    prompt.push_str(&format!(
        "Loop: {}\nRole: {}\nIteration: {}\nStep: {}/{}\nElapsed seconds: {:.2}\n\
         Subcalls used: {}/{}\nMax subcall depth: {}\n\n",
        config.loop_id,
        config.role,
        config.iteration,
        state.step_count,
        state.max_steps,
        state.elapsed_seconds(),
        runtime.subcall_count(),
        state.max_subcalls,
        state.max_depth,
    ));

    prompt.push_str("Context is external; use helper functions to inspect it.\nAvailable helpers:\n");
    for signature in HELPER_SIGNATURES {
        prompt.push_str("- ");
        prompt.push_str(signature);
        prompt.push('\n');
    }
    prompt.push('\n');

    prompt.push_str(
        "Rules:\n\
         - Do not use import statements.\n\
         - Do not access files or network directly.\n\
         - Keep the code compact and deterministic.\n\
         - If finished, call set_final({...}) with highlights and citations.\n\n",
    );

    prompt.push_str(&format!("Current metadata JSON:\n{}\n\n", config.metadata));

    prompt.push_str("Context file index:\n");
    if documents.is_empty() {
        prompt.push_str("(no files)\n");
    } else {
        for document in documents.iter().take(FILE_INDEX_LIMIT) {
            let estimated_tokens = estimate_tokens(document.text().chars().count());
            prompt.push_str(&format!(
                "- {} ({} lines, {} est tokens)\n",
                document.path(),
                document.line_count(),
                estimated_tokens
            ));
        }
        if documents.len() > FILE_INDEX_LIMIT {
            prompt.push_str(&format!(
                "- ... ({} more files omitted)\n",
                documents.len() - FILE_INDEX_LIMIT
            ));
        }
    }
    prompt.push('\n');

    prompt.push_str("Recent execution history:\n");
    prompt.push_str(&summarize_history(state.recent_history()));
    prompt.push('\n');

    prompt
}

fn summarize_history(rows: &[TraceRow]) -> String {
    if rows.is_empty() {
        return "(none)".to_string();
    }
    rows.iter()
        .map(|row| {
            format!(
                "step={} rc={} code={} stdout={}",
                row.step,
                row.returncode,
                compact_preview(row.code_preview.as_deref().unwrap_or(""), 120),
                compact_preview(&row.stdout_preview, 120),
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// `⌈char_count / 4⌉`, matching the result assembler's token estimate.
#[must_use]
pub fn estimate_tokens(char_count: usize) -> usize {
    char_count.div_ceil(4)
}

const HELPER_SIGNATURES: &[&str] = &[
    "list_files() -> list[str]",
    "read_file(path, start_line=1, end_line=None) -> str",
    "grep(pattern, path=None, max_matches=80, flags='') -> list[{path,start_line,end_line,signal,snippet}]",
    "slice_text(text, start=0, end=None) -> str",
    "append_highlight(text)",
    "add_citation(path, start_line, end_line, signal='reference', snippet='')",
    "sub_rlm(prompt, depth=1) -> str",
    "set_final(value)  # call this when done",
];

static FENCE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)```[ \t]*[a-z0-9_+-]*[ \t]*\r?\n?(.*?)```")
        .unwrap_or_else(|e| panic!("bad fenced-code-block pattern: {e}"))
});

/// Extracts model-emitted code from a root response.
///
/// If one or more fenced code blocks are present, the longest block's
/// interior text wins (ties broken by first occurrence). Otherwise the
/// stripped full response is used. Returns `None` if the result is empty.
#[must_use]
pub fn extract_python_code(raw: &str) -> Option<String> {
    let mut longest: Option<&str> = None;
    for captures in FENCE_RE.captures_iter(raw) {
        let Some(interior) = captures.get(1) else { continue };
        let interior = interior.as_str();
        if longest.is_none_or(|current| interior.chars().count() > current.chars().count()) {
            longest = Some(interior);
        }
    }

    if let Some(block) = longest {
        let trimmed = block.trim();
        if !trimmed.is_empty() {
            return Some(trimmed.to_string());
        }
    }

    let stripped = raw.trim();
    if stripped.is_empty() {
        None
    } else {
        Some(stripped.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_python_code_picks_longest_fenced_block() {
        let raw = "```python\nshort()\n```\nsome prose\n```\nprint('longer block body')\n```\n";
        let code = extract_python_code(raw).unwrap_or_else(|| panic!("expected code"));
        assert_eq!(code, "print('longer block body')");
    }

    #[test]
    fn test_extract_python_code_falls_back_to_stripped_full_text() {
        let raw = "  set_final('done')  \n";
        let code = extract_python_code(raw).unwrap_or_else(|| panic!("expected code"));
        assert_eq!(code, "set_final('done')");
    }

    #[test]
    fn test_extract_python_code_empty_is_none() {
        assert!(extract_python_code("   \n  ").is_none());
    }

    #[test]
    fn test_extract_python_code_ties_prefer_first_occurrence() {
        let raw = "```\nfirst_five\n```\n```\nsecnd5\n```\n";
        let code = extract_python_code(raw).unwrap_or_else(|| panic!("expected code"));
        assert_eq!(code, "first_five");
    }

    #[test]
    fn test_estimate_tokens_rounds_up() {
        assert_eq!(estimate_tokens(1), 1);
        assert_eq!(estimate_tokens(4), 1);
        assert_eq!(estimate_tokens(5), 2);
        assert_eq!(estimate_tokens(0), 0);
    }

    #[test]
    fn test_execution_state_history_caps_at_200() {
        let mut state = ExecutionState::new(1, 1, Duration::from_secs(60), 2);
        for i in 0..250 {
            state.push(TraceRow {
                step: i,
                kind: "root",
                returncode: 0,
                duration_ms: 1,
                code_preview: None,
                stdout_preview: String::new(),
            });
        }
        assert_eq!(state.history().len(), HISTORY_CAP);
        assert_eq!(state.history().last().map(|r| r.step), Some(249));
    }

    #[test]
    fn test_execution_state_recent_history_surfaces_last_eight() {
        let mut state = ExecutionState::new(1, 1, Duration::from_secs(60), 2);
        for i in 0..20 {
            state.push(TraceRow {
                step: i,
                kind: "root",
                returncode: 0,
                duration_ms: 1,
                code_preview: None,
                stdout_preview: String::new(),
            });
        }
        let recent = state.recent_history();
        assert_eq!(recent.len(), HISTORY_SURFACE_LEN);
        assert_eq!(recent.first().map(|r| r.step), Some(12));
        assert_eq!(recent.last().map(|r| r.step), Some(19));
    }
}
