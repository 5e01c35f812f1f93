//! CLI invoker.
//!
//! Spawns a configured external model command, delivering the prompt via
//! standard input or a temporary file per [`PromptMode`], enforcing a
//! per-call timeout, and returning exit code / stdout / stderr / duration.

use std::io::Write as _;
use std::path::Path;
use std::process::Stdio;
use std::time::{Duration, Instant};

use tokio::io::AsyncWriteExt as _;
use tokio::process::Command;

use crate::config::{CliSpec, PromptMode};
use crate::error::WorkerError;

/// Floor applied to every child-process timeout, regardless of remaining
/// wall-clock budget.
pub const MIN_TIMEOUT: Duration = Duration::from_secs(1);

/// Outcome of a single CLI invocation.
#[derive(Debug, Clone)]
pub struct CliInvocationResult {
    /// `true` iff the process exited with status 0.
    pub ok: bool,
    /// Process exit code (best-effort; `-1` if terminated by a signal).
    pub returncode: i32,
    /// Captured standard output.
    pub stdout: String,
    /// Captured standard error.
    pub stderr: String,
    /// Wall-clock duration of the invocation, in milliseconds.
    pub duration_ms: u64,
    /// The argv actually executed, after placeholder substitution.
    pub expanded_command: Vec<String>,
}

/// Invokes `spec`'s command against `prompt`, with `repo` as the working
/// directory and `requested_timeout` as the ceiling (floored at
/// [`MIN_TIMEOUT`]).
///
/// Every argv token has `{repo}`, `{prompt_file}`, and `{last_message_file}`
/// substituted textually before the process is spawned. The prompt is
/// always written to a temporary file (so `{prompt_file}`/`{last_message_file}`
/// resolve to real paths); it is additionally piped to stdin when
/// `spec.prompt_mode` is [`PromptMode::Stdin`]. The temporary file is
/// removed on every exit path.
///
/// # Errors
///
/// Returns [`WorkerError::ModelInvocationFailed`] if the process cannot be
/// spawned or times out.
pub async fn invoke(
    spec: &CliSpec,
    repo: &Path,
    prompt: &str,
    requested_timeout: Duration,
) -> Result<CliInvocationResult, WorkerError> {
    let timeout = requested_timeout.max(MIN_TIMEOUT);

    let prompt_file = write_temp_prompt(prompt)?;
    let cleanup = TempFileGuard(prompt_file.clone());

    let repo_str = repo.to_string_lossy().into_owned();
    let prompt_file_str = prompt_file.to_string_lossy().into_owned();

    let expanded_command: Vec<String> = spec
        .argv()
        .into_iter()
        .map(|token| {
            token
                .replace("{repo}", &repo_str)
                .replace("{prompt_file}", &prompt_file_str)
                .replace("{last_message_file}", &prompt_file_str)
        })
        .collect();

    let Some((program, rest)) = expanded_command.split_first() else {
        return Err(WorkerError::model_invocation(
            "expanded command is empty after placeholder substitution",
        ));
    };

    let mut command = Command::new(program);
    command
        .args(rest)
        .current_dir(repo)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    let started = Instant::now();

    let spawn_and_run = async {
        let mut child = command
            .spawn()
            .map_err(|e| WorkerError::model_invocation(format!("failed to spawn {program}: {e}")))?;

        if spec.prompt_mode == PromptMode::Stdin {
            if let Some(mut stdin) = child.stdin.take() {
                stdin
                    .write_all(prompt.as_bytes())
                    .await
                    .map_err(|e| WorkerError::model_invocation(format!("failed to write stdin: {e}")))?;
            }
        }
        drop(child.stdin.take());

        child
            .wait_with_output()
            .await
            .map_err(|e| WorkerError::model_invocation(format!("failed to read child output: {e}")))
    };

    let outcome = tokio::time::timeout(timeout, spawn_and_run).await;
    let duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

    drop(cleanup);

    let output = match outcome {
        Ok(Ok(output)) => output,
        Ok(Err(err)) => return Err(err),
        Err(_) => {
            return Err(WorkerError::model_invocation(format!(
                "{} timed out after {}ms",
                spec.label,
                timeout.as_millis()
            )));
        }
    };

    let returncode = output.status.code().unwrap_or(-1);

    Ok(CliInvocationResult {
        ok: output.status.success(),
        returncode,
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        duration_ms,
        expanded_command,
    })
}

fn write_temp_prompt(prompt: &str) -> Result<std::path::PathBuf, WorkerError> {
    let unique = format!(
        "rlms-worker-prompt-{}-{}.txt",
        std::process::id(),
        next_sequence()
    );
    let path = std::env::temp_dir().join(unique);

    let mut file = std::fs::File::create(&path).map_err(|e| {
        WorkerError::model_invocation(format!("failed to create prompt file: {e}"))
    })?;
    file.write_all(prompt.as_bytes()).map_err(|e| {
        WorkerError::model_invocation(format!("failed to write prompt file: {e}"))
    })?;

    Ok(path)
}

fn next_sequence() -> u64 {
    use std::sync::atomic::{AtomicU64, Ordering};
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    COUNTER.fetch_add(1, Ordering::Relaxed)
}

/// Removes the temporary prompt file when dropped, on every exit path.
struct TempFileGuard(std::path::PathBuf);

impl Drop for TempFileGuard {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn spec(command: Vec<&str>, prompt_mode: PromptMode) -> CliSpec {
        CliSpec {
            command: command.into_iter().map(ToString::to_string).collect(),
            args: Vec::new(),
            prompt_mode,
            label: "test".to_string(),
        }
    }

    #[tokio::test]
    async fn test_invoke_echoes_stdin() {
        let spec = spec(vec!["/bin/cat"], PromptMode::Stdin);
        let result = invoke(&spec, Path::new("."), "hello", Duration::from_secs(5))
            .await
            .unwrap_or_else(|e| panic!("invoke failed: {e}"));

        assert!(result.ok);
        assert_eq!(result.stdout, "hello");
    }

    #[tokio::test]
    async fn test_invoke_substitutes_prompt_file_placeholder() {
        let spec = CliSpec {
            command: vec!["/bin/cat".to_string(), "{prompt_file}".to_string()],
            args: Vec::new(),
            prompt_mode: PromptMode::File,
            label: "test".to_string(),
        };
        let result = invoke(&spec, Path::new("."), "from file", Duration::from_secs(5))
            .await
            .unwrap_or_else(|e| panic!("invoke failed: {e}"));

        assert!(result.ok);
        assert_eq!(result.stdout, "from file");
    }

    #[tokio::test]
    async fn test_invoke_times_out() {
        let spec = spec(vec!["/bin/sleep", "10"], PromptMode::Stdin);
        let result = invoke(&spec, Path::new("."), "", Duration::from_millis(50)).await;
        assert!(matches!(
            result,
            Err(WorkerError::ModelInvocationFailed { .. })
        ));
    }

    #[tokio::test]
    async fn test_invoke_missing_command() {
        let spec = spec(vec!["/nonexistent/not-a-real-binary"], PromptMode::Stdin);
        let result = invoke(&spec, Path::new("."), "", Duration::from_secs(5)).await;
        assert!(matches!(
            result,
            Err(WorkerError::ModelInvocationFailed { .. })
        ));
    }

    #[tokio::test]
    async fn test_invoke_cleans_up_temp_file() {
        let spec = spec(vec!["/bin/echo", "done"], PromptMode::Stdin);
        invoke(&spec, Path::new("."), "x", Duration::from_secs(5))
            .await
            .unwrap_or_else(|e| panic!("invoke failed: {e}"));

        let leftover: Vec<PathBuf> = std::fs::read_dir(std::env::temp_dir())
            .into_iter()
            .flatten()
            .filter_map(std::result::Result::ok)
            .map(|entry| entry.path())
            .filter(|p| {
                p.file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.starts_with("rlms-worker-prompt-"))
            })
            .collect();
        assert!(leftover.is_empty());
    }
}
