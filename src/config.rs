//! Worker configuration: CLI surface and validated runtime config.
//!
//! Configuration is resolved in one pass: parse CLI flags, then validate
//! into a [`WorkerConfig`] through [`WorkerConfigBuilder`]. Unlike a
//! long-lived agent, this worker is one-shot and takes no configuration
//! from the environment beyond logging verbosity.

use std::path::PathBuf;

use clap::{Parser, ValueEnum};
use serde::{Deserialize, Serialize};

use crate::error::WorkerError;

/// How the prompt is delivered to a model CLI invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PromptMode {
    /// Prompt is written to stdin.
    Stdin,
    /// Prompt is written to a temporary file whose path is substituted
    /// for the `{prompt_file}` placeholder.
    File,
}

/// A CLI specification for invoking a model process.
#[derive(Debug, Clone)]
pub struct CliSpec {
    /// argv\[0\] and any command-level arguments baked into the command itself.
    pub command: Vec<String>,
    /// Additional argv tokens appended after `command`.
    pub args: Vec<String>,
    /// How the prompt is delivered.
    pub prompt_mode: PromptMode,
    /// Human-readable tag used in trace rows and logs.
    pub label: String,
}

impl CliSpec {
    /// Full argv: `command` followed by `args`.
    #[must_use]
    pub fn argv(&self) -> Vec<String> {
        let mut argv = self.command.clone();
        argv.extend(self.args.iter().cloned());
        argv
    }
}

/// Fully validated configuration for a single worker run.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Working directory for child processes; root for relative paths.
    pub repo: PathBuf,
    /// Identity field echoed in the result and root prompt.
    pub loop_id: String,
    /// Identity field echoed in the result and root prompt.
    pub role: String,
    /// Identity field echoed in the result and root prompt.
    pub iteration: u64,
    /// Path to newline-delimited file of candidate document paths.
    pub context_file_list: PathBuf,
    /// Directory that must exist (or be created) before running.
    pub output_dir: PathBuf,
    /// Ceiling on root iterations.
    pub max_steps: usize,
    /// Ceiling accepted by `sub_rlm(depth=...)`.
    pub max_depth: usize,
    /// Wall-clock ceiling for the whole worker run.
    pub timeout_seconds: u64,
    /// Ceiling on total `sub_rlm` invocations across the run. Always
    /// `2 * max_steps`; not independently configurable (see Open Question
    /// decisions in DESIGN.md).
    pub max_subcalls: usize,
    /// CLI spec for the root model.
    pub root_cli: CliSpec,
    /// CLI spec for `sub_rlm` (falls back to `root_cli` when unset).
    pub subcall_cli: CliSpec,
    /// If true and no citations were produced, synthesize fallbacks.
    pub require_citations: bool,
    /// Passed through to the result record.
    pub format: String,
    /// Optional JSON object echoed into prompt and result.
    pub metadata: serde_json::Value,
}

/// Builder for [`WorkerConfig`].
#[derive(Debug, Clone, Default)]
pub struct WorkerConfigBuilder {
    repo: Option<PathBuf>,
    loop_id: Option<String>,
    role: Option<String>,
    iteration: Option<u64>,
    context_file_list: Option<PathBuf>,
    output_dir: Option<PathBuf>,
    max_steps: Option<usize>,
    max_depth: Option<usize>,
    timeout_seconds: Option<u64>,
    root_command: Option<Vec<String>>,
    root_args: Option<Vec<String>>,
    root_prompt_mode: Option<PromptMode>,
    subcall_command: Option<Vec<String>>,
    subcall_args: Option<Vec<String>>,
    subcall_prompt_mode: Option<PromptMode>,
    require_citations: Option<bool>,
    format: Option<String>,
    metadata: Option<serde_json::Value>,
}

impl WorkerConfig {
    /// Creates a new builder.
    #[must_use]
    pub fn builder() -> WorkerConfigBuilder {
        WorkerConfigBuilder::default()
    }
}

impl WorkerConfigBuilder {
    /// Sets the repo root.
    #[must_use]
    pub fn repo(mut self, repo: impl Into<PathBuf>) -> Self {
        self.repo = Some(repo.into());
        self
    }

    /// Sets the loop id.
    #[must_use]
    pub fn loop_id(mut self, loop_id: impl Into<String>) -> Self {
        self.loop_id = Some(loop_id.into());
        self
    }

    /// Sets the role.
    #[must_use]
    pub fn role(mut self, role: impl Into<String>) -> Self {
        self.role = Some(role.into());
        self
    }

    /// Sets the iteration number.
    #[must_use]
    pub const fn iteration(mut self, iteration: u64) -> Self {
        self.iteration = Some(iteration);
        self
    }

    /// Sets the context file list path.
    #[must_use]
    pub fn context_file_list(mut self, path: impl Into<PathBuf>) -> Self {
        self.context_file_list = Some(path.into());
        self
    }

    /// Sets the output directory.
    #[must_use]
    pub fn output_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.output_dir = Some(path.into());
        self
    }

    /// Sets the step ceiling.
    #[must_use]
    pub const fn max_steps(mut self, n: usize) -> Self {
        self.max_steps = Some(n);
        self
    }

    /// Sets the subcall depth ceiling.
    #[must_use]
    pub const fn max_depth(mut self, n: usize) -> Self {
        self.max_depth = Some(n);
        self
    }

    /// Sets the wall-clock ceiling in seconds.
    #[must_use]
    pub const fn timeout_seconds(mut self, n: u64) -> Self {
        self.timeout_seconds = Some(n);
        self
    }

    /// Sets the root command (argv\[0\] and baked-in arguments).
    #[must_use]
    pub fn root_command(mut self, command: Vec<String>) -> Self {
        self.root_command = Some(command);
        self
    }

    /// Sets additional root argv tokens.
    #[must_use]
    pub fn root_args(mut self, args: Vec<String>) -> Self {
        self.root_args = Some(args);
        self
    }

    /// Sets the root prompt delivery mode.
    #[must_use]
    pub const fn root_prompt_mode(mut self, mode: PromptMode) -> Self {
        self.root_prompt_mode = Some(mode);
        self
    }

    /// Sets the subcall command; empty falls back to the root command.
    #[must_use]
    pub fn subcall_command(mut self, command: Vec<String>) -> Self {
        self.subcall_command = Some(command);
        self
    }

    /// Sets additional subcall argv tokens.
    #[must_use]
    pub fn subcall_args(mut self, args: Vec<String>) -> Self {
        self.subcall_args = Some(args);
        self
    }

    /// Sets the subcall prompt delivery mode.
    #[must_use]
    pub const fn subcall_prompt_mode(mut self, mode: PromptMode) -> Self {
        self.subcall_prompt_mode = Some(mode);
        self
    }

    /// Sets whether citations are required (triggers fallback synthesis).
    #[must_use]
    pub const fn require_citations(mut self, value: bool) -> Self {
        self.require_citations = Some(value);
        self
    }

    /// Sets the passthrough result format.
    #[must_use]
    pub fn format(mut self, format: impl Into<String>) -> Self {
        self.format = Some(format.into());
        self
    }

    /// Sets the metadata object echoed into prompt and result.
    #[must_use]
    pub fn metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = Some(metadata);
        self
    }

    /// Validates and builds the [`WorkerConfig`].
    ///
    /// # Errors
    ///
    /// Returns [`WorkerError::MissingRootCommand`] if the root command is
    /// empty, or [`WorkerError::InvalidConfig`] if `max_steps`, `max_depth`,
    /// or `timeout_seconds` is zero.
    pub fn build(self) -> Result<WorkerConfig, WorkerError> {
        let root_command = self.root_command.unwrap_or_default();
        if root_command.is_empty() {
            return Err(WorkerError::MissingRootCommand);
        }

        let max_steps = self.max_steps.unwrap_or(20);
        let max_depth = self.max_depth.unwrap_or(2);
        let timeout_seconds = self.timeout_seconds.unwrap_or(120);

        if max_steps == 0 || max_depth == 0 || timeout_seconds == 0 {
            return Err(WorkerError::InvalidConfig {
                message: "max_steps, max_depth, and timeout_seconds must all be >= 1".to_string(),
            });
        }

        let root_prompt_mode = self.root_prompt_mode.unwrap_or(PromptMode::Stdin);
        let root_cli = CliSpec {
            command: root_command,
            args: self.root_args.unwrap_or_default(),
            prompt_mode: root_prompt_mode,
            label: "root".to_string(),
        };

        let subcall_command = self.subcall_command.unwrap_or_default();
        let subcall_cli = if subcall_command.is_empty() {
            CliSpec {
                command: root_cli.command.clone(),
                args: root_cli.args.clone(),
                prompt_mode: root_cli.prompt_mode,
                label: "subcall".to_string(),
            }
        } else {
            CliSpec {
                command: subcall_command,
                args: self.subcall_args.unwrap_or_default(),
                prompt_mode: self.subcall_prompt_mode.unwrap_or(root_prompt_mode),
                label: "subcall".to_string(),
            }
        };

        Ok(WorkerConfig {
            repo: self.repo.unwrap_or_else(|| PathBuf::from(".")),
            loop_id: self.loop_id.unwrap_or_default(),
            role: self.role.unwrap_or_default(),
            iteration: self.iteration.unwrap_or(0),
            context_file_list: self
                .context_file_list
                .unwrap_or_else(|| PathBuf::from("context_files.txt")),
            output_dir: self.output_dir.unwrap_or_else(|| PathBuf::from(".")),
            max_steps,
            max_depth,
            timeout_seconds,
            max_subcalls: 2 * max_steps,
            root_cli,
            subcall_cli,
            require_citations: self.require_citations.unwrap_or(false),
            format: self.format.unwrap_or_else(|| "json".to_string()),
            metadata: self.metadata.unwrap_or_else(|| serde_json::json!({})),
        })
    }
}

/// Parses a JSON array of strings, used for `--root-command`-style flags.
///
/// # Errors
///
/// Returns [`WorkerError::InvalidConfig`] if `raw` is not valid JSON or
/// not an array of strings.
pub fn parse_json_string_array(raw: &str) -> Result<Vec<String>, WorkerError> {
    let value: serde_json::Value = serde_json::from_str(raw).map_err(|e| WorkerError::InvalidConfig {
        message: format!("invalid JSON array: {e}"),
    })?;

    let array = value.as_array().ok_or_else(|| WorkerError::InvalidConfig {
        message: "expected a JSON array of strings".to_string(),
    })?;

    array
        .iter()
        .map(|item| {
            item.as_str()
                .map(ToString::to_string)
                .ok_or_else(|| WorkerError::InvalidConfig {
                    message: "expected a JSON array of strings".to_string(),
                })
        })
        .collect()
}

/// Loads and parses an optional JSON metadata file; missing path yields `{}`.
///
/// # Errors
///
/// Returns [`WorkerError::InvalidConfig`] if the file exists but is not
/// valid JSON.
pub fn load_metadata_file(path: Option<&PathBuf>) -> Result<serde_json::Value, WorkerError> {
    let Some(path) = path else {
        return Ok(serde_json::json!({}));
    };

    let contents = std::fs::read_to_string(path).map_err(|e| WorkerError::InvalidConfig {
        message: format!("failed to read metadata file {}: {e}", path.display()),
    })?;

    serde_json::from_str(&contents).map_err(|e| WorkerError::InvalidConfig {
        message: format!("metadata file {} is not valid JSON: {e}", path.display()),
    })
}

/// Command-line interface for the `rlms-worker` binary.
///
/// A single flat command: every option in the configuration surface is a
/// top-level flag, matching the invoker-supplied flag table this worker
/// expects rather than a multi-subcommand CLI.
#[derive(Parser, Debug)]
#[command(name = "rlms-worker")]
#[command(version, about, long_about = None)]
#[command(after_help = r#"Examples:
  rlms-worker --repo . --loop-id L1 --role analysis --iteration 0 \
    --context-file-list files.txt --output-dir out \
    --root-command '["claude"]' --root-args '["-p"]' \
    --max-steps 20 --max-depth 2 --timeout-seconds 120
"#)]
pub struct Cli {
    /// Working directory for child processes; root for relative paths.
    #[arg(long)]
    pub repo: PathBuf,

    /// Identity field echoed in the result and root prompt.
    #[arg(long)]
    pub loop_id: String,

    /// Identity field echoed in the result and root prompt.
    #[arg(long)]
    pub role: String,

    /// Identity field echoed in the result and root prompt.
    #[arg(long, default_value_t = 0)]
    pub iteration: u64,

    /// Path to newline-delimited file of candidate document paths.
    #[arg(long)]
    pub context_file_list: PathBuf,

    /// Directory that must exist (or be created) before running.
    #[arg(long)]
    pub output_dir: PathBuf,

    /// Ceiling on root iterations.
    #[arg(long, default_value_t = 20)]
    pub max_steps: usize,

    /// Ceiling accepted by `sub_rlm(depth=...)`.
    #[arg(long, default_value_t = 2)]
    pub max_depth: usize,

    /// Wall-clock ceiling for the whole worker run.
    #[arg(long, default_value_t = 120)]
    pub timeout_seconds: u64,

    /// Root model command, as a JSON array of argv tokens.
    #[arg(long)]
    pub root_command_json: String,

    /// Additional root argv tokens, as a JSON array.
    #[arg(long, default_value = "[]")]
    pub root_args_json: String,

    /// Root prompt delivery mode.
    #[arg(long, value_enum, default_value_t = PromptMode::Stdin)]
    pub root_prompt_mode: PromptMode,

    /// Subcall model command, as a JSON array of argv tokens. Falls back
    /// to the root command when empty.
    #[arg(long, default_value = "[]")]
    pub subcall_command_json: String,

    /// Additional subcall argv tokens, as a JSON array.
    #[arg(long, default_value = "[]")]
    pub subcall_args_json: String,

    /// Subcall prompt delivery mode. Falls back to `root_prompt_mode` when unset.
    #[arg(long, value_enum)]
    pub subcall_prompt_mode: Option<PromptMode>,

    /// If set and no citations are produced, synthesize fallbacks.
    #[arg(long)]
    pub require_citations: bool,

    /// Passed through to the result record.
    #[arg(long, default_value = "json")]
    pub format: String,

    /// Optional path to a JSON object echoed into prompt and result.
    #[arg(long)]
    pub metadata_file: Option<PathBuf>,

    /// Log verbosity (falls back to `RUST_LOG`, then `info`).
    #[arg(long)]
    pub log_level: Option<String>,
}

impl Cli {
    /// Converts parsed CLI flags into a validated [`WorkerConfig`].
    ///
    /// # Errors
    ///
    /// Returns [`WorkerError::InvalidConfig`] if any JSON flag or the
    /// metadata file fails to parse, or if budget flags are invalid.
    pub fn into_worker_config(self) -> Result<WorkerConfig, WorkerError> {
        let root_command = parse_json_string_array(&self.root_command_json)?;
        let root_args = parse_json_string_array(&self.root_args_json)?;
        let subcall_command = parse_json_string_array(&self.subcall_command_json)?;
        let subcall_args = parse_json_string_array(&self.subcall_args_json)?;
        let metadata = load_metadata_file(self.metadata_file.as_ref())?;

        WorkerConfig::builder()
            .repo(self.repo)
            .loop_id(self.loop_id)
            .role(self.role)
            .iteration(self.iteration)
            .context_file_list(self.context_file_list)
            .output_dir(self.output_dir)
            .max_steps(self.max_steps)
            .max_depth(self.max_depth)
            .timeout_seconds(self.timeout_seconds)
            .root_command(root_command)
            .root_args(root_args)
            .root_prompt_mode(self.root_prompt_mode)
            .subcall_command(subcall_command)
            .subcall_args(subcall_args)
            .subcall_prompt_mode(self.subcall_prompt_mode.unwrap_or(self.root_prompt_mode))
            .require_citations(self.require_citations)
            .format(self.format)
            .metadata(metadata)
            .build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_missing_root_command() {
        let result = WorkerConfig::builder().build();
        assert!(matches!(result, Err(WorkerError::MissingRootCommand)));
    }

    #[test]
    fn test_builder_defaults() {
        let config = WorkerConfig::builder()
            .root_command(vec!["echo".to_string()])
            .build()
            .unwrap_or_else(|e| panic!("build failed: {e}"));

        assert_eq!(config.max_steps, 20);
        assert_eq!(config.max_subcalls, 40);
        assert_eq!(config.subcall_cli.command, vec!["echo".to_string()]);
    }

    #[test]
    fn test_builder_rejects_zero_max_steps() {
        let result = WorkerConfig::builder()
            .root_command(vec!["echo".to_string()])
            .max_steps(0)
            .build();
        assert!(matches!(result, Err(WorkerError::InvalidConfig { .. })));
    }

    #[test]
    fn test_subcall_falls_back_to_root() {
        let config = WorkerConfig::builder()
            .root_command(vec!["model".to_string()])
            .root_args(vec!["--flag".to_string()])
            .build()
            .unwrap_or_else(|e| panic!("build failed: {e}"));

        assert_eq!(config.subcall_cli.command, vec!["model".to_string()]);
        assert_eq!(config.subcall_cli.args, vec!["--flag".to_string()]);
    }

    #[test]
    fn test_parse_json_string_array() {
        let parsed = parse_json_string_array(r#"["a", "b"]"#).unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(parsed, vec!["a".to_string(), "b".to_string()]);

        assert!(parse_json_string_array("not json").is_err());
        assert!(parse_json_string_array(r#"[1, 2]"#).is_err());
    }

    #[test]
    fn test_load_metadata_file_missing_path_is_empty_object() {
        let metadata = load_metadata_file(None).unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(metadata, serde_json::json!({}));
    }
}
