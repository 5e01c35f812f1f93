//! Top-level worker orchestration: load documents, run the structural
//! scanner, bootstrap the sandbox, drive the REPL controller, and
//! assemble a single result record.

use serde_json::Value as JsonValue;

use crate::assembler;
use crate::config::WorkerConfig;
use crate::document;
use crate::error::WorkerError;
use crate::repl;
use crate::scanner;

/// Runs one worker pass end to end and returns the JSON result record to
/// print, plus the process exit code.
///
/// Never returns `Err`: every failure mode is captured in the returned
/// record (spec §7's propagation rule — no partial retries, the result
/// record always carries `error`/`error_code` on failure).
pub async fn run_worker(config_result: Result<WorkerConfig, WorkerError>, identity: ResultIdentity) -> (JsonValue, i32) {
    let config = match config_result {
        Ok(config) => config,
        Err(error) => {
            let record = assembler::assemble_config_failure(
                &identity.loop_id,
                &identity.role,
                identity.iteration,
                &error,
                &identity.metadata,
            );
            return (record, error.exit_code());
        }
    };

    if let Err(error) = std::fs::create_dir_all(&config.output_dir) {
        let error = WorkerError::InvalidConfig {
            message: format!("failed to create output dir {}: {error}", config.output_dir.display()),
        };
        let record = assembler::assemble_config_failure(
            &config.loop_id,
            &config.role,
            config.iteration,
            &error,
            &config.metadata,
        );
        return (record, error.exit_code());
    }

    let documents = document::load_documents(&config.context_file_list, &config.repo);
    let scan = scanner::scan(&documents);

    match repl::run(documents.clone(), &config).await {
        Ok(outcome) => {
            let record = assembler::assemble_success(&config, &documents, &scan, &outcome.runtime, &outcome.state);
            (record, 0)
        }
        Err(failure) => {
            let subcall_count = failure.runtime.subcall_count();
            let record = assembler::assemble_run_failure(&config, &failure.error, &failure.state, subcall_count);
            (record, failure.error.exit_code())
        }
    }
}

/// Identity fields echoed into a config-stage failure record, captured
/// before `WorkerConfig` validation can be trusted to have produced
/// them.
pub struct ResultIdentity {
    pub loop_id: String,
    pub role: String,
    pub iteration: u64,
    pub metadata: JsonValue,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WorkerConfig;

    fn identity() -> ResultIdentity {
        ResultIdentity {
            loop_id: "L1".to_string(),
            role: "analysis".to_string(),
            iteration: 0,
            metadata: serde_json::json!({}),
        }
    }

    #[tokio::test]
    async fn test_run_worker_invalid_config_short_circuits_before_any_state() {
        let (record, exit_code) = run_worker(
            Err(WorkerError::InvalidConfig {
                message: "bad flag".to_string(),
            }),
            identity(),
        )
        .await;

        assert_eq!(exit_code, 2);
        assert_eq!(record["ok"], serde_json::json!(false));
        assert_eq!(record["error_code"], serde_json::json!("invalid_config"));
        assert!(record.get("stats").is_none());
        assert!(record.get("trace").is_none());
    }

    #[tokio::test]
    async fn test_run_worker_missing_root_command() {
        let (record, exit_code) = run_worker(Err(WorkerError::MissingRootCommand), identity()).await;
        assert_eq!(exit_code, 2);
        assert_eq!(record["error_code"], serde_json::json!("missing_root_command"));
    }

    #[tokio::test]
    async fn test_run_worker_model_invocation_failure_carries_partial_stats() {
        let dir = tempfile::tempdir().unwrap_or_else(|e| panic!("tempdir failed: {e}"));
        let list_path = dir.path().join("files.txt");
        std::fs::write(&list_path, "").unwrap_or_else(|e| panic!("write failed: {e}"));

        let config = WorkerConfig::builder()
            .repo(dir.path())
            .context_file_list(&list_path)
            .output_dir(dir.path().join("out"))
            .root_command(vec!["/bin/sh".to_string(), "-c".to_string(), "exit 7".to_string()])
            .max_steps(3)
            .timeout_seconds(30)
            .build()
            .unwrap_or_else(|e| panic!("build failed: {e}"));

        let (record, exit_code) = run_worker(Ok(config), identity()).await;
        assert_eq!(exit_code, 1);
        assert_eq!(record["error_code"], serde_json::json!("model_invocation_failed"));
        assert!(record.get("stats").is_some());
        assert!(record.get("trace").is_some());
    }
}
