//! `rlms-worker` binary entry point.
//!
//! Parses CLI flags, initializes logging, runs one worker pass, and
//! prints exactly one JSON result line to stdout (spec §6).

use clap::Parser;
use rlms_worker::config::{self, Cli};
use rlms_worker::worker::{self, ResultIdentity};
use tracing_subscriber::EnvFilter;

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let cli = Cli::parse();

    let filter = cli
        .log_level
        .clone()
        .map(EnvFilter::new)
        .or_else(|| EnvFilter::try_from_default_env().ok())
        .unwrap_or_else(|| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let metadata = config::load_metadata_file(cli.metadata_file.as_ref()).unwrap_or_else(|_| serde_json::json!({}));
    let identity = ResultIdentity {
        loop_id: cli.loop_id.clone(),
        role: cli.role.clone(),
        iteration: cli.iteration,
        metadata,
    };

    let config_result = cli.into_worker_config();
    let (record, exit_code) = worker::run_worker(config_result, identity).await;

    #[allow(clippy::print_stdout)]
    {
        println!("{}", serde_json::to_string(&record).unwrap_or_else(|_| "{}".to_string()));
    }

    std::process::exit(exit_code);
}
