// packages/engine/src/main.rs
//! Interpose launcher
//!
//! Finds the subsystem artifact, runs its entry point with interposed
//! system calls and prints the launch report as JSON.

use anyhow::{Context, Result};
use interpose_engine::observability::{init_metrics, init_tracing};
use interpose_engine::provider::launcher::Launcher;
use interpose_engine::utils::config::EngineConfig;
use interpose_engine::EngineError;
use tracing::{debug, error, info};

#[tokio::main]
async fn main() -> Result<()> {
    let config = EngineConfig::load().context("loading configuration")?;

    // Initialize observability (tracing, metrics)
    init_tracing(config.observability.json_logs, &config.observability.log_level)?;
    let metrics = init_metrics()?;

    info!("Starting interpose v{}", interpose_engine::VERSION);
    info!("Configuration loaded: {:?}", config);

    let report = Launcher::new(config).launch().await?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    debug!("Metrics:\n{}", metrics.render());

    match report.into_result() {
        Ok(_) => Ok(()),
        Err(e) => {
            let code = match &e {
                EngineError::NonZeroExit(code) => *code,
                _ => 1,
            };
            error!("{:#}", anyhow::Error::new(e));
            std::process::exit(code)
        }
    }
}
