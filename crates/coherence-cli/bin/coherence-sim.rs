//! Coherence simulation binary entry point.
//!
//! Parses arguments, initializes logging, runs the simulation and prints the
//! report as JSON on stdout.

use anyhow::{Result, bail};
use coherence_cli::{SimConfig, simulation};

#[tokio::main]
async fn main() -> Result<()> {
    let config = SimConfig::from_args();

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    if config.json_logs {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    }

    tracing::info!(
        "Configuration loaded: workers={}, updates_per_worker={}, sessions={}",
        config.workers,
        config.updates_per_worker,
        config.sessions
    );

    config.validate()?;

    let report = simulation::run(&config).await?;
    println!("{}", serde_json::to_string_pretty(&report)?);

    if report.lost_updates > 0 {
        bail!("{} updates were lost", report.lost_updates);
    }
    Ok(())
}
