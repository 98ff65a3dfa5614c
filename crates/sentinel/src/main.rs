//! sentinel — the agent half of a file integrity monitoring service.
//!
//! On startup the agent asks the server for the watched paths and
//! whether to write a baseline, streams the requested snapshot, then
//! watches the paths and reports debounced filesystem events until it
//! is interrupted.

mod agent;
mod baseline;
mod config;
mod fs_object;
mod signal;

use std::{path::PathBuf, process::ExitCode};

use anyhow::Context;
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use crate::{agent::Agent, config::Config};

#[derive(Debug, Parser)]
#[command(name = "sentinel", about = "File integrity monitoring agent", version)]
struct Args {
    /// Path to load the configuration from.
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{err:#}");
            ExitCode::FAILURE
        }
    }
}

#[tokio::main]
async fn run(args: Args) -> anyhow::Result<()> {
    let config = Config::from_yaml_file(&args.config).context("failed to read config")?;

    let agent = Agent::new(config);
    let client = agent
        .connect()
        .await
        .context("failed to connect to server")?;

    // The driver runs concurrently with signal delivery so an interrupt
    // can cut the event loop short; dropping the future tears down the
    // watcher stack.
    tokio::select! {
        result = agent.run(client) => result.context("failed to run agent")?,
        result = signal::shutdown() => {
            result.context("failed to listen for signals")?;
            info!("stopping agent");
        }
    }
    Ok(())
}
