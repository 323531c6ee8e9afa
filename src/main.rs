//! Cluster master - main entry point.
//!
//! Serves RPC and HTTP on one port until any server fails, then exits
//! non-zero.

use std::process::ExitCode;

use cluster_master::logs::LogBuffer;
use cluster_master::master::{Collaborators, Master};
use cluster_master::{observability, Config, Result};

#[tokio::main]
async fn main() -> ExitCode {
    // Config is read before logging so the log buffer gets its configured
    // size; a load error is reported once logging is up.
    let config = Config::load();
    let capacity = config
        .as_ref()
        .map_or_else(|_| Config::default().log_buffer_capacity, |c| c.log_buffer_capacity);
    let logs = LogBuffer::new(capacity);
    observability::init_tracing(&logs);

    match run(config, logs).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!(error = %err, "master_exited");
            ExitCode::FAILURE
        }
    }
}

async fn run(config: Result<Config>, logs: LogBuffer) -> Result<()> {
    let config = config?;
    tracing::info!(config = %config.printable()?, "config_loaded");

    let collaborators = Collaborators::in_memory(&config)?;
    let master = Master::setup(config, env!("CARGO_PKG_VERSION"), logs, collaborators).await?;
    master.run().await
}
