use agentpool::config::PoolConfig;
use agentpool::coordinator::CoordinatorServer;
use agentpool::logging;
use anyhow::Context;
use tokio::io::{BufReader, stdin, stdout};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Logs go to stderr; stdout carries the protocol.
    let config = PoolConfig::from_env().context("reading AGENTPOOL_* configuration")?;
    logging::init(&config.log_level, config.log_file.as_deref())?;

    let server = CoordinatorServer::from_env().context("opening coordination state")?;
    server
        .serve(BufReader::new(stdin()), stdout())
        .await
        .context("coordinator transport failed")?;

    Ok(())
}
