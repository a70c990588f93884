use std::fs::OpenOptions;
use std::sync::Mutex;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::io::{stdin, stdout, BufReader};
use tracing::info;

use txn_node::{cli::Cli, node::Node, store::MemoryEngine};

/// Logs never go to stdout: that channel carries protocol replies only.
fn init_tracing(cli: &Cli) -> Result<()> {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&cli.log_level))
        .with_context(|| format!("invalid log level `{}`", cli.log_level))?;
    let builder = fmt().with_env_filter(filter).with_target(false);

    match &cli.log_file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("failed to open log file {}", path.display()))?;
            let _ = builder
                .with_ansi(false)
                .with_writer(Mutex::new(file))
                .try_init();
        }
        None => {
            let _ = builder.with_writer(std::io::stderr).try_init();
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli)?;

    let config = cli.node_config();
    let engine = MemoryEngine::new(config.isolation, config.faults);
    let node = Node::new(engine, &config);
    node.seed_accounts(&cli.accounts)
        .await
        .context("failed to seed bank accounts")?;

    info!(
        isolation = ?config.isolation,
        max_attempts = config.max_attempts,
        "node ready, waiting for init"
    );
    node.run(BufReader::new(stdin()), stdout()).await?;
    info!("input closed, shutting down");
    Ok(())
}
