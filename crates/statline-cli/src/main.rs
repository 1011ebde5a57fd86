use anyhow::{anyhow, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact()
        .with_ansi(false)
        .try_init()
        .map_err(|err| anyhow!("failed to initialise logging: {err}"))?;

    let cli = statline_cli::Cli::parse();
    tracing::debug!(?cli, "parsed CLI arguments");
    statline_cli::run_cli(cli)
}
