use anyhow::{Context, Result};
use clap::Parser;
use extwatch_core::WatchConfig;
use tracing::debug;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

mod cli;
use cli::{Cli, Commands};

fn main() -> Result<()> {
    // Parse CLI arguments first to get verbosity level
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .init();

    let config = WatchConfig::load(cli.config.as_deref()).context("failed to load configuration")?;

    match cli.command {
        Commands::Watch(args) => {
            debug!("Watch command: {:?}", args);
            let runtime = tokio::runtime::Runtime::new()?;
            runtime.block_on(cli::commands::watch::execute(args, config))?;
        }
        Commands::Extensions(args) => {
            debug!("Extensions command: {:?}", args);
            cli::commands::extensions::execute(args, &config)?;
        }
    }

    Ok(())
}
