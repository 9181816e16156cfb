mod api;
mod cli;
mod router;
mod startup;
mod state;

use clap::Parser;

use casestats_core::Config;

use crate::cli::{Cli, Command};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Before clap, so profile env vars from .env are visible to it.
    casestats_core::config::load_dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();
    let config = Config::for_profile(&cli.profile);

    match cli.command() {
        Command::Serve => startup::serve(&config).await?,
        Command::Config => {
            println!("{}", serde_json::to_string_pretty(&config.redacted_summary())?);
        }
    }

    Ok(())
}
