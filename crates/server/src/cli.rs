//! CLI argument parsing.

use clap::{Parser, Subcommand};

/// Case-statistics backend: follows the upstream case stream and serves it.
#[derive(Parser, Debug)]
#[command(name = "casestats-server", version, about)]
pub struct Cli {
    /// Config profile; keys are looked up as `{PROFILE}_{KEY}` before `{KEY}`.
    #[arg(long, env = "CASESTATS_PROFILE", default_value = "")]
    pub profile: String,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Start the HTTP server (default).
    Serve,
    /// Print the effective configuration with secrets redacted.
    Config,
}

impl Cli {
    pub fn command(&self) -> Command {
        self.command.clone().unwrap_or(Command::Serve)
    }
}
