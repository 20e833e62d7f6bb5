mod cli;
mod commands;
mod format;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use cli::{Cli, Commands};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Logs go to stderr so JSON output on stdout stays machine-readable
    let filter = if cli.quiet {
        EnvFilter::new("error")
    } else if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Watch(args) => commands::cmd_watch(args, cli.settings, cli.quiet, cli.no_color).await,
        Commands::Poll(args) => commands::cmd_poll(args, cli.quiet, cli.no_color).await,
        Commands::Settings { action } => commands::cmd_settings(action, cli.settings, cli.no_color),
    }
}
