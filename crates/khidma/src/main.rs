mod cli;
mod commands;
mod config;
mod error;
mod output;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use khidma_core::Marketplace;

use crate::cli::{Cli, Command};
use crate::error::CliError;

#[tokio::main]
async fn main() {
    // Parse CLI arguments
    let cli = Cli::parse();

    // Setup tracing based on verbosity
    init_tracing(cli.global.verbose);

    // Dispatch and handle errors with proper exit codes
    if let Err(err) = run(cli).await {
        let code = err.exit_code();
        eprintln!("{:?}", miette::Report::new(err));
        std::process::exit(code);
    }
}

fn init_tracing(verbosity: u8) {
    let filter = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_target(false)
        .init();
}

async fn run(cli: Cli) -> Result<(), CliError> {
    match cli.command {
        // Config commands don't need a backend connection
        Command::Config(args) => commands::config_cmd::handle(args, &cli.global),

        // All other commands sign in first
        cmd => {
            let mut marketplace_config = config::build_marketplace_config(&cli.global)?;

            // One-shot command families don't need the changefeed.
            if matches!(cmd, Command::Requests(_) | Command::Messages(_)) {
                marketplace_config.changefeed_enabled = false;
            }

            let marketplace = Marketplace::new(marketplace_config);

            tracing::debug!(command = ?cmd, "dispatching command");
            commands::dispatch(cmd, &marketplace, &cli.global).await
        }
    }
}
