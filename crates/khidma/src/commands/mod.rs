//! Command handlers. Each module owns one subcommand family.

pub mod admin;
pub mod config_cmd;
pub mod messages;
pub mod requests;
pub mod watch;

use khidma_core::Marketplace;

use crate::cli::{Command, GlobalOpts};
use crate::error::CliError;

/// Route a parsed command to its handler.
pub async fn dispatch(
    command: Command,
    marketplace: &Marketplace,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    match command {
        Command::Watch(args) => watch::handle(args, marketplace, global).await,
        Command::Admin(args) => admin::handle(args, marketplace, global).await,
        Command::Requests(args) => requests::handle(args, marketplace, global).await,
        Command::Messages(args) => messages::handle(args, marketplace, global).await,
        // Handled before a connection is made.
        Command::Config(_) => unreachable!("config commands are dispatched in main"),
    }
}
