//! Clap derive structures for the `khidma` CLI.
//!
//! Defines the complete command tree, global flags, and shared types.

use clap::{Args, Parser, Subcommand, ValueEnum};

// ── Top-Level CLI ───────────────────────────────────────────────────

/// khidma -- command-line client for the Khidma services marketplace
#[derive(Debug, Parser)]
#[command(
    name = "khidma",
    version,
    about = "Work with the Khidma services marketplace from the command line",
    long_about = "A CLI for the Khidma two-sided services marketplace.\n\n\
        Browse and moderate service requests, read and send messages,\n\
        and watch live notifications pushed over the backend changefeed.",
    propagate_version = true,
    subcommand_required = true,
    arg_required_else_help = true
)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalOpts,

    #[command(subcommand)]
    pub command: Command,
}

// ── Global Options ──────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct GlobalOpts {
    /// Backend profile to use
    #[arg(long, short = 'p', env = "KHIDMA_PROFILE", global = true)]
    pub profile: Option<String>,

    /// Backend project URL (overrides profile)
    #[arg(long, short = 'b', env = "KHIDMA_BACKEND", global = true)]
    pub backend: Option<String>,

    /// Sign-in email (overrides profile)
    #[arg(long, env = "KHIDMA_EMAIL", global = true)]
    pub email: Option<String>,

    /// Project (anon) key
    #[arg(long, env = "KHIDMA_PROJECT_KEY", global = true, hide_env = true)]
    pub project_key: Option<String>,

    /// Output format
    #[arg(
        long,
        short = 'o',
        env = "KHIDMA_OUTPUT",
        default_value = "table",
        global = true
    )]
    pub output: OutputFormat,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(long, short = 'v', action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(long, short = 'q', global = true)]
    pub quiet: bool,

    /// Request timeout in seconds
    #[arg(long, env = "KHIDMA_TIMEOUT", default_value = "30", global = true)]
    pub timeout: u64,
}

// ── Output Enum ─────────────────────────────────────────────────────

#[derive(Debug, Clone, ValueEnum)]
pub enum OutputFormat {
    /// Pretty table (default, interactive)
    Table,
    /// Pretty-printed JSON
    Json,
    /// Compact single-line JSON
    JsonCompact,
    /// Plain text, one value per line (scripting)
    Plain,
}

// ── Top-Level Command Enum ──────────────────────────────────────────

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Watch live notifications for the signed-in user
    #[command(alias = "w")]
    Watch(WatchArgs),

    /// Admin alert feed with pending-work counts
    Admin(AdminArgs),

    /// Browse and update service requests
    #[command(alias = "req", alias = "r")]
    Requests(RequestsArgs),

    /// Read conversations and send messages
    #[command(alias = "msg", alias = "m")]
    Messages(MessagesArgs),

    /// Manage configuration profiles
    Config(ConfigArgs),
}

// ── Watch ───────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct WatchArgs {
    /// Exit after this many notifications (default: run until Ctrl-C)
    #[arg(long)]
    pub count: Option<u64>,
}

// ── Admin ───────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct AdminArgs {
    /// Keep the feed open and print updates as they arrive
    #[arg(long, short = 'f')]
    pub follow: bool,
}

// ── Requests ────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct RequestsArgs {
    #[command(subcommand)]
    pub command: RequestsCommand,
}

#[derive(Debug, Subcommand)]
pub enum RequestsCommand {
    /// List service requests
    List {
        /// Filter by status (pending, accepted, in_progress, completed, cancelled)
        #[arg(long)]
        status: Option<String>,

        /// Only requests where I am the client
        #[arg(long, conflicts_with = "assigned")]
        mine: bool,

        /// Only requests assigned to me as worker
        #[arg(long)]
        assigned: bool,
    },

    /// Show one request in full
    Show {
        /// Request id
        id: String,
    },

    /// Move a request to a new status
    SetStatus {
        /// Request id
        id: String,
        /// New status (pending, accepted, in_progress, completed, cancelled)
        status: String,
    },
}

// ── Messages ────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct MessagesArgs {
    #[command(subcommand)]
    pub command: MessagesCommand,
}

#[derive(Debug, Subcommand)]
pub enum MessagesCommand {
    /// List conversations (one row per counterparty)
    List,

    /// Show the exchange with one counterparty
    Show {
        /// Counterparty user id
        user_id: String,
    },

    /// Send a message
    Send {
        /// Recipient user id
        to: String,
        /// Message text
        content: String,
    },
}

// ── Config ──────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Create or update a profile interactively-ish (flags, not prompts)
    Init {
        /// Backend project URL
        #[arg(long)]
        backend: String,

        /// Sign-in email
        #[arg(long)]
        email: String,

        /// Project (anon) key
        #[arg(long)]
        project_key: Option<String>,

        /// Profile name to create or update
        #[arg(long, default_value = "default")]
        name: String,
    },

    /// Print the active configuration
    Show,

    /// Print the config file path
    Path,

    /// Store the sign-in password in the system keyring
    SetPassword {
        /// Profile name
        #[arg(long, default_value = "default")]
        name: String,
    },
}
