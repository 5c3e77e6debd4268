//! CLI error types with miette diagnostics.
//!
//! Maps `CoreError` variants into user-facing errors with actionable help text.

use miette::Diagnostic;
use thiserror::Error;

use khidma_core::CoreError;

/// Exit codes.
pub mod exit_code {
    pub const SUCCESS: i32 = 0;
    pub const GENERAL: i32 = 1;
    pub const USAGE: i32 = 2;
    pub const AUTH: i32 = 3;
    pub const NOT_FOUND: i32 = 4;
    pub const PERMISSION: i32 = 5;
    pub const CONNECTION: i32 = 7;
    pub const TIMEOUT: i32 = 8;
}

#[derive(Debug, Error, Diagnostic)]
pub enum CliError {
    // ── Connection ───────────────────────────────────────────────────
    #[error("Could not reach the backend at {url}")]
    #[diagnostic(
        code(khidma::connection_failed),
        help(
            "Check that the backend URL is correct and reachable.\n\
             URL: {url}"
        )
    )]
    ConnectionFailed { url: String, reason: String },

    #[error("Request timed out")]
    #[diagnostic(code(khidma::timeout), help("Try again, or raise --timeout."))]
    Timeout,

    // ── Authentication ───────────────────────────────────────────────
    #[error("Authentication failed")]
    #[diagnostic(
        code(khidma::auth_failed),
        help(
            "Verify your email and password.\n\
             Run: khidma config set-password --name {profile}"
        )
    )]
    AuthFailed { profile: String, message: String },

    #[error("No credentials configured for profile '{profile}'")]
    #[diagnostic(
        code(khidma::no_credentials),
        help(
            "Configure credentials with: khidma config init\n\
             Or set KHIDMA_EMAIL / KHIDMA_PASSWORD environment variables."
        )
    )]
    NoCredentials { profile: String },

    #[error("You do not have permission for this: {reason}")]
    #[diagnostic(
        code(khidma::permission),
        help("This command needs the admin role on your account.")
    )]
    Permission { reason: String },

    // ── Resources ────────────────────────────────────────────────────
    #[error("{resource_type} '{identifier}' not found")]
    #[diagnostic(
        code(khidma::not_found),
        help("List available entries with: khidma {list_command}")
    )]
    NotFound {
        resource_type: String,
        identifier: String,
        list_command: String,
    },

    // ── Configuration ────────────────────────────────────────────────
    #[error("No configuration found at {path}")]
    #[diagnostic(
        code(khidma::no_config),
        help("Create one with: khidma config init --backend <url> --email <email>")
    )]
    NoConfig { path: String },

    #[error("Invalid {field}: {reason}")]
    #[diagnostic(code(khidma::validation))]
    Validation { field: String, reason: String },

    // ── Wrapped sources ──────────────────────────────────────────────
    #[error(transparent)]
    #[diagnostic(code(khidma::core))]
    Core(CoreError),

    #[error(transparent)]
    #[diagnostic(code(khidma::config))]
    Config(#[from] khidma_config::ConfigError),

    #[error("IO error: {0}")]
    #[diagnostic(code(khidma::io))]
    Io(#[from] std::io::Error),
}

impl CliError {
    /// Stable exit code for scripting.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::ConnectionFailed { .. } => exit_code::CONNECTION,
            Self::Timeout => exit_code::TIMEOUT,
            Self::AuthFailed { .. } | Self::NoCredentials { .. } => exit_code::AUTH,
            Self::Permission { .. } => exit_code::PERMISSION,
            Self::NotFound { .. } => exit_code::NOT_FOUND,
            Self::NoConfig { .. } | Self::Validation { .. } | Self::Config(_) => exit_code::USAGE,
            Self::Core(_) | Self::Io(_) => exit_code::GENERAL,
        }
    }
}

impl From<CoreError> for CliError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::ConnectionFailed { url, reason } => Self::ConnectionFailed { url, reason },
            CoreError::Timeout { .. } => Self::Timeout,
            CoreError::AuthenticationFailed { message } => Self::AuthFailed {
                profile: "default".into(),
                message,
            },
            CoreError::Precondition { reason } => Self::Permission { reason },
            CoreError::NotFound {
                entity_type,
                identifier,
            } => Self::NotFound {
                resource_type: entity_type,
                identifier,
                list_command: "requests list".into(),
            },
            other => Self::Core(other),
        }
    }
}
