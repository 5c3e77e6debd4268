use thiserror::Error;

/// Top-level error type for the `khidma-api` crate.
///
/// Covers every failure mode across all backend surfaces:
/// authentication, transport, the REST data API, and the changefeed.
/// `khidma-core` maps these into user-facing diagnostics.
#[derive(Debug, Error)]
pub enum Error {
    // ── Authentication ──────────────────────────────────────────────
    /// Sign-in failed (wrong credentials, account disabled, etc.)
    #[error("Authentication failed: {message}")]
    Authentication { message: String },

    /// Access token has expired and was not refreshed.
    #[error("Session expired -- sign in again")]
    SessionExpired,

    /// Project key rejected by the backend.
    #[error("Invalid project key")]
    InvalidProjectKey,

    // ── Transport ───────────────────────────────────────────────────
    /// HTTP transport error (connection refused, DNS failure, etc.)
    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// URL parsing error.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// Request timed out.
    #[error("Request timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    // ── REST data API ───────────────────────────────────────────────
    /// Structured error from the REST surface (PostgREST-style body).
    #[error("REST error (HTTP {status}): {message}")]
    Rest {
        message: String,
        code: Option<String>,
        status: u16,
    },

    /// The exact-count header was missing or malformed on a count request.
    #[error("Count unavailable: {0}")]
    CountUnavailable(String),

    // ── Changefeed ──────────────────────────────────────────────────
    /// Websocket connection to the changefeed failed.
    #[error("Changefeed connection failed: {0}")]
    FeedConnect(String),

    /// A channel join was rejected or not acknowledged in time.
    #[error("Subscribe failed for stream '{stream}': {reason}")]
    SubscribeFailed { stream: String, reason: String },

    /// The changefeed client has shut down; no further events will arrive.
    #[error("Changefeed closed")]
    FeedClosed,

    // ── Data ────────────────────────────────────────────────────────
    /// JSON deserialization failed, with the raw body for debugging.
    #[error("Deserialization error: {message}")]
    Deserialization { message: String, body: String },
}

impl Error {
    /// Returns `true` if this error indicates auth has expired
    /// and re-authentication might resolve it.
    pub fn is_auth_expired(&self) -> bool {
        matches!(self, Self::Authentication { .. } | Self::SessionExpired)
    }

    /// Returns `true` if this is a transient error worth retrying.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport(e) => e.is_timeout() || e.is_connect(),
            Self::Timeout { .. } => true,
            Self::FeedConnect(_) => true,
            Self::SubscribeFailed { .. } => true,
            _ => false,
        }
    }

    /// Returns `true` if this is a "not found" error.
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::Transport(e) => e.status() == Some(reqwest::StatusCode::NOT_FOUND),
            Self::Rest { status: 404, .. } => true,
            _ => false,
        }
    }

    /// Extract the REST error code, if available.
    pub fn rest_error_code(&self) -> Option<&str> {
        match self {
            Self::Rest { code, .. } => code.as_deref(),
            _ => None,
        }
    }
}
