// ── Core error types ──
//
// User-facing errors from khidma-core. These are NOT API-specific --
// consumers never see HTTP status codes or JSON parse failures directly.
// The `From<khidma_api::Error>` impl translates transport-layer errors
// into domain-appropriate variants.

use thiserror::Error;

/// Unified error type for the core crate.
#[derive(Debug, Error)]
pub enum CoreError {
    // ── Connection errors ────────────────────────────────────────────
    #[error("Cannot reach backend at {url}: {reason}")]
    ConnectionFailed { url: String, reason: String },

    #[error("Authentication failed: {message}")]
    AuthenticationFailed { message: String },

    #[error("Not connected to the backend")]
    Disconnected,

    #[error("Backend request timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    // ── Live update errors ───────────────────────────────────────────
    /// A changefeed subscription could not be established after retries.
    #[error("Subscription to '{stream}' failed: {reason}")]
    Subscription { stream: String, reason: String },

    /// A recompute or enrichment query failed. The last-known-good value
    /// stays displayed; this is logged, not surfaced.
    #[error("Query failed: {message}")]
    Query { message: String },

    /// A required identity/role precondition does not hold. Fatal for the
    /// component instance; never retried.
    #[error("Precondition not met: {reason}")]
    Precondition { reason: String },

    // ── Data errors ──────────────────────────────────────────────────
    #[error("Entity not found: {entity_type} with id {identifier}")]
    NotFound {
        entity_type: String,
        identifier: String,
    },

    // ── Configuration errors ─────────────────────────────────────────
    #[error("Configuration error: {message}")]
    Config { message: String },

    // ── Internal errors ──────────────────────────────────────────────
    #[error("Internal error: {0}")]
    Internal(String),
}

// ── Conversion from transport-layer errors ──────────────────────────

impl From<khidma_api::Error> for CoreError {
    fn from(err: khidma_api::Error) -> Self {
        match err {
            khidma_api::Error::Authentication { message } => {
                CoreError::AuthenticationFailed { message }
            }
            khidma_api::Error::SessionExpired => CoreError::AuthenticationFailed {
                message: "Session expired -- sign in again".into(),
            },
            khidma_api::Error::InvalidProjectKey => CoreError::AuthenticationFailed {
                message: "Invalid project key".into(),
            },
            khidma_api::Error::Transport(ref e) => {
                if e.is_timeout() {
                    CoreError::Timeout { timeout_secs: 0 }
                } else if e.is_connect() {
                    CoreError::ConnectionFailed {
                        url: e
                            .url()
                            .map(|u| u.to_string())
                            .unwrap_or_else(|| "<unknown>".into()),
                        reason: e.to_string(),
                    }
                } else if e.status().map(|s| s.as_u16()) == Some(404) {
                    CoreError::NotFound {
                        entity_type: "resource".into(),
                        identifier: e.url().map(|u| u.path().to_owned()).unwrap_or_default(),
                    }
                } else {
                    CoreError::Query {
                        message: e.to_string(),
                    }
                }
            }
            khidma_api::Error::InvalidUrl(e) => CoreError::Config {
                message: format!("Invalid URL: {e}"),
            },
            khidma_api::Error::Timeout { timeout_secs } => CoreError::Timeout { timeout_secs },
            khidma_api::Error::Rest {
                message,
                code,
                status,
            } => CoreError::Query {
                message: match code {
                    Some(code) => format!("REST error {code} (HTTP {status}): {message}"),
                    None => format!("REST error (HTTP {status}): {message}"),
                },
            },
            khidma_api::Error::CountUnavailable(reason) => CoreError::Query {
                message: format!("count unavailable: {reason}"),
            },
            khidma_api::Error::FeedConnect(reason) => CoreError::ConnectionFailed {
                url: String::new(),
                reason: format!("changefeed connection failed: {reason}"),
            },
            khidma_api::Error::SubscribeFailed { stream, reason } => {
                CoreError::Subscription { stream, reason }
            }
            khidma_api::Error::FeedClosed => CoreError::Disconnected,
            khidma_api::Error::Deserialization { message, body: _ } => {
                CoreError::Internal(format!("Deserialization error: {message}"))
            }
        }
    }
}
