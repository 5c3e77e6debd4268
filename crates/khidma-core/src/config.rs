// ── Runtime connection configuration ──
//
// These types describe *how* to connect to the hosted backend.
// They carry credential data and connection tuning, but never touch disk.
// The CLI constructs a `MarketplaceConfig` and hands it in.

use std::time::Duration;

use secrecy::SecretString;
use url::Url;

/// How to authenticate with the backend.
#[derive(Debug, Clone)]
pub enum AuthCredentials {
    /// Email + password sign-in through the hosted auth service.
    EmailPassword {
        email: String,
        password: SecretString,
    },
    /// A pre-minted access token (service contexts, tests).
    AccessToken(SecretString),
}

/// Configuration for connecting to the marketplace backend.
///
/// Built by the CLI, passed to `Marketplace` -- core never reads config
/// files.
#[derive(Debug, Clone)]
pub struct MarketplaceConfig {
    /// Backend project URL (e.g., `https://proj.khidma.app`).
    pub url: Url,
    /// Project (anon) key sent on every request.
    pub project_key: SecretString,
    /// Authentication method and credentials.
    pub auth: AuthCredentials,
    /// Request timeout.
    pub timeout: Duration,
    /// Enable the websocket changefeed. Off for one-shot CLI reads.
    pub changefeed_enabled: bool,
    /// How long a stream join may stay unacknowledged.
    pub join_timeout: Duration,
    /// Join attempts before a subscription is reported failed.
    pub max_join_attempts: u32,
}

impl Default for MarketplaceConfig {
    fn default() -> Self {
        Self {
            url: "https://localhost:54321"
                .parse()
                .expect("static default URL"),
            project_key: SecretString::from(String::new()),
            auth: AuthCredentials::EmailPassword {
                email: String::new(),
                password: SecretString::from(String::new()),
            },
            timeout: Duration::from_secs(30),
            changefeed_enabled: true,
            join_timeout: Duration::from_secs(10),
            max_join_attempts: 3,
        }
    }
}
