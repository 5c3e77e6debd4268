// Shared transport configuration for building reqwest::Client instances.
//
// The REST and auth clients share timeout and header settings through
// this module, avoiding duplicated builder logic. Every request to the
// backend carries the project key; authenticated requests add a bearer
// token on top.

use std::time::Duration;

use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue};
use secrecy::{ExposeSecret, SecretString};

use crate::error::Error;

/// Header carrying the project (anon) key on every request.
pub const PROJECT_KEY_HEADER: &str = "apikey";

/// Shared transport configuration for building HTTP clients.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Project key identifying the backend project. Sent on every request.
    pub project_key: SecretString,
    pub timeout: Duration,
}

impl TransportConfig {
    pub fn new(project_key: SecretString) -> Self {
        Self {
            project_key,
            timeout: Duration::from_secs(30),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Build a `reqwest::Client` carrying the project key header.
    pub fn build_client(&self) -> Result<reqwest::Client, Error> {
        self.build_client_with_token(None)
    }

    /// Build a `reqwest::Client` with the project key and, if given, a
    /// bearer access token as default headers.
    ///
    /// Row-level security on the backend keys off the bearer token, so the
    /// authenticated client must be rebuilt whenever the token changes.
    pub fn build_client_with_token(
        &self,
        access_token: Option<&SecretString>,
    ) -> Result<reqwest::Client, Error> {
        let mut headers = HeaderMap::new();

        let key = header_value(self.project_key.expose_secret(), "project key")?;
        headers.insert(PROJECT_KEY_HEADER, key);

        if let Some(token) = access_token {
            let bearer = format!("Bearer {}", token.expose_secret());
            let mut value = header_value(&bearer, "access token")?;
            value.set_sensitive(true);
            headers.insert(AUTHORIZATION, value);
        }

        reqwest::Client::builder()
            .timeout(self.timeout)
            .user_agent(concat!("khidma/", env!("CARGO_PKG_VERSION")))
            .default_headers(headers)
            .build()
            .map_err(Error::Transport)
    }
}

fn header_value(raw: &str, what: &str) -> Result<HeaderValue, Error> {
    HeaderValue::from_str(raw).map_err(|_| Error::Authentication {
        message: format!("{what} contains characters not valid in a header"),
    })
}
