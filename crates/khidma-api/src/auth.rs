// Hosted auth service client
//
// Email/password sign-in against the backend's auth surface. A successful
// sign-in yields a session: the bearer access token plus the identity the
// token was minted for. Role claims ride along in the user's app metadata;
// khidma-core may merge additional roles from the `user_roles` table.

use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::json;
use tracing::debug;
use url::Url;

use crate::error::Error;
use crate::transport::TransportConfig;

// ── Identity ────────────────────────────────────────────────────────

/// The authenticated principal: who the access token says we are.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    /// User id (uuid in the hosted store).
    pub id: String,
    pub email: Option<String>,
    /// Role claims attached to the account (e.g. `"admin"`).
    pub roles: Vec<String>,
}

impl Identity {
    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r == role)
    }

    pub fn is_admin(&self) -> bool {
        self.has_role("admin")
    }
}

/// An authenticated session: bearer token + the identity behind it.
#[derive(Debug, Clone)]
pub struct Session {
    pub access_token: SecretString,
    pub refresh_token: Option<SecretString>,
    pub identity: Identity,
    /// Token lifetime in seconds as reported by the auth service.
    pub expires_in: Option<u64>,
}

// ── Wire types ──────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<u64>,
    user: UserResponse,
}

#[derive(Debug, Deserialize)]
struct UserResponse {
    id: String,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    app_metadata: AppMetadata,
}

#[derive(Debug, Default, Deserialize)]
struct AppMetadata {
    #[serde(default)]
    roles: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct AuthErrorBody {
    #[serde(alias = "error_description", alias = "msg")]
    message: Option<String>,
}

// ── AuthClient ──────────────────────────────────────────────────────

/// Client for the hosted auth service.
pub struct AuthClient {
    http: reqwest::Client,
    base_url: Url,
}

impl AuthClient {
    /// Create an auth client from the backend base URL and transport config.
    ///
    /// The client carries only the project key -- sign-in is what produces
    /// a bearer token.
    pub fn new(base_url: Url, transport: &TransportConfig) -> Result<Self, Error> {
        let http = transport.build_client()?;
        Ok(Self { http, base_url })
    }

    /// Create an auth client with a pre-built `reqwest::Client` (tests).
    pub fn with_client(http: reqwest::Client, base_url: Url) -> Self {
        Self { http, base_url }
    }

    /// Sign in with email and password.
    ///
    /// `POST /auth/v1/token?grant_type=password`
    pub async fn sign_in(&self, email: &str, password: &SecretString) -> Result<Session, Error> {
        let mut url = self.base_url.join("auth/v1/token")?;
        url.set_query(Some("grant_type=password"));

        debug!(%url, email, "signing in");

        let body = json!({
            "email": email,
            "password": password.expose_secret(),
        });

        let resp = self.http.post(url).json(&body).send().await?;
        let status = resp.status();

        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            let message = serde_json::from_str::<AuthErrorBody>(&text)
                .ok()
                .and_then(|b| b.message)
                .unwrap_or(text);
            return Err(Error::Authentication {
                message: format!("sign-in failed (HTTP {status}): {message}"),
            });
        }

        let token: TokenResponse = parse_json(resp).await?;
        debug!(user_id = %token.user.id, "sign-in successful");

        Ok(Session {
            access_token: SecretString::from(token.access_token),
            refresh_token: token.refresh_token.map(SecretString::from),
            identity: Identity {
                id: token.user.id,
                email: token.user.email,
                roles: token.user.app_metadata.roles,
            },
            expires_in: token.expires_in,
        })
    }

    /// Fetch the identity behind an existing access token.
    ///
    /// `GET /auth/v1/user`. Used when a session is constructed from a
    /// pre-minted token rather than a fresh sign-in.
    pub async fn current_user(&self, access_token: &SecretString) -> Result<Identity, Error> {
        let url = self.base_url.join("auth/v1/user")?;

        let resp = self
            .http
            .get(url)
            .bearer_auth(access_token.expose_secret())
            .send()
            .await?;
        let status = resp.status();

        if status == reqwest::StatusCode::UNAUTHORIZED {
            return Err(Error::SessionExpired);
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::Authentication {
                message: format!("user lookup failed (HTTP {status}): {body}"),
            });
        }

        let user: UserResponse = parse_json(resp).await?;
        Ok(Identity {
            id: user.id,
            email: user.email,
            roles: user.app_metadata.roles,
        })
    }

    /// Revoke the current session's token.
    ///
    /// `POST /auth/v1/logout` with the bearer token. Best-effort: a failed
    /// logout leaves the token to expire on its own.
    pub async fn sign_out(&self, access_token: &SecretString) -> Result<(), Error> {
        let url = self.base_url.join("auth/v1/logout")?;
        debug!(%url, "signing out");

        let _resp = self
            .http
            .post(url)
            .bearer_auth(access_token.expose_secret())
            .send()
            .await?;

        debug!("sign-out complete");
        Ok(())
    }
}

/// Deserialize a response body, keeping the raw text for diagnostics.
async fn parse_json<T: serde::de::DeserializeOwned>(resp: reqwest::Response) -> Result<T, Error> {
    let body = resp.text().await?;
    serde_json::from_str(&body).map_err(|e| Error::Deserialization {
        message: e.to_string(),
        body,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_role_checks() {
        let identity = Identity {
            id: "u1".into(),
            email: None,
            roles: vec!["admin".into(), "worker".into()],
        };
        assert!(identity.is_admin());
        assert!(identity.has_role("worker"));
        assert!(!identity.has_role("client"));
    }

    #[test]
    fn token_response_parses_without_metadata() {
        let json = r#"{
            "access_token": "tok",
            "user": { "id": "abc", "email": "a@b.c" }
        }"#;
        let parsed: TokenResponse = serde_json::from_str(json).expect("parse");
        assert_eq!(parsed.user.id, "abc");
        assert!(parsed.user.app_metadata.roles.is_empty());
    }
}
