// ── Marketplace abstraction ──
//
// Full lifecycle management for a backend connection: authentication,
// role-claim resolution, REST access, and the changefeed. The entry
// point every consumer (CLI, feeds) goes through.

use std::sync::Arc;
use std::time::Duration;

use secrecy::SecretString;
use tokio::sync::{Mutex, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

use khidma_api::{
    AuthClient, ChangefeedClient, FeedConfig, Filter, Identity, ReconnectConfig, RestClient,
    TransportConfig,
};

use crate::config::{AuthCredentials, MarketplaceConfig};
use crate::error::CoreError;
use crate::live::SubscriptionScope;
use crate::model::{Message, RequestStatus, ServiceRequest, streams};

/// Which side of a request the caller wants to filter by.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestRole {
    Client,
    Worker,
}

// ── ConnectionState ─────────────────────────────────────────────────

/// Connection state observable by consumers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Failed,
}

// ── Marketplace ─────────────────────────────────────────────────────

/// The main entry point for consumers.
///
/// Cheaply cloneable via `Arc<MarketplaceInner>`. Manages sign-in, role
/// resolution, the authenticated REST client, and the changefeed task.
#[derive(Clone)]
pub struct Marketplace {
    inner: Arc<MarketplaceInner>,
}

struct MarketplaceInner {
    config: MarketplaceConfig,
    connection_state: watch::Sender<ConnectionState>,
    session: Mutex<Option<ActiveSession>>,
    cancel: CancellationToken,
}

struct ActiveSession {
    identity: Identity,
    access_token: SecretString,
    rest: RestClient,
    feed: Option<ChangefeedClient>,
}

#[derive(Debug, serde::Deserialize)]
struct RoleRow {
    role: String,
}

impl Marketplace {
    /// Create a new Marketplace from configuration. Does NOT connect --
    /// call [`connect()`](Self::connect) to authenticate and start the feed.
    pub fn new(config: MarketplaceConfig) -> Self {
        let (connection_state, _) = watch::channel(ConnectionState::Disconnected);

        Self {
            inner: Arc::new(MarketplaceInner {
                config,
                connection_state,
                session: Mutex::new(None),
                cancel: CancellationToken::new(),
            }),
        }
    }

    /// Access the marketplace configuration.
    pub fn config(&self) -> &MarketplaceConfig {
        &self.inner.config
    }

    // ── Connection lifecycle ────────────────────────────────────────

    /// Connect to the backend.
    ///
    /// Signs in (or validates the provided token), merges role claims
    /// from the `user_roles` table, builds the authenticated REST client,
    /// and starts the changefeed when enabled.
    pub async fn connect(&self) -> Result<(), CoreError> {
        let _ = self
            .inner
            .connection_state
            .send(ConnectionState::Connecting);

        match self.establish_session().await {
            Ok(session) => {
                *self.inner.session.lock().await = Some(session);
                let _ = self.inner.connection_state.send(ConnectionState::Connected);
                info!("connected to marketplace backend");
                Ok(())
            }
            Err(e) => {
                let _ = self.inner.connection_state.send(ConnectionState::Failed);
                Err(e)
            }
        }
    }

    async fn establish_session(&self) -> Result<ActiveSession, CoreError> {
        let config = &self.inner.config;
        let transport =
            TransportConfig::new(config.project_key.clone()).with_timeout(config.timeout);
        let auth = AuthClient::new(config.url.clone(), &transport)?;

        let (mut identity, access_token) = match &config.auth {
            AuthCredentials::EmailPassword { email, password } => {
                let session = auth.sign_in(email, password).await?;
                (session.identity, session.access_token)
            }
            AuthCredentials::AccessToken(token) => {
                let identity = auth.current_user(token).await?;
                (identity, token.clone())
            }
        };
        debug!(user_id = %identity.id, "authenticated");

        let http = transport.build_client_with_token(Some(&access_token))?;
        let rest = RestClient::new(http, config.url.clone());

        merge_table_roles(&rest, &mut identity).await;

        let feed = if config.changefeed_enabled {
            let ws_url = feed_url(&config.url)?;
            let feed_config = FeedConfig {
                reconnect: ReconnectConfig::default(),
                join_timeout: config.join_timeout,
                heartbeat_interval: Duration::from_secs(25),
            };
            Some(ChangefeedClient::connect(
                ws_url,
                feed_config,
                self.inner.cancel.child_token(),
            ))
        } else {
            None
        };

        Ok(ActiveSession {
            identity,
            access_token,
            rest,
            feed,
        })
    }

    /// Disconnect from the backend.
    ///
    /// Stops the changefeed, revokes the token (best-effort), and resets
    /// the connection state to [`Disconnected`](ConnectionState::Disconnected).
    pub async fn disconnect(&self) {
        self.inner.cancel.cancel();

        let session = self.inner.session.lock().await.take();
        if let Some(session) = session {
            let transport = TransportConfig::new(self.inner.config.project_key.clone());
            if let Ok(auth) = AuthClient::new(self.inner.config.url.clone(), &transport) {
                if let Err(e) = auth.sign_out(&session.access_token).await {
                    warn!(error = %e, "sign-out failed (non-fatal)");
                }
            }
        }

        let _ = self
            .inner
            .connection_state
            .send(ConnectionState::Disconnected);
        debug!("disconnected");
    }

    // ── Session accessors ───────────────────────────────────────────

    /// The authenticated identity, with merged role claims.
    pub async fn identity(&self) -> Result<Identity, CoreError> {
        let guard = self.inner.session.lock().await;
        guard
            .as_ref()
            .map(|s| s.identity.clone())
            .ok_or(CoreError::Disconnected)
    }

    /// The authenticated REST client.
    pub async fn rest(&self) -> Result<RestClient, CoreError> {
        let guard = self.inner.session.lock().await;
        guard
            .as_ref()
            .map(|s| s.rest.clone())
            .ok_or(CoreError::Disconnected)
    }

    /// Create a subscription scope for a view.
    ///
    /// Each active view owns exactly one scope and must release it on
    /// deactivation.
    pub async fn scope(&self) -> Result<SubscriptionScope, CoreError> {
        let guard = self.inner.session.lock().await;
        let session = guard.as_ref().ok_or(CoreError::Disconnected)?;
        let feed = session.feed.as_ref().ok_or_else(|| CoreError::Config {
            message: "changefeed is disabled for this session".into(),
        })?;
        Ok(SubscriptionScope::new(
            feed.clone(),
            self.inner.config.max_join_attempts,
        ))
    }

    /// Subscribe to connection state changes.
    pub fn connection_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.connection_state.subscribe()
    }

    // ── Domain reads & writes ───────────────────────────────────────

    /// List service requests, optionally narrowed by status / role.
    pub async fn list_requests(
        &self,
        status: Option<RequestStatus>,
        role: Option<RequestRole>,
    ) -> Result<Vec<ServiceRequest>, CoreError> {
        let rest = self.rest().await?;
        let identity = self.identity().await?;

        let mut filters = Vec::new();
        if let Some(status) = status {
            filters.push(Filter::eq("status", status.as_str()));
        }
        match role {
            Some(RequestRole::Client) => {
                filters.push(Filter::eq("client_id", identity.id.clone()));
            }
            Some(RequestRole::Worker) => {
                filters.push(Filter::eq("worker_id", identity.id.clone()));
            }
            None => {}
        }

        Ok(rest.select(streams::SERVICE_REQUESTS, &filters).await?)
    }

    /// Fetch a single request by id.
    pub async fn get_request(&self, id: &str) -> Result<ServiceRequest, CoreError> {
        let rest = self.rest().await?;
        let mut rows: Vec<ServiceRequest> = rest
            .select(streams::SERVICE_REQUESTS, &[Filter::eq("id", id)])
            .await?;
        rows.pop().ok_or_else(|| CoreError::NotFound {
            entity_type: "request".into(),
            identifier: id.to_owned(),
        })
    }

    /// Move a request to a new status. The changefeed fans the change
    /// out to the other party.
    pub async fn set_request_status(
        &self,
        id: &str,
        status: RequestStatus,
    ) -> Result<(), CoreError> {
        #[derive(serde::Serialize)]
        struct Patch {
            status: RequestStatus,
        }

        let rest = self.rest().await?;
        rest.update(
            streams::SERVICE_REQUESTS,
            &[Filter::eq("id", id)],
            &Patch { status },
        )
        .await?;
        Ok(())
    }

    /// Every message the signed-in user sent or received.
    ///
    /// Two narrow selects merged client-side; row-level security already
    /// scopes both to the session.
    pub async fn list_my_messages(&self) -> Result<Vec<Message>, CoreError> {
        let rest = self.rest().await?;
        let identity = self.identity().await?;

        let sent: Vec<Message> = rest
            .select(
                streams::MESSAGES,
                &[Filter::eq("sender_id", identity.id.clone())],
            )
            .await?;
        let received: Vec<Message> = rest
            .select(
                streams::MESSAGES,
                &[Filter::eq("receiver_id", identity.id)],
            )
            .await?;

        let mut messages = sent;
        messages.extend(received);
        messages.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        messages.dedup_by(|a, b| a.id == b.id);
        Ok(messages)
    }

    /// Send a direct message from the signed-in user.
    pub async fn send_message(&self, to: &str, content: &str) -> Result<Message, CoreError> {
        #[derive(serde::Serialize)]
        struct NewMessage<'a> {
            sender_id: &'a str,
            receiver_id: &'a str,
            content: &'a str,
        }

        let rest = self.rest().await?;
        let identity = self.identity().await?;

        let message = rest
            .insert(
                streams::MESSAGES,
                &NewMessage {
                    sender_id: &identity.id,
                    receiver_id: to,
                    content,
                },
            )
            .await?;
        Ok(message)
    }

    // ── One-shot convenience ────────────────────────────────────────

    /// One-shot: connect, run closure, disconnect.
    ///
    /// Optimized for CLI reads: disables the changefeed since we only
    /// need a single request-response cycle.
    pub async fn oneshot<F, Fut, T>(config: MarketplaceConfig, f: F) -> Result<T, CoreError>
    where
        F: FnOnce(Marketplace) -> Fut,
        Fut: std::future::Future<Output = Result<T, CoreError>>,
    {
        let mut cfg = config;
        cfg.changefeed_enabled = false;

        let marketplace = Marketplace::new(cfg);
        marketplace.connect().await?;
        let result = f(marketplace.clone()).await;
        marketplace.disconnect().await;
        result
    }
}

// ── Helpers ─────────────────────────────────────────────────────────

/// Merge roles granted through the `user_roles` table into the identity.
///
/// Best-effort: a failed lookup leaves the token's own claims in place.
/// Role-gated components treat the merged set as authoritative.
async fn merge_table_roles(rest: &RestClient, identity: &mut Identity) {
    let rows: Vec<RoleRow> = match rest
        .select(
            streams::USER_ROLES,
            &[Filter::eq("user_id", identity.id.clone())],
        )
        .await
    {
        Ok(rows) => rows,
        Err(e) => {
            warn!(error = %e, "role lookup failed, keeping token claims only");
            return;
        }
    };

    for row in rows {
        if !identity.roles.contains(&row.role) {
            identity.roles.push(row.role);
        }
    }
}

/// Derive the changefeed websocket URL from the backend base URL.
fn feed_url(base: &Url) -> Result<Url, CoreError> {
    let mut url = base.join("feed/v1/socket").map_err(|e| CoreError::Config {
        message: format!("invalid backend URL: {e}"),
    })?;

    let scheme = match url.scheme() {
        "https" => "wss",
        "http" => "ws",
        other => {
            return Err(CoreError::Config {
                message: format!("unsupported backend URL scheme '{other}'"),
            });
        }
    };
    url.set_scheme(scheme).map_err(|()| CoreError::Config {
        message: "could not derive websocket scheme".into(),
    })?;

    Ok(url)
}

// ── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn feed_url_swaps_scheme() {
        let base = Url::parse("https://proj.khidma.app").expect("url");
        let ws = feed_url(&base).expect("feed url");
        assert_eq!(ws.as_str(), "wss://proj.khidma.app/feed/v1/socket");

        let local = Url::parse("http://localhost:54321").expect("url");
        let ws = feed_url(&local).expect("feed url");
        assert_eq!(ws.scheme(), "ws");
    }

    #[test]
    fn feed_url_rejects_odd_schemes() {
        let base = Url::parse("ftp://proj.khidma.app").expect("url");
        assert!(matches!(feed_url(&base), Err(CoreError::Config { .. })));
    }
}
