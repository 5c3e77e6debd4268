//! Websocket changefeed client with auto-reconnect.
//!
//! Connects to the backend's changefeed endpoint and routes row-change
//! events to per-subscription channels. Channel joins are acknowledged by
//! the server before [`ChangefeedClient::subscribe`] returns; reconnection
//! uses exponential backoff + jitter and re-joins every active stream.
//!
//! Events for a single stream are dispatched in arrival order by one
//! reader task. No ordering is guaranteed across different streams.
//!
//! # Example
//!
//! ```rust,ignore
//! use khidma_api::realtime::{ChangefeedClient, FeedConfig, StreamSpec, OpSet};
//! use tokio_util::sync::CancellationToken;
//! use url::Url;
//!
//! let cancel = CancellationToken::new();
//! let ws_url = Url::parse("wss://proj.example.com/feed/v1/socket")?;
//!
//! let client = ChangefeedClient::connect(ws_url, FeedConfig::default(), cancel.clone());
//! let mut sub = client
//!     .subscribe(StreamSpec::new("messages").with_op_set(OpSet::inserts()))
//!     .await?;
//!
//! while let Some(event) = sub.recv().await {
//!     println!("{}: {:?}", event.stream, event.op);
//! }
//! ```

use std::collections::HashMap;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::tungstenite;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::error::Error;

// ── Change events ───────────────────────────────────────────────────

/// Operation kind for a row change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeOp {
    Insert,
    Update,
    Delete,
}

/// One row-change notification on a named stream.
///
/// `before`/`after` are raw record snapshots; consumers deserialize the
/// fields they care about. Ephemeral -- never persisted.
#[derive(Debug, Clone)]
pub struct ChangeEvent {
    pub stream: String,
    pub op: ChangeOp,
    pub before: Option<serde_json::Value>,
    pub after: Option<serde_json::Value>,
}

impl ChangeEvent {
    /// Fetch a string field from the `after` snapshot.
    pub fn after_str(&self, field: &str) -> Option<&str> {
        self.after.as_ref()?.get(field)?.as_str()
    }

    /// Fetch a string field from the `before` snapshot.
    pub fn before_str(&self, field: &str) -> Option<&str> {
        self.before.as_ref()?.get(field)?.as_str()
    }
}

// ── Stream specification ────────────────────────────────────────────

/// Which operations a subscription cares about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OpSet {
    /// Every operation on the stream.
    All,
    /// Only the listed operations.
    Only(Vec<ChangeOp>),
}

impl OpSet {
    pub fn inserts() -> Self {
        Self::Only(vec![ChangeOp::Insert])
    }

    pub fn updates() -> Self {
        Self::Only(vec![ChangeOp::Update])
    }

    pub fn inserts_and_updates() -> Self {
        Self::Only(vec![ChangeOp::Insert, ChangeOp::Update])
    }

    pub fn matches(&self, op: ChangeOp) -> bool {
        match self {
            Self::All => true,
            Self::Only(ops) => ops.contains(&op),
        }
    }
}

/// A single server-side equality predicate narrowing a stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamFilter {
    pub column: String,
    pub value: String,
}

impl StreamFilter {
    pub fn eq(column: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            value: value.into(),
        }
    }
}

/// What to subscribe to: a stream, an optional row filter, and the
/// operations of interest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamSpec {
    pub stream: String,
    pub filter: Option<StreamFilter>,
    pub ops: OpSet,
}

impl StreamSpec {
    pub fn new(stream: impl Into<String>) -> Self {
        Self {
            stream: stream.into(),
            filter: None,
            ops: OpSet::All,
        }
    }

    pub fn with_filter(mut self, filter: StreamFilter) -> Self {
        self.filter = Some(filter);
        self
    }

    pub fn with_op_set(mut self, ops: OpSet) -> Self {
        self.ops = ops;
        self
    }

    /// The wire topic for this spec: `feed:{stream}` plus the rendered
    /// filter, e.g. `feed:messages:receiver_id=eq.42`.
    pub fn topic(&self) -> String {
        match &self.filter {
            Some(f) => format!("feed:{}:{}=eq.{}", self.stream, f.column, f.value),
            None => format!("feed:{}", self.stream),
        }
    }
}

// ── Configuration ───────────────────────────────────────────────────

/// Exponential backoff configuration for changefeed reconnection.
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Delay before the first reconnection attempt. Default: 1s.
    pub initial_delay: Duration,

    /// Upper bound on backoff delay. Default: 30s.
    pub max_delay: Duration,

    /// Maximum reconnection attempts before giving up.
    /// `None` means retry forever.
    pub max_retries: Option<u32>,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            max_retries: None,
        }
    }
}

/// Changefeed client tuning.
#[derive(Debug, Clone)]
pub struct FeedConfig {
    pub reconnect: ReconnectConfig,
    /// How long a join may stay unacknowledged before it fails.
    pub join_timeout: Duration,
    /// Heartbeat interval keeping the socket alive through proxies.
    pub heartbeat_interval: Duration,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            reconnect: ReconnectConfig::default(),
            join_timeout: Duration::from_secs(10),
            heartbeat_interval: Duration::from_secs(25),
        }
    }
}

// ── Wire frames ─────────────────────────────────────────────────────

/// Frame shape shared by both directions:
/// `{ topic, event, payload, ref }`.
#[derive(Debug, Serialize, Deserialize)]
struct Frame {
    topic: String,
    event: String,
    #[serde(default)]
    payload: serde_json::Value,
    #[serde(rename = "ref", default, skip_serializing_if = "Option::is_none")]
    reference: Option<u64>,
}

const EVENT_JOIN: &str = "feed_join";
const EVENT_LEAVE: &str = "feed_leave";
const EVENT_REPLY: &str = "feed_reply";
const EVENT_CHANGE: &str = "change";
const EVENT_HEARTBEAT: &str = "heartbeat";

// ── Handles ─────────────────────────────────────────────────────────

/// Identifier for one live subscription within the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// A live subscription: the handle plus its event receiver.
#[derive(Debug)]
pub struct Subscription {
    id: SubscriptionId,
    stream: String,
    events: mpsc::UnboundedReceiver<ChangeEvent>,
}

impl Subscription {
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    pub fn stream(&self) -> &str {
        &self.stream
    }

    /// Receive the next change event. Returns `None` once the feed has
    /// shut down or the subscription was released.
    pub async fn recv(&mut self) -> Option<ChangeEvent> {
        self.events.recv().await
    }
}

enum FeedCommand {
    Join {
        spec: StreamSpec,
        event_tx: mpsc::UnboundedSender<ChangeEvent>,
        ack: oneshot::Sender<Result<SubscriptionId, Error>>,
    },
    Leave {
        id: SubscriptionId,
    },
}

/// Handle to the running changefeed task.
///
/// Cheaply cloneable. Dropping all handles does not stop the task --
/// cancel the token passed to [`connect`](Self::connect) for that.
#[derive(Clone)]
pub struct ChangefeedClient {
    command_tx: mpsc::UnboundedSender<FeedCommand>,
    join_timeout: Duration,
    cancel: CancellationToken,
}

impl ChangefeedClient {
    /// Spawn the changefeed loop against `ws_url`.
    ///
    /// Returns immediately; the first connection attempt happens in the
    /// background. Joins issued before the socket is up are queued and
    /// sent once it connects.
    pub fn connect(ws_url: Url, config: FeedConfig, cancel: CancellationToken) -> Self {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let join_timeout = config.join_timeout;

        let task_cancel = cancel.clone();
        tokio::spawn(async move {
            feed_loop(ws_url, command_rx, config, task_cancel).await;
        });

        Self {
            command_tx,
            join_timeout,
            cancel,
        }
    }

    /// Subscribe to a stream.
    ///
    /// Resolves only once the server acknowledges the join, or fails with
    /// [`Error::SubscribeFailed`] on rejection, timeout, or a dropped
    /// connection mid-join.
    pub async fn subscribe(&self, spec: StreamSpec) -> Result<Subscription, Error> {
        let stream = spec.stream.clone();
        let (event_tx, events) = mpsc::unbounded_channel();
        let (ack_tx, ack_rx) = oneshot::channel();

        self.command_tx
            .send(FeedCommand::Join {
                spec,
                event_tx,
                ack: ack_tx,
            })
            .map_err(|_| Error::FeedClosed)?;

        let id = match tokio::time::timeout(self.join_timeout, ack_rx).await {
            Ok(Ok(result)) => result?,
            Ok(Err(_)) => return Err(Error::FeedClosed),
            Err(_) => {
                return Err(Error::SubscribeFailed {
                    stream,
                    reason: format!("join not acknowledged within {:?}", self.join_timeout),
                });
            }
        };

        Ok(Subscription { id, stream, events })
    }

    /// Release a subscription. Idempotent: releasing an unknown or
    /// already-released id is a no-op.
    pub fn unsubscribe(&self, id: SubscriptionId) {
        let _ = self.command_tx.send(FeedCommand::Leave { id });
    }

    /// Signal the background task to shut down gracefully.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }
}

// ── Feed loop state ─────────────────────────────────────────────────

struct SubEntry {
    spec: StreamSpec,
    event_tx: mpsc::UnboundedSender<ChangeEvent>,
}

struct FeedState {
    subs: HashMap<SubscriptionId, SubEntry>,
    /// Joins sent but not yet acknowledged, keyed by frame ref.
    pending: HashMap<u64, PendingJoin>,
    next_id: u64,
    next_ref: u64,
}

struct PendingJoin {
    id: SubscriptionId,
    ack: oneshot::Sender<Result<SubscriptionId, Error>>,
}

impl FeedState {
    fn new() -> Self {
        Self {
            subs: HashMap::new(),
            pending: HashMap::new(),
            next_id: 0,
            next_ref: 0,
        }
    }

    fn allocate(&mut self) -> (SubscriptionId, u64) {
        self.next_id += 1;
        self.next_ref += 1;
        (SubscriptionId(self.next_id), self.next_ref)
    }

    /// Fail every pending join; called when the connection drops.
    fn fail_pending(&mut self, reason: &str) {
        for (_, join) in self.pending.drain() {
            let stream = self
                .subs
                .remove(&join.id)
                .map_or_else(String::new, |e| e.spec.stream);
            let _ = join.ack.send(Err(Error::SubscribeFailed {
                stream,
                reason: reason.to_owned(),
            }));
        }
    }

    /// Drop subscriptions whose receivers are gone.
    fn prune_closed(&mut self) {
        self.subs.retain(|_, entry| !entry.event_tx.is_closed());
    }
}

// ── Background loop ─────────────────────────────────────────────────

type WsStream = tokio_tungstenite::WebSocketStream<
    tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
>;

/// Main loop: connect → serve → on error, backoff → reconnect.
async fn feed_loop(
    ws_url: Url,
    mut command_rx: mpsc::UnboundedReceiver<FeedCommand>,
    config: FeedConfig,
    cancel: CancellationToken,
) {
    let mut state = FeedState::new();
    let mut attempt: u32 = 0;

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            result = serve_connection(&ws_url, &mut command_rx, &mut state, &config, &cancel) => {
                match result {
                    // Clean disconnect (server close frame or stream ended).
                    Ok(()) => {
                        tracing::info!("changefeed disconnected cleanly, reconnecting");
                        attempt = 0;
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, attempt, "changefeed error");

                        if let Some(max) = config.reconnect.max_retries {
                            if attempt >= max {
                                tracing::error!(
                                    max_retries = max,
                                    "changefeed reconnection limit reached, giving up"
                                );
                                break;
                            }
                        }

                        let delay = calculate_backoff(attempt, &config.reconnect);
                        tracing::info!(
                            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                            attempt,
                            "waiting before reconnect"
                        );

                        tokio::select! {
                            biased;
                            () = cancel.cancelled() => break,
                            () = tokio::time::sleep(delay) => {}
                        }

                        attempt += 1;
                    }
                }
                state.fail_pending("connection lost");
            }
        }
    }

    tracing::debug!("changefeed loop exiting");
}

/// Establish a single connection and serve it until it drops.
///
/// Re-joins every registered subscription on entry, so reconnection is
/// transparent to subscribers (they keep their existing receivers).
async fn serve_connection(
    ws_url: &Url,
    command_rx: &mut mpsc::UnboundedReceiver<FeedCommand>,
    state: &mut FeedState,
    config: &FeedConfig,
    cancel: &CancellationToken,
) -> Result<(), Error> {
    tracing::info!(url = %ws_url, "connecting to changefeed");

    let (mut ws, _response) = tokio_tungstenite::connect_async(ws_url.as_str())
        .await
        .map_err(|e| Error::FeedConnect(e.to_string()))?;

    tracing::info!("changefeed connected");

    // Re-join streams that were live before the reconnect. Fire-and-
    // forget: the original acks already resolved.
    state.prune_closed();
    let rejoin: Vec<StreamSpec> = state.subs.values().map(|e| e.spec.clone()).collect();
    for spec in rejoin {
        tracing::debug!(stream = %spec.stream, "re-joining after reconnect");
        state.next_ref += 1;
        send_join(&mut ws, &spec, state.next_ref).await?;
    }

    let mut heartbeat = tokio::time::interval(config.heartbeat_interval);
    heartbeat.tick().await; // consume the immediate first tick

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => return Ok(()),

            command = command_rx.recv() => {
                let Some(command) = command else { return Ok(()) };
                handle_command(&mut ws, state, command).await?;
            }

            _ = heartbeat.tick() => {
                let frame = Frame {
                    topic: "feed".into(),
                    event: EVENT_HEARTBEAT.into(),
                    payload: serde_json::Value::Null,
                    reference: None,
                };
                send_frame(&mut ws, &frame).await?;
            }

            frame = ws.next() => {
                match frame {
                    Some(Ok(tungstenite::Message::Text(text))) => {
                        handle_text_frame(&text, state);
                    }
                    Some(Ok(tungstenite::Message::Ping(_))) => {
                        // tungstenite answers pongs automatically
                        tracing::trace!("changefeed ping");
                    }
                    Some(Ok(tungstenite::Message::Close(frame))) => {
                        if let Some(ref cf) = frame {
                            tracing::info!(code = %cf.code, reason = %cf.reason, "changefeed close frame");
                        }
                        return Ok(());
                    }
                    Some(Err(e)) => {
                        return Err(Error::FeedConnect(e.to_string()));
                    }
                    None => {
                        tracing::info!("changefeed stream ended");
                        return Ok(());
                    }
                    _ => {
                        // Binary, Pong, Frame -- ignore
                    }
                }
            }
        }
    }
}

async fn handle_command(
    ws: &mut WsStream,
    state: &mut FeedState,
    command: FeedCommand,
) -> Result<(), Error> {
    match command {
        FeedCommand::Join {
            spec,
            event_tx,
            ack,
        } => {
            // Register before sending: if the send fails the connection is
            // torn down and `fail_pending` resolves the waiting ack.
            let (id, reference) = state.allocate();
            let join_spec = spec.clone();
            state.subs.insert(id, SubEntry { spec, event_tx });
            state.pending.insert(reference, PendingJoin { id, ack });
            send_join(ws, &join_spec, reference).await?;
        }
        FeedCommand::Leave { id } => {
            if let Some(entry) = state.subs.remove(&id) {
                let frame = Frame {
                    topic: entry.spec.topic(),
                    event: EVENT_LEAVE.into(),
                    payload: serde_json::Value::Null,
                    reference: None,
                };
                send_frame(ws, &frame).await?;
            }
        }
    }
    Ok(())
}

async fn send_join(ws: &mut WsStream, spec: &StreamSpec, reference: u64) -> Result<(), Error> {
    let payload = match &spec.filter {
        Some(f) => serde_json::json!({ "filter": f }),
        None => serde_json::Value::Null,
    };
    let frame = Frame {
        topic: spec.topic(),
        event: EVENT_JOIN.into(),
        payload,
        reference: Some(reference),
    };
    send_frame(ws, &frame).await
}

async fn send_frame(ws: &mut WsStream, frame: &Frame) -> Result<(), Error> {
    let text = serde_json::to_string(frame).map_err(|e| Error::Deserialization {
        message: e.to_string(),
        body: String::new(),
    })?;
    ws.send(tungstenite::Message::Text(text.into()))
        .await
        .map_err(|e| Error::FeedConnect(e.to_string()))
}

// ── Inbound frame handling ──────────────────────────────────────────

/// Parse an inbound text frame and update state / dispatch events.
fn handle_text_frame(text: &str, state: &mut FeedState) {
    let frame: Frame = match serde_json::from_str(text) {
        Ok(f) => f,
        Err(e) => {
            tracing::debug!(error = %e, "failed to parse changefeed frame");
            return;
        }
    };

    match frame.event.as_str() {
        EVENT_REPLY => handle_reply(&frame, state),
        EVENT_CHANGE => {
            if let Some(event) = change_event_from_frame(&frame) {
                dispatch_event(&event, state);
            }
        }
        EVENT_HEARTBEAT => {}
        other => {
            tracing::trace!(event = other, "ignoring changefeed frame");
        }
    }
}

/// Resolve a pending join from a `feed_reply` frame.
fn handle_reply(frame: &Frame, state: &mut FeedState) {
    let Some(reference) = frame.reference else {
        return;
    };
    let Some(join) = state.pending.remove(&reference) else {
        return;
    };

    let status = frame
        .payload
        .get("status")
        .and_then(|s| s.as_str())
        .unwrap_or("error");

    if status == "ok" {
        let _ = join.ack.send(Ok(join.id));
    } else {
        let reason = frame
            .payload
            .get("reason")
            .and_then(|r| r.as_str())
            .unwrap_or("join rejected")
            .to_owned();
        let stream = state
            .subs
            .remove(&join.id)
            .map_or_else(String::new, |e| e.spec.stream);
        let _ = join.ack.send(Err(Error::SubscribeFailed { stream, reason }));
    }
}

/// Build a [`ChangeEvent`] from a `change` frame.
///
/// Payload shape: `{ "type": "INSERT", "stream": "...", "record": {...},
/// "old_record": {...} }`. The stream name in the payload is
/// authoritative; the topic only identifies the subscription.
fn change_event_from_frame(frame: &Frame) -> Option<ChangeEvent> {
    let op: ChangeOp = serde_json::from_value(frame.payload.get("type")?.clone()).ok()?;
    let stream = frame
        .payload
        .get("stream")
        .and_then(|s| s.as_str())
        .map(str::to_owned)
        .or_else(|| topic_stream(&frame.topic))?;

    Some(ChangeEvent {
        stream,
        op,
        before: frame
            .payload
            .get("old_record")
            .filter(|v| !v.is_null())
            .cloned(),
        after: frame
            .payload
            .get("record")
            .filter(|v| !v.is_null())
            .cloned(),
    })
}

/// Extract the stream name from a topic: `feed:messages:receiver_id=eq.1`
/// → `messages`.
fn topic_stream(topic: &str) -> Option<String> {
    let mut parts = topic.splitn(3, ':');
    match (parts.next(), parts.next()) {
        (Some("feed"), Some(stream)) if !stream.is_empty() => Some(stream.to_owned()),
        _ => None,
    }
}

/// Route an event to every subscription whose spec matches.
fn dispatch_event(event: &ChangeEvent, state: &mut FeedState) {
    let mut dead = Vec::new();
    for (id, entry) in &state.subs {
        if entry.spec.stream != event.stream || !entry.spec.ops.matches(event.op) {
            continue;
        }
        if entry.event_tx.send(event.clone()).is_err() {
            dead.push(*id);
        }
    }
    for id in dead {
        state.subs.remove(&id);
    }
}

// ── Backoff calculation ─────────────────────────────────────────────

/// Exponential backoff with jitter.
///
/// `delay = min(initial * 2^attempt, max) + jitter`
///
/// Jitter is +-25% to spread out reconnection storms from multiple clients.
fn calculate_backoff(attempt: u32, config: &ReconnectConfig) -> Duration {
    let base = config.initial_delay.as_secs_f64() * 2.0_f64.powi(i32::try_from(attempt).unwrap_or(i32::MAX));
    let capped = base.min(config.max_delay.as_secs_f64());

    // Deterministic "jitter" seeded from the attempt number.
    let jitter_factor = 1.0 + 0.25 * ((f64::from(attempt) * 7.3).sin());
    let with_jitter = (capped * jitter_factor).max(0.0);

    Duration::from_secs_f64(with_jitter)
}

// ── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn default_feed_config() {
        let config = FeedConfig::default();
        assert_eq!(config.reconnect.initial_delay, Duration::from_secs(1));
        assert_eq!(config.reconnect.max_delay, Duration::from_secs(30));
        assert!(config.reconnect.max_retries.is_none());
        assert_eq!(config.join_timeout, Duration::from_secs(10));
    }

    #[test]
    fn backoff_increases_exponentially() {
        let config = ReconnectConfig::default();

        let d0 = calculate_backoff(0, &config);
        let d1 = calculate_backoff(1, &config);
        let d2 = calculate_backoff(2, &config);

        assert!(d1 > d0, "d1 ({d1:?}) should be greater than d0 ({d0:?})");
        assert!(d2 > d1, "d2 ({d2:?}) should be greater than d1 ({d1:?})");
    }

    #[test]
    fn backoff_caps_at_max_delay() {
        let config = ReconnectConfig {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(10),
            max_retries: None,
        };

        let d10 = calculate_backoff(10, &config);
        // With jitter factor up to 1.25, max effective is 12.5s
        assert!(
            d10 <= Duration::from_secs(13),
            "delay at attempt 10 ({d10:?}) should be capped near max_delay"
        );
    }

    #[test]
    fn topic_includes_filter() {
        let spec = StreamSpec::new("messages")
            .with_filter(StreamFilter::eq("receiver_id", "u-42"));
        assert_eq!(spec.topic(), "feed:messages:receiver_id=eq.u-42");

        let bare = StreamSpec::new("documents");
        assert_eq!(bare.topic(), "feed:documents");
    }

    #[test]
    fn op_set_matching() {
        assert!(OpSet::All.matches(ChangeOp::Delete));
        assert!(OpSet::inserts().matches(ChangeOp::Insert));
        assert!(!OpSet::inserts().matches(ChangeOp::Update));
        assert!(OpSet::inserts_and_updates().matches(ChangeOp::Update));
    }

    #[test]
    fn change_event_from_insert_frame() {
        let frame: Frame = serde_json::from_str(
            r#"{
                "topic": "feed:documents",
                "event": "change",
                "payload": {
                    "type": "INSERT",
                    "stream": "documents",
                    "record": { "id": "d1", "status": "pending" },
                    "old_record": null
                }
            }"#,
        )
        .unwrap();

        let event = change_event_from_frame(&frame).unwrap();
        assert_eq!(event.stream, "documents");
        assert_eq!(event.op, ChangeOp::Insert);
        assert!(event.before.is_none());
        assert_eq!(event.after_str("status"), Some("pending"));
    }

    #[test]
    fn change_event_falls_back_to_topic_stream() {
        let frame: Frame = serde_json::from_str(
            r#"{
                "topic": "feed:service_requests:worker_id=eq.w1",
                "event": "change",
                "payload": {
                    "type": "UPDATE",
                    "record": { "status": "accepted" },
                    "old_record": { "status": "pending" }
                }
            }"#,
        )
        .unwrap();

        let event = change_event_from_frame(&frame).unwrap();
        assert_eq!(event.stream, "service_requests");
        assert_eq!(event.before_str("status"), Some("pending"));
        assert_eq!(event.after_str("status"), Some("accepted"));
    }

    #[test]
    fn malformed_frame_is_dropped() {
        let mut state = FeedState::new();
        handle_text_frame("not json at all", &mut state);
        assert!(state.subs.is_empty());
    }

    #[test]
    fn dispatch_respects_stream_and_ops() {
        let mut state = FeedState::new();
        let (tx_docs, mut rx_docs) = mpsc::unbounded_channel();
        let (tx_msgs, mut rx_msgs) = mpsc::unbounded_channel();

        state.subs.insert(
            SubscriptionId(1),
            SubEntry {
                spec: StreamSpec::new("documents").with_op_set(OpSet::inserts()),
                event_tx: tx_docs,
            },
        );
        state.subs.insert(
            SubscriptionId(2),
            SubEntry {
                spec: StreamSpec::new("messages"),
                event_tx: tx_msgs,
            },
        );

        let event = ChangeEvent {
            stream: "documents".into(),
            op: ChangeOp::Insert,
            before: None,
            after: Some(serde_json::json!({ "id": "d1" })),
        };
        dispatch_event(&event, &mut state);

        assert!(rx_docs.try_recv().is_ok());
        assert!(rx_msgs.try_recv().is_err());

        // Update on documents is filtered out by the op set.
        let update = ChangeEvent {
            stream: "documents".into(),
            op: ChangeOp::Update,
            before: None,
            after: None,
        };
        dispatch_event(&update, &mut state);
        assert!(rx_docs.try_recv().is_err());
    }

    #[test]
    fn reply_resolves_pending_join() {
        let mut state = FeedState::new();
        let (event_tx, _event_rx) = mpsc::unbounded_channel();
        let (ack_tx, mut ack_rx) = oneshot::channel();

        let (id, reference) = state.allocate();
        state.subs.insert(
            id,
            SubEntry {
                spec: StreamSpec::new("messages"),
                event_tx,
            },
        );
        state.pending.insert(reference, PendingJoin { id, ack: ack_tx });

        let reply = format!(
            r#"{{ "topic": "feed:messages", "event": "feed_reply",
                 "payload": {{ "status": "ok" }}, "ref": {reference} }}"#
        );
        handle_text_frame(&reply, &mut state);

        assert_eq!(ack_rx.try_recv().unwrap().unwrap(), id);
        assert!(state.pending.is_empty());
    }

    #[test]
    fn rejected_join_removes_subscription() {
        let mut state = FeedState::new();
        let (event_tx, _event_rx) = mpsc::unbounded_channel();
        let (ack_tx, mut ack_rx) = oneshot::channel();

        let (id, reference) = state.allocate();
        state.subs.insert(
            id,
            SubEntry {
                spec: StreamSpec::new("payments"),
                event_tx,
            },
        );
        state.pending.insert(reference, PendingJoin { id, ack: ack_tx });

        let reply = format!(
            r#"{{ "topic": "feed:payments", "event": "feed_reply",
                 "payload": {{ "status": "error", "reason": "forbidden" }},
                 "ref": {reference} }}"#
        );
        handle_text_frame(&reply, &mut state);

        let err = ack_rx.try_recv().unwrap().unwrap_err();
        assert!(matches!(err, Error::SubscribeFailed { .. }));
        assert!(state.subs.is_empty());
    }

    #[test]
    fn fail_pending_errors_all_waiting_joins() {
        let mut state = FeedState::new();
        let (event_tx, _event_rx) = mpsc::unbounded_channel();
        let (ack_tx, mut ack_rx) = oneshot::channel();

        let (id, reference) = state.allocate();
        state.subs.insert(
            id,
            SubEntry {
                spec: StreamSpec::new("profiles"),
                event_tx,
            },
        );
        state.pending.insert(reference, PendingJoin { id, ack: ack_tx });

        state.fail_pending("connection lost");

        let err = ack_rx.try_recv().unwrap().unwrap_err();
        assert!(matches!(err, Error::SubscribeFailed { .. }));
    }
}
