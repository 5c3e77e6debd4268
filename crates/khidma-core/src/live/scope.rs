// ── Per-view subscription ownership ──
//
// A SubscriptionScope is the explicit owner of every changefeed handle a
// view acquires. Views create one scope on activation and call
// `release_all` on deactivation; the scope's liveness token lets in-flight
// work detect teardown and discard its results.

use std::collections::HashSet;
use std::time::Duration;

use khidma_api::{ChangefeedClient, StreamSpec, Subscription, SubscriptionId};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::CoreError;

/// Delay before the second join attempt; doubles per attempt.
const JOIN_RETRY_INITIAL_DELAY: Duration = Duration::from_millis(500);

/// A live, scope-owned subscription.
///
/// Wraps the transport-level subscription; the receiver half lives here.
/// Dropping the handle without releasing it closes the receiver, and the
/// feed prunes the dead entry -- but well-behaved views release through
/// the scope so the server sees an explicit leave.
#[derive(Debug)]
pub struct LiveHandle {
    inner: Subscription,
}

impl LiveHandle {
    pub fn id(&self) -> SubscriptionId {
        self.inner.id()
    }

    pub fn stream(&self) -> &str {
        self.inner.stream()
    }

    /// Receive the next change event for this handle.
    pub async fn recv(&mut self) -> Option<khidma_api::ChangeEvent> {
        self.inner.recv().await
    }
}

/// Owns every subscription a single view holds.
///
/// Exactly one scope exists per active view. Acquiring the same topic
/// twice without releasing the first handle is a defect and is rejected.
pub struct SubscriptionScope {
    feed: ChangefeedClient,
    max_join_attempts: u32,
    /// Topics currently held, for the one-handle-per-stream invariant.
    active_topics: HashSet<String>,
    /// Ids of every handle acquired and not yet individually released.
    acquired: Vec<(SubscriptionId, String)>,
    liveness: CancellationToken,
    released: bool,
}

impl SubscriptionScope {
    pub(crate) fn new(feed: ChangefeedClient, max_join_attempts: u32) -> Self {
        Self {
            feed,
            max_join_attempts: max_join_attempts.max(1),
            active_topics: HashSet::new(),
            acquired: Vec::new(),
            liveness: CancellationToken::new(),
            released: false,
        }
    }

    /// Token that is cancelled when this scope is released.
    ///
    /// Work spawned on behalf of the view guards its completion on this:
    /// a result arriving after teardown must not touch view state.
    pub fn liveness(&self) -> CancellationToken {
        self.liveness.clone()
    }

    pub fn is_released(&self) -> bool {
        self.released
    }

    /// Number of handles currently owned by this scope.
    pub fn active_handles(&self) -> usize {
        self.acquired.len()
    }

    /// Acquire a subscription for this view.
    ///
    /// Does not return until the changefeed acknowledges the join. Failed
    /// joins are retried with doubling delays up to the configured attempt
    /// budget, then reported as [`CoreError::Subscription`].
    pub async fn acquire(&mut self, spec: StreamSpec) -> Result<LiveHandle, CoreError> {
        if self.released {
            return Err(CoreError::Subscription {
                stream: spec.stream,
                reason: "scope already released".into(),
            });
        }

        let topic = spec.topic();
        if self.active_topics.contains(&topic) {
            return Err(CoreError::Subscription {
                stream: spec.stream,
                reason: format!("already subscribed to '{topic}' in this scope"),
            });
        }

        let mut delay = JOIN_RETRY_INITIAL_DELAY;
        let mut last_err: Option<khidma_api::Error> = None;

        for attempt in 0..self.max_join_attempts {
            if attempt > 0 {
                tokio::time::sleep(delay).await;
                delay *= 2;
            }

            match self.feed.subscribe(spec.clone()).await {
                Ok(sub) => {
                    debug!(stream = %spec.stream, topic = %topic, "subscription established");
                    self.active_topics.insert(topic.clone());
                    self.acquired.push((sub.id(), topic));
                    return Ok(LiveHandle { inner: sub });
                }
                Err(e) => {
                    warn!(stream = %spec.stream, attempt, error = %e, "join attempt failed");
                    last_err = Some(e);
                }
            }
        }

        Err(CoreError::Subscription {
            stream: spec.stream,
            reason: last_err.map_or_else(|| "join failed".into(), |e| e.to_string()),
        })
    }

    /// Release a single handle. Idempotent: a handle that was already
    /// released (or belongs to another scope) is a no-op.
    pub fn release(&mut self, handle: &LiveHandle) {
        let id = handle.id();
        let Some(pos) = self.acquired.iter().position(|(held, _)| *held == id) else {
            return;
        };
        let (_, topic) = self.acquired.swap_remove(pos);
        self.active_topics.remove(&topic);
        self.feed.unsubscribe(id);
        debug!(topic = %topic, "subscription released");
    }

    /// Release every handle this scope still owns and cancel liveness.
    ///
    /// Best-effort: a failure to release one handle never prevents
    /// releasing the others. Safe to call repeatedly.
    pub fn release_all(&mut self) {
        self.released = true;
        self.liveness.cancel();

        for (id, topic) in self.acquired.drain(..) {
            // unsubscribe is fire-and-forget; a closed feed just means the
            // transport already tore everything down.
            self.feed.unsubscribe(id);
            debug!(topic = %topic, "subscription released (scope teardown)");
        }
        self.active_topics.clear();
    }
}

impl Drop for SubscriptionScope {
    fn drop(&mut self) {
        if !self.released {
            self.release_all();
        }
    }
}

// ── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use khidma_api::FeedConfig;
    use url::Url;

    fn dead_feed() -> ChangefeedClient {
        // Points at a closed port; joins will time out / fail, which is
        // all these tests need.
        let url = Url::parse("ws://127.0.0.1:9/socket").expect("url");
        let config = FeedConfig {
            join_timeout: Duration::from_millis(50),
            ..FeedConfig::default()
        };
        ChangefeedClient::connect(url, config, CancellationToken::new())
    }

    #[tokio::test]
    async fn release_all_is_idempotent_and_leaves_zero_handles() {
        let mut scope = SubscriptionScope::new(dead_feed(), 1);

        scope.release_all();
        assert_eq!(scope.active_handles(), 0);
        assert!(scope.is_released());

        // Second call must be a no-op, not an error.
        scope.release_all();
        assert_eq!(scope.active_handles(), 0);
    }

    #[tokio::test]
    async fn acquire_after_release_is_rejected() {
        let mut scope = SubscriptionScope::new(dead_feed(), 1);
        scope.release_all();

        let result = scope.acquire(StreamSpec::new("messages")).await;
        assert!(matches!(result, Err(CoreError::Subscription { .. })));
    }

    #[tokio::test]
    async fn liveness_token_cancels_on_release() {
        let mut scope = SubscriptionScope::new(dead_feed(), 1);
        let liveness = scope.liveness();
        assert!(!liveness.is_cancelled());

        scope.release_all();
        assert!(liveness.is_cancelled());
    }

    #[tokio::test]
    async fn failed_join_reports_subscription_error() {
        let mut scope = SubscriptionScope::new(dead_feed(), 1);
        let result = scope.acquire(StreamSpec::new("documents")).await;

        match result {
            Err(CoreError::Subscription { stream, .. }) => assert_eq!(stream, "documents"),
            other => panic!("expected Subscription error, got {other:?}"),
        }
        assert_eq!(scope.active_handles(), 0);
    }
}
