// ── Per-user live notification feed ──
//
// Subscribes to the streams a signed-in user cares about: messages sent
// to them, their requests (as client and as worker), and notification
// rows posted for them. Every mapped action is enriched and presented as
// a toast; handles are owned by one scope and torn down together.

use khidma_api::{ChangeEvent, OpSet, StreamFilter, StreamSpec};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::CoreError;
use crate::marketplace::Marketplace;
use crate::model::streams;

use super::enrich::NameDirectory;
use super::mapper::{Perspective, ViewContext, map_event};
use super::notify::{Presenter, toast_for};
use super::scope::SubscriptionScope;
use super::pump_events;

/// A running live feed for one signed-in user.
///
/// Created on view activation, shut down on deactivation. Dropping the
/// feed without calling [`shutdown`](Self::shutdown) still releases the
/// scope via its owning task.
pub struct UserFeed {
    cancel: CancellationToken,
    task: JoinHandle<()>,
    /// True when one or more subscriptions could not be established and
    /// the feed is running with partial coverage.
    degraded: bool,
}

impl UserFeed {
    /// Subscribe the current identity's streams and start presenting.
    ///
    /// Precondition: a signed-in session. Individual subscription
    /// failures degrade the feed instead of failing it -- the remaining
    /// channels keep working.
    pub async fn spawn(marketplace: &Marketplace, presenter: Presenter) -> Result<Self, CoreError> {
        let identity = marketplace.identity().await?;
        let rest = marketplace.rest().await?;
        let mut scope = marketplace.scope().await?;

        let viewer = identity.id.as_str();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let mut degraded = false;

        // (spec, perspective) per stream the user watches. The worker
        // subscription is wildcard: assignment inserts and status updates.
        let wanted = [
            (
                StreamSpec::new(streams::MESSAGES)
                    .with_filter(StreamFilter::eq("receiver_id", viewer))
                    .with_op_set(OpSet::inserts()),
                Perspective::Client,
            ),
            (
                StreamSpec::new(streams::SERVICE_REQUESTS)
                    .with_filter(StreamFilter::eq("client_id", viewer))
                    .with_op_set(OpSet::updates()),
                Perspective::Client,
            ),
            (
                StreamSpec::new(streams::SERVICE_REQUESTS)
                    .with_filter(StreamFilter::eq("worker_id", viewer)),
                Perspective::Worker,
            ),
            (
                StreamSpec::new(streams::NOTICES)
                    .with_filter(StreamFilter::eq("user_id", viewer))
                    .with_op_set(OpSet::inserts()),
                Perspective::Client,
            ),
        ];

        for (spec, perspective) in wanted {
            let stream = spec.stream.clone();
            match scope.acquire(spec).await {
                Ok(handle) => {
                    pump_events(
                        handle,
                        ViewContext::new(identity.id.clone().into(), perspective),
                        event_tx.clone(),
                        scope.liveness(),
                    );
                }
                Err(e) => {
                    warn!(stream = %stream, error = %e, "live channel unavailable, feed degraded");
                    degraded = true;
                }
            }
        }
        drop(event_tx);

        // One permission request per session, tied to activation --
        // never issued while presenting.
        presenter.request_permission_once();

        let cancel = scope.liveness();
        let names = NameDirectory::new(rest);
        let task = tokio::spawn(user_feed_loop(scope, event_rx, names, presenter));

        Ok(Self {
            cancel,
            task,
            degraded,
        })
    }

    pub fn is_degraded(&self) -> bool {
        self.degraded
    }

    /// Deactivate: release every handle and stop presenting.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        let _ = self.task.await;
    }
}

/// Event loop: map, enrich, present, until the scope dies.
async fn user_feed_loop(
    mut scope: SubscriptionScope,
    mut event_rx: mpsc::UnboundedReceiver<(ViewContext, ChangeEvent)>,
    mut names: NameDirectory,
    presenter: Presenter,
) {
    let cancel = scope.liveness();

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            received = event_rx.recv() => {
                let Some((ctx, event)) = received else { break };
                process_event(&event, &ctx, &mut names, &presenter).await;
            }
        }
    }

    scope.release_all();
    debug!("user feed shut down");
}

/// Classify one event and surface it. Enrichment is best-effort; a
/// failed lookup presents with the placeholder name.
async fn process_event(
    event: &ChangeEvent,
    ctx: &ViewContext,
    names: &mut NameDirectory,
    presenter: &Presenter,
) {
    let Some(action) = map_event(event, ctx) else {
        return;
    };

    names.resolve(&action.enrichment_ids()).await;

    if let Some(toast) = toast_for(&action, names) {
        presenter.present(toast);
    }
}

// ── Tests ───────────────────────────────────────────────────────────
