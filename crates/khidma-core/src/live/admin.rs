// ── Admin aggregation service ──
//
// Fans four independent streams (documents, requests, profiles,
// payments) into one alert feed with per-category counts. Any event on
// any of the four streams refetches every count -- a deliberate
// simplicity/correctness tradeoff: each refetch reflects ground truth,
// so cross-stream event ordering never matters.
//
// Precondition: the admin role. Without it the feed performs no
// subscription or query work at all and stays disposed for its lifetime.

use chrono::{DateTime, Utc};
use khidma_api::{ChangeEvent, OpSet, RestClient, StreamSpec};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::CoreError;
use crate::marketplace::Marketplace;
use crate::model::{EntityId, streams};

use super::counts::{CountsCell, PendingCounts, fetch_pending_counts};
use super::enrich::NameDirectory;
use super::mapper::{Perspective, ViewContext, map_event};
use super::notify::{Presenter, toast_for};
use super::pump_events;
use super::scope::SubscriptionScope;

// ── Snapshot types ──────────────────────────────────────────────────

/// Lifecycle of the admin feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedPhase {
    /// Initial counts not yet fetched.
    Loading,
    /// Counts available, subscriptions live.
    Ready,
    /// All handles released; terminal.
    Disposed,
}

/// Category of an admin alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertCategory {
    Document,
    Request,
    User,
}

/// A synthetic alert derived from the current counts. Never stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdminAlert {
    pub id: String,
    pub category: AlertCategory,
    pub title: String,
    pub message: String,
    pub link: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Everything a badge/bell view needs, published on every change.
#[derive(Debug, Clone)]
pub struct AdminSnapshot {
    pub phase: FeedPhase,
    pub counts: PendingCounts,
    pub alerts: Vec<AdminAlert>,
    /// True when one or more streams could not be subscribed and counts
    /// are only as fresh as the last successful refetch.
    pub degraded: bool,
}

impl AdminSnapshot {
    fn initial(degraded: bool) -> Self {
        Self {
            phase: FeedPhase::Loading,
            counts: PendingCounts::default(),
            alerts: Vec::new(),
            degraded,
        }
    }

    fn disposed() -> Self {
        Self {
            phase: FeedPhase::Disposed,
            counts: PendingCounts::default(),
            alerts: Vec::new(),
            degraded: false,
        }
    }

    /// The combined badge total (documents + requests only).
    pub fn total_alerts(&self) -> u64 {
        self.counts.total_alerts()
    }
}

// ── AdminFeed ───────────────────────────────────────────────────────

/// A running admin alert feed.
pub struct AdminFeed {
    snapshot_rx: watch::Receiver<AdminSnapshot>,
    refresh_tx: Option<mpsc::UnboundedSender<()>>,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl AdminFeed {
    /// Start the feed for the current identity.
    ///
    /// A non-admin identity gets a permanently inert feed: no
    /// subscriptions are acquired and no queries are issued, ever.
    pub async fn spawn(marketplace: &Marketplace, presenter: Presenter) -> Result<Self, CoreError> {
        let identity = marketplace.identity().await?;

        if !identity.is_admin() {
            debug!(user_id = %identity.id, "identity lacks admin role, feed stays inert");
            let (_, snapshot_rx) = watch::channel(AdminSnapshot::disposed());
            let cancel = CancellationToken::new();
            cancel.cancel();
            return Ok(Self {
                snapshot_rx,
                refresh_tx: None,
                cancel,
                task: None,
            });
        }

        let rest = marketplace.rest().await?;
        let mut scope = marketplace.scope().await?;
        let ctx = ViewContext::new(EntityId::from(identity.id.clone()), Perspective::Admin);

        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let mut degraded = false;

        let wanted = [
            StreamSpec::new(streams::DOCUMENTS).with_op_set(OpSet::inserts_and_updates()),
            StreamSpec::new(streams::SERVICE_REQUESTS).with_op_set(OpSet::inserts_and_updates()),
            StreamSpec::new(streams::PROFILES).with_op_set(OpSet::inserts()),
            StreamSpec::new(streams::PAYMENTS).with_op_set(OpSet::inserts_and_updates()),
        ];

        for spec in wanted {
            let stream = spec.stream.clone();
            match scope.acquire(spec).await {
                Ok(handle) => {
                    pump_events(handle, ctx.clone(), event_tx.clone(), scope.liveness());
                }
                Err(e) => {
                    warn!(stream = %stream, error = %e, "admin stream unavailable, feed degraded");
                    degraded = true;
                }
            }
        }
        let event_keepalive = event_tx;

        let (snapshot_tx, snapshot_rx) = watch::channel(AdminSnapshot::initial(degraded));
        let (refresh_tx, refresh_rx) = mpsc::unbounded_channel();
        let cancel = scope.liveness();
        let names = NameDirectory::new(rest.clone());

        let task = tokio::spawn(admin_loop(AdminLoop {
            scope: Some(scope),
            cancel: cancel.clone(),
            rest,
            ctx,
            event_rx,
            refresh_rx,
            // Keep the channels open even if every pump (or the refresh
            // handle) goes away: the loop must exit via cancel only.
            _event_keepalive: event_keepalive,
            _refresh_keepalive: refresh_tx.clone(),
            snapshot_tx,
            names,
            presenter,
            degraded,
        }));

        Ok(Self {
            snapshot_rx,
            refresh_tx: Some(refresh_tx),
            cancel,
            task: Some(task),
        })
    }

    /// The latest published snapshot.
    pub fn snapshot(&self) -> AdminSnapshot {
        self.snapshot_rx.borrow().clone()
    }

    /// Observe snapshot changes.
    pub fn watch(&self) -> watch::Receiver<AdminSnapshot> {
        self.snapshot_rx.clone()
    }

    /// Trigger a manual count refetch (degraded-mode refresh path).
    pub fn refresh(&self) {
        if let Some(tx) = &self.refresh_tx {
            let _ = tx.send(());
        }
    }

    /// Dispose the feed: release every handle and stop publishing.
    pub async fn dispose(mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

// ── Event loop ──────────────────────────────────────────────────────

struct AdminLoop {
    scope: Option<SubscriptionScope>,
    cancel: CancellationToken,
    rest: RestClient,
    ctx: ViewContext,
    event_rx: mpsc::UnboundedReceiver<(ViewContext, ChangeEvent)>,
    refresh_rx: mpsc::UnboundedReceiver<()>,
    /// Held so `event_rx`/`refresh_rx` never report closed; the loop
    /// terminates through the cancellation token alone.
    _event_keepalive: mpsc::UnboundedSender<(ViewContext, ChangeEvent)>,
    _refresh_keepalive: mpsc::UnboundedSender<()>,
    snapshot_tx: watch::Sender<AdminSnapshot>,
    names: NameDirectory,
    presenter: Presenter,
    degraded: bool,
}

async fn admin_loop(mut lp: AdminLoop) {
    let mut cell = CountsCell::new();
    let mut phase = FeedPhase::Loading;

    let (result_tx, mut result_rx) =
        mpsc::unbounded_channel::<(u64, Result<PendingCounts, CoreError>)>();

    // Initial load; Loading -> Ready happens when it completes,
    // regardless of subscription readiness.
    spawn_recompute(&lp.rest, cell.begin(), result_tx.clone());

    loop {
        tokio::select! {
            biased;

            () = lp.cancel.cancelled() => break,

            result = result_rx.recv() => {
                let Some((generation, result)) = result else { break };
                match result {
                    Ok(counts) => {
                        cell.apply(generation, counts);
                    }
                    Err(e) => {
                        // Keep the last-known-good value on screen.
                        warn!(error = %e, "count refetch failed");
                    }
                }
                if phase == FeedPhase::Loading {
                    phase = FeedPhase::Ready;
                }
                publish(&lp.snapshot_tx, phase, &cell, lp.degraded);
            }

            Some(()) = lp.refresh_rx.recv() => {
                spawn_recompute(&lp.rest, cell.begin(), result_tx.clone());
            }

            received = lp.event_rx.recv() => {
                let Some((_, event)) = received else { break };

                // Policy: every event on any admin stream refetches every
                // count. The mapped action only drives presentation.
                spawn_recompute(&lp.rest, cell.begin(), result_tx.clone());

                if let Some(action) = map_event(&event, &lp.ctx) {
                    if action.presentable() {
                        lp.names.resolve(&action.enrichment_ids()).await;
                        if let Some(toast) = toast_for(&action, &lp.names) {
                            lp.presenter.present(toast);
                        }
                    }
                }
            }
        }
    }

    if let Some(scope) = lp.scope.as_mut() {
        scope.release_all();
    }
    let _ = lp.snapshot_tx.send(AdminSnapshot::disposed());
    debug!("admin feed disposed");
}

/// Run one recompute off the loop so a slow query never blocks event
/// intake. Results come back tagged with their trigger generation; the
/// loop is the only writer, so application is race-free.
fn spawn_recompute(
    rest: &RestClient,
    generation: u64,
    result_tx: mpsc::UnboundedSender<(u64, Result<PendingCounts, CoreError>)>,
) {
    let rest = rest.clone();
    tokio::spawn(async move {
        let result = fetch_pending_counts(&rest).await;
        // A closed channel means the feed was disposed: discard.
        let _ = result_tx.send((generation, result));
    });
}

fn publish(
    snapshot_tx: &watch::Sender<AdminSnapshot>,
    phase: FeedPhase,
    cell: &CountsCell,
    degraded: bool,
) {
    let counts = cell.value();
    let _ = snapshot_tx.send(AdminSnapshot {
        phase,
        counts,
        alerts: build_alerts(counts),
        degraded,
    });
}

/// Synthesize the alert list from the current counts.
fn build_alerts(counts: PendingCounts) -> Vec<AdminAlert> {
    let mut alerts = Vec::new();
    let now = Utc::now();

    if counts.documents > 0 {
        alerts.push(AdminAlert {
            id: "pending-documents".into(),
            category: AlertCategory::Document,
            title: "Pending documents".into(),
            message: format!("{} documents awaiting review", counts.documents),
            link: Some("/admin".into()),
            created_at: now,
        });
    }

    if counts.requests > 0 {
        alerts.push(AdminAlert {
            id: "pending-requests".into(),
            category: AlertCategory::Request,
            title: "Pending requests".into(),
            message: format!("{} service requests awaiting moderation", counts.requests),
            link: Some("/admin".into()),
            created_at: now,
        });
    }

    if counts.new_users > 0 {
        alerts.push(AdminAlert {
            id: "new-users".into(),
            category: AlertCategory::User,
            title: "New users".into(),
            message: format!("{} users joined in the last 24 hours", counts.new_users),
            link: Some("/admin".into()),
            created_at: now,
        });
    }

    alerts
}

// ── Tests ───────────────────────────────────────────────────────────
