// ── Conversation aggregation ──
//
// Derives the per-counterparty inbox view (last message, unread count)
// from the full message set. Recomputed from scratch on every relevant
// event: consistency over re-scan cost, which is acceptable at direct-
// message volumes.

use std::collections::HashMap;

use khidma_api::{StreamFilter, StreamSpec};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::CoreError;
use crate::live::pump_events;
use crate::live::{Perspective, SubscriptionScope, ViewContext};
use crate::marketplace::Marketplace;
use crate::model::{EntityId, Message, streams};

/// One row of the inbox: everything exchanged with a single counterparty.
#[derive(Debug, Clone)]
pub struct Conversation {
    pub counterparty_id: EntityId,
    pub last_message: Message,
    /// Messages from the counterparty the viewer has not read.
    pub unread: u64,
}

/// Aggregate the viewer's messages into conversations.
///
/// Messages not involving the viewer are ignored. The result is sorted
/// by last activity, newest first.
pub fn aggregate_conversations(viewer: &EntityId, messages: &[Message]) -> Vec<Conversation> {
    let mut by_counterparty: HashMap<EntityId, Conversation> = HashMap::new();

    for message in messages {
        let counterparty = if message.sender_id == *viewer {
            &message.receiver_id
        } else if message.receiver_id == *viewer {
            &message.sender_id
        } else {
            continue;
        };

        let inbound_unread = u64::from(message.receiver_id == *viewer && !message.read);

        match by_counterparty.get_mut(counterparty) {
            Some(convo) => {
                convo.unread += inbound_unread;
                if message.created_at > convo.last_message.created_at {
                    convo.last_message = message.clone();
                }
            }
            None => {
                by_counterparty.insert(
                    counterparty.clone(),
                    Conversation {
                        counterparty_id: counterparty.clone(),
                        last_message: message.clone(),
                        unread: inbound_unread,
                    },
                );
            }
        }
    }

    let mut conversations: Vec<Conversation> = by_counterparty.into_values().collect();
    conversations.sort_by(|a, b| b.last_message.created_at.cmp(&a.last_message.created_at));
    conversations
}

// ── Live inbox ──────────────────────────────────────────────────────

/// A live conversation list for the signed-in user.
///
/// On every message event touching the viewer, the full message set is
/// re-fetched and re-aggregated -- no incremental merge, so the view can
/// never drift from the store regardless of event order or races with
/// the initial load.
pub struct InboxFeed {
    conversations_rx: watch::Receiver<Vec<Conversation>>,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl InboxFeed {
    /// Subscribe both directions of the viewer's messages and start
    /// recomputing. The initial aggregation is published before any
    /// event arrives.
    pub async fn spawn(marketplace: &Marketplace) -> Result<Self, CoreError> {
        let identity = marketplace.identity().await?;
        let mut scope = marketplace.scope().await?;

        let viewer = EntityId::from(identity.id.clone());
        let ctx = ViewContext::new(viewer.clone(), Perspective::Client);
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        // One equality predicate per subscription: inbound and outbound
        // legs are separate streams server-side.
        let wanted = [
            StreamSpec::new(streams::MESSAGES)
                .with_filter(StreamFilter::eq("receiver_id", identity.id.clone())),
            StreamSpec::new(streams::MESSAGES)
                .with_filter(StreamFilter::eq("sender_id", identity.id.clone())),
        ];

        for spec in wanted {
            let stream_topic = spec.topic();
            match scope.acquire(spec).await {
                Ok(handle) => {
                    pump_events(handle, ctx.clone(), event_tx.clone(), scope.liveness());
                }
                Err(e) => {
                    warn!(topic = %stream_topic, error = %e, "inbox channel unavailable");
                }
            }
        }
        let event_keepalive = event_tx;

        let (conversations_tx, conversations_rx) = watch::channel(Vec::new());
        let cancel = scope.liveness();

        let task = tokio::spawn(inbox_loop(
            scope,
            marketplace.clone(),
            viewer,
            event_rx,
            event_keepalive,
            conversations_tx,
        ));

        Ok(Self {
            conversations_rx,
            cancel,
            task,
        })
    }

    /// The latest conversation list.
    pub fn conversations(&self) -> Vec<Conversation> {
        self.conversations_rx.borrow().clone()
    }

    /// Observe conversation list changes.
    pub fn watch(&self) -> watch::Receiver<Vec<Conversation>> {
        self.conversations_rx.clone()
    }

    /// Deactivate: release the handles and stop recomputing.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        let _ = self.task.await;
    }
}

async fn inbox_loop(
    mut scope: SubscriptionScope,
    marketplace: Marketplace,
    viewer: EntityId,
    mut event_rx: mpsc::UnboundedReceiver<(ViewContext, khidma_api::ChangeEvent)>,
    _event_keepalive: mpsc::UnboundedSender<(ViewContext, khidma_api::ChangeEvent)>,
    conversations_tx: watch::Sender<Vec<Conversation>>,
) {
    let cancel = scope.liveness();

    // Initial load. A live event racing this simply triggers another
    // full recompute, which lands on ground truth either way.
    recompute(&marketplace, &viewer, &conversations_tx).await;

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            received = event_rx.recv() => {
                let Some((_, event)) = received else { break };
                if event.stream == streams::MESSAGES {
                    recompute(&marketplace, &viewer, &conversations_tx).await;
                }
            }
        }
    }

    scope.release_all();
    debug!("inbox feed shut down");
}

/// Re-fetch every message and replace the published aggregation.
async fn recompute(
    marketplace: &Marketplace,
    viewer: &EntityId,
    conversations_tx: &watch::Sender<Vec<Conversation>>,
) {
    match marketplace.list_my_messages().await {
        Ok(messages) => {
            let _ = conversations_tx.send(aggregate_conversations(viewer, &messages));
        }
        Err(e) => {
            // Keep the last-known-good list.
            warn!(error = %e, "inbox recompute failed");
        }
    }
}

// ── Tests ───────────────────────────────────────────────────────────
