// ── Live update coordination ──
//
// The subsystem that keeps request status, messages, document review and
// admin alerts synchronized across open sessions without polling. Built
// from small parts that share one pattern: a per-view subscription scope
// feeding mapped actions into count recomputation and alert presentation.

pub mod admin;
pub mod counts;
pub mod enrich;
pub mod mapper;
pub mod notify;
pub mod scope;
pub mod user_feed;

pub use admin::{AdminAlert, AdminFeed, AdminSnapshot, AlertCategory, FeedPhase};
pub use counts::{CountsCell, PendingCounts, fetch_pending_counts};
pub use enrich::{NameDirectory, UNKNOWN_USER};
pub use mapper::{Action, Perspective, ViewContext, map_event, status_label};
pub use notify::{Notifier, NullNotifier, Permission, Presenter, Toast, toast_for};
pub use scope::{LiveHandle, SubscriptionScope};

use khidma_api::ChangeEvent;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Forward every event from a handle into a shared channel, tagged with
/// the view context the subscription was created under.
///
/// One pump per handle keeps per-stream arrival order intact; the shared
/// channel interleaves streams arbitrarily, which consumers tolerate by
/// re-querying ground truth.
pub(crate) fn pump_events(
    mut handle: LiveHandle,
    ctx: ViewContext,
    tx: mpsc::UnboundedSender<(ViewContext, ChangeEvent)>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                event = handle.recv() => {
                    let Some(event) = event else { break };
                    if tx.send((ctx.clone(), event)).is_err() {
                        break;
                    }
                }
            }
        }
    })
}
