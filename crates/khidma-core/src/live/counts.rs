// ── Pending-work counters ──
//
// Counts are always re-derived from the store, never incremented or
// decremented from event payloads: a missed or reordered event can never
// make the badge drift from ground truth. Concurrent recomputes are
// ordered by a generation stamp taken at trigger time -- a recompute
// triggered later always reflects ground truth at least as fresh, so
// stale completions are discarded.

use chrono::{Duration as ChronoDuration, Utc};
use khidma_api::{Filter, RestClient};
use tracing::debug;

use crate::error::CoreError;
use crate::model::streams;

/// How far back a registration still counts as a "new user".
const NEW_USER_WINDOW_HOURS: i64 = 24;

/// Store-derived counters for the admin backlog.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PendingCounts {
    /// Documents awaiting review.
    pub documents: u64,
    /// Service requests awaiting moderation.
    pub requests: u64,
    /// Accounts registered in the last 24 hours.
    pub new_users: u64,
}

impl PendingCounts {
    /// The combined badge total. New users and payments are informational
    /// only -- they never contribute to the actionable backlog.
    pub fn total_alerts(&self) -> u64 {
        self.documents + self.requests
    }
}

/// Fetch all pending counts from the authoritative store.
///
/// Three exact-count queries; the result reflects ground truth at query
/// time and completely replaces whatever was displayed before.
pub async fn fetch_pending_counts(rest: &RestClient) -> Result<PendingCounts, CoreError> {
    let documents = rest
        .count(streams::DOCUMENTS, &[Filter::eq("status", "pending")])
        .await?;

    let requests = rest
        .count(streams::SERVICE_REQUESTS, &[Filter::eq("status", "pending")])
        .await?;

    let window_start = Utc::now() - ChronoDuration::hours(NEW_USER_WINDOW_HOURS);
    let new_users = rest
        .count(
            streams::PROFILES,
            &[Filter::gte("created_at", window_start.to_rfc3339())],
        )
        .await?;

    debug!(documents, requests, new_users, "pending counts fetched");

    Ok(PendingCounts {
        documents,
        requests,
        new_users,
    })
}

// ── Generation-guarded cell ─────────────────────────────────────────

/// Holds the displayed counts together with recompute bookkeeping.
///
/// `begin` stamps a recompute at trigger time; `apply` accepts the result
/// only if no recompute triggered later has already landed. Out-of-order
/// completions therefore converge on the freshest ground truth.
#[derive(Debug, Default)]
pub struct CountsCell {
    value: PendingCounts,
    next_generation: u64,
    applied_generation: u64,
}

impl CountsCell {
    pub fn new() -> Self {
        Self::default()
    }

    /// The currently displayed counts.
    pub fn value(&self) -> PendingCounts {
        self.value
    }

    /// Stamp a new recompute. Call at trigger time, before querying.
    pub fn begin(&mut self) -> u64 {
        self.next_generation += 1;
        self.next_generation
    }

    /// Apply a recompute result. Returns `false` (and leaves the displayed
    /// value untouched) if a later-triggered recompute already landed.
    pub fn apply(&mut self, generation: u64, counts: PendingCounts) -> bool {
        if generation < self.applied_generation {
            debug!(
                generation,
                applied = self.applied_generation,
                "discarding stale recompute result"
            );
            return false;
        }
        self.applied_generation = generation;
        self.value = counts;
        true
    }
}

// ── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn total_alerts_excludes_new_users() {
        let counts = PendingCounts {
            documents: 3,
            requests: 2,
            new_users: 7,
        };
        assert_eq!(counts.total_alerts(), 5);
    }

    #[test]
    fn in_order_recomputes_apply() {
        let mut cell = CountsCell::new();

        let g1 = cell.begin();
        let g2 = cell.begin();

        assert!(cell.apply(g1, PendingCounts { documents: 1, ..Default::default() }));
        assert!(cell.apply(g2, PendingCounts { documents: 2, ..Default::default() }));
        assert_eq!(cell.value().documents, 2);
    }

    #[test]
    fn out_of_order_completion_converges_to_final_ground_truth() {
        // Two rapid inserts: counts go N -> N+1 -> N+2. The recompute for
        // the first insert completes *after* the one for the second.
        let mut cell = CountsCell::new();

        let g1 = cell.begin(); // triggered at N+1
        let g2 = cell.begin(); // triggered at N+2

        // Second recompute lands first with the freshest truth.
        assert!(cell.apply(g2, PendingCounts { documents: 2, ..Default::default() }));

        // First recompute straggles in with a stale snapshot -- discarded.
        assert!(!cell.apply(g1, PendingCounts { documents: 1, ..Default::default() }));

        assert_eq!(cell.value().documents, 2);
    }

    #[test]
    fn equal_generation_reapplies() {
        // A recompute may legitimately re-apply its own generation (e.g.
        // a manual refresh retried after a transient failure).
        let mut cell = CountsCell::new();
        let g = cell.begin();
        assert!(cell.apply(g, PendingCounts { requests: 1, ..Default::default() }));
        assert!(cell.apply(g, PendingCounts { requests: 3, ..Default::default() }));
        assert_eq!(cell.value().requests, 3);
    }

    #[test]
    fn failed_recompute_leaves_value_untouched() {
        let mut cell = CountsCell::new();
        let g1 = cell.begin();
        assert!(cell.apply(g1, PendingCounts { documents: 4, requests: 1, new_users: 0 }));

        // A later recompute fails: nothing is applied, display unchanged.
        let _g2 = cell.begin();
        assert_eq!(cell.value().documents, 4);
        assert_eq!(cell.value().total_alerts(), 5);
    }
}
