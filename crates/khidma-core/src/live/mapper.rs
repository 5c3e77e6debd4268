// ── Change-event to action mapping ──
//
// Pure classification: a raw row-change event either becomes a typed,
// UI-relevant action or is dropped. No I/O here -- enrichment happens
// downstream and can never fail the mapping.

use khidma_api::{ChangeEvent, ChangeOp};

use crate::model::{AccountType, EntityId, RequestStatus, streams};

// ── View context ────────────────────────────────────────────────────

/// Whose eyes the event is seen through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Perspective {
    /// A client watching their own requests.
    Client,
    /// A worker watching requests assigned to them.
    Worker,
    /// An admin watching the whole marketplace.
    Admin,
}

/// Context of the view that owns the subscription the event arrived on.
#[derive(Debug, Clone)]
pub struct ViewContext {
    pub viewer: EntityId,
    pub perspective: Perspective,
}

impl ViewContext {
    pub fn new(viewer: EntityId, perspective: Perspective) -> Self {
        Self {
            viewer,
            perspective,
        }
    }
}

// ── Actions ─────────────────────────────────────────────────────────

/// A classified, UI-relevant event.
///
/// Status strings are carried raw (as the store sent them); consumers
/// label them best-effort via [`status_label`].
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    /// A new direct message for the viewer.
    MessageReceived {
        sender_id: EntityId,
        preview: String,
    },
    /// A request was assigned to the viewing worker.
    RequestAssigned { title: String },
    /// A request the viewer cares about moved to a new status.
    RequestStatusChanged {
        title: String,
        old_status: String,
        new_status: String,
    },
    /// Admin: a client submitted a new request.
    RequestSubmitted {
        client_id: EntityId,
        title: String,
    },
    /// Admin: a request row changed status. Counts-only, no alert.
    RequestUpdated,
    /// Admin: a user uploaded a document for review.
    DocumentSubmitted {
        user_id: EntityId,
        document_type: String,
    },
    /// Admin: a document's review status moved. Counts-only, no alert.
    DocumentReviewed,
    /// Admin: a new account registered.
    UserJoined {
        full_name: String,
        account_type: Option<AccountType>,
    },
    /// Admin: a payment record was created.
    PaymentCreated { amount: f64 },
    /// Admin: a payment settled.
    PaymentCompleted { amount: f64 },
    /// The backend posted a notification row for the viewer.
    NoticePosted { title: String, message: String },
}

impl Action {
    /// Whether this action should surface as a user-facing alert.
    /// Counts-only actions exist to trigger recomputation.
    pub fn presentable(&self) -> bool {
        !matches!(self, Self::RequestUpdated | Self::DocumentReviewed)
    }

    /// Ids whose display names the presenter wants resolved.
    pub fn enrichment_ids(&self) -> Vec<EntityId> {
        match self {
            Self::MessageReceived { sender_id, .. } => vec![sender_id.clone()],
            Self::RequestSubmitted { client_id, .. } => vec![client_id.clone()],
            Self::DocumentSubmitted { user_id, .. } => vec![user_id.clone()],
            _ => Vec::new(),
        }
    }
}

/// Best-effort human label for a raw status string.
pub fn status_label(raw: &str) -> String {
    raw.parse::<RequestStatus>()
        .map_or_else(|_| raw.to_owned(), |s| s.label().to_owned())
}

// ── Mapping ─────────────────────────────────────────────────────────

/// Classify a change event for a view. Returns `None` for anything the
/// view does not care about -- unknown streams, irrelevant operations,
/// no-op updates.
pub fn map_event(event: &ChangeEvent, ctx: &ViewContext) -> Option<Action> {
    match event.stream.as_str() {
        streams::MESSAGES => map_message(event, ctx),
        streams::SERVICE_REQUESTS => map_service_request(event, ctx),
        streams::DOCUMENTS => map_document(event, ctx),
        streams::PROFILES => map_profile(event, ctx),
        streams::PAYMENTS => map_payment(event, ctx),
        streams::NOTICES => map_notice(event),
        _ => None,
    }
}

fn map_message(event: &ChangeEvent, ctx: &ViewContext) -> Option<Action> {
    if ctx.perspective == Perspective::Admin || event.op != ChangeOp::Insert {
        return None;
    }
    Some(Action::MessageReceived {
        sender_id: EntityId::from(event.after_str("sender_id")?),
        preview: event.after_str("content").unwrap_or_default().to_owned(),
    })
}

fn map_service_request(event: &ChangeEvent, ctx: &ViewContext) -> Option<Action> {
    match (ctx.perspective, event.op) {
        // Clients only care about status movement on their own requests.
        (Perspective::Client, ChangeOp::Update) => status_changed(event).map(
            |(old_status, new_status)| Action::RequestStatusChanged {
                title: event.after_str("title").unwrap_or_default().to_owned(),
                old_status,
                new_status,
            },
        ),
        // Workers see new assignments and status movement.
        (Perspective::Worker, ChangeOp::Insert) => Some(Action::RequestAssigned {
            title: event.after_str("title").unwrap_or_default().to_owned(),
        }),
        (Perspective::Worker, ChangeOp::Update) => status_changed(event).map(
            |(old_status, new_status)| Action::RequestStatusChanged {
                title: event.after_str("title").unwrap_or_default().to_owned(),
                old_status,
                new_status,
            },
        ),
        // Admins see submissions; updates only refresh the backlog counts.
        (Perspective::Admin, ChangeOp::Insert) => Some(Action::RequestSubmitted {
            client_id: EntityId::from(event.after_str("client_id")?),
            title: event.after_str("title").unwrap_or_default().to_owned(),
        }),
        (Perspective::Admin, ChangeOp::Update) => {
            status_changed(event).map(|_| Action::RequestUpdated)
        }
        _ => None,
    }
}

fn map_document(event: &ChangeEvent, ctx: &ViewContext) -> Option<Action> {
    if ctx.perspective != Perspective::Admin {
        return None;
    }
    match event.op {
        ChangeOp::Insert => Some(Action::DocumentSubmitted {
            user_id: EntityId::from(event.after_str("user_id")?),
            document_type: event
                .after_str("document_type")
                .unwrap_or_default()
                .to_owned(),
        }),
        ChangeOp::Update => status_changed(event).map(|_| Action::DocumentReviewed),
        ChangeOp::Delete => None,
    }
}

fn map_profile(event: &ChangeEvent, ctx: &ViewContext) -> Option<Action> {
    if ctx.perspective != Perspective::Admin || event.op != ChangeOp::Insert {
        return None;
    }
    let account_type = event
        .after_str("account_type")
        .and_then(|raw| serde_json::from_value(serde_json::Value::String(raw.to_owned())).ok());
    Some(Action::UserJoined {
        full_name: event.after_str("full_name").unwrap_or_default().to_owned(),
        account_type,
    })
}

fn map_payment(event: &ChangeEvent, ctx: &ViewContext) -> Option<Action> {
    if ctx.perspective != Perspective::Admin {
        return None;
    }
    let amount = event
        .after
        .as_ref()
        .and_then(|a| a.get("amount"))
        .and_then(serde_json::Value::as_f64)
        .unwrap_or(0.0);

    match event.op {
        ChangeOp::Insert => Some(Action::PaymentCreated { amount }),
        // Only the transition into `completed` is alert-worthy.
        ChangeOp::Update => {
            let newly_completed = event.after_str("status") == Some("completed")
                && event.before_str("status") != Some("completed");
            newly_completed.then_some(Action::PaymentCompleted { amount })
        }
        ChangeOp::Delete => None,
    }
}

fn map_notice(event: &ChangeEvent) -> Option<Action> {
    if event.op != ChangeOp::Insert {
        return None;
    }
    Some(Action::NoticePosted {
        title: event.after_str("title").unwrap_or_default().to_owned(),
        message: event.after_str("message").unwrap_or_default().to_owned(),
    })
}

/// Extract `(old, new)` status strings iff the update actually changed
/// the status column. Edits to unrelated fields map to `None`.
fn status_changed(event: &ChangeEvent) -> Option<(String, String)> {
    let old = event.before_str("status")?;
    let new = event.after_str("status")?;
    (old != new).then(|| (old.to_owned(), new.to_owned()))
}

// ── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn event(
        stream: &str,
        op: ChangeOp,
        before: Option<serde_json::Value>,
        after: Option<serde_json::Value>,
    ) -> ChangeEvent {
        ChangeEvent {
            stream: stream.into(),
            op,
            before,
            after,
        }
    }

    fn client_ctx() -> ViewContext {
        ViewContext::new(EntityId::from("viewer-1"), Perspective::Client)
    }

    fn worker_ctx() -> ViewContext {
        ViewContext::new(EntityId::from("worker-1"), Perspective::Worker)
    }

    fn admin_ctx() -> ViewContext {
        ViewContext::new(EntityId::from("admin-1"), Perspective::Admin)
    }

    #[test]
    fn message_insert_maps_for_users_only() {
        let e = event(
            "messages",
            ChangeOp::Insert,
            None,
            Some(json!({ "sender_id": "u-2", "content": "hello there" })),
        );

        let action = map_event(&e, &client_ctx()).expect("mapped");
        assert_eq!(
            action,
            Action::MessageReceived {
                sender_id: EntityId::from("u-2"),
                preview: "hello there".into(),
            }
        );

        assert_eq!(map_event(&e, &admin_ctx()), None);
    }

    #[test]
    fn message_update_is_irrelevant() {
        let e = event(
            "messages",
            ChangeOp::Update,
            Some(json!({ "read": false })),
            Some(json!({ "read": true })),
        );
        assert_eq!(map_event(&e, &client_ctx()), None);
    }

    #[test]
    fn request_status_transition_maps_exactly_once() {
        let e = event(
            "service_requests",
            ChangeOp::Update,
            Some(json!({ "status": "pending" })),
            Some(json!({ "status": "accepted", "title": "Fix the sink" })),
        );

        let action = map_event(&e, &worker_ctx()).expect("mapped");
        assert_eq!(
            action,
            Action::RequestStatusChanged {
                title: "Fix the sink".into(),
                old_status: "pending".into(),
                new_status: "accepted".into(),
            }
        );
    }

    #[test]
    fn unchanged_status_produces_no_action() {
        let e = event(
            "service_requests",
            ChangeOp::Update,
            Some(json!({ "status": "pending", "budget": 100 })),
            Some(json!({ "status": "pending", "budget": 250, "title": "Paint" })),
        );
        assert_eq!(map_event(&e, &client_ctx()), None);
        assert_eq!(map_event(&e, &worker_ctx()), None);
        assert_eq!(map_event(&e, &admin_ctx()), None);
    }

    #[test]
    fn request_insert_assigns_to_worker_but_not_client() {
        let e = event(
            "service_requests",
            ChangeOp::Insert,
            None,
            Some(json!({ "title": "Mount shelves", "client_id": "c-1" })),
        );

        assert_eq!(
            map_event(&e, &worker_ctx()),
            Some(Action::RequestAssigned {
                title: "Mount shelves".into()
            })
        );
        assert_eq!(map_event(&e, &client_ctx()), None);
        assert_eq!(
            map_event(&e, &admin_ctx()),
            Some(Action::RequestSubmitted {
                client_id: EntityId::from("c-1"),
                title: "Mount shelves".into(),
            })
        );
    }

    #[test]
    fn document_insert_maps_for_admin() {
        let e = event(
            "documents",
            ChangeOp::Insert,
            None,
            Some(json!({ "user_id": "u-7", "document_type": "id_card", "status": "pending" })),
        );

        let action = map_event(&e, &admin_ctx()).expect("mapped");
        assert_eq!(
            action,
            Action::DocumentSubmitted {
                user_id: EntityId::from("u-7"),
                document_type: "id_card".into(),
            }
        );
        assert!(action.presentable());
        assert_eq!(map_event(&e, &worker_ctx()), None);
    }

    #[test]
    fn document_review_is_counts_only() {
        let e = event(
            "documents",
            ChangeOp::Update,
            Some(json!({ "status": "pending" })),
            Some(json!({ "status": "approved" })),
        );
        let action = map_event(&e, &admin_ctx()).expect("mapped");
        assert_eq!(action, Action::DocumentReviewed);
        assert!(!action.presentable());
    }

    #[test]
    fn payment_completion_transition_only() {
        let completing = event(
            "payments",
            ChangeOp::Update,
            Some(json!({ "status": "pending" })),
            Some(json!({ "status": "completed", "amount": 120.5 })),
        );
        assert_eq!(
            map_event(&completing, &admin_ctx()),
            Some(Action::PaymentCompleted { amount: 120.5 })
        );

        // Already completed -- an edit to another column must not re-alert.
        let already = event(
            "payments",
            ChangeOp::Update,
            Some(json!({ "status": "completed" })),
            Some(json!({ "status": "completed", "amount": 120.5 })),
        );
        assert_eq!(map_event(&already, &admin_ctx()), None);
    }

    #[test]
    fn unknown_stream_is_dropped_silently() {
        let e = event("audit_log", ChangeOp::Insert, None, Some(json!({})));
        assert_eq!(map_event(&e, &admin_ctx()), None);
    }

    #[test]
    fn delete_operations_are_irrelevant_everywhere() {
        for stream in ["messages", "service_requests", "documents", "payments"] {
            let e = event(stream, ChangeOp::Delete, Some(json!({})), None);
            assert_eq!(map_event(&e, &admin_ctx()), None, "stream {stream}");
            assert_eq!(map_event(&e, &client_ctx()), None, "stream {stream}");
        }
    }

    #[test]
    fn enrichment_ids_cover_identity_bearing_actions() {
        let action = Action::MessageReceived {
            sender_id: EntityId::from("u-2"),
            preview: "hi".into(),
        };
        assert_eq!(action.enrichment_ids(), vec![EntityId::from("u-2")]);

        let none = Action::RequestAssigned { title: "x".into() };
        assert!(none.enrichment_ids().is_empty());
    }

    #[test]
    fn status_label_falls_back_to_raw() {
        assert_eq!(status_label("in_progress"), "in progress");
        assert_eq!(status_label("on_hold"), "on_hold");
    }
}
