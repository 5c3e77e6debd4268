// ── Notification presentation ──
//
// Mapped actions surface as transient toasts on a broadcast channel that
// any frontend can drain. An optional out-of-app notifier sits behind a
// permission gate: notifications fire only when permission is already
// granted, and permission is requested at most once per session -- never
// as a side effect of presenting.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::broadcast;
use tracing::debug;

use super::enrich::NameDirectory;
use super::mapper::{Action, status_label};

const TOAST_CHANNEL_CAPACITY: usize = 64;

// ── Out-of-app notification seam ────────────────────────────────────

/// Permission state of the out-of-app notification surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Permission {
    Granted,
    Denied,
    /// Not yet decided; a request may be issued once.
    Default,
}

/// Sink for out-of-app (desktop-style) notifications.
///
/// Implementations decide what "out of app" means for their surface;
/// the presenter only honors the permission contract.
pub trait Notifier: Send + Sync {
    fn permission(&self) -> Permission;

    /// Ask the user for permission. Called at most once per session, and
    /// only while the state is [`Permission::Default`].
    fn request_permission(&self);

    fn notify(&self, title: &str, body: &str);
}

/// Notifier that never asks and never fires. Default for headless use.
pub struct NullNotifier;

impl Notifier for NullNotifier {
    fn permission(&self) -> Permission {
        Permission::Denied
    }

    fn request_permission(&self) {}

    fn notify(&self, _title: &str, _body: &str) {}
}

// ── Toasts ──────────────────────────────────────────────────────────

/// A transient, auto-dismissing alert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Toast {
    pub title: String,
    pub body: String,
}

/// Derive the toast for an action, with names already resolved.
///
/// Counts-only actions produce no toast.
pub fn toast_for(action: &Action, names: &NameDirectory) -> Option<Toast> {
    if !action.presentable() {
        return None;
    }

    let toast = match action {
        Action::MessageReceived { sender_id, preview } => Toast {
            title: "New message".into(),
            body: format!("from {}: {preview}", names.display_name(sender_id)),
        },
        Action::RequestAssigned { title } => Toast {
            title: "New request".into(),
            body: format!("a request was assigned to you: {title}"),
        },
        Action::RequestStatusChanged {
            title, new_status, ..
        } => Toast {
            title: "Request status updated".into(),
            body: format!("\"{title}\" is now: {}", status_label(new_status)),
        },
        Action::RequestSubmitted { client_id, title } => Toast {
            title: "New service request".into(),
            body: format!("{} requested: {title}", names.display_name(client_id)),
        },
        Action::DocumentSubmitted {
            user_id,
            document_type,
        } => Toast {
            title: "New document".into(),
            body: format!(
                "{} uploaded a {document_type} document",
                names.display_name(user_id)
            ),
        },
        Action::UserJoined {
            full_name,
            account_type,
        } => Toast {
            title: "New user".into(),
            body: match account_type {
                Some(t) => format!("{full_name} joined as a {}", t.label()),
                None => format!("{full_name} joined"),
            },
        },
        Action::PaymentCreated { amount } => Toast {
            title: "New payment".into(),
            body: format!("a payment of ${amount:.2} was created"),
        },
        Action::PaymentCompleted { amount } => Toast {
            title: "Payment completed".into(),
            body: format!("a payment of ${amount:.2} was received"),
        },
        Action::NoticePosted { title, message } => Toast {
            title: title.clone(),
            body: message.clone(),
        },
        Action::RequestUpdated | Action::DocumentReviewed => return None,
    };

    Some(toast)
}

// ── Presenter ───────────────────────────────────────────────────────

/// Fans toasts out to subscribers and, where permitted, to the
/// out-of-app notifier.
#[derive(Clone)]
pub struct Presenter {
    toast_tx: broadcast::Sender<Toast>,
    notifier: Arc<dyn Notifier>,
    permission_requested: Arc<AtomicBool>,
}

impl Presenter {
    pub fn new(notifier: Arc<dyn Notifier>) -> Self {
        let (toast_tx, _) = broadcast::channel(TOAST_CHANNEL_CAPACITY);
        Self {
            toast_tx,
            notifier,
            permission_requested: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Subscribe to the toast stream.
    pub fn toasts(&self) -> broadcast::Receiver<Toast> {
        self.toast_tx.subscribe()
    }

    /// Request out-of-app permission once, if it is still undecided.
    ///
    /// Independent of presentation: call on view activation, not per toast.
    pub fn request_permission_once(&self) {
        if self.notifier.permission() == Permission::Default
            && !self.permission_requested.swap(true, Ordering::SeqCst)
        {
            debug!("requesting out-of-app notification permission");
            self.notifier.request_permission();
        }
    }

    /// Surface a toast: broadcast it, and mirror it out-of-app only if
    /// permission is affirmatively granted.
    pub fn present(&self, toast: Toast) {
        // Ignore send errors -- just means no active subscribers right now
        let _ = self.toast_tx.send(toast.clone());

        if self.notifier.permission() == Permission::Granted {
            self.notifier.notify(&toast.title, &toast.body);
        }
    }
}

// ── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct RecordingNotifier {
        permission: Mutex<Permission>,
        requests: AtomicBool,
        notified: Mutex<Vec<(String, String)>>,
    }

    impl RecordingNotifier {
        fn new(permission: Permission) -> Self {
            Self {
                permission: Mutex::new(permission),
                requests: AtomicBool::new(false),
                notified: Mutex::new(Vec::new()),
            }
        }
    }

    impl Notifier for RecordingNotifier {
        fn permission(&self) -> Permission {
            *self.permission.lock().expect("lock")
        }

        fn request_permission(&self) {
            self.requests.store(true, Ordering::SeqCst);
        }

        fn notify(&self, title: &str, body: &str) {
            self.notified
                .lock()
                .expect("lock")
                .push((title.to_owned(), body.to_owned()));
        }
    }

    #[test]
    fn present_broadcasts_and_gates_on_permission() {
        let notifier = Arc::new(RecordingNotifier::new(Permission::Denied));
        let presenter = Presenter::new(Arc::<RecordingNotifier>::clone(&notifier));
        let mut toasts = presenter.toasts();

        presenter.present(Toast {
            title: "t".into(),
            body: "b".into(),
        });

        assert_eq!(toasts.try_recv().expect("toast").title, "t");
        // Denied permission: no out-of-app notification.
        assert!(notifier.notified.lock().expect("lock").is_empty());
    }

    #[test]
    fn granted_permission_mirrors_out_of_app() {
        let notifier = Arc::new(RecordingNotifier::new(Permission::Granted));
        let presenter = Presenter::new(Arc::<RecordingNotifier>::clone(&notifier));

        presenter.present(Toast {
            title: "New message".into(),
            body: "from Amina".into(),
        });

        let notified = notifier.notified.lock().expect("lock");
        assert_eq!(notified.len(), 1);
        assert_eq!(notified[0].0, "New message");
    }

    #[test]
    fn permission_requested_at_most_once() {
        let notifier = Arc::new(RecordingNotifier::new(Permission::Default));
        let presenter = Presenter::new(Arc::<RecordingNotifier>::clone(&notifier));

        presenter.request_permission_once();
        assert!(notifier.requests.load(Ordering::SeqCst));

        // Flip the flag back; a second call must not request again.
        notifier.requests.store(false, Ordering::SeqCst);
        presenter.request_permission_once();
        assert!(!notifier.requests.load(Ordering::SeqCst));
    }

    #[test]
    fn decided_permission_is_never_prompted() {
        for p in [Permission::Granted, Permission::Denied] {
            let notifier = Arc::new(RecordingNotifier::new(p));
            let presenter = Presenter::new(Arc::<RecordingNotifier>::clone(&notifier));
            presenter.request_permission_once();
            assert!(!notifier.requests.load(Ordering::SeqCst), "{p:?}");
        }
    }
}
