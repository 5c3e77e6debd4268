// khidma-core: Reactive live-update layer between khidma-api and consumers.

pub mod config;
pub mod convo;
pub mod error;
pub mod live;
pub mod marketplace;
pub mod model;

// ── Primary re-exports ──────────────────────────────────────────────
pub use config::{AuthCredentials, MarketplaceConfig};
pub use error::CoreError;
pub use marketplace::{ConnectionState, Marketplace, RequestRole};

pub use convo::{Conversation, InboxFeed, aggregate_conversations};
pub use live::{
    Action, AdminAlert, AdminFeed, AdminSnapshot, AlertCategory, FeedPhase, NameDirectory,
    Notifier, NullNotifier, PendingCounts, Permission, Perspective, Presenter, SubscriptionScope,
    Toast, ViewContext, map_event,
};
pub use live::user_feed::UserFeed;

// Re-export model types at the crate root for ergonomics.
pub use model::{
    AccountType, Document, DocumentStatus, EntityId, Message, Notice, Payment, PaymentStatus,
    Profile, RequestStatus, ServiceRequest,
};
