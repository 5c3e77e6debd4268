// ── Domain model ──
//
// Typed views over the hosted store's tables. The store owns the data;
// these types are deserialization targets for REST reads and the shapes
// the CLI renders.

mod entity_id;
mod message;
mod moderation;
mod profile;
mod request;

pub use entity_id::EntityId;
pub use message::{Message, Notice};
pub use moderation::{Document, DocumentStatus, Payment, PaymentStatus};
pub use profile::{AccountType, Profile};
pub use request::{RequestStatus, ServiceRequest};

/// Stream (table) names as the changefeed and REST surface know them.
pub mod streams {
    pub const MESSAGES: &str = "messages";
    pub const SERVICE_REQUESTS: &str = "service_requests";
    pub const DOCUMENTS: &str = "documents";
    pub const PROFILES: &str = "profiles";
    pub const PAYMENTS: &str = "payments";
    pub const NOTICES: &str = "notifications";
    pub const USER_ROLES: &str = "user_roles";
}
