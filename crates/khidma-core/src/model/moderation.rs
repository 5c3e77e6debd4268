// ── Moderation and payment domain types ──
//
// Documents are identity papers workers upload for review; payments are
// records of money movement between the two sides. Both feed the admin
// alert surface.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::entity_id::EntityId;

/// Review status of an uploaded document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentStatus {
    Pending,
    Approved,
    Rejected,
}

/// A document a user submitted for verification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub id: EntityId,
    pub user_id: EntityId,
    pub document_type: String,
    #[serde(default)]
    pub file_path: Option<String>,
    pub status: DocumentStatus,
    pub created_at: DateTime<Utc>,
}

/// Settlement status of a payment record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    Completed,
    Refunded,
}

/// A payment row tied to a completed or in-flight service request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Payment {
    pub id: EntityId,
    pub request_id: EntityId,
    pub client_id: EntityId,
    pub worker_id: EntityId,
    pub amount: f64,
    pub status: PaymentStatus,
    pub created_at: DateTime<Utc>,
}
