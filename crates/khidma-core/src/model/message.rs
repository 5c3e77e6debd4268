// ── Messaging domain types ──

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::entity_id::EntityId;

/// A direct message between two users.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: EntityId,
    pub sender_id: EntityId,
    pub receiver_id: EntityId,
    pub content: String,
    #[serde(default)]
    pub read: bool,
    pub created_at: DateTime<Utc>,
}

/// A notification row posted by the backend for a specific user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notice {
    pub id: EntityId,
    pub user_id: EntityId,
    pub title: String,
    pub message: String,
    #[serde(default)]
    pub read: bool,
    pub created_at: DateTime<Utc>,
}
