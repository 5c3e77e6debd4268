// ── Profile domain types ──

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::entity_id::EntityId;

/// Which side of the marketplace an account is on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountType {
    /// Requests services.
    Client,
    /// Fulfils services.
    Worker,
}

impl AccountType {
    pub fn label(self) -> &'static str {
        match self {
            Self::Client => "client",
            Self::Worker => "worker",
        }
    }
}

/// A user profile row from the hosted store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Profile {
    pub id: EntityId,
    pub full_name: String,
    pub account_type: AccountType,

    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub city: Option<String>,
    #[serde(default)]
    pub bio: Option<String>,

    // Worker-only fields
    #[serde(default)]
    pub service_category: Option<String>,
    #[serde(default)]
    pub hourly_rate: Option<f64>,

    pub created_at: DateTime<Utc>,
}
