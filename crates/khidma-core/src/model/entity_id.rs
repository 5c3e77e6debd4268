// ── Core identity type ──
//
// Every row in the hosted store is keyed by a uuid, but identifiers also
// arrive as raw strings (change-event snapshots, auth claims). EntityId
// unifies both behind a single ergonomic interface.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Canonical identifier for any marketplace entity.
///
/// Transparently wraps either a parsed UUID (typed REST reads) or the raw
/// string form (snapshot fields, identity claims). Consumers never care
/// which.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EntityId {
    Uuid(Uuid),
    Raw(String),
}

impl EntityId {
    pub fn as_uuid(&self) -> Option<&Uuid> {
        match self {
            Self::Uuid(u) => Some(u),
            Self::Raw(_) => None,
        }
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Uuid(u) => write!(f, "{u}"),
            Self::Raw(s) => write!(f, "{s}"),
        }
    }
}

impl FromStr for EntityId {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::from(s.to_owned()))
    }
}

impl From<Uuid> for EntityId {
    fn from(u: Uuid) -> Self {
        Self::Uuid(u)
    }
}

impl From<String> for EntityId {
    fn from(s: String) -> Self {
        match Uuid::parse_str(&s) {
            Ok(u) => Self::Uuid(u),
            Err(_) => Self::Raw(s),
        }
    }
}

impl From<&str> for EntityId {
    fn from(s: &str) -> Self {
        Self::from(s.to_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uuid_strings_parse_as_uuid() {
        let id = EntityId::from("6d9f5e1a-0b7c-4f3e-9c2d-8a1b2c3d4e5f");
        assert!(id.as_uuid().is_some());
    }

    #[test]
    fn non_uuid_strings_stay_raw() {
        let id = EntityId::from("user-1");
        assert!(id.as_uuid().is_none());
        assert_eq!(id.to_string(), "user-1");
    }

    #[test]
    fn uuid_and_raw_forms_compare_by_value() {
        let raw = EntityId::from("user-1");
        assert_eq!(raw, EntityId::Raw("user-1".into()));
    }
}
