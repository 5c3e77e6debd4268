// ── Display-name enrichment ──
//
// Alerts want human names, events carry ids. The directory resolves the
// whole id set of a batch in one query and caches what it learns; a miss
// (deleted user, failed lookup) falls back to a placeholder label and
// never fails the pipeline.

use std::collections::HashMap;

use khidma_api::{Filter, RestClient};
use serde::Deserialize;
use tracing::warn;

use crate::model::{EntityId, streams};

/// Label substituted when a display name cannot be resolved.
pub const UNKNOWN_USER: &str = "unknown user";

#[derive(Debug, Deserialize)]
struct NameRow {
    id: EntityId,
    full_name: String,
}

/// Batched id → display-name resolver with a session-lifetime cache.
pub struct NameDirectory {
    rest: RestClient,
    cache: HashMap<EntityId, String>,
}

impl NameDirectory {
    pub fn new(rest: RestClient) -> Self {
        Self {
            rest,
            cache: HashMap::new(),
        }
    }

    /// Resolve every id in `ids` that is not already cached, in a single
    /// query. Best-effort: on failure the ids stay unresolved and will
    /// render as [`UNKNOWN_USER`].
    pub async fn resolve(&mut self, ids: &[EntityId]) {
        let missing: Vec<String> = ids
            .iter()
            .filter(|id| !self.cache.contains_key(*id))
            .map(ToString::to_string)
            .collect();

        if missing.is_empty() {
            return;
        }

        let rows: Vec<NameRow> = match self
            .rest
            .select(streams::PROFILES, &[Filter::any_of("id", missing)])
            .await
        {
            Ok(rows) => rows,
            Err(e) => {
                warn!(error = %e, "name lookup failed, falling back to placeholder");
                return;
            }
        };

        for row in rows {
            self.cache.insert(row.id, row.full_name);
        }
    }

    /// The display name for an id, or the placeholder if unknown.
    pub fn display_name(&self, id: &EntityId) -> &str {
        self.cache.get(id).map_or(UNKNOWN_USER, String::as_str)
    }
}

// ── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use url::Url;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn directory(server: &MockServer) -> NameDirectory {
        let base = Url::parse(&server.uri()).expect("url");
        NameDirectory::new(RestClient::new(reqwest::Client::new(), base))
    }

    #[tokio::test]
    async fn resolves_batch_in_one_query_and_caches() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/rest/v1/profiles"))
            .and(query_param("id", "in.(u-1,u-2)"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                { "id": "u-1", "full_name": "Amina Haddad" },
                { "id": "u-2", "full_name": "Yusuf Karim" },
            ])))
            .expect(1)
            .mount(&server)
            .await;

        let mut dir = directory(&server).await;
        let ids = [EntityId::from("u-1"), EntityId::from("u-2")];

        dir.resolve(&ids).await;
        assert_eq!(dir.display_name(&ids[0]), "Amina Haddad");
        assert_eq!(dir.display_name(&ids[1]), "Yusuf Karim");

        // Second resolve hits the cache; wiremock's expect(1) verifies no
        // further query was issued.
        dir.resolve(&ids).await;
    }

    #[tokio::test]
    async fn missing_profile_falls_back_to_placeholder() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/rest/v1/profiles"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
            .mount(&server)
            .await;

        let mut dir = directory(&server).await;
        let ghost = EntityId::from("u-gone");

        dir.resolve(std::slice::from_ref(&ghost)).await;
        assert_eq!(dir.display_name(&ghost), UNKNOWN_USER);
    }

    #[tokio::test]
    async fn lookup_failure_never_propagates() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/rest/v1/profiles"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let mut dir = directory(&server).await;
        let id = EntityId::from("u-1");

        // Must not error or panic; the name simply stays unresolved.
        dir.resolve(std::slice::from_ref(&id)).await;
        assert_eq!(dir.display_name(&id), UNKNOWN_USER);
    }
}
