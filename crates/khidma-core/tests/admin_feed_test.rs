#![allow(clippy::unwrap_used)]
// Integration tests for `AdminFeed` against a mocked backend.
//
// The changefeed endpoint is unreachable in these tests (wiremock only
// speaks HTTP), so the feed runs in degraded mode: subscriptions fail,
// counts still come from the REST surface.

use std::sync::Arc;
use std::time::Duration;

use secrecy::SecretString;
use serde_json::json;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use khidma_core::{
    AdminFeed, AuthCredentials, FeedPhase, Marketplace, MarketplaceConfig, NullNotifier, Presenter,
};

// ── Helpers ─────────────────────────────────────────────────────────

async fn mock_sign_in(server: &MockServer, user_id: &str) {
    Mock::given(method("POST"))
        .and(path("/auth/v1/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "jwt-token",
            "user": { "id": user_id, "email": "someone@example.com" }
        })))
        .mount(server)
        .await;
}

async fn mock_roles(server: &MockServer, user_id: &str, roles: &[&str]) {
    let rows: Vec<_> = roles.iter().map(|r| json!({ "role": r })).collect();
    Mock::given(method("GET"))
        .and(path("/rest/v1/user_roles"))
        .and(query_param("user_id", format!("eq.{user_id}")))
        .respond_with(ResponseTemplate::new(200).set_body_json(rows))
        .mount(server)
        .await;
}

fn config(server: &MockServer) -> MarketplaceConfig {
    MarketplaceConfig {
        url: server.uri().parse().unwrap(),
        project_key: SecretString::from("test-key".to_string()),
        auth: AuthCredentials::EmailPassword {
            email: "someone@example.com".into(),
            password: SecretString::from("secret".to_string()),
        },
        timeout: Duration::from_secs(5),
        changefeed_enabled: true,
        join_timeout: Duration::from_millis(100),
        max_join_attempts: 1,
    }
}

fn count_mock(table: &str, total: u64) -> Mock {
    Mock::given(method("HEAD"))
        .and(path(format!("/rest/v1/{table}")))
        .respond_with(
            ResponseTemplate::new(200).insert_header("Content-Range", format!("*/{total}")),
        )
}

async fn wait_ready(feed: &AdminFeed) {
    let mut rx = feed.watch();
    tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            if rx.borrow().phase == FeedPhase::Ready {
                return;
            }
            rx.changed().await.expect("snapshot channel alive");
        }
    })
    .await
    .expect("feed became ready");
}

// ── Tests ───────────────────────────────────────────────────────────

#[tokio::test]
async fn non_admin_identity_does_no_work() {
    let server = MockServer::start().await;
    mock_sign_in(&server, "u-regular").await;
    mock_roles(&server, "u-regular", &["worker"]).await;

    // Property under test: the admin service issues zero count queries
    // for a non-admin identity. expect(0) is verified when the server
    // drops at the end of the test.
    for table in ["documents", "service_requests", "profiles"] {
        Mock::given(method("HEAD"))
            .and(path(format!("/rest/v1/{table}")))
            .respond_with(ResponseTemplate::new(200).insert_header("Content-Range", "*/9"))
            .expect(0)
            .mount(&server)
            .await;
    }

    let marketplace = Marketplace::new(config(&server));
    marketplace.connect().await.expect("connect");

    let presenter = Presenter::new(Arc::new(NullNotifier));
    let feed = AdminFeed::spawn(&marketplace, presenter)
        .await
        .expect("spawn");

    // Permanently inert: disposed from the start, nothing counted.
    let snapshot = feed.snapshot();
    assert_eq!(snapshot.phase, FeedPhase::Disposed);
    assert_eq!(snapshot.total_alerts(), 0);
    assert!(snapshot.alerts.is_empty());

    // A manual refresh on an inert feed is also a no-op.
    feed.refresh();
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(feed.snapshot().phase, FeedPhase::Disposed);

    marketplace.disconnect().await;
}

#[tokio::test]
async fn admin_feed_reaches_ready_in_degraded_mode() {
    let server = MockServer::start().await;
    mock_sign_in(&server, "u-admin").await;
    mock_roles(&server, "u-admin", &["admin"]).await;
    count_mock("documents", 3).mount(&server).await;
    count_mock("service_requests", 2).mount(&server).await;
    count_mock("profiles", 7).mount(&server).await;

    let marketplace = Marketplace::new(config(&server));
    marketplace.connect().await.expect("connect");

    let presenter = Presenter::new(Arc::new(NullNotifier));
    let feed = AdminFeed::spawn(&marketplace, presenter)
        .await
        .expect("spawn");

    wait_ready(&feed).await;

    let snapshot = feed.snapshot();
    // No websocket behind wiremock: every join failed, feed is degraded
    // but counts are still served.
    assert!(snapshot.degraded);
    assert_eq!(snapshot.counts.documents, 3);
    assert_eq!(snapshot.counts.requests, 2);
    assert_eq!(snapshot.counts.new_users, 7);
    assert_eq!(snapshot.total_alerts(), 5);

    feed.dispose().await;
    marketplace.disconnect().await;
}

#[tokio::test]
async fn manual_refresh_refetches_counts() {
    let server = MockServer::start().await;
    mock_sign_in(&server, "u-admin").await;
    mock_roles(&server, "u-admin", &["admin"]).await;
    count_mock("documents", 1).up_to_n_times(1).mount(&server).await;
    count_mock("documents", 4).mount(&server).await;
    count_mock("service_requests", 0).mount(&server).await;
    count_mock("profiles", 0).mount(&server).await;

    let marketplace = Marketplace::new(config(&server));
    marketplace.connect().await.expect("connect");

    let presenter = Presenter::new(Arc::new(NullNotifier));
    let feed = AdminFeed::spawn(&marketplace, presenter)
        .await
        .expect("spawn");
    wait_ready(&feed).await;
    assert_eq!(feed.snapshot().counts.documents, 1);

    feed.refresh();

    let mut rx = feed.watch();
    tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            if rx.borrow().counts.documents == 4 {
                return;
            }
            rx.changed().await.expect("snapshot channel alive");
        }
    })
    .await
    .expect("refreshed counts");

    assert_eq!(feed.snapshot().total_alerts(), 4);

    feed.dispose().await;
    marketplace.disconnect().await;
}
