#![allow(clippy::unwrap_used)]
// Integration tests for `RestClient` using wiremock.

use serde::Deserialize;
use serde_json::json;
use url::Url;
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use khidma_api::{Error, Filter, RestClient};

// ── Helpers ─────────────────────────────────────────────────────────

async fn setup() -> (MockServer, RestClient) {
    let server = MockServer::start().await;
    let base_url = Url::parse(&server.uri()).unwrap();
    let client = RestClient::new(reqwest::Client::new(), base_url);
    (server, client)
}

#[derive(Debug, Deserialize)]
struct DocumentRow {
    id: String,
    status: String,
}

// ── Select tests ────────────────────────────────────────────────────

#[tokio::test]
async fn test_select_with_filter() {
    let (server, client) = setup().await;

    Mock::given(method("GET"))
        .and(path("/rest/v1/documents"))
        .and(query_param("status", "eq.pending"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            { "id": "d1", "status": "pending" },
            { "id": "d2", "status": "pending" },
        ])))
        .mount(&server)
        .await;

    let rows: Vec<DocumentRow> = client
        .select("documents", &[Filter::eq("status", "pending")])
        .await
        .unwrap();

    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].id, "d1");
    assert_eq!(rows[1].status, "pending");
}

#[tokio::test]
async fn test_select_error_body_is_surfaced() {
    let (server, client) = setup().await;

    Mock::given(method("GET"))
        .and(path("/rest/v1/documents"))
        .respond_with(ResponseTemplate::new(403).set_body_json(json!({
            "message": "permission denied for table documents",
            "code": "42501"
        })))
        .mount(&server)
        .await;

    let result: Result<Vec<DocumentRow>, _> = client.select("documents", &[]).await;

    match result {
        Err(Error::Rest {
            message,
            code,
            status,
        }) => {
            assert_eq!(status, 403);
            assert_eq!(code.as_deref(), Some("42501"));
            assert!(message.contains("permission denied"));
        }
        other => panic!("expected Rest error, got: {other:?}"),
    }
}

// ── Count tests ─────────────────────────────────────────────────────

#[tokio::test]
async fn test_count_parses_content_range() {
    let (server, client) = setup().await;

    Mock::given(method("HEAD"))
        .and(path("/rest/v1/service_requests"))
        .and(query_param("status", "eq.pending"))
        .and(header("Prefer", "count=exact"))
        .respond_with(ResponseTemplate::new(200).insert_header("Content-Range", "*/7"))
        .mount(&server)
        .await;

    let count = client
        .count("service_requests", &[Filter::eq("status", "pending")])
        .await
        .unwrap();

    assert_eq!(count, 7);
}

#[tokio::test]
async fn test_count_missing_header_is_an_error() {
    let (server, client) = setup().await;

    Mock::given(method("HEAD"))
        .and(path("/rest/v1/profiles"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let result = client.count("profiles", &[]).await;
    assert!(matches!(result, Err(Error::CountUnavailable(_))));
}

// ── Write tests ─────────────────────────────────────────────────────

#[tokio::test]
async fn test_insert_returns_representation() {
    let (server, client) = setup().await;

    Mock::given(method("POST"))
        .and(path("/rest/v1/messages"))
        .and(header("Prefer", "return=representation"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!([
            { "id": "m1", "status": "sent" }
        ])))
        .mount(&server)
        .await;

    let row: DocumentRow = client
        .insert("messages", &json!({ "content": "hello" }))
        .await
        .unwrap();

    assert_eq!(row.id, "m1");
}

#[tokio::test]
async fn test_update_patches_matching_rows() {
    let (server, client) = setup().await;

    Mock::given(method("PATCH"))
        .and(path("/rest/v1/service_requests"))
        .and(query_param("id", "eq.r1"))
        .respond_with(ResponseTemplate::new(204))
        .mount(&server)
        .await;

    client
        .update(
            "service_requests",
            &[Filter::eq("id", "r1")],
            &json!({ "status": "accepted" }),
        )
        .await
        .unwrap();
}

#[tokio::test]
async fn test_delete_by_filter() {
    let (server, client) = setup().await;

    Mock::given(method("DELETE"))
        .and(path("/rest/v1/messages"))
        .and(query_param("id", "eq.m9"))
        .respond_with(ResponseTemplate::new(204))
        .mount(&server)
        .await;

    client
        .delete("messages", &[Filter::eq("id", "m9")])
        .await
        .unwrap();
}
