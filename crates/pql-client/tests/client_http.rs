//! HTTP-level tests for the query service client against a local mock
//! server: header injection, URL layout, and status translation.

use serde_json::json;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use pql_client::wire::{ContinueThreadRequest, CreateThreadRequest};
use pql_client::{InteractionStatus, QueryServiceClient};
use pql_core::Error;

fn thread_body() -> serde_json::Value {
    json!({
        "thread_id": "t1",
        "interactions": [
            {"interaction_id": "i1", "status": "processing"}
        ],
        "modified_artifacts": []
    })
}

#[tokio::test]
async fn test_create_thread_sends_auth_headers() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/threads/v2"))
        .and(header("Authorization", "Bearer test-key"))
        .and(header("content-type", "application/json"))
        .and(body_partial_json(json!({
            "user_message": {"text": "List my tables"}
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(thread_body()))
        .expect(1)
        .mount(&server)
        .await;

    let client = QueryServiceClient::new("test-key", server.uri());
    let state = client
        .create_thread(&CreateThreadRequest::new("List my tables", None))
        .await
        .unwrap();

    assert_eq!(state.thread_id.as_deref(), Some("t1"));
    assert_eq!(state.interactions[0].status, InteractionStatus::Processing);
}

#[tokio::test]
async fn test_ddn_token_sent_when_configured() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/threads/v2/t1"))
        .and(header("Authorization", "Bearer test-key"))
        .and(header("x-ddn-auth-token", "ddn-secret"))
        .respond_with(ResponseTemplate::new(200).set_body_json(thread_body()))
        .expect(1)
        .mount(&server)
        .await;

    let client =
        QueryServiceClient::new("test-key", server.uri()).with_auth_token("ddn-secret");
    client.fetch_thread("t1").await.unwrap();
}

#[tokio::test]
async fn test_continue_posts_to_continue_path() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/threads/v2/t1/continue"))
        .and(body_partial_json(json!({
            "user_message": {"text": "and the row counts?"}
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(thread_body()))
        .expect(1)
        .mount(&server)
        .await;

    let client = QueryServiceClient::new("test-key", server.uri());
    client
        .continue_thread("t1", &ContinueThreadRequest::new("and the row counts?"))
        .await
        .unwrap();
}

#[tokio::test]
async fn test_cancel_posts_to_cancel_path() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/threads/v2/t1/cancel"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "message": "cancelling",
            "status": "processing"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = QueryServiceClient::new("test-key", server.uri());
    let ack = client.cancel_interaction("t1").await.unwrap();
    assert_eq!(ack.status, Some(InteractionStatus::Processing));
}

#[tokio::test]
async fn test_unauthorized_maps_to_auth_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/threads/v2/t1"))
        .respond_with(
            ResponseTemplate::new(401).set_body_json(json!({"error": "invalid api key"})),
        )
        .mount(&server)
        .await;

    let client = QueryServiceClient::new("bad-key", server.uri());
    let err = client.fetch_thread("t1").await.unwrap_err();
    assert!(matches!(err, Error::Auth(_)));
    assert!(err.to_string().contains("invalid api key"));
}

#[tokio::test]
async fn test_missing_thread_maps_to_not_found() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/threads/v2/nope"))
        .respond_with(
            ResponseTemplate::new(404).set_body_json(json!({"message": "thread not found"})),
        )
        .mount(&server)
        .await;

    let client = QueryServiceClient::new("test-key", server.uri());
    let err = client.fetch_thread("nope").await.unwrap_err();
    assert!(matches!(err, Error::NotFound(_)));
}

#[tokio::test]
async fn test_server_error_carries_status() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/threads/v2"))
        .respond_with(ResponseTemplate::new(503).set_body_string("upstream unavailable"))
        .mount(&server)
        .await;

    let client = QueryServiceClient::new("test-key", server.uri());
    let err = client
        .create_thread(&CreateThreadRequest::new("q", None))
        .await
        .unwrap_err();

    match err {
        Error::Service { status, message } => {
            assert_eq!(status, 503);
            assert!(message.contains("upstream unavailable"));
        }
        other => panic!("expected Service, got {:?}", other),
    }
}

#[tokio::test]
async fn test_non_json_success_body_is_malformed() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/threads/v2/t1"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>proxy page</html>"))
        .mount(&server)
        .await;

    let client = QueryServiceClient::new("test-key", server.uri());
    let err = client.fetch_thread("t1").await.unwrap_err();
    assert!(matches!(err, Error::MalformedResponse(_)));
}
