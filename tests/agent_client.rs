//! Recovery agent HTTP client against a mock agent.

use std::time::Duration;

use mariadb_k8s::agent::{AgentClient, GaleraSequence};
use mariadb_k8s::Error;
use serde_json::json;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn client(server: &MockServer) -> AgentClient {
    AgentClient::new(server.uri(), Duration::from_secs(2)).unwrap()
}

#[tokio::test]
async fn sequence_is_decoded() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/sequence"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "uuid": "6ba3d4a4-0ae8-11ee-a4cd-0e8dd5fd8b07",
            "seqno": 42,
            "safeToBootstrap": true
        })))
        .expect(1)
        .mount(&server)
        .await;

    let sequence = client(&server).sequence().await.unwrap();
    assert_eq!(
        sequence,
        GaleraSequence {
            uuid: "6ba3d4a4-0ae8-11ee-a4cd-0e8dd5fd8b07".to_string(),
            seqno: 42,
            safe_to_bootstrap: true,
        }
    );
}

#[tokio::test]
async fn sequence_error_carries_status_and_body() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/sequence"))
        .respond_with(ResponseTemplate::new(503).set_body_string("mariadbd still running\n"))
        .mount(&server)
        .await;

    match client(&server).sequence().await {
        Err(Error::AgentError { status, message }) => {
            assert_eq!(status, 503);
            assert_eq!(message, "mariadbd still running");
        }
        other => panic!("expected agent error, got {other:?}"),
    }
}

#[tokio::test]
async fn bootstrap_posts_to_agent() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/bootstrap"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    client(&server).bootstrap().await.unwrap();
}

#[tokio::test]
async fn bootstrap_rejection_is_an_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/bootstrap"))
        .respond_with(ResponseTemplate::new(409).set_body_string("already bootstrapped"))
        .mount(&server)
        .await;

    let err = client(&server).bootstrap().await.unwrap_err();
    assert!(matches!(err, Error::AgentError { status: 409, .. }));
    assert!(err.is_retriable());
}

#[tokio::test]
async fn health_reflects_status_code() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    assert!(!client(&server).health().await.unwrap());
}

#[tokio::test]
async fn slow_agent_times_out() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/sequence"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"uuid": "u", "seqno": 1}))
                .set_delay(Duration::from_secs(5)),
        )
        .mount(&server)
        .await;

    let agent = AgentClient::new(server.uri(), Duration::from_millis(200)).unwrap();
    assert!(matches!(agent.sequence().await, Err(Error::HttpError(_))));
}
