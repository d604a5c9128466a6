//! Directory fetch against a mock HTTP endpoint

#![allow(clippy::unwrap_used, clippy::expect_used)]

use cm_protocol::config::DirectoryConfig;
use cm_protocol::error::ProtocolError;
use cm_protocol::transport::directory::{fallback_endpoints, Directory, Endpoint};
use serde_json::json;
use std::time::Duration;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const LIST_PATH: &str = "/ISteamDirectory/GetCMList/v1/";

fn directory_for(server: &MockServer, cell_id: u32) -> Directory {
    Directory::new(DirectoryConfig {
        url: format!("{}{}", server.uri(), LIST_PATH),
        cell_id,
        request_timeout: Duration::from_secs(2),
        fetch_on_connect: true,
    })
    .unwrap()
}

#[tokio::test]
async fn test_initialize_replaces_fallback() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(LIST_PATH))
        .and(query_param("cellId", "7"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "response": {
                "serverlist": ["10.1.1.1:27017", "10.1.1.2:27018", "garbage"],
                "result": 1,
                "message": ""
            }
        })))
        .expect(1)
        .mount(&server)
        .await;

    let directory = directory_for(&server, 7);
    directory.initialize().await.unwrap();
    assert!(directory.is_initialized());

    let expected = vec![Endpoint::new("10.1.1.1", 27017), Endpoint::new("10.1.1.2", 27018)];
    assert_eq!(directory.servers().await, expected);
    for _ in 0..20 {
        assert!(expected.contains(&directory.get_random().await.unwrap()));
    }
}

#[tokio::test]
async fn test_failure_result_code() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(LIST_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "response": { "serverlist": ["10.1.1.1:27017"], "result": 2, "message": "busy" }
        })))
        .mount(&server)
        .await;

    let directory = directory_for(&server, 0);
    let err = directory.initialize().await.unwrap_err();
    assert!(matches!(&err, ProtocolError::DirectoryFetch(msg) if msg.contains("busy")));
    assert!(!directory.is_initialized());
    assert!(fallback_endpoints().contains(&directory.get_random().await.unwrap()));
}

#[tokio::test]
async fn test_empty_list_is_an_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(LIST_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "response": { "serverlist": [], "result": 1, "message": "" }
        })))
        .mount(&server)
        .await;

    let directory = directory_for(&server, 0);
    assert!(matches!(
        directory.initialize().await,
        Err(ProtocolError::DirectoryFetch(_))
    ));
    assert!(!directory.is_initialized());
}

#[tokio::test]
async fn test_http_error_status() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let directory = directory_for(&server, 0);
    assert!(directory.initialize().await.is_err());
}

#[tokio::test]
async fn test_refetch_keeps_previous_list_on_failure() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "response": { "serverList": ["10.9.9.9:27019"], "result": 1 }
        })))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let directory = directory_for(&server, 0);
    directory.initialize().await.unwrap();
    assert!(directory.initialize().await.is_err());
    assert!(directory.is_initialized());
    assert_eq!(directory.servers().await, vec![Endpoint::new("10.9.9.9", 27019)]);
}
