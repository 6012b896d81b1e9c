//! HTTP accessor tests against a wiremock server.

use std::sync::Arc;

use reqwest::Method;
use serde_json::json;
use vdev_client::{
    CallOptions, Client, ClientConfig, ClientError, CreateInstance, HttpAccessor, InstanceId,
    InstanceStatus, Payload, ProjectId, RemoteAccessor,
};
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn config(server: &MockServer) -> ClientConfig {
    ClientConfig::new(format!("{}/api/v1", server.uri())).with_token("t0ken")
}

#[tokio::test]
async fn test_json_call_sends_bearer_token() {
    let server = MockServer::start().await;
    let id = InstanceId::new();
    Mock::given(method("GET"))
        .and(path(format!("/api/v1/instances/{id}")))
        .and(header("authorization", "Bearer t0ken"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": id, "state": "on"})))
        .expect(1)
        .mount(&server)
        .await;

    let accessor = HttpAccessor::new(&config(&server)).unwrap();
    let payload = accessor
        .call(&format!("/instances/{id}"), CallOptions::get())
        .await
        .unwrap();

    assert_eq!(payload, Payload::Json(json!({"id": id, "state": "on"})));
}

#[tokio::test]
async fn test_error_status_carries_server_message() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v1/instances/x/start"))
        .respond_with(
            ResponseTemplate::new(409).set_body_json(json!({"error": "instance is deleting"})),
        )
        .mount(&server)
        .await;

    let accessor = HttpAccessor::new(&config(&server)).unwrap();
    let err = accessor
        .call("/instances/x/start", CallOptions::post())
        .await
        .unwrap_err();

    match err {
        ClientError::Api { status, message } => {
            assert_eq!(status, 409);
            assert_eq!(message, "instance is deleting");
        }
        other => panic!("expected API error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_empty_body_and_raw_mode() {
    let server = MockServer::start().await;
    Mock::given(method("DELETE"))
        .and(path("/api/v1/instances/x"))
        .respond_with(ResponseTemplate::new(204))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/v1/instances/x/screenshot"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![0x89, b'P', b'N', b'G']))
        .mount(&server)
        .await;

    let accessor = HttpAccessor::new(&config(&server)).unwrap();

    let deleted = accessor
        .call("/instances/x", CallOptions::new(Method::DELETE))
        .await
        .unwrap();
    assert_eq!(deleted, Payload::Json(serde_json::Value::Null));

    let image = accessor
        .call("/instances/x/screenshot", CallOptions::get().raw())
        .await
        .unwrap()
        .into_bytes()
        .unwrap();
    assert_eq!(&image[..], b"\x89PNG");
}

#[tokio::test]
async fn test_client_creates_instance_over_http() {
    let server = MockServer::start().await;
    let project_id = ProjectId::new();
    let instance_id = InstanceId::new();

    Mock::given(method("GET"))
        .and(path(format!("/api/v1/projects/{project_id}")))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"id": project_id, "name": "ci"})),
        )
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/v1/instances"))
        .and(body_json(json!({
            "project": project_id,
            "name": "device-1",
            "flavor": "pixel-7"
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": instance_id,
            "name": "device-1",
            "state": "creating",
            "flavor": "pixel-7"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = Client::new(config(&server)).unwrap();
    let project = client.project(project_id).await.unwrap();
    let instance = project
        .create_instance(CreateInstance::new("device-1", "pixel-7"))
        .await
        .unwrap();

    assert_eq!(project.name(), "ci");
    assert_eq!(instance.id(), instance_id);
    assert_eq!(instance.state(), InstanceStatus::Creating);
    assert!(Arc::strong_count(client.accessor()) >= 2);
}
