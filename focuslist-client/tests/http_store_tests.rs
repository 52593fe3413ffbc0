//! Contract tests for the HTTP remote task store.

use focuslist_client::{ClientError, HttpTaskStore, RemoteTaskStore};
use focuslist_core::{
    protocol::{CreateTaskRequest, UpdateTaskRequest},
    FailureClass, Priority, SyncError, TaskId,
};
use serde_json::json;
use std::time::Duration;
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn store(server: &MockServer) -> HttpTaskStore {
    HttpTaskStore::new(
        &server.uri(),
        Some("token-123".to_string()),
        Duration::from_secs(2),
    )
    .unwrap()
}

#[tokio::test]
async fn test_create_posts_task_and_returns_canonical_id() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/todos"))
        .and(header("cookie", "session=token-123"))
        .and(body_json(json!({"text": "Buy milk", "priority": "low"})))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({
            "todo": {
                "_id": "65a1f0c2e4b0a1b2c3d4e5f6",
                "text": "Buy milk",
                "priority": "low",
                "completed": false,
                "createdAt": "2024-01-12T10:00:00.000Z"
            }
        })))
        .expect(1)
        .mount(&server)
        .await;

    let task = store(&server)
        .create(&CreateTaskRequest {
            text: "Buy milk".to_string(),
            priority: Priority::Low,
        })
        .await
        .unwrap();

    assert_eq!(task.id, TaskId::canonical("65a1f0c2e4b0a1b2c3d4e5f6"));
    assert_eq!(task.priority, Priority::Low);
    assert!(!task.completed);
}

#[tokio::test]
async fn test_update_and_delete_target_task_path() {
    let server = MockServer::start().await;

    Mock::given(method("PUT"))
        .and(path("/api/todos/abc"))
        .and(body_json(json!({"completed": true})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"success": true})))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path("/api/todos/abc"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let store = store(&server);
    store
        .update("abc", &UpdateTaskRequest { completed: true })
        .await
        .unwrap();
    store.delete("abc").await.unwrap();
}

#[tokio::test]
async fn test_task_ids_are_encoded_as_one_path_segment() {
    let server = MockServer::start().await;

    Mock::given(method("DELETE"))
        .and(path("/api/todos/a%2Fb%3Fc"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    store(&server).delete("a/b?c").await.unwrap();
}

#[tokio::test]
async fn test_server_url_path_prefix_is_kept() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/tenant/api/todos"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"todos": []})))
        .expect(1)
        .mount(&server)
        .await;

    let prefixed = format!("{}/tenant/", server.uri());
    let store = HttpTaskStore::new(&prefixed, None, Duration::from_secs(2)).unwrap();
    assert!(store.list().await.unwrap().is_empty());
}

#[test]
fn test_invalid_server_url_is_a_config_error() {
    for url in ["not a url", "mailto:someone@example.com"] {
        let result = HttpTaskStore::new(url, None, Duration::from_secs(2));
        assert!(matches!(result, Err(ClientError::Config(_))), "{}", url);
    }
}

#[tokio::test]
async fn test_list_parses_todos() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/todos"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "todos": [
                {"_id": "b", "text": "Second", "priority": "high", "completed": true,
                 "createdAt": "2024-01-12T11:00:00Z"},
                {"_id": "a", "text": "First", "createdAt": "2024-01-12T10:00:00Z"}
            ]
        })))
        .mount(&server)
        .await;

    let tasks = store(&server).list().await.unwrap();

    assert_eq!(tasks.len(), 2);
    assert_eq!(tasks[0].id, TaskId::canonical("b"));
    assert!(tasks[0].completed);
    assert_eq!(tasks[1].priority, Priority::Medium);
}

#[tokio::test]
async fn test_client_errors_are_permanent() {
    let server = MockServer::start().await;

    Mock::given(method("PUT"))
        .and(path("/api/todos/gone"))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({"error": "Todo not found"})))
        .mount(&server)
        .await;

    let err = store(&server)
        .update("gone", &UpdateTaskRequest { completed: false })
        .await
        .unwrap_err();

    assert_eq!(
        err,
        SyncError::RemoteStatus {
            status: 404,
            message: "Todo not found".to_string()
        }
    );
    assert_eq!(err.class(), FailureClass::Permanent);
}

#[tokio::test]
async fn test_server_errors_and_bad_bodies_are_transient() {
    let server = MockServer::start().await;

    Mock::given(method("DELETE"))
        .and(path("/api/todos/x"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/todos"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>maintenance</html>"))
        .mount(&server)
        .await;

    let store = store(&server);

    let err = store.delete("x").await.unwrap_err();
    assert!(matches!(err, SyncError::RemoteStatus { status: 503, .. }));
    assert!(err.is_transient());

    let err = store.list().await.unwrap_err();
    assert!(matches!(err, SyncError::MalformedResponse(_)));
    assert!(err.is_transient());
}

#[tokio::test]
async fn test_unreachable_server_is_a_network_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/todos"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(5)))
        .mount(&server)
        .await;

    let slow = HttpTaskStore::new(&server.uri(), None, Duration::from_millis(100)).unwrap();
    let err = slow.list().await.unwrap_err();

    assert!(matches!(err, SyncError::NetworkError(_)));
    assert!(err.is_transient());
}
