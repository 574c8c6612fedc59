// Test-specific lint overrides: integration tests use unwrap/expect freely,
// and some pedantic/nursery lints are not appropriate for test code.
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::doc_markdown,
    clippy::future_not_send,
    clippy::missing_panics_doc
)]

//! Integration tests for the HTTP task client against the mock service.

mod support;

use support::{MockTaskService, task};
use tasksync::api::{ApiError, HttpTaskClient, TaskApi};
use tasksync_proto::task::{NewTask, TaskFilter, TaskId, TaskStatus};

fn seeded() -> Vec<tasksync_proto::task::Task> {
    vec![
        task(3, "Fix login bug", "Ana", TaskStatus::InProgress),
        task(2, "Write release notes", "Bo", TaskStatus::Todo),
        task(1, "Login page copy", "Cy", TaskStatus::Done),
    ]
}

#[tokio::test]
async fn list_returns_tasks_newest_first() {
    let service = MockTaskService::start_with(seeded()).await;
    let client = HttpTaskClient::new(&service.api_url()).unwrap();

    let tasks = client.list(&TaskFilter::all()).await.unwrap();
    let ids: Vec<i64> = tasks.iter().map(|t| t.id.get()).collect();
    assert_eq!(ids, vec![3, 2, 1]);
}

#[tokio::test]
async fn list_sends_status_and_search_filters() {
    let service = MockTaskService::start_with(seeded()).await;
    let client = HttpTaskClient::new(&service.api_url()).unwrap();

    let todo = client
        .list(&TaskFilter::by_status(TaskStatus::Todo))
        .await
        .unwrap();
    assert_eq!(todo.len(), 1);
    assert_eq!(todo[0].id, TaskId::new(2));

    let login = client
        .list(&TaskFilter::all().with_search("LOGIN"))
        .await
        .unwrap();
    assert_eq!(login.len(), 2);

    let login_in_progress = client
        .list(&TaskFilter::by_status(TaskStatus::InProgress).with_search("login"))
        .await
        .unwrap();
    assert_eq!(login_in_progress.len(), 1);
    assert_eq!(login_in_progress[0].title, "Fix login bug");
}

#[tokio::test]
async fn create_returns_server_assigned_fields() {
    let service = MockTaskService::start().await;
    let client = HttpTaskClient::new(&service.api_url()).unwrap();

    let created = client
        .create(&NewTask::new("Ship release", "tag and publish", "Ana"))
        .await
        .unwrap();
    assert_eq!(created.id, TaskId::new(1));
    assert_eq!(created.status, TaskStatus::Todo);
    assert_eq!(created.description, "tag and publish");
    assert!(created.updated_at.is_none());
    assert_eq!(service.tasks(), vec![created]);
}

#[tokio::test]
async fn get_and_update_status() {
    let service = MockTaskService::start_with(seeded()).await;
    let client = HttpTaskClient::new(&service.api_url()).unwrap();

    let fetched = client.get(TaskId::new(2)).await.unwrap();
    assert_eq!(fetched.title, "Write release notes");

    let updated = client
        .update_status(TaskId::new(2), TaskStatus::Done)
        .await
        .unwrap();
    assert_eq!(updated.status, TaskStatus::Done);
    assert!(updated.updated_at.is_some());
    assert_eq!(updated.created_at, fetched.created_at);
}

#[tokio::test]
async fn delete_removes_task() {
    let service = MockTaskService::start_with(seeded()).await;
    let client = HttpTaskClient::new(&service.api_url()).unwrap();

    client.delete(TaskId::new(1)).await.unwrap();
    assert_eq!(service.tasks().len(), 2);

    let err = client.get(TaskId::new(1)).await.unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn missing_task_reports_status_and_body() {
    let service = MockTaskService::start().await;
    let client = HttpTaskClient::new(&service.api_url()).unwrap();

    let err = client
        .update_status(TaskId::new(42), TaskStatus::Done)
        .await
        .unwrap_err();
    match err {
        ApiError::Status { status, message } => {
            assert_eq!(status, 404);
            assert!(message.contains("Task not found"), "message: {message}");
        }
        other => panic!("expected status error, got {other:?}"),
    }
}

#[tokio::test]
async fn empty_error_body_becomes_http_status_message() {
    let service = MockTaskService::start().await;
    let client = HttpTaskClient::new(&service.api_url()).unwrap();

    service.fail_next(503, "");
    let err = client.list(&TaskFilter::all()).await.unwrap_err();
    match err {
        ApiError::Status { status, message } => {
            assert_eq!(status, 503);
            assert_eq!(message, "HTTP 503");
        }
        other => panic!("expected status error, got {other:?}"),
    }
}

#[tokio::test]
async fn unreachable_service_is_a_request_error() {
    let service = MockTaskService::start().await;
    let url = service.api_url();
    drop(service);
    // Give the aborted server a moment to release the port.
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;

    let client = HttpTaskClient::new(&url).unwrap();
    let err = client.list(&TaskFilter::all()).await.unwrap_err();
    assert!(matches!(err, ApiError::Request(_)), "got {err:?}");
    assert_eq!(err.status(), None);
}
