//! In-process mock of the task service for integration tests.
//!
//! Serves the REST endpoints and a `/ws` push channel with axum on an
//! OS-assigned port. Every successful mutation is broadcast to all push
//! clients as a JSON event, the way the real service does. Tests can also
//! inject raw frames, force the next REST call to fail, and drop every
//! push connection.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::time::Duration;

use axum::Json;
use axum::Router;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use tasksync_proto::event::{self, PushEvent};
use tasksync_proto::task::{NewTask, StatusUpdate, Task, TaskId, TaskStatus, Timestamp};

/// Seconds since the epoch that mock timestamps count from.
const EPOCH_BASE: i64 = 1_700_000_000;

/// Mock timestamp `offset` seconds after [`EPOCH_BASE`].
pub fn ts(offset: i64) -> Timestamp {
    Timestamp::from(chrono::DateTime::from_timestamp(EPOCH_BASE + offset, 0).unwrap())
}

/// Build a task the way the mock service would.
pub fn task(id: i64, title: &str, assignee: &str, status: TaskStatus) -> Task {
    Task {
        id: TaskId::new(id),
        title: title.to_string(),
        description: String::new(),
        assignee: assignee.to_string(),
        status,
        created_at: ts(id),
        updated_at: None,
    }
}

#[derive(Default, serde::Deserialize)]
struct ListParams {
    status: Option<String>,
    search: Option<String>,
}

struct ServiceState {
    /// Newest first.
    tasks: Mutex<Vec<Task>>,
    next_id: AtomicI64,
    /// Monotonic clock for `updated_at`.
    clock: AtomicI64,
    events: broadcast::Sender<String>,
    kick: broadcast::Sender<()>,
    fail_next: Mutex<Option<(StatusCode, String)>>,
    list_calls: AtomicUsize,
}

impl ServiceState {
    fn take_failure(&self) -> Option<Response> {
        self.fail_next
            .lock()
            .take()
            .map(|(status, body)| (status, body).into_response())
    }

    fn publish(&self, event: &PushEvent) {
        let frame = event::encode(event).unwrap();
        let _ = self.events.send(frame);
    }

    fn tick(&self) -> Timestamp {
        ts(100_000 + self.clock.fetch_add(1, Ordering::SeqCst))
    }
}

fn not_found() -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(serde_json::json!({ "detail": "Task not found" })),
    )
        .into_response()
}

/// A running mock service.
pub struct MockTaskService {
    addr: SocketAddr,
    state: Arc<ServiceState>,
    handle: JoinHandle<()>,
}

impl MockTaskService {
    /// Start an empty service on `127.0.0.1:0`.
    pub async fn start() -> Self {
        Self::start_with(Vec::new()).await
    }

    /// Start a service seeded with `tasks` (given newest first).
    pub async fn start_with(tasks: Vec<Task>) -> Self {
        let next_id = tasks.iter().map(|t| t.id.get()).max().unwrap_or(0) + 1;
        let (events, _) = broadcast::channel(256);
        let (kick, _) = broadcast::channel(4);
        let state = Arc::new(ServiceState {
            tasks: Mutex::new(tasks),
            next_id: AtomicI64::new(next_id),
            clock: AtomicI64::new(0),
            events,
            kick,
            fail_next: Mutex::new(None),
            list_calls: AtomicUsize::new(0),
        });

        let app = Router::new()
            .route("/api/tasks", get(list_tasks).post(create_task))
            .route("/api/tasks/", get(list_tasks).post(create_task))
            .route(
                "/api/tasks/{id}",
                get(get_task).patch(update_task).delete(delete_task),
            )
            .route("/ws", get(ws_handler))
            .with_state(Arc::clone(&state));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            addr,
            state,
            handle,
        }
    }

    /// Base URL for the REST client.
    pub fn api_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// URL of the push channel.
    pub fn ws_url(&self) -> String {
        format!("ws://{}/ws", self.addr)
    }

    /// Current server-side tasks, newest first.
    pub fn tasks(&self) -> Vec<Task> {
        self.state.tasks.lock().clone()
    }

    /// Number of list requests served.
    pub fn list_calls(&self) -> usize {
        self.state.list_calls.load(Ordering::SeqCst)
    }

    /// Make the next REST call answer with `status` and `body`.
    pub fn fail_next(&self, status: u16, body: &str) {
        *self.state.fail_next.lock() =
            Some((StatusCode::from_u16(status).unwrap(), body.to_string()));
    }

    /// Send a raw frame to every push client.
    pub fn push_raw(&self, frame: impl Into<String>) {
        let _ = self.state.events.send(frame.into());
    }

    /// Send an event to every push client without touching stored tasks,
    /// as if another process had changed them.
    pub fn push(&self, event: &PushEvent) {
        self.state.publish(event);
    }

    /// Close every open push connection from the server side.
    pub fn drop_connections(&self) {
        let _ = self.state.kick.send(());
    }

    /// Number of push clients currently subscribed.
    pub fn push_clients(&self) -> usize {
        self.state.events.receiver_count()
    }

    /// Wait until at least `n` push clients are subscribed.
    pub async fn wait_for_push_clients(&self, n: usize) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while self.push_clients() < n {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("push clients did not connect");
    }
}

impl Drop for MockTaskService {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

// =============================================================================
// Handlers
// =============================================================================

async fn list_tasks(
    State(state): State<Arc<ServiceState>>,
    Query(params): Query<ListParams>,
) -> Response {
    if let Some(failure) = state.take_failure() {
        return failure;
    }
    state.list_calls.fetch_add(1, Ordering::SeqCst);

    let status = match params.status.as_deref().map(str::parse::<TaskStatus>) {
        Some(Ok(status)) => Some(status),
        Some(Err(_)) => return StatusCode::UNPROCESSABLE_ENTITY.into_response(),
        None => None,
    };
    let search = params.search.map(|s| s.to_lowercase());
    let tasks: Vec<Task> = state
        .tasks
        .lock()
        .iter()
        .filter(|t| status.is_none_or(|s| t.status == s))
        .filter(|t| {
            search
                .as_deref()
                .is_none_or(|q| t.title.to_lowercase().contains(q))
        })
        .cloned()
        .collect();
    Json(tasks).into_response()
}

async fn create_task(
    State(state): State<Arc<ServiceState>>,
    Json(new_task): Json<NewTask>,
) -> Response {
    if let Some(failure) = state.take_failure() {
        return failure;
    }
    let id = state.next_id.fetch_add(1, Ordering::SeqCst);
    let created = Task {
        id: TaskId::new(id),
        title: new_task.title,
        description: new_task.description,
        assignee: new_task.assignee,
        status: TaskStatus::Todo,
        created_at: ts(id),
        updated_at: None,
    };
    state.tasks.lock().insert(0, created.clone());
    state.publish(&PushEvent::Created(created.clone()));
    (StatusCode::CREATED, Json(created)).into_response()
}

async fn get_task(State(state): State<Arc<ServiceState>>, Path(id): Path<i64>) -> Response {
    if let Some(failure) = state.take_failure() {
        return failure;
    }
    let found = state
        .tasks
        .lock()
        .iter()
        .find(|t| t.id.get() == id)
        .cloned();
    found.map_or_else(not_found, |task| Json(task).into_response())
}

async fn update_task(
    State(state): State<Arc<ServiceState>>,
    Path(id): Path<i64>,
    Json(update): Json<StatusUpdate>,
) -> Response {
    if let Some(failure) = state.take_failure() {
        return failure;
    }
    let updated_at = state.tick();
    let updated = {
        let mut tasks = state.tasks.lock();
        let Some(task) = tasks.iter_mut().find(|t| t.id.get() == id) else {
            return not_found();
        };
        task.status = update.status;
        task.updated_at = Some(updated_at);
        task.clone()
    };
    state.publish(&PushEvent::Updated(updated.clone()));
    Json(updated).into_response()
}

async fn delete_task(State(state): State<Arc<ServiceState>>, Path(id): Path<i64>) -> Response {
    if let Some(failure) = state.take_failure() {
        return failure;
    }
    let removed = {
        let mut tasks = state.tasks.lock();
        let before = tasks.len();
        tasks.retain(|t| t.id.get() != id);
        tasks.len() != before
    };
    if !removed {
        return not_found();
    }
    state.publish(&PushEvent::Deleted {
        id: TaskId::new(id),
    });
    Json(serde_json::json!({ "message": "Task deleted" })).into_response()
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<ServiceState>>,
) -> impl IntoResponse {
    // Subscribe before the upgrade completes so no event published after
    // the handshake is missed.
    let events = state.events.subscribe();
    let kick = state.kick.subscribe();
    ws.on_upgrade(move |socket| forward_events(socket, events, kick))
}

async fn forward_events(
    mut socket: WebSocket,
    mut events: broadcast::Receiver<String>,
    mut kick: broadcast::Receiver<()>,
) {
    loop {
        tokio::select! {
            event = events.recv() => {
                let Ok(frame) = event else { break };
                if socket.send(Message::Text(frame.into())).await.is_err() {
                    break;
                }
            }
            incoming = socket.recv() => {
                match incoming {
                    Some(Ok(Message::Close(_)) | Err(_)) | None => break,
                    Some(Ok(_)) => {}
                }
            }
            _ = kick.recv() => {
                let _ = socket.send(Message::Close(None)).await;
                break;
            }
        }
    }
}
