//! Request/response access to the task service.
//!
//! [`TaskApi`] is the seam the cache and the sync session depend on;
//! [`http::HttpTaskClient`] is the production implementation. Each call is
//! a single exchange with no retries. Retry policy belongs to the caller.

pub mod http;

pub use http::HttpTaskClient;

use tasksync_proto::task::{NewTask, Task, TaskFilter, TaskId, TaskStatus};

/// Errors returned by task service calls.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// The service answered with a non-2xx status.
    #[error("task service returned {status}: {message}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Response body, or `HTTP <status>` when the body was empty.
        message: String,
    },

    /// The request could not be sent or the response could not be read.
    #[error("request to task service failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The response body was not the expected JSON.
    #[error("invalid task service response: {0}")]
    Decode(#[from] serde_json::Error),

    /// The configured base URL is not usable.
    #[error("invalid task service URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
}

impl ApiError {
    /// HTTP status for [`ApiError::Status`], `None` otherwise.
    #[must_use]
    pub const fn status(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Whether the service reported that the task does not exist.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self.status(), Some(404))
    }
}

/// Typed operations against the task service.
pub trait TaskApi: Send + Sync + 'static {
    /// List tasks matching `filter`, in the service's order (newest first).
    fn list(
        &self,
        filter: &TaskFilter,
    ) -> impl std::future::Future<Output = Result<Vec<Task>, ApiError>> + Send;

    /// Fetch a single task.
    fn get(&self, id: TaskId) -> impl std::future::Future<Output = Result<Task, ApiError>> + Send;

    /// Create a task. The service assigns the id, status and timestamps.
    fn create(
        &self,
        new_task: &NewTask,
    ) -> impl std::future::Future<Output = Result<Task, ApiError>> + Send;

    /// Change a task's status and return the updated record.
    fn update_status(
        &self,
        id: TaskId,
        status: TaskStatus,
    ) -> impl std::future::Future<Output = Result<Task, ApiError>> + Send;

    /// Delete a task.
    fn delete(&self, id: TaskId) -> impl std::future::Future<Output = Result<(), ApiError>> + Send;
}
