//! HTTP implementation of [`TaskApi`] using reqwest.

use reqwest::Response;
use serde::de::DeserializeOwned;
use url::Url;

use tasksync_proto::task::{NewTask, StatusUpdate, Task, TaskFilter, TaskId, TaskStatus};

use super::{ApiError, TaskApi};

/// Path of the task collection.
const TASKS_PATH: &str = "/api/tasks";

/// Client for the task service REST endpoints.
///
/// ```text
/// GET    /api/tasks?status=&search=   list
/// GET    /api/tasks/{id}              get
/// POST   /api/tasks/                  create
/// PATCH  /api/tasks/{id}              update status
/// DELETE /api/tasks/{id}              delete
/// ```
#[derive(Debug, Clone)]
pub struct HttpTaskClient {
    http: reqwest::Client,
    /// Base URL without a trailing slash.
    base: String,
}

impl HttpTaskClient {
    /// Creates a client for the service at `base_url` (e.g.
    /// `http://localhost:8000`).
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::InvalidUrl`] if `base_url` does not parse.
    pub fn new(base_url: &str) -> Result<Self, ApiError> {
        Self::with_client(reqwest::Client::new(), base_url)
    }

    /// Like [`new`](Self::new) but reuses an existing reqwest client.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::InvalidUrl`] if `base_url` does not parse.
    pub fn with_client(http: reqwest::Client, base_url: &str) -> Result<Self, ApiError> {
        Url::parse(base_url)?;
        Ok(Self {
            http,
            base: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// The base URL requests are made against.
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base
    }

    fn endpoint(&self, path: &str) -> Result<Url, ApiError> {
        Ok(Url::parse(&format!("{}{path}", self.base))?)
    }

    fn task_endpoint(&self, id: TaskId) -> Result<Url, ApiError> {
        self.endpoint(&format!("{TASKS_PATH}/{id}"))
    }
}

impl TaskApi for HttpTaskClient {
    async fn list(&self, filter: &TaskFilter) -> Result<Vec<Task>, ApiError> {
        tracing::debug!(%filter, "listing tasks");
        let response = self
            .http
            .get(self.endpoint(TASKS_PATH)?)
            .query(&filter.query_pairs())
            .send()
            .await?;
        decode(response).await
    }

    async fn get(&self, id: TaskId) -> Result<Task, ApiError> {
        tracing::debug!(task_id = %id, "fetching task");
        let response = self.http.get(self.task_endpoint(id)?).send().await?;
        decode(response).await
    }

    async fn create(&self, new_task: &NewTask) -> Result<Task, ApiError> {
        tracing::debug!(title = %new_task.title, "creating task");
        let response = self
            .http
            .post(self.endpoint(&format!("{TASKS_PATH}/"))?)
            .json(new_task)
            .send()
            .await?;
        decode(response).await
    }

    async fn update_status(&self, id: TaskId, status: TaskStatus) -> Result<Task, ApiError> {
        tracing::debug!(task_id = %id, %status, "updating task status");
        let response = self
            .http
            .patch(self.task_endpoint(id)?)
            .json(&StatusUpdate { status })
            .send()
            .await?;
        decode(response).await
    }

    async fn delete(&self, id: TaskId) -> Result<(), ApiError> {
        tracing::debug!(task_id = %id, "deleting task");
        let response = self.http.delete(self.task_endpoint(id)?).send().await?;
        check(response).await?;
        Ok(())
    }
}

/// Turn a non-2xx response into [`ApiError::Status`].
async fn check(response: Response) -> Result<Response, ApiError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    let message = if body.trim().is_empty() {
        format!("HTTP {}", status.as_u16())
    } else {
        body
    };
    tracing::warn!(status = status.as_u16(), %message, "task service call failed");
    Err(ApiError::Status {
        status: status.as_u16(),
        message,
    })
}

async fn decode<T: DeserializeOwned>(response: Response) -> Result<T, ApiError> {
    let body = check(response).await?.bytes().await?;
    Ok(serde_json::from_slice(&body)?)
}
