//! Live task session: cache, push channel and mutations in one place.
//!
//! A [`TaskSync`] owns a [`TaskCache`] and a handle onto a shared
//! [`ConnectionManager`]. Once started, every push event is reconciled into
//! the cache. Mutations go through the [`TaskApi`]; their confirmed result
//! is reconciled immediately and all views are then refetched in the
//! background to pick up anything else that changed.

use parking_lot::Mutex;
use tokio::sync::watch;

use tasksync_proto::event::PushEvent;
use tasksync_proto::task::{NewTask, Task, TaskFilter, TaskId, TaskStatus};

use crate::api::{ApiError, TaskApi};
use crate::connection::{ConnectionManager, ConnectionStatus, Subscription};
use crate::tasks::TaskCache;
use crate::transport::Connector;

/// A task session bound to one cache and one shared connection.
pub struct TaskSync<A, C: Connector> {
    cache: TaskCache<A>,
    connection: ConnectionManager<C>,
    subscription: Mutex<Option<Subscription>>,
}

impl<A: TaskApi, C: Connector> TaskSync<A, C> {
    /// Creates a session. Nothing is fetched or connected until
    /// [`start`](Self::start) or [`view`](Self::view) is called.
    pub fn new(api: A, connection: ConnectionManager<C>) -> Self {
        Self {
            cache: TaskCache::new(api),
            connection,
            subscription: Mutex::new(None),
        }
    }

    /// Connect the push channel and start reconciling its events into the
    /// cache. Calling it again is a no-op.
    pub fn start(&self) {
        self.connection.connect();

        let mut subscription = self.subscription.lock();
        if subscription.is_some() {
            return;
        }
        let cache = self.cache.clone();
        *subscription = Some(self.connection.on_message(move |event| {
            cache.apply(std::slice::from_ref(event));
        }));
        tracing::debug!(url = self.connection.url(), "task sync started");
    }

    /// Stop reconciling push events. The shared connection stays open for
    /// other subscribers until it is explicitly disconnected.
    pub fn stop(&self) {
        if let Some(subscription) = self.subscription.lock().take() {
            subscription.unsubscribe();
            tracing::debug!("task sync stopped");
        }
    }

    /// Whether push events are currently being reconciled.
    pub fn is_started(&self) -> bool {
        self.subscription.lock().is_some()
    }

    /// Load a view, fetching it if needed.
    ///
    /// # Errors
    ///
    /// Returns the fetch error if the view was not cached and could not be
    /// loaded.
    pub async fn view(&self, filter: &TaskFilter) -> Result<Vec<Task>, ApiError> {
        self.cache.load(filter).await
    }

    /// The cached contents of a view, `None` if it is not loaded.
    pub fn read(&self, filter: &TaskFilter) -> Option<Vec<Task>> {
        self.cache.read(filter)
    }

    /// Receiver notified after every cache change.
    pub fn changes(&self) -> watch::Receiver<u64> {
        self.cache.changes()
    }

    /// Creates a task.
    ///
    /// # Errors
    ///
    /// Returns the service error; the cache is left untouched.
    pub async fn create(&self, new_task: NewTask) -> Result<Task, ApiError> {
        let task = self.cache.api().create(&new_task).await?;
        tracing::info!(task_id = %task.id, title = %task.title, "task created");
        self.settle(&PushEvent::Created(task.clone()));
        Ok(task)
    }

    /// Moves a task to `status`.
    ///
    /// # Errors
    ///
    /// Returns the service error; the cache is left untouched.
    pub async fn update_status(&self, id: TaskId, status: TaskStatus) -> Result<Task, ApiError> {
        let task = self.cache.api().update_status(id, status).await?;
        tracing::info!(task_id = %id, %status, "task status changed");
        self.settle(&PushEvent::Updated(task.clone()));
        Ok(task)
    }

    /// Takes a task: moves it to [`TaskStatus::InProgress`].
    ///
    /// # Errors
    ///
    /// See [`update_status`](Self::update_status).
    pub async fn claim(&self, id: TaskId) -> Result<Task, ApiError> {
        self.update_status(id, TaskStatus::InProgress).await
    }

    /// Finishes a task: moves it to [`TaskStatus::Done`].
    ///
    /// # Errors
    ///
    /// See [`update_status`](Self::update_status).
    pub async fn complete(&self, id: TaskId) -> Result<Task, ApiError> {
        self.update_status(id, TaskStatus::Done).await
    }

    /// Deletes a task.
    ///
    /// # Errors
    ///
    /// Returns the service error; the cache is left untouched.
    pub async fn delete(&self, id: TaskId) -> Result<(), ApiError> {
        self.cache.api().delete(id).await?;
        tracing::info!(task_id = %id, "task deleted");
        self.settle(&PushEvent::Deleted { id });
        Ok(())
    }

    /// Current state of the push channel.
    pub fn connection_status(&self) -> ConnectionStatus {
        self.connection.status()
    }

    /// Receiver notified on every connection state change.
    pub fn watch_connection(&self) -> watch::Receiver<ConnectionStatus> {
        self.connection.watch_status()
    }

    /// The underlying cache.
    pub const fn cache(&self) -> &TaskCache<A> {
        &self.cache
    }

    /// The shared connection this session listens on.
    pub const fn connection(&self) -> &ConnectionManager<C> {
        &self.connection
    }

    /// Reconcile a confirmed mutation, then refetch every view.
    fn settle(&self, event: &PushEvent) {
        self.cache.apply(std::slice::from_ref(event));
        self.cache.invalidate(|_| true);
    }
}
