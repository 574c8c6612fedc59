//! Shared, synchronized task cache.
//!
//! [`TaskCache`] wraps a [`ViewSet`] and a [`TaskApi`] handle. Views are
//! loaded on demand, refreshed in the background when invalidated, and
//! patched in place by the reconciler. Every change bumps a revision
//! counter published on a [`watch`] channel so consumers know to re-read.
//!
//! The view lock is a `parking_lot::Mutex` and is never held across an
//! `.await`: fetches run unlocked and take the lock only to store their
//! result. Events applied while a fetch is in flight are journaled and
//! replayed onto its result before it is stored.

use std::collections::HashMap;
use std::sync::Arc;

use futures_util::future::join_all;
use parking_lot::Mutex;
use tokio::sync::watch;

use tasksync_proto::event::PushEvent;
use tasksync_proto::task::{Task, TaskFilter, TaskId};

use super::reconcile::{self, ReconcileOutcome};
use super::views::{InsertAt, ViewSet};
use crate::api::{ApiError, TaskApi};

/// Cloneable handle onto one shared cache.
pub struct TaskCache<A> {
    inner: Arc<Inner<A>>,
}

impl<A> Clone for TaskCache<A> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct Inner<A> {
    api: A,
    state: Mutex<CacheState>,
    revision: watch::Sender<u64>,
}

#[derive(Default)]
struct CacheState {
    views: ViewSet,
    /// Sequence number of the most recently started fetch per view.
    fetches: HashMap<TaskFilter, u64>,
    /// Events applied since each in-flight fetch started, by sequence.
    journals: HashMap<u64, Vec<PushEvent>>,
    next_fetch: u64,
}

impl CacheState {
    fn begin_fetch(&mut self, filter: &TaskFilter) -> u64 {
        self.next_fetch += 1;
        self.fetches.insert(filter.clone(), self.next_fetch);
        self.journals.insert(self.next_fetch, Vec::new());
        self.next_fetch
    }

    fn record(&mut self, events: &[PushEvent]) {
        for journal in self.journals.values_mut() {
            journal.extend_from_slice(events);
        }
    }

    fn is_latest_fetch(&self, filter: &TaskFilter, seq: u64) -> bool {
        self.fetches.get(filter) == Some(&seq)
    }
}

impl<A: TaskApi> TaskCache<A> {
    /// Creates an empty cache backed by `api`.
    pub fn new(api: A) -> Self {
        let (revision, _) = watch::channel(0);
        Self {
            inner: Arc::new(Inner {
                api,
                state: Mutex::new(CacheState::default()),
                revision,
            }),
        }
    }

    /// The API handle used for fetches.
    pub fn api(&self) -> &A {
        &self.inner.api
    }

    /// A copy of a view, or `None` if it has not been loaded yet.
    pub fn read(&self, filter: &TaskFilter) -> Option<Vec<Task>> {
        self.inner.state.lock().views.read(filter).map(<[Task]>::to_vec)
    }

    /// Whether a view has been loaded.
    pub fn is_materialized(&self, filter: &TaskFilter) -> bool {
        self.inner.state.lock().views.is_materialized(filter)
    }

    /// Whether a view is waiting for a refetch.
    pub fn is_stale(&self, filter: &TaskFilter) -> bool {
        self.inner.state.lock().views.is_stale(filter)
    }

    /// Freshest cached copy of a task.
    pub fn find(&self, id: TaskId) -> Option<Task> {
        self.inner.state.lock().views.find(id).cloned()
    }

    /// Current revision.
    pub fn revision(&self) -> u64 {
        *self.inner.revision.borrow()
    }

    /// Receiver notified after every change to any view.
    pub fn changes(&self) -> watch::Receiver<u64> {
        self.inner.revision.subscribe()
    }

    /// Return a view, fetching it first if it has not been loaded.
    ///
    /// # Errors
    ///
    /// Returns the [`ApiError`] of the fetch if the view was not loaded and
    /// could not be fetched.
    pub async fn load(&self, filter: &TaskFilter) -> Result<Vec<Task>, ApiError> {
        if let Some(tasks) = self.read(filter) {
            return Ok(tasks);
        }
        let fetched = self.fetch(filter).await?;
        Ok(self.read(filter).unwrap_or(fetched))
    }

    /// Mark views matching `predicate` stale and refetch them in the
    /// background. Stale views keep serving their last contents until the
    /// refetch lands.
    ///
    /// Returns the filters that were invalidated.
    pub fn invalidate(&self, predicate: impl Fn(&TaskFilter) -> bool) -> Vec<TaskFilter> {
        let filters = self.mark_stale(predicate);
        if filters.is_empty() {
            return filters;
        }
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                let cache = self.clone();
                let pending = filters.clone();
                runtime.spawn(async move {
                    // Failures are logged by `fetch` and leave the view stale.
                    let _ = cache.fetch_all(&pending).await;
                });
            }
            Err(_) => {
                tracing::warn!(
                    views = filters.len(),
                    "no runtime available; invalidated views left stale"
                );
            }
        }
        filters
    }

    /// Mark views matching `predicate` stale and refetch them, waiting for
    /// every fetch to finish.
    ///
    /// Returns the number of views refreshed.
    ///
    /// # Errors
    ///
    /// Returns the first fetch error. Every matching view is still
    /// attempted, and views that failed keep their old contents.
    pub async fn refetch(&self, predicate: impl Fn(&TaskFilter) -> bool) -> Result<usize, ApiError> {
        let filters = self.mark_stale(predicate);
        self.fetch_all(&filters).await
    }

    /// Reconcile `events` into every loaded view under a single lock
    /// acquisition, bumping the revision once if anything changed.
    ///
    /// The events are also journaled for fetches still in flight, so a
    /// list requested before they happened is caught up before it is
    /// stored.
    pub fn apply(&self, events: &[PushEvent]) -> ReconcileOutcome {
        let mut outcome = ReconcileOutcome::default();
        {
            let mut state = self.inner.state.lock();
            state.record(events);
            for event in events {
                outcome += reconcile::reconcile(&mut state.views, event);
            }
        }
        if !outcome.is_noop() {
            self.bump();
        }
        outcome
    }

    /// Apply `mutator` to every cached copy of a task.
    ///
    /// Like the other single edits below, this is not journaled: a fetch
    /// already in flight may overwrite it.
    pub fn patch_all(&self, id: TaskId, mutator: impl FnMut(&mut Task)) -> usize {
        let patched = self.inner.state.lock().views.patch_all(id, mutator);
        if patched > 0 {
            self.bump();
        }
        patched
    }

    /// Add a task to one loaded view. See [`ViewSet::insert_into`].
    pub fn insert_into(&self, filter: &TaskFilter, task: Task, at: InsertAt) -> bool {
        let inserted = self.inner.state.lock().views.insert_into(filter, task, at);
        if inserted {
            self.bump();
        }
        inserted
    }

    /// Remove a task from one view. See [`ViewSet::remove_from`].
    pub fn remove_from(&self, filter: &TaskFilter, id: TaskId) -> bool {
        let removed = self.inner.state.lock().views.remove_from(filter, id);
        if removed {
            self.bump();
        }
        removed
    }

    fn mark_stale(&self, predicate: impl Fn(&TaskFilter) -> bool) -> Vec<TaskFilter> {
        let mut state = self.inner.state.lock();
        let filters: Vec<TaskFilter> = state
            .views
            .filters()
            .filter(|filter| predicate(filter))
            .cloned()
            .collect();
        for filter in &filters {
            state.views.mark_stale(filter);
        }
        filters
    }

    async fn fetch_all(&self, filters: &[TaskFilter]) -> Result<usize, ApiError> {
        let results = join_all(filters.iter().map(|filter| self.fetch(filter))).await;
        let mut refreshed = 0;
        let mut first_error = None;
        for result in results {
            match result {
                Ok(_) => refreshed += 1,
                Err(e) => {
                    first_error.get_or_insert(e);
                }
            }
        }
        first_error.map_or(Ok(refreshed), Err)
    }

    /// Fetch one view from the service and store it, unless a newer fetch
    /// for the same view was started meanwhile.
    async fn fetch(&self, filter: &TaskFilter) -> Result<Vec<Task>, ApiError> {
        let seq = self.inner.state.lock().begin_fetch(filter);
        let _journal = JournalGuard {
            state: &self.inner.state,
            seq,
        };

        let tasks = match self.inner.api.list(filter).await {
            Ok(tasks) => tasks,
            Err(e) => {
                tracing::warn!(%filter, err = %e, "view fetch failed");
                return Err(e);
            }
        };

        let (tasks, replayed, stored) = {
            let mut state = self.inner.state.lock();
            let missed = state.journals.remove(&seq).unwrap_or_default();
            let tasks = reconcile::replay(filter, tasks, &missed);
            let stored = state.is_latest_fetch(filter, seq);
            if stored {
                state.views.replace(filter.clone(), tasks.clone());
            }
            (tasks, missed.len(), stored)
        };
        if stored {
            tracing::debug!(%filter, count = tasks.len(), replayed, "view refreshed");
            self.bump();
        } else {
            tracing::debug!(%filter, seq, "discarding superseded view fetch");
        }
        Ok(tasks)
    }

    fn bump(&self) {
        self.inner.revision.send_modify(|rev| *rev += 1);
    }
}

/// Closes a fetch's journal when the fetch ends, including when its
/// future is dropped mid-request.
struct JournalGuard<'a> {
    state: &'a Mutex<CacheState>,
    seq: u64,
}

impl Drop for JournalGuard<'_> {
    fn drop(&mut self) {
        self.state.lock().journals.remove(&self.seq);
    }
}
