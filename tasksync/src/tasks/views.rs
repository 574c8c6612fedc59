//! Filter-keyed task views.
//!
//! A [`ViewSet`] holds one ordered task list per [`TaskFilter`] that has
//! been loaded. It is plain data with no locking and no I/O; the
//! [`TaskCache`](super::TaskCache) wraps it in a mutex and the reconciler
//! operates on it directly.

use std::collections::HashMap;

use tasksync_proto::task::{Task, TaskFilter, TaskId};

use super::merge;

/// Where [`ViewSet::insert_into`] places a new entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertAt {
    /// At the head of the list.
    Front,
    /// Among the existing entries by `created_at`, newest first.
    NewestFirst,
}

/// One materialized list.
#[derive(Debug, Clone, Default)]
struct View {
    tasks: Vec<Task>,
    /// Marked for refetch; the list is still served until replaced.
    stale: bool,
}

impl View {
    fn position(&self, id: TaskId) -> Option<usize> {
        self.tasks.iter().position(|t| t.id == id)
    }
}

/// All materialized views, keyed by filter.
#[derive(Debug, Clone, Default)]
pub struct ViewSet {
    views: HashMap<TaskFilter, View>,
}

impl ViewSet {
    /// Creates an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The tasks of a view, or `None` if it has not been loaded.
    #[must_use]
    pub fn read(&self, filter: &TaskFilter) -> Option<&[Task]> {
        self.views.get(filter).map(|v| v.tasks.as_slice())
    }

    /// Whether a view has been loaded.
    #[must_use]
    pub fn is_materialized(&self, filter: &TaskFilter) -> bool {
        self.views.contains_key(filter)
    }

    /// Whether a view is waiting for a refetch.
    #[must_use]
    pub fn is_stale(&self, filter: &TaskFilter) -> bool {
        self.views.get(filter).is_some_and(|v| v.stale)
    }

    /// Filters of all loaded views, in no particular order.
    pub fn filters(&self) -> impl Iterator<Item = &TaskFilter> {
        self.views.keys()
    }

    /// Whether no view has been loaded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.views.is_empty()
    }

    /// Store a full fetch result, materializing the view if needed and
    /// clearing its stale mark.
    pub fn replace(&mut self, filter: TaskFilter, tasks: Vec<Task>) {
        self.views.insert(filter, View { tasks, stale: false });
    }

    /// Mark a loaded view stale. Returns `false` if it is not loaded.
    pub fn mark_stale(&mut self, filter: &TaskFilter) -> bool {
        self.views.get_mut(filter).is_some_and(|v| {
            v.stale = true;
            true
        })
    }

    /// Unload a view, returning its tasks.
    pub fn take(&mut self, filter: &TaskFilter) -> Option<Vec<Task>> {
        self.views.remove(filter).map(|v| v.tasks)
    }

    /// Apply `mutator` to every cached copy of a task, in every view.
    ///
    /// Returns the number of copies touched.
    pub fn patch_all(&mut self, id: TaskId, mut mutator: impl FnMut(&mut Task)) -> usize {
        let mut patched = 0;
        for view in self.views.values_mut() {
            for task in view.tasks.iter_mut().filter(|t| t.id == id) {
                mutator(task);
                patched += 1;
            }
        }
        patched
    }

    /// Replace the copy of `task` in one view, keeping its position.
    ///
    /// Returns `false` if the view is not loaded, does not hold the task, or
    /// already holds an identical copy.
    pub fn replace_in(&mut self, filter: &TaskFilter, task: &Task) -> bool {
        let Some(view) = self.views.get_mut(filter) else {
            return false;
        };
        match view.position(task.id) {
            Some(index) if view.tasks[index] != *task => {
                view.tasks[index] = task.clone();
                true
            }
            _ => false,
        }
    }

    /// Add `task` to one view.
    ///
    /// No-op returning `false` if the view is not loaded or already holds
    /// a task with the same id.
    pub fn insert_into(&mut self, filter: &TaskFilter, task: Task, at: InsertAt) -> bool {
        let Some(view) = self.views.get_mut(filter) else {
            return false;
        };
        if view.position(task.id).is_some() {
            return false;
        }
        let index = match at {
            InsertAt::Front => 0,
            InsertAt::NewestFirst => merge::newest_first_position(&view.tasks, &task),
        };
        view.tasks.insert(index, task);
        true
    }

    /// Remove a task from one view. Returns whether it was present.
    pub fn remove_from(&mut self, filter: &TaskFilter, id: TaskId) -> bool {
        let Some(view) = self.views.get_mut(filter) else {
            return false;
        };
        let before = view.tasks.len();
        view.tasks.retain(|t| t.id != id);
        view.tasks.len() != before
    }

    /// Remove a task from every view. Returns the number of views it was
    /// removed from.
    pub fn remove_everywhere(&mut self, id: TaskId) -> usize {
        let filters: Vec<TaskFilter> = self.views.keys().cloned().collect();
        filters
            .iter()
            .filter(|filter| self.remove_from(filter, id))
            .count()
    }

    /// The freshest cached copy of a task across all views.
    #[must_use]
    pub fn find(&self, id: TaskId) -> Option<&Task> {
        self.views
            .values()
            .filter_map(|v| v.position(id).map(|i| &v.tasks[i]))
            .reduce(merge::fresher)
    }
}
