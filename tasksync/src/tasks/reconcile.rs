//! Applies push events to every loaded view in one synchronous pass.

use std::ops::AddAssign;

use tasksync_proto::event::PushEvent;
use tasksync_proto::task::{Task, TaskFilter};

use super::merge;
use super::views::{InsertAt, ViewSet};

/// What a reconciliation pass changed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileOutcome {
    /// Views the task was added to.
    pub inserted: usize,
    /// Views whose copy of the task was replaced in place.
    pub updated: usize,
    /// Views the task was removed from.
    pub removed: usize,
    /// The event was older than the cached copy and was ignored.
    pub stale: bool,
}

impl ReconcileOutcome {
    /// Whether no view changed.
    #[must_use]
    pub const fn is_noop(&self) -> bool {
        self.inserted == 0 && self.updated == 0 && self.removed == 0
    }
}

impl AddAssign for ReconcileOutcome {
    fn add_assign(&mut self, other: Self) {
        self.inserted += other.inserted;
        self.updated += other.updated;
        self.removed += other.removed;
        self.stale |= other.stale;
    }
}

/// Apply one push event to every loaded view.
///
/// - `Created`: prepended to each view whose filter matches, unless present.
/// - `Updated`: replaced in place where it appears and still matches,
///   removed where it no longer matches, inserted newest-first where it
///   now matches but is absent. Ignored if strictly older than the cached
///   copy.
/// - `Deleted`: removed from every view.
pub fn reconcile(views: &mut ViewSet, event: &PushEvent) -> ReconcileOutcome {
    let outcome = match event {
        PushEvent::Created(task) => apply_created(views, task),
        PushEvent::Updated(task) => apply_updated(views, task),
        PushEvent::Deleted { id } => ReconcileOutcome {
            removed: views.remove_everywhere(*id),
            ..ReconcileOutcome::default()
        },
    };
    tracing::debug!(
        kind = event.kind(),
        task_id = %event.task_id(),
        inserted = outcome.inserted,
        updated = outcome.updated,
        removed = outcome.removed,
        stale = outcome.stale,
        "reconciled push event"
    );
    outcome
}

/// Bring a freshly fetched list up to date with events that were
/// reconciled while its request was in flight.
///
/// The list is a snapshot from before those events, so storing it as is
/// would bring back deleted tasks and drop created ones. Replaying is safe
/// for events the snapshot already reflects.
#[must_use]
pub fn replay(filter: &TaskFilter, tasks: Vec<Task>, events: &[PushEvent]) -> Vec<Task> {
    if events.is_empty() {
        return tasks;
    }
    let mut scratch = ViewSet::new();
    scratch.replace(filter.clone(), tasks);
    for event in events {
        reconcile(&mut scratch, event);
    }
    scratch.take(filter).unwrap_or_default()
}

fn loaded_filters(views: &ViewSet) -> Vec<TaskFilter> {
    views.filters().cloned().collect()
}

fn apply_created(views: &mut ViewSet, task: &Task) -> ReconcileOutcome {
    let mut outcome = ReconcileOutcome::default();
    for filter in loaded_filters(views) {
        if filter.matches(task) && views.insert_into(&filter, task.clone(), InsertAt::Front) {
            outcome.inserted += 1;
        }
    }
    outcome
}

fn apply_updated(views: &mut ViewSet, task: &Task) -> ReconcileOutcome {
    if let Some(cached) = views.find(task.id)
        && merge::is_stale(cached, task)
    {
        return ReconcileOutcome {
            stale: true,
            ..ReconcileOutcome::default()
        };
    }

    let mut outcome = ReconcileOutcome::default();
    for filter in loaded_filters(views) {
        if filter.matches(task) {
            if views.replace_in(&filter, task) {
                outcome.updated += 1;
            } else if views.insert_into(&filter, task.clone(), InsertAt::NewestFirst) {
                outcome.inserted += 1;
            }
        } else if views.remove_from(&filter, task.id) {
            outcome.removed += 1;
        }
    }
    outcome
}
