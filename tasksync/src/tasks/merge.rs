//! Pure last-write-wins rules for task records.
//!
//! Records are replaced whole, never merged field by field. The only
//! ordering information the service provides is `updated_at`, so an
//! incoming copy loses only when both sides carry a timestamp and the
//! incoming one is strictly older. Equal or missing timestamps let the
//! incoming copy win, which keeps re-applying the same record idempotent.

use tasksync_proto::task::Task;

/// Whether `incoming` is strictly older than the `cached` copy of the same
/// task and must be ignored.
#[must_use]
pub fn is_stale(cached: &Task, incoming: &Task) -> bool {
    match (cached.updated_at, incoming.updated_at) {
        (Some(cached_at), Some(incoming_at)) => incoming_at < cached_at,
        _ => false,
    }
}

/// The fresher of two copies of the same task. Ties go to `a`.
#[must_use]
pub fn fresher<'a>(a: &'a Task, b: &'a Task) -> &'a Task {
    if b.last_modified() > a.last_modified() {
        b
    } else {
        a
    }
}

/// Index at which `task` belongs in a newest-first list.
///
/// Entries created at the same instant keep their relative order and the
/// new entry goes after them.
#[must_use]
pub fn newest_first_position(tasks: &[Task], task: &Task) -> usize {
    tasks
        .iter()
        .position(|existing| existing.created_at < task.created_at)
        .unwrap_or(tasks.len())
}
