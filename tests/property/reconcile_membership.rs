//! Property tests for view reconciliation.
//!
//! Uses proptest to verify:
//! 1. After any sequence of create/update/delete events, every loaded
//!    view holds exactly the live tasks its filter matches, each once and
//!    in its latest form.
//! 2. Applying every event twice leaves the views as applying it once.
//! 3. A list fetched at any point, caught up with every event since some
//!    earlier point, holds exactly the matching live tasks.

use std::collections::{BTreeMap, BTreeSet};

use proptest::prelude::*;
use tasksync::tasks::{ViewSet, reconcile, replay};
use tasksync_proto::event::PushEvent;
use tasksync_proto::task::{Task, TaskFilter, TaskId, TaskStatus, Timestamp};

const TITLES: [&str; 4] = ["Fix login", "Ship release", "Login copy", "Plan sprint"];

/// A change to apply, resolved into a push event against the model.
#[derive(Debug, Clone)]
enum Op {
    Upsert {
        id: i64,
        status: TaskStatus,
        title: usize,
    },
    Delete {
        id: i64,
    },
}

/// Strategy for generating arbitrary `TaskStatus` values.
fn arb_status() -> impl Strategy<Value = TaskStatus> {
    prop_oneof![
        Just(TaskStatus::Todo),
        Just(TaskStatus::InProgress),
        Just(TaskStatus::Done),
    ]
}

/// Strategy for operations over a small id space, so ids collide often.
fn arb_op() -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => (0i64..8, arb_status(), 0..TITLES.len())
            .prop_map(|(id, status, title)| Op::Upsert { id, status, title }),
        1 => (0i64..8).prop_map(|id| Op::Delete { id }),
    ]
}

fn at(secs: i64) -> Timestamp {
    chrono::DateTime::from_timestamp(1_700_000_000 + secs, 0)
        .map(Timestamp::from)
        .unwrap_or_else(Timestamp::now)
}

fn filters() -> Vec<TaskFilter> {
    let mut filters = vec![
        TaskFilter::all(),
        TaskFilter::all().with_search("login"),
        TaskFilter::by_status(TaskStatus::Done).with_search("release"),
    ];
    filters.extend(TaskStatus::ALL.into_iter().map(TaskFilter::by_status));
    filters
}

fn loaded_views() -> ViewSet {
    let mut views = ViewSet::new();
    for filter in filters() {
        views.replace(filter, Vec::new());
    }
    views
}

/// Turn ops into events, tracking the live tasks the way the service would.
fn to_events(ops: &[Op]) -> (Vec<PushEvent>, BTreeMap<i64, Task>) {
    let mut live: BTreeMap<i64, Task> = BTreeMap::new();
    let mut events = Vec::with_capacity(ops.len());
    for (step, op) in (1i64..).zip(ops) {
        match *op {
            Op::Upsert { id, status, title } => {
                let event = if let Some(existing) = live.get(&id) {
                    let mut task = existing.clone();
                    task.status = status;
                    task.title = TITLES[title].to_string();
                    task.updated_at = Some(at(10_000 + step));
                    PushEvent::Updated(task)
                } else {
                    PushEvent::Created(Task {
                        id: TaskId::new(id),
                        title: TITLES[title].to_string(),
                        description: String::new(),
                        assignee: String::new(),
                        status,
                        created_at: at(step),
                        updated_at: None,
                    })
                };
                if let PushEvent::Created(task) | PushEvent::Updated(task) = &event {
                    live.insert(id, task.clone());
                }
                events.push(event);
            }
            Op::Delete { id } => {
                live.remove(&id);
                events.push(PushEvent::Deleted { id: TaskId::new(id) });
            }
        }
    }
    (events, live)
}

/// Live tasks after applying `events`, the way the service holds them.
fn live_after(events: &[PushEvent]) -> BTreeMap<i64, Task> {
    let mut live = BTreeMap::new();
    for event in events {
        match event {
            PushEvent::Created(task) | PushEvent::Updated(task) => {
                live.insert(task.id.get(), task.clone());
            }
            PushEvent::Deleted { id } => {
                live.remove(&id.get());
            }
        }
    }
    live
}

/// What the list endpoint would return for `filter`: newest first.
fn snapshot(live: &BTreeMap<i64, Task>, filter: &TaskFilter) -> Vec<Task> {
    let mut tasks: Vec<Task> = live.values().filter(|t| filter.matches(t)).cloned().collect();
    tasks.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    tasks
}

proptest! {
    #[test]
    fn views_hold_exactly_matching_live_tasks(ops in prop::collection::vec(arb_op(), 0..64)) {
        let (events, live) = to_events(&ops);
        let mut views = loaded_views();
        for event in &events {
            reconcile(&mut views, event);
        }

        for filter in filters() {
            let cached = views.read(&filter).unwrap();
            let cached_ids: Vec<i64> = cached.iter().map(|t| t.id.get()).collect();
            let unique: BTreeSet<i64> = cached_ids.iter().copied().collect();
            prop_assert_eq!(unique.len(), cached_ids.len(), "duplicates in {}", filter);

            let expected: BTreeSet<i64> = live
                .values()
                .filter(|t| filter.matches(t))
                .map(|t| t.id.get())
                .collect();
            prop_assert_eq!(&unique, &expected, "membership of {}", filter);

            for task in cached {
                prop_assert_eq!(Some(task), live.get(&task.id.get()));
            }
        }
    }

    #[test]
    fn applying_events_twice_is_idempotent(ops in prop::collection::vec(arb_op(), 0..64)) {
        let (events, _) = to_events(&ops);
        let mut once = loaded_views();
        let mut twice = loaded_views();
        for event in &events {
            reconcile(&mut once, event);
            reconcile(&mut twice, event);
            reconcile(&mut twice, event);
        }

        for filter in filters() {
            prop_assert_eq!(once.read(&filter), twice.read(&filter));
        }
    }

    #[test]
    fn replayed_fetch_matches_live_tasks(
        ops in prop::collection::vec(arb_op(), 0..48),
        cut in any::<prop::sample::Index>(),
        lag in any::<prop::sample::Index>(),
    ) {
        let (events, live) = to_events(&ops);
        // Journal opens at `start`; the server snapshot is taken at `taken`.
        let taken = cut.index(events.len() + 1);
        let start = lag.index(taken + 1);
        let at_fetch = live_after(&events[..taken]);

        for filter in filters() {
            let caught_up = replay(&filter, snapshot(&at_fetch, &filter), &events[start..]);
            let ids: Vec<i64> = caught_up.iter().map(|t| t.id.get()).collect();
            let unique: BTreeSet<i64> = ids.iter().copied().collect();
            prop_assert_eq!(unique.len(), ids.len(), "duplicates in {}", filter);

            let expected: BTreeSet<i64> = live
                .values()
                .filter(|t| filter.matches(t))
                .map(|t| t.id.get())
                .collect();
            prop_assert_eq!(&unique, &expected, "membership of {}", filter);
            for task in &caught_up {
                prop_assert_eq!(Some(task), live.get(&task.id.get()));
            }
        }
    }
}
