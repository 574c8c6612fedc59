//! Shared wire definitions for the `TaskSync` task service.

pub mod event;
pub mod task;

pub use event::{DecodeError, PushEvent};
pub use task::{NewTask, StatusUpdate, Task, TaskFilter, TaskId, TaskStatus, Timestamp};
