//! Task model as exchanged with the task service.
//!
//! Field names and status strings follow the service's JSON schema, so
//! these types serialize directly to and from request and response bodies.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Server-assigned task identifier.
///
/// Unique for the whole session and never reused for another task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(i64);

impl TaskId {
    /// Wraps a raw identifier.
    #[must_use]
    pub const fn new(raw: i64) -> Self {
        Self(raw)
    }

    /// Returns the raw identifier.
    #[must_use]
    pub const fn get(self) -> i64 {
        self.0
    }
}

impl From<i64> for TaskId {
    fn from(raw: i64) -> Self {
        Self(raw)
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for TaskId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse().map(Self)
    }
}

/// Workflow stage of a task.
///
/// Variants are declared in workflow order, so `Ord` follows the stages:
/// `Todo < InProgress < Done`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum TaskStatus {
    /// Not started.
    #[serde(rename = "To Do")]
    Todo,
    /// Claimed by someone and being worked on.
    #[serde(rename = "In Progress")]
    InProgress,
    /// Finished.
    #[serde(rename = "Done")]
    Done,
}

impl TaskStatus {
    /// All statuses in workflow order.
    pub const ALL: [Self; 3] = [Self::Todo, Self::InProgress, Self::Done];

    /// The status string used on the wire and in query parameters.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Todo => "To Do",
            Self::InProgress => "In Progress",
            Self::Done => "Done",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when a status string is not recognized.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown task status: {0:?} (expected todo, in-progress or done)")]
pub struct ParseStatusError(String);

impl FromStr for TaskStatus {
    type Err = ParseStatusError;

    /// Accepts the wire strings as well as the short forms used on the
    /// command line (`todo`, `in-progress`, `done`), case-insensitively.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized: String = s
            .trim()
            .chars()
            .filter(|c| !matches!(c, ' ' | '-' | '_'))
            .flat_map(char::to_lowercase)
            .collect();
        match normalized.as_str() {
            "todo" => Ok(Self::Todo),
            "inprogress" => Ok(Self::InProgress),
            "done" => Ok(Self::Done),
            _ => Err(ParseStatusError(s.to_string())),
        }
    }
}

/// A UTC instant.
///
/// Serialized as RFC 3339. The service may emit ISO-8601 datetimes without
/// an offset; those are read as UTC.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timestamp(DateTime<Utc>);

impl Timestamp {
    /// The current instant.
    #[must_use]
    pub fn now() -> Self {
        Self(Utc::now())
    }
}

impl From<DateTime<Utc>> for Timestamp {
    fn from(dt: DateTime<Utc>) -> Self {
        Self(dt)
    }
}

impl FromStr for Timestamp {
    type Err = chrono::ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match DateTime::parse_from_rfc3339(s) {
            Ok(dt) => Ok(Self(dt.with_timezone(&Utc))),
            Err(rfc_err) => s
                .parse::<NaiveDateTime>()
                .map(|naive| Self(naive.and_utc()))
                .map_err(|_| rfc_err),
        }
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.to_rfc3339_opts(SecondsFormat::AutoSi, true))
    }
}

impl Serialize for Timestamp {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Timestamp {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// A task as returned by the service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    /// Server-assigned identifier.
    pub id: TaskId,
    /// Short title, searched by [`TaskFilter`].
    pub title: String,
    /// Free-form description.
    pub description: String,
    /// Free-text name of the person responsible.
    pub assignee: String,
    /// Current workflow stage.
    pub status: TaskStatus,
    /// Creation time, set by the server and never changed.
    pub created_at: Timestamp,
    /// Time of the last mutation, if any.
    #[serde(default)]
    pub updated_at: Option<Timestamp>,
}

impl Task {
    /// The most recent time this task is known to have changed.
    #[must_use]
    pub fn last_modified(&self) -> Timestamp {
        self.updated_at.unwrap_or(self.created_at)
    }
}

/// Request body for creating a task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewTask {
    /// Task title.
    pub title: String,
    /// Task description.
    pub description: String,
    /// Person responsible.
    pub assignee: String,
}

impl NewTask {
    /// Builds a create request.
    pub fn new(
        title: impl Into<String>,
        description: impl Into<String>,
        assignee: impl Into<String>,
    ) -> Self {
        Self {
            title: title.into(),
            description: description.into(),
            assignee: assignee.into(),
        }
    }
}

/// Request body for a status change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusUpdate {
    /// The new status.
    pub status: TaskStatus,
}

/// Query descriptor that keys one cached list of tasks.
///
/// Mirrors the service's list parameters: an optional status and an
/// optional case-insensitive title search. The search text is trimmed and
/// an empty search is treated as absent, so equal queries always produce
/// equal keys.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct TaskFilter {
    status: Option<TaskStatus>,
    search: Option<String>,
}

impl TaskFilter {
    /// Builds a filter from optional parts.
    pub fn new(status: Option<TaskStatus>, search: Option<impl Into<String>>) -> Self {
        Self {
            status,
            search: search.and_then(|s| normalize_search(s.into())),
        }
    }

    /// The unfiltered list.
    #[must_use]
    pub const fn all() -> Self {
        Self {
            status: None,
            search: None,
        }
    }

    /// Tasks in one status.
    #[must_use]
    pub const fn by_status(status: TaskStatus) -> Self {
        Self {
            status: Some(status),
            search: None,
        }
    }

    /// Returns a copy of this filter with the given title search.
    #[must_use]
    pub fn with_search(mut self, search: impl Into<String>) -> Self {
        self.search = normalize_search(search.into());
        self
    }

    /// Status constraint, if any.
    #[must_use]
    pub const fn status(&self) -> Option<TaskStatus> {
        self.status
    }

    /// Search text, if any.
    #[must_use]
    pub fn search(&self) -> Option<&str> {
        self.search.as_deref()
    }

    /// Whether this is the unfiltered list.
    #[must_use]
    pub const fn is_unfiltered(&self) -> bool {
        self.status.is_none() && self.search.is_none()
    }

    /// Whether `task` belongs in the list this filter describes.
    ///
    /// The search is a case-insensitive substring match on the title. The
    /// service matches with SQL `ILIKE` against HTML-escaped titles, so a
    /// search containing `%`, `_`, `&`, `<`, `>` or quotes can select
    /// different rows here than on the next fetch; the fetch then wins.
    #[must_use]
    pub fn matches(&self, task: &Task) -> bool {
        if self.status.is_some_and(|status| status != task.status) {
            return false;
        }
        self.search.as_deref().is_none_or(|needle| {
            task.title
                .to_lowercase()
                .contains(&needle.to_lowercase())
        })
    }

    /// Query parameters for the list endpoint. Unset parts are omitted.
    #[must_use]
    pub fn query_pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = Vec::with_capacity(2);
        if let Some(status) = self.status {
            pairs.push(("status", status.as_str().to_string()));
        }
        if let Some(search) = &self.search {
            pairs.push(("search", search.clone()));
        }
        pairs
    }
}

impl fmt::Display for TaskFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.status, self.search.as_deref()) {
            (None, None) => f.write_str("all"),
            (Some(status), None) => write!(f, "status={status}"),
            (None, Some(search)) => write!(f, "search={search:?}"),
            (Some(status), Some(search)) => write!(f, "status={status},search={search:?}"),
        }
    }
}

fn normalize_search(raw: String) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        None
    } else if trimmed.len() == raw.len() {
        Some(raw)
    } else {
        Some(trimmed.to_string())
    }
}
