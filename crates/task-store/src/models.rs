use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// Lifecycle status of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Processing,
    Success,
    Failed,
    Cancelled,
}

impl TaskStatus {
    /// Terminal statuses are the ones a retention sweep ever deletes.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Success | Self::Failed | Self::Cancelled)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Success => "success",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

impl FromStr for TaskStatus {
    type Err = TaskStatusParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            "success" => Ok(Self::Success),
            "failed" => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(TaskStatusParseError(other.to_owned())),
        }
    }
}

/// Error returned when parsing an invalid [`TaskStatus`] string.
#[derive(Debug, Clone)]
pub struct TaskStatusParseError(pub String);

impl fmt::Display for TaskStatusParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid task status: {:?}", self.0)
    }
}

impl std::error::Error for TaskStatusParseError {}

/// Column to sort `query` results by.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortProperty {
    DateCreated,
    DateModified,
    DateCompleted,
    Status,
}

impl Default for SortProperty {
    fn default() -> Self {
        Self::DateCreated
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    Asc,
    Desc,
}

impl Default for SortDirection {
    fn default() -> Self {
        Self::Desc
    }
}

// ---------------------------------------------------------------------------
// Row structs
// ---------------------------------------------------------------------------

/// A background task, as persisted.
///
/// Field names follow the column names in `migrations/0001_init.sql`
/// directly -- no renaming happens between the row and the struct.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Task {
    pub id: Uuid,
    pub task_type: String,
    pub status: TaskStatus,
    pub payload: Option<serde_json::Value>,
    pub result: Option<serde_json::Value>,
    pub error: Option<serde_json::Value>,
    pub date_created: DateTime<Utc>,
    pub date_modified: DateTime<Utc>,
    pub date_next_process: Option<DateTime<Utc>>,
    pub date_completed: Option<DateTime<Utc>>,
    pub date_cancelled: Option<DateTime<Utc>>,
    pub retry_interval_ms: Option<i64>,
    pub retries_remaining: Option<i32>,
    pub retain_for_ms: Option<i64>,
    pub retain_until_ms: Option<i64>,
}

/// The view returned by `get`/`query`: renames `retain_until_ms` to a
/// timestamp and drops the fields that are dispatcher-internal.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskView {
    pub id: String,
    pub task_type: String,
    pub status: TaskStatus,
    pub payload: Option<serde_json::Value>,
    pub result: Option<serde_json::Value>,
    pub error: Option<serde_json::Value>,
    pub date_created: DateTime<Utc>,
    pub date_modified: DateTime<Utc>,
    pub date_completed: Option<DateTime<Utc>>,
    pub date_cancelled: Option<DateTime<Utc>>,
    pub retry_interval_ms: Option<i64>,
    pub retries_remaining: Option<i32>,
    pub date_retain_until: Option<DateTime<Utc>>,
}

impl Task {
    /// Map the persisted row to its external `TaskView` projection
    /// (`retainUntil` becomes `dateRetainUntil`; `retainFor` and
    /// `dateNextProcess` are dropped -- internal scheduling state, not
    /// part of the caller-facing view).
    ///
    /// `id_urn` is the full `background-task:entity-storage:<hex>` string.
    pub fn to_view(&self, id_urn: String) -> TaskView {
        let date_retain_until = self.retain_until_ms.and_then(|ms| {
            if ms < 0 {
                None
            } else {
                DateTime::<Utc>::from_timestamp_millis(ms)
            }
        });
        TaskView {
            id: id_urn,
            task_type: self.task_type.clone(),
            status: self.status,
            payload: self.payload.clone(),
            result: self.result.clone(),
            error: self.error.clone(),
            date_created: self.date_created,
            date_modified: self.date_modified,
            date_completed: self.date_completed,
            date_cancelled: self.date_cancelled,
            retry_interval_ms: self.retry_interval_ms,
            retries_remaining: self.retries_remaining,
            date_retain_until,
        }
    }
}
