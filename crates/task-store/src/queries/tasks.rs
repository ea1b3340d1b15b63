//! Database query functions for the `tasks` table.
//!
//! Every write here is a single `UPDATE`/`DELETE` statement -- the dispatcher
//! and control surface compute the new field values (the caller owns the
//! state-machine decisions; this module only persists them).

use anyhow::{Context, Result};
use base64::Engine as _;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::condition::Condition;
use crate::models::{SortDirection, SortProperty, Task, TaskStatus};

/// Insert a new pending task row.
#[allow(clippy::too_many_arguments)]
pub async fn insert_pending(
    pool: &PgPool,
    id: Uuid,
    task_type: &str,
    payload: Option<serde_json::Value>,
    date_created: DateTime<Utc>,
    retry_interval_ms: Option<i64>,
    retries_remaining: Option<i32>,
    retain_for_ms: Option<i64>,
) -> Result<Task> {
    let task = sqlx::query_as::<_, Task>(
        "INSERT INTO tasks (id, task_type, status, payload, date_created, date_modified, \
                             date_next_process, retry_interval_ms, retries_remaining, retain_for_ms) \
         VALUES ($1, $2, 'pending', $3, $4, $4, $4, $5, $6, $7) \
         RETURNING *",
    )
    .bind(id)
    .bind(task_type)
    .bind(payload)
    .bind(date_created)
    .bind(retry_interval_ms)
    .bind(retries_remaining)
    .bind(retain_for_ms)
    .fetch_one(pool)
    .await
    .context("failed to insert task")?;

    Ok(task)
}

/// Fetch a single task by id.
pub async fn get_task(pool: &PgPool, id: Uuid) -> Result<Option<Task>> {
    let task = sqlx::query_as::<_, Task>("SELECT * FROM tasks WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await
        .context("failed to fetch task")?;

    Ok(task)
}

/// Unconditional delete. Returns whether a row was removed.
pub async fn remove_task(pool: &PgPool, id: Uuid) -> Result<bool> {
    let result = sqlx::query("DELETE FROM tasks WHERE id = $1")
        .bind(id)
        .execute(pool)
        .await
        .context("failed to remove task")?;

    Ok(result.rows_affected() > 0)
}

/// Select the next due task of a given type: earliest `date_next_process`
/// among `{pending, processing}`, ties broken by `id` so selection is
/// deterministic independent of physical storage order.
pub async fn select_next_due(pool: &PgPool, task_type: &str) -> Result<Option<Task>> {
    let task = sqlx::query_as::<_, Task>(
        "SELECT * FROM tasks \
         WHERE task_type = $1 AND status IN ('pending', 'processing') \
         ORDER BY date_next_process ASC NULLS LAST, id ASC \
         LIMIT 1",
    )
    .bind(task_type)
    .fetch_optional(pool)
    .await
    .context("failed to select next due task")?;

    Ok(task)
}

/// Mark a task `processing`, bumping `date_modified`. Unconditional on the
/// prior status: a task found in `processing` after a restart is re-marked,
/// giving at-least-once resume semantics.
pub async fn mark_processing(pool: &PgPool, id: Uuid, date_modified: DateTime<Utc>) -> Result<bool> {
    let result = sqlx::query("UPDATE tasks SET status = 'processing', date_modified = $2 WHERE id = $1")
        .bind(id)
        .bind(date_modified)
        .execute(pool)
        .await
        .context("failed to mark task processing")?;

    Ok(result.rows_affected() > 0)
}

/// Persist a successful outcome: clears retry bookkeeping and `error`, sets
/// `result`, and applies the computed retention timestamp.
pub async fn complete_success(
    pool: &PgPool,
    id: Uuid,
    result: Option<serde_json::Value>,
    date_modified: DateTime<Utc>,
    date_completed: DateTime<Utc>,
    retain_until_ms: Option<i64>,
) -> Result<bool> {
    let outcome = sqlx::query(
        "UPDATE tasks \
         SET status = 'success', result = $2, error = NULL, \
             date_modified = $3, date_completed = $4, date_next_process = NULL, \
             retry_interval_ms = NULL, retries_remaining = NULL, \
             retain_for_ms = NULL, retain_until_ms = $5 \
         WHERE id = $1",
    )
    .bind(id)
    .bind(result)
    .bind(date_modified)
    .bind(date_completed)
    .bind(retain_until_ms)
    .execute(pool)
    .await
    .context("failed to persist successful task outcome")?;

    Ok(outcome.rows_affected() > 0)
}

/// Persist a retryable failure: the task returns to `pending` with a
/// recomputed `date_next_process` and a decremented `retries_remaining`.
///
/// `retries_remaining` is `None` when the task's retry count is unlimited --
/// it simply stays absent across retries rather than being decremented.
pub async fn schedule_retry(
    pool: &PgPool,
    id: Uuid,
    error: serde_json::Value,
    date_modified: DateTime<Utc>,
    date_next_process: DateTime<Utc>,
    retries_remaining: Option<i32>,
) -> Result<bool> {
    let outcome = sqlx::query(
        "UPDATE tasks \
         SET status = 'pending', error = $2, date_modified = $3, \
             date_next_process = $4, retries_remaining = $5 \
         WHERE id = $1",
    )
    .bind(id)
    .bind(error)
    .bind(date_modified)
    .bind(date_next_process)
    .bind(retries_remaining)
    .execute(pool)
    .await
    .context("failed to schedule task retry")?;

    Ok(outcome.rows_affected() > 0)
}

/// Persist a terminal failure (retries exhausted or absent-as-unlimited
/// never applies here since that branch stays in `schedule_retry` via the
/// engine's interpretation -- see the engine's retry gate).
pub async fn fail_terminal(
    pool: &PgPool,
    id: Uuid,
    error: serde_json::Value,
    date_modified: DateTime<Utc>,
    date_completed: DateTime<Utc>,
    retain_until_ms: Option<i64>,
) -> Result<bool> {
    let outcome = sqlx::query(
        "UPDATE tasks \
         SET status = 'failed', error = $2, date_modified = $3, date_completed = $4, \
             date_next_process = NULL, retain_for_ms = NULL, retain_until_ms = $5 \
         WHERE id = $1",
    )
    .bind(id)
    .bind(error)
    .bind(date_modified)
    .bind(date_completed)
    .bind(retain_until_ms)
    .execute(pool)
    .await
    .context("failed to persist terminal task failure")?;

    Ok(outcome.rows_affected() > 0)
}

/// Cancel a pending task. Gated on `status = 'pending'` per the control
/// surface's cancellation rule -- a `processing` task is left untouched.
///
/// `date_modified` is deliberately not bumped, matching the retention
/// calculation's use of the existing (pre-cancel) `date_modified` -- so
/// `retain_until_ms` is computed here, in SQL, from the row's own
/// `retain_for_ms`/`date_modified` rather than passed in by the caller,
/// which avoids a read-then-write race.
pub async fn cancel_pending(pool: &PgPool, id: Uuid, date_cancelled: DateTime<Utc>) -> Result<bool> {
    let outcome = sqlx::query(
        "UPDATE tasks \
         SET status = 'cancelled', \
             date_cancelled = $2, \
             date_next_process = NULL, \
             retain_until_ms = CASE \
                 WHEN retain_for_ms = -1 THEN -1 \
                 WHEN retain_for_ms > 0 \
                     THEN (EXTRACT(EPOCH FROM date_modified) * 1000)::bigint + retain_for_ms \
                 ELSE NULL \
             END, \
             retain_for_ms = NULL \
         WHERE id = $1 AND status = 'pending'",
    )
    .bind(id)
    .bind(date_cancelled)
    .execute(pool)
    .await
    .context("failed to cancel task")?;

    Ok(outcome.rows_affected() > 0)
}

/// List the distinct `task_type` values with at least one persisted row.
///
/// Used on `start()` to resume dispatch for every type that has existing
/// (possibly pre-restart) work, without requiring the caller to know the
/// type set in advance.
pub async fn list_distinct_types(pool: &PgPool) -> Result<Vec<String>> {
    let rows: Vec<(String,)> =
        sqlx::query_as("SELECT DISTINCT task_type FROM tasks ORDER BY task_type")
            .fetch_all(pool)
            .await
            .context("failed to list distinct task types")?;
    Ok(rows.into_iter().map(|(t,)| t).collect())
}

/// `retry(id)`: surface a pending task at the head of the next dispatch
/// pass without touching `retries_remaining`.
///
/// Returns the task's type when a row was updated (so the caller can poke
/// that type's dispatcher without a second round trip), or `None` if the
/// task did not exist or was not eligible (not `pending`, or had no
/// `date_next_process`).
pub async fn retry_now(pool: &PgPool, id: Uuid, now: DateTime<Utc>) -> Result<Option<String>> {
    let row: Option<(String,)> = sqlx::query_as(
        "UPDATE tasks SET date_next_process = $2 \
         WHERE id = $1 AND status = 'pending' AND date_next_process IS NOT NULL \
         RETURNING task_type",
    )
    .bind(id)
    .bind(now)
    .fetch_optional(pool)
    .await
    .context("failed to retry task")?;

    Ok(row.map(|(t,)| t))
}

/// Delete terminal tasks past their `retain_until_ms`, in batches of
/// `limit`. Returns the ids removed; the caller loops until this returns
/// fewer than `limit` results.
pub async fn sweep_expired(pool: &PgPool, now_ms: i64, limit: i64) -> Result<Vec<Uuid>> {
    let rows: Vec<(Uuid,)> = sqlx::query_as(
        "WITH doomed AS ( \
             SELECT id FROM tasks \
             WHERE retain_until_ms > 0 AND retain_until_ms < $1 \
               AND status IN ('success', 'failed', 'cancelled') \
             LIMIT $2 \
         ) \
         DELETE FROM tasks WHERE id IN (SELECT id FROM doomed) \
         RETURNING id",
    )
    .bind(now_ms)
    .bind(limit)
    .fetch_all(pool)
    .await
    .context("failed to sweep expired tasks")?;

    Ok(rows.into_iter().map(|(id,)| id).collect())
}

/// An opaque pagination cursor for [`query_tasks`].
///
/// Implemented as a base64-encoded row offset rather than a keyset cursor:
/// `query()` is an operator-facing read path (not the dispatcher's
/// selection query, which has its own stable ordering in
/// [`select_next_due`]), so plain offset pagination is adequate and far
/// simpler to get right.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cursor {
    pub offset: i64,
}

impl Cursor {
    pub fn encode(self) -> String {
        base64::engine::general_purpose::STANDARD.encode(self.offset.to_string())
    }

    pub fn decode(s: &str) -> Option<Self> {
        let bytes = base64::engine::general_purpose::STANDARD.decode(s).ok()?;
        let text = String::from_utf8(bytes).ok()?;
        let offset = text.parse().ok()?;
        Some(Self { offset })
    }
}

fn sort_column(prop: SortProperty) -> &'static str {
    match prop {
        SortProperty::DateCreated => "date_created",
        SortProperty::DateModified => "date_modified",
        SortProperty::DateCompleted => "date_completed",
        SortProperty::Status => "status",
    }
}

/// Run a condition/sort/cursor/page-size query against `tasks`, returning
/// the matching page and a cursor for the next page (`None` once
/// exhausted).
pub async fn query_tasks(
    pool: &PgPool,
    condition: Option<&Condition>,
    sort: SortProperty,
    direction: SortDirection,
    cursor: Option<Cursor>,
    page_size: i64,
) -> Result<(Vec<Task>, Option<Cursor>)> {
    let offset = cursor.map(|c| c.offset).unwrap_or(0);

    let mut builder = sqlx::QueryBuilder::new("SELECT * FROM tasks");
    if let Some(condition) = condition {
        builder.push(" WHERE ");
        condition.push(&mut builder);
    }
    builder.push(" ORDER BY ");
    builder.push(sort_column(sort));
    builder.push(match direction {
        SortDirection::Asc => " ASC, id ASC",
        SortDirection::Desc => " DESC, id ASC",
    });
    builder.push(" LIMIT ");
    builder.push_bind(page_size + 1);
    builder.push(" OFFSET ");
    builder.push_bind(offset);

    let mut rows: Vec<Task> = builder
        .build_query_as()
        .fetch_all(pool)
        .await
        .context("failed to query tasks")?;

    let next_cursor = if rows.len() as i64 > page_size {
        rows.truncate(page_size as usize);
        Some(Cursor {
            offset: offset + page_size,
        })
    } else {
        None
    };

    Ok((rows, next_cursor))
}
