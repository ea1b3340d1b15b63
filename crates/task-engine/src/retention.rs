//! Retention timestamp calculation and the retention sweeper that deletes
//! terminal tasks once their retention window has elapsed.

use anyhow::Result;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use task_store::models::TaskStatus;
use task_store::queries::tasks as db;

/// Pure function: derive `retain_until_ms` for a task entering a terminal
/// state, given its status and the `retain_for`/`date_modified` it carries
/// at that moment.
///
/// - Not terminal: `None`.
/// - `retain_for` absent: `None`.
/// - `retain_for > 0`: `date_modified + retain_for` (ms epoch).
/// - `retain_for == -1`: `Some(-1)` (never expire).
/// - Otherwise (including `0`): `None` (caller deletes immediately instead).
pub fn calculate_retain_timestamp(
    status: TaskStatus,
    retain_for_ms: Option<i64>,
    date_modified: DateTime<Utc>,
) -> Option<i64> {
    if !status.is_terminal() {
        return None;
    }
    match retain_for_ms {
        None => None,
        Some(-1) => Some(-1),
        Some(n) if n > 0 => Some(date_modified.timestamp_millis() + n),
        Some(_) => None,
    }
}

/// Page size for a single sweep batch.
const SWEEP_PAGE_SIZE: i64 = 500;

/// Delete every terminal task past its `retain_until_ms`, paginating in
/// batches of [`SWEEP_PAGE_SIZE`] until a batch comes back short.
///
/// Errors from the store are swallowed here (the caller logs); the next
/// sweep retries. `retain_until_ms = -1` is excluded by the `> 0` filter in
/// the underlying query; `retain_until_ms == now` is retained (strict
/// less-than).
pub async fn sweep(pool: &PgPool, now: DateTime<Utc>) -> Result<usize> {
    let now_ms = now.timestamp_millis();
    let mut total = 0usize;
    loop {
        let removed = db::sweep_expired(pool, now_ms, SWEEP_PAGE_SIZE).await?;
        let count = removed.len();
        total += count;
        if (count as i64) < SWEEP_PAGE_SIZE {
            break;
        }
    }
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts(ms: i64) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(ms).unwrap()
    }

    #[test]
    fn non_terminal_status_is_never_retained() {
        assert_eq!(
            calculate_retain_timestamp(TaskStatus::Pending, Some(10_000), ts(0)),
            None
        );
        assert_eq!(
            calculate_retain_timestamp(TaskStatus::Processing, Some(-1), ts(0)),
            None
        );
    }

    #[test]
    fn absent_retain_for_is_none() {
        assert_eq!(calculate_retain_timestamp(TaskStatus::Success, None, ts(0)), None);
    }

    #[test]
    fn positive_retain_for_adds_to_date_modified() {
        assert_eq!(
            calculate_retain_timestamp(TaskStatus::Success, Some(10_000), ts(5_000)),
            Some(15_000)
        );
    }

    #[test]
    fn minus_one_means_forever() {
        assert_eq!(
            calculate_retain_timestamp(TaskStatus::Failed, Some(-1), ts(5_000)),
            Some(-1)
        );
    }

    #[test]
    fn zero_means_immediate_removal_not_retention() {
        assert_eq!(calculate_retain_timestamp(TaskStatus::Cancelled, Some(0), ts(5_000)), None);
    }
}
