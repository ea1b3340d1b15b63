//! The control surface: `create`/`get`/`retry`/`cancel`/`remove`/`query`.
//!
//! Every method here is a single store round trip (plus, for the mutating
//! ones, a poke of the affected type's dispatcher); none of them run
//! handler code. Handler-execution failures never surface from these
//! methods -- they land on the task record instead (see
//! [`crate::error::StructuredError`]).

use chrono::Utc;
use serde_json::Value;
use uuid::Uuid;

use task_store::condition::Condition;
use task_store::models::{SortDirection, SortProperty, TaskView};
use task_store::queries::tasks as db;

use crate::engine::Engine;
use crate::error::{EngineError, FieldError};
use crate::id::{format_urn, parse_urn};

/// Options accepted by [`Engine::create`]. Every field is optional; absent
/// `retry_count` means unlimited retries, absent `retry_interval_ms` falls
/// back to the engine's configured default, absent `retain_for_ms` is
/// treated as `0` (remove immediately on reaching a terminal state).
#[derive(Debug, Clone, Default)]
pub struct CreateOptions {
    pub retry_count: Option<i32>,
    pub retry_interval_ms: Option<i64>,
    pub retain_for_ms: Option<i64>,
}

impl CreateOptions {
    fn validate(&self) -> Result<(), Vec<FieldError>> {
        let mut errors = Vec::new();

        if let Some(n) = self.retry_count {
            if n < 1 {
                errors.push(FieldError::new("retryCount", "must be >= 1"));
            }
        }
        if let Some(ms) = self.retry_interval_ms {
            if ms < 1 {
                errors.push(FieldError::new("retryInterval", "must be >= 1ms"));
            }
        }
        if let Some(ms) = self.retain_for_ms {
            if ms < -1 {
                errors.push(FieldError::new("retainFor", "must be -1 or >= 0"));
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

/// Options accepted by [`Engine::query`].
#[derive(Debug, Clone, Default)]
pub struct QueryOptions {
    pub task_type: Option<String>,
    pub status: Vec<task_store::models::TaskStatus>,
    pub sort_property: SortProperty,
    pub sort_direction: SortDirection,
    pub cursor: Option<String>,
    pub page_size: i64,
}

const DEFAULT_PAGE_SIZE: i64 = 50;

impl Engine {
    /// `create(type, payload?, opts?) -> id`.
    ///
    /// Validates `opts`, persists a pending task with `date_next_process =
    /// date_created`, and pokes that type's dispatcher if the engine is
    /// started. Returns the external URN.
    pub async fn create(
        &self,
        task_type: impl Into<String>,
        payload: Option<Value>,
        opts: CreateOptions,
    ) -> Result<String, EngineError> {
        opts.validate().map_err(EngineError::Validation)?;

        let task_type = task_type.into();
        let id = Uuid::new_v4();
        let now = Utc::now();
        let retain_for_ms = opts.retain_for_ms.or(Some(0));

        db::insert_pending(
            self.pool(),
            id,
            &task_type,
            payload,
            now,
            opts.retry_interval_ms,
            opts.retry_count,
            retain_for_ms,
        )
        .await
        .map_err(EngineError::Store)?;

        if self.is_started() {
            self.poke(&task_type).await;
        }

        Ok(format_urn(id))
    }

    /// `get(id) -> TaskView?`. `None` both when the id does not exist and
    /// (implicitly, via the caller's URN parse) when the namespace doesn't
    /// match -- the latter is instead surfaced as
    /// [`EngineError::NamespaceMismatch`] before any store call is made.
    pub async fn get(&self, urn: &str) -> Result<Option<TaskView>, EngineError> {
        let id = parse_urn(urn)?;
        let task = db::get_task(self.pool(), id).await.map_err(EngineError::Store)?;
        Ok(task.map(|t| t.to_view(urn.to_string())))
    }

    /// `retry(id)`. Only acts on a pending task with a `date_next_process`
    /// set; no-ops otherwise. Pokes the task's type dispatcher on success so
    /// the retried task is considered on the very next pass.
    pub async fn retry(&self, urn: &str) -> Result<(), EngineError> {
        let id = parse_urn(urn)?;
        let now = Utc::now();
        let poked_type = db::retry_now(self.pool(), id, now).await.map_err(EngineError::Store)?;
        if let Some(task_type) = poked_type {
            if self.is_started() {
                self.poke(&task_type).await;
            }
        }
        Ok(())
    }

    /// `cancel(id)`. Only acts on a pending task: transitions it to
    /// `cancelled`, computing `retain_until_ms` from its existing
    /// `date_modified` (cancellation does not bump it). A task already
    /// `processing` is left untouched -- cancellation cannot interrupt a
    /// running handler.
    pub async fn cancel(&self, urn: &str) -> Result<(), EngineError> {
        let id = parse_urn(urn)?;
        let now = Utc::now();
        db::cancel_pending(self.pool(), id, now).await.map_err(EngineError::Store)?;
        Ok(())
    }

    /// `remove(id)`. Unconditional delete, subject only to namespace match.
    pub async fn remove(&self, urn: &str) -> Result<(), EngineError> {
        let id = parse_urn(urn)?;
        db::remove_task(self.pool(), id).await.map_err(EngineError::Store)?;
        Ok(())
    }

    /// `query(type?, status?, sortProperty?, sortDirection?, cursor?,
    /// pageSize?) -> (views, cursor?)`.
    ///
    /// Builds `AND(type = ?, OR(status = s for s in filter))` and forwards
    /// to the store's condition language; an empty `status` filter omits
    /// the `OR` clause entirely.
    pub async fn query(
        &self,
        opts: QueryOptions,
    ) -> Result<(Vec<TaskView>, Option<String>), EngineError> {
        let mut clauses = Vec::new();
        if let Some(task_type) = &opts.task_type {
            clauses.push(Condition::eq_type(task_type.clone()));
        }
        if let Some(status_condition) = Condition::any_status(&opts.status) {
            clauses.push(status_condition);
        }

        let condition = match clauses.len() {
            0 => None,
            1 => clauses.into_iter().next(),
            _ => Some(Condition::And(clauses)),
        };

        let cursor = opts
            .cursor
            .as_deref()
            .and_then(db::Cursor::decode);

        let page_size = if opts.page_size > 0 {
            opts.page_size
        } else {
            DEFAULT_PAGE_SIZE
        };

        let (tasks, next_cursor) = db::query_tasks(
            self.pool(),
            condition.as_ref(),
            opts.sort_property,
            opts.sort_direction,
            cursor,
            page_size,
        )
        .await
        .map_err(EngineError::Store)?;

        let views = tasks
            .into_iter()
            .map(|t| {
                let urn = format_urn(t.id);
                t.to_view(urn)
            })
            .collect();

        Ok((views, next_cursor.map(|c| c.encode())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_retry_count_below_one() {
        let opts = CreateOptions {
            retry_count: Some(0),
            ..Default::default()
        };
        let errors = opts.validate().unwrap_err();
        assert_eq!(errors[0].field, "retryCount");
    }

    #[test]
    fn rejects_retry_interval_below_one_ms() {
        let opts = CreateOptions {
            retry_interval_ms: Some(0),
            ..Default::default()
        };
        let errors = opts.validate().unwrap_err();
        assert_eq!(errors[0].field, "retryInterval");
    }

    #[test]
    fn rejects_retain_for_below_minus_one() {
        let opts = CreateOptions {
            retain_for_ms: Some(-2),
            ..Default::default()
        };
        let errors = opts.validate().unwrap_err();
        assert_eq!(errors[0].field, "retainFor");
    }

    #[test]
    fn accepts_every_legal_boundary() {
        let opts = CreateOptions {
            retry_count: Some(1),
            retry_interval_ms: Some(1),
            retain_for_ms: Some(-1),
        };
        assert!(opts.validate().is_ok());

        let opts = CreateOptions {
            retain_for_ms: Some(0),
            ..Default::default()
        };
        assert!(opts.validate().is_ok());
    }

    #[test]
    fn default_options_are_valid() {
        assert!(CreateOptions::default().validate().is_ok());
    }
}
