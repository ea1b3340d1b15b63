//! The query-condition language the control surface's `query` operation
//! builds against: equality, less-than, greater-than, and `AND`/`OR`
//! composition over a small set of queryable [`Task`](crate::models::Task)
//! columns.

use sqlx::{Postgres, QueryBuilder};

use crate::models::TaskStatus;

/// A queryable column. Kept narrow and closed (not an arbitrary column
/// name) so every condition is guaranteed to bind against a real, indexed
/// column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    TaskType,
    Status,
    RetainUntilMs,
}

impl Field {
    fn column(self) -> &'static str {
        match self {
            Self::TaskType => "task_type",
            Self::Status => "status",
            Self::RetainUntilMs => "retain_until_ms",
        }
    }
}

/// A bound value for a [`Condition`] leaf.
#[derive(Debug, Clone)]
pub enum Value {
    Text(String),
    Status(TaskStatus),
    I64(i64),
}

/// A condition tree: equality/less-than/greater-than leaves composed with
/// `AND`/`OR`.
#[derive(Debug, Clone)]
pub enum Condition {
    Eq(Field, Value),
    Lt(Field, Value),
    Gt(Field, Value),
    And(Vec<Condition>),
    Or(Vec<Condition>),
}

impl Condition {
    pub fn eq_type(task_type: impl Into<String>) -> Self {
        Self::Eq(Field::TaskType, Value::Text(task_type.into()))
    }

    pub fn eq_status(status: TaskStatus) -> Self {
        Self::Eq(Field::Status, Value::Status(status))
    }

    /// `OR` together an equality condition per status, matching the
    /// control surface's "status ∈ filter" query semantics.
    pub fn any_status(statuses: &[TaskStatus]) -> Option<Self> {
        match statuses {
            [] => None,
            [single] => Some(Self::eq_status(*single)),
            many => Some(Self::Or(many.iter().copied().map(Self::eq_status).collect())),
        }
    }

    /// Append `self` as a parenthesized SQL predicate to `builder`,
    /// binding every leaf value as a placeholder.
    pub fn push(&self, builder: &mut QueryBuilder<'_, Postgres>) {
        match self {
            Self::Eq(field, value) => push_leaf(builder, field.column(), "=", value),
            Self::Lt(field, value) => push_leaf(builder, field.column(), "<", value),
            Self::Gt(field, value) => push_leaf(builder, field.column(), ">", value),
            Self::And(parts) => push_group(builder, parts, " AND "),
            Self::Or(parts) => push_group(builder, parts, " OR "),
        }
    }
}

fn push_leaf(builder: &mut QueryBuilder<'_, Postgres>, column: &str, op: &str, value: &Value) {
    builder.push(column).push(op);
    match value {
        Value::Text(s) => {
            builder.push_bind(s.clone());
        }
        Value::Status(status) => {
            builder.push_bind(*status);
        }
        Value::I64(n) => {
            builder.push_bind(*n);
        }
    }
}

fn push_group(builder: &mut QueryBuilder<'_, Postgres>, parts: &[Condition], glue: &str) {
    builder.push("(");
    for (i, part) in parts.iter().enumerate() {
        if i > 0 {
            builder.push(glue);
        }
        part.push(builder);
    }
    builder.push(")");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn any_status_empty_is_none() {
        assert!(Condition::any_status(&[]).is_none());
    }

    #[test]
    fn any_status_single_is_eq() {
        let cond = Condition::any_status(&[TaskStatus::Pending]).unwrap();
        assert!(matches!(cond, Condition::Eq(Field::Status, Value::Status(TaskStatus::Pending))));
    }

    #[test]
    fn any_status_many_is_or() {
        let cond =
            Condition::any_status(&[TaskStatus::Pending, TaskStatus::Processing]).unwrap();
        match cond {
            Condition::Or(parts) => assert_eq!(parts.len(), 2),
            other => panic!("expected Or, got {other:?}"),
        }
    }

    #[test]
    fn compose_and_of_type_and_status() {
        let cond = Condition::And(vec![
            Condition::eq_type("my-type"),
            Condition::any_status(&[TaskStatus::Pending, TaskStatus::Processing]).unwrap(),
        ]);
        let mut builder = QueryBuilder::<Postgres>::new("SELECT * FROM tasks WHERE ");
        cond.push(&mut builder);
        let sql = builder.sql();
        assert!(sql.contains("task_type="));
        assert!(sql.contains(" OR "));
        assert!(sql.contains(" AND "));
    }
}
