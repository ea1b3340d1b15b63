//! Error kinds for the background-task connector.
//!
//! Two distinct error shapes exist here:
//!
//! - [`EngineError`] is the Rust-level error returned synchronously from
//!   control-surface calls (`validationError`, `namespaceMismatch`, and a
//!   catch-all for store/transport failures).
//! - [`StructuredError`] is the serializable shape persisted on
//!   `Task::error` -- it is never returned synchronously; it is written by
//!   the dispatcher after a handler invocation fails.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::id::IdError;

/// A single field-level validation failure, as surfaced by `create`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldError {
    pub field: &'static str,
    pub message: String,
}

impl FieldError {
    pub fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

/// Errors returned synchronously by the control surface.
///
/// Never includes handler-execution failures -- those are captured on the
/// task record (see [`StructuredError`]) and never surfaced from `create`.
#[derive(Debug, Error)]
pub enum EngineError {
    /// One or more `create` options failed validation. Rejected before any
    /// persistence happens.
    #[error("validation error: {0:?}")]
    Validation(Vec<FieldError>),

    /// The URN was well-formed but addressed a different connector's
    /// namespace.
    #[error(transparent)]
    NamespaceMismatch(#[from] IdError),

    /// A failure in the underlying entity store that the control surface
    /// could not recover from (the dispatcher's own store failures are
    /// logged and retried, never surfaced this way).
    #[error("entity store error: {0}")]
    Store(#[from] anyhow::Error),
}

/// The serializable error shape persisted on `Task::error`:
/// `{name, source, message, stack?, inner?}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructuredError {
    pub name: String,
    pub source: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub stack: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub inner: Option<Box<StructuredError>>,
}

/// The `name` the worker adapter writes when the worker process itself
/// faulted (as opposed to the handler returning a domain error cleanly).
/// The dispatcher unwraps one level of `inner` exactly when it sees this
/// name.
pub const WORKER_EXCEPTION_NAME: &str = "WorkerException";

impl StructuredError {
    /// Build a plain domain error (`generalError(source, messageKey)`).
    pub fn general(source: impl Into<String>, message_key: impl Into<String>) -> Self {
        Self {
            name: "GeneralError".to_string(),
            source: source.into(),
            message: message_key.into(),
            stack: None,
            inner: None,
        }
    }

    /// Build the wrapper a worker adapter emits when the worker process
    /// itself faulted, optionally carrying the handler's own error as the
    /// inner cause.
    pub fn worker_exception(source: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: WORKER_EXCEPTION_NAME.to_string(),
            source: source.into(),
            message: message.into(),
            stack: None,
            inner: None,
        }
    }

    pub fn with_inner(mut self, inner: StructuredError) -> Self {
        self.inner = Some(Box::new(inner));
        self
    }

    /// Normalize this error for storage on a task: if it is a
    /// `WorkerException` carrying an inner cause, unwrap one level (the
    /// inner cause becomes the stored error). Deeper nesting within that
    /// inner cause is preserved verbatim.
    pub fn normalize(self) -> Self {
        if self.name == WORKER_EXCEPTION_NAME {
            if let Some(inner) = self.inner {
                return *inner;
            }
        }
        self
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_unwraps_worker_exception_with_inner() {
        let inner = StructuredError::general("handler", "boom");
        let outer = StructuredError::worker_exception("worker-runtime", "worker crashed")
            .with_inner(inner.clone());
        assert_eq!(outer.normalize(), inner);
    }

    #[test]
    fn normalize_leaves_bare_worker_exception_alone() {
        let outer = StructuredError::worker_exception("worker-runtime", "worker crashed");
        assert_eq!(outer.clone().normalize(), outer);
    }

    #[test]
    fn normalize_leaves_general_error_alone() {
        let err = StructuredError::general("handler", "boom");
        assert_eq!(err.clone().normalize(), err);
    }

    #[test]
    fn normalize_preserves_deeper_nesting() {
        let deepest = StructuredError::general("handler", "root cause");
        let middle = StructuredError::general("lib", "mid").with_inner(deepest.clone());
        let outer = StructuredError::worker_exception("worker-runtime", "crash")
            .with_inner(middle.clone());
        assert_eq!(outer.normalize(), middle);
        assert_eq!(outer.normalize().inner.unwrap().as_ref(), &deepest);
    }
}
