//! The worker runtime adapter: an external collaborator that executes a
//! named `module`+`method` in an isolated worker and returns either a
//! result or a structured error.
//!
//! This crate only depends on the adapter trait; concrete adapters are
//! swappable. [`InProcessWorkerAdapter`] runs handlers as plain async
//! closures in-process (used in tests and for embedding the engine
//! directly into a binary that also hosts its own handlers).
//! [`ProcessWorkerAdapter`] shells out to a subprocess per invocation, for
//! a standalone out-of-process worker deployment.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::sync::Mutex;

use crate::error::StructuredError;

/// A handler invocation's outcome, as returned by a [`WorkerAdapter`].
pub type WorkerResult = Result<serde_json::Value, StructuredError>;

/// Adapter interface for executing a registered handler.
///
/// `clone_data` is the opaque snapshot from the engine-core adapter (see
/// [`crate::engine::CloneDataSource`]); `payload` is the task's own input,
/// absent when the task was created without one.
#[async_trait]
pub trait WorkerAdapter: Send + Sync {
    async fn exec(
        &self,
        module: &str,
        method: &str,
        clone_data: serde_json::Value,
        payload: Option<serde_json::Value>,
    ) -> WorkerResult;
}

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// A handler function: takes clone data and an optional payload, returns a
/// result or a structured error.
pub type HandlerFn = Arc<
    dyn Fn(serde_json::Value, Option<serde_json::Value>) -> BoxFuture<'static, WorkerResult>
        + Send
        + Sync,
>;

/// An in-process worker adapter keyed by `(module, method)`.
///
/// Handlers run as plain async closures on the current runtime -- there is
/// no process isolation. Intended for tests and for embedding the engine
/// directly into a single binary.
#[derive(Default, Clone)]
pub struct InProcessWorkerAdapter {
    handlers: Arc<Mutex<HashMap<(String, String), HandlerFn>>>,
}

impl InProcessWorkerAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler function for `module`/`method`.
    pub async fn register<F, Fut>(&self, module: impl Into<String>, method: impl Into<String>, f: F)
    where
        F: Fn(serde_json::Value, Option<serde_json::Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = WorkerResult> + Send + 'static,
    {
        let boxed: HandlerFn = Arc::new(move |clone_data, payload| Box::pin(f(clone_data, payload)));
        self.handlers
            .lock()
            .await
            .insert((module.into(), method.into()), boxed);
    }
}

#[async_trait]
impl WorkerAdapter for InProcessWorkerAdapter {
    async fn exec(
        &self,
        module: &str,
        method: &str,
        clone_data: serde_json::Value,
        payload: Option<serde_json::Value>,
    ) -> WorkerResult {
        let handler = {
            let handlers = self.handlers.lock().await;
            handlers.get(&(module.to_string(), method.to_string())).cloned()
        };

        match handler {
            Some(f) => f(clone_data, payload).await,
            None => Err(StructuredError::worker_exception(
                "in-process-worker",
                format!("no handler registered for {module}::{method}"),
            )),
        }
    }
}

/// A worker adapter that shells out to `<base_dir>/<module>` with `method`
/// as its sole argument, writing `{"cloneData": ..., "payload": ...}` as
/// JSON to stdin and expecting a single JSON value on stdout.
///
/// A non-zero exit or invalid JSON on stdout is reported as a
/// `WorkerException` -- the worker process itself faulted, as distinct
/// from a handler returning an application-level error -- with stderr
/// captured as the message.
pub struct ProcessWorkerAdapter {
    base_dir: std::path::PathBuf,
}

impl ProcessWorkerAdapter {
    pub fn new(base_dir: impl Into<std::path::PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }
}

#[async_trait]
impl WorkerAdapter for ProcessWorkerAdapter {
    async fn exec(
        &self,
        module: &str,
        method: &str,
        clone_data: serde_json::Value,
        payload: Option<serde_json::Value>,
    ) -> WorkerResult {
        let program = self.base_dir.join(module);
        let stdin_payload = serde_json::json!({ "cloneData": clone_data, "payload": payload });

        let mut child = Command::new(&program)
            .arg(method)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| {
                StructuredError::worker_exception(
                    "process-worker",
                    format!("failed to spawn {}: {e}", program.display()),
                )
            })?;

        if let Some(mut stdin) = child.stdin.take() {
            let bytes = serde_json::to_vec(&stdin_payload).unwrap_or_default();
            if stdin.write_all(&bytes).await.is_err() {
                // The child may have exited already; surface via wait_with_output below.
            }
        }

        let output = child.wait_with_output().await.map_err(|e| {
            StructuredError::worker_exception(
                "process-worker",
                format!("failed to wait on {}: {e}", program.display()),
            )
        })?;

        if !output.status.success() {
            return Err(StructuredError::worker_exception(
                module,
                format!(
                    "{module}::{method} exited with {}: {}",
                    output.status,
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            ));
        }

        serde_json::from_slice::<serde_json::Value>(&output.stdout).map_err(|e| {
            StructuredError::worker_exception(
                module,
                format!("{module}::{method} produced invalid JSON on stdout: {e}"),
            )
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn in_process_adapter_invokes_registered_handler() {
        let adapter = InProcessWorkerAdapter::new();
        adapter
            .register("mailer", "send", |_clone, payload| async move {
                Ok(serde_json::json!({ "sent": true, "to": payload }))
            })
            .await;

        let result = adapter
            .exec(
                "mailer",
                "send",
                serde_json::Value::Null,
                Some(serde_json::json!("alice@example.com")),
            )
            .await
            .unwrap();

        assert_eq!(result["sent"], serde_json::json!(true));
    }

    #[tokio::test]
    async fn in_process_adapter_missing_handler_is_worker_exception() {
        let adapter = InProcessWorkerAdapter::new();
        let err = adapter
            .exec("nope", "method", serde_json::Value::Null, None)
            .await
            .unwrap_err();
        assert_eq!(err.name, crate::error::WORKER_EXCEPTION_NAME);
    }

    #[tokio::test]
    async fn in_process_adapter_propagates_handler_error() {
        let adapter = InProcessWorkerAdapter::new();
        adapter
            .register("t", "m", |_clone, _payload| async move {
                Err(StructuredError::general("Test", "boom"))
            })
            .await;

        let err = adapter
            .exec("t", "m", serde_json::Value::Null, None)
            .await
            .unwrap_err();
        assert_eq!(err.name, "GeneralError");
        assert_eq!(err.message, "boom");
    }
}
