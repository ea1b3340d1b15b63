//! The dispatcher and task-execution core.
//!
//! One logical dispatcher per task type, realized here as one long-lived
//! tokio task per type: a [`tokio::sync::Notify`] carries every "poke"
//! (registration, `create`, explicit `retry`, `start`, and the dispatcher's
//! own tail re-arm), and single-flight-per-type falls directly out of
//! having exactly one task driving each type's passes -- no separate
//! in-flight marker is needed, unlike an event-loop language where
//! `processTasks` can be re-entered from a fresh call stack before a prior
//! invocation's awaited promise settles.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::Utc;
use sqlx::PgPool;
use tokio::sync::{Mutex, Notify, RwLock};
use tokio::task::JoinHandle;
use uuid::Uuid;

use task_store::models::{Task, TaskStatus};
use task_store::queries::tasks as db;

use crate::clone_source::{CloneDataSource, NullCloneDataSource};
use crate::config::EngineConfig;
use crate::error::FieldError;
use crate::handler::HandlerRegistry;
use crate::retention;
use crate::worker::WorkerAdapter;

struct EngineInner {
    pool: PgPool,
    config: EngineConfig,
    handlers: HandlerRegistry,
    worker: Arc<dyn WorkerAdapter>,
    clone_source: RwLock<Arc<dyn CloneDataSource>>,
    started: AtomicBool,
    notifies: Mutex<HashMap<String, Arc<Notify>>>,
    dispatch_tasks: Mutex<HashMap<String, JoinHandle<()>>>,
    last_sweep: Mutex<Option<chrono::DateTime<Utc>>>,
}

/// The durable background-task connector.
///
/// Cheap to clone (an `Arc` around the shared state); clone it to hand a
/// handle to a spawned task or an HTTP handler.
pub struct Engine {
    inner: Arc<EngineInner>,
}

impl Clone for Engine {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl Engine {
    /// Construct a new, not-yet-started engine. No dispatch happens until
    /// [`Engine::start`] is called, preventing `create` calls made while
    /// the caller is still wiring up dependencies from triggering work
    /// early.
    pub fn new(
        pool: PgPool,
        worker: Arc<dyn WorkerAdapter>,
        config: EngineConfig,
    ) -> Result<Self, Vec<FieldError>> {
        config.validate()?;
        Ok(Self {
            inner: Arc::new(EngineInner {
                pool,
                config,
                handlers: HandlerRegistry::new(),
                worker,
                clone_source: RwLock::new(Arc::new(NullCloneDataSource)),
                started: AtomicBool::new(false),
                notifies: Mutex::new(HashMap::new()),
                dispatch_tasks: Mutex::new(HashMap::new()),
                last_sweep: Mutex::new(None),
            }),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    pub(crate) fn pool(&self) -> &PgPool {
        &self.inner.pool
    }

    /// Swap in an engine-core clone-data adapter. Safe to call at any time;
    /// takes effect on the next task execution.
    pub async fn set_clone_source(&self, source: Arc<dyn CloneDataSource>) {
        *self.inner.clone_source.write().await = source;
    }

    /// Register (or replace) the handler binding for a task type. Pokes
    /// that type's dispatcher immediately if the engine is started.
    pub async fn register_handler(
        &self,
        task_type: impl Into<String>,
        module: impl Into<String>,
        method: impl Into<String>,
    ) {
        let task_type = task_type.into();
        self.inner
            .handlers
            .register(task_type.clone(), crate::handler::HandlerBinding::new(module, method))
            .await;
        if self.inner.started.load(Ordering::Acquire) {
            self.poke(&task_type).await;
        }
    }

    /// Remove the handler binding for a task type. In-flight work for that
    /// type is not cancelled; future dispatches for it become no-ops until
    /// a handler is registered again.
    pub async fn unregister_handler(&self, task_type: &str) {
        self.inner.handlers.unregister(task_type).await;
    }

    /// Become eligible to dispatch. Resumes every task type with existing
    /// rows (giving at-least-once semantics across restarts: a task found
    /// `processing` is simply re-selected by the next pass) and runs an
    /// initial retention sweep.
    pub async fn start(&self, node_identity: impl Into<String>) -> anyhow::Result<()> {
        let node_identity = node_identity.into();
        self.inner.started.store(true, Ordering::Release);
        tracing::info!(node = %node_identity, "engine started");

        let types = db::list_distinct_types(&self.inner.pool).await?;
        for task_type in types {
            self.poke(&task_type).await;
        }
        self.maybe_sweep().await;
        Ok(())
    }

    /// Stop dispatching. Cancels every type's pending wake by simply
    /// letting its dispatcher task fall back to waiting on a poke;
    /// in-flight worker calls are not aborted.
    pub fn stop(&self, node_identity: impl Into<String>) {
        self.inner.started.store(false, Ordering::Release);
        tracing::info!(node = %node_identity.into(), "engine stopped");
    }

    pub fn is_started(&self) -> bool {
        self.inner.started.load(Ordering::Acquire)
    }

    /// Re-evaluate the dispatcher for `task_type`. Ensures a dispatcher
    /// task exists for that type (spawning one on first use) and wakes it.
    pub(crate) async fn poke(&self, task_type: &str) {
        let (notify, just_created) = {
            let mut notifies = self.inner.notifies.lock().await;
            if let Some(existing) = notifies.get(task_type) {
                (existing.clone(), false)
            } else {
                let notify = Arc::new(Notify::new());
                notifies.insert(task_type.to_string(), notify.clone());
                (notify, true)
            }
        };

        if just_created {
            let engine = self.clone();
            let owned_type = task_type.to_string();
            let notify_for_task = notify.clone();
            let handle = tokio::spawn(async move {
                engine.run_type_dispatcher(owned_type, notify_for_task).await;
            });
            self.inner
                .dispatch_tasks
                .lock()
                .await
                .insert(task_type.to_string(), handle);
        }

        notify.notify_one();
    }

    /// The per-type dispatcher loop. Runs forever: each iteration is one
    /// dispatch pass, followed by waiting for either the computed delay or
    /// a fresh poke, whichever comes first.
    async fn run_type_dispatcher(self, task_type: String, notify: Arc<Notify>) {
        loop {
            if !self.inner.started.load(Ordering::Acquire) {
                notify.notified().await;
                continue;
            }

            match self.dispatch_pass(&task_type).await {
                Ok(Some(wait)) => {
                    tokio::select! {
                        _ = tokio::time::sleep(wait) => {}
                        _ = notify.notified() => {}
                    }
                }
                Ok(None) => {
                    notify.notified().await;
                }
                Err(e) => {
                    tracing::error!(task_type = %task_type, error = %e, "dispatch pass failed; retrying after task_interval");
                    tokio::select! {
                        _ = tokio::time::sleep(self.inner.config.task_interval) => {}
                        _ = notify.notified() => {}
                    }
                }
            }
        }
    }

    /// One dispatch pass for a single task type.
    ///
    /// Returns `Some(delay)` when the caller should wait `delay` (or a
    /// poke, whichever is sooner) before the next pass -- either because a
    /// task just ran and the loop re-arms after `task_interval`, or because
    /// the next due task isn't due yet. Returns `None` when there is
    /// nothing to do and the caller should simply wait for the next poke.
    async fn dispatch_pass(&self, task_type: &str) -> anyhow::Result<Option<Duration>> {
        let next = db::select_next_due(&self.inner.pool, task_type).await?;

        let Some(next) = next else {
            self.maybe_sweep().await;
            return Ok(None);
        };

        let now = Utc::now();
        let due_at = next.date_next_process.unwrap_or(now);
        let remaining = due_at - now;

        if remaining <= chrono::Duration::zero() {
            self.process_task(next).await;
            Ok(Some(self.inner.config.task_interval))
        } else {
            Ok(Some(remaining.to_std().unwrap_or(Duration::from_millis(1))))
        }
    }

    /// Claim and run a single due task against its registered handler.
    async fn process_task(&self, task: Task) {
        let task_id = task.id;
        let task_type = task.task_type.clone();

        let Some(binding) = self.inner.handlers.get(&task_type).await else {
            tracing::info!(task_id = %task_id, task_type = %task_type, "no handler registered; task stays pending");
            return;
        };

        let marked_at = Utc::now();
        if let Err(e) = db::mark_processing(&self.inner.pool, task_id, marked_at).await {
            tracing::error!(task_id = %task_id, error = %e, "failed to mark task processing; will retry next pass");
            return;
        }

        let clone_data = self.inner.clone_source.read().await.clone_data().await;
        let payload = task.payload.clone();

        let outcome = self
            .inner
            .worker
            .exec(&binding.module, &binding.method, clone_data, payload)
            .await;

        match outcome {
            Ok(result) => self.finish_success(task_id, task.retain_for_ms, result).await,
            Err(raw_error) => {
                self.finish_error(
                    task_id,
                    task.retain_for_ms,
                    task.retries_remaining,
                    task.retry_interval_ms,
                    raw_error,
                )
                .await
            }
        }
    }

    async fn finish_success(
        &self,
        task_id: Uuid,
        retain_for_ms: Option<i64>,
        result: serde_json::Value,
    ) {
        if retain_for_ms == Some(0) {
            if let Err(e) = db::remove_task(&self.inner.pool, task_id).await {
                tracing::error!(task_id = %task_id, error = %e, "failed to remove task after immediate-retention success");
            }
            return;
        }

        let completed_at = Utc::now();
        let retain_until =
            retention::calculate_retain_timestamp(TaskStatus::Success, retain_for_ms, completed_at);

        if let Err(e) = db::complete_success(
            &self.inner.pool,
            task_id,
            Some(result),
            completed_at,
            completed_at,
            retain_until,
        )
        .await
        {
            tracing::error!(task_id = %task_id, error = %e, "failed to persist successful task outcome");
        }
    }

    async fn finish_error(
        &self,
        task_id: Uuid,
        retain_for_ms: Option<i64>,
        retries_remaining: Option<i32>,
        retry_interval_ms: Option<i64>,
        raw_error: crate::error::StructuredError,
    ) {
        let normalized = raw_error.normalize();
        let error_json = normalized.to_json();
        let date_modified = Utc::now();

        match retries_remaining {
            Some(0) => {
                let retain_until = retention::calculate_retain_timestamp(
                    TaskStatus::Failed,
                    retain_for_ms,
                    date_modified,
                );
                if retain_for_ms == Some(0) {
                    // Still need to record the error before deleting so any
                    // concurrent reader briefly observing the row sees it
                    // failed, then remove it.
                    let _ = db::fail_terminal(
                        &self.inner.pool,
                        task_id,
                        error_json,
                        date_modified,
                        date_modified,
                        None,
                    )
                    .await;
                    if let Err(e) = db::remove_task(&self.inner.pool, task_id).await {
                        tracing::error!(task_id = %task_id, error = %e, "failed to remove task after immediate-retention failure");
                    }
                    return;
                }
                if let Err(e) = db::fail_terminal(
                    &self.inner.pool,
                    task_id,
                    error_json,
                    date_modified,
                    date_modified,
                    retain_until,
                )
                .await
                {
                    tracing::error!(task_id = %task_id, error = %e, "failed to persist terminal task failure");
                }
            }
            remaining => {
                let interval = retry_interval_ms
                    .map(|ms| chrono::Duration::milliseconds(ms))
                    .unwrap_or_else(|| {
                        chrono::Duration::from_std(self.inner.config.retry_interval)
                            .unwrap_or(chrono::Duration::milliseconds(5000))
                    });
                let next_process = date_modified + interval;
                let next_remaining = remaining.map(|n| n - 1);

                if let Err(e) = db::schedule_retry(
                    &self.inner.pool,
                    task_id,
                    error_json,
                    date_modified,
                    next_process,
                    next_remaining,
                )
                .await
                {
                    tracing::error!(task_id = %task_id, error = %e, "failed to schedule task retry");
                }
            }
        }
    }

    async fn maybe_sweep(&self) {
        let now = Utc::now();
        let mut last = self.inner.last_sweep.lock().await;
        let due = match *last {
            None => true,
            Some(prev) => {
                now - prev
                    >= chrono::Duration::from_std(self.inner.config.cleanup_interval)
                        .unwrap_or(chrono::Duration::zero())
            }
        };
        if !due {
            return;
        }
        *last = Some(now);
        drop(last);

        match retention::sweep(&self.inner.pool, now).await {
            Ok(0) => {}
            Ok(n) => tracing::info!(removed = n, "retention sweep removed expired tasks"),
            Err(e) => tracing::warn!(error = %e, "retention sweep failed; will retry next cycle"),
        }
    }
}
