//! Connector configuration -- the dispatcher's tunable intervals, plus
//! validated minimums.

use std::time::Duration;

use crate::error::FieldError;

/// Construction-time configuration for the [`crate::engine::Engine`].
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Delay between successive dispatch passes for a type after one
    /// completes, so the event loop is never starved. Default 100ms.
    pub task_interval: Duration,
    /// Fallback retry delay used when a task carries no `retry_interval`
    /// of its own. Default 5000ms.
    pub retry_interval: Duration,
    /// Minimum time between retention sweeps. Default 120_000ms, floor
    /// 5000ms.
    pub cleanup_interval: Duration,
    /// Key used to look up the engine-core adapter for clone data.
    pub engine_name: String,
    /// Store key for the background-task entity storage.
    pub background_task_entity_storage_type: String,
    /// Log sink key.
    pub logging_connector_type: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            task_interval: Duration::from_millis(100),
            retry_interval: Duration::from_millis(5000),
            cleanup_interval: Duration::from_millis(120_000),
            engine_name: "engine".to_string(),
            background_task_entity_storage_type: "background-task".to_string(),
            logging_connector_type: "logging".to_string(),
        }
    }
}

impl EngineConfig {
    /// Validate the configured minimums, returning every violation found
    /// (not just the first), matching the control surface's "per-field
    /// failures" validation style.
    pub fn validate(&self) -> Result<(), Vec<FieldError>> {
        let mut errors = Vec::new();

        if self.task_interval.is_zero() {
            errors.push(FieldError::new("taskInterval", "must be >= 1ms"));
        }
        if self.retry_interval.is_zero() {
            errors.push(FieldError::new("retryInterval", "must be >= 1ms"));
        }
        if self.cleanup_interval < Duration::from_millis(5000) {
            errors.push(FieldError::new("cleanupInterval", "must be >= 5000ms"));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}
