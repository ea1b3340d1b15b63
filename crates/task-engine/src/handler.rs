//! Handler registry: maps a task type to the handler that processes it.
//!
//! Handler bindings are a runtime concern, not part of the durable record:
//! they must be re-established after every restart, so this is a plain
//! in-memory map, not a store-backed table.

use std::collections::HashMap;

use tokio::sync::RwLock;

/// A `(module, method)` pair a task type is bound to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandlerBinding {
    pub module: String,
    pub method: String,
}

impl HandlerBinding {
    pub fn new(module: impl Into<String>, method: impl Into<String>) -> Self {
        Self {
            module: module.into(),
            method: method.into(),
        }
    }
}

/// Mutation is rare (registration happens at startup, occasionally at
/// runtime); dispatch lookups happen on every pass. An async `RwLock` fits
/// since the registry is shared across tasks via `Arc<Engine>`.
#[derive(Debug, Default)]
pub struct HandlerRegistry {
    bindings: RwLock<HashMap<String, HandlerBinding>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) the handler binding for a task type.
    pub async fn register(&self, task_type: impl Into<String>, binding: HandlerBinding) {
        self.bindings.write().await.insert(task_type.into(), binding);
    }

    /// Remove the handler binding for a task type.
    ///
    /// In-flight work for that type is not cancelled; future dispatch
    /// passes will simply find no handler and skip the task (see
    /// [`crate::engine::Engine::process_task`]).
    pub async fn unregister(&self, task_type: &str) {
        self.bindings.write().await.remove(task_type);
    }

    /// Look up the handler binding for a task type.
    pub async fn get(&self, task_type: &str) -> Option<HandlerBinding> {
        self.bindings.read().await.get(task_type).cloned()
    }

    /// Number of registered bindings.
    pub async fn len(&self) -> usize {
        self.bindings.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.bindings.read().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn register_then_get() {
        let registry = HandlerRegistry::new();
        registry
            .register("send-email", HandlerBinding::new("mailer", "send"))
            .await;

        let binding = registry.get("send-email").await.unwrap();
        assert_eq!(binding.module, "mailer");
        assert_eq!(binding.method, "send");
    }

    #[tokio::test]
    async fn get_missing_is_none() {
        let registry = HandlerRegistry::new();
        assert!(registry.get("nope").await.is_none());
    }

    #[tokio::test]
    async fn register_replaces_existing() {
        let registry = HandlerRegistry::new();
        registry
            .register("t", HandlerBinding::new("mod-a", "method-a"))
            .await;
        registry
            .register("t", HandlerBinding::new("mod-b", "method-b"))
            .await;

        let binding = registry.get("t").await.unwrap();
        assert_eq!(binding.module, "mod-b");
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn unregister_removes_binding() {
        let registry = HandlerRegistry::new();
        registry
            .register("t", HandlerBinding::new("mod-a", "method-a"))
            .await;
        registry.unregister("t").await;
        assert!(registry.get("t").await.is_none());
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn unregister_missing_is_a_no_op() {
        let registry = HandlerRegistry::new();
        registry.unregister("nope").await;
        assert!(registry.is_empty().await);
    }
}
