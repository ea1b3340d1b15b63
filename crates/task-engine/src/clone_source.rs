//! The engine-core clone-data adapter: an opaque snapshot produced by an
//! external component, passed as the handler's first argument so a handler
//! process can rebuild its environment.
//!
//! This connector has no opinion on what that snapshot contains; it only
//! needs *something* to pass along. [`NullCloneDataSource`] is the default
//! when no engine-core adapter is wired in.

use async_trait::async_trait;

#[async_trait]
pub trait CloneDataSource: Send + Sync {
    async fn clone_data(&self) -> serde_json::Value;
}

/// The default clone-data source: produces `null`. Used when the engine is
/// constructed without an explicit engine-core adapter.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullCloneDataSource;

#[async_trait]
impl CloneDataSource for NullCloneDataSource {
    async fn clone_data(&self) -> serde_json::Value {
        serde_json::Value::Null
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn null_source_yields_null() {
        let source = NullCloneDataSource;
        assert_eq!(source.clone_data().await, serde_json::Value::Null);
    }
}
