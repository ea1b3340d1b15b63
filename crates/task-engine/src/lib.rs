//! The background-task connector: id handling, structured errors, the
//! handler registry, the worker adapter trait, the per-type dispatcher and
//! retry state machine, the retention sweeper, and the control surface.

pub mod clone_source;
pub mod config;
pub mod control;
pub mod engine;
pub mod error;
pub mod handler;
pub mod id;
pub mod retention;
pub mod worker;

pub use clone_source::{CloneDataSource, NullCloneDataSource};
pub use config::EngineConfig;
pub use control::{CreateOptions, QueryOptions};
pub use engine::Engine;
pub use error::{EngineError, FieldError, StructuredError};
pub use handler::{HandlerBinding, HandlerRegistry};
pub use id::{format_urn, parse_urn, IdError};
pub use worker::{InProcessWorkerAdapter, ProcessWorkerAdapter, WorkerAdapter, WorkerResult};
