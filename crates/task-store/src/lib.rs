//! Postgres-backed persistence for background tasks.
//!
//! This crate owns the `Task` row shape, the migrations that create it, and
//! every query the engine issues against it. It has no opinion on the
//! dispatcher, retry policy, or handler registry -- those live in
//! `task-engine`.

pub mod condition;
pub mod config;
pub mod models;
pub mod pool;
pub mod queries;
