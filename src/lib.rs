//! Taskboard Library
//!
//! A query-and-mutate HTTP API over two collections, Tasks and Users, whose
//! core is the reference consistency engine: every create/update/delete of
//! either entity recomputes and applies the minimal set of cross-entity
//! writes keeping `assignedUser` and `pendingTasks` mutually correct.
//!
//! The persistence layer offers per-document atomicity only; multi-step
//! mutations run as ordered write sequences with an observable
//! reconciliation pass for the resulting weak-consistency window.

pub mod config;
pub mod engine;
pub mod errors;
pub mod handlers;
pub mod ids;
pub mod models;
pub mod query;
pub mod store;
pub mod validation;

// Re-export dependencies so tests use the same versions
pub use chrono;
pub use serde_json;
