//! HTTP API handlers, organized by domain.

pub mod health;
pub mod router;
pub mod state;
pub mod tasks;
pub mod types;
pub mod users;

pub use router::build_router;
pub use state::{AppState, SharedState};
