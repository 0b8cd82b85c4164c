//! Health and maintenance handlers.

use axum::{extract::State, response::Json};
use serde::Serialize;

use super::state::SharedState;
use super::types::{ok, Envelope};
use crate::engine::ReconcileReport;
use crate::errors::AppError;
use crate::query::Filter;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub tasks: usize,
    pub users: usize,
}

/// GET /health
pub async fn health(State(state): State<SharedState>) -> Result<Json<HealthResponse>, AppError> {
    let tasks = state
        .tasks
        .count(&Filter::empty())
        .map_err(AppError::store("counting tasks"))?;
    let users = state
        .users
        .count(&Filter::empty())
        .map_err(AppError::store("counting users"))?;

    Ok(Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        tasks,
        users,
    }))
}

/// POST /api/reconcile
///
/// Recompute `pendingTasks` from `assignedUser` across all Tasks, repairing
/// the drift a failed repair step may have left behind.
pub async fn reconcile(
    State(state): State<SharedState>,
) -> Result<Json<Envelope<ReconcileReport>>, AppError> {
    let report = state.engine.reconcile()?;
    Ok(ok(report))
}
