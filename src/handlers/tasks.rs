//! Task collection handlers.

use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    http::StatusCode,
    response::Json,
};
use serde::Deserialize;
use serde_json::Value;

use super::state::SharedState;
use super::types::{ok, with_message, Envelope};
use crate::errors::AppError;
use crate::ids;
use crate::models::Task;
use crate::query::{self, ListParams, Projection, QueryOutcome, QueryPlan};
use crate::validation;

/// `select` is the only parameter honored on single-entity reads.
#[derive(Debug, Default, Deserialize)]
pub struct SelectParams {
    pub select: Option<String>,
}

/// GET /api/tasks
pub async fn list_tasks(
    State(state): State<SharedState>,
    Query(params): Query<ListParams>,
) -> Result<Json<Envelope<Value>>, AppError> {
    let plan = QueryPlan::parse(&params, Some(state.config.task_page_limit))?;
    if plan.short_circuit_empty {
        return Ok(ok(plan.empty_payload()));
    }

    let docs = state
        .tasks
        .find_values(&plan.filter)
        .map_err(AppError::store("retrieving tasks"))?;

    match query::execute(&plan, docs) {
        QueryOutcome::Count(n) => Ok(ok(Value::from(n))),
        QueryOutcome::Documents(docs) => {
            // A scalar-id lookup that misses is a 404, unlike an empty
            // multi-value result.
            if docs.is_empty() && plan.by_scalar_id {
                return Err(AppError::TaskNotFound);
            }
            Ok(ok(Value::Array(docs)))
        }
    }
}

/// POST /api/tasks
pub async fn create_task(
    State(state): State<SharedState>,
    body: Result<Json<Value>, JsonRejection>,
) -> Result<(StatusCode, Json<Envelope<Task>>), AppError> {
    let Json(body) = body.map_err(|e| AppError::InvalidBody(e.to_string()))?;
    let draft = validation::task_draft(&body)?;
    let task = state.engine.create_task(draft)?;
    Ok((StatusCode::CREATED, with_message("Task created", task)))
}

/// GET /api/tasks/{id}
pub async fn get_task(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    Query(params): Query<SelectParams>,
) -> Result<Json<Envelope<Value>>, AppError> {
    if !ids::is_valid(&id) {
        return Err(AppError::TaskNotFound);
    }
    let projection = match &params.select {
        Some(raw) => Projection::parse(
            &serde_json::from_str(raw).map_err(|e| AppError::InvalidQuery(e.to_string()))?,
        )?,
        None => Projection::All,
    };

    let doc = state
        .tasks
        .find_value_by_id(&id)
        .map_err(AppError::store("retrieving task"))?
        .ok_or(AppError::TaskNotFound)?;
    Ok(ok(projection.apply(doc)))
}

/// PUT /api/tasks/{id}
pub async fn update_task(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    body: Result<Json<Value>, JsonRejection>,
) -> Result<Json<Envelope<Task>>, AppError> {
    let Json(body) = body.map_err(|e| AppError::InvalidBody(e.to_string()))?;
    let draft = validation::task_draft(&body)?;
    let task = state.engine.update_task(&id, draft)?;
    Ok(with_message("Task updated", task))
}

/// DELETE /api/tasks/{id}
pub async fn delete_task(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<StatusCode, AppError> {
    state.engine.delete_task(&id)?;
    Ok(StatusCode::NO_CONTENT)
}
