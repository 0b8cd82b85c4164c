//! User collection handlers.

use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    http::StatusCode,
    response::Json,
};
use serde_json::Value;

use super::state::SharedState;
use super::tasks::SelectParams;
use super::types::{ok, with_message, Envelope};
use crate::errors::AppError;
use crate::ids;
use crate::models::User;
use crate::query::{self, ListParams, Projection, QueryOutcome, QueryPlan};
use crate::validation;

/// GET /api/users
pub async fn list_users(
    State(state): State<SharedState>,
    Query(params): Query<ListParams>,
) -> Result<Json<Envelope<Value>>, AppError> {
    // Users default to an unbounded page.
    let plan = QueryPlan::parse(&params, None)?;
    if plan.short_circuit_empty {
        return Ok(ok(plan.empty_payload()));
    }

    let docs = state
        .users
        .find_values(&plan.filter)
        .map_err(AppError::store("retrieving users"))?;

    match query::execute(&plan, docs) {
        QueryOutcome::Count(n) => Ok(ok(Value::from(n))),
        QueryOutcome::Documents(docs) => {
            if docs.is_empty() && plan.by_scalar_id {
                return Err(AppError::UserNotFound);
            }
            Ok(ok(Value::Array(docs)))
        }
    }
}

/// POST /api/users
pub async fn create_user(
    State(state): State<SharedState>,
    body: Result<Json<Value>, JsonRejection>,
) -> Result<(StatusCode, Json<Envelope<User>>), AppError> {
    let Json(body) = body.map_err(|e| AppError::InvalidBody(e.to_string()))?;
    let draft = validation::user_draft(&body)?;
    let user = state.engine.create_user(draft)?;
    Ok((StatusCode::CREATED, with_message("User created", user)))
}

/// GET /api/users/{id}
pub async fn get_user(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    Query(params): Query<SelectParams>,
) -> Result<Json<Envelope<Value>>, AppError> {
    if !ids::is_valid(&id) {
        return Err(AppError::UserNotFound);
    }
    let projection = match &params.select {
        Some(raw) => Projection::parse(
            &serde_json::from_str(raw).map_err(|e| AppError::InvalidQuery(e.to_string()))?,
        )?,
        None => Projection::All,
    };

    let doc = state
        .users
        .find_value_by_id(&id)
        .map_err(AppError::store("retrieving user"))?
        .ok_or(AppError::UserNotFound)?;
    Ok(ok(projection.apply(doc)))
}

/// PUT /api/users/{id}
pub async fn update_user(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    body: Result<Json<Value>, JsonRejection>,
) -> Result<Json<Envelope<User>>, AppError> {
    let Json(body) = body.map_err(|e| AppError::InvalidBody(e.to_string()))?;
    let draft = validation::user_draft(&body)?;
    let user = state.engine.update_user(&id, draft)?;
    Ok(with_message("User updated", user))
}

/// DELETE /api/users/{id}
pub async fn delete_user(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<StatusCode, AppError> {
    state.engine.delete_user(&id)?;
    Ok(StatusCode::NO_CONTENT)
}
