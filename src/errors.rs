//! API error types and the uniform `{message, data}` envelope mapping.
//!
//! Validation errors are detected before any write wherever feasible. Once
//! the primary write of a multi-step mutation has succeeded, repair-step
//! failures still surface as [`AppError::Store`] but the primary write
//! stands; the reconciliation pass recovers the cross-reference drift.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::{json, Value};
use std::fmt;

/// Application error types with HTTP status mapping.
#[derive(Debug)]
pub enum AppError {
    // Bad request (400)
    /// Un-parseable `where`/`sort`/`select` parameter or unsupported operator.
    InvalidQuery(String),
    /// Request body that is not a decodable entity payload.
    InvalidBody(String),
    /// Missing required entity fields; carries the human-readable field list.
    MissingFields(&'static str),
    /// `assignedUser` supplied with a syntactically invalid identifier.
    InvalidUserIdFormat,
    /// User email collides with another User.
    DuplicateEmail,

    // Not found (404)
    TaskNotFound,
    UserNotFound,
    /// `assignedUser` is well-formed but resolves to no User.
    AssignedUserNotFound,
    /// One or more `pendingTasks` ids resolve to no Task.
    TasksNotFound,

    // Store failure (500)
    /// Unexpected persistence failure; `context` names the operation.
    Store {
        context: &'static str,
        source: anyhow::Error,
    },
}

impl AppError {
    /// Wrap a store-level failure, naming the operation for the response.
    pub fn store(context: &'static str) -> impl FnOnce(anyhow::Error) -> Self {
        move |source| Self::Store { context, source }
    }

    /// HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidQuery(_)
            | Self::InvalidBody(_)
            | Self::MissingFields(_)
            | Self::InvalidUserIdFormat
            | Self::DuplicateEmail => StatusCode::BAD_REQUEST,

            Self::TaskNotFound
            | Self::UserNotFound
            | Self::AssignedUserNotFound
            | Self::TasksNotFound => StatusCode::NOT_FOUND,

            Self::Store { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Human-readable message for the response envelope.
    pub fn message(&self) -> String {
        match self {
            Self::InvalidQuery(_) => "Bad request - Invalid query parameters".to_string(),
            Self::InvalidBody(_) => "Bad request - Invalid request body".to_string(),
            Self::MissingFields(fields) => format!("Bad request - {fields} are required"),
            Self::InvalidUserIdFormat => "Bad request - Invalid user ID format".to_string(),
            Self::DuplicateEmail => "Bad request - Email already exists".to_string(),
            Self::TaskNotFound => "Task not found".to_string(),
            Self::UserNotFound => "User not found".to_string(),
            Self::AssignedUserNotFound => "Assigned user not found".to_string(),
            Self::TasksNotFound => "One or more tasks not found".to_string(),
            Self::Store { context, .. } => format!("Error {context}"),
        }
    }

    /// Error detail carried in the envelope's `data` field.
    ///
    /// An empty object for client errors without useful detail, the
    /// underlying error text otherwise.
    pub fn data(&self) -> Value {
        match self {
            Self::InvalidQuery(detail) | Self::InvalidBody(detail) => json!(detail),
            Self::Store { source, .. } => json!(source.to_string()),
            _ => json!({}),
        }
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message())
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        if let Self::Store { context, source } = &self {
            tracing::error!(context, error = %source, "store operation failed");
        }
        let body = json!({
            "message": self.message(),
            "data": self.data(),
        });
        (self.status_code(), Json(body)).into_response()
    }
}

/// Type alias for Results using AppError.
pub type Result<T> = std::result::Result<T, AppError>;
