//! Request validation and body decoding.
//!
//! Bodies arrive as raw JSON and are decoded into typed drafts here so that
//! missing or malformed fields map to the API's 400 responses instead of a
//! framework rejection. Referenced-entity existence is the engine's job;
//! this module handles shape, format, and de-duplication only.

use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use serde_json::{Map, Value};
use std::collections::HashSet;

use crate::errors::AppError;
use crate::ids;
use crate::models::UNASSIGNED;

/// Validated mutable fields of a Task, as supplied on create or update.
#[derive(Debug, Clone)]
pub struct TaskDraft {
    pub name: String,
    pub description: String,
    pub deadline: DateTime<Utc>,
    pub completed: bool,
    pub assigned_user: String,
    /// Display name from the body; the engine overwrites it with the
    /// assignee's actual name whenever `assigned_user` is non-empty.
    pub assigned_user_name: String,
}

/// Validated mutable fields of a User.
#[derive(Debug, Clone)]
pub struct UserDraft {
    pub name: String,
    pub email: String,
    /// De-duplicated, first occurrence wins.
    pub pending_tasks: Vec<String>,
}

/// Decode and validate a Task body.
pub fn task_draft(body: &Value) -> Result<TaskDraft, AppError> {
    let obj = as_object(body)?;

    let name = string_field(obj, "name");
    let deadline_raw = obj.get("deadline").filter(|v| !v.is_null());
    if name.is_empty() || deadline_raw.is_none() {
        return Err(AppError::MissingFields("Name and deadline"));
    }
    // Presence checked just above.
    let deadline = deadline_raw
        .map(parse_deadline)
        .transpose()?
        .ok_or(AppError::MissingFields("Name and deadline"))?;

    let assigned_user = string_field(obj, "assignedUser");
    if !assigned_user.is_empty() && !ids::is_valid(&assigned_user) {
        return Err(AppError::InvalidUserIdFormat);
    }

    let assigned_user_name = match string_field(obj, "assignedUserName") {
        s if s.is_empty() => UNASSIGNED.to_string(),
        s => s,
    };

    Ok(TaskDraft {
        name,
        description: string_field(obj, "description"),
        deadline,
        completed: bool_field(obj, "completed")?,
        assigned_user,
        assigned_user_name,
    })
}

/// Decode and validate a User body.
pub fn user_draft(body: &Value) -> Result<UserDraft, AppError> {
    let obj = as_object(body)?;

    let name = string_field(obj, "name");
    let email = string_field(obj, "email");
    if name.is_empty() || email.is_empty() {
        return Err(AppError::MissingFields("Name and email"));
    }

    let pending_tasks = match obj.get("pendingTasks") {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::Array(items)) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                let id = item.as_str().ok_or_else(|| {
                    AppError::InvalidBody("pendingTasks entries must be strings".to_string())
                })?;
                out.push(id.to_string());
            }
            dedup_preserving_order(out)
        }
        Some(_) => {
            return Err(AppError::InvalidBody(
                "pendingTasks must be an array".to_string(),
            ))
        }
    };

    Ok(UserDraft {
        name,
        email,
        pending_tasks,
    })
}

/// Stable de-duplication, first occurrence wins.
pub fn dedup_preserving_order(items: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    items.into_iter().filter(|id| seen.insert(id.clone())).collect()
}

fn as_object(body: &Value) -> Result<&Map<String, Value>, AppError> {
    body.as_object()
        .ok_or_else(|| AppError::InvalidBody("expected a JSON object".to_string()))
}

fn string_field(obj: &Map<String, Value>, field: &str) -> String {
    obj.get(field)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

fn bool_field(obj: &Map<String, Value>, field: &str) -> Result<bool, AppError> {
    match obj.get(field) {
        None | Some(Value::Null) => Ok(false),
        Some(Value::Bool(b)) => Ok(*b),
        Some(Value::String(s)) => Ok(s == "true"),
        Some(_) => Err(AppError::InvalidBody(format!(
            "{field} must be a boolean"
        ))),
    }
}

/// Accept RFC 3339 strings, bare dates, or integer epoch milliseconds.
fn parse_deadline(value: &Value) -> Result<DateTime<Utc>, AppError> {
    match value {
        Value::String(s) => {
            if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
                return Ok(dt.with_timezone(&Utc));
            }
            if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
                // Midnight UTC; valid for any calendar date.
                if let Some(dt) = date.and_hms_opt(0, 0, 0) {
                    return Ok(Utc.from_utc_datetime(&dt));
                }
            }
            Err(AppError::InvalidBody(format!("un-parseable deadline: {s}")))
        }
        Value::Number(n) => {
            let millis = n.as_i64().ok_or_else(|| {
                AppError::InvalidBody("deadline must be integer epoch milliseconds".to_string())
            })?;
            Utc.timestamp_millis_opt(millis).single().ok_or_else(|| {
                AppError::InvalidBody("deadline out of range".to_string())
            })
        }
        _ => Err(AppError::InvalidBody(
            "deadline must be a date string or epoch milliseconds".to_string(),
        )),
    }
}
