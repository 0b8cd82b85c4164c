//! Shared response types: the uniform `{message, data}` envelope.

use axum::Json;
use serde::Serialize;

/// Every non-empty response carries a message and a payload.
#[derive(Debug, Serialize)]
pub struct Envelope<T> {
    pub message: String,
    pub data: T,
}

/// `200`-style envelope with the standard "OK" message.
pub fn ok<T: Serialize>(data: T) -> Json<Envelope<T>> {
    with_message("OK", data)
}

/// Envelope with an explicit message ("Task created", "User updated", ...).
pub fn with_message<T: Serialize>(message: &str, data: T) -> Json<Envelope<T>> {
    Json(Envelope {
        message: message.to_string(),
        data,
    })
}
