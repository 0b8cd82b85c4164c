//! Persisted entity types for the two collections.
//!
//! Field names on the wire follow the upstream document convention:
//! `_id`, `assignedUser`, `assignedUserName`, `pendingTasks`, `dateCreated`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::store::Document;

/// Display name a Task carries while no User is assigned.
pub const UNASSIGNED: &str = "unassigned";

/// A unit of work, optionally assigned to one User.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    #[serde(rename = "_id")]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub deadline: DateTime<Utc>,
    #[serde(default)]
    pub completed: bool,
    /// Empty string when unassigned, otherwise a User id.
    #[serde(rename = "assignedUser", default)]
    pub assigned_user: String,
    /// Denormalized display copy of the assigned User's name.
    #[serde(rename = "assignedUserName", default = "default_assigned_user_name")]
    pub assigned_user_name: String,
    /// Set once at creation, immutable thereafter.
    #[serde(rename = "dateCreated")]
    pub date_created: DateTime<Utc>,
}

fn default_assigned_user_name() -> String {
    UNASSIGNED.to_string()
}

impl Task {
    /// A Task is pending while assigned and not completed.
    pub fn is_pending(&self) -> bool {
        !self.assigned_user.is_empty() && !self.completed
    }
}

/// An account that Tasks can be assigned to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    #[serde(rename = "_id")]
    pub id: String,
    pub name: String,
    /// Globally unique.
    pub email: String,
    /// Ids of assigned, not-yet-completed Tasks. No duplicates.
    #[serde(rename = "pendingTasks", default)]
    pub pending_tasks: Vec<String>,
    #[serde(rename = "dateCreated")]
    pub date_created: DateTime<Utc>,
}

impl Document for Task {
    const COLLECTION: &'static str = "tasks";

    fn id(&self) -> &str {
        &self.id
    }
}

impl Document for User {
    const COLLECTION: &'static str = "users";

    fn id(&self) -> &str {
        &self.id
    }
}
