//! Reference Consistency Engine.
//!
//! Every mutation of a Task or User runs as an ordered pipeline of named
//! steps. Validation steps run before the primary write and abort cleanly;
//! repair steps run after it and surface failures without rolling the
//! primary write back — the store offers per-document atomicity only, so
//! forward progress of the primary entity wins over perfect cross-reference
//! atomicity. [`Engine::reconcile`] recomputes every User's pending list
//! from the Tasks collection and repairs whatever that window left behind.
//!
//! List membership operations are idempotent throughout: re-applying an add
//! or remove that is already reflected is a no-op, never an error.

use parking_lot::Mutex;
use serde::Serialize;
use serde_json::json;

use crate::errors::{AppError, Result};
use crate::ids;
use crate::models::{Task, User, UNASSIGNED};
use crate::query::Filter;
use crate::store::{Collection, Patch};
use crate::validation::{TaskDraft, UserDraft};
use chrono::Utc;

/// Applies entity mutations while keeping `assignedUser` and `pendingTasks`
/// mutually consistent.
pub struct Engine {
    tasks: Collection<Task>,
    users: Collection<User>,
    /// Serializes User writes so the email uniqueness pre-check cannot race
    /// a concurrent create/update in this process.
    user_write_lock: Mutex<()>,
}

/// Outcome of a reconciliation pass.
#[derive(Debug, Clone, Serialize)]
pub struct ReconcileReport {
    pub users_checked: usize,
    pub users_repaired: usize,
    /// Ids of the Users whose pending lists were rewritten.
    pub repaired_users: Vec<String>,
}

impl Engine {
    pub fn new(tasks: Collection<Task>, users: Collection<User>) -> Self {
        Self {
            tasks,
            users,
            user_write_lock: Mutex::new(()),
        }
    }

    // =========================================================================
    // TASK MUTATIONS
    // =========================================================================

    /// Create a Task. Steps: resolve assignee → persist Task → attach to the
    /// assignee's pending list (skipped for completed tasks).
    pub fn create_task(&self, draft: TaskDraft) -> Result<Task> {
        let assignee = self.resolve_assignee(&draft.assigned_user)?;

        let now = Utc::now();
        let task = Task {
            id: ids::generate(),
            name: draft.name,
            description: draft.description,
            deadline: draft.deadline,
            completed: draft.completed,
            assigned_user: draft.assigned_user,
            assigned_user_name: assignee
                .as_ref()
                .map_or(draft.assigned_user_name, |u| u.name.clone()),
            date_created: now,
        };

        self.tasks
            .insert(&task)
            .map_err(AppError::store("creating task"))?;

        // No old side to repair on create.
        if let Some(user) = assignee {
            if !task.completed {
                self.attach_pending(&user.id, &task.id, "updating user")?;
            }
        }

        tracing::info!(task_id = %task.id, assigned = !task.assigned_user.is_empty(), "task created");
        Ok(task)
    }

    /// Update a Task. Steps: resolve assignee → persist Task → detach from
    /// the previous owner → attach to the new owner.
    pub fn update_task(&self, id: &str, draft: TaskDraft) -> Result<Task> {
        if !ids::is_valid(id) {
            return Err(AppError::TaskNotFound);
        }
        let existing = self
            .tasks
            .find_by_id(id)
            .map_err(AppError::store("finding task"))?
            .ok_or(AppError::TaskNotFound)?;

        let old_user = existing.assigned_user.clone();
        let old_completed = existing.completed;

        let assignee = self.resolve_assignee(&draft.assigned_user)?;

        let task = Task {
            id: existing.id,
            name: draft.name,
            description: draft.description,
            deadline: draft.deadline,
            completed: draft.completed,
            assigned_user: draft.assigned_user,
            assigned_user_name: assignee
                .as_ref()
                .map_or(draft.assigned_user_name, |u| u.name.clone()),
            // Immutable after creation.
            date_created: existing.date_created,
        };

        self.tasks
            .put(&task)
            .map_err(AppError::store("updating task"))?;

        // Removal step: the old owner stops listing the task when ownership
        // moved away or the task just completed.
        let ownership_moved = old_user != task.assigned_user;
        let just_completed = !old_completed && task.completed;
        if !old_user.is_empty() && (ownership_moved || just_completed) {
            self.detach_pending(&old_user, &task.id, "updating old user")?;
        }

        // Addition step, mutually exclusive branches evaluated after removal.
        let just_reopened = old_completed && !task.completed;
        if !task.assigned_user.is_empty() && !task.completed && ownership_moved {
            self.attach_pending(&task.assigned_user, &task.id, "updating new user")?;
        } else if just_reopened && !ownership_moved && !task.assigned_user.is_empty() {
            self.attach_pending(&task.assigned_user, &task.id, "updating user")?;
        }

        tracing::info!(task_id = %task.id, "task updated");
        Ok(task)
    }

    /// Delete a Task and detach it from its owner's pending list.
    pub fn delete_task(&self, id: &str) -> Result<()> {
        if !ids::is_valid(id) {
            return Err(AppError::TaskNotFound);
        }
        let removed = self
            .tasks
            .delete_by_id(id)
            .map_err(AppError::store("deleting task"))?
            .ok_or(AppError::TaskNotFound)?;

        if !removed.assigned_user.is_empty() {
            self.detach_pending(&removed.assigned_user, id, "updating user")?;
        }

        tracing::info!(task_id = %id, "task deleted");
        Ok(())
    }

    // =========================================================================
    // USER MUTATIONS
    // =========================================================================

    /// Create a User. Steps: resolve pending tasks (dropping completed ones)
    /// → check email uniqueness → persist User → pull the claimed tasks out
    /// of every other User's list → point each task at the new User.
    ///
    /// Reassignment away from a previous owner silently takes effect; last
    /// write wins.
    pub fn create_user(&self, draft: UserDraft) -> Result<User> {
        let _guard = self.user_write_lock.lock();

        let pending = self.resolve_pending(draft.pending_tasks)?;
        self.check_email_free(&draft.email, None)?;

        let user = User {
            id: ids::generate(),
            name: draft.name,
            email: draft.email,
            pending_tasks: pending.clone(),
            date_created: Utc::now(),
        };

        self.users
            .insert(&user)
            .map_err(AppError::store("creating user"))?;

        if !pending.is_empty() {
            self.claim_tasks(&user, &pending)?;
        }

        tracing::info!(user_id = %user.id, pending = pending.len(), "user created");
        Ok(user)
    }

    /// Update a User. Steps: diff old/new pending lists → resolve the added
    /// tasks (dropping completed ones) → check email collision → persist
    /// User → unassign the removed tasks → claim the added tasks.
    pub fn update_user(&self, id: &str, draft: UserDraft) -> Result<User> {
        if !ids::is_valid(id) {
            return Err(AppError::UserNotFound);
        }
        let _guard = self.user_write_lock.lock();

        let existing = self
            .users
            .find_by_id(id)
            .map_err(AppError::store("finding user"))?
            .ok_or(AppError::UserNotFound)?;

        if draft.email != existing.email {
            self.check_email_free(&draft.email, Some(id))?;
        }

        let old_pending = &existing.pending_tasks;
        let to_unassign: Vec<String> = old_pending
            .iter()
            .filter(|t| !draft.pending_tasks.contains(t))
            .cloned()
            .collect();
        let to_assign: Vec<String> = draft
            .pending_tasks
            .iter()
            .filter(|t| !old_pending.contains(t))
            .cloned()
            .collect();

        // Added ids must resolve; completed tasks are never pending and are
        // dropped from both the stored list and the claim set.
        let to_assign = self.resolve_pending(to_assign)?;
        let completed_dropped: Vec<String> = draft
            .pending_tasks
            .iter()
            .filter(|t| {
                !old_pending.contains(t) && !to_assign.contains(t)
            })
            .cloned()
            .collect();
        let new_pending: Vec<String> = draft
            .pending_tasks
            .into_iter()
            .filter(|t| !completed_dropped.contains(t))
            .collect();

        let user = User {
            id: existing.id,
            name: draft.name,
            email: draft.email,
            pending_tasks: new_pending,
            date_created: existing.date_created,
        };

        self.users
            .put(&user)
            .map_err(AppError::store("updating user"))?;

        if !to_unassign.is_empty() {
            self.tasks
                .update_many(
                    &Filter::where_id_in(&to_unassign),
                    &Patch::new()
                        .set("assignedUser", json!(""))
                        .set("assignedUserName", json!(UNASSIGNED)),
                )
                .map_err(AppError::store("updating tasks"))?;
        }

        if !to_assign.is_empty() {
            self.claim_tasks(&user, &to_assign)?;
        }

        tracing::info!(user_id = %user.id, "user updated");
        Ok(user)
    }

    /// Delete a User and bulk-unassign every Task that pointed at it.
    pub fn delete_user(&self, id: &str) -> Result<()> {
        if !ids::is_valid(id) {
            return Err(AppError::UserNotFound);
        }
        self.users
            .delete_by_id(id)
            .map_err(AppError::store("deleting user"))?
            .ok_or(AppError::UserNotFound)?;

        self.tasks
            .update_many(
                &Filter::where_eq("assignedUser", json!(id)),
                &Patch::new()
                    .set("assignedUser", json!(""))
                    .set("assignedUserName", json!(UNASSIGNED)),
            )
            .map_err(AppError::store("updating tasks"))?;

        tracing::info!(user_id = %id, "user deleted");
        Ok(())
    }

    // =========================================================================
    // RECONCILIATION
    // =========================================================================

    /// Recompute every User's `pendingTasks` from `assignedUser` across all
    /// Tasks and rewrite any User whose stored list disagrees.
    ///
    /// This is the observable recovery path for the weak-consistency window
    /// left by a repair step failing after a primary write succeeded.
    pub fn reconcile(&self) -> Result<ReconcileReport> {
        let _guard = self.user_write_lock.lock();

        let tasks = self
            .tasks
            .find(&Filter::empty())
            .map_err(AppError::store("retrieving tasks"))?;
        let users = self
            .users
            .find(&Filter::empty())
            .map_err(AppError::store("retrieving users"))?;

        let mut report = ReconcileReport {
            users_checked: users.len(),
            users_repaired: 0,
            repaired_users: Vec::new(),
        };

        for mut user in users {
            // Stored order is kept for ids that remain valid; newly
            // discovered tasks append in scan order.
            let valid: Vec<String> = user
                .pending_tasks
                .iter()
                .filter(|id| {
                    tasks
                        .iter()
                        .any(|t| t.id == **id && t.assigned_user == user.id && !t.completed)
                })
                .cloned()
                .collect();
            let mut expected = crate::validation::dedup_preserving_order(valid);
            for task in &tasks {
                if task.assigned_user == user.id && !task.completed && !expected.contains(&task.id)
                {
                    expected.push(task.id.clone());
                }
            }

            if expected != user.pending_tasks {
                tracing::warn!(
                    user_id = %user.id,
                    stored = user.pending_tasks.len(),
                    expected = expected.len(),
                    "pending list drift repaired"
                );
                user.pending_tasks = expected;
                self.users
                    .put(&user)
                    .map_err(AppError::store("updating user"))?;
                report.users_repaired += 1;
                report.repaired_users.push(user.id);
            }
        }

        Ok(report)
    }

    // =========================================================================
    // STEPS
    // =========================================================================

    /// Resolve a non-empty `assignedUser` to its User.
    fn resolve_assignee(&self, assigned_user: &str) -> Result<Option<User>> {
        if assigned_user.is_empty() {
            return Ok(None);
        }
        // Format is checked at the validation boundary.
        self.users
            .find_by_id(assigned_user)
            .map_err(AppError::store("finding user"))?
            .ok_or(AppError::AssignedUserNotFound)
            .map(Some)
    }

    /// Resolve a pending-task id list: every id must name an existing Task,
    /// and completed Tasks are dropped from the result.
    fn resolve_pending(&self, pending: Vec<String>) -> Result<Vec<String>> {
        let mut kept = Vec::with_capacity(pending.len());
        for id in pending {
            if !ids::is_valid(&id) {
                return Err(AppError::TasksNotFound);
            }
            let task = self
                .tasks
                .find_by_id(&id)
                .map_err(AppError::store("validating tasks"))?
                .ok_or(AppError::TasksNotFound)?;
            if !task.completed {
                kept.push(id);
            }
        }
        Ok(kept)
    }

    /// Email uniqueness pre-check. A collision with any other User is a bad
    /// request, mirroring what a store-level unique index would surface.
    fn check_email_free(&self, email: &str, own_id: Option<&str>) -> Result<()> {
        let holders = self
            .users
            .find(&Filter::where_eq("email", json!(email)))
            .map_err(AppError::store("checking email"))?;
        if holders.iter().any(|u| Some(u.id.as_str()) != own_id) {
            return Err(AppError::DuplicateEmail);
        }
        Ok(())
    }

    /// Idempotently add `task_id` to a User's pending list.
    ///
    /// A missing User is a no-op: the assignee existed when this request
    /// validated, and a concurrent delete wins.
    fn attach_pending(&self, user_id: &str, task_id: &str, context: &'static str) -> Result<()> {
        let Some(mut user) = self
            .users
            .find_by_id(user_id)
            .map_err(AppError::store(context))?
        else {
            tracing::warn!(user_id, task_id, "attach skipped, user missing");
            return Ok(());
        };
        if user.pending_tasks.iter().any(|t| t == task_id) {
            return Ok(());
        }
        user.pending_tasks.push(task_id.to_string());
        self.users.put(&user).map_err(AppError::store(context))
    }

    /// Idempotently remove `task_id` from a User's pending list. A missing
    /// User or an absent id is a no-op.
    fn detach_pending(&self, user_id: &str, task_id: &str, context: &'static str) -> Result<()> {
        let Some(mut user) = self
            .users
            .find_by_id(user_id)
            .map_err(AppError::store(context))?
        else {
            return Ok(());
        };
        let before = user.pending_tasks.len();
        user.pending_tasks.retain(|t| t != task_id);
        if user.pending_tasks.len() == before {
            return Ok(());
        }
        self.users.put(&user).map_err(AppError::store(context))
    }

    /// Make `owner` the single User listing `task_ids`: pull the ids from
    /// every other User, then point each Task at `owner`.
    fn claim_tasks(&self, owner: &User, task_ids: &[String]) -> Result<()> {
        self.users
            .update_many(
                &Filter::where_ne("_id", json!(owner.id)),
                &Patch::new().pull("pendingTasks", task_ids.to_vec()),
            )
            .map_err(AppError::store("updating other users"))?;

        self.tasks
            .update_many(
                &Filter::where_id_in(task_ids),
                &Patch::new()
                    .set("assignedUser", json!(owner.id))
                    .set("assignedUserName", json!(owner.name)),
            )
            .map_err(AppError::store("updating tasks"))?;
        Ok(())
    }
}
