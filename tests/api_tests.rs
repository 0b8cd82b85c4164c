//! End-to-end tests for the HTTP API.
//!
//! Each test drives the axum router directly with `tower::ServiceExt::oneshot`
//! against a fresh temp-dir store, covering the query translator, the
//! validators, and the reference consistency engine through the wire surface.
//!
//! Run with: `cargo test --test api_tests`

use std::sync::Arc;

use axum::{
    body::Body,
    http::{Method, Request, StatusCode},
    Router,
};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tempfile::TempDir;
use tower::ServiceExt;

use taskboard::config::ServerConfig;
use taskboard::handlers::{build_router, AppState, SharedState};

// ═══════════════════════════════════════════════════════════════════════
// Test infrastructure
// ═══════════════════════════════════════════════════════════════════════

/// Self-contained harness with a fresh temp directory per test.
struct Harness {
    app: Router,
    state: SharedState,
    _dir: TempDir,
}

impl Harness {
    fn new() -> Self {
        Self::with_config(|_| {})
    }

    fn with_config(customize: impl FnOnce(&mut ServerConfig)) -> Self {
        let dir = TempDir::new().expect("create temp dir");
        let mut config = ServerConfig {
            storage_path: dir.path().to_path_buf(),
            ..ServerConfig::default()
        };
        customize(&mut config);
        let state = Arc::new(AppState::new(config).expect("create AppState"));
        Self {
            app: build_router(state.clone()),
            state,
            _dir: dir,
        }
    }

    async fn send(&self, req: Request<Body>) -> (StatusCode, Value) {
        let resp = self.app.clone().oneshot(req).await.expect("send request");
        let status = resp.status();
        let bytes = resp
            .into_body()
            .collect()
            .await
            .expect("collect body")
            .to_bytes();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).expect("parse body")
        };
        (status, body)
    }

    async fn get(&self, uri: &str) -> (StatusCode, Value) {
        self.send(
            Request::builder()
                .method(Method::GET)
                .uri(uri)
                .body(Body::empty())
                .unwrap(),
        )
        .await
    }

    async fn post(&self, uri: &str, body: Value) -> (StatusCode, Value) {
        self.send(json_request(Method::POST, uri, body)).await
    }

    async fn put(&self, uri: &str, body: Value) -> (StatusCode, Value) {
        self.send(json_request(Method::PUT, uri, body)).await
    }

    async fn delete(&self, uri: &str) -> (StatusCode, Value) {
        self.send(
            Request::builder()
                .method(Method::DELETE)
                .uri(uri)
                .body(Body::empty())
                .unwrap(),
        )
        .await
    }

    // ── domain helpers ──

    async fn create_task(&self, body: Value) -> Value {
        let (status, body) = self.post("/api/tasks", body).await;
        assert_eq!(status, StatusCode::CREATED, "create task: {body}");
        body["data"].clone()
    }

    async fn create_user(&self, body: Value) -> Value {
        let (status, body) = self.post("/api/users", body).await;
        assert_eq!(status, StatusCode::CREATED, "create user: {body}");
        body["data"].clone()
    }

    async fn pending_of(&self, user_id: &str) -> Vec<String> {
        let (status, body) = self.get(&format!("/api/users/{user_id}")).await;
        assert_eq!(status, StatusCode::OK);
        body["data"]["pendingTasks"]
            .as_array()
            .expect("pendingTasks array")
            .iter()
            .map(|v| v.as_str().unwrap().to_string())
            .collect()
    }

    async fn task(&self, task_id: &str) -> Value {
        let (status, body) = self.get(&format!("/api/tasks/{task_id}")).await;
        assert_eq!(status, StatusCode::OK);
        body["data"].clone()
    }
}

fn json_request(method: Method, uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(serde_json::to_vec(&body).unwrap()))
        .unwrap()
}

fn task_body(name: &str) -> Value {
    json!({"name": name, "deadline": "2026-09-01T00:00:00Z"})
}

fn id_of(entity: &Value) -> String {
    entity["_id"].as_str().expect("_id").to_string()
}

// ═══════════════════════════════════════════════════════════════════════
// Task CRUD
// ═══════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn create_task_applies_defaults() {
    let h = Harness::new();
    let task = h.create_task(task_body("write report")).await;

    assert_eq!(task["assignedUser"], "");
    assert_eq!(task["assignedUserName"], "unassigned");
    assert_eq!(task["completed"], false);
    assert_eq!(task["description"], "");
    assert!(task["dateCreated"].is_string());

    let fetched = h.task(&id_of(&task)).await;
    assert_eq!(fetched["name"], "write report");
}

#[tokio::test]
async fn create_task_requires_name_and_deadline() {
    let h = Harness::new();
    let (status, body) = h.post("/api/tasks", json!({"name": "no deadline"})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "Bad request - Name and deadline are required");
}

#[tokio::test]
async fn create_task_rejects_bad_assignee() {
    let h = Harness::new();

    let mut body = task_body("t");
    body["assignedUser"] = json!("not-a-valid-id");
    let (status, resp) = h.post("/api/tasks", body).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(resp["message"], "Bad request - Invalid user ID format");

    let mut body = task_body("t");
    body["assignedUser"] = json!("0123456789abcdef01234567"); // well-formed, absent
    let (status, resp) = h.post("/api/tasks", body).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(resp["message"], "Assigned user not found");
}

#[tokio::test]
async fn get_task_by_malformed_id_is_404() {
    let h = Harness::new();
    let (status, _) = h.get("/api/tasks/bad-id").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn update_task_preserves_date_created() {
    let h = Harness::new();
    let task = h.create_task(task_body("original")).await;
    let id = id_of(&task);

    let (status, body) = h
        .put(
            &format!("/api/tasks/{id}"),
            json!({"name": "renamed", "deadline": "2026-10-01T00:00:00Z"}),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "Task updated");
    assert_eq!(body["data"]["name"], "renamed");
    assert_eq!(body["data"]["dateCreated"], task["dateCreated"]);
}

#[tokio::test]
async fn delete_task_returns_204_with_empty_body() {
    let h = Harness::new();
    let id = id_of(&h.create_task(task_body("short-lived")).await);

    let (status, body) = h.delete(&format!("/api/tasks/{id}")).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    assert!(body.is_null());

    let (status, _) = h.get(&format!("/api/tasks/{id}")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

// ═══════════════════════════════════════════════════════════════════════
// User CRUD
// ═══════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn create_user_enforces_unique_email() {
    let h = Harness::new();
    h.create_user(json!({"name": "Ann", "email": "a@x.com"})).await;

    let (status, body) = h
        .post("/api/users", json!({"name": "Other Ann", "email": "a@x.com"}))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "Bad request - Email already exists");
}

#[tokio::test]
async fn create_user_requires_name_and_email() {
    let h = Harness::new();
    let (status, body) = h.post("/api/users", json!({"email": "a@x.com"})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "Bad request - Name and email are required");
}

#[tokio::test]
async fn update_user_rejects_email_collision() {
    let h = Harness::new();
    h.create_user(json!({"name": "Ann", "email": "a@x.com"})).await;
    let bob = h.create_user(json!({"name": "Bob", "email": "b@x.com"})).await;

    let (status, body) = h
        .put(
            &format!("/api/users/{}", id_of(&bob)),
            json!({"name": "Bob", "email": "a@x.com"}),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "Bad request - Email already exists");

    // Re-submitting one's own email is not a collision.
    let (status, _) = h
        .put(
            &format!("/api/users/{}", id_of(&bob)),
            json!({"name": "Robert", "email": "b@x.com"}),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn user_pending_tasks_must_exist() {
    let h = Harness::new();
    let (status, body) = h
        .post(
            "/api/users",
            json!({
                "name": "Ann",
                "email": "a@x.com",
                "pendingTasks": ["0123456789abcdef01234567"],
            }),
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["message"], "One or more tasks not found");
}

// ═══════════════════════════════════════════════════════════════════════
// Reference consistency through the API
// ═══════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn assigning_on_create_updates_pending_list() {
    let h = Harness::new();
    let user = h.create_user(json!({"name": "Ann", "email": "a@x.com"})).await;
    let user_id = id_of(&user);

    let mut body = task_body("assigned work");
    body["assignedUser"] = json!(user_id.clone());
    let task = h.create_task(body).await;

    assert_eq!(task["assignedUserName"], "Ann");
    assert_eq!(h.pending_of(&user_id).await, vec![id_of(&task)]);
}

#[tokio::test]
async fn completed_task_is_never_pending() {
    let h = Harness::new();
    let user = h.create_user(json!({"name": "Ann", "email": "a@x.com"})).await;
    let user_id = id_of(&user);

    let mut body = task_body("already done");
    body["assignedUser"] = json!(user_id.clone());
    body["completed"] = json!(true);
    let task = h.create_task(body).await;

    assert_eq!(task["assignedUser"], user_id);
    assert!(h.pending_of(&user_id).await.is_empty());
}

#[tokio::test]
async fn reassigning_a_task_moves_it_between_users() {
    let h = Harness::new();
    let x = id_of(&h.create_user(json!({"name": "X", "email": "x@x.com"})).await);
    let y = id_of(&h.create_user(json!({"name": "Y", "email": "y@x.com"})).await);

    let mut body = task_body("shared work");
    body["assignedUser"] = json!(x.clone());
    let task_id = id_of(&h.create_task(body).await);

    let mut body = task_body("shared work");
    body["assignedUser"] = json!(y.clone());
    let (status, resp) = h.put(&format!("/api/tasks/{task_id}"), body).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(resp["data"]["assignedUserName"], "Y");

    assert!(h.pending_of(&x).await.is_empty());
    assert_eq!(h.pending_of(&y).await, vec![task_id]);
}

#[tokio::test]
async fn completing_and_reopening_a_task_toggles_pending_membership() {
    let h = Harness::new();
    let user_id = id_of(&h.create_user(json!({"name": "Ann", "email": "a@x.com"})).await);

    let mut body = task_body("toggled");
    body["assignedUser"] = json!(user_id.clone());
    let task_id = id_of(&h.create_task(body).await);

    // Complete: leaves the pending list, keeps the assignment.
    let mut body = task_body("toggled");
    body["assignedUser"] = json!(user_id.clone());
    body["completed"] = json!(true);
    h.put(&format!("/api/tasks/{task_id}"), body).await;

    assert!(h.pending_of(&user_id).await.is_empty());
    assert_eq!(h.task(&task_id).await["assignedUser"], user_id);

    // Reopen with the same assignee: re-added.
    let mut body = task_body("toggled");
    body["assignedUser"] = json!(user_id.clone());
    body["completed"] = json!(false);
    h.put(&format!("/api/tasks/{task_id}"), body).await;

    assert_eq!(h.pending_of(&user_id).await, vec![task_id]);
}

#[tokio::test]
async fn creating_a_user_claims_tasks_from_previous_owners() {
    let h = Harness::new();
    let z = id_of(&h.create_user(json!({"name": "Z", "email": "z@x.com"})).await);

    let mut body = task_body("t1");
    body["assignedUser"] = json!(z.clone());
    let t1 = id_of(&h.create_task(body).await);
    let t2 = id_of(&h.create_task(task_body("t2")).await);

    let ann = h
        .create_user(json!({
            "name": "Ann",
            "email": "a@x.com",
            "pendingTasks": [t1.clone(), t2.clone()],
        }))
        .await;
    let ann_id = id_of(&ann);

    assert!(h.pending_of(&z).await.is_empty());
    assert_eq!(h.pending_of(&ann_id).await, vec![t1.clone(), t2.clone()]);
    for task_id in [&t1, &t2] {
        let task = h.task(task_id).await;
        assert_eq!(task["assignedUser"], ann_id);
        assert_eq!(task["assignedUserName"], "Ann");
    }
}

#[tokio::test]
async fn updating_a_user_applies_the_pending_diff() {
    let h = Harness::new();
    let t1 = id_of(&h.create_task(task_body("t1")).await);
    let t2 = id_of(&h.create_task(task_body("t2")).await);
    let t3 = id_of(&h.create_task(task_body("t3")).await);

    let user = h
        .create_user(json!({
            "name": "Ann",
            "email": "a@x.com",
            "pendingTasks": [t1.clone(), t2.clone()],
        }))
        .await;
    let user_id = id_of(&user);

    let (status, _) = h
        .put(
            &format!("/api/users/{user_id}"),
            json!({
                "name": "Ann",
                "email": "a@x.com",
                "pendingTasks": [t2.clone(), t3.clone()],
            }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    assert_eq!(h.pending_of(&user_id).await, vec![t2.clone(), t3.clone()]);
    assert_eq!(h.task(&t1).await["assignedUser"], "");
    assert_eq!(h.task(&t1).await["assignedUserName"], "unassigned");
    assert_eq!(h.task(&t2).await["assignedUser"], user_id);
    assert_eq!(h.task(&t3).await["assignedUser"], user_id);
}

#[tokio::test]
async fn reissuing_an_identical_user_update_changes_nothing() {
    let h = Harness::new();
    let t1 = id_of(&h.create_task(task_body("t1")).await);
    let user = h
        .create_user(json!({
            "name": "Ann",
            "email": "a@x.com",
            "pendingTasks": [t1.clone()],
        }))
        .await;
    let user_id = id_of(&user);

    let update = json!({"name": "Ann", "email": "a@x.com", "pendingTasks": [t1.clone()]});
    for _ in 0..2 {
        let (status, _) = h.put(&format!("/api/users/{user_id}"), update.clone()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(h.pending_of(&user_id).await, vec![t1.clone()]);
        assert_eq!(h.task(&t1).await["assignedUser"], user_id);
    }
}

#[tokio::test]
async fn deleting_a_user_bulk_unassigns_its_tasks() {
    let h = Harness::new();
    let user_id = id_of(&h.create_user(json!({"name": "Ann", "email": "a@x.com"})).await);

    let mut task_ids = Vec::new();
    for name in ["t1", "t2", "t3"] {
        let mut body = task_body(name);
        body["assignedUser"] = json!(user_id.clone());
        task_ids.push(id_of(&h.create_task(body).await));
    }

    let (status, _) = h.delete(&format!("/api/users/{user_id}")).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    for task_id in &task_ids {
        let task = h.task(task_id).await;
        assert_eq!(task["assignedUser"], "");
        assert_eq!(task["assignedUserName"], "unassigned");
    }
    let (status, _) = h.get(&format!("/api/users/{user_id}")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn deleting_a_task_detaches_it_from_its_owner() {
    let h = Harness::new();
    let user_id = id_of(&h.create_user(json!({"name": "Ann", "email": "a@x.com"})).await);

    let mut body = task_body("doomed");
    body["assignedUser"] = json!(user_id.clone());
    let task_id = id_of(&h.create_task(body).await);

    let (status, _) = h.delete(&format!("/api/tasks/{task_id}")).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    assert!(h.pending_of(&user_id).await.is_empty());
}

// ═══════════════════════════════════════════════════════════════════════
// Query translator through the API
// ═══════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn in_filter_tolerates_malformed_ids() {
    let h = Harness::new();
    let task_id = id_of(&h.create_task(task_body("findable")).await);

    let uri = format!(
        "/api/tasks?where={}",
        urlencode(&format!(r#"{{"_id":{{"$in":["bad-id","{task_id}"]}}}}"#))
    );
    let (status, body) = h.get(&uri).await;
    assert_eq!(status, StatusCode::OK);
    let data = body["data"].as_array().unwrap();
    assert_eq!(data.len(), 1);
    assert_eq!(data[0]["_id"], task_id);
}

#[tokio::test]
async fn in_filter_of_only_malformed_ids_short_circuits() {
    let h = Harness::new();
    h.create_task(task_body("present")).await;

    let uri = format!(
        "/api/tasks?where={}",
        urlencode(r#"{"_id":{"$in":["bad","worse"]}}"#)
    );
    let (status, body) = h.get(&uri).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"], json!([]));

    let (status, body) = h.get(&format!("{uri}&count=true")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"], json!(0));
}

#[tokio::test]
async fn scalar_id_miss_is_404_but_empty_set_is_200() {
    let h = Harness::new();
    h.create_task(task_body("present")).await;

    let absent = "0123456789abcdef01234567";
    let uri = format!("/api/tasks?where={}", urlencode(&format!(r#"{{"_id":"{absent}"}}"#)));
    let (status, body) = h.get(&uri).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["message"], "Task not found");

    let uri = format!(
        "/api/tasks?where={}",
        urlencode(&format!(r#"{{"_id":{{"$in":["{absent}"]}}}}"#))
    );
    let (status, body) = h.get(&uri).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"], json!([]));
}

#[tokio::test]
async fn invalid_where_json_is_a_400() {
    let h = Harness::new();
    let (status, body) = h.get(&format!("/api/tasks?where={}", urlencode("{oops"))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "Bad request - Invalid query parameters");
}

#[tokio::test]
async fn count_mode_respects_skip_and_limit() {
    let h = Harness::new();
    for i in 0..5 {
        h.create_task(task_body(&format!("task {i}"))).await;
    }

    let (status, body) = h.get("/api/tasks?count=true").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"], json!(5));

    let (_, body) = h.get("/api/tasks?count=true&skip=1&limit=2").await;
    assert_eq!(body["data"], json!(2));

    let (_, body) = h.get("/api/tasks?count=true&skip=4").await;
    assert_eq!(body["data"], json!(1));
}

#[tokio::test]
async fn sort_and_projection_shape_the_page() {
    let h = Harness::new();
    for name in ["charlie", "alpha", "bravo"] {
        h.create_task(task_body(name)).await;
    }

    let uri = format!(
        "/api/tasks?sort={}&select={}",
        urlencode(r#"{"name":-1}"#),
        urlencode(r#"{"name":1,"_id":0}"#)
    );
    let (status, body) = h.get(&uri).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body["data"],
        json!([{"name": "charlie"}, {"name": "bravo"}, {"name": "alpha"}])
    );
}

#[tokio::test]
async fn task_lists_use_the_default_page_limit() {
    let h = Harness::with_config(|c| c.task_page_limit = 2);
    for i in 0..4 {
        h.create_task(task_body(&format!("task {i}"))).await;
    }

    let (_, body) = h.get("/api/tasks").await;
    assert_eq!(body["data"].as_array().unwrap().len(), 2);

    // Users have no default limit.
    for i in 0..4 {
        h.create_user(json!({"name": format!("u{i}"), "email": format!("u{i}@x.com")}))
            .await;
    }
    let (_, body) = h.get("/api/users").await;
    assert_eq!(body["data"].as_array().unwrap().len(), 4);
}

#[tokio::test]
async fn ne_filter_selects_assigned_tasks() {
    let h = Harness::new();
    let user_id = id_of(&h.create_user(json!({"name": "Ann", "email": "a@x.com"})).await);

    let mut body = task_body("assigned");
    body["assignedUser"] = json!(user_id);
    h.create_task(body).await;
    h.create_task(task_body("loose")).await;

    let uri = format!("/api/tasks?where={}", urlencode(r#"{"assignedUser":{"$ne":""}}"#));
    let (_, body) = h.get(&uri).await;
    let data = body["data"].as_array().unwrap();
    assert_eq!(data.len(), 1);
    assert_eq!(data[0]["name"], "assigned");
}

// ═══════════════════════════════════════════════════════════════════════
// Reconciliation
// ═══════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn reconcile_repairs_induced_drift() {
    let h = Harness::new();
    let user_id = id_of(&h.create_user(json!({"name": "Ann", "email": "a@x.com"})).await);

    let mut body = task_body("tracked");
    body["assignedUser"] = json!(user_id.clone());
    let task_id = id_of(&h.create_task(body).await);

    // Simulate a repair step that never ran: blank the pending list behind
    // the engine's back.
    let mut user = h.state.users.find_by_id(&user_id).unwrap().unwrap();
    user.pending_tasks.clear();
    h.state.users.put(&user).unwrap();

    let (status, body) = h.post("/api/reconcile", json!({})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["users_repaired"], 1);
    assert_eq!(body["data"]["repaired_users"], json!([user_id.clone()]));

    assert_eq!(h.pending_of(&user_id).await, vec![task_id]);

    // A second pass finds nothing to do.
    let (_, body) = h.post("/api/reconcile", json!({})).await;
    assert_eq!(body["data"]["users_repaired"], 0);
}

// ── helpers ──

fn urlencode(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len() * 3);
    for byte in raw.bytes() {
        match byte {
            b'a'..=b'z' | b'A'..=b'Z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(byte as char)
            }
            _ => out.push_str(&format!("%{byte:02X}")),
        }
    }
    out
}
