//! Embedded document store.
//!
//! One rocksdb keyspace per collection, JSON-encoded documents keyed by id.
//! The store offers per-document atomicity only: a multi-document mutation
//! is a sequence of independent writes, which is exactly the constraint the
//! consistency engine is built around.

use anyhow::{Context, Result};
use rocksdb::{IteratorMode, Options, DB};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::marker::PhantomData;
use std::path::Path;
use std::sync::Arc;

use crate::query::Filter;

/// A persistable entity of one collection.
pub trait Document: Serialize + DeserializeOwned + Clone {
    const COLLECTION: &'static str;

    fn id(&self) -> &str;
}

/// Patch operations applied by [`Collection::update_many`].
#[derive(Debug, Clone)]
pub enum PatchOp {
    /// Set a field to a value.
    Set { field: &'static str, value: Value },
    /// Remove every listed id from a string-array field. Idempotent.
    Pull { field: &'static str, ids: Vec<String> },
}

/// An ordered list of patch operations.
#[derive(Debug, Clone, Default)]
pub struct Patch {
    ops: Vec<PatchOp>,
}

impl Patch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(mut self, field: &'static str, value: Value) -> Self {
        self.ops.push(PatchOp::Set { field, value });
        self
    }

    pub fn pull(mut self, field: &'static str, ids: Vec<String>) -> Self {
        self.ops.push(PatchOp::Pull { field, ids });
        self
    }

    fn apply(&self, doc: &mut Value) -> bool {
        let mut changed = false;
        for op in &self.ops {
            match op {
                PatchOp::Set { field, value } => {
                    if let Some(obj) = doc.as_object_mut() {
                        if obj.get(*field) != Some(value) {
                            obj.insert((*field).to_string(), value.clone());
                            changed = true;
                        }
                    }
                }
                PatchOp::Pull { field, ids } => {
                    if let Some(list) = doc.get_mut(*field).and_then(Value::as_array_mut) {
                        let before = list.len();
                        list.retain(|v| {
                            v.as_str().map_or(true, |s| !ids.iter().any(|id| id == s))
                        });
                        changed |= list.len() != before;
                    }
                }
            }
        }
        changed
    }
}

/// A typed collection of documents.
pub struct Collection<T> {
    db: Arc<DB>,
    _marker: PhantomData<T>,
}

impl<T> Clone for Collection<T> {
    fn clone(&self) -> Self {
        Self {
            db: Arc::clone(&self.db),
            _marker: PhantomData,
        }
    }
}

impl<T: Document> Collection<T> {
    /// Open (or create) the collection under `root`.
    pub fn open(root: &Path) -> Result<Self> {
        let path = root.join(T::COLLECTION);
        std::fs::create_dir_all(&path)
            .with_context(|| format!("creating {} directory", T::COLLECTION))?;

        let mut opts = Options::default();
        opts.create_if_missing(true);
        let db = DB::open(&opts, &path)
            .with_context(|| format!("opening {} collection", T::COLLECTION))?;

        tracing::info!(collection = T::COLLECTION, "collection opened");
        Ok(Self {
            db: Arc::new(db),
            _marker: PhantomData,
        })
    }

    /// Persist a new document.
    pub fn insert(&self, doc: &T) -> Result<()> {
        self.write(doc, "inserted")
    }

    /// Persist the current state of an existing document.
    pub fn put(&self, doc: &T) -> Result<()> {
        self.write(doc, "updated")
    }

    fn write(&self, doc: &T, verb: &'static str) -> Result<()> {
        let bytes = serde_json::to_vec(doc).context("serializing document")?;
        self.db
            .put(doc.id().as_bytes(), bytes)
            .context("writing document")?;
        tracing::debug!(collection = T::COLLECTION, id = doc.id(), "document {verb}");
        Ok(())
    }

    /// Fetch one document by id, typed.
    pub fn find_by_id(&self, id: &str) -> Result<Option<T>> {
        match self.raw_by_id(id)? {
            Some(value) => Ok(Some(
                serde_json::from_value(value).context("decoding document")?,
            )),
            None => Ok(None),
        }
    }

    /// Fetch one document by id as raw JSON (for projection).
    pub fn find_value_by_id(&self, id: &str) -> Result<Option<Value>> {
        self.raw_by_id(id)
    }

    fn raw_by_id(&self, id: &str) -> Result<Option<Value>> {
        match self.db.get(id.as_bytes()).context("reading document")? {
            Some(bytes) => Ok(Some(
                serde_json::from_slice(&bytes).context("decoding document")?,
            )),
            None => Ok(None),
        }
    }

    /// All documents matching `filter`, typed, in key order.
    pub fn find(&self, filter: &Filter) -> Result<Vec<T>> {
        self.find_values(filter)?
            .into_iter()
            .map(|v| serde_json::from_value(v).context("decoding document"))
            .collect()
    }

    /// All documents matching `filter`, as raw JSON, in key order.
    ///
    /// Key order approximates creation order because ids carry a timestamp
    /// prefix.
    pub fn find_values(&self, filter: &Filter) -> Result<Vec<Value>> {
        let mut out = Vec::new();
        for entry in self.db.iterator(IteratorMode::Start) {
            let (_, bytes) = entry.context("scanning collection")?;
            let value: Value = serde_json::from_slice(&bytes).context("decoding document")?;
            if filter.matches(&value) {
                out.push(value);
            }
        }
        Ok(out)
    }

    /// Number of documents matching `filter`.
    pub fn count(&self, filter: &Filter) -> Result<usize> {
        Ok(self.find_values(filter)?.len())
    }

    /// Apply `patch` to every document matching `filter`. Returns how many
    /// documents actually changed. Each document write is atomic; the batch
    /// as a whole is not.
    pub fn update_many(&self, filter: &Filter, patch: &Patch) -> Result<usize> {
        let mut changed = 0;
        for mut value in self.find_values(filter)? {
            if patch.apply(&mut value) {
                let id = value
                    .get("_id")
                    .and_then(Value::as_str)
                    .context("patched document has no _id")?
                    .to_string();
                let bytes = serde_json::to_vec(&value).context("serializing document")?;
                self.db.put(id.as_bytes(), bytes).context("writing document")?;
                tracing::debug!(collection = T::COLLECTION, id = %id, "document patched");
                changed += 1;
            }
        }
        Ok(changed)
    }

    /// Remove a document, returning its last state if it existed.
    pub fn delete_by_id(&self, id: &str) -> Result<Option<T>> {
        let existing = self.find_by_id(id)?;
        if existing.is_some() {
            self.db.delete(id.as_bytes()).context("deleting document")?;
            tracing::debug!(collection = T::COLLECTION, id, "document deleted");
        }
        Ok(existing)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids;
    use crate::models::{Task, UNASSIGNED};
    use chrono::Utc;
    use serde_json::json;
    use tempfile::TempDir;

    fn task(name: &str, completed: bool) -> Task {
        Task {
            id: ids::generate(),
            name: name.to_string(),
            description: String::new(),
            deadline: Utc::now(),
            completed,
            assigned_user: String::new(),
            assigned_user_name: UNASSIGNED.to_string(),
            date_created: Utc::now(),
        }
    }

    fn open_tasks(dir: &TempDir) -> Collection<Task> {
        Collection::open(dir.path()).expect("open collection")
    }

    #[test]
    fn insert_find_delete_round_trip() {
        let dir = TempDir::new().unwrap();
        let tasks = open_tasks(&dir);

        let t = task("write report", false);
        tasks.insert(&t).unwrap();

        let found = tasks.find_by_id(&t.id).unwrap().expect("task present");
        assert_eq!(found.name, "write report");

        let removed = tasks.delete_by_id(&t.id).unwrap().expect("was present");
        assert_eq!(removed.id, t.id);
        assert!(tasks.find_by_id(&t.id).unwrap().is_none());
        assert!(tasks.delete_by_id(&t.id).unwrap().is_none());
    }

    #[test]
    fn find_applies_filter() {
        let dir = TempDir::new().unwrap();
        let tasks = open_tasks(&dir);
        tasks.insert(&task("open", false)).unwrap();
        tasks.insert(&task("done", true)).unwrap();

        let open = tasks
            .find(&Filter::where_eq("completed", json!(false)))
            .unwrap();
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].name, "open");
        assert_eq!(tasks.count(&Filter::empty()).unwrap(), 2);
    }

    #[test]
    fn update_many_sets_and_pulls() {
        let dir = TempDir::new().unwrap();
        let tasks = open_tasks(&dir);
        let t = task("assigned", false);
        tasks.insert(&t).unwrap();

        let changed = tasks
            .update_many(
                &Filter::where_id_in(&[t.id.clone()]),
                &Patch::new()
                    .set("assignedUser", json!(""))
                    .set("assignedUserName", json!(UNASSIGNED)),
            )
            .unwrap();
        // assignedUser was already empty, name already unassigned
        assert_eq!(changed, 0);

        let changed = tasks
            .update_many(
                &Filter::where_id_in(&[t.id.clone()]),
                &Patch::new().set("completed", json!(true)),
            )
            .unwrap();
        assert_eq!(changed, 1);
        assert!(tasks.find_by_id(&t.id).unwrap().unwrap().completed);
    }
}
