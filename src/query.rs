//! Filter/Query Translator.
//!
//! Turns the `where`/`sort`/`select`/`skip`/`limit`/`count` query parameters
//! into a typed [`QueryPlan`]: a document filter plus post-processing
//! instructions (sort, pagination, projection, count mode).
//!
//! Identifier lists inside `where._id.$in` are sanitized up front: malformed
//! ids are dropped, and an emptied list short-circuits to an empty result
//! without touching the store. A `where` with a scalar `_id` is flagged so
//! the caller can distinguish "lookup missed" (404) from "empty result set"
//! (200 with an empty payload).

use serde::Deserialize;
use serde_json::{Map, Value};
use std::cmp::Ordering;
use std::collections::HashSet;

use crate::errors::AppError;
use crate::ids;

// =============================================================================
// FILTER
// =============================================================================

/// A single field condition.
#[derive(Debug, Clone)]
pub enum Condition {
    /// Exact match.
    Eq(Value),
    /// Member of set (`$in`).
    In(Vec<Value>),
    /// Not equal (`$ne`); matches absent fields as well.
    Ne(Value),
}

/// Conjunction of field conditions.
#[derive(Debug, Clone, Default)]
pub struct Filter {
    clauses: Vec<(String, Condition)>,
}

impl Filter {
    /// Filter matching every document.
    pub fn empty() -> Self {
        Self::default()
    }

    /// `field == value`
    pub fn where_eq(field: impl Into<String>, value: Value) -> Self {
        Self {
            clauses: vec![(field.into(), Condition::Eq(value))],
        }
    }

    /// `field != value`
    pub fn where_ne(field: impl Into<String>, value: Value) -> Self {
        Self {
            clauses: vec![(field.into(), Condition::Ne(value))],
        }
    }

    /// `_id` is one of `ids`.
    pub fn where_id_in(ids: &[String]) -> Self {
        Self {
            clauses: vec![(
                "_id".to_string(),
                Condition::In(ids.iter().map(|id| Value::String(id.clone())).collect()),
            )],
        }
    }

    /// Parse a client-supplied `where` object.
    ///
    /// Each key maps either to an exact value or to an operator object
    /// supporting `$in` and `$ne`. Anything else is a bad request.
    pub fn parse(spec: &Value) -> Result<Self, AppError> {
        let obj = spec.as_object().ok_or_else(|| {
            AppError::InvalidQuery("where must be a JSON object".to_string())
        })?;

        let mut clauses = Vec::with_capacity(obj.len());
        for (field, value) in obj {
            let condition = match value {
                Value::Object(ops) => parse_operator(field, ops)?,
                other => Condition::Eq(other.clone()),
            };
            clauses.push((field.clone(), condition));
        }
        Ok(Self { clauses })
    }

    /// Whether `doc` satisfies every clause.
    pub fn matches(&self, doc: &Value) -> bool {
        self.clauses.iter().all(|(field, condition)| {
            let actual = doc.get(field).unwrap_or(&Value::Null);
            match condition {
                Condition::Eq(expected) => values_equal(actual, expected),
                Condition::In(set) => set.iter().any(|v| values_equal(actual, v)),
                Condition::Ne(expected) => !values_equal(actual, expected),
            }
        })
    }

    fn clauses_mut(&mut self) -> &mut Vec<(String, Condition)> {
        &mut self.clauses
    }

    fn scalar_id_clause(&self) -> bool {
        self.clauses
            .iter()
            .any(|(field, cond)| field == "_id" && matches!(cond, Condition::Eq(Value::String(_))))
    }
}

fn parse_operator(field: &str, ops: &Map<String, Value>) -> Result<Condition, AppError> {
    if ops.len() != 1 {
        return Err(AppError::InvalidQuery(format!(
            "expected a single operator for field '{field}'"
        )));
    }
    // Sole entry, by construction.
    let (op, operand) = ops.iter().next().ok_or_else(|| {
        AppError::InvalidQuery(format!("empty operator object for field '{field}'"))
    })?;
    match op.as_str() {
        "$in" => {
            let items = operand.as_array().ok_or_else(|| {
                AppError::InvalidQuery(format!("$in for field '{field}' must be an array"))
            })?;
            Ok(Condition::In(items.clone()))
        }
        "$ne" => Ok(Condition::Ne(operand.clone())),
        other => Err(AppError::InvalidQuery(format!(
            "unsupported operator '{other}' for field '{field}'"
        ))),
    }
}

/// Loose equality: numbers compare by value regardless of JSON representation.
fn values_equal(a: &Value, b: &Value) -> bool {
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => x == y,
        _ => a == b,
    }
}

// =============================================================================
// SORT
// =============================================================================

/// Ordered multi-key sort specification.
#[derive(Debug, Clone, Default)]
pub struct Sort {
    keys: Vec<(String, bool)>, // (field, descending)
}

impl Sort {
    pub fn parse(spec: &Value) -> Result<Self, AppError> {
        let obj = spec
            .as_object()
            .ok_or_else(|| AppError::InvalidQuery("sort must be a JSON object".to_string()))?;

        let mut keys = Vec::with_capacity(obj.len());
        for (field, direction) in obj {
            let descending = match direction.as_i64() {
                Some(1) => false,
                Some(-1) => true,
                _ => {
                    return Err(AppError::InvalidQuery(format!(
                        "sort direction for '{field}' must be 1 or -1"
                    )))
                }
            };
            keys.push((field.clone(), descending));
        }
        Ok(Self { keys })
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Stable sort by each key in specification order.
    pub fn apply(&self, docs: &mut [Value]) {
        if self.keys.is_empty() {
            return;
        }
        docs.sort_by(|a, b| {
            for (field, descending) in &self.keys {
                let left = a.get(field).unwrap_or(&Value::Null);
                let right = b.get(field).unwrap_or(&Value::Null);
                let mut ord = compare_values(left, right);
                if *descending {
                    ord = ord.reverse();
                }
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            Ordering::Equal
        });
    }
}

/// Total order over JSON values: rank by type, then within type.
fn compare_values(a: &Value, b: &Value) -> Ordering {
    fn type_rank(v: &Value) -> u8 {
        match v {
            Value::Null => 0,
            Value::Bool(_) => 1,
            Value::Number(_) => 2,
            Value::String(_) => 3,
            Value::Array(_) => 4,
            Value::Object(_) => 5,
        }
    }

    match (a, b) {
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::Number(x), Value::Number(y)) => {
            let x = x.as_f64().unwrap_or(f64::NAN);
            let y = y.as_f64().unwrap_or(f64::NAN);
            x.total_cmp(&y)
        }
        (Value::String(x), Value::String(y)) => x.cmp(y),
        _ => type_rank(a).cmp(&type_rank(b)),
    }
}

// =============================================================================
// PROJECTION
// =============================================================================

/// Field projection: inclusion or exclusion of named fields.
///
/// `_id` is always carried in inclusion mode unless explicitly excluded,
/// matching the upstream store convention.
#[derive(Debug, Clone, Default)]
pub enum Projection {
    #[default]
    All,
    Include {
        fields: HashSet<String>,
        with_id: bool,
    },
    Exclude(HashSet<String>),
}

impl Projection {
    pub fn parse(spec: &Value) -> Result<Self, AppError> {
        let obj = spec
            .as_object()
            .ok_or_else(|| AppError::InvalidQuery("select must be a JSON object".to_string()))?;
        if obj.is_empty() {
            return Ok(Self::All);
        }

        let mut included = HashSet::new();
        let mut excluded = HashSet::new();
        let mut id_excluded = false;
        for (field, flag) in obj {
            let include = match flag {
                Value::Number(n) => n.as_f64() != Some(0.0),
                Value::Bool(b) => *b,
                _ => {
                    return Err(AppError::InvalidQuery(format!(
                        "select flag for '{field}' must be 0 or 1"
                    )))
                }
            };
            match (include, field.as_str()) {
                (false, "_id") => id_excluded = true,
                (true, _) => {
                    included.insert(field.clone());
                }
                (false, _) => {
                    excluded.insert(field.clone());
                }
            }
        }

        // `_id: 0` may ride along with an inclusion list; any other mix of
        // modes is ambiguous.
        match (included.is_empty(), excluded.is_empty()) {
            (false, false) => Err(AppError::InvalidQuery(
                "select cannot mix inclusion and exclusion".to_string(),
            )),
            (false, true) => Ok(Self::Include {
                fields: included,
                with_id: !id_excluded,
            }),
            (true, _) => {
                if id_excluded {
                    excluded.insert("_id".to_string());
                }
                Ok(Self::Exclude(excluded))
            }
        }
    }

    pub fn apply(&self, doc: Value) -> Value {
        let Value::Object(obj) = doc else {
            return doc;
        };
        match self {
            Self::All => Value::Object(obj),
            Self::Include { fields, with_id } => {
                let kept = obj
                    .into_iter()
                    .filter(|(k, _)| fields.contains(k) || (*with_id && k == "_id"))
                    .collect();
                Value::Object(kept)
            }
            Self::Exclude(fields) => {
                let kept = obj.into_iter().filter(|(k, _)| !fields.contains(k)).collect();
                Value::Object(kept)
            }
        }
    }
}

// =============================================================================
// QUERY PLAN
// =============================================================================

/// Raw query parameters as received on a list endpoint.
#[derive(Debug, Default, Deserialize)]
pub struct ListParams {
    #[serde(rename = "where")]
    pub filter: Option<String>,
    pub sort: Option<String>,
    pub select: Option<String>,
    pub skip: Option<usize>,
    pub limit: Option<usize>,
    pub count: Option<String>,
}

/// A validated store query plus post-processing instructions.
#[derive(Debug)]
pub struct QueryPlan {
    pub filter: Filter,
    pub sort: Sort,
    pub projection: Projection,
    pub skip: usize,
    /// `None` means unbounded.
    pub limit: Option<usize>,
    pub count_only: bool,
    /// `where` carried a scalar `_id`: a zero-result query is a 404, not an
    /// empty 200.
    pub by_scalar_id: bool,
    /// Id sanitization emptied an `$in` list; return an empty result without
    /// querying the store.
    pub short_circuit_empty: bool,
}

impl QueryPlan {
    /// Translate raw parameters. `default_limit` is the collection's page
    /// size policy when the client supplies no limit (or limit 0).
    pub fn parse(params: &ListParams, default_limit: Option<usize>) -> Result<Self, AppError> {
        let mut filter = match &params.filter {
            Some(raw) => Filter::parse(&parse_json(raw)?)?,
            None => Filter::empty(),
        };
        let sort = match &params.sort {
            Some(raw) => Sort::parse(&parse_json(raw)?)?,
            None => Sort::default(),
        };
        let projection = match &params.select {
            Some(raw) => Projection::parse(&parse_json(raw)?)?,
            None => Projection::All,
        };

        let short_circuit_empty = sanitize_id_sets(&mut filter);
        let by_scalar_id = filter.scalar_id_clause();

        Ok(Self {
            filter,
            sort,
            projection,
            skip: params.skip.unwrap_or(0),
            limit: params.limit.filter(|l| *l > 0).or(default_limit),
            count_only: params.count.as_deref() == Some("true"),
            by_scalar_id,
            short_circuit_empty,
        })
    }

    /// The payload for a short-circuited empty result.
    pub fn empty_payload(&self) -> Value {
        if self.count_only {
            Value::from(0)
        } else {
            Value::Array(Vec::new())
        }
    }
}

fn parse_json(raw: &str) -> Result<Value, AppError> {
    serde_json::from_str(raw).map_err(|e| AppError::InvalidQuery(e.to_string()))
}

/// Drop malformed ids from `_id` `$in` lists. Returns true when a list was
/// emptied, meaning the whole query can only produce an empty result.
fn sanitize_id_sets(filter: &mut Filter) -> bool {
    let mut emptied = false;
    for (field, condition) in filter.clauses_mut() {
        if field != "_id" {
            continue;
        }
        if let Condition::In(values) = condition {
            values.retain(|v| v.as_str().is_some_and(ids::is_valid));
            if values.is_empty() {
                emptied = true;
            }
        }
    }
    emptied
}

/// Result of executing a plan against a set of matching documents.
#[derive(Debug)]
pub enum QueryOutcome {
    Count(usize),
    Documents(Vec<Value>),
}

/// Apply sort, pagination, count mode, and projection to the documents that
/// already passed the plan's filter. The count respects skip and limit.
pub fn execute(plan: &QueryPlan, mut docs: Vec<Value>) -> QueryOutcome {
    plan.sort.apply(&mut docs);

    let mut docs: Vec<Value> = docs.into_iter().skip(plan.skip).collect();
    if let Some(limit) = plan.limit {
        docs.truncate(limit);
    }

    if plan.count_only {
        QueryOutcome::Count(docs.len())
    } else {
        QueryOutcome::Documents(docs.into_iter().map(|d| plan.projection.apply(d)).collect())
    }
}
