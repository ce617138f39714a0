//! In-process backend with the same observable semantics as the hosted
//! service: server-side column defaults, equality filters, ordering, limits,
//! object storage and INSERT notifications to matching subscribers.
//!
//! Also exposes knobs the hosted service can't offer on demand (injected
//! failures, a call counter, the number of open subscriptions) so the
//! pipelines built on top can be exercised end to end.

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::sync::mpsc::{self, Sender};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde_json::{Map, Value, json};
use uuid::Uuid;

use super::{Backend, BackendError, ChangeEvent, Direction, Filter, Query, Row, Subscription};
use crate::models::{self, User};

struct Subscriber {
    id: u64,
    table: String,
    filter: Filter,
    tx: Sender<ChangeEvent>,
}

#[derive(Default)]
struct State {
    tables: HashMap<String, Vec<Row>>,
    objects: HashMap<(String, String), Vec<u8>>,
    subscribers: Vec<Subscriber>,
    next_subscriber: u64,
    user: Option<User>,
    failing_tables: HashSet<String>,
    fail_storage: bool,
    calls: usize,
}

/// Shared, cloneable in-memory backend.
#[derive(Clone, Default)]
pub struct MemoryBackend {
    state: Arc<Mutex<State>>,
}

impl MemoryBackend {
    /// An empty backend with no signed-in user.
    pub fn new() -> Self {
        Self::default()
    }

    /// An empty backend where `current_user` resolves to `user_id`.
    pub fn with_user(user_id: &str) -> Self {
        let backend = Self::new();
        backend.sign_in(User {
            id: user_id.to_string(),
            email: None,
        });
        backend
    }

    pub fn sign_in(&self, user: User) {
        self.lock().user = Some(user);
    }

    pub fn sign_out(&self) {
        self.lock().user = None;
    }

    /// Make every query against `table` fail until [`Self::heal`] is called.
    pub fn fail_table(&self, table: &str) {
        self.lock().failing_tables.insert(table.to_string());
    }

    /// Make storage operations fail until [`Self::heal`] is called.
    pub fn fail_storage(&self) {
        self.lock().fail_storage = true;
    }

    pub fn heal(&self) {
        let mut state = self.lock();
        state.failing_tables.clear();
        state.fail_storage = false;
    }

    /// Push an error to every open subscription, as a dropped realtime
    /// connection would.
    pub fn break_subscriptions(&self, reason: &str) {
        let mut state = self.lock();
        for sub in state.subscribers.drain(..) {
            let _ = sub.tx.send(ChangeEvent::Error(reason.to_string()));
        }
    }

    /// Number of trait calls served so far.
    pub fn calls(&self) -> usize {
        self.lock().calls
    }

    pub fn open_subscriptions(&self) -> usize {
        self.lock().subscribers.len()
    }

    /// Snapshot of a table's rows in insertion order.
    pub fn rows(&self, table: &str) -> Vec<Row> {
        self.lock().tables.get(table).cloned().unwrap_or_default()
    }

    pub fn object(&self, bucket: &str, path: &str) -> Option<Vec<u8>> {
        self.lock()
            .objects
            .get(&(bucket.to_string(), path.to_string()))
            .cloned()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        // A panicking test thread must not wedge every other user.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn begin(&self, table: Option<&str>) -> Result<MutexGuard<'_, State>, BackendError> {
        let mut state = self.lock();
        state.calls += 1;
        if let Some(table) = table
            && state.failing_tables.contains(table)
        {
            return Err(BackendError::Status {
                status: 503,
                message: format!("{table} is unavailable"),
            });
        }
        Ok(state)
    }

    fn begin_storage(&self) -> Result<MutexGuard<'_, State>, BackendError> {
        let state = self.begin(None)?;
        if state.fail_storage {
            return Err(BackendError::Status {
                status: 503,
                message: "storage is unavailable".to_string(),
            });
        }
        Ok(state)
    }
}

impl Backend for MemoryBackend {
    fn select(&self, table: &str, query: &Query) -> Result<Vec<Row>, BackendError> {
        let state = self.begin(Some(table))?;
        let mut rows: Vec<Row> = state
            .tables
            .get(table)
            .map(|rows| rows.iter().filter(|r| query.matches(r)).cloned().collect())
            .unwrap_or_default();

        if let Some((column, direction)) = &query.order {
            rows.sort_by(|a, b| {
                let ord = compare_values(&a[column.as_str()], &b[column.as_str()]);
                match direction {
                    Direction::Ascending => ord,
                    Direction::Descending => ord.reverse(),
                }
            });
        }
        if let Some(limit) = query.limit {
            rows.truncate(limit);
        }
        if let Some(columns) = &query.columns {
            rows = rows.into_iter().map(|r| project(&r, columns)).collect();
        }
        Ok(rows)
    }

    fn count(&self, table: &str, query: &Query) -> Result<usize, BackendError> {
        let state = self.begin(Some(table))?;
        Ok(state
            .tables
            .get(table)
            .map(|rows| rows.iter().filter(|r| query.matches(r)).count())
            .unwrap_or(0))
    }

    fn insert(&self, table: &str, row: Row) -> Result<Row, BackendError> {
        let mut state = self.begin(Some(table))?;
        let Value::Object(mut fields) = row else {
            return Err(BackendError::Status {
                status: 400,
                message: "row must be a JSON object".to_string(),
            });
        };
        apply_defaults(table, &mut fields);
        let row = Value::Object(fields);

        state
            .tables
            .entry(table.to_string())
            .or_default()
            .push(row.clone());

        state.subscribers.retain(|sub| {
            if sub.table != table || !sub.filter.matches(&row) {
                return true;
            }
            sub.tx.send(ChangeEvent::Insert(row.clone())).is_ok()
        });

        Ok(row)
    }

    fn update(&self, table: &str, query: &Query, patch: Row) -> Result<usize, BackendError> {
        let mut state = self.begin(Some(table))?;
        let Value::Object(patch) = patch else {
            return Err(BackendError::Status {
                status: 400,
                message: "patch must be a JSON object".to_string(),
            });
        };
        let mut updated = 0;
        if let Some(rows) = state.tables.get_mut(table) {
            for row in rows.iter_mut().filter(|r| query.matches(r)) {
                if let Value::Object(fields) = row {
                    for (k, v) in &patch {
                        fields.insert(k.clone(), v.clone());
                    }
                    updated += 1;
                }
            }
        }
        Ok(updated)
    }

    fn delete(&self, table: &str, query: &Query) -> Result<usize, BackendError> {
        let mut state = self.begin(Some(table))?;
        let Some(rows) = state.tables.get_mut(table) else {
            return Ok(0);
        };
        let before = rows.len();
        rows.retain(|r| !query.matches(r));
        Ok(before - rows.len())
    }

    fn upload(
        &self,
        bucket: &str,
        path: &str,
        bytes: &[u8],
        _content_type: &str,
    ) -> Result<(), BackendError> {
        let mut state = self.begin_storage()?;
        let key = (bucket.to_string(), path.to_string());
        if state.objects.contains_key(&key) {
            return Err(BackendError::Status {
                status: 409,
                message: format!("{path} already exists"),
            });
        }
        state.objects.insert(key, bytes.to_vec());
        Ok(())
    }

    fn download(&self, bucket: &str, path: &str) -> Result<Vec<u8>, BackendError> {
        let state = self.begin_storage()?;
        state
            .objects
            .get(&(bucket.to_string(), path.to_string()))
            .cloned()
            .ok_or_else(|| BackendError::NotFound(format!("{bucket}/{path}")))
    }

    fn remove(&self, bucket: &str, path: &str) -> Result<(), BackendError> {
        let mut state = self.begin_storage()?;
        state
            .objects
            .remove(&(bucket.to_string(), path.to_string()))
            .map(|_| ())
            .ok_or_else(|| BackendError::NotFound(format!("{bucket}/{path}")))
    }

    fn current_user(&self) -> Result<User, BackendError> {
        let state = self.begin(None)?;
        state
            .user
            .clone()
            .ok_or_else(|| BackendError::Unauthorized("no active session".to_string()))
    }

    fn subscribe(&self, table: &str, filter: Filter) -> Result<Subscription, BackendError> {
        let mut state = self.begin(None)?;
        let id = state.next_subscriber;
        state.next_subscriber += 1;

        let (tx, rx) = mpsc::channel();
        let topic = format!("{table}:{}=eq.{}", filter.column, filter.value_literal());
        state.subscribers.push(Subscriber {
            id,
            table: table.to_string(),
            filter,
            tx,
        });

        let shared = Arc::clone(&self.state);
        Ok(Subscription::new(topic, rx, move || {
            let mut state = shared.lock().unwrap_or_else(|p| p.into_inner());
            state.subscribers.retain(|s| s.id != id);
        }))
    }
}

/// Fill the columns the hosted schema defaults server-side.
fn apply_defaults(table: &str, fields: &mut Map<String, Value>) {
    let now = json!(Utc::now().to_rfc3339());
    fields
        .entry("id")
        .or_insert_with(|| json!(Uuid::new_v4().to_string()));
    match table {
        models::DEVICES => {
            fields.entry("created_at").or_insert(now);
        }
        models::TELEMETRY => {
            fields.entry("ts").or_insert(now);
        }
        models::REPORTS => {
            fields.entry("upload_date").or_insert(now);
            fields.entry("has_abnormal_findings").or_insert(json!(false));
            fields.entry("ai_analysis").or_insert(Value::Null);
        }
        models::ALERTS => {
            fields.entry("is_read").or_insert(json!(false));
            fields.entry("created_at").or_insert(now);
        }
        _ => {}
    }
}

fn project(row: &Row, columns: &[String]) -> Row {
    let mut out = Map::new();
    for column in columns {
        if let Some(v) = row.get(column) {
            out.insert(column.clone(), v.clone());
        }
    }
    Value::Object(out)
}

/// Total order over JSON values: numbers numerically, RFC 3339 timestamps
/// chronologically, other strings lexically. Nulls sort last.
fn compare_values(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Null, Value::Null) => Ordering::Equal,
        (Value::Null, _) => Ordering::Greater,
        (_, Value::Null) => Ordering::Less,
        (Value::Number(x), Value::Number(y)) => {
            let (x, y) = (x.as_f64().unwrap_or(0.0), y.as_f64().unwrap_or(0.0));
            x.partial_cmp(&y).unwrap_or(Ordering::Equal)
        }
        (Value::String(x), Value::String(y)) => {
            match (
                DateTime::parse_from_rfc3339(x),
                DateTime::parse_from_rfc3339(y),
            ) {
                (Ok(x), Ok(y)) => x.cmp(&y),
                _ => x.cmp(y),
            }
        }
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        _ => a.to_string().cmp(&b.to_string()),
    }
}
