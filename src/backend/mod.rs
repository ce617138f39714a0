//! Backend client facade.
//!
//! Every other component reaches the managed service through the [`Backend`]
//! trait: filtered row queries, inserts, updates and deletes against named
//! tables, object upload/download against a storage bucket, bearer-token
//! user lookup, and realtime INSERT subscriptions filtered by an equality
//! predicate.
//!
//! Two implementations ship with the crate:
//!
//! - [`rest::RestBackend`]: the hosted service over HTTP (`ureq`) and the
//!   realtime websocket (`tungstenite`).
//! - [`memory::MemoryBackend`]: an in-process stand-in with the same
//!   semantics, used by the tests.

pub mod memory;
pub mod realtime;
pub mod rest;

use std::sync::mpsc::{Receiver, RecvTimeoutError, TryRecvError};
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;

use crate::models::User;

pub use memory::MemoryBackend;
pub use rest::RestBackend;

/// A row as exchanged with the backend.
pub type Row = Value;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum BackendError {
    /// Missing, expired or rejected credentials.
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    #[error("not found: {0}")]
    NotFound(String),
    /// The service answered with a non-success status.
    #[error("backend returned {status}: {message}")]
    Status { status: u16, message: String },
    /// The request never produced a response.
    #[error("transport error: {0}")]
    Transport(String),
    #[error("failed to decode backend response: {0}")]
    Decode(String),
    #[error("realtime error: {0}")]
    Realtime(String),
}

impl From<serde_json::Error> for BackendError {
    fn from(e: serde_json::Error) -> Self {
        Self::Decode(e.to_string())
    }
}

// ---------------------------------------------------------------------------
// Queries
// ---------------------------------------------------------------------------

/// Sort direction for [`Query::order`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Ascending,
    Descending,
}

/// Equality predicate on a single column.
#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    pub column: String,
    pub value: Value,
}

impl Filter {
    pub fn eq(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            column: column.into(),
            value: value.into(),
        }
    }

    /// Whether `row` satisfies this predicate.
    pub fn matches(&self, row: &Row) -> bool {
        row.get(&self.column) == Some(&self.value)
    }

    /// Render the value as it appears in a PostgREST or realtime filter.
    pub fn value_literal(&self) -> String {
        match &self.value {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        }
    }
}

/// A filtered, ordered, limited table query.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Query {
    pub columns: Option<Vec<String>>,
    pub filters: Vec<Filter>,
    pub order: Option<(String, Direction)>,
    pub limit: Option<usize>,
}

impl Query {
    pub fn new() -> Self {
        Self::default()
    }

    /// Restrict the returned columns.
    pub fn columns(mut self, columns: &[&str]) -> Self {
        self.columns = Some(columns.iter().map(|c| c.to_string()).collect());
        self
    }

    pub fn eq(mut self, column: &str, value: impl Into<Value>) -> Self {
        self.filters.push(Filter::eq(column, value));
        self
    }

    pub fn order(mut self, column: &str, direction: Direction) -> Self {
        self.order = Some((column.to_string(), direction));
        self
    }

    pub fn limit(mut self, n: usize) -> Self {
        self.limit = Some(n);
        self
    }

    pub fn matches(&self, row: &Row) -> bool {
        self.filters.iter().all(|f| f.matches(row))
    }
}

// ---------------------------------------------------------------------------
// Realtime subscriptions
// ---------------------------------------------------------------------------

/// A change notification delivered by a subscription.
#[derive(Debug, Clone, PartialEq)]
pub enum ChangeEvent {
    /// A new row was inserted.
    Insert(Row),
    /// The subscription failed; no further events will arrive.
    Error(String),
}

/// Handle to an open realtime subscription.
///
/// Events arrive on an internal channel. The subscription is closed exactly
/// once: either through [`Subscription::close`] or when the handle is
/// dropped.
pub struct Subscription {
    topic: String,
    events: Receiver<ChangeEvent>,
    closer: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    pub fn new(
        topic: impl Into<String>,
        events: Receiver<ChangeEvent>,
        closer: impl FnOnce() + Send + 'static,
    ) -> Self {
        Self {
            topic: topic.into(),
            events,
            closer: Some(Box::new(closer)),
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Next pending event without blocking.
    ///
    /// A disconnected channel is reported as an [`ChangeEvent::Error`] once
    /// the backlog is drained.
    pub fn try_next(&self) -> Option<ChangeEvent> {
        match self.events.try_recv() {
            Ok(event) => Some(event),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => {
                Some(ChangeEvent::Error("subscription channel closed".to_string()))
            }
        }
    }

    /// Wait up to `timeout` for the next event.
    pub fn next_timeout(&self, timeout: Duration) -> Option<ChangeEvent> {
        match self.events.recv_timeout(timeout) {
            Ok(event) => Some(event),
            Err(RecvTimeoutError::Timeout) => None,
            Err(RecvTimeoutError::Disconnected) => {
                Some(ChangeEvent::Error("subscription channel closed".to_string()))
            }
        }
    }

    pub fn close(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        if let Some(closer) = self.closer.take() {
            tracing::debug!(topic = %self.topic, "closing subscription");
            closer();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("topic", &self.topic)
            .field("open", &self.closer.is_some())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// The facade
// ---------------------------------------------------------------------------

/// Handle to the managed database/auth/storage/realtime service.
pub trait Backend {
    fn select(&self, table: &str, query: &Query) -> Result<Vec<Row>, BackendError>;

    fn count(&self, table: &str, query: &Query) -> Result<usize, BackendError>;

    /// Insert one row and return it as stored, including server defaults.
    fn insert(&self, table: &str, row: Row) -> Result<Row, BackendError>;

    /// Apply `patch` to matching rows; returns the number updated.
    fn update(&self, table: &str, query: &Query, patch: Row) -> Result<usize, BackendError>;

    /// Delete matching rows; returns the number deleted.
    fn delete(&self, table: &str, query: &Query) -> Result<usize, BackendError>;

    fn upload(
        &self,
        bucket: &str,
        path: &str,
        bytes: &[u8],
        content_type: &str,
    ) -> Result<(), BackendError>;

    fn download(&self, bucket: &str, path: &str) -> Result<Vec<u8>, BackendError>;

    fn remove(&self, bucket: &str, path: &str) -> Result<(), BackendError>;

    /// Resolve the user behind the current bearer token.
    fn current_user(&self) -> Result<User, BackendError>;

    /// Open an INSERT-only subscription on `table` filtered by `filter`.
    fn subscribe(&self, table: &str, filter: Filter) -> Result<Subscription, BackendError>;
}

/// Run a query and deserialize every row into `T`.
pub fn select_as<T: DeserializeOwned>(
    backend: &dyn Backend,
    table: &str,
    query: &Query,
) -> Result<Vec<T>, BackendError> {
    backend
        .select(table, query)?
        .into_iter()
        .map(|row| serde_json::from_value(row).map_err(BackendError::from))
        .collect()
}

/// Run a query and deserialize the first row, if any.
pub fn select_first<T: DeserializeOwned>(
    backend: &dyn Backend,
    table: &str,
    query: &Query,
) -> Result<Option<T>, BackendError> {
    let query = query.clone().limit(1);
    Ok(select_as(backend, table, &query)?.into_iter().next())
}
