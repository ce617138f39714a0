//! HTTP client for the hosted backend.
//!
//! Talks to the PostgREST data API (`/rest/v1`), the storage API
//! (`/storage/v1`) and the auth API (`/auth/v1`) with the synchronous `ureq`
//! client. Realtime subscriptions are delegated to [`super::realtime`].
use std::io::Read;
use std::time::Duration;

use serde::Deserialize;
use serde_json::Value;

use super::realtime::{self, RealtimeParams};
use super::{Backend, BackendError, Direction, Filter, Query, Row, Subscription};
use crate::config::schema::BackendConfig;
use crate::models::User;

/// Tokens returned by the auth API's password grant.
#[derive(Debug, Clone, Deserialize)]
pub struct AuthTokens {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub expires_in: Option<u64>,
    pub user: User,
}

/// Blocking client for the hosted backend, scoped to one access token.
#[derive(Debug, Clone)]
pub struct RestBackend {
    base_url: String,
    anon_key: String,
    access_token: Option<String>,
    agent: ureq::Agent,
}

impl RestBackend {
    /// Build a client from the resolved config. The config's
    /// `access_token` is used when present.
    pub fn from_config(config: &BackendConfig) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build();
        let access_token = Some(config.access_token.clone()).filter(|t| !t.is_empty());
        Self {
            base_url: config.url.trim_end_matches('/').to_string(),
            anon_key: config.anon_key.clone(),
            access_token,
            agent,
        }
    }

    /// Scope the client to a caller's bearer token.
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        let token = token.into();
        self.access_token = Some(token).filter(|t| !t.is_empty());
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Exchange email and password for an access token.
    pub fn sign_in_with_password(
        &self,
        email: &str,
        password: &str,
    ) -> Result<AuthTokens, BackendError> {
        let url = format!("{}/auth/v1/token", self.base_url);
        let resp = self
            .agent
            .post(&url)
            .query("grant_type", "password")
            .set("apikey", &self.anon_key)
            .send_json(serde_json::json!({ "email": email, "password": password }))
            .map_err(map_ureq_error)?;
        resp.into_json()
            .map_err(|e| BackendError::Decode(e.to_string()))
    }

    fn bearer(&self) -> String {
        format!(
            "Bearer {}",
            self.access_token.as_deref().unwrap_or(&self.anon_key)
        )
    }

    fn request(&self, method: &str, url: &str) -> ureq::Request {
        self.agent
            .request(method, url)
            .set("apikey", &self.anon_key)
            .set("Authorization", &self.bearer())
    }

    fn table_request(&self, method: &str, table: &str, query: &Query) -> ureq::Request {
        let url = format!("{}/rest/v1/{table}", self.base_url);
        postgrest_params(query)
            .into_iter()
            .fold(self.request(method, &url), |req, (k, v)| req.query(&k, &v))
    }

    fn object_url(&self, bucket: &str, path: &str) -> String {
        format!("{}/storage/v1/object/{bucket}/{path}", self.base_url)
    }
}

impl Backend for RestBackend {
    fn select(&self, table: &str, query: &Query) -> Result<Vec<Row>, BackendError> {
        let resp = self
            .table_request("GET", table, query)
            .call()
            .map_err(map_ureq_error)?;
        resp.into_json()
            .map_err(|e| BackendError::Decode(e.to_string()))
    }

    fn count(&self, table: &str, query: &Query) -> Result<usize, BackendError> {
        let mut query = query.clone();
        query.columns = Some(vec!["id".to_string()]);
        query.order = None;
        query.limit = None;
        let resp = self
            .table_request("HEAD", table, &query)
            .set("Prefer", "count=exact")
            .call()
            .map_err(map_ureq_error)?;
        resp.header("Content-Range")
            .and_then(parse_content_range_total)
            .ok_or_else(|| BackendError::Decode("missing Content-Range total".to_string()))
    }

    fn insert(&self, table: &str, row: Row) -> Result<Row, BackendError> {
        let url = format!("{}/rest/v1/{table}", self.base_url);
        let resp = self
            .request("POST", &url)
            .set("Prefer", "return=representation")
            .send_json(row)
            .map_err(map_ureq_error)?;
        let rows: Vec<Row> = resp
            .into_json()
            .map_err(|e| BackendError::Decode(e.to_string()))?;
        rows.into_iter()
            .next()
            .ok_or_else(|| BackendError::Decode("insert returned no row".to_string()))
    }

    fn update(&self, table: &str, query: &Query, patch: Row) -> Result<usize, BackendError> {
        let resp = self
            .table_request("PATCH", table, query)
            .set("Prefer", "return=representation")
            .send_json(patch)
            .map_err(map_ureq_error)?;
        let rows: Vec<Row> = resp
            .into_json()
            .map_err(|e| BackendError::Decode(e.to_string()))?;
        Ok(rows.len())
    }

    fn delete(&self, table: &str, query: &Query) -> Result<usize, BackendError> {
        let resp = self
            .table_request("DELETE", table, query)
            .set("Prefer", "return=representation")
            .call()
            .map_err(map_ureq_error)?;
        let rows: Vec<Row> = resp
            .into_json()
            .map_err(|e| BackendError::Decode(e.to_string()))?;
        Ok(rows.len())
    }

    fn upload(
        &self,
        bucket: &str,
        path: &str,
        bytes: &[u8],
        content_type: &str,
    ) -> Result<(), BackendError> {
        self.request("POST", &self.object_url(bucket, path))
            .set("Content-Type", content_type)
            .send_bytes(bytes)
            .map_err(map_ureq_error)?;
        Ok(())
    }

    fn download(&self, bucket: &str, path: &str) -> Result<Vec<u8>, BackendError> {
        let url = format!(
            "{}/storage/v1/object/authenticated/{bucket}/{path}",
            self.base_url
        );
        let resp = self.request("GET", &url).call().map_err(map_ureq_error)?;
        let mut bytes = Vec::new();
        resp.into_reader()
            .read_to_end(&mut bytes)
            .map_err(|e| BackendError::Transport(e.to_string()))?;
        Ok(bytes)
    }

    fn remove(&self, bucket: &str, path: &str) -> Result<(), BackendError> {
        self.request("DELETE", &self.object_url(bucket, path))
            .call()
            .map_err(map_ureq_error)?;
        Ok(())
    }

    fn current_user(&self) -> Result<User, BackendError> {
        if self.access_token.is_none() {
            return Err(BackendError::Unauthorized("no access token".to_string()));
        }
        let url = format!("{}/auth/v1/user", self.base_url);
        let resp = self.request("GET", &url).call().map_err(map_ureq_error)?;
        resp.into_json()
            .map_err(|e| BackendError::Decode(e.to_string()))
    }

    fn subscribe(&self, table: &str, filter: Filter) -> Result<Subscription, BackendError> {
        realtime::subscribe(RealtimeParams {
            websocket_url: realtime::websocket_url(&self.base_url, &self.anon_key),
            access_token: self
                .access_token
                .clone()
                .unwrap_or_else(|| self.anon_key.clone()),
            table: table.to_string(),
            filter,
        })
    }
}

// ---------------------------------------------------------------------------
// Encoding helpers
// ---------------------------------------------------------------------------

/// Translate a [`Query`] into PostgREST query parameters.
fn postgrest_params(query: &Query) -> Vec<(String, String)> {
    let mut params = Vec::new();
    let select = query
        .columns
        .as_ref()
        .map(|cols| cols.join(","))
        .unwrap_or_else(|| "*".to_string());
    params.push(("select".to_string(), select));

    for filter in &query.filters {
        params.push((filter.column.clone(), format!("eq.{}", filter.value_literal())));
    }
    if let Some((column, direction)) = &query.order {
        let dir = match direction {
            Direction::Ascending => "asc",
            Direction::Descending => "desc",
        };
        params.push(("order".to_string(), format!("{column}.{dir}")));
    }
    if let Some(limit) = query.limit {
        params.push(("limit".to_string(), limit.to_string()));
    }
    params
}

/// Extract the total from a `Content-Range` header such as `0-4/27` or `*/0`.
fn parse_content_range_total(header: &str) -> Option<usize> {
    header.rsplit_once('/')?.1.trim().parse().ok()
}

/// Map a `ureq` failure onto the backend error taxonomy.
fn map_ureq_error(err: ureq::Error) -> BackendError {
    match err {
        ureq::Error::Status(status, resp) => {
            let body = resp.into_string().unwrap_or_default();
            let message = error_message(&body);
            match status {
                401 | 403 => BackendError::Unauthorized(message),
                404 => BackendError::NotFound(message),
                _ => BackendError::Status { status, message },
            }
        }
        ureq::Error::Transport(t) => BackendError::Transport(t.to_string()),
    }
}

/// Pull a readable message out of an error body, falling back to the raw text.
fn error_message(body: &str) -> String {
    let Ok(value) = serde_json::from_str::<Value>(body) else {
        return body.trim().to_string();
    };
    ["message", "msg", "error_description", "error"]
        .iter()
        .find_map(|k| value.get(*k).and_then(Value::as_str))
        .map(str::to_string)
        .unwrap_or_else(|| body.trim().to_string())
}
