//! Persisted login session (`~/.vitalwatch/session.json`).
//!
//! `vitalwatch login` stores the access token returned by the auth API so
//! later commands can reach the backend as the signed-in user. An access
//! token from config or `VITALWATCH_ACCESS_TOKEN` always wins over the
//! stored session.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::backend::rest::AuthTokens;
use crate::config::schema::BackendConfig;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    pub user_id: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

impl Session {
    pub fn from_tokens(tokens: AuthTokens) -> Self {
        let expires_at = tokens
            .expires_in
            .map(|secs| Utc::now() + chrono::Duration::seconds(secs as i64));
        Self {
            access_token: tokens.access_token,
            refresh_token: tokens.refresh_token,
            user_id: tokens.user.id,
            email: tokens.user.email,
            expires_at,
        }
    }

    pub fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|at| at <= Utc::now())
    }
}

/// Return the path to the session file.
pub fn session_path() -> Option<PathBuf> {
    crate::config::vitalwatch_home().map(|dir| dir.join("session.json"))
}

/// Read a session file. Missing or unreadable files yield `None`.
pub fn load_from(path: &Path) -> Option<Session> {
    let content = fs::read_to_string(path).ok()?;
    match serde_json::from_str(&content) {
        Ok(session) => Some(session),
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "ignoring malformed session file");
            None
        }
    }
}

pub fn save_to(path: &Path, session: &Session) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    let json = serde_json::to_string_pretty(session).context("failed to serialize session")?;
    fs::write(path, json).with_context(|| format!("failed to write {}", path.display()))
}

/// Delete a session file. Returns whether one existed.
pub fn remove_at(path: &Path) -> Result<bool> {
    if !path.exists() {
        return Ok(false);
    }
    fs::remove_file(path).with_context(|| format!("failed to remove {}", path.display()))?;
    Ok(true)
}

/// The stored session, if any.
pub fn load() -> Option<Session> {
    load_from(&session_path()?)
}

/// Pick the access token for backend calls: configured token first, then an
/// unexpired stored session.
pub fn resolve_access_token(config: &BackendConfig, session: Option<&Session>) -> Option<String> {
    if !config.access_token.is_empty() {
        return Some(config.access_token.clone());
    }
    session
        .filter(|s| !s.is_expired())
        .map(|s| s.access_token.clone())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session(expires_at: Option<DateTime<Utc>>) -> Session {
        Session {
            access_token: "stored".to_string(),
            refresh_token: None,
            user_id: "u1".to_string(),
            email: Some("a@example.com".to_string()),
            expires_at,
        }
    }

    #[test]
    fn save_load_remove() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state").join("session.json");
        let s = session(None);

        save_to(&path, &s).unwrap();
        assert_eq!(load_from(&path), Some(s));
        assert!(remove_at(&path).unwrap());
        assert!(!remove_at(&path).unwrap());
        assert_eq!(load_from(&path), None);
    }

    #[test]
    fn malformed_file_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.json");
        fs::write(&path, "{ not json").unwrap();
        assert_eq!(load_from(&path), None);
    }

    #[test]
    fn configured_token_beats_session() {
        let mut config = BackendConfig::default();
        let s = session(None);
        assert_eq!(resolve_access_token(&config, Some(&s)).as_deref(), Some("stored"));

        config.access_token = "configured".to_string();
        assert_eq!(resolve_access_token(&config, Some(&s)).as_deref(), Some("configured"));
    }

    #[test]
    fn expired_session_is_not_used() {
        let config = BackendConfig::default();
        let s = session(Some(Utc::now() - chrono::Duration::minutes(1)));
        assert!(s.is_expired());
        assert_eq!(resolve_access_token(&config, Some(&s)), None);
    }

    #[test]
    fn from_tokens_computes_expiry() {
        let tokens: AuthTokens = serde_json::from_value(serde_json::json!({
            "access_token": "jwt",
            "refresh_token": "r",
            "expires_in": 3600,
            "user": {"id": "u9", "email": "x@example.com"}
        }))
        .unwrap();
        let s = Session::from_tokens(tokens);
        assert_eq!(s.user_id, "u9");
        assert!(!s.is_expired());
    }
}
