//! Unread alert listing and dismissal.

use serde_json::json;

use crate::backend::{self, Backend, BackendError, Direction, Query};
use crate::models::{self, Alert};

/// Newest unread alerts, at most `limit`.
pub fn unread(backend: &dyn Backend, limit: usize) -> Result<Vec<Alert>, BackendError> {
    let query = Query::new()
        .eq("is_read", false)
        .order("created_at", Direction::Descending)
        .limit(limit);
    backend::select_as(backend, models::ALERTS, &query)
}

/// Number of unread alerts.
pub fn unread_count(backend: &dyn Backend) -> Result<usize, BackendError> {
    backend.count(models::ALERTS, &Query::new().eq("is_read", false))
}

/// Mark one alert as read. It will not appear in later [`unread`] results.
pub fn mark_read(backend: &dyn Backend, id: &str) -> Result<(), BackendError> {
    let updated = backend.update(
        models::ALERTS,
        &Query::new().eq("id", id),
        json!({ "is_read": true }),
    )?;
    if updated == 0 {
        return Err(BackendError::NotFound(format!("alert {id}")));
    }
    tracing::debug!(alert_id = id, "alert marked read");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;

    fn seed(backend: &MemoryBackend, message: &str) -> String {
        let row = backend
            .insert(
                models::ALERTS,
                json!({"user_id": "u1", "alert_type": "abnormal_report", "message": message}),
            )
            .unwrap();
        row["id"].as_str().unwrap().to_string()
    }

    #[test]
    fn read_alert_never_reappears() {
        let backend = MemoryBackend::with_user("u1");
        let first = seed(&backend, "first");
        seed(&backend, "second");
        assert_eq!(unread_count(&backend).unwrap(), 2);

        mark_read(&backend, &first).unwrap();
        let remaining = unread(&backend, 10).unwrap();
        assert_eq!(remaining.len(), 1);
        assert!(remaining.iter().all(|a| a.id != first));
        assert_eq!(unread_count(&backend).unwrap(), 1);
    }

    #[test]
    fn unread_respects_limit() {
        let backend = MemoryBackend::with_user("u1");
        for i in 0..7 {
            seed(&backend, &format!("alert {i}"));
        }
        assert_eq!(unread(&backend, 5).unwrap().len(), 5);
    }

    #[test]
    fn marking_unknown_alert_is_not_found() {
        let backend = MemoryBackend::with_user("u1");
        assert!(matches!(
            mark_read(&backend, "missing"),
            Err(BackendError::NotFound(_))
        ));
    }
}
