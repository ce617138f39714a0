//! Device registry: list, create and pick the device that scopes telemetry.

use serde_json::json;
use thiserror::Error;

use crate::backend::{self, Backend, BackendError, Direction, Query};
use crate::models::{self, Device};

#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("Device name is required")]
    NameRequired,
    #[error("you must be signed in to add a device")]
    NotSignedIn(#[source] BackendError),
    #[error(transparent)]
    Backend(#[from] BackendError),
}

/// All devices visible to the current user, newest first.
pub fn list(backend: &dyn Backend) -> Result<Vec<Device>, DeviceError> {
    let query = Query::new().order("created_at", Direction::Descending);
    Ok(backend::select_as(backend, models::DEVICES, &query)?)
}

/// Register a device for the signed-in user. The name is trimmed and must
/// not be empty.
pub fn create(backend: &dyn Backend, name: &str) -> Result<Device, DeviceError> {
    let name = name.trim();
    if name.is_empty() {
        return Err(DeviceError::NameRequired);
    }
    let user = backend.current_user().map_err(DeviceError::NotSignedIn)?;
    let row = backend.insert(
        models::DEVICES,
        json!({ "name": name, "user_id": user.id }),
    )?;
    tracing::info!(device = name, "device registered");
    Ok(serde_json::from_value(row).map_err(BackendError::from)?)
}

/// The device to show when nothing is selected yet: the newest one.
pub fn default_selection(devices: &[Device]) -> Option<&Device> {
    devices.first()
}

/// Find a device by id or by case-insensitive name.
pub fn find<'a>(devices: &'a [Device], key: &str) -> Option<&'a Device> {
    devices
        .iter()
        .find(|d| d.id == key)
        .or_else(|| devices.iter().find(|d| d.name.eq_ignore_ascii_case(key)))
}
