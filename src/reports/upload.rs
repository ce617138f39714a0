use std::fs;
use std::path::Path;

use anyhow::Context;
use chrono::{NaiveDate, Utc};
use serde_json::json;
use thiserror::Error;

use crate::backend::{Backend, BackendError};
use crate::models::{self, Report, ReportType};

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("Please fill in all required fields")]
    MissingFields,
    #[error("File size must be less than {}MB", limit / (1024 * 1024))]
    TooLarge { size: u64, limit: u64 },
    #[error("you must be signed in to upload reports")]
    NotSignedIn(#[source] BackendError),
    #[error("failed to store report file: {0}")]
    Storage(#[source] BackendError),
    #[error("failed to record report: {0}")]
    Metadata(#[source] BackendError),
}

/// Everything the upload form collects.
#[derive(Debug, Clone, Default)]
pub struct UploadRequest {
    pub title: String,
    pub report_type: Option<ReportType>,
    pub file_name: String,
    pub bytes: Vec<u8>,
    pub report_date: Option<NaiveDate>,
    pub notes: Option<String>,
}

impl UploadRequest {
    /// Build a request from a file on disk. The size is checked against
    /// `max_bytes` from the file's metadata before any bytes are read.
    pub fn from_file(
        path: &Path,
        title: &str,
        report_type: Option<ReportType>,
        max_bytes: u64,
    ) -> anyhow::Result<Self> {
        let size = fs::metadata(path)
            .with_context(|| format!("failed to read {}", path.display()))?
            .len();
        if size > max_bytes {
            return Err(UploadError::TooLarge {
                size,
                limit: max_bytes,
            }
            .into());
        }
        let bytes = fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Ok(Self {
            title: title.to_string(),
            report_type,
            file_name,
            bytes,
            ..Self::default()
        })
    }

    /// Local checks, run before any network call.
    pub fn validate(&self, max_bytes: u64) -> Result<ReportType, UploadError> {
        let report_type = self.report_type.ok_or(UploadError::MissingFields)?;
        if self.title.trim().is_empty() || self.file_name.is_empty() {
            return Err(UploadError::MissingFields);
        }
        let size = self.bytes.len() as u64;
        if size > max_bytes {
            return Err(UploadError::TooLarge {
                size,
                limit: max_bytes,
            });
        }
        Ok(report_type)
    }
}

/// Storage path for a new upload: `<user_id>/<unix-millis>.<ext>`.
pub fn storage_path(user_id: &str, file_name: &str, millis: i64) -> String {
    let ext = Path::new(file_name)
        .extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase())
        .filter(|e| !e.is_empty())
        .unwrap_or_else(|| "bin".to_string());
    format!("{user_id}/{millis}.{ext}")
}

/// Best guess at a MIME type from the file extension.
pub fn content_type_for(file_name: &str) -> &'static str {
    let ext = Path::new(file_name)
        .extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "pdf" => "application/pdf",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "txt" | "md" => "text/plain",
        "csv" => "text/csv",
        "json" => "application/json",
        "dcm" => "application/dicom",
        _ => "application/octet-stream",
    }
}

/// Validate, upload the file, then insert the metadata row.
///
/// The row is only written after the file is stored.
pub fn upload(
    backend: &dyn Backend,
    bucket: &str,
    max_bytes: u64,
    req: &UploadRequest,
) -> Result<Report, UploadError> {
    let report_type = req.validate(max_bytes)?;
    let user = backend.current_user().map_err(UploadError::NotSignedIn)?;

    let path = storage_path(&user.id, &req.file_name, Utc::now().timestamp_millis());
    backend
        .upload(bucket, &path, &req.bytes, content_type_for(&req.file_name))
        .map_err(UploadError::Storage)?;

    let row = json!({
        "user_id": user.id,
        "title": req.title.trim(),
        "report_type": report_type.code(),
        "file_path": path,
        "file_name": req.file_name,
        "file_size": req.bytes.len(),
        "report_date": req.report_date.map(|d| d.to_string()),
        "notes": req.notes.as_deref().map(str::trim).filter(|n| !n.is_empty()),
    });
    let stored = backend
        .insert(models::REPORTS, row)
        .map_err(UploadError::Metadata)?;
    let report: Report = serde_json::from_value(stored)
        .map_err(|e| UploadError::Metadata(BackendError::from(e)))?;

    tracing::info!(report_id = %report.id, path = %report.file_path, "report uploaded");
    Ok(report)
}
