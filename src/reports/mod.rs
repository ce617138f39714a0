//! Report management: upload, list, search, download, delete and the
//! per-report analysis trigger.

mod upload;

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

pub use upload::{UploadError, UploadRequest, content_type_for, storage_path};

use crate::assistant::{Assistant, InvokeError, ReportAnalysis};
use crate::backend::{self, Backend, BackendError, Direction, Query};
use crate::models::{self, Report};

/// Report operations against one storage bucket.
pub struct ReportStore<'a> {
    backend: &'a dyn Backend,
    bucket: String,
    max_upload_bytes: u64,
}

impl<'a> ReportStore<'a> {
    pub fn new(backend: &'a dyn Backend, bucket: &str, max_upload_bytes: u64) -> Self {
        Self {
            backend,
            bucket: bucket.to_string(),
            max_upload_bytes,
        }
    }

    /// All reports, most recently uploaded first.
    pub fn list(&self) -> Result<Vec<Report>, BackendError> {
        let query = Query::new().order("upload_date", Direction::Descending);
        backend::select_as(self.backend, models::REPORTS, &query)
    }

    pub fn get(&self, id: &str) -> Result<Option<Report>, BackendError> {
        backend::select_first(self.backend, models::REPORTS, &Query::new().eq("id", id))
    }

    pub fn upload(&self, req: &UploadRequest) -> Result<Report, UploadError> {
        upload::upload(self.backend, &self.bucket, self.max_upload_bytes, req)
    }

    /// Delete the metadata row, then the stored file. A failure to remove
    /// the file is logged and does not fail the delete.
    pub fn delete(&self, report: &Report) -> Result<(), BackendError> {
        let deleted = self
            .backend
            .delete(models::REPORTS, &Query::new().eq("id", report.id.as_str()))?;
        if deleted == 0 {
            return Err(BackendError::NotFound(format!("report {}", report.id)));
        }
        if let Err(e) = self.backend.remove(&self.bucket, &report.file_path) {
            tracing::warn!(path = %report.file_path, error = %e, "report row deleted but file removal failed");
        }
        tracing::info!(report_id = %report.id, "report deleted");
        Ok(())
    }

    /// Write the stored file to `dest`. When `dest` is a directory the
    /// original file name is used.
    pub fn download(&self, report: &Report, dest: &Path) -> Result<PathBuf> {
        let bytes = self
            .backend
            .download(&self.bucket, &report.file_path)
            .with_context(|| format!("failed to download {}", report.file_path))?;
        let target = if dest.is_dir() {
            dest.join(&report.file_name)
        } else {
            dest.to_path_buf()
        };
        fs::write(&target, bytes).with_context(|| format!("failed to write {}", target.display()))?;
        Ok(target)
    }

    /// The text sent for analysis: the stored file when it is UTF-8 text
    /// (truncated to `max_chars`), otherwise a description built from the
    /// report's metadata.
    pub fn analysis_text(&self, report: &Report, max_chars: usize) -> String {
        match self.backend.download(&self.bucket, &report.file_path) {
            Ok(bytes) => match text_content(&bytes) {
                Some(text) => truncate_chars(text, max_chars).to_string(),
                None => describe(report),
            },
            Err(e) => {
                tracing::debug!(path = %report.file_path, error = %e, "report file unavailable, describing metadata");
                describe(report)
            }
        }
    }

    /// Run AI analysis for one report.
    pub fn analyze(
        &self,
        report: &Report,
        assistant: &Assistant<'_>,
        max_chars: usize,
    ) -> Result<ReportAnalysis, InvokeError> {
        let text = self.analysis_text(report, max_chars);
        assistant.analyze_report(&report.id, report.report_type.code(), &text)
    }
}

/// Case-insensitive substring match on title or type (code or label). An
/// empty query matches everything.
pub fn search<'r>(reports: &'r [Report], query: &str) -> Vec<&'r Report> {
    let needle = query.trim().to_lowercase();
    reports
        .iter()
        .filter(|r| {
            needle.is_empty()
                || r.title.to_lowercase().contains(&needle)
                || r.report_type.code().contains(&needle)
                || r.report_type.label().to_lowercase().contains(&needle)
        })
        .collect()
}

fn text_content(bytes: &[u8]) -> Option<&str> {
    let text = std::str::from_utf8(bytes).ok()?;
    let printable = !text.trim().is_empty() && !text.contains('\0');
    printable.then_some(text)
}

fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

fn describe(report: &Report) -> String {
    let mut text = format!(
        "This is a {} report titled \"{}\"",
        report.report_type.code(),
        report.title
    );
    if let Some(date) = report.report_date {
        text.push_str(&format!(", dated {date}"));
    }
    if let Some(notes) = report.notes.as_deref().filter(|n| !n.trim().is_empty()) {
        text.push_str(&format!(". Notes: {}", notes.trim()));
    }
    text
}
