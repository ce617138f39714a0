use std::fs::{self, OpenOptions, create_dir_all};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Function log entry (JSONL activity)
// ---------------------------------------------------------------------------

/// A single entry in the function activity log (`~/.vitalwatch/function-log.jsonl`).
///
/// One line per serverless function invocation, successful or not. Read back
/// by the reporter for `vitalwatch activity`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionLogEntry {
    pub timestamp: DateTime<Utc>,
    /// Function name, e.g. `"analyze-report"`.
    pub function: String,
    /// HTTP status returned to the caller.
    pub status: u16,
    pub latency_ms: u64,
    /// Authenticated caller, when authentication got that far.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    /// Abnormal-finding flag (only set by `analyze-report`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub abnormal: Option<bool>,
    /// Public error message for failed invocations.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl FunctionLogEntry {
    pub fn succeeded(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

// ---------------------------------------------------------------------------
// Log handle
// ---------------------------------------------------------------------------

/// Append-only JSONL log at a fixed path.
#[derive(Debug, Clone)]
pub struct ActivityLog {
    path: PathBuf,
}

impl ActivityLog {
    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// The per-user log, or `None` when no home directory is available.
    pub fn default_location() -> Option<Self> {
        function_log_path().map(Self::at)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Record one entry. Best-effort: failures are logged and swallowed.
    pub fn record(&self, entry: &FunctionLogEntry) {
        if let Err(e) = self.append(entry) {
            tracing::debug!(path = %self.path.display(), error = %e, "failed to append activity log");
        }
    }

    /// Read all entries, skipping malformed lines. Returns an empty vec if
    /// the file does not exist or cannot be read.
    pub fn read_all(&self) -> Vec<FunctionLogEntry> {
        let Ok(file) = fs::File::open(&self.path) else {
            return Vec::new();
        };

        BufReader::new(file)
            .lines()
            .map_while(Result::ok)
            .filter_map(|line| serde_json::from_str::<FunctionLogEntry>(&line).ok())
            .collect()
    }

    /// Read entries from the last `days` days. `None` returns everything.
    pub fn read_since_days(&self, days: Option<u32>) -> Vec<FunctionLogEntry> {
        let entries = self.read_all();

        let Some(days) = days else {
            return entries;
        };

        // A window reaching past the earliest representable time keeps everything.
        let Some(cutoff) = chrono::Duration::try_days(i64::from(days))
            .and_then(|span| Utc::now().checked_sub_signed(span))
        else {
            return entries;
        };
        entries
            .into_iter()
            .filter(|e| e.timestamp >= cutoff)
            .collect()
    }

    fn append(&self, entry: &FunctionLogEntry) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            create_dir_all(parent)?;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        let json = serde_json::to_string(entry)?;
        writeln!(file, "{json}")?;

        Ok(())
    }
}

/// Return the path to the function log file.
pub fn function_log_path() -> Option<PathBuf> {
    crate::config::vitalwatch_home().map(|dir| dir.join("function-log.jsonl"))
}
