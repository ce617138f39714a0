//! Row types persisted by the managed backend.
//!
//! These mirror the `devices`, `telemetry`, `reports` and `alerts` tables.
//! The backend owns the schema; the client only reads and writes rows.

use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Table names.
pub const DEVICES: &str = "devices";
pub const TELEMETRY: &str = "telemetry";
pub const REPORTS: &str = "reports";
pub const ALERTS: &str = "alerts";

/// An authenticated user as returned by the auth API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

/// A registered monitoring device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Device {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

/// One vital-sign reading. Immutable once written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetrySample {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,
    /// Heart rate in beats per minute.
    pub hr: f64,
    /// Blood oxygen saturation in percent.
    pub spo2: f64,
    /// Body temperature in °C.
    pub temp: f64,
    pub ts: DateTime<Utc>,
}

/// Kind of medical report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportType {
    BloodTest,
    Xray,
    CtScan,
    Mri,
    Ultrasound,
    #[serde(other)]
    Other,
}

impl ReportType {
    pub const ALL: [ReportType; 6] = [
        ReportType::BloodTest,
        ReportType::Xray,
        ReportType::CtScan,
        ReportType::Mri,
        ReportType::Ultrasound,
        ReportType::Other,
    ];

    /// Stored code, e.g. `blood_test`.
    pub fn code(self) -> &'static str {
        match self {
            Self::BloodTest => "blood_test",
            Self::Xray => "xray",
            Self::CtScan => "ct_scan",
            Self::Mri => "mri",
            Self::Ultrasound => "ultrasound",
            Self::Other => "other",
        }
    }

    /// Human-readable label, e.g. `Blood Test`.
    pub fn label(self) -> &'static str {
        match self {
            Self::BloodTest => "Blood Test",
            Self::Xray => "X-Ray",
            Self::CtScan => "CT Scan",
            Self::Mri => "MRI",
            Self::Ultrasound => "Ultrasound",
            Self::Other => "Other",
        }
    }

    /// Parse a code or label, ignoring case and separators.
    pub fn parse(s: &str) -> Option<Self> {
        let wanted: String = s
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .collect::<String>()
            .to_ascii_lowercase();
        Self::ALL.into_iter().find(|t| {
            let code: String = t.code().chars().filter(|c| *c != '_').collect();
            let label: String = t
                .label()
                .chars()
                .filter(|c| c.is_ascii_alphanumeric())
                .collect::<String>()
                .to_ascii_lowercase();
            wanted == code || wanted == label
        })
    }
}

impl fmt::Display for ReportType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// AI analysis payload stored on a report row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AiAnalysis {
    pub analysis: String,
    pub analyzed_at: DateTime<Utc>,
}

/// Metadata row for an uploaded medical report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Report {
    pub id: String,
    #[serde(default)]
    pub user_id: Option<String>,
    pub title: String,
    pub report_type: ReportType,
    pub file_path: String,
    pub file_name: String,
    #[serde(default)]
    pub file_size: Option<u64>,
    pub upload_date: DateTime<Utc>,
    #[serde(default)]
    pub report_date: Option<NaiveDate>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub ai_analysis: Option<AiAnalysis>,
    #[serde(default)]
    pub has_abnormal_findings: bool,
}

/// Alert raised by the report-analysis function.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub id: String,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub report_id: Option<String>,
    pub alert_type: String,
    pub message: String,
    #[serde(default)]
    pub is_read: bool,
    pub created_at: DateTime<Utc>,
}
