/// Configuration schema and defaults for vitalwatch.
///
/// Defines the TOML-serializable configuration structure with all sections:
/// `[backend]`, `[gateway]`, `[functions]`, `[telemetry]`, `[reports]` and
/// `[logging]`.
///
/// Every field has a sensible built-in default. Users only need to set the
/// values they want to override.
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

/// Top-level vitalwatch configuration.
///
/// Maps directly to the `~/.vitalwatch/config.toml` and `.vitalwatch.toml`
/// file schemas. All sections and fields are optional.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct VitalwatchConfig {
    pub backend: BackendConfig,
    pub gateway: GatewayConfig,
    pub functions: FunctionsConfig,
    pub telemetry: TelemetryConfig,
    pub reports: ReportsConfig,
    pub logging: LoggingConfig,
}

// ---------------------------------------------------------------------------
// [backend]
// ---------------------------------------------------------------------------

/// Managed backend (database, auth, storage, realtime) connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    /// Project base URL, e.g. `https://xyz.supabase.co`.
    pub url: String,
    /// Public (anon) API key sent as the `apikey` header.
    pub anon_key: String,
    /// Optional user access token. A stored session takes precedence when
    /// this is empty.
    pub access_token: String,
    /// Storage bucket holding uploaded report files.
    pub storage_bucket: String,
    /// Per-request timeout in milliseconds.
    pub timeout_ms: u64,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:54321".to_string(),
            anon_key: String::new(),
            access_token: String::new(),
            storage_bucket: "medical-reports".to_string(),
            timeout_ms: 10_000,
        }
    }
}

impl BackendConfig {
    /// Base URL of the functions endpoint (`<url>/functions/v1`).
    pub fn functions_url(&self) -> String {
        format!("{}/functions/v1", self.url.trim_end_matches('/'))
    }
}

// ---------------------------------------------------------------------------
// [gateway]
// ---------------------------------------------------------------------------

/// AI gateway (OpenAI-compatible chat completions) settings. Only the
/// functions server talks to the gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Full chat-completions endpoint URL.
    pub url: String,
    /// Bearer API key. Usually supplied via `VITALWATCH_GATEWAY_API_KEY`.
    pub api_key: String,
    /// Model identifier forwarded in the request body.
    pub model: String,
    /// Request timeout in milliseconds.
    pub timeout_ms: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            url: "https://ai.gateway.lovable.dev/v1/chat/completions".to_string(),
            api_key: String::new(),
            model: "google/gemini-2.5-flash".to_string(),
            timeout_ms: 60_000,
        }
    }
}

// ---------------------------------------------------------------------------
// [functions]
// ---------------------------------------------------------------------------

/// Functions server settings (`vitalwatch serve`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FunctionsConfig {
    /// Endpoint clients invoke functions at. Empty means the backend's own
    /// `<backend.url>/functions/v1`.
    pub url: String,
    /// Address the HTTP server binds to.
    pub bind: String,
    /// Number of worker threads pulling requests off the server.
    pub workers: usize,
    /// Maximum accepted input length in characters.
    pub max_input_chars: usize,
}

impl Default for FunctionsConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            bind: "127.0.0.1:9747".to_string(),
            workers: 4,
            max_input_chars: 50_000,
        }
    }
}

// ---------------------------------------------------------------------------
// [telemetry]
// ---------------------------------------------------------------------------

/// Live telemetry feed settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    /// Number of samples kept in the rolling chart window.
    pub window_size: usize,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self { window_size: 50 }
    }
}

// ---------------------------------------------------------------------------
// [reports]
// ---------------------------------------------------------------------------

/// Report management settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportsConfig {
    /// Upload size ceiling in bytes, checked before any network call.
    pub max_upload_bytes: u64,
    /// Number of unread alerts shown on the reports page.
    pub alert_limit: usize,
}

impl Default for ReportsConfig {
    fn default() -> Self {
        Self {
            max_upload_bytes: 20 * 1024 * 1024,
            alert_limit: 5,
        }
    }
}

// ---------------------------------------------------------------------------
// [logging]
// ---------------------------------------------------------------------------

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default `tracing` filter directive (overridden by `VITALWATCH_LOG`).
    pub level: String,
    /// Whether function invocations are appended to the JSONL activity log.
    pub activity_log: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            activity_log: true,
        }
    }
}

impl VitalwatchConfig {
    /// Where clients send function invocations.
    pub fn functions_endpoint(&self) -> String {
        if self.functions.url.is_empty() {
            self.backend.functions_url()
        } else {
            self.functions.url.trim_end_matches('/').to_string()
        }
    }

    /// Annotated default config written by `vitalwatch config init`.
    pub fn default_toml() -> String {
        r#"# vitalwatch configuration
#
# Configuration hierarchy (highest precedence wins):
#   1. Environment variables (VITALWATCH_*)
#   2. Project config (.vitalwatch.toml in current directory)
#   3. User global config (~/.vitalwatch/config.toml)
#   4. Built-in defaults

[backend]
url = "http://localhost:54321"
anon_key = ""
access_token = ""                     # Optional; `vitalwatch login` stores a session instead
storage_bucket = "medical-reports"
timeout_ms = 10000

[gateway]
url = "https://ai.gateway.lovable.dev/v1/chat/completions"
api_key = ""                          # Prefer VITALWATCH_GATEWAY_API_KEY
model = "google/gemini-2.5-flash"
timeout_ms = 60000

[functions]
url = ""                              # e.g. http://127.0.0.1:9747/functions/v1 for `vitalwatch serve`
bind = "127.0.0.1:9747"
workers = 4
max_input_chars = 50000

[telemetry]
window_size = 50

[reports]
max_upload_bytes = 20971520           # 20 MiB
alert_limit = 5

[logging]
level = "info"
activity_log = true                   # ~/.vitalwatch/function-log.jsonl
"#
        .to_string()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_expected_values() {
        let config = VitalwatchConfig::default();
        assert_eq!(config.backend.storage_bucket, "medical-reports");
        assert_eq!(config.gateway.model, "google/gemini-2.5-flash");
        assert_eq!(config.functions.max_input_chars, 50_000);
        assert_eq!(config.telemetry.window_size, 50);
        assert_eq!(config.reports.max_upload_bytes, 20_971_520);
        assert_eq!(config.reports.alert_limit, 5);
        assert!(config.logging.activity_log);
    }

    #[test]
    fn deserialize_minimal_toml() {
        let toml_str = r#"
[backend]
url = "https://project.example.co"
"#;
        let config: VitalwatchConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.backend.url, "https://project.example.co");
        // Everything else falls back to defaults
        assert_eq!(config.backend.storage_bucket, "medical-reports");
        assert_eq!(config.telemetry.window_size, 50);
    }

    #[test]
    fn default_toml_parses_back() {
        let config: VitalwatchConfig = toml::from_str(&VitalwatchConfig::default_toml()).unwrap();
        assert_eq!(config.functions.bind, "127.0.0.1:9747");
        assert_eq!(config.reports.max_upload_bytes, 20 * 1024 * 1024);
    }

    #[test]
    fn functions_endpoint_prefers_override() {
        let mut config = VitalwatchConfig::default();
        assert_eq!(
            config.functions_endpoint(),
            "http://localhost:54321/functions/v1"
        );
        config.functions.url = "http://127.0.0.1:9747/functions/v1/".to_string();
        assert_eq!(
            config.functions_endpoint(),
            "http://127.0.0.1:9747/functions/v1"
        );
    }

    #[test]
    fn functions_url_strips_trailing_slash() {
        let backend = BackendConfig {
            url: "https://project.example.co/".to_string(),
            ..BackendConfig::default()
        };
        assert_eq!(
            backend.functions_url(),
            "https://project.example.co/functions/v1"
        );
    }
}
