//! Serverless analysis functions.
//!
//! Three stateless, request-scoped functions share one pipeline:
//!
//! 1. Resolve the function by name (`analyze-report`, `health-chat`,
//!    `analyze-vitals`).
//! 2. Authenticate the caller's bearer token against the backend.
//! 3. Parse the JSON body and run the handler.
//! 4. Record one activity-log line.
//!
//! [`FunctionRuntime::invoke`] is transport-agnostic; [`server`] exposes it
//! over HTTP for `vitalwatch serve`.

pub mod error;
pub mod findings;
pub mod handlers;
pub mod server;

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use serde_json::Value;

use crate::activity::{ActivityLog, FunctionLogEntry};
use crate::backend::{Backend, RestBackend};
use crate::config::VitalwatchConfig;
use crate::gateway::{ChatGateway, GatewayClient};

pub use error::FunctionError;
use handlers::HandlerContext;

/// Builds a backend client scoped to a caller's bearer token.
pub type BackendFactory = dyn Fn(&str) -> Box<dyn Backend> + Send + Sync;

/// Names accepted under `/functions/v1/`.
pub const FUNCTION_NAMES: [&str; 3] = ["analyze-report", "health-chat", "analyze-vitals"];

/// Room for JSON framing and escapes on top of the text itself.
const BODY_SLACK_BYTES: usize = 16 * 1024;

/// Status and JSON body of one invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionResponse {
    pub status: u16,
    pub body: Value,
}

/// Shared, immutable state for every invocation.
pub struct FunctionRuntime {
    gateway: Arc<dyn ChatGateway>,
    backend_for: Arc<BackendFactory>,
    max_input_chars: usize,
    activity: Option<ActivityLog>,
}

impl FunctionRuntime {
    pub fn new(
        gateway: Arc<dyn ChatGateway>,
        backend_for: Arc<BackendFactory>,
        max_input_chars: usize,
    ) -> Self {
        Self {
            gateway,
            backend_for,
            max_input_chars,
            activity: None,
        }
    }

    /// Production wiring: the configured AI gateway and a per-request
    /// [`RestBackend`].
    pub fn from_config(config: &VitalwatchConfig) -> Self {
        let backend_config = config.backend.clone();
        let backend_for: Arc<BackendFactory> = Arc::new(move |token: &str| {
            Box::new(RestBackend::from_config(&backend_config).with_token(token)) as Box<dyn Backend>
        });
        let runtime = Self::new(
            Arc::new(GatewayClient::from_config(&config.gateway)),
            backend_for,
            config.functions.max_input_chars,
        );
        match ActivityLog::default_location() {
            Some(log) if config.logging.activity_log => runtime.with_activity_log(log),
            _ => runtime,
        }
    }

    /// Largest request body accepted: `max_input_chars` of 4-byte UTF-8
    /// plus JSON framing.
    pub fn max_body_bytes(&self) -> usize {
        self.max_input_chars.saturating_mul(4).saturating_add(BODY_SLACK_BYTES)
    }

    pub fn with_activity_log(mut self, log: ActivityLog) -> Self {
        self.activity = Some(log);
        self
    }

    /// Run one function end to end. Never fails: every error class maps to
    /// a status and a JSON `{ "error": … }` body.
    pub fn invoke(&self, function: &str, authorization: Option<&str>, body: &str) -> FunctionResponse {
        let started = Instant::now();
        let mut user_id = None;

        let result = self.run(function, authorization, body, &mut user_id);
        let response = match &result {
            Ok(body) => FunctionResponse {
                status: 200,
                body: body.clone(),
            },
            Err(e) => {
                match e.status() {
                    500 => tracing::error!(function, error = %e, "function failed"),
                    _ => tracing::warn!(function, error = %e, "function rejected request"),
                }
                FunctionResponse {
                    status: e.status(),
                    body: e.body(),
                }
            }
        };

        if let Some(log) = &self.activity {
            log.record(&FunctionLogEntry {
                timestamp: Utc::now(),
                function: function.to_string(),
                status: response.status,
                latency_ms: started.elapsed().as_millis() as u64,
                user_id,
                abnormal: response.body.get("hasAbnormal").and_then(Value::as_bool),
                error: result.as_ref().err().map(|e| e.public_message().to_string()),
            });
        }

        response
    }

    fn run(
        &self,
        function: &str,
        authorization: Option<&str>,
        body: &str,
        user_id: &mut Option<String>,
    ) -> Result<Value, FunctionError> {
        if !FUNCTION_NAMES.contains(&function) {
            return Err(FunctionError::UnknownFunction(function.to_string()));
        }

        let token = bearer_token(authorization.ok_or(FunctionError::MissingAuthorization)?)
            .ok_or_else(|| FunctionError::Unauthorized("empty bearer token".to_string()))?;
        let backend = (self.backend_for)(token);
        let user = backend
            .current_user()
            .map_err(|e| FunctionError::Unauthorized(e.to_string()))?;
        *user_id = Some(user.id.clone());

        let body: Value =
            serde_json::from_str(body).map_err(|e| FunctionError::MalformedBody(e.to_string()))?;

        let ctx = HandlerContext {
            gateway: self.gateway.as_ref(),
            backend: backend.as_ref(),
            user: &user,
            max_input_chars: self.max_input_chars,
        };
        match function {
            "analyze-report" => handlers::analyze_report(&ctx, body),
            "health-chat" => handlers::health_chat(&ctx, body),
            _ => handlers::analyze_vitals(&ctx, body),
        }
    }
}

/// Extract the token from an `Authorization` header value. Accepts a bare
/// token as well as `Bearer <token>`.
fn bearer_token(header: &str) -> Option<&str> {
    let header = header.trim();
    let token = match (header.get(..6), header.get(6..)) {
        (Some(scheme), Some(rest))
            if scheme.eq_ignore_ascii_case("bearer")
                && rest.chars().next().is_none_or(char::is_whitespace) =>
        {
            rest.trim()
        }
        _ => header,
    };
    (!token.is_empty()).then_some(token)
}
