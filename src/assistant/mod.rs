//! AI assistant invocation.
//!
//! Packages user input into function calls (`health-chat`,
//! `analyze-vitals`, `analyze-report`) and returns the text. The model is
//! never called directly; everything goes through the functions endpoint.

pub mod prompts;

use std::time::Duration;

use serde::Deserialize;
use serde_json::{Value, json};
use thiserror::Error;

use crate::functions::FunctionRuntime;
use crate::models::TelemetrySample;

#[derive(Debug, Error)]
pub enum InvokeError {
    /// Rejected locally before any call.
    #[error("{0}")]
    EmptyInput(&'static str),
    /// The function answered with an error body.
    #[error("{message}")]
    Function { status: u16, message: String },
    #[error("failed to reach functions endpoint: {0}")]
    Transport(String),
    #[error("unexpected function response: {0}")]
    Decode(String),
}

impl InvokeError {
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Function { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Anything that can run a named function with a JSON body.
pub trait FunctionInvoker {
    fn invoke(&self, function: &str, body: Value) -> Result<Value, InvokeError>;
}

// ---------------------------------------------------------------------------
// HTTP invoker
// ---------------------------------------------------------------------------

/// Calls functions over HTTP with the user's bearer token.
#[derive(Debug, Clone)]
pub struct FunctionsClient {
    endpoint: String,
    anon_key: String,
    access_token: Option<String>,
    agent: ureq::Agent,
}

impl FunctionsClient {
    pub fn new(endpoint: &str, anon_key: &str, access_token: Option<String>, timeout: Duration) -> Self {
        Self {
            endpoint: endpoint.trim_end_matches('/').to_string(),
            anon_key: anon_key.to_string(),
            access_token,
            agent: ureq::AgentBuilder::new().timeout(timeout).build(),
        }
    }
}

impl FunctionInvoker for FunctionsClient {
    fn invoke(&self, function: &str, body: Value) -> Result<Value, InvokeError> {
        let url = format!("{}/{function}", self.endpoint);
        let token = self.access_token.as_deref().unwrap_or(&self.anon_key);
        let result = self
            .agent
            .post(&url)
            .set("apikey", &self.anon_key)
            .set("Authorization", &format!("Bearer {token}"))
            .send_json(body);

        match result {
            Ok(resp) => resp
                .into_json::<Value>()
                .map_err(|e| InvokeError::Decode(e.to_string())),
            Err(ureq::Error::Status(status, resp)) => {
                let text = resp.into_string().unwrap_or_default();
                Err(InvokeError::Function {
                    status,
                    message: error_message(&text)
                        .unwrap_or_else(|| format!("function returned {status}")),
                })
            }
            Err(ureq::Error::Transport(t)) => Err(InvokeError::Transport(t.to_string())),
        }
    }
}

// ---------------------------------------------------------------------------
// In-process invoker
// ---------------------------------------------------------------------------

/// Runs functions directly on a [`FunctionRuntime`] without HTTP.
pub struct InProcessFunctions<'a> {
    runtime: &'a FunctionRuntime,
    authorization: Option<String>,
}

impl<'a> InProcessFunctions<'a> {
    pub fn new(runtime: &'a FunctionRuntime, access_token: Option<&str>) -> Self {
        Self {
            runtime,
            authorization: access_token.map(|t| format!("Bearer {t}")),
        }
    }
}

impl FunctionInvoker for InProcessFunctions<'_> {
    fn invoke(&self, function: &str, body: Value) -> Result<Value, InvokeError> {
        let resp = self
            .runtime
            .invoke(function, self.authorization.as_deref(), &body.to_string());
        if resp.status == 200 {
            Ok(resp.body)
        } else {
            Err(InvokeError::Function {
                status: resp.status,
                message: error_message_value(&resp.body)
                    .unwrap_or_else(|| format!("function returned {}", resp.status)),
            })
        }
    }
}

fn error_message(text: &str) -> Option<String> {
    serde_json::from_str::<Value>(text)
        .ok()
        .and_then(|v| error_message_value(&v))
}

fn error_message_value(body: &Value) -> Option<String> {
    body.get("error").and_then(Value::as_str).map(str::to_string)
}

// ---------------------------------------------------------------------------
// Assistant operations
// ---------------------------------------------------------------------------

/// Result of `analyze-report`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ReportAnalysis {
    pub analysis: String,
    #[serde(rename = "hasAbnormal")]
    pub has_abnormal: bool,
}

/// Result of a vitals check.
#[derive(Debug, Clone, PartialEq)]
pub struct VitalsAnalysis {
    pub analysis: String,
    /// Out-of-range messages; empty for general guidance.
    pub flags: Vec<String>,
    /// True when no readings were available and general guidance was
    /// requested instead.
    pub general_guidance: bool,
}

pub struct Assistant<'a> {
    functions: &'a dyn FunctionInvoker,
}

impl<'a> Assistant<'a> {
    pub fn new(functions: &'a dyn FunctionInvoker) -> Self {
        Self { functions }
    }

    pub fn check_symptoms(&self, symptoms: &str) -> Result<String, InvokeError> {
        let symptoms = require(symptoms, "Please describe your symptoms")?;
        self.chat_message(&prompts::symptom_check(symptoms), "Unable to analyze symptoms.")
    }

    pub fn medicine_info(&self, medicine: &str) -> Result<String, InvokeError> {
        let medicine = require(medicine, "Please enter a medicine name")?;
        self.chat_message(&prompts::medicine_info(medicine), "No information found.")
    }

    pub fn ask_about_reports(&self, query: &str) -> Result<String, InvokeError> {
        let query = require(query, "Please enter a question")?;
        let body = json!({
            "messages": [{ "role": "user", "content": prompts::report_query(query) }]
        });
        let resp = self.functions.invoke("health-chat", body)?;
        text_field(&resp, "response").ok_or_else(|| InvokeError::Decode("missing response".into()))
    }

    /// Analyze the latest sample, or ask for general guidance when there is
    /// no sample or every reading is zero.
    pub fn analyze_vitals(&self, sample: Option<&TelemetrySample>) -> Result<VitalsAnalysis, InvokeError> {
        let reading = sample.filter(|s| s.hr != 0.0 || s.spo2 != 0.0 || s.temp != 0.0);
        let Some(s) = reading else {
            let body = json!({
                "messages": [{ "role": "user", "content": prompts::GENERAL_GUIDANCE }]
            });
            let resp = self.functions.invoke("health-chat", body)?;
            return Ok(VitalsAnalysis {
                analysis: text_field(&resp, "response").unwrap_or_else(|| {
                    "Connect a device to get personalized health analysis based on your vitals."
                        .to_string()
                }),
                flags: Vec::new(),
                general_guidance: true,
            });
        };

        let resp = self.functions.invoke(
            "analyze-vitals",
            json!({ "hr": s.hr, "spo2": s.spo2, "temp": s.temp, "type": "analyze" }),
        )?;
        let analysis = text_field(&resp, "analysis")
            .ok_or_else(|| InvokeError::Decode("missing analysis".into()))?;
        let flags = resp
            .get("flags")
            .and_then(Value::as_array)
            .map(|flags| {
                flags
                    .iter()
                    .filter_map(|f| f.get("message").and_then(Value::as_str))
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();
        Ok(VitalsAnalysis {
            analysis,
            flags,
            general_guidance: false,
        })
    }

    /// Run `analyze-report` for a stored report.
    pub fn analyze_report(
        &self,
        report_id: &str,
        report_type: &str,
        report_text: &str,
    ) -> Result<ReportAnalysis, InvokeError> {
        let report_text = require(report_text, "Report has no content to analyze")?;
        let resp = self.functions.invoke(
            "analyze-report",
            json!({ "reportText": report_text, "reportType": report_type, "reportId": report_id }),
        )?;
        serde_json::from_value(resp).map_err(|e| InvokeError::Decode(e.to_string()))
    }

    fn chat_message(&self, message: &str, fallback: &str) -> Result<String, InvokeError> {
        let resp = self.functions.invoke("health-chat", json!({ "message": message }))?;
        Ok(text_field(&resp, "response")
            .or_else(|| text_field(&resp, "message"))
            .unwrap_or_else(|| fallback.to_string()))
    }
}

fn require<'s>(input: &'s str, message: &'static str) -> Result<&'s str, InvokeError> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        Err(InvokeError::EmptyInput(message))
    } else {
        Ok(trimmed)
    }
}

fn text_field(body: &Value, key: &str) -> Option<String> {
    body.get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}
