/// Integration tests for the serverless functions over real HTTP.
///
/// Each test binds the functions server on an ephemeral port and talks to it
/// with `ureq`, the same client the assistant uses. The gateway is a stub
/// whose behaviour is chosen by the prompt text, so every error class can be
/// triggered through the public interface.
use std::sync::Arc;
use std::time::Duration;

use serde_json::{Value, json};

use vitalwatch::activity::ActivityLog;
use vitalwatch::activity::reporter::build_stats;
use vitalwatch::assistant::{Assistant, FunctionsClient};
use vitalwatch::backend::{Backend, MemoryBackend};
use vitalwatch::functions::server::{self, ServerHandle};
use vitalwatch::functions::{BackendFactory, FunctionRuntime};
use vitalwatch::gateway::{ChatGateway, ChatMessage, GatewayError};
use vitalwatch::models::{ALERTS, TelemetrySample};

/// Replies based on keywords in the last user message.
struct KeywordGateway;

impl ChatGateway for KeywordGateway {
    fn complete(&self, messages: &[ChatMessage]) -> Result<String, GatewayError> {
        let prompt = messages
            .iter()
            .rev()
            .find(|m| m.role == "user")
            .map(|m| m.content.as_str())
            .unwrap_or_default();
        if prompt.contains("RATE") {
            Err(GatewayError::RateLimited)
        } else if prompt.contains("QUOTA") {
            Err(GatewayError::QuotaExhausted)
        } else if prompt.contains("BOOM") {
            Err(GatewayError::Upstream {
                status: 500,
                body: "model crashed".to_string(),
            })
        } else if prompt.contains("Analyze this") {
            Ok("Haemoglobin is low; iron studies advised.".to_string())
        } else {
            Ok("Stay hydrated and rest.".to_string())
        }
    }
}

struct Harness {
    backend: MemoryBackend,
    handle: ServerHandle,
    base: String,
}

impl Harness {
    fn start() -> Self {
        Self::start_with(|runtime| runtime)
    }

    fn start_with(configure: impl FnOnce(FunctionRuntime) -> FunctionRuntime) -> Self {
        let backend = MemoryBackend::with_user("u1");
        let shared = backend.clone();
        let backend_for: Arc<BackendFactory> =
            Arc::new(move |_token: &str| Box::new(shared.clone()) as Box<dyn Backend>);
        let runtime = configure(FunctionRuntime::new(
            Arc::new(KeywordGateway),
            backend_for,
            MAX_INPUT_CHARS,
        ));
        let handle = server::start("127.0.0.1:0", Arc::new(runtime), 2).unwrap();
        let addr = handle.addr().expect("bound to an IP address");
        Self {
            backend,
            handle,
            base: format!("http://{addr}"),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base)
    }

    fn post(&self, function: &str, auth: Option<&str>, body: &str) -> Reply {
        let mut req = ureq::post(&self.url(&format!("/functions/v1/{function}")));
        if let Some(auth) = auth {
            req = req.set("Authorization", auth);
        }
        Reply::from(req.send_string(body))
    }

    fn stop(self) {
        self.handle.shutdown();
    }
}

struct Reply {
    status: u16,
    allow_origin: Option<String>,
    body: Value,
}

impl From<Result<ureq::Response, ureq::Error>> for Reply {
    fn from(result: Result<ureq::Response, ureq::Error>) -> Self {
        let resp = match result {
            Ok(resp) => resp,
            Err(ureq::Error::Status(_, resp)) => resp,
            Err(e) => panic!("transport error: {e}"),
        };
        let status = resp.status();
        let allow_origin = resp
            .header("Access-Control-Allow-Origin")
            .map(str::to_string);
        let text = resp.into_string().unwrap();
        let body = serde_json::from_str(&text).unwrap_or(Value::String(text));
        Self {
            status,
            allow_origin,
            body,
        }
    }
}

const AUTH: Option<&str> = Some("Bearer user-token");
const MAX_INPUT_CHARS: usize = 2_000;

// ---------------------------------------------------------------------------
// Routing and CORS
// ---------------------------------------------------------------------------

#[test]
fn preflight_and_every_response_allow_any_origin() {
    let h = Harness::start();

    let preflight = Reply::from(
        ureq::request("OPTIONS", &h.url("/functions/v1/analyze-report")).call(),
    );
    assert_eq!(preflight.status, 200);
    assert_eq!(preflight.allow_origin.as_deref(), Some("*"));

    let ok = h.post("health-chat", AUTH, r#"{"message":"hello"}"#);
    let unauthorized = h.post("health-chat", None, r#"{"message":"hello"}"#);
    let missing = h.post("no-such-function", AUTH, "{}");
    for reply in [&ok, &unauthorized, &missing] {
        assert_eq!(reply.allow_origin.as_deref(), Some("*"));
    }
    assert_eq!(ok.status, 200);
    assert_eq!(missing.status, 404);

    let health = Reply::from(ureq::get(&h.url("/health")).call());
    assert_eq!(health.status, 200);

    let wrong_method = Reply::from(ureq::get(&h.url("/functions/v1/health-chat")).call());
    assert_eq!(wrong_method.status, 405);

    h.stop();
}

// ---------------------------------------------------------------------------
// Error taxonomy
// ---------------------------------------------------------------------------

#[test]
fn each_error_class_maps_to_its_status() {
    let h = Harness::start();
    let too_long = format!(
        r#"{{"reportText":"{}","reportType":"xray"}}"#,
        "a".repeat(MAX_INPUT_CHARS + 1)
    );

    let cases: [(&str, Option<&str>, &str, u16, &str); 8] = [
        ("health-chat", None, r#"{"message":"hi"}"#, 401, "Missing authorization header"),
        ("health-chat", AUTH, "{not json", 400, "Invalid request body"),
        ("analyze-report", AUTH, r#"{"reportType":"xray"}"#, 400, "Missing required fields"),
        ("analyze-report", AUTH, &too_long, 400, "Report text too long"),
        ("health-chat", AUTH, r#"{"message":"RATE"}"#, 429, "Rate limit exceeded. Please try again later."),
        ("health-chat", AUTH, r#"{"message":"QUOTA"}"#, 402, "AI credits exhausted. Please add credits to continue."),
        ("health-chat", AUTH, r#"{"message":"BOOM"}"#, 500, "AI analysis failed"),
        ("analyze-vitals", AUTH, r#"{"hr":0,"spo2":0,"temp":0}"#, 400, "Missing required fields"),
    ];

    for (function, auth, body, status, message) in cases {
        let reply = h.post(function, auth, body);
        assert_eq!(reply.status, status, "{function} {body}");
        assert_eq!(reply.body["error"], json!(message), "{function} {body}");
    }

    h.backend.sign_out();
    let rejected = h.post("health-chat", AUTH, r#"{"message":"hi"}"#);
    assert_eq!(rejected.status, 401);
    assert_eq!(rejected.body["error"], json!("Unauthorized"));

    h.stop();
}

#[test]
fn oversized_body_is_rejected_before_the_function_runs() {
    let h = Harness::start();
    let huge = format!(
        r#"{{"reportText":"{}","reportType":"xray"}}"#,
        "a".repeat(MAX_INPUT_CHARS * 4 + 32 * 1024)
    );

    let reply = h.post("analyze-report", AUTH, &huge);
    assert_eq!(reply.status, 413);
    assert_eq!(reply.body["error"], json!("Request body too large"));
    assert_eq!(reply.allow_origin.as_deref(), Some("*"));

    let after = h.post("health-chat", AUTH, r#"{"message":"hi"}"#);
    assert_eq!(after.status, 200, "server keeps serving after a rejection");

    h.stop();
}

// ---------------------------------------------------------------------------
// End to end through the assistant
// ---------------------------------------------------------------------------

#[test]
fn assistant_reaches_functions_over_http() {
    let h = Harness::start();
    let report_id = h
        .backend
        .insert(
            "reports",
            json!({
                "user_id": "u1",
                "title": "Bloods",
                "report_type": "blood_test",
                "file_path": "u1/1.txt",
                "file_name": "b.txt",
            }),
        )
        .unwrap()["id"]
        .as_str()
        .unwrap()
        .to_string();

    let client = FunctionsClient::new(
        &h.url("/functions/v1"),
        "anon",
        Some("user-token".to_string()),
        Duration::from_secs(5),
    );
    let assistant = Assistant::new(&client);

    let answer = assistant.check_symptoms("mild headache").unwrap();
    assert_eq!(answer, "Stay hydrated and rest.");

    let analysis = assistant
        .analyze_report(&report_id, "blood_test", "Hb 9.1 g/dL")
        .unwrap();
    assert!(analysis.has_abnormal, "\"low\" is an abnormal keyword");
    assert_eq!(h.backend.rows(ALERTS).len(), 1);

    let sample = TelemetrySample {
        device_id: Some("d1".to_string()),
        hr: 120.0,
        spo2: 93.0,
        temp: 36.8,
        ts: chrono::Utc::now(),
    };
    let vitals = assistant.analyze_vitals(Some(&sample)).unwrap();
    assert!(!vitals.general_guidance);
    assert_eq!(vitals.flags.len(), 2);

    let err = assistant.check_symptoms("RATE").unwrap_err();
    assert_eq!(err.status(), Some(429));
    assert_eq!(err.to_string(), "Rate limit exceeded. Please try again later.");

    h.stop();
}

#[test]
fn zero_vitals_fall_back_to_general_guidance() {
    let h = Harness::start();
    let client = FunctionsClient::new(
        &h.url("/functions/v1"),
        "anon",
        Some("user-token".to_string()),
        Duration::from_secs(5),
    );
    let sample = TelemetrySample {
        device_id: None,
        hr: 0.0,
        spo2: 0.0,
        temp: 0.0,
        ts: chrono::Utc::now(),
    };

    let vitals = Assistant::new(&client).analyze_vitals(Some(&sample)).unwrap();

    assert!(vitals.general_guidance);
    assert!(vitals.flags.is_empty());
    assert_eq!(vitals.analysis, "Stay hydrated and rest.");
    h.stop();
}

// ---------------------------------------------------------------------------
// Activity log
// ---------------------------------------------------------------------------

#[test]
fn invocations_are_recorded_in_activity_log() {
    let dir = tempfile::tempdir().unwrap();
    let log = ActivityLog::at(dir.path().join("function-log.jsonl"));
    let h = Harness::start_with(|runtime| runtime.with_activity_log(log.clone()));

    h.post("health-chat", AUTH, r#"{"message":"hi"}"#);
    h.post("health-chat", AUTH, r#"{"message":"QUOTA"}"#);
    h.post(
        "analyze-report",
        AUTH,
        r#"{"reportText":"Hb 9","reportType":"blood_test"}"#,
    );
    h.stop();

    let entries = log.read_all();
    assert_eq!(entries.len(), 3);
    assert!(entries.iter().all(|e| e.user_id.as_deref() == Some("u1")));

    let stats = build_stats(&entries);
    assert_eq!(stats.total_invocations, 3);
    assert_eq!(stats.failures, 1);
    assert_eq!(stats.abnormal_reports, 1);
}
