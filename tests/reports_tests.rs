/// Integration tests for report management and the analysis trigger.
///
/// Uploads go to the in-process backend; analysis runs the real
/// `analyze-report` function in process against a canned gateway, so the
/// report row update and alert insertion are exercised end to end.
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use serde_json::json;

use vitalwatch::alerts;
use vitalwatch::assistant::{Assistant, InProcessFunctions, InvokeError};
use vitalwatch::backend::{Backend, MemoryBackend};
use vitalwatch::functions::{BackendFactory, FunctionRuntime};
use vitalwatch::gateway::{ChatGateway, ChatMessage, GatewayError};
use vitalwatch::models::{ALERTS, REPORTS, ReportType};
use vitalwatch::reports::{self, ReportStore, UploadError, UploadRequest};

const BUCKET: &str = "medical-reports";
const LIMIT: u64 = 20 * 1024 * 1024;

/// Answers every completion with a fixed reply and remembers the last user
/// message it was sent.
struct CannedGateway {
    reply: String,
    last_user_message: Mutex<Option<String>>,
}

impl CannedGateway {
    fn new(reply: &str) -> Self {
        Self {
            reply: reply.to_string(),
            last_user_message: Mutex::new(None),
        }
    }

    fn last_user_message(&self) -> Option<String> {
        self.last_user_message.lock().unwrap().clone()
    }
}

impl ChatGateway for CannedGateway {
    fn complete(&self, messages: &[ChatMessage]) -> Result<String, GatewayError> {
        if let Some(m) = messages.iter().rev().find(|m| m.role == "user") {
            *self.last_user_message.lock().unwrap() = Some(m.content.clone());
        }
        Ok(self.reply.clone())
    }
}

fn runtime(backend: &MemoryBackend, gateway: Arc<CannedGateway>) -> FunctionRuntime {
    let shared = backend.clone();
    let backend_for: Arc<BackendFactory> =
        Arc::new(move |_token: &str| Box::new(shared.clone()) as Box<dyn Backend>);
    FunctionRuntime::new(gateway, backend_for, 50_000)
}

fn request(title: &str, report_type: ReportType, file_name: &str, bytes: &[u8]) -> UploadRequest {
    UploadRequest {
        title: title.to_string(),
        report_type: Some(report_type),
        file_name: file_name.to_string(),
        bytes: bytes.to_vec(),
        ..UploadRequest::default()
    }
}

/// Uploads in the same millisecond would share a storage path.
fn pause() {
    thread::sleep(Duration::from_millis(3));
}

// ---------------------------------------------------------------------------
// Upload
// ---------------------------------------------------------------------------

#[test]
fn oversized_upload_is_rejected_before_any_call() {
    let backend = MemoryBackend::with_user("u1");
    let store = ReportStore::new(&backend, BUCKET, LIMIT);
    let big = vec![0u8; (LIMIT + 1) as usize];

    let err = store
        .upload(&request("Scan", ReportType::Mri, "scan.dcm", &big))
        .unwrap_err();

    assert!(matches!(err, UploadError::TooLarge { .. }));
    assert_eq!(err.to_string(), "File size must be less than 20MB");
    assert_eq!(backend.calls(), 0);
}

#[test]
fn upload_requires_a_signed_in_user() {
    let backend = MemoryBackend::new();
    let store = ReportStore::new(&backend, BUCKET, LIMIT);
    let err = store
        .upload(&request("Bloods", ReportType::BloodTest, "b.pdf", b"%PDF"))
        .unwrap_err();
    assert!(matches!(err, UploadError::NotSignedIn(_)));
    assert!(backend.rows(REPORTS).is_empty());
}

#[test]
fn upload_records_metadata_under_user_prefix() {
    let backend = MemoryBackend::with_user("u1");
    let store = ReportStore::new(&backend, BUCKET, LIMIT);
    let mut req = request("Annual bloods", ReportType::BloodTest, "bloods.pdf", b"%PDF-1.4");
    req.notes = Some("fasting".to_string());
    req.report_date = chrono::NaiveDate::from_ymd_opt(2024, 2, 28);

    let report = store.upload(&req).unwrap();

    assert!(report.file_path.starts_with("u1/"));
    assert_eq!(report.file_name, "bloods.pdf");
    assert_eq!(report.report_type, ReportType::BloodTest);
    assert_eq!(report.notes.as_deref(), Some("fasting"));
    assert_eq!(report.report_date, req.report_date);
    assert_eq!(store.list().unwrap().len(), 1);
}

// ---------------------------------------------------------------------------
// List, search, delete, download
// ---------------------------------------------------------------------------

#[test]
fn delete_and_search_behave_on_refresh() {
    let backend = MemoryBackend::with_user("u1");
    let store = ReportStore::new(&backend, BUCKET, LIMIT);
    let bloods = store
        .upload(&request("Annual bloods", ReportType::BloodTest, "b.pdf", b"a"))
        .unwrap();
    pause();
    store
        .upload(&request("Knee", ReportType::Mri, "knee.dcm", b"b"))
        .unwrap();
    pause();
    store
        .upload(&request("Chest film", ReportType::Xray, "chest.png", b"c"))
        .unwrap();

    let listed = store.list().unwrap();
    assert_eq!(listed.len(), 3);
    assert_eq!(listed[0].title, "Chest film", "newest first");

    assert_eq!(reports::search(&listed, "").len(), 3);
    assert_eq!(reports::search(&listed, "KNEE").len(), 1);
    assert_eq!(reports::search(&listed, "x-ray")[0].title, "Chest film");
    assert_eq!(reports::search(&listed, "blood_test")[0].title, "Annual bloods");

    store.delete(&bloods).unwrap();
    assert!(backend.object(BUCKET, &bloods.file_path).is_none());

    let refreshed = store.list().unwrap();
    assert_eq!(refreshed.len(), 2);
    assert!(refreshed.iter().all(|r| r.id != bloods.id));
    assert_eq!(reports::search(&refreshed, "").len(), 2);
    assert!(reports::search(&refreshed, "bloods").is_empty());
}

#[test]
fn delete_succeeds_when_file_is_already_gone() {
    let backend = MemoryBackend::with_user("u1");
    let store = ReportStore::new(&backend, BUCKET, LIMIT);
    let report = store
        .upload(&request("Bloods", ReportType::BloodTest, "b.txt", b"Hb 13"))
        .unwrap();
    backend.remove(BUCKET, &report.file_path).unwrap();

    store.delete(&report).unwrap();
    assert!(store.list().unwrap().is_empty());
}

#[test]
fn download_writes_original_file_name_into_directory() {
    let backend = MemoryBackend::with_user("u1");
    let store = ReportStore::new(&backend, BUCKET, LIMIT);
    let report = store
        .upload(&request("Bloods", ReportType::BloodTest, "bloods.txt", b"Hb 13.2"))
        .unwrap();

    let dir = tempfile::tempdir().unwrap();
    let written = store.download(&report, dir.path()).unwrap();

    assert_eq!(written, dir.path().join("bloods.txt"));
    assert_eq!(std::fs::read(&written).unwrap(), b"Hb 13.2");
}

// ---------------------------------------------------------------------------
// Analysis
// ---------------------------------------------------------------------------

#[test]
fn elevated_finding_flags_report_and_raises_one_alert() {
    let backend = MemoryBackend::with_user("u1");
    let gateway = Arc::new(CannedGateway::new("Cholesterol is ELEVATED; see your GP."));
    let runtime = runtime(&backend, Arc::clone(&gateway));
    let functions = InProcessFunctions::new(&runtime, Some("token"));
    let assistant = Assistant::new(&functions);
    let store = ReportStore::new(&backend, BUCKET, LIMIT);
    let report = store
        .upload(&request("Lipids", ReportType::BloodTest, "lipids.txt", b"LDL 190 mg/dL"))
        .unwrap();

    let result = store.analyze(&report, &assistant, 50_000).unwrap();

    assert!(result.has_abnormal);
    let stored = store.get(&report.id).unwrap().unwrap();
    assert!(stored.has_abnormal_findings);
    assert_eq!(
        stored.ai_analysis.map(|a| a.analysis).as_deref(),
        Some("Cholesterol is ELEVATED; see your GP.")
    );
    let raised = backend.rows(ALERTS);
    assert_eq!(raised.len(), 1);
    assert_eq!(raised[0]["report_id"], json!(report.id));
    assert_eq!(alerts::unread_count(&backend).unwrap(), 1);

    let sent = gateway.last_user_message().unwrap();
    assert!(sent.contains("LDL 190 mg/dL"), "stored text is sent: {sent}");
}

#[test]
fn normal_finding_raises_no_alert() {
    let backend = MemoryBackend::with_user("u1");
    let gateway = Arc::new(CannedGateway::new("All values are within the reference range."));
    let runtime = runtime(&backend, gateway);
    let functions = InProcessFunctions::new(&runtime, Some("token"));
    let assistant = Assistant::new(&functions);
    let store = ReportStore::new(&backend, BUCKET, LIMIT);
    let report = store
        .upload(&request("Bloods", ReportType::BloodTest, "b.txt", b"Hb 13.2"))
        .unwrap();

    let result = store.analyze(&report, &assistant, 50_000).unwrap();

    assert!(!result.has_abnormal);
    assert!(backend.rows(ALERTS).is_empty());
    let stored = store.get(&report.id).unwrap().unwrap();
    assert!(!stored.has_abnormal_findings);
    assert!(stored.ai_analysis.is_some());
}

#[test]
fn binary_report_is_described_from_metadata() {
    let backend = MemoryBackend::with_user("u1");
    let gateway = Arc::new(CannedGateway::new("Nothing notable."));
    let runtime = runtime(&backend, Arc::clone(&gateway));
    let functions = InProcessFunctions::new(&runtime, Some("token"));
    let assistant = Assistant::new(&functions);
    let store = ReportStore::new(&backend, BUCKET, LIMIT);
    let mut req = request("Chest film", ReportType::Xray, "chest.png", &[0x89, 0x50, 0x00, 0xff]);
    req.notes = Some("persistent cough".to_string());
    let report = store.upload(&req).unwrap();

    store.analyze(&report, &assistant, 50_000).unwrap();

    let sent = gateway.last_user_message().unwrap();
    assert!(sent.contains("This is a xray report titled \"Chest film\""));
    assert!(sent.contains("persistent cough"));
}

#[test]
fn long_text_is_truncated_to_the_function_limit() {
    let backend = MemoryBackend::with_user("u1");
    let store = ReportStore::new(&backend, BUCKET, LIMIT);
    let body = "a".repeat(60_000);
    let report = store
        .upload(&request("Long", ReportType::Other, "long.txt", body.as_bytes()))
        .unwrap();

    assert_eq!(store.analysis_text(&report, 50_000).chars().count(), 50_000);
}

#[test]
fn analysis_without_session_surfaces_function_error() {
    let backend = MemoryBackend::with_user("u1");
    let gateway = Arc::new(CannedGateway::new("unused"));
    let runtime = runtime(&backend, gateway);
    let functions = InProcessFunctions::new(&runtime, None);
    let assistant = Assistant::new(&functions);

    let err = assistant
        .analyze_report("r1", "blood_test", "Hb 13.2")
        .unwrap_err();
    assert_eq!(err.status(), Some(401));
    assert!(matches!(err, InvokeError::Function { ref message, .. } if message == "Missing authorization header"));
}
