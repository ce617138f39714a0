//! HTTP host for the serverless functions.
//!
//! A `tiny_http` server shared by a fixed pool of worker threads. Routes:
//!
//! - `POST /functions/v1/<name>`: run a function
//! - `OPTIONS *`: CORS preflight
//! - `GET /health`: liveness probe
//!
//! Every response carries permissive CORS headers.
//!
//! Launched via `vitalwatch serve` (default: `http://127.0.0.1:9747`).

use std::io::{self, Cursor, Read};
use std::net::SocketAddr;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;

use anyhow::{Context, Result};
use serde_json::json;
use tiny_http::{Header, Method, Request, Response, Server, StatusCode};

use super::{FunctionError, FunctionRuntime};

const FUNCTIONS_PREFIX: &str = "/functions/v1/";

const CORS_HEADERS: [(&str, &str); 2] = [
    ("Access-Control-Allow-Origin", "*"),
    (
        "Access-Control-Allow-Headers",
        "authorization, x-client-info, apikey, content-type",
    ),
];

// ---------------------------------------------------------------------------
// Server lifecycle
// ---------------------------------------------------------------------------

/// A running functions server.
pub struct ServerHandle {
    server: Arc<Server>,
    workers: Vec<JoinHandle<()>>,
    addr: Option<SocketAddr>,
}

impl ServerHandle {
    /// The bound address (useful when binding port 0).
    pub fn addr(&self) -> Option<SocketAddr> {
        self.addr
    }

    /// Block until every worker exits.
    pub fn join(self) {
        for worker in self.workers {
            let _ = worker.join();
        }
    }

    /// Stop accepting requests and wait for in-flight ones to finish.
    pub fn shutdown(self) {
        for _ in 0..self.workers.len() {
            self.server.unblock();
        }
        self.join();
    }
}

/// Bind `addr` and start `workers` threads serving `runtime`.
pub fn start(addr: &str, runtime: Arc<FunctionRuntime>, workers: usize) -> Result<ServerHandle> {
    let server = Server::http(addr)
        .map_err(|e| anyhow::anyhow!("failed to start HTTP server on {addr}: {e}"))?;
    let server = Arc::new(server);
    let bound = server.server_addr().to_ip();

    let workers = (0..workers.max(1))
        .map(|n| {
            let server = Arc::clone(&server);
            let runtime = Arc::clone(&runtime);
            thread::Builder::new()
                .name(format!("functions-worker-{n}"))
                .spawn(move || worker_loop(&server, &runtime))
                .context("failed to spawn functions worker")
        })
        .collect::<Result<Vec<_>>>()?;

    tracing::info!(addr = %addr, workers = workers.len(), "functions server listening");
    Ok(ServerHandle {
        server,
        workers,
        addr: bound,
    })
}

/// Start the server and block until it stops.
pub fn serve(addr: &str, runtime: Arc<FunctionRuntime>, workers: usize) -> Result<()> {
    let handle = start(addr, runtime, workers)?;
    println!("vitalwatch functions running at http://{addr}{FUNCTIONS_PREFIX}");
    println!("Press Ctrl+C to stop.\n");
    handle.join();
    Ok(())
}

fn worker_loop(server: &Server, runtime: &FunctionRuntime) {
    // `recv` errors once the server is unblocked for shutdown.
    while let Ok(request) = server.recv() {
        handle_request(request, runtime);
    }
}

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

fn handle_request(mut request: Request, runtime: &FunctionRuntime) {
    let started = Instant::now();
    let method = request.method().clone();
    let url = request.url().to_string();
    let path = url.split('?').next().unwrap_or(&url).to_string();

    let (status, body) = match (&method, path.strip_prefix(FUNCTIONS_PREFIX)) {
        (Method::Options, _) => (200, None),
        (Method::Post, Some(name)) => {
            let limit = runtime.max_body_bytes();
            match read_body(request.as_reader(), limit) {
                Some(buf) => {
                    let authorization = header_value(&request, "Authorization");
                    let resp = runtime.invoke(name, authorization.as_deref(), &buf);
                    (resp.status, Some(resp.body.to_string()))
                }
                None => {
                    let err = FunctionError::BodyTooLarge { limit };
                    tracing::warn!(function = name, error = %err, "function rejected request");
                    (err.status(), Some(err.body().to_string()))
                }
            }
        }
        (_, Some(_)) => (405, Some(json!({ "error": "method not allowed" }).to_string())),
        (Method::Get, None) if path == "/health" => {
            (200, Some(json!({ "status": "ok" }).to_string()))
        }
        _ => (404, Some(json!({ "error": "not found" }).to_string())),
    };

    let response = build_response(status, body);
    if let Err(e) = request.respond(response) {
        tracing::debug!(error = %e, "failed to write response");
    }

    tracing::info!(
        method = %method,
        path = %path,
        status,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "request"
    );
}

// ---------------------------------------------------------------------------
// Response helpers
// ---------------------------------------------------------------------------

fn build_response(status: u16, body: Option<String>) -> Response<Cursor<Vec<u8>>> {
    let mut headers: Vec<(&str, &str)> = CORS_HEADERS.to_vec();
    let data = match body {
        Some(body) => {
            headers.push(("Content-Type", "application/json"));
            body.into_bytes()
        }
        None => b"ok".to_vec(),
    };

    headers
        .into_iter()
        .filter_map(|(k, v)| Header::from_bytes(k, v).ok())
        .fold(Response::from_data(data), |resp, h| resp.with_header(h))
        .with_status_code(StatusCode(status))
}

/// Read at most `limit` bytes of body. Returns `None` when the body is
/// longer; the remainder is drained so the client still gets a response.
/// A body that is not valid UTF-8 reads as empty and fails JSON parsing.
fn read_body(reader: &mut dyn Read, limit: usize) -> Option<String> {
    let mut buf = Vec::new();
    let mut capped = (&mut *reader).take(limit as u64 + 1);
    if let Err(e) = capped.read_to_end(&mut buf) {
        tracing::debug!(error = %e, "failed to read request body");
        return Some(String::new());
    }
    if buf.len() > limit {
        let _ = io::copy(reader, &mut io::sink());
        return None;
    }
    Some(String::from_utf8(buf).unwrap_or_default())
}

fn header_value(request: &Request, name: &str) -> Option<String> {
    request
        .headers()
        .iter()
        .find(|h| h.field.as_str().as_str().eq_ignore_ascii_case(name))
        .map(|h| h.value.as_str().to_string())
}
