//! Realtime change feed over the backend's Phoenix-channel websocket.
//!
//! One websocket per subscription. A reader thread joins the channel with a
//! `postgres_changes` INSERT binding, keeps the connection alive with
//! heartbeats, and forwards decoded rows into the subscription's channel.
//! Closing the [`Subscription`] raises a stop flag; the reader leaves the
//! channel and exits within one read timeout.
use std::io::ErrorKind;
use std::net::TcpStream;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Sender};
use std::thread;
use std::time::{Duration, Instant};

use serde_json::{Value, json};
use tungstenite::stream::MaybeTlsStream;
use tungstenite::{Message, WebSocket};

use super::{BackendError, ChangeEvent, Filter, Subscription};

/// Interval between Phoenix heartbeats.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// Socket read timeout; bounds how long a closed subscription lingers.
const READ_TIMEOUT: Duration = Duration::from_secs(1);

type Socket = WebSocket<MaybeTlsStream<TcpStream>>;

/// Everything needed to open one filtered subscription.
#[derive(Debug, Clone)]
pub struct RealtimeParams {
    pub websocket_url: String,
    pub access_token: String,
    pub table: String,
    pub filter: Filter,
}

/// Derive the realtime websocket URL from the backend base URL.
pub fn websocket_url(base_url: &str, anon_key: &str) -> String {
    let base = base_url.trim_end_matches('/');
    let ws = if let Some(rest) = base.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = base.strip_prefix("http://") {
        format!("ws://{rest}")
    } else {
        base.to_string()
    };
    format!("{ws}/realtime/v1/websocket?apikey={anon_key}&vsn=1.0.0")
}

/// Channel topic for a table/filter pair, e.g. `realtime:telemetry-<device>`.
pub fn topic_for(table: &str, filter: &Filter) -> String {
    format!("realtime:{table}-{}", filter.value_literal())
}

/// Connect, join the channel and start the reader thread.
pub fn subscribe(params: RealtimeParams) -> Result<Subscription, BackendError> {
    let (mut socket, _) = tungstenite::connect(params.websocket_url.as_str())
        .map_err(|e| BackendError::Realtime(format!("connect failed: {e}")))?;
    set_read_timeout(&socket, READ_TIMEOUT)?;

    let topic = topic_for(&params.table, &params.filter);
    let join = join_message(&topic, &params.table, &params.filter, &params.access_token, 1);
    socket
        .send(Message::Text(join.to_string().into()))
        .map_err(|e| BackendError::Realtime(format!("join failed: {e}")))?;

    let (tx, rx) = mpsc::channel();
    let stop = Arc::new(AtomicBool::new(false));
    let reader_stop = Arc::clone(&stop);
    let reader_topic = topic.clone();
    thread::Builder::new()
        .name(format!("realtime-{}", params.filter.value_literal()))
        .spawn(move || run_reader(socket, &reader_topic, &tx, &reader_stop))
        .map_err(|e| BackendError::Realtime(format!("failed to spawn reader: {e}")))?;

    tracing::info!(topic = %topic, "realtime subscription opened");
    Ok(Subscription::new(topic, rx, move || {
        stop.store(true, Ordering::SeqCst);
    }))
}

fn set_read_timeout(socket: &Socket, timeout: Duration) -> Result<(), BackendError> {
    let result = match socket.get_ref() {
        MaybeTlsStream::Plain(stream) => stream.set_read_timeout(Some(timeout)),
        MaybeTlsStream::Rustls(stream) => stream.get_ref().set_read_timeout(Some(timeout)),
        _ => Ok(()),
    };
    result.map_err(|e| BackendError::Realtime(format!("failed to set read timeout: {e}")))
}

fn run_reader(mut socket: Socket, topic: &str, tx: &Sender<ChangeEvent>, stop: &AtomicBool) {
    let mut next_ref: u64 = 2;
    let mut last_heartbeat = Instant::now();

    loop {
        if stop.load(Ordering::SeqCst) {
            let leave = leave_message(topic, next_ref);
            let _ = socket.send(Message::Text(leave.to_string().into()));
            let _ = socket.close(None);
            tracing::info!(topic = %topic, "realtime subscription closed");
            return;
        }

        if last_heartbeat.elapsed() >= HEARTBEAT_INTERVAL {
            let beat = heartbeat_message(next_ref);
            next_ref += 1;
            if let Err(e) = socket.send(Message::Text(beat.to_string().into())) {
                let _ = tx.send(ChangeEvent::Error(format!("heartbeat failed: {e}")));
                return;
            }
            last_heartbeat = Instant::now();
        }

        match socket.read() {
            Ok(Message::Text(text)) => match decode_message(topic, text.as_str()) {
                Some(event @ ChangeEvent::Error(_)) => {
                    tracing::warn!(topic = %topic, ?event, "realtime channel error");
                    let _ = tx.send(event);
                    return;
                }
                Some(event) => {
                    if tx.send(event).is_err() {
                        return;
                    }
                }
                None => {}
            },
            Ok(Message::Close(_)) => {
                let _ = tx.send(ChangeEvent::Error("connection closed by server".to_string()));
                return;
            }
            Ok(_) => {}
            Err(tungstenite::Error::Io(e))
                if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {}
            Err(e) => {
                let _ = tx.send(ChangeEvent::Error(format!("connection lost: {e}")));
                return;
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Phoenix protocol messages
// ---------------------------------------------------------------------------

fn join_message(topic: &str, table: &str, filter: &Filter, access_token: &str, msg_ref: u64) -> Value {
    json!({
        "topic": topic,
        "event": "phx_join",
        "payload": {
            "config": {
                "postgres_changes": [{
                    "event": "INSERT",
                    "schema": "public",
                    "table": table,
                    "filter": format!("{}=eq.{}", filter.column, filter.value_literal()),
                }]
            },
            "access_token": access_token,
        },
        "ref": msg_ref.to_string(),
    })
}

fn heartbeat_message(msg_ref: u64) -> Value {
    json!({
        "topic": "phoenix",
        "event": "heartbeat",
        "payload": {},
        "ref": msg_ref.to_string(),
    })
}

fn leave_message(topic: &str, msg_ref: u64) -> Value {
    json!({
        "topic": topic,
        "event": "phx_leave",
        "payload": {},
        "ref": msg_ref.to_string(),
    })
}

/// Decode one inbound frame. Returns `None` for frames that carry nothing
/// for the subscriber (replies, heartbeats, presence).
fn decode_message(topic: &str, text: &str) -> Option<ChangeEvent> {
    let msg: Value = serde_json::from_str(text).ok()?;
    if msg.get("topic").and_then(Value::as_str) != Some(topic) {
        return None;
    }
    let payload = msg.get("payload").cloned().unwrap_or(Value::Null);

    match msg.get("event").and_then(Value::as_str)? {
        "postgres_changes" => {
            let data = payload.get("data")?;
            if data.get("type").and_then(Value::as_str) != Some("INSERT") {
                return None;
            }
            data.get("record").cloned().map(ChangeEvent::Insert)
        }
        "phx_reply" if payload.get("status").and_then(Value::as_str) == Some("error") => {
            let reason = payload
                .pointer("/response/reason")
                .and_then(Value::as_str)
                .unwrap_or("join rejected");
            Some(ChangeEvent::Error(reason.to_string()))
        }
        "system" if payload.get("status").and_then(Value::as_str) == Some("error") => {
            let message = payload
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("subscription failed");
            Some(ChangeEvent::Error(message.to_string()))
        }
        "phx_error" => Some(ChangeEvent::Error("channel crashed".to_string())),
        "phx_close" => Some(ChangeEvent::Error("channel closed".to_string())),
        _ => None,
    }
}
