/// AI gateway client for the serverless functions.
///
/// Talks to an OpenAI-compatible `chat/completions` endpoint using the
/// synchronous `ureq` HTTP client. The API key never leaves the functions
/// server; clients reach the model only through `/functions/v1/*`.
///
/// Upstream failures are classified so handlers can map them onto distinct
/// HTTP statuses:
///
/// - **429** → [`GatewayError::RateLimited`]
/// - **402** → [`GatewayError::QuotaExhausted`]
/// - anything else non-2xx → [`GatewayError::Upstream`]
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::schema::GatewayConfig;

// ---------------------------------------------------------------------------
// Request / response types for the chat-completions API
// ---------------------------------------------------------------------------

/// A single message in a chat conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    /// Build a system message.
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    /// Build a user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

/// Request body for `POST …/chat/completions`.
#[derive(Debug, Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("gateway API key is not configured")]
    MissingApiKey,
    #[error("gateway rate limit exceeded")]
    RateLimited,
    #[error("gateway credits exhausted")]
    QuotaExhausted,
    #[error("gateway returned {status}: {body}")]
    Upstream { status: u16, body: String },
    #[error("gateway request failed: {0}")]
    Transport(String),
    #[error("gateway returned an empty completion")]
    Empty,
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// Anything that can turn a conversation into a completion.
///
/// The functions server holds a `dyn ChatGateway` so handlers can be driven
/// by a canned gateway in tests.
pub trait ChatGateway: Send + Sync {
    fn complete(&self, messages: &[ChatMessage]) -> Result<String, GatewayError>;
}

/// Synchronous chat-completions client.
#[derive(Debug)]
pub struct GatewayClient {
    url: String,
    api_key: String,
    model: String,
    timeout: Duration,
}

impl GatewayClient {
    /// Build a client from the resolved config.
    pub fn from_config(config: &GatewayConfig) -> Self {
        Self {
            url: config.url.clone(),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            timeout: Duration::from_millis(config.timeout_ms),
        }
    }

    /// Return the model name for logging.
    pub fn model_name(&self) -> &str {
        &self.model
    }
}

impl ChatGateway for GatewayClient {
    fn complete(&self, messages: &[ChatMessage]) -> Result<String, GatewayError> {
        if self.api_key.is_empty() {
            return Err(GatewayError::MissingApiKey);
        }

        let body = CompletionRequest {
            model: &self.model,
            messages,
        };

        let resp = ureq::post(&self.url)
            .timeout(self.timeout)
            .set("Authorization", &format!("Bearer {}", self.api_key))
            .send_json(&body);

        let resp = match resp {
            Ok(resp) => resp,
            Err(ureq::Error::Status(status, resp)) => {
                let body = resp.into_string().unwrap_or_default();
                return Err(classify_status(status, body));
            }
            Err(ureq::Error::Transport(t)) => return Err(GatewayError::Transport(t.to_string())),
        };

        let parsed: CompletionResponse = resp
            .into_json()
            .map_err(|e| GatewayError::Transport(format!("invalid completion body: {e}")))?;
        first_content(parsed)
    }
}

/// Map a non-success upstream status onto the error taxonomy.
fn classify_status(status: u16, body: String) -> GatewayError {
    match status {
        429 => GatewayError::RateLimited,
        402 => GatewayError::QuotaExhausted,
        _ => GatewayError::Upstream { status, body },
    }
}

fn first_content(resp: CompletionResponse) -> Result<String, GatewayError> {
    resp.choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .filter(|c| !c.trim().is_empty())
        .ok_or(GatewayError::Empty)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_from_default_config() {
        let client = GatewayClient::from_config(&GatewayConfig::default());
        assert_eq!(client.model_name(), "google/gemini-2.5-flash");
        assert!(client.url.ends_with("/chat/completions"));
    }

    #[test]
    fn missing_api_key_fails_before_any_request() {
        let client = GatewayClient::from_config(&GatewayConfig::default());
        let result = client.complete(&[ChatMessage::user("hi")]);
        assert!(matches!(result, Err(GatewayError::MissingApiKey)));
    }

    #[test]
    fn statuses_are_classified() {
        assert!(matches!(
            classify_status(429, String::new()),
            GatewayError::RateLimited
        ));
        assert!(matches!(
            classify_status(402, String::new()),
            GatewayError::QuotaExhausted
        ));
        assert!(matches!(
            classify_status(503, "down".to_string()),
            GatewayError::Upstream { status: 503, .. }
        ));
    }

    #[test]
    fn completion_body_parses_first_choice() {
        let body: CompletionResponse = serde_json::from_str(
            r#"{"choices":[{"message":{"role":"assistant","content":"All normal."}}]}"#,
        )
        .unwrap();
        assert_eq!(first_content(body).unwrap(), "All normal.");
    }

    #[test]
    fn empty_completion_is_an_error() {
        let body: CompletionResponse = serde_json::from_str(r#"{"choices":[]}"#).unwrap();
        assert!(matches!(first_content(body), Err(GatewayError::Empty)));

        let blank: CompletionResponse =
            serde_json::from_str(r#"{"choices":[{"message":{"content":"  "}}]}"#).unwrap();
        assert!(matches!(first_content(blank), Err(GatewayError::Empty)));
    }

    #[test]
    fn chat_message_constructors() {
        assert_eq!(ChatMessage::system("s").role, "system");
        assert_eq!(ChatMessage::user("u").role, "user");
    }
}
