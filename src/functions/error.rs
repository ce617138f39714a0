use serde_json::{Value, json};
use thiserror::Error;

use crate::gateway::GatewayError;

/// Failure classes shared by every serverless function.
///
/// The `Display` text is for logs; [`FunctionError::public_message`] is what
/// the caller sees in the JSON `error` field.
#[derive(Debug, Error)]
pub enum FunctionError {
    #[error("missing authorization header")]
    MissingAuthorization,
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    #[error("invalid request body: {0}")]
    MalformedBody(String),
    #[error("missing required fields")]
    MissingFields,
    #[error("report text exceeds {limit} characters")]
    InputTooLong { limit: usize },
    #[error("conversation exceeds {limit} characters")]
    MessageTooLong { limit: usize },
    #[error("request body exceeds {limit} bytes")]
    BodyTooLarge { limit: usize },
    #[error("upstream rate limit")]
    RateLimited,
    #[error("upstream credits exhausted")]
    QuotaExhausted,
    #[error("upstream failure: {0}")]
    Upstream(String),
    #[error("internal error: {0}")]
    Internal(String),
    #[error("unknown function: {0}")]
    UnknownFunction(String),
}

impl FunctionError {
    pub fn status(&self) -> u16 {
        match self {
            Self::MissingAuthorization | Self::Unauthorized(_) => 401,
            Self::MalformedBody(_)
            | Self::MissingFields
            | Self::InputTooLong { .. }
            | Self::MessageTooLong { .. } => 400,
            Self::BodyTooLarge { .. } => 413,
            Self::RateLimited => 429,
            Self::QuotaExhausted => 402,
            Self::UnknownFunction(_) => 404,
            Self::Upstream(_) | Self::Internal(_) => 500,
        }
    }

    /// The message returned to the caller. Never includes upstream detail.
    pub fn public_message(&self) -> &'static str {
        match self {
            Self::MissingAuthorization => "Missing authorization header",
            Self::Unauthorized(_) => "Unauthorized",
            Self::MalformedBody(_) => "Invalid request body",
            Self::MissingFields => "Missing required fields",
            Self::InputTooLong { .. } => "Report text too long",
            Self::MessageTooLong { .. } => "Message too long",
            Self::BodyTooLarge { .. } => "Request body too large",
            Self::RateLimited => "Rate limit exceeded. Please try again later.",
            Self::QuotaExhausted => "AI credits exhausted. Please add credits to continue.",
            Self::Upstream(_) => "AI analysis failed",
            Self::Internal(_) => "Internal server error",
            Self::UnknownFunction(_) => "Function not found",
        }
    }

    pub fn body(&self) -> Value {
        json!({ "error": self.public_message() })
    }
}

impl From<GatewayError> for FunctionError {
    fn from(e: GatewayError) -> Self {
        match e {
            GatewayError::RateLimited => Self::RateLimited,
            GatewayError::QuotaExhausted => Self::QuotaExhausted,
            GatewayError::MissingApiKey => Self::Internal(e.to_string()),
            GatewayError::Upstream { .. } | GatewayError::Transport(_) | GatewayError::Empty => {
                Self::Upstream(e.to_string())
            }
        }
    }
}
