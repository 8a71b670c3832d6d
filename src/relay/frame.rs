//! Outbound relay frames

use super::completion::COMPLETION_SENTINEL;
use serde_json::{json, Value};

pub const CONNECT_NOTICE: &str = "Relay connection opened";
pub const DISCONNECT_NOTICE: &str = "Relay connection closed";
pub const UPSTREAM_COMPLETED: &str = "Upstream signaled completion";
pub const SYNTHESIZED_COMPLETION: &str = "Upstream stream ended without a completion signal";

/// One unit sent to the client, flushed as a single `data:` event
#[derive(Debug, Clone, PartialEq)]
pub enum RelayFrame {
    /// Lifecycle notice (connect/disconnect)
    Notice { message: String },
    /// Token extracted from a debug line
    Token { token: String },
    /// Unstructured upstream line
    Text { text: String },
    /// Payload of an upstream `data:` line, forwarded unchanged
    Passthrough(String),
    /// Bare JSON object line, re-serialized
    Structured(Value),
    Error { error: String },
    /// The one terminal frame of a relay
    Terminal { message: String },
}

impl RelayFrame {
    pub fn notice(message: impl Into<String>) -> Self {
        Self::Notice {
            message: message.into(),
        }
    }

    pub fn error(error: impl Into<String>) -> Self {
        Self::Error {
            error: error.into(),
        }
    }

    pub fn terminal(upstream_signaled: bool) -> Self {
        let message = if upstream_signaled {
            UPSTREAM_COMPLETED
        } else {
            SYNTHESIZED_COMPLETION
        };
        Self::Terminal {
            message: message.to_string(),
        }
    }

    /// Event data for this frame
    pub fn data(&self) -> String {
        match self {
            Self::Notice { message } => json!({ "message": message }).to_string(),
            Self::Token { token } => json!({ "token": token }).to_string(),
            Self::Text { text } => json!({ "text": text }).to_string(),
            Self::Passthrough(payload) => payload.clone(),
            Self::Structured(value) => value.to_string(),
            Self::Error { error } => json!({ "error": error }).to_string(),
            Self::Terminal { message } => json!({
                "message": message,
                "status": COMPLETION_SENTINEL
            })
            .to_string(),
        }
    }
}
