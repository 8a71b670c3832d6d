//! Relay error types

use std::time::Duration;
use thiserror::Error;

/// Relay error with classification
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct RelayError {
    pub kind: RelayErrorKind,
    pub message: String,
}

impl RelayError {
    pub fn new(kind: RelayErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::new(RelayErrorKind::InvalidArgument, message)
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(RelayErrorKind::Network, message)
    }

    pub fn server_error(message: impl Into<String>) -> Self {
        Self::new(RelayErrorKind::ServerError, message)
    }

    pub fn rejected(message: impl Into<String>) -> Self {
        Self::new(RelayErrorKind::Rejected, message)
    }

    pub fn stream_read(message: impl Into<String>) -> Self {
        Self::new(RelayErrorKind::StreamRead, message)
    }

    pub fn idle_timeout(after: Duration) -> Self {
        Self::new(
            RelayErrorKind::IdleTimeout,
            format!("Upstream sent nothing for {}ms", after.as_millis()),
        )
    }

    /// Upstream accepted the request but sent no response headers in time
    pub fn response_timeout(after: Duration) -> Self {
        Self::new(
            RelayErrorKind::IdleTimeout,
            format!("Upstream did not respond within {}ms", after.as_millis()),
        )
    }

    pub fn malformed_line(message: impl Into<String>) -> Self {
        Self::new(RelayErrorKind::MalformedLine, message)
    }

    /// Classify a reqwest failure raised while establishing the upstream call
    pub fn from_connect(e: &reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::network(format!("Upstream connect timeout: {e}"))
        } else if e.is_connect() {
            Self::network(format!("Upstream connection failed: {e}"))
        } else {
            Self::network(format!("Upstream request failed: {e}"))
        }
    }

    /// Classify a non-2xx upstream status
    pub fn from_status(status: reqwest::StatusCode) -> Self {
        let reason = status.canonical_reason().unwrap_or("");
        let message = format!("Upstream connection failed: {} {reason}", status.as_u16());
        if status.is_server_error() {
            Self::server_error(message.trim_end())
        } else {
            Self::rejected(message.trim_end())
        }
    }
}

/// Error classification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayErrorKind {
    /// Missing or blank session id - rejected before any stream opens
    InvalidArgument,
    /// Connect failure or timeout - retryable
    Network,
    /// Upstream answered 5xx - retryable
    ServerError,
    /// Upstream answered another non-2xx status - not retryable
    Rejected,
    /// Upstream body failed mid-stream
    StreamRead,
    /// No chunk arrived within the idle-read timeout
    IdleTimeout,
    /// Line looked structured but did not parse; downgraded to text
    MalformedLine,
}

impl RelayErrorKind {
    pub fn is_retryable(self) -> bool {
        matches!(self, Self::Network | Self::ServerError)
    }

    /// Failures that surface to the client as an in-stream error frame
    pub fn is_upstream(self) -> bool {
        matches!(
            self,
            Self::Network | Self::ServerError | Self::Rejected | Self::StreamRead | Self::IdleTimeout
        )
    }
}
