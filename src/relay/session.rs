//! Session identifiers

use super::RelayError;
use std::fmt;

/// Opaque id correlating one client relay with one upstream conversation.
///
/// Only blankness is checked; the value is forwarded verbatim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionId(String);

impl SessionId {
    pub fn parse(raw: &str) -> Result<Self, RelayError> {
        if raw.trim().is_empty() {
            return Err(RelayError::invalid_argument("Invalid session id"));
        }
        Ok(Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
