//! Line classification
//!
//! Upstream output mixes diagnostic lines, SSE `data:` lines and bare JSON.
//! Each line is tried against [`MATCH_ORDER`]; the first matcher that
//! accepts it produces the frame.

use super::completion::CompletionPolicy;
use super::{RelayError, RelayFrame};
use serde_json::Value;

/// Diagnostic line emitted by the backend for each generated token
pub const DEBUG_TOKEN_PREFIX: &str = "[debug] new token received: ";

/// SSE data field prefix
pub const SSE_DATA_PREFIX: &str = "data:";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineMatcher {
    DebugToken,
    SseData,
    Json,
    PlainText,
}

pub const MATCH_ORDER: [LineMatcher; 4] = [
    LineMatcher::DebugToken,
    LineMatcher::SseData,
    LineMatcher::Json,
    LineMatcher::PlainText,
];

/// Result of classifying one line
#[derive(Debug, Clone, PartialEq)]
pub struct Classified {
    pub matcher: LineMatcher,
    pub frame: RelayFrame,
    /// The line signals upstream completion
    pub completes: bool,
}

#[derive(Debug, Clone, Default)]
pub struct LineClassifier {
    policy: CompletionPolicy,
}

impl LineClassifier {
    pub fn new(policy: CompletionPolicy) -> Self {
        Self { policy }
    }

    /// Classify one line. Blank lines produce nothing.
    pub fn classify(&self, line: &str) -> Option<Classified> {
        if line.trim().is_empty() {
            return None;
        }
        MATCH_ORDER
            .into_iter()
            .find_map(|matcher| self.try_match(matcher, line))
    }

    fn try_match(&self, matcher: LineMatcher, line: &str) -> Option<Classified> {
        match matcher {
            LineMatcher::DebugToken => {
                let (_, value) = line.split_once(DEBUG_TOKEN_PREFIX)?;
                let token = value.trim();
                if token.is_empty() {
                    return None;
                }
                Some(Classified {
                    matcher,
                    frame: RelayFrame::Token {
                        token: token.to_string(),
                    },
                    completes: false,
                })
            }
            LineMatcher::SseData => {
                let rest = line.strip_prefix(SSE_DATA_PREFIX)?;
                let payload = rest.strip_prefix(' ').unwrap_or(rest);
                let completes = serde_json::from_str::<Value>(rest.trim())
                    .is_ok_and(|value| self.policy.is_complete_json(&value));
                Some(Classified {
                    matcher,
                    frame: RelayFrame::Passthrough(payload.to_string()),
                    completes,
                })
            }
            LineMatcher::Json => {
                let trimmed = line.trim();
                if !(trimmed.starts_with('{') && trimmed.ends_with('}')) {
                    return None;
                }
                match serde_json::from_str::<Value>(trimmed) {
                    Ok(value) => {
                        let completes = self.policy.is_complete_json(&value);
                        Some(Classified {
                            matcher,
                            frame: RelayFrame::Structured(value),
                            completes,
                        })
                    }
                    Err(e) => {
                        let err = RelayError::malformed_line(e.to_string());
                        tracing::debug!(error = %err, kind = ?err.kind, "Downgrading line to text");
                        None
                    }
                }
            }
            LineMatcher::PlainText => Some(Classified {
                matcher,
                frame: RelayFrame::Text {
                    text: line.to_string(),
                },
                completes: self.policy.is_complete_text(line),
            }),
        }
    }
}
