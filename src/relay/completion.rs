//! Completion detection
//!
//! Every completion decision in the relay goes through [`CompletionPolicy`].
//! Free text matches the keyword as a plain substring, so unrelated content
//! containing it ends the relay early.

use serde_json::Value;

/// Value of the `status` field that marks the upstream as finished
pub const COMPLETION_SENTINEL: &str = "COMPLETED";

#[derive(Debug, Clone)]
pub struct CompletionPolicy {
    keyword: String,
}

impl Default for CompletionPolicy {
    fn default() -> Self {
        Self::new(COMPLETION_SENTINEL)
    }
}

impl CompletionPolicy {
    pub fn new(keyword: impl Into<String>) -> Self {
        Self {
            keyword: keyword.into(),
        }
    }

    /// Structured form: `status`, `message`/`token` substring, or `done: true`
    pub fn is_complete_json(&self, value: &Value) -> bool {
        let Some(obj) = value.as_object() else {
            return false;
        };

        if obj.get("status").and_then(Value::as_str) == Some(self.keyword.as_str()) {
            return true;
        }

        let mentions_keyword = |field: &str| {
            obj.get(field)
                .and_then(Value::as_str)
                .is_some_and(|s| s.contains(&self.keyword))
        };
        if mentions_keyword("message") || mentions_keyword("token") {
            return true;
        }

        obj.get("done").and_then(Value::as_bool) == Some(true)
    }

    /// Unstructured form: case-sensitive substring match
    pub fn is_complete_text(&self, line: &str) -> bool {
        line.contains(&self.keyword)
    }
}
