//! Structured log event as stored in the ring and sent to subscribers.

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One log record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEvent {
    /// RFC 3339 timestamp with nanoseconds.
    pub time: String,
    pub level: String,
    pub msg: String,
    /// Event fields; span fields are nested under the span name.
    #[serde(default)]
    pub attrs: Map<String, Value>,
}

impl LogEvent {
    /// Event stamped with the current time.
    #[must_use]
    pub fn now(level: impl Into<String>, msg: impl Into<String>) -> Self {
        Self {
            time: Utc::now().to_rfc3339_opts(SecondsFormat::Nanos, true),
            level: level.into(),
            msg: msg.into(),
            attrs: Map::new(),
        }
    }

    /// Adds an attribute.
    #[must_use]
    pub fn with_attr(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attrs.insert(key.into(), value.into());
        self
    }

    /// Serializes to a newline-terminated JSON line.
    #[must_use]
    pub fn to_line(&self) -> String {
        let mut line = serde_json::to_string(self).unwrap_or_else(|_| {
            format!("{{\"time\":{:?},\"level\":{:?},\"msg\":{:?}}}", self.time, self.level, self.msg)
        });
        line.push('\n');
        line
    }
}
