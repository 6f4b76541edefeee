//! Wire messages and frame classification
//!
//! Every inbound frame is a JSON object with a `type` field:
//!
//! - `{"type": "sensor", ...}` is telemetry and is relayed verbatim
//! - `{"type": "command", "action": "..."}` is relayed with a server timestamp
//!   when the action is on the allow-list
//! - anything else is dropped
//!
//! Classification is a pure function so the protocol rules can be tested
//! without a socket.

use crate::config::AllowedCommands;
use crate::error::MessageError;

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Messages the relay constructs itself
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// A validated command, stamped by the relay
    Command { action: String, timestamp: String },
}

impl ServerMessage {
    /// Build a command message stamped with the current server time
    pub fn command(action: impl Into<String>) -> Self {
        Self::Command {
            action: action.into(),
            timestamp: server_timestamp(),
        }
    }

    pub fn to_json(&self) -> String {
        // Only string fields; serialization cannot fail
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// ISO-8601 / RFC 3339 UTC timestamp with microsecond precision
pub fn server_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Coarse classification label, used for logging and counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    Sensor,
    Command,
    Rejected,
    Unknown,
    Malformed,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::Sensor => "sensor",
            MessageKind::Command => "command",
            MessageKind::Rejected => "rejected",
            MessageKind::Unknown => "unknown",
            MessageKind::Malformed => "malformed",
        }
    }
}

/// Result of classifying one inbound frame
#[derive(Debug)]
pub enum Classified<'a> {
    /// Telemetry; `raw` is the frame exactly as received
    Sensor { raw: &'a str },

    /// Command whose action is on the allow-list
    Command { action: String },

    /// Command with a missing or disallowed action
    Rejected { action: Option<String> },

    /// Well-formed record with a missing or unrecognized `type`
    Unknown { kind: Option<String> },

    /// Not a decodable record
    Malformed(MessageError),
}

impl Classified<'_> {
    pub fn kind(&self) -> MessageKind {
        match self {
            Classified::Sensor { .. } => MessageKind::Sensor,
            Classified::Command { .. } => MessageKind::Command,
            Classified::Rejected { .. } => MessageKind::Rejected,
            Classified::Unknown { .. } => MessageKind::Unknown,
            Classified::Malformed(_) => MessageKind::Malformed,
        }
    }
}

/// Classify a text frame against the command allow-list
pub fn classify<'a>(raw: &'a str, allowed: &AllowedCommands) -> Classified<'a> {
    let record = match serde_json::from_str::<Value>(raw) {
        Ok(Value::Object(record)) => record,
        Ok(_) => return Classified::Malformed(MessageError::NotAnObject),
        Err(e) => return Classified::Malformed(e.into()),
    };

    match record.get("type").and_then(Value::as_str) {
        Some("sensor") => Classified::Sensor { raw },
        Some("command") => match record.get("action") {
            Some(Value::String(action)) if allowed.contains(action) => Classified::Command {
                action: action.clone(),
            },
            Some(Value::String(action)) => Classified::Rejected {
                action: Some(action.clone()),
            },
            Some(other) => Classified::Rejected {
                action: Some(other.to_string()),
            },
            None => Classified::Rejected { action: None },
        },
        _ => Classified::Unknown {
            kind: record.get("type").map(|t| match t {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            }),
        },
    }
}

/// Decode a binary frame as UTF-8 text
pub fn decode_binary(data: &[u8]) -> Result<&str, MessageError> {
    std::str::from_utf8(data).map_err(|_| MessageError::InvalidUtf8)
}
