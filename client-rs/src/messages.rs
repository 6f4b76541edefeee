//! Message types for the relay protocol
//!
//! These mirror the shapes the relay accepts and emits.

use serde::Serialize;
use serde_json::{Map, Value};

/// Messages sent from a client to the relay
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Telemetry, relayed verbatim to every other client
    Sensor {
        #[serde(flatten)]
        fields: Map<String, Value>,
    },

    /// Command for sensor nodes; the relay stamps the time
    Command { action: String },
}

impl ClientMessage {
    /// Build a sensor message; a `type` key in `fields` is ignored
    pub fn sensor(mut fields: Map<String, Value>) -> Self {
        fields.remove("type");
        ClientMessage::Sensor { fields }
    }

    pub fn command(action: impl Into<String>) -> Self {
        ClientMessage::Command {
            action: action.into(),
        }
    }
}

/// Messages received from the relay
#[derive(Debug, Clone, PartialEq)]
pub enum RelayMessage {
    /// Telemetry from another client, without the `type` key
    Sensor(Map<String, Value>),

    /// A command validated and stamped by the relay
    Command { action: String, timestamp: String },

    /// Anything else
    Other(Value),
}

impl RelayMessage {
    /// Parse a text frame from the relay
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        let value: Value = serde_json::from_str(text)?;

        let Value::Object(mut record) = value else {
            return Ok(RelayMessage::Other(value));
        };

        match record.get("type").and_then(Value::as_str) {
            Some("sensor") => {
                record.remove("type");
                Ok(RelayMessage::Sensor(record))
            }
            Some("command") => {
                let action = record.get("action").and_then(Value::as_str);
                let timestamp = record.get("timestamp").and_then(Value::as_str);
                match (action, timestamp) {
                    (Some(action), Some(timestamp)) => Ok(RelayMessage::Command {
                        action: action.to_string(),
                        timestamp: timestamp.to_string(),
                    }),
                    _ => Ok(RelayMessage::Other(Value::Object(record))),
                }
            }
            _ => Ok(RelayMessage::Other(Value::Object(record))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn fields(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_sensor_serialization() {
        let msg = ClientMessage::sensor(fields(json!({"temperature": 20.0, "uv_index": 3})));
        let value = serde_json::to_value(&msg).unwrap();

        assert_eq!(value, json!({"type": "sensor", "temperature": 20.0, "uv_index": 3}));
    }

    #[test]
    fn test_sensor_ignores_type_field() {
        let msg = ClientMessage::sensor(fields(json!({"type": "command", "lux": 1})));
        let value = serde_json::to_value(&msg).unwrap();

        assert_eq!(value, json!({"type": "sensor", "lux": 1}));
    }

    #[test]
    fn test_command_serialization() {
        let value = serde_json::to_value(ClientMessage::command("read_sensor")).unwrap();
        assert_eq!(value, json!({"type": "command", "action": "read_sensor"}));
    }

    #[test]
    fn test_parse_sensor() {
        let msg = RelayMessage::parse(r#"{"type":"sensor","temp":21.5}"#).unwrap();
        assert_eq!(msg, RelayMessage::Sensor(fields(json!({"temp": 21.5}))));
    }

    #[test]
    fn test_parse_command() {
        let msg = RelayMessage::parse(
            r#"{"type":"command","action":"debug_on","timestamp":"2026-10-18T12:00:00.000000Z"}"#,
        )
        .unwrap();

        assert_eq!(
            msg,
            RelayMessage::Command {
                action: "debug_on".to_string(),
                timestamp: "2026-10-18T12:00:00.000000Z".to_string(),
            }
        );
    }

    #[test]
    fn test_parse_command_without_timestamp_is_other() {
        let msg = RelayMessage::parse(r#"{"type":"command","action":"debug_on"}"#).unwrap();
        assert!(matches!(msg, RelayMessage::Other(_)));
    }

    #[test]
    fn test_parse_non_object() {
        assert_eq!(RelayMessage::parse("[1]").unwrap(), RelayMessage::Other(json!([1])));
    }

    #[test]
    fn test_parse_invalid_json() {
        assert!(RelayMessage::parse("{").is_err());
    }
}
