//! Cross-context wire protocol.
//!
//! Every message exchanged between the display host, the frame polyfill, and
//! the scene script is a flat JSON envelope `{type, name, parameter}`. The
//! envelope is encoded to a string before it crosses a context boundary and
//! decoded on the other side; nothing here is ever persisted.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Result, SceneRelayError};

/// Status returned by `sendTextQuery` when no real host is present.
pub const STATUS_READY: &str = "READY";

/// Status the host returns when it refuses a text query.
pub const STATUS_BLOCKED: &str = "BLOCKED";

/// Envelope `type` discriminator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MessageType {
    /// Frame log line forwarded to the host's log viewer.
    Log,
    /// Upward capability call from the frame.
    Method,
    /// Downward scene callback (`onUpdate`, `onTtsMark`).
    Callback,
    /// Downward reply to a header height request.
    GetHeaderHeightPx,
    /// Downward reply to a text query.
    SendTextQuery,
}

/// Envelope `name`: the operation identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MessageName {
    Ready,
    SendTextQuery,
    GetHeaderHeightPx,
    OnUpdate,
    OnTtsMark,
    Height,
    Status,
}

/// A single cross-context message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: MessageType,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<MessageName>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameter: Option<Value>,

    /// Log level, only set on `log` envelopes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub level: Option<String>,

    /// Log payload, only set on `log` envelopes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub messages: Option<Value>,
}

impl Envelope {
    fn new(kind: MessageType, name: MessageName, parameter: Option<Value>) -> Self {
        Self {
            kind,
            name: Some(name),
            parameter,
            level: None,
            messages: None,
        }
    }

    /// Upward capability call.
    pub fn method(name: MessageName, parameter: Option<Value>) -> Self {
        Self::new(MessageType::Method, name, parameter)
    }

    /// Downward scene callback.
    pub fn callback(name: MessageName, parameter: Value) -> Self {
        Self::new(MessageType::Callback, name, Some(parameter))
    }

    /// Downward header height reply.
    pub fn height(px: i64) -> Self {
        Self::new(
            MessageType::GetHeaderHeightPx,
            MessageName::Height,
            Some(Value::from(px)),
        )
    }

    /// Downward text query status reply.
    pub fn status(status: impl Into<String>) -> Self {
        Self::new(
            MessageType::SendTextQuery,
            MessageName::Status,
            Some(Value::String(status.into())),
        )
    }

    /// Log line from the frame.
    pub fn log(level: impl Into<String>, messages: Value) -> Self {
        Self {
            kind: MessageType::Log,
            name: None,
            parameter: None,
            level: Some(level.into()),
            messages: Some(messages),
        }
    }

    /// Encode for posting across a context boundary.
    pub fn encode(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Decode a message received from another context.
    pub fn decode(raw: &str) -> Result<Self> {
        serde_json::from_str(raw)
            .map_err(|e| SceneRelayError::Protocol(format!("malformed envelope: {e}")))
    }

    /// The parameter as a string, if it is one.
    pub fn parameter_str(&self) -> Option<&str> {
        self.parameter.as_ref().and_then(Value::as_str)
    }

    /// Integer interpretation of the parameter.
    ///
    /// Accepts JSON numbers and strings with a leading integer (`"42px"` is 42).
    pub fn parameter_int(&self) -> Option<i64> {
        match self.parameter.as_ref()? {
            Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f.trunc() as i64)),
            Value::String(s) => leading_int(s),
            _ => None,
        }
    }
}

fn leading_int(s: &str) -> Option<i64> {
    let s = s.trim_start();
    let (sign, digits) = match s.strip_prefix('-') {
        Some(rest) => (-1, rest),
        None => (1, s.strip_prefix('+').unwrap_or(s)),
    };
    let end = digits
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(digits.len());
    digits[..end].parse::<i64>().ok().map(|n| sign * n)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_wire_names() {
        let env = Envelope::method(MessageName::SendTextQuery, Some(json!("hello")));
        let value: Value = serde_json::from_str(&env.encode().unwrap()).unwrap();
        assert_eq!(
            value,
            json!({"type": "method", "name": "sendTextQuery", "parameter": "hello"})
        );

        let value = serde_json::to_value(Envelope::height(42)).unwrap();
        assert_eq!(
            value,
            json!({"type": "getHeaderHeightPx", "name": "height", "parameter": 42})
        );
    }

    #[test]
    fn test_ready_has_no_parameter() {
        let raw = Envelope::method(MessageName::Ready, None).encode().unwrap();
        assert_eq!(raw, r#"{"type":"method","name":"ready"}"#);
    }

    #[test]
    fn test_decode_log() {
        let env =
            Envelope::decode(r#"{"type":"log","level":"warn","messages":["a",1]}"#).unwrap();
        assert_eq!(env.kind, MessageType::Log);
        assert_eq!(env.level.as_deref(), Some("warn"));
        assert!(env.name.is_none());
    }

    #[test]
    fn test_decode_rejects_unknown_type() {
        let err = Envelope::decode(r#"{"type":"teleport","name":"ready"}"#).unwrap_err();
        assert!(matches!(err, SceneRelayError::Protocol(_)));
    }

    #[test]
    fn test_parameter_int() {
        let mut env = Envelope::height(42);
        assert_eq!(env.parameter_int(), Some(42));
        env.parameter = Some(json!("56px"));
        assert_eq!(env.parameter_int(), Some(56));
        env.parameter = Some(json!(12.9));
        assert_eq!(env.parameter_int(), Some(12));
        env.parameter = Some(json!("tall"));
        assert_eq!(env.parameter_int(), None);
    }
}
