//! Scene state carried inside `onUpdate` payloads.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// TTS mark emitted when the host starts speaking.
pub const MARK_START: &str = "START";

/// TTS mark emitted when the host stops speaking.
pub const MARK_END: &str = "END";

/// Why the scene is being notified.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SceneState {
    /// Conversation started; `code` names the session to load.
    Welcome,
    /// Free-form user input, echoed through in `raw`.
    Fallback,
}

/// The `onUpdate` payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SceneUpdate {
    pub scene_state: SceneState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw: Option<String>,
}

impl SceneUpdate {
    pub fn welcome(code: impl Into<String>, raw: impl Into<String>) -> Self {
        Self {
            scene_state: SceneState::Welcome,
            code: Some(code.into()),
            raw: Some(raw.into()),
        }
    }

    pub fn fallback(raw: impl Into<String>) -> Self {
        Self {
            scene_state: SceneState::Fallback,
            code: None,
            raw: Some(raw.into()),
        }
    }

    pub fn to_value(&self) -> Value {
        // Plain strings and an enum: serialization cannot fail.
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_wire_shape() {
        assert_eq!(
            SceneUpdate::welcome("0420", "talk to relay").to_value(),
            json!({"sceneState": "WELCOME", "code": "0420", "raw": "talk to relay"})
        );
        assert_eq!(
            SceneUpdate::fallback("next").to_value(),
            json!({"sceneState": "FALLBACK", "raw": "next"})
        );
    }

    #[test]
    fn test_unknown_state_rejected() {
        let parsed = serde_json::from_value::<SceneUpdate>(json!({"sceneState": "PAUSED"}));
        assert!(parsed.is_err());
    }
}
