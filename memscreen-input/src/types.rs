use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InputEventKind {
    KeyPress,
    KeyRelease,
    MouseDown,
    MouseUp,
    MouseMoveSampled,
    Scroll,
}

/// One observed hook event, not yet attached to a persisted session id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawInputEvent {
    pub t: DateTime<Utc>,
    pub kind: InputEventKind,
    pub payload: serde_json::Value,
}
