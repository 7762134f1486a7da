use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AudioSourceTag {
    None,
    Microphone,
    System,
    Mixed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RecordingMode {
    Fullscreen,
    FullscreenSingle,
    Region,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisState {
    Pending,
    Analyzing,
    Done,
    Failed,
}

impl AnalysisState {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnalysisState::Pending => "pending",
            AnalysisState::Analyzing => "analyzing",
            AnalysisState::Done => "done",
            AnalysisState::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "analyzing" => AnalysisState::Analyzing,
            "done" => AnalysisState::Done,
            "failed" => AnalysisState::Failed,
            _ => AnalysisState::Pending,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Recording {
    pub id: String,
    pub device_name: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub frame_count: i64,
    pub fps: f64,
    pub duration_seconds: f64,
    pub file_path: Option<String>,
    pub audio_source_tag: AudioSourceTag,
    pub mode: RecordingMode,
    pub target_display_id: Option<String>,
    pub target_window_title: Option<String>,
    pub region_rect: Option<(i32, i32, i32, i32)>,
    pub app_name: Option<String>,
    pub content_summary: Option<String>,
    pub content_tags: Vec<String>,
    pub user_tags: Vec<String>,
    pub analysis_state: AnalysisState,
}

/// Mutable subset of [`Recording`] accepted by `update_recording` (§4.2).
///
/// Extends the spec's illustrative field list with `end_time`: a Recording
/// is inserted once its full extent is known (at finalize time), so the
/// field doesn't need mutating in the common path, but the orphan-recovery
/// scan on boot (Testable Property 7) must still be able to close out a
/// row left open by a crash mid-recording.
#[derive(Debug, Clone, Default)]
pub struct RecordingPatch {
    pub analysis_state: Option<AnalysisState>,
    pub end_time: Option<DateTime<Utc>>,
    pub content_summary: Option<String>,
    pub content_tags: Option<Vec<String>>,
    pub user_tags: Option<Vec<String>>,
    pub app_name: Option<String>,
    pub fps: Option<f64>,
    pub frame_count: Option<i64>,
    pub duration_seconds: Option<f64>,
    pub file_path: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct RecordingFilter {
    pub start_after: Option<DateTime<Utc>>,
    pub start_before: Option<DateTime<Utc>>,
    pub mode: Option<RecordingMode>,
    pub analysis_state: Option<AnalysisState>,
    pub tag: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordingOrder {
    StartTimeDesc,
    StartTimeAsc,
}

impl Default for RecordingOrder {
    fn default() -> Self {
        RecordingOrder::StartTimeDesc
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FrameArtifact {
    pub id: String,
    pub recording_id: String,
    pub t_offset_seconds: f64,
    pub ocr_text: Option<String>,
    pub vision_description: Option<String>,
    /// Usually `Some` (§3's "exactly one embedding_ref per frame artifact");
    /// `None` only when the embedding call itself failed and the frame was
    /// kept for its OCR/vision text alone (§4.10 graceful degradation).
    pub embedding_ref: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatThread {
    pub id: String,
    pub title: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub is_active: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatRole {
    User,
    Assistant,
    System,
}

impl ChatRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChatRole::User => "user",
            ChatRole::Assistant => "assistant",
            ChatRole::System => "system",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "assistant" => ChatRole::Assistant,
            "system" => ChatRole::System,
            _ => ChatRole::User,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: String,
    pub thread_id: String,
    pub role: ChatRole,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub ordinal: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputSession {
    pub id: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub event_count: i64,
    pub keystroke_count: i64,
    pub click_count: i64,
}

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

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputEvent {
    pub id: String,
    pub session_id: String,
    pub t: DateTime<Utc>,
    pub kind: InputEventKind,
    pub payload: String,
}
