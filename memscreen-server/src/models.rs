//! HTTP request/response DTOs (§6). Kept separate from `memscreen_db::models`
//! so the wire shape can drift from the storage shape without coupling the
//! two crates.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use memscreen_core::AudioSource;
use memscreen_db::models::{ChatMessage, ChatRole, ChatThread, InputSession, Recording};

// --- /health, /config ---

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub runtime: &'static str,
    pub db: &'static str,
}

#[derive(Debug, Serialize)]
pub struct ConfigResponse {
    pub runtime_base_url: String,
    pub vision_model: String,
    pub embedding_model: String,
    pub chat_model: String,
    pub recording_default_duration_sec: u64,
    pub recording_default_interval_sec: f64,
    pub recording_audio_source: AudioSource,
    pub auto_track_input_with_recording: bool,
    pub analysis_frame_stride: u32,
    pub max_concurrent_analyses: usize,
    pub api_bind: String,
    pub data_root: String,
}

// --- /recording/* ---

#[derive(Debug, Deserialize)]
pub struct RecordingStartRequest {
    pub duration: Option<u64>,
    pub interval: Option<f64>,
    #[serde(default = "default_mode")]
    pub mode: String,
    pub region: Option<(i32, i32, u32, u32)>,
    pub screen_index: Option<usize>,
    pub screen_display_id: Option<String>,
    pub window_title: Option<String>,
    pub audio_source: Option<AudioSource>,
}

fn default_mode() -> String {
    "fullscreen".to_string()
}

#[derive(Debug, Serialize)]
pub struct DisplayDto {
    pub index: usize,
    pub display_id: String,
    pub name: String,
    pub width: u32,
    pub height: u32,
    pub is_primary: bool,
}

#[derive(Debug, Serialize)]
pub struct ScreensResponse {
    pub screens: Vec<DisplayDto>,
}

#[derive(Debug, Deserialize)]
pub struct AudioDiagnoseQuery {
    pub source: Option<AudioSource>,
}

// --- /video/* ---

#[derive(Debug, Serialize)]
pub struct VideoListItem {
    pub filename: String,
    pub timestamp: DateTime<Utc>,
    pub frame_count: i64,
    pub fps: f64,
    pub duration: f64,
    pub file_size: u64,
    pub recording_mode: String,
    pub window_title: Option<String>,
    pub audio_source: String,
    pub app_name: Option<String>,
    pub tags: Vec<String>,
    pub content_tags: Vec<String>,
    pub content_summary: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct VideoListResponse {
    pub videos: Vec<VideoListItem>,
}

#[derive(Debug, Deserialize)]
pub struct FilenameRequest {
    pub filename: String,
}

#[derive(Debug, Serialize)]
pub struct PlayableResponse {
    pub filename: String,
}

pub fn recording_filename(recording: &Recording) -> String {
    format!("{}.mp4", recording.id)
}

// --- /chat/* ---

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub message: String,
    pub thread_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ChatResponse {
    pub reply: String,
}

#[derive(Debug, Serialize)]
pub struct ChatStreamChunk {
    pub chunk: String,
}

#[derive(Debug, Serialize)]
pub struct ChatStreamDone {
    pub done: bool,
    pub full: String,
}

#[derive(Debug, Serialize)]
pub struct ChatModelsResponse {
    pub models: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct ChatModelResponse {
    pub model: String,
}

#[derive(Debug, Deserialize)]
pub struct SetChatModelRequest {
    pub model: String,
}

#[derive(Debug, Serialize)]
pub struct ChatMessageDto {
    pub role: &'static str,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

impl From<&ChatMessage> for ChatMessageDto {
    fn from(message: &ChatMessage) -> Self {
        Self {
            role: message.role.as_str(),
            content: message.content.clone(),
            timestamp: message.created_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ChatHistoryResponse {
    pub messages: Vec<ChatMessageDto>,
}

#[derive(Debug, Deserialize)]
pub struct ChatHistoryQuery {
    pub thread_id: String,
}

#[derive(Debug, Serialize)]
pub struct ChatThreadDto {
    pub id: String,
    pub title: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub is_active: bool,
}

impl From<&ChatThread> for ChatThreadDto {
    fn from(thread: &ChatThread) -> Self {
        Self {
            id: thread.id.clone(),
            title: thread.title.clone(),
            created_at: thread.created_at,
            updated_at: thread.updated_at,
            is_active: thread.is_active,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ChatThreadsResponse {
    pub threads: Vec<ChatThreadDto>,
}

#[derive(Debug, Deserialize)]
pub struct CreateThreadRequest {
    #[serde(default = "default_thread_title")]
    pub title: String,
}

fn default_thread_title() -> String {
    "New chat".to_string()
}

#[derive(Debug, Deserialize)]
pub struct SetActiveThreadRequest {
    pub id: String,
}

pub fn role_for_wire(role: ChatRole) -> memscreen_runtime::ChatRole {
    match role {
        ChatRole::User => memscreen_runtime::ChatRole::User,
        ChatRole::Assistant => memscreen_runtime::ChatRole::Assistant,
        ChatRole::System => memscreen_runtime::ChatRole::System,
    }
}

// --- /process/* ---

#[derive(Debug, Serialize)]
pub struct TrackingStatusResponse {
    pub is_tracking: bool,
    pub event_count: usize,
}

#[derive(Debug, Serialize)]
pub struct InputSessionDto {
    pub id: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub event_count: i64,
    pub keystroke_count: i64,
    pub click_count: i64,
}

impl From<&InputSession> for InputSessionDto {
    fn from(session: &InputSession) -> Self {
        Self {
            id: session.id.clone(),
            start_time: session.start_time,
            end_time: session.end_time,
            event_count: session.event_count,
            keystroke_count: session.keystroke_count,
            click_count: session.click_count,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct InputSessionsResponse {
    pub sessions: Vec<InputSessionDto>,
}

#[derive(Debug, Deserialize)]
pub struct CreateSessionRequest {
    pub events: Vec<serde_json::Value>,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct DeleteSessionResponse {
    pub deleted_events: u64,
}

#[derive(Debug, Serialize)]
pub struct SessionAnalysisResponse {
    pub categories: Vec<String>,
    pub patterns: Vec<String>,
    pub event_count: i64,
    pub keystrokes: i64,
    pub clicks: i64,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct FromTrackingResponse {
    pub events_saved: usize,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
}

// --- /models/* ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelPurpose {
    Vision,
    Embedding,
    Chat,
}

#[derive(Debug, Clone, Serialize)]
pub struct ModelCatalogItem {
    pub purpose: ModelPurpose,
    pub required: String,
    pub installed: bool,
    pub installed_name: Option<String>,
    pub size_bytes: Option<u64>,
    pub family: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ModelsCatalogResponse {
    pub base_url: String,
    pub runtime_ready: bool,
    pub runtime_error: Option<String>,
    pub models_disabled: bool,
    pub models: Vec<ModelCatalogItem>,
}

#[derive(Debug, Deserialize)]
pub struct ModelDownloadRequest {
    pub model: String,
    pub timeout_sec: Option<u64>,
}

// --- Generic error envelope (§6) ---

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub detail: String,
}
