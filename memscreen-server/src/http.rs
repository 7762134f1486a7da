//! HTTP API (C12): the full `§6` surface over axum, following the teacher's
//! `AppState` + `build_router` shape, generalized with the error envelope
//! and SSE streaming this spec calls for.

use std::convert::Infallible;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path as AxumPath, Query, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use futures::stream::{self, Stream, StreamExt};
use memscreen_core::{AudioSource, Config, Error, Paths, Result, RuntimeSettings};
use memscreen_db::models::{InputEvent, InputEventKind, RecordingFilter, RecordingOrder};
use memscreen_db::{MetadataStore, VectorFilter, VectorStore};
use memscreen_runtime::RuntimeClient;
use serde::Deserialize;
use serde_json::json;
use tokio::sync::{mpsc, Mutex};
use tokio_stream::wrappers::WatchStream;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::warn;

use crate::ingestion::IngestionQueue;
use crate::models::*;
use crate::orchestrator::{Orchestrator, StartRequest};
use crate::query::QueryEngine;
use crate::tracking::TrackingManager;

pub struct AppState {
    pub config: Config,
    pub paths: Paths,
    pub db: Arc<MetadataStore>,
    pub vectors: Arc<VectorStore>,
    pub runtime: Arc<RuntimeClient>,
    pub orchestrator: Arc<Orchestrator>,
    pub ingestion: Arc<IngestionQueue>,
    pub tracking: Arc<TrackingManager>,
    pub query: QueryEngine,
    pub settings: Mutex<RuntimeSettings>,
    pub settings_path: PathBuf,
}

impl AppState {
    async fn active_chat_model(&self) -> String {
        self.settings.lock().await.active_chat_model.clone()
    }
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn map_err(err: Error) -> ApiError {
    let status = StatusCode::from_u16(err.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, Json(ErrorResponse { detail: err.to_string() }))
}

fn empty_ok() -> Json<serde_json::Value> {
    Json(json!({}))
}

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/config", get(config))
        .route("/recording/start", post(recording_start))
        .route("/recording/stop", post(recording_stop))
        .route("/recording/status", get(recording_status))
        .route("/recording/status/stream", get(recording_status_stream))
        .route("/recording/screens", get(recording_screens))
        .route("/recording/audio/diagnose", get(recording_audio_diagnose))
        .route("/video/list", get(video_list))
        .route("/video/reanalyze", post(video_reanalyze))
        .route("/video/playable", post(video_playable))
        .route("/video/delete", post(video_delete))
        .route("/chat", post(chat))
        .route("/chat/stream", post(chat_stream))
        .route("/chat/models", get(chat_models))
        .route("/chat/model", get(chat_model_get).put(chat_model_put))
        .route("/chat/history", get(chat_history))
        .route(
            "/chat/threads",
            get(chat_threads_list).post(chat_threads_create).put(chat_threads_set_active),
        )
        .route("/process/tracking/start", post(tracking_start))
        .route("/process/tracking/stop", post(tracking_stop))
        .route("/process/tracking/mark-start", post(tracking_mark_start))
        .route("/process/tracking/status", get(tracking_status))
        .route(
            "/process/sessions",
            get(sessions_list).post(sessions_create).delete(sessions_delete_all),
        )
        .route(
            "/process/sessions/:id",
            get(session_events).delete(session_delete),
        )
        .route("/process/sessions/:id/analysis", get(session_analysis))
        .route("/process/sessions/from-tracking", post(session_from_tracking))
        .route("/models/catalog", get(models_catalog))
        .route("/models/download", post(models_download))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

// --- /health, /config ---

async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let runtime_ok = state.runtime.catalog().await.is_ok();
    let db_ok = state
        .db
        .list_recordings(&RecordingFilter::default(), RecordingOrder::StartTimeDesc, 1)
        .await
        .is_ok();
    Json(HealthResponse {
        status: if runtime_ok && db_ok { "ok" } else { "degraded" },
        runtime: if runtime_ok { "ok" } else { "unavailable" },
        db: if db_ok { "ok" } else { "error" },
    })
}

async fn config(State(state): State<Arc<AppState>>) -> Json<ConfigResponse> {
    let cfg = &state.config;
    Json(ConfigResponse {
        runtime_base_url: cfg.runtime_base_url.clone(),
        vision_model: cfg.vision_model.clone(),
        embedding_model: cfg.embedding_model.clone(),
        chat_model: cfg.chat_model.clone(),
        recording_default_duration_sec: cfg.recording_default_duration_sec,
        recording_default_interval_sec: cfg.recording_default_interval_sec,
        recording_audio_source: cfg.recording_audio_source,
        auto_track_input_with_recording: cfg.auto_track_input_with_recording,
        analysis_frame_stride: cfg.analysis_frame_stride,
        max_concurrent_analyses: cfg.max_concurrent_analyses,
        api_bind: cfg.api_bind.clone(),
        data_root: state.paths.root().display().to_string(),
    })
}

// --- /recording/* ---

async fn recording_start(
    State(state): State<Arc<AppState>>,
    Json(req): Json<RecordingStartRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let screen_display_id = resolve_display_id(req.screen_display_id, req.screen_index).map_err(map_err)?;
    let start = StartRequest {
        duration_sec: req.duration,
        interval_sec: req.interval,
        mode: req.mode,
        region: req.region,
        screen_display_id,
        window_title: req.window_title,
        audio_source: req.audio_source,
    };
    state.orchestrator.start(start).await.map_err(map_err)?;
    Ok(empty_ok())
}

fn resolve_display_id(explicit: Option<String>, index: Option<usize>) -> Result<Option<String>> {
    if explicit.is_some() {
        return Ok(explicit);
    }
    let Some(index) = index else { return Ok(None) };
    let displays = memscreen_vision::frame_source::list_displays()
        .map_err(|e| Error::InvalidArgument(e.to_string()))?;
    displays
        .into_iter()
        .find(|d| d.index == index)
        .map(|d| Some(d.display_id))
        .ok_or_else(|| Error::InvalidArgument(format!("no display at screen_index {index}")))
}

async fn recording_stop(State(state): State<Arc<AppState>>) -> Result<Json<serde_json::Value>, ApiError> {
    state.orchestrator.stop().await.map_err(map_err)?;
    Ok(empty_ok())
}

async fn recording_status(State(state): State<Arc<AppState>>) -> Json<crate::orchestrator::StatusSnapshot> {
    Json(state.orchestrator.status())
}

/// Long-lived SSE mirror of `/recording/status`, the "recommended addition"
/// from the design notes for floating-indicator style subscribers.
async fn recording_status_stream(
    State(state): State<Arc<AppState>>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let watch = state.orchestrator.status_watch();
    let stream = WatchStream::new(watch).map(|snapshot| {
        let payload = serde_json::to_string(&snapshot).unwrap_or_else(|_| "{}".to_string());
        Ok(Event::default().data(payload))
    });
    Sse::new(stream).keep_alive(KeepAlive::default())
}

async fn recording_screens() -> Result<Json<ScreensResponse>, ApiError> {
    let screens = memscreen_vision::frame_source::list_displays()
        .map_err(|e| Error::InvalidArgument(e.to_string()))
        .map_err(map_err)?
        .into_iter()
        .map(|d| DisplayDto {
            index: d.index,
            display_id: d.display_id,
            name: d.name,
            width: d.width,
            height: d.height,
            is_primary: d.is_primary,
        })
        .collect();
    Ok(Json(ScreensResponse { screens }))
}

async fn recording_audio_diagnose(Query(query): Query<AudioDiagnoseQuery>) -> Json<memscreen_audio::Diagnosis> {
    Json(memscreen_audio::diagnose(query.source.unwrap_or(AudioSource::None)))
}

// --- /video/* ---

async fn video_list(State(state): State<Arc<AppState>>) -> Result<Json<VideoListResponse>, ApiError> {
    let recordings = state
        .db
        .list_recordings(&RecordingFilter::default(), RecordingOrder::StartTimeDesc, 500)
        .await
        .map_err(Error::from)
        .map_err(map_err)?;

    let mut videos = Vec::with_capacity(recordings.len());
    for recording in recordings.into_iter().filter(|r| r.file_path.is_some()) {
        let file_size = recording
            .file_path
            .as_deref()
            .and_then(|p| std::fs::metadata(p).ok())
            .map(|m| m.len())
            .unwrap_or(0);
        videos.push(VideoListItem {
            filename: recording_filename(&recording),
            timestamp: recording.start_time,
            frame_count: recording.frame_count,
            fps: recording.fps,
            duration: recording.duration_seconds,
            file_size,
            recording_mode: memscreen_db::mode_str(recording.mode).to_string(),
            window_title: recording.target_window_title.clone(),
            audio_source: format!("{:?}", recording.audio_source_tag).to_lowercase(),
            app_name: recording.app_name.clone(),
            tags: recording.user_tags.clone(),
            content_tags: recording.content_tags.clone(),
            content_summary: recording.content_summary.clone(),
        });
    }
    Ok(Json(VideoListResponse { videos }))
}

fn recording_id_from_filename(filename: &str) -> &str {
    filename.strip_suffix(".mp4").unwrap_or(filename)
}

async fn video_reanalyze(
    State(state): State<Arc<AppState>>,
    Json(req): Json<FilenameRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let recording_id = recording_id_from_filename(&req.filename);
    state.db.get_recording(recording_id).await.map_err(Error::from).map_err(map_err)?;
    state.ingestion.enqueue(recording_id.to_string());
    Ok(empty_ok())
}

async fn video_playable(
    State(state): State<Arc<AppState>>,
    Json(req): Json<FilenameRequest>,
) -> Result<Json<PlayableResponse>, ApiError> {
    let path = state.paths.videos_dir().join(&req.filename);
    if !path.is_file() {
        return Err(map_err(Error::NotFound(format!("video {} not found", req.filename))));
    }
    Ok(Json(PlayableResponse {
        filename: path.display().to_string(),
    }))
}

/// Deletes a recording and everything that references it: its row (which
/// cascades to frame artifacts via the FK), its vector records (a separate
/// store the FK graph doesn't cover), and its video file.
async fn video_delete(
    State(state): State<Arc<AppState>>,
    Json(req): Json<FilenameRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let recording_id = recording_id_from_filename(&req.filename).to_string();
    let recording = state.db.get_recording(&recording_id).await.map_err(Error::from).map_err(map_err)?;

    state.db.delete_recording(&recording_id).await.map_err(Error::from).map_err(map_err)?;

    let collection = memscreen_db::collection_name_for_model(&state.config.embedding_model);
    let filter = VectorFilter {
        recording_id: Some(recording_id.clone()),
    };
    if let Err(err) = state.vectors.delete_by_filter(&collection, &filter).await {
        warn!(error = %err, recording_id, "failed to delete vector records for deleted recording");
    }

    if let Some(path) = recording.file_path.as_deref() {
        if let Err(err) = std::fs::remove_file(path) {
            warn!(error = %err, path, "failed to remove video file for deleted recording");
        }
    }

    Ok(empty_ok())
}

// --- /chat/* ---

async fn resolve_thread_id(state: &AppState, requested: Option<String>) -> Result<String> {
    if let Some(id) = requested {
        return Ok(id);
    }
    let threads = state.db.chat_thread_list().await.map_err(Error::from)?;
    if let Some(active) = threads.iter().find(|t| t.is_active) {
        return Ok(active.id.clone());
    }
    let created = state.db.chat_thread_create("New chat").await.map_err(Error::from)?;
    state.db.chat_thread_set_active(&created.id).await.map_err(Error::from)?;
    Ok(created.id)
}

async fn chat(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ChatRequest>,
) -> Result<Json<ChatResponse>, ApiError> {
    if req.message.trim().is_empty() {
        return Err(map_err(Error::InvalidArgument("message cannot be empty".into())));
    }
    let thread_id = resolve_thread_id(&state, req.thread_id).await.map_err(map_err)?;
    let model = state.active_chat_model().await;
    let reply = state
        .query
        .chat_once(&thread_id, &req.message, &model)
        .await
        .map_err(map_err)?;
    Ok(Json(ChatResponse { reply }))
}

async fn chat_stream(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ChatRequest>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    if req.message.trim().is_empty() {
        return Err(map_err(Error::InvalidArgument("message cannot be empty".into())));
    }
    let thread_id = resolve_thread_id(&state, req.thread_id).await.map_err(map_err)?;
    let model = state.active_chat_model().await;

    let (tx, rx) = mpsc::channel::<String>(32);
    let cancel = CancellationToken::new();
    let state_for_task = Arc::clone(&state);
    let thread_for_task = thread_id.clone();
    let message_for_task = req.message.clone();
    let cancel_for_task = cancel.clone();
    tokio::spawn(async move {
        let result = state_for_task
            .query
            .chat(&thread_for_task, &message_for_task, &model, tx, cancel_for_task)
            .await;
        if let Err(err) = result {
            if !matches!(err, Error::Cancelled(_)) {
                warn!(error = %err, "chat stream failed");
            }
        }
    });

    struct CancelGuard(CancellationToken);
    impl Drop for CancelGuard {
        fn drop(&mut self) {
            self.0.cancel();
        }
    }

    enum StreamState {
        Streaming {
            rx: mpsc::Receiver<String>,
            guard: CancelGuard,
            full: String,
        },
        Done {
            full: String,
        },
        Finished,
    }

    let seed = StreamState::Streaming {
        rx,
        guard: CancelGuard(cancel),
        full: String::new(),
    };

    let stream = stream::unfold(seed, |state| async move {
        match state {
            StreamState::Streaming { mut rx, guard, mut full } => match rx.recv().await {
                Some(chunk) => {
                    full.push_str(&chunk);
                    let event = sse_json(&ChatStreamChunk { chunk });
                    Some((event, StreamState::Streaming { rx, guard, full }))
                }
                None => {
                    drop(guard);
                    let event = sse_json(&ChatStreamDone { done: true, full: full.clone() });
                    Some((event, StreamState::Done { full }))
                }
            },
            StreamState::Done { .. } => None,
            StreamState::Finished => None,
        }
    });

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

fn sse_json<T: serde::Serialize>(value: &T) -> Result<Event, Infallible> {
    let body = serde_json::to_string(value).unwrap_or_else(|_| "{}".to_string());
    Ok(Event::default().data(body))
}

async fn chat_models(State(state): State<Arc<AppState>>) -> Result<Json<ChatModelsResponse>, ApiError> {
    let entries = state.runtime.catalog().await.map_err(Error::from).map_err(map_err)?;
    Ok(Json(ChatModelsResponse {
        models: entries.into_iter().map(|e| e.name).collect(),
    }))
}

async fn chat_model_get(State(state): State<Arc<AppState>>) -> Json<ChatModelResponse> {
    Json(ChatModelResponse {
        model: state.active_chat_model().await,
    })
}

async fn chat_model_put(
    State(state): State<Arc<AppState>>,
    Json(req): Json<SetChatModelRequest>,
) -> Result<Json<ChatModelResponse>, ApiError> {
    let mut settings = state.settings.lock().await;
    settings.active_chat_model = req.model.clone();
    settings.store(&state.settings_path).map_err(map_err)?;
    Ok(Json(ChatModelResponse { model: req.model }))
}

async fn chat_history(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ChatHistoryQuery>,
) -> Result<Json<ChatHistoryResponse>, ApiError> {
    let messages = state
        .db
        .chat_history(&query.thread_id)
        .await
        .map_err(Error::from)
        .map_err(map_err)?
        .iter()
        .map(ChatMessageDto::from)
        .collect();
    Ok(Json(ChatHistoryResponse { messages }))
}

async fn chat_threads_list(State(state): State<Arc<AppState>>) -> Result<Json<ChatThreadsResponse>, ApiError> {
    let threads = state
        .db
        .chat_thread_list()
        .await
        .map_err(Error::from)
        .map_err(map_err)?
        .iter()
        .map(ChatThreadDto::from)
        .collect();
    Ok(Json(ChatThreadsResponse { threads }))
}

async fn chat_threads_create(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateThreadRequest>,
) -> Result<Json<ChatThreadDto>, ApiError> {
    let thread = state
        .db
        .chat_thread_create(&req.title)
        .await
        .map_err(Error::from)
        .map_err(map_err)?;
    Ok(Json(ChatThreadDto::from(&thread)))
}

async fn chat_threads_set_active(
    State(state): State<Arc<AppState>>,
    Json(req): Json<SetActiveThreadRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    state
        .db
        .chat_thread_set_active(&req.id)
        .await
        .map_err(Error::from)
        .map_err(map_err)?;
    Ok(empty_ok())
}

// --- /process/* ---

async fn tracking_start(State(state): State<Arc<AppState>>) -> Result<Json<serde_json::Value>, ApiError> {
    state.tracking.start().await.map_err(map_err)?;
    Ok(empty_ok())
}

async fn tracking_stop(State(state): State<Arc<AppState>>) -> Result<Json<serde_json::Value>, ApiError> {
    state.tracking.stop().await.map_err(map_err)?;
    Ok(empty_ok())
}

async fn tracking_mark_start(State(state): State<Arc<AppState>>) -> Result<Json<serde_json::Value>, ApiError> {
    state.tracking.mark_start().await.map_err(map_err)?;
    Ok(empty_ok())
}

async fn tracking_status(State(state): State<Arc<AppState>>) -> Json<TrackingStatusResponse> {
    Json(TrackingStatusResponse {
        is_tracking: state.tracking.is_tracking().await,
        event_count: state.tracking.event_count().await,
    })
}

async fn session_from_tracking(
    State(state): State<Arc<AppState>>,
) -> Result<Json<FromTrackingResponse>, ApiError> {
    let (events_saved, start_time, end_time) = state.tracking.stop().await.map_err(map_err)?;
    Ok(Json(FromTrackingResponse {
        events_saved,
        start_time,
        end_time,
    }))
}

async fn sessions_list(State(state): State<Arc<AppState>>) -> Result<Json<InputSessionsResponse>, ApiError> {
    let sessions = state
        .db
        .input_session_list()
        .await
        .map_err(Error::from)
        .map_err(map_err)?
        .iter()
        .map(InputSessionDto::from)
        .collect();
    Ok(Json(InputSessionsResponse { sessions }))
}

#[derive(Debug, Deserialize)]
struct ClientInputEvent {
    t: DateTime<Utc>,
    kind: InputEventKind,
    #[serde(default)]
    payload: serde_json::Value,
}

async fn sessions_create(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateSessionRequest>,
) -> Result<Json<InputSessionDto>, ApiError> {
    let session = state.db.input_session_open(req.start_time).await.map_err(Error::from).map_err(map_err)?;

    let mut events = Vec::with_capacity(req.events.len());
    for raw in req.events {
        let parsed: ClientInputEvent = serde_json::from_value(raw)
            .map_err(|e| Error::InvalidArgument(format!("invalid event: {e}")))
            .map_err(map_err)?;
        events.push(InputEvent {
            id: memscreen_db::uuid_v4(),
            session_id: session.id.clone(),
            t: parsed.t,
            kind: parsed.kind,
            payload: parsed.payload.to_string(),
        });
    }
    if !events.is_empty() {
        state
            .db
            .input_event_append_batch(&session.id, &events)
            .await
            .map_err(Error::from)
            .map_err(map_err)?;
    }
    let sessions = state.db.input_session_list().await.map_err(Error::from).map_err(map_err)?;
    let updated = sessions
        .into_iter()
        .find(|s| s.id == session.id)
        .unwrap_or(session);
    Ok(Json(InputSessionDto::from(&updated)))
}

async fn sessions_delete_all(
    State(state): State<Arc<AppState>>,
) -> Result<Json<DeleteSessionResponse>, ApiError> {
    let sessions = state.db.input_session_list().await.map_err(Error::from).map_err(map_err)?;
    let mut deleted_events = 0u64;
    for session in sessions {
        deleted_events += state
            .db
            .input_session_delete(&session.id)
            .await
            .map_err(Error::from)
            .map_err(map_err)?;
    }
    Ok(Json(DeleteSessionResponse { deleted_events }))
}

async fn session_events(
    State(state): State<Arc<AppState>>,
    AxumPath(id): AxumPath<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let events = state
        .db
        .input_session_events(&id)
        .await
        .map_err(Error::from)
        .map_err(map_err)?;
    Ok(Json(json!({ "events": events })))
}

async fn session_delete(
    State(state): State<Arc<AppState>>,
    AxumPath(id): AxumPath<String>,
) -> Result<Json<DeleteSessionResponse>, ApiError> {
    let deleted_events = state
        .db
        .input_session_delete(&id)
        .await
        .map_err(Error::from)
        .map_err(map_err)?;
    Ok(Json(DeleteSessionResponse { deleted_events }))
}

async fn session_analysis(
    State(state): State<Arc<AppState>>,
    AxumPath(id): AxumPath<String>,
) -> Result<Json<SessionAnalysisResponse>, ApiError> {
    let events = state
        .db
        .input_session_events(&id)
        .await
        .map_err(Error::from)
        .map_err(map_err)?;
    if events.is_empty() {
        return Err(map_err(Error::NotFound(format!("input session {id} has no events"))));
    }

    let start_time = events.first().map(|e| e.t).unwrap_or_else(Utc::now);
    let end_time = events.last().map(|e| e.t).unwrap_or(start_time);
    let keystrokes = events.iter().filter(|e| e.kind == InputEventKind::KeyPress).count() as i64;
    let clicks = events.iter().filter(|e| e.kind == InputEventKind::MouseDown).count() as i64;

    let mut categories: Vec<String> = events
        .iter()
        .map(|e| format!("{:?}", e.kind).to_lowercase())
        .collect();
    categories.sort();
    categories.dedup();

    let duration_secs = (end_time - start_time).num_milliseconds().max(1) as f64 / 1000.0;
    let mut patterns = Vec::new();
    if keystrokes as f64 / duration_secs > 5.0 {
        patterns.push("rapid_typing".to_string());
    }
    if clicks as f64 / duration_secs > 2.0 {
        patterns.push("rapid_clicking".to_string());
    }
    if patterns.is_empty() {
        patterns.push("steady".to_string());
    }

    Ok(Json(SessionAnalysisResponse {
        categories,
        patterns,
        event_count: events.len() as i64,
        keystrokes,
        clicks,
        start_time,
        end_time,
    }))
}

// --- /models/* ---

async fn models_catalog(State(state): State<Arc<AppState>>) -> Json<ModelsCatalogResponse> {
    let purposes = [
        (ModelPurpose::Vision, state.config.vision_model.clone()),
        (ModelPurpose::Embedding, state.config.embedding_model.clone()),
        (ModelPurpose::Chat, state.config.chat_model.clone()),
    ];

    match state.runtime.catalog().await {
        Ok(entries) => {
            let models = purposes
                .into_iter()
                .map(|(purpose, required)| {
                    let installed = entries.iter().find(|e| e.name == required);
                    ModelCatalogItem {
                        purpose,
                        required,
                        installed: installed.is_some(),
                        installed_name: installed.map(|e| e.name.clone()),
                        size_bytes: installed.and_then(|e| e.size_bytes),
                        family: installed.and_then(|e| e.family.clone()),
                    }
                })
                .collect();
            Json(ModelsCatalogResponse {
                base_url: state.config.runtime_base_url.clone(),
                runtime_ready: true,
                runtime_error: None,
                models_disabled: false,
                models,
            })
        }
        Err(err) => Json(ModelsCatalogResponse {
            base_url: state.config.runtime_base_url.clone(),
            runtime_ready: false,
            runtime_error: Some(err.to_string()),
            models_disabled: false,
            models: purposes
                .into_iter()
                .map(|(purpose, required)| ModelCatalogItem {
                    purpose,
                    required,
                    installed: false,
                    installed_name: None,
                    size_bytes: None,
                    family: None,
                })
                .collect(),
        }),
    }
}

async fn models_download(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ModelDownloadRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let stream = state.runtime.ensure_model(&req.model).await.map_err(Error::from).map_err(map_err)?;
    let timeout = Duration::from_secs(req.timeout_sec.unwrap_or(600));
    let drain = async move {
        tokio::pin!(stream);
        while let Some(progress) = stream.next().await {
            progress.map_err(Error::from)?;
        }
        Ok::<(), Error>(())
    };
    match tokio::time::timeout(timeout, drain).await {
        Ok(Ok(())) => Ok(empty_ok()),
        Ok(Err(err)) => Err(map_err(err)),
        Err(_) => Err(map_err(Error::RuntimeUnavailable(format!(
            "downloading model {} timed out",
            req.model
        )))),
    }
}
