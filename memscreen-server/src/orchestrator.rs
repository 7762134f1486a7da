//! Recording Orchestrator (C9): a single-task state machine
//! (IDLE/PREPARING/RECORDING/STOPPING/FINALIZING) driven entirely by message
//! passing, replacing the teacher's infinite-retry capture loop with an
//! explicitly stoppable one per the redesign notes.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use memscreen_core::{AudioSource, Config, Error, Paths, Result};
use memscreen_db::models::{AudioSourceTag, Recording, RecordingMode, RecordingPatch};
use memscreen_db::MetadataStore;
use memscreen_encoder::{encode, plan_sequence, EncodeRequest, SampledFrame};
use memscreen_events::{approx_datetime_from_instant, emit_pipeline_trace, PipelineStage, PipelineTraceEvent, StageStatus};
use memscreen_vision::{Frame, FrameStream, Target};
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{info, warn};

use crate::ingestion::IngestionQueue;
use crate::tracking::TrackingManager;

const NEXT_FRAME_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OrchestratorState {
    Idle,
    Preparing,
    Recording,
    Stopping,
    Finalizing,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct StatusSnapshot {
    pub state: OrchestratorState,
    pub is_recording: bool,
    pub recording_id: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub frame_count: u64,
    pub drop_count: u64,
    pub target_gone: bool,
    pub last_error: Option<String>,
}

impl StatusSnapshot {
    fn idle() -> Self {
        Self {
            state: OrchestratorState::Idle,
            is_recording: false,
            recording_id: None,
            started_at: None,
            frame_count: 0,
            drop_count: 0,
            target_gone: false,
            last_error: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct StartRequest {
    pub duration_sec: Option<u64>,
    pub interval_sec: Option<f64>,
    pub mode: String,
    pub region: Option<(i32, i32, u32, u32)>,
    pub screen_display_id: Option<String>,
    pub window_title: Option<String>,
    pub audio_source: Option<AudioSource>,
}

enum Command {
    Start(StartRequest, oneshot::Sender<Result<()>>),
    Stop(oneshot::Sender<Result<()>>),
}

/// Handle held by the HTTP layer. The actual state machine runs in a single
/// background task; this struct only owns the command channel and a cheap
/// `watch` receiver for status polling.
pub struct Orchestrator {
    commands: mpsc::Sender<Command>,
    status: watch::Receiver<StatusSnapshot>,
}

pub struct OrchestratorDeps {
    pub config: Config,
    pub paths: Paths,
    pub db: Arc<MetadataStore>,
    pub ingestion: Arc<IngestionQueue>,
    pub tracking: Arc<TrackingManager>,
}

impl Orchestrator {
    pub fn spawn(deps: OrchestratorDeps) -> Arc<Self> {
        let (tx, rx) = mpsc::channel(8);
        let (status_tx, status_rx) = watch::channel(StatusSnapshot::idle());
        let actor = Actor {
            deps,
            commands: rx,
            status: status_tx,
        };
        tokio::spawn(actor.run());
        Arc::new(Self {
            commands: tx,
            status: status_rx,
        })
    }

    pub async fn start(&self, req: StartRequest) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(Command::Start(req, tx))
            .await
            .map_err(|_| Error::Internal("orchestrator task is gone".into()))?;
        rx.await
            .map_err(|_| Error::Internal("orchestrator dropped the reply channel".into()))?
    }

    pub async fn stop(&self) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(Command::Stop(tx))
            .await
            .map_err(|_| Error::Internal("orchestrator task is gone".into()))?;
        rx.await
            .map_err(|_| Error::Internal("orchestrator dropped the reply channel".into()))?
    }

    pub fn status(&self) -> StatusSnapshot {
        self.status.borrow().clone()
    }

    /// Cloned status receiver for long-lived subscribers (`/recording/status/stream`).
    pub fn status_watch(&self) -> watch::Receiver<StatusSnapshot> {
        self.status.clone()
    }
}

struct Actor {
    deps: OrchestratorDeps,
    commands: mpsc::Receiver<Command>,
    status: watch::Sender<StatusSnapshot>,
}

impl Actor {
    async fn run(mut self) {
        while let Some(command) = self.commands.recv().await {
            match command {
                Command::Stop(reply) => {
                    let _ = reply.send(Ok(()));
                }
                Command::Start(req, reply) => {
                    self.handle_start(req, reply).await;
                }
            }
        }
    }

    async fn handle_start(&mut self, req: StartRequest, reply: oneshot::Sender<Result<()>>) {
        self.status.send_replace(StatusSnapshot {
            state: OrchestratorState::Preparing,
            ..StatusSnapshot::idle()
        });

        let session = match self.prepare(&req).await {
            Ok(session) => session,
            Err(err) => {
                self.status.send_replace(StatusSnapshot {
                    last_error: Some(err.to_string()),
                    ..StatusSnapshot::idle()
                });
                let _ = reply.send(Err(err));
                return;
            }
        };

        self.status.send_replace(StatusSnapshot {
            state: OrchestratorState::Recording,
            is_recording: true,
            recording_id: Some(session.recording_id.clone()),
            started_at: Some(session.started_at),
            ..StatusSnapshot::idle()
        });
        let _ = reply.send(Ok(()));

        let outcome = self.record(session).await;
        self.finalize(outcome).await;

        self.status.send_replace(StatusSnapshot::idle());
    }

    /// Opens the capture target and, only once that succeeds, creates the
    /// Recording row and opens the optional audio/input sessions. A target
    /// that cannot be opened at all is treated as a bad request, not a
    /// mid-recording disappearance — see DESIGN.md.
    async fn prepare(&mut self, req: &StartRequest) -> Result<RecordingSession> {
        let interval_sec = req
            .interval_sec
            .unwrap_or(self.deps.config.recording_default_interval_sec);
        if interval_sec <= 0.0 {
            return Err(Error::InvalidArgument("interval must be > 0".into()));
        }
        let duration_sec = req
            .duration_sec
            .unwrap_or(self.deps.config.recording_default_duration_sec);

        let (target, mode, target_display_id, target_window_title, region_rect) =
            resolve_target(req)?;

        let stream = FrameStream::open(&target, Duration::from_secs_f64(interval_sec))
            .map_err(|e| Error::InvalidArgument(e.to_string()))?;

        let id = memscreen_db::uuid_v4();
        let started_at = Utc::now();

        let requested_audio = req
            .audio_source
            .unwrap_or(self.deps.config.recording_audio_source);
        let audio_capture = if requested_audio != AudioSource::None {
            match memscreen_audio::AudioCapture::open(requested_audio) {
                Ok(capture) => Some(capture),
                Err(err) => {
                    warn!(error = %err, "audio capture unavailable, continuing without audio");
                    None
                }
            }
        } else {
            None
        };
        let resolved_audio_tag = if audio_capture.is_some() {
            audio_tag_for(requested_audio)
        } else {
            AudioSourceTag::None
        };

        if self.deps.config.auto_track_input_with_recording {
            if let Err(err) = self.deps.tracking.start().await {
                warn!(error = %err, "failed to start input tracking for recording");
            }
        }

        let recording = Recording {
            id: id.clone(),
            device_name: device_name_for(&req.screen_display_id),
            start_time: started_at,
            end_time: started_at,
            frame_count: 0,
            fps: 0.0,
            duration_seconds: 0.0,
            file_path: None,
            audio_source_tag: resolved_audio_tag,
            mode,
            target_display_id,
            target_window_title,
            region_rect,
            app_name: None,
            content_summary: None,
            content_tags: Vec::new(),
            user_tags: Vec::new(),
            analysis_state: memscreen_db::models::AnalysisState::Pending,
        };
        self.deps
            .db
            .put_recording(&recording)
            .await
            .map_err(Error::from)?;

        Ok(RecordingSession {
            recording_id: id,
            started_at,
            duration_sec,
            interval_sec,
            stream: Some(stream),
            audio_capture,
            auto_tracked: self.deps.config.auto_track_input_with_recording,
        })
    }

    async fn record(&mut self, mut session: RecordingSession) -> RecordOutcome {
        let mut stream = session.stream.take().expect("stream present after prepare");
        let mut frames: Vec<SampledFrame> = Vec::new();
        let scratch_dir = self
            .deps
            .paths
            .videos_dir()
            .join(format!("scratch-{}", session.recording_id));
        if let Err(err) = std::fs::create_dir_all(&scratch_dir) {
            return RecordOutcome {
                session,
                frames,
                target_gone: false,
                error: Some(Error::Internal(format!("could not create scratch dir: {err}"))),
            };
        }

        let deadline = if session.duration_sec > 0 {
            Some(session.started_at + chrono::Duration::seconds(session.duration_sec as i64))
        } else {
            None
        };
        let mut target_gone = false;
        let mut frame_index: u64 = 0;

        loop {
            if let Some(deadline) = deadline {
                if Utc::now() >= deadline {
                    break;
                }
            }
            tokio::select! {
                biased;
                command = self.commands.recv() => {
                    match command {
                        Some(Command::Stop(reply)) => {
                            let _ = reply.send(Ok(()));
                            break;
                        }
                        Some(Command::Start(_req, reply)) => {
                            let _ = reply.send(Err(Error::Busy("a recording is already active".into())));
                        }
                        None => break,
                    }
                }
                captured = stream.next(NEXT_FRAME_TIMEOUT) => {
                    match captured {
                        Ok(Some(frame)) => {
                            frame_index += 1;
                            match stage_frame(&scratch_dir, frame_index, &frame) {
                                Ok(path) => {
                                    frames.push(SampledFrame {
                                        timestamp: approx_datetime_from_instant(frame.timestamp),
                                        path,
                                    });
                                    self.status.send_replace(StatusSnapshot {
                                        state: OrchestratorState::Recording,
                                        is_recording: true,
                                        recording_id: Some(session.recording_id.clone()),
                                        started_at: Some(session.started_at),
                                        frame_count: frames.len() as u64,
                                        drop_count: stream.drop_counter(),
                                        target_gone: false,
                                        last_error: None,
                                    });
                                    emit_pipeline_trace(PipelineTraceEvent {
                                        frame_number: Some(frame_index),
                                        frame_id: None,
                                        window: session.recording_id.clone().into(),
                                        app: None,
                                        stage: PipelineStage::Capture,
                                        status: StageStatus::Completed,
                                        started_at: Utc::now(),
                                        finished_at: Some(Utc::now()),
                                        duration_ms: None,
                                        extra: serde_json::Value::Null,
                                    });
                                }
                                Err(err) => {
                                    warn!(error = %err, "failed to stage captured frame");
                                }
                            }
                        }
                        Ok(None) => {}
                        Err(memscreen_vision::ClosedReason::TargetGone) => {
                            target_gone = true;
                            break;
                        }
                        Err(memscreen_vision::ClosedReason::Requested) => break,
                    }
                }
            }
        }

        session.stream = None;
        drop(stream);

        RecordOutcome {
            session,
            frames,
            target_gone,
            error: None,
        }
    }

    async fn finalize(&mut self, outcome: RecordOutcome) {
        let RecordOutcome {
            mut session,
            frames,
            target_gone,
            error,
        } = outcome;
        self.status.send_replace(StatusSnapshot {
            state: OrchestratorState::Stopping,
            is_recording: true,
            recording_id: Some(session.recording_id.clone()),
            started_at: Some(session.started_at),
            frame_count: frames.len() as u64,
            target_gone,
            last_error: error.as_ref().map(|e| e.to_string()),
            ..StatusSnapshot::idle()
        });

        if session.auto_tracked {
            if let Err(err) = self.deps.tracking.stop().await {
                warn!(error = %err, "failed to stop input tracking after recording");
            } else {
                info!(recording_id = %session.recording_id, "input tracking stopped for recording");
            }
        }

        let audio_path = match session.audio_capture.take() {
            Some(capture) => match capture.finish() {
                Ok(bytes) if !bytes.is_empty() => {
                    let path = self.deps.paths.audio_path(&session.recording_id);
                    match std::fs::write(&path, &bytes) {
                        Ok(()) => Some(path),
                        Err(err) => {
                            warn!(error = %err, "failed to write captured audio, continuing without it");
                            None
                        }
                    }
                }
                Ok(_) => None,
                Err(err) => {
                    warn!(error = %err, "failed to finalize audio capture");
                    None
                }
            },
            None => None,
        };

        if let Some(err) = error {
            self.mark_failed(&session.recording_id, &err.to_string()).await;
            self.cleanup_scratch(&session.recording_id);
            return;
        }

        if frames.is_empty() {
            self.mark_failed(&session.recording_id, "no frames were captured").await;
            self.cleanup_scratch(&session.recording_id);
            return;
        }

        let sequence = plan_sequence(&frames, session.interval_sec);
        let output_path = self.deps.paths.video_path(&session.recording_id);
        let stage_root = self.deps.paths.videos_dir();
        let encode_result = {
            let sequence = sequence.clone();
            let audio_path = audio_path.clone();
            let output_path = output_path.clone();
            tokio::task::spawn_blocking(move || {
                encode(&EncodeRequest {
                    sequence: &sequence,
                    audio_path: audio_path.as_deref(),
                    output_path: &output_path,
                    stage_root: Some(&stage_root),
                })
            })
            .await
        };

        let outcome = match encode_result {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(err)) => {
                self.mark_failed(&session.recording_id, &err.to_string()).await;
                self.cleanup_scratch(&session.recording_id);
                return;
            }
            Err(join_err) => {
                self.mark_failed(&session.recording_id, &join_err.to_string()).await;
                self.cleanup_scratch(&session.recording_id);
                return;
            }
        };

        self.status.send_replace(StatusSnapshot {
            state: OrchestratorState::Finalizing,
            is_recording: true,
            recording_id: Some(session.recording_id.clone()),
            started_at: Some(session.started_at),
            frame_count: frames.len() as u64,
            target_gone,
            ..StatusSnapshot::idle()
        });

        let end_time = Utc::now();
        let duration_seconds = (end_time - session.started_at).num_milliseconds() as f64 / 1000.0;
        let patch = RecordingPatch {
            end_time: Some(end_time),
            fps: Some(outcome.effective_fps),
            frame_count: Some(frames.len() as i64),
            duration_seconds: Some(duration_seconds),
            file_path: Some(outcome.output_path.to_string_lossy().into_owned()),
            ..RecordingPatch::default()
        };
        if let Err(err) = self.deps.db.update_recording(&session.recording_id, &patch).await {
            warn!(error = %err, recording_id = %session.recording_id, "failed to persist finalized recording fields");
        }
        self.cleanup_scratch(&session.recording_id);

        self.deps.ingestion.enqueue(session.recording_id.clone());
        info!(recording_id = %session.recording_id, frames = frames.len(), "recording finalized, queued for ingestion");
    }

    async fn mark_failed(&self, recording_id: &str, message: &str) {
        warn!(recording_id, error = message, "recording failed");
        let patch = RecordingPatch {
            analysis_state: Some(memscreen_db::models::AnalysisState::Failed),
            end_time: Some(Utc::now()),
            ..RecordingPatch::default()
        };
        if let Err(err) = self.deps.db.update_recording(recording_id, &patch).await {
            warn!(error = %err, recording_id, "failed to mark recording as failed");
        }
    }

    fn cleanup_scratch(&self, recording_id: &str) {
        let scratch_dir = self.deps.paths.videos_dir().join(format!("scratch-{recording_id}"));
        let _ = std::fs::remove_dir_all(scratch_dir);
    }
}

struct RecordingSession {
    recording_id: String,
    started_at: DateTime<Utc>,
    duration_sec: u64,
    interval_sec: f64,
    stream: Option<FrameStream>,
    audio_capture: Option<memscreen_audio::AudioCapture>,
    auto_tracked: bool,
}

struct RecordOutcome {
    session: RecordingSession,
    frames: Vec<SampledFrame>,
    target_gone: bool,
    error: Option<Error>,
}

fn stage_frame(scratch_dir: &std::path::Path, index: u64, frame: &Frame) -> std::io::Result<PathBuf> {
    let path = scratch_dir.join(format!("frame_{index:06}.png"));
    let buffer = image::RgbaImage::from_raw(frame.width, frame.height, frame.pixels.clone())
        .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::InvalidData, "frame buffer size mismatch"))?;
    buffer
        .save(&path)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e.to_string()))?;
    Ok(path)
}

fn audio_tag_for(source: AudioSource) -> AudioSourceTag {
    match source {
        AudioSource::None => AudioSourceTag::None,
        AudioSource::Microphone => AudioSourceTag::Microphone,
        AudioSource::SystemAudio => AudioSourceTag::System,
        AudioSource::Mixed => AudioSourceTag::Mixed,
    }
}

fn device_name_for(screen_display_id: &Option<String>) -> String {
    match screen_display_id {
        Some(id) => format!("monitor_{id}"),
        None => "monitor_primary".to_string(),
    }
}

/// Resolves a `StartRequest` into a capture `Target` plus the fields the
/// Recording row persists. `mode="window"` is treated as an alias for
/// region-on-the-window (DESIGN.md open question 1): capture goes through
/// `Target::Window`, but the row is stored as `region` with
/// `target_window_title` set once the window's current bounds are known.
fn resolve_target(
    req: &StartRequest,
) -> Result<(Target, RecordingMode, Option<String>, Option<String>, Option<(i32, i32, i32, i32)>)> {
    match req.mode.as_str() {
        "fullscreen" => Ok((Target::Full, RecordingMode::Fullscreen, None, None, None)),
        "fullscreen-single" | "fullscreen_single" => {
            let display_id = req
                .screen_display_id
                .clone()
                .ok_or_else(|| Error::InvalidArgument("fullscreen-single mode requires screen_display_id".into()))?;
            Ok((
                Target::Display(display_id.clone()),
                RecordingMode::FullscreenSingle,
                Some(display_id),
                None,
                None,
            ))
        }
        "region" => {
            let display_id = req
                .screen_display_id
                .clone()
                .ok_or_else(|| Error::InvalidArgument("region mode requires screen_display_id".into()))?;
            let rect = req
                .region
                .ok_or_else(|| Error::InvalidArgument("region mode requires a region rect".into()))?;
            Ok((
                Target::Region {
                    display_id: display_id.clone(),
                    rect,
                },
                RecordingMode::Region,
                Some(display_id),
                None,
                Some((rect.0, rect.1, rect.2 as i32, rect.3 as i32)),
            ))
        }
        "window" => {
            let title = req
                .window_title
                .clone()
                .ok_or_else(|| Error::InvalidArgument("window mode requires window_title".into()))?;
            let bounds = memscreen_vision::frame_source::list_windows()
                .map_err(|e| Error::InvalidArgument(e.to_string()))?
                .into_iter()
                .find(|w| w.title == title)
                .map(|w| w.bounds);
            let region_rect = bounds.map(|(x, y, w, h)| (x, y, w as i32, h as i32));
            Ok((
                Target::Window(title.clone()),
                RecordingMode::Region,
                None,
                Some(title),
                region_rect,
            ))
        }
        other => Err(Error::InvalidArgument(format!("unknown recording mode '{other}'"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn req(mode: &str) -> StartRequest {
        StartRequest {
            duration_sec: Some(3),
            interval_sec: Some(1.0),
            mode: mode.to_string(),
            region: None,
            screen_display_id: None,
            window_title: None,
            audio_source: None,
        }
    }

    #[test]
    fn fullscreen_needs_nothing() {
        let (target, mode, display, window, rect) = resolve_target(&req("fullscreen")).unwrap();
        assert!(matches!(target, Target::Full));
        assert_eq!(mode, RecordingMode::Fullscreen);
        assert!(display.is_none());
        assert!(window.is_none());
        assert!(rect.is_none());
    }

    #[test]
    fn fullscreen_single_requires_display_id() {
        let err = resolve_target(&req("fullscreen-single")).unwrap_err();
        assert_eq!(err.code(), "invalid_argument");
    }

    #[test]
    fn region_requires_display_id_and_rect() {
        let mut r = req("region");
        r.screen_display_id = Some("display-nonexistent".to_string());
        let err = resolve_target(&r).unwrap_err();
        assert_eq!(err.code(), "invalid_argument");

        r.region = Some((0, 0, 100, 100));
        let (target, mode, display, _window, rect) = resolve_target(&r).unwrap();
        assert!(matches!(target, Target::Region { .. }));
        assert_eq!(mode, RecordingMode::Region);
        assert_eq!(display.as_deref(), Some("display-nonexistent"));
        assert_eq!(rect, Some((0, 0, 100, 100)));
    }

    #[test]
    fn window_requires_window_title() {
        let err = resolve_target(&req("window")).unwrap_err();
        assert_eq!(err.code(), "invalid_argument");
    }

    #[test]
    fn unknown_mode_is_invalid_argument() {
        let err = resolve_target(&req("bogus")).unwrap_err();
        assert_eq!(err.code(), "invalid_argument");
    }
}
