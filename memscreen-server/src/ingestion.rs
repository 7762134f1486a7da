//! Ingestion Pipeline (C10): decodes a finalized recording's frames back out
//! of its mp4, runs OCR + vision description + embedding per sampled frame,
//! and rolls the results up into the Recording's summary/tags.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use ffmpeg_sidecar::command::FfmpegCommand;
use memscreen_core::{Config, Error, Paths, Result};
use memscreen_db::models::{AnalysisState, FrameArtifact, RecordingPatch};
use memscreen_db::vector::{VectorFilter, VectorMetadata, VectorSource};
use memscreen_db::{MetadataStore, VectorStore};
use memscreen_runtime::RuntimeClient;
use memscreen_vision::{run_ocr, Frame as VisionFrame};
use tempfile::TempDir;
use tokio::sync::{mpsc, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Shutdown grace period for in-flight analyses (§4.13: "ingestion tasks
/// are cancelled and awaited").
const SHUTDOWN_DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

const EMBEDDING_BATCH_SIZE: usize = 64;
const VISION_PROMPT: &str =
    "Describe what is visible on screen in a few concise sentences, focusing on the application and content shown.";

pub struct IngestionDeps {
    pub config: Config,
    pub paths: Paths,
    pub db: Arc<MetadataStore>,
    pub vectors: Arc<VectorStore>,
    pub runtime: Arc<RuntimeClient>,
}

/// Owns the job queue and per-recording cancellation handles. Jobs run with
/// bounded concurrency (`max_concurrent_analyses`); `enqueue` never blocks
/// the caller.
pub struct IngestionQueue {
    deps: IngestionDeps,
    jobs: mpsc::UnboundedSender<String>,
    cancellations: DashMap<String, CancellationToken>,
    active: AtomicUsize,
}

impl IngestionQueue {
    pub fn spawn(deps: IngestionDeps) -> Arc<Self> {
        let (tx, rx) = mpsc::unbounded_channel();
        let queue = Arc::new(Self {
            deps,
            jobs: tx,
            cancellations: DashMap::new(),
            active: AtomicUsize::new(0),
        });
        let worker = Arc::clone(&queue);
        tokio::spawn(async move { worker.dispatch_loop(rx).await });
        queue
    }

    pub fn enqueue(&self, recording_id: String) {
        if self.jobs.send(recording_id).is_err() {
            warn!("ingestion dispatch loop is gone, dropping enqueue");
        }
    }

    /// Cancels an in-flight analysis if one is running for this recording.
    /// A no-op if none is active (idempotent cancellation).
    pub fn cancel(&self, recording_id: &str) {
        if let Some(token) = self.cancellations.get(recording_id) {
            token.cancel();
        }
    }

    /// Cancels every in-flight analysis and waits (bounded) for them to
    /// unwind, for the supervisor's shutdown sequence.
    pub async fn shutdown(&self) {
        for entry in self.cancellations.iter() {
            entry.value().cancel();
        }
        let deadline = tokio::time::Instant::now() + SHUTDOWN_DRAIN_TIMEOUT;
        while self.active.load(Ordering::SeqCst) > 0 {
            if tokio::time::Instant::now() >= deadline {
                warn!("ingestion tasks did not unwind before the shutdown grace period");
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }

    async fn dispatch_loop(self: Arc<Self>, mut jobs: mpsc::UnboundedReceiver<String>) {
        let semaphore = Arc::new(Semaphore::new(self.deps.config.max_concurrent_analyses.max(1)));
        while let Some(recording_id) = jobs.recv().await {
            let this = Arc::clone(&self);
            let semaphore = Arc::clone(&semaphore);
            tokio::spawn(async move {
                let Ok(permit) = semaphore.acquire_owned().await else {
                    return;
                };
                this.active.fetch_add(1, Ordering::SeqCst);
                this.run_job(recording_id).await;
                this.active.fetch_sub(1, Ordering::SeqCst);
                drop(permit);
            });
        }
    }

    async fn run_job(&self, recording_id: String) {
        let token = CancellationToken::new();
        self.cancellations.insert(recording_id.clone(), token.clone());
        let result = tokio::select! {
            result = self.analyze(&recording_id, &token) => result,
            _ = token.cancelled() => Err(Error::Cancelled("analysis cancelled".into())),
        };
        self.cancellations.remove(&recording_id);

        match result {
            Ok(()) => info!(recording_id, "ingestion complete"),
            Err(Error::Cancelled(_)) => {
                info!(recording_id, "ingestion cancelled, leaving analysis_state as pending");
            }
            Err(err) => {
                warn!(recording_id, error = %err, "ingestion failed");
                let patch = RecordingPatch {
                    analysis_state: Some(AnalysisState::Failed),
                    ..RecordingPatch::default()
                };
                if let Err(e) = self.deps.db.update_recording(&recording_id, &patch).await {
                    warn!(recording_id, error = %e, "failed to mark recording analysis as failed");
                }
            }
        }
    }

    /// Idempotent: re-running analysis on a recording first clears any prior
    /// frame artifacts and their vectors before inserting fresh ones.
    async fn analyze(&self, recording_id: &str, token: &CancellationToken) -> Result<()> {
        let recording = self.deps.db.get_recording(recording_id).await.map_err(Error::from)?;
        let Some(file_path) = recording.file_path.clone() else {
            return Err(Error::Internal("recording has no file_path to analyze".into()));
        };

        let stale_refs = self
            .deps
            .db
            .delete_frame_artifacts(recording_id)
            .await
            .map_err(Error::from)?;
        if !stale_refs.is_empty() {
            let collection = memscreen_db::collection_name_for_model(&self.deps.config.embedding_model);
            self.deps
                .vectors
                .delete_by_filter(
                    &collection,
                    &VectorFilter {
                        recording_id: Some(recording_id.to_string()),
                    },
                )
                .await
                .map_err(Error::from)?;
        }

        let video_path = PathBuf::from(&file_path);
        let extracted = extract_frames(&video_path, &self.deps.paths)?;
        if token.is_cancelled() {
            return Err(Error::Cancelled("analysis cancelled".into()));
        }

        let stride = self.deps.config.analysis_frame_stride.max(1) as usize;
        let selected = select_frames(&extracted.frame_paths, stride);
        if selected.is_empty() {
            return Err(Error::Internal("no frames available to analyze".into()));
        }

        let total = extracted.frame_paths.len().max(1);
        let mut artifacts = Vec::with_capacity(selected.len());
        let mut embeddings: Vec<(String, Vec<f32>, VectorMetadata)> = Vec::new();
        let mut combined_texts: Vec<String> = Vec::new();

        for index in selected {
            if token.is_cancelled() {
                return Err(Error::Cancelled("analysis cancelled".into()));
            }
            let path = &extracted.frame_paths[index];
            let t_offset = recording.duration_seconds * (index as f64 / total as f64);

            let ocr_text = analyze_ocr(path).await.map(|text| memscreen_core::pii::remove_pii(&text));
            let vision_description = self.describe_frame(path).await;

            if ocr_text.is_none() && vision_description.is_none() {
                continue;
            }

            let combined = combined_text(ocr_text.as_deref(), vision_description.as_deref());
            let embedding = self
                .deps
                .runtime
                .embed(&combined, &self.deps.config.embedding_model)
                .await
                .ok();

            let artifact_id = memscreen_db::uuid_v4();
            let embedding_ref = embedding.is_some().then(|| artifact_id.clone());

            if let Some(vector) = &embedding {
                embeddings.push((
                    artifact_id.clone(),
                    vector.clone(),
                    VectorMetadata {
                        recording_id: recording_id.to_string(),
                        t_offset,
                        source: source_tag(&ocr_text, &vision_description),
                    },
                ));
            }

            if !combined.trim().is_empty() {
                combined_texts.push(combined.clone());
            }

            artifacts.push(FrameArtifact {
                id: artifact_id,
                recording_id: recording_id.to_string(),
                t_offset_seconds: t_offset,
                ocr_text,
                vision_description,
                embedding_ref,
                created_at: Utc::now(),
            });
        }

        if artifacts.is_empty() {
            return Err(Error::Internal("analysis produced no usable frame artifacts".into()));
        }

        self.deps
            .db
            .put_frame_artifacts(recording_id, &artifacts)
            .await
            .map_err(Error::from)?;

        if embeddings.is_empty() {
            return Err(Error::Internal(
                "no embeddings were produced for any sampled frame (model runtime unavailable?)".into(),
            ));
        }
        let dim = embeddings[0].1.len();
        let collection = memscreen_db::collection_name_for_model(&self.deps.config.embedding_model);
        self.deps.vectors.ensure_collection(&collection, dim).await.map_err(Error::from)?;
        for chunk in embeddings.chunks(EMBEDDING_BATCH_SIZE) {
            self.deps.vectors.upsert(&collection, chunk).await.map_err(Error::from)?;
        }

        let (content_summary, content_tags) = self.summarize(&combined_texts).await;
        let patch = RecordingPatch {
            analysis_state: Some(AnalysisState::Done),
            content_summary: Some(content_summary),
            content_tags: Some(content_tags),
            ..RecordingPatch::default()
        };
        self.deps
            .db
            .update_recording(recording_id, &patch)
            .await
            .map_err(Error::from)?;

        Ok(())
    }

    async fn describe_frame(&self, path: &Path) -> Option<String> {
        let bytes = tokio::fs::read(path).await.ok()?;
        self.deps
            .runtime
            .describe_image(&bytes, &self.deps.config.vision_model, VISION_PROMPT)
            .await
            .ok()
    }

    /// Produces the Recording's `content_summary`/`content_tags` from the
    /// combined OCR + vision text of its sampled frames via a single C4 chat
    /// call (§4.10 step 4), in the same request shape `query::answer` uses.
    /// Falls back to a plain join with no tags if the runtime is unreachable
    /// rather than failing the whole analysis over a cosmetic field.
    async fn summarize(&self, combined_texts: &[String]) -> (String, Vec<String>) {
        if combined_texts.is_empty() {
            return (String::new(), Vec::new());
        }
        let messages = vec![memscreen_runtime::ChatMessage {
            role: memscreen_runtime::ChatRole::User,
            content: summary_prompt(combined_texts),
        }];
        match self.deps.runtime.chat(messages, &self.deps.config.chat_model).await {
            Ok(response) => parse_summary_response(&response),
            Err(err) => {
                warn!(error = %err, "summary/tag generation failed, falling back to a plain join");
                (combined_texts.join(" "), Vec::new())
            }
        }
    }
}

async fn analyze_ocr(path: &Path) -> Option<String> {
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || {
        let image = image::open(&path).ok()?.to_rgba8();
        let frame = VisionFrame {
            timestamp: std::time::Instant::now(),
            width: image.width(),
            height: image.height(),
            pixels: image.into_raw(),
        };
        run_ocr(&frame, &[memscreen_core::Language::English]).ok()
    })
    .await
    .ok()
    .flatten()
    .filter(|s| !s.trim().is_empty())
}

fn combined_text(ocr: Option<&str>, vision: Option<&str>) -> String {
    match (ocr, vision) {
        (Some(o), Some(v)) => format!("{o}\n{v}"),
        (Some(o), None) => o.to_string(),
        (None, Some(v)) => v.to_string(),
        (None, None) => String::new(),
    }
}

fn source_tag(ocr: &Option<String>, vision: &Option<String>) -> VectorSource {
    match (ocr.is_some(), vision.is_some()) {
        (true, true) => VectorSource::Combined,
        (true, false) => VectorSource::Ocr,
        (false, true) => VectorSource::Vision,
        (false, false) => VectorSource::Combined,
    }
}

fn summary_prompt(combined_texts: &[String]) -> String {
    let mut prompt = String::from(
        "The following are OCR text and visual descriptions sampled from a recorded screen \
         session, in chronological order. Write a concise 1-2 sentence summary of what the \
         user was doing. Then, on its own line, write \"TAGS:\" followed by a comma-separated \
         list of lowercase noun-phrase tags (apps, topics, content types) covering the session.\n\n",
    );
    for (index, text) in combined_texts.iter().enumerate() {
        prompt.push_str(&format!("--- frame {} ---\n{text}\n", index + 1));
    }
    prompt
}

/// Splits the chat completion into its summary and tag list. No stemming or
/// unicode normalization beyond lowercasing (DESIGN.md open question 3);
/// tags are deduplicated by exact string match after normalization.
fn parse_summary_response(response: &str) -> (String, Vec<String>) {
    match response.split_once("TAGS:") {
        Some((summary, tags)) => {
            let mut tags: Vec<String> = tags
                .split(',')
                .map(|tag| {
                    tag.trim()
                        .trim_matches(|c: char| !c.is_alphanumeric() && c != ' ')
                        .to_lowercase()
                })
                .filter(|tag| !tag.is_empty())
                .collect();
            tags.sort();
            tags.dedup();
            (summary.trim().to_string(), tags)
        }
        None => (response.trim().to_string(), Vec::new()),
    }
}

struct ExtractedFrames {
    _dir: TempDir,
    frame_paths: Vec<PathBuf>,
}

/// Decodes every frame of the finished video to PNGs in a scratch directory.
/// Per-frame timestamps aren't recoverable from decoded output, so callers
/// approximate `t_offset_seconds` from frame index and the recording's total
/// duration (DESIGN.md simplification).
fn extract_frames(video_path: &Path, paths: &Paths) -> Result<ExtractedFrames> {
    let ffmpeg_path = memscreen_encoder::find_ffmpeg_path()
        .ok_or_else(|| Error::EncoderUnavailable("ffmpeg binary not found".into()))?;

    std::fs::create_dir_all(paths.videos_dir()).map_err(|e| Error::Internal(e.to_string()))?;
    let dir = TempDir::new_in(paths.videos_dir()).map_err(|e| Error::Internal(e.to_string()))?;
    let pattern = dir.path().join("frame_%06d.png");

    let mut cmd = FfmpegCommand::new_with_path(&ffmpeg_path);
    cmd.args(["-y", "-i"]);
    cmd.args([video_path.to_str().ok_or_else(|| Error::InvalidArgument("video path is not valid UTF-8".into()))?]);
    cmd.args([pattern.to_str().ok_or_else(|| Error::Internal("scratch path is not valid UTF-8".into()))?]);

    let mut child = cmd
        .spawn()
        .map_err(|e| Error::Internal(format!("failed to spawn ffmpeg for frame extraction: {e}")))?;
    let status = child
        .wait()
        .map_err(|e| Error::Internal(format!("ffmpeg extraction process error: {e}")))?;
    if !status.success() {
        return Err(Error::Internal(format!("ffmpeg frame extraction exited with status {status}")));
    }

    let mut frame_paths: Vec<PathBuf> = std::fs::read_dir(dir.path())
        .map_err(|e| Error::Internal(e.to_string()))?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.extension().and_then(|e| e.to_str()) == Some("png"))
        .collect();
    frame_paths.sort();

    if frame_paths.is_empty() {
        return Err(Error::Internal("ffmpeg produced no frames".into()));
    }

    Ok(ExtractedFrames {
        _dir: dir,
        frame_paths,
    })
}

/// Picks every `stride`-th frame, always including the first and last.
fn select_frames(frame_paths: &[PathBuf], stride: usize) -> Vec<usize> {
    let last = frame_paths.len() - 1;
    let mut indices: Vec<usize> = (0..frame_paths.len()).step_by(stride).collect();
    if !indices.contains(&last) {
        indices.push(last);
    }
    indices
}
