use std::path::{Path, PathBuf};

use ffmpeg_sidecar::command::FfmpegCommand;
use tempfile::TempDir;
use tracing::{info, warn};

use crate::error::{Error, Result};
use crate::resolver::find_ffmpeg_path;
use crate::sequence::Sequence;

const AUDIO_TOLERANCE_SEC: f64 = 0.25;

pub struct EncodeRequest<'a> {
    pub sequence: &'a Sequence,
    pub audio_path: Option<&'a Path>,
    pub output_path: &'a Path,
    /// Directory the frame-staging tempdir is created under. `None` falls
    /// back to the OS temp directory.
    pub stage_root: Option<&'a Path>,
}

pub struct EncodeOutcome {
    pub output_path: PathBuf,
    pub effective_fps: f64,
    pub duplicated_frame_count: usize,
}

/// Muxes a planned frame sequence (and optional audio track) into an mp4
/// via bundled ffmpeg. On failure, the staged keyframes are left in place
/// under the returned temp directory's parent so a caller can retry or
/// salvage them instead of losing the recording outright.
pub fn encode(request: &EncodeRequest) -> Result<EncodeOutcome> {
    if request.sequence.frame_paths.is_empty() {
        return Err(Error::InvalidArgument("cannot encode an empty frame sequence".into()));
    }

    let ffmpeg_path = find_ffmpeg_path().or_else(find_ffmpeg_path).ok_or_else(|| {
        Error::EncoderUnavailable("ffmpeg binary not found on PATH or MEMSCREEN_FFMPEG_PATH".into())
    })?;

    let stage = stage_frames(&request.sequence.frame_paths, request.stage_root)?;

    let mut cmd = FfmpegCommand::new_with_path(&ffmpeg_path);
    cmd.args(["-y"]);
    cmd.args(["-framerate", &format!("{:.3}", request.sequence.effective_fps)]);
    cmd.args(["-i", &stage.pattern]);

    if let Some(audio_path) = request.audio_path {
        apply_audio_tolerance(&mut cmd, audio_path, request.sequence);
    }

    cmd.args(["-c:v", "libx264", "-pix_fmt", "yuv420p"]);
    if request.audio_path.is_some() {
        cmd.args(["-c:a", "aac", "-shortest"]);
    }
    cmd.args([request.output_path.to_str().ok_or_else(|| {
        Error::InvalidArgument("output path is not valid UTF-8".into())
    })?]);

    let mut child = cmd
        .spawn()
        .map_err(|e| Error::EncodeFailed(format!("failed to spawn ffmpeg: {e}")))?;

    let status = child
        .wait()
        .map_err(|e| Error::EncodeFailed(format!("ffmpeg process error: {e}")))?;

    if !status.success() {
        let preserved = stage.dir.into_path();
        warn!(?status, staged_dir = %preserved.display(), "ffmpeg exited non-zero, keyframes preserved");
        return Err(Error::EncodeFailed(format!(
            "ffmpeg exited with status {status}, staged frames preserved at {}",
            preserved.display()
        )));
    }

    info!(
        output = %request.output_path.display(),
        fps = request.sequence.effective_fps,
        frames = request.sequence.frame_paths.len(),
        "encode complete"
    );

    Ok(EncodeOutcome {
        output_path: request.output_path.to_path_buf(),
        effective_fps: request.sequence.effective_fps,
        duplicated_frame_count: request.sequence.duplicated_count,
    })
}

struct StagedFrames {
    dir: TempDir,
    pattern: String,
}

fn stage_frames(frame_paths: &[PathBuf], stage_root: Option<&Path>) -> Result<StagedFrames> {
    let dir = match stage_root {
        Some(root) => {
            std::fs::create_dir_all(root).map_err(|e| Error::EncodeFailed(e.to_string()))?;
            TempDir::new_in(root).map_err(|e| Error::EncodeFailed(e.to_string()))?
        }
        None => TempDir::new().map_err(|e| Error::EncodeFailed(e.to_string()))?,
    };
    let ext = frame_paths[0]
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("png");

    for (index, path) in frame_paths.iter().enumerate() {
        let dest = dir.path().join(format!("frame_{index:06}.{ext}"));
        std::fs::hard_link(path, &dest)
            .or_else(|_| std::fs::copy(path, &dest).map(|_| ()))
            .map_err(|e| Error::EncodeFailed(format!("failed to stage frame {}: {e}", path.display())))?;
    }

    let pattern = dir.path().join(format!("frame_%06d.{ext}"));
    Ok(StagedFrames {
        dir,
        pattern: pattern.to_string_lossy().into_owned(),
    })
}

/// Video duration from the planned sequence is implicit in its frame count
/// and effective fps. If the audio track is within `AUDIO_TOLERANCE_SEC` of
/// that duration we let `-shortest` reconcile the difference; beyond that
/// we pad or trim the audio input explicitly so drift doesn't compound.
fn apply_audio_tolerance(cmd: &mut FfmpegCommand, audio_path: &Path, sequence: &Sequence) {
    let video_duration = sequence.frame_paths.len() as f64 / sequence.effective_fps;
    let Some(audio_path_str) = audio_path.to_str() else {
        warn!("audio path is not valid UTF-8, skipping audio track");
        return;
    };

    match probe_wav_duration_sec(audio_path) {
        Some(audio_duration) if (audio_duration - video_duration).abs() <= AUDIO_TOLERANCE_SEC => {
            cmd.args(["-i", audio_path_str]);
        }
        Some(audio_duration) if audio_duration < video_duration => {
            cmd.args(["-i", audio_path_str, "-af", &format!("apad=whole_dur={video_duration}")]);
        }
        Some(_) => {
            cmd.args(["-i", audio_path_str, "-t", &format!("{video_duration}")]);
        }
        None => {
            warn!(audio = %audio_path.display(), "could not determine audio duration, muxing as-is");
            cmd.args(["-i", audio_path_str]);
        }
    }
}

fn probe_wav_duration_sec(path: &Path) -> Option<f64> {
    let reader = hound::WavReader::open(path).ok()?;
    let spec = reader.spec();
    let frames = reader.duration();
    if spec.sample_rate == 0 {
        return None;
    }
    Some(frames as f64 / spec.sample_rate as f64)
}
