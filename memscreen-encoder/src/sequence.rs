use std::path::PathBuf;

use chrono::{DateTime, Utc};

/// A single captured frame destined for the output video.
#[derive(Debug, Clone)]
pub struct SampledFrame {
    pub timestamp: DateTime<Utc>,
    pub path: PathBuf,
}

/// An ordered list of frame paths ready to hand to ffmpeg's image2 demuxer,
/// plus the frame rate that reproduces real elapsed time across them.
#[derive(Debug, Clone)]
pub struct Sequence {
    pub frame_paths: Vec<PathBuf>,
    pub effective_fps: f64,
    pub duplicated_count: usize,
}

const MIN_FPS: f64 = 1.0;

/// Builds the frame sequence ffmpeg will mux, duplicating a frame whenever
/// the gap to the next one exceeds twice `interval_sec` so static screens
/// aren't sped up in the resulting video.
pub fn plan_sequence(frames: &[SampledFrame], interval_sec: f64) -> Sequence {
    if frames.is_empty() {
        return Sequence {
            frame_paths: Vec::new(),
            effective_fps: MIN_FPS,
            duplicated_count: 0,
        };
    }
    if frames.len() == 1 {
        return Sequence {
            frame_paths: vec![frames[0].path.clone()],
            effective_fps: MIN_FPS,
            duplicated_count: 0,
        };
    }

    let gap_threshold = chrono::Duration::milliseconds((interval_sec * 2.0 * 1000.0) as i64);
    let mut frame_paths = Vec::with_capacity(frames.len());
    let mut duplicated_count = 0;

    for window in frames.windows(2) {
        let current = &window[0];
        let next = &window[1];
        frame_paths.push(current.path.clone());

        let gap = next.timestamp - current.timestamp;
        if gap > gap_threshold && interval_sec > 0.0 {
            let extra = ((gap.num_milliseconds() as f64 / 1000.0) / interval_sec).round() as usize;
            for _ in 1..extra.max(1) {
                frame_paths.push(current.path.clone());
                duplicated_count += 1;
            }
        }
    }
    frame_paths.push(frames.last().expect("checked non-empty").path.clone());

    let duration_sec = (frames.last().unwrap().timestamp - frames.first().unwrap().timestamp)
        .num_milliseconds() as f64
        / 1000.0;
    let effective_fps = if duration_sec > 0.0 {
        (frame_paths.len() as f64 / duration_sec).max(MIN_FPS)
    } else {
        MIN_FPS
    };

    Sequence {
        frame_paths,
        effective_fps,
        duplicated_count,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(offset_sec: i64, path: &str) -> SampledFrame {
        SampledFrame {
            timestamp: DateTime::<Utc>::from_timestamp(offset_sec, 0).unwrap(),
            path: PathBuf::from(path),
        }
    }

    #[test]
    fn evenly_spaced_frames_are_not_duplicated() {
        let frames = vec![frame(0, "a"), frame(2, "b"), frame(4, "c")];
        let sequence = plan_sequence(&frames, 2.0);
        assert_eq!(sequence.duplicated_count, 0);
        assert_eq!(sequence.frame_paths.len(), 3);
    }

    #[test]
    fn large_gap_duplicates_the_preceding_frame() {
        let frames = vec![frame(0, "a"), frame(20, "b")];
        let sequence = plan_sequence(&frames, 2.0);
        assert!(sequence.duplicated_count > 0);
        assert!(sequence.frame_paths.len() > 2);
    }

    #[test]
    fn empty_input_yields_empty_sequence() {
        let sequence = plan_sequence(&[], 2.0);
        assert!(sequence.frame_paths.is_empty());
    }
}
