use std::path::PathBuf;

const FFMPEG_PATH_ENV: &str = "MEMSCREEN_FFMPEG_PATH";

/// Looks for a usable ffmpeg binary: an explicit override, then whatever
/// `which` finds on PATH. Callers retry once before giving up, since a
/// bundled ffmpeg can finish installing between the first and second call.
pub fn find_ffmpeg_path() -> Option<PathBuf> {
    if let Ok(path) = std::env::var(FFMPEG_PATH_ENV) {
        let candidate = PathBuf::from(path);
        if candidate.is_file() {
            return Some(candidate);
        }
    }
    which::which("ffmpeg").ok()
}
