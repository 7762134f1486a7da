use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// Resolved on-disk layout rooted at the data directory (`<home>/.memscreen`
/// by default, overridable via `--data-root` / `MEMSCREEN_DATA_ROOT`).
#[derive(Debug, Clone)]
pub struct Paths {
    root: PathBuf,
}

impl Paths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn resolve(custom: Option<&Path>) -> Result<Self> {
        let root = match custom {
            Some(p) => p.to_path_buf(),
            None => dirs::home_dir()
                .ok_or_else(|| Error::Internal("could not resolve home directory".into()))?
                .join(".memscreen"),
        };
        let paths = Self::new(root);
        paths.ensure_dirs()?;
        Ok(paths)
    }

    fn ensure_dirs(&self) -> Result<()> {
        for dir in [
            self.root(),
            self.videos_dir(),
            self.audio_dir(),
            self.db_dir(),
            self.vectors_dir(),
            self.logs_dir(),
            self.runtime_dir(),
        ] {
            std::fs::create_dir_all(&dir)
                .map_err(|e| Error::StorageUnavailable(format!("{}: {e}", dir.display())))?;
        }
        Ok(())
    }

    pub fn root(&self) -> PathBuf {
        self.root.clone()
    }

    pub fn videos_dir(&self) -> PathBuf {
        self.root.join("videos")
    }

    pub fn audio_dir(&self) -> PathBuf {
        self.root.join("audio")
    }

    pub fn db_dir(&self) -> PathBuf {
        self.root.join("db")
    }

    pub fn vectors_dir(&self) -> PathBuf {
        self.db_dir().join("vectors")
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.root.join("logs")
    }

    pub fn runtime_dir(&self) -> PathBuf {
        self.root.join("runtime")
    }

    pub fn metadata_db_path(&self) -> PathBuf {
        self.db_dir().join("metadata.db")
    }

    pub fn video_path(&self, recording_id: &str) -> PathBuf {
        self.videos_dir().join(format!("{recording_id}.mp4"))
    }

    pub fn audio_path(&self, recording_id: &str) -> PathBuf {
        self.audio_dir().join(format!("{recording_id}.wav"))
    }

    pub fn settings_path(&self) -> PathBuf {
        self.root.join("flutter_settings.json")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_creates_expected_subdirs() {
        let tmp = tempfile::tempdir().unwrap();
        let paths = Paths::resolve(Some(tmp.path())).unwrap();
        assert!(paths.videos_dir().is_dir());
        assert!(paths.vectors_dir().is_dir());
        assert_eq!(paths.metadata_db_path(), paths.db_dir().join("metadata.db"));
    }
}
