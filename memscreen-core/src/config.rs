use std::path::Path;

use figment::providers::{Env, Format, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{Error, Result};

/// Audio source selection for a recording; also used as a recognized config
/// default (`recording_audio_source`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AudioSource {
    None,
    Microphone,
    SystemAudio,
    Mixed,
}

impl Default for AudioSource {
    fn default() -> Self {
        AudioSource::None
    }
}

/// The recognized, statically-typed configuration surface (§4.1). Any key in
/// `config.toml` or the `MEMSCREEN_` environment not named here is logged and
/// ignored rather than rejected.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
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
}

impl Default for Config {
    fn default() -> Self {
        Self {
            runtime_base_url: "http://127.0.0.1:11434".to_string(),
            vision_model: "vision-default".to_string(),
            embedding_model: "embedding-default".to_string(),
            chat_model: "chat-default".to_string(),
            recording_default_duration_sec: 0,
            recording_default_interval_sec: 1.0,
            recording_audio_source: AudioSource::None,
            auto_track_input_with_recording: false,
            analysis_frame_stride: 1,
            max_concurrent_analyses: 2,
            api_bind: "127.0.0.1:8765".to_string(),
        }
    }
}

const RECOGNIZED_KEYS: &[&str] = &[
    "runtime_base_url",
    "vision_model",
    "embedding_model",
    "chat_model",
    "recording_default_duration_sec",
    "recording_default_interval_sec",
    "recording_audio_source",
    "auto_track_input_with_recording",
    "analysis_frame_stride",
    "max_concurrent_analyses",
    "api_bind",
];

impl Config {
    /// Loads `config.toml` under the data root, layered with `MEMSCREEN_*`
    /// environment overrides. Unknown keys fall back to defaults with a
    /// warning rather than aborting startup.
    pub fn load(config_path: &Path) -> Result<Self> {
        let mut figment = Figment::new().merge(figment::providers::Serialized::defaults(
            Config::default(),
        ));
        if config_path.exists() {
            figment = figment.merge(Toml::file(config_path));
        }
        figment = figment.merge(Env::prefixed("MEMSCREEN_"));

        if let Ok(figment::value::Value::Dict(_, dict)) = figment.find_value("") {
            for key in dict.keys() {
                if !RECOGNIZED_KEYS.contains(&key.as_str()) {
                    warn!(key = %key, "ignoring unrecognized configuration key");
                }
            }
        }

        figment
            .extract()
            .map_err(|e| Error::Internal(format!("failed to parse configuration: {e}")))
    }
}

/// The small set of runtime-mutable settings, persisted atomically to
/// `flutter_settings.json` via write-temp-then-rename.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeSettings {
    pub active_chat_model: String,
    pub auto_track_input_with_recording: bool,
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            active_chat_model: Config::default().chat_model,
            auto_track_input_with_recording: false,
        }
    }
}

impl RuntimeSettings {
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let bytes = std::fs::read(path)
            .map_err(|e| Error::StorageUnavailable(format!("reading {}: {e}", path.display())))?;
        serde_json::from_slice(&bytes)
            .map_err(|e| Error::Internal(format!("corrupt settings file: {e}")))
    }

    /// Write-temp-then-rename: never leaves a half-written settings file on
    /// disk, even if the process is killed mid-write.
    pub fn store(&self, path: &Path) -> Result<()> {
        let dir = path
            .parent()
            .ok_or_else(|| Error::Internal("settings path has no parent".into()))?;
        let mut tmp = tempfile::NamedTempFile::new_in(dir)
            .map_err(|e| Error::StorageUnavailable(e.to_string()))?;
        use std::io::Write;
        let json = serde_json::to_vec_pretty(self)
            .map_err(|e| Error::Internal(format!("serializing settings: {e}")))?;
        tmp.write_all(&json)
            .map_err(|e| Error::StorageUnavailable(e.to_string()))?;
        tmp.persist(path)
            .map_err(|e| Error::StorageUnavailable(e.to_string()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_round_trip_through_figment() {
        let tmp = tempfile::tempdir().unwrap();
        let cfg = Config::load(&tmp.path().join("config.toml")).unwrap();
        assert_eq!(cfg.api_bind, "127.0.0.1:8765");
        assert_eq!(cfg.analysis_frame_stride, 1);
    }

    #[test]
    fn settings_atomic_round_trip() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("flutter_settings.json");
        let settings = RuntimeSettings {
            active_chat_model: "my-model".into(),
            auto_track_input_with_recording: true,
        };
        settings.store(&path).unwrap();
        let loaded = RuntimeSettings::load(&path).unwrap();
        assert_eq!(loaded.active_chat_model, "my-model");
        assert!(loaded.auto_track_input_with_recording);
    }

    #[test]
    fn missing_settings_file_yields_defaults() {
        let tmp = tempfile::tempdir().unwrap();
        let loaded = RuntimeSettings::load(&tmp.path().join("nope.json")).unwrap();
        assert!(!loaded.auto_track_input_with_recording);
    }
}
