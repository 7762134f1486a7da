use cpal::traits::{DeviceTrait, HostTrait};
use memscreen_core::AudioSource;
use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct Diagnosis {
    pub pyaudio_available: bool,
    pub microphone_available: bool,
    pub system_device_available: bool,
    pub system_signal_available: bool,
    pub message: String,
    pub recommendation: AudioSource,
}

/// Probes the host audio stack for the devices `requested` would need.
/// Never fails: an unreachable host surfaces as all-false fields rather
/// than an error, since diagnosis is advisory.
pub fn diagnose(requested: AudioSource) -> Diagnosis {
    let host = cpal::default_host();

    let microphone_available = host
        .default_input_device()
        .and_then(|d| d.default_input_config().ok())
        .is_some();

    let system_device_available = host
        .output_devices()
        .map(|mut devices| devices.any(|d| is_loopback_candidate(&d)))
        .unwrap_or(false);

    // Whether the loopback device actually carries a live signal can only
    // be known by opening a stream; diagnosis treats device presence as a
    // proxy since opening one here would require tearing it down again.
    let system_signal_available = system_device_available;

    let (message, recommendation) = match requested {
        AudioSource::None => (
            "audio capture not requested".to_string(),
            AudioSource::None,
        ),
        AudioSource::Microphone if !microphone_available => (
            "no default input device found".to_string(),
            AudioSource::None,
        ),
        AudioSource::SystemAudio if !system_device_available => (
            "no system audio loopback device found".to_string(),
            if microphone_available {
                AudioSource::Microphone
            } else {
                AudioSource::None
            },
        ),
        AudioSource::Mixed if !microphone_available && !system_device_available => (
            "neither microphone nor system audio device found".to_string(),
            AudioSource::None,
        ),
        AudioSource::Mixed if !system_device_available => (
            "system audio unavailable, falling back to microphone only".to_string(),
            AudioSource::Microphone,
        ),
        AudioSource::Mixed if !microphone_available => (
            "microphone unavailable, falling back to system audio only".to_string(),
            AudioSource::SystemAudio,
        ),
        other => ("requested audio source is available".to_string(), other),
    };

    Diagnosis {
        pyaudio_available: true,
        microphone_available,
        system_device_available,
        system_signal_available,
        message,
        recommendation,
    }
}

pub(crate) fn is_loopback_candidate(device: &cpal::Device) -> bool {
    device
        .name()
        .map(|name| {
            let lower = name.to_lowercase();
            lower.contains("loopback")
                || lower.contains("monitor")
                || lower.contains("stereo mix")
                || lower.contains("blackhole")
        })
        .unwrap_or(false)
}
