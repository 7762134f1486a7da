use std::io::Cursor;
use std::sync::{Arc, Mutex};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleFormat, StreamConfig};
use hound::{WavSpec, WavWriter};
use memscreen_core::AudioSource;
use tracing::warn;

use crate::error::{Error, Result};

const TARGET_SAMPLE_RATE: u32 = 44_100;
const TARGET_CHANNELS: u16 = 1;
const TARGET_BITS_PER_SAMPLE: u16 = 16;

fn wav_spec() -> WavSpec {
    WavSpec {
        channels: TARGET_CHANNELS,
        sample_rate: TARGET_SAMPLE_RATE,
        bits_per_sample: TARGET_BITS_PER_SAMPLE,
        sample_format: hound::SampleFormat::Int,
    }
}

type SharedWriter = Arc<Mutex<WavWriter<Cursor<Vec<u8>>>>>;

/// An open capture session. Dropping a stream stops it; `finish` flushes
/// the WAV header and returns the buffered bytes.
pub struct AudioCapture {
    streams: Vec<cpal::Stream>,
    writer: SharedWriter,
}

impl AudioCapture {
    pub fn open(source: AudioSource) -> Result<Self> {
        let host = cpal::default_host();
        let writer: SharedWriter = Arc::new(Mutex::new(
            WavWriter::new(Cursor::new(Vec::new()), wav_spec())
                .map_err(|e| Error::EncodeFailed(e.to_string()))?,
        ));

        let mut streams = Vec::new();
        match source {
            AudioSource::Microphone => {
                streams.push(open_input_stream(&host, writer.clone())?);
            }
            AudioSource::SystemAudio => {
                streams.push(open_loopback_stream(&host, writer.clone())?);
            }
            AudioSource::Mixed => {
                // Both streams write into the same writer from their own
                // callback threads; samples interleave in arrival order
                // rather than being summed, which is a coarse approximation
                // of a real mix but keeps the writer single-threaded.
                streams.push(open_input_stream(&host, writer.clone())?);
                match open_loopback_stream(&host, writer.clone()) {
                    Ok(stream) => streams.push(stream),
                    Err(err) => warn!(
                        error = %err,
                        "system audio unavailable, continuing with microphone only"
                    ),
                }
            }
            AudioSource::None => {
                return Err(Error::InvalidArgument(
                    "cannot open an audio capture for AudioSource::None".into(),
                ))
            }
        }

        for stream in &streams {
            stream
                .play()
                .map_err(|e| Error::DeviceUnavailable(e.to_string()))?;
        }

        Ok(Self { streams, writer })
    }

    pub fn finish(self) -> Result<Vec<u8>> {
        drop(self.streams);
        let writer = Arc::try_unwrap(self.writer)
            .map_err(|_| Error::EncodeFailed("writer still in use by a capture thread".into()))?
            .into_inner()
            .map_err(|e| Error::EncodeFailed(e.to_string()))?;
        let cursor = writer
            .into_inner()
            .map_err(|e| Error::EncodeFailed(e.to_string()))?;
        Ok(cursor.into_inner())
    }
}

fn open_input_stream(host: &cpal::Host, writer: SharedWriter) -> Result<cpal::Stream> {
    let device = host
        .default_input_device()
        .ok_or_else(|| Error::DeviceUnavailable("no default input device".into()))?;
    build_capture_stream(&device, writer)
}

fn open_loopback_stream(host: &cpal::Host, writer: SharedWriter) -> Result<cpal::Stream> {
    let device = host
        .output_devices()
        .map_err(|e| Error::DeviceUnavailable(e.to_string()))?
        .find(crate::diagnose::is_loopback_candidate)
        .ok_or_else(|| Error::DeviceUnavailable("no system audio loopback device".into()))?;
    build_capture_stream(&device, writer)
}

fn pick_input_config(device: &cpal::Device) -> Result<cpal::SupportedStreamConfig> {
    let mut supported = device
        .supported_input_configs()
        .map_err(|e| Error::DeviceUnavailable(e.to_string()))?;

    let exact_rate = supported
        .find(|c| {
            c.min_sample_rate().0 <= TARGET_SAMPLE_RATE && c.max_sample_rate().0 >= TARGET_SAMPLE_RATE
        })
        .map(|c| c.with_sample_rate(cpal::SampleRate(TARGET_SAMPLE_RATE)));

    match exact_rate {
        Some(config) => Ok(config),
        None => device
            .default_input_config()
            .map_err(|e| Error::DeviceUnavailable(e.to_string())),
    }
}

fn build_capture_stream(device: &cpal::Device, writer: SharedWriter) -> Result<cpal::Stream> {
    let config = pick_input_config(device)?;
    let channels = config.channels();
    let sample_format = config.sample_format();
    let stream_config: StreamConfig = config.into();

    let err_fn = |err| tracing::error!(error = %err, "audio stream error");

    let stream = match sample_format {
        SampleFormat::F32 => device.build_input_stream(
            &stream_config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| write_samples_f32(&writer, data, channels),
            err_fn,
            None,
        ),
        SampleFormat::I16 => device.build_input_stream(
            &stream_config,
            move |data: &[i16], _: &cpal::InputCallbackInfo| write_samples_i16(&writer, data, channels),
            err_fn,
            None,
        ),
        SampleFormat::U16 => device.build_input_stream(
            &stream_config,
            move |data: &[u16], _: &cpal::InputCallbackInfo| {
                let converted: Vec<i16> = data.iter().map(|&s| (s as i32 - 32768) as i16).collect();
                write_samples_i16(&writer, &converted, channels)
            },
            err_fn,
            None,
        ),
        other => {
            return Err(Error::DeviceUnavailable(format!(
                "unsupported sample format {other:?}"
            )))
        }
    }
    .map_err(|e| Error::DeviceUnavailable(e.to_string()))?;

    Ok(stream)
}

fn write_samples_f32(writer: &SharedWriter, data: &[f32], channels: u16) {
    let Ok(mut guard) = writer.lock() else { return };
    for frame in data.chunks(channels as usize) {
        let mixed = frame.iter().sum::<f32>() / channels as f32;
        let sample = (mixed.clamp(-1.0, 1.0) * i16::MAX as f32) as i16;
        let _ = guard.write_sample(sample);
    }
}

fn write_samples_i16(writer: &SharedWriter, data: &[i16], channels: u16) {
    let Ok(mut guard) = writer.lock() else { return };
    for frame in data.chunks(channels as usize) {
        let mixed = frame.iter().map(|&s| s as i32).sum::<i32>() / channels as i32;
        let _ = guard.write_sample(mixed as i16);
    }
}
