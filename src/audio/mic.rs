//! cpal-backed microphone source.
//!
//! Captures 16 kHz mono i16, the format the whisper backend wants. Tries the
//! preferred config first and falls back to the device's native format with
//! software channel mixing and resampling, since some PipeWire/ALSA setups
//! accept a non-native config but never deliver data.

use std::sync::{Arc, Mutex};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};

use super::{AudioError, AudioSource, SAMPLE_RATE};

/// cpal streams are not `Send`; access is serialized through the mutex in
/// `MicSource`, so crossing threads with the handle is sound.
struct SendableStream(cpal::Stream);

unsafe impl Send for SendableStream {}

pub struct MicSource {
    device: cpal::Device,
    stream: Mutex<Option<SendableStream>>,
    buffer: Arc<Mutex<Vec<i16>>>,
}

impl MicSource {
    /// Open an input device by name, or the system default when `None`.
    pub fn new(device_name: Option<&str>) -> Result<Self, AudioError> {
        let host = cpal::default_host();

        let device = match device_name {
            Some(name) => {
                let mut found = None;
                let devices = host.input_devices().map_err(|e| AudioError::Capture {
                    message: format!("failed to enumerate input devices: {}", e),
                })?;
                for dev in devices {
                    if dev.name().map(|n| n == name).unwrap_or(false) {
                        found = Some(dev);
                        break;
                    }
                }
                found.ok_or_else(|| AudioError::DeviceNotFound {
                    device: name.to_string(),
                })?
            }
            None => host
                .default_input_device()
                .ok_or_else(|| AudioError::DeviceNotFound {
                    device: "default".to_string(),
                })?,
        };

        Ok(Self {
            device,
            stream: Mutex::new(None),
            buffer: Arc::new(Mutex::new(Vec::new())),
        })
    }

    fn build_stream(&self) -> Result<cpal::Stream, AudioError> {
        let preferred = cpal::StreamConfig {
            channels: 1,
            sample_rate: cpal::SampleRate(SAMPLE_RATE),
            buffer_size: cpal::BufferSize::Default,
        };

        let err_callback = |err| {
            tracing::warn!("audio stream error: {}", err);
        };

        // Preferred path: i16/16kHz/mono, PipeWire and PulseAudio convert
        // transparently.
        let buffer = Arc::clone(&self.buffer);
        if let Ok(stream) = self.device.build_input_stream(
            &preferred,
            move |data: &[i16], _: &cpal::InputCallbackInfo| {
                if let Ok(mut buf) = buffer.lock() {
                    buf.extend_from_slice(data);
                }
            },
            err_callback,
            None,
        ) {
            return Ok(stream);
        }

        // Some devices only expose float formats.
        let buffer = Arc::clone(&self.buffer);
        if let Ok(stream) = self.device.build_input_stream(
            &preferred,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                if let Ok(mut buf) = buffer.lock() {
                    buf.extend(data.iter().map(|&s| f32_to_i16(s)));
                }
            },
            err_callback,
            None,
        ) {
            return Ok(stream);
        }

        self.build_native_stream()
    }

    /// Capture at the device's native config and convert in software.
    fn build_native_stream(&self) -> Result<cpal::Stream, AudioError> {
        let default_config =
            self.device
                .default_input_config()
                .map_err(|e| AudioError::Capture {
                    message: format!("failed to query default input config: {}", e),
                })?;

        let native_rate = default_config.sample_rate().0;
        let channels = default_config.channels() as usize;
        let stream_config: cpal::StreamConfig = default_config.clone().into();

        tracing::debug!(
            rate = native_rate,
            channels,
            format = ?default_config.sample_format(),
            "falling back to native audio format with software conversion"
        );

        let err_callback = |err| {
            tracing::warn!("audio stream error: {}", err);
        };

        let buffer = Arc::clone(&self.buffer);
        match default_config.sample_format() {
            cpal::SampleFormat::I16 => self
                .device
                .build_input_stream(
                    &stream_config,
                    move |data: &[i16], _: &cpal::InputCallbackInfo| {
                        let converted = to_mono_16khz(data, channels, native_rate);
                        if let Ok(mut buf) = buffer.lock() {
                            buf.extend_from_slice(&converted);
                        }
                    },
                    err_callback,
                    None,
                )
                .map_err(|e| AudioError::Capture {
                    message: format!("failed to build native i16 stream: {}", e),
                }),
            cpal::SampleFormat::F32 => self
                .device
                .build_input_stream(
                    &stream_config,
                    move |data: &[f32], _: &cpal::InputCallbackInfo| {
                        let i16_data: Vec<i16> = data.iter().map(|&s| f32_to_i16(s)).collect();
                        let converted = to_mono_16khz(&i16_data, channels, native_rate);
                        if let Ok(mut buf) = buffer.lock() {
                            buf.extend_from_slice(&converted);
                        }
                    },
                    err_callback,
                    None,
                )
                .map_err(|e| AudioError::Capture {
                    message: format!("failed to build native f32 stream: {}", e),
                }),
            fmt => Err(AudioError::Capture {
                message: format!("unsupported native sample format: {:?}", fmt),
            }),
        }
    }
}

fn f32_to_i16(s: f32) -> i16 {
    (s.clamp(-1.0, 1.0) * i16::MAX as f32) as i16
}

/// Mix to mono by averaging channels, then nearest-sample resample to 16 kHz.
fn to_mono_16khz(samples: &[i16], channels: usize, source_rate: u32) -> Vec<i16> {
    let mono: Vec<i16> = if channels <= 1 {
        samples.to_vec()
    } else {
        samples
            .chunks_exact(channels)
            .map(|frame| {
                let sum: i32 = frame.iter().map(|&s| s as i32).sum();
                (sum / channels as i32) as i16
            })
            .collect()
    };

    if source_rate == SAMPLE_RATE {
        return mono;
    }

    let ratio = source_rate as f64 / SAMPLE_RATE as f64;
    let out_len = (mono.len() as f64 / ratio) as usize;
    (0..out_len)
        .map(|i| {
            let src = ((i as f64 * ratio) as usize).min(mono.len().saturating_sub(1));
            mono[src]
        })
        .collect()
}

impl AudioSource for MicSource {
    fn start(&mut self) -> Result<(), AudioError> {
        let mut guard = self.stream.lock().map_err(|e| AudioError::Capture {
            message: format!("failed to lock stream: {}", e),
        })?;
        if guard.is_some() {
            return Ok(());
        }

        let stream = self.build_stream()?;
        stream.play().map_err(|e| AudioError::Capture {
            message: format!("failed to start audio stream: {}", e),
        })?;

        *guard = Some(SendableStream(stream));
        Ok(())
    }

    fn stop(&mut self) -> Result<(), AudioError> {
        let mut guard = self.stream.lock().map_err(|e| AudioError::Capture {
            message: format!("failed to lock stream: {}", e),
        })?;

        if let Some(stream) = guard.take() {
            stream.0.pause().map_err(|e| AudioError::Capture {
                message: format!("failed to stop audio stream: {}", e),
            })?;
        }
        Ok(())
    }

    fn read_chunk(&mut self) -> Result<Vec<i16>, AudioError> {
        let mut buffer = self.buffer.lock().map_err(|e| AudioError::Capture {
            message: format!("failed to lock audio buffer: {}", e),
        })?;
        Ok(std::mem::take(&mut *buffer))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mono_mix_averages_channels() {
        let stereo = [100i16, 200, -50, 50];
        let mono = to_mono_16khz(&stereo, 2, SAMPLE_RATE);
        assert_eq!(mono, vec![150, 0]);
    }

    #[test]
    fn test_resample_halves_at_double_rate() {
        let samples: Vec<i16> = (0..100).collect();
        let out = to_mono_16khz(&samples, 1, SAMPLE_RATE * 2);
        assert_eq!(out.len(), 50);
        assert_eq!(out[0], 0);
        assert_eq!(out[1], 2);
    }

    #[test]
    fn test_f32_conversion_clamps() {
        assert_eq!(f32_to_i16(1.5), i16::MAX);
        assert_eq!(f32_to_i16(0.0), 0);
        assert!(f32_to_i16(-1.5) <= -i16::MAX + 1);
    }

    #[test]
    #[ignore] // Requires audio hardware
    fn test_open_default_device() {
        let source = MicSource::new(None);
        assert!(source.is_ok());
    }

    #[test]
    fn test_unknown_device_name() {
        match MicSource::new(Some("no-such-device-9999")) {
            Err(AudioError::DeviceNotFound { device }) => {
                assert_eq!(device, "no-such-device-9999");
            }
            // Hosts without a sound server fail at enumeration instead.
            Err(AudioError::Capture { .. }) => {}
            Ok(_) => panic!("a made-up device name must not resolve"),
        }
    }
}
