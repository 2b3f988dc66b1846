//! Microphone capture behind a capability interface.
//!
//! The capture worker only ever talks to [`AudioSource`]; the cpal-backed
//! implementation lives in [`mic`] and is compiled behind the `mic` feature
//! so headless builds stay free of ALSA.

use thiserror::Error;

#[cfg(feature = "mic")]
pub mod mic;

/// Sample rate expected by the transcriber (16 kHz mono PCM).
pub const SAMPLE_RATE: u32 = 16_000;

/// Errors from audio capture.
#[derive(Debug, Error)]
pub enum AudioError {
    #[error("audio input device not found: {device}")]
    DeviceNotFound { device: String },

    #[error("audio capture failed: {message}")]
    Capture { message: String },
}

/// A source of 16 kHz mono PCM samples.
///
/// Implementations buffer samples internally between polls; `read_chunk`
/// drains whatever accumulated since the last call, which is how the capture
/// worker's bounded polling loop observes cancellation between chunks.
pub trait AudioSource: Send {
    /// Start delivering samples into the internal buffer.
    fn start(&mut self) -> Result<(), AudioError>;

    /// Stop the underlying stream.
    fn stop(&mut self) -> Result<(), AudioError>;

    /// Drain and return the samples accumulated since the last call.
    /// An empty vec means nothing was captured in this interval.
    fn read_chunk(&mut self) -> Result<Vec<i16>, AudioError>;
}

/// Open the default microphone.
#[cfg(feature = "mic")]
pub fn default_source(device: Option<&str>) -> Result<Box<dyn AudioSource>, AudioError> {
    Ok(Box::new(mic::MicSource::new(device)?))
}

#[cfg(not(feature = "mic"))]
pub fn default_source(_device: Option<&str>) -> Result<Box<dyn AudioSource>, AudioError> {
    Err(AudioError::Capture {
        message: "built without microphone support (enable the `mic` feature)".to_string(),
    })
}
