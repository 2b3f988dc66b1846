//! Speech-to-text backend.
//!
//! The capture worker talks to the [`Transcriber`] capability interface; the
//! default implementation shells out to a local whisper binary.

use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use hound::{SampleFormat, WavSpec, WavWriter};
use serde::Deserialize;
use thiserror::Error;
use tokio::process::Command;

use crate::audio::SAMPLE_RATE;

/// Errors from transcription, split so callers can distinguish "nothing was
/// said" from "the service fell over".
#[derive(Debug, Error)]
pub enum TranscribeError {
    #[error("no speech recognized in audio")]
    NoSpeech,

    #[error("transcription backend failed: {0}")]
    Backend(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Capability interface: PCM samples in, recognized text out.
#[async_trait]
pub trait Transcriber: Send + Sync {
    /// Transcribe one segment of 16 kHz mono PCM.
    ///
    /// Returns [`TranscribeError::NoSpeech`] when the recognizer produced no
    /// usable text for the segment.
    async fn transcribe(&self, samples: &[i16]) -> Result<String, TranscribeError>;
}

/// Whisper output JSON structure (`--output_format json`).
#[derive(Debug, Deserialize)]
struct WhisperOutput {
    text: String,
}

/// Transcriber backed by a local whisper binary invoked per segment.
pub struct WhisperTranscriber {
    binary: PathBuf,
    model: String,
}

impl WhisperTranscriber {
    pub fn new(binary: PathBuf, model: impl Into<String>) -> Self {
        Self {
            binary,
            model: model.into(),
        }
    }

    /// Resolve the binary from `WHISPER_PATH`, falling back to `whisper` on
    /// the search path.
    pub fn from_env(model: impl Into<String>) -> Self {
        let binary = std::env::var("WHISPER_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("whisper"));
        Self::new(binary, model)
    }
}

#[async_trait]
impl Transcriber for WhisperTranscriber {
    async fn transcribe(&self, samples: &[i16]) -> Result<String, TranscribeError> {
        if samples.is_empty() {
            return Err(TranscribeError::NoSpeech);
        }

        // Whisper reads files, so each segment goes through a temp WAV.
        let temp_dir = tempfile::tempdir()?;
        let wav_path = temp_dir.path().join("segment.wav");
        write_wav(&wav_path, samples).map_err(|e| TranscribeError::Backend(e.to_string()))?;

        let output = Command::new(&self.binary)
            .arg(&wav_path)
            .arg("--model")
            .arg(&self.model)
            .arg("--output_dir")
            .arg(temp_dir.path())
            .arg("--output_format")
            .arg("json")
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| {
                TranscribeError::Backend(format!("failed to run {}: {}", self.binary.display(), e))
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(TranscribeError::Backend(format!(
                "whisper exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }

        let json_path = temp_dir.path().join("segment.json");
        let json_content = tokio::fs::read_to_string(&json_path).await?;
        let whisper: WhisperOutput = serde_json::from_str(&json_content)
            .map_err(|e| TranscribeError::Backend(format!("failed to parse whisper JSON: {}", e)))?;

        let text = whisper.text.trim().to_string();
        if text.is_empty() {
            return Err(TranscribeError::NoSpeech);
        }

        Ok(text)
    }
}

/// Write 16 kHz mono PCM samples as a 16-bit WAV file.
fn write_wav(path: &std::path::Path, samples: &[i16]) -> Result<(), hound::Error> {
    let spec = WavSpec {
        channels: 1,
        sample_rate: SAMPLE_RATE,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    };

    let mut writer = WavWriter::create(path, spec)?;
    for &sample in samples {
        writer.write_sample(sample)?;
    }
    writer.finalize()
}
