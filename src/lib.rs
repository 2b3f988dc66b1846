//! voxlog - Voice-first personal journal
//!
//! A small journaling service: typed entries go in through a web form,
//! spoken entries through a microphone capture pipeline that transcribes,
//! punctuates and tags them automatically.
//!
//! # Modules
//!
//! - `store`: SQLite-backed entry persistence
//! - `http`: web form UI, entry listing, and the websocket recording channel
//! - `voice`: capture sessions and the transcript post-processing pipeline
//! - `audio`: microphone capture sources
//! - `stt`: speech-to-text backends
//! - `segment`: sentence segmentation and auto-punctuation
//!
//! # Usage
//!
//! ```bash
//! # Start the web server
//! voxlog serve
//!
//! # Save an entry from the terminal
//! echo "shipped the release" | voxlog add --tags work
//!
//! # List voice entries
//! voxlog list --tag voice
//! ```

pub mod audio;
pub mod cli;
pub mod config;
pub mod http;
pub mod segment;
pub mod store;
pub mod stt;
pub mod voice;

// Re-export main types at crate root for convenience
pub use audio::{AudioError, AudioSource};
pub use segment::{RuleSegmenter, Segmenter, Sentence};
pub use store::{Entry, EntryStore, StoreError};
pub use stt::{TranscribeError, Transcriber, WhisperTranscriber};
pub use voice::{CaptureConfig, CaptureSession, VoiceError, VoiceEvent, VoicePipeline};
