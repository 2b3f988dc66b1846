//! Voice capture sessions.
//!
//! Each recording session owns a worker task and a session token. The worker
//! polls the audio source on a bounded interval, accumulating chunks while
//! the token is live; cancelling the token makes the worker finish the
//! transcribe/punctuate/save pipeline and report the outcome as events.
//!
//! Cancellation is cooperative (the worker observes the token between polls)
//! but stopping a session waits a bounded time for the worker to finish, so a
//! wedged audio source cannot hang the caller.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::audio::{AudioError, AudioSource};
use crate::segment::Segmenter;
use crate::store::{Entry, EntryStore, StoreError};
use crate::stt::{TranscribeError, Transcriber};

/// Errors from the capture pipeline, by failure kind.
#[derive(Debug, Error)]
pub enum VoiceError {
    #[error("no speech was recognized")]
    NoSpeech,

    #[error(transparent)]
    Audio(#[from] AudioError),

    #[error("transcription failed: {0}")]
    Transcribe(TranscribeError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Notifications emitted by a capture session.
#[derive(Debug, Clone)]
pub enum VoiceEvent {
    /// The worker observed the stop request and is post-processing.
    Stopped { message: String },

    /// The transcript was saved as an entry.
    Success {
        message: String,
        duration_secs: f64,
        entry_id: i64,
    },

    /// Nothing was saved.
    Error { message: String },
}

/// Tuning knobs for the capture loop.
#[derive(Debug, Clone)]
pub struct CaptureConfig {
    /// How often the worker drains the audio source.
    pub poll_interval: Duration,

    /// Upper bound on how long `stop` waits for the worker to finish
    /// post-processing before giving up on the join.
    pub stop_wait: Duration,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            stop_wait: Duration::from_secs(30),
        }
    }
}

/// The shared half of the pipeline: everything after audio leaves the mic.
pub struct VoicePipeline {
    pub store: Arc<EntryStore>,
    pub transcriber: Arc<dyn Transcriber>,
    pub segmenter: Arc<dyn Segmenter>,
}

impl VoicePipeline {
    /// Transcribe captured chunks, punctuate, and save one entry.
    ///
    /// Chunks the recognizer cannot transcribe are skipped; fragments are
    /// joined with single spaces. Tags default to `voice` when absent.
    pub async fn transcribe_and_save(
        &self,
        chunks: &[Vec<i16>],
        tags: Option<&str>,
    ) -> Result<Entry, VoiceError> {
        let mut fragments: Vec<String> = Vec::new();

        for chunk in chunks {
            match self.transcriber.transcribe(chunk).await {
                Ok(text) => fragments.push(text),
                // Per-fragment silence is expected; keep going.
                Err(TranscribeError::NoSpeech) => continue,
                Err(e) => return Err(VoiceError::Transcribe(e)),
            }
        }

        let transcript = fragments.join(" ");
        if transcript.trim().is_empty() {
            return Err(VoiceError::NoSpeech);
        }

        let punctuated = crate::segment::punctuate_text(self.segmenter.as_ref(), &transcript);

        let tags = match tags {
            Some(t) if !t.trim().is_empty() => t,
            _ => "voice",
        };

        Ok(self.store.create(&punctuated, Some(tags)).await?)
    }
}

/// Session token: live until cancelled. One per session, never global.
#[derive(Clone)]
pub struct SessionToken(Arc<AtomicBool>);

impl SessionToken {
    fn new() -> Self {
        Self(Arc::new(AtomicBool::new(true)))
    }

    pub fn is_live(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }

    pub fn cancel(&self) {
        self.0.store(false, Ordering::Relaxed);
    }
}

/// A running capture session.
///
/// Dropping a session without calling [`stop`](Self::stop) cancels the token
/// and aborts the worker, so a leaked handle cannot keep the audio source
/// open.
pub struct CaptureSession {
    token: SessionToken,
    worker: Option<JoinHandle<()>>,
    stop_wait: Duration,
}

impl CaptureSession {
    /// Spawn a capture worker. Outcome notifications arrive on `events`.
    pub fn start(
        pipeline: Arc<VoicePipeline>,
        mut source: Box<dyn AudioSource>,
        tags: Option<String>,
        config: CaptureConfig,
        events: mpsc::Sender<VoiceEvent>,
    ) -> Self {
        let token = SessionToken::new();
        let worker_token = token.clone();
        let stop_wait = config.stop_wait;

        let worker = tokio::spawn(async move {
            let started = Instant::now();
            let chunks = match capture_chunks(source.as_mut(), &worker_token, &config).await {
                Ok(chunks) => chunks,
                Err(e) => {
                    tracing::error!("audio capture failed: {}", e);
                    let _ = events
                        .send(VoiceEvent::Error {
                            message: format!("Recording failed: {}", e),
                        })
                        .await;
                    return;
                }
            };
            let duration = started.elapsed();

            let _ = events
                .send(VoiceEvent::Stopped {
                    message: "Recording stopped, transcribing...".to_string(),
                })
                .await;

            match pipeline.transcribe_and_save(&chunks, tags.as_deref()).await {
                Ok(entry) => {
                    tracing::info!(id = entry.id, secs = duration.as_secs_f64(), "voice entry saved");
                    let _ = events
                        .send(VoiceEvent::Success {
                            message: "Entry saved".to_string(),
                            duration_secs: duration.as_secs_f64(),
                            entry_id: entry.id,
                        })
                        .await;
                }
                Err(e) => {
                    tracing::warn!("voice capture produced no entry: {}", e);
                    let _ = events
                        .send(VoiceEvent::Error {
                            message: error_message(&e),
                        })
                        .await;
                }
            }
        });

        Self {
            token,
            worker: Some(worker),
            stop_wait,
        }
    }

    /// Request a stop and wait (bounded) for the worker to finish.
    pub async fn stop(mut self) {
        self.token.cancel();
        if let Some(worker) = self.worker.take() {
            if tokio::time::timeout(self.stop_wait, worker).await.is_err() {
                tracing::warn!("capture worker did not finish within the stop window");
            }
        }
    }

    /// Cancel without waiting; used when the client connection goes away.
    pub fn abandon(mut self) {
        self.token.cancel();
        if let Some(worker) = self.worker.take() {
            worker.abort();
        }
    }
}

impl Drop for CaptureSession {
    fn drop(&mut self) {
        self.token.cancel();
        if let Some(worker) = self.worker.take() {
            worker.abort();
        }
    }
}

/// Poll the source until the token clears, collecting non-empty chunks.
async fn capture_chunks(
    source: &mut dyn AudioSource,
    token: &SessionToken,
    config: &CaptureConfig,
) -> Result<Vec<Vec<i16>>, AudioError> {
    source.start()?;

    let mut chunks: Vec<Vec<i16>> = Vec::new();
    let mut ticker = tokio::time::interval(config.poll_interval);
    // First tick fires immediately; skip it so each poll covers one interval.
    ticker.tick().await;

    while token.is_live() {
        ticker.tick().await;
        let chunk = source.read_chunk()?;
        if !chunk.is_empty() {
            chunks.push(chunk);
        }
    }

    // Drain whatever arrived between the last poll and cancellation.
    let tail = source.read_chunk()?;
    if !tail.is_empty() {
        chunks.push(tail);
    }
    source.stop()?;

    Ok(chunks)
}

/// One-shot capture for the synchronous endpoint: record a fixed window,
/// then run the same pipeline.
pub async fn capture_once(
    pipeline: &VoicePipeline,
    mut source: Box<dyn AudioSource>,
    window: Duration,
    tags: Option<&str>,
) -> Result<(Entry, Duration), VoiceError> {
    let started = Instant::now();

    source.start()?;
    tokio::time::sleep(window).await;
    let chunk = source.read_chunk()?;
    source.stop()?;

    let duration = started.elapsed();
    let chunks = if chunk.is_empty() { vec![] } else { vec![chunk] };
    let entry = pipeline.transcribe_and_save(&chunks, tags).await?;

    Ok((entry, duration))
}

/// User-facing message for a pipeline failure, by kind.
pub fn error_message(err: &VoiceError) -> String {
    match err {
        VoiceError::NoSpeech => "Could not understand the audio".to_string(),
        VoiceError::Transcribe(e) => format!("Transcription service error: {}", e),
        VoiceError::Audio(e) => format!("Audio capture error: {}", e),
        VoiceError::Store(e) => format!("Could not save entry: {}", e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::segment::RuleSegmenter;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Audio source that hands out a scripted sequence of chunks.
    struct ScriptedSource {
        chunks: Mutex<VecDeque<Vec<i16>>>,
    }

    impl ScriptedSource {
        fn new(chunks: Vec<Vec<i16>>) -> Box<Self> {
            Box::new(Self {
                chunks: Mutex::new(chunks.into()),
            })
        }

        fn silent() -> Box<Self> {
            Self::new(vec![])
        }
    }

    impl AudioSource for ScriptedSource {
        fn start(&mut self) -> Result<(), AudioError> {
            Ok(())
        }

        fn stop(&mut self) -> Result<(), AudioError> {
            Ok(())
        }

        fn read_chunk(&mut self) -> Result<Vec<i16>, AudioError> {
            Ok(self.chunks.lock().unwrap().pop_front().unwrap_or_default())
        }
    }

    /// Transcriber that echoes a fixed text per non-empty chunk.
    struct FixedTranscriber {
        text: String,
    }

    #[async_trait]
    impl Transcriber for FixedTranscriber {
        async fn transcribe(&self, samples: &[i16]) -> Result<String, TranscribeError> {
            if samples.is_empty() {
                return Err(TranscribeError::NoSpeech);
            }
            Ok(self.text.clone())
        }
    }

    /// Transcriber that never recognizes anything.
    struct DeafTranscriber;

    #[async_trait]
    impl Transcriber for DeafTranscriber {
        async fn transcribe(&self, _samples: &[i16]) -> Result<String, TranscribeError> {
            Err(TranscribeError::NoSpeech)
        }
    }

    fn pipeline(transcriber: Arc<dyn Transcriber>) -> Arc<VoicePipeline> {
        Arc::new(VoicePipeline {
            store: Arc::new(EntryStore::open_in_memory().unwrap()),
            transcriber,
            segmenter: Arc::new(RuleSegmenter::default()),
        })
    }

    fn fast_config() -> CaptureConfig {
        CaptureConfig {
            poll_interval: Duration::from_millis(10),
            stop_wait: Duration::from_secs(5),
        }
    }

    #[tokio::test]
    async fn test_session_with_no_audio_reports_error_and_saves_nothing() {
        let pipeline = pipeline(Arc::new(DeafTranscriber));
        let (tx, mut rx) = mpsc::channel(8);

        let session = CaptureSession::start(
            Arc::clone(&pipeline),
            ScriptedSource::silent(),
            None,
            fast_config(),
            tx,
        );
        tokio::time::sleep(Duration::from_millis(30)).await;
        session.stop().await;

        let mut saw_error = false;
        while let Ok(event) = rx.try_recv() {
            if let VoiceEvent::Error { message } = event {
                assert!(message.contains("Could not understand"));
                saw_error = true;
            }
        }
        assert!(saw_error, "silent capture must report an error");
        assert!(pipeline.store.list(None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_session_saves_punctuated_entry_with_voice_tag() {
        let pipeline = pipeline(Arc::new(FixedTranscriber {
            text: "dear diary today went well".to_string(),
        }));
        let (tx, mut rx) = mpsc::channel(8);

        let session = CaptureSession::start(
            Arc::clone(&pipeline),
            ScriptedSource::new(vec![vec![1i16; 160]]),
            None,
            fast_config(),
            tx,
        );
        tokio::time::sleep(Duration::from_millis(50)).await;
        session.stop().await;

        let mut success = None;
        let mut stopped = false;
        while let Ok(event) = rx.try_recv() {
            match event {
                VoiceEvent::Stopped { .. } => stopped = true,
                VoiceEvent::Success { duration_secs, .. } => success = Some(duration_secs),
                VoiceEvent::Error { message } => panic!("unexpected error: {}", message),
            }
        }

        assert!(stopped, "stop must be acknowledged before the outcome");
        let duration = success.expect("capture should succeed");
        assert!(duration >= 0.0);

        let entries = pipeline.store.list(None).await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].content, "dear diary today went well.");
        assert_eq!(entries[0].tags.as_deref(), Some("voice"));
    }

    #[tokio::test]
    async fn test_session_keeps_caller_tags() {
        let pipeline = pipeline(Arc::new(FixedTranscriber {
            text: "note to self".to_string(),
        }));
        let (tx, _rx) = mpsc::channel(8);

        let session = CaptureSession::start(
            Arc::clone(&pipeline),
            ScriptedSource::new(vec![vec![1i16; 160]]),
            Some("meeting".to_string()),
            fast_config(),
            tx,
        );
        tokio::time::sleep(Duration::from_millis(50)).await;
        session.stop().await;

        let entries = pipeline.store.list(None).await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].tags.as_deref(), Some("meeting"));
    }

    #[tokio::test]
    async fn test_dropped_session_stops_polling_the_source() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        struct CountingSource {
            reads: Arc<AtomicUsize>,
        }

        impl AudioSource for CountingSource {
            fn start(&mut self) -> Result<(), AudioError> {
                Ok(())
            }

            fn stop(&mut self) -> Result<(), AudioError> {
                Ok(())
            }

            fn read_chunk(&mut self) -> Result<Vec<i16>, AudioError> {
                self.reads.fetch_add(1, Ordering::SeqCst);
                Ok(Vec::new())
            }
        }

        let reads = Arc::new(AtomicUsize::new(0));
        let pipeline = pipeline(Arc::new(DeafTranscriber));
        let (tx, _rx) = mpsc::channel(8);

        let session = CaptureSession::start(
            Arc::clone(&pipeline),
            Box::new(CountingSource {
                reads: Arc::clone(&reads),
            }),
            None,
            fast_config(),
            tx,
        );
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(reads.load(Ordering::SeqCst) > 0, "worker should be polling");

        // Dropping the handle without stop or abandon must not leak the
        // worker; polling has to cease once the guard runs.
        drop(session);
        tokio::time::sleep(Duration::from_millis(30)).await;
        let after_drop = reads.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(
            reads.load(Ordering::SeqCst),
            after_drop,
            "worker kept polling the source after the session was dropped"
        );
        assert!(pipeline.store.list(None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_fragments_joined_with_single_spaces() {
        let pipeline = pipeline(Arc::new(FixedTranscriber {
            text: "fragment".to_string(),
        }));

        let chunks = vec![vec![1i16; 10], vec![], vec![2i16; 10]];
        let entry = pipeline.transcribe_and_save(&chunks, None).await.unwrap();
        // The empty chunk is skipped as NoSpeech, the rest join with spaces.
        assert_eq!(entry.content, "fragment fragment.");
    }

    #[tokio::test]
    async fn test_backend_failure_aborts_pipeline() {
        struct BrokenTranscriber;

        #[async_trait]
        impl Transcriber for BrokenTranscriber {
            async fn transcribe(&self, _samples: &[i16]) -> Result<String, TranscribeError> {
                Err(TranscribeError::Backend("connection refused".to_string()))
            }
        }

        let pipeline = pipeline(Arc::new(BrokenTranscriber));
        let result = pipeline
            .transcribe_and_save(&[vec![1i16; 10]], None)
            .await;
        assert!(matches!(result, Err(VoiceError::Transcribe(_))));
        assert!(pipeline.store.list(None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_capture_once_bounded_window() {
        let pipeline = pipeline(Arc::new(FixedTranscriber {
            text: "quick note".to_string(),
        }));

        let (entry, duration) = capture_once(
            &pipeline,
            ScriptedSource::new(vec![vec![1i16; 160]]),
            Duration::from_millis(20),
            None,
        )
        .await
        .unwrap();

        assert_eq!(entry.content, "quick note.");
        assert_eq!(entry.tags.as_deref(), Some("voice"));
        assert!(duration >= Duration::from_millis(20));
    }

    #[test]
    fn test_error_messages_by_kind() {
        assert!(error_message(&VoiceError::NoSpeech).contains("understand"));
        assert!(error_message(&VoiceError::Transcribe(TranscribeError::Backend(
            "down".to_string()
        )))
        .contains("service"));
    }
}
