//! Duplex recording channel.
//!
//! A client opens a websocket at `/ws`, sends `start_recording` to begin a
//! capture session and `stop_recording` to end it. The server answers with
//! `recording_stopped` once the microphone is released, then either
//! `recording_success` with the saved transcript or `recording_error`.
//! Each connection owns at most one session; a dropped connection abandons
//! its session without saving.

use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::IntoResponse;
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, error, warn};

use super::AppState;
use crate::voice::{CaptureConfig, CaptureSession, VoiceEvent};

/// Messages the client may send.
#[derive(Debug, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
enum ClientEvent {
    StartRecording {
        #[serde(default)]
        tags: Option<String>,
    },
    StopRecording,
}

/// Messages the server sends.
#[derive(Debug, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
enum ServerEvent {
    RecordingStopped { message: String },
    RecordingSuccess { message: String, duration: f64 },
    RecordingError { message: String },
}

impl From<VoiceEvent> for ServerEvent {
    fn from(event: VoiceEvent) -> Self {
        match event {
            VoiceEvent::Stopped { message } => ServerEvent::RecordingStopped { message },
            VoiceEvent::Success {
                message,
                duration_secs,
                ..
            } => ServerEvent::RecordingSuccess {
                message,
                duration: duration_secs,
            },
            VoiceEvent::Error { message } => ServerEvent::RecordingError { message },
        }
    }
}

pub async fn ws_handler(State(state): State<AppState>, upgrade: WebSocketUpgrade) -> impl IntoResponse {
    upgrade.on_upgrade(move |socket| async move {
        if let Err(err) = handle_socket(state, socket).await {
            error!(error = %err, "websocket handler failed");
        }
    })
}

async fn handle_socket(state: AppState, socket: WebSocket) -> anyhow::Result<()> {
    let (mut sender, mut receiver) = socket.split();

    let (out_tx, mut out_rx) = mpsc::channel::<ServerEvent>(16);
    let (event_tx, mut event_rx) = mpsc::channel::<VoiceEvent>(16);

    let send_task = tokio::spawn(async move {
        while let Some(msg) = out_rx.recv().await {
            let payload = match serde_json::to_string(&msg) {
                Ok(payload) => payload,
                Err(err) => {
                    error!(error = %err, "failed to serialize websocket payload");
                    continue;
                }
            };
            if sender.send(Message::Text(payload)).await.is_err() {
                break;
            }
        }
    });

    // Forward worker events to the client.
    let forward_tx = out_tx.clone();
    let forward_task = tokio::spawn(async move {
        while let Some(event) = event_rx.recv().await {
            if forward_tx.send(ServerEvent::from(event)).await.is_err() {
                break;
            }
        }
    });

    let mut session: Option<CaptureSession> = None;

    while let Some(msg) = receiver.next().await {
        // Abrupt disconnects surface as receive errors; the cleanup below
        // must still run, so break instead of returning.
        let msg = match msg {
            Ok(msg) => msg,
            Err(err) => {
                debug!(error = %err, "websocket receive failed");
                break;
            }
        };
        match msg {
            Message::Text(text) => {
                let client_event: ClientEvent = match serde_json::from_str(&text) {
                    Ok(event) => event,
                    Err(err) => {
                        warn!(payload = %text, error = %err, "unrecognized client message");
                        out_tx
                            .send(ServerEvent::RecordingError {
                                message: "Unrecognized message".to_string(),
                            })
                            .await
                            .ok();
                        continue;
                    }
                };

                match client_event {
                    ClientEvent::StartRecording { tags } => {
                        if session.is_some() {
                            out_tx
                                .send(ServerEvent::RecordingError {
                                    message: "A recording is already in progress".to_string(),
                                })
                                .await
                                .ok();
                            continue;
                        }

                        let source =
                            match crate::audio::default_source(state.voice.device.as_deref()) {
                                Ok(source) => source,
                                Err(err) => {
                                    out_tx
                                        .send(ServerEvent::RecordingError {
                                            message: format!("Audio capture error: {}", err),
                                        })
                                        .await
                                        .ok();
                                    continue;
                                }
                            };

                        debug!(tags = ?tags, "starting capture session");
                        session = Some(CaptureSession::start(
                            state.pipeline.clone(),
                            source,
                            tags,
                            CaptureConfig::default(),
                            event_tx.clone(),
                        ));
                    }
                    ClientEvent::StopRecording => match session.take() {
                        Some(active) => active.stop().await,
                        None => {
                            out_tx
                                .send(ServerEvent::RecordingError {
                                    message: "No recording in progress".to_string(),
                                })
                                .await
                                .ok();
                        }
                    },
                }
            }
            Message::Close(_) => break,
            Message::Binary(_) => {
                warn!("unexpected binary frame received");
            }
            Message::Ping(_) | Message::Pong(_) => {}
        }
    }

    // Connection gone, drop any in-flight session without saving.
    if let Some(active) = session.take() {
        debug!("connection closed with an active session, abandoning");
        active.abandon();
    }

    drop(event_tx);
    forward_task.await.ok();
    // Give pending events a moment to flush before tearing down the sender.
    drop(out_tx);
    tokio::time::timeout(Duration::from_secs(1), send_task)
        .await
        .ok();

    Ok(())
}
