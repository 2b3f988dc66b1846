//! HTTP surface: the journal form UI and the voice capture endpoints.
//!
//! Routes:
//! - `GET /` renders the entry form plus the full journal, newest first
//! - `POST /add` saves a typed entry and redirects back with a flash message
//! - `GET /entries?tag=` renders entries whose tags contain the substring
//! - `POST /voice` records a fixed window from the microphone and saves it
//! - `GET /ws` upgrades to the duplex recording channel
//! - `GET /health` liveness probe

pub mod ws;

use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Query, State};
use axum::response::{Html, IntoResponse, Json, Redirect};
use axum::routing::{get, post};
use axum::{Form, Router};
use serde::Deserialize;
use tracing::{error, info};

use crate::config::VoiceSettings;
use crate::store::{Entry, EntryStore, StoreError};
use crate::voice::{self, VoicePipeline};

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<EntryStore>,
    pub pipeline: Arc<VoicePipeline>,
    pub voice: VoiceSettings,
}

/// Build the application router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/add", post(add_entry))
        .route("/entries", get(list_entries))
        .route("/voice", post(record_once))
        .route("/ws", get(ws::ws_handler))
        .route(
            "/health",
            get(|| async { Json(serde_json::json!({"status": "ok"})) }),
        )
        .with_state(state)
}

#[derive(Debug, Default, Deserialize)]
pub struct FlashParams {
    pub notice: Option<String>,
    pub error: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct AddForm {
    pub content: String,
    #[serde(default)]
    pub tags: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct EntriesQuery {
    pub tag: Option<String>,
}

async fn index(
    State(state): State<AppState>,
    Query(flash): Query<FlashParams>,
) -> impl IntoResponse {
    match state.store.list(None).await {
        Ok(entries) => Html(render_index(&entries, &flash)).into_response(),
        Err(e) => {
            error!(error = %e, "failed to list entries");
            Html(render_error_page("The journal could not be read.")).into_response()
        }
    }
}

async fn add_entry(State(state): State<AppState>, Form(form): Form<AddForm>) -> Redirect {
    let tags = form.tags.as_deref().filter(|t| !t.trim().is_empty());

    match state.store.create(&form.content, tags).await {
        Ok(entry) => {
            info!(id = entry.id, "entry saved");
            Redirect::to(&flash_url("/", "notice", "Entry saved"))
        }
        Err(StoreError::EmptyContent) => {
            Redirect::to(&flash_url("/", "error", "Entry content cannot be empty"))
        }
        Err(e) => {
            error!(error = %e, "failed to save entry");
            Redirect::to(&flash_url("/", "error", "Could not save entry"))
        }
    }
}

async fn list_entries(
    State(state): State<AppState>,
    Query(query): Query<EntriesQuery>,
) -> impl IntoResponse {
    let tag = query.tag.as_deref().filter(|t| !t.is_empty());

    match state.store.list(tag).await {
        Ok(entries) => Html(render_entries(&entries, tag)).into_response(),
        Err(e) => {
            error!(error = %e, "failed to list entries");
            Redirect::to(&flash_url("/", "error", "The journal could not be read"))
                .into_response()
        }
    }
}

/// Record a fixed window from the default microphone, transcribe it and
/// save the result. The duplex channel at `/ws` is the interactive path;
/// this endpoint exists for clients without websocket support.
async fn record_once(State(state): State<AppState>) -> Redirect {
    let source = match crate::audio::default_source(state.voice.device.as_deref()) {
        Ok(source) => source,
        Err(e) => {
            error!(error = %e, "could not open audio source");
            return Redirect::to(&flash_url("/", "error", &format!("Audio capture error: {}", e)));
        }
    };

    let window = Duration::from_secs(state.voice.window_secs);
    match voice::capture_once(&state.pipeline, source, window, None).await {
        Ok((entry, elapsed)) => {
            info!(id = entry.id, secs = elapsed.as_secs_f64(), "voice entry saved");
            Redirect::to(&flash_url("/", "notice", "Voice entry saved"))
        }
        Err(e) => Redirect::to(&flash_url("/", "error", &voice::error_message(&e))),
    }
}

fn flash_url(base: &str, kind: &str, message: &str) -> String {
    format!("{}?{}={}", base, kind, urlencode(message))
}

/// Minimal percent-encoding for query string values.
fn urlencode(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for byte in value.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(byte as char)
            }
            b' ' => out.push('+'),
            _ => out.push_str(&format!("%{:02X}", byte)),
        }
    }
    out
}

/// HTML-escape text interpolated into a page.
fn escape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(ch),
        }
    }
    out
}

fn render_flash(flash: &FlashParams) -> String {
    let mut html = String::new();
    if let Some(ref notice) = flash.notice {
        html.push_str(&format!(
            "<p class=\"flash notice\">{}</p>\n",
            escape(notice)
        ));
    }
    if let Some(ref error) = flash.error {
        html.push_str(&format!("<p class=\"flash error\">{}</p>\n", escape(error)));
    }
    html
}

fn render_entry_list(entries: &[Entry]) -> String {
    if entries.is_empty() {
        return "<p class=\"empty\">No entries yet.</p>\n".to_string();
    }

    let mut html = String::from("<ul class=\"entries\">\n");
    for entry in entries {
        html.push_str("<li>");
        html.push_str(&format!(
            "<time>{}</time> ",
            escape(&entry.created_at.to_rfc3339())
        ));
        html.push_str(&format!("<span>{}</span>", escape(&entry.content)));
        if let Some(ref tags) = entry.tags {
            html.push_str(&format!(" <em class=\"tags\">[{}]</em>", escape(tags)));
        }
        html.push_str("</li>\n");
    }
    html.push_str("</ul>\n");
    html
}

fn page(title: &str, body: &str) -> String {
    format!(
        "<!DOCTYPE html>\n<html>\n<head>\n<meta charset=\"utf-8\">\n\
         <title>{title}</title>\n\
         <style>\n\
         body {{ font-family: sans-serif; max-width: 40em; margin: 2em auto; }}\n\
         .flash.notice {{ color: #2a6f2a; }}\n\
         .flash.error {{ color: #a33; }}\n\
         .entries li {{ margin-bottom: 0.5em; }}\n\
         .tags {{ color: #666; }}\n\
         textarea {{ width: 100%; }}\n\
         </style>\n\
         </head>\n<body>\n<h1>{title}</h1>\n{body}</body>\n</html>\n",
        title = escape(title),
        body = body,
    )
}

fn render_index(entries: &[Entry], flash: &FlashParams) -> String {
    let mut body = render_flash(flash);
    body.push_str(
        "<form method=\"post\" action=\"/add\">\n\
         <textarea name=\"content\" rows=\"4\" placeholder=\"What happened today?\"></textarea>\n\
         <input type=\"text\" name=\"tags\" placeholder=\"tags (optional)\">\n\
         <button type=\"submit\">Save</button>\n\
         </form>\n\
         <form method=\"post\" action=\"/voice\">\n\
         <button type=\"submit\">Record voice entry</button>\n\
         </form>\n\
         <p><a href=\"/entries?tag=voice\">Voice entries</a></p>\n",
    );
    body.push_str(&render_entry_list(entries));
    page("Journal", &body)
}

fn render_entries(entries: &[Entry], tag: Option<&str>) -> String {
    let mut body = String::new();
    match tag {
        Some(tag) => body.push_str(&format!(
            "<p>Entries tagged <strong>{}</strong>. <a href=\"/\">Back</a></p>\n",
            escape(tag)
        )),
        None => body.push_str("<p>All entries. <a href=\"/\">Back</a></p>\n"),
    }
    body.push_str(&render_entry_list(entries));
    page("Journal entries", &body)
}

fn render_error_page(message: &str) -> String {
    page(
        "Journal",
        &format!("<p class=\"flash error\">{}</p>\n", escape(message)),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::segment::RuleSegmenter;
    use crate::stt::{TranscribeError, Transcriber};
    use async_trait::async_trait;
    use axum::http::header::LOCATION;

    struct NoopTranscriber;

    #[async_trait]
    impl Transcriber for NoopTranscriber {
        async fn transcribe(&self, _samples: &[i16]) -> Result<String, TranscribeError> {
            Err(TranscribeError::NoSpeech)
        }
    }

    async fn test_state() -> AppState {
        let store = Arc::new(EntryStore::open_in_memory().unwrap());
        let pipeline = Arc::new(VoicePipeline {
            store: store.clone(),
            transcriber: Arc::new(NoopTranscriber),
            segmenter: Arc::new(RuleSegmenter::default()),
        });
        AppState {
            store,
            pipeline,
            voice: VoiceSettings::default(),
        }
    }

    fn location(redirect: Redirect) -> String {
        let response = redirect.into_response();
        response
            .headers()
            .get(LOCATION)
            .unwrap()
            .to_str()
            .unwrap()
            .to_string()
    }

    #[tokio::test]
    async fn test_add_entry_saves_and_redirects() {
        let state = test_state().await;
        let redirect = add_entry(
            State(state.clone()),
            Form(AddForm {
                content: "went for a run".to_string(),
                tags: Some("health".to_string()),
            }),
        )
        .await;

        assert!(location(redirect).contains("notice="));

        let entries = state.store.list(None).await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].content, "went for a run");
        assert_eq!(entries[0].tags.as_deref(), Some("health"));
    }

    #[tokio::test]
    async fn test_add_entry_rejects_empty_content() {
        let state = test_state().await;
        let redirect = add_entry(
            State(state.clone()),
            Form(AddForm {
                content: "   ".to_string(),
                tags: None,
            }),
        )
        .await;

        assert!(location(redirect).contains("error="));
        assert!(state.store.list(None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_blank_tags_field_stored_as_none() {
        let state = test_state().await;
        add_entry(
            State(state.clone()),
            Form(AddForm {
                content: "untagged".to_string(),
                tags: Some("  ".to_string()),
            }),
        )
        .await;

        let entries = state.store.list(None).await.unwrap();
        assert_eq!(entries[0].tags, None);
    }

    #[tokio::test]
    async fn test_entries_page_filters_by_tag() {
        let state = test_state().await;
        state.store.create("typed", Some("manual")).await.unwrap();
        state.store.create("spoken", Some("voice")).await.unwrap();

        let response = list_entries(
            State(state),
            Query(EntriesQuery {
                tag: Some("voice".to_string()),
            }),
        )
        .await
        .into_response();

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let html = String::from_utf8(body.to_vec()).unwrap();
        assert!(html.contains("spoken"));
        assert!(!html.contains("typed"));
    }

    #[tokio::test]
    async fn test_index_renders_entries_and_flash() {
        let state = test_state().await;
        state.store.create("hello world", None).await.unwrap();

        let response = index(
            State(state),
            Query(FlashParams {
                notice: Some("Entry saved".to_string()),
                error: None,
            }),
        )
        .await
        .into_response();

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let html = String::from_utf8(body.to_vec()).unwrap();
        assert!(html.contains("hello world"));
        assert!(html.contains("Entry saved"));
    }

    #[test]
    fn test_escape_neutralizes_markup() {
        assert_eq!(
            escape("<script>alert('x')</script>"),
            "&lt;script&gt;alert(&#39;x&#39;)&lt;/script&gt;"
        );
    }

    #[test]
    fn test_urlencode() {
        assert_eq!(urlencode("Entry saved"), "Entry+saved");
        assert_eq!(urlencode("a&b=c"), "a%26b%3Dc");
    }
}
