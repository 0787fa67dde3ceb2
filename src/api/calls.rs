//! Telephony webhook handlers
//!
//! Drives the call loop: greet, capture speech, generate a reply, play it
//! back, capture again. Every response is TwiML for the platform to execute.

use std::sync::Arc;

use axum::{
    Form, Json, Router,
    extract::{State, rejection::FormRejection},
    http::{HeaderMap, StatusCode, Uri, header, uri::Authority},
    response::{IntoResponse, Response},
    routing::post,
};
use serde::{Deserialize, Serialize};
use url::Url;

use super::ApiState;
use crate::Error;
use crate::conversation::{CallEvent, DEFAULT_CALL_KEY};
use crate::twiml::{Gather, VoiceResponse};

/// Route the platform posts captured speech to
pub const PROCESS_SPEECH_PATH: &str = "/process_speech";

pub const GREETING: &str = "Hello! I am your AI agent. Please say something after the beep.";
pub const NOTHING_CAUGHT: &str = "I didn't catch that. Goodbye.";
pub const NO_SPEECH_APOLOGY: &str = "Sorry, I didn't hear anything. Goodbye.";
pub const AUDIO_ERROR: &str = "Sorry, there was an error generating audio.";

const TERMINAL_CALL_STATUSES: &[&str] = &["completed", "busy", "failed", "no-answer", "canceled"];

/// Build call webhook router
pub fn router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/voice", post(start_call))
        .route(PROCESS_SPEECH_PATH, post(process_speech))
        .route("/call_status", post(call_status))
        .with_state(state)
}

/// Fields read from the call-start webhook
#[derive(Debug, Default, Deserialize)]
pub struct CallStartForm {
    #[serde(rename = "CallSid")]
    pub call_sid: Option<String>,
    #[serde(rename = "From")]
    pub from: Option<String>,
}

/// Fields read from the speech webhook
#[derive(Debug, Default, Deserialize)]
pub struct SpeechForm {
    #[serde(rename = "CallSid")]
    pub call_sid: Option<String>,
    #[serde(rename = "SpeechResult")]
    pub speech_result: Option<String>,
    #[serde(rename = "Confidence")]
    pub confidence: Option<String>,
}

/// Fields read from the status callback
#[derive(Debug, Default, Deserialize)]
pub struct CallStatusForm {
    #[serde(rename = "CallSid")]
    pub call_sid: Option<String>,
    #[serde(rename = "CallStatus")]
    pub call_status: Option<String>,
}

/// Markup that opens a capture window chained to the speech webhook, with
/// a spoken fallback if the caller stays silent
fn listen(response: VoiceResponse) -> VoiceResponse {
    response
        .gather(Gather::speech(PROCESS_SPEECH_PATH))
        .say(NOTHING_CAUGHT)
}

/// Markup that speaks a message and ends the call
fn farewell(message: &str) -> VoiceResponse {
    VoiceResponse::new().say(message).hangup()
}

fn call_key(call_sid: Option<&str>) -> &str {
    call_sid
        .map(str::trim)
        .filter(|sid| !sid.is_empty())
        .unwrap_or(DEFAULT_CALL_KEY)
}

/// Resolve the base URL artifacts are linked under
///
/// Prefers the configured public URL, otherwise rebuilds it from the
/// request's `Host` header (or the URI authority HTTP/2 sends instead) and
/// `X-Forwarded-Proto`.
pub fn request_base_url(headers: &HeaderMap, uri: &Uri, configured: Option<&Url>) -> Option<Url> {
    if let Some(url) = configured {
        return Some(url.clone());
    }

    let host = headers
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|h| !h.is_empty())
        .or_else(|| uri.authority().map(Authority::as_str))?;

    let proto = headers
        .get("x-forwarded-proto")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .or_else(|| uri.scheme_str())
        .filter(|p| matches!(*p, "http" | "https"))
        .unwrap_or("http");

    Url::parse(&format!("{proto}://{host}/")).ok()
}

/// Handle the call-start webhook
///
/// Opens a fresh session for the call, then greets and listens.
pub async fn start_call(
    State(state): State<Arc<ApiState>>,
    form: Result<Form<CallStartForm>, FormRejection>,
) -> VoiceResponse {
    let form = form.map(|Form(f)| f).unwrap_or_else(|e| {
        tracing::debug!(error = %e, "call-start webhook without form body");
        CallStartForm::default()
    });
    let call_sid = call_key(form.call_sid.as_deref());

    state.sessions.start_call(call_sid).await;
    tracing::info!(call_sid, from = ?form.from, "call started");

    listen(VoiceResponse::new().say(GREETING))
}

/// Handle the speech webhook
///
/// The turn runs on its own task so it settles the call's state even if
/// the platform abandons the request mid-turn.
///
/// # Errors
///
/// Returns `CallError` if the call is mid-turn or already ended, the base
/// URL cannot be determined, or reply generation fails
pub async fn process_speech(
    State(state): State<Arc<ApiState>>,
    headers: HeaderMap,
    uri: Uri,
    form: Result<Form<SpeechForm>, FormRejection>,
) -> Result<VoiceResponse, CallError> {
    let form = form.map(|Form(f)| f).unwrap_or_else(|e| {
        tracing::debug!(error = %e, "speech webhook without form body");
        SpeechForm::default()
    });
    let call_sid = call_key(form.call_sid.as_deref());

    let transcript = form
        .speech_result
        .as_deref()
        .map(str::trim)
        .filter(|t| !t.is_empty());

    let Some(transcript) = transcript else {
        tracing::info!(call_sid, "no speech recognized, ending call");
        if let Err(e) = state.sessions.end_call(call_sid, CallEvent::NoSpeech).await {
            tracing::debug!(error = %e, "call already past capture");
        }
        return Ok(farewell(NO_SPEECH_APOLOGY));
    };

    tracing::debug!(call_sid, transcript, confidence = ?form.confidence, "caller said");

    let base_url = request_base_url(&headers, &uri, state.public_url.as_ref())
        .ok_or(CallError::NoBaseUrl)?;

    tokio::spawn(run_turn(
        state,
        call_sid.to_string(),
        transcript.to_string(),
        base_url,
    ))
    .await
    .map_err(|e| CallError::Internal(format!("turn task failed: {e}")))?
}

/// Take one caller utterance through generation and rendering
async fn run_turn(
    state: Arc<ApiState>,
    call_sid: String,
    transcript: String,
    base_url: Url,
) -> Result<VoiceResponse, CallError> {
    let call_sid = call_sid.as_str();

    let history = state
        .sessions
        .begin_turn(call_sid, &transcript)
        .await
        .map_err(CallError::from)?;

    let reply = match state.pipeline.reply(&history).await {
        Ok(reply) => reply,
        Err(e) => {
            tracing::error!(call_sid, error = %e, "reply generation failed");
            if let Err(e) = state.sessions.end_call(call_sid, CallEvent::Failed).await {
                tracing::debug!(error = %e, "could not mark call failed");
            }
            return Err(CallError::Generation(e.to_string()));
        }
    };
    tracing::debug!(call_sid, reply = %reply, "generated reply");

    state
        .sessions
        .record_reply(call_sid, &reply)
        .await
        .map_err(CallError::from)?;

    let audio = match state.renderer.render(&reply, &base_url).await {
        Ok(audio) => audio,
        Err(e) => {
            tracing::error!(call_sid, error = %e, "reply rendering failed");
            if let Err(e) = state.sessions.end_call(call_sid, CallEvent::Failed).await {
                tracing::debug!(error = %e, "could not mark call failed");
            }
            return Ok(farewell(AUDIO_ERROR));
        }
    };

    match state.sessions.complete_turn(call_sid).await {
        Ok(turn) => tracing::info!(call_sid, turn, url = %audio.url, "playing reply"),
        Err(e) => tracing::warn!(call_sid, error = %e, "call reset while replying"),
    }

    Ok(listen(VoiceResponse::new().play(audio.url.as_str())))
}

/// Handle the call status callback
///
/// Terminal statuses close the call's session.
pub async fn call_status(
    State(state): State<Arc<ApiState>>,
    form: Result<Form<CallStatusForm>, FormRejection>,
) -> StatusCode {
    let Ok(Form(form)) = form else {
        return StatusCode::BAD_REQUEST;
    };
    let call_sid = call_key(form.call_sid.as_deref());
    let status = form.call_status.as_deref().unwrap_or_default();

    if TERMINAL_CALL_STATUSES.contains(&status) {
        if let Err(e) = state.sessions.end_call(call_sid, CallEvent::Hangup).await {
            tracing::debug!(error = %e, "hangup on unknown call state");
        }
        if let Some(session) = state.sessions.remove(call_sid).await {
            tracing::info!(
                call_sid,
                status,
                turns = session.turns(),
                duration_secs = (chrono::Utc::now() - session.started_at()).num_seconds(),
                "call finished"
            );
        }
    } else {
        tracing::debug!(call_sid, status, "call status update");
    }

    StatusCode::NO_CONTENT
}

/// Call webhook errors
#[derive(Debug)]
pub enum CallError {
    /// Call is mid-turn or already ended
    Conflict(String),
    /// No way to build absolute artifact URLs
    NoBaseUrl,
    /// Generative service failed
    Generation(String),
    /// Turn task did not finish
    Internal(String),
}

impl From<Error> for CallError {
    fn from(e: Error) -> Self {
        match e {
            Error::InvalidTransition { .. } => Self::Conflict(e.to_string()),
            other => Self::Generation(other.to_string()),
        }
    }
}

impl IntoResponse for CallError {
    fn into_response(self) -> Response {
        #[derive(Serialize)]
        struct ErrorResponse {
            error: ErrorBody,
        }

        #[derive(Serialize)]
        struct ErrorBody {
            code: &'static str,
            message: String,
        }

        let (status, code, message) = match self {
            Self::Conflict(msg) => (StatusCode::CONFLICT, "call_conflict", msg),
            Self::NoBaseUrl => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "no_base_url",
                "cannot determine public URL (no Host header or configured URL)".to_string(),
            ),
            Self::Generation(msg) => (StatusCode::INTERNAL_SERVER_ERROR, "generation_failed", msg),
            Self::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error", msg),
        };

        (status, Json(ErrorResponse { error: ErrorBody { code, message } })).into_response()
    }
}

#[cfg(test)]
mod tests {
    use axum::http::HeaderValue;

    use super::*;

    #[test]
    fn test_call_key_falls_back_to_default() {
        assert_eq!(call_key(Some("CA123")), "CA123");
        assert_eq!(call_key(Some("  ")), DEFAULT_CALL_KEY);
        assert_eq!(call_key(None), DEFAULT_CALL_KEY);
    }

    #[test]
    fn test_base_url_prefers_configured() {
        let configured = Url::parse("https://public.example/").unwrap();
        let mut headers = HeaderMap::new();
        headers.insert(header::HOST, HeaderValue::from_static("internal:5000"));

        let url = request_base_url(&headers, &Uri::from_static("/process_speech"), Some(&configured)).unwrap();
        assert_eq!(url.as_str(), "https://public.example/");
    }

    #[test]
    fn test_base_url_from_host_and_forwarded_proto() {
        let mut headers = HeaderMap::new();
        headers.insert(header::HOST, HeaderValue::from_static("abc.ngrok.app"));
        headers.insert("x-forwarded-proto", HeaderValue::from_static("https, http"));

        let url = request_base_url(&headers, &Uri::from_static("/process_speech"), None).unwrap();
        assert_eq!(url.as_str(), "https://abc.ngrok.app/");
    }

    #[test]
    fn test_base_url_defaults_to_http() {
        let mut headers = HeaderMap::new();
        headers.insert(header::HOST, HeaderValue::from_static("localhost:5000"));

        let url = request_base_url(&headers, &Uri::from_static("/process_speech"), None).unwrap();
        assert_eq!(url.as_str(), "http://localhost:5000/");
    }

    #[test]
    fn test_base_url_without_host() {
        let uri = Uri::from_static("/process_speech");
        assert!(request_base_url(&HeaderMap::new(), &uri, None).is_none());
    }

    #[test]
    fn test_base_url_from_uri_authority() {
        let uri = Uri::from_static("https://h2.example:8443/process_speech");

        let url = request_base_url(&HeaderMap::new(), &uri, None).unwrap();
        assert_eq!(url.as_str(), "https://h2.example:8443/");
    }

    #[test]
    fn test_forwarded_proto_beats_uri_scheme() {
        let uri = Uri::from_static("http://h2.example/process_speech");
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-proto", HeaderValue::from_static("https"));

        let url = request_base_url(&headers, &uri, None).unwrap();
        assert_eq!(url.as_str(), "https://h2.example/");
    }

    #[test]
    fn test_listen_markup_reopens_capture() {
        let response = listen(VoiceResponse::new().say(GREETING));
        assert!(response.gathers());
        let xml = response.to_xml();
        assert!(xml.contains(r#"action="/process_speech""#));
        assert!(xml.ends_with("<Say>I didn&apos;t catch that. Goodbye.</Say></Response>"));
    }

    #[test]
    fn test_farewell_is_terminal() {
        let response = farewell(NO_SPEECH_APOLOGY);
        assert!(!response.gathers());
        assert!(!response.plays());
    }
}
