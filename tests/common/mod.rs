//! Shared test utilities

#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode, header},
};
use call_bridge::{
    ApiServerBuilder, AudioStore, ChatMessage, Error, ExchangeRecord, ReplyGenerator, Result,
    SessionStore, SpeechSynthesizer,
};
use tempfile::TempDir;
use tower::ServiceExt;

pub const HOST: &str = "bridge.test";

/// Generator returning a fixed reply and recording every prompt it receives
pub struct FakeGenerator {
    reply: String,
    fail: bool,
    delay: Duration,
    prompts: Mutex<Vec<Vec<ChatMessage>>>,
}

impl FakeGenerator {
    pub fn replying(reply: &str) -> Self {
        Self {
            reply: reply.to_string(),
            fail: false,
            delay: Duration::ZERO,
            prompts: Mutex::new(Vec::new()),
        }
    }

    /// Replies only after `delay`, like a slow upstream model
    pub fn slow(reply: &str, delay: Duration) -> Self {
        Self {
            delay,
            ..Self::replying(reply)
        }
    }

    pub fn failing() -> Self {
        Self {
            reply: String::new(),
            fail: true,
            delay: Duration::ZERO,
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn prompts(&self) -> Vec<Vec<ChatMessage>> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl ReplyGenerator for FakeGenerator {
    async fn generate(&self, messages: &[ChatMessage]) -> Result<String> {
        self.prompts.lock().unwrap().push(messages.to_vec());
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if self.fail {
            return Err(Error::Llm("OpenAI API error 500: upstream down".to_string()));
        }
        Ok(self.reply.clone())
    }

    fn name(&self) -> &'static str {
        "fake"
    }
}

/// Synthesizer that snapshots the call's history at the moment it is invoked
pub struct FakeSynthesizer {
    fail: bool,
    sessions: Arc<SessionStore>,
    call_sid: String,
    calls: Mutex<Vec<(String, Vec<ExchangeRecord>)>>,
}

impl FakeSynthesizer {
    pub fn new(sessions: Arc<SessionStore>, call_sid: &str, fail: bool) -> Self {
        Self {
            fail,
            sessions,
            call_sid: call_sid.to_string(),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Text passed to each synthesis call, with the history seen at that time
    pub fn calls(&self) -> Vec<(String, Vec<ExchangeRecord>)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl SpeechSynthesizer for FakeSynthesizer {
    async fn synthesize(&self, text: &str) -> Result<Vec<u8>> {
        let history = self.sessions.history(&self.call_sid).await.unwrap_or_default();
        self.calls.lock().unwrap().push((text.to_string(), history));
        if self.fail {
            return Err(Error::Tts("ElevenLabs TTS error 401 Unauthorized: bad key".to_string()));
        }
        Ok(format!("mp3:{text}").into_bytes())
    }

    fn name(&self) -> &'static str {
        "fake"
    }
}

/// A router wired to fakes, plus handles to inspect them
pub struct TestApp {
    pub router: Router,
    pub sessions: Arc<SessionStore>,
    pub generator: Arc<FakeGenerator>,
    pub synthesizer: Arc<FakeSynthesizer>,
    pub audio_dir: TempDir,
}

impl TestApp {
    /// App whose synthesizer snapshots history for `call_sid`
    pub fn new(generator: FakeGenerator, call_sid: &str, tts_fails: bool) -> Self {
        Self::with_system_prompt(generator, call_sid, tts_fails, None)
    }

    /// Same as [`TestApp::new`] with an optional replacement system instruction
    pub fn with_system_prompt(
        generator: FakeGenerator,
        call_sid: &str,
        tts_fails: bool,
        system_prompt: Option<&str>,
    ) -> Self {
        let audio_dir = tempfile::tempdir().expect("failed to create audio dir");
        let sessions = Arc::new(SessionStore::new());
        let generator = Arc::new(generator);
        let synthesizer = Arc::new(FakeSynthesizer::new(sessions.clone(), call_sid, tts_fails));

        let server = ApiServerBuilder::new(
            generator.clone(),
            synthesizer.clone(),
            AudioStore::new(audio_dir.path()).expect("failed to open audio store"),
            0,
        )
        .sessions(sessions.clone())
        .system_prompt(system_prompt.map(str::to_string))
        .build();

        Self {
            router: server.router(),
            sessions,
            generator,
            synthesizer,
            audio_dir,
        }
    }

    /// POST a form-encoded webhook the way the telephony platform does
    pub async fn post_form(&self, path: &str, body: &str) -> (StatusCode, String) {
        let request = Request::builder()
            .method("POST")
            .uri(path)
            .header(header::HOST, HOST)
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(Body::from(body.to_string()))
            .unwrap();
        self.send(request).await
    }

    pub async fn get(&self, path: &str) -> (StatusCode, String) {
        let request = Request::builder()
            .uri(path)
            .header(header::HOST, HOST)
            .body(Body::empty())
            .unwrap();
        self.send(request).await
    }

    pub async fn send(&self, request: Request<Body>) -> (StatusCode, String) {
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, String::from_utf8_lossy(&body).into_owned())
    }
}

/// Extract the `<Play>` URL from a TwiML document
pub fn play_url(xml: &str) -> Option<&str> {
    let start = xml.find("<Play>")? + "<Play>".len();
    let end = xml[start..].find("</Play>")? + start;
    Some(&xml[start..end])
}
