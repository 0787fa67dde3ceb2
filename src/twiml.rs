//! Call-control markup (TwiML) rendering
//!
//! A small typed builder for the `<Response>` documents returned to the
//! telephony platform. Only the verbs the bridge uses are modelled.

use std::fmt::Write as _;

use axum::http::header;
use axum::response::{IntoResponse, Response};

/// Seconds of silence before the platform closes a capture window
pub const GATHER_TIMEOUT_SECS: u32 = 5;

/// Speech capture window posting the transcript to `action`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Gather {
    action: String,
    method: &'static str,
    timeout: u32,
    speech_timeout: &'static str,
    finish_on_key: &'static str,
}

impl Gather {
    /// Speech capture with automatic end-of-speech detection and `*` as the
    /// explicit terminator
    pub fn speech(action: impl Into<String>) -> Self {
        Self {
            action: action.into(),
            method: "POST",
            timeout: GATHER_TIMEOUT_SECS,
            speech_timeout: "auto",
            finish_on_key: "*",
        }
    }

    fn write_xml(&self, out: &mut String) {
        let _ = write!(
            out,
            r#"<Gather input="speech" action="{}" method="{}" timeout="{}" speechTimeout="{}" finishOnKey="{}"/>"#,
            escape(&self.action),
            self.method,
            self.timeout,
            self.speech_timeout,
            escape(self.finish_on_key),
        );
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Verb {
    Say(String),
    Play(String),
    Gather(Gather),
    Hangup,
}

/// A TwiML `<Response>` document
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VoiceResponse {
    verbs: Vec<Verb>,
}

impl VoiceResponse {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Speak text with the platform's voice
    #[must_use]
    pub fn say(mut self, text: impl Into<String>) -> Self {
        self.verbs.push(Verb::Say(text.into()));
        self
    }

    /// Play an audio file by URL
    #[must_use]
    pub fn play(mut self, url: impl Into<String>) -> Self {
        self.verbs.push(Verb::Play(url.into()));
        self
    }

    #[must_use]
    pub fn gather(mut self, gather: Gather) -> Self {
        self.verbs.push(Verb::Gather(gather));
        self
    }

    #[must_use]
    pub fn hangup(mut self) -> Self {
        self.verbs.push(Verb::Hangup);
        self
    }

    /// Whether the document opens another capture window
    #[must_use]
    pub fn gathers(&self) -> bool {
        self.verbs.iter().any(|v| matches!(v, Verb::Gather(_)))
    }

    /// Whether the document plays audio
    #[must_use]
    pub fn plays(&self) -> bool {
        self.verbs.iter().any(|v| matches!(v, Verb::Play(_)))
    }

    /// Serialize to an XML document
    #[must_use]
    pub fn to_xml(&self) -> String {
        let mut out = String::from(r#"<?xml version="1.0" encoding="UTF-8"?><Response>"#);
        for verb in &self.verbs {
            match verb {
                Verb::Say(text) => {
                    let _ = write!(out, "<Say>{}</Say>", escape(text));
                }
                Verb::Play(url) => {
                    let _ = write!(out, "<Play>{}</Play>", escape(url));
                }
                Verb::Gather(gather) => gather.write_xml(&mut out),
                Verb::Hangup => out.push_str("<Hangup/>"),
            }
        }
        out.push_str("</Response>");
        out
    }
}

impl IntoResponse for VoiceResponse {
    fn into_response(self) -> Response {
        ([(header::CONTENT_TYPE, "text/xml")], self.to_xml()).into_response()
    }
}

/// Escape XML special characters in text and attribute values
fn escape(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&apos;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_response() {
        assert_eq!(
            VoiceResponse::new().to_xml(),
            r#"<?xml version="1.0" encoding="UTF-8"?><Response></Response>"#
        );
    }

    #[test]
    fn test_gather_attributes() {
        let xml = VoiceResponse::new()
            .gather(Gather::speech("/process_speech"))
            .to_xml();

        assert!(xml.contains(r#"input="speech""#));
        assert!(xml.contains(r#"action="/process_speech""#));
        assert!(xml.contains(r#"method="POST""#));
        assert!(xml.contains(r#"timeout="5""#));
        assert!(xml.contains(r#"speechTimeout="auto""#));
        assert!(xml.contains(r#"finishOnKey="*""#));
    }

    #[test]
    fn test_verbs_keep_order() {
        let xml = VoiceResponse::new()
            .play("http://host/static/a.mp3")
            .gather(Gather::speech("/process_speech"))
            .say("bye")
            .to_xml();

        let play = xml.find("<Play>").unwrap();
        let gather = xml.find("<Gather").unwrap();
        let say = xml.find("<Say>").unwrap();
        assert!(play < gather && gather < say);
    }

    #[test]
    fn test_escapes_text_and_urls() {
        let xml = VoiceResponse::new()
            .say("Tom & Jerry <3 \"quotes\"")
            .play("http://host/static/a.mp3?x=1&y=2")
            .to_xml();

        assert!(xml.contains("<Say>Tom &amp; Jerry &lt;3 &quot;quotes&quot;</Say>"));
        assert!(xml.contains("<Play>http://host/static/a.mp3?x=1&amp;y=2</Play>"));
    }

    #[test]
    fn test_terminal_response_flags() {
        let response = VoiceResponse::new().say("Goodbye.").hangup();
        assert!(!response.gathers());
        assert!(!response.plays());
        assert!(response.to_xml().ends_with("<Hangup/></Response>"));
    }
}
