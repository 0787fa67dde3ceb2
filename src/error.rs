//! Error types for the call bridge

use thiserror::Error;

use crate::conversation::{CallEvent, CallState};

/// Result type alias for call bridge operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the call bridge
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Text generation error
    #[error("LLM error: {0}")]
    Llm(String),

    /// Text-to-speech error
    #[error("TTS error: {0}")]
    Tts(String),

    /// Audio artifact storage error
    #[error("audio store error: {0}")]
    AudioStore(String),

    /// Call session is not in a state that accepts the event
    #[error("call {call_sid}: cannot apply {event:?} while {state:?}")]
    InvalidTransition {
        call_sid: String,
        state: CallState,
        event: CallEvent,
    },

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP error
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML parsing error
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),

    /// URL parsing error
    #[error("url error: {0}")]
    Url(#[from] url::ParseError),
}
