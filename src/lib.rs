//! Call Bridge - Telephony voice assistant bridge
//!
//! Answers phone calls through telephony webhooks and holds a spoken
//! conversation with a language model:
//! - Per-call sessions with bounded history and an explicit turn state machine
//! - Reply generation via a chat completions service
//! - Reply rendering via a speech synthesis service, served as static audio
//! - TwiML call-control markup driving the caller's phone
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │              Telephony platform                      │
//! │   speech recognition  │  audio playback  │  calls   │
//! └────────────────────┬────────────────────────────────┘
//!                      │ webhooks / TwiML
//! ┌────────────────────▼────────────────────────────────┐
//! │                 Call Bridge                          │
//! │   Call flow  │  Sessions  │  Audio store  │  Sweeper │
//! └──────────┬─────────────────────────┬────────────────┘
//!            │                         │
//! ┌──────────▼──────────┐   ┌──────────▼──────────┐
//! │   Chat completions  │   │   Speech synthesis  │
//! └─────────────────────┘   └─────────────────────┘
//! ```

pub mod api;
pub mod config;
pub mod conversation;
pub mod error;
pub mod llm;
pub mod retention;
pub mod twiml;
pub mod voice;

pub use api::{ApiServer, ApiServerBuilder, ApiState};
pub use config::Config;
pub use conversation::{
    CallEvent, CallSession, CallState, ConversationBuffer, ExchangeRecord, Role, SessionStore,
};
pub use error::{Error, Result};
pub use llm::{ChatMessage, OpenAiChat, ReplyGenerator, ReplyPipeline};
pub use twiml::{Gather, VoiceResponse};
pub use voice::{AudioStore, ElevenLabsSynthesizer, RenderedAudio, SpeechRenderer, SpeechSynthesizer};
