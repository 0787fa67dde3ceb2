//! Speech-to-reply pipeline
//!
//! Turns the caller's conversation history into a single spoken reply using
//! a generative text service.

mod openai;

pub use openai::{DEFAULT_MODEL, OpenAiChat};

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;

use crate::Result;
use crate::conversation::{ExchangeRecord, Role};

/// Instruction prepended to every prompt
pub const SYSTEM_PROMPT: &str = "You are a helpful AI voice assistant on a phone call. \
The user's speech may be messy or incomplete, so interpret carefully. \
Always stay on the user's topic and avoid changing the subject. \
If unclear, ask politely for clarification. \
Respond in short, natural spoken sentences (10-15 words).";

/// A role-tagged message sent to the generative service
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }
}

impl From<&ExchangeRecord> for ChatMessage {
    fn from(record: &ExchangeRecord) -> Self {
        Self {
            role: record.role(),
            content: record.content().to_string(),
        }
    }
}

/// Trait for generative text backends
#[async_trait]
pub trait ReplyGenerator: Send + Sync {
    /// Produce one reply for the ordered messages
    ///
    /// # Errors
    ///
    /// Returns error if the service call fails
    async fn generate(&self, messages: &[ChatMessage]) -> Result<String>;

    /// Backend name for logging
    fn name(&self) -> &'static str;
}

/// Build the prompt: system instruction followed by history in order
#[must_use]
pub fn build_prompt(system_prompt: &str, history: &[ExchangeRecord]) -> Vec<ChatMessage> {
    std::iter::once(ChatMessage::system(system_prompt))
        .chain(history.iter().map(ChatMessage::from))
        .collect()
}

/// Produces replies from conversation history
#[derive(Clone)]
pub struct ReplyPipeline {
    generator: Arc<dyn ReplyGenerator>,
    system_prompt: String,
}

impl ReplyPipeline {
    /// Create a pipeline with the default system instruction
    #[must_use]
    pub fn new(generator: Arc<dyn ReplyGenerator>) -> Self {
        Self {
            generator,
            system_prompt: SYSTEM_PROMPT.to_string(),
        }
    }

    /// Override the system instruction
    #[must_use]
    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    /// Generate a reply for the given history
    ///
    /// Single blocking call, no retry.
    ///
    /// # Errors
    ///
    /// Returns error if the generator fails
    pub async fn reply(&self, history: &[ExchangeRecord]) -> Result<String> {
        let messages = build_prompt(&self.system_prompt, history);
        tracing::debug!(
            backend = self.generator.name(),
            messages = messages.len(),
            "requesting reply"
        );
        self.generator.generate(&messages).await
    }
}
