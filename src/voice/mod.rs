//! Text-to-speech rendering
//!
//! Synthesizes reply text, stores the audio where the telephony platform can
//! fetch it, and hands back the playable URL.

mod store;
mod tts;

pub use store::{AUDIO_ROUTE, AudioStore};
pub use tts::{DEFAULT_VOICE_ID, ElevenLabsSynthesizer, SpeechSynthesizer, VoiceSettings};

use std::sync::Arc;

use url::Url;

use crate::Result;

/// A stored reply the platform can play
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedAudio {
    pub filename: String,
    pub url: Url,
}

/// Synthesizes text and persists the audio
#[derive(Clone)]
pub struct SpeechRenderer {
    synthesizer: Arc<dyn SpeechSynthesizer>,
    store: AudioStore,
}

impl SpeechRenderer {
    #[must_use]
    pub fn new(synthesizer: Arc<dyn SpeechSynthesizer>, store: AudioStore) -> Self {
        Self { synthesizer, store }
    }

    #[must_use]
    pub const fn store(&self) -> &AudioStore {
        &self.store
    }

    /// Render `text` to a new artifact served under `base`
    ///
    /// # Errors
    ///
    /// Returns error if synthesis fails, the audio cannot be written, or the
    /// URL cannot be built
    pub async fn render(&self, text: &str, base: &Url) -> Result<RenderedAudio> {
        let audio = self.synthesizer.synthesize(text).await?;
        let filename = self.store.save(&audio).await?;
        let url = AudioStore::url_for(base, &filename)?;

        tracing::info!(
            backend = self.synthesizer.name(),
            filename = %filename,
            bytes = audio.len(),
            "rendered reply audio"
        );

        Ok(RenderedAudio { filename, url })
    }
}
