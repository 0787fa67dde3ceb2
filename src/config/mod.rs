//! Configuration management for the call bridge

pub mod file;

use std::path::PathBuf;
use std::time::Duration;

use secrecy::SecretString;
use url::Url;

use crate::llm::DEFAULT_MODEL;
use crate::voice::DEFAULT_VOICE_ID;
use crate::{Error, Result};
use file::CallBridgeConfigFile;

/// Default HTTP port
pub const DEFAULT_PORT: u16 = 5000;

/// Call bridge configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// API keys
    pub api_keys: ApiKeys,

    /// Reply generation configuration
    pub llm: LlmConfig,

    /// Speech synthesis configuration
    pub voice: VoiceConfig,

    /// HTTP server configuration
    pub server: ServerConfig,

    /// Artifact and session retention
    pub retention: RetentionConfig,
}

/// API keys for external services
#[derive(Debug, Clone, Default)]
pub struct ApiKeys {
    /// `OpenAI` API key (reply generation)
    pub openai: Option<SecretString>,

    /// `ElevenLabs` API key (speech synthesis)
    pub elevenlabs: Option<SecretString>,
}

/// Reply generation configuration
#[derive(Debug, Clone)]
pub struct LlmConfig {
    /// Chat model identifier
    pub model: String,

    /// Replaces the built-in system instruction when set
    pub system_prompt: Option<String>,

    /// OpenAI-compatible API base; the public endpoint when unset
    pub api_base: Option<Url>,
}

/// Speech synthesis configuration
#[derive(Debug, Clone)]
pub struct VoiceConfig {
    /// ElevenLabs voice identifier
    pub voice_id: String,

    /// ElevenLabs model; account default when unset
    pub model: Option<String>,

    /// ElevenLabs API base; the public endpoint when unset
    pub api_base: Option<Url>,
}

/// HTTP server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Port to listen on
    pub port: u16,

    /// Base URL the telephony platform reaches us at; derived from the
    /// request's `Host` header when unset
    pub public_url: Option<Url>,

    /// Directory rendered audio is written to and served from
    pub audio_dir: PathBuf,
}

/// Retention of audio artifacts and call sessions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionConfig {
    /// Audio files older than this are deleted
    pub audio_max_age: Duration,

    /// Sessions without activity for this long are dropped
    pub session_idle_timeout: Duration,

    /// Time between retention passes
    pub sweep_interval: Duration,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            audio_max_age: Duration::from_secs(3600),
            session_idle_timeout: Duration::from_secs(900),
            sweep_interval: Duration::from_secs(60),
        }
    }
}

impl Config {
    /// Load configuration from `.env`, the process environment, and the
    /// TOML config file (env > toml > default)
    ///
    /// # Errors
    ///
    /// Returns error if a configured value is malformed
    pub fn load() -> Result<Self> {
        if let Ok(path) = dotenvy::dotenv() {
            tracing::debug!(path = %path.display(), "loaded .env file");
        }

        let path = std::env::var("CALLBRIDGE_CONFIG")
            .ok()
            .map(PathBuf::from)
            .or_else(file::config_file_path);
        let fc = file::load_config_file(path.as_deref());

        Self::from_sources(|key| std::env::var(key).ok(), fc)
    }

    /// Resolve configuration from an environment lookup and a parsed file
    ///
    /// # Errors
    ///
    /// Returns error if a configured value is malformed
    pub fn from_sources(
        env: impl Fn(&str) -> Option<String>,
        fc: CallBridgeConfigFile,
    ) -> Result<Self> {
        let non_empty = |key: &str| env(key).filter(|v| !v.trim().is_empty());

        // API keys (env > toml > None)
        let api_keys = ApiKeys {
            openai: non_empty("OPENAI_API_KEY")
                .or(fc.api_keys.openai)
                .map(SecretString::from),
            elevenlabs: non_empty("ELEVEN_API_KEY")
                .or_else(|| non_empty("ELEVENLABS_API_KEY"))
                .or(fc.api_keys.elevenlabs)
                .map(SecretString::from),
        };

        let llm = LlmConfig {
            model: non_empty("CALLBRIDGE_LLM_MODEL")
                .or(fc.llm.model)
                .unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            system_prompt: non_empty("CALLBRIDGE_SYSTEM_PROMPT").or(fc.llm.system_prompt),
            api_base: non_empty("OPENAI_BASE_URL")
                .or(fc.llm.api_base)
                .map(|raw| parse_http_url(&raw))
                .transpose()?,
        };

        let voice = VoiceConfig {
            voice_id: non_empty("ELEVEN_VOICE_ID")
                .or(fc.voice.voice_id)
                .unwrap_or_else(|| DEFAULT_VOICE_ID.to_string()),
            model: non_empty("ELEVEN_MODEL_ID").or(fc.voice.model),
            api_base: non_empty("ELEVENLABS_BASE_URL")
                .or(fc.voice.api_base)
                .map(|raw| parse_http_url(&raw))
                .transpose()?,
        };

        let port = match non_empty("CALLBRIDGE_PORT").or_else(|| non_empty("PORT")) {
            Some(raw) => raw
                .parse()
                .map_err(|_| Error::Config(format!("invalid port: {raw}")))?,
            None => fc.server.port.unwrap_or(DEFAULT_PORT),
        };

        let public_url = non_empty("CALLBRIDGE_PUBLIC_URL")
            .or(fc.server.public_url)
            .map(|raw| parse_http_url(&raw))
            .transpose()?;

        let server = ServerConfig {
            port,
            public_url,
            audio_dir: non_empty("CALLBRIDGE_AUDIO_DIR")
                .or(fc.server.audio_dir)
                .map_or_else(|| PathBuf::from("static"), PathBuf::from),
        };

        let defaults = RetentionConfig::default();
        let secs = |key: &str, file_value: Option<u64>, default: Duration| -> Result<Duration> {
            match non_empty(key) {
                Some(raw) => raw
                    .parse()
                    .map(Duration::from_secs)
                    .map_err(|_| Error::Config(format!("invalid {key}: {raw}"))),
                None => Ok(file_value.map_or(default, Duration::from_secs)),
            }
        };

        let retention = RetentionConfig {
            audio_max_age: secs(
                "CALLBRIDGE_AUDIO_MAX_AGE_SECS",
                fc.retention.audio_max_age_secs,
                defaults.audio_max_age,
            )?,
            session_idle_timeout: secs(
                "CALLBRIDGE_SESSION_IDLE_SECS",
                fc.retention.session_idle_secs,
                defaults.session_idle_timeout,
            )?,
            sweep_interval: secs(
                "CALLBRIDGE_SWEEP_INTERVAL_SECS",
                fc.retention.sweep_interval_secs,
                defaults.sweep_interval,
            )?,
        };

        if retention.sweep_interval.is_zero() {
            return Err(Error::Config("sweep interval must be positive".to_string()));
        }

        Ok(Self {
            api_keys,
            llm,
            voice,
            server,
            retention,
        })
    }

    /// `OpenAI` key, required to answer calls
    ///
    /// # Errors
    ///
    /// Returns error if no key is configured
    pub fn openai_key(&self) -> Result<SecretString> {
        self.api_keys
            .openai
            .clone()
            .ok_or_else(|| Error::Config("OPENAI_API_KEY is not set".to_string()))
    }

    /// `ElevenLabs` key, required to render replies
    ///
    /// # Errors
    ///
    /// Returns error if no key is configured
    pub fn elevenlabs_key(&self) -> Result<SecretString> {
        self.api_keys
            .elevenlabs
            .clone()
            .ok_or_else(|| Error::Config("ELEVEN_API_KEY is not set".to_string()))
    }
}

fn parse_http_url(raw: &str) -> Result<Url> {
    let url = Url::parse(raw)?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(Error::Config(format!("URL must be http or https: {raw}")));
    }
    Ok(url)
}
