//! TOML configuration file loading
//!
//! Supports `~/.config/callbridge/config.toml` as a persistent config source.
//! All fields are optional; the file is a partial overlay on top of defaults.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::Result;

/// Top-level TOML configuration file schema
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CallBridgeConfigFile {
    /// LLM configuration
    #[serde(default)]
    pub llm: LlmFileConfig,

    /// Speech synthesis configuration
    #[serde(default)]
    pub voice: VoiceFileConfig,

    /// API keys for external services
    #[serde(default)]
    pub api_keys: ApiKeysFileConfig,

    /// HTTP server configuration
    #[serde(default)]
    pub server: ServerFileConfig,

    /// Artifact and session retention
    #[serde(default)]
    pub retention: RetentionFileConfig,
}

/// LLM-related configuration
#[derive(Debug, Default, Deserialize)]
pub struct LlmFileConfig {
    /// Chat model identifier (e.g. "gpt-4o-mini")
    pub model: Option<String>,

    /// Replaces the built-in system instruction
    pub system_prompt: Option<String>,

    /// OpenAI-compatible API base URL
    pub api_base: Option<String>,
}

/// Speech synthesis configuration
#[derive(Debug, Default, Deserialize)]
pub struct VoiceFileConfig {
    /// ElevenLabs voice identifier
    pub voice_id: Option<String>,

    /// ElevenLabs model identifier
    pub model: Option<String>,

    /// ElevenLabs API base URL
    pub api_base: Option<String>,
}

/// API keys configuration
#[derive(Debug, Default, Deserialize)]
pub struct ApiKeysFileConfig {
    pub openai: Option<String>,
    pub elevenlabs: Option<String>,
}

/// Server configuration
#[derive(Debug, Default, Deserialize)]
pub struct ServerFileConfig {
    pub port: Option<u16>,

    /// Externally reachable base URL (e.g. a tunnel address)
    pub public_url: Option<String>,

    /// Directory rendered audio is written to and served from
    pub audio_dir: Option<String>,
}

/// Retention configuration
#[derive(Debug, Default, Deserialize)]
pub struct RetentionFileConfig {
    pub audio_max_age_secs: Option<u64>,
    pub session_idle_secs: Option<u64>,
    pub sweep_interval_secs: Option<u64>,
}

/// Parse config file contents
///
/// # Errors
///
/// Returns error if the content is not valid TOML for this schema
pub fn parse_config_file(content: &str) -> Result<CallBridgeConfigFile> {
    Ok(toml::from_str(content)?)
}

/// Load the TOML config file from `path`
///
/// Returns `CallBridgeConfigFile::default()` if the file doesn't exist or
/// can't be parsed.
pub fn load_config_file(path: Option<&Path>) -> CallBridgeConfigFile {
    let Some(path) = path else {
        return CallBridgeConfigFile::default();
    };

    if !path.exists() {
        return CallBridgeConfigFile::default();
    }

    match std::fs::read_to_string(path) {
        Ok(content) => match parse_config_file(&content) {
            Ok(config) => {
                tracing::info!(path = %path.display(), "loaded config file");
                config
            }
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "failed to parse config file, using defaults"
                );
                CallBridgeConfigFile::default()
            }
        },
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "failed to read config file"
            );
            CallBridgeConfigFile::default()
        }
    }
}

/// Return the default config file path: `~/.config/callbridge/config.toml`
pub fn config_file_path() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| d.config_dir().join("callbridge").join("config.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_partial_file() {
        let fc = parse_config_file(
            r#"
            [voice]
            voice_id = "abc"

            [server]
            port = 8080
            "#,
        )
        .unwrap();

        assert_eq!(fc.voice.voice_id.as_deref(), Some("abc"));
        assert_eq!(fc.server.port, Some(8080));
        assert!(fc.llm.model.is_none());
        assert!(fc.api_keys.openai.is_none());
    }

    #[test]
    fn test_parse_rejects_unknown_section() {
        assert!(parse_config_file("[mystery]\nvalue = 1\n").is_err());
    }

    #[test]
    fn test_load_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let fc = load_config_file(Some(&dir.path().join("absent.toml")));
        assert!(fc.server.port.is_none());
    }

    #[test]
    fn test_load_invalid_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "server = [").unwrap();
        let fc = load_config_file(Some(&path));
        assert!(fc.server.port.is_none());
    }
}
