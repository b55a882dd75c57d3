//! TOML configuration file loading
//!
//! Supports `~/.config/remo/config.toml` as a persistent config source.
//! All fields are optional; the file is a partial overlay on top of defaults.

use std::path::PathBuf;

use serde::Deserialize;

/// Top-level TOML configuration file schema
#[derive(Debug, Default, Deserialize)]
pub struct RemoConfigFile {
    /// Model backend configuration
    #[serde(default)]
    pub llm: LlmFileConfig,

    /// Speech synthesis configuration
    #[serde(default)]
    pub voice: VoiceFileConfig,

    /// Speech-to-text configuration
    #[serde(default)]
    pub stt: SttFileConfig,

    /// Server/runtime configuration
    #[serde(default)]
    pub server: ServerFileConfig,

    /// Persona store configuration
    #[serde(default)]
    pub personas: PersonaFileConfig,
}

/// Model backend configuration
#[derive(Debug, Default, Deserialize)]
pub struct LlmFileConfig {
    /// Base URL of the workspace chat API (e.g. `http://localhost:3001/api/v1`)
    pub base_url: Option<String>,

    /// Bearer token for the backend
    pub api_key: Option<String>,

    /// Workspace slug chats are sent to
    pub workspace: Option<String>,

    /// Whether replies stream by default
    pub stream: Option<bool>,

    /// Idle read bound for responses, in seconds
    pub stream_timeout_secs: Option<u64>,
}

/// Speech synthesis configuration
#[derive(Debug, Default, Deserialize)]
pub struct VoiceFileConfig {
    /// Enable speech output
    pub enabled: Option<bool>,

    /// Explicit path to an espeak/espeak-ng executable
    pub espeak_path: Option<String>,

    /// Grace period before a stopped job is killed, in milliseconds
    pub stop_grace_ms: Option<u64>,
}

/// Speech-to-text configuration
#[derive(Debug, Default, Deserialize)]
pub struct SttFileConfig {
    /// Whisper-compatible API base URL
    pub base_url: Option<String>,

    /// Transcription model (e.g. "whisper-1")
    pub model: Option<String>,

    /// Bearer token for the transcription endpoint
    pub api_key: Option<String>,

    /// Language hint (ISO 639-1)
    pub language: Option<String>,
}

/// Server/runtime configuration
#[derive(Debug, Default, Deserialize)]
pub struct ServerFileConfig {
    /// API server port
    pub port: Option<u16>,
}

/// Persona store configuration
#[derive(Debug, Default, Deserialize)]
pub struct PersonaFileConfig {
    /// Path to the persona YAML store
    pub store: Option<String>,
}

/// Load the TOML config file from the standard path
///
/// Returns `RemoConfigFile::default()` if the file doesn't exist or can't be parsed.
pub fn load_config_file() -> RemoConfigFile {
    let Some(path) = config_file_path() else {
        return RemoConfigFile::default();
    };

    if !path.exists() {
        return RemoConfigFile::default();
    }

    match std::fs::read_to_string(&path) {
        Ok(content) => parse_config(&content).unwrap_or_else(|e| {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "failed to parse config file, using defaults"
            );
            RemoConfigFile::default()
        }),
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "failed to read config file"
            );
            RemoConfigFile::default()
        }
    }
}

/// Parse config file content
///
/// # Errors
///
/// Returns error if the content is not valid TOML for the schema
pub fn parse_config(content: &str) -> crate::Result<RemoConfigFile> {
    let config = toml::from_str(content)?;
    tracing::info!("loaded config file");
    Ok(config)
}

/// Return the config file path: `~/.config/remo/config.toml`
pub fn config_file_path() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| d.config_dir().join("remo").join("config.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_partial_file() {
        let config = parse_config(
            r#"
            [llm]
            base_url = "http://llm.local/api/v1"
            workspace = "kitchen"
            stream = false

            [server]
            port = 9000
            "#,
        )
        .unwrap();

        assert_eq!(config.llm.base_url.as_deref(), Some("http://llm.local/api/v1"));
        assert_eq!(config.llm.workspace.as_deref(), Some("kitchen"));
        assert_eq!(config.llm.stream, Some(false));
        assert_eq!(config.server.port, Some(9000));
        assert!(config.voice.enabled.is_none());
        assert!(config.personas.store.is_none());
    }

    #[test]
    fn empty_file_is_all_defaults() {
        let config = parse_config("").unwrap();
        assert!(config.llm.api_key.is_none());
        assert!(config.stt.model.is_none());
    }

    #[test]
    fn rejects_wrong_types() {
        assert!(parse_config("[server]\nport = \"eighty\"").is_err());
    }
}
