//! Configuration management for Remo gateway

pub mod file;

use std::path::PathBuf;
use std::time::Duration;

use secrecy::SecretString;

use crate::Result;
use file::RemoConfigFile;

/// Default AnythingLLM developer API base
const DEFAULT_LLM_URL: &str = "http://localhost:3001/api/v1";

/// Default workspace slug
const DEFAULT_WORKSPACE: &str = "remo";

/// Default idle read bound for model responses
const DEFAULT_STREAM_TIMEOUT_SECS: u64 = 60;

/// Default grace period before a stopped speech job is killed
const DEFAULT_STOP_GRACE_MS: u64 = 2000;

/// Remo gateway configuration
#[derive(Debug)]
pub struct Config {
    /// Model backend configuration
    pub llm: LlmConfig,

    /// Speech synthesis configuration
    pub voice: VoiceConfig,

    /// Speech-to-text configuration
    pub stt: SttConfig,

    /// HTTP API server configuration
    pub api_server: ApiServerConfig,

    /// Path to the persona YAML store
    pub persona_store: PathBuf,
}

/// Model backend configuration
#[derive(Debug)]
pub struct LlmConfig {
    /// Base URL of the workspace chat API
    pub base_url: String,

    /// Bearer token (from `REMO_LLM_API_KEY`)
    pub api_key: Option<SecretString>,

    /// Workspace slug
    pub workspace: String,

    /// Whether replies stream by default
    pub stream: bool,

    /// Idle read bound for responses
    pub stream_timeout: Duration,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_LLM_URL.to_string(),
            api_key: None,
            workspace: DEFAULT_WORKSPACE.to_string(),
            stream: true,
            stream_timeout: Duration::from_secs(DEFAULT_STREAM_TIMEOUT_SECS),
        }
    }
}

/// Speech synthesis configuration
#[derive(Debug, Clone)]
pub struct VoiceConfig {
    /// Enable speech output
    pub enabled: bool,

    /// Explicit espeak executable, skipping PATH discovery
    pub espeak_path: Option<PathBuf>,

    /// Grace period before a stopped job is killed
    pub stop_grace: Duration,
}

impl Default for VoiceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            espeak_path: None,
            stop_grace: Duration::from_millis(DEFAULT_STOP_GRACE_MS),
        }
    }
}

/// Speech-to-text configuration
#[derive(Debug, Default)]
pub struct SttConfig {
    /// Whisper-compatible API base URL
    pub base_url: String,

    /// Transcription model
    pub model: String,

    /// Bearer token (from `OPENAI_API_KEY` unless overridden)
    pub api_key: Option<SecretString>,

    /// Language hint
    pub language: Option<String>,
}

/// HTTP API server configuration
#[derive(Debug, Clone)]
pub struct ApiServerConfig {
    /// Port to listen on
    pub port: u16,
}

/// Return the data directory for persisted state, creating it if needed
///
/// Uses `~/.local/share/remo/` on Linux
pub fn data_dir() -> PathBuf {
    let dir = directories::BaseDirs::new().map_or_else(
        || PathBuf::from(".local/share/remo"),
        |d| d.data_dir().join("remo"),
    );

    if let Err(e) = std::fs::create_dir_all(&dir) {
        tracing::warn!(
            path = %dir.display(),
            error = %e,
            "failed to create data directory"
        );
    }

    dir
}

impl Config {
    /// Load configuration from environment, config file, and defaults
    ///
    /// # Errors
    ///
    /// Returns error if an environment override has an invalid value
    pub fn load() -> Result<Self> {
        Self::load_with_options(false)
    }

    /// Load configuration with explicit voice disable option
    ///
    /// # Errors
    ///
    /// Returns error if an environment override has an invalid value
    pub fn load_with_options(disable_voice: bool) -> Result<Self> {
        Self::from_sources(&file::load_config_file(), |key| std::env::var(key).ok(), disable_voice)
    }

    /// Resolve configuration from a parsed file and an environment lookup
    ///
    /// Precedence is env > file > default.
    ///
    /// # Errors
    ///
    /// Returns error if an environment override has an invalid value
    pub fn from_sources(
        fc: &RemoConfigFile,
        env: impl Fn(&str) -> Option<String>,
        disable_voice: bool,
    ) -> Result<Self> {
        let defaults = LlmConfig::default();

        let stream = match env("REMO_STREAM") {
            Some(v) => parse_bool("REMO_STREAM", &v)?,
            None => fc.llm.stream.unwrap_or(defaults.stream),
        };

        let stream_timeout = match env("REMO_STREAM_TIMEOUT_SECS") {
            Some(v) => Duration::from_secs(parse_number("REMO_STREAM_TIMEOUT_SECS", &v)?),
            None => fc
                .llm
                .stream_timeout_secs
                .map_or(defaults.stream_timeout, Duration::from_secs),
        };

        let llm = LlmConfig {
            base_url: env("REMO_LLM_URL")
                .or_else(|| fc.llm.base_url.clone())
                .unwrap_or(defaults.base_url),
            api_key: env("REMO_LLM_API_KEY")
                .or_else(|| fc.llm.api_key.clone())
                .map(SecretString::from),
            workspace: env("REMO_WORKSPACE")
                .or_else(|| fc.llm.workspace.clone())
                .unwrap_or(defaults.workspace),
            stream,
            stream_timeout,
        };

        let voice_disabled_by_env = match env("REMO_DISABLE_VOICE") {
            Some(v) => parse_bool("REMO_DISABLE_VOICE", &v)?,
            None => false,
        };
        let voice = VoiceConfig {
            enabled: !disable_voice
                && !voice_disabled_by_env
                && fc.voice.enabled.unwrap_or(true),
            espeak_path: env("REMO_ESPEAK_PATH")
                .or_else(|| fc.voice.espeak_path.clone())
                .map(PathBuf::from),
            stop_grace: Duration::from_millis(
                fc.voice.stop_grace_ms.unwrap_or(DEFAULT_STOP_GRACE_MS),
            ),
        };

        let stt = SttConfig {
            base_url: env("REMO_WHISPER_URL")
                .or_else(|| fc.stt.base_url.clone())
                .unwrap_or_else(|| "https://api.openai.com/v1".to_string()),
            model: env("REMO_WHISPER_MODEL")
                .or_else(|| fc.stt.model.clone())
                .unwrap_or_else(|| "whisper-1".to_string()),
            api_key: env("REMO_WHISPER_API_KEY")
                .or_else(|| fc.stt.api_key.clone())
                .or_else(|| env("OPENAI_API_KEY"))
                .map(SecretString::from),
            language: fc.stt.language.clone(),
        };

        let port = match env("REMO_PORT") {
            Some(v) => parse_number("REMO_PORT", &v)?,
            None => fc.server.port.unwrap_or(8000),
        };

        let persona_store = env("REMO_PERSONA_STORE")
            .or_else(|| fc.personas.store.clone())
            .map_or_else(|| data_dir().join("personas.yaml"), PathBuf::from);

        Ok(Self {
            llm,
            voice,
            stt,
            api_server: ApiServerConfig { port },
            persona_store,
        })
    }
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(crate::Error::Config(format!(
            "{key} must be a boolean, got {other:?}"
        ))),
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| crate::Error::Config(format!("{key} must be a number, got {value:?}")))
}
