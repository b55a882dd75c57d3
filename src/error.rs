//! Error types for Remo gateway

use thiserror::Error;

/// Result type alias for Remo operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in Remo gateway
#[derive(Debug, Error)]
pub enum Error {
    /// Empty or whitespace-only input
    #[error("input is empty")]
    EmptyInput,

    /// Model backend could not be reached
    #[error("model backend unavailable: {0}")]
    RemoteUnavailable(String),

    /// Model backend answered with a malformed or error-flagged payload
    #[error("model backend protocol error{}: {detail}", status_suffix(.status.as_ref()))]
    RemoteProtocol {
        /// HTTP status, when the failure came with one
        status: Option<u16>,
        /// What was wrong with the response
        detail: String,
    },

    /// No data from the model backend within the read bound
    #[error("model backend timed out after {0}s")]
    RemoteTimeout(u64),

    /// Persona id is not registered
    #[error("unknown persona: {0}")]
    UnknownPersona(String),

    /// No working speech backend
    #[error("speech synthesis unavailable")]
    SynthesisUnavailable,

    /// Speech backend was invoked but reported failure
    #[error("speech synthesis failed: {0}")]
    SynthesisFailed(String),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Audio format error
    #[error("audio error: {0}")]
    Audio(String),

    /// Speech-to-text error
    #[error("STT error: {0}")]
    Stt(String),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP error
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// YAML error
    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// TOML parsing error
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl Error {
    /// Build a protocol error from a response status and body
    ///
    /// The body is truncated so log lines and API errors stay readable.
    #[must_use]
    pub fn protocol(status: Option<u16>, body: &str) -> Self {
        Self::RemoteProtocol {
            status,
            detail: truncate(body, MAX_BODY_CHARS),
        }
    }

    /// Whether this error came from the caller's input rather than a backend
    #[must_use]
    pub const fn is_input_error(&self) -> bool {
        matches!(self, Self::EmptyInput | Self::UnknownPersona(_))
    }
}

fn status_suffix(status: Option<&u16>) -> String {
    status.map(|s| format!(" (status {s})")).unwrap_or_default()
}

/// Longest response body echoed into an error
const MAX_BODY_CHARS: usize = 200;

fn truncate(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((idx, _)) => format!("{}...", &s[..idx]),
        None => s.to_string(),
    }
}
