//! Speech-to-text (STT) processing

use secrecy::{ExposeSecret, SecretString};

use super::audio;
use crate::config::SttConfig;
use crate::{Error, Result};

/// Response from a Whisper-compatible transcription API
#[derive(serde::Deserialize)]
struct WhisperResponse {
    text: String,
}

/// Transcribes speech to text through a Whisper-compatible endpoint
pub struct Transcriber {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<SecretString>,
    model: String,
    language: Option<String>,
}

impl Transcriber {
    /// Create a transcriber from configuration
    #[must_use]
    pub fn new(config: &SttConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config
                .api_key
                .as_ref()
                .map(|k| SecretString::from(k.expose_secret().to_string())),
            model: config.model.clone(),
            language: config.language.clone(),
        }
    }

    /// Model name sent with each request
    #[must_use]
    pub fn model(&self) -> &str {
        &self.model
    }

    /// Transcribe audio to text
    ///
    /// # Arguments
    ///
    /// * `audio` - encoded audio bytes
    /// * `mime` - MIME type of `audio` (e.g. `audio/wav`)
    ///
    /// # Errors
    ///
    /// `EmptyInput` for empty audio, `Audio` for unsupported or malformed
    /// audio, `Stt` if the endpoint rejects the request
    pub async fn transcribe(&self, audio: &[u8], mime: &str) -> Result<String> {
        if audio.is_empty() {
            return Err(Error::EmptyInput);
        }

        let extension = audio::extension_for(mime)
            .ok_or_else(|| Error::Audio(format!("unsupported audio type: {mime}")))?;
        if extension == "wav" {
            audio::validate_wav(audio)?;
        }

        tracing::debug!(audio_bytes = audio.len(), mime, "starting transcription");

        let part = reqwest::multipart::Part::bytes(audio.to_vec())
            .file_name(format!("audio.{extension}"))
            .mime_str(mime)
            .map_err(|e| Error::Stt(e.to_string()))?;
        let mut form = reqwest::multipart::Form::new()
            .part("file", part)
            .text("model", self.model.clone());
        if let Some(language) = &self.language {
            form = form.text("language", language.clone());
        }

        let url = format!("{}/audio/transcriptions", self.base_url);
        let mut request = self.client.post(&url).multipart(form);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key.expose_secret());
        }

        let response = request.send().await.map_err(|e| {
            tracing::error!(url = %url, error = %e, "transcription request failed");
            Error::Stt(format!("transcription request failed: {e}"))
        })?;

        let status = response.status();
        tracing::debug!(status = %status, "received response");

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(status = %status, body = %body, "transcription API error");
            return Err(Error::Stt(format!("transcription API error {status}: {body}")));
        }

        let result: WhisperResponse = response.json().await.map_err(|e| {
            tracing::error!(error = %e, "failed to parse response");
            e
        })?;

        let text = result.text.trim().to_string();
        tracing::info!(transcript = %text, "transcription complete");
        Ok(text)
    }
}
