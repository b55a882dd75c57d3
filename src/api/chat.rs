//! Chat, history and transcription endpoints

use std::sync::Arc;

use axum::{
    Json, Router,
    body::Bytes,
    extract::{Query, State},
    http::{HeaderMap, header},
    routing::{get, post},
};
use base64::Engine;
use serde::{Deserialize, Serialize};

use super::{ApiError, ApiState};
use crate::chat::Message;

/// Build chat router
pub fn router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/chat", post(chat))
        .route("/history", get(history))
        .route("/clear-history", post(clear_history))
        .route("/transcribe", post(transcribe))
        .route("/transcribe-data", post(transcribe_data))
        .route("/speak-and-chat", post(speak_and_chat))
        .with_state(state)
}

/// Chat request
#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub message: String,
    /// Stream from the backend; defaults to the configured mode
    #[serde(default)]
    pub stream: Option<bool>,
}

/// Chat response
#[derive(Debug, Serialize)]
pub struct ChatResponse {
    pub success: bool,
    pub message: String,
    pub streamed: bool,
}

/// Send a message and return the full reply
///
/// A streamed reply is collected before responding. The reply is also
/// spoken in the background.
async fn chat(
    State(state): State<Arc<ApiState>>,
    Json(request): Json<ChatRequest>,
) -> Result<Json<ChatResponse>, ApiError> {
    let streamed = request
        .stream
        .unwrap_or_else(|| state.gateway.streams_by_default());

    let reply = state.gateway.send_and_speak(&request.message, streamed).await?;
    let message = reply.collect().await?;

    Ok(Json(ChatResponse {
        success: true,
        message,
        streamed,
    }))
}

#[derive(Debug, Serialize)]
pub struct HistoryResponse {
    pub success: bool,
    pub history: Vec<Message>,
}

async fn history(State(state): State<Arc<ApiState>>) -> Json<HistoryResponse> {
    Json(HistoryResponse {
        success: true,
        history: state.gateway.history().await,
    })
}

/// Simple acknowledgement
#[derive(Debug, Serialize)]
pub struct AckResponse {
    pub success: bool,
    pub message: String,
}

impl AckResponse {
    pub(crate) fn ok(message: impl Into<String>) -> Json<Self> {
        Json(Self {
            success: true,
            message: message.into(),
        })
    }
}

async fn clear_history(State(state): State<Arc<ApiState>>) -> Json<AckResponse> {
    state.gateway.clear_history().await;
    AckResponse::ok("History cleared")
}

/// Transcription response
#[derive(Debug, Serialize)]
pub struct TranscribeResponse {
    pub success: bool,
    pub text: String,
}

/// MIME type of a raw audio body; WAV when the header is absent
fn audio_type(headers: &HeaderMap) -> &str {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("audio/wav")
}

/// Transcribe a raw audio body
async fn transcribe(
    State(state): State<Arc<ApiState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<TranscribeResponse>, ApiError> {
    let text = state.transcriber.transcribe(&body, audio_type(&headers)).await?;
    Ok(Json(TranscribeResponse { success: true, text }))
}

/// Base64 transcription request
#[derive(Debug, Deserialize)]
pub struct TranscribeDataRequest {
    pub audio_data: String,
    #[serde(default = "default_mime")]
    pub mime_type: String,
}

fn default_mime() -> String {
    "audio/wav".to_string()
}

/// Transcribe base64-encoded audio
async fn transcribe_data(
    State(state): State<Arc<ApiState>>,
    Json(request): Json<TranscribeDataRequest>,
) -> Result<Json<TranscribeResponse>, ApiError> {
    let audio = base64::engine::general_purpose::STANDARD
        .decode(request.audio_data.trim())
        .map_err(|e| ApiError::BadRequest(format!("invalid base64 audio: {e}")))?;

    let text = state.transcriber.transcribe(&audio, &request.mime_type).await?;
    Ok(Json(TranscribeResponse { success: true, text }))
}

#[derive(Debug, Deserialize)]
pub struct StreamQuery {
    #[serde(default)]
    pub stream: Option<bool>,
}

#[derive(Debug, Serialize)]
pub struct SpeakAndChatResponse {
    pub success: bool,
    pub transcribed_text: String,
    pub llm_response: String,
    pub streamed: bool,
}

/// Transcribe audio, send the text as a chat message and speak the reply
async fn speak_and_chat(
    State(state): State<Arc<ApiState>>,
    Query(query): Query<StreamQuery>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<SpeakAndChatResponse>, ApiError> {
    let transcribed_text = state.transcriber.transcribe(&body, audio_type(&headers)).await?;
    if transcribed_text.is_empty() {
        return Err(ApiError::BadRequest("No speech detected in audio".to_string()));
    }

    let streamed = query
        .stream
        .unwrap_or_else(|| state.gateway.streams_by_default());
    let reply = state.gateway.send_and_speak(&transcribed_text, streamed).await?;
    let llm_response = reply.collect().await?;

    Ok(Json(SpeakAndChatResponse {
        success: true,
        transcribed_text,
        llm_response,
        streamed,
    }))
}
