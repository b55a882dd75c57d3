//! Text-to-speech endpoints

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::State,
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};

use super::chat::AckResponse;
use super::{ApiError, ApiState, mutate_catalog};
use crate::Error;
use crate::speech::SpeechStatus;
use crate::voice::VoiceInfo;

/// Build TTS router
pub fn router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/speak", post(speak))
        .route("/speak-async", post(speak_async))
        .route("/stop", post(stop))
        .route("/set-persona", post(set_persona))
        .route("/status", get(status))
        .route("/enable", post(enable))
        .route("/disable", post(disable))
        .route("/synthesize", post(synthesize))
        .route("/voices", get(voices))
        .with_state(state)
}

/// Speech request
#[derive(Debug, Deserialize)]
pub struct SpeakRequest {
    pub text: String,
    /// Persona whose voice to use; the active persona when absent
    #[serde(default)]
    pub persona: Option<String>,
    /// Wait until speech has finished
    #[serde(default)]
    pub blocking: bool,
}

#[derive(Debug, Serialize)]
pub struct SpeakResponse {
    pub success: bool,
    pub message: &'static str,
    pub persona: String,
    pub blocking: bool,
}

/// Reject requests that can't produce speech, naming the reason
fn check_speakable(state: &ApiState, request: &SpeakRequest) -> Result<String, ApiError> {
    if request.text.trim().is_empty() {
        return Err(Error::EmptyInput.into());
    }
    let persona = match &request.persona {
        Some(id) if state.catalog.get(id).is_none() => {
            return Err(Error::UnknownPersona(id.clone()).into());
        }
        Some(id) => id.clone(),
        None => state.catalog.active_id(),
    };

    let renderer = state.speech.renderer();
    if !renderer.is_available() {
        return Err(Error::SynthesisUnavailable.into());
    }
    if !renderer.is_enabled() {
        return Err(ApiError::BadRequest("speech output is disabled".to_string()));
    }
    Ok(persona)
}

async fn speak(
    State(state): State<Arc<ApiState>>,
    Json(request): Json<SpeakRequest>,
) -> Result<Json<SpeakResponse>, ApiError> {
    let persona = check_speakable(&state, &request)?;

    let spoken = state
        .speech
        .speak(&request.text, Some(&persona), request.blocking)
        .await;
    if !spoken {
        return Err(Error::SynthesisFailed("speech did not complete".to_string()).into());
    }

    Ok(Json(SpeakResponse {
        success: true,
        message: if request.blocking {
            "Speech finished"
        } else {
            "Speech started successfully"
        },
        persona,
        blocking: request.blocking,
    }))
}

async fn speak_async(
    State(state): State<Arc<ApiState>>,
    Json(request): Json<SpeakRequest>,
) -> Result<Json<SpeakResponse>, ApiError> {
    let persona = check_speakable(&state, &request)?;

    let callback_persona = persona.clone();
    let started = state.speech.speak_async(
        request.text,
        Some(&persona),
        Some(Box::new(move |success, _text, _| {
            tracing::debug!(persona = %callback_persona, success, "async speech request finished");
        })),
    );
    if !started {
        return Err(Error::SynthesisFailed("failed to start speech".to_string()).into());
    }

    Ok(Json(SpeakResponse {
        success: true,
        message: "Speech started asynchronously",
        persona,
        blocking: false,
    }))
}

async fn stop(State(state): State<Arc<ApiState>>) -> Json<AckResponse> {
    state.speech.stop().await;
    AckResponse::ok("Speech stopped")
}

#[derive(Debug, Deserialize)]
pub struct SetPersonaRequest {
    pub persona: String,
}

#[derive(Debug, Serialize)]
pub struct SetPersonaResponse {
    pub success: bool,
    pub message: String,
    pub persona: String,
}

/// Switch the active persona; its voice applies to later speech
async fn set_persona(
    State(state): State<Arc<ApiState>>,
    Json(request): Json<SetPersonaRequest>,
) -> Result<Json<SetPersonaResponse>, ApiError> {
    let id = request.persona.clone();
    if !mutate_catalog(&state.catalog, move |catalog| catalog.set_active(&id)).await? {
        return Err(Error::UnknownPersona(request.persona).into());
    }
    Ok(Json(SetPersonaResponse {
        success: true,
        message: format!("TTS voice set for persona '{}'", request.persona),
        persona: request.persona,
    }))
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub success: bool,
    pub status: SpeechStatus,
}

async fn status(State(state): State<Arc<ApiState>>) -> Json<StatusResponse> {
    Json(StatusResponse {
        success: true,
        status: state.speech.status().await,
    })
}

async fn enable(State(state): State<Arc<ApiState>>) -> Json<AckResponse> {
    state.speech.enable();
    AckResponse::ok("TTS enabled")
}

async fn disable(State(state): State<Arc<ApiState>>) -> Json<AckResponse> {
    state.speech.disable().await;
    AckResponse::ok("TTS disabled")
}

#[derive(Debug, Deserialize)]
pub struct SynthesizeRequest {
    pub text: String,
    #[serde(default)]
    pub persona: Option<String>,
}

/// Synthesize text to speech
///
/// Returns audio in WAV format
async fn synthesize(
    State(state): State<Arc<ApiState>>,
    Json(request): Json<SynthesizeRequest>,
) -> Result<Response, ApiError> {
    let audio = state
        .speech
        .synthesize_wav(&request.text, request.persona.as_deref())
        .await?;

    Ok((StatusCode::OK, [(header::CONTENT_TYPE, "audio/wav")], audio).into_response())
}

#[derive(Debug, Serialize)]
pub struct VoicesResponse {
    pub success: bool,
    pub voices: Vec<VoiceInfo>,
}

async fn voices(State(state): State<Arc<ApiState>>) -> Result<Json<VoicesResponse>, ApiError> {
    Ok(Json(VoicesResponse {
        success: true,
        voices: state.speech.voices().await?,
    }))
}
