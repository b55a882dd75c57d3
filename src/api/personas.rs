//! Persona listing and switching endpoints

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, State},
    routing::{get, post},
};
use serde::Serialize;

use super::chat::AckResponse;
use super::{ApiError, ApiState, mutate_catalog};
use crate::Error;
use crate::persona::{PersonaDefinition, PersonaDraft};

/// Build personas router
pub fn router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/personas", get(list_personas))
        .route("/personas/current", get(current_persona))
        .route(
            "/personas/{persona_id}",
            post(set_persona).put(add_persona).delete(remove_persona),
        )
        .with_state(state)
}

/// Response for listing all personas
#[derive(Debug, Serialize)]
pub struct PersonaListResponse {
    pub success: bool,
    /// Persona ids mapped to descriptions
    pub personas: BTreeMap<String, String>,
    pub current_persona: String,
}

async fn list_personas(State(state): State<Arc<ApiState>>) -> Json<PersonaListResponse> {
    Json(PersonaListResponse {
        success: true,
        personas: state.catalog.list(),
        current_persona: state.catalog.active_id(),
    })
}

#[derive(Debug, Serialize)]
pub struct CurrentPersonaResponse {
    pub success: bool,
    pub current_persona: String,
    pub persona_info: PersonaDefinition,
}

async fn current_persona(State(state): State<Arc<ApiState>>) -> Json<CurrentPersonaResponse> {
    let persona = state.catalog.active();
    Json(CurrentPersonaResponse {
        success: true,
        current_persona: persona.id.clone(),
        persona_info: persona,
    })
}

#[derive(Debug, Serialize)]
pub struct SetPersonaResponse {
    pub success: bool,
    pub message: String,
    pub current_persona: String,
}

/// Switch the active persona, which changes both prompt and voice
async fn set_persona(
    State(state): State<Arc<ApiState>>,
    Path(persona_id): Path<String>,
) -> Result<Json<SetPersonaResponse>, ApiError> {
    let id = persona_id.clone();
    if !mutate_catalog(&state.catalog, move |catalog| catalog.set_active(&id)).await? {
        return Err(Error::UnknownPersona(persona_id).into());
    }

    tracing::info!(persona_id = %persona_id, "persona activated");
    Ok(Json(SetPersonaResponse {
        success: true,
        message: format!("Persona changed to {persona_id}"),
        current_persona: persona_id,
    }))
}

/// Register a custom persona
async fn add_persona(
    State(state): State<Arc<ApiState>>,
    Path(persona_id): Path<String>,
    Json(draft): Json<PersonaDraft>,
) -> Result<Json<AckResponse>, ApiError> {
    let id = persona_id.clone();
    if !mutate_catalog(&state.catalog, move |catalog| catalog.add(&id, draft)).await? {
        return Err(ApiError::BadRequest(format!(
            "persona '{persona_id}' is incomplete or reserved"
        )));
    }
    Ok(AckResponse::ok(format!("Persona '{persona_id}' saved")))
}

/// Remove a custom persona
async fn remove_persona(
    State(state): State<Arc<ApiState>>,
    Path(persona_id): Path<String>,
) -> Result<Json<AckResponse>, ApiError> {
    let id = persona_id.clone();
    if !mutate_catalog(&state.catalog, move |catalog| catalog.remove(&id)).await? {
        return Err(ApiError::BadRequest(format!(
            "persona '{persona_id}' is built in or unknown"
        )));
    }
    Ok(AckResponse::ok(format!("Persona '{persona_id}' removed")))
}
