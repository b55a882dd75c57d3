//! Error responses shared by the API routers

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;

use crate::Error;

/// API errors
#[derive(Debug)]
pub enum ApiError {
    /// Malformed request the handler rejected before doing any work
    BadRequest(String),
    /// A library error raised while serving the request
    Service(Error),
}

impl From<Error> for ApiError {
    fn from(e: Error) -> Self {
        Self::Service(e)
    }
}

impl ApiError {
    fn parts(&self) -> (StatusCode, &'static str) {
        let Self::Service(e) = self else {
            return (StatusCode::BAD_REQUEST, "bad_request");
        };
        match e {
            Error::EmptyInput => (StatusCode::BAD_REQUEST, "empty_input"),
            Error::UnknownPersona(_) => (StatusCode::NOT_FOUND, "unknown_persona"),
            Error::Audio(_) => (StatusCode::BAD_REQUEST, "invalid_audio"),
            Error::RemoteUnavailable(_) => (StatusCode::BAD_GATEWAY, "remote_unavailable"),
            Error::RemoteProtocol { .. } => (StatusCode::BAD_GATEWAY, "remote_protocol"),
            Error::RemoteTimeout(_) => (StatusCode::GATEWAY_TIMEOUT, "remote_timeout"),
            Error::Stt(_) => (StatusCode::BAD_GATEWAY, "transcription_failed"),
            Error::SynthesisUnavailable => (StatusCode::SERVICE_UNAVAILABLE, "synthesis_unavailable"),
            Error::SynthesisFailed(_) => (StatusCode::INTERNAL_SERVER_ERROR, "synthesis_failed"),
            _ => (StatusCode::INTERNAL_SERVER_ERROR, "internal"),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        #[derive(Serialize)]
        struct ErrorResponse {
            error: ErrorBody,
        }

        #[derive(Serialize)]
        struct ErrorBody {
            code: &'static str,
            message: String,
        }

        let (status, code) = self.parts();
        let message = match self {
            Self::BadRequest(msg) => msg,
            Self::Service(e) => e.to_string(),
        };
        if status.is_server_error() {
            tracing::warn!(status = %status, code, message = %message, "request failed");
        }

        (status, Json(ErrorResponse { error: ErrorBody { code, message } })).into_response()
    }
}
