//! Axum Handlers for the REST API
//!
//! This module contains the plain HTTP endpoints served next to the WebSocket.
//! It uses `utoipa` doc comments to generate OpenAPI documentation.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use tracing::debug;
use tutor_core::normalizer::{DecodeMode, normalize};

use crate::models::{ErrorResponse, NormalizeReplyPayload, NormalizedReply};

pub enum ApiError {
    BadRequest(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::BadRequest(message) => {
                (StatusCode::BAD_REQUEST, Json(ErrorResponse { message })).into_response()
            }
        }
    }
}

/// Liveness check.
#[utoipa::path(
    get,
    path = "/",
    responses(
        (status = 200, description = "The server is up", body = String, content_type = "text/plain")
    )
)]
pub async fn health() -> &'static str {
    "WebSocket server"
}

/// Normalize raw language-model output into a reply.
///
/// Unlike the WebSocket path, a YAML document without a `type` key is
/// accepted here as a `text` reply.
#[utoipa::path(
    post,
    path = "/replies/normalize",
    request_body = NormalizeReplyPayload,
    responses(
        (status = 200, description = "Normalized reply", body = NormalizedReply),
        (status = 400, description = "Bad request", body = ErrorResponse)
    )
)]
pub async fn normalize_reply(
    Json(payload): Json<NormalizeReplyPayload>,
) -> Result<Json<NormalizedReply>, ApiError> {
    if payload.text.trim().is_empty() {
        return Err(ApiError::BadRequest("text must not be empty".to_string()));
    }
    let envelope = normalize(&payload.text, DecodeMode::Lenient);
    debug!(kind = envelope.kind.as_str(), "Normalized reply over REST");
    Ok(Json(envelope.into()))
}
