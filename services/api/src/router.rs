//! Axum Router Configuration
//!
//! This module defines the complete HTTP routing for the application,
//! including the REST API, WebSocket endpoint, and OpenAPI documentation.

use crate::{
    handlers,
    models::{ErrorResponse, NormalizeReplyPayload, NormalizedReply},
    state::AppState,
    ws::ws_handler,
};

use axum::{
    Router,
    routing::{get, post},
};
use std::sync::Arc;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::health,
        handlers::normalize_reply,
    ),
    components(
        schemas(NormalizeReplyPayload, NormalizedReply, ErrorResponse)
    ),
    tags(
        (name = "Tutor Relay API", description = "Reply normalization for the tutoring relay. Sessions run over the /ws WebSocket.")
    )
)]
pub struct ApiDoc;

/// Creates the main Axum router for the application.
pub fn create_router(app_state: Arc<AppState>) -> Router {
    // Only the WebSocket needs the shared state.
    let ws_router = Router::new()
        .route("/ws", get(ws_handler))
        .with_state(app_state);

    Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .route("/", get(handlers::health))
        .route("/replies/normalize", post(handlers::normalize_reply))
        .merge(ws_router)
}
