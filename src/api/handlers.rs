//! HTTP request handlers

use super::types::{ErrorResponse, SuccessResponse, WebhookRequest};
use super::AppState;
use crate::agent::BotMessage;
use crate::error::EngineError;
use crate::tracker::TrackerSnapshot;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};

/// Create the API router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/webhooks/rest/webhook", post(receive_message))
        .route("/conversations/:id/tracker", get(get_tracker))
        .route("/conversations/:id/restart", post(restart_conversation))
        .route("/version", get(get_version))
        .with_state(state)
}

// ============================================================
// Messages
// ============================================================

async fn receive_message(
    State(state): State<AppState>,
    Json(req): Json<WebhookRequest>,
) -> Result<Json<Vec<BotMessage>>, AppError> {
    if req.sender.trim().is_empty() {
        return Err(AppError::BadRequest("sender must not be empty".to_string()));
    }
    let messages = state.agent.handle_text(&req.sender, &req.message).await?;
    Ok(Json(messages))
}

// ============================================================
// Conversations
// ============================================================

async fn get_tracker(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<TrackerSnapshot>, AppError> {
    Ok(Json(state.agent.tracker(&id).await?))
}

async fn restart_conversation(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<SuccessResponse>, AppError> {
    state.agent.restart(&id).await?;
    Ok(Json(SuccessResponse { success: true }))
}

async fn get_version() -> &'static str {
    concat!("dialogue-engine ", env!("CARGO_PKG_VERSION"))
}

// ============================================================
// Error Handling
// ============================================================

enum AppError {
    BadRequest(String),
    Internal(String),
    Unavailable(String),
}

impl From<EngineError> for AppError {
    fn from(err: EngineError) -> Self {
        tracing::error!(error = %err, "Turn failed");
        match err {
            EngineError::Store(e) => AppError::Unavailable(e.to_string()),
            other => AppError::Internal(other.to_string()),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
            AppError::Unavailable(msg) => (StatusCode::SERVICE_UNAVAILABLE, msg),
        };

        let body = Json(ErrorResponse::new(message));
        (status, body).into_response()
    }
}
