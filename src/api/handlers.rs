//! HTTP request handlers

use super::sse::relay_sse;
use super::types::ErrorResponse;
use super::AppState;
use crate::relay::{RelayError, RelayErrorKind};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};

/// Create the API router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Relay streaming
        .route("/api/sse/connect/", get(missing_session))
        .route("/api/sse/connect/:session_id", get(connect_relay))
        // Version
        .route("/version", get(get_version))
        .with_state(state)
}

// ============================================================
// Relay Streaming
// ============================================================

async fn connect_relay(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let frames = state.relay.open(&session_id)?;
    Ok(relay_sse(frames))
}

async fn missing_session() -> AppError {
    AppError::from(RelayError::invalid_argument("Invalid session id"))
}

async fn get_version() -> &'static str {
    concat!("scrud-relay ", env!("CARGO_PKG_VERSION"))
}

// ============================================================
// Error Handling
// ============================================================

#[derive(Debug)]
enum AppError {
    BadRequest(String),
    BadGateway(String),
    Internal(String),
}

impl From<RelayError> for AppError {
    fn from(e: RelayError) -> Self {
        match e.kind {
            RelayErrorKind::InvalidArgument => AppError::BadRequest(e.message),
            kind if kind.is_upstream() => AppError::BadGateway(e.message),
            _ => AppError::Internal(e.message),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::BadGateway(msg) => (StatusCode::BAD_GATEWAY, msg),
            AppError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };

        if status.is_server_error() {
            tracing::error!(status = %status, error = %message, "Request failed");
        } else {
            tracing::info!(status = %status, error = %message, "Request rejected");
        }

        let body = Json(ErrorResponse::new(message));
        (status, body).into_response()
    }
}
