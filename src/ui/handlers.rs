//! HTTP API handlers

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use std::sync::Arc;
use uuid::Uuid;

use crate::session::{RegistryStatus, SessionSnapshot};
use crate::ui::server::AppState;

/// API response wrapper
#[derive(serde::Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(msg: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(msg.into()),
        }
    }
}

/// System status
#[derive(serde::Serialize)]
pub struct SystemStatus {
    pub mode: String,
    pub uptime_seconds: u64,
    #[serde(flatten)]
    pub registry: RegistryStatus,
}

/// Get system status
pub async fn get_status(State(state): State<Arc<AppState>>) -> Json<ApiResponse<SystemStatus>> {
    let status = SystemStatus {
        mode: state.mode.clone(),
        uptime_seconds: state.started_at.elapsed().as_secs(),
        registry: state.registry.status(),
    };

    Json(ApiResponse::ok(status))
}

/// Get every live session
pub async fn list_sessions(State(state): State<Arc<AppState>>) -> Json<ApiResponse<Vec<SessionSnapshot>>> {
    Json(ApiResponse::ok(state.registry.snapshots()))
}

/// Get one session
pub async fn get_session(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> (StatusCode, Json<ApiResponse<SessionSnapshot>>) {
    match state.registry.get(&id) {
        Some(session) => (StatusCode::OK, Json(ApiResponse::ok(session.snapshot()))),
        None => (
            StatusCode::NOT_FOUND,
            Json(ApiResponse::error(format!("Session {} not found", id))),
        ),
    }
}
