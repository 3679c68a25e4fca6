//! REST handlers for session creation and inspection

use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use serde_json::json;

use super::ServerAppState;
use crate::agent_port::AgentError;
use crate::models::CreateSessionRequest;
use crate::registry::{RegistryError, SessionSummary};
use crate::session::SessionSnapshot;

const IDEMPOTENCY_HEADER: &str = "idempotency-key";

/// Registry errors rendered as `{"error": ...}` with a matching status
#[derive(Debug)]
pub struct ApiError(RegistryError);

impl From<RegistryError> for ApiError {
    fn from(error: RegistryError) -> Self {
        Self(error)
    }
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match &self.0 {
            RegistryError::NotFound(_) => StatusCode::NOT_FOUND,
            RegistryError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            RegistryError::Agent(AgentError::Configuration(_)) => StatusCode::BAD_REQUEST,
            RegistryError::Agent(_) => StatusCode::BAD_GATEWAY,
            RegistryError::ShuttingDown => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            log::warn!("[Api] {}", self.0);
        }
        (status, Json(json!({ "error": self.0.to_string() }))).into_response()
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSessionResponse {
    pub session_id: String,
    pub created: bool,
    /// Path of the session's realtime channel
    pub websocket_path: String,
}

/// POST /api/sessions
pub async fn create_session(
    State(state): State<ServerAppState>,
    headers: HeaderMap,
    Json(mut request): Json<CreateSessionRequest>,
) -> Result<(StatusCode, Json<CreateSessionResponse>), ApiError> {
    let header_key = headers
        .get(IDEMPOTENCY_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|key| !key.is_empty());
    if let Some(key) = header_key {
        request.idempotency_key = Some(key.to_string());
    }

    let created = state.registry.get_or_create(request).await?;
    let status = if created.created {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };

    Ok((
        status,
        Json(CreateSessionResponse {
            websocket_path: format!("/ws/sessions/{}", created.session_id),
            session_id: created.session_id,
            created: created.created,
        }),
    ))
}

/// GET /api/sessions
pub async fn list_sessions(State(state): State<ServerAppState>) -> Json<Vec<SessionSummary>> {
    Json(state.registry.list().await)
}

/// GET /api/sessions/:session_id
pub async fn get_session(
    State(state): State<ServerAppState>,
    Path(session_id): Path<String>,
) -> Result<Json<SessionSnapshot>, ApiError> {
    Ok(Json(state.registry.snapshot(&session_id).await?))
}

/// DELETE /api/sessions/:session_id
pub async fn delete_session(
    State(state): State<ServerAppState>,
    Path(session_id): Path<String>,
) -> Result<Json<SessionSnapshot>, ApiError> {
    Ok(Json(state.registry.dispose(&session_id).await?))
}
