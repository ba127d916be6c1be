//! HTTP control surface (axum)
//!
//! `GET /api/status` reports the engine state; `POST /api/set-state`
//! submits the time the clock face shows, when editing is enabled.

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};

use stepclock_core::{MinuteOfDay, StepClockError};

use crate::{ControlHandle, EngineStatus};

/// Shared handler state
#[derive(Clone, Debug)]
pub struct ApiState {
    handle: ControlHandle,
    web_edit: bool,
}

impl ApiState {
    pub fn new(handle: ControlHandle, web_edit: bool) -> Self {
        ApiState { handle, web_edit }
    }
}

/// `GET /api/status` body
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusReport {
    pub mode: String,
    pub clock_time: String,
    pub authoritative_time: String,
    pub state: String,
    pub remaining: u16,
    pub alert: Option<String>,
    pub hardware_available: bool,
    pub web_edit: bool,
}

impl StatusReport {
    pub fn new(status: &EngineStatus, web_edit: bool) -> Self {
        StatusReport {
            mode: status.mode.to_string(),
            clock_time: status.persisted.to_string(),
            authoritative_time: status.authoritative.to_string(),
            state: status.state.to_string(),
            remaining: status.remaining,
            alert: status.alert.as_ref().map(ToString::to_string),
            hardware_available: status.hardware_available,
            web_edit,
        }
    }
}

/// `POST /api/set-state` body
#[derive(Clone, Debug, Deserialize)]
pub struct SetStateRequest {
    pub clock_time: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetStateResponse {
    pub outcome: String,
    pub pulses: u16,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

/// Handler error mapped to a status code
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn forbidden() -> Self {
        ApiError {
            status: StatusCode::FORBIDDEN,
            message: "clock editing is disabled".into(),
        }
    }
}

impl From<StepClockError> for ApiError {
    fn from(err: StepClockError) -> Self {
        let status = match err {
            StepClockError::InvalidClockTime(_) => StatusCode::BAD_REQUEST,
            StepClockError::ControlUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            _ if err.requires_operator() => StatusCode::CONFLICT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        ApiError {
            status,
            message: err.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(ErrorBody {
                error: self.message,
            }),
        )
            .into_response()
    }
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/api/status", get(get_status))
        .route("/api/set-state", post(set_state))
        .with_state(state)
}

/// Serve the control surface until the listener fails
pub async fn serve(listener: tokio::net::TcpListener, state: ApiState) -> std::io::Result<()> {
    if let Ok(addr) = listener.local_addr() {
        tracing::info!(%addr, "http control surface listening");
    }
    axum::serve(listener, router(state)).await
}

pub async fn get_status(State(state): State<ApiState>) -> Result<Json<StatusReport>, ApiError> {
    let status = state.handle.status().await?;
    Ok(Json(StatusReport::new(&status, state.web_edit)))
}

pub async fn set_state(
    State(state): State<ApiState>,
    Json(req): Json<SetStateRequest>,
) -> Result<Json<SetStateResponse>, ApiError> {
    if !state.web_edit {
        tracing::warn!(clock_time = %req.clock_time, "set-state refused, editing disabled");
        return Err(ApiError::forbidden());
    }
    let minute: MinuteOfDay = req.clock_time.parse()?;
    match state.handle.set_clock(minute).await {
        Ok(outcome) => Ok(Json(SetStateResponse {
            outcome: outcome.to_string(),
            pulses: outcome.pulses(),
        })),
        Err(e) => {
            tracing::warn!(error = %e, "set-state rejected");
            Err(e.into())
        }
    }
}
