//! Axum Handlers for the REST API
//!
//! This module contains the logic for handling HTTP requests for call
//! management and room events. It uses `utoipa` doc comments to generate
//! OpenAPI documentation.

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{error, info, warn};
use triage_core::{AgentKind, CallStatus, CallSummary, RegistryError};
use uuid::Uuid;

use crate::{
    models::{
        AgentInfo, CreateCallPayload, CreateCallResponse, ErrorResponse, HealthResponse,
        MetricsResponse, RoomWebhookPayload, ServiceInfo, WebhookResponse,
    },
    state::AppState,
};

pub enum ApiError {
    BadRequest(String),
    Registry(RegistryError),
    InternalServerError(anyhow::Error),
}

fn registry_status(err: &RegistryError) -> StatusCode {
    match err {
        RegistryError::NotFound(_) => StatusCode::NOT_FOUND,
        RegistryError::AlreadyEnded(_) => StatusCode::CONFLICT,
        RegistryError::CapacityExceeded { .. } => StatusCode::SERVICE_UNAVAILABLE,
        RegistryError::InvalidTransition { .. } => StatusCode::UNPROCESSABLE_ENTITY,
        RegistryError::UpstreamAdapterFailure { .. } => StatusCode::BAD_GATEWAY,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::BadRequest(message) => {
                (StatusCode::BAD_REQUEST, Json(ErrorResponse { message })).into_response()
            }
            ApiError::Registry(err) => {
                let status = registry_status(&err);
                if status.is_server_error() {
                    error!(error = %err, "Call operation failed");
                } else {
                    warn!(error = %err, "Call operation rejected");
                }
                let message = err.to_string();
                (status, Json(ErrorResponse { message })).into_response()
            }
            ApiError::InternalServerError(err) => {
                error!("Internal Server Error: {:?}", err);
                let message = "An internal server error occurred.".to_string();
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(ErrorResponse { message }),
                )
                    .into_response()
            }
        }
    }
}

impl From<RegistryError> for ApiError {
    fn from(err: RegistryError) -> Self {
        Self::Registry(err)
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        Self::InternalServerError(err)
    }
}

/// Service information.
#[utoipa::path(
    get,
    path = "/",
    responses((status = 200, description = "Service information", body = ServiceInfo))
)]
pub async fn root() -> Json<ServiceInfo> {
    Json(ServiceInfo {
        service: "Medical Office Triage".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        status: "running".to_string(),
        agents: AgentKind::ALL.to_vec(),
    })
}

/// Liveness check with registry counters.
#[utoipa::path(
    get,
    path = "/health",
    responses((status = 200, description = "Service is healthy", body = HealthResponse))
)]
pub async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        calls: state.registry.stats(),
        pipelines_connected: state.hub.connected(),
    })
}

/// Registry counters and the distribution of live calls over agents.
#[utoipa::path(
    get,
    path = "/metrics",
    responses((status = 200, description = "Call metrics", body = MetricsResponse))
)]
pub async fn metrics(State(state): State<Arc<AppState>>) -> Json<MetricsResponse> {
    let mut calls_by_agent: BTreeMap<String, usize> = AgentKind::ALL
        .iter()
        .map(|kind| (kind.to_string(), 0))
        .collect();
    for call in state
        .registry
        .list()
        .into_iter()
        .filter(|call| call.status != CallStatus::Ended)
    {
        *calls_by_agent.entry(call.agent.to_string()).or_default() += 1;
    }

    Json(MetricsResponse {
        calls: state.registry.stats(),
        calls_by_agent,
        pipelines_connected: state.hub.connected(),
        max_concurrent_calls: state.registry.config().max_concurrent_calls,
    })
}

/// List the agents a call can be routed between.
#[utoipa::path(
    get,
    path = "/agents",
    responses((status = 200, description = "Agent catalog", body = [AgentInfo]))
)]
pub async fn list_agents(State(state): State<Arc<AppState>>) -> Json<Vec<AgentInfo>> {
    Json(
        state
            .registry
            .catalog()
            .iter()
            .map(|agent| AgentInfo::from(agent.as_ref()))
            .collect(),
    )
}

/// Start a new call. The call is owned by the triage agent.
#[utoipa::path(
    post,
    path = "/calls",
    request_body(content = CreateCallPayload, description = "Optional; an empty body starts an anonymous call"),
    responses(
        (status = 201, description = "Call created successfully", body = CreateCallResponse),
        (status = 400, description = "Bad request", body = ErrorResponse),
        (status = 503, description = "Too many concurrent calls", body = ErrorResponse)
    )
)]
pub async fn create_call(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<impl IntoResponse, ApiError> {
    let payload = if body.iter().all(u8::is_ascii_whitespace) {
        CreateCallPayload::default()
    } else {
        serde_json::from_slice::<CreateCallPayload>(&body)
            .map_err(|e| ApiError::BadRequest(format!("Invalid call request: {}", e)))?
    };

    let call = state
        .registry
        .create_with_metadata(payload.patient_name, payload.metadata.unwrap_or_default())?;
    Ok((StatusCode::CREATED, Json(CreateCallResponse::from(call))))
}

/// List all calls still held by the registry.
#[utoipa::path(
    get,
    path = "/calls",
    responses((status = 200, description = "List of calls", body = [CallSummary]))
)]
pub async fn list_calls(State(state): State<Arc<AppState>>) -> Json<Vec<CallSummary>> {
    Json(state.registry.list())
}

/// Get a specific call by its ID.
#[utoipa::path(
    get,
    path = "/calls/{id}",
    responses(
        (status = 200, description = "Call details", body = CallSummary),
        (status = 404, description = "Call not found", body = ErrorResponse)
    ),
    params(("id" = Uuid, Path, description = "Call ID"))
)]
pub async fn get_call(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<CallSummary>, ApiError> {
    Ok(Json(state.registry.get(id)?))
}

/// End a call.
#[utoipa::path(
    post,
    path = "/calls/{id}/end",
    responses(
        (status = 200, description = "Call ended", body = CallSummary),
        (status = 404, description = "Call not found", body = ErrorResponse),
        (status = 409, description = "Call already ended", body = ErrorResponse),
        (status = 502, description = "Call ended but the voice pipeline failed to tear down", body = ErrorResponse)
    ),
    params(("id" = Uuid, Path, description = "Call ID"))
)]
pub async fn end_call(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<CallSummary>, ApiError> {
    Ok(Json(state.registry.end(id)?))
}

/// Receive a room lifecycle event from the media server.
///
/// Events for unknown rooms, for calls that have already ended, and event
/// types this service does not act on are accepted and ignored.
#[utoipa::path(
    post,
    path = "/rooms/webhook",
    request_body = RoomWebhookPayload,
    responses(
        (status = 200, description = "Event accepted", body = WebhookResponse),
        (status = 400, description = "Bad request", body = ErrorResponse)
    )
)]
pub async fn room_webhook(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<RoomWebhookPayload>,
) -> Result<Json<WebhookResponse>, ApiError> {
    let Some(call_id) = state.registry.find_by_room(&payload.room.name) else {
        info!(room = %payload.room.name, event = %payload.event, "Ignoring event for unknown room");
        return Ok(Json(WebhookResponse {
            handled: false,
            call_id: None,
        }));
    };

    let result = match payload.event.as_str() {
        "room_started" => state.registry.mark_active(call_id).map(|_| true),
        "participant_joined" => state.registry.mark_active(call_id).and_then(|_| {
            match &payload.participant {
                Some(participant) => state
                    .registry
                    .record_participant(call_id, &participant.identity)
                    .map(|_| true),
                None => Ok(true),
            }
        }),
        "room_finished" => state.registry.end(call_id).map(|_| true),
        other => {
            info!(call_id = %call_id, event = %other, "Ignoring room event");
            Ok(false)
        }
    };

    let handled = match result {
        Ok(handled) => handled,
        Err(RegistryError::AlreadyEnded(_)) => {
            info!(call_id = %call_id, event = %payload.event, "Ignoring event for ended call");
            false
        }
        Err(err) => return Err(err.into()),
    };

    Ok(Json(WebhookResponse {
        handled,
        call_id: Some(call_id),
    }))
}
