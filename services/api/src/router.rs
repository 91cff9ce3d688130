//! Axum Router Configuration
//!
//! This module defines the complete HTTP routing for the application,
//! including the REST API, the room-event webhook, the WebSocket pipeline
//! endpoint, and OpenAPI documentation.

use crate::{
    handlers,
    models::{
        AgentInfo, CreateCallPayload, CreateCallResponse, ErrorResponse, HealthResponse,
        MetricsResponse, ParticipantInfo, RoomInfo, RoomWebhookPayload, ServiceInfo,
        WebhookResponse,
    },
    state::AppState,
    ws::ws_handler,
};

use axum::{
    Router,
    routing::{get, post},
};
use std::sync::Arc;
use triage_core::{
    CallStatus, CallSummary, ContextUpdate, RegistryStats, SessionContext, Urgency,
    context::DepartmentNote, session::Participant,
};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::root,
        handlers::health,
        handlers::metrics,
        handlers::list_agents,
        handlers::create_call,
        handlers::list_calls,
        handlers::get_call,
        handlers::end_call,
        handlers::room_webhook,
    ),
    components(
        schemas(
            CallSummary, CallStatus, SessionContext, ContextUpdate, DepartmentNote, Urgency,
            Participant, RegistryStats, CreateCallPayload, CreateCallResponse, ErrorResponse,
            ServiceInfo, HealthResponse, MetricsResponse, AgentInfo, RoomWebhookPayload,
            RoomInfo, ParticipantInfo, WebhookResponse
        )
    ),
    tags(
        (name = "Medical Triage API", description = "Call sessions and agent handoffs for the medical office voice line")
    )
)]
pub struct ApiDoc;

/// Creates the main Axum router for the application.
pub fn create_router(app_state: Arc<AppState>) -> Router {
    // Group all routes that require AppState into their own router.
    let api_router = Router::new()
        .route("/", get(handlers::root))
        .route("/health", get(handlers::health))
        .route("/metrics", get(handlers::metrics))
        .route("/agents", get(handlers::list_agents))
        .route(
            "/calls",
            get(handlers::list_calls).post(handlers::create_call),
        )
        .route("/calls/start", post(handlers::create_call))
        .route("/calls/{id}", get(handlers::get_call))
        .route("/calls/{id}/end", post(handlers::end_call))
        .route("/rooms/webhook", post(handlers::room_webhook))
        .route("/ws", get(ws_handler))
        // Apply the state ONLY to this group of routes.
        .with_state(app_state);

    // Create the final router that merges the stateful routes
    // with the stateless routes (like Swagger UI).
    Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .merge(api_router)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::test_state;
    use axum::body::{Body, to_bytes};
    use axum::http::{Request, StatusCode, header};
    use serde_json::{Value, json};
    use tower::ServiceExt;
    use uuid::Uuid;

    async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let mut request = Request::builder().method(method).uri(uri);
        let body = match body {
            Some(value) => {
                request = request.header(header::CONTENT_TYPE, "application/json");
                Body::from(value.to_string())
            }
            None => Body::empty(),
        };
        let response = app
            .clone()
            .oneshot(request.body(body).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    #[tokio::test]
    async fn test_create_get_and_end_call() {
        let app = create_router(test_state(10));

        let (status, created) = send(
            &app,
            "POST",
            "/calls",
            Some(json!({"patient_name": "John Doe", "metadata": {"caller_number": "+15551234"}})),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(created["status"], "created");
        let call_id = created["call_id"].as_str().unwrap().to_string();
        assert!(created["room_name"].as_str().unwrap().starts_with("medical-"));

        let (status, call) = send(&app, "GET", &format!("/calls/{call_id}"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(call["agent"], "triage");
        assert_eq!(call["context"]["patient_name"], "John Doe");
        assert_eq!(call["metadata"]["caller_number"], "+15551234");

        let (status, ended) = send(&app, "POST", &format!("/calls/{call_id}/end"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(ended["status"], "ended");
        assert!(ended["ended_at"].is_string());

        let (status, body) = send(&app, "POST", &format!("/calls/{call_id}/end"), None).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert!(body["message"].as_str().unwrap().contains("already ended"));
    }

    #[tokio::test]
    async fn test_start_alias_accepts_empty_body() {
        let app = create_router(test_state(10));
        let (status, created) = send(&app, "POST", "/calls/start", None).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(created["status"], "created");
    }

    #[tokio::test]
    async fn test_malformed_create_body_is_bad_request() {
        let app = create_router(test_state(10));
        let (status, _) = send(&app, "POST", "/calls", Some(json!({"patient_name": 42}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_unknown_call_is_not_found() {
        let app = create_router(test_state(10));
        let (status, body) = send(&app, "GET", &format!("/calls/{}", Uuid::new_v4()), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(body["message"].as_str().unwrap().contains("not found"));

        let (status, _) =
            send(&app, "POST", &format!("/calls/{}/end", Uuid::new_v4()), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_capacity_limit_is_service_unavailable() {
        let app = create_router(test_state(1));
        let (status, first) = send(&app, "POST", "/calls", None).await;
        assert_eq!(status, StatusCode::CREATED);

        let (status, _) = send(&app, "POST", "/calls", None).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);

        let call_id = first["call_id"].as_str().unwrap();
        send(&app, "POST", &format!("/calls/{call_id}/end"), None).await;
        let (status, _) = send(&app, "POST", "/calls", None).await;
        assert_eq!(status, StatusCode::CREATED);

        let (_, metrics) = send(&app, "GET", "/metrics", None).await;
        assert_eq!(metrics["calls"]["rejected"], 1);
        assert_eq!(metrics["calls"]["live"], 1);
        assert_eq!(metrics["calls_by_agent"]["triage"], 1);
        assert_eq!(metrics["max_concurrent_calls"], 1);
    }

    #[tokio::test]
    async fn test_room_webhook_drives_lifecycle() {
        let state = test_state(10);
        let app = create_router(state.clone());
        let call = state.registry.create(None).unwrap();

        let (status, body) = send(
            &app,
            "POST",
            "/rooms/webhook",
            Some(json!({
                "event": "participant_joined",
                "room": {"name": call.room_name},
                "participant": {"identity": "caller-5551234"}
            })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["handled"], true);
        let summary = state.registry.get(call.call_id).unwrap();
        assert_eq!(summary.status, CallStatus::Active);
        assert_eq!(summary.participants[0].identity, "caller-5551234");

        let finished = json!({"event": "room_finished", "room": {"name": call.room_name}});
        let (_, body) = send(&app, "POST", "/rooms/webhook", Some(finished.clone())).await;
        assert_eq!(body["handled"], true);
        assert_eq!(
            state.registry.get(call.call_id).unwrap().status,
            CallStatus::Ended
        );

        let (status, body) = send(&app, "POST", "/rooms/webhook", Some(finished)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["handled"], false);
    }

    #[tokio::test]
    async fn test_room_webhook_ignores_unknown_rooms_and_events() {
        let state = test_state(10);
        let app = create_router(state.clone());
        let call = state.registry.create(None).unwrap();

        let (status, body) = send(
            &app,
            "POST",
            "/rooms/webhook",
            Some(json!({"event": "room_started", "room": {"name": "lobby"}})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"handled": false, "call_id": null}));

        let (_, body) = send(
            &app,
            "POST",
            "/rooms/webhook",
            Some(json!({"event": "track_published", "room": {"name": call.room_name}})),
        )
        .await;
        assert_eq!(body["handled"], false);
        assert_eq!(
            state.registry.get(call.call_id).unwrap().status,
            CallStatus::Created
        );
    }

    #[tokio::test]
    async fn test_service_endpoints() {
        let app = create_router(test_state(10));

        let (status, info) = send(&app, "GET", "/", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(info["agents"], json!(["triage", "support", "billing"]));

        let (status, health) = send(&app, "GET", "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(health["status"], "healthy");
        assert_eq!(health["calls"]["live"], 0);

        let (status, agents) = send(&app, "GET", "/agents", None).await;
        assert_eq!(status, StatusCode::OK);
        let agents = agents.as_array().unwrap();
        assert_eq!(agents.len(), 3);
        assert_eq!(agents[0]["kind"], "triage");
        assert_eq!(agents[2]["allowed_targets"], json!(["triage", "support"]));
    }

    #[test]
    fn test_openapi_lists_call_routes() {
        let doc = ApiDoc::openapi();
        assert!(doc.paths.paths.contains_key("/calls"));
        assert!(doc.paths.paths.contains_key("/calls/{id}/end"));
        assert!(doc.paths.paths.contains_key("/rooms/webhook"));
    }
}
