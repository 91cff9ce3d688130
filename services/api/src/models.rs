//! API Models
//!
//! Request and response bodies of the REST API, documented for OpenAPI
//! generation with `utoipa`. Call snapshots themselves are the core's
//! `CallSummary`.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use triage_core::{AgentDefinition, AgentKind, CallStatus, CallSummary, RegistryStats};
use utoipa::ToSchema;
use uuid::Uuid;

#[derive(Deserialize, ToSchema, Debug, Default)]
pub struct CreateCallPayload {
    #[schema(example = "John Doe")]
    #[serde(default)]
    pub patient_name: Option<String>,
    /// Free-form labels stored with the call (caller number, channel, ...).
    #[serde(default)]
    pub metadata: Option<BTreeMap<String, String>>,
}

#[derive(Serialize, Deserialize, ToSchema, Debug, Clone)]
pub struct CreateCallResponse {
    #[schema(value_type = String, format = Uuid)]
    pub call_id: Uuid,
    #[schema(example = "medical-550e8400e29b41d4a716446655440000")]
    pub room_name: String,
    #[schema(value_type = String, example = "created")]
    pub status: CallStatus,
}

impl From<CallSummary> for CreateCallResponse {
    fn from(call: CallSummary) -> Self {
        Self {
            call_id: call.call_id,
            room_name: call.room_name,
            status: call.status,
        }
    }
}

#[derive(Serialize, ToSchema)]
pub struct ErrorResponse {
    pub message: String,
}

#[derive(Serialize, Deserialize, ToSchema, Debug)]
pub struct ServiceInfo {
    #[schema(example = "Medical Office Triage")]
    pub service: String,
    pub version: String,
    #[schema(example = "running")]
    pub status: String,
    /// Agents a call can be routed between.
    #[schema(value_type = Vec<String>)]
    pub agents: Vec<AgentKind>,
}

#[derive(Serialize, Deserialize, ToSchema, Debug)]
pub struct HealthResponse {
    #[schema(example = "healthy")]
    pub status: String,
    pub calls: RegistryStats,
    /// Calls with a live pipeline connection.
    pub pipelines_connected: usize,
}

#[derive(Serialize, Deserialize, ToSchema, Debug)]
pub struct MetricsResponse {
    pub calls: RegistryStats,
    /// Live calls per owning agent.
    pub calls_by_agent: BTreeMap<String, usize>,
    pub pipelines_connected: usize,
    pub max_concurrent_calls: usize,
}

#[derive(Serialize, Deserialize, ToSchema, Debug, Clone)]
pub struct AgentInfo {
    #[schema(value_type = String, example = "triage")]
    pub kind: AgentKind,
    #[schema(example = "Medical Office Triage")]
    pub display_name: String,
    pub tools: Vec<String>,
    #[schema(value_type = Vec<String>)]
    pub allowed_targets: Vec<AgentKind>,
}

impl From<&AgentDefinition> for AgentInfo {
    fn from(agent: &AgentDefinition) -> Self {
        Self {
            kind: agent.kind,
            display_name: agent.display_name.clone(),
            tools: agent.tools.iter().cloned().collect(),
            allowed_targets: agent.allowed_targets.iter().copied().collect(),
        }
    }
}

#[derive(Deserialize, ToSchema, Debug, Clone)]
pub struct RoomInfo {
    #[schema(example = "medical-550e8400e29b41d4a716446655440000")]
    pub name: String,
}

#[derive(Deserialize, ToSchema, Debug, Clone)]
pub struct ParticipantInfo {
    #[schema(example = "caller-5551234")]
    pub identity: String,
}

/// A room lifecycle event from the media server.
#[derive(Deserialize, ToSchema, Debug, Clone)]
pub struct RoomWebhookPayload {
    #[schema(example = "participant_joined")]
    pub event: String,
    pub room: RoomInfo,
    #[serde(default)]
    pub participant: Option<ParticipantInfo>,
}

#[derive(Serialize, Deserialize, ToSchema, Debug, PartialEq)]
pub struct WebhookResponse {
    /// Whether the event changed a call.
    pub handled: bool,
    #[schema(value_type = Option<String>, format = Uuid)]
    pub call_id: Option<Uuid>,
}

/// Who spoke a line of the conversation transcript.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Ai,
}

impl fmt::Display for MessageRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageRole::User => write!(f, "user"),
            MessageRole::Ai => write!(f, "ai"),
        }
    }
}

/// One line of a call's conversation transcript.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub role: MessageRole,
    pub content: String,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: content.into(),
        }
    }

    pub fn ai(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Ai,
            content: content.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use triage_core::AgentCatalog;

    #[test]
    fn test_create_call_payload_fields_are_optional() {
        let payload: CreateCallPayload = serde_json::from_str("{}").unwrap();
        assert!(payload.patient_name.is_none());
        assert!(payload.metadata.is_none());

        let payload: CreateCallPayload = serde_json::from_str(
            r#"{"patient_name": "John Doe", "metadata": {"caller_number": "+15551234"}}"#,
        )
        .unwrap();
        assert_eq!(payload.patient_name.as_deref(), Some("John Doe"));
        assert_eq!(
            payload.metadata.unwrap().get("caller_number").map(String::as_str),
            Some("+15551234")
        );
    }

    #[test]
    fn test_create_call_response_uses_lowercase_status() {
        let response = CreateCallResponse {
            call_id: Uuid::nil(),
            room_name: "medical-0".to_string(),
            status: CallStatus::Created,
        };
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["status"], "created");
        assert_eq!(json["room_name"], "medical-0");
    }

    #[test]
    fn test_agent_info_from_definition() {
        let catalog = AgentCatalog::builtin();
        let info = AgentInfo::from(catalog.get(AgentKind::Billing).as_ref());
        assert_eq!(info.kind, AgentKind::Billing);
        assert_eq!(info.allowed_targets, vec![AgentKind::Triage, AgentKind::Support]);
        assert!(info.tools.contains(&"transfer_to_support".to_string()));
        assert!(info.tools.contains(&"transfer_to_triage".to_string()));
        assert!(!info.tools.contains(&"collect_patient_info".to_string()));
    }

    #[test]
    fn test_webhook_payload_without_participant() {
        let payload: RoomWebhookPayload =
            serde_json::from_str(r#"{"event": "room_finished", "room": {"name": "medical-abc"}}"#)
                .unwrap();
        assert_eq!(payload.event, "room_finished");
        assert_eq!(payload.room.name, "medical-abc");
        assert!(payload.participant.is_none());
    }
}
