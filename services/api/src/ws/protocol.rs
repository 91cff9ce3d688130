//! Defines the WebSocket message protocol between a voice pipeline and the API server.

use crate::{hub::PipelineEvent, models::AgentInfo};
use serde::{Deserialize, Serialize};
use triage_core::{AgentKind, CallSummary, ContextUpdate, Intent, RoutingSignal, Urgency};
use uuid::Uuid;

/// Messages sent from the pipeline to the server.
#[derive(Deserialize, Debug, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Binds the connection to a call. This must be the first message.
    Attach { call_id: Uuid },
    /// A routing hint: an explicit tool request or inferred intents.
    Signal {
        #[serde(default)]
        tool_transfer: Option<AgentKind>,
        #[serde(default)]
        end_requested: bool,
        #[serde(default)]
        intents: Vec<String>,
    },
    /// Caller details picked up by the pipeline.
    PatientInfo {
        #[serde(default)]
        patient_name: Option<String>,
        #[serde(default)]
        symptoms: Vec<String>,
        #[serde(default)]
        urgency: Option<String>,
    },
    /// A transcribed caller utterance for the current agent to answer.
    UserMessage { text: String },
    /// The caller hung up.
    Hangup,
}

impl ClientMessage {
    /// Builds the routing signal for a `signal` message.
    pub fn routing_signal(
        tool_transfer: Option<AgentKind>,
        end_requested: bool,
        intents: &[String],
    ) -> RoutingSignal {
        RoutingSignal {
            tool_transfer,
            end_requested,
            intents: intents.iter().map(|label| Intent::classify(label)).collect(),
        }
    }

    pub fn context_update(
        patient_name: Option<String>,
        symptoms: Vec<String>,
        urgency: Option<&str>,
    ) -> ContextUpdate {
        ContextUpdate {
            patient_name,
            symptoms,
            urgency: urgency.map(Urgency::from_label),
            department_note: None,
        }
    }
}

/// Messages sent from the server to the pipeline.
#[derive(Serialize, Debug, Clone)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Confirms the attachment and describes the agent to start with.
    Attached {
        call: CallSummary,
        agent: AgentInfo,
        instructions: String,
        greeting: String,
    },
    /// The call was handed to another agent; reconfigure the conversation.
    AgentChanged {
        kind: AgentKind,
        display_name: String,
        instructions: String,
        tools: Vec<String>,
        greeting: String,
    },
    /// The call changed without a handoff.
    CallUpdated { call: CallSummary },
    /// The current agent's reply to a user message.
    Response { text: String },
    /// The call is over; the connection will close.
    Ended { call_id: Uuid },
    /// Reports an error for the last message.
    Error { message: String },
}

impl ServerMessage {
    /// Translates a hub event. `Teardown` has no payload and maps to `Ended`.
    pub fn from_event(call_id: Uuid, event: PipelineEvent) -> Self {
        match event {
            PipelineEvent::AgentChanged {
                kind,
                display_name,
                instructions,
                tools,
                greeting,
            } => ServerMessage::AgentChanged {
                kind,
                display_name,
                instructions,
                tools: tools.into_iter().collect(),
                greeting,
            },
            PipelineEvent::Teardown => ServerMessage::Ended { call_id },
        }
    }
}
