//! Call Session aggregate
//!
//! A `CallSession` binds a call identifier and its room to a lifecycle
//! status, the agent that currently owns the conversation, and the caller
//! context. Sessions are only constructed and mutated by the registry; the
//! rest of the system sees [`CallSummary`] snapshots.

use crate::agent::{AgentDefinition, AgentKind};
use crate::context::{ContextUpdate, SessionContext};
use crate::error::RegistryError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use utoipa::ToSchema;
use uuid::Uuid;

/// Lifecycle of a call. Transitions only move forward:
/// `Created -> Active -> Ended` (or straight from `Created` to `Ended`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum CallStatus {
    Created,
    Active,
    Ended,
}

impl fmt::Display for CallStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CallStatus::Created => write!(f, "created"),
            CallStatus::Active => write!(f, "active"),
            CallStatus::Ended => write!(f, "ended"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Participant {
    #[schema(example = "patient-1234")]
    pub identity: String,
    pub joined_at: DateTime<Utc>,
}

/// Room names are derived from the call id, so they are unique whenever
/// call ids are.
pub fn room_name_for(call_id: Uuid) -> String {
    format!("medical-{}", call_id.simple())
}

/// A point-in-time snapshot of a call session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct CallSummary {
    #[schema(value_type = String, format = Uuid)]
    pub call_id: Uuid,
    #[schema(example = "medical-550e8400e29b41d4a716446655440000")]
    pub room_name: String,
    #[schema(value_type = String, example = "created")]
    pub status: CallStatus,
    #[schema(value_type = String, example = "triage")]
    pub agent: AgentKind,
    pub context: SessionContext,
    pub metadata: BTreeMap<String, String>,
    pub participants: Vec<Participant>,
    pub handoff_count: u32,
    pub created_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub last_activity_at: DateTime<Utc>,
}

#[derive(Debug)]
pub struct CallSession {
    call_id: Uuid,
    room_name: String,
    status: CallStatus,
    current_agent: Arc<AgentDefinition>,
    context: SessionContext,
    metadata: BTreeMap<String, String>,
    participants: Vec<Participant>,
    handoff_count: u32,
    created_at: DateTime<Utc>,
    ended_at: Option<DateTime<Utc>>,
    last_activity_at: DateTime<Utc>,
}

impl CallSession {
    pub(crate) fn new(
        call_id: Uuid,
        initial_agent: Arc<AgentDefinition>,
        patient_name: Option<String>,
        metadata: BTreeMap<String, String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            call_id,
            room_name: room_name_for(call_id),
            status: CallStatus::Created,
            current_agent: initial_agent,
            context: SessionContext::new(patient_name),
            metadata,
            participants: Vec::new(),
            handoff_count: 0,
            created_at: now,
            ended_at: None,
            last_activity_at: now,
        }
    }

    pub fn call_id(&self) -> Uuid {
        self.call_id
    }

    pub fn room_name(&self) -> &str {
        &self.room_name
    }

    pub fn status(&self) -> CallStatus {
        self.status
    }

    pub fn current_agent(&self) -> &Arc<AgentDefinition> {
        &self.current_agent
    }

    pub fn context(&self) -> &SessionContext {
        &self.context
    }

    pub fn ended_at(&self) -> Option<DateTime<Utc>> {
        self.ended_at
    }

    pub fn is_ended(&self) -> bool {
        self.status == CallStatus::Ended
    }

    fn ensure_open(&self) -> Result<(), RegistryError> {
        if self.is_ended() {
            Err(RegistryError::AlreadyEnded(self.call_id))
        } else {
            Ok(())
        }
    }

    /// Moves `Created` to `Active`. Returns `false` when the call was
    /// already active.
    pub(crate) fn activate(&mut self, now: DateTime<Utc>) -> Result<bool, RegistryError> {
        self.ensure_open()?;
        self.last_activity_at = now;
        if self.status == CallStatus::Active {
            return Ok(false);
        }
        self.status = CallStatus::Active;
        Ok(true)
    }

    pub(crate) fn end(&mut self, now: DateTime<Utc>) -> Result<(), RegistryError> {
        self.ensure_open()?;
        self.status = CallStatus::Ended;
        self.ended_at = Some(now);
        self.last_activity_at = now;
        Ok(())
    }

    /// Swaps the owning agent. The target must be one the current agent is
    /// permitted to hand off to; the context is left as it is apart from
    /// recording the new department.
    pub(crate) fn hand_off(
        &mut self,
        next: Arc<AgentDefinition>,
        now: DateTime<Utc>,
    ) -> Result<(), RegistryError> {
        self.ensure_open()?;
        if !self.current_agent.can_transfer_to(next.kind) {
            return Err(RegistryError::InvalidTransition {
                call_id: self.call_id,
                from: self.current_agent.kind,
                to: next.kind,
            });
        }
        self.context.department = Some(next.kind);
        self.current_agent = next;
        self.handoff_count += 1;
        self.last_activity_at = now;
        Ok(())
    }

    pub(crate) fn update_context(
        &mut self,
        update: ContextUpdate,
        now: DateTime<Utc>,
    ) -> Result<(), RegistryError> {
        self.ensure_open()?;
        self.context.apply(update);
        self.last_activity_at = now;
        Ok(())
    }

    pub(crate) fn add_participant(
        &mut self,
        identity: &str,
        now: DateTime<Utc>,
    ) -> Result<(), RegistryError> {
        self.ensure_open()?;
        if !self.participants.iter().any(|p| p.identity == identity) {
            self.participants.push(Participant {
                identity: identity.to_string(),
                joined_at: now,
            });
        }
        self.last_activity_at = now;
        Ok(())
    }

    pub fn summary(&self) -> CallSummary {
        CallSummary {
            call_id: self.call_id,
            room_name: self.room_name.clone(),
            status: self.status,
            agent: self.current_agent.kind,
            context: self.context.clone(),
            metadata: self.metadata.clone(),
            participants: self.participants.clone(),
            handoff_count: self.handoff_count,
            created_at: self.created_at,
            ended_at: self.ended_at,
            last_activity_at: self.last_activity_at,
        }
    }
}
