//! Routes signals from the conversation pipeline through the handoff
//! protocol and into the registry.

use crate::context::ContextUpdate;
use crate::error::RegistryError;
use crate::handoff::{ContextEffect, Next, RoutingSignal, decide};
use crate::registry::CallRegistry;
use crate::session::{CallStatus, CallSummary};
use crate::agent::AgentKind;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

/// What happened to a call after a signal was routed.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RouteOutcome {
    Stayed { call: CallSummary },
    HandedOff { from: AgentKind, call: CallSummary },
    Ended { call: CallSummary },
}

impl RouteOutcome {
    pub fn call(&self) -> &CallSummary {
        match self {
            RouteOutcome::Stayed { call }
            | RouteOutcome::HandedOff { call, .. }
            | RouteOutcome::Ended { call } => call,
        }
    }
}

/// Connects the stateless [`decide`] function to the registry.
///
/// The decision is taken on a snapshot of the call. The registry re-checks
/// the transition against the agent that owns the call at the moment of
/// the swap, so a decision that raced with another handoff is rejected
/// rather than applied to the wrong agent.
///
/// A `resolved` or `end` decision ends the call here; an explicit end
/// request arriving afterwards sees `AlreadyEnded`.
#[derive(Clone)]
pub struct SignalRouter {
    registry: Arc<CallRegistry>,
}

impl SignalRouter {
    pub fn new(registry: Arc<CallRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<CallRegistry> {
        &self.registry
    }

    pub fn submit(
        &self,
        call_id: Uuid,
        signal: &RoutingSignal,
    ) -> Result<RouteOutcome, RegistryError> {
        let snapshot = self.registry.get(call_id)?;
        if snapshot.status == CallStatus::Ended {
            return Err(RegistryError::AlreadyEnded(call_id));
        }

        let transition = decide(snapshot.agent, &snapshot.context, signal);
        debug!(call_id = %call_id, ?signal, ?transition, "Routing decision");

        let mut call = snapshot;
        if let Some(ContextEffect::SetUrgency(urgency)) = transition.effect {
            call = self
                .registry
                .update_context(call_id, ContextUpdate::urgency(urgency))?;
            info!(call_id = %call_id, urgency = %urgency, "Urgency escalated");
        }

        match transition.next {
            Next::Stay => Ok(RouteOutcome::Stayed { call }),
            Next::Agent(target) => {
                let from = call.agent;
                let call = self.registry.apply_handoff(call_id, target)?;
                Ok(RouteOutcome::HandedOff { from, call })
            }
            Next::End => {
                let call = self.registry.end(call_id)?;
                Ok(RouteOutcome::Ended { call })
            }
        }
    }
}
