//! Pipeline Connection Hub
//!
//! Tracks which calls have a live pipeline connection and forwards the
//! registry's outbound notifications to them. Every notification is a
//! non-blocking `try_send`, so the registry never waits on a slow socket.
//! A connection whose queue is full has fallen behind and is dropped.

use std::collections::{BTreeSet, HashMap};
use std::sync::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use triage_core::{
    AgentDefinition, AgentKind, PipelineError, SessionContext, VoicePipeline,
};
use uuid::Uuid;

const CHANNEL_CAPACITY: usize = 32;

/// An instruction pushed from the registry to one connected pipeline.
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineEvent {
    AgentChanged {
        kind: AgentKind,
        display_name: String,
        instructions: String,
        tools: BTreeSet<String>,
        greeting: String,
    },
    Teardown,
}

impl PipelineEvent {
    pub fn agent_changed(agent: &AgentDefinition, context: &SessionContext) -> Self {
        PipelineEvent::AgentChanged {
            kind: agent.kind,
            display_name: agent.display_name.clone(),
            instructions: agent.instructions.clone(),
            tools: agent.tools.clone(),
            greeting: agent.greeting(context),
        }
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("Call '{0}' already has a pipeline attached")]
pub struct AlreadyAttached(pub Uuid);

#[derive(Default)]
pub struct PipelineHub {
    connections: Mutex<HashMap<Uuid, mpsc::Sender<PipelineEvent>>>,
}

impl PipelineHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a connection for `call_id` and returns the receiving end
    /// of its event channel. A call has at most one connection.
    pub fn attach(&self, call_id: Uuid) -> Result<mpsc::Receiver<PipelineEvent>, AlreadyAttached> {
        let mut connections = self.connections.lock().unwrap_or_else(|e| e.into_inner());
        if connections.get(&call_id).is_some_and(|tx| !tx.is_closed()) {
            return Err(AlreadyAttached(call_id));
        }
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        connections.insert(call_id, tx);
        debug!(call_id = %call_id, "Pipeline attached");
        Ok(rx)
    }

    /// Forgets the connection for `call_id`.
    pub fn detach(&self, call_id: Uuid) {
        let removed = self
            .connections
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&call_id);
        if removed.is_some() {
            debug!(call_id = %call_id, "Pipeline detached");
        }
    }

    pub fn is_attached(&self, call_id: Uuid) -> bool {
        self.connections
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(&call_id)
    }

    pub fn connected(&self) -> usize {
        self.connections
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }

    fn sender(&self, call_id: Uuid) -> Option<mpsc::Sender<PipelineEvent>> {
        self.connections
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&call_id)
            .cloned()
    }
}

impl VoicePipeline for PipelineHub {
    fn agent_changed(
        &self,
        call_id: Uuid,
        agent: &AgentDefinition,
        context: &SessionContext,
    ) -> Result<(), PipelineError> {
        let Some(tx) = self.sender(call_id) else {
            debug!(call_id = %call_id, "No pipeline attached; agent change not forwarded");
            return Ok(());
        };
        match tx.try_send(PipelineEvent::agent_changed(agent, context)) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Closed(_)) => {
                self.detach(call_id);
                Err(PipelineError::Disconnected(call_id))
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                // Never leave the pipeline on a stale agent.
                warn!(call_id = %call_id, to = %agent.kind, "Pipeline queue full; dropping connection");
                self.detach(call_id);
                Err(PipelineError::Failed {
                    call_id,
                    reason: "event queue full".to_string(),
                })
            }
        }
    }

    fn teardown(&self, call_id: Uuid) -> Result<(), PipelineError> {
        let removed = self
            .connections
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&call_id);
        let Some(tx) = removed else {
            return Ok(());
        };
        // Dropping the sender closes the channel, which also tears the
        // connection down if the explicit event cannot be queued.
        match tx.try_send(PipelineEvent::Teardown) {
            Ok(()) | Err(mpsc::error::TrySendError::Closed(_)) => Ok(()),
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(call_id = %call_id, "Pipeline queue full; closing channel without teardown event");
                Ok(())
            }
        }
    }
}
