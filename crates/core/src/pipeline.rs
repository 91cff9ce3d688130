//! Voice Pipeline contact points
//!
//! The registry talks to whatever drives the live conversation through this
//! trait. Inbound contact points (a call became active, a routing signal
//! arrived) are plain registry and router calls; the two outbound ones are
//! here. Implementations must return promptly: they request work from the
//! pipeline and never wait for it to finish. `agent_changed` is called with
//! the call's session locked.

use crate::agent::AgentDefinition;
use crate::context::SessionContext;
use crate::error::PipelineError;
use uuid::Uuid;

#[cfg_attr(test, mockall::automock)]
pub trait VoicePipeline: Send + Sync {
    /// The agent owning `call_id` changed; the pipeline should reconfigure
    /// the live conversation with the new instructions and tools. An error
    /// means the change could not be delivered.
    fn agent_changed(
        &self,
        call_id: Uuid,
        agent: &AgentDefinition,
        context: &SessionContext,
    ) -> Result<(), PipelineError>;

    /// The call ended; the pipeline should tear down any live connection.
    fn teardown(&self, call_id: Uuid) -> Result<(), PipelineError>;
}

/// A pipeline that is never attached to anything, for running the registry
/// without a conversation front end.
#[derive(Debug, Default, Clone, Copy)]
pub struct DetachedPipeline;

impl VoicePipeline for DetachedPipeline {
    fn agent_changed(
        &self,
        _call_id: Uuid,
        _agent: &AgentDefinition,
        _context: &SessionContext,
    ) -> Result<(), PipelineError> {
        Ok(())
    }

    fn teardown(&self, _call_id: Uuid) -> Result<(), PipelineError> {
        Ok(())
    }
}
