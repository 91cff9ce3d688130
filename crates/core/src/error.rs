use crate::agent::AgentKind;
use thiserror::Error;
use uuid::Uuid;

/// Failures surfaced by the call registry and the signal router.
///
/// None of these are fatal to the process; each concerns a single call.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("Call '{0}' not found")]
    NotFound(Uuid),

    #[error("Call '{0}' has already ended")]
    AlreadyEnded(Uuid),

    #[error("Maximum of {limit} concurrent calls reached")]
    CapacityExceeded { limit: usize },

    #[error("Call '{call_id}': agent '{from}' cannot hand off to '{to}'")]
    InvalidTransition {
        call_id: Uuid,
        from: AgentKind,
        to: AgentKind,
    },

    #[error("Voice pipeline failure for call '{call_id}': {reason}")]
    UpstreamAdapterFailure { call_id: Uuid, reason: String },
}

/// Failures reported by a voice pipeline when asked to act on a call.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PipelineError {
    #[error("Pipeline for call '{0}' has disconnected")]
    Disconnected(Uuid),

    #[error("Pipeline for call '{call_id}' failed: {reason}")]
    Failed { call_id: Uuid, reason: String },
}
