pub mod agent;
pub mod context;
pub mod error;
pub mod handoff;
pub mod llm_client;
pub mod pipeline;
pub mod registry;
pub mod router;
pub mod session;
pub mod tools;

pub use agent::{AgentCatalog, AgentDefinition, AgentKind};
pub use context::{ContextUpdate, SessionContext, Urgency};
pub use error::{PipelineError, RegistryError};
pub use handoff::{Intent, RoutingSignal, Transition, decide};
pub use pipeline::VoicePipeline;
pub use registry::{CallRegistry, RegistryConfig, RegistryStats};
pub use router::{RouteOutcome, SignalRouter};
pub use session::{CallStatus, CallSummary};
