//! Agent Tool Service
//!
//! Exposes the tools a conversational agent may call during a call through
//! the Model Context Protocol (MCP). Transfer and end-call tools are the
//! explicit routing signals of the handoff protocol; `collect_patient_info`
//! feeds the caller context. Each service instance is bound to one call and
//! refuses tools that the call's current agent does not own.

use crate::agent::{AgentKind, tool_names};
use crate::context::{ContextUpdate, DepartmentNote, Urgency};
use crate::handoff::RoutingSignal;
use crate::registry::CallRegistry;
use crate::router::{RouteOutcome, SignalRouter};
use crate::session::CallSummary;
use rmcp::{
    ServerHandler,
    handler::server::{router::tool::ToolRouter, tool::Parameters},
    model::{ServerCapabilities, ServerInfo},
    tool, tool_handler, tool_router,
};
use schemars::JsonSchema;
use serde::Deserialize;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

/// Arguments for recording what the caller has told the triage agent.
#[derive(Deserialize, JsonSchema, Debug)]
pub struct CollectPatientInfoArgs {
    /// The patient's name.
    pub patient_name: String,
    /// Description of symptoms or the reason for calling.
    pub symptoms: String,
    #[schemars(description = "Assessment of urgency: 'low', 'medium', 'high' or 'emergency'")]
    pub urgency_level: String,
}

/// Arguments shared by the transfer tools.
#[derive(Deserialize, JsonSchema, Debug, Default)]
pub struct TransferArgs {
    #[schemars(description = "Optional note for the receiving department")]
    #[serde(default)]
    pub note: Option<String>,
}

pub struct TriageToolService {
    call_id: Uuid,
    router: SignalRouter,
    tool_router: ToolRouter<Self>,
}

#[tool_handler]
impl ServerHandler for TriageToolService {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            ..Default::default()
        }
    }
}

#[tool_router]
impl TriageToolService {
    pub fn new(call_id: Uuid, registry: Arc<CallRegistry>) -> Self {
        Self {
            call_id,
            router: SignalRouter::new(registry),
            tool_router: Self::tool_router(),
        }
    }

    #[tool(
        description = "Record the caller's name, symptoms and urgency once they have been collected."
    )]
    pub async fn collect_patient_info(
        &self,
        args: Parameters<CollectPatientInfoArgs>,
    ) -> Result<String, String> {
        info!(call_id = %self.call_id, args = ?args.0, "Executing tool 'collect_patient_info'");
        self.permitted(tool_names::COLLECT_PATIENT_INFO)?;

        let urgency = Urgency::from_label(&args.0.urgency_level);
        let update = ContextUpdate {
            patient_name: Some(args.0.patient_name),
            symptoms: vec![args.0.symptoms],
            urgency: Some(urgency),
            department_note: None,
        };
        let call = self
            .router
            .registry()
            .update_context(self.call_id, update)
            .map_err(|e| e.to_string())?;

        let name = call.context.patient_name.as_deref().unwrap_or("the caller");
        Ok(format!(
            "OK. Recorded information for {name} (urgency: {}). Decide whether they need \
             medical support or billing assistance.",
            call.context.urgency
        ))
    }

    #[tool(description = "Transfer the caller to Patient Support for medical assistance.")]
    pub async fn transfer_to_support(
        &self,
        args: Parameters<TransferArgs>,
    ) -> Result<String, String> {
        self.transfer(AgentKind::Support, args.0.note)
    }

    #[tool(description = "Transfer the caller to Medical Billing for insurance and payment questions.")]
    pub async fn transfer_to_billing(
        &self,
        args: Parameters<TransferArgs>,
    ) -> Result<String, String> {
        self.transfer(AgentKind::Billing, args.0.note)
    }

    #[tool(description = "Transfer the caller back to triage when they need a different kind of help.")]
    pub async fn transfer_to_triage(
        &self,
        args: Parameters<TransferArgs>,
    ) -> Result<String, String> {
        self.transfer(AgentKind::Triage, args.0.note)
    }

    #[tool(description = "End the call once the caller's needs have been resolved.")]
    pub async fn end_call(&self) -> Result<String, String> {
        info!(call_id = %self.call_id, "Executing tool 'end_call'");
        self.permitted(tool_names::END_CALL)?;
        self.router
            .submit(self.call_id, &RoutingSignal::end_call())
            .map_err(|e| e.to_string())?;
        Ok("OK. The call has ended.".to_string())
    }

    #[tool(description = "Get everything known about the caller so far.")]
    pub async fn get_call_context(&self) -> Result<String, String> {
        info!(call_id = %self.call_id, "Executing tool 'get_call_context'");
        let call = self.permitted(tool_names::GET_CALL_CONTEXT)?;
        serde_json::to_string(&call.context)
            .map_err(|e| format!("Failed to serialize call context: {}", e))
    }
}

impl TriageToolService {
    pub fn call_id(&self) -> Uuid {
        self.call_id
    }

    /// Fails unless the agent currently owning the call has `tool`.
    fn permitted(&self, tool: &str) -> Result<CallSummary, String> {
        let call = self
            .router
            .registry()
            .get(self.call_id)
            .map_err(|e| e.to_string())?;
        let agent = self.router.registry().catalog().get(call.agent);
        if agent.has_tool(tool) {
            Ok(call)
        } else {
            Err(format!(
                "Tool '{}' is not available to the {} agent.",
                tool, call.agent
            ))
        }
    }

    fn transfer(&self, target: AgentKind, note: Option<String>) -> Result<String, String> {
        info!(call_id = %self.call_id, target = %target, "Executing tool '{}'", target.transfer_tool());
        self.permitted(target.transfer_tool())?;

        if let Some(note) = note.filter(|n| !n.trim().is_empty()) {
            self.router
                .registry()
                .update_context(
                    self.call_id,
                    ContextUpdate {
                        department_note: Some(DepartmentNote {
                            department: target.to_string(),
                            note,
                        }),
                        ..Default::default()
                    },
                )
                .map_err(|e| e.to_string())?;
        }

        let outcome = self
            .router
            .submit(self.call_id, &RoutingSignal::transfer(target))
            .map_err(|e| e.to_string())?;
        match outcome {
            RouteOutcome::HandedOff { call, .. } => {
                let agent = self.router.registry().catalog().get(call.agent);
                Ok(format!(
                    "OK. The caller has been transferred to {}.",
                    agent.display_name
                ))
            }
            RouteOutcome::Stayed { .. } => Ok(format!("OK. The caller is already with {}.", target)),
            RouteOutcome::Ended { .. } => Ok("OK. The call has ended.".to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::AgentCatalog;
    use crate::pipeline::DetachedPipeline;
    use crate::registry::RegistryConfig;
    use crate::session::CallStatus;

    fn setup() -> (Arc<CallRegistry>, TriageToolService) {
        let registry = Arc::new(CallRegistry::new(
            Arc::new(AgentCatalog::builtin()),
            Arc::new(DetachedPipeline),
            RegistryConfig::default(),
        ));
        let call = registry.create(None).unwrap();
        let service = TriageToolService::new(call.call_id, registry.clone());
        (registry, service)
    }

    #[tokio::test]
    async fn test_collect_patient_info_updates_context() {
        let (registry, service) = setup();
        let result = service
            .collect_patient_info(Parameters(CollectPatientInfoArgs {
                patient_name: "John Doe".into(),
                symptoms: "chest pain".into(),
                urgency_level: "high".into(),
            }))
            .await
            .unwrap();
        assert!(result.contains("John Doe"));

        let call = registry.get(service.call_id()).unwrap();
        assert_eq!(call.context.patient_name.as_deref(), Some("John Doe"));
        assert_eq!(call.context.symptoms, vec!["chest pain"]);
        assert_eq!(call.context.urgency, Urgency::Urgent);
    }

    #[tokio::test]
    async fn test_transfer_tool_hands_off_with_note() {
        let (registry, service) = setup();
        let result = service
            .transfer_to_billing(Parameters(TransferArgs {
                note: Some("Question about a co-pay".into()),
            }))
            .await
            .unwrap();
        assert!(result.contains("Medical Billing"));

        let call = registry.get(service.call_id()).unwrap();
        assert_eq!(call.agent, AgentKind::Billing);
        assert_eq!(
            call.context.department_notes.get("billing").map(String::as_str),
            Some("Question about a co-pay")
        );
    }

    #[tokio::test]
    async fn test_tools_outside_agent_capabilities_are_refused() {
        let (registry, service) = setup();
        service
            .transfer_to_billing(Parameters(TransferArgs::default()))
            .await
            .unwrap();

        let err = service
            .transfer_to_billing(Parameters(TransferArgs::default()))
            .await
            .unwrap_err();
        assert!(err.contains("not available to the billing agent"));

        let err = service
            .collect_patient_info(Parameters(CollectPatientInfoArgs {
                patient_name: "x".into(),
                symptoms: "y".into(),
                urgency_level: "low".into(),
            }))
            .await
            .unwrap_err();
        assert!(err.contains("collect_patient_info"));
        assert_eq!(
            registry.get(service.call_id()).unwrap().agent,
            AgentKind::Billing
        );
    }

    #[tokio::test]
    async fn test_billing_can_transfer_back_to_triage() {
        let (registry, service) = setup();
        service
            .transfer_to_billing(Parameters(TransferArgs::default()))
            .await
            .unwrap();
        let result = service
            .transfer_to_triage(Parameters(TransferArgs {
                note: Some("Caller has a new symptom".into()),
            }))
            .await
            .unwrap();
        assert!(result.contains("Medical Office Triage"));

        let call = registry.get(service.call_id()).unwrap();
        assert_eq!(call.agent, AgentKind::Triage);
        assert_eq!(call.handoff_count, 2);
    }

    #[tokio::test]
    async fn test_end_call_tool_ends_call() {
        let (registry, service) = setup();
        service.end_call().await.unwrap();
        assert_eq!(
            registry.get(service.call_id()).unwrap().status,
            CallStatus::Ended
        );
        assert!(service.end_call().await.is_err());
    }

    #[tokio::test]
    async fn test_get_call_context_returns_json() {
        let (registry, service) = setup();
        registry
            .update_context(
                service.call_id(),
                ContextUpdate {
                    patient_name: Some("Jane".into()),
                    ..Default::default()
                },
            )
            .unwrap();
        let json = service.get_call_context().await.unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["patient_name"], "Jane");
    }
}
