//! Agent Definitions
//!
//! Each conversational agent (triage, support, billing) is a closed variant
//! paired with an immutable definition: the instructions handed to the voice
//! pipeline, the tools it may call, and the agents it may hand off to. The
//! [`AgentCatalog`] builds the three definitions once at startup and shares
//! them read-only with every call.

use crate::context::SessionContext;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use utoipa::ToSchema;

/// Tool identifiers understood by the conversation pipeline.
pub mod tool_names {
    pub const COLLECT_PATIENT_INFO: &str = "collect_patient_info";
    pub const GET_CALL_CONTEXT: &str = "get_call_context";
    pub const END_CALL: &str = "end_call";
    pub const TRANSFER_TO_TRIAGE: &str = "transfer_to_triage";
    pub const TRANSFER_TO_SUPPORT: &str = "transfer_to_support";
    pub const TRANSFER_TO_BILLING: &str = "transfer_to_billing";
}

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    JsonSchema,
    ToSchema,
)]
#[serde(rename_all = "lowercase")]
pub enum AgentKind {
    Triage,
    Support,
    Billing,
}

impl AgentKind {
    pub const ALL: [AgentKind; 3] = [AgentKind::Triage, AgentKind::Support, AgentKind::Billing];

    pub fn as_str(&self) -> &'static str {
        match self {
            AgentKind::Triage => "triage",
            AgentKind::Support => "support",
            AgentKind::Billing => "billing",
        }
    }

    /// The tool an agent calls to hand the caller over to this kind.
    pub fn transfer_tool(&self) -> &'static str {
        match self {
            AgentKind::Triage => tool_names::TRANSFER_TO_TRIAGE,
            AgentKind::Support => tool_names::TRANSFER_TO_SUPPORT,
            AgentKind::Billing => tool_names::TRANSFER_TO_BILLING,
        }
    }
}

impl fmt::Display for AgentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("Unknown agent kind: '{0}'")]
pub struct UnknownAgentKind(pub String);

impl FromStr for AgentKind {
    type Err = UnknownAgentKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "triage" => Ok(AgentKind::Triage),
            "support" => Ok(AgentKind::Support),
            "billing" => Ok(AgentKind::Billing),
            other => Err(UnknownAgentKind(other.to_string())),
        }
    }
}

/// An immutable description of one conversational agent.
#[derive(Debug, Clone, Serialize)]
pub struct AgentDefinition {
    pub kind: AgentKind,
    pub display_name: String,
    /// Opaque to the core; consumed by the conversation pipeline.
    pub instructions: String,
    pub allowed_targets: BTreeSet<AgentKind>,
    pub tools: BTreeSet<String>,
}

impl AgentDefinition {
    /// Builds a definition whose tool set follows from its handoff targets:
    /// one transfer tool per permitted target plus the common call tools.
    /// Triage additionally collects patient details.
    pub fn new(
        kind: AgentKind,
        instructions: impl Into<String>,
        allowed_targets: impl IntoIterator<Item = AgentKind>,
    ) -> Self {
        let allowed_targets: BTreeSet<AgentKind> = allowed_targets
            .into_iter()
            .filter(|target| *target != kind)
            .collect();

        let mut tools: BTreeSet<String> = allowed_targets
            .iter()
            .map(|target| target.transfer_tool().to_string())
            .collect();
        tools.insert(tool_names::END_CALL.to_string());
        tools.insert(tool_names::GET_CALL_CONTEXT.to_string());
        if kind == AgentKind::Triage {
            tools.insert(tool_names::COLLECT_PATIENT_INFO.to_string());
        }

        Self {
            kind,
            display_name: default_display_name(kind).to_string(),
            instructions: instructions.into(),
            allowed_targets,
            tools,
        }
    }

    pub fn can_transfer_to(&self, target: AgentKind) -> bool {
        self.allowed_targets.contains(&target)
    }

    pub fn has_tool(&self, name: &str) -> bool {
        self.tools.contains(name)
    }

    /// The opening line spoken when this agent takes over a call.
    pub fn greeting(&self, context: &SessionContext) -> String {
        let name = context.patient_name.as_deref().unwrap_or("there");
        match self.kind {
            AgentKind::Triage => match &context.patient_name {
                Some(name) => format!(
                    "Hello {name}, thank you for calling the medical office. \
                     What is the reason for your call today?"
                ),
                None => "Hello, thank you for calling the medical office. \
                         May I have your name and the reason for your call today?"
                    .to_string(),
            },
            AgentKind::Support => match context.symptom_summary() {
                Some(symptoms) => format!(
                    "Hello {name}, I'm with {}. I see you're calling about {symptoms}. \
                     How can I help you today?",
                    self.display_name
                ),
                None => format!(
                    "Hello {name}, I'm with {}. How can I help you with your medical needs today?",
                    self.display_name
                ),
            },
            AgentKind::Billing => format!(
                "Hello {name}, I'm with {}. How can I help you with your insurance or billing questions today?",
                self.display_name
            ),
        }
    }

    /// The system prompt for one conversation turn: the agent's instructions
    /// followed by the caller context it inherits from earlier agents.
    pub fn system_prompt(&self, context: &SessionContext) -> String {
        let context_json =
            serde_json::to_string_pretty(context).unwrap_or_else(|_| "{}".to_string());
        format!(
            "{}\n\n# Caller Context\n\n```json\n{}\n```",
            self.instructions, context_json
        )
    }
}

fn default_display_name(kind: AgentKind) -> &'static str {
    match kind {
        AgentKind::Triage => "Medical Office Triage",
        AgentKind::Support => "Patient Support",
        AgentKind::Billing => "Medical Billing",
    }
}

fn default_instructions(kind: AgentKind) -> &'static str {
    match kind {
        AgentKind::Triage => {
            "You are the triage agent for a medical office. Greet the caller warmly, \
             ask for their name and the reason for their call, and collect their symptoms \
             and how urgent the situation is. Record what you learn with collect_patient_info. \
             Decide whether the caller needs medical support or billing assistance and \
             transfer them when ready. Always prioritize urgent medical concerns. \
             Ask one question at a time and wait for the answer."
        }
        AgentKind::Support => {
            "You are a patient support specialist for a medical office. Help with medical \
             service requests, appointment scheduling, prescriptions and general office \
             questions. Transfer to billing for payment or insurance questions and back to \
             triage if the caller needs a different kind of help. You already have the \
             caller's information from triage; do not ask for it again. Maintain patient \
             confidentiality."
        }
        AgentKind::Billing => {
            "You are a billing specialist for a medical office. Help with insurance \
             questions, payments, coverage and benefits, billing disputes and claims. \
             Transfer to patient support for medical questions and back to triage if \
             the caller needs a different kind of help. You already have the \
             caller's information from triage. Be patient and precise with financial details."
        }
    }
}

fn default_targets(kind: AgentKind) -> &'static [AgentKind] {
    match kind {
        AgentKind::Triage => &[AgentKind::Support, AgentKind::Billing],
        AgentKind::Support => &[AgentKind::Triage, AgentKind::Billing],
        AgentKind::Billing => &[AgentKind::Triage, AgentKind::Support],
    }
}

/// The static set of agent definitions shared by every call.
#[derive(Debug, Clone)]
pub struct AgentCatalog {
    triage: Arc<AgentDefinition>,
    support: Arc<AgentDefinition>,
    billing: Arc<AgentDefinition>,
}

impl AgentCatalog {
    pub fn new(triage: AgentDefinition, support: AgentDefinition, billing: AgentDefinition) -> Self {
        Self {
            triage: Arc::new(triage),
            support: Arc::new(support),
            billing: Arc::new(billing),
        }
    }

    /// The built-in medical office agents.
    pub fn builtin() -> Self {
        Self::with_instructions(&HashMap::new())
    }

    /// Built-in agents whose instructions may be overridden per kind. Keys
    /// are agent kind names (`"triage"`, `"support"`, `"billing"`).
    pub fn with_instructions(overrides: &HashMap<String, String>) -> Self {
        let build = |kind: AgentKind| {
            let instructions = overrides
                .get(kind.as_str())
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .unwrap_or_else(|| default_instructions(kind).to_string());
            AgentDefinition::new(kind, instructions, default_targets(kind).iter().copied())
        };
        Self::new(
            build(AgentKind::Triage),
            build(AgentKind::Support),
            build(AgentKind::Billing),
        )
    }

    pub fn get(&self, kind: AgentKind) -> &Arc<AgentDefinition> {
        match kind {
            AgentKind::Triage => &self.triage,
            AgentKind::Support => &self.support,
            AgentKind::Billing => &self.billing,
        }
    }

    /// Every call starts with triage.
    pub fn initial(&self) -> &Arc<AgentDefinition> {
        &self.triage
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<AgentDefinition>> {
        AgentKind::ALL.into_iter().map(move |kind| self.get(kind))
    }
}

#[cfg(test)]
impl AgentCatalog {
    /// Built-in agents, except that billing may only hand back to support.
    pub(crate) fn billing_to_support_only() -> Self {
        let builtin = Self::builtin();
        Self::new(
            builtin.triage.as_ref().clone(),
            builtin.support.as_ref().clone(),
            AgentDefinition::new(
                AgentKind::Billing,
                builtin.billing.instructions.clone(),
                [AgentKind::Support],
            ),
        )
    }
}
