//! Handoff Protocol
//!
//! A pure decision function: given the agent that currently owns a call, a
//! snapshot of the caller context and a routing signal from the conversation
//! pipeline, [`decide`] says which agent should own the call next, whether
//! the call should end, or that nothing changes. It holds no state and never
//! mutates anything; the registry performs the actual swap.

use crate::agent::AgentKind;
use crate::context::{SessionContext, Urgency};
use serde::Serialize;

/// A classified conversational intent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    Billing,
    Support,
    GeneralMedical,
    Emergency,
    Resolved,
    End,
    Unrecognized,
}

impl Intent {
    /// Classifies an intent label. Labels are matched case-insensitively,
    /// with `-` and spaces treated as `_` and a trailing `_intent` ignored,
    /// so `"billing-intent"`, `"Billing"` and `"billing_question"` agree.
    pub fn classify(label: &str) -> Self {
        let normalized = label.trim().to_lowercase().replace(['-', ' '], "_");
        let normalized = normalized
            .strip_suffix("_intent")
            .unwrap_or(normalized.as_str());
        match normalized {
            "billing" | "billing_question" | "insurance" | "payment" => Intent::Billing,
            "support" | "medical_support" | "appointment" | "prescription" => Intent::Support,
            "general_medical" | "medical" | "symptoms" => Intent::GeneralMedical,
            "emergency" | "emergency_urgency" | "symptom_escalation" => Intent::Emergency,
            "resolved" | "done" | "satisfied" => Intent::Resolved,
            "end" | "end_call" | "goodbye" | "hangup" => Intent::End,
            _ => Intent::Unrecognized,
        }
    }
}

/// A routing hint surfaced by the conversation pipeline.
///
/// A signal may carry several inferred intents at once; an explicit tool
/// request always takes precedence over inference.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoutingSignal {
    /// An agent explicitly invoked a transfer tool.
    pub tool_transfer: Option<AgentKind>,
    /// An agent explicitly invoked the end-call tool.
    pub end_requested: bool,
    pub intents: Vec<Intent>,
}

impl RoutingSignal {
    pub fn transfer(target: AgentKind) -> Self {
        Self {
            tool_transfer: Some(target),
            ..Default::default()
        }
    }

    pub fn end_call() -> Self {
        Self {
            end_requested: true,
            ..Default::default()
        }
    }

    pub fn intent(intent: Intent) -> Self {
        Self {
            intents: vec![intent],
            ..Default::default()
        }
    }

    pub fn from_labels<I, S>(labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            intents: labels
                .into_iter()
                .map(|label| Intent::classify(label.as_ref()))
                .collect(),
            ..Default::default()
        }
    }

    pub fn with_intent(mut self, intent: Intent) -> Self {
        self.intents.push(intent);
        self
    }

    fn has(&self, intent: Intent) -> bool {
        self.intents.contains(&intent)
    }
}

/// Where the call goes after a decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "next", content = "agent", rename_all = "snake_case")]
pub enum Next {
    Stay,
    Agent(AgentKind),
    End,
}

/// A context change that accompanies a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ContextEffect {
    SetUrgency(Urgency),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Transition {
    pub next: Next,
    pub effect: Option<ContextEffect>,
}

impl Transition {
    pub fn stay() -> Self {
        Self {
            next: Next::Stay,
            effect: None,
        }
    }

    pub fn to(target: AgentKind) -> Self {
        Self {
            next: Next::Agent(target),
            effect: None,
        }
    }

    pub fn end() -> Self {
        Self {
            next: Next::End,
            effect: None,
        }
    }

    pub fn with_effect(mut self, effect: Option<ContextEffect>) -> Self {
        self.effect = effect;
        self
    }

    pub fn is_stay(&self) -> bool {
        self.next == Next::Stay && self.effect.is_none()
    }
}

/// Decides the next owner of a call.
///
/// Precedence, highest first: explicit transfer tool, explicit end tool,
/// emergency, billing, support or general medical, resolved or end. A
/// decision that names the current agent collapses to `Stay`. Whether the
/// target is actually permitted is checked by the registry, not here.
pub fn decide(current: AgentKind, context: &SessionContext, signal: &RoutingSignal) -> Transition {
    if let Some(target) = signal.tool_transfer {
        return route_to(current, target);
    }
    if signal.end_requested {
        return Transition::end();
    }

    if signal.has(Intent::Emergency) {
        let effect = (context.urgency != Urgency::Emergency)
            .then_some(ContextEffect::SetUrgency(Urgency::Emergency));
        return route_to(current, AgentKind::Support).with_effect(effect);
    }
    if signal.has(Intent::Billing) {
        return route_to(current, AgentKind::Billing);
    }
    if signal.has(Intent::Support) || signal.has(Intent::GeneralMedical) {
        return route_to(current, AgentKind::Support);
    }
    if signal.has(Intent::End) {
        return Transition::end();
    }
    if signal.has(Intent::Resolved) {
        // Triage has nothing to resolve yet; only a department closes a call.
        return match current {
            AgentKind::Triage => Transition::stay(),
            AgentKind::Support | AgentKind::Billing => Transition::end(),
        };
    }

    Transition::stay()
}

fn route_to(current: AgentKind, target: AgentKind) -> Transition {
    if current == target {
        Transition::stay()
    } else {
        Transition::to(target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> SessionContext {
        SessionContext::new(Some("John Doe".into()))
    }

    #[test]
    fn test_transition_table() {
        let cases = [
            (AgentKind::Triage, Intent::Billing, Next::Agent(AgentKind::Billing)),
            (AgentKind::Triage, Intent::Support, Next::Agent(AgentKind::Support)),
            (AgentKind::Triage, Intent::GeneralMedical, Next::Agent(AgentKind::Support)),
            (AgentKind::Triage, Intent::Emergency, Next::Agent(AgentKind::Support)),
            (AgentKind::Support, Intent::Billing, Next::Agent(AgentKind::Billing)),
            (AgentKind::Support, Intent::Resolved, Next::End),
            (AgentKind::Support, Intent::End, Next::End),
            (AgentKind::Billing, Intent::Resolved, Next::End),
            (AgentKind::Billing, Intent::End, Next::End),
            (AgentKind::Triage, Intent::Unrecognized, Next::Stay),
            (AgentKind::Support, Intent::Unrecognized, Next::Stay),
            (AgentKind::Billing, Intent::Unrecognized, Next::Stay),
        ];
        for (current, intent, expected) in cases {
            let transition = decide(current, &ctx(), &RoutingSignal::intent(intent));
            assert_eq!(transition.next, expected, "{current} + {intent:?}");
        }
    }

    #[test]
    fn test_emergency_sets_urgency() {
        let transition = decide(
            AgentKind::Triage,
            &ctx(),
            &RoutingSignal::intent(Intent::Emergency),
        );
        assert_eq!(
            transition.effect,
            Some(ContextEffect::SetUrgency(Urgency::Emergency))
        );
    }

    #[test]
    fn test_emergency_in_support_stays_but_escalates() {
        let transition = decide(
            AgentKind::Support,
            &ctx(),
            &RoutingSignal::intent(Intent::Emergency),
        );
        assert_eq!(transition.next, Next::Stay);
        assert!(transition.effect.is_some());
        assert!(!transition.is_stay());
    }

    #[test]
    fn test_emergency_already_recorded_has_no_effect() {
        let mut context = ctx();
        context.set_urgency(Urgency::Emergency);
        let transition = decide(
            AgentKind::Support,
            &context,
            &RoutingSignal::intent(Intent::Emergency),
        );
        assert!(transition.is_stay());
    }

    #[test]
    fn test_tool_transfer_wins_over_intent() {
        let signal = RoutingSignal::transfer(AgentKind::Support).with_intent(Intent::Billing);
        let transition = decide(AgentKind::Triage, &ctx(), &signal);
        assert_eq!(transition.next, Next::Agent(AgentKind::Support));
    }

    #[test]
    fn test_tool_transfer_is_not_filtered() {
        // Permission checks belong to the registry, so even a transfer no
        // catalog permits is passed through.
        let transition = decide(
            AgentKind::Billing,
            &ctx(),
            &RoutingSignal::transfer(AgentKind::Triage),
        );
        assert_eq!(transition.next, Next::Agent(AgentKind::Triage));
    }

    #[test]
    fn test_end_tool_wins_over_intent() {
        let signal = RoutingSignal::end_call().with_intent(Intent::Billing);
        assert_eq!(decide(AgentKind::Triage, &ctx(), &signal).next, Next::End);
    }

    #[test]
    fn test_triage_resolved_stays() {
        let transition = decide(
            AgentKind::Triage,
            &ctx(),
            &RoutingSignal::intent(Intent::Resolved),
        );
        assert_eq!(transition.next, Next::Stay);
    }

    #[test]
    fn test_same_agent_collapses_to_stay() {
        let transition = decide(
            AgentKind::Billing,
            &ctx(),
            &RoutingSignal::intent(Intent::Billing),
        );
        assert!(transition.is_stay());
    }

    #[test]
    fn test_emergency_outranks_billing() {
        let signal = RoutingSignal::from_labels(["billing-intent", "emergency"]);
        let transition = decide(AgentKind::Triage, &ctx(), &signal);
        assert_eq!(transition.next, Next::Agent(AgentKind::Support));
    }

    #[test]
    fn test_decide_is_deterministic() {
        let signal = RoutingSignal::from_labels(["support-intent", "resolved"]);
        let first = decide(AgentKind::Triage, &ctx(), &signal);
        for _ in 0..10 {
            assert_eq!(decide(AgentKind::Triage, &ctx(), &signal), first);
        }
    }

    #[test]
    fn test_intent_classification() {
        assert_eq!(Intent::classify("billing-intent"), Intent::Billing);
        assert_eq!(Intent::classify("Billing Question"), Intent::Billing);
        assert_eq!(Intent::classify("general-medical-intent"), Intent::GeneralMedical);
        assert_eq!(Intent::classify("symptom escalation"), Intent::Emergency);
        assert_eq!(Intent::classify("end-intent"), Intent::End);
        assert_eq!(Intent::classify("weather"), Intent::Unrecognized);
    }
}
