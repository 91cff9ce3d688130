//! Session Context
//!
//! The accumulated caller information that travels with a call from agent to
//! agent. A context is owned by exactly one call session and is only ever
//! changed through additive updates: names are never blanked, symptoms are
//! appended, and department notes grow per department.

use crate::agent::AgentKind;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use utoipa::ToSchema;

/// How urgently the caller needs attention.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
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
pub enum Urgency {
    #[default]
    Unknown,
    #[serde(alias = "low")]
    Routine,
    #[serde(alias = "medium", alias = "high")]
    Urgent,
    #[serde(alias = "critical")]
    Emergency,
}

impl Urgency {
    /// Maps a free-form urgency label, as produced by a language model, onto
    /// the closed set of levels. Unrecognized labels map to `Unknown`.
    pub fn from_label(label: &str) -> Self {
        match label.trim().to_lowercase().as_str() {
            "low" | "routine" => Urgency::Routine,
            "medium" | "high" | "urgent" => Urgency::Urgent,
            "emergency" | "critical" => Urgency::Emergency,
            _ => Urgency::Unknown,
        }
    }
}

impl fmt::Display for Urgency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Urgency::Unknown => "unknown",
            Urgency::Routine => "routine",
            Urgency::Urgent => "urgent",
            Urgency::Emergency => "emergency",
        };
        f.write_str(label)
    }
}

/// A free-text note addressed to one department.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema, ToSchema)]
pub struct DepartmentNote {
    #[schema(example = "billing")]
    pub department: String,
    #[schema(example = "Asked about a duplicate charge from March.")]
    pub note: String,
}

/// An additive change to a [`SessionContext`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema, ToSchema)]
pub struct ContextUpdate {
    #[serde(default)]
    #[schema(example = "John Doe")]
    pub patient_name: Option<String>,
    #[serde(default)]
    pub symptoms: Vec<String>,
    #[serde(default)]
    pub urgency: Option<Urgency>,
    #[serde(default)]
    pub department_note: Option<DepartmentNote>,
}

impl ContextUpdate {
    pub fn urgency(urgency: Urgency) -> Self {
        Self {
            urgency: Some(urgency),
            ..Default::default()
        }
    }
}

/// Patient information gathered over the course of a call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema, ToSchema)]
pub struct SessionContext {
    pub patient_name: Option<String>,
    pub symptoms: Vec<String>,
    pub urgency: Urgency,
    /// The department the caller was most recently routed to.
    pub department: Option<AgentKind>,
    pub department_notes: BTreeMap<String, String>,
}

impl SessionContext {
    /// Creates a context seeded with an optional patient name.
    pub fn new(patient_name: Option<String>) -> Self {
        let mut context = Self::default();
        if let Some(name) = patient_name {
            context.set_patient_name(&name);
        }
        context
    }

    /// Records the patient's name. Blank names are ignored so a known name is
    /// never replaced by nothing. Returns whether the name was stored.
    pub fn set_patient_name(&mut self, name: &str) -> bool {
        let name = name.trim();
        if name.is_empty() {
            return false;
        }
        self.patient_name = Some(name.to_string());
        true
    }

    /// Appends a symptom, skipping blanks and exact repeats.
    pub fn add_symptom(&mut self, symptom: &str) -> bool {
        let symptom = symptom.trim();
        if symptom.is_empty() || self.symptoms.iter().any(|s| s == symptom) {
            return false;
        }
        self.symptoms.push(symptom.to_string());
        true
    }

    /// Replaces the urgency level. `Unknown` carries no information and
    /// never overwrites an assessed level.
    pub fn set_urgency(&mut self, urgency: Urgency) {
        if urgency != Urgency::Unknown {
            self.urgency = urgency;
        }
    }

    /// Appends a note for a department, keeping earlier notes.
    pub fn add_note(&mut self, department: &str, note: &str) {
        let note = note.trim();
        let department = department.trim().to_lowercase();
        if note.is_empty() || department.is_empty() {
            return;
        }
        self.department_notes
            .entry(department)
            .and_modify(|existing| {
                existing.push('\n');
                existing.push_str(note);
            })
            .or_insert_with(|| note.to_string());
    }

    pub fn apply(&mut self, update: ContextUpdate) {
        if let Some(name) = update.patient_name {
            self.set_patient_name(&name);
        }
        for symptom in &update.symptoms {
            self.add_symptom(symptom);
        }
        if let Some(urgency) = update.urgency {
            self.set_urgency(urgency);
        }
        if let Some(DepartmentNote { department, note }) = update.department_note {
            self.add_note(&department, &note);
        }
    }

    /// Human-readable list of reported symptoms, if any.
    pub fn symptom_summary(&self) -> Option<String> {
        if self.symptoms.is_empty() {
            None
        } else {
            Some(self.symptoms.join(", "))
        }
    }
}
