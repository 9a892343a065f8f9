//! Step state and the fixed pipeline step table.

use super::{StepEvent, StepStatus};
use crate::errors::ErrorInfo;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Number of steps in the fixed pipeline sequence.
pub const STEP_COUNT: u8 = 7;

/// The fixed, ordered pipeline step sequence.
///
/// The discriminant is the 1-based step id used everywhere else in the
/// engine (logger, workflow projection, HTTP payloads).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PipelineStep {
    /// Normalize and validate the incoming lesson context.
    ContextIntake = 1,
    /// Generate the lesson body via the provider cascade.
    ContentGeneration = 2,
    /// Suggest candidate activities for the lesson.
    ActivitySuggestion = 3,
    /// Generate the full activities from the suggestions.
    ActivityGeneration = 4,
    /// Persist the generated artifacts.
    Persistence = 5,
    /// Attach the activities to the lesson.
    Attachment = 6,
    /// Run terminal consistency checks and seal the run.
    Finalization = 7,
}

impl PipelineStep {
    /// Returns the 1-based step id.
    #[must_use]
    pub fn id(self) -> u8 {
        self as u8
    }

    /// Returns every step in execution order.
    #[must_use]
    pub fn all() -> [Self; STEP_COUNT as usize] {
        [
            Self::ContextIntake,
            Self::ContentGeneration,
            Self::ActivitySuggestion,
            Self::ActivityGeneration,
            Self::Persistence,
            Self::Attachment,
            Self::Finalization,
        ]
    }

    /// Looks a step up by its id.
    #[must_use]
    pub fn from_id(id: u8) -> Option<Self> {
        Self::all().into_iter().find(|s| s.id() == id)
    }

    /// Returns the canonical step name.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::ContextIntake => "context-intake",
            Self::ContentGeneration => "content-generation",
            Self::ActivitySuggestion => "activity-suggestion",
            Self::ActivityGeneration => "activity-generation",
            Self::Persistence => "persistence",
            Self::Attachment => "attachment",
            Self::Finalization => "finalization",
        }
    }
}

impl fmt::Display for PipelineStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Returns the canonical name for a step id, if the id is known.
#[must_use]
pub fn step_name(id: u8) -> Option<&'static str> {
    PipelineStep::from_id(id).map(PipelineStep::name)
}

/// The sub-phases that must be completed before a step may complete.
///
/// This table is the single source of truth for what "done" means per
/// step. Generative steps carry the command/backend/ai milestone triple;
/// local steps carry a single terminal milestone.
#[must_use]
pub fn required_phases(id: u8) -> &'static [&'static str] {
    match PipelineStep::from_id(id) {
        Some(PipelineStep::ContextIntake) => &["context-loaded"],
        Some(PipelineStep::ContentGeneration) => {
            &["command-sent", "backend-received", "ai-completed"]
        }
        Some(PipelineStep::ActivitySuggestion) => &["command-sent", "ai-completed"],
        Some(PipelineStep::ActivityGeneration) => {
            &["command-sent", "backend-received", "ai-completed"]
        }
        Some(PipelineStep::Persistence) => &["data-saved"],
        Some(PipelineStep::Attachment) => &["activities-attached"],
        Some(PipelineStep::Finalization) => &["validation-passed"],
        None => &[],
    }
}

/// Completion state of one sub-phase within a step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubPhase {
    /// Whether the phase finished successfully.
    pub completed: bool,
    /// Optional detail recorded when the phase was marked.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<serde_json::Value>,
}

/// Outcome of one named validation check.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckResult {
    /// The registered check name.
    pub name: String,
    /// Whether the check passed.
    pub passed: bool,
    /// Optional diagnostic detail.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// The canonical state of one pipeline step.
///
/// Mutated only through [`crate::logger::StepLogger`]; events are
/// append-only and status transitions are monotonic except
/// `Retrying <-> Running`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Step {
    /// 1-based step id.
    pub id: u8,
    /// Canonical step name.
    pub name: String,
    /// Current status.
    pub status: StepStatus,
    /// Append-only event history.
    pub events: Vec<StepEvent>,
    /// Sub-phase completion flags keyed by phase name.
    pub sub_phases: BTreeMap<String, SubPhase>,
    /// Number of times the step has been retried.
    pub retry_count: u32,
    /// Classification of the most recent failure, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<ErrorInfo>,
    /// History of validation check outcomes.
    pub validation_checks: Vec<CheckResult>,
    /// When the step entered `Running` (ISO 8601).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<String>,
    /// When the step reached a terminal state (ISO 8601).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<String>,
    /// Result payload stored by the completion gate.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
}

impl Step {
    /// Creates a fresh pending step.
    #[must_use]
    pub fn new(id: u8, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            status: StepStatus::Pending,
            events: Vec::new(),
            sub_phases: BTreeMap::new(),
            retry_count: 0,
            last_error: None,
            validation_checks: Vec::new(),
            started_at: None,
            ended_at: None,
            result: None,
        }
    }

    /// Returns true if every required sub-phase for this step id is
    /// present and completed.
    #[must_use]
    pub fn required_phases_completed(&self) -> bool {
        required_phases(self.id)
            .iter()
            .all(|phase| self.sub_phases.get(*phase).is_some_and(|p| p.completed))
    }

    /// Returns the names of required sub-phases not yet completed.
    #[must_use]
    pub fn missing_phases(&self) -> Vec<&'static str> {
        required_phases(self.id)
            .iter()
            .filter(|phase| !self.sub_phases.get(**phase).is_some_and(|p| p.completed))
            .copied()
            .collect()
    }

    /// Returns true if any recorded validation check failed.
    #[must_use]
    pub fn has_failed_checks(&self) -> bool {
        self.validation_checks.iter().any(|c| !c.passed)
    }
}
