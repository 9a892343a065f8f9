//! Domain data carried through a pipeline run.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// The incoming request context describing what to generate.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LessonContext {
    /// The lesson topic.
    pub topic: String,
    /// Optional subject area.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    /// Optional target grade level.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grade_level: Option<String>,
    /// Requested section headings. Empty means "use defaults".
    #[serde(default)]
    pub sections: Vec<String>,
    /// Free-form extra instructions forwarded to prompts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

impl LessonContext {
    /// Default section set used when the request names none.
    pub const DEFAULT_SECTIONS: [&'static str; 3] = ["introduction", "development", "conclusion"];

    /// Returns the effective section list for this context.
    #[must_use]
    pub fn effective_sections(&self) -> Vec<String> {
        if self.sections.is_empty() {
            Self::DEFAULT_SECTIONS.iter().map(|s| (*s).to_string()).collect()
        } else {
            self.sections.clone()
        }
    }
}

/// One generated lesson section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LessonSection {
    /// Section heading.
    pub heading: String,
    /// Section body text.
    pub content: String,
}

/// The generated lesson artifact.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Lesson {
    /// Lesson title.
    pub title: String,
    /// Ordered sections.
    pub sections: Vec<LessonSection>,
    /// Ids of attached activities, filled by the attachment step.
    #[serde(default)]
    pub activity_ids: Vec<String>,
}

/// One generated activity.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Activity {
    /// Stable id assigned at generation time.
    pub id: String,
    /// Activity title.
    pub title: String,
    /// Activity kind (e.g. "quiz", "discussion").
    pub kind: String,
    /// Instructions for running the activity.
    pub instructions: String,
}

/// The accumulating data snapshot for one pipeline run.
///
/// Validation checks are pure functions over this snapshot; each step's
/// domain operation writes its output here before the gate runs.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineData {
    /// The normalized request context, set by context intake.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<LessonContext>,
    /// The generated lesson, set by content generation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lesson: Option<Lesson>,
    /// Activity suggestions, set by the suggestion step.
    #[serde(default)]
    pub suggestions: Vec<String>,
    /// Generated activities.
    #[serde(default)]
    pub activities: Vec<Activity>,
    /// Id of the persisted artifact, set by the persistence step.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artifact_id: Option<String>,
    /// Whether activities were attached to the lesson.
    #[serde(default)]
    pub activities_attached: bool,
    /// Whether the primary artifact is marked ready for finalization.
    #[serde(default)]
    pub artifact_ready: bool,
    /// Step ids that have completed, in completion order.
    #[serde(default)]
    pub completed_steps: Vec<u8>,
    /// Per-step duration in milliseconds, filled as steps complete.
    #[serde(default)]
    pub step_durations_ms: BTreeMap<u8, u64>,
}
