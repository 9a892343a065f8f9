//! Canned domain payloads for tests.

use crate::pipeline::LessonContext;

/// A realistic lesson context covering the default request shape.
#[must_use]
pub fn sample_context() -> LessonContext {
    LessonContext {
        topic: "the water cycle".to_string(),
        subject: Some("science".to_string()),
        grade_level: Some("4".to_string()),
        sections: vec![
            "introduction".to_string(),
            "development".to_string(),
            "conclusion".to_string(),
        ],
        notes: None,
    }
}

/// A provider payload that parses into a lesson matching
/// [`sample_context`]'s sections.
#[must_use]
pub fn sample_lesson_json() -> String {
    serde_json::json!({
        "title": "The Water Cycle",
        "sections": [
            {"heading": "introduction", "content": "Water moves in a cycle."},
            {"heading": "development", "content": "Evaporation, condensation, precipitation."},
            {"heading": "conclusion", "content": "The cycle repeats endlessly."}
        ]
    })
    .to_string()
}

/// A provider payload that parses into activity suggestions.
#[must_use]
pub fn sample_suggestions_json() -> String {
    serde_json::json!({
        "suggestions": [
            "build a mini water cycle in a bag",
            "label a water cycle diagram"
        ]
    })
    .to_string()
}

/// A provider payload that parses into generated activities.
#[must_use]
pub fn sample_activities_json() -> String {
    serde_json::json!({
        "activities": [
            {
                "title": "Water Cycle in a Bag",
                "kind": "experiment",
                "instructions": "Seal water in a bag, tape it to a window, observe daily."
            },
            {
                "title": "Diagram Labeling",
                "kind": "worksheet",
                "instructions": "Label evaporation, condensation and precipitation on the diagram."
            }
        ]
    })
    .to_string()
}
