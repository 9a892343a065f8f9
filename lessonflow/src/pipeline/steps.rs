//! Prompt construction and payload parsing for the generative steps.
//!
//! Providers are asked for strict JSON; responses are still defensively
//! stripped of markdown fences before parsing, since models add them
//! anyway.

use crate::errors::OrchestratorError;
use crate::pipeline::{Activity, Lesson, LessonContext};
use crate::provider::ChatMessage;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use uuid::Uuid;

const SYSTEM_PROMPT: &str = "You are an instructional designer producing lesson \
content for teachers. Always answer with strict JSON matching the requested \
shape, with no prose around it.";

/// Wire shape of the suggestion step's response.
#[derive(Debug, Deserialize)]
pub(crate) struct SuggestionsPayload {
    pub suggestions: Vec<String>,
}

/// Wire shape of the activity generation step's response.
#[derive(Debug, Deserialize)]
pub(crate) struct ActivitiesPayload {
    pub activities: Vec<ActivityDraft>,
}

/// One activity as the provider returns it, before an id is assigned.
#[derive(Debug, Deserialize)]
pub(crate) struct ActivityDraft {
    pub title: String,
    pub kind: String,
    pub instructions: String,
}

impl ActivityDraft {
    pub(crate) fn into_activity(self) -> Activity {
        Activity {
            id: Uuid::new_v4().to_string(),
            title: self.title,
            kind: self.kind,
            instructions: self.instructions,
        }
    }
}

fn context_summary(context: &LessonContext) -> String {
    let mut parts = vec![format!("Topic: {}", context.topic)];
    if let Some(subject) = &context.subject {
        parts.push(format!("Subject: {subject}"));
    }
    if let Some(grade) = &context.grade_level {
        parts.push(format!("Grade level: {grade}"));
    }
    if let Some(notes) = &context.notes {
        parts.push(format!("Notes: {notes}"));
    }
    parts.join("\n")
}

fn with_corrections(mut prompt: String, extra_instructions: &[String]) -> String {
    for instruction in extra_instructions {
        prompt.push('\n');
        prompt.push_str(instruction);
    }
    prompt
}

/// Builds the message list for the lesson content call.
pub(crate) fn content_messages(
    context: &LessonContext,
    extra_instructions: &[String],
) -> Vec<ChatMessage> {
    let sections = context.effective_sections().join(", ");
    let prompt = format!(
        "Write a lesson on the following request.\n{}\nSections (use these exact \
         headings): {sections}\nAnswer as JSON: {{\"title\": string, \"sections\": \
         [{{\"heading\": string, \"content\": string}}]}}",
        context_summary(context),
    );
    vec![
        ChatMessage::system(SYSTEM_PROMPT),
        ChatMessage::user(with_corrections(prompt, extra_instructions)),
    ]
}

/// Builds the message list for the activity suggestion call.
pub(crate) fn suggestion_messages(
    context: &LessonContext,
    lesson: &Lesson,
    extra_instructions: &[String],
) -> Vec<ChatMessage> {
    let prompt = format!(
        "Suggest classroom activities for the lesson \"{}\".\n{}\nAnswer as JSON: \
         {{\"suggestions\": [string]}}",
        lesson.title,
        context_summary(context),
    );
    vec![
        ChatMessage::system(SYSTEM_PROMPT),
        ChatMessage::user(with_corrections(prompt, extra_instructions)),
    ]
}

/// Builds the message list for the activity generation call.
pub(crate) fn activity_messages(
    context: &LessonContext,
    suggestions: &[String],
    extra_instructions: &[String],
) -> Vec<ChatMessage> {
    let listed = suggestions
        .iter()
        .map(|s| format!("- {s}"))
        .collect::<Vec<_>>()
        .join("\n");
    let prompt = format!(
        "Generate full activities from these suggestions:\n{listed}\n{}\nAnswer as \
         JSON: {{\"activities\": [{{\"title\": string, \"kind\": string, \
         \"instructions\": string}}]}}",
        context_summary(context),
    );
    vec![
        ChatMessage::system(SYSTEM_PROMPT),
        ChatMessage::user(with_corrections(prompt, extra_instructions)),
    ]
}

/// Strips a leading/trailing markdown code fence, if present.
pub(crate) fn strip_code_fences(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Skip the language tag on the opening fence line.
    let body = rest.split_once('\n').map_or(rest, |(_, body)| body);
    body.strip_suffix("```").unwrap_or(body).trim()
}

/// Parses a provider response into the expected payload shape.
pub(crate) fn parse_payload<T: DeserializeOwned>(
    text: &str,
    what: &str,
) -> Result<T, OrchestratorError> {
    let cleaned = strip_code_fences(text);
    if cleaned.is_empty() {
        return Err(OrchestratorError::Provider(format!(
            "empty response while expecting {what}"
        )));
    }
    serde_json::from_str(cleaned)
        .map_err(|e| OrchestratorError::JsonParse(format!("{what}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{sample_activities_json, sample_context, sample_lesson_json};

    #[test]
    fn test_strip_code_fences() {
        assert_eq!(strip_code_fences("{\"a\":1}"), "{\"a\":1}");
        assert_eq!(strip_code_fences("```json\n{\"a\":1}\n```"), "{\"a\":1}");
        assert_eq!(strip_code_fences("```\n{\"a\":1}\n```"), "{\"a\":1}");
    }

    #[test]
    fn test_parse_lesson_payload() {
        let lesson: Lesson = parse_payload(&sample_lesson_json(), "lesson").unwrap();
        assert_eq!(lesson.sections.len(), 3);
        assert!(lesson.activity_ids.is_empty());
    }

    #[test]
    fn test_parse_fenced_payload() {
        let fenced = format!("```json\n{}\n```", sample_lesson_json());
        let lesson: Lesson = parse_payload(&fenced, "lesson").unwrap();
        assert_eq!(lesson.title, "The Water Cycle");
    }

    #[test]
    fn test_parse_empty_is_provider_error() {
        let err = parse_payload::<Lesson>("   ", "lesson").unwrap_err();
        assert!(matches!(err, OrchestratorError::Provider(_)));
    }

    #[test]
    fn test_parse_garbage_is_json_error() {
        let err = parse_payload::<Lesson>("not json", "lesson").unwrap_err();
        assert!(matches!(err, OrchestratorError::JsonParse(_)));
    }

    #[test]
    fn test_activity_draft_gets_id() {
        let payload: ActivitiesPayload =
            parse_payload(&sample_activities_json(), "activities").unwrap();
        let activity = payload
            .activities
            .into_iter()
            .next()
            .unwrap()
            .into_activity();
        assert!(!activity.id.is_empty());
        assert_eq!(activity.kind, "experiment");
    }

    #[test]
    fn test_corrections_appended_to_prompt() {
        let context = sample_context();
        let messages = content_messages(&context, &["Respond with strict JSON only.".to_string()]);
        assert_eq!(messages.len(), 2);
        assert!(messages[1].content.contains("strict JSON only"));
        assert!(messages[1].content.contains("the water cycle"));
    }
}
