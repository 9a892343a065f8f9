//! The pipeline orchestrator: seven sequential steps from request
//! context to finalized lesson artifact.
//!
//! Each step runs under the auto-recovery engine; its output is merged
//! into the run's [`PipelineData`] snapshot only after the validation
//! gate accepts it and the completion gate marks the step done. A step
//! that exhausts recovery aborts the run; later steps never start.

mod data;
mod steps;
mod store;

pub use data::{Activity, Lesson, LessonContext, LessonSection, PipelineData};
pub use store::{ArtifactStore, MemoryArtifactStore, StoredArtifact};

use crate::cascade::{CascadeClient, CascadeMetadata};
use crate::core::{PipelineStep, StepStatus};
use crate::errors::{ErrorInfo, OrchestratorError};
use crate::logger::StepLogger;
use crate::provider::{ChatMessage, GenerateOptions};
use crate::recovery::{AutoRecoveryEngine, RecoveryConfig, RecoveryContext, RecoveryState};
use crate::validation::ValidationGate;
use crate::workflow::WorkflowManager;
use serde::Serialize;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use steps::{ActivitiesPayload, SuggestionsPayload};
use tracing::{info, warn};

/// Generation knobs applied to the first attempt of every generative
/// step; recovery corrections adjust them per step from there.
#[derive(Debug, Clone)]
pub struct GenerationDefaults {
    /// Output token budget.
    pub max_tokens: u32,
    /// Sampling temperature.
    pub temperature: f32,
}

impl Default for GenerationDefaults {
    fn default() -> Self {
        let options = GenerateOptions::default();
        Self {
            max_tokens: options.max_tokens,
            temperature: options.temperature,
        }
    }
}

/// One recorded failure from a run.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunError {
    /// The failing step id.
    pub step: u8,
    /// The failing step's name.
    pub step_name: String,
    /// The final classified error.
    pub error: ErrorInfo,
    /// Recovery bookkeeping at the time of the abort.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recovery: Option<RecoveryState>,
}

/// The terminal result of one pipeline run.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineResult {
    /// True iff all seven steps completed.
    pub success: bool,
    /// The run's request id.
    pub request_id: String,
    /// The generated lesson, when content generation got that far.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lesson: Option<Lesson>,
    /// The generated activities.
    pub activities: Vec<Activity>,
    /// The persisted artifact id, when persistence succeeded.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artifact_id: Option<String>,
    /// Per-step and total durations.
    pub timing: serde_json::Value,
    /// Failures recorded during the run, empty on success.
    pub errors: Vec<RunError>,
}

/// What one step's operation produced, merged into the snapshot on
/// acceptance.
#[derive(Debug, Clone)]
enum StepYield {
    Context(LessonContext),
    Lesson(Lesson),
    Suggestions(Vec<String>),
    Activities(Vec<Activity>),
    Persisted { artifact_id: String },
    Attached { lesson: Lesson },
    Finalized,
}

fn apply_yield(data: &mut PipelineData, yielded: &StepYield) {
    match yielded {
        StepYield::Context(context) => data.context = Some(context.clone()),
        StepYield::Lesson(lesson) => data.lesson = Some(lesson.clone()),
        StepYield::Suggestions(suggestions) => data.suggestions = suggestions.clone(),
        StepYield::Activities(activities) => data.activities = activities.clone(),
        StepYield::Persisted { artifact_id } => data.artifact_id = Some(artifact_id.clone()),
        StepYield::Attached { lesson } => {
            data.lesson = Some(lesson.clone());
            data.activities_attached = true;
            data.artifact_ready = true;
        }
        StepYield::Finalized => {}
    }
}

/// Drives one lesson generation run end to end.
pub struct Orchestrator {
    request_id: String,
    logger: Arc<StepLogger>,
    workflow: Arc<WorkflowManager>,
    recovery: AutoRecoveryEngine,
    gate: ValidationGate,
    cascade: Arc<CascadeClient>,
    store: Arc<dyn ArtifactStore>,
    defaults: GenerationDefaults,
}

impl Orchestrator {
    /// Creates an orchestrator for one request. All seven steps are
    /// initialized up front so early status lookups see the full plan.
    #[must_use]
    pub fn new(
        request_id: impl Into<String>,
        cascade: Arc<CascadeClient>,
        store: Arc<dyn ArtifactStore>,
        recovery_config: RecoveryConfig,
    ) -> Self {
        let request_id = request_id.into();
        let logger = Arc::new(StepLogger::new());
        for step in PipelineStep::all() {
            logger.init_step(step.id(), step.name());
        }
        Self {
            workflow: Arc::new(WorkflowManager::new(request_id.clone())),
            recovery: AutoRecoveryEngine::new(recovery_config, logger.clone()),
            gate: ValidationGate::new(),
            logger,
            request_id,
            cascade,
            store,
            defaults: GenerationDefaults::default(),
        }
    }

    /// Overrides the first-attempt generation knobs.
    #[must_use]
    pub fn with_generation_defaults(mut self, defaults: GenerationDefaults) -> Self {
        self.defaults = defaults;
        self
    }

    /// Returns the run's request id.
    #[must_use]
    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    /// Returns the shared step logger.
    #[must_use]
    pub fn logger(&self) -> &Arc<StepLogger> {
        &self.logger
    }

    /// Returns the workflow projection, for listeners and status reads.
    #[must_use]
    pub fn workflow(&self) -> &Arc<WorkflowManager> {
        &self.workflow
    }

    /// Runs the pipeline to its terminal state.
    ///
    /// Never returns early on failure without broadcasting the terminal
    /// notification; callers can rely on exactly one `Complete` or
    /// `Failed` event per run.
    pub async fn run(&self, input: LessonContext) -> PipelineResult {
        let mut data = PipelineData::default();
        info!(request_id = %self.request_id, topic = %input.topic, "pipeline run starting");

        for step in PipelineStep::all() {
            let id = step.id();
            self.workflow.start_step(id);
            if let Err(err) = self.logger.start_step(id) {
                return self.abort(id, &err.to_error_info(), data);
            }

            let started = Instant::now();
            let invocation = AtomicU32::new(0);
            let outcome = self
                .recovery
                .attempt_recovery(
                    id,
                    |rctx| {
                        // Mirror retries into the projection; the logger
                        // transition itself is the engine's job.
                        if invocation.fetch_add(1, Ordering::SeqCst) > 0 {
                            self.workflow.retrying_step(id);
                        }
                        self.execute_step(step, &data, &input, rctx)
                    },
                    RecoveryContext::new(self.defaults.max_tokens, self.defaults.temperature),
                )
                .await;

            match outcome.result {
                Ok(yielded) => {
                    apply_yield(&mut data, &yielded);
                    data.completed_steps.push(id);
                    data.step_durations_ms
                        .insert(id, started.elapsed().as_millis() as u64);
                    self.publish_step_logs(id);
                    self.workflow.complete_step(id);
                }
                Err(error) => {
                    warn!(
                        request_id = %self.request_id,
                        step = id,
                        attempts = outcome.attempts,
                        error = %error.message,
                        "pipeline run aborting"
                    );
                    return self.abort(id, &error, data);
                }
            }
        }

        let result = PipelineResult {
            success: true,
            request_id: self.request_id.clone(),
            lesson: data.lesson,
            activities: data.activities,
            artifact_id: data.artifact_id,
            timing: self.workflow.get_summary(),
            errors: Vec::new(),
        };
        info!(request_id = %self.request_id, "pipeline run complete");
        self.workflow.emit_complete(serde_json::json!({
            "requestId": result.request_id,
            "artifactId": result.artifact_id,
            "timing": result.timing,
        }));
        result
    }

    /// Runs one step's domain operation, then its validation and
    /// completion gates. A gate rejection fails the whole invocation, so
    /// recovery re-runs the operation rather than just re-checking.
    async fn execute_step(
        &self,
        step: PipelineStep,
        data: &PipelineData,
        input: &LessonContext,
        rctx: RecoveryContext,
    ) -> Result<StepYield, OrchestratorError> {
        let id = step.id();
        let yielded = match step {
            PipelineStep::ContextIntake => self.run_context_intake(input),
            PipelineStep::ContentGeneration => self.run_content_generation(data, &rctx).await,
            PipelineStep::ActivitySuggestion => self.run_activity_suggestion(data, &rctx).await,
            PipelineStep::ActivityGeneration => self.run_activity_generation(data, &rctx).await,
            PipelineStep::Persistence => self.run_persistence(data).await,
            PipelineStep::Attachment => self.run_attachment(data).await,
            PipelineStep::Finalization => self.run_finalization(data),
        }?;

        let mut candidate = data.clone();
        apply_yield(&mut candidate, &yielded);
        let outcome = self.gate.validate_step(id, &candidate, &self.logger);
        if !outcome.valid {
            let detail = outcome
                .errors
                .iter()
                .map(|e| e.check.as_str())
                .collect::<Vec<_>>()
                .join(", ");
            return Err(OrchestratorError::ValidationRejected { step_id: id, detail });
        }

        let completed = self
            .logger
            .complete_step(id, self.step_result(step, &candidate))?;
        if !completed {
            return Err(OrchestratorError::CompletionRejected {
                step_id: id,
                detail: "required sub-phases incomplete or checks failed".to_string(),
            });
        }
        Ok(yielded)
    }

    fn run_context_intake(&self, input: &LessonContext) -> Result<StepYield, OrchestratorError> {
        let id = PipelineStep::ContextIntake.id();
        let topic = input.topic.trim();
        if topic.is_empty() {
            self.logger.mark_sub_phase(
                id,
                "context-loaded",
                false,
                Some(serde_json::json!({ "reason": "empty topic" })),
            );
            return Err(OrchestratorError::InvalidContext(
                "topic must not be empty".to_string(),
            ));
        }
        let normalized = LessonContext {
            topic: topic.to_string(),
            sections: input.effective_sections(),
            ..input.clone()
        };
        self.logger.mark_sub_phase(
            id,
            "context-loaded",
            true,
            Some(serde_json::json!({ "sections": normalized.sections.len() })),
        );
        Ok(StepYield::Context(normalized))
    }

    async fn run_content_generation(
        &self,
        data: &PipelineData,
        rctx: &RecoveryContext,
    ) -> Result<StepYield, OrchestratorError> {
        let id = PipelineStep::ContentGeneration.id();
        let context = require_context(data)?;
        let messages = steps::content_messages(context, &rctx.extra_instructions);

        self.logger.mark_sub_phase(id, "command-sent", true, None);
        let (text, meta) = match self.generate(&messages, rctx).await {
            Ok(generated) => generated,
            Err(err) => {
                self.logger.mark_sub_phase(id, "backend-received", false, None);
                return Err(err);
            }
        };
        self.logger
            .mark_sub_phase(id, "backend-received", true, Some(metadata_detail(&meta)));

        match steps::parse_payload::<Lesson>(&text, "lesson") {
            Ok(lesson) => {
                self.logger.mark_sub_phase(id, "ai-completed", true, None);
                Ok(StepYield::Lesson(lesson))
            }
            Err(err) => {
                self.logger.mark_sub_phase(id, "ai-completed", false, None);
                Err(err)
            }
        }
    }

    async fn run_activity_suggestion(
        &self,
        data: &PipelineData,
        rctx: &RecoveryContext,
    ) -> Result<StepYield, OrchestratorError> {
        let id = PipelineStep::ActivitySuggestion.id();
        let context = require_context(data)?;
        let lesson = require_lesson(data)?;
        let messages = steps::suggestion_messages(context, lesson, &rctx.extra_instructions);

        self.logger.mark_sub_phase(id, "command-sent", true, None);
        let (text, _meta) = self.generate(&messages, rctx).await?;

        match steps::parse_payload::<SuggestionsPayload>(&text, "suggestions") {
            Ok(payload) => {
                self.logger.mark_sub_phase(
                    id,
                    "ai-completed",
                    true,
                    Some(serde_json::json!({ "count": payload.suggestions.len() })),
                );
                Ok(StepYield::Suggestions(payload.suggestions))
            }
            Err(err) => {
                self.logger.mark_sub_phase(id, "ai-completed", false, None);
                Err(err)
            }
        }
    }

    async fn run_activity_generation(
        &self,
        data: &PipelineData,
        rctx: &RecoveryContext,
    ) -> Result<StepYield, OrchestratorError> {
        let id = PipelineStep::ActivityGeneration.id();
        let context = require_context(data)?;
        let messages = steps::activity_messages(context, &data.suggestions, &rctx.extra_instructions);

        self.logger.mark_sub_phase(id, "command-sent", true, None);
        let (text, meta) = match self.generate(&messages, rctx).await {
            Ok(generated) => generated,
            Err(err) => {
                self.logger.mark_sub_phase(id, "backend-received", false, None);
                return Err(err);
            }
        };
        self.logger
            .mark_sub_phase(id, "backend-received", true, Some(metadata_detail(&meta)));

        match steps::parse_payload::<ActivitiesPayload>(&text, "activities") {
            Ok(payload) => {
                let activities: Vec<Activity> = payload
                    .activities
                    .into_iter()
                    .map(steps::ActivityDraft::into_activity)
                    .collect();
                self.logger.mark_sub_phase(
                    id,
                    "ai-completed",
                    true,
                    Some(serde_json::json!({ "count": activities.len() })),
                );
                Ok(StepYield::Activities(activities))
            }
            Err(err) => {
                self.logger.mark_sub_phase(id, "ai-completed", false, None);
                Err(err)
            }
        }
    }

    async fn run_persistence(&self, data: &PipelineData) -> Result<StepYield, OrchestratorError> {
        let id = PipelineStep::Persistence.id();
        let lesson = require_lesson(data)?;
        let artifact_id = self.store.save(lesson, &data.activities).await?;
        self.logger.mark_sub_phase(
            id,
            "data-saved",
            true,
            Some(serde_json::json!({ "artifactId": artifact_id })),
        );
        Ok(StepYield::Persisted { artifact_id })
    }

    async fn run_attachment(&self, data: &PipelineData) -> Result<StepYield, OrchestratorError> {
        let id = PipelineStep::Attachment.id();
        let artifact_id = data
            .artifact_id
            .as_deref()
            .ok_or_else(|| OrchestratorError::Internal("no artifact to attach to".to_string()))?;
        let mut lesson = require_lesson(data)?.clone();
        lesson.activity_ids = data.activities.iter().map(|a| a.id.clone()).collect();
        self.store.attach(artifact_id, &lesson).await?;
        self.logger.mark_sub_phase(
            id,
            "activities-attached",
            true,
            Some(serde_json::json!({ "count": lesson.activity_ids.len() })),
        );
        Ok(StepYield::Attached { lesson })
    }

    fn run_finalization(&self, data: &PipelineData) -> Result<StepYield, OrchestratorError> {
        let id = PipelineStep::Finalization.id();
        let ready = self.gate.can_finalize(data);
        self.logger.mark_sub_phase(id, "validation-passed", ready, None);
        if ready {
            Ok(StepYield::Finalized)
        } else {
            Err(OrchestratorError::ValidationRejected {
                step_id: id,
                detail: "final consistency checks failed".to_string(),
            })
        }
    }

    /// Issues one generative call through the cascade, honoring the
    /// rate-limit delay the corrections may have accumulated.
    async fn generate(
        &self,
        messages: &[ChatMessage],
        rctx: &RecoveryContext,
    ) -> Result<(String, CascadeMetadata), OrchestratorError> {
        if rctx.rate_limit_delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(rctx.rate_limit_delay_ms)).await;
        }
        let options = GenerateOptions {
            temperature: rctx.temperature,
            max_tokens: rctx.max_tokens,
            ..GenerateOptions::default()
        };
        let response = self.cascade.generate_with_cascade(messages, &options).await?;
        Ok((response.response.text, response.metadata))
    }

    fn step_result(&self, step: PipelineStep, data: &PipelineData) -> serde_json::Value {
        match step {
            PipelineStep::ContextIntake => serde_json::json!({
                "sections": data.context.as_ref().map(|c| c.sections.clone()),
            }),
            PipelineStep::ContentGeneration => serde_json::json!({
                "title": data.lesson.as_ref().map(|l| l.title.clone()),
                "sections": data.lesson.as_ref().map_or(0, |l| l.sections.len()),
            }),
            PipelineStep::ActivitySuggestion => serde_json::json!({
                "suggestions": data.suggestions.len(),
            }),
            PipelineStep::ActivityGeneration => serde_json::json!({
                "activities": data.activities.len(),
            }),
            PipelineStep::Persistence => serde_json::json!({
                "artifactId": data.artifact_id,
            }),
            PipelineStep::Attachment => serde_json::json!({
                "attached": data.activities_attached,
            }),
            PipelineStep::Finalization => serde_json::json!({
                "requestId": self.request_id,
                "artifactReady": data.artifact_ready,
            }),
        }
    }

    fn publish_step_logs(&self, id: u8) {
        if let Some(step) = self.logger.get_step_logs(id) {
            self.workflow.set_step_logs(id, step.events);
        }
    }

    fn abort(&self, id: u8, error: &ErrorInfo, data: PipelineData) -> PipelineResult {
        self.publish_step_logs(id);
        // The logger already holds Error; mirror it outward.
        if self.logger.step_status(id) != Some(StepStatus::Error) {
            let info = error.clone();
            self.logger.fail_step(id, &info, false);
            self.publish_step_logs(id);
        }
        self.workflow.fail_step(id);

        let errors = vec![RunError {
            step: id,
            step_name: PipelineStep::from_id(id).map_or_else(String::new, |s| s.name().to_string()),
            error: error.clone(),
            recovery: self.recovery.get_recovery_stats(id),
        }];
        let result = PipelineResult {
            success: false,
            request_id: self.request_id.clone(),
            lesson: data.lesson,
            activities: data.activities,
            artifact_id: data.artifact_id,
            timing: self.workflow.get_summary(),
            errors,
        };
        self.workflow.emit_failed(serde_json::json!({
            "requestId": result.request_id,
            "step": id,
            "error": result.errors[0].error,
        }));
        result
    }
}

fn require_context(data: &PipelineData) -> Result<&LessonContext, OrchestratorError> {
    data.context
        .as_ref()
        .ok_or_else(|| OrchestratorError::Internal("context intake has not run".to_string()))
}

fn require_lesson(data: &PipelineData) -> Result<&Lesson, OrchestratorError> {
    data.lesson
        .as_ref()
        .ok_or_else(|| OrchestratorError::Internal("content generation has not run".to_string()))
}

fn metadata_detail(metadata: &CascadeMetadata) -> serde_json::Value {
    serde_json::json!({
        "model": metadata.model,
        "provider": metadata.provider,
        "attempts": metadata.attempts,
        "usedFallback": metadata.used_fallback,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cascade::CascadeConfig;
    use crate::testing::{
        sample_activities_json, sample_context, sample_lesson_json, sample_suggestions_json,
        StaticProvider,
    };
    use crate::workflow::CollectingListener;
    use pretty_assertions::assert_eq;

    fn fixture_responder() -> Arc<StaticProvider> {
        Arc::new(StaticProvider::with_responder("primary", |messages| {
            let prompt = messages
                .last()
                .map(|m| m.content.as_str())
                .unwrap_or_default();
            if prompt.starts_with("Suggest classroom activities") {
                sample_suggestions_json()
            } else if prompt.starts_with("Generate full activities") {
                sample_activities_json()
            } else {
                sample_lesson_json()
            }
        }))
    }

    fn orchestrator(provider: Arc<StaticProvider>) -> Orchestrator {
        let cascade = Arc::new(CascadeClient::new(provider, None, CascadeConfig::default()));
        Orchestrator::new(
            "req-test",
            cascade,
            Arc::new(MemoryArtifactStore::new()),
            RecoveryConfig::new()
                .with_initial_backoff_ms(1)
                .with_max_backoff_ms(2),
        )
    }

    #[tokio::test]
    async fn test_full_run_succeeds() {
        let orchestrator = orchestrator(fixture_responder());
        let listener = Arc::new(CollectingListener::new());
        orchestrator.workflow().subscribe(listener.clone());

        let result = orchestrator.run(sample_context()).await;

        assert!(result.success, "errors: {:?}", result.errors);
        assert_eq!(result.request_id, "req-test");
        let lesson = result.lesson.unwrap();
        assert_eq!(lesson.title, "The Water Cycle");
        assert_eq!(lesson.activity_ids.len(), 2);
        assert_eq!(result.activities.len(), 2);
        assert!(result.artifact_id.is_some());

        let state = orchestrator.workflow().get_state();
        assert!(state.is_complete);
        assert_eq!(state.progress_percent, 100);

        // Exactly one terminal notification, and it is Complete.
        let terminal: Vec<_> = listener
            .events()
            .into_iter()
            .filter(|e| {
                matches!(
                    e.event_type,
                    crate::workflow::ProgressEventType::Complete
                        | crate::workflow::ProgressEventType::Failed
                )
            })
            .collect();
        assert_eq!(terminal.len(), 1);
    }

    #[tokio::test]
    async fn test_empty_topic_aborts_at_intake() {
        let orchestrator = orchestrator(fixture_responder());
        let mut context = sample_context();
        context.topic = "   ".to_string();

        let result = orchestrator.run(context).await;

        assert!(!result.success);
        assert_eq!(result.errors[0].step, 1);
        assert_eq!(result.errors[0].step_name, "context-intake");
        let state = orchestrator.workflow().get_state();
        assert!(state.has_error);
        // Later steps never started.
        assert_eq!(state.steps[&2].status, StepStatus::Pending);
    }

    #[tokio::test]
    async fn test_bad_json_recovers_on_retry() {
        use crate::testing::ScriptedProvider;

        let provider = Arc::new(ScriptedProvider::new("primary"));
        provider.script(
            "gemini-2.0-flash",
            vec![
                Ok("this is not json".to_string()),
                Ok(sample_lesson_json()),
                Ok(sample_suggestions_json()),
                Ok(sample_activities_json()),
            ],
        );
        let cascade = Arc::new(CascadeClient::new(provider, None, CascadeConfig::default()));
        let orchestrator = Orchestrator::new(
            "req-retry",
            cascade,
            Arc::new(MemoryArtifactStore::new()),
            RecoveryConfig::new()
                .with_initial_backoff_ms(1)
                .with_max_backoff_ms(2),
        );

        let result = orchestrator.run(sample_context()).await;
        assert!(result.success, "errors: {:?}", result.errors);

        // The parse failure left a retry trace on step 2.
        let step = orchestrator.logger().get_step_logs(2).unwrap();
        assert_eq!(step.retry_count, 1);
        assert_eq!(step.status, StepStatus::Completed);
    }

    #[tokio::test]
    async fn test_exhaustion_aborts_with_recovery_stats() {
        let provider = Arc::new(StaticProvider::new("primary", "never json"));
        let cascade = Arc::new(CascadeClient::new(provider, None, CascadeConfig::default()));
        let orchestrator = Orchestrator::new(
            "req-fail",
            cascade,
            Arc::new(MemoryArtifactStore::new()),
            RecoveryConfig::new()
                .with_max_retries(2)
                .with_initial_backoff_ms(1)
                .with_max_backoff_ms(2),
        );

        let result = orchestrator.run(sample_context()).await;

        assert!(!result.success);
        // Intake succeeds locally, content generation is the first
        // provider-backed step.
        assert_eq!(result.errors[0].step, 2);
        let recovery = result.errors[0].recovery.as_ref().unwrap();
        assert_eq!(recovery.attempts, 2);
        assert_eq!(
            orchestrator.logger().step_status(2),
            Some(StepStatus::Error)
        );
    }
}
