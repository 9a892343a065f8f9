//! Per-step structured logger and sub-phase tracker.
//!
//! [`StepLogger`] owns the canonical state of every step in a pipeline
//! run: status, timestamped events, sub-phase completion flags, validation
//! check history, and retry counts. It performs no I/O; the workflow
//! projection and HTTP layers read from it.

use crate::core::{
    required_phases, CheckResult, Step, StepEvent, StepStatus, SubPhase,
};
use crate::errors::{ErrorInfo, OrchestratorError};
use crate::utils::iso_timestamp;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use tracing::warn;

/// Event type alias re-exported for callers recording events.
pub use crate::core::EventType;

/// The canonical state holder for one pipeline run's steps.
///
/// Completion is itself a gate: [`StepLogger::complete_step`] refuses to
/// advance a step whose required sub-phases are missing or whose recorded
/// validation checks failed, so no caller can prematurely declare
/// success.
#[derive(Debug, Default)]
pub struct StepLogger {
    steps: RwLock<BTreeMap<u8, Step>>,
}

impl StepLogger {
    /// Creates an empty logger.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Re-hydrates a logger from previously exported steps.
    ///
    /// Preserves step count, event ordering, and final status.
    #[must_use]
    pub fn from_steps(steps: Vec<Step>) -> Self {
        let map = steps.into_iter().map(|s| (s.id, s)).collect();
        Self {
            steps: RwLock::new(map),
        }
    }

    /// Initializes a step entry. Idempotent: re-initialization of an
    /// existing step has no effect, so re-running pipeline setup across
    /// retries is safe.
    pub fn init_step(&self, id: u8, name: impl Into<String>) {
        self.steps
            .write()
            .entry(id)
            .or_insert_with(|| Step::new(id, name));
    }

    /// Marks a step as running and stamps its start time.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError::UnknownStep`] if `init_step` was never
    /// called for this id.
    pub fn start_step(&self, id: u8) -> Result<(), OrchestratorError> {
        let mut steps = self.steps.write();
        let step = steps.get_mut(&id).ok_or(OrchestratorError::UnknownStep(id))?;
        step.status = StepStatus::Running;
        step.started_at = Some(iso_timestamp());
        step.events.push(StepEvent::info(format!("step '{}' started", step.name)));
        Ok(())
    }

    /// Appends an event to a step's history and returns a copy of it.
    ///
    /// Unknown step ids are non-fatal: a warning is logged and no state
    /// changes.
    pub fn log_event(
        &self,
        id: u8,
        event_type: EventType,
        message: impl Into<String>,
        data: Option<serde_json::Value>,
    ) -> Option<StepEvent> {
        let mut steps = self.steps.write();
        let Some(step) = steps.get_mut(&id) else {
            warn!(step_id = id, "log_event on unknown step id, ignoring");
            return None;
        };
        let mut event = StepEvent::new(event_type, message);
        if let Some(data) = data {
            event = event.with_data(data);
        }
        step.events.push(event.clone());
        Some(event)
    }

    /// Records a sub-phase completion state and emits a matching
    /// success/error event.
    pub fn mark_sub_phase(
        &self,
        id: u8,
        phase_name: &str,
        success: bool,
        detail: Option<serde_json::Value>,
    ) {
        let mut steps = self.steps.write();
        let Some(step) = steps.get_mut(&id) else {
            warn!(step_id = id, phase = phase_name, "mark_sub_phase on unknown step id, ignoring");
            return;
        };
        step.sub_phases.insert(
            phase_name.to_string(),
            SubPhase {
                completed: success,
                detail: detail.clone(),
            },
        );
        let event = if success {
            StepEvent::success(format!("sub-phase '{phase_name}' completed"))
        } else {
            StepEvent::error(format!("sub-phase '{phase_name}' failed"))
        };
        step.events.push(match detail {
            Some(d) => event.with_data(d),
            None => event,
        });
    }

    /// Attempts to mark a step complete.
    ///
    /// Validates before mutating: every sub-phase required for this step
    /// id must be present and completed, and no recorded validation check
    /// may have failed. On rejection, records an error event describing
    /// the refusal and returns `Ok(false)` without changing status.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError::UnknownStep`] for an uninitialized id.
    pub fn complete_step(
        &self,
        id: u8,
        result: serde_json::Value,
    ) -> Result<bool, OrchestratorError> {
        let mut steps = self.steps.write();
        let step = steps.get_mut(&id).ok_or(OrchestratorError::UnknownStep(id))?;

        let missing = step.missing_phases();
        if !missing.is_empty() {
            step.events.push(
                StepEvent::error(format!(
                    "completion rejected: missing sub-phases [{}]",
                    missing.join(", ")
                ))
                .with_data(serde_json::json!({
                    "required": required_phases(id),
                    "missing": missing,
                })),
            );
            return Ok(false);
        }

        if step.has_failed_checks() {
            let failed: Vec<&str> = step
                .validation_checks
                .iter()
                .filter(|c| !c.passed)
                .map(|c| c.name.as_str())
                .collect();
            step.events.push(
                StepEvent::error(format!(
                    "completion rejected: failed validation checks [{}]",
                    failed.join(", ")
                ))
                .with_data(serde_json::json!({ "failedChecks": failed })),
            );
            return Ok(false);
        }

        step.status = StepStatus::Completed;
        step.ended_at = Some(iso_timestamp());
        step.result = Some(result);
        step.events.push(StepEvent::success(format!("step '{}' completed", step.name)));
        Ok(true)
    }

    /// Flips a step back from `Retrying` to `Running` for the next
    /// attempt. Any other current status is left untouched; start time is
    /// not re-stamped.
    pub fn resume_step(&self, id: u8) {
        let mut steps = self.steps.write();
        if let Some(step) = steps.get_mut(&id) {
            if step.status == StepStatus::Retrying {
                step.status = StepStatus::Running;
            }
        }
    }

    /// Records a step failure.
    ///
    /// Sets the status to `Retrying` when `can_retry` is true, otherwise
    /// to the terminal `Error`; increments the retry counter and records
    /// the classified error.
    pub fn fail_step(&self, id: u8, error: &ErrorInfo, can_retry: bool) {
        let mut steps = self.steps.write();
        let Some(step) = steps.get_mut(&id) else {
            warn!(step_id = id, "fail_step on unknown step id, ignoring");
            return;
        };
        step.status = if can_retry {
            StepStatus::Retrying
        } else {
            StepStatus::Error
        };
        if !can_retry {
            step.ended_at = Some(iso_timestamp());
        }
        step.retry_count += 1;
        step.last_error = Some(error.clone());
        step.events.push(
            StepEvent::error(format!("step failed: {}", error.message)).with_data(
                serde_json::json!({
                    "kind": error.kind.as_str(),
                    "canRetry": can_retry,
                    "retryCount": step.retry_count,
                }),
            ),
        );
    }

    /// Clears a step's current validation check set.
    ///
    /// Checks are one set per validation call: the gate calls this
    /// before recording a fresh run so a superseded failure does not
    /// block completion forever across retries.
    pub fn begin_validation(&self, id: u8) {
        let mut steps = self.steps.write();
        if let Some(step) = steps.get_mut(&id) {
            step.validation_checks.clear();
        }
    }

    /// Appends a validation check outcome to the step's history.
    ///
    /// Recording alone blocks nothing; [`StepLogger::complete_step`]
    /// consumes this history when deciding whether the step may complete.
    pub fn add_validation_check(
        &self,
        id: u8,
        check_name: &str,
        passed: bool,
        detail: Option<String>,
    ) {
        let mut steps = self.steps.write();
        let Some(step) = steps.get_mut(&id) else {
            warn!(step_id = id, check = check_name, "add_validation_check on unknown step id, ignoring");
            return;
        };
        step.validation_checks.push(CheckResult {
            name: check_name.to_string(),
            passed,
            detail,
        });
    }

    /// Returns a snapshot of one step's state.
    #[must_use]
    pub fn get_step_logs(&self, id: u8) -> Option<Step> {
        self.steps.read().get(&id).cloned()
    }

    /// Returns a snapshot of every step, ordered by id.
    #[must_use]
    pub fn get_all_logs(&self) -> Vec<Step> {
        self.steps.read().values().cloned().collect()
    }

    /// Returns the current status of a step.
    #[must_use]
    pub fn step_status(&self, id: u8) -> Option<StepStatus> {
        self.steps.read().get(&id).map(|s| s.status)
    }

    /// Returns true iff every known step has reached `Completed`.
    #[must_use]
    pub fn can_finalize(&self) -> bool {
        let steps = self.steps.read();
        !steps.is_empty() && steps.values().all(|s| s.status == StepStatus::Completed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ErrorKind;
    use pretty_assertions::assert_eq;

    fn logger_with_step(id: u8, name: &str) -> StepLogger {
        let logger = StepLogger::new();
        logger.init_step(id, name);
        logger.start_step(id).unwrap();
        logger
    }

    #[test]
    fn test_init_is_idempotent() {
        let logger = StepLogger::new();
        logger.init_step(1, "context-intake");
        logger.start_step(1).unwrap();
        logger.mark_sub_phase(1, "context-loaded", true, None);

        // Re-initialization must not reset accumulated state.
        logger.init_step(1, "context-intake");
        let step = logger.get_step_logs(1).unwrap();
        assert_eq!(step.status, StepStatus::Running);
        assert!(step.sub_phases.contains_key("context-loaded"));
    }

    #[test]
    fn test_start_unknown_step_is_error() {
        let logger = StepLogger::new();
        assert!(matches!(
            logger.start_step(3),
            Err(OrchestratorError::UnknownStep(3))
        ));
    }

    #[test]
    fn test_log_event_unknown_step_is_non_fatal() {
        let logger = StepLogger::new();
        assert!(logger.log_event(9, EventType::Info, "hello", None).is_none());
    }

    #[test]
    fn test_complete_rejects_missing_phases() {
        let logger = logger_with_step(2, "content-generation");
        logger.mark_sub_phase(2, "ai-completed", true, None);

        let completed = logger.complete_step(2, serde_json::json!({})).unwrap();
        assert!(!completed);
        // Status must remain Running, untouched by the rejection.
        assert_eq!(logger.step_status(2), Some(StepStatus::Running));

        let step = logger.get_step_logs(2).unwrap();
        let last = step.events.last().unwrap();
        assert_eq!(last.event_type, EventType::Error);
        assert!(last.message.contains("command-sent"));
    }

    #[test]
    fn test_complete_rejects_failed_checks() {
        let logger = logger_with_step(1, "context-intake");
        logger.mark_sub_phase(1, "context-loaded", true, None);
        logger.add_validation_check(1, "context-topic-present", false, None);

        assert!(!logger.complete_step(1, serde_json::json!({})).unwrap());
        assert_eq!(logger.step_status(1), Some(StepStatus::Running));
    }

    #[test]
    fn test_complete_succeeds_when_gated_conditions_hold() {
        let logger = logger_with_step(2, "content-generation");
        logger.mark_sub_phase(2, "command-sent", true, None);
        logger.mark_sub_phase(2, "backend-received", true, None);
        logger.mark_sub_phase(2, "ai-completed", true, None);
        logger.add_validation_check(2, "lesson-parsed", true, None);

        assert!(logger.complete_step(2, serde_json::json!({"ok": true})).unwrap());
        let step = logger.get_step_logs(2).unwrap();
        assert_eq!(step.status, StepStatus::Completed);
        assert!(step.ended_at.is_some());
        assert_eq!(step.result.unwrap()["ok"], true);
    }

    #[test]
    fn test_terminal_step_with_single_phase() {
        let logger = logger_with_step(7, "finalization");
        logger.mark_sub_phase(7, "validation-passed", true, None);
        assert!(logger.complete_step(7, serde_json::json!({})).unwrap());
        assert_eq!(logger.step_status(7), Some(StepStatus::Completed));
    }

    #[test]
    fn test_fail_step_retrying_then_terminal() {
        let logger = logger_with_step(4, "activity-generation");
        let error = ErrorInfo::classify("request timed out");
        assert_eq!(error.kind, ErrorKind::Timeout);

        logger.fail_step(4, &error, true);
        assert_eq!(logger.step_status(4), Some(StepStatus::Retrying));

        logger.fail_step(4, &error, false);
        let step = logger.get_step_logs(4).unwrap();
        assert_eq!(step.status, StepStatus::Error);
        assert_eq!(step.retry_count, 2);
        assert!(step.ended_at.is_some());
    }

    #[test]
    fn test_can_finalize() {
        let logger = StepLogger::new();
        assert!(!logger.can_finalize());

        logger.init_step(1, "context-intake");
        logger.start_step(1).unwrap();
        logger.mark_sub_phase(1, "context-loaded", true, None);
        assert!(!logger.can_finalize());

        logger.complete_step(1, serde_json::json!({})).unwrap();
        assert!(logger.can_finalize());
    }

    #[test]
    fn test_begin_validation_supersedes_failed_checks() {
        let logger = logger_with_step(1, "context-intake");
        logger.mark_sub_phase(1, "context-loaded", true, None);
        logger.add_validation_check(1, "context-topic-present", false, None);
        assert!(!logger.complete_step(1, serde_json::json!({})).unwrap());

        // A fresh validation run replaces the failed set entirely.
        logger.begin_validation(1);
        logger.add_validation_check(1, "context-topic-present", true, None);
        assert!(logger.complete_step(1, serde_json::json!({})).unwrap());
    }

    #[test]
    fn test_round_trip_rehydration() {
        let logger = logger_with_step(1, "context-intake");
        logger.mark_sub_phase(1, "context-loaded", true, None);
        logger.log_event(1, EventType::Debug, "loaded 3 sections", None);
        logger.complete_step(1, serde_json::json!({})).unwrap();
        logger.init_step(2, "content-generation");

        let exported = logger.get_all_logs();
        let rehydrated = StepLogger::from_steps(exported.clone());
        let back = rehydrated.get_all_logs();

        assert_eq!(back.len(), exported.len());
        for (a, b) in exported.iter().zip(back.iter()) {
            assert_eq!(a.id, b.id);
            assert_eq!(a.status, b.status);
            let a_msgs: Vec<&String> = a.events.iter().map(|e| &e.message).collect();
            let b_msgs: Vec<&String> = b.events.iter().map(|e| &e.message).collect();
            assert_eq!(a_msgs, b_msgs);
        }
    }
}
