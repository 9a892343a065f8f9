//! Auto-recovery engine: classification-driven retry with exponential
//! backoff and corrective parameter adjustments.
//!
//! The engine wraps an arbitrary asynchronous operation. On failure it
//! classifies the error, optionally mutates the operation's input
//! ("smart correction"), waits an exponentially increasing backoff with
//! jitter, and retries up to a bound. Only the wrapped operation's own
//! failure triggers a retry; once it succeeds the engine returns
//! immediately.

use crate::errors::{ErrorInfo, ErrorKind, OrchestratorError};
use crate::logger::{EventType, StepLogger};
use parking_lot::RwLock;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Configuration for the recovery loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoveryConfig {
    /// Maximum operation invocations per `attempt_recovery` call.
    pub max_retries: u32,
    /// Base backoff in milliseconds.
    pub initial_backoff_ms: u64,
    /// Backoff growth factor per attempt.
    pub backoff_multiplier: f64,
    /// Backoff cap in milliseconds (before jitter).
    pub max_backoff_ms: u64,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff_ms: 1000,
            backoff_multiplier: 2.0,
            max_backoff_ms: 30_000,
        }
    }
}

impl RecoveryConfig {
    /// Creates the default config.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the retry bound.
    #[must_use]
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Sets the base backoff.
    #[must_use]
    pub fn with_initial_backoff_ms(mut self, ms: u64) -> Self {
        self.initial_backoff_ms = ms;
        self
    }

    /// Sets the backoff cap.
    #[must_use]
    pub fn with_max_backoff_ms(mut self, ms: u64) -> Self {
        self.max_backoff_ms = ms;
        self
    }
}

/// Jitter fraction applied on top of the capped backoff.
const JITTER_RATIO: f64 = 0.3;

/// Calculates the backoff delay for a 1-based attempt number.
///
/// `base = min(initial * multiplier^(attempt-1), max)`, plus jitter drawn
/// uniformly from `[0, 0.3 * base]`.
#[must_use]
pub fn calculate_backoff(attempt: u32, config: &RecoveryConfig) -> Duration {
    let exponent = attempt.saturating_sub(1);
    let raw = config.initial_backoff_ms as f64 * config.backoff_multiplier.powi(exponent as i32);
    let base = raw.min(config.max_backoff_ms as f64);
    let jitter = rand::thread_rng().gen_range(0.0..=JITTER_RATIO) * base;
    Duration::from_millis((base + jitter) as u64)
}

/// The mutable input handed to the wrapped operation on every attempt.
///
/// Smart corrections adjust these knobs between attempts; they raise the
/// odds of success on retry without changing what is being attempted.
#[derive(Debug, Clone, Default)]
pub struct RecoveryContext {
    /// Corrective instructions appended to the prompt by corrections.
    pub extra_instructions: Vec<String>,
    /// Output token budget for the generative call.
    pub max_tokens: u32,
    /// Sampling temperature for the generative call.
    pub temperature: f32,
    /// Delay the caller must honor before its next provider call.
    pub rate_limit_delay_ms: u64,
}

impl RecoveryContext {
    /// Creates a context with the given generation knobs.
    #[must_use]
    pub fn new(max_tokens: u32, temperature: f32) -> Self {
        Self {
            extra_instructions: Vec::new(),
            max_tokens,
            temperature,
            rate_limit_delay_ms: 0,
        }
    }
}

/// Record of one applied correction.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CorrectionRecord {
    /// The error kind that triggered the correction.
    pub kind: ErrorKind,
    /// What was changed.
    pub description: String,
    /// The attempt the correction was applied before.
    pub attempt: u32,
}

/// Applies the correction mapped to an error kind, mutating the context.
///
/// Returns a description of the applied change, or `None` for kinds that
/// retry bare.
pub fn apply_smart_correction(kind: ErrorKind, ctx: &mut RecoveryContext) -> Option<String> {
    match kind {
        ErrorKind::JsonParse => {
            ctx.extra_instructions.push(
                "Respond with strict JSON only. No prose, no markdown fences.".to_string(),
            );
            Some("appended strict-JSON instruction".to_string())
        }
        ErrorKind::Timeout => {
            let reduced = (f64::from(ctx.max_tokens) * 0.7) as u32;
            ctx.max_tokens = reduced.max(1);
            Some(format!("reduced token budget to {}", ctx.max_tokens))
        }
        ErrorKind::RateLimit => {
            ctx.rate_limit_delay_ms = ctx.rate_limit_delay_ms.saturating_add(2000);
            Some(format!(
                "increased pre-call delay to {}ms",
                ctx.rate_limit_delay_ms
            ))
        }
        ErrorKind::Validation => {
            ctx.extra_instructions.push(
                "The previous answer did not match the expected format. \
                 Follow the requested field names and structure exactly."
                    .to_string(),
            );
            Some("appended format-corrective instruction".to_string())
        }
        ErrorKind::EmptyResponse => {
            ctx.temperature = (ctx.temperature + 0.1).min(1.0);
            Some(format!("raised temperature to {:.2}", ctx.temperature))
        }
        ErrorKind::Network
        | ErrorKind::Auth
        | ErrorKind::ModelNotFound
        | ErrorKind::Unknown => None,
    }
}

/// Per-step retry bookkeeping, cleared on success or explicit reset.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecoveryState {
    /// Operation invocations made for the current recovery call.
    pub attempts: u32,
    /// The most recent classified failure.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<ErrorInfo>,
    /// Corrections applied, in order.
    pub corrections: Vec<CorrectionRecord>,
}

/// The result of one `attempt_recovery` call.
#[derive(Debug)]
pub struct RecoveryOutcome<T> {
    /// The wrapped operation's value, or the final classified error.
    pub result: Result<T, ErrorInfo>,
    /// How many times the operation was invoked.
    pub attempts: u32,
    /// True iff the retry budget was exhausted.
    pub exhausted: bool,
}

impl<T> RecoveryOutcome<T> {
    /// Returns true if the wrapped operation eventually succeeded.
    #[must_use]
    pub fn success(&self) -> bool {
        self.result.is_ok()
    }
}

/// Wraps step operations with classification, correction, and bounded
/// retry. Records every attempt into the shared [`StepLogger`].
pub struct AutoRecoveryEngine {
    config: RecoveryConfig,
    logger: Arc<StepLogger>,
    state: RwLock<BTreeMap<u8, RecoveryState>>,
}

impl AutoRecoveryEngine {
    /// Creates an engine recording into the given logger.
    #[must_use]
    pub fn new(config: RecoveryConfig, logger: Arc<StepLogger>) -> Self {
        Self {
            config,
            logger,
            state: RwLock::new(BTreeMap::new()),
        }
    }

    /// Runs `operation` with bounded retry and smart corrections.
    ///
    /// The operation is invoked at most `max_retries` times. On success
    /// the step's recovery state is cleared and the engine returns
    /// immediately. On exhaustion the step is failed terminally via
    /// [`StepLogger::fail_step`].
    pub async fn attempt_recovery<T, F, Fut>(
        &self,
        step_id: u8,
        operation: F,
        context: RecoveryContext,
    ) -> RecoveryOutcome<T>
    where
        F: Fn(RecoveryContext) -> Fut,
        Fut: Future<Output = Result<T, OrchestratorError>>,
    {
        let mut ctx = context;
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;
            self.state.write().entry(step_id).or_default().attempts = attempt;

            if attempt > 1 {
                self.logger.resume_step(step_id);
                self.logger.log_event(
                    step_id,
                    EventType::Retry,
                    format!("retry attempt {attempt} of {}", self.config.max_retries),
                    None,
                );

                // Correct the context against the last classified failure.
                let last_kind = self
                    .state
                    .read()
                    .get(&step_id)
                    .and_then(|s| s.last_error.as_ref().map(|e| e.kind));
                if let Some(kind) = last_kind {
                    if let Some(description) = apply_smart_correction(kind, &mut ctx) {
                        debug!(step_id, kind = kind.as_str(), %description, "applied smart correction");
                        self.state
                            .write()
                            .entry(step_id)
                            .or_default()
                            .corrections
                            .push(CorrectionRecord {
                                kind,
                                description: description.clone(),
                                attempt,
                            });
                        self.logger.log_event(
                            step_id,
                            EventType::Info,
                            format!("smart correction: {description}"),
                            Some(serde_json::json!({ "kind": kind.as_str() })),
                        );
                    }
                }
            }

            match operation(ctx.clone()).await {
                Ok(value) => {
                    self.logger.log_event(
                        step_id,
                        EventType::Success,
                        format!("operation succeeded on attempt {attempt}"),
                        None,
                    );
                    self.state.write().remove(&step_id);
                    return RecoveryOutcome {
                        result: Ok(value),
                        attempts: attempt,
                        exhausted: false,
                    };
                }
                Err(err) => {
                    let info = err.to_error_info();
                    warn!(
                        step_id,
                        attempt,
                        kind = info.kind.as_str(),
                        error = %info.message,
                        "step operation failed"
                    );
                    self.logger.log_event(
                        step_id,
                        EventType::Error,
                        format!("attempt {attempt} failed: {}", info.message),
                        Some(serde_json::json!({ "kind": info.kind.as_str() })),
                    );
                    self.state.write().entry(step_id).or_default().last_error = Some(info.clone());

                    if attempt < self.config.max_retries {
                        self.logger.fail_step(step_id, &info, true);
                        let delay = calculate_backoff(attempt, &self.config);
                        debug!(step_id, delay_ms = delay.as_millis() as u64, "backing off before retry");
                        tokio::time::sleep(delay).await;
                    } else {
                        self.logger.fail_step(step_id, &info, false);
                        return RecoveryOutcome {
                            result: Err(info),
                            attempts: attempt,
                            exhausted: true,
                        };
                    }
                }
            }
        }
    }

    /// Returns a snapshot of a step's recovery bookkeeping.
    #[must_use]
    pub fn get_recovery_stats(&self, step_id: u8) -> Option<RecoveryState> {
        self.state.read().get(&step_id).cloned()
    }

    /// Clears one step's attempt counter and last error.
    pub fn reset_step(&self, step_id: u8) {
        self.state.write().remove(&step_id);
    }

    /// Clears all recovery bookkeeping.
    pub fn reset_all(&self) {
        self.state.write().clear();
    }

    /// Returns the engine's config.
    #[must_use]
    pub fn config(&self) -> &RecoveryConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::StepStatus;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_config(max_retries: u32) -> RecoveryConfig {
        RecoveryConfig::new()
            .with_max_retries(max_retries)
            .with_initial_backoff_ms(1)
            .with_max_backoff_ms(2)
    }

    fn engine(max_retries: u32) -> (AutoRecoveryEngine, Arc<StepLogger>) {
        let logger = Arc::new(StepLogger::new());
        logger.init_step(2, "content-generation");
        logger.start_step(2).unwrap();
        (AutoRecoveryEngine::new(fast_config(max_retries), logger.clone()), logger)
    }

    #[test]
    fn test_backoff_within_jitter_envelope() {
        let config = RecoveryConfig::default();
        for attempt in 1..=5 {
            let base = (config.initial_backoff_ms as f64
                * config.backoff_multiplier.powi(attempt as i32 - 1))
            .min(config.max_backoff_ms as f64);
            let delay = calculate_backoff(attempt, &config).as_millis() as f64;
            assert!(delay >= base, "attempt {attempt}: {delay} < {base}");
            assert!(delay <= base * 1.3 + 1.0, "attempt {attempt}: {delay} > {}", base * 1.3);
        }
    }

    #[test]
    fn test_backoff_caps_at_max() {
        let config = RecoveryConfig::default();
        let delay = calculate_backoff(30, &config).as_millis() as u64;
        assert!(delay <= (30_000.0 * 1.3) as u64 + 1);
    }

    #[test]
    fn test_correction_json_parse() {
        let mut ctx = RecoveryContext::new(2048, 0.7);
        let desc = apply_smart_correction(ErrorKind::JsonParse, &mut ctx);
        assert!(desc.is_some());
        assert!(ctx.extra_instructions[0].contains("strict JSON"));
    }

    #[test]
    fn test_correction_timeout_shrinks_budget() {
        let mut ctx = RecoveryContext::new(1000, 0.7);
        apply_smart_correction(ErrorKind::Timeout, &mut ctx);
        assert_eq!(ctx.max_tokens, 700);
    }

    #[test]
    fn test_correction_temperature_capped() {
        let mut ctx = RecoveryContext::new(100, 0.95);
        apply_smart_correction(ErrorKind::EmptyResponse, &mut ctx);
        assert!((ctx.temperature - 1.0).abs() < f32::EPSILON);
        apply_smart_correction(ErrorKind::EmptyResponse, &mut ctx);
        assert!(ctx.temperature <= 1.0);
    }

    #[test]
    fn test_correction_rate_limit_accumulates() {
        let mut ctx = RecoveryContext::new(100, 0.7);
        apply_smart_correction(ErrorKind::RateLimit, &mut ctx);
        apply_smart_correction(ErrorKind::RateLimit, &mut ctx);
        assert_eq!(ctx.rate_limit_delay_ms, 4000);
    }

    #[test]
    fn test_unclassified_retries_bare() {
        let mut ctx = RecoveryContext::new(100, 0.7);
        assert!(apply_smart_correction(ErrorKind::Unknown, &mut ctx).is_none());
        assert!(ctx.extra_instructions.is_empty());
    }

    #[tokio::test]
    async fn test_success_on_first_attempt() {
        let (engine, _logger) = engine(3);
        let outcome = engine
            .attempt_recovery(2, |_ctx| async { Ok::<_, OrchestratorError>(42) }, RecoveryContext::default())
            .await;
        assert!(outcome.success());
        assert_eq!(outcome.attempts, 1);
        assert!(!outcome.exhausted);
        // Success clears the per-step state.
        assert!(engine.get_recovery_stats(2).is_none());
    }

    #[tokio::test]
    async fn test_never_exceeds_max_retries() {
        let (engine, logger) = engine(3);
        let calls = AtomicU32::new(0);

        let outcome = engine
            .attempt_recovery(
                2,
                |_ctx| {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async { Err::<(), _>(OrchestratorError::Provider("connection reset".to_string())) }
                },
                RecoveryContext::default(),
            )
            .await;

        assert!(!outcome.success());
        assert!(outcome.exhausted);
        assert_eq!(outcome.attempts, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(logger.step_status(2), Some(StepStatus::Error));
    }

    #[tokio::test]
    async fn test_corrections_applied_between_attempts() {
        let (engine, _logger) = engine(3);
        let calls = AtomicU32::new(0);

        let outcome = engine
            .attempt_recovery(
                2,
                |ctx| {
                    let n = calls.fetch_add(1, Ordering::SeqCst);
                    async move {
                        if n == 0 {
                            Err(OrchestratorError::JsonParse("unexpected token".to_string()))
                        } else {
                            // The correction must be visible on the retry.
                            assert!(!ctx.extra_instructions.is_empty());
                            Ok(ctx.extra_instructions.len())
                        }
                    }
                },
                RecoveryContext::new(1000, 0.7),
            )
            .await;

        assert!(outcome.success());
        assert_eq!(outcome.attempts, 2);
    }

    #[tokio::test]
    async fn test_reset_makes_next_call_start_fresh() {
        let (engine, _logger) = engine(2);
        let outcome = engine
            .attempt_recovery(
                2,
                |_ctx| async { Err::<(), _>(OrchestratorError::Provider("boom".to_string())) },
                RecoveryContext::default(),
            )
            .await;
        assert!(outcome.exhausted);
        assert_eq!(engine.get_recovery_stats(2).map(|s| s.attempts), Some(2));

        engine.reset_step(2);
        assert!(engine.get_recovery_stats(2).is_none());

        // An unrelated later call starts from attempts = 0.
        let outcome = engine
            .attempt_recovery(2, |_ctx| async { Ok::<_, OrchestratorError>(()) }, RecoveryContext::default())
            .await;
        assert_eq!(outcome.attempts, 1);
    }

    #[tokio::test]
    async fn test_exhaustion_records_corrections_in_stats() {
        let (engine, _logger) = engine(3);
        let outcome = engine
            .attempt_recovery(
                2,
                |_ctx| async { Err::<(), _>(OrchestratorError::JsonParse("bad json".to_string())) },
                RecoveryContext::new(1000, 0.7),
            )
            .await;
        assert!(outcome.exhausted);

        let stats = engine.get_recovery_stats(2).unwrap();
        assert_eq!(stats.attempts, 3);
        // Corrections are applied before attempts 2 and 3.
        assert_eq!(stats.corrections.len(), 2);
        assert!(stats.last_error.is_some());
    }
}
