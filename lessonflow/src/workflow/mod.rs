//! Workflow state projection and broadcast.
//!
//! [`WorkflowManager`] mirrors step status transitions for external
//! consumption, computes aggregate progress, and synchronously notifies
//! every registered listener on each transition. It never decides whether
//! a step *may* complete — that decision belongs to the logger and the
//! validation gate and is made before this layer is informed.

use crate::core::{PipelineStep, StepEvent, StepStatus, STEP_COUNT};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;

/// External view of one step.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepView {
    /// 1-based step id.
    pub id: u8,
    /// Canonical step name.
    pub name: String,
    /// Mirrored status.
    pub status: StepStatus,
    /// Logs attached via `set_step_logs`.
    #[serde(default)]
    pub logs: Vec<StepEvent>,
}

/// Snapshot of the whole workflow, recomputed on every transition.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowState {
    /// The run's request id.
    pub request_id: String,
    /// The step currently in flight, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_step: Option<u8>,
    /// All step views keyed by id.
    pub steps: BTreeMap<u8, StepView>,
    /// `round(100 * completed / N)`.
    pub progress_percent: u8,
    /// Total elapsed time for the run in milliseconds.
    pub total_duration_ms: u64,
    /// True iff every step is `Completed`.
    pub is_complete: bool,
    /// True iff any step is `Error`.
    pub has_error: bool,
}

/// The class of a progress notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressEventType {
    /// A step entered `Running`.
    StepStarted,
    /// A step entered `Completed`.
    StepCompleted,
    /// A step entered `Retrying`.
    StepRetrying,
    /// A step entered terminal `Error`.
    StepFailed,
    /// The whole run finished successfully.
    Complete,
    /// The whole run aborted.
    Failed,
}

/// One progress notification pushed to listeners.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressEvent {
    /// The notification class.
    #[serde(rename = "type")]
    pub event_type: ProgressEventType,
    /// The step the transition concerns (absent for terminal events).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub step: Option<u8>,
    /// The step's new status, when applicable.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<StepStatus>,
    /// Full workflow snapshot at the time of the transition.
    pub state: WorkflowState,
    /// The affected step's logs at the time of the transition.
    #[serde(default)]
    pub logs: Vec<StepEvent>,
    /// Terminal result/error payload for `Complete`/`Failed`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
}

/// Receives progress notifications.
///
/// Listeners are invoked synchronously in transition order; they must be
/// fast or internally defer (see [`ChannelListener`]).
pub trait WorkflowListener: Send + Sync {
    /// Called on every state transition.
    fn on_transition(&self, event: &ProgressEvent);
}

/// A listener that forwards events into an unbounded channel.
///
/// Decouples the engine from any transport: the broadcaster writes, the
/// HTTP/SSE layer drains.
pub struct ChannelListener {
    tx: mpsc::UnboundedSender<ProgressEvent>,
}

impl ChannelListener {
    /// Creates a listener plus the receiving half for the transport.
    #[must_use]
    pub fn unbounded() -> (Arc<Self>, mpsc::UnboundedReceiver<ProgressEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Arc::new(Self { tx }), rx)
    }
}

impl WorkflowListener for ChannelListener {
    fn on_transition(&self, event: &ProgressEvent) {
        // A dropped receiver just means nobody is watching.
        let _ = self.tx.send(event.clone());
    }
}

/// A listener that records events, for tests and summaries.
#[derive(Debug, Default)]
pub struct CollectingListener {
    events: RwLock<Vec<ProgressEvent>>,
}

impl CollectingListener {
    /// Creates an empty collector.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns all collected events.
    #[must_use]
    pub fn events(&self) -> Vec<ProgressEvent> {
        self.events.read().clone()
    }
}

impl WorkflowListener for CollectingListener {
    fn on_transition(&self, event: &ProgressEvent) {
        self.events.write().push(event.clone());
    }
}

struct StepRecord {
    view: StepView,
    started: Option<Instant>,
    ended: Option<Instant>,
}

/// Projection/broadcast layer for one pipeline run.
pub struct WorkflowManager {
    request_id: String,
    steps: RwLock<BTreeMap<u8, StepRecord>>,
    current_step: RwLock<Option<u8>>,
    listeners: RwLock<Vec<Arc<dyn WorkflowListener>>>,
    started_at: Instant,
}

impl WorkflowManager {
    /// Creates a manager with all steps pre-populated as pending.
    #[must_use]
    pub fn new(request_id: impl Into<String>) -> Self {
        let steps = PipelineStep::all()
            .into_iter()
            .map(|step| {
                (
                    step.id(),
                    StepRecord {
                        view: StepView {
                            id: step.id(),
                            name: step.name().to_string(),
                            status: StepStatus::Pending,
                            logs: Vec::new(),
                        },
                        started: None,
                        ended: None,
                    },
                )
            })
            .collect();

        Self {
            request_id: request_id.into(),
            steps: RwLock::new(steps),
            current_step: RwLock::new(None),
            listeners: RwLock::new(Vec::new()),
            started_at: Instant::now(),
        }
    }

    /// Registers a listener for transition notifications.
    pub fn subscribe(&self, listener: Arc<dyn WorkflowListener>) {
        self.listeners.write().push(listener);
    }

    /// Returns the run's request id.
    #[must_use]
    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    /// Marks a step as running.
    pub fn start_step(&self, id: u8) {
        {
            let mut steps = self.steps.write();
            if let Some(record) = steps.get_mut(&id) {
                record.view.status = StepStatus::Running;
                record.started = Some(Instant::now());
            }
            *self.current_step.write() = Some(id);
        }
        self.notify(ProgressEventType::StepStarted, Some(id));
    }

    /// Marks a step as completed.
    pub fn complete_step(&self, id: u8) {
        {
            let mut steps = self.steps.write();
            if let Some(record) = steps.get_mut(&id) {
                record.view.status = StepStatus::Completed;
                record.ended = Some(Instant::now());
            }
        }
        self.notify(ProgressEventType::StepCompleted, Some(id));
    }

    /// Marks a step as retrying.
    pub fn retrying_step(&self, id: u8) {
        {
            let mut steps = self.steps.write();
            if let Some(record) = steps.get_mut(&id) {
                record.view.status = StepStatus::Retrying;
            }
        }
        self.notify(ProgressEventType::StepRetrying, Some(id));
    }

    /// Marks a step as terminally failed.
    pub fn fail_step(&self, id: u8) {
        {
            let mut steps = self.steps.write();
            if let Some(record) = steps.get_mut(&id) {
                record.view.status = StepStatus::Error;
                record.ended = Some(Instant::now());
            }
        }
        self.notify(ProgressEventType::StepFailed, Some(id));
    }

    /// Attaches the step's current logs to its view.
    pub fn set_step_logs(&self, id: u8, logs: Vec<StepEvent>) {
        let mut steps = self.steps.write();
        if let Some(record) = steps.get_mut(&id) {
            record.view.logs = logs;
        }
    }

    /// Emits the terminal success notification with the result payload.
    pub fn emit_complete(&self, payload: serde_json::Value) {
        self.notify_with_payload(ProgressEventType::Complete, None, Some(payload));
    }

    /// Emits the terminal failure notification with the error payload.
    pub fn emit_failed(&self, payload: serde_json::Value) {
        self.notify_with_payload(ProgressEventType::Failed, None, Some(payload));
    }

    /// Returns the full current snapshot.
    #[must_use]
    pub fn get_state(&self) -> WorkflowState {
        let steps = self.steps.read();
        let views: BTreeMap<u8, StepView> =
            steps.iter().map(|(id, r)| (*id, r.view.clone())).collect();
        let completed = views
            .values()
            .filter(|v| v.status == StepStatus::Completed)
            .count();
        let has_error = views.values().any(|v| v.status == StepStatus::Error);
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let progress_percent =
            ((100.0 * completed as f64) / f64::from(STEP_COUNT)).round() as u8;

        WorkflowState {
            request_id: self.request_id.clone(),
            current_step: *self.current_step.read(),
            steps: views,
            progress_percent,
            total_duration_ms: self.get_total_duration(),
            is_complete: completed == STEP_COUNT as usize,
            has_error,
        }
    }

    /// Returns a completed step's duration in milliseconds.
    #[must_use]
    pub fn get_step_duration(&self, id: u8) -> Option<u64> {
        let steps = self.steps.read();
        let record = steps.get(&id)?;
        let (start, end) = (record.started?, record.ended?);
        Some(end.duration_since(start).as_millis() as u64)
    }

    /// Returns the total elapsed time for the run in milliseconds.
    #[must_use]
    pub fn get_total_duration(&self) -> u64 {
        self.started_at.elapsed().as_millis() as u64
    }

    /// Returns per-step durations plus the total, for terminal payloads.
    #[must_use]
    pub fn get_summary(&self) -> serde_json::Value {
        let steps = self.steps.read();
        let per_step: BTreeMap<String, serde_json::Value> = steps
            .iter()
            .map(|(id, record)| {
                let duration = record
                    .started
                    .zip(record.ended)
                    .map(|(s, e)| e.duration_since(s).as_millis() as u64);
                (
                    record.view.name.clone(),
                    serde_json::json!({
                        "id": id,
                        "status": record.view.status,
                        "durationMs": duration,
                    }),
                )
            })
            .collect();
        serde_json::json!({
            "steps": per_step,
            "totalDurationMs": self.get_total_duration(),
        })
    }

    fn notify(&self, event_type: ProgressEventType, step: Option<u8>) {
        self.notify_with_payload(event_type, step, None);
    }

    fn notify_with_payload(
        &self,
        event_type: ProgressEventType,
        step: Option<u8>,
        payload: Option<serde_json::Value>,
    ) {
        let state = self.get_state();
        let (status, logs) = match step {
            Some(id) => {
                let steps = self.steps.read();
                let record = steps.get(&id);
                (
                    record.map(|r| r.view.status),
                    record.map(|r| r.view.logs.clone()).unwrap_or_default(),
                )
            }
            None => (None, Vec::new()),
        };
        let event = ProgressEvent {
            event_type,
            step,
            status,
            state,
            logs,
            payload,
        };
        // Synchronous, in transition order, no batching or coalescing.
        for listener in self.listeners.read().iter() {
            listener.on_transition(&event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_steps_prepopulated_pending() {
        let wm = WorkflowManager::new("req-1");
        let state = wm.get_state();
        assert_eq!(state.steps.len(), 7);
        assert!(state
            .steps
            .values()
            .all(|v| v.status == StepStatus::Pending));
        assert_eq!(state.progress_percent, 0);
        assert!(!state.is_complete);
        assert!(!state.has_error);
    }

    #[test]
    fn test_progress_three_of_seven_rounds_to_43() {
        let wm = WorkflowManager::new("req-1");
        for id in 1..=3 {
            wm.start_step(id);
            wm.complete_step(id);
        }
        assert_eq!(wm.get_state().progress_percent, 43);
    }

    #[test]
    fn test_is_complete_and_has_error() {
        let wm = WorkflowManager::new("req-1");
        for id in 1..=7 {
            wm.start_step(id);
            wm.complete_step(id);
        }
        let state = wm.get_state();
        assert!(state.is_complete);
        assert_eq!(state.progress_percent, 100);

        let wm = WorkflowManager::new("req-2");
        wm.start_step(1);
        wm.fail_step(1);
        let state = wm.get_state();
        assert!(state.has_error);
        assert!(!state.is_complete);
    }

    #[test]
    fn test_listeners_notified_in_transition_order() {
        let wm = WorkflowManager::new("req-1");
        let collector = Arc::new(CollectingListener::new());
        wm.subscribe(collector.clone());

        wm.start_step(1);
        wm.retrying_step(1);
        wm.complete_step(1);
        wm.emit_complete(serde_json::json!({"ok": true}));

        let events = collector.events();
        let types: Vec<ProgressEventType> = events.iter().map(|e| e.event_type).collect();
        assert_eq!(
            types,
            vec![
                ProgressEventType::StepStarted,
                ProgressEventType::StepRetrying,
                ProgressEventType::StepCompleted,
                ProgressEventType::Complete,
            ]
        );
        // Every event carries the snapshot taken at its transition.
        assert_eq!(events[0].state.steps[&1].status, StepStatus::Running);
        assert_eq!(events[2].state.steps[&1].status, StepStatus::Completed);
        assert_eq!(events[3].payload.as_ref().unwrap()["ok"], true);
    }

    #[tokio::test]
    async fn test_channel_listener_preserves_order() {
        let wm = WorkflowManager::new("req-1");
        let (listener, mut rx) = ChannelListener::unbounded();
        wm.subscribe(listener);

        wm.start_step(1);
        wm.complete_step(1);
        wm.start_step(2);

        let first = rx.recv().await.unwrap();
        let second = rx.recv().await.unwrap();
        let third = rx.recv().await.unwrap();
        assert_eq!(first.event_type, ProgressEventType::StepStarted);
        assert_eq!(first.step, Some(1));
        assert_eq!(second.event_type, ProgressEventType::StepCompleted);
        assert_eq!(third.step, Some(2));
    }

    #[test]
    fn test_step_duration_requires_completion() {
        let wm = WorkflowManager::new("req-1");
        wm.start_step(1);
        assert_eq!(wm.get_step_duration(1), None);
        wm.complete_step(1);
        assert!(wm.get_step_duration(1).is_some());
    }

    #[test]
    fn test_set_step_logs_visible_in_state() {
        let wm = WorkflowManager::new("req-1");
        wm.start_step(1);
        wm.set_step_logs(1, vec![StepEvent::info("hello")]);
        let state = wm.get_state();
        assert_eq!(state.steps[&1].logs.len(), 1);
    }

    #[test]
    fn test_summary_shape() {
        let wm = WorkflowManager::new("req-1");
        wm.start_step(1);
        wm.complete_step(1);
        let summary = wm.get_summary();
        assert!(summary["steps"]["context-intake"]["durationMs"].is_number());
        assert!(summary["totalDurationMs"].is_number());
    }
}
