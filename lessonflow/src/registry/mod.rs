//! In-memory registry of in-flight pipeline runs.
//!
//! Entries are inserted when a run starts and removed once its terminal
//! notification has been broadcast, so status lookups only ever observe
//! live runs.

use crate::workflow::{WorkflowManager, WorkflowState};
use dashmap::DashMap;
use std::sync::Arc;

/// Concurrent map from request id to its workflow projection.
#[derive(Default)]
pub struct RunRegistry {
    runs: DashMap<String, Arc<WorkflowManager>>,
}

impl RunRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a run under its request id.
    pub fn insert(&self, workflow: Arc<WorkflowManager>) {
        self.runs
            .insert(workflow.request_id().to_string(), workflow);
    }

    /// Returns the live workflow for a request id, if any.
    #[must_use]
    pub fn get(&self, request_id: &str) -> Option<Arc<WorkflowManager>> {
        self.runs.get(request_id).map(|entry| entry.value().clone())
    }

    /// Returns the current snapshot for a request id, if live.
    #[must_use]
    pub fn get_state(&self, request_id: &str) -> Option<WorkflowState> {
        self.get(request_id).map(|wm| wm.get_state())
    }

    /// Evicts a finished run. Idempotent.
    pub fn remove(&self, request_id: &str) {
        self.runs.remove(request_id);
    }

    /// Number of live runs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.runs.len()
    }

    /// True iff no runs are live.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.runs.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_get_remove() {
        let registry = RunRegistry::new();
        let wm = Arc::new(WorkflowManager::new("req-1"));
        registry.insert(wm);

        assert_eq!(registry.len(), 1);
        let state = registry.get_state("req-1").unwrap();
        assert_eq!(state.request_id, "req-1");

        registry.remove("req-1");
        assert!(registry.is_empty());
        assert!(registry.get_state("req-1").is_none());
        // Removal of an evicted run is a no-op.
        registry.remove("req-1");
    }

    #[test]
    fn test_unknown_request_id() {
        let registry = RunRegistry::new();
        assert!(registry.get("nope").is_none());
    }
}
