//! Artifact persistence behind a trait seam.
//!
//! The pipeline only needs save/attach/load; the in-memory store is the
//! default backend and the one the tests use.

use crate::errors::OrchestratorError;
use crate::pipeline::{Activity, Lesson};
use crate::utils::iso_timestamp;
use async_trait::async_trait;
use dashmap::DashMap;
use uuid::Uuid;

/// A persisted lesson artifact.
#[derive(Debug, Clone)]
pub struct StoredArtifact {
    /// Store-assigned artifact id.
    pub id: String,
    /// The lesson at its last write.
    pub lesson: Lesson,
    /// The activities saved with the lesson.
    pub activities: Vec<Activity>,
    /// ISO 8601 timestamp of the initial save.
    pub saved_at: String,
}

/// Persistence seam for generated artifacts.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Saves a new artifact and returns its id.
    async fn save(
        &self,
        lesson: &Lesson,
        activities: &[Activity],
    ) -> Result<String, OrchestratorError>;

    /// Overwrites the lesson of an existing artifact.
    async fn attach(&self, artifact_id: &str, lesson: &Lesson) -> Result<(), OrchestratorError>;

    /// Loads an artifact by id.
    async fn load(&self, artifact_id: &str) -> Option<StoredArtifact>;
}

/// Process-local artifact store.
#[derive(Debug, Default)]
pub struct MemoryArtifactStore {
    artifacts: DashMap<String, StoredArtifact>,
}

impl MemoryArtifactStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored artifacts.
    #[must_use]
    pub fn len(&self) -> usize {
        self.artifacts.len()
    }

    /// True iff the store holds nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.artifacts.is_empty()
    }
}

#[async_trait]
impl ArtifactStore for MemoryArtifactStore {
    async fn save(
        &self,
        lesson: &Lesson,
        activities: &[Activity],
    ) -> Result<String, OrchestratorError> {
        let id = Uuid::new_v4().to_string();
        self.artifacts.insert(
            id.clone(),
            StoredArtifact {
                id: id.clone(),
                lesson: lesson.clone(),
                activities: activities.to_vec(),
                saved_at: iso_timestamp(),
            },
        );
        Ok(id)
    }

    async fn attach(&self, artifact_id: &str, lesson: &Lesson) -> Result<(), OrchestratorError> {
        let mut entry = self.artifacts.get_mut(artifact_id).ok_or_else(|| {
            OrchestratorError::Internal(format!("unknown artifact id: {artifact_id}"))
        })?;
        entry.lesson = lesson.clone();
        Ok(())
    }

    async fn load(&self, artifact_id: &str) -> Option<StoredArtifact> {
        self.artifacts.get(artifact_id).map(|a| a.clone())
    }
}
