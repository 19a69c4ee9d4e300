//! Versioned persistence boundary for narrative scenes.
//!
//! Scene state is mutated by exactly one coordinator at a time per session,
//! enforced by compare-and-swap on the scene version rather than a lock: a
//! save against a stale version fails with [`PipelineError::Conflict`] and
//! the caller re-reads and retries.

use async_trait::async_trait;
use dashmap::DashMap;

use crate::types::NarrativeScene;
use crate::utilities::errors::PipelineError;

/// Store for the latest scene snapshot per session.
#[async_trait]
pub trait SceneStore: Send + Sync + std::fmt::Debug {
    /// Load the current scene for a session, if one exists.
    async fn load(&self, session_id: &str) -> Result<Option<NarrativeScene>, PipelineError>;

    /// Persist `scene` if the stored version still equals
    /// `expected_version`. The saved scene's version must be
    /// `expected_version + 1`.
    async fn save(
        &self,
        scene: &NarrativeScene,
        expected_version: u64,
    ) -> Result<(), PipelineError>;
}

/// In-memory scene store used for tests and single-process deployments; a
/// relational adapter implements the same CAS against a version column.
#[derive(Debug, Default)]
pub struct InMemorySceneStore {
    scenes: DashMap<String, NarrativeScene>,
}

impl InMemorySceneStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SceneStore for InMemorySceneStore {
    async fn load(&self, session_id: &str) -> Result<Option<NarrativeScene>, PipelineError> {
        Ok(self.scenes.get(session_id).map(|s| s.clone()))
    }

    async fn save(
        &self,
        scene: &NarrativeScene,
        expected_version: u64,
    ) -> Result<(), PipelineError> {
        // The entry guard makes the compare-and-swap atomic per session.
        let entry = self.scenes.entry(scene.session_id.clone());
        match entry {
            dashmap::mapref::entry::Entry::Occupied(mut occupied) => {
                let found = occupied.get().version;
                if found != expected_version {
                    return Err(PipelineError::Conflict {
                        session_id: scene.session_id.clone(),
                        expected: expected_version,
                        found,
                    });
                }
                occupied.insert(scene.clone());
                Ok(())
            }
            dashmap::mapref::entry::Entry::Vacant(vacant) => {
                if expected_version != 0 {
                    return Err(PipelineError::Conflict {
                        session_id: scene.session_id.clone(),
                        expected: expected_version,
                        found: 0,
                    });
                }
                vacant.insert(scene.clone());
                Ok(())
            }
        }
    }
}
