//! Narrative-state synchronization: scene advancement and the versioned
//! scene store behind it.

pub mod scene_coordinator;
pub mod scene_store;

pub use scene_coordinator::{FusedContext, SceneCoordinator};
pub use scene_store::{InMemorySceneStore, SceneStore};
