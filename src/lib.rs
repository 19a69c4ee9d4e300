//! # Mythweaver
//!
//! Analysis-and-safety coordination core for emotional-narrative sessions.
//!
//! One call to [`Coordinator::process_turn`] takes a user's free-text
//! emotional expression through the full pipeline: crisis-risk assessment
//! (always first, always audited), safety-protocol escalation, symbolic
//! enrichment (metaphor extraction and archetype mapping, cache-checked
//! with single-flight semantics), and narrative-scene synchronization under
//! optimistic concurrency. The result is a single [`IntegratedState`] in
//! which the symbolic and narrative models of the user never contradict an
//! active safety episode.

pub mod analysis;
pub mod coordinator;
pub mod narrative;
pub mod safety;
pub mod types;
pub mod utilities;

pub use analysis::{AnalysisCache, ArchetypeMapper, ArchetypeRuleset, MetaphorExtractor};
pub use coordinator::Coordinator;
pub use narrative::{InMemorySceneStore, SceneCoordinator, SceneStore};
pub use safety::{AuditSink, CrisisAssessor, MemoryAuditLog, SafetyProtocol, SqliteAuditLog};
pub use types::{
    CrisisAssessment, EmotionalInput, EnrichmentProvenance, IntegratedState, NarrativeScene,
    RiskLevel,
};
pub use utilities::{PipelineError, PolicyConfig};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
