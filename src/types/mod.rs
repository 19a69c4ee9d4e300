//! Core data model for the analysis-and-safety pipeline.
//!
//! Everything here is either immutable once created (inputs, extracted
//! symbols, assessments) or versioned for optimistic concurrency (scenes).
//! Mutation of safety-protocol state lives in [`crate::safety::protocol`],
//! not on the types themselves.

pub mod input;
pub mod narrative;
pub mod risk;
pub mod symbolic;

pub use input::EmotionalInput;
pub use narrative::{NarrativeScene, SceneOutcome, SceneType};
pub use risk::{CrisisAssessment, RiskLevel};
pub use symbolic::{
    AnalysisResult, ArchetypeMapping, ArchetypeWeight, Metaphor, SymbolicAnalysis, TextSpan, Theme,
};

use serde::{Deserialize, Serialize};

use crate::safety::protocol::ProtocolSnapshot;

/// How the symbolic-enrichment half of a turn was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnrichmentProvenance {
    /// Extraction and mapping ran to completion for this turn.
    Computed,
    /// The mapping was served from the analysis cache.
    Cached,
    /// The text-understanding service failed or timed out; the mapping was
    /// produced from a degraded (empty) extraction.
    Degraded,
    /// Enrichment was skipped entirely because the safety protocol reached
    /// ACTIVE or ESCALATED this turn.
    SkippedForSafety,
}

/// The fused, externally visible result of one processed turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntegratedState {
    /// Identifier of the [`EmotionalInput`] this state was derived from.
    pub input_id: uuid::Uuid,
    pub user_id: String,
    pub session_id: String,
    /// Current archetype mapping, absent when enrichment was skipped.
    pub mapping: Option<ArchetypeMapping>,
    /// The assessment that drove this turn's safety handling.
    pub assessment: CrisisAssessment,
    /// Snapshot of the session's safety-protocol state after this turn.
    pub protocol: ProtocolSnapshot,
    /// The narrative scene the session is now in.
    pub scene: NarrativeScene,
    pub provenance: EnrichmentProvenance,
}

impl IntegratedState {
    /// Whether symbolic enrichment was short-circuited by the safety path.
    pub fn enrichment_skipped(&self) -> bool {
        self.provenance == EnrichmentProvenance::SkippedForSafety
    }
}
