//! Narrative scene state, versioned for optimistic concurrency.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::risk::RiskLevel;

/// The kind of scene a session is currently in.
///
/// `Grounding` and `Support` form the restricted scene set reachable while a
/// safety episode is ACTIVE or ESCALATED; the rest belong to normal
/// narrative branching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SceneType {
    Opening,
    Exploration,
    Challenge,
    Reflection,
    Integration,
    Grounding,
    Support,
}

impl SceneType {
    /// Whether this scene belongs to the restricted support/grounding set.
    pub fn is_safety_constrained(&self) -> bool {
        matches!(self, SceneType::Grounding | SceneType::Support)
    }
}

/// Context a scene was generated under, kept for provenance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SceneContext {
    /// Dominant archetype at generation time, if enrichment produced one.
    pub dominant_archetype: Option<String>,
    /// Risk level at generation time.
    pub risk_level: RiskLevel,
    /// Whether an active safety episode constrained scene selection.
    pub safety_constrained: bool,
}

/// One narrative scene plus the bookkeeping needed to persist it safely.
///
/// `version` is a sequence number compared-and-swapped against the scene
/// store on every save; a mismatch means another coordinator advanced the
/// session first and the caller must re-read and retry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NarrativeScene {
    pub id: Uuid,
    pub session_id: String,
    pub scene_type: SceneType,
    /// Actions the user may take from this scene.
    pub available_actions: Vec<String>,
    pub context: SceneContext,
    pub version: u64,
    pub created_at: DateTime<Utc>,
}

impl NarrativeScene {
    /// The opening scene every new session starts in, version 0.
    pub fn opening(session_id: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            session_id: session_id.into(),
            scene_type: SceneType::Opening,
            available_actions: vec!["begin".into(), "reflect".into()],
            context: SceneContext {
                dominant_archetype: None,
                risk_level: RiskLevel::None,
                safety_constrained: false,
            },
            version: 0,
            created_at: Utc::now(),
        }
    }
}

/// What scene advancement did with the requested actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SceneOutcome {
    /// Normal narrative branching applied.
    Advanced,
    /// An active safety episode overrode branching into grounding/support.
    Redirected,
    /// No requested action was valid for the current scene; scene type held.
    Held,
}
