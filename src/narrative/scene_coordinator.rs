//! Scene advancement under the fused symbolic/safety context.
//!
//! Narrative state must never contradict an active safety episode: while
//! the protocol is ACTIVE or ESCALATED only the support/grounding scene set
//! is reachable, overriding normal branching.

use std::sync::Arc;

use chrono::Utc;
use uuid::Uuid;

use crate::narrative::scene_store::SceneStore;
use crate::safety::protocol::ProtocolState;
use crate::types::{
    ArchetypeMapping, NarrativeScene, RiskLevel, SceneOutcome, SceneType,
    narrative::SceneContext,
};
use crate::utilities::errors::PipelineError;

/// Everything scene advancement is allowed to see about the turn.
#[derive(Debug, Clone)]
pub struct FusedContext {
    pub mapping: Option<ArchetypeMapping>,
    pub protocol_state: ProtocolState,
    pub risk_level: RiskLevel,
}

impl FusedContext {
    pub fn safety_constrained(&self) -> bool {
        self.protocol_state.constrains_narrative()
    }
}

/// Advances narrative scene state per turn.
#[derive(Debug, Clone)]
pub struct SceneCoordinator {
    store: Arc<dyn SceneStore>,
}

impl SceneCoordinator {
    pub fn new(store: Arc<dyn SceneStore>) -> Self {
        Self { store }
    }

    /// Advance the session's scene and persist it.
    ///
    /// Loads the current scene (creating the opening scene for a new
    /// session), computes the next one, and saves it with a
    /// compare-and-swap on the loaded version. A concurrent writer causes
    /// [`PipelineError::Conflict`], which the caller surfaces as retryable;
    /// persisted state is left untouched in that case.
    pub async fn advance_session(
        &self,
        session_id: &str,
        actions: &[String],
        fused: &FusedContext,
    ) -> Result<(NarrativeScene, SceneOutcome), PipelineError> {
        // New sessions start from the opening scene at version 0; the first
        // save CASes against that, so a racing creator surfaces as a
        // conflict like any other stale write.
        let current = self
            .store
            .load(session_id)
            .await?
            .unwrap_or_else(|| NarrativeScene::opening(session_id));

        let (next, outcome) = Self::advance(&current, actions, fused);
        self.store.save(&next, current.version).await?;
        Ok((next, outcome))
    }

    /// Pure scene-advancement rule: `(scene, actions, fused) -> (next, outcome)`.
    ///
    /// Does not touch the store; `advance_session` handles persistence.
    pub fn advance(
        scene: &NarrativeScene,
        actions: &[String],
        fused: &FusedContext,
    ) -> (NarrativeScene, SceneOutcome) {
        if fused.safety_constrained() {
            let scene_type = match fused.protocol_state {
                ProtocolState::Escalated => SceneType::Support,
                _ => SceneType::Grounding,
            };
            let next = Self::build_next(scene, scene_type, fused);
            tracing::info!(
                session_id = %scene.session_id,
                scene = ?scene_type,
                "scene redirected to safety-constrained set"
            );
            return (next, SceneOutcome::Redirected);
        }

        let requested = actions
            .iter()
            .find(|a| scene.available_actions.contains(*a));
        match requested {
            Some(action) => {
                let scene_type = Self::branch(scene.scene_type, action, fused);
                (Self::build_next(scene, scene_type, fused), SceneOutcome::Advanced)
            }
            None => {
                // Nothing valid requested: hold the scene type but still
                // produce a new version so the turn's context is recorded.
                let next = Self::build_next(scene, scene.scene_type, fused);
                (next, SceneOutcome::Held)
            }
        }
    }

    /// Normal narrative branching, shaped by the dominant archetype.
    fn branch(current: SceneType, action: &str, fused: &FusedContext) -> SceneType {
        let dominant = fused
            .mapping
            .as_ref()
            .and_then(|m| m.dominant())
            .map(|w| w.archetype.as_str());

        match (current, action) {
            (SceneType::Opening, "begin") => SceneType::Exploration,
            (SceneType::Opening, "reflect") => SceneType::Reflection,
            (SceneType::Exploration, "descend") | (SceneType::Exploration, "confront") => {
                SceneType::Challenge
            }
            (SceneType::Exploration, "pause") => SceneType::Reflection,
            (SceneType::Challenge, "integrate") => SceneType::Integration,
            (SceneType::Challenge, "retreat") => SceneType::Reflection,
            (SceneType::Reflection, "continue") => match dominant {
                Some("Shadow") => SceneType::Challenge,
                _ => SceneType::Exploration,
            },
            (SceneType::Integration, "continue") => SceneType::Exploration,
            // Recovery out of a safety scene once the episode has cleared.
            (SceneType::Grounding, _) | (SceneType::Support, _) => SceneType::Reflection,
            _ => current,
        }
    }

    fn build_next(scene: &NarrativeScene, scene_type: SceneType, fused: &FusedContext) -> NarrativeScene {
        NarrativeScene {
            id: Uuid::new_v4(),
            session_id: scene.session_id.clone(),
            scene_type,
            available_actions: Self::actions_for(scene_type),
            context: SceneContext {
                dominant_archetype: fused
                    .mapping
                    .as_ref()
                    .and_then(|m| m.dominant())
                    .map(|w| w.archetype.clone()),
                risk_level: fused.risk_level,
                safety_constrained: fused.safety_constrained(),
            },
            version: scene.version + 1,
            created_at: Utc::now(),
        }
    }

    fn actions_for(scene_type: SceneType) -> Vec<String> {
        let actions: &[&str] = match scene_type {
            SceneType::Opening => &["begin", "reflect"],
            SceneType::Exploration => &["descend", "confront", "pause"],
            SceneType::Challenge => &["integrate", "retreat"],
            SceneType::Reflection => &["continue"],
            SceneType::Integration => &["continue"],
            // The restricted set offers no narrative branching, only
            // grounding choices.
            SceneType::Grounding => &["breathe", "ground", "reach_out"],
            SceneType::Support => &["reach_out", "stay"],
        };
        actions.iter().map(|a| a.to_string()).collect()
    }
}
