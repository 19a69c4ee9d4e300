//! Per-turn orchestration of the analysis-and-safety pipeline.
//!
//! Ordering contract: crisis assessment always runs first, before symbolic
//! enrichment and before scene advancement. If the resulting protocol
//! transition lands in ACTIVE or ESCALATED, enrichment is skipped for the
//! turn (provenance flag set) and the scene coordinator is invoked with the
//! constrained scene set directly — the safety-critical path never waits on
//! the slower, less reliable enrichment stages.
//!
//! The assess-and-audit stage runs on a spawned task, so a caller that
//! disconnects mid-turn cannot cancel safety auditing; only scene
//! persistence may be abandoned.

use std::collections::VecDeque;
use std::sync::Arc;

use dashmap::DashMap;

use crate::analysis::archetype_mapper::{ArchetypeMapper, SessionContext};
use crate::analysis::cache::AnalysisCache;
use crate::analysis::extractor::MetaphorExtractor;
use crate::analysis::ruleset::ArchetypeRuleset;
use crate::analysis::text_model::TextModel;
use crate::narrative::scene_coordinator::{FusedContext, SceneCoordinator};
use crate::narrative::scene_store::SceneStore;
use crate::safety::assessor::CrisisAssessor;
use crate::safety::audit::{AuditEvent, AuditRecord, AuditSink};
use crate::safety::protocol::{ProtocolSnapshot, SafetyProtocol, TransitionRecord};
use crate::types::{
    CrisisAssessment, EmotionalInput, EnrichmentProvenance, IntegratedState, RiskLevel,
    SymbolicAnalysis,
};
use crate::utilities::config::PolicyConfig;
use crate::utilities::errors::PipelineError;

/// Bounded history kept per session.
const MAX_RECENT_LEVELS: usize = 16;
const MAX_RECENT_ARCHETYPES: usize = 8;

/// Mutable per-session state owned by the coordinator.
#[derive(Debug)]
struct SessionState {
    /// Owner of the session, refreshed every turn; audit records for
    /// operator actions carry it.
    user_id: String,
    protocol: SafetyProtocol,
    /// Risk levels of recent turns, oldest first. Feeds the trend term.
    recent_levels: VecDeque<RiskLevel>,
    /// Dominant archetypes of recent turns, oldest first.
    recent_archetypes: Vec<String>,
    /// Symbolic analysis of the previous turn; lets the assessor weight
    /// metaphors without waiting on this turn's enrichment.
    last_analysis: Option<SymbolicAnalysis>,
    /// Bumped on every protocol transition so cached analyses computed
    /// under the old context cannot be served.
    context_version: u64,
}

impl SessionState {
    fn new(config: &PolicyConfig) -> Self {
        Self {
            user_id: String::new(),
            protocol: SafetyProtocol::new(config.dwell_turns, config.min_escalation_hold()),
            recent_levels: VecDeque::new(),
            recent_archetypes: Vec::new(),
            last_analysis: None,
            context_version: 0,
        }
    }
}

/// Output of the uncancellable safety stage.
struct SafetyStage {
    assessment: CrisisAssessment,
    snapshot: ProtocolSnapshot,
}

/// Orchestrates one `process_turn` cycle across all pipeline components.
///
/// Explicitly constructed with its collaborators injected; holds no global
/// state beyond the per-session map.
#[derive(Debug, Clone)]
pub struct Coordinator {
    assessor: Arc<CrisisAssessor>,
    extractor: Arc<MetaphorExtractor>,
    mapper: Arc<ArchetypeMapper>,
    scenes: SceneCoordinator,
    audit: Arc<dyn AuditSink>,
    sessions: Arc<DashMap<String, SessionState>>,
    config: PolicyConfig,
}

impl Coordinator {
    pub fn new(
        config: PolicyConfig,
        model: Arc<dyn TextModel>,
        audit: Arc<dyn AuditSink>,
        store: Arc<dyn SceneStore>,
    ) -> Self {
        Self::with_ruleset(config, ArchetypeRuleset::builtin(), model, audit, store)
    }

    pub fn with_ruleset(
        config: PolicyConfig,
        ruleset: ArchetypeRuleset,
        model: Arc<dyn TextModel>,
        audit: Arc<dyn AuditSink>,
        store: Arc<dyn SceneStore>,
    ) -> Self {
        let cache = AnalysisCache::new(config.cache_ttl());
        let extractor = Arc::new(MetaphorExtractor::new(
            model,
            config.extract_timeout(),
            config.extract_retry_timeout(),
        ));
        let assessor = Arc::new(CrisisAssessor::new(
            config.thresholds,
            config.trend_window,
            config.trend_boost,
            Arc::clone(&audit),
        ));
        Self {
            assessor,
            extractor,
            mapper: Arc::new(ArchetypeMapper::new(ruleset, cache)),
            scenes: SceneCoordinator::new(store),
            audit,
            sessions: Arc::new(DashMap::new()),
            config,
        }
    }

    /// Process one user turn and return the fused state.
    ///
    /// The only user-visible errors are [`PipelineError::Conflict`]
    /// (resubmit) and unavailability of required collaborators.
    pub async fn process_turn(
        &self,
        user_id: &str,
        session_id: &str,
        text: &str,
        actions: &[String],
    ) -> Result<IntegratedState, PipelineError> {
        let input = EmotionalInput::new(user_id, session_id, text);
        tracing::debug!(session_id, input_id = %input.id, "processing turn");

        // Stage 1: crisis assessment + protocol transition, always first,
        // uncancellable. spawn_blocking because the audit sink may touch
        // disk, and the closure runs to completion even if this future is
        // dropped.
        let stage = {
            let assessor = Arc::clone(&self.assessor);
            let audit = Arc::clone(&self.audit);
            let sessions = Arc::clone(&self.sessions);
            let config = self.config.clone();
            let input = input.clone();
            tokio::task::spawn_blocking(move || {
                Self::run_safety_stage(&assessor, &audit, &sessions, &config, &input)
            })
        };
        let stage = stage.await.map_err(|e| PipelineError::ServiceUnavailable {
            service: "crisis-assessor".into(),
            message: e.to_string(),
        })??;

        // Stage 2: short-circuit to the constrained scene set when the
        // protocol demands it.
        if stage.snapshot.state.constrains_narrative() {
            tracing::info!(state = %stage.snapshot.state, "skipping enrichment for safety path");
            let fused = FusedContext {
                mapping: None,
                protocol_state: stage.snapshot.state,
                risk_level: stage.assessment.level,
            };
            let (scene, _) = self.scenes.advance_session(session_id, actions, &fused).await?;
            return Ok(IntegratedState {
                input_id: input.id,
                user_id: input.user_id,
                session_id: input.session_id,
                mapping: None,
                assessment: stage.assessment,
                protocol: stage.snapshot,
                scene,
                provenance: EnrichmentProvenance::SkippedForSafety,
            });
        }

        // Stage 3: symbolic enrichment, cache-checked.
        let context = self.session_context(session_id);
        let (result, cached) = self
            .mapper
            .analyze_with_context(&input, &context, &self.extractor)
            .await;
        let provenance = if cached {
            EnrichmentProvenance::Cached
        } else if result.analysis.degraded {
            EnrichmentProvenance::Degraded
        } else {
            EnrichmentProvenance::Computed
        };
        self.record_enrichment(session_id, &result.analysis, &result.mapping);

        // Stage 4: fold the fused state into the narrative scene.
        let fused = FusedContext {
            mapping: Some(result.mapping.clone()),
            protocol_state: stage.snapshot.state,
            risk_level: stage.assessment.level,
        };
        let (scene, _) = self.scenes.advance_session(session_id, actions, &fused).await?;

        Ok(IntegratedState {
            input_id: input.id,
            user_id: input.user_id,
            session_id: input.session_id,
            mapping: Some(result.mapping.clone()),
            assessment: stage.assessment,
            protocol: stage.snapshot,
            scene,
            provenance,
        })
    }

    /// Assess, apply the protocol, and audit — one blocking unit so none of
    /// it can be cancelled once started.
    fn run_safety_stage(
        assessor: &CrisisAssessor,
        audit: &Arc<dyn AuditSink>,
        sessions: &DashMap<String, SessionState>,
        config: &PolicyConfig,
        input: &EmotionalInput,
    ) -> Result<SafetyStage, PipelineError> {
        let (recent_levels, last_analysis) = {
            let session = sessions
                .entry(input.session_id.clone())
                .or_insert_with(|| SessionState::new(config));
            (
                session.recent_levels.iter().copied().collect::<Vec<_>>(),
                session.last_analysis.clone(),
            )
        };

        let assessment = assessor.assess(input, last_analysis.as_ref(), &recent_levels)?;

        let mut session = sessions
            .get_mut(&input.session_id)
            .expect("session created above");
        session.user_id.clone_from(&input.user_id);
        let transition = session.protocol.apply(&assessment);
        session.recent_levels.push_back(assessment.level);
        while session.recent_levels.len() > MAX_RECENT_LEVELS {
            session.recent_levels.pop_front();
        }
        if transition.is_some() {
            session.context_version += 1;
        }
        let snapshot = session.protocol.snapshot();
        drop(session);

        if let Some(transition) = &transition {
            Self::audit_transition(audit, &input.user_id, &input.session_id, transition)?;
        }

        Ok(SafetyStage {
            assessment,
            snapshot,
        })
    }

    fn audit_transition(
        audit: &Arc<dyn AuditSink>,
        user_id: &str,
        session_id: &str,
        transition: &TransitionRecord,
    ) -> Result<(), PipelineError> {
        let record = AuditRecord::new(
            user_id,
            session_id,
            AuditEvent::Transition {
                from: transition.from,
                to: transition.to,
                cause: transition.cause.clone(),
            },
        );
        audit
            .append(&record)
            .map_err(|e| PipelineError::Audit(e.to_string()))
    }

    fn session_context(&self, session_id: &str) -> SessionContext {
        let session = self
            .sessions
            .entry(session_id.to_string())
            .or_insert_with(|| SessionState::new(&self.config));
        SessionContext {
            session_id: session_id.to_string(),
            context_version: session.context_version,
            recent_archetypes: session.recent_archetypes.clone(),
        }
    }

    fn record_enrichment(
        &self,
        session_id: &str,
        analysis: &SymbolicAnalysis,
        mapping: &crate::types::ArchetypeMapping,
    ) {
        if let Some(mut session) = self.sessions.get_mut(session_id) {
            session.last_analysis = Some(analysis.clone());
            if let Some(dominant) = mapping.dominant() {
                session.recent_archetypes.push(dominant.archetype.clone());
                while session.recent_archetypes.len() > MAX_RECENT_ARCHETYPES {
                    session.recent_archetypes.remove(0);
                }
            }
        }
    }

    /// Operator path: resolve a session's escalated episode externally.
    pub fn resolve_episode(
        &self,
        session_id: &str,
        operator_id: &str,
    ) -> Result<Option<ProtocolSnapshot>, PipelineError> {
        let Some(mut session) = self.sessions.get_mut(session_id) else {
            return Ok(None);
        };
        let transition = session.protocol.resolve_external(operator_id);
        if transition.is_some() {
            session.context_version += 1;
        }
        let snapshot = session.protocol.snapshot();
        let user_id = session.user_id.clone();
        drop(session);

        if let Some(transition) = &transition {
            Self::audit_transition(&self.audit, &user_id, session_id, transition)?;
        }
        Ok(Some(snapshot))
    }

    /// Operator path: close a RESOLVING episode back to INACTIVE. The close
    /// transition is audited like every other transition.
    pub fn close_episode(
        &self,
        session_id: &str,
    ) -> Result<Option<ProtocolSnapshot>, PipelineError> {
        let Some(mut session) = self.sessions.get_mut(session_id) else {
            return Ok(None);
        };
        let transition = session.protocol.close();
        if transition.is_some() {
            session.context_version += 1;
        }
        let snapshot = session.protocol.snapshot();
        let user_id = session.user_id.clone();
        drop(session);

        if let Some(transition) = &transition {
            Self::audit_transition(&self.audit, &user_id, session_id, transition)?;
        }
        Ok(Some(snapshot))
    }

    /// Current protocol snapshot for a session, if one exists.
    pub fn protocol_snapshot(&self, session_id: &str) -> Option<ProtocolSnapshot> {
        self.sessions.get(session_id).map(|s| s.protocol.snapshot())
    }
}
