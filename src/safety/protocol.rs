//! Safety-protocol state machine.
//!
//! One instance per session. States:
//! INACTIVE → MONITORING → ACTIVE → ESCALATED → RESOLVING → INACTIVE,
//! with a direct emergency jump to ESCALATED on IMMINENT risk from any
//! state. De-escalation is dwell-gated: the machine only steps down after K
//! consecutive quiet turns, and ESCALATED additionally holds for a minimum
//! wall-clock period before auto-resolution. Transitions are idempotent
//! under redelivery of the same assessment, and every input has a defined
//! next state.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::{CrisisAssessment, RiskLevel};

/// Protocol lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProtocolState {
    Inactive,
    Monitoring,
    Active,
    Escalated,
    Resolving,
}

impl ProtocolState {
    /// Whether this state constrains narrative branching and short-circuits
    /// symbolic enrichment.
    pub fn constrains_narrative(&self) -> bool {
        matches!(self, ProtocolState::Active | ProtocolState::Escalated)
    }
}

impl std::fmt::Display for ProtocolState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ProtocolState::Inactive => "INACTIVE",
            ProtocolState::Monitoring => "MONITORING",
            ProtocolState::Active => "ACTIVE",
            ProtocolState::Escalated => "ESCALATED",
            ProtocolState::Resolving => "RESOLVING",
        };
        f.write_str(s)
    }
}

/// What drove a transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TransitionCause {
    /// The assessment that crossed a threshold.
    Assessment { assessment_id: Uuid, level: RiskLevel },
    /// An external operator resolved the episode.
    Operator { operator_id: String },
    /// Dwell-gated automatic resolution.
    AutoResolve,
    /// Explicit episode close.
    Close,
}

/// One recorded state transition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransitionRecord {
    pub from: ProtocolState,
    pub to: ProtocolState,
    pub cause: TransitionCause,
    pub at: DateTime<Utc>,
}

/// How an episode ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EpisodeOutcome {
    /// Risk subsided and the machine stepped down on its own.
    Deescalated,
    /// An operator resolved the episode externally.
    OperatorResolved,
    /// Sustained low risk auto-resolved an escalation.
    AutoResolved,
}

/// One escalation episode: opened on the first elevated assessment, closed
/// when the machine returns to INACTIVE.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SafetyEpisode {
    pub id: Uuid,
    pub started_at: DateTime<Utc>,
    /// Assessment that opened the episode.
    pub triggered_by: Uuid,
    pub peak_level: RiskLevel,
    pub resolved_at: Option<DateTime<Utc>>,
    pub outcome: Option<EpisodeOutcome>,
}

/// Serializable snapshot of protocol state, embedded in
/// [`crate::types::IntegratedState`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProtocolSnapshot {
    pub state: ProtocolState,
    pub episode_id: Option<Uuid>,
    pub episode_started_at: Option<DateTime<Utc>>,
    pub last_transition_at: Option<DateTime<Utc>>,
}

/// Per-session safety-protocol state machine.
#[derive(Debug, Clone)]
pub struct SafetyProtocol {
    state: ProtocolState,
    episode: Option<SafetyEpisode>,
    /// Consecutive NONE turns while MONITORING.
    quiet_streak: u32,
    /// Consecutive ≤LOW turns while ESCALATED.
    calm_streak: u32,
    /// Id of the last applied assessment, for idempotent redelivery.
    last_assessment: Option<Uuid>,
    last_transition_at: Option<DateTime<Utc>>,
    transitions: Vec<TransitionRecord>,
    /// Dwell count K.
    dwell_turns: u32,
    /// Minimum hold before ESCALATED may auto-resolve.
    min_escalation_hold: Duration,
}

impl SafetyProtocol {
    pub fn new(dwell_turns: u32, min_escalation_hold: Duration) -> Self {
        Self {
            state: ProtocolState::Inactive,
            episode: None,
            quiet_streak: 0,
            calm_streak: 0,
            last_assessment: None,
            last_transition_at: None,
            transitions: Vec::new(),
            dwell_turns,
            min_escalation_hold,
        }
    }

    pub fn state(&self) -> ProtocolState {
        self.state
    }

    pub fn episode(&self) -> Option<&SafetyEpisode> {
        self.episode.as_ref()
    }

    pub fn transitions(&self) -> &[TransitionRecord] {
        &self.transitions
    }

    pub fn snapshot(&self) -> ProtocolSnapshot {
        ProtocolSnapshot {
            state: self.state,
            episode_id: self.episode.as_ref().map(|e| e.id),
            episode_started_at: self.episode.as_ref().map(|e| e.started_at),
            last_transition_at: self.last_transition_at,
        }
    }

    /// Apply one assessment and return the transition it caused, if any.
    ///
    /// Idempotent: redelivering the assessment last applied is a no-op.
    /// Total: every (state, level) pair has a defined next state.
    pub fn apply(&mut self, assessment: &CrisisAssessment) -> Option<TransitionRecord> {
        if self.last_assessment == Some(assessment.id) {
            return None;
        }
        self.last_assessment = Some(assessment.id);

        let level = assessment.level;
        if let Some(episode) = &mut self.episode {
            if level > episode.peak_level {
                episode.peak_level = level;
            }
        }

        // Emergency path: IMMINENT escalates from any state, bypassing the
        // usual MONITORING/ACTIVE ladder.
        if level == RiskLevel::Imminent {
            self.calm_streak = 0;
            self.quiet_streak = 0;
            if self.state != ProtocolState::Escalated {
                self.ensure_episode(assessment);
                return Some(self.transition(
                    ProtocolState::Escalated,
                    TransitionCause::Assessment {
                        assessment_id: assessment.id,
                        level,
                    },
                ));
            }
            return None;
        }

        let cause = TransitionCause::Assessment {
            assessment_id: assessment.id,
            level,
        };

        match self.state {
            ProtocolState::Inactive => {
                if level >= RiskLevel::Low {
                    self.ensure_episode(assessment);
                    Some(self.transition(ProtocolState::Monitoring, cause))
                } else {
                    None
                }
            }
            ProtocolState::Monitoring => {
                if level >= RiskLevel::Moderate {
                    self.quiet_streak = 0;
                    Some(self.transition(ProtocolState::Active, cause))
                } else if level == RiskLevel::None {
                    self.quiet_streak += 1;
                    if self.quiet_streak >= self.dwell_turns {
                        self.close_episode(EpisodeOutcome::Deescalated);
                        Some(self.transition(ProtocolState::Inactive, cause))
                    } else {
                        None
                    }
                } else {
                    // LOW sustains monitoring and resets the quiet dwell.
                    self.quiet_streak = 0;
                    None
                }
            }
            ProtocolState::Active => {
                if level >= RiskLevel::High {
                    Some(self.transition(ProtocolState::Escalated, cause))
                } else if level <= RiskLevel::Low {
                    self.quiet_streak = 0;
                    Some(self.transition(ProtocolState::Monitoring, cause))
                } else {
                    None
                }
            }
            ProtocolState::Escalated => {
                if level <= RiskLevel::Low {
                    self.calm_streak += 1;
                    let held_long_enough = self
                        .last_transition_at
                        .map(|at| Utc::now() - at >= self.min_escalation_hold)
                        .unwrap_or(false);
                    if self.calm_streak >= self.dwell_turns && held_long_enough {
                        tracing::info!("escalation auto-resolving after sustained low risk");
                        self.calm_streak = 0;
                        Some(self.transition(ProtocolState::Resolving, TransitionCause::AutoResolve))
                    } else {
                        None
                    }
                } else {
                    self.calm_streak = 0;
                    None
                }
            }
            ProtocolState::Resolving => {
                if level >= RiskLevel::Moderate {
                    // Risk returned before the episode closed; resume the
                    // active posture rather than reopening a new episode.
                    Some(self.transition(ProtocolState::Active, cause))
                } else if level == RiskLevel::None {
                    self.close_episode(EpisodeOutcome::AutoResolved);
                    Some(self.transition(ProtocolState::Inactive, cause))
                } else {
                    None
                }
            }
        }
    }

    /// External operator resolution. Moves ESCALATED to RESOLVING
    /// immediately, bypassing dwell and hold gates.
    pub fn resolve_external(&mut self, operator_id: impl Into<String>) -> Option<TransitionRecord> {
        if self.state != ProtocolState::Escalated {
            return None;
        }
        let operator_id = operator_id.into();
        tracing::info!(operator_id = %operator_id, "escalation resolved by operator");
        if let Some(episode) = &mut self.episode {
            episode.outcome = Some(EpisodeOutcome::OperatorResolved);
        }
        self.calm_streak = 0;
        Some(self.transition(ProtocolState::Resolving, TransitionCause::Operator { operator_id }))
    }

    /// Explicitly close a RESOLVING episode back to INACTIVE.
    pub fn close(&mut self) -> Option<TransitionRecord> {
        if self.state != ProtocolState::Resolving {
            return None;
        }
        let outcome = self
            .episode
            .as_ref()
            .and_then(|e| e.outcome)
            .unwrap_or(EpisodeOutcome::AutoResolved);
        self.close_episode(outcome);
        Some(self.transition(ProtocolState::Inactive, TransitionCause::Close))
    }

    fn ensure_episode(&mut self, assessment: &CrisisAssessment) {
        if self.episode.as_ref().map_or(true, |e| e.resolved_at.is_some()) {
            self.episode = Some(SafetyEpisode {
                id: Uuid::new_v4(),
                started_at: Utc::now(),
                triggered_by: assessment.id,
                peak_level: assessment.level,
                resolved_at: None,
                outcome: None,
            });
        }
    }

    fn close_episode(&mut self, outcome: EpisodeOutcome) {
        if let Some(episode) = &mut self.episode {
            if episode.resolved_at.is_none() {
                episode.resolved_at = Some(Utc::now());
                episode.outcome.get_or_insert(outcome);
            }
        }
        self.quiet_streak = 0;
        self.calm_streak = 0;
    }

    fn transition(&mut self, to: ProtocolState, cause: TransitionCause) -> TransitionRecord {
        let record = TransitionRecord {
            from: self.state,
            to,
            cause,
            at: Utc::now(),
        };
        tracing::info!(from = %record.from, to = %record.to, "safety protocol transition");
        self.state = to;
        self.last_transition_at = Some(record.at);
        self.transitions.push(record.clone());
        record
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::types::EmotionalInput;

    fn protocol() -> SafetyProtocol {
        // Zero hold so dwell alone gates auto-resolution in tests.
        SafetyProtocol::new(3, Duration::zero())
    }

    fn assessment(level: RiskLevel) -> CrisisAssessment {
        let input = EmotionalInput::new("u1", "s1", "text");
        CrisisAssessment {
            level,
            score: match level {
                RiskLevel::None => 0.0,
                RiskLevel::Low => 0.2,
                RiskLevel::Moderate => 0.5,
                RiskLevel::High => 0.75,
                RiskLevel::Imminent => 0.95,
            },
            ..CrisisAssessment::none(input.user_id, input.session_id)
        }
    }

    #[test]
    fn test_escalation_ladder_passes_through_active() {
        let mut p = protocol();
        p.apply(&assessment(RiskLevel::Low));
        assert_eq!(p.state(), ProtocolState::Monitoring);

        // HIGH while monitoring still only reaches ACTIVE this turn.
        p.apply(&assessment(RiskLevel::High));
        assert_eq!(p.state(), ProtocolState::Active);

        p.apply(&assessment(RiskLevel::High));
        assert_eq!(p.state(), ProtocolState::Escalated);
    }

    #[test]
    fn test_imminent_jumps_straight_to_escalated() {
        let mut p = protocol();
        let t = p.apply(&assessment(RiskLevel::Imminent)).unwrap();
        assert_eq!(t.from, ProtocolState::Inactive);
        assert_eq!(t.to, ProtocolState::Escalated);
        assert!(p.episode().is_some());
    }

    #[test]
    fn test_redelivered_assessment_is_idempotent() {
        let mut p = protocol();
        let a = assessment(RiskLevel::Moderate);
        let first = p.apply(&a);
        assert!(first.is_some());
        let redelivered = p.apply(&a);
        assert!(redelivered.is_none());
        assert_eq!(p.state(), ProtocolState::Monitoring);
        assert_eq!(p.transitions().len(), 1);
    }

    #[test]
    fn test_monitoring_deescalates_only_after_dwell() {
        let mut p = protocol();
        p.apply(&assessment(RiskLevel::Low));
        assert_eq!(p.state(), ProtocolState::Monitoring);

        // Five NONE turns with K=3: stays MONITORING through turn 2,
        // transitions exactly on turn 3.
        p.apply(&assessment(RiskLevel::None));
        assert_eq!(p.state(), ProtocolState::Monitoring);
        p.apply(&assessment(RiskLevel::None));
        assert_eq!(p.state(), ProtocolState::Monitoring);
        p.apply(&assessment(RiskLevel::None));
        assert_eq!(p.state(), ProtocolState::Inactive);
        assert!(p.episode().unwrap().resolved_at.is_some());

        p.apply(&assessment(RiskLevel::None));
        p.apply(&assessment(RiskLevel::None));
        assert_eq!(p.state(), ProtocolState::Inactive);
    }

    #[test]
    fn test_quiet_streak_resets_on_low() {
        let mut p = protocol();
        p.apply(&assessment(RiskLevel::Low));
        p.apply(&assessment(RiskLevel::None));
        p.apply(&assessment(RiskLevel::None));
        // A LOW turn resets the dwell; two more NONEs are not enough.
        p.apply(&assessment(RiskLevel::Low));
        p.apply(&assessment(RiskLevel::None));
        p.apply(&assessment(RiskLevel::None));
        assert_eq!(p.state(), ProtocolState::Monitoring);
    }

    #[test]
    fn test_active_steps_down_to_monitoring() {
        let mut p = protocol();
        // MODERATE climbs the ladder one step per turn.
        p.apply(&assessment(RiskLevel::Moderate));
        assert_eq!(p.state(), ProtocolState::Monitoring);
        p.apply(&assessment(RiskLevel::Moderate));
        assert_eq!(p.state(), ProtocolState::Active);

        p.apply(&assessment(RiskLevel::Low));
        assert_eq!(p.state(), ProtocolState::Monitoring);
        // The episode stays open.
        assert!(p.episode().unwrap().resolved_at.is_none());
    }

    #[test]
    fn test_escalated_auto_resolves_after_dwell() {
        let mut p = protocol();
        p.apply(&assessment(RiskLevel::Imminent));
        assert_eq!(p.state(), ProtocolState::Escalated);

        p.apply(&assessment(RiskLevel::Low));
        p.apply(&assessment(RiskLevel::None));
        assert_eq!(p.state(), ProtocolState::Escalated);
        p.apply(&assessment(RiskLevel::Low));
        assert_eq!(p.state(), ProtocolState::Resolving);

        p.apply(&assessment(RiskLevel::None));
        assert_eq!(p.state(), ProtocolState::Inactive);
        let episode = p.episode().unwrap();
        assert_eq!(episode.outcome, Some(EpisodeOutcome::AutoResolved));
        assert_eq!(episode.peak_level, RiskLevel::Imminent);
    }

    #[test]
    fn test_escalation_hold_gate_blocks_auto_resolution() {
        let mut p = SafetyProtocol::new(1, Duration::hours(1));
        p.apply(&assessment(RiskLevel::Imminent));
        p.apply(&assessment(RiskLevel::None));
        // Dwell satisfied but the hold period is not.
        assert_eq!(p.state(), ProtocolState::Escalated);
    }

    #[test]
    fn test_operator_resolution_bypasses_gates() {
        let mut p = SafetyProtocol::new(3, Duration::hours(1));
        p.apply(&assessment(RiskLevel::Imminent));

        let t = p.resolve_external("op-7").unwrap();
        assert_eq!(t.to, ProtocolState::Resolving);
        assert!(matches!(t.cause, TransitionCause::Operator { .. }));

        p.close().unwrap();
        assert_eq!(p.state(), ProtocolState::Inactive);
        assert_eq!(
            p.episode().unwrap().outcome,
            Some(EpisodeOutcome::OperatorResolved)
        );
    }

    #[test]
    fn test_resolving_reescalates_on_returning_risk() {
        let mut p = protocol();
        p.apply(&assessment(RiskLevel::Imminent));
        p.resolve_external("op-7");
        p.apply(&assessment(RiskLevel::Moderate));
        assert_eq!(p.state(), ProtocolState::Active);
    }

    #[test]
    fn test_every_input_has_a_defined_next_state() {
        let states = [
            RiskLevel::None,
            RiskLevel::Low,
            RiskLevel::Moderate,
            RiskLevel::High,
            RiskLevel::Imminent,
        ];
        // Drive fresh machines through every level from every reachable
        // state shape; apply must never panic and always land somewhere.
        for first in states {
            for second in states {
                for third in states {
                    let mut p = protocol();
                    p.apply(&assessment(first));
                    p.apply(&assessment(second));
                    p.apply(&assessment(third));
                    let _ = p.state();
                }
            }
        }
    }
}
