//! Crisis-risk assessment.
//!
//! Runs unconditionally on every turn, before and independent of symbolic
//! enrichment. The deterministic keyword screen guarantees an assessment is
//! produced even when extraction degraded; metaphor weighting and the trend
//! term refine the score when richer inputs exist. Failure policy: an
//! internal error is converted into the most conservative assessment and is
//! still audited — this path never fails open.

use std::sync::Arc;

use chrono::Utc;
use once_cell::sync::Lazy;
use regex::RegexSet;
use uuid::Uuid;

use crate::safety::audit::{AuditEvent, AuditRecord, AuditSink};
use crate::types::{CrisisAssessment, EmotionalInput, RiskLevel, SymbolicAnalysis};
use crate::utilities::config::RiskThresholds;
use crate::utilities::errors::PipelineError;

/// One screening bank: patterns, the tag they report, and their base score.
struct PatternBank {
    tag: &'static str,
    base_score: f64,
    patterns: RegexSet,
}

// Screening banks are mechanics, not clinical content: deployments replace
// the pattern lists through policy review, the scoring structure stays.
// Ordered strongest first.
static BANKS: Lazy<Vec<PatternBank>> = Lazy::new(|| {
    let bank = |tag: &'static str, base_score: f64, patterns: &[&str]| PatternBank {
        tag,
        base_score,
        patterns: RegexSet::new(patterns).expect("screening patterns must compile"),
    };
    vec![
        bank(
            "imminent-harm",
            0.95,
            &[
                r"(?i)\bkill(ing)? myself\b",
                r"(?i)\bend(ing)? (my|it) (life|all)\b",
                r"(?i)\bwant(ed)? to die\b",
                r"(?i)\bsuicide\b",
                r"(?i)\bno reason to (live|go on)\b",
            ],
        ),
        bank(
            "self-harm",
            0.72,
            &[
                r"(?i)\bhurt(ing)? myself\b",
                r"(?i)\bself[- ]?harm\b",
                r"(?i)\bcan'?t (go on|do this anymore)\b",
                r"(?i)\bno way out\b",
            ],
        ),
        bank(
            "hopelessness",
            0.45,
            &[
                r"(?i)\bhopeless\b",
                r"(?i)\bworthless\b",
                r"(?i)\bhate myself\b",
                r"(?i)\bgiv(e|ing) up\b",
                r"(?i)\bcompletely numb\b",
            ],
        ),
        bank(
            "distress",
            0.2,
            &[
                r"(?i)\boverwhelmed\b",
                r"(?i)\bexhausted\b",
                r"(?i)\ball alone\b",
                r"(?i)\bempty inside\b",
            ],
        ),
    ]
});

/// Metaphor labels that carry crisis weight when extraction is available.
static CRISIS_METAPHORS: &[&str] = &["drowning", "void", "darkness", "sinking", "trapped", "smothered"];

/// Per-metaphor contribution and its cap.
const METAPHOR_WEIGHT: f64 = 0.06;
const METAPHOR_CAP: f64 = 0.15;

/// Computes a discrete risk level and numeric score for every turn.
#[derive(Debug, Clone)]
pub struct CrisisAssessor {
    thresholds: RiskThresholds,
    trend_window: usize,
    trend_boost: f64,
    audit: Arc<dyn AuditSink>,
}

impl CrisisAssessor {
    pub fn new(
        thresholds: RiskThresholds,
        trend_window: usize,
        trend_boost: f64,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        Self {
            thresholds,
            trend_window,
            trend_boost,
            audit,
        }
    }

    /// Assess one input. Total: always yields an assessment, even for empty
    /// text, degraded extraction, or an internal scoring fault.
    ///
    /// The only error this returns is an audit-append failure — the audit
    /// collaborator is required, and losing safety records silently is not
    /// acceptable.
    pub fn assess(
        &self,
        input: &EmotionalInput,
        analysis: Option<&SymbolicAnalysis>,
        recent_levels: &[RiskLevel],
    ) -> Result<CrisisAssessment, PipelineError> {
        let assessment = match self.score(input, analysis, recent_levels) {
            Ok(assessment) => assessment,
            Err(e) => {
                tracing::error!(error = %e, "crisis scoring failed, assuming elevated risk");
                self.conservative_fallback(input)
            }
        };

        let record = AuditRecord::new(
            &input.user_id,
            &input.session_id,
            AuditEvent::Assessment {
                assessment_id: assessment.id,
                level: assessment.level,
                score: assessment.score,
                triggers: assessment.triggers.clone(),
                degraded_inputs: assessment.degraded_inputs,
            },
        );
        self.audit
            .append(&record)
            .map_err(|e| PipelineError::Audit(e.to_string()))?;

        tracing::info!(
            session_id = %input.session_id,
            level = %assessment.level,
            score = assessment.score,
            "crisis assessment recorded"
        );
        Ok(assessment)
    }

    fn score(
        &self,
        input: &EmotionalInput,
        analysis: Option<&SymbolicAnalysis>,
        recent_levels: &[RiskLevel],
    ) -> Result<CrisisAssessment, anyhow::Error> {
        let mut score: f64 = 0.0;
        let mut triggers = Vec::new();

        // (a) Keyword screen: runs on raw text, unaffected by extraction
        // state. The strongest bank sets the base; additional banks add a
        // small compounding term.
        for bank in BANKS.iter() {
            let matches = bank.patterns.matches(&input.text);
            if matches.matched_any() {
                triggers.push(bank.tag.to_string());
                if score < bank.base_score {
                    score = bank.base_score;
                } else {
                    score += 0.05;
                }
            }
        }

        // (b) Metaphor weighting, when extraction produced real output.
        let degraded_inputs = analysis.map(|a| a.degraded).unwrap_or(true);
        if let Some(analysis) = analysis.filter(|a| !a.degraded) {
            let mut metaphor_term: f64 = 0.0;
            for metaphor in &analysis.metaphors {
                let label = metaphor.label.to_lowercase();
                if CRISIS_METAPHORS.contains(&label.as_str()) {
                    metaphor_term += METAPHOR_WEIGHT * metaphor.confidence;
                }
            }
            if metaphor_term > 0.0 {
                triggers.push("crisis-metaphors".to_string());
                score += metaphor_term.min(METAPHOR_CAP);
            }
        }

        // (c) Trend term: escalate when risk has been non-decreasing across
        // the window and is already elevated.
        let window: Vec<RiskLevel> = recent_levels
            .iter()
            .rev()
            .take(self.trend_window)
            .rev()
            .copied()
            .collect();
        if window.len() >= self.trend_window
            && window.windows(2).all(|pair| pair[0] <= pair[1])
            && window.last().is_some_and(|l| l.is_elevated())
            && score > 0.0
        {
            triggers.push("rising-trend".to_string());
            score += self.trend_boost;
        }

        let score = score.clamp(0.0, 1.0);
        let level = self.thresholds.classify(score);

        Ok(CrisisAssessment {
            id: Uuid::new_v4(),
            user_id: input.user_id.clone(),
            session_id: input.session_id.clone(),
            level,
            score,
            triggers,
            recommended_actions: recommended_actions(level),
            assessed_at: Utc::now(),
            degraded_inputs,
        })
    }

    /// The assessment used when scoring itself faults: elevated risk, never
    /// silence.
    fn conservative_fallback(&self, input: &EmotionalInput) -> CrisisAssessment {
        let level = RiskLevel::High;
        CrisisAssessment {
            id: Uuid::new_v4(),
            user_id: input.user_id.clone(),
            session_id: input.session_id.clone(),
            level,
            score: self.thresholds.high,
            triggers: vec!["assessor-failure".to_string()],
            recommended_actions: recommended_actions(level),
            assessed_at: Utc::now(),
            degraded_inputs: true,
        }
    }
}

fn recommended_actions(level: RiskLevel) -> Vec<String> {
    match level {
        RiskLevel::None => Vec::new(),
        RiskLevel::Low => vec!["offer-grounding-exercise".into()],
        RiskLevel::Moderate => vec!["offer-grounding-exercise".into(), "surface-support-resources".into()],
        RiskLevel::High => vec![
            "surface-support-resources".into(),
            "constrain-narrative-to-support".into(),
        ],
        RiskLevel::Imminent => vec![
            "present-crisis-resources".into(),
            "constrain-narrative-to-support".into(),
            "notify-escalation-channel".into(),
        ],
    }
}
