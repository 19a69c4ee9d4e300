//! Crisis-risk levels and assessments.
//!
//! An assessment is always computed fresh for every turn — never cached,
//! never skipped — because staleness on this path is unsafe.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Ordinal risk level: `None < Low < Moderate < High < Imminent`.
///
/// The derived `Ord` follows declaration order, which the safety protocol
/// relies on for its threshold comparisons.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RiskLevel {
    None,
    Low,
    Moderate,
    High,
    Imminent,
}

impl RiskLevel {
    /// Whether this level starts or sustains a safety episode.
    pub fn is_elevated(&self) -> bool {
        *self >= RiskLevel::Low
    }
}

impl std::fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RiskLevel::None => "NONE",
            RiskLevel::Low => "LOW",
            RiskLevel::Moderate => "MODERATE",
            RiskLevel::High => "HIGH",
            RiskLevel::Imminent => "IMMINENT",
        };
        f.write_str(s)
    }
}

/// The result of one crisis-risk assessment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrisisAssessment {
    pub id: Uuid,
    pub user_id: String,
    pub session_id: String,
    pub level: RiskLevel,
    /// Numeric risk score in `[0, 1]`, monotonically related to `level`
    /// through the configured thresholds.
    pub score: f64,
    /// Pattern/trigger tags that contributed to the score.
    pub triggers: Vec<String>,
    pub recommended_actions: Vec<String>,
    pub assessed_at: DateTime<Utc>,
    /// Set when the assessment ran against degraded extraction output and
    /// only the keyword screen contributed.
    pub degraded_inputs: bool,
}

impl CrisisAssessment {
    /// A quiet assessment with no triggers, used as the session baseline.
    pub fn none(user_id: impl Into<String>, session_id: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id: user_id.into(),
            session_id: session_id.into(),
            level: RiskLevel::None,
            score: 0.0,
            triggers: Vec::new(),
            recommended_actions: Vec::new(),
            assessed_at: Utc::now(),
            degraded_inputs: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_risk_level_ordering() {
        assert!(RiskLevel::None < RiskLevel::Low);
        assert!(RiskLevel::Low < RiskLevel::Moderate);
        assert!(RiskLevel::Moderate < RiskLevel::High);
        assert!(RiskLevel::High < RiskLevel::Imminent);
    }

    #[test]
    fn test_elevated_levels() {
        assert!(!RiskLevel::None.is_elevated());
        assert!(RiskLevel::Low.is_elevated());
        assert!(RiskLevel::Imminent.is_elevated());
    }
}
