//! Policy configuration for the pipeline.
//!
//! Risk thresholds, dwell counts, and timeouts are clinical policy
//! parameters, not implementation constants. They are loaded from YAML in
//! deployment and defaulted here for tests; the only hard requirement the
//! code enforces is that thresholds stay monotonic and total.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::types::RiskLevel;

/// Score boundaries mapping the numeric risk score onto [`RiskLevel`].
///
/// Every score in `[0, 1]` maps to exactly one level: scores below `low`
/// are NONE, and each boundary is inclusive on its level.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RiskThresholds {
    pub low: f64,
    pub moderate: f64,
    pub high: f64,
    pub imminent: f64,
}

impl Default for RiskThresholds {
    fn default() -> Self {
        Self {
            low: 0.15,
            moderate: 0.4,
            high: 0.7,
            imminent: 0.9,
        }
    }
}

impl RiskThresholds {
    /// Map a score to its level. Total over all f64 inputs: NaN and
    /// out-of-range scores are clamped before comparison.
    pub fn classify(&self, score: f64) -> RiskLevel {
        let score = if score.is_nan() {
            // An unrepresentable score is an assessor fault; classify it
            // conservatively rather than guess low.
            1.0
        } else {
            score.clamp(0.0, 1.0)
        };
        if score >= self.imminent {
            RiskLevel::Imminent
        } else if score >= self.high {
            RiskLevel::High
        } else if score >= self.moderate {
            RiskLevel::Moderate
        } else if score >= self.low {
            RiskLevel::Low
        } else {
            RiskLevel::None
        }
    }

    /// Validate strict monotonicity of the boundaries.
    pub fn validate(&self) -> Result<(), String> {
        let bounds = [self.low, self.moderate, self.high, self.imminent];
        if bounds.iter().any(|b| !(0.0..=1.0).contains(b)) {
            return Err("risk thresholds must lie in [0, 1]".into());
        }
        if !(self.low < self.moderate && self.moderate < self.high && self.high < self.imminent) {
            return Err("risk thresholds must be strictly increasing".into());
        }
        Ok(())
    }
}

/// All tunable policy parameters for the coordination pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    pub thresholds: RiskThresholds,
    /// Consecutive quiet turns required before the protocol de-escalates
    /// (MONITORING→INACTIVE, ESCALATED→RESOLVING). The dwell count K.
    pub dwell_turns: u32,
    /// How many recent assessments the trend term looks at.
    pub trend_window: usize,
    /// Score added when risk has been non-decreasing across the trend window.
    pub trend_boost: f64,
    /// TTL for cached analyses, in seconds. Short by design: emotional
    /// context changes quickly.
    pub cache_ttl_secs: u64,
    /// Primary timeout for the text-understanding service, in milliseconds.
    pub extract_timeout_ms: u64,
    /// Timeout for the single retry attempt, in milliseconds.
    pub extract_retry_timeout_ms: u64,
    /// Minimum wall-clock hold before an ESCALATED episode may auto-resolve,
    /// in seconds. Operator resolution bypasses this gate.
    pub min_escalation_hold_secs: u64,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            thresholds: RiskThresholds::default(),
            dwell_turns: 3,
            trend_window: 3,
            trend_boost: 0.1,
            cache_ttl_secs: 300,
            extract_timeout_ms: 3000,
            extract_retry_timeout_ms: 1000,
            min_escalation_hold_secs: 600,
        }
    }
}

impl PolicyConfig {
    /// Load a policy file, validating thresholds.
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, anyhow::Error> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        let config: Self = serde_yaml::from_str(&raw)?;
        config
            .thresholds
            .validate()
            .map_err(|e| anyhow::anyhow!("invalid policy file: {e}"))?;
        Ok(config)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    pub fn extract_timeout(&self) -> Duration {
        Duration::from_millis(self.extract_timeout_ms)
    }

    pub fn extract_retry_timeout(&self) -> Duration {
        Duration::from_millis(self.extract_retry_timeout_ms)
    }

    pub fn min_escalation_hold(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.min_escalation_hold_secs as i64)
    }
}
