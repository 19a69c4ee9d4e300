//! Symbolic units extracted from user text: metaphors, themes, and the
//! archetype weights derived from them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Byte range in the source text a symbolic unit derives from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextSpan {
    pub start: usize,
    pub end: usize,
}

impl TextSpan {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }
}

/// A metaphor extracted from input text.
///
/// Owned by the [`SymbolicAnalysis`] that created it; never mutated after
/// creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Metaphor {
    pub label: String,
    /// Extraction confidence in `[0, 1]`.
    pub confidence: f64,
    pub span: TextSpan,
}

impl Metaphor {
    pub fn new(label: impl Into<String>, confidence: f64, span: TextSpan) -> Self {
        Self {
            label: label.into(),
            confidence: confidence.clamp(0.0, 1.0),
            span,
        }
    }
}

/// A recurring theme extracted from input text.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Theme {
    pub label: String,
    /// Extraction confidence in `[0, 1]`.
    pub confidence: f64,
    pub span: TextSpan,
}

impl Theme {
    pub fn new(label: impl Into<String>, confidence: f64, span: TextSpan) -> Self {
        Self {
            label: label.into(),
            confidence: confidence.clamp(0.0, 1.0),
            span,
        }
    }
}

/// The output of one metaphor-extraction pass over a piece of text.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SymbolicAnalysis {
    pub metaphors: Vec<Metaphor>,
    pub themes: Vec<Theme>,
    /// Set when the text-understanding service failed or timed out and the
    /// metaphor/theme lists are an empty fallback rather than real output.
    pub degraded: bool,
}

impl SymbolicAnalysis {
    pub fn new(metaphors: Vec<Metaphor>, themes: Vec<Theme>) -> Self {
        Self {
            metaphors,
            themes,
            degraded: false,
        }
    }

    /// The empty fallback produced when extraction fails.
    pub fn degraded() -> Self {
        Self {
            metaphors: Vec::new(),
            themes: Vec::new(),
            degraded: true,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.metaphors.is_empty() && self.themes.is_empty()
    }
}

/// One (archetype, weight) pair inside an [`ArchetypeMapping`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArchetypeWeight {
    pub archetype: String,
    /// Relative weight in `[0, 1]`. Weights across a mapping sum to at most
    /// 1 but are not normalized probabilities, so "no dominant archetype"
    /// is representable as a low total.
    pub weight: f64,
}

/// Ordered archetype weights produced once per analysis, immutable.
///
/// Ordering is weight-descending with registration order of the ruleset as
/// the tie-break, so identical inputs always produce identical mappings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchetypeMapping {
    pub weights: Vec<ArchetypeWeight>,
    /// Version of the ruleset that produced this mapping.
    pub ruleset_version: String,
}

impl ArchetypeMapping {
    /// The highest-weighted archetype, if any weight is above zero.
    pub fn dominant(&self) -> Option<&ArchetypeWeight> {
        self.weights.first().filter(|w| w.weight > 0.0)
    }

    /// Sum of all weights; at most 1 by construction.
    pub fn total_weight(&self) -> f64 {
        self.weights.iter().map(|w| w.weight).sum()
    }

    /// A mapping with no dominant archetype, used when extraction produced
    /// nothing to map.
    pub fn empty(ruleset_version: impl Into<String>) -> Self {
        Self {
            weights: Vec::new(),
            ruleset_version: ruleset_version.into(),
        }
    }
}

/// A full symbolic analysis: extraction output plus the archetype mapping
/// derived from it. This is the unit the [`crate::analysis::cache`] stores.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub analysis: SymbolicAnalysis,
    pub mapping: ArchetypeMapping,
    /// Content fingerprint this result was computed under.
    pub fingerprint: String,
    pub computed_at: DateTime<Utc>,
}

impl AnalysisResult {
    /// Degraded analyses are never cached: serving an empty fallback after
    /// the service recovers would pin the session to stale emptiness.
    pub fn is_cacheable(&self) -> bool {
        !self.analysis.degraded
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metaphor_confidence_clamped() {
        let m = Metaphor::new("drowning", 1.7, TextSpan::new(0, 8));
        assert_eq!(m.confidence, 1.0);
        let m = Metaphor::new("drowning", -0.2, TextSpan::new(0, 8));
        assert_eq!(m.confidence, 0.0);
    }

    #[test]
    fn test_dominant_archetype() {
        let mapping = ArchetypeMapping {
            weights: vec![
                ArchetypeWeight {
                    archetype: "Shadow".into(),
                    weight: 0.5,
                },
                ArchetypeWeight {
                    archetype: "Hero".into(),
                    weight: 0.3,
                },
            ],
            ruleset_version: "v1".into(),
        };
        assert_eq!(mapping.dominant().unwrap().archetype, "Shadow");
        assert!((mapping.total_weight() - 0.8).abs() < 1e-9);
    }

    #[test]
    fn test_empty_mapping_has_no_dominant() {
        let mapping = ArchetypeMapping::empty("v1");
        assert!(mapping.dominant().is_none());
        assert_eq!(mapping.total_weight(), 0.0);
    }

    #[test]
    fn test_degraded_result_not_cacheable() {
        let result = AnalysisResult {
            analysis: SymbolicAnalysis::degraded(),
            mapping: ArchetypeMapping::empty("v1"),
            fingerprint: "fp".into(),
            computed_at: Utc::now(),
        };
        assert!(!result.is_cacheable());
    }
}
