//! Deterministic archetype mapping over a versioned ruleset.
//!
//! `map` is a pure function of its arguments plus the ruleset, which is what
//! makes analyses cacheable: identical text under an identical context
//! version always yields an identical mapping.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Utc;

use crate::analysis::cache::AnalysisCache;
use crate::analysis::extractor::MetaphorExtractor;
use crate::analysis::ruleset::ArchetypeRuleset;
use crate::analysis::text_model::ExtractionContext;
use crate::types::{
    AnalysisResult, ArchetypeMapping, ArchetypeWeight, EmotionalInput, SymbolicAnalysis,
};
use crate::utilities::fingerprint::fingerprint;

/// Continuity boost per appearance of an archetype in recent history.
const CONTINUITY_BOOST: f64 = 0.05;

/// The slice of session history the mapper is allowed to see.
///
/// `context_version` is bumped by the coordinator whenever the symbolic
/// context changes materially (e.g. a safety-protocol transition), which
/// invalidates cached analyses without touching the cache itself.
#[derive(Debug, Clone, Default)]
pub struct SessionContext {
    pub session_id: String,
    pub context_version: u64,
    /// Dominant archetypes of recent turns, oldest first.
    pub recent_archetypes: Vec<String>,
}

impl SessionContext {
    fn extraction_context(&self) -> ExtractionContext {
        ExtractionContext {
            session_id: self.session_id.clone(),
            recent_archetypes: self.recent_archetypes.clone(),
        }
    }
}

/// Maps extracted symbols onto archetype weights.
#[derive(Debug, Clone)]
pub struct ArchetypeMapper {
    ruleset: Arc<ArchetypeRuleset>,
    cache: AnalysisCache,
}

impl ArchetypeMapper {
    pub fn new(ruleset: ArchetypeRuleset, cache: AnalysisCache) -> Self {
        Self {
            ruleset: Arc::new(ruleset),
            cache,
        }
    }

    pub fn ruleset_version(&self) -> &str {
        &self.ruleset.version
    }

    /// Pure mapping: symbols plus recent history in, weights out.
    ///
    /// Weights are accumulated per rule from matched cues scaled by
    /// extraction confidence, plus a small continuity boost for archetypes
    /// seen recently. If the total exceeds 1 the weights are scaled down so
    /// the mapping invariant (sum ≤ 1) holds. Ties sort by registration
    /// order in the ruleset, never randomly.
    pub fn map(&self, analysis: &SymbolicAnalysis, context: &SessionContext) -> ArchetypeMapping {
        let mut weights: Vec<(usize, ArchetypeWeight)> = Vec::new();

        for (index, rule) in self.ruleset.rules.iter().enumerate() {
            let mut weight = 0.0;
            for metaphor in &analysis.metaphors {
                if rule.cues.iter().any(|c| c == &metaphor.label.to_lowercase()) {
                    weight += rule.cue_weight * metaphor.confidence;
                }
            }
            for theme in &analysis.themes {
                if rule.cues.iter().any(|c| c == &theme.label.to_lowercase()) {
                    weight += rule.cue_weight * theme.confidence;
                }
            }
            let continuity = context
                .recent_archetypes
                .iter()
                .filter(|a| *a == &rule.archetype)
                .count() as f64
                * CONTINUITY_BOOST;
            // History sustains an archetype, it never introduces one.
            if weight > 0.0 {
                weight += continuity;
            }
            if weight > 0.0 {
                weights.push((
                    index,
                    ArchetypeWeight {
                        archetype: rule.archetype.clone(),
                        weight,
                    },
                ));
            }
        }

        let total: f64 = weights.iter().map(|(_, w)| w.weight).sum();
        if total > 1.0 {
            for (_, w) in &mut weights {
                w.weight /= total;
            }
        }

        // Weight descending; registration index breaks ties.
        weights.sort_by(|(ia, wa), (ib, wb)| {
            wb.weight
                .partial_cmp(&wa.weight)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(ia.cmp(ib))
        });

        ArchetypeMapping {
            weights: weights.into_iter().map(|(_, w)| w).collect(),
            ruleset_version: self.ruleset.version.clone(),
        }
    }

    /// Cache-integrated analysis: extract, then map, keyed on the content
    /// fingerprint of the normalized text plus ruleset version, session id,
    /// and context version. Session scoping matters: the cached mapping
    /// embeds this session's continuity boost, so an entry must never be
    /// served to a different session's turn.
    ///
    /// Returns the result and whether it was served from cache. A crisis
    /// assessment is never produced through this path.
    pub async fn analyze_with_context(
        &self,
        input: &EmotionalInput,
        context: &SessionContext,
        extractor: &MetaphorExtractor,
    ) -> (Arc<AnalysisResult>, bool) {
        let context_version = format!(
            "{}:{}:{}",
            self.ruleset.version, context.session_id, context.context_version
        );
        let fp = fingerprint(&input.text, &context_version);

        let computed = AtomicBool::new(false);
        let extraction_context = context.extraction_context();
        let result = self
            .cache
            .get_or_compute(&fp, || {
                computed.store(true, Ordering::SeqCst);
                let fp = fp.clone();
                let extraction_context = extraction_context.clone();
                async move {
                    let analysis = extractor.extract(&input.text, &extraction_context).await;
                    let mapping = self.map(&analysis, context);
                    Ok(AnalysisResult {
                        analysis,
                        mapping,
                        fingerprint: fp,
                        computed_at: Utc::now(),
                    })
                }
            })
            .await;

        match result {
            Ok(result) => {
                let cached = !computed.load(Ordering::SeqCst);
                (result, cached)
            }
            // The extractor degrades instead of failing, so a propagated
            // flight failure can only come from a peer's leader being torn
            // down. Recover with a direct uncached computation.
            Err(e) => {
                tracing::warn!(error = %e, "shared analysis flight failed, computing uncached");
                let analysis = extractor.extract(&input.text, &extraction_context).await;
                let mapping = self.map(&analysis, context);
                (
                    Arc::new(AnalysisResult {
                        analysis,
                        mapping,
                        fingerprint: fp,
                        computed_at: Utc::now(),
                    }),
                    false,
                )
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::types::{Metaphor, TextSpan};

    fn mapper() -> ArchetypeMapper {
        ArchetypeMapper::new(
            ArchetypeRuleset::builtin(),
            AnalysisCache::new(Duration::from_secs(60)),
        )
    }

    fn analysis_with(labels: &[(&str, f64)]) -> SymbolicAnalysis {
        let metaphors = labels
            .iter()
            .map(|(label, conf)| Metaphor::new(*label, *conf, TextSpan::new(0, label.len())))
            .collect();
        SymbolicAnalysis::new(metaphors, Vec::new())
    }

    #[test]
    fn test_mapping_is_deterministic() {
        let mapper = mapper();
        let analysis = analysis_with(&[("drowning", 0.9), ("storm", 0.6)]);
        let context = SessionContext::default();

        let a = mapper.map(&analysis, &context);
        let b = mapper.map(&analysis, &context);
        assert_eq!(a.weights, b.weights);
    }

    #[test]
    fn test_equal_weights_tie_break_by_registration_order() {
        let mapper = mapper();
        // Same confidence into Shadow ("drowning") and Hero ("storm");
        // Shadow is registered first and must win the tie.
        let analysis = analysis_with(&[("drowning", 0.8), ("storm", 0.8)]);
        let mapping = mapper.map(&analysis, &SessionContext::default());

        assert_eq!(mapping.weights.len(), 2);
        assert_eq!(mapping.weights[0].archetype, "Shadow");
        assert_eq!(mapping.weights[1].archetype, "Hero");
        assert_eq!(mapping.weights[0].weight, mapping.weights[1].weight);
    }

    #[test]
    fn test_weights_sum_at_most_one() {
        let mapper = mapper();
        let analysis = analysis_with(&[
            ("drowning", 1.0),
            ("darkness", 1.0),
            ("sinking", 1.0),
            ("storm", 1.0),
            ("battle", 1.0),
            ("mirror", 1.0),
            ("horizon", 1.0),
        ]);
        let mapping = mapper.map(&analysis, &SessionContext::default());
        assert!(mapping.total_weight() <= 1.0 + 1e-9);
    }

    #[test]
    fn test_empty_analysis_maps_to_no_dominant_archetype() {
        let mapper = mapper();
        let mapping = mapper.map(&SymbolicAnalysis::degraded(), &SessionContext::default());
        assert!(mapping.dominant().is_none());
    }

    #[test]
    fn test_history_sustains_but_does_not_introduce() {
        let mapper = mapper();
        let context = SessionContext {
            session_id: "s1".into(),
            context_version: 0,
            recent_archetypes: vec!["Hero".into(), "Hero".into()],
        };

        // No Hero cues extracted: history alone must not introduce Hero.
        let mapping = mapper.map(&analysis_with(&[("drowning", 0.5)]), &context);
        assert!(mapping.weights.iter().all(|w| w.archetype != "Hero"));

        // With a Hero cue, history tips the balance over an equal rival.
        let mapping = mapper.map(&analysis_with(&[("drowning", 0.5), ("storm", 0.5)]), &context);
        assert_eq!(mapping.dominant().unwrap().archetype, "Hero");
    }

    #[tokio::test]
    async fn test_analyze_with_context_caches_by_fingerprint() {
        use crate::analysis::text_model::StaticTextModel;

        let mapper = mapper();
        let model = Arc::new(StaticTextModel::with_labels(vec![(
            "storm".to_string(),
            0.9,
        )]));
        let extractor = MetaphorExtractor::new(
            model,
            Duration::from_millis(100),
            Duration::from_millis(50),
        );
        let context = SessionContext {
            session_id: "s1".into(),
            ..Default::default()
        };
        let input = EmotionalInput::new("u1", "s1", "I feel like a storm");

        let (first, cached) = mapper.analyze_with_context(&input, &context, &extractor).await;
        assert!(!cached);

        let again = EmotionalInput::new("u1", "s1", "i feel  like a STORM");
        let (second, cached) = mapper.analyze_with_context(&again, &context, &extractor).await;
        assert!(cached);
        assert_eq!(first.fingerprint, second.fingerprint);

        // Bumping the context version forces a fresh computation.
        let bumped = SessionContext {
            context_version: 1,
            ..context
        };
        let (_, cached) = mapper.analyze_with_context(&input, &bumped, &extractor).await;
        assert!(!cached);
    }

    #[tokio::test]
    async fn test_sessions_never_share_history_shaped_entries() {
        use crate::analysis::text_model::StaticTextModel;

        let mapper = mapper();
        let model = Arc::new(StaticTextModel::with_labels(vec![
            ("drowning".to_string(), 0.8),
            ("storm".to_string(), 0.8),
        ]));
        let extractor = MetaphorExtractor::new(
            model,
            Duration::from_millis(100),
            Duration::from_millis(50),
        );
        let text = "drowning in a storm";

        // Session 1 carries Hero history, which tips its mapping to Hero.
        let ctx_a = SessionContext {
            session_id: "s1".into(),
            context_version: 0,
            recent_archetypes: vec!["Hero".into()],
        };
        let input_a = EmotionalInput::new("u1", "s1", text);
        let (a, _) = mapper.analyze_with_context(&input_a, &ctx_a, &extractor).await;
        assert_eq!(a.mapping.dominant().unwrap().archetype, "Hero");

        // Session 2, same text, no history: must compute fresh and land on
        // the registration-order tie-break, not session 1's boosted mapping.
        let ctx_b = SessionContext {
            session_id: "s2".into(),
            ..Default::default()
        };
        let input_b = EmotionalInput::new("u2", "s2", text);
        let (b, cached) = mapper.analyze_with_context(&input_b, &ctx_b, &extractor).await;
        assert!(!cached);
        assert_eq!(b.mapping.dominant().unwrap().archetype, "Shadow");
    }
}
