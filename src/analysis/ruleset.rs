//! Versioned archetype rulesets.
//!
//! A ruleset is an ordered list of rules mapping symbolic cue labels onto
//! archetypes. Order matters: when two archetypes end up with equal weight,
//! the one registered earlier wins the tie, which keeps mapping fully
//! deterministic and therefore cacheable.

use std::path::Path;

use serde::{Deserialize, Serialize};

/// One archetype and the symbolic cues that feed its weight.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchetypeRule {
    pub archetype: String,
    /// Metaphor/theme labels (lowercase) that contribute to this archetype.
    pub cues: Vec<String>,
    /// Weight contributed per matched cue, scaled by the cue's extraction
    /// confidence.
    pub cue_weight: f64,
}

/// An ordered, versioned set of archetype rules.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchetypeRuleset {
    /// Version string baked into cache fingerprints; bump it whenever rules
    /// change so stale mappings cannot be served.
    pub version: String,
    pub rules: Vec<ArchetypeRule>,
}

impl ArchetypeRuleset {
    /// Load a ruleset from a YAML file.
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, anyhow::Error> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        let ruleset: Self = serde_yaml::from_str(&raw)?;
        if ruleset.rules.is_empty() {
            anyhow::bail!("ruleset {} has no rules", ruleset.version);
        }
        Ok(ruleset)
    }

    /// The built-in default taxonomy. Deployments override this with a
    /// curated YAML file; the built-in set exists so the pipeline is usable
    /// out of the box.
    pub fn builtin() -> Self {
        let rule = |archetype: &str, cues: &[&str], cue_weight: f64| ArchetypeRule {
            archetype: archetype.to_string(),
            cues: cues.iter().map(|c| c.to_string()).collect(),
            cue_weight,
        };
        Self {
            version: "builtin-v1".to_string(),
            rules: vec![
                rule(
                    "Shadow",
                    &["drowning", "darkness", "sinking", "trapped", "void", "smothered"],
                    0.2,
                ),
                rule(
                    "Hero",
                    &["climbing", "fighting", "storm", "battle", "mountain"],
                    0.2,
                ),
                rule(
                    "Caregiver",
                    &["holding", "shelter", "warmth", "nest", "tending"],
                    0.2,
                ),
                rule(
                    "Explorer",
                    &["horizon", "door", "threshold", "journey", "map"],
                    0.2,
                ),
                rule(
                    "Sage",
                    &["mirror", "light", "pattern", "thread", "lantern"],
                    0.2,
                ),
                rule(
                    "Innocent",
                    &["garden", "morning", "spring", "clean slate"],
                    0.2,
                ),
            ],
        }
    }
}
