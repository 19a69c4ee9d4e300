//! Symbolic enrichment: metaphor extraction, archetype mapping, and the
//! single-flight analysis cache that sits between them and the text model.

pub mod archetype_mapper;
pub mod cache;
pub mod extractor;
pub mod ruleset;
pub mod text_model;

pub use archetype_mapper::{ArchetypeMapper, SessionContext};
pub use cache::AnalysisCache;
pub use extractor::MetaphorExtractor;
pub use ruleset::{ArchetypeRule, ArchetypeRuleset};
pub use text_model::{ExtractionResponse, HttpTextModel, TextModel};
