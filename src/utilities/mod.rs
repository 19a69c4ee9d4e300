//! Shared utilities: error taxonomy, policy configuration, fingerprinting,
//! and logging setup.

pub mod config;
pub mod errors;
pub mod fingerprint;
pub mod logging;

pub use config::{PolicyConfig, RiskThresholds};
pub use errors::{ExtractionError, PipelineError};
pub use fingerprint::{fingerprint, normalize_text};
