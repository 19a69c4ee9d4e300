//! Error types for the coordination pipeline.
//!
//! The taxonomy mirrors the containment policy: enrichment failures degrade
//! locally and never surface as errors, scene-version conflicts are
//! retryable, and only missing required collaborators fail a turn outright.

use thiserror::Error;

/// Errors a turn can surface to the caller.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Optimistic-concurrency version mismatch on scene persistence.
    /// Retryable: re-read the scene and resubmit.
    #[error("scene version conflict for session {session_id}: expected {expected}, found {found}")]
    Conflict {
        session_id: String,
        expected: u64,
        found: u64,
    },

    /// A required collaborator (durable store, cache infrastructure) is
    /// unavailable and the turn cannot complete.
    #[error("required collaborator unavailable: {service}: {message}")]
    ServiceUnavailable { service: String, message: String },

    /// The audit collaborator rejected an append. Surfaced, never swallowed:
    /// safety records must not be lost silently.
    #[error("audit append failed: {0}")]
    Audit(String),

    /// Underlying storage error from a scene or audit adapter.
    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

impl PipelineError {
    /// Whether the caller should re-read state and retry.
    pub fn is_retryable(&self) -> bool {
        matches!(self, PipelineError::Conflict { .. })
    }
}

/// Errors at the text-understanding service boundary.
///
/// These never fail a turn; the extractor converts them into a degraded
/// [`crate::types::SymbolicAnalysis`] after its retry budget is spent.
#[derive(Debug, Clone, Error)]
pub enum ExtractionError {
    #[error("text-understanding service timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("text-understanding service error: {message}")]
    Service { message: String },

    #[error("text-understanding service returned a malformed response: {message}")]
    Malformed { message: String },
}
