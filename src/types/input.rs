//! Raw emotional input as handed over by the transport layer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A single free-text emotional expression submitted by a user.
///
/// Immutable once created. The transport layer authenticates the caller and
/// attaches `user_id`/`session_id` before this struct is built; nothing in
/// the pipeline mutates it afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmotionalInput {
    pub id: Uuid,
    pub user_id: String,
    pub session_id: String,
    pub text: String,
    pub timestamp: DateTime<Utc>,
    /// Reference to the prior [`crate::types::IntegratedState`] this input
    /// responds to, if the client supplied one.
    pub prior_state: Option<Uuid>,
}

impl EmotionalInput {
    pub fn new(user_id: impl Into<String>, session_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id: user_id.into(),
            session_id: session_id.into(),
            text: text.into(),
            timestamp: Utc::now(),
            prior_state: None,
        }
    }

    /// Attach a reference to the prior state this input responds to.
    pub fn in_response_to(mut self, prior: Uuid) -> Self {
        self.prior_state = Some(prior);
        self
    }
}
