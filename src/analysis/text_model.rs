//! Client boundary for the external text-understanding service.
//!
//! The service is stateless from this system's perspective: each call sends
//! raw text plus a small context block and gets back metaphor/theme
//! candidates. Timeout and retry policy live in
//! [`crate::analysis::extractor`], not here.

use std::collections::HashMap;
use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::{Metaphor, TextSpan, Theme};
use crate::utilities::errors::ExtractionError;

/// Context block sent alongside the text on every extraction call.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExtractionContext {
    pub session_id: String,
    /// Labels of recently dominant archetypes, oldest first.
    pub recent_archetypes: Vec<String>,
}

/// One metaphor or theme candidate as returned over the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SymbolCandidate {
    pub label: String,
    pub confidence: f64,
    #[serde(default)]
    pub start: usize,
    #[serde(default)]
    pub end: usize,
}

/// Wire response from the text-understanding service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExtractionResponse {
    #[serde(default)]
    pub metaphors: Vec<SymbolCandidate>,
    #[serde(default)]
    pub themes: Vec<SymbolCandidate>,
}

impl ExtractionResponse {
    pub fn into_symbols(self) -> (Vec<Metaphor>, Vec<Theme>) {
        let metaphors = self
            .metaphors
            .into_iter()
            .map(|c| Metaphor::new(c.label, c.confidence, TextSpan::new(c.start, c.end)))
            .collect();
        let themes = self
            .themes
            .into_iter()
            .map(|c| Theme::new(c.label, c.confidence, TextSpan::new(c.start, c.end)))
            .collect();
        (metaphors, themes)
    }
}

/// The text-understanding service, call-by-call and stateless.
#[async_trait]
pub trait TextModel: Send + Sync + fmt::Debug {
    async fn extract(
        &self,
        text: &str,
        context: &ExtractionContext,
    ) -> Result<ExtractionResponse, ExtractionError>;
}

/// HTTP-backed [`TextModel`] client.
///
/// POSTs `{ "text": ..., "context": ... }` to `{base_url}/v1/extract` and
/// expects an [`ExtractionResponse`] body.
#[derive(Debug, Clone)]
pub struct HttpTextModel {
    http: reqwest::Client,
    base_url: String,
}

impl HttpTextModel {
    pub fn new(http: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl TextModel for HttpTextModel {
    async fn extract(
        &self,
        text: &str,
        context: &ExtractionContext,
    ) -> Result<ExtractionResponse, ExtractionError> {
        let body = serde_json::json!({
            "text": text,
            "context": context,
        });

        let resp = self
            .http
            .post(format!("{}/v1/extract", self.base_url))
            .header("Accept", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| ExtractionError::Service {
                message: e.to_string(),
            })?;

        if !resp.status().is_success() {
            return Err(ExtractionError::Service {
                message: format!("extract returned {}", resp.status()),
            });
        }

        let json: Value = resp.json().await.map_err(|e| ExtractionError::Malformed {
            message: e.to_string(),
        })?;
        serde_json::from_value(json).map_err(|e| ExtractionError::Malformed {
            message: e.to_string(),
        })
    }
}

/// In-process [`TextModel`] backed by a fixed label table. Useful for local
/// development without the external service; matches whole words only.
#[derive(Debug, Clone, Default)]
pub struct StaticTextModel {
    labels: HashMap<String, f64>,
}

impl StaticTextModel {
    pub fn with_labels(labels: impl IntoIterator<Item = (String, f64)>) -> Self {
        Self {
            labels: labels.into_iter().collect(),
        }
    }
}

#[async_trait]
impl TextModel for StaticTextModel {
    async fn extract(
        &self,
        text: &str,
        _context: &ExtractionContext,
    ) -> Result<ExtractionResponse, ExtractionError> {
        let lowered = text.to_lowercase();
        let mut metaphors = Vec::new();
        for (label, confidence) in &self.labels {
            if let Some(start) = lowered.find(label.as_str()) {
                metaphors.push(SymbolCandidate {
                    label: label.clone(),
                    confidence: *confidence,
                    start,
                    end: start + label.len(),
                });
            }
        }
        metaphors.sort_by(|a, b| a.label.cmp(&b.label));
        Ok(ExtractionResponse {
            metaphors,
            themes: Vec::new(),
        })
    }
}
