//! Metaphor extraction with bounded timeout and graceful degradation.
//!
//! Enrichment is best-effort: a slow or failing text-understanding service
//! must never fail a turn. The extractor tries the service once under the
//! primary timeout, retries once under a shorter timeout, and then falls
//! back to a degraded (empty, flagged) analysis.

use std::sync::Arc;
use std::time::Duration;

use crate::analysis::text_model::{ExtractionContext, TextModel};
use crate::types::SymbolicAnalysis;
use crate::utilities::errors::ExtractionError;

/// Wraps the external text model with the pipeline's timeout policy.
#[derive(Debug, Clone)]
pub struct MetaphorExtractor {
    model: Arc<dyn TextModel>,
    primary_timeout: Duration,
    retry_timeout: Duration,
}

impl MetaphorExtractor {
    pub fn new(model: Arc<dyn TextModel>, primary_timeout: Duration, retry_timeout: Duration) -> Self {
        Self {
            model,
            primary_timeout,
            retry_timeout,
        }
    }

    /// Extract metaphors and themes from `text`.
    ///
    /// Infallible by contract: timeouts and service errors produce
    /// [`SymbolicAnalysis::degraded`] rather than an error. The caller can
    /// distinguish the two through the `degraded` flag.
    pub async fn extract(&self, text: &str, context: &ExtractionContext) -> SymbolicAnalysis {
        match self.attempt(text, context, self.primary_timeout).await {
            Ok(analysis) => analysis,
            Err(first) => {
                tracing::warn!(
                    error = %first,
                    "metaphor extraction failed, retrying with shorter timeout"
                );
                match self.attempt(text, context, self.retry_timeout).await {
                    Ok(analysis) => analysis,
                    Err(second) => {
                        tracing::warn!(
                            error = %second,
                            "metaphor extraction retry failed, degrading"
                        );
                        SymbolicAnalysis::degraded()
                    }
                }
            }
        }
    }

    async fn attempt(
        &self,
        text: &str,
        context: &ExtractionContext,
        timeout: Duration,
    ) -> Result<SymbolicAnalysis, ExtractionError> {
        let response = tokio::time::timeout(timeout, self.model.extract(text, context))
            .await
            .map_err(|_| ExtractionError::Timeout {
                timeout_ms: timeout.as_millis() as u64,
            })??;
        let (metaphors, themes) = response.into_symbols();
        Ok(SymbolicAnalysis::new(metaphors, themes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use crate::analysis::text_model::{ExtractionResponse, SymbolCandidate};

    /// Test double that runs a fixed script of responses per call.
    #[derive(Debug)]
    struct ScriptedModel {
        calls: AtomicUsize,
        /// Per-call behavior; the last entry repeats.
        script: Vec<ScriptStep>,
    }

    #[derive(Debug, Clone)]
    enum ScriptStep {
        Respond(Vec<SymbolCandidate>),
        Fail,
        /// Sleep long enough to trip any test timeout.
        Hang,
    }

    impl ScriptedModel {
        fn new(script: Vec<ScriptStep>) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                script,
            }
        }

        fn call_count(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl TextModel for ScriptedModel {
        async fn extract(
            &self,
            _text: &str,
            _context: &ExtractionContext,
        ) -> Result<ExtractionResponse, ExtractionError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            let step = self.script.get(call).or_else(|| self.script.last()).unwrap();
            match step.clone() {
                ScriptStep::Respond(metaphors) => Ok(ExtractionResponse {
                    metaphors,
                    themes: Vec::new(),
                }),
                ScriptStep::Fail => Err(ExtractionError::Service {
                    message: "unavailable".into(),
                }),
                ScriptStep::Hang => {
                    tokio::time::sleep(Duration::from_secs(60)).await;
                    Ok(ExtractionResponse::default())
                }
            }
        }
    }

    fn candidate(label: &str) -> SymbolCandidate {
        SymbolCandidate {
            label: label.into(),
            confidence: 0.8,
            start: 0,
            end: label.len(),
        }
    }

    #[tokio::test]
    async fn test_successful_extraction() {
        let model = Arc::new(ScriptedModel::new(vec![ScriptStep::Respond(vec![
            candidate("drowning"),
        ])]));
        let extractor = MetaphorExtractor::new(
            model.clone(),
            Duration::from_millis(100),
            Duration::from_millis(50),
        );

        let analysis = extractor
            .extract("like drowning", &ExtractionContext::default())
            .await;
        assert!(!analysis.degraded);
        assert_eq!(analysis.metaphors.len(), 1);
        assert_eq!(model.call_count(), 1);
    }

    #[tokio::test]
    async fn test_retry_once_then_succeed() {
        let model = Arc::new(ScriptedModel::new(vec![
            ScriptStep::Fail,
            ScriptStep::Respond(vec![candidate("storm")]),
        ]));
        let extractor = MetaphorExtractor::new(
            model.clone(),
            Duration::from_millis(100),
            Duration::from_millis(50),
        );

        let analysis = extractor
            .extract("a storm", &ExtractionContext::default())
            .await;
        assert!(!analysis.degraded);
        assert_eq!(model.call_count(), 2);
    }

    #[tokio::test]
    async fn test_timeout_degrades_with_empty_symbols() {
        let model = Arc::new(ScriptedModel::new(vec![ScriptStep::Hang]));
        let extractor = MetaphorExtractor::new(
            model.clone(),
            Duration::from_millis(20),
            Duration::from_millis(10),
        );

        let analysis = extractor
            .extract("anything", &ExtractionContext::default())
            .await;
        assert!(analysis.degraded);
        assert!(analysis.is_empty());
        // Primary attempt plus exactly one retry.
        assert_eq!(model.call_count(), 2);
    }
}
