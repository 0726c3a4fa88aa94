//! Analysis routines, one per task action
//!
//! [`AnalysisEngine`] matches on the decoded [`TaskBody`] and runs the
//! routine for that action. Only the summary routine touches the network,
//! through the condensation chain; the other two are pure.

use crate::llm::ProviderFallbackChain;
use crate::protocol::TaskBody;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;

pub mod clo_plo;
pub mod summarize;
pub mod version_diff;

/// Attribution for results computed by rules rather than a model
pub const RULE_ENGINE: &str = "rule-engine";

/// What a routine hands back to the dispatcher
#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisOutput {
    pub result: Value,
    /// Engine or strategy that produced the result
    pub attribution: String,
    /// 0.0 to 1.0
    pub confidence: Option<f64>,
}

/// Routine failures
///
/// `Transient` failures are retried through redelivery. Everything else
/// becomes an ERROR outcome and the task is finished.
#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    #[error("Transient failure: {0}")]
    Transient(String),
    #[error("Result serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl AnalysisError {
    pub fn is_transient(&self) -> bool {
        matches!(self, AnalysisError::Transient(_))
    }
}

/// Runs the routine that matches a task body
#[async_trait]
pub trait Analyzer: Send + Sync {
    async fn analyze(&self, body: &TaskBody) -> Result<AnalysisOutput, AnalysisError>;
}

/// Production analyzer
pub struct AnalysisEngine {
    chain: Arc<ProviderFallbackChain>,
    default_summary_chars: usize,
}

impl AnalysisEngine {
    pub fn new(chain: Arc<ProviderFallbackChain>, default_summary_chars: usize) -> Self {
        Self {
            chain,
            default_summary_chars,
        }
    }

    pub fn chain(&self) -> &ProviderFallbackChain {
        &self.chain
    }
}

#[async_trait]
impl Analyzer for AnalysisEngine {
    async fn analyze(&self, body: &TaskBody) -> Result<AnalysisOutput, AnalysisError> {
        match body {
            TaskBody::MapCloPlo(payload) => clo_plo::analyze(payload),
            TaskBody::CompareVersions(payload) => version_diff::analyze(payload),
            TaskBody::SummarizeSyllabus(payload) => {
                summarize::analyze(payload, &self.chain, self.default_summary_chars).await
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{CloPloPayload, VersionDiffPayload};
    use serde_json::Map;

    fn engine() -> AnalysisEngine {
        AnalysisEngine::new(Arc::new(ProviderFallbackChain::new()), 150)
    }

    #[tokio::test]
    async fn test_engine_routes_on_body_variant() {
        let alignment = engine()
            .analyze(&TaskBody::MapCloPlo(CloPloPayload {
                syllabus_id: "s-1".to_string(),
                curriculum_id: None,
                mappings: vec![],
                min_clos_per_plo: None,
            }))
            .await
            .unwrap();
        assert_eq!(alignment.result["overall_status"], "NO_MAPPINGS");
        assert_eq!(alignment.attribution, RULE_ENGINE);

        let diff = engine()
            .analyze(&TaskBody::CompareVersions(VersionDiffPayload {
                old_version_id: None,
                new_version_id: "v-1".to_string(),
                old_content: Map::new(),
                new_content: Map::new(),
            }))
            .await
            .unwrap();
        assert_eq!(diff.result["is_first_version"], true);
    }

    #[test]
    fn test_transient_classification() {
        assert!(AnalysisError::Transient("db".to_string()).is_transient());
        assert!(!AnalysisError::InvalidInput("x".to_string()).is_transient());
    }
}
