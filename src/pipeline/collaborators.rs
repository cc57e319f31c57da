//! Contracts for the external capabilities the orchestrator calls.
//!
//! Implementations may block; the orchestrator runs every call on a worker
//! thread under a deadline.

use serde::{Deserialize, Serialize};

use crate::error::ExternalCallError;

/// What a collaborator returns for one call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StageOutput {
    pub output: String,
    pub confidence: f64,
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl StageOutput {
    #[must_use]
    pub fn new(output: impl Into<String>, confidence: f64) -> Self {
        Self {
            output: output.into(),
            confidence,
            metadata: serde_json::Map::new(),
        }
    }

    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// Inputs to answer synthesis.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SynthesisRequest {
    pub question: String,
    pub domain: String,
    pub hypothesis: String,
    pub rule_summary: String,
    pub knowledge_summary: String,
}

impl SynthesisRequest {
    /// Deterministic answer used when the generator cannot synthesize.
    #[must_use]
    pub fn fallback_answer(&self) -> String {
        format!(
            "Based on the analysis: {}\n\nRule check results: {}\n\nKnowledge verification: {}",
            self.hypothesis, self.rule_summary, self.knowledge_summary
        )
    }
}

/// Produces hypotheses, synthesizes answers and judges them.
pub trait HypothesisGenerator: Send + Sync {
    /// Fast first guess at an answer.
    fn generate(&self, question: &str, context: &str, domain: &str) -> Result<StageOutput, ExternalCallError>;

    /// Combines stage outputs into a final answer.
    fn synthesize(&self, request: &SynthesisRequest) -> Result<StageOutput, ExternalCallError>;

    /// Scores a final answer.
    fn validate(&self, question: &str, answer: &str, domain: &str) -> Result<StageOutput, ExternalCallError>;
}

/// Cross-checks a hypothesis against known facts.
pub trait FactVerifier: Send + Sync {
    fn verify(&self, hypothesis: &str, question: &str, domain: &str) -> Result<StageOutput, ExternalCallError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fallback_answer_mentions_every_stage() {
        let req = SynthesisRequest {
            question: "q".to_string(),
            domain: "general".to_string(),
            hypothesis: "H".to_string(),
            rule_summary: "R".to_string(),
            knowledge_summary: "K".to_string(),
        };
        let answer = req.fallback_answer();
        assert!(answer.starts_with("Based on the analysis: H"));
        assert!(answer.contains("Rule check results: R"));
        assert!(answer.contains("Knowledge verification: K"));
    }
}
