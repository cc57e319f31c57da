//! The reasoning pipeline: request and response types, stage traces, the
//! collaborator contracts and the orchestrator that sequences them.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::confidence::{self, ConfidenceLevel};
use crate::graph::GraphId;

pub mod call;
pub mod collaborators;
pub mod orchestrator;

pub use call::{call_with_deadline, CancellationToken};
pub use collaborators::{FactVerifier, HypothesisGenerator, StageOutput, SynthesisRequest};
pub use orchestrator::{Orchestrator, OrchestratorSummary};

/// Unique identifier for one reasoning run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(Uuid);

impl SessionId {
    /// Creates a new random session ID.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parses the textual form produced by `Display`.
    pub fn parse(s: &str) -> Result<Self, uuid::Error> {
        Uuid::parse_str(s).map(Self)
    }

    /// Returns the underlying UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Pipeline stages, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Hypothesis,
    RuleCheck,
    KnowledgeCheck,
    Validation,
    FinalAnswer,
}

impl Stage {
    /// All stages in order.
    pub const ALL: [Self; 5] = [
        Self::Hypothesis,
        Self::RuleCheck,
        Self::KnowledgeCheck,
        Self::Validation,
        Self::FinalAnswer,
    ];

    /// Stable snake_case name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Hypothesis => "hypothesis",
            Self::RuleCheck => "rule_check",
            Self::KnowledgeCheck => "knowledge_check",
            Self::Validation => "validation",
            Self::FinalAnswer => "final_answer",
        }
    }

    /// 1-based step number counted against a request's `max_steps`.
    /// `FinalAnswer` is not budgeted.
    #[must_use]
    pub const fn step(self) -> Option<usize> {
        match self {
            Self::Hypothesis => Some(1),
            Self::RuleCheck => Some(2),
            Self::KnowledgeCheck => Some(3),
            Self::Validation => Some(4),
            Self::FinalAnswer => None,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Recorded outcome of one stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trace {
    pub stage: Stage,
    pub output: String,
    pub confidence: f64,
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
    pub timestamp: DateTime<Utc>,
}

impl Trace {
    /// Creates a trace stamped now; confidence is clamped.
    #[must_use]
    pub fn new(stage: Stage, output: impl Into<String>, confidence: f64) -> Self {
        Self {
            stage,
            output: output.into(),
            confidence: confidence::clamp(confidence),
            metadata: serde_json::Map::new(),
            timestamp: Utc::now(),
        }
    }

    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Error text recorded by a degraded or aborted stage.
    #[must_use]
    pub fn error(&self) -> Option<&str> {
        self.metadata.get("error").and_then(serde_json::Value::as_str)
    }
}

/// Incoming reasoning request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReasoningRequest {
    pub question: String,
    #[serde(default)]
    pub context: Option<String>,
    #[serde(default)]
    pub domain: Option<String>,
    #[serde(default)]
    pub max_steps: Option<usize>,
    #[serde(default)]
    pub confidence_threshold: Option<f64>,
}

impl ReasoningRequest {
    #[must_use]
    pub fn new(question: impl Into<String>) -> Self {
        Self {
            question: question.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    #[must_use]
    pub fn with_domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = Some(domain.into());
        self
    }

    #[must_use]
    pub const fn with_max_steps(mut self, max_steps: usize) -> Self {
        self.max_steps = Some(max_steps);
        self
    }

    #[must_use]
    pub const fn with_confidence_threshold(mut self, threshold: f64) -> Self {
        self.confidence_threshold = Some(threshold);
        self
    }
}

/// A request after validation, with defaults applied.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedRequest {
    pub question: String,
    pub context: String,
    /// Lowercased.
    pub domain: String,
    /// Clamped to the configured ceiling.
    pub max_steps: usize,
    pub confidence_threshold: f64,
}

/// Result of [`Orchestrator::validate_request`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestValidation {
    pub valid: bool,
    pub issues: Vec<String>,
    pub warnings: Vec<String>,
    /// Present when `valid`.
    pub normalized: Option<NormalizedRequest>,
}

/// Run-level metadata attached to every response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseMetadata {
    pub session_id: SessionId,
    pub processing_time_ms: f64,
    pub steps_completed: usize,
    pub domain: String,
    pub confidence_level: ConfidenceLevel,
    pub confidence_threshold: f64,
    pub meets_threshold: bool,
    /// Stages not run because of `max_steps`.
    #[serde(default)]
    pub skipped_stages: Vec<Stage>,
    /// Id of the stored reasoning graph, when a store is attached.
    #[serde(default)]
    pub graph_id: Option<GraphId>,
    /// Set when the run was aborted.
    #[serde(default)]
    pub error: Option<String>,
}

/// Outcome of a reasoning run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReasoningResponse {
    pub answer: String,
    pub confidence: f64,
    pub trace: Vec<Trace>,
    pub metadata: ResponseMetadata,
}

impl ReasoningResponse {
    /// Whether the run was aborted before producing an answer.
    #[must_use]
    pub const fn is_aborted(&self) -> bool {
        self.metadata.error.is_some()
    }

    /// The trace recorded for `stage`, if it ran.
    #[must_use]
    pub fn stage(&self, stage: Stage) -> Option<&Trace> {
        self.trace.iter().find(|t| t.stage == stage)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stages_are_ordered() {
        let mut shuffled = vec![Stage::FinalAnswer, Stage::RuleCheck, Stage::Hypothesis, Stage::Validation, Stage::KnowledgeCheck];
        shuffled.sort();
        assert_eq!(shuffled, Stage::ALL.to_vec());
        assert_eq!(Stage::KnowledgeCheck.step(), Some(3));
        assert_eq!(Stage::FinalAnswer.step(), None);
    }

    #[test]
    fn trace_clamps_and_records_metadata() {
        let t = Trace::new(Stage::Hypothesis, "h", 1.4).with_metadata("error", "boom");
        assert_eq!(t.confidence, 1.0);
        assert_eq!(t.error(), Some("boom"));

        let json = serde_json::to_value(&t).unwrap();
        assert_eq!(json["stage"], "hypothesis");
    }

    #[test]
    fn request_deserializes_with_optional_fields() {
        let req: ReasoningRequest = serde_json::from_str(r#"{"question": "Why?"}"#).unwrap();
        assert_eq!(req, ReasoningRequest::new("Why?"));
    }
}
