//! # xreason - hybrid reasoning pipeline
//!
//! xreason answers a question in stages: a fast hypothesis from an external
//! generator, a check against explicit rule sets, a cross-check against a
//! fact base, answer synthesis and validation. Every stage is recorded, and
//! the record becomes a provenance graph that can be laid out, analyzed and
//! exported.
//!
//! ## Core Concepts
//!
//! - **RuleSet**: a domain-scoped collection of keyword, regex, expression or
//!   logic-program rules, loaded as data
//! - **Trace**: the output and confidence of one pipeline stage
//! - **Orchestrator**: sequences the stages and aggregates confidence
//! - **Graph**: the reasoning record as typed nodes and weighted edges
//!
//! ## Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use xreason::{FactBase, Orchestrator, ReasoningConfig, ReasoningRequest, RuleEngine, RuleSetRegistry};
//!
//! let registry = Arc::new(RuleSetRegistry::new());
//! registry.load_json_file("rules/legal.json")?;
//! let engine = Arc::new(RuleEngine::new(registry));
//!
//! let orchestrator = Orchestrator::new(
//!     ReasoningConfig::default(),
//!     Arc::new(my_generator),
//!     Arc::new(FactBase::new()),
//!     engine,
//! );
//! let response = orchestrator.reason(&ReasoningRequest::new("Is this clause enforceable?").with_domain("legal"))?;
//! println!("{} ({:.2})", response.answer, response.confidence);
//! ```

#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod confidence;
pub mod config;
pub mod error;
pub mod graph;
pub mod knowledge;
pub mod pipeline;
pub mod rules;

pub use confidence::{ConfidenceLevel, ConfidenceSummary};
pub use config::{EngineConfig, ExpressionLimits, LayoutConfig, ReasoningConfig, StageWeights};
pub use error::{
    ExternalCallError, GraphError, GraphInvariantError, ReasonError, ReasonResult, RuleEngineError,
    RuleExecutionError, ValidationError,
};
pub use graph::{
    Edge, EdgeType, Graph, GraphAnalyzer, GraphId, GraphStatistics, GraphStore, LayoutAlgorithm, LayoutEngine, Node,
    NodeType, Position, TraceGraphBuilder,
};
pub use knowledge::{Fact, FactBase};
pub use pipeline::{
    CancellationToken, FactVerifier, HypothesisGenerator, Orchestrator, ReasoningRequest, ReasoningResponse, SessionId,
    Stage, StageOutput, Trace,
};
pub use rules::{
    Condition, ConditionOperator, ExecutionReport, Rule, RuleEngine, RuleInput, RuleSet, RuleSetRegistry, RuleType,
};
