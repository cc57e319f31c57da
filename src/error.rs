//! Error types for xreason.
//!
//! All errors are strongly typed using thiserror, one enum per concern.
//! Per-rule and per-stage failures are captured into results and traces;
//! only request validation and graph mutations surface as `Err` to callers.

use thiserror::Error;

/// Validation errors that occur during input validation.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("Question must be at least {min_length} character(s) long")]
    QuestionTooShort {
        min_length: usize,
    },

    #[error("Confidence value {value} is out of range [0.0, 1.0]")]
    ConfidenceOutOfRange {
        value: f64,
    },

    #[error("Required field '{field}' is missing")]
    MissingField {
        field: String,
    },

    #[error("Field '{field}' exceeds maximum length of {max_length}")]
    FieldTooLong {
        field: String,
        max_length: usize,
    },

    #[error("Invalid field '{field}': {reason}")]
    InvalidField {
        field: String,
        reason: String,
    },

    #[error("Unknown layout algorithm '{name}'")]
    UnknownLayout {
        name: String,
    },

    #[error("Request rejected: {}", issues.join("; "))]
    RequestRejected {
        issues: Vec<String>,
    },
}

/// Errors raised by the rule engine itself (never by an individual rule).
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RuleEngineError {
    #[error("Rule set not found: {id}")]
    RuleSetNotFound {
        id: String,
    },

    #[error("Rule set is disabled: {id}")]
    RuleSetDisabled {
        id: String,
    },

    #[error("Invalid rule set definition: {reason}")]
    InvalidDefinition {
        reason: String,
    },

    #[error("Rule registry error: {message}")]
    Registry {
        message: String,
    },
}

/// Failure of a single rule. Recorded in that rule's result, never fatal.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RuleExecutionError {
    #[error("Rule {rule_id}: invalid pattern: {reason}")]
    InvalidPattern {
        rule_id: String,
        reason: String,
    },

    #[error("Rule {rule_id}: expression error: {reason}")]
    Expression {
        rule_id: String,
        reason: String,
    },

    #[error("Rule {rule_id}: logic backend '{backend}' failed: {reason}")]
    LogicBackend {
        rule_id: String,
        backend: String,
        reason: String,
    },
}

/// Failure of an external collaborator call (hypothesis generator, fact verifier).
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ExternalCallError {
    #[error("{service} timed out after {duration_ms}ms")]
    Timeout {
        service: String,
        duration_ms: u64,
    },

    #[error("{service} is unavailable: {message}")]
    Unavailable {
        service: String,
        message: String,
    },

    #[error("{service} call was cancelled")]
    Cancelled {
        service: String,
    },

    #[error("{service} returned an invalid response: {reason}")]
    InvalidResponse {
        service: String,
        reason: String,
    },
}

impl ExternalCallError {
    /// Creates an unavailability error.
    #[must_use]
    pub fn unavailable(service: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Unavailable {
            service: service.into(),
            message: message.into(),
        }
    }

    /// Returns true if the call was cancelled by the caller.
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }

    /// Returns true if retrying the call could succeed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::Unavailable { .. })
    }
}

/// Violation of a reasoning-graph invariant. The graph is left unchanged.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum GraphInvariantError {
    #[error("Duplicate node id: {id}")]
    DuplicateNode {
        id: String,
    },

    #[error("Duplicate edge id: {id}")]
    DuplicateEdge {
        id: String,
    },

    #[error("Edge {edge_id} references unknown node: {node_id}")]
    UnknownNode {
        edge_id: String,
        node_id: String,
    },

    #[error("Edge {edge_id} has invalid weight {weight}")]
    InvalidWeight {
        edge_id: String,
        weight: f64,
    },
}

/// Errors from the graph store and graph codecs.
#[derive(Debug, Error)]
pub enum GraphError {
    #[error("Graph not found: {id}")]
    NotFound {
        id: String,
    },

    #[error(transparent)]
    Invariant(#[from] GraphInvariantError),

    #[error("Graph serialization error: {message}")]
    Serialization {
        message: String,
    },

    #[error("Malformed graph text at line {line}: {reason}")]
    Parse {
        line: usize,
        reason: String,
    },

    #[error("Graph store lock poisoned: {context}")]
    Poisoned {
        context: &'static str,
    },
}

/// Top-level error type for xreason.
#[derive(Debug, Error)]
pub enum ReasonError {
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Rule engine error: {0}")]
    RuleEngine(#[from] RuleEngineError),

    #[error("Rule execution error: {0}")]
    RuleExecution(#[from] RuleExecutionError),

    #[error("External call error: {0}")]
    ExternalCall(#[from] ExternalCallError),

    #[error("Graph error: {0}")]
    Graph(#[from] GraphError),

    #[error("Internal error: {message}")]
    Internal {
        message: String,
    },
}

impl From<GraphInvariantError> for ReasonError {
    fn from(err: GraphInvariantError) -> Self {
        Self::Graph(GraphError::Invariant(err))
    }
}

impl ReasonError {
    /// Creates an internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Returns true if this is a validation error.
    #[must_use]
    pub const fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }

    /// Returns true if this is an external call error.
    #[must_use]
    pub const fn is_external(&self) -> bool {
        matches!(self, Self::ExternalCall(_))
    }

    /// Returns true if this is a graph error.
    #[must_use]
    pub const fn is_graph(&self) -> bool {
        matches!(self, Self::Graph(_))
    }

    /// Returns true if this error is retryable.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::ExternalCall(e) => e.is_retryable(),
            _ => false,
        }
    }
}

/// Result type alias for xreason operations.
pub type ReasonResult<T> = Result<T, ReasonError>;
