//! Configuration for the reasoning pipeline, rule engine and layout engine.
//!
//! Every struct has a `Default` matching the production defaults and can be
//! deserialized from JSON with missing fields falling back to those defaults.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::pipeline::Stage;

fn read_json<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<T, ValidationError> {
    let raw = std::fs::read_to_string(path).map_err(|e| ValidationError::InvalidField {
        field: "config_path".to_string(),
        reason: format!("failed to read {}: {e}", path.display()),
    })?;
    parse_json(&raw)
}

fn parse_json<T: for<'de> Deserialize<'de>>(raw: &str) -> Result<T, ValidationError> {
    serde_json::from_str(raw).map_err(|e| ValidationError::InvalidField {
        field: "config".to_string(),
        reason: e.to_string(),
    })
}

/// Relative importance of each pipeline stage in the overall confidence.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StageWeights {
    pub hypothesis: f64,
    pub rule_check: f64,
    pub knowledge_check: f64,
    pub validation: f64,
}

impl Default for StageWeights {
    fn default() -> Self {
        Self {
            hypothesis: 0.4,
            rule_check: 0.3,
            knowledge_check: 0.2,
            validation: 0.1,
        }
    }
}

impl StageWeights {
    /// Weight for a stage. `FinalAnswer` restates the aggregate and carries no weight.
    #[must_use]
    pub const fn weight(&self, stage: Stage) -> f64 {
        match stage {
            Stage::Hypothesis => self.hypothesis,
            Stage::RuleCheck => self.rule_check,
            Stage::KnowledgeCheck => self.knowledge_check,
            Stage::Validation => self.validation,
            Stage::FinalAnswer => 0.0,
        }
    }
}

/// Orchestrator configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReasoningConfig {
    /// Minimum question length in characters.
    pub min_question_length: usize,
    /// Maximum question length in characters.
    pub max_question_length: usize,
    /// Questions shorter than this produce a warning.
    pub short_question_warning: usize,
    /// Ceiling applied to a request's `max_steps`.
    pub max_reasoning_steps: usize,
    /// Threshold used when the request does not carry one.
    pub default_confidence_threshold: f64,
    /// Timeout applied to every external collaborator call.
    pub call_timeout_ms: u64,
    /// Domain used to select rule sets when the request has none.
    pub default_domain: String,
    pub stage_weights: StageWeights,
}

impl Default for ReasoningConfig {
    fn default() -> Self {
        Self {
            min_question_length: 1,
            max_question_length: 1000,
            short_question_warning: 10,
            max_reasoning_steps: 10,
            default_confidence_threshold: 0.7,
            call_timeout_ms: 30_000,
            default_domain: "general".to_string(),
            stage_weights: StageWeights::default(),
        }
    }
}

impl ReasoningConfig {
    /// Timeout for external calls.
    #[must_use]
    pub const fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }

    /// Parses a JSON document.
    pub fn from_json_str(raw: &str) -> Result<Self, ValidationError> {
        let cfg: Self = parse_json(raw)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Loads a JSON file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ValidationError> {
        let cfg: Self = read_json(path.as_ref())?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Checks internal consistency.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.max_question_length < self.min_question_length {
            return Err(ValidationError::InvalidField {
                field: "max_question_length".to_string(),
                reason: "must be >= min_question_length".to_string(),
            });
        }
        if self.max_reasoning_steps == 0 {
            return Err(ValidationError::InvalidField {
                field: "max_reasoning_steps".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }
        crate::confidence::validate(self.default_confidence_threshold)?;
        let w = self.stage_weights;
        for (field, value) in [
            ("stage_weights.hypothesis", w.hypothesis),
            ("stage_weights.rule_check", w.rule_check),
            ("stage_weights.knowledge_check", w.knowledge_check),
            ("stage_weights.validation", w.validation),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(ValidationError::InvalidField {
                    field: field.to_string(),
                    reason: format!("weight must be a non-negative number, got {value}"),
                });
            }
        }
        Ok(())
    }
}

/// Resource limits for the embedded expression language.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExpressionLimits {
    /// Maximum source length in bytes.
    pub max_source_len: usize,
    /// Maximum nesting depth of the parsed expression.
    pub max_depth: usize,
    /// Maximum number of evaluation steps.
    pub max_steps: usize,
    /// Maximum size of a value built during evaluation: bytes of a string,
    /// plus one per list element or map entry.
    pub max_value_len: usize,
}

impl Default for ExpressionLimits {
    fn default() -> Self {
        Self {
            max_source_len: 4096,
            max_depth: 64,
            max_steps: 10_000,
            max_value_len: 65_536,
        }
    }
}

/// Rule engine configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Maximum number of compiled regexes kept in the cache.
    pub regex_cache_capacity: usize,
    /// Rule sets with at least this many applicable rules run on scoped threads.
    pub parallel_threshold: usize,
    pub expression_limits: ExpressionLimits,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            regex_cache_capacity: 1024,
            parallel_threshold: 32,
            expression_limits: ExpressionLimits::default(),
        }
    }
}

impl EngineConfig {
    /// Parses a JSON document.
    pub fn from_json_str(raw: &str) -> Result<Self, ValidationError> {
        parse_json(raw)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ValidationError> {
        read_json(path.as_ref())
    }
}

/// Layout engine configuration.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LayoutConfig {
    /// Radius / bounding half-width of the circular, force-directed and
    /// Kamada-Kawai layouts.
    pub scale: f64,
    /// Bounding half-width of the spring layout.
    pub spring_scale: f64,
    /// Vertical distance between hierarchical layers.
    pub layer_spacing: f64,
    /// Horizontal distance between nodes in a hierarchical layer.
    pub node_spacing: f64,
    pub force_directed_iterations: usize,
    pub spring_iterations: usize,
    pub kamada_kawai_iterations: usize,
}

impl Default for LayoutConfig {
    fn default() -> Self {
        Self {
            scale: 5.0,
            spring_scale: 4.0,
            layer_spacing: 2.0,
            node_spacing: 3.0,
            force_directed_iterations: 100,
            spring_iterations: 50,
            kamada_kawai_iterations: 200,
        }
    }
}

impl LayoutConfig {
    /// Parses a JSON document.
    pub fn from_json_str(raw: &str) -> Result<Self, ValidationError> {
        let cfg: Self = parse_json(raw)?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ValidationError> {
        let cfg: Self = read_json(path.as_ref())?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Distances must be positive and finite.
    pub fn validate(&self) -> Result<(), ValidationError> {
        for (field, value) in [
            ("scale", self.scale),
            ("spring_scale", self.spring_scale),
            ("layer_spacing", self.layer_spacing),
            ("node_spacing", self.node_spacing),
        ] {
            if !value.is_finite() || value <= 0.0 {
                return Err(ValidationError::InvalidField {
                    field: field.to_string(),
                    reason: format!("must be a positive number, got {value}"),
                });
            }
        }
        Ok(())
    }
}
