//! Rule set validation and execution.

use std::collections::{HashMap, HashSet};
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, RwLock};
use std::time::Instant;

use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::confidence;
use crate::error::{RuleEngineError, RuleExecutionError};

use super::condition::ConditionOperator;
use super::expr::Program;
use super::logic::{self, LogicBackend, NoLogicBackend};
use super::registry::RuleSetRegistry;
use super::{Rule, RuleInput, RuleSet, RuleType};

/// Outcome of one rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub rule_id: String,
    pub rule_name: String,
    pub rule_type: RuleType,
    pub passed: bool,
    pub confidence: f64,
    pub output: serde_json::Value,
    pub duration_ms: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Set when the rule could not be evaluated for lack of a capability.
    /// Informational results count toward neither `passed` nor `failed` and
    /// carry no weight.
    #[serde(default)]
    pub informational: bool,
}

/// Outcome of executing a rule set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionReport {
    pub rule_set_id: String,
    pub rule_set_name: String,
    pub domain: String,
    /// Applicable rules.
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub weighted_confidence: f64,
    /// Sorted by rule id.
    pub results: Vec<ExecutionResult>,
    pub errors: Vec<String>,
    pub duration_ms: f64,
}

impl ExecutionReport {
    /// Content hash of the report with all durations zeroed.
    #[must_use]
    pub fn fingerprint(&self) -> String {
        let mut normalized = self.clone();
        normalized.duration_ms = 0.0;
        for r in &mut normalized.results {
            r.duration_ms = 0.0;
        }
        let bytes = serde_json::to_vec(&normalized).unwrap_or_default();
        blake3::hash(&bytes).to_hex().to_string()
    }

    /// Whether any rule applied.
    #[must_use]
    pub const fn has_applicable_rules(&self) -> bool {
        self.total > 0
    }
}

/// Coarse cost estimate for a rule set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleComplexity {
    Low,
    Medium,
    High,
}

/// A validation finding, optionally tied to a rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleSetIssue {
    pub rule_id: Option<String>,
    pub message: String,
}

impl RuleSetIssue {
    fn set(message: impl Into<String>) -> Self {
        Self {
            rule_id: None,
            message: message.into(),
        }
    }

    fn rule(rule_id: &str, message: impl Into<String>) -> Self {
        Self {
            rule_id: Some(rule_id.to_string()),
            message: message.into(),
        }
    }
}

/// Result of [`RuleEngine::validate`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub valid: bool,
    pub errors: Vec<RuleSetIssue>,
    pub warnings: Vec<RuleSetIssue>,
    pub rule_count: usize,
    pub estimated_complexity: RuleComplexity,
}

impl ValidationReport {
    /// Whether some error references `rule_id`.
    #[must_use]
    pub fn has_error_for(&self, rule_id: &str) -> bool {
        self.errors.iter().any(|e| e.rule_id.as_deref() == Some(rule_id))
    }
}

fn keyword_tokens(content: &str) -> Vec<String> {
    content
        .split(',')
        .map(|t| t.trim().to_lowercase())
        .filter(|t| !t.is_empty())
        .collect()
}

fn estimate_complexity(rules: &[Rule]) -> RuleComplexity {
    let count = rules.len();
    if count <= 5 {
        return RuleComplexity::Low;
    }
    if count <= 20 {
        return RuleComplexity::Medium;
    }
    let logic = rules.iter().filter(|r| r.rule_type == RuleType::LogicProgram).count();
    let expressions = rules.iter().filter(|r| r.rule_type == RuleType::ExpressionEval).count();
    if logic > 10 || expressions > 5 {
        RuleComplexity::High
    } else {
        RuleComplexity::Medium
    }
}

/// Validates and executes rule sets held in a [`RuleSetRegistry`].
pub struct RuleEngine {
    registry: Arc<RuleSetRegistry>,
    config: EngineConfig,
    logic: Arc<dyn LogicBackend>,
    regex_cache: RwLock<HashMap<String, regex::Regex>>,
}

impl std::fmt::Debug for RuleEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuleEngine")
            .field("config", &self.config)
            .field("logic_backend", &self.logic.name())
            .finish_non_exhaustive()
    }
}

impl RuleEngine {
    /// Creates an engine with default configuration and no logic backend.
    #[must_use]
    pub fn new(registry: Arc<RuleSetRegistry>) -> Self {
        Self {
            registry,
            config: EngineConfig::default(),
            logic: Arc::new(NoLogicBackend),
            regex_cache: RwLock::new(HashMap::new()),
        }
    }

    #[must_use]
    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    #[must_use]
    pub fn with_logic_backend(mut self, backend: Arc<dyn LogicBackend>) -> Self {
        self.logic = backend;
        self
    }

    #[must_use]
    pub const fn registry(&self) -> &Arc<RuleSetRegistry> {
        &self.registry
    }

    #[must_use]
    pub const fn config(&self) -> &EngineConfig {
        &self.config
    }

    fn cached_regex(&self, pattern: &str) -> Result<regex::Regex, String> {
        {
            let guard = self.regex_cache.read().map_err(|_| "regex cache lock poisoned".to_string())?;
            if let Some(re) = guard.get(pattern) {
                return Ok(re.clone());
            }
        }

        let compiled = regex::Regex::new(pattern).map_err(|e| e.to_string())?;

        let mut guard = self.regex_cache.write().map_err(|_| "regex cache lock poisoned".to_string())?;
        if guard.len() >= self.config.regex_cache_capacity {
            guard.clear();
        }
        guard
            .entry(pattern.to_string())
            .or_insert_with(|| compiled.clone());
        Ok(compiled)
    }

    /// Checks a rule set without executing it.
    #[must_use]
    pub fn validate(&self, set: &RuleSet) -> ValidationReport {
        let mut errors = Vec::new();
        let mut warnings = Vec::new();

        if set.id.trim().is_empty() {
            errors.push(RuleSetIssue::set("rule set id is empty"));
        }
        if set.rules.is_empty() {
            warnings.push(RuleSetIssue::set("rule set has no rules"));
        }

        let mut seen = HashSet::new();
        for rule in &set.rules {
            if rule.id.trim().is_empty() {
                errors.push(RuleSetIssue::set("rule with empty id"));
                continue;
            }
            if !seen.insert(rule.id.as_str()) {
                errors.push(RuleSetIssue::rule(&rule.id, format!("duplicate rule id '{}'", rule.id)));
            }
            if rule.name.trim().is_empty() {
                warnings.push(RuleSetIssue::rule(&rule.id, "missing name"));
            }
            if rule.description.trim().is_empty() {
                warnings.push(RuleSetIssue::rule(&rule.id, "missing description"));
            }
            if !rule.weight.is_finite() || rule.weight < 0.0 {
                errors.push(RuleSetIssue::rule(&rule.id, format!("invalid weight {}", rule.weight)));
            }

            for cond in &rule.conditions {
                if cond.field.trim().is_empty() {
                    errors.push(RuleSetIssue::rule(&rule.id, "condition with empty field"));
                }
                if cond.operator == ConditionOperator::Regex {
                    if let Err(e) = regex::Regex::new(&cond.regex_source()) {
                        errors.push(RuleSetIssue::rule(&rule.id, format!("invalid condition regex: {e}")));
                    }
                }
            }

            match rule.rule_type {
                RuleType::PatternMatch => {
                    if keyword_tokens(&rule.content).is_empty() {
                        warnings.push(RuleSetIssue::rule(&rule.id, "keyword list is empty"));
                    }
                }
                RuleType::RegexMatch => {
                    if let Err(e) = regex::Regex::new(&format!("(?i){}", rule.content)) {
                        errors.push(RuleSetIssue::rule(&rule.id, format!("invalid regex: {e}")));
                    }
                }
                RuleType::ExpressionEval => {
                    if let Err(e) = Program::parse(&rule.content, &self.config.expression_limits) {
                        errors.push(RuleSetIssue::rule(&rule.id, format!("invalid expression: {e}")));
                    }
                }
                RuleType::LogicProgram => {
                    if let Err(e) = logic::check_program(&rule.content) {
                        errors.push(RuleSetIssue::rule(&rule.id, format!("invalid logic program: {e}")));
                    }
                }
            }
        }

        ValidationReport {
            valid: errors.is_empty(),
            errors,
            warnings,
            rule_count: set.rules.len(),
            estimated_complexity: estimate_complexity(&set.rules),
        }
    }

    /// Executes a registered rule set by id.
    pub fn execute(&self, rule_set_id: &str, input: &RuleInput) -> Result<ExecutionReport, RuleEngineError> {
        let set = self.registry.get(rule_set_id)?;
        self.execute_set(&set, input)
    }

    /// Executes every enabled rule set registered for `domain`, in registry order.
    pub fn execute_domain(&self, domain: &str, input: &RuleInput) -> Result<Vec<ExecutionReport>, RuleEngineError> {
        let sets = self.registry.by_domain(domain)?;
        sets.iter().map(|set| self.execute_set(set, input)).collect()
    }

    /// Executes a rule set that need not be registered.
    pub fn execute_set(&self, set: &RuleSet, input: &RuleInput) -> Result<ExecutionReport, RuleEngineError> {
        if !set.enabled {
            return Err(RuleEngineError::RuleSetDisabled { id: set.id.clone() });
        }
        let started = Instant::now();

        let applicable: Vec<&Rule> = set
            .rules
            .iter()
            .filter(|r| r.enabled && self.applies(r, input))
            .collect();

        let mut results: Vec<ExecutionResult> = if applicable.len() >= self.config.parallel_threshold.max(2) {
            self.run_parallel(&applicable, input)
        } else {
            applicable.iter().map(|r| self.run_isolated(r, input)).collect()
        };

        // `results` is still in `applicable` order here.
        let weighted_confidence = confidence::weighted_mean(
            results
                .iter()
                .zip(&applicable)
                .filter(|(r, _)| !r.informational)
                .map(|(r, rule)| (r.confidence, rule.weight)),
        )
        .unwrap_or(0.0);
        results.sort_by(|a, b| a.rule_id.cmp(&b.rule_id));

        let passed = results.iter().filter(|r| r.passed && !r.informational).count();
        let skipped = results.iter().filter(|r| r.informational).count();
        let failed = results.len() - passed - skipped;
        let errors: Vec<String> = results
            .iter()
            .filter_map(|r| r.error.as_ref().map(|e| format!("{}: {e}", r.rule_id)))
            .collect();

        let report = ExecutionReport {
            rule_set_id: set.id.clone(),
            rule_set_name: set.name.clone(),
            domain: set.domain.clone(),
            total: results.len(),
            passed,
            failed,
            skipped,
            weighted_confidence,
            results,
            errors,
            duration_ms: started.elapsed().as_secs_f64() * 1000.0,
        };
        info!(
            rule_set = %report.rule_set_id,
            total = report.total,
            passed = report.passed,
            failed = report.failed,
            weighted_confidence = report.weighted_confidence,
            "rule set executed"
        );
        Ok(report)
    }

    fn applies(&self, rule: &Rule, input: &RuleInput) -> bool {
        rule.conditions
            .iter()
            .all(|c| c.evaluate(input, |src| self.cached_regex(src).ok()))
    }

    fn run_parallel(&self, rules: &[&Rule], input: &RuleInput) -> Vec<ExecutionResult> {
        let workers = std::thread::available_parallelism().map_or(4, std::num::NonZeroUsize::get);
        let chunk = rules.len().div_ceil(workers).max(1);
        std::thread::scope(|scope| {
            let handles: Vec<_> = rules
                .chunks(chunk)
                .map(|part| scope.spawn(move || part.iter().map(|r| self.run_isolated(r, input)).collect::<Vec<_>>()))
                .collect();
            let mut out = Vec::with_capacity(rules.len());
            for (handle, part) in handles.into_iter().zip(rules.chunks(chunk)) {
                match handle.join() {
                    Ok(results) => out.extend(results),
                    Err(_) => out.extend(part.iter().map(|r| {
                        failed_result(r, 0.0, "rule evaluation panicked".to_string())
                    })),
                }
            }
            out
        })
    }

    /// Runs one rule; a panic inside it becomes a failed result for that rule only.
    fn run_isolated(&self, rule: &Rule, input: &RuleInput) -> ExecutionResult {
        let started = Instant::now();
        panic::catch_unwind(AssertUnwindSafe(|| self.run_rule(rule, input))).unwrap_or_else(|_| {
            warn!(rule = %rule.id, "rule evaluation panicked");
            failed_result(
                rule,
                started.elapsed().as_secs_f64() * 1000.0,
                "rule evaluation panicked".to_string(),
            )
        })
    }

    fn run_rule(&self, rule: &Rule, input: &RuleInput) -> ExecutionResult {
        let started = Instant::now();
        let outcome = match rule.rule_type {
            RuleType::PatternMatch => Ok(Self::eval_keywords(rule, input)),
            RuleType::RegexMatch => self.eval_regex(rule, input),
            RuleType::ExpressionEval => self.eval_expression(rule, input),
            RuleType::LogicProgram => self.eval_logic(rule, input),
        };
        let elapsed = started.elapsed().as_secs_f64() * 1000.0;

        match outcome {
            Ok(mut result) => {
                result.duration_ms = elapsed;
                debug!(rule = %rule.id, passed = result.passed, confidence = result.confidence, "rule evaluated");
                result
            }
            Err(err) => {
                warn!(rule = %rule.id, error = %err, "rule failed");
                failed_result(rule, elapsed, err.to_string())
            }
        }
    }

    #[allow(clippy::cast_precision_loss)]
    fn eval_keywords(rule: &Rule, input: &RuleInput) -> ExecutionResult {
        let tokens = keyword_tokens(&rule.content);
        let text = input.combined_text().to_lowercase();
        let matched: Vec<&String> = tokens.iter().filter(|t| text.contains(t.as_str())).collect();
        let fraction = if tokens.is_empty() {
            0.0
        } else {
            matched.len() as f64 / tokens.len() as f64
        };
        base_result(
            rule,
            !matched.is_empty(),
            fraction,
            json!({ "matched": matched, "total": tokens.len() }),
        )
    }

    #[allow(clippy::cast_precision_loss)]
    fn eval_regex(&self, rule: &Rule, input: &RuleInput) -> Result<ExecutionResult, RuleExecutionError> {
        let re = self
            .cached_regex(&format!("(?i){}", rule.content))
            .map_err(|reason| RuleExecutionError::InvalidPattern {
                rule_id: rule.id.clone(),
                reason,
            })?;
        let text = input.combined_text();
        let mut count = 0usize;
        let mut samples = Vec::new();
        for m in re.find_iter(&text) {
            count += 1;
            if samples.len() < 10 {
                samples.push(m.as_str().to_string());
            }
        }
        let confidence = (count as f64 / 10.0).min(1.0);
        Ok(base_result(
            rule,
            count > 0,
            confidence,
            json!({ "matches": samples, "count": count }),
        ))
    }

    fn eval_expression(&self, rule: &Rule, input: &RuleInput) -> Result<ExecutionResult, RuleExecutionError> {
        let limits = &self.config.expression_limits;
        let to_err = |e: super::expr::ExprError| RuleExecutionError::Expression {
            rule_id: rule.id.clone(),
            reason: e.to_string(),
        };
        let program = Program::parse(&rule.content, limits).map_err(to_err)?;
        let outcome = program
            .evaluate(input, limits, |p| self.cached_regex(p))
            .map_err(to_err)?;
        Ok(base_result(rule, outcome.passed, outcome.confidence, outcome.output))
    }

    fn eval_logic(&self, rule: &Rule, input: &RuleInput) -> Result<ExecutionResult, RuleExecutionError> {
        if !self.logic.is_available() {
            let mut result = base_result(
                rule,
                true,
                0.0,
                json!({ "status": "skipped", "reason": "logic backend unavailable", "backend": self.logic.name() }),
            );
            result.informational = true;
            return Ok(result);
        }
        let outcome = self
            .logic
            .evaluate(rule, input)
            .map_err(|reason| RuleExecutionError::LogicBackend {
                rule_id: rule.id.clone(),
                backend: self.logic.name().to_string(),
                reason,
            })?;
        Ok(base_result(rule, outcome.passed, outcome.confidence, outcome.output))
    }
}

fn base_result(rule: &Rule, passed: bool, confidence: f64, output: serde_json::Value) -> ExecutionResult {
    ExecutionResult {
        rule_id: rule.id.clone(),
        rule_name: rule.name.clone(),
        rule_type: rule.rule_type,
        passed,
        confidence: confidence::clamp(confidence),
        output,
        duration_ms: 0.0,
        error: None,
        informational: false,
    }
}

fn failed_result(rule: &Rule, duration_ms: f64, error: String) -> ExecutionResult {
    ExecutionResult {
        duration_ms,
        error: Some(error),
        ..base_result(rule, false, 0.0, serde_json::Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::logic::LogicOutcome;
    use crate::rules::{Condition, ConditionOperator};

    fn engine() -> RuleEngine {
        RuleEngine::new(Arc::new(RuleSetRegistry::new()))
    }

    #[test]
    fn weighted_confidence_example() {
        let set = RuleSet::new("s", "general")
            .with_rule(Rule::keywords("a", &["absent"]).with_weight(1.0))
            .with_rule(Rule::keywords("b", &["present"]).with_weight(2.0));
        let report = engine().execute_set(&set, &RuleInput::new("present here", "")).unwrap();
        assert_eq!(report.total, 2);
        assert_eq!(report.passed, 1);
        assert_eq!(report.failed, 1);
        assert!((report.weighted_confidence - 2.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn keyword_fraction() {
        let set = RuleSet::new("s", "general").with_rule(Rule::keywords("k", &["contract", "breach", "tort", "lien"]));
        let report = engine()
            .execute_set(&set, &RuleInput::new("Contract question", "possible BREACH"))
            .unwrap();
        let r = &report.results[0];
        assert!(r.passed);
        assert!((r.confidence - 0.5).abs() < 1e-9);
        assert_eq!(r.output["total"], 4);
    }

    #[test]
    fn regex_confidence_scales_with_matches() {
        let set = RuleSet::new("s", "general").with_rule(Rule::regex("r", r"\d+"));
        let report = engine()
            .execute_set(&set, &RuleInput::new("1 2 3", "4 5 6 7 8 9 10 11 12"))
            .unwrap();
        let r = &report.results[0];
        assert!(r.passed);
        assert_eq!(r.confidence, 1.0);
        assert_eq!(r.output["count"], 12);

        let report = engine().execute_set(&set, &RuleInput::new("one 1", "")).unwrap();
        assert!((report.results[0].confidence - 0.1).abs() < 1e-9);
    }

    #[test]
    fn conditions_gate_applicability() {
        let rule = Rule::keywords("k", &["x"])
            .with_condition(Condition::new("domain", ConditionOperator::Equals, "legal"));
        let set = RuleSet::new("s", "general").with_rule(rule);

        let report = engine().execute_set(&set, &RuleInput::new("x", "")).unwrap();
        assert_eq!(report.total, 0);
        assert_eq!(report.weighted_confidence, 0.0);

        let input = RuleInput::new("x", "").with_context("domain", "Legal");
        let report = engine().execute_set(&set, &input).unwrap();
        assert_eq!(report.total, 1);
    }

    #[test]
    fn failures_are_isolated() {
        let set = RuleSet::new("s", "general")
            .with_rule(Rule::regex("bad", "(unclosed"))
            .with_rule(Rule::expression("boom", "1 / 0"))
            .with_rule(Rule::keywords("ok", &["fine"]));
        let report = engine().execute_set(&set, &RuleInput::new("fine", "")).unwrap();
        assert_eq!(report.total, 3);
        assert_eq!(report.passed, 1);
        assert_eq!(report.failed, 2);
        assert_eq!(report.errors.len(), 2);
        assert!(report.errors.iter().any(|e| e.starts_with("bad:")));
        assert!(report.errors.iter().any(|e| e.starts_with("boom:")));
        assert!((report.weighted_confidence - 1.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn logic_without_backend_is_informational() {
        let set = RuleSet::new("s", "general")
            .with_rule(Rule::logic("l", "ok."))
            .with_rule(Rule::keywords("k", &["yes"]));
        let report = engine().execute_set(&set, &RuleInput::new("yes", "")).unwrap();
        assert_eq!(report.total, 2);
        assert_eq!(report.skipped, 1);
        assert_eq!(report.failed, 0);
        assert_eq!(report.weighted_confidence, 1.0);
        assert!(report.results[1].informational);
    }

    struct AlwaysTrue;

    impl LogicBackend for AlwaysTrue {
        fn name(&self) -> &str {
            "always-true"
        }

        fn evaluate(&self, _rule: &Rule, _input: &RuleInput) -> Result<LogicOutcome, String> {
            Ok(LogicOutcome {
                passed: true,
                confidence: 0.9,
                output: json!("proved"),
            })
        }
    }

    struct Explodes;

    impl LogicBackend for Explodes {
        fn name(&self) -> &str {
            "explodes"
        }

        fn evaluate(&self, _rule: &Rule, _input: &RuleInput) -> Result<LogicOutcome, String> {
            panic!("backend blew up")
        }
    }

    #[test]
    fn panicking_rule_is_contained_on_both_paths() {
        let mut set = RuleSet::new("s", "general").with_rule(Rule::logic("boom", "x."));
        for i in 0..5 {
            set = set.with_rule(Rule::keywords(format!("k{i}"), &["fine"]));
        }
        let input = RuleInput::new("fine", "");

        for threshold in [usize::MAX, 2] {
            let report = engine()
                .with_config(EngineConfig {
                    parallel_threshold: threshold,
                    ..EngineConfig::default()
                })
                .with_logic_backend(Arc::new(Explodes))
                .execute_set(&set, &input)
                .unwrap();
            assert_eq!(report.total, 6, "threshold {threshold}");
            assert_eq!(report.passed, 5, "threshold {threshold}");
            assert_eq!(report.failed, 1, "threshold {threshold}");
            assert_eq!(report.errors, vec!["boom: rule evaluation panicked".to_string()]);
        }
    }

    #[test]
    fn logic_backend_is_used_when_available() {
        let engine = engine().with_logic_backend(Arc::new(AlwaysTrue));
        let set = RuleSet::new("s", "general").with_rule(Rule::logic("l", "ok."));
        let report = engine.execute_set(&set, &RuleInput::new("q", "")).unwrap();
        assert_eq!(report.passed, 1);
        assert!((report.weighted_confidence - 0.9).abs() < 1e-9);
    }

    #[test]
    fn unknown_and_disabled_sets_fail() {
        let registry = Arc::new(RuleSetRegistry::new());
        registry.register(RuleSet::new("off", "general").disabled()).unwrap();
        let engine = RuleEngine::new(Arc::clone(&registry));

        assert!(matches!(
            engine.execute("missing", &RuleInput::default()),
            Err(RuleEngineError::RuleSetNotFound { .. })
        ));
        assert!(matches!(
            engine.execute("off", &RuleInput::default()),
            Err(RuleEngineError::RuleSetDisabled { .. })
        ));
    }

    #[test]
    fn parallel_execution_matches_sequential() {
        let mut set = RuleSet::new("s", "general");
        for i in 0..40 {
            set = set.with_rule(Rule::keywords(format!("r{i:02}"), &["alpha", "beta"]).with_weight(f64::from(i % 3)));
        }
        let input = RuleInput::new("alpha", "");
        let sequential = engine()
            .with_config(EngineConfig {
                parallel_threshold: usize::MAX,
                ..EngineConfig::default()
            })
            .execute_set(&set, &input)
            .unwrap();
        let parallel = engine()
            .with_config(EngineConfig {
                parallel_threshold: 4,
                ..EngineConfig::default()
            })
            .execute_set(&set, &input)
            .unwrap();

        assert_eq!(sequential.fingerprint(), parallel.fingerprint());
        let ids: Vec<&str> = parallel.results.iter().map(|r| r.rule_id.as_str()).collect();
        let mut sorted = ids.clone();
        sorted.sort_unstable();
        assert_eq!(ids, sorted);
    }

    #[test]
    fn validation_findings() {
        let set = RuleSet::new("s", "general")
            .with_rule(Rule::regex("bad-regex", "(unclosed").with_description("d"))
            .with_rule(Rule::regex("bad-regex", "ok").with_description("d"))
            .with_rule(Rule::expression("bad-expr", "1 +").with_description("d"))
            .with_rule(Rule::logic("bad-logic", "no period").with_description("d"))
            .with_rule(Rule::keywords("neg", &["a"]).with_weight(-1.0).with_description("d"))
            .with_rule(Rule::keywords("empty", &[]).with_name("").with_description(""));
        let report = engine().validate(&set);

        assert!(!report.valid);
        assert!(report.has_error_for("bad-regex"));
        assert!(report.has_error_for("bad-expr"));
        assert!(report.has_error_for("bad-logic"));
        assert!(report.has_error_for("neg"));
        assert!(!report.has_error_for("empty"));
        assert!(report.warnings.iter().any(|w| w.rule_id.as_deref() == Some("empty")));
        assert_eq!(report.estimated_complexity, RuleComplexity::Medium);
    }

    #[test]
    fn complexity_buckets() {
        let many = |n: usize, f: fn(String) -> Rule| (0..n).map(|i| f(format!("r{i}"))).collect::<Vec<_>>();
        assert_eq!(estimate_complexity(&many(5, |id| Rule::keywords(id, &["x"]))), RuleComplexity::Low);
        assert_eq!(estimate_complexity(&many(20, |id| Rule::keywords(id, &["x"]))), RuleComplexity::Medium);
        assert_eq!(estimate_complexity(&many(25, |id| Rule::keywords(id, &["x"]))), RuleComplexity::Medium);
        assert_eq!(estimate_complexity(&many(25, |id| Rule::expression(id, "true"))), RuleComplexity::High);
    }
}
