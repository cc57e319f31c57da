//! The reasoning orchestrator.
//!
//! One run is a fixed sequence: hypothesis, rule check, knowledge check,
//! answer synthesis and validation. Every stage leaves a [`Trace`]; the run
//! always ends with a [`Stage::FinalAnswer`] trace carrying the aggregate
//! confidence.
//!
//! A collaborator failure (timeout, unavailability, bad response) degrades
//! only its own stage to confidence 0 and the run goes on. Cancellation and
//! internal failures abort the run, which still returns a normal response
//! with confidence 0 and the error in the final trace.

use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info, warn};

use crate::confidence::{self, ConfidenceLevel};
use crate::config::ReasoningConfig;
use crate::error::{ExternalCallError, ReasonError, RuleEngineError, ValidationError};
use crate::graph::{GraphId, GraphStore, TraceGraphBuilder};
use crate::rules::{ExecutionReport, RuleEngine, RuleInput};

use super::call::{call_with_deadline, CancellationToken};
use super::collaborators::{FactVerifier, HypothesisGenerator, StageOutput, SynthesisRequest};
use super::{
    NormalizedRequest, ReasoningRequest, ReasoningResponse, RequestValidation, ResponseMetadata, SessionId, Stage,
    Trace,
};

const GENERATOR: &str = "hypothesis_generator";
const VERIFIER: &str = "fact_verifier";
const RULE_ENGINE: &str = "rule_engine";

/// Rule-check confidence when no rule applies.
const NO_RULES_CONFIDENCE: f64 = 0.5;
/// Overall confidence when no stage carries weight.
const NEUTRAL_CONFIDENCE: f64 = 0.5;

/// Static description of an orchestrator's setup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrchestratorSummary {
    pub available_rule_sets: Vec<String>,
    pub domains: Vec<String>,
    pub max_reasoning_steps: usize,
    pub default_confidence_threshold: f64,
    pub default_domain: String,
    pub call_timeout_ms: u64,
    pub graph_store_attached: bool,
}

/// Runs reasoning requests through the stage pipeline.
///
/// Shareable across threads; independent requests run concurrently.
pub struct Orchestrator {
    config: ReasoningConfig,
    generator: Arc<dyn HypothesisGenerator>,
    verifier: Arc<dyn FactVerifier>,
    engine: Arc<RuleEngine>,
    graphs: Option<Arc<GraphStore>>,
    builder: TraceGraphBuilder,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("config", &self.config)
            .field("engine", &self.engine)
            .field("graph_store_attached", &self.graphs.is_some())
            .finish_non_exhaustive()
    }
}

/// Traces gathered so far in one run.
#[derive(Default)]
struct RunState {
    traces: Vec<Trace>,
    skipped: Vec<Stage>,
}

impl Orchestrator {
    #[must_use]
    pub fn new(
        config: ReasoningConfig,
        generator: Arc<dyn HypothesisGenerator>,
        verifier: Arc<dyn FactVerifier>,
        engine: Arc<RuleEngine>,
    ) -> Self {
        Self {
            config,
            generator,
            verifier,
            engine,
            graphs: None,
            builder: TraceGraphBuilder::new(),
        }
    }

    /// Records a reasoning graph for every run in `store`.
    #[must_use]
    pub fn with_graph_store(mut self, store: Arc<GraphStore>) -> Self {
        self.graphs = Some(store);
        self
    }

    #[must_use]
    pub const fn with_graph_builder(mut self, builder: TraceGraphBuilder) -> Self {
        self.builder = builder;
        self
    }

    #[must_use]
    pub const fn config(&self) -> &ReasoningConfig {
        &self.config
    }

    #[must_use]
    pub const fn engine(&self) -> &Arc<RuleEngine> {
        &self.engine
    }

    #[must_use]
    pub const fn graph_store(&self) -> Option<&Arc<GraphStore>> {
        self.graphs.as_ref()
    }

    pub fn summary(&self) -> Result<OrchestratorSummary, RuleEngineError> {
        let registry = self.engine.registry();
        Ok(OrchestratorSummary {
            available_rule_sets: registry.all()?.iter().map(|s| s.id.clone()).collect(),
            domains: registry.domains()?,
            max_reasoning_steps: self.config.max_reasoning_steps,
            default_confidence_threshold: self.config.default_confidence_threshold,
            default_domain: self.config.default_domain.clone(),
            call_timeout_ms: self.config.call_timeout_ms,
            graph_store_attached: self.graphs.is_some(),
        })
    }

    /// Checks a request and applies defaults.
    ///
    /// Issues make the request invalid; warnings do not. `max_steps` of 0 or
    /// above the configured ceiling becomes the ceiling.
    #[must_use]
    pub fn validate_request(&self, request: &ReasoningRequest) -> RequestValidation {
        let cfg = &self.config;
        let mut issues = Vec::new();
        let mut warnings = Vec::new();

        let question = request.question.trim();
        let length = question.chars().count();
        if length < cfg.min_question_length {
            issues.push(format!(
                "Question must be at least {} character(s) long",
                cfg.min_question_length
            ));
        } else if length > cfg.max_question_length {
            issues.push(format!(
                "Question is too long (max {} characters)",
                cfg.max_question_length
            ));
        } else if length < cfg.short_question_warning {
            warnings.push("Question is quite short; more detail may improve the answer".to_string());
        }

        let threshold = request
            .confidence_threshold
            .unwrap_or(cfg.default_confidence_threshold);
        if confidence::validate(threshold).is_err() {
            issues.push(format!("Confidence threshold must be between 0 and 1, got {threshold}"));
        }

        let ceiling = cfg.max_reasoning_steps;
        let requested = request.max_steps.unwrap_or(ceiling);
        let max_steps = if requested == 0 {
            ceiling
        } else if requested > ceiling {
            warnings.push(format!("max_steps reduced from {requested} to {ceiling}"));
            ceiling
        } else {
            requested
        };

        let domain = request
            .domain
            .as_deref()
            .map(str::trim)
            .filter(|d| !d.is_empty())
            .unwrap_or(cfg.default_domain.as_str())
            .to_lowercase();
        let known = domain.eq_ignore_ascii_case(&cfg.default_domain)
            || self
                .engine
                .registry()
                .domains()
                .is_ok_and(|domains| domains.iter().any(|d| d.eq_ignore_ascii_case(&domain)));
        if !known {
            warnings.push(format!(
                "Unrecognized domain '{domain}'; no domain-specific rules will apply"
            ));
        }

        let valid = issues.is_empty();
        debug!(valid, issues = issues.len(), warnings = warnings.len(), "request validated");
        RequestValidation {
            valid,
            normalized: valid.then(|| NormalizedRequest {
                question: question.to_string(),
                context: request.context.clone().unwrap_or_default(),
                domain,
                max_steps,
                confidence_threshold: threshold,
            }),
            issues,
            warnings,
        }
    }

    /// Runs a request to completion.
    ///
    /// Returns `Err` only when the request fails validation.
    pub fn reason(&self, request: &ReasoningRequest) -> Result<ReasoningResponse, ValidationError> {
        self.reason_with_cancel(request, &CancellationToken::new())
    }

    /// Like [`Self::reason`], aborting at the next stage boundary or pending
    /// collaborator call once `cancel` fires.
    pub fn reason_with_cancel(
        &self,
        request: &ReasoningRequest,
        cancel: &CancellationToken,
    ) -> Result<ReasoningResponse, ValidationError> {
        let validation = self.validate_request(request);
        let Some(req) = validation.normalized else {
            return Err(ValidationError::RequestRejected {
                issues: validation.issues,
            });
        };

        let started = Instant::now();
        let session_id = SessionId::new();
        info!(session = %session_id, domain = %req.domain, max_steps = req.max_steps, "reasoning started");

        let mut run = RunState::default();
        let outcome = self.run_stages(&req, cancel, &mut run);

        let steps_completed = run.traces.len();
        let (answer, confidence, error) = match outcome {
            Ok(answer) => {
                let confidence = self.aggregate(&run.traces);
                (answer, confidence, None)
            }
            Err(err) => {
                warn!(session = %session_id, error = %err, "reasoning aborted");
                (format!("Error occurred during reasoning: {err}"), 0.0, Some(err.to_string()))
            }
        };

        let mut final_trace = Trace::new(Stage::FinalAnswer, answer.clone(), confidence);
        if let Some(err) = &error {
            final_trace = final_trace.with_metadata("error", err.as_str());
        }
        run.traces.push(final_trace);

        let graph_id = self.record_graph(session_id, &run.traces);
        let processing_time_ms = started.elapsed().as_secs_f64() * 1000.0;
        info!(
            session = %session_id,
            confidence,
            steps_completed,
            processing_time_ms,
            "reasoning finished"
        );

        Ok(ReasoningResponse {
            answer,
            confidence,
            trace: run.traces,
            metadata: ResponseMetadata {
                session_id,
                processing_time_ms,
                steps_completed,
                domain: req.domain,
                confidence_level: ConfidenceLevel::from_value(confidence),
                confidence_threshold: req.confidence_threshold,
                meets_threshold: error.is_none() && confidence >= req.confidence_threshold,
                skipped_stages: run.skipped,
                graph_id,
                error,
            },
        })
    }

    /// Weighted mean of stage confidences; neutral when nothing is weighted.
    #[must_use]
    pub fn aggregate(&self, traces: &[Trace]) -> f64 {
        let weights = &self.config.stage_weights;
        confidence::weighted_mean(traces.iter().map(|t| (t.confidence, weights.weight(t.stage))))
            .unwrap_or(NEUTRAL_CONFIDENCE)
    }

    fn run_stages(
        &self,
        req: &NormalizedRequest,
        cancel: &CancellationToken,
        run: &mut RunState,
    ) -> Result<String, ReasonError> {
        let mut hypothesis = String::new();
        if self.should_run(Stage::Hypothesis, req, run) {
            let generator = Arc::clone(&self.generator);
            let (question, context, domain) = (req.question.clone(), req.context.clone(), req.domain.clone());
            let trace = self
                .external(Stage::Hypothesis, GENERATOR, cancel, move || {
                    generator.generate(&question, &context, &domain)
                })?
                .with_metadata("question", req.question.as_str());
            if trace.error().is_none() {
                hypothesis.clone_from(&trace.output);
            }
            run.traces.push(trace);
        }

        let mut rule_summary = "Rule check skipped".to_string();
        if self.should_run(Stage::RuleCheck, req, run) {
            if cancel.is_cancelled() {
                return Err(ExternalCallError::Cancelled {
                    service: RULE_ENGINE.to_string(),
                }
                .into());
            }
            let trace = self.rule_check(req, &hypothesis)?;
            rule_summary.clone_from(&trace.output);
            run.traces.push(trace);
        }

        let mut knowledge_summary = "Knowledge check skipped".to_string();
        if self.should_run(Stage::KnowledgeCheck, req, run) {
            let verifier = Arc::clone(&self.verifier);
            let (h, question, domain) = (hypothesis.clone(), req.question.clone(), req.domain.clone());
            let trace = self.external(Stage::KnowledgeCheck, VERIFIER, cancel, move || {
                verifier.verify(&h, &question, &domain)
            })?;
            knowledge_summary = trace
                .error()
                .map_or_else(|| trace.output.clone(), |e| format!("Knowledge check unavailable: {e}"));
            run.traces.push(trace);
        }

        let answer = self.synthesize(
            SynthesisRequest {
                question: req.question.clone(),
                domain: req.domain.clone(),
                hypothesis,
                rule_summary,
                knowledge_summary,
            },
            cancel,
        )?;

        if self.should_run(Stage::Validation, req, run) {
            let generator = Arc::clone(&self.generator);
            let (question, a, domain) = (req.question.clone(), answer.clone(), req.domain.clone());
            let trace = self.external(Stage::Validation, GENERATOR, cancel, move || {
                generator.validate(&question, &a, &domain)
            })?;
            run.traces.push(trace);
        }

        Ok(answer)
    }

    fn should_run(&self, stage: Stage, req: &NormalizedRequest, run: &mut RunState) -> bool {
        let allowed = stage.step().is_some_and(|step| step <= req.max_steps);
        if !allowed {
            debug!(%stage, max_steps = req.max_steps, "stage skipped");
            run.skipped.push(stage);
        }
        allowed
    }

    /// Runs one collaborator call under the configured deadline.
    ///
    /// Cancellation propagates; any other failure becomes a zero-confidence
    /// trace carrying the error.
    fn external<F>(
        &self,
        stage: Stage,
        service: &'static str,
        cancel: &CancellationToken,
        call: F,
    ) -> Result<Trace, ReasonError>
    where
        F: FnOnce() -> Result<StageOutput, ExternalCallError> + Send + 'static,
    {
        let result = call_with_deadline(service, self.config.call_timeout(), cancel, call).and_then(|out| {
            if out.confidence.is_finite() {
                Ok(out)
            } else {
                Err(ExternalCallError::InvalidResponse {
                    service: service.to_string(),
                    reason: format!("confidence {} is not a number", out.confidence),
                })
            }
        });

        match result {
            Ok(out) => {
                debug!(%stage, confidence = out.confidence, "stage completed");
                let mut trace = Trace::new(stage, out.output, out.confidence);
                trace.metadata = out.metadata;
                Ok(trace)
            }
            Err(err) if err.is_cancelled() => Err(err.into()),
            Err(err) => {
                warn!(%stage, service, error = %err, "stage degraded");
                Ok(Trace::new(stage, String::new(), 0.0)
                    .with_metadata("error", err.to_string())
                    .with_metadata("retryable", err.is_retryable()))
            }
        }
    }

    fn rule_check(&self, req: &NormalizedRequest, hypothesis: &str) -> Result<Trace, ReasonError> {
        let input = RuleInput::new(req.question.as_str(), hypothesis)
            .with_context("domain", req.domain.as_str())
            .with_context("context", req.context.as_str());
        let reports = self.engine.execute_domain(&req.domain, &input)?;

        let applicable: Vec<&ExecutionReport> = reports.iter().filter(|r| r.has_applicable_rules()).collect();
        let confidence = if applicable.is_empty() {
            NO_RULES_CONFIDENCE
        } else {
            #[allow(clippy::cast_precision_loss)]
            let n = applicable.len() as f64;
            applicable.iter().map(|r| r.weighted_confidence).sum::<f64>() / n
        };

        let total: usize = reports.iter().map(|r| r.total).sum();
        let passed: usize = reports.iter().map(|r| r.passed).sum();
        let output = if total == 0 {
            format!("No applicable rules for domain '{}'", req.domain)
        } else {
            format!(
                "{passed}/{total} rules passed across {} rule set(s)",
                applicable.len()
            )
        };

        let rule_sets: Vec<serde_json::Value> = reports
            .iter()
            .map(|r| {
                json!({
                    "id": r.rule_set_id,
                    "name": r.rule_set_name,
                    "total": r.total,
                    "passed": r.passed,
                    "failed": r.failed,
                    "skipped": r.skipped,
                    "weighted_confidence": r.weighted_confidence,
                    "errors": r.errors,
                })
            })
            .collect();
        let rules: Vec<serde_json::Value> = reports
            .iter()
            .flat_map(|r| &r.results)
            .map(|r| {
                json!({
                    "rule_id": r.rule_id,
                    "rule_name": r.rule_name,
                    "rule_type": r.rule_type,
                    "passed": r.passed,
                    "confidence": r.confidence,
                    "error": r.error,
                })
            })
            .collect();

        debug!(rule_sets = reports.len(), total, passed, confidence, "rule check completed");
        Ok(Trace::new(Stage::RuleCheck, output, confidence)
            .with_metadata("domain", req.domain.as_str())
            .with_metadata("rule_sets", rule_sets)
            .with_metadata("rules", rules))
    }

    fn synthesize(&self, request: SynthesisRequest, cancel: &CancellationToken) -> Result<String, ReasonError> {
        let generator = Arc::clone(&self.generator);
        let fallback = request.fallback_answer();
        match call_with_deadline(GENERATOR, self.config.call_timeout(), cancel, move || {
            generator.synthesize(&request)
        }) {
            Ok(out) if !out.output.trim().is_empty() => Ok(out.output),
            Ok(_) => {
                warn!("synthesis returned an empty answer, using summary");
                Ok(fallback)
            }
            Err(err) if err.is_cancelled() => Err(err.into()),
            Err(err) => {
                warn!(error = %err, "synthesis failed, using summary");
                Ok(fallback)
            }
        }
    }

    fn record_graph(&self, session_id: SessionId, traces: &[Trace]) -> Option<GraphId> {
        let store = self.graphs.as_ref()?;
        let stored = self
            .builder
            .build(session_id, traces)
            .map_err(ReasonError::from)
            .and_then(|graph| store.insert(graph).map_err(ReasonError::from));
        match stored {
            Ok(id) => Some(id),
            Err(err) => {
                warn!(session = %session_id, error = %err, "failed to record reasoning graph");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;
    use std::time::Duration;

    use super::*;
    use crate::rules::{Rule, RuleSet, RuleSetRegistry};

    #[derive(Default)]
    struct Scripted {
        fail_generate: bool,
        fail_synthesis: bool,
        calls: AtomicUsize,
    }

    impl HypothesisGenerator for Scripted {
        fn generate(&self, question: &str, _context: &str, domain: &str) -> Result<StageOutput, ExternalCallError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_generate {
                return Err(ExternalCallError::unavailable(GENERATOR, "offline"));
            }
            Ok(StageOutput::new(format!("contract breach: {question}"), 0.8).with_metadata("domain", domain))
        }

        fn synthesize(&self, request: &SynthesisRequest) -> Result<StageOutput, ExternalCallError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_synthesis {
                return Err(ExternalCallError::unavailable(GENERATOR, "offline"));
            }
            Ok(StageOutput::new(format!("Answer: {}", request.hypothesis), 0.9))
        }

        fn validate(&self, _question: &str, _answer: &str, _domain: &str) -> Result<StageOutput, ExternalCallError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(StageOutput::new("looks right", 0.6))
        }
    }

    struct FixedVerifier(f64);

    impl FactVerifier for FixedVerifier {
        fn verify(&self, _h: &str, _q: &str, _d: &str) -> Result<StageOutput, ExternalCallError> {
            Ok(StageOutput::new("facts ok", self.0))
        }
    }

    struct SlowVerifier;

    impl FactVerifier for SlowVerifier {
        fn verify(&self, _h: &str, _q: &str, _d: &str) -> Result<StageOutput, ExternalCallError> {
            thread::sleep(Duration::from_secs(2));
            Ok(StageOutput::new("late", 1.0))
        }
    }

    fn engine() -> Arc<RuleEngine> {
        let registry = Arc::new(RuleSetRegistry::new());
        registry
            .register(
                RuleSet::new("legal-basics", "legal")
                    .with_rule(Rule::keywords("contract", &["contract", "breach"]))
                    .with_rule(Rule::keywords("tort", &["negligence", "duty"]).with_weight(2.0)),
            )
            .unwrap();
        Arc::new(RuleEngine::new(registry))
    }

    fn orchestrator(generator: Scripted, verifier: impl FactVerifier + 'static) -> Orchestrator {
        Orchestrator::new(ReasoningConfig::default(), Arc::new(generator), Arc::new(verifier), engine())
    }

    #[test]
    fn validation_rejects_empty_questions() {
        let o = orchestrator(Scripted::default(), FixedVerifier(0.5));
        let v = o.validate_request(&ReasoningRequest::new("   "));
        assert!(!v.valid);
        assert!(v.issues[0].contains("at least 1 character"));
        assert!(v.normalized.is_none());
        assert!(matches!(
            o.reason(&ReasoningRequest::new("")),
            Err(ValidationError::RequestRejected { .. })
        ));
    }

    #[test]
    fn validation_normalizes_and_warns() {
        let o = orchestrator(Scripted::default(), FixedVerifier(0.5));
        let v = o.validate_request(
            &ReasoningRequest::new("Is it legal?")
                .with_domain("Astrology")
                .with_max_steps(50)
                .with_confidence_threshold(0.9),
        );
        assert!(v.valid);
        let n = v.normalized.unwrap();
        assert_eq!(n.max_steps, 10);
        assert_eq!(n.domain, "astrology");
        assert!(v.warnings.iter().any(|w| w.contains("max_steps")));
        assert!(v.warnings.iter().any(|w| w.contains("astrology")));

        let v = o.validate_request(&ReasoningRequest::new("x".repeat(1001)));
        assert!(v.issues[0].contains("too long"));
        let v = o.validate_request(&ReasoningRequest::new("Fine question here").with_confidence_threshold(1.5));
        assert!(!v.valid);
        let v = o.validate_request(&ReasoningRequest::new("Fine question here").with_domain("LEGAL"));
        assert!(v.warnings.is_empty());
    }

    #[test]
    fn full_run_aggregates_stage_confidence() {
        let o = orchestrator(Scripted::default(), FixedVerifier(0.5));
        let r = o
            .reason(&ReasoningRequest::new("Was there a contract breach?").with_domain("legal"))
            .unwrap();

        let stages: Vec<Stage> = r.trace.iter().map(|t| t.stage).collect();
        assert_eq!(stages, Stage::ALL.to_vec());
        assert_eq!(r.metadata.steps_completed, 4);
        assert!(r.answer.starts_with("Answer: contract breach"));

        // both contract keywords match, tort none: (1*1 + 0*2) / 3
        let rule_conf = r.stage(Stage::RuleCheck).unwrap().confidence;
        assert!((rule_conf - 1.0 / 3.0).abs() < 1e-9);
        let expected = 0.4 * 0.8 + 0.3 * rule_conf + 0.2 * 0.5 + 0.1 * 0.6;
        assert!((r.confidence - expected).abs() < 1e-9);
        assert_eq!(r.trace[4].confidence, r.confidence);
        assert!(!r.is_aborted());
        assert_eq!(r.metadata.meets_threshold, r.confidence >= 0.7);
    }

    #[test]
    fn unknown_domain_uses_neutral_rule_confidence() {
        let o = orchestrator(Scripted::default(), FixedVerifier(0.5));
        let r = o.reason(&ReasoningRequest::new("What is the weather like?")).unwrap();
        let rule = r.stage(Stage::RuleCheck).unwrap();
        assert_eq!(rule.confidence, 0.5);
        assert!(rule.output.contains("No applicable rules"));
    }

    #[test]
    fn generator_failure_degrades_one_stage() {
        let o = orchestrator(
            Scripted {
                fail_generate: true,
                ..Scripted::default()
            },
            FixedVerifier(1.0),
        );
        let r = o.reason(&ReasoningRequest::new("Was there a contract breach?")).unwrap();
        let h = r.stage(Stage::Hypothesis).unwrap();
        assert_eq!(h.confidence, 0.0);
        assert!(h.error().unwrap().contains("offline"));
        assert_eq!(r.trace.len(), 5);
        assert!(!r.is_aborted());
        assert!(r.confidence > 0.0);
    }

    #[test]
    fn synthesis_failure_falls_back_to_summary() {
        let o = orchestrator(
            Scripted {
                fail_synthesis: true,
                ..Scripted::default()
            },
            FixedVerifier(0.7),
        );
        let r = o.reason(&ReasoningRequest::new("Was there a contract breach?")).unwrap();
        assert!(r.answer.starts_with("Based on the analysis: contract breach"));
        assert!(r.answer.contains("Knowledge verification: facts ok"));
    }

    #[test]
    fn max_steps_limits_the_stages_run() {
        let o = orchestrator(Scripted::default(), FixedVerifier(0.7));
        let r = o
            .reason(&ReasoningRequest::new("Was there a contract breach?").with_max_steps(2))
            .unwrap();
        assert_eq!(r.metadata.steps_completed, 2);
        assert_eq!(r.metadata.skipped_stages, vec![Stage::KnowledgeCheck, Stage::Validation]);
        assert!(r.answer.starts_with("Answer:"));
        assert_eq!(r.trace.last().unwrap().stage, Stage::FinalAnswer);
    }

    #[test]
    fn timeouts_degrade_and_cancellation_aborts() {
        let config = ReasoningConfig {
            call_timeout_ms: 50,
            ..ReasoningConfig::default()
        };
        let o = Orchestrator::new(config, Arc::new(Scripted::default()), Arc::new(SlowVerifier), engine());
        let r = o.reason(&ReasoningRequest::new("Was there a contract breach?")).unwrap();
        let k = r.stage(Stage::KnowledgeCheck).unwrap();
        assert_eq!(k.confidence, 0.0);
        assert!(k.error().unwrap().contains("timed out"));

        let token = CancellationToken::new();
        token.cancel();
        let r = o
            .reason_with_cancel(&ReasoningRequest::new("Was there a contract breach?"), &token)
            .unwrap();
        assert!(r.is_aborted());
        assert_eq!(r.confidence, 0.0);
        assert_eq!(r.trace.len(), 1);
        assert!(r.answer.starts_with("Error occurred during reasoning"));
        assert!(!r.metadata.meets_threshold);
    }

    #[test]
    fn runs_are_recorded_in_the_graph_store() {
        let store = Arc::new(GraphStore::new());
        let o = orchestrator(Scripted::default(), FixedVerifier(0.5)).with_graph_store(Arc::clone(&store));
        let r = o.reason(&ReasoningRequest::new("Was there a contract breach?")).unwrap();
        let graph = store.get(r.metadata.graph_id.unwrap()).unwrap();
        assert_eq!(graph.session_id, r.metadata.session_id);
        assert_eq!(graph.node_count(), 7);
        assert!(o.summary().unwrap().graph_store_attached);
    }

    #[test]
    fn aggregate_without_traces_is_neutral() {
        let o = orchestrator(Scripted::default(), FixedVerifier(0.5));
        assert_eq!(o.aggregate(&[]), 0.5);
        assert_eq!(o.aggregate(&[Trace::new(Stage::FinalAnswer, "a", 1.0)]), 0.5);
    }
}
