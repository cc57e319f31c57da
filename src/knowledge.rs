//! In-memory fact base usable as the pipeline's [`FactVerifier`].
//!
//! Facts are subject/predicate/object triples with a confidence. A fact is
//! relevant to a question when its subject or object is mentioned in the
//! question or hypothesis; each relevant fact is then scored by how much of
//! it the hypothesis restates.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::RwLock;

use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::debug;

use crate::confidence;
use crate::error::{ExternalCallError, ValidationError};
use crate::pipeline::{FactVerifier, StageOutput};

const SERVICE: &str = "fact_base";

/// Confidence when no fact is relevant.
pub const NEUTRAL_CONFIDENCE: f64 = 0.5;

/// Multiplier when the hypothesis names the subject and one other part.
pub const PARTIAL_MATCH_FACTOR: f64 = 0.8;

/// Confidence assigned to a relevant fact the hypothesis does not restate.
pub const UNVERIFIED_CONFIDENCE: f64 = 0.3;

/// A subject/predicate/object triple.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fact {
    pub subject: String,
    pub predicate: String,
    pub object: String,
    pub confidence: f64,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub domain: Option<String>,
}

impl Fact {
    /// Creates a fact; confidence is clamped.
    #[must_use]
    pub fn new(subject: impl Into<String>, predicate: impl Into<String>, object: impl Into<String>, confidence: f64) -> Self {
        Self {
            subject: subject.into(),
            predicate: predicate.into(),
            object: object.into(),
            confidence: confidence::clamp(confidence),
            source: None,
            domain: None,
        }
    }

    #[must_use]
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    #[must_use]
    pub fn with_domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = Some(domain.into());
        self
    }

    /// Storage key; a later fact with the same triple replaces the earlier one.
    #[must_use]
    pub fn key(&self) -> String {
        format!("{}_{}_{}", self.subject, self.predicate, self.object)
    }
}

/// How one fact fared against a hypothesis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FactCheck {
    pub fact: Fact,
    pub verified: bool,
    pub confidence: f64,
    pub subject_mentioned: bool,
    pub predicate_mentioned: bool,
    pub object_mentioned: bool,
}

/// Counts describing the fact base.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FactBaseSummary {
    pub total_facts: usize,
    pub entities: usize,
    pub predicates: usize,
    pub domains: Vec<String>,
}

/// `term` appears in `text` (already lowercased), with `_` read as a space.
fn mentions(text: &str, term: &str) -> bool {
    let term = term.to_lowercase();
    if term.is_empty() {
        return false;
    }
    text.contains(&term) || (term.contains('_') && text.contains(&term.replace('_', " ")))
}

/// Thread-safe in-memory fact store.
#[derive(Debug, Default)]
pub struct FactBase {
    facts: RwLock<BTreeMap<String, Fact>>,
}

impl FactBase {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a fact base from a list of facts.
    #[must_use]
    pub fn with_facts(facts: impl IntoIterator<Item = Fact>) -> Self {
        let map = facts.into_iter().map(|f| (f.key(), f)).collect();
        Self {
            facts: RwLock::new(map),
        }
    }

    /// Loads a JSON array of facts, returning the number added.
    pub fn load_json_str(&self, raw: &str) -> Result<usize, ValidationError> {
        let facts: Vec<Fact> = serde_json::from_str(raw).map_err(|e| ValidationError::InvalidField {
            field: "facts".to_string(),
            reason: e.to_string(),
        })?;
        let count = facts.len();
        for fact in facts {
            crate::confidence::validate(fact.confidence)?;
            self.add(fact);
        }
        Ok(count)
    }

    /// Adds or replaces a fact.
    pub fn add(&self, fact: Fact) {
        let mut guard = match self.facts.write() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        guard.insert(fact.key(), fact);
    }

    fn snapshot(&self) -> Vec<Fact> {
        match self.facts.read() {
            Ok(g) => g.values().cloned().collect(),
            Err(poisoned) => poisoned.into_inner().values().cloned().collect(),
        }
    }

    /// Facts matching every given component exactly.
    #[must_use]
    pub fn query(&self, subject: Option<&str>, predicate: Option<&str>, object: Option<&str>) -> Vec<Fact> {
        self.snapshot()
            .into_iter()
            .filter(|f| subject.map_or(true, |s| f.subject == s))
            .filter(|f| predicate.map_or(true, |p| f.predicate == p))
            .filter(|f| object.map_or(true, |o| f.object == o))
            .collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Facts whose subject or object is mentioned in `text`.
    #[must_use]
    pub fn relevant(&self, text: &str) -> Vec<Fact> {
        let text = text.to_lowercase();
        self.snapshot()
            .into_iter()
            .filter(|f| mentions(&text, &f.subject) || mentions(&text, &f.object))
            .collect()
    }

    /// Scores one fact against a hypothesis.
    #[must_use]
    pub fn check(hypothesis: &str, fact: &Fact) -> FactCheck {
        let text = hypothesis.to_lowercase();
        let subject_mentioned = mentions(&text, &fact.subject);
        let predicate_mentioned = mentions(&text, &fact.predicate);
        let object_mentioned = mentions(&text, &fact.object);

        let (verified, confidence) = if subject_mentioned && predicate_mentioned && object_mentioned {
            (true, fact.confidence)
        } else if subject_mentioned && (predicate_mentioned || object_mentioned) {
            (true, fact.confidence * PARTIAL_MATCH_FACTOR)
        } else {
            (false, UNVERIFIED_CONFIDENCE)
        };

        FactCheck {
            fact: fact.clone(),
            verified,
            confidence,
            subject_mentioned,
            predicate_mentioned,
            object_mentioned,
        }
    }

    /// Verifies a hypothesis, returning the per-fact checks and the mean
    /// confidence ([`NEUTRAL_CONFIDENCE`] when nothing is relevant).
    #[must_use]
    pub fn verify_hypothesis(&self, hypothesis: &str, question: &str) -> (Vec<FactCheck>, f64) {
        let relevant = self.relevant(&format!("{question} {hypothesis}"));
        let checks: Vec<FactCheck> = relevant.iter().map(|f| Self::check(hypothesis, f)).collect();
        if checks.is_empty() {
            return (checks, NEUTRAL_CONFIDENCE);
        }
        #[allow(clippy::cast_precision_loss)]
        let mean = checks.iter().map(|c| c.confidence).sum::<f64>() / checks.len() as f64;
        (checks, confidence::clamp(mean))
    }

    /// Counts, optionally restricted to a domain.
    #[must_use]
    pub fn summary(&self, domain: Option<&str>) -> FactBaseSummary {
        let all = self.snapshot();
        let domains: BTreeSet<String> = all
            .iter()
            .map(|f| f.domain.clone().unwrap_or_else(|| "general".to_string()).to_lowercase())
            .collect();

        let facts: Vec<&Fact> = match domain {
            Some(d) => {
                let d = d.to_lowercase();
                all.iter()
                    .filter(|f| {
                        f.domain.as_deref().is_some_and(|fd| fd.eq_ignore_ascii_case(&d))
                            || f.subject.to_lowercase().contains(&d)
                            || f.object.to_lowercase().contains(&d)
                    })
                    .collect()
            }
            None => all.iter().collect(),
        };

        let entities: BTreeSet<&str> = facts
            .iter()
            .flat_map(|f| [f.subject.as_str(), f.object.as_str()])
            .collect();
        let predicates: BTreeSet<&str> = facts.iter().map(|f| f.predicate.as_str()).collect();

        FactBaseSummary {
            total_facts: facts.len(),
            entities: entities.len(),
            predicates: predicates.len(),
            domains: domains.into_iter().collect(),
        }
    }
}

impl FactVerifier for FactBase {
    fn verify(&self, hypothesis: &str, question: &str, domain: &str) -> Result<StageOutput, ExternalCallError> {
        let (checks, confidence) = self.verify_hypothesis(hypothesis, question);
        debug!(service = SERVICE, facts_checked = checks.len(), confidence, "hypothesis verified");

        let mut output = format!("Verified hypothesis against {} relevant facts.", checks.len());
        for check in &checks {
            let status = if check.verified { "PASS" } else { "FAIL" };
            output.push_str(&format!(
                "\n- {} {} {}: {status}",
                check.fact.subject, check.fact.predicate, check.fact.object
            ));
        }

        let results: Vec<serde_json::Value> = checks
            .iter()
            .map(|c| {
                json!({
                    "fact": format!("{} {} {}", c.fact.subject, c.fact.predicate, c.fact.object),
                    "verified": c.verified,
                    "confidence": c.confidence,
                })
            })
            .collect();

        Ok(StageOutput::new(output, confidence)
            .with_metadata("domain", domain)
            .with_metadata("facts_checked", checks.len())
            .with_metadata("verification_results", results))
    }
}
