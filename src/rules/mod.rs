//! Rule sets, rules and the rule engine.
//!
//! A rule set is a named, domain-scoped collection of rules loaded as data.
//! Rules come in four representations (keyword list, regex, allow-listed
//! expression, logic program) and are evaluated against a [`RuleInput`].

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

pub mod condition;
pub mod engine;
pub mod expr;
pub mod logic;
pub mod registry;

pub use condition::{Condition, ConditionOperator};
pub use engine::{ExecutionReport, ExecutionResult, RuleComplexity, RuleEngine, RuleSetIssue, ValidationReport};
pub use logic::{LogicBackend, LogicOutcome, NoLogicBackend};
pub use registry::RuleSetRegistry;

fn default_version() -> String {
    "1.0.0".to_string()
}

const fn default_true() -> bool {
    true
}

const fn default_weight() -> f64 {
    1.0
}

/// How a rule's `content` is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleType {
    /// Comma-separated keyword list.
    #[serde(alias = "keyword", alias = "keywords", alias = "pattern")]
    PatternMatch,
    /// Regular expression, matched case-insensitively.
    #[serde(alias = "regex")]
    RegexMatch,
    /// Allow-listed expression language.
    #[serde(alias = "expression", alias = "python", alias = "custom")]
    ExpressionEval,
    /// Logic program handed to a pluggable backend.
    #[serde(alias = "logic", alias = "prolog")]
    LogicProgram,
}

impl RuleType {
    /// Stable snake_case name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::PatternMatch => "pattern_match",
            Self::RegexMatch => "regex_match",
            Self::ExpressionEval => "expression_eval",
            Self::LogicProgram => "logic_program",
        }
    }
}

impl fmt::Display for RuleType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rule {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(rename = "type")]
    pub rule_type: RuleType,
    pub content: String,
    #[serde(default = "default_weight")]
    pub weight: f64,
    #[serde(default)]
    pub conditions: Vec<Condition>,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl Rule {
    /// Creates an enabled rule with weight 1 and no conditions.
    #[must_use]
    pub fn new(id: impl Into<String>, rule_type: RuleType, content: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            description: String::new(),
            rule_type,
            content: content.into(),
            weight: 1.0,
            conditions: Vec::new(),
            enabled: true,
        }
    }

    /// Creates a keyword rule.
    #[must_use]
    pub fn keywords(id: impl Into<String>, keywords: &[&str]) -> Self {
        Self::new(id, RuleType::PatternMatch, keywords.join(","))
    }

    /// Creates a regex rule.
    #[must_use]
    pub fn regex(id: impl Into<String>, pattern: impl Into<String>) -> Self {
        Self::new(id, RuleType::RegexMatch, pattern)
    }

    /// Creates an expression rule.
    #[must_use]
    pub fn expression(id: impl Into<String>, source: impl Into<String>) -> Self {
        Self::new(id, RuleType::ExpressionEval, source)
    }

    /// Creates a logic-program rule.
    #[must_use]
    pub fn logic(id: impl Into<String>, program: impl Into<String>) -> Self {
        Self::new(id, RuleType::LogicProgram, program)
    }

    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    #[must_use]
    pub const fn with_weight(mut self, weight: f64) -> Self {
        self.weight = weight;
        self
    }

    #[must_use]
    pub fn with_condition(mut self, condition: Condition) -> Self {
        self.conditions.push(condition);
        self
    }

    #[must_use]
    pub const fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }
}

/// A named, domain-scoped collection of rules.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleSet {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub domain: String,
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Higher runs first when several sets share a domain.
    #[serde(default)]
    pub priority: i32,
    #[serde(default)]
    pub rules: Vec<Rule>,
}

impl RuleSet {
    /// Creates an empty enabled rule set.
    #[must_use]
    pub fn new(id: impl Into<String>, domain: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            description: String::new(),
            domain: domain.into(),
            version: default_version(),
            enabled: true,
            priority: 0,
            rules: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    #[must_use]
    pub const fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    #[must_use]
    pub fn with_rule(mut self, rule: Rule) -> Self {
        self.rules.push(rule);
        self
    }

    #[must_use]
    pub const fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }
}

/// Text a rule set is evaluated against.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleInput {
    pub question: String,
    #[serde(default)]
    pub hypothesis: String,
    #[serde(default)]
    pub context: BTreeMap<String, String>,
}

impl RuleInput {
    #[must_use]
    pub fn new(question: impl Into<String>, hypothesis: impl Into<String>) -> Self {
        Self {
            question: question.into(),
            hypothesis: hypothesis.into(),
            context: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    /// Resolves a condition field: `question`, `hypothesis`, or a context key
    /// (`domain` included).
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&str> {
        match name {
            "question" => Some(self.question.as_str()),
            "hypothesis" => Some(self.hypothesis.as_str()),
            other => self.context.get(other).map(String::as_str),
        }
    }

    /// Question and hypothesis joined by a space; the text keyword and
    /// regex rules search.
    #[must_use]
    pub fn combined_text(&self) -> String {
        format!("{} {}", self.question, self.hypothesis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rule_type_aliases_deserialize() {
        let cases = [
            ("\"keyword\"", RuleType::PatternMatch),
            ("\"pattern_match\"", RuleType::PatternMatch),
            ("\"regex\"", RuleType::RegexMatch),
            ("\"python\"", RuleType::ExpressionEval),
            ("\"prolog\"", RuleType::LogicProgram),
        ];
        for (raw, expected) in cases {
            let parsed: RuleType = serde_json::from_str(raw).unwrap();
            assert_eq!(parsed, expected);
        }
        assert_eq!(serde_json::to_string(&RuleType::RegexMatch).unwrap(), "\"regex_match\"");
    }

    #[test]
    fn rule_set_defaults_from_json() {
        let raw = r#"{
            "id": "legal",
            "domain": "legal",
            "rules": [{"id": "r1", "type": "keyword", "content": "contract, breach"}]
        }"#;
        let set: RuleSet = serde_json::from_str(raw).unwrap();
        assert!(set.enabled);
        assert_eq!(set.version, "1.0.0");
        assert_eq!(set.rules[0].weight, 1.0);
        assert!(set.rules[0].enabled);
        assert!(set.rules[0].conditions.is_empty());
    }

    #[test]
    fn input_field_resolution() {
        let input = RuleInput::new("Is it legal?", "Probably").with_context("domain", "legal");
        assert_eq!(input.field("question"), Some("Is it legal?"));
        assert_eq!(input.field("hypothesis"), Some("Probably"));
        assert_eq!(input.field("domain"), Some("legal"));
        assert_eq!(input.field("missing"), None);
        assert_eq!(input.combined_text(), "Is it legal? Probably");
    }
}
