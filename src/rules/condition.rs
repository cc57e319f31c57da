//! Applicability conditions attached to rules.

use serde::{Deserialize, Serialize};

use super::RuleInput;

/// Comparison applied by a [`Condition`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionOperator {
    Contains,
    Equals,
    Regex,
    StartsWith,
    EndsWith,
}

/// A rule applies only if every one of its conditions holds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    /// `question`, `hypothesis` or a context key.
    pub field: String,
    pub operator: ConditionOperator,
    /// Compared as a string; numbers and booleans are stringified.
    pub value: serde_json::Value,
    #[serde(default)]
    pub case_sensitive: bool,
}

impl Condition {
    #[must_use]
    pub fn new(field: impl Into<String>, operator: ConditionOperator, value: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            operator,
            value: serde_json::Value::String(value.into()),
            case_sensitive: false,
        }
    }

    #[must_use]
    pub const fn case_sensitive(mut self) -> Self {
        self.case_sensitive = true;
        self
    }

    /// The comparison value as text.
    #[must_use]
    pub fn value_text(&self) -> String {
        match &self.value {
            serde_json::Value::String(s) => s.clone(),
            serde_json::Value::Null => String::new(),
            other => other.to_string(),
        }
    }

    /// Regex source used for `Regex` conditions, with the case flag applied.
    #[must_use]
    pub fn regex_source(&self) -> String {
        let raw = self.value_text();
        if self.case_sensitive {
            raw
        } else {
            format!("(?i){raw}")
        }
    }

    /// Evaluates the condition. A missing field reads as the empty string.
    /// `compile` is asked for regexes so callers can cache them; a pattern
    /// that fails to compile evaluates false.
    pub fn evaluate<F>(&self, input: &RuleInput, compile: F) -> bool
    where
        F: FnOnce(&str) -> Option<regex::Regex>,
    {
        let actual = input.field(&self.field).unwrap_or_default();

        if self.operator == ConditionOperator::Regex {
            return compile(&self.regex_source()).is_some_and(|re| re.is_match(actual));
        }

        let expected = self.value_text();
        let (actual, expected) = if self.case_sensitive {
            (actual.to_string(), expected)
        } else {
            (actual.to_lowercase(), expected.to_lowercase())
        };

        match self.operator {
            ConditionOperator::Contains => actual.contains(&expected),
            ConditionOperator::Equals => actual == expected,
            ConditionOperator::StartsWith => actual.starts_with(&expected),
            ConditionOperator::EndsWith => actual.ends_with(&expected),
            ConditionOperator::Regex => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn compile(src: &str) -> Option<regex::Regex> {
        regex::Regex::new(src).ok()
    }

    #[test]
    fn operators_are_case_insensitive_by_default() {
        let input = RuleInput::new("What is the Contract Term?", "").with_context("domain", "Legal");

        let c = Condition::new("question", ConditionOperator::Contains, "contract");
        assert!(c.evaluate(&input, compile));

        let c = Condition::new("domain", ConditionOperator::Equals, "legal");
        assert!(c.evaluate(&input, compile));

        let c = Condition::new("question", ConditionOperator::StartsWith, "what");
        assert!(c.evaluate(&input, compile));

        let c = Condition::new("question", ConditionOperator::EndsWith, "term?");
        assert!(c.evaluate(&input, compile));

        let c = Condition::new("question", ConditionOperator::Regex, r"contract\s+term");
        assert!(c.evaluate(&input, compile));
    }

    #[test]
    fn case_sensitive_flag_is_honored() {
        let input = RuleInput::new("Contract", "");
        let c = Condition::new("question", ConditionOperator::Equals, "contract").case_sensitive();
        assert!(!c.evaluate(&input, compile));
    }

    #[test]
    fn missing_field_reads_as_empty() {
        let input = RuleInput::new("anything", "");
        assert!(Condition::new("nope", ConditionOperator::Contains, "").evaluate(&input, compile));
        assert!(Condition::new("nope", ConditionOperator::Equals, "").evaluate(&input, compile));
        assert!(Condition::new("nope", ConditionOperator::Regex, "^$").evaluate(&input, compile));
        assert!(!Condition::new("nope", ConditionOperator::Equals, "x").evaluate(&input, compile));
        assert!(!Condition::new("domain", ConditionOperator::StartsWith, "legal").evaluate(&input, compile));
    }

    #[test]
    fn bad_regex_is_false() {
        let input = RuleInput::new("anything", "");
        let c = Condition::new("question", ConditionOperator::Regex, "(unclosed");
        assert!(!c.evaluate(&input, compile));
    }

    #[test]
    fn non_string_values_are_stringified() {
        let raw = r#"{"field": "priority", "operator": "equals", "value": 3}"#;
        let c: Condition = serde_json::from_str(raw).unwrap();
        let input = RuleInput::new("q", "").with_context("priority", "3");
        assert!(c.evaluate(&input, compile));
    }
}
