//! Pluggable logic-program capability.
//!
//! Logic programs are opaque to the engine. A [`LogicBackend`] evaluates
//! them; when none is installed the engine records an informational result
//! instead of failing the rule set.

use super::{Rule, RuleInput};

/// What a backend concluded for one program.
#[derive(Debug, Clone, PartialEq)]
pub struct LogicOutcome {
    pub passed: bool,
    pub confidence: f64,
    pub output: serde_json::Value,
}

/// Evaluates `LogicProgram` rule content.
pub trait LogicBackend: Send + Sync {
    /// Backend name used in results and errors.
    fn name(&self) -> &str;

    /// False when the backing engine cannot be used right now.
    fn is_available(&self) -> bool {
        true
    }

    /// Evaluates `rule.content` against the input.
    fn evaluate(&self, rule: &Rule, input: &RuleInput) -> Result<LogicOutcome, String>;
}

/// The absent backend.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoLogicBackend;

impl LogicBackend for NoLogicBackend {
    fn name(&self) -> &str {
        "none"
    }

    fn is_available(&self) -> bool {
        false
    }

    fn evaluate(&self, _rule: &Rule, _input: &RuleInput) -> Result<LogicOutcome, String> {
        Err("no logic backend installed".to_string())
    }
}

/// Structural check of a logic program: every clause ends with `.`, and a
/// clause is either a fact `name(args).` or a rule `head :- body.`.
pub fn check_program(content: &str) -> Result<(), String> {
    let text = content.trim();
    if text.is_empty() {
        return Err("logic program is empty".to_string());
    }
    if !text.ends_with('.') {
        return Err("logic program must end with '.'".to_string());
    }

    for (idx, clause) in split_clauses(text).into_iter().enumerate() {
        let clause = clause.trim();
        if clause.is_empty() {
            continue;
        }
        let (head, body) = match clause.split_once(":-") {
            Some((h, b)) => (h.trim(), Some(b.trim())),
            None => (clause, None),
        };
        if !is_term(head) {
            return Err(format!("clause {}: malformed head '{head}'", idx + 1));
        }
        if let Some(body) = body {
            if body.is_empty() {
                return Err(format!("clause {}: empty body", idx + 1));
            }
        }
    }
    Ok(())
}

/// Splits on `.` outside parentheses and quotes.
fn split_clauses(text: &str) -> Vec<&str> {
    let mut out = Vec::new();
    let mut depth = 0i32;
    let mut quote: Option<char> = None;
    let mut start = 0;
    for (i, c) in text.char_indices() {
        match (quote, c) {
            (Some(q), c) if c == q => quote = None,
            (Some(_), _) => {}
            (None, '\'' | '"') => quote = Some(c),
            (None, '(') => depth += 1,
            (None, ')') => depth -= 1,
            (None, '.') if depth == 0 => {
                out.push(&text[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    if start < text.len() {
        out.push(&text[start..]);
    }
    out
}

fn is_term(head: &str) -> bool {
    let name_end = head.find('(').unwrap_or(head.len());
    let name = &head[..name_end];
    let valid_name = name.chars().next().is_some_and(|c| c.is_ascii_lowercase())
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
    if !valid_name {
        return false;
    }
    if name_end == head.len() {
        return true;
    }
    let args = &head[name_end..];
    args.ends_with(')') && args.len() > 2
}
