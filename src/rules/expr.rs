//! Embedded expression language for `ExpressionEval` rules.
//!
//! Programs are parsed into an AST and interpreted; nothing outside the
//! allow-listed functions below is reachable. The environment exposes the
//! read-only bindings `question`, `hypothesis` and `context`, and collects
//! the writable outputs `passed`, `confidence` and `output`.
//!
//! ```text
//! let hits = count_any(question, ["contract", "breach"]);
//! passed = hits > 0;
//! confidence = min(hits / 2, 1);
//! output = "matched " + str(hits)
//! ```
//!
//! Statements are separated by `;`. If `passed` is never assigned, the
//! truthiness of the last bare expression is used. Parsing and evaluation are
//! bounded by [`ExpressionLimits`]: source length, nesting depth and a fuel
//! counter decremented per evaluated node.
//!
//! Functions: `len lower upper contains starts_with ends_with matches count
//! words min max abs if number str contains_any count_any`.

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use thiserror::Error;

use crate::config::ExpressionLimits;

use super::RuleInput;

/// Errors produced while parsing or evaluating an expression program.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExprError {
    #[error("parse error at offset {offset}: {message}")]
    Parse { offset: usize, message: String },

    #[error("limit exceeded: {limit}")]
    LimitExceeded { limit: &'static str },

    #[error("{message}")]
    Eval { message: String },
}

fn eval_err(message: impl Into<String>) -> ExprError {
    ExprError::Eval {
        message: message.into(),
    }
}

/// Runtime value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Num(f64),
    Str(String),
    List(Vec<Value>),
    Map(BTreeMap<String, Value>),
}

impl Value {
    fn truthy(&self) -> bool {
        match self {
            Self::Null => false,
            Self::Bool(b) => *b,
            Self::Num(n) => *n != 0.0 && !n.is_nan(),
            Self::Str(s) => !s.is_empty(),
            Self::List(items) => !items.is_empty(),
            Self::Map(map) => !map.is_empty(),
        }
    }

    const fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Num(_) => "number",
            Self::Str(_) => "string",
            Self::List(_) => "list",
            Self::Map(_) => "map",
        }
    }

    fn as_num(&self, what: &str) -> Result<f64, ExprError> {
        match self {
            Self::Num(n) => Ok(*n),
            other => Err(eval_err(format!("{what} expects a number, got {}", other.type_name()))),
        }
    }

    fn as_str(&self, what: &str) -> Result<&str, ExprError> {
        match self {
            Self::Str(s) => Ok(s),
            other => Err(eval_err(format!("{what} expects a string, got {}", other.type_name()))),
        }
    }

    /// Bytes of string data plus one per container element, counted through
    /// nested lists and maps.
    fn weight(&self) -> usize {
        match self {
            Self::Null | Self::Bool(_) | Self::Num(_) => 1,
            Self::Str(s) => s.len(),
            Self::List(items) => items.iter().map(Self::weight).fold(1, usize::saturating_add),
            Self::Map(map) => map
                .iter()
                .map(|(k, v)| k.len().saturating_add(v.weight()))
                .fold(1, usize::saturating_add),
        }
    }

    /// Converts to JSON for rule output.
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Self::Null => serde_json::Value::Null,
            Self::Bool(b) => serde_json::Value::Bool(*b),
            Self::Num(n) => serde_json::Number::from_f64(*n).map_or(serde_json::Value::Null, serde_json::Value::Number),
            Self::Str(s) => serde_json::Value::String(s.clone()),
            Self::List(items) => serde_json::Value::Array(items.iter().map(Self::to_json).collect()),
            Self::Map(map) => serde_json::Value::Object(map.iter().map(|(k, v)| (k.clone(), v.to_json())).collect()),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("null"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Num(n) => {
                if n.fract() == 0.0 && n.abs() < 1e15 {
                    #[allow(clippy::cast_possible_truncation)]
                    let whole = *n as i64;
                    write!(f, "{whole}")
                } else {
                    write!(f, "{n}")
                }
            }
            Self::Str(s) => f.write_str(s),
            Self::List(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str("]")
            }
            Self::Map(map) => {
                f.write_str("{")?;
                for (i, (k, v)) in map.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{k}: {v}")?;
                }
                f.write_str("}")
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Tok {
    Ident(String),
    Str(String),
    Num(f64),
    Let,
    True,
    False,
    Null,
    In,
    And,
    Or,
    Not,
    LParen,
    RParen,
    LBracket,
    RBracket,
    Comma,
    Semi,
    Dot,
    Assign,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Plus,
    Minus,
    Star,
    Slash,
}

fn lex(src: &str) -> Result<Vec<(usize, Tok)>, ExprError> {
    let chars: Vec<(usize, char)> = src.char_indices().collect();
    let mut out = Vec::new();
    let mut i = 0;
    let parse_err = |offset: usize, message: String| ExprError::Parse { offset, message };

    while i < chars.len() {
        let (pos, c) = chars[i];
        if c.is_whitespace() {
            i += 1;
            continue;
        }
        if c == '#' {
            while i < chars.len() && chars[i].1 != '\n' {
                i += 1;
            }
            continue;
        }
        if c.is_ascii_digit() {
            let start = i;
            while i < chars.len() && (chars[i].1.is_ascii_digit() || chars[i].1 == '.') {
                i += 1;
            }
            let text: String = chars[start..i].iter().map(|(_, c)| *c).collect();
            let n = text
                .parse::<f64>()
                .map_err(|_| parse_err(pos, format!("invalid number '{text}'")))?;
            out.push((pos, Tok::Num(n)));
            continue;
        }
        if c.is_alphabetic() || c == '_' {
            let start = i;
            while i < chars.len() && (chars[i].1.is_alphanumeric() || chars[i].1 == '_') {
                i += 1;
            }
            let word: String = chars[start..i].iter().map(|(_, c)| *c).collect();
            let tok = match word.as_str() {
                "let" => Tok::Let,
                "true" | "True" => Tok::True,
                "false" | "False" => Tok::False,
                "null" | "None" => Tok::Null,
                "in" => Tok::In,
                "and" => Tok::And,
                "or" => Tok::Or,
                "not" => Tok::Not,
                _ => Tok::Ident(word),
            };
            out.push((pos, tok));
            continue;
        }
        if c == '"' || c == '\'' {
            let quote = c;
            i += 1;
            let mut s = String::new();
            loop {
                let Some(&(_, ch)) = chars.get(i) else {
                    return Err(parse_err(pos, "unterminated string".to_string()));
                };
                i += 1;
                if ch == quote {
                    break;
                }
                if ch == '\\' {
                    let Some(&(_, esc)) = chars.get(i) else {
                        return Err(parse_err(pos, "unterminated string".to_string()));
                    };
                    i += 1;
                    s.push(match esc {
                        'n' => '\n',
                        't' => '\t',
                        other => other,
                    });
                } else {
                    s.push(ch);
                }
            }
            out.push((pos, Tok::Str(s)));
            continue;
        }

        let next = chars.get(i + 1).map(|(_, c)| *c);
        let (tok, width) = match (c, next) {
            ('=', Some('=')) => (Tok::Eq, 2),
            ('!', Some('=')) => (Tok::Ne, 2),
            ('<', Some('=')) => (Tok::Le, 2),
            ('>', Some('=')) => (Tok::Ge, 2),
            ('&', Some('&')) => (Tok::And, 2),
            ('|', Some('|')) => (Tok::Or, 2),
            ('=', _) => (Tok::Assign, 1),
            ('!', _) => (Tok::Not, 1),
            ('<', _) => (Tok::Lt, 1),
            ('>', _) => (Tok::Gt, 1),
            ('+', _) => (Tok::Plus, 1),
            ('-', _) => (Tok::Minus, 1),
            ('*', _) => (Tok::Star, 1),
            ('/', _) => (Tok::Slash, 1),
            ('(', _) => (Tok::LParen, 1),
            (')', _) => (Tok::RParen, 1),
            ('[', _) => (Tok::LBracket, 1),
            (']', _) => (Tok::RBracket, 1),
            (',', _) => (Tok::Comma, 1),
            (';', _) => (Tok::Semi, 1),
            ('.', _) => (Tok::Dot, 1),
            _ => return Err(parse_err(pos, format!("unexpected character '{c}'"))),
        };
        out.push((pos, tok));
        i += width;
    }
    Ok(out)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BinOp {
    Or,
    And,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    In,
    Add,
    Sub,
    Mul,
    Div,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum UnOp {
    Not,
    Neg,
}

#[derive(Debug, Clone, PartialEq)]
enum Expr {
    Lit(Value),
    Var(String),
    List(Vec<Expr>),
    Field(Box<Expr>, String),
    Index(Box<Expr>, Box<Expr>),
    Unary(UnOp, Box<Expr>),
    Binary(BinOp, Box<Expr>, Box<Expr>),
    Call(String, Vec<Expr>),
}

impl Expr {
    fn depth(&self) -> usize {
        match self {
            Self::Lit(_) | Self::Var(_) => 1,
            Self::List(items) | Self::Call(_, items) => 1 + items.iter().map(Self::depth).max().unwrap_or(0),
            Self::Field(inner, _) | Self::Unary(_, inner) => 1 + inner.depth(),
            Self::Index(a, b) | Self::Binary(_, a, b) => 1 + a.depth().max(b.depth()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Target {
    Passed,
    Confidence,
    Output,
}

#[derive(Debug, Clone, PartialEq)]
enum Stmt {
    Let(String, Expr),
    Set(Target, Expr),
    Reassign(String, Expr),
    Expr(Expr),
}

const READ_ONLY: [&str; 3] = ["question", "hypothesis", "context"];

const FUNCTIONS: [&str; 17] = [
    "len",
    "lower",
    "upper",
    "contains",
    "starts_with",
    "ends_with",
    "matches",
    "count",
    "words",
    "min",
    "max",
    "abs",
    "if",
    "number",
    "str",
    "contains_any",
    "count_any",
];

struct Parser {
    toks: Vec<(usize, Tok)>,
    pos: usize,
    depth: usize,
    max_depth: usize,
    end: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Tok> {
        self.toks.get(self.pos).map(|(_, t)| t)
    }

    fn offset(&self) -> usize {
        self.toks.get(self.pos).map_or(self.end, |(o, _)| *o)
    }

    fn err(&self, message: impl Into<String>) -> ExprError {
        ExprError::Parse {
            offset: self.offset(),
            message: message.into(),
        }
    }

    fn eat(&mut self, tok: &Tok) -> bool {
        if self.peek() == Some(tok) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, tok: &Tok, what: &str) -> Result<(), ExprError> {
        if self.eat(tok) {
            Ok(())
        } else {
            Err(self.err(format!("expected {what}")))
        }
    }

    fn enter(&mut self) -> Result<(), ExprError> {
        self.depth += 1;
        if self.depth > self.max_depth {
            return Err(ExprError::LimitExceeded { limit: "max_depth" });
        }
        Ok(())
    }

    fn program(&mut self) -> Result<Vec<Stmt>, ExprError> {
        let mut stmts = Vec::new();
        while self.peek().is_some() {
            if self.eat(&Tok::Semi) {
                continue;
            }
            stmts.push(self.statement()?);
            if self.peek().is_some() {
                self.expect(&Tok::Semi, "';' between statements")?;
            }
        }
        Ok(stmts)
    }

    fn statement(&mut self) -> Result<Stmt, ExprError> {
        if self.eat(&Tok::Let) {
            let Some(Tok::Ident(name)) = self.peek().cloned() else {
                return Err(self.err("expected a variable name after 'let'"));
            };
            if READ_ONLY.contains(&name.as_str()) || matches!(name.as_str(), "passed" | "confidence" | "output") {
                return Err(self.err(format!("'{name}' cannot be rebound")));
            }
            self.pos += 1;
            self.expect(&Tok::Assign, "'='")?;
            return Ok(Stmt::Let(name, self.expr()?));
        }

        let assigned = match (self.peek(), self.toks.get(self.pos + 1)) {
            (Some(Tok::Ident(name)), Some((_, Tok::Assign))) => Some(name.clone()),
            _ => None,
        };
        if let Some(name) = assigned {
            if READ_ONLY.contains(&name.as_str()) {
                return Err(self.err(format!("'{name}' is read-only")));
            }
            self.pos += 2;
            let value = self.expr()?;
            return Ok(match name.as_str() {
                "passed" => Stmt::Set(Target::Passed, value),
                "confidence" => Stmt::Set(Target::Confidence, value),
                "output" => Stmt::Set(Target::Output, value),
                _ => Stmt::Reassign(name, value),
            });
        }

        Ok(Stmt::Expr(self.expr()?))
    }

    fn expr(&mut self) -> Result<Expr, ExprError> {
        self.enter()?;
        let out = self.or_expr();
        self.depth -= 1;
        out
    }

    fn or_expr(&mut self) -> Result<Expr, ExprError> {
        let mut lhs = self.and_expr()?;
        while self.eat(&Tok::Or) {
            let rhs = self.and_expr()?;
            lhs = Expr::Binary(BinOp::Or, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn and_expr(&mut self) -> Result<Expr, ExprError> {
        let mut lhs = self.equality()?;
        while self.eat(&Tok::And) {
            let rhs = self.equality()?;
            lhs = Expr::Binary(BinOp::And, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn equality(&mut self) -> Result<Expr, ExprError> {
        let mut lhs = self.comparison()?;
        loop {
            let op = match self.peek() {
                Some(Tok::Eq) => BinOp::Eq,
                Some(Tok::Ne) => BinOp::Ne,
                _ => return Ok(lhs),
            };
            self.pos += 1;
            let rhs = self.comparison()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
    }

    fn comparison(&mut self) -> Result<Expr, ExprError> {
        let mut lhs = self.additive()?;
        loop {
            let op = match self.peek() {
                Some(Tok::Lt) => BinOp::Lt,
                Some(Tok::Le) => BinOp::Le,
                Some(Tok::Gt) => BinOp::Gt,
                Some(Tok::Ge) => BinOp::Ge,
                Some(Tok::In) => BinOp::In,
                _ => return Ok(lhs),
            };
            self.pos += 1;
            let rhs = self.additive()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
    }

    fn additive(&mut self) -> Result<Expr, ExprError> {
        let mut lhs = self.multiplicative()?;
        loop {
            let op = match self.peek() {
                Some(Tok::Plus) => BinOp::Add,
                Some(Tok::Minus) => BinOp::Sub,
                _ => return Ok(lhs),
            };
            self.pos += 1;
            let rhs = self.multiplicative()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
    }

    fn multiplicative(&mut self) -> Result<Expr, ExprError> {
        let mut lhs = self.unary()?;
        loop {
            let op = match self.peek() {
                Some(Tok::Star) => BinOp::Mul,
                Some(Tok::Slash) => BinOp::Div,
                _ => return Ok(lhs),
            };
            self.pos += 1;
            let rhs = self.unary()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
    }

    fn unary(&mut self) -> Result<Expr, ExprError> {
        let op = match self.peek() {
            Some(Tok::Not) => UnOp::Not,
            Some(Tok::Minus) => UnOp::Neg,
            _ => return self.postfix(),
        };
        self.pos += 1;
        self.enter()?;
        let inner = self.unary();
        self.depth -= 1;
        Ok(Expr::Unary(op, Box::new(inner?)))
    }

    fn postfix(&mut self) -> Result<Expr, ExprError> {
        let mut expr = self.primary()?;
        loop {
            if self.eat(&Tok::Dot) {
                let Some(Tok::Ident(field)) = self.peek().cloned() else {
                    return Err(self.err("expected a field name after '.'"));
                };
                self.pos += 1;
                expr = Expr::Field(Box::new(expr), field);
            } else if self.eat(&Tok::LBracket) {
                let index = self.expr()?;
                self.expect(&Tok::RBracket, "']'")?;
                expr = Expr::Index(Box::new(expr), Box::new(index));
            } else {
                return Ok(expr);
            }
        }
    }

    fn primary(&mut self) -> Result<Expr, ExprError> {
        let Some(tok) = self.peek().cloned() else {
            return Err(self.err("unexpected end of input"));
        };
        self.pos += 1;
        match tok {
            Tok::Num(n) => Ok(Expr::Lit(Value::Num(n))),
            Tok::Str(s) => Ok(Expr::Lit(Value::Str(s))),
            Tok::True => Ok(Expr::Lit(Value::Bool(true))),
            Tok::False => Ok(Expr::Lit(Value::Bool(false))),
            Tok::Null => Ok(Expr::Lit(Value::Null)),
            Tok::LParen => {
                let inner = self.expr()?;
                self.expect(&Tok::RParen, "')'")?;
                Ok(inner)
            }
            Tok::LBracket => {
                let items = self.arguments(&Tok::RBracket, "']'")?;
                Ok(Expr::List(items))
            }
            Tok::Ident(name) => {
                if self.eat(&Tok::LParen) {
                    if !FUNCTIONS.contains(&name.as_str()) {
                        self.pos -= 1;
                        return Err(self.err(format!("unknown function '{name}'")));
                    }
                    let args = self.arguments(&Tok::RParen, "')'")?;
                    Ok(Expr::Call(name, args))
                } else {
                    Ok(Expr::Var(name))
                }
            }
            other => {
                self.pos -= 1;
                Err(self.err(format!("unexpected token {other:?}")))
            }
        }
    }

    fn arguments(&mut self, close: &Tok, what: &str) -> Result<Vec<Expr>, ExprError> {
        let mut items = Vec::new();
        if self.eat(close) {
            return Ok(items);
        }
        loop {
            items.push(self.expr()?);
            if self.eat(close) {
                return Ok(items);
            }
            self.expect(&Tok::Comma, &format!("',' or {what}"))?;
        }
    }
}

/// A parsed expression program.
#[derive(Debug, Clone, PartialEq)]
pub struct Program {
    stmts: Vec<Stmt>,
}

/// Values collected from a program run.
#[derive(Debug, Clone, PartialEq)]
pub struct ExpressionOutcome {
    pub passed: bool,
    pub confidence: f64,
    pub output: serde_json::Value,
}

impl Program {
    /// Parses a program, enforcing source length and nesting limits.
    pub fn parse(source: &str, limits: &ExpressionLimits) -> Result<Self, ExprError> {
        if source.len() > limits.max_source_len {
            return Err(ExprError::LimitExceeded {
                limit: "max_source_len",
            });
        }
        let toks = lex(source)?;
        let mut parser = Parser {
            toks,
            pos: 0,
            depth: 0,
            max_depth: limits.max_depth,
            end: source.len(),
        };
        let stmts = parser.program()?;
        if stmts.is_empty() {
            return Err(ExprError::Parse {
                offset: 0,
                message: "empty program".to_string(),
            });
        }
        for stmt in &stmts {
            let expr = match stmt {
                Stmt::Let(_, e) | Stmt::Set(_, e) | Stmt::Reassign(_, e) | Stmt::Expr(e) => e,
            };
            if expr.depth() > limits.max_depth {
                return Err(ExprError::LimitExceeded { limit: "max_depth" });
            }
        }
        Ok(Self { stmts })
    }

    /// Runs the program against `input`. `regex` compiles patterns for
    /// `matches()`.
    pub fn evaluate<F>(&self, input: &RuleInput, limits: &ExpressionLimits, regex: F) -> Result<ExpressionOutcome, ExprError>
    where
        F: Fn(&str) -> Result<regex::Regex, String>,
    {
        let context = input
            .context
            .iter()
            .map(|(k, v)| (k.clone(), Value::Str(v.clone())))
            .collect();
        let mut interp = Interp {
            fuel: limits.max_steps,
            max_value_len: limits.max_value_len,
            vars: HashMap::new(),
            question: Value::Str(input.question.clone()),
            hypothesis: Value::Str(input.hypothesis.clone()),
            context: Value::Map(context),
            regex: &regex,
        };

        let mut passed: Option<bool> = None;
        let mut confidence: Option<f64> = None;
        let mut output = Value::Null;
        let mut last = Value::Null;

        for stmt in &self.stmts {
            match stmt {
                Stmt::Let(name, e) => {
                    let v = interp.eval(e)?;
                    interp.vars.insert(name.clone(), v);
                }
                Stmt::Reassign(name, e) => {
                    if !interp.vars.contains_key(name) {
                        return Err(eval_err(format!("assignment to undeclared variable '{name}'")));
                    }
                    let v = interp.eval(e)?;
                    interp.vars.insert(name.clone(), v);
                }
                Stmt::Set(Target::Passed, e) => passed = Some(interp.eval(e)?.truthy()),
                Stmt::Set(Target::Confidence, e) => {
                    let v = interp.eval(e)?;
                    let n = match v {
                        Value::Bool(b) => f64::from(u8::from(b)),
                        other => other.as_num("confidence")?,
                    };
                    confidence = Some(n);
                }
                Stmt::Set(Target::Output, e) => output = interp.eval(e)?,
                Stmt::Expr(e) => last = interp.eval(e)?,
            }
        }

        let passed = passed.unwrap_or_else(|| last.truthy());
        let confidence = confidence.map_or(if passed { 1.0 } else { 0.0 }, crate::confidence::clamp);
        Ok(ExpressionOutcome {
            passed,
            confidence,
            output: output.to_json(),
        })
    }
}

/// Bytes of built value paid for by one step of fuel.
const BYTES_PER_STEP: usize = 64;

struct Interp<'a, F> {
    fuel: usize,
    max_value_len: usize,
    vars: HashMap<String, Value>,
    question: Value,
    hypothesis: Value,
    context: Value,
    regex: &'a F,
}

impl<F> Interp<'_, F>
where
    F: Fn(&str) -> Result<regex::Regex, String>,
{
    fn burn(&mut self) -> Result<(), ExprError> {
        if self.fuel == 0 {
            return Err(ExprError::LimitExceeded { limit: "max_steps" });
        }
        self.fuel -= 1;
        Ok(())
    }

    fn eval(&mut self, expr: &Expr) -> Result<Value, ExprError> {
        self.burn()?;
        match expr {
            Expr::Lit(v) => Ok(v.clone()),
            Expr::Var(name) => match name.as_str() {
                "question" => Ok(self.question.clone()),
                "hypothesis" => Ok(self.hypothesis.clone()),
                "context" => Ok(self.context.clone()),
                _ => self
                    .vars
                    .get(name)
                    .cloned()
                    .ok_or_else(|| eval_err(format!("undefined variable '{name}'"))),
            },
            Expr::List(items) => {
                let mut out = Vec::with_capacity(items.len());
                for item in items {
                    out.push(self.eval(item)?);
                }
                self.built(Value::List(out))
            }
            Expr::Field(inner, field) => match self.eval(inner)? {
                Value::Map(map) => Ok(map.get(field).cloned().unwrap_or(Value::Null)),
                other => Err(eval_err(format!("cannot read field '{field}' of {}", other.type_name()))),
            },
            Expr::Index(inner, index) => {
                let target = self.eval(inner)?;
                let index = self.eval(index)?;
                index_value(&target, &index)
            }
            Expr::Unary(UnOp::Not, inner) => Ok(Value::Bool(!self.eval(inner)?.truthy())),
            Expr::Unary(UnOp::Neg, inner) => Ok(Value::Num(-self.eval(inner)?.as_num("'-'")?)),
            Expr::Binary(BinOp::And, a, b) => {
                let lhs = self.eval(a)?.truthy();
                Ok(Value::Bool(lhs && self.eval(b)?.truthy()))
            }
            Expr::Binary(BinOp::Or, a, b) => {
                let lhs = self.eval(a)?.truthy();
                Ok(Value::Bool(lhs || self.eval(b)?.truthy()))
            }
            Expr::Binary(op, a, b) => {
                let lhs = self.eval(a)?;
                let rhs = self.eval(b)?;
                if *op == BinOp::Add {
                    self.check_len(lhs.weight().saturating_add(rhs.weight()))?;
                    let sum = binary(*op, &lhs, &rhs)?;
                    self.built(sum)
                } else {
                    binary(*op, &lhs, &rhs)
                }
            }
            Expr::Call(name, args) if name == "if" => {
                let [cond, then, otherwise] = args.as_slice() else {
                    return Err(eval_err("if() takes 3 arguments"));
                };
                if self.eval(cond)?.truthy() {
                    self.eval(then)
                } else {
                    self.eval(otherwise)
                }
            }
            Expr::Call(name, args) => {
                let mut values = Vec::with_capacity(args.len());
                for arg in args {
                    values.push(self.eval(arg)?);
                }
                self.call(name, &values)
            }
        }
    }

    #[allow(clippy::cast_precision_loss)]
    fn call(&mut self, name: &str, args: &[Value]) -> Result<Value, ExprError> {
        let arity = |n: usize| -> Result<(), ExprError> {
            if args.len() == n {
                Ok(())
            } else {
                Err(eval_err(format!("{name}() takes {n} argument(s), got {}", args.len())))
            }
        };

        match name {
            "len" => {
                arity(1)?;
                let n = match &args[0] {
                    Value::Str(s) => s.chars().count(),
                    Value::List(items) => items.len(),
                    Value::Map(map) => map.len(),
                    other => return Err(eval_err(format!("len() of {}", other.type_name()))),
                };
                Ok(Value::Num(n as f64))
            }
            "lower" => {
                arity(1)?;
                let lowered = Value::Str(args[0].as_str("lower()")?.to_lowercase());
                self.built(lowered)
            }
            "upper" => {
                arity(1)?;
                let raised = Value::Str(args[0].as_str("upper()")?.to_uppercase());
                self.built(raised)
            }
            "contains" => {
                arity(2)?;
                binary(BinOp::In, &args[1], &args[0])
            }
            "starts_with" => {
                arity(2)?;
                Ok(Value::Bool(args[0].as_str("starts_with()")?.starts_with(args[1].as_str("starts_with()")?)))
            }
            "ends_with" => {
                arity(2)?;
                Ok(Value::Bool(args[0].as_str("ends_with()")?.ends_with(args[1].as_str("ends_with()")?)))
            }
            "matches" => {
                arity(2)?;
                let re = (self.regex)(args[1].as_str("matches()")?).map_err(eval_err)?;
                Ok(Value::Bool(re.is_match(args[0].as_str("matches()")?)))
            }
            "count" => {
                arity(2)?;
                let n = match (&args[0], &args[1]) {
                    (Value::Str(_), Value::Str(needle)) if needle.is_empty() => 0,
                    (Value::Str(hay), Value::Str(needle)) => hay.matches(needle.as_str()).count(),
                    (Value::List(items), needle) => items.iter().filter(|v| *v == needle).count(),
                    (a, b) => return Err(eval_err(format!("count() of {} and {}", a.type_name(), b.type_name()))),
                };
                Ok(Value::Num(n as f64))
            }
            "words" => {
                arity(1)?;
                let words = args[0]
                    .as_str("words()")?
                    .split_whitespace()
                    .map(|w| Value::Str(w.to_string()))
                    .collect::<Vec<_>>();
                self.charge(words.len())?;
                Ok(Value::List(words))
            }
            "min" | "max" => {
                let nums = numeric_args(name, args)?;
                let folded = nums.iter().copied().reduce(|a, b| if name == "min" { a.min(b) } else { a.max(b) });
                folded
                    .map(Value::Num)
                    .ok_or_else(|| eval_err(format!("{name}() needs at least one number")))
            }
            "abs" => {
                arity(1)?;
                Ok(Value::Num(args[0].as_num("abs()")?.abs()))
            }
            "number" => {
                arity(1)?;
                match &args[0] {
                    Value::Num(n) => Ok(Value::Num(*n)),
                    Value::Bool(b) => Ok(Value::Num(f64::from(u8::from(*b)))),
                    Value::Str(s) => s
                        .trim()
                        .parse::<f64>()
                        .map(Value::Num)
                        .map_err(|_| eval_err(format!("number() cannot parse '{s}'"))),
                    other => Err(eval_err(format!("number() of {}", other.type_name()))),
                }
            }
            "str" => {
                arity(1)?;
                let text = Value::Str(args[0].to_string());
                self.built(text)
            }
            "contains_any" | "count_any" => {
                arity(2)?;
                let hay = args[0].as_str(name)?.to_lowercase();
                let Value::List(needles) = &args[1] else {
                    return Err(eval_err(format!("{name}() expects a list as second argument")));
                };
                self.charge(needles.len())?;
                let mut hits = 0usize;
                for needle in needles {
                    let needle = needle.as_str(name)?.to_lowercase();
                    if !needle.is_empty() && hay.contains(&needle) {
                        hits += 1;
                    }
                }
                if name == "contains_any" {
                    Ok(Value::Bool(hits > 0))
                } else {
                    Ok(Value::Num(hits as f64))
                }
            }
            other => Err(eval_err(format!("unknown function '{other}'"))),
        }
    }

    fn check_len(&self, len: usize) -> Result<(), ExprError> {
        if len > self.max_value_len {
            return Err(ExprError::LimitExceeded { limit: "max_value_len" });
        }
        Ok(())
    }

    /// Admits a freshly built value: bounded by `max_value_len`, paid for in
    /// proportion to its size.
    fn built(&mut self, value: Value) -> Result<Value, ExprError> {
        let weight = value.weight();
        self.check_len(weight)?;
        self.charge(weight / BYTES_PER_STEP)?;
        Ok(value)
    }

    fn charge(&mut self, units: usize) -> Result<(), ExprError> {
        if units > self.fuel {
            self.fuel = 0;
            return Err(ExprError::LimitExceeded { limit: "max_steps" });
        }
        self.fuel -= units;
        Ok(())
    }
}

fn numeric_args(name: &str, args: &[Value]) -> Result<Vec<f64>, ExprError> {
    match args {
        [Value::List(items)] => items.iter().map(|v| v.as_num(name)).collect(),
        _ => args.iter().map(|v| v.as_num(name)).collect(),
    }
}

fn index_value(target: &Value, index: &Value) -> Result<Value, ExprError> {
    match (target, index) {
        (Value::Map(map), Value::Str(key)) => Ok(map.get(key).cloned().unwrap_or(Value::Null)),
        (Value::List(items), Value::Num(n)) => {
            if *n < 0.0 || n.fract() != 0.0 {
                return Err(eval_err(format!("invalid list index {n}")));
            }
            #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            let i = *n as usize;
            Ok(items.get(i).cloned().unwrap_or(Value::Null))
        }
        (t, i) => Err(eval_err(format!("cannot index {} with {}", t.type_name(), i.type_name()))),
    }
}

fn binary(op: BinOp, lhs: &Value, rhs: &Value) -> Result<Value, ExprError> {
    use Value::{Bool, List, Map, Num, Str};
    match op {
        BinOp::Eq => Ok(Bool(lhs == rhs)),
        BinOp::Ne => Ok(Bool(lhs != rhs)),
        BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge => {
            let ord = match (lhs, rhs) {
                (Num(a), Num(b)) => a.partial_cmp(b),
                (Str(a), Str(b)) => Some(a.cmp(b)),
                (a, b) => {
                    return Err(eval_err(format!("cannot compare {} with {}", a.type_name(), b.type_name())));
                }
            };
            let Some(ord) = ord else {
                return Ok(Bool(false));
            };
            Ok(Bool(match op {
                BinOp::Lt => ord.is_lt(),
                BinOp::Le => ord.is_le(),
                BinOp::Gt => ord.is_gt(),
                _ => ord.is_ge(),
            }))
        }
        BinOp::In => match rhs {
            Str(hay) => Ok(Bool(hay.contains(lhs.as_str("'in'")?))),
            List(items) => Ok(Bool(items.contains(lhs))),
            Map(map) => Ok(Bool(map.contains_key(lhs.as_str("'in'")?))),
            other => Err(eval_err(format!("'in' cannot search a {}", other.type_name()))),
        },
        BinOp::Add => match (lhs, rhs) {
            (Num(a), Num(b)) => Ok(Num(a + b)),
            (Str(a), b) => Ok(Str(format!("{a}{b}"))),
            (a, Str(b)) => Ok(Str(format!("{a}{b}"))),
            (List(a), List(b)) => Ok(List(a.iter().chain(b).cloned().collect())),
            (a, b) => Err(eval_err(format!("cannot add {} and {}", a.type_name(), b.type_name()))),
        },
        BinOp::Sub | BinOp::Mul | BinOp::Div => {
            let a = lhs.as_num("arithmetic")?;
            let b = rhs.as_num("arithmetic")?;
            match op {
                BinOp::Sub => Ok(Num(a - b)),
                BinOp::Mul => Ok(Num(a * b)),
                _ if b == 0.0 => Err(eval_err("division by zero")),
                _ => Ok(Num(a / b)),
            }
        }
        BinOp::And | BinOp::Or => Ok(Bool(if op == BinOp::And {
            lhs.truthy() && rhs.truthy()
        } else {
            lhs.truthy() || rhs.truthy()
        })),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(src: &str, input: &RuleInput) -> Result<ExpressionOutcome, ExprError> {
        let limits = ExpressionLimits::default();
        let program = Program::parse(src, &limits)?;
        program.evaluate(input, &limits, |p| regex::Regex::new(p).map_err(|e| e.to_string()))
    }

    #[test]
    fn explicit_outputs() {
        let input = RuleInput::new("Is the contract breached?", "Yes, breach of contract");
        let src = r#"
            let hits = count_any(question + " " + hypothesis, ["contract", "breach", "tort"]);
            passed = hits >= 2;
            confidence = hits / 3;
            output = "hits=" + str(hits)
        "#;
        let out = run(src, &input).unwrap();
        assert!(out.passed);
        assert!((out.confidence - 2.0 / 3.0).abs() < 1e-9);
        assert_eq!(out.output, serde_json::json!("hits=2"));
    }

    #[test]
    fn last_expression_decides_when_passed_unset() {
        let input = RuleInput::new("hello world", "");
        let out = run("len(words(question)) == 2", &input).unwrap();
        assert!(out.passed);
        assert_eq!(out.confidence, 1.0);

        let out = run("'xyz' in question", &input).unwrap();
        assert!(!out.passed);
        assert_eq!(out.confidence, 0.0);
    }

    #[test]
    fn confidence_is_clamped() {
        let input = RuleInput::new("q", "");
        let out = run("passed = true; confidence = 7", &input).unwrap();
        assert_eq!(out.confidence, 1.0);
    }

    #[test]
    fn context_access() {
        let input = RuleInput::new("q", "").with_context("domain", "finance");
        let out = run("context.domain == 'finance' && context['missing'] == null", &input).unwrap();
        assert!(out.passed);
    }

    #[test]
    fn builtins() {
        let input = RuleInput::new("Refund Request 42", "");
        assert!(run("matches(question, '[0-9]+')", &input).unwrap().passed);
        assert!(run("starts_with(lower(question), 'refund')", &input).unwrap().passed);
        assert!(run("max(1, 5, 3) == 5 && min([4, 2]) == 2 && abs(-2) == 2", &input).unwrap().passed);
        assert!(run("number('3.5') + 1 == 4.5", &input).unwrap().passed);
        assert!(run("if(len(question) > 100, false, true)", &input).unwrap().passed);
        assert!(run("count('a-a-a', 'a') == 3 && contains([1, 2], 2)", &input).unwrap().passed);
        assert!(run("upper('x') == 'X' && ends_with(question, '42')", &input).unwrap().passed);
    }

    #[test]
    fn read_only_bindings_are_rejected() {
        let limits = ExpressionLimits::default();
        assert!(matches!(Program::parse("question = 'x'", &limits), Err(ExprError::Parse { .. })));
        assert!(matches!(Program::parse("let context = 1", &limits), Err(ExprError::Parse { .. })));
    }

    #[test]
    fn unknown_functions_and_syntax_errors_fail_to_parse() {
        let limits = ExpressionLimits::default();
        assert!(Program::parse("import('os')", &limits).is_err());
        assert!(Program::parse("1 +", &limits).is_err());
        assert!(Program::parse("'unterminated", &limits).is_err());
        assert!(Program::parse("", &limits).is_err());
        assert!(Program::parse("a b", &limits).is_err());
    }

    #[test]
    fn runtime_errors_are_reported() {
        let input = RuleInput::new("q", "");
        assert!(matches!(run("1 / 0", &input), Err(ExprError::Eval { .. })));
        assert!(matches!(run("undefined_var", &input), Err(ExprError::Eval { .. })));
        assert!(matches!(run("x = 1", &input), Err(ExprError::Eval { .. })));
        assert!(matches!(run("len(1)", &input), Err(ExprError::Eval { .. })));
    }

    #[test]
    fn limits_are_enforced() {
        let limits = ExpressionLimits {
            max_source_len: 16,
            max_depth: 4,
            max_steps: 10,
            ..ExpressionLimits::default()
        };
        assert_eq!(
            Program::parse("question == 'a very long string'", &limits),
            Err(ExprError::LimitExceeded {
                limit: "max_source_len"
            })
        );
        assert_eq!(
            Program::parse("((((((1))))))", &limits),
            Err(ExprError::LimitExceeded { limit: "max_depth" })
        );

        let program = Program::parse("1+1+1+1", &ExpressionLimits::default()).unwrap();
        let out = program.evaluate(&RuleInput::default(), &ExpressionLimits { max_steps: 3, ..limits }, |p| {
            regex::Regex::new(p).map_err(|e| e.to_string())
        });
        assert_eq!(out, Err(ExprError::LimitExceeded { limit: "max_steps" }));
    }

    #[test]
    fn repeated_doubling_hits_the_value_limit() {
        let input = RuleInput::new("q", "");
        let doubling = "s = s + s; ".repeat(24);
        let src = format!("let s = 'aaaaaaaa'; {doubling}output = len(s)");
        assert_eq!(
            run(&src, &input),
            Err(ExprError::LimitExceeded { limit: "max_value_len" })
        );

        let nested = "l = [l, l]; ".repeat(24);
        let src = format!("let l = [1]; {nested}output = len(l)");
        assert_eq!(
            run(&src, &input),
            Err(ExprError::LimitExceeded { limit: "max_value_len" })
        );

        let stringified = "s = str([s, s]); ".repeat(24);
        let src = format!("let s = 'ab'; {stringified}output = len(s)");
        assert_eq!(
            run(&src, &input),
            Err(ExprError::LimitExceeded { limit: "max_value_len" })
        );
    }

    #[test]
    fn large_values_cost_fuel() {
        let limits = ExpressionLimits {
            max_steps: 100,
            ..ExpressionLimits::default()
        };
        let src = format!("let s = '{}'; s = s + s; s = s + s; output = len(s)", "a".repeat(2048));
        let program = Program::parse(&src, &ExpressionLimits::default()).unwrap();
        let out = program.evaluate(&RuleInput::default(), &limits, |p| {
            regex::Regex::new(p).map_err(|e| e.to_string())
        });
        assert_eq!(out, Err(ExprError::LimitExceeded { limit: "max_steps" }));

        let out = program
            .evaluate(&RuleInput::default(), &ExpressionLimits::default(), |p| {
                regex::Regex::new(p).map_err(|e| e.to_string())
            })
            .unwrap();
        assert_eq!(out.output, serde_json::json!(8192.0));
    }

    #[test]
    fn deep_nesting_does_not_overflow() {
        let src = "(".repeat(2000) + "1" + &")".repeat(2000);
        let limits = ExpressionLimits::default();
        assert_eq!(
            Program::parse(&src, &limits),
            Err(ExprError::LimitExceeded { limit: "max_depth" })
        );
    }
}
