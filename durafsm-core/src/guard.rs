//! Transition guards.
//!
//! A guard is a pure predicate over the instance and the submitted payload.
//! Any `Fn(&Instance, &Value) -> bool` is a guard; definitions loaded from
//! JSON or YAML use the expression language below.
//!
//! - `payload.field` / `payload.a.b` - truthiness of a payload field
//! - `instance.id`, `instance.state` - the instance being transitioned
//! - `==`, `!=` against strings, numbers, booleans or `null`
//! - `>`, `>=`, `<`, `<=` against numbers
//! - `!expr`, `expr && expr`, `expr || expr`, `(expr)`
//!
//! `&&` binds tighter than `||`. Missing fields read as `null`.
//!
//! ```text
//! payload.pages > 20 || payload.long
//! instance.state == "uploaded" && !payload.draft
//! ```

use crate::error::CoreError;
use crate::instance::Instance;
use serde_json::Value;
use std::fmt;

/// A pure predicate gating a transition.
pub trait Guard: Send + Sync {
    fn check(&self, instance: &Instance, payload: &Value) -> bool;

    /// Human-readable form for logs and debug output.
    fn describe(&self) -> String {
        "<predicate>".to_string()
    }
}

impl<F> Guard for F
where
    F: Fn(&Instance, &Value) -> bool + Send + Sync,
{
    fn check(&self, instance: &Instance, payload: &Value) -> bool {
        self(instance, payload)
    }
}

/// Where a field path starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Root {
    Payload,
    Instance,
}

/// A dotted path such as `payload.review.score`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldPath {
    pub root: Root,
    pub segments: Vec<String>,
}

impl FieldPath {
    fn resolve(&self, instance: &Instance, payload: &Value) -> Value {
        match self.root {
            Root::Instance => match self.segments.as_slice() {
                [field] if field == "id" => Value::String(instance.id.clone()),
                [field] if field == "state" => Value::String(instance.state.clone()),
                _ => Value::Null,
            },
            Root::Payload => {
                let mut current = payload;
                for segment in &self.segments {
                    match current.get(segment.as_str()) {
                        Some(next) => current = next,
                        None => return Value::Null,
                    }
                }
                current.clone()
            }
        }
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let root = match self.root {
            Root::Payload => "payload",
            Root::Instance => "instance",
        };
        write!(f, "{}.{}", root, self.segments.join("."))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
}

impl CmpOp {
    fn symbol(self) -> &'static str {
        match self {
            CmpOp::Eq => "==",
            CmpOp::Ne => "!=",
            CmpOp::Gt => ">",
            CmpOp::Ge => ">=",
            CmpOp::Lt => "<",
            CmpOp::Le => "<=",
        }
    }
}

/// A parsed guard expression.
#[derive(Debug, Clone, PartialEq)]
pub enum GuardExpr {
    /// Field is truthy.
    Test(FieldPath),
    Compare(FieldPath, CmpOp, Value),
    And(Box<GuardExpr>, Box<GuardExpr>),
    Or(Box<GuardExpr>, Box<GuardExpr>),
    Not(Box<GuardExpr>),
}

impl GuardExpr {
    pub fn parse(source: &str) -> Result<Self, CoreError> {
        let source = source.trim();
        if source.is_empty() {
            return Err(invalid("empty guard expression"));
        }
        let mut parser = Parser { input: source, pos: 0 };
        let expr = parser.or_expr()?;
        parser.skip_ws();
        if parser.pos != source.len() {
            return Err(invalid(format!(
                "unexpected input at column {}: '{}'",
                parser.pos + 1,
                &source[parser.pos..]
            )));
        }
        Ok(expr)
    }

    pub fn evaluate(&self, instance: &Instance, payload: &Value) -> bool {
        match self {
            GuardExpr::Test(path) => is_truthy(&path.resolve(instance, payload)),
            GuardExpr::Compare(path, op, expected) => {
                compare(&path.resolve(instance, payload), *op, expected)
            }
            GuardExpr::And(l, r) => l.evaluate(instance, payload) && r.evaluate(instance, payload),
            GuardExpr::Or(l, r) => l.evaluate(instance, payload) || r.evaluate(instance, payload),
            GuardExpr::Not(inner) => !inner.evaluate(instance, payload),
        }
    }
}

impl fmt::Display for GuardExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GuardExpr::Test(path) => write!(f, "{}", path),
            GuardExpr::Compare(path, op, value) => write!(f, "{} {} {}", path, op.symbol(), value),
            GuardExpr::And(l, r) => write!(f, "({} && {})", l, r),
            GuardExpr::Or(l, r) => write!(f, "({} || {})", l, r),
            GuardExpr::Not(inner) => write!(f, "!{}", inner),
        }
    }
}

impl Guard for GuardExpr {
    fn check(&self, instance: &Instance, payload: &Value) -> bool {
        self.evaluate(instance, payload)
    }

    fn describe(&self) -> String {
        self.to_string()
    }
}

/// Inverts another guard. Backs `unless` clauses.
pub struct Unless<G>(pub G);

impl<G: Guard> Guard for Unless<G> {
    fn check(&self, instance: &Instance, payload: &Value) -> bool {
        !self.0.check(instance, payload)
    }

    fn describe(&self) -> String {
        format!("unless {}", self.0.describe())
    }
}

fn invalid(reason: impl Into<String>) -> CoreError {
    CoreError::InvalidGuard {
        reason: reason.into(),
    }
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

fn compare(actual: &Value, op: CmpOp, expected: &Value) -> bool {
    let ordered = |test: fn(f64, f64) -> bool| match (actual.as_f64(), expected.as_f64()) {
        (Some(a), Some(b)) => test(a, b),
        _ => false,
    };
    match op {
        CmpOp::Eq => loosely_equal(actual, expected),
        CmpOp::Ne => !loosely_equal(actual, expected),
        CmpOp::Gt => ordered(|a, b| a > b),
        CmpOp::Ge => ordered(|a, b| a >= b),
        CmpOp::Lt => ordered(|a, b| a < b),
        CmpOp::Le => ordered(|a, b| a <= b),
    }
}

fn loosely_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => match (x.as_f64(), y.as_f64()) {
            (Some(x), Some(y)) => (x - y).abs() < f64::EPSILON,
            _ => false,
        },
        (Value::Null, Value::Null) => true,
        (Value::Bool(x), Value::Bool(y)) => x == y,
        (Value::String(x), Value::String(y)) => x == y,
        _ => false,
    }
}

/// Recursive descent over the raw string.
struct Parser<'a> {
    input: &'a str,
    pos: usize,
}

impl Parser<'_> {
    fn or_expr(&mut self) -> Result<GuardExpr, CoreError> {
        let mut left = self.and_expr()?;
        while self.eat("||") {
            let right = self.and_expr()?;
            left = GuardExpr::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn and_expr(&mut self) -> Result<GuardExpr, CoreError> {
        let mut left = self.unary()?;
        while self.eat("&&") {
            let right = self.unary()?;
            left = GuardExpr::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn unary(&mut self) -> Result<GuardExpr, CoreError> {
        self.skip_ws();
        if self.rest().starts_with('!') && !self.rest().starts_with("!=") {
            self.pos += 1;
            return Ok(GuardExpr::Not(Box::new(self.unary()?)));
        }
        if self.eat("(") {
            let inner = self.or_expr()?;
            if !self.eat(")") {
                return Err(invalid("expected ')'"));
            }
            return Ok(inner);
        }
        self.comparison()
    }

    fn comparison(&mut self) -> Result<GuardExpr, CoreError> {
        let path = self.path()?;
        // Two-character operators first so `>=` is not read as `>`.
        let op = [
            ("==", CmpOp::Eq),
            ("!=", CmpOp::Ne),
            (">=", CmpOp::Ge),
            ("<=", CmpOp::Le),
            (">", CmpOp::Gt),
            ("<", CmpOp::Lt),
        ]
        .into_iter()
        .find(|(symbol, _)| self.eat(symbol))
        .map(|(_, op)| op);

        let Some(op) = op else {
            return Ok(GuardExpr::Test(path));
        };
        let literal = self.literal()?;
        if !matches!(op, CmpOp::Eq | CmpOp::Ne) && !literal.is_number() {
            return Err(invalid(format!(
                "operator '{}' needs a number, got {}",
                op.symbol(),
                literal
            )));
        }
        Ok(GuardExpr::Compare(path, op, literal))
    }

    fn path(&mut self) -> Result<FieldPath, CoreError> {
        self.skip_ws();
        let start = self.pos;
        while let Some(c) = self.rest().chars().next() {
            if c.is_alphanumeric() || c == '_' || c == '.' {
                self.pos += c.len_utf8();
            } else {
                break;
            }
        }
        let raw = &self.input[start..self.pos];
        let mut parts = raw.split('.');
        let root = match parts.next() {
            Some("payload") => Root::Payload,
            Some("instance") => Root::Instance,
            _ => {
                return Err(invalid(format!(
                    "field '{}' must start with 'payload.' or 'instance.'",
                    raw
                )))
            }
        };
        let segments: Vec<String> = parts.map(str::to_string).collect();
        if segments.is_empty() || segments.iter().any(String::is_empty) {
            return Err(invalid(format!("malformed field path '{}'", raw)));
        }
        Ok(FieldPath { root, segments })
    }

    fn literal(&mut self) -> Result<Value, CoreError> {
        self.skip_ws();
        for (word, value) in [
            ("true", Value::Bool(true)),
            ("false", Value::Bool(false)),
            ("null", Value::Null),
        ] {
            if self.rest().starts_with(word) {
                self.pos += word.len();
                return Ok(value);
            }
        }
        if self.rest().starts_with('"') {
            return self.string();
        }
        self.number()
    }

    fn string(&mut self) -> Result<Value, CoreError> {
        self.pos += 1;
        let mut out = String::new();
        let mut chars = self.rest().char_indices();
        while let Some((i, c)) = chars.next() {
            match c {
                '"' => {
                    self.pos += i + 1;
                    return Ok(Value::String(out));
                }
                '\\' => match chars.next() {
                    Some((_, escaped)) => out.push(escaped),
                    None => break,
                },
                other => out.push(other),
            }
        }
        Err(invalid("unterminated string"))
    }

    fn number(&mut self) -> Result<Value, CoreError> {
        let start = self.pos;
        let bytes = self.input.as_bytes();
        if bytes.get(self.pos) == Some(&b'-') {
            self.pos += 1;
        }
        while bytes
            .get(self.pos)
            .is_some_and(|b| b.is_ascii_digit() || *b == b'.')
        {
            self.pos += 1;
        }
        let text = &self.input[start..self.pos];
        text.parse::<f64>()
            .ok()
            .and_then(serde_json::Number::from_f64)
            .map(Value::Number)
            .ok_or_else(|| invalid(format!("invalid literal '{}'", text)))
    }

    fn eat(&mut self, token: &str) -> bool {
        self.skip_ws();
        if self.rest().starts_with(token) {
            self.pos += token.len();
            true
        } else {
            false
        }
    }

    fn skip_ws(&mut self) {
        let trimmed = self.rest().trim_start();
        self.pos = self.input.len() - trimmed.len();
    }

    fn rest(&self) -> &str {
        &self.input[self.pos..]
    }
}
