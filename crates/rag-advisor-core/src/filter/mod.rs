//! Portable metadata filter expressions.
//!
//! An [`Expression`] is a boolean tree of comparisons against chunk
//! metadata keys. It has a canonical text form (its `Display` output) that
//! [`parse`] accepts, so a filter can travel through an HTTP query string or
//! an advisor context as plain text:
//!
//! ```text
//! userId == 'u1' && conversationId == 'c1'
//! source IN ['a.pdf', 'b.pdf'] || NOT (year < 2020)
//! ```
//!
//! Stores that keep metadata as JSON evaluate filters with
//! [`Expression::matches`]. A comparison against a missing or `null` key is
//! false for `==`, ordering and `IN`, and true for `!=` and `NIN`.

mod parser;

pub use parser::{parse, FilterParseError};

use serde_json::Value as Json;
use std::cmp::Ordering;
use std::fmt;

use crate::models::Metadata;

/// A literal on the right-hand side of a comparison.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Str(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    List(Vec<Value>),
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Str(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(i64::from(v))
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
    In,
    Nin,
}

impl Op {
    pub fn symbol(self) -> &'static str {
        match self {
            Op::Eq => "==",
            Op::Ne => "!=",
            Op::Gt => ">",
            Op::Gte => ">=",
            Op::Lt => "<",
            Op::Lte => "<=",
            Op::In => "IN",
            Op::Nin => "NIN",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expression {
    Compare { key: String, op: Op, value: Value },
    And(Box<Expression>, Box<Expression>),
    Or(Box<Expression>, Box<Expression>),
    Not(Box<Expression>),
}

impl Expression {
    pub fn compare(key: impl Into<String>, op: Op, value: impl Into<Value>) -> Self {
        Expression::Compare {
            key: key.into(),
            op,
            value: value.into(),
        }
    }

    pub fn eq(key: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(key, Op::Eq, value)
    }

    pub fn and(self, other: Expression) -> Self {
        Expression::And(Box::new(self), Box::new(other))
    }

    pub fn or(self, other: Expression) -> Self {
        Expression::Or(Box::new(self), Box::new(other))
    }

    #[allow(clippy::should_implement_trait)]
    pub fn not(self) -> Self {
        Expression::Not(Box::new(self))
    }

    /// Evaluate the expression against a metadata map.
    pub fn matches(&self, metadata: &Metadata) -> bool {
        match self {
            Expression::Compare { key, op, value } => {
                compare(metadata.get(key).filter(|v| !v.is_null()), *op, value)
            }
            Expression::And(l, r) => l.matches(metadata) && r.matches(metadata),
            Expression::Or(l, r) => l.matches(metadata) || r.matches(metadata),
            Expression::Not(inner) => !inner.matches(metadata),
        }
    }
}

fn compare(actual: Option<&Json>, op: Op, expected: &Value) -> bool {
    let Some(actual) = actual else {
        return matches!(op, Op::Ne | Op::Nin);
    };
    match op {
        Op::Eq => json_eq(actual, expected),
        Op::Ne => !json_eq(actual, expected),
        Op::Gt => json_cmp(actual, expected) == Some(Ordering::Greater),
        Op::Gte => matches!(
            json_cmp(actual, expected),
            Some(Ordering::Greater | Ordering::Equal)
        ),
        Op::Lt => json_cmp(actual, expected) == Some(Ordering::Less),
        Op::Lte => matches!(
            json_cmp(actual, expected),
            Some(Ordering::Less | Ordering::Equal)
        ),
        Op::In => in_list(actual, expected),
        Op::Nin => !in_list(actual, expected),
    }
}

fn in_list(actual: &Json, expected: &Value) -> bool {
    match expected {
        Value::List(items) => items.iter().any(|item| json_eq(actual, item)),
        single => json_eq(actual, single),
    }
}

fn json_eq(actual: &Json, expected: &Value) -> bool {
    match (actual, expected) {
        (Json::String(a), Value::Str(b)) => a == b,
        (Json::Bool(a), Value::Bool(b)) => a == b,
        (Json::Number(a), Value::Int(_) | Value::Float(_)) => {
            a.as_f64() == expected_number(expected)
        }
        _ => false,
    }
}

fn json_cmp(actual: &Json, expected: &Value) -> Option<Ordering> {
    match (actual, expected) {
        (Json::String(a), Value::Str(b)) => Some(a.as_str().cmp(b.as_str())),
        (Json::Number(a), Value::Int(_) | Value::Float(_)) => {
            a.as_f64()?.partial_cmp(&expected_number(expected)?)
        }
        _ => None,
    }
}

fn expected_number(value: &Value) -> Option<f64> {
    match value {
        Value::Int(i) => Some(*i as f64),
        Value::Float(f) => Some(*f),
        _ => None,
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Str(s) => {
                f.write_str("'")?;
                for c in s.chars() {
                    match c {
                        '\'' => f.write_str("\\'")?,
                        '\\' => f.write_str("\\\\")?,
                        other => write!(f, "{}", other)?,
                    }
                }
                f.write_str("'")
            }
            Value::Int(i) => write!(f, "{}", i),
            Value::Float(x) => write!(f, "{:?}", x),
            Value::Bool(b) => write!(f, "{}", b),
            Value::List(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                f.write_str("]")
            }
        }
    }
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expression::Compare { key, op, value } => {
                write!(f, "{} {} {}", key, op.symbol(), value)
            }
            // Left-associative: a right-hand operand of the same operator,
            // and any OR under an AND, needs parentheses to parse back.
            Expression::And(l, r) => {
                write_operand(f, l, matches!(**l, Expression::Or(..)))?;
                f.write_str(" && ")?;
                write_operand(f, r, matches!(**r, Expression::Or(..) | Expression::And(..)))
            }
            Expression::Or(l, r) => {
                write_operand(f, l, false)?;
                f.write_str(" || ")?;
                write_operand(f, r, matches!(**r, Expression::Or(..)))
            }
            Expression::Not(inner) => write!(f, "NOT ({})", inner),
        }
    }
}

fn write_operand(f: &mut fmt::Formatter<'_>, expr: &Expression, wrap: bool) -> fmt::Result {
    if wrap {
        write!(f, "({})", expr)
    } else {
        write!(f, "{}", expr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn meta(value: Json) -> Metadata {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn equality_on_strings() {
        let m = meta(json!({"userId": "u1", "conversationId": "c1"}));
        assert!(Expression::eq("userId", "u1").matches(&m));
        assert!(!Expression::eq("userId", "u2").matches(&m));
        assert!(Expression::eq("userId", "u1")
            .and(Expression::eq("conversationId", "c1"))
            .matches(&m));
    }

    #[test]
    fn missing_or_null_keys_never_equal() {
        let m = meta(json!({"userId": null}));
        assert!(!Expression::eq("userId", "u1").matches(&m));
        assert!(!Expression::eq("conversationId", "c1").matches(&m));
        assert!(Expression::compare("userId", Op::Ne, "u1").matches(&m));
        assert!(Expression::compare("userId", Op::Nin, Value::List(vec!["u1".into()])).matches(&m));
    }

    #[test]
    fn numeric_comparisons_mix_int_and_float() {
        let m = meta(json!({"year": 2021, "score": 0.5}));
        assert!(Expression::compare("year", Op::Gte, 2021).matches(&m));
        assert!(Expression::compare("year", Op::Gt, 2020.5).matches(&m));
        assert!(!Expression::compare("year", Op::Lt, 2021).matches(&m));
        assert!(Expression::compare("score", Op::Lte, 0.5).matches(&m));
        assert!(Expression::eq("year", 2021.0).matches(&m));
        // strings never compare with numbers
        assert!(!Expression::compare("year", Op::Gt, "2000").matches(&m));
    }

    #[test]
    fn in_and_not() {
        let m = meta(json!({"source": "b.pdf"}));
        let list = Value::List(vec!["a.pdf".into(), "b.pdf".into()]);
        assert!(Expression::compare("source", Op::In, list.clone()).matches(&m));
        assert!(!Expression::compare("source", Op::Nin, list).matches(&m));
        assert!(Expression::eq("source", "a.pdf").not().matches(&m));
    }

    #[test]
    fn display_canonical_form() {
        let expr = Expression::eq("userId", "u1").and(Expression::eq("conversationId", "c1"));
        assert_eq!(expr.to_string(), "userId == 'u1' && conversationId == 'c1'");

        let expr = Expression::eq("a", 1)
            .or(Expression::eq("b", true))
            .and(Expression::compare("c", Op::In, Value::List(vec![1.5.into(), "x".into()])));
        assert_eq!(expr.to_string(), "(a == 1 || b == true) && c IN [1.5, 'x']");

        let expr = Expression::eq("name", "O'Brien").not();
        assert_eq!(expr.to_string(), r"NOT (name == 'O\'Brien')");
    }

    #[test]
    fn display_parses_back_to_equal_expression() {
        let exprs = vec![
            Expression::eq("a", 1).and(Expression::eq("b", 2).and(Expression::eq("c", 3))),
            Expression::eq("a", 1).or(Expression::eq("b", 2).or(Expression::eq("c", 3))),
            Expression::eq("a", "x\\y").or(Expression::eq("b", 2)).not(),
            Expression::compare("y", Op::Ne, -4).and(Expression::compare("z", Op::Lt, 0.25)),
        ];
        for expr in exprs {
            assert_eq!(parse(&expr.to_string()).unwrap(), expr, "{}", expr);
        }
    }
}
