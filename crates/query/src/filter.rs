//! Criteria tree: field comparisons combined by AND/OR/NOT.
//!
//! A filter describes *what* to select without saying *how*. It can be
//! evaluated directly against a JSON document (in-memory mode) or carried
//! inside a compiled [`crate::plan::QueryPlan`] for a storage backend to
//! interpret. Evaluation is pure: the same filter against the same input
//! always yields the same answer.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// Comparison operator for a single criteria node.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompareOp {
    Eq,
    Neq,
    Gt,
    Gte,
    Lt,
    Lte,
    /// Membership in an array value.
    In,
    /// SQL-style pattern with `%` (any run) and `_` (single char).
    Like,
}

/// A composable predicate over JSON documents.
///
/// Combinators consume their inputs and return new trees; no node is ever
/// mutated in place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Filter {
    Compare {
        field: String,
        op: CompareOp,
        value: JsonValue,
    },
    And(Vec<Filter>),
    Or(Vec<Filter>),
    Not(Box<Filter>),
}

impl Filter {
    pub fn compare(field: impl Into<String>, op: CompareOp, value: JsonValue) -> Self {
        Filter::Compare {
            field: field.into(),
            op,
            value,
        }
    }

    /// Conjunction. Flattens left-associated chains for readability of the
    /// resulting tree; semantics are unaffected.
    pub fn and(self, other: Filter) -> Filter {
        match self {
            Filter::And(mut parts) => {
                parts.push(other);
                Filter::And(parts)
            }
            left => Filter::And(vec![left, other]),
        }
    }

    pub fn or(self, other: Filter) -> Filter {
        match self {
            Filter::Or(mut parts) => {
                parts.push(other);
                Filter::Or(parts)
            }
            left => Filter::Or(vec![left, other]),
        }
    }

    pub fn not(self) -> Filter {
        Filter::Not(Box::new(self))
    }

    /// Evaluate this filter against a JSON document.
    ///
    /// A field absent from the document evaluates as JSON `null`.
    pub fn matches(&self, doc: &JsonValue) -> bool {
        match self {
            Filter::Compare { field, op, value } => {
                let actual = doc.get(field).unwrap_or(&JsonValue::Null);
                compare(actual, *op, value)
            }
            Filter::And(parts) => parts.iter().all(|f| f.matches(doc)),
            Filter::Or(parts) => parts.iter().any(|f| f.matches(doc)),
            Filter::Not(inner) => !inner.matches(doc),
        }
    }
}

fn compare(actual: &JsonValue, op: CompareOp, expected: &JsonValue) -> bool {
    match op {
        CompareOp::Eq => json_eq(actual, expected),
        CompareOp::Neq => !json_eq(actual, expected),
        CompareOp::Gt => matches!(json_cmp(actual, expected), Some(Ordering::Greater)),
        CompareOp::Gte => matches!(
            json_cmp(actual, expected),
            Some(Ordering::Greater | Ordering::Equal)
        ),
        CompareOp::Lt => matches!(json_cmp(actual, expected), Some(Ordering::Less)),
        CompareOp::Lte => matches!(
            json_cmp(actual, expected),
            Some(Ordering::Less | Ordering::Equal)
        ),
        CompareOp::In => match expected {
            JsonValue::Array(candidates) => candidates.iter().any(|c| json_eq(actual, c)),
            _ => false,
        },
        CompareOp::Like => match (actual, expected) {
            (JsonValue::String(text), JsonValue::String(pattern)) => like_match(text, pattern),
            _ => false,
        },
    }
}

/// Equality with numeric widening (1 == 1.0).
pub(crate) fn json_eq(a: &JsonValue, b: &JsonValue) -> bool {
    match (a, b) {
        (JsonValue::Number(x), JsonValue::Number(y)) => match (x.as_f64(), y.as_f64()) {
            (Some(xf), Some(yf)) => xf == yf,
            _ => x == y,
        },
        _ => a == b,
    }
}

/// Ordering over comparable JSON scalars; `None` for incomparable pairs.
pub(crate) fn json_cmp(a: &JsonValue, b: &JsonValue) -> Option<Ordering> {
    match (a, b) {
        (JsonValue::Number(x), JsonValue::Number(y)) => {
            x.as_f64()?.partial_cmp(&y.as_f64()?)
        }
        (JsonValue::String(x), JsonValue::String(y)) => Some(x.cmp(y)),
        (JsonValue::Bool(x), JsonValue::Bool(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

fn like_match(text: &str, pattern: &str) -> bool {
    fn go(text: &[char], pat: &[char]) -> bool {
        match pat.split_first() {
            None => text.is_empty(),
            Some((&'%', rest)) => (0..=text.len()).any(|skip| go(&text[skip..], rest)),
            Some((&'_', rest)) => !text.is_empty() && go(&text[1..], rest),
            Some((c, rest)) => text.first() == Some(c) && go(&text[1..], rest),
        }
    }

    let text: Vec<char> = text.chars().collect();
    let pattern: Vec<char> = pattern.chars().collect();
    go(&text, &pattern)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc() -> JsonValue {
        json!({
            "email": "a@b.com",
            "age": 30,
            "active": true,
            "plan": "premium",
        })
    }

    #[test]
    fn equality_and_inequality() {
        let eq = Filter::compare("email", CompareOp::Eq, json!("a@b.com"));
        assert!(eq.matches(&doc()));
        assert!(!Filter::compare("email", CompareOp::Eq, json!("x@y.com")).matches(&doc()));
        assert!(Filter::compare("email", CompareOp::Neq, json!("x@y.com")).matches(&doc()));
    }

    #[test]
    fn numeric_ordering() {
        assert!(Filter::compare("age", CompareOp::Gte, json!(18)).matches(&doc()));
        assert!(Filter::compare("age", CompareOp::Lt, json!(31)).matches(&doc()));
        assert!(!Filter::compare("age", CompareOp::Gt, json!(30)).matches(&doc()));
        // Integral vs float widening.
        assert!(Filter::compare("age", CompareOp::Eq, json!(30.0)).matches(&doc()));
    }

    #[test]
    fn missing_field_evaluates_as_null() {
        assert!(!Filter::compare("nickname", CompareOp::Eq, json!("x")).matches(&doc()));
        assert!(Filter::compare("nickname", CompareOp::Neq, json!("x")).matches(&doc()));
        assert!(Filter::compare("nickname", CompareOp::Eq, json!(null)).matches(&doc()));
        assert!(!Filter::compare("nickname", CompareOp::Gt, json!(1)).matches(&doc()));
    }

    #[test]
    fn membership() {
        let spec = Filter::compare("plan", CompareOp::In, json!(["basic", "premium"]));
        assert!(spec.matches(&doc()));
        assert!(!Filter::compare("plan", CompareOp::In, json!(["basic"])).matches(&doc()));
        // Non-array expected value never matches.
        assert!(!Filter::compare("plan", CompareOp::In, json!("premium")).matches(&doc()));
    }

    #[test]
    fn like_patterns() {
        let m = |pattern: &str| {
            Filter::compare("email", CompareOp::Like, json!(pattern)).matches(&doc())
        };
        assert!(m("a@b.com"));
        assert!(m("%@b.com"));
        assert!(m("a@%"));
        assert!(m("_@b.com"));
        assert!(m("%"));
        assert!(!m("b@%"));
        assert!(!m("a@b.co_m"));
    }

    #[test]
    fn boolean_composition() {
        let adult = Filter::compare("age", CompareOp::Gte, json!(18));
        let premium = Filter::compare("plan", CompareOp::Eq, json!("premium"));
        let inactive = Filter::compare("active", CompareOp::Eq, json!(false));

        assert!(adult.clone().and(premium.clone()).matches(&doc()));
        assert!(!adult.clone().and(inactive.clone()).matches(&doc()));
        assert!(adult.clone().or(inactive.clone()).matches(&doc()));
        assert!(inactive.clone().not().matches(&doc()));
        // Double negation restores the original answer.
        assert_eq!(
            adult.clone().not().not().matches(&doc()),
            adult.matches(&doc())
        );
    }

    #[test]
    fn and_flattens_left_associated_chains() {
        let a = Filter::compare("a", CompareOp::Eq, json!(1));
        let b = Filter::compare("b", CompareOp::Eq, json!(2));
        let c = Filter::compare("c", CompareOp::Eq, json!(3));
        match a.and(b).and(c) {
            Filter::And(parts) => assert_eq!(parts.len(), 3),
            other => panic!("expected And, got {other:?}"),
        }
    }
}
