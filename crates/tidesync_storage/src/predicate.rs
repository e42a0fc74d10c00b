//! Filter expressions over records.

use crate::error::StorageResult;
use crate::record::Record;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cmp::Ordering;

/// Comparison operator of a single-field predicate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComparisonOp {
    /// Equal.
    Eq,
    /// Not equal.
    Ne,
    /// Less than.
    Lt,
    /// Less than or equal.
    Le,
    /// Greater than.
    Gt,
    /// Greater than or equal.
    Ge,
}

/// A filter expression usable by [`crate::Storage::query`] and
/// [`crate::Storage::delete_where`], and as a conditional-write guard.
///
/// A serialized predicate is always a non-empty JSON object such as
/// `{"compare":{"field":"id","op":"eq","value":"a"}}`. The empty object `{}`
/// is reserved to mean "no condition".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Predicate {
    /// `field op value`.
    Compare {
        /// Field name.
        field: String,
        /// Operator.
        op: ComparisonOp,
        /// Right-hand side.
        value: Value,
    },
    /// All children match.
    And(Vec<Predicate>),
    /// At least one child matches.
    Or(Vec<Predicate>),
    /// The child does not match.
    Not(Box<Predicate>),
}

impl Predicate {
    /// Creates a single-field comparison.
    pub fn compare(field: impl Into<String>, op: ComparisonOp, value: impl Into<Value>) -> Self {
        Self::Compare {
            field: field.into(),
            op,
            value: value.into(),
        }
    }

    /// `field == value`.
    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(field, ComparisonOp::Eq, value)
    }

    /// `field != value`.
    pub fn ne(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(field, ComparisonOp::Ne, value)
    }

    /// `field > value`.
    pub fn gt(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(field, ComparisonOp::Gt, value)
    }

    /// `field < value`.
    pub fn lt(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(field, ComparisonOp::Lt, value)
    }

    /// Conjunction with another predicate, flattening nested `And`s.
    #[must_use]
    pub fn and(self, other: Predicate) -> Self {
        let mut children = match self {
            Self::And(children) => children,
            single => vec![single],
        };
        match other {
            Self::And(more) => children.extend(more),
            single => children.push(single),
        }
        Self::And(children)
    }

    /// Returns true if the record satisfies this predicate.
    pub fn matches(&self, record: &Record) -> bool {
        match self {
            Self::Compare { field, op, value } => {
                let actual = record.get(field).unwrap_or(&Value::Null);
                compare(actual, *op, value)
            }
            Self::And(children) => children.iter().all(|p| p.matches(record)),
            Self::Or(children) => children.iter().any(|p| p.matches(record)),
            Self::Not(child) => !child.matches(record),
        }
    }

    /// Serializes the predicate for use as a mutation condition.
    pub fn to_condition_json(&self) -> StorageResult<String> {
        Ok(serde_json::to_string(self)?)
    }
}

fn compare(actual: &Value, op: ComparisonOp, expected: &Value) -> bool {
    match op {
        ComparisonOp::Eq => actual == expected,
        ComparisonOp::Ne => actual != expected,
        ComparisonOp::Lt => order(actual, expected) == Some(Ordering::Less),
        ComparisonOp::Le => matches!(
            order(actual, expected),
            Some(Ordering::Less | Ordering::Equal)
        ),
        ComparisonOp::Gt => order(actual, expected) == Some(Ordering::Greater),
        ComparisonOp::Ge => matches!(
            order(actual, expected),
            Some(Ordering::Greater | Ordering::Equal)
        ),
    }
}

fn order(left: &Value, right: &Value) -> Option<Ordering> {
    match (left, right) {
        (Value::Number(l), Value::Number(r)) => l.as_f64()?.partial_cmp(&r.as_f64()?),
        (Value::String(l), Value::String(r)) => Some(l.cmp(r)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn todo() -> Record {
        Record::new()
            .with_field("id", json!("t1"))
            .with_field("priority", json!(3))
            .with_field("title", json!("milk"))
    }

    #[test]
    fn equality_and_missing_fields() {
        let record = todo();
        assert!(Predicate::eq("id", "t1").matches(&record));
        assert!(!Predicate::eq("id", "t2").matches(&record));
        assert!(Predicate::ne("id", "t2").matches(&record));
        assert!(Predicate::eq("owner", Value::Null).matches(&record));
    }

    #[test]
    fn ordering_only_between_like_types() {
        let record = todo();
        assert!(Predicate::gt("priority", 2).matches(&record));
        assert!(Predicate::lt("priority", 3.5).matches(&record));
        assert!(Predicate::compare("priority", ComparisonOp::Ge, 3).matches(&record));
        assert!(!Predicate::gt("priority", "2").matches(&record));
        assert!(Predicate::compare("title", ComparisonOp::Le, "n").matches(&record));
    }

    #[test]
    fn and_flattens() {
        let p = Predicate::eq("id", "t1")
            .and(Predicate::gt("priority", 1))
            .and(Predicate::ne("title", "x"));
        match &p {
            Predicate::And(children) => assert_eq!(children.len(), 3),
            other => panic!("expected And, got {other:?}"),
        }
        assert!(p.matches(&todo()));
    }

    #[test]
    fn or_and_not() {
        let record = todo();
        let p = Predicate::Or(vec![Predicate::eq("id", "zz"), Predicate::eq("title", "milk")]);
        assert!(p.matches(&record));
        assert!(!Predicate::Not(Box::new(p)).matches(&record));
    }

    #[test]
    fn condition_json_is_a_non_empty_object() {
        let json = Predicate::eq("id", "t1").to_condition_json().unwrap();
        let parsed: serde_json::Map<String, Value> = serde_json::from_str(&json).unwrap();
        assert!(!parsed.is_empty());

        let back: Predicate = serde_json::from_str(&json).unwrap();
        assert_eq!(back, Predicate::eq("id", "t1"));
    }
}
