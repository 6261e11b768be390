//! Value matchers.
//!
//! Composable predicates over a single projected value (a query parameter,
//! a header, the parsed body, a state entry, ...). A projection that does not
//! exist is passed as `None`, which only [`ValueMatcher::Absent`] and custom
//! predicates can accept.

use regex::Regex;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

/// Custom value predicate.
pub type ValuePredicate = Arc<dyn Fn(Option<&Value>) -> bool + Send + Sync>;

/// Numeric comparison operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparison {
    GreaterThan,
    GreaterThanOrEqual,
    LessThan,
    LessThanOrEqual,
}

impl Comparison {
    fn holds(self, actual: f64, expected: f64) -> bool {
        match self {
            Comparison::GreaterThan => actual > expected,
            Comparison::GreaterThanOrEqual => actual >= expected,
            Comparison::LessThan => actual < expected,
            Comparison::LessThanOrEqual => actual <= expected,
        }
    }

    fn symbol(self) -> &'static str {
        match self {
            Comparison::GreaterThan => ">",
            Comparison::GreaterThanOrEqual => ">=",
            Comparison::LessThan => "<",
            Comparison::LessThanOrEqual => "<=",
        }
    }
}

/// A predicate over one value.
///
/// Array semantics: when the actual value is an array (repeated query
/// parameters, multi-value headers), a matcher accepts it if it accepts the
/// whole array or any single element. An [`ValueMatcher::Equals`] whose
/// expected value is itself an array only ever compares element-wise against
/// the whole actual array, in order.
#[derive(Clone)]
pub enum ValueMatcher {
    /// Deep equality.
    Equals(Value),
    /// The value must not exist.
    Absent,
    /// Any of the sub-matchers accepts.
    AnyOf(Vec<ValueMatcher>),
    /// The sub-matcher rejects.
    Not(Box<ValueMatcher>),
    /// Numeric comparison; non-numeric values never match.
    Compare(Comparison, f64),
    /// Regex search over a string value.
    Regex(Regex),
    /// Every key of the expected object is present with a matching value.
    Subset(Value),
    /// Arbitrary predicate.
    Predicate(ValuePredicate),
}

impl ValueMatcher {
    /// Check the matcher against a projected value.
    pub fn matches(&self, actual: Option<&Value>) -> bool {
        match self {
            ValueMatcher::Absent => actual.is_none(),
            ValueMatcher::AnyOf(matchers) => matchers.iter().any(|m| m.matches(actual)),
            ValueMatcher::Not(inner) => !inner.matches(actual),
            ValueMatcher::Predicate(f) => {
                if f(actual) {
                    return true;
                }
                match actual {
                    Some(Value::Array(items)) => items.iter().any(|item| f(Some(item))),
                    _ => false,
                }
            }
            ValueMatcher::Equals(expected @ Value::Array(_)) => {
                actual.map(|value| json_eq(expected, value)).unwrap_or(false)
            }
            _ => match actual {
                None => false,
                Some(value) => {
                    if self.matches_one(value) {
                        return true;
                    }
                    match value {
                        Value::Array(items) => items.iter().any(|item| self.matches_one(item)),
                        _ => false,
                    }
                }
            },
        }
    }

    fn matches_one(&self, value: &Value) -> bool {
        match self {
            ValueMatcher::Equals(expected) => json_eq(expected, value),
            ValueMatcher::Compare(op, expected) => as_number(value)
                .map(|actual| op.holds(actual, *expected))
                .unwrap_or(false),
            ValueMatcher::Regex(regex) => value.as_str().map(|s| regex.is_match(s)).unwrap_or(false),
            ValueMatcher::Subset(expected) => is_subset(expected, value),
            // Composite variants are handled in `matches`.
            _ => self.matches(Some(value)),
        }
    }

    /// Turn a literal object into a subset match. Used for body matchers,
    /// where extra keys in the request body are ignored.
    pub(crate) fn into_subset_if_object(self) -> Self {
        match self {
            ValueMatcher::Equals(value @ Value::Object(_)) => ValueMatcher::Subset(value),
            other => other,
        }
    }
}

/// Numbers match directly; strings are accepted when they parse as a number.
fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

/// Structural subset check: objects may carry extra keys, arrays must have
/// the same length with pairwise subset elements, scalars compare equal.
pub fn is_subset(expected: &Value, actual: &Value) -> bool {
    match (expected, actual) {
        (Value::Object(expected), Value::Object(actual)) => expected.iter().all(|(key, ev)| {
            actual
                .get(key)
                .map(|av| is_subset(ev, av))
                .unwrap_or(false)
        }),
        (Value::Array(expected), Value::Array(actual)) => {
            expected.len() == actual.len()
                && expected
                    .iter()
                    .zip(actual.iter())
                    .all(|(ev, av)| is_subset(ev, av))
        }
        _ => json_eq(expected, actual),
    }
}

/// Deep equality where numbers compare by value, so `2` equals `2.0`.
pub fn json_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(a), Value::Number(b)) => match (a.as_i64(), b.as_i64()) {
            (Some(a), Some(b)) => a == b,
            _ => match (a.as_u64(), b.as_u64()) {
                (Some(a), Some(b)) => a == b,
                _ => a.as_f64() == b.as_f64(),
            },
        },
        (Value::Array(a), Value::Array(b)) => {
            a.len() == b.len() && a.iter().zip(b.iter()).all(|(x, y)| json_eq(x, y))
        }
        (Value::Object(a), Value::Object(b)) => {
            a.len() == b.len()
                && a.iter()
                    .all(|(key, x)| b.get(key).map(|y| json_eq(x, y)).unwrap_or(false))
        }
        _ => a == b,
    }
}

impl fmt::Display for ValueMatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValueMatcher::Equals(value) => write!(f, "{}", value),
            ValueMatcher::Absent => write!(f, "<absent>"),
            ValueMatcher::AnyOf(matchers) => {
                write!(f, "any of [")?;
                for (i, m) in matchers.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", m)?;
                }
                write!(f, "]")
            }
            ValueMatcher::Not(inner) => write!(f, "not {}", inner),
            ValueMatcher::Compare(op, n) => write!(f, "{} {}", op.symbol(), n),
            ValueMatcher::Regex(regex) => write!(f, "/{}/", regex.as_str()),
            ValueMatcher::Subset(value) => write!(f, "subset of {}", value),
            ValueMatcher::Predicate(_) => write!(f, "<function>"),
        }
    }
}

impl fmt::Debug for ValueMatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ValueMatcher({})", self)
    }
}

impl From<Value> for ValueMatcher {
    fn from(value: Value) -> Self {
        ValueMatcher::Equals(value)
    }
}

impl From<&str> for ValueMatcher {
    fn from(value: &str) -> Self {
        ValueMatcher::Equals(Value::String(value.to_string()))
    }
}

impl From<String> for ValueMatcher {
    fn from(value: String) -> Self {
        ValueMatcher::Equals(Value::String(value))
    }
}

impl From<bool> for ValueMatcher {
    fn from(value: bool) -> Self {
        ValueMatcher::Equals(Value::Bool(value))
    }
}

impl From<i64> for ValueMatcher {
    fn from(value: i64) -> Self {
        ValueMatcher::Equals(Value::from(value))
    }
}

impl From<u64> for ValueMatcher {
    fn from(value: u64) -> Self {
        ValueMatcher::Equals(Value::from(value))
    }
}

impl From<i32> for ValueMatcher {
    fn from(value: i32) -> Self {
        ValueMatcher::Equals(Value::from(value))
    }
}

impl From<f64> for ValueMatcher {
    fn from(value: f64) -> Self {
        ValueMatcher::Equals(Value::from(value))
    }
}

impl From<Regex> for ValueMatcher {
    fn from(regex: Regex) -> Self {
        ValueMatcher::Regex(regex)
    }
}

/// A literal list compares element-wise against the whole actual array.
impl<T: Into<Value>> From<Vec<T>> for ValueMatcher {
    fn from(values: Vec<T>) -> Self {
        ValueMatcher::Equals(Value::Array(values.into_iter().map(Into::into).collect()))
    }
}

/// `None` asserts absence.
impl<T: Into<ValueMatcher>> From<Option<T>> for ValueMatcher {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(ValueMatcher::Absent)
    }
}

pub fn is_equal_to(value: impl Into<Value>) -> ValueMatcher {
    ValueMatcher::Equals(value.into())
}

pub fn any_of<I, M>(matchers: I) -> ValueMatcher
where
    I: IntoIterator<Item = M>,
    M: Into<ValueMatcher>,
{
    ValueMatcher::AnyOf(matchers.into_iter().map(Into::into).collect())
}

pub fn not(matcher: impl Into<ValueMatcher>) -> ValueMatcher {
    ValueMatcher::Not(Box::new(matcher.into()))
}

pub fn absent() -> ValueMatcher {
    ValueMatcher::Absent
}

pub fn is_greater_than(n: f64) -> ValueMatcher {
    ValueMatcher::Compare(Comparison::GreaterThan, n)
}

pub fn is_greater_than_or_equal(n: f64) -> ValueMatcher {
    ValueMatcher::Compare(Comparison::GreaterThanOrEqual, n)
}

pub fn is_less_than(n: f64) -> ValueMatcher {
    ValueMatcher::Compare(Comparison::LessThan, n)
}

pub fn is_less_than_or_equal(n: f64) -> ValueMatcher {
    ValueMatcher::Compare(Comparison::LessThanOrEqual, n)
}

/// Subset match against an object, usable for any projection.
pub fn matches_object(value: Value) -> ValueMatcher {
    ValueMatcher::Subset(value)
}

/// Regex search over string values.
pub fn matches_regex(pattern: &str) -> crate::Result<ValueMatcher> {
    Regex::new(pattern)
        .map(ValueMatcher::Regex)
        .map_err(|e| crate::MockError::InvalidPattern(format!("{}: {}", pattern, e)))
}

pub fn matches_fn<F>(f: F) -> ValueMatcher
where
    F: Fn(Option<&Value>) -> bool + Send + Sync + 'static,
{
    ValueMatcher::Predicate(Arc::new(f))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_literal_equality() {
        let m = ValueMatcher::from("b");
        assert!(m.matches(Some(&json!("b"))));
        assert!(!m.matches(Some(&json!("c"))));
        assert!(!m.matches(None));

        let m = ValueMatcher::from(1i64);
        assert!(m.matches(Some(&json!(1))));
        assert!(!m.matches(Some(&json!("1"))));
    }

    #[test]
    fn test_numbers_compare_by_value() {
        assert!(is_equal_to(1).matches(Some(&json!(1.0))));
        assert!(is_equal_to(2.5).matches(Some(&json!(2.5))));
        assert!(!is_equal_to(1).matches(Some(&json!(1.5))));
        assert!(is_equal_to(json!([1, 2])).matches(Some(&json!([1.0, 2.0]))));
        assert!(matches_object(json!({"qty": 2})).matches(Some(&json!({"qty": 2.0, "x": 1}))));

        assert!(json_eq(&json!({"a": [1, {"b": 2}]}), &json!({"a": [1.0, {"b": 2.0}]})));
        assert!(!json_eq(&json!({"a": 1}), &json!({"a": 1, "b": 2})));
        assert!(!json_eq(&json!(-1), &json!(u64::MAX)));
        assert!(!json_eq(&json!(1), &json!("1")));
    }

    #[test]
    fn test_any_of_and_not() {
        let m = any_of(["1", "2"]);
        assert!(m.matches(Some(&json!("1"))));
        assert!(m.matches(Some(&json!("2"))));
        assert!(!m.matches(Some(&json!("3"))));

        let m = not("b");
        assert!(m.matches(Some(&json!("c"))));
        assert!(!m.matches(Some(&json!("b"))));
        assert!(m.matches(None));
    }

    #[test]
    fn test_comparisons_fail_closed() {
        let m = is_greater_than_or_equal(0.0);
        assert!(m.matches(Some(&json!(0))));
        assert!(m.matches(Some(&json!(12))));
        assert!(m.matches(Some(&json!("4"))));
        assert!(!m.matches(Some(&json!(-1))));
        assert!(!m.matches(Some(&json!("abc"))));
        assert!(!m.matches(Some(&json!(true))));
        assert!(!m.matches(None));

        assert!(is_less_than(3.0).matches(Some(&json!(2.5))));
        assert!(!is_greater_than(3.0).matches(Some(&json!(3))));
        assert!(is_less_than_or_equal(3.0).matches(Some(&json!(3))));
    }

    #[test]
    fn test_scalar_matcher_accepts_any_array_element() {
        let actual = json!(["b", "c"]);
        assert!(ValueMatcher::from("b").matches(Some(&actual)));
        assert!(ValueMatcher::from("c").matches(Some(&actual)));
        assert!(!ValueMatcher::from("d").matches(Some(&actual)));
    }

    #[test]
    fn test_array_literal_requires_exact_correspondence() {
        let m = ValueMatcher::from(vec!["b", "c"]);
        assert!(m.matches(Some(&json!(["b", "c"]))));
        assert!(!m.matches(Some(&json!(["c", "b"]))));
        assert!(!m.matches(Some(&json!(["b"]))));
        assert!(!m.matches(Some(&json!("b"))));
    }

    #[test]
    fn test_not_over_array_negates_whole_evaluation() {
        // "b" is one of the values, so `not("b")` rejects.
        assert!(!not("b").matches(Some(&json!(["b", "c"]))));
        assert!(not("x").matches(Some(&json!(["b", "c"]))));
    }

    #[test]
    fn test_absent() {
        let m = ValueMatcher::from(None::<&str>);
        assert!(m.matches(None));
        assert!(!m.matches(Some(&Value::Null)));
        assert!(!m.matches(Some(&json!("x"))));
    }

    #[test]
    fn test_subset() {
        let m = matches_object(json!({"a": "b"}));
        assert!(m.matches(Some(&json!({"a": "b", "c": "d"}))));
        assert!(!m.matches(Some(&json!({"a": "c"}))));
        assert!(!m.matches(Some(&json!({"b": "b"}))));

        assert!(is_subset(
            &json!({"user": {"id": 1}}),
            &json!({"user": {"id": 1, "name": "x"}, "extra": true})
        ));
        assert!(!is_subset(&json!([1, 2]), &json!([1, 2, 3])));
    }

    #[test]
    fn test_regex_and_predicate() {
        let m = matches_regex("^/api/v[0-9]+$").unwrap();
        assert!(m.matches(Some(&json!("/api/v2"))));
        assert!(!m.matches(Some(&json!("/api/latest"))));
        assert!(matches_regex("(").is_err());

        let m = matches_fn(|v| v.and_then(Value::as_str) == Some("POST"));
        assert!(m.matches(Some(&json!("POST"))));
        assert!(!m.matches(Some(&json!("GET"))));
    }

    #[test]
    fn test_display_describes_matcher() {
        assert_eq!(any_of(["a", "b"]).to_string(), r#"any of ["a", "b"]"#);
        assert_eq!(not(is_greater_than(1.0)).to_string(), "not > 1");
        assert_eq!(absent().to_string(), "<absent>");
    }
}
