//! Body matching on the fully materialized request body.

use super::describe_value;
use super::query::{parse_query, QueryValue};
use bytes::Bytes;
use regex::Regex;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

/// Caller-supplied predicate over the raw body.
pub type BodyPredicate = Arc<dyn Fn(&[u8]) -> bool + Send + Sync>;

#[derive(Clone)]
pub enum BodyMatcher {
    /// Byte-for-byte equality
    Exact(Bytes),
    Contains(String),
    Pattern(Arc<Regex>),
    /// JSON where every expected object key must be present and equal;
    /// extra keys in the request are allowed, arrays must match in full
    Json(Value),
    /// JSON that must equal the expected document exactly
    JsonExact(Value),
    /// `application/x-www-form-urlencoded` body decoded like a query string
    Form(QueryValue),
    Predicate(BodyPredicate),
}

impl BodyMatcher {
    pub fn exact(body: impl Into<Bytes>) -> Self {
        BodyMatcher::Exact(body.into())
    }

    pub fn pattern(pattern: &str) -> Result<Self, regex::Error> {
        Ok(BodyMatcher::Pattern(Arc::new(Regex::new(pattern)?)))
    }

    pub fn predicate<F>(f: F) -> Self
    where
        F: Fn(&[u8]) -> bool + Send + Sync + 'static,
    {
        BodyMatcher::Predicate(Arc::new(f))
    }

    /// Returns a mismatch reason, or `None` when the body is accepted.
    pub fn check(&self, body: &[u8]) -> Option<String> {
        let text = String::from_utf8_lossy(body);
        let accepted = match self {
            BodyMatcher::Exact(expected) => expected.as_ref() == body,
            BodyMatcher::Contains(needle) => text.contains(needle.as_str()),
            BodyMatcher::Pattern(re) => re.is_match(&text),
            BodyMatcher::Json(expected) => serde_json::from_slice::<Value>(body)
                .is_ok_and(|actual| json_partial_equals(&actual, expected)),
            BodyMatcher::JsonExact(expected) => {
                serde_json::from_slice::<Value>(body).is_ok_and(|actual| actual == *expected)
            }
            BodyMatcher::Form(expected) => parse_query(Some(text.as_ref()), true) == *expected,
            BodyMatcher::Predicate(f) => f(body),
        };
        if accepted {
            return None;
        }
        Some(format!(
            "Body mismatch: expected {}, got {}",
            self.describe(),
            describe_value(&text)
        ))
    }

    fn describe(&self) -> String {
        match self {
            BodyMatcher::Exact(expected) => describe_value(&String::from_utf8_lossy(expected)),
            BodyMatcher::Contains(needle) => format!("a body containing {needle:?}"),
            BodyMatcher::Pattern(re) => format!("a body matching /{}/", re.as_str()),
            BodyMatcher::Json(v) => format!("JSON including {v}"),
            BodyMatcher::JsonExact(v) => format!("JSON {v}"),
            BodyMatcher::Form(v) => format!("form {v}"),
            BodyMatcher::Predicate(_) => "a body accepted by the predicate".to_string(),
        }
    }
}

impl fmt::Debug for BodyMatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BodyMatcher({})", self.describe())
    }
}

impl From<&str> for BodyMatcher {
    fn from(body: &str) -> Self {
        BodyMatcher::Exact(Bytes::copy_from_slice(body.as_bytes()))
    }
}

impl From<String> for BodyMatcher {
    fn from(body: String) -> Self {
        BodyMatcher::Exact(Bytes::from(body))
    }
}

impl From<Value> for BodyMatcher {
    fn from(value: Value) -> Self {
        BodyMatcher::JsonExact(value)
    }
}

/// Deep JSON comparison where objects only need the expected keys.
fn json_partial_equals(actual: &Value, expected: &Value) -> bool {
    match (actual, expected) {
        (Value::Array(a), Value::Array(b)) => {
            a.len() == b.len() && a.iter().zip(b).all(|(x, y)| json_partial_equals(x, y))
        }
        (Value::Object(a), Value::Object(b)) => b.iter().all(|(key, expected_val)| {
            a.get(key)
                .is_some_and(|actual_val| json_partial_equals(actual_val, expected_val))
        }),
        _ => actual == expected,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_exact_body_reason() {
        let m = BodyMatcher::from("expected");
        assert_eq!(m.check(b"expected"), None);
        assert_eq!(
            m.check(b"actual"),
            Some(r#"Body mismatch: expected "expected", got "actual""#.to_string())
        );
    }

    #[test]
    fn test_json_partial_allows_extra_keys() {
        let m = BodyMatcher::Json(json!({"user": {"name": "ann"}, "tags": ["a"]}));
        assert_eq!(
            m.check(br#"{"user": {"name": "ann", "age": 3}, "tags": ["a"], "x": 1}"#),
            None
        );
        assert!(m.check(br#"{"user": {"name": "bob"}, "tags": ["a"]}"#).is_some());
        assert!(m.check(br#"{"user": {"name": "ann"}, "tags": ["a", "b"]}"#).is_some());
        assert!(m.check(b"not json").is_some());
    }

    #[test]
    fn test_json_exact_rejects_extra_keys() {
        let m = BodyMatcher::from(json!({"a": 1}));
        assert_eq!(m.check(br#"{ "a": 1 }"#), None);
        assert!(m.check(br#"{"a": 1, "b": 2}"#).is_some());
    }

    #[test]
    fn test_form_body() {
        let m = BodyMatcher::Form(QueryValue::from_json(&json!({"name": "ann lee", "ids": ["1", "2"]})));
        assert_eq!(m.check(b"name=ann+lee&ids=1&ids=2"), None);
        assert!(m.check(b"name=ann").is_some());
    }

    #[test]
    fn test_pattern_contains_predicate() {
        assert_eq!(BodyMatcher::pattern(r"id=\d+").unwrap().check(b"id=42"), None);
        assert_eq!(BodyMatcher::Contains("needle".into()).check(b"haystack needle"), None);
        let p = BodyMatcher::predicate(|b| b.len() > 3);
        assert_eq!(p.check(b"long"), None);
        assert!(p.check(b"no").is_some());
    }
}
