//! Query string decoding and matching.
//!
//! A raw query is parsed into a [`QueryValue`] tree:
//! - `a=1&a=2` and `a[]=1&a[]=2` both become an ordered list (order and
//!   repetition preserved)
//! - `a[b][c]=1` becomes nested maps
//! - keys and values are percent-decoded (`+` is a space) unless the matcher
//!   was declared as pre-encoded, in which case raw text is compared

use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Decoded query value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryValue {
    Str(String),
    List(Vec<QueryValue>),
    Map(BTreeMap<String, QueryValue>),
}

impl QueryValue {
    pub fn empty_map() -> Self {
        QueryValue::Map(BTreeMap::new())
    }

    /// Build an expected value from JSON. Scalars are stringified, `null`
    /// becomes the empty string.
    pub fn from_json(value: &Value) -> Self {
        match value {
            Value::Null => QueryValue::Str(String::new()),
            Value::Bool(b) => QueryValue::Str(b.to_string()),
            Value::Number(n) => QueryValue::Str(n.to_string()),
            Value::String(s) => QueryValue::Str(s.clone()),
            Value::Array(items) => QueryValue::List(items.iter().map(Self::from_json).collect()),
            Value::Object(obj) => QueryValue::Map(
                obj.iter()
                    .map(|(k, v)| (k.clone(), Self::from_json(v)))
                    .collect(),
            ),
        }
    }

    pub fn as_map(&self) -> Option<&BTreeMap<String, QueryValue>> {
        match self {
            QueryValue::Map(m) => Some(m),
            _ => None,
        }
    }

    pub fn get(&self, key: &str) -> Option<&QueryValue> {
        self.as_map().and_then(|m| m.get(key))
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            QueryValue::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Fold `value` in at `segments`; an empty segment appends to a list.
    fn insert(&mut self, segments: &[String], value: String) {
        let Some((head, rest)) = segments.split_first() else {
            return;
        };

        if head.is_empty() {
            // `key[]`: always a list entry
            let item = if rest.is_empty() {
                QueryValue::Str(value)
            } else {
                let mut nested = QueryValue::empty_map();
                nested.insert(rest, value);
                nested
            };
            match self {
                QueryValue::List(items) => items.push(item),
                QueryValue::Str(existing) => {
                    *self = QueryValue::List(vec![QueryValue::Str(std::mem::take(existing)), item]);
                }
                QueryValue::Map(m) if m.is_empty() => *self = QueryValue::List(vec![item]),
                QueryValue::Map(_) => {}
            }
            return;
        }

        let map = match self {
            QueryValue::Map(m) => m,
            _ => return,
        };

        if rest.is_empty() {
            let Some(existing) = map.get_mut(head) else {
                map.insert(head.clone(), QueryValue::Str(value));
                return;
            };
            match existing {
                QueryValue::List(items) => items.push(QueryValue::Str(value)),
                QueryValue::Str(_) => {
                    let prev = std::mem::replace(existing, QueryValue::List(Vec::new()));
                    *existing = QueryValue::List(vec![prev, QueryValue::Str(value)]);
                }
                QueryValue::Map(_) => {}
            }
            return;
        }

        let child = map.entry(head.clone()).or_insert_with(|| {
            if rest[0].is_empty() {
                QueryValue::List(Vec::new())
            } else {
                QueryValue::empty_map()
            }
        });
        child.insert(rest, value);
    }
}

impl fmt::Display for QueryValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueryValue::Str(s) => write!(f, "{s:?}"),
            QueryValue::List(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str("]")
            }
            QueryValue::Map(map) => {
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

impl From<&str> for QueryValue {
    fn from(value: &str) -> Self {
        QueryValue::Str(value.to_string())
    }
}

impl From<String> for QueryValue {
    fn from(value: String) -> Self {
        QueryValue::Str(value)
    }
}

impl<T: Into<QueryValue>> From<Vec<T>> for QueryValue {
    fn from(items: Vec<T>) -> Self {
        QueryValue::List(items.into_iter().map(Into::into).collect())
    }
}

impl<K: Into<String>, V: Into<QueryValue>> FromIterator<(K, V)> for QueryValue {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        QueryValue::Map(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

fn decode_component(raw: &str) -> String {
    let spaced = raw.replace('+', " ");
    match urlencoding::decode(&spaced) {
        Ok(decoded) => decoded.into_owned(),
        Err(_) => spaced,
    }
}

/// Split `a[b][]` into `["a", "b", ""]`.
fn key_segments(key: &str) -> Vec<String> {
    let Some(open) = key.find('[') else {
        return vec![key.to_string()];
    };
    if !key.ends_with(']') || open == 0 {
        return vec![key.to_string()];
    }
    let mut segments = vec![key[..open].to_string()];
    for part in key[open + 1..key.len() - 1].split("][") {
        segments.push(part.to_string());
    }
    segments
}

/// Parse a raw query string into a map-shaped [`QueryValue`].
///
/// With `decode` false, keys and values are kept exactly as sent.
pub fn parse_query(raw: Option<&str>, decode: bool) -> QueryValue {
    let mut root = QueryValue::empty_map();
    let Some(raw) = raw else {
        return root;
    };
    for pair in raw.split('&').filter(|p| !p.is_empty()) {
        let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
        let (key, value) = if decode {
            (decode_component(key), decode_component(value))
        } else {
            (key.to_string(), value.to_string())
        };
        root.insert(&key_segments(&key), value);
    }
    root
}

/// Caller-supplied predicate over the decoded query.
pub type QueryPredicate = Arc<dyn Fn(&QueryValue) -> bool + Send + Sync>;

#[derive(Clone)]
pub enum QueryRule {
    /// Accept any query (including none)
    Any,
    /// Decoded query must equal this tree exactly
    Exact(QueryValue),
    Predicate(QueryPredicate),
}

/// Query expectation of an interceptor.
#[derive(Clone)]
pub struct QueryMatcher {
    pub rule: QueryRule,
    /// Expected values are already percent-encoded; compare raw text
    pub encoded: bool,
}

impl QueryMatcher {
    pub fn any() -> Self {
        Self {
            rule: QueryRule::Any,
            encoded: false,
        }
    }

    pub fn exact(expected: QueryValue) -> Self {
        Self {
            rule: QueryRule::Exact(expected),
            encoded: false,
        }
    }

    pub fn encoded(expected: QueryValue) -> Self {
        Self {
            rule: QueryRule::Exact(expected),
            encoded: true,
        }
    }

    pub fn predicate<F>(f: F) -> Self
    where
        F: Fn(&QueryValue) -> bool + Send + Sync + 'static,
    {
        Self {
            rule: QueryRule::Predicate(Arc::new(f)),
            encoded: false,
        }
    }

    /// Returns a mismatch reason, or `None` when the query is accepted.
    pub fn check(&self, raw: Option<&str>) -> Option<String> {
        let actual = parse_query(raw, !self.encoded);
        match &self.rule {
            QueryRule::Any => None,
            QueryRule::Exact(expected) => {
                if *expected == actual {
                    None
                } else {
                    Some(format!(
                        "Query mismatch: expected {expected}, got {actual}"
                    ))
                }
            }
            QueryRule::Predicate(f) => {
                if f(&actual) {
                    None
                } else {
                    Some(format!("Query mismatch: predicate rejected {actual}"))
                }
            }
        }
    }
}

impl fmt::Debug for QueryMatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rule = match &self.rule {
            QueryRule::Any => "Any".to_string(),
            QueryRule::Exact(v) => format!("Exact({v})"),
            QueryRule::Predicate(_) => "Predicate(..)".to_string(),
        };
        f.debug_struct("QueryMatcher")
            .field("rule", &rule)
            .field("encoded", &self.encoded)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_simple_pairs() {
        let q = parse_query(Some("page=1&sort=desc&flag"), true);
        assert_eq!(q.get("page"), Some(&QueryValue::from("1")));
        assert_eq!(q.get("sort"), Some(&QueryValue::from("desc")));
        assert_eq!(q.get("flag"), Some(&QueryValue::from("")));
        assert_eq!(parse_query(None, true), QueryValue::empty_map());
    }

    #[test]
    fn test_parse_decodes_unless_raw() {
        let decoded = parse_query(Some("name=hello%20world&q=a+b"), true);
        assert_eq!(decoded.get("name"), Some(&QueryValue::from("hello world")));
        assert_eq!(decoded.get("q"), Some(&QueryValue::from("a b")));

        let raw = parse_query(Some("name=hello%20world"), false);
        assert_eq!(raw.get("name"), Some(&QueryValue::from("hello%20world")));
    }

    #[test]
    fn test_parse_repeated_keys_keep_order() {
        let q = parse_query(Some("a=2&a=1&a=2"), true);
        assert_eq!(q.get("a"), Some(&QueryValue::from(vec!["2", "1", "2"])));

        let brackets = parse_query(Some("a[]=x&a[]=y"), true);
        assert_eq!(brackets.get("a"), Some(&QueryValue::from(vec!["x", "y"])));

        let single = parse_query(Some("a[]=only"), true);
        assert_eq!(single.get("a"), Some(&QueryValue::from(vec!["only"])));
    }

    #[test]
    fn test_parse_nested_brackets() {
        let q = parse_query(Some("user%5Bname%5D=ann&user[tags][]=a&user[tags][]=b"), true);
        let expected = QueryValue::from_json(&json!({
            "user": {"name": "ann", "tags": ["a", "b"]}
        }));
        assert_eq!(q, expected);
    }

    #[test]
    fn test_exact_matcher_equivalence() {
        let m = QueryMatcher::exact(QueryValue::from_json(&json!({
            "ids": [1, 2, 2],
            "filter": {"status": "open now"},
            "q": "a&b"
        })));
        assert_eq!(
            m.check(Some("ids=1&ids=2&ids=2&filter[status]=open%20now&q=a%26b")),
            None
        );
        // Order inside lists matters
        assert!(m
            .check(Some("ids=2&ids=1&ids=2&filter[status]=open%20now&q=a%26b"))
            .is_some());
        // Extra keys are rejected
        let reason = m
            .check(Some("ids=1&ids=2&ids=2&filter[status]=open%20now&q=a%26b&x=1"))
            .unwrap();
        assert!(reason.starts_with("Query mismatch: expected"));
    }

    #[test]
    fn test_encoded_matcher_compares_raw_text() {
        let m = QueryMatcher::encoded([("q", "a%20b")].into_iter().collect());
        assert_eq!(m.check(Some("q=a%20b")), None);
        assert!(m.check(Some("q=a+b")).is_some());

        let decoded = QueryMatcher::exact([("q", "a b")].into_iter().collect());
        assert_eq!(decoded.check(Some("q=a%20b")), None);
        assert_eq!(decoded.check(Some("q=a+b")), None);
    }

    #[test]
    fn test_any_and_predicate() {
        assert_eq!(QueryMatcher::any().check(Some("x=1")), None);
        assert_eq!(QueryMatcher::any().check(None), None);

        let m = QueryMatcher::predicate(|q| q.get("token").is_some());
        assert_eq!(m.check(Some("token=abc")), None);
        assert_eq!(
            m.check(Some("other=1")),
            Some(r#"Query mismatch: predicate rejected {other: "1"}"#.to_string())
        );
    }
}
