//! String value matching shared by path and header matchers.

use regex::Regex;
use std::fmt;
use std::sync::Arc;

/// Caller-supplied predicate over a string value.
pub type StrPredicate = Arc<dyn Fn(&str) -> bool + Send + Sync>;

/// A string with its lowercase form computed once, at declaration time.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedValue {
    pub value: String,
    pub lower: String,
}

impl CachedValue {
    pub fn new(value: impl Into<String>) -> Self {
        let value = value.into();
        let lower = value.to_lowercase();
        Self { value, lower }
    }

    #[inline]
    fn equals(&self, value: &str, case_sensitive: bool) -> bool {
        if case_sensitive {
            value == self.value
        } else {
            value.to_lowercase() == self.lower
        }
    }

    #[inline]
    fn contained_in(&self, value: &str, case_sensitive: bool) -> bool {
        if case_sensitive {
            value.contains(&self.value)
        } else {
            value.to_lowercase().contains(&self.lower)
        }
    }

    #[inline]
    fn starts(&self, value: &str, case_sensitive: bool) -> bool {
        if case_sensitive {
            value.starts_with(&self.value)
        } else {
            value.to_lowercase().starts_with(&self.lower)
        }
    }

    #[inline]
    fn ends(&self, value: &str, case_sensitive: bool) -> bool {
        if case_sensitive {
            value.ends_with(&self.value)
        } else {
            value.to_lowercase().ends_with(&self.lower)
        }
    }
}

/// How a single string value is matched.
#[derive(Clone)]
pub enum ValueMatcher {
    Equals(CachedValue),
    Contains(CachedValue),
    StartsWith(CachedValue),
    EndsWith(CachedValue),
    /// Regex match; case sensitivity belongs in the pattern itself
    Pattern(Arc<Regex>),
    Predicate(StrPredicate),
    /// Presence check (value is whether the field should exist)
    Exists(bool),
}

impl ValueMatcher {
    pub fn equals(value: impl Into<String>) -> Self {
        Self::Equals(CachedValue::new(value))
    }

    pub fn contains(value: impl Into<String>) -> Self {
        Self::Contains(CachedValue::new(value))
    }

    pub fn starts_with(value: impl Into<String>) -> Self {
        Self::StartsWith(CachedValue::new(value))
    }

    pub fn ends_with(value: impl Into<String>) -> Self {
        Self::EndsWith(CachedValue::new(value))
    }

    pub fn pattern(pattern: &str) -> Result<Self, regex::Error> {
        Ok(Self::Pattern(Arc::new(Regex::new(pattern)?)))
    }

    pub fn regex(regex: Regex) -> Self {
        Self::Pattern(Arc::new(regex))
    }

    pub fn predicate<F>(f: F) -> Self
    where
        F: Fn(&str) -> bool + Send + Sync + 'static,
    {
        Self::Predicate(Arc::new(f))
    }

    /// Check a value (`None` when the field is absent).
    pub fn matches(&self, value: Option<&str>, case_sensitive: bool) -> bool {
        match (self, value) {
            (ValueMatcher::Exists(should_exist), v) => *should_exist == v.is_some(),
            (_, None) => false,
            (ValueMatcher::Equals(c), Some(v)) => c.equals(v, case_sensitive),
            (ValueMatcher::Contains(c), Some(v)) => c.contained_in(v, case_sensitive),
            (ValueMatcher::StartsWith(c), Some(v)) => c.starts(v, case_sensitive),
            (ValueMatcher::EndsWith(c), Some(v)) => c.ends(v, case_sensitive),
            (ValueMatcher::Pattern(re), Some(v)) => re.is_match(v),
            (ValueMatcher::Predicate(f), Some(v)) => f(v),
        }
    }

    /// Short description of the expectation, used in mismatch reasons.
    pub fn describe(&self) -> String {
        match self {
            ValueMatcher::Equals(c) => format!("{:?}", c.value),
            ValueMatcher::Contains(c) => format!("a value containing {:?}", c.value),
            ValueMatcher::StartsWith(c) => format!("a value starting with {:?}", c.value),
            ValueMatcher::EndsWith(c) => format!("a value ending with {:?}", c.value),
            ValueMatcher::Pattern(re) => format!("a value matching /{}/", re.as_str()),
            ValueMatcher::Predicate(_) => "a value accepted by the predicate".to_string(),
            ValueMatcher::Exists(true) => "the header to be present".to_string(),
            ValueMatcher::Exists(false) => "the header to be absent".to_string(),
        }
    }
}

impl fmt::Debug for ValueMatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValueMatcher::Equals(c) => f.debug_tuple("Equals").field(&c.value).finish(),
            ValueMatcher::Contains(c) => f.debug_tuple("Contains").field(&c.value).finish(),
            ValueMatcher::StartsWith(c) => f.debug_tuple("StartsWith").field(&c.value).finish(),
            ValueMatcher::EndsWith(c) => f.debug_tuple("EndsWith").field(&c.value).finish(),
            ValueMatcher::Pattern(re) => f.debug_tuple("Pattern").field(&re.as_str()).finish(),
            ValueMatcher::Predicate(_) => f.write_str("Predicate(..)"),
            ValueMatcher::Exists(e) => f.debug_tuple("Exists").field(e).finish(),
        }
    }
}

impl From<&str> for ValueMatcher {
    fn from(value: &str) -> Self {
        ValueMatcher::equals(value)
    }
}

impl From<String> for ValueMatcher {
    fn from(value: String) -> Self {
        ValueMatcher::equals(value)
    }
}

impl From<Regex> for ValueMatcher {
    fn from(regex: Regex) -> Self {
        ValueMatcher::regex(regex)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_matcher_equals() {
        let m = ValueMatcher::equals("Test");
        assert!(m.matches(Some("Test"), true));
        assert!(!m.matches(Some("test"), true));
        assert!(m.matches(Some("tEsT"), false));
        assert!(!m.matches(None, false));
    }

    #[test]
    fn test_value_matcher_substrings() {
        assert!(ValueMatcher::contains("api").matches(Some("/API/v1"), false));
        assert!(!ValueMatcher::contains("api").matches(Some("/API/v1"), true));
        assert!(ValueMatcher::starts_with("Bearer ").matches(Some("Bearer abc"), true));
        assert!(ValueMatcher::ends_with(".json").matches(Some("data.JSON"), false));
    }

    #[test]
    fn test_value_matcher_pattern_and_predicate() {
        let re = ValueMatcher::pattern(r"^/users/\d+$").unwrap();
        assert!(re.matches(Some("/users/42"), true));
        assert!(!re.matches(Some("/users/me"), true));

        let p = ValueMatcher::predicate(|v| v.len() == 3);
        assert!(p.matches(Some("abc"), true));
        assert!(!p.matches(Some("abcd"), true));
        assert!(!p.matches(None, true));
    }

    #[test]
    fn test_value_matcher_exists() {
        assert!(ValueMatcher::Exists(true).matches(Some(""), true));
        assert!(!ValueMatcher::Exists(true).matches(None, true));
        assert!(ValueMatcher::Exists(false).matches(None, true));
    }
}
