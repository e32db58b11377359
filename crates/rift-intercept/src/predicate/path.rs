//! Path matching.

use super::value_matcher::StrPredicate;
use regex::Regex;
use std::fmt;
use std::sync::Arc;

/// Path expectation of an interceptor.
///
/// The subject is the path without its query when the interceptor also
/// declares a query matcher, and the full `path?query` otherwise.
#[derive(Clone, Default)]
pub enum PathMatcher {
    /// Match any path
    #[default]
    Any,
    /// Exact, case-sensitive equality
    Exact(String),
    Pattern(Arc<Regex>),
    Predicate(StrPredicate),
}

impl PathMatcher {
    pub fn exact(path: impl Into<String>) -> Self {
        PathMatcher::Exact(path.into())
    }

    pub fn pattern(pattern: &str) -> Result<Self, regex::Error> {
        Ok(PathMatcher::Pattern(Arc::new(Regex::new(pattern)?)))
    }

    pub fn predicate<F>(f: F) -> Self
    where
        F: Fn(&str) -> bool + Send + Sync + 'static,
    {
        PathMatcher::Predicate(Arc::new(f))
    }

    /// Returns a mismatch reason, or `None` when the path is accepted.
    pub fn check(&self, subject: &str) -> Option<String> {
        match self {
            PathMatcher::Any => None,
            PathMatcher::Exact(expected) if expected == subject => None,
            PathMatcher::Exact(expected) => Some(format!(
                "Path mismatch: expected {expected:?}, got {subject:?}"
            )),
            PathMatcher::Pattern(re) if re.is_match(subject) => None,
            PathMatcher::Pattern(re) => Some(format!(
                "Path mismatch: {subject:?} does not match /{}/",
                re.as_str()
            )),
            PathMatcher::Predicate(f) if f(subject) => None,
            PathMatcher::Predicate(_) => {
                Some(format!("Path mismatch: predicate rejected {subject:?}"))
            }
        }
    }

    /// Display form used in expectation summaries.
    pub fn describe(&self) -> String {
        match self {
            PathMatcher::Any => "*".to_string(),
            PathMatcher::Exact(p) => p.clone(),
            PathMatcher::Pattern(re) => format!("/{}/", re.as_str()),
            PathMatcher::Predicate(_) => "<predicate>".to_string(),
        }
    }
}

impl fmt::Debug for PathMatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PathMatcher({})", self.describe())
    }
}

impl From<&str> for PathMatcher {
    fn from(path: &str) -> Self {
        PathMatcher::exact(path)
    }
}

impl From<String> for PathMatcher {
    fn from(path: String) -> Self {
        PathMatcher::Exact(path)
    }
}

impl From<Regex> for PathMatcher {
    fn from(regex: Regex) -> Self {
        PathMatcher::Pattern(Arc::new(regex))
    }
}
