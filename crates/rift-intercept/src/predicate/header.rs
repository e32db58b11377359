//! Header presence, absence and value matching.

use super::value_matcher::ValueMatcher;
use crate::descriptor::HeaderList;

/// One required-header expectation. Names are compared case-insensitively.
#[derive(Debug, Clone)]
pub struct HeaderMatcher {
    pub name: String,
    pub matcher: ValueMatcher,
}

impl HeaderMatcher {
    pub fn new(name: impl Into<String>, matcher: impl Into<ValueMatcher>) -> Self {
        Self {
            name: name.into(),
            matcher: matcher.into(),
        }
    }

    pub fn present(name: impl Into<String>) -> Self {
        Self::new(name, ValueMatcher::Exists(true))
    }

    /// Returns a mismatch reason, or `None` when the header is accepted.
    pub fn check(&self, headers: &HeaderList) -> Option<String> {
        let actual = headers.get(&self.name);
        if self.matcher.matches(actual.as_deref(), true) {
            return None;
        }
        Some(match actual {
            None => format!(
                "Header mismatch: expected {:?} to be {}, but it is missing",
                self.name,
                self.matcher.describe()
            ),
            Some(value) => format!(
                "Header mismatch: expected {:?} to be {}, got {value:?}",
                self.name,
                self.matcher.describe()
            ),
        })
    }
}

/// Reasons for every forbidden header that is present.
pub fn check_forbidden(forbidden: &[String], headers: &HeaderList) -> Vec<String> {
    forbidden
        .iter()
        .filter(|name| headers.contains(name))
        .map(|name| format!("Header mismatch: {name:?} must not be present"))
        .collect()
}
