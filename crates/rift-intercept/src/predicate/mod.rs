//! Request matching.
//!
//! Every matcher here is a pure function of a [`RequestDescriptor`]: it holds
//! no state and reports every failing sub-match with a readable reason, so a
//! `no match` diagnostic can explain exactly why each interceptor declined.
//!
//! # Module Structure
//!
//! - `value_matcher` - string matching shared by paths and headers
//! - `path` - path equality, pattern and predicate matching
//! - `query` - query string decoding rules and query matchers
//! - `header` - required and forbidden headers
//! - `body` - body matching on the materialized body
//! - `request` - the combined matcher an interceptor owns
//!
//! [`RequestDescriptor`]: crate::descriptor::RequestDescriptor

mod body;
mod header;
mod path;
mod query;
mod request;
mod value_matcher;

pub use body::{BodyMatcher, BodyPredicate};
pub use header::{check_forbidden, HeaderMatcher};
pub use path::PathMatcher;
pub use query::{parse_query, QueryMatcher, QueryPredicate, QueryRule, QueryValue};
pub use request::{MatchOutcome, RequestMatcher};
pub use value_matcher::{CachedValue, StrPredicate, ValueMatcher};

/// Longest value rendered verbatim inside a diagnostic.
const MAX_DESCRIBED_CHARS: usize = 500;

/// Quote a value for a mismatch reason, truncating long input.
pub fn describe_value(value: &str) -> String {
    if value.chars().count() <= MAX_DESCRIBED_CHARS {
        return format!("{value:?}");
    }
    let truncated: String = value.chars().take(MAX_DESCRIBED_CHARS).collect();
    format!("{truncated:?}... ({} chars)", value.chars().count())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_describe_value_truncates() {
        assert_eq!(describe_value("short"), "\"short\"");
        let long = "x".repeat(600);
        let described = describe_value(&long);
        assert!(described.ends_with("... (600 chars)"));
        assert!(described.len() < 520);
    }
}
