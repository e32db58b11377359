//! Full request matcher combining method, path, query, headers and body.

use super::body::BodyMatcher;
use super::header::{check_forbidden, HeaderMatcher};
use super::path::PathMatcher;
use super::query::{parse_query, QueryMatcher, QueryValue};
use crate::descriptor::RequestDescriptor;
use http::Method;

/// Outcome of evaluating one interceptor against one request.
///
/// `reasons` is diagnostic only; the decision is `ok`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchOutcome {
    pub ok: bool,
    pub reasons: Vec<String>,
}

impl MatchOutcome {
    fn from_reasons(reasons: Vec<String>) -> Self {
        Self {
            ok: reasons.is_empty(),
            reasons,
        }
    }
}

/// Everything an interceptor requires of a request.
#[derive(Debug, Clone)]
pub struct RequestMatcher {
    pub method: Method,
    pub path: PathMatcher,
    pub query: Option<QueryMatcher>,
    pub body: Option<BodyMatcher>,
    pub headers: Vec<HeaderMatcher>,
    pub forbidden_headers: Vec<String>,
}

impl RequestMatcher {
    /// Build a matcher; an exact path containing `?` is split into the path
    /// and an exact query matcher.
    pub fn new(method: Method, path: PathMatcher) -> Self {
        let (path, query) = match path {
            PathMatcher::Exact(full) if full.contains('?') => {
                let (p, q) = full.split_once('?').unwrap_or((full.as_str(), ""));
                (
                    PathMatcher::Exact(p.to_string()),
                    Some(QueryMatcher::exact(parse_query(Some(q), true))),
                )
            }
            other => (other, None),
        };
        Self {
            method,
            path,
            query,
            body: None,
            headers: Vec::new(),
            forbidden_headers: Vec::new(),
        }
    }

    /// Evaluate every sub-matcher and collect all failures.
    pub fn evaluate(&self, request: &RequestDescriptor) -> MatchOutcome {
        let mut reasons = Vec::new();

        if request.method != self.method {
            reasons.push(format!(
                "Method mismatch: expected {}, got {}",
                self.method, request.method
            ));
        }

        let subject = if self.query.is_some() {
            request.path_only()
        } else {
            request.path.as_str()
        };
        reasons.extend(self.path.check(subject));

        if let Some(query) = &self.query {
            reasons.extend(query.check(request.raw_query()));
        }

        for header in &self.headers {
            reasons.extend(header.check(&request.headers));
        }
        reasons.extend(check_forbidden(&self.forbidden_headers, &request.headers));

        if let Some(body) = &self.body {
            reasons.extend(body.check(&request.body));
        }

        MatchOutcome::from_reasons(reasons)
    }

    /// Expected query, when it is an exact tree.
    pub fn expected_query(&self) -> Option<&QueryValue> {
        match &self.query {
            Some(QueryMatcher {
                rule: super::query::QueryRule::Exact(v),
                ..
            }) => Some(v),
            _ => None,
        }
    }
}
