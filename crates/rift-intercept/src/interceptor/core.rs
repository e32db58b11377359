//! Core Interceptor struct and implementation.
//!
//! An [`Interceptor`] is immutable once registered except for its runtime
//! counters: remaining budget, match count and the recorded call history.
//! Those live behind a single mutex so a match decision and the budget
//! decrement it causes are observed together.

use super::reply::{ReplyDecorations, ReplySpec, ResolvedReply};
use crate::delay::Delay;
use crate::descriptor::{Origin, RequestDescriptor};
use crate::error::{InterceptorMismatch, ScriptedError};
use crate::predicate::{MatchOutcome, RequestMatcher};
use parking_lot::Mutex;
use regex::Regex;
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

/// How many more matches an interceptor accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Budget {
    Times(u32),
    Unlimited,
}

impl Budget {
    pub fn is_exhausted(&self) -> bool {
        matches!(self, Budget::Times(0))
    }

    fn decrement(&mut self) {
        if let Budget::Times(n) = self {
            *n = n.saturating_sub(1);
        }
    }
}

impl Default for Budget {
    fn default() -> Self {
        Budget::Times(1)
    }
}

impl fmt::Display for Budget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Budget::Times(n) => write!(f, "{n}"),
            Budget::Unlimited => f.write_str("unlimited"),
        }
    }
}

/// Origin an interceptor is declared for.
#[derive(Debug, Clone)]
pub enum OriginPattern {
    Exact(Origin),
    /// Matched against both `scheme://host` and `scheme://host:port`
    Pattern(Arc<Regex>),
}

impl OriginPattern {
    pub fn pattern(pattern: &str) -> Result<Self, regex::Error> {
        Ok(OriginPattern::Pattern(Arc::new(Regex::new(pattern)?)))
    }

    /// Key of the candidate list this origin is stored under.
    pub fn registry_key(&self) -> String {
        match self {
            OriginPattern::Exact(origin) => origin.key(),
            OriginPattern::Pattern(re) => format!("pattern:{}", re.as_str()),
        }
    }

    pub fn matches(&self, origin: &Origin) -> bool {
        match self {
            OriginPattern::Exact(expected) => expected == origin,
            OriginPattern::Pattern(re) => {
                re.is_match(&origin.to_string()) || re.is_match(&origin.key())
            }
        }
    }
}

impl fmt::Display for OriginPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OriginPattern::Exact(origin) => write!(f, "{origin}"),
            OriginPattern::Pattern(re) => write!(f, "/{}/", re.as_str()),
        }
    }
}

impl From<Origin> for OriginPattern {
    fn from(origin: Origin) -> Self {
        OriginPattern::Exact(origin)
    }
}

impl From<Regex> for OriginPattern {
    fn from(re: Regex) -> Self {
        OriginPattern::Pattern(Arc::new(re))
    }
}

/// One request an interceptor accepted.
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub descriptor: RequestDescriptor,
    pub matched_at: chrono::DateTime<chrono::Utc>,
}

struct InterceptorRuntime {
    remaining: Budget,
    match_count: u64,
    history: VecDeque<RecordedCall>,
    removed: bool,
}

/// A registered mock expectation.
pub struct Interceptor {
    /// Registration sequence number; lower ids win ties across origin lists
    pub id: u64,
    pub origin: OriginPattern,
    pub matcher: RequestMatcher,
    pub reply: ReplySpec,
    pub decorations: ReplyDecorations,
    pub connection_delay: Delay,
    pub response_delay: Delay,
    /// Excluded from pending expectations
    pub optional: bool,
    pub history_cap: usize,
    initial_budget: Budget,
    runtime: Mutex<InterceptorRuntime>,
}

/// Everything needed to construct an [`Interceptor`].
pub struct InterceptorParts {
    pub origin: OriginPattern,
    pub matcher: RequestMatcher,
    pub reply: ReplySpec,
    pub decorations: ReplyDecorations,
    pub budget: Budget,
    pub connection_delay: Delay,
    pub response_delay: Delay,
    pub optional: bool,
    pub history_cap: usize,
}

impl Interceptor {
    pub fn new(id: u64, parts: InterceptorParts) -> Self {
        Self {
            id,
            origin: parts.origin,
            matcher: parts.matcher,
            reply: parts.reply,
            decorations: parts.decorations,
            connection_delay: parts.connection_delay,
            response_delay: parts.response_delay,
            optional: parts.optional,
            history_cap: parts.history_cap,
            initial_budget: parts.budget,
            runtime: Mutex::new(InterceptorRuntime {
                remaining: parts.budget,
                match_count: 0,
                history: VecDeque::new(),
                removed: false,
            }),
        }
    }

    /// Evaluate this interceptor against a request. Does not touch the budget.
    pub fn evaluate(&self, request: &RequestDescriptor) -> MatchOutcome {
        if !self.origin.matches(&request.origin) {
            return MatchOutcome {
                ok: false,
                reasons: vec![format!(
                    "Origin mismatch: expected {}, got {}",
                    self.origin, request.origin
                )],
            };
        }
        self.matcher.evaluate(request)
    }

    /// Whether the interceptor can still accept a match.
    pub fn is_available(&self) -> bool {
        let runtime = self.runtime.lock();
        !runtime.removed && !runtime.remaining.is_exhausted()
    }

    /// Record a successful match and spend one unit of budget.
    ///
    /// Returns `true` when the budget is now exhausted.
    pub(crate) fn consume(&self, request: &RequestDescriptor) -> bool {
        let mut runtime = self.runtime.lock();
        runtime.remaining.decrement();
        runtime.match_count += 1;
        if self.history_cap > 0 {
            if runtime.history.len() == self.history_cap {
                runtime.history.pop_front();
            }
            runtime.history.push_back(RecordedCall {
                descriptor: request.clone(),
                matched_at: chrono::Utc::now(),
            });
        }
        runtime.remaining.is_exhausted()
    }

    pub(crate) fn mark_removed(&self) {
        self.runtime.lock().removed = true;
    }

    pub fn is_removed(&self) -> bool {
        self.runtime.lock().removed
    }

    pub fn remaining(&self) -> Budget {
        self.runtime.lock().remaining
    }

    pub fn initial_budget(&self) -> Budget {
        self.initial_budget
    }

    pub fn match_count(&self) -> u64 {
        self.runtime.lock().match_count
    }

    /// Recorded calls, oldest first. Empty unless history is enabled.
    pub fn history(&self) -> Vec<RecordedCall> {
        self.runtime.lock().history.iter().cloned().collect()
    }

    pub fn is_persistent(&self) -> bool {
        self.initial_budget == Budget::Unlimited
    }

    /// Whether this interceptor still waits to be satisfied.
    ///
    /// Persistent and optional interceptors are never pending.
    pub fn is_pending(&self) -> bool {
        if self.optional || self.is_persistent() {
            return false;
        }
        let runtime = self.runtime.lock();
        !runtime.removed && !runtime.remaining.is_exhausted()
    }

    /// `METHOD origin/path` used in diagnostics.
    pub fn describe(&self) -> String {
        let mut out = format!(
            "{} {}{}",
            self.matcher.method,
            self.origin,
            self.matcher.path.describe()
        );
        if let Some(query) = self.matcher.expected_query() {
            out.push_str(&format!(" query {query}"));
        }
        out
    }

    pub fn mismatch(&self, outcome: MatchOutcome) -> InterceptorMismatch {
        InterceptorMismatch {
            interceptor_id: self.id,
            expectation: self.describe(),
            reasons: outcome.reasons,
        }
    }

    pub fn resolve_reply(&self, request: &RequestDescriptor) -> Result<ResolvedReply, ScriptedError> {
        self.reply.resolve(request, &self.decorations)
    }
}

impl fmt::Debug for Interceptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Interceptor")
            .field("id", &self.id)
            .field("expectation", &self.describe())
            .field("reply", &self.reply)
            .field("remaining", &self.remaining())
            .finish()
    }
}
