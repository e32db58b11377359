//! Origin registry.
//!
//! Interceptors are grouped into candidate lists keyed by normalized origin
//! (`scheme://host:port`), with pattern origins under their own
//! `pattern:<regex>` keys. Matching walks every candidate list that applies
//! to the request in registration order, so the earliest-declared interceptor
//! that accepts the request wins.
//!
//! All mutation goes through `&mut self`; the owning state keeps the
//! registry behind a write lock so that finding a match, spending its
//! budget and removing it when exhausted happen as one step.

mod policy;

pub use policy::{HostMatcher, NetConnectPolicy};

use crate::descriptor::{Origin, RequestDescriptor};
use crate::error::InterceptorMismatch;
use crate::interceptor::{Budget, Interceptor};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Result of matching one request against the registry.
#[derive(Debug)]
pub enum FindResult {
    Matched(Arc<Interceptor>),
    /// Every candidate declined; one entry per candidate evaluated
    NoMatch(Vec<InterceptorMismatch>),
}

/// Summary of an interceptor that has not yet been satisfied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingExpectation {
    pub interceptor_id: u64,
    pub expectation: String,
    pub remaining: Budget,
}

impl fmt::Display for PendingExpectation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({} remaining)", self.expectation, self.remaining)
    }
}

impl From<&Interceptor> for PendingExpectation {
    fn from(interceptor: &Interceptor) -> Self {
        Self {
            interceptor_id: interceptor.id,
            expectation: interceptor.describe(),
            remaining: interceptor.remaining(),
        }
    }
}

#[derive(Debug, Default)]
pub struct OriginRegistry {
    lists: HashMap<String, Vec<Arc<Interceptor>>>,
}

impl OriginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an interceptor to the end of its origin's candidate list.
    pub fn register(&mut self, interceptor: Arc<Interceptor>) {
        let key = interceptor.origin.registry_key();
        debug!(
            "Registering interceptor {} under {}: {}",
            interceptor.id,
            key,
            interceptor.describe()
        );
        self.lists.entry(key).or_default().push(interceptor);
    }

    /// Candidates for an origin, ordered by registration.
    fn candidates(&self, origin: &Origin) -> Vec<Arc<Interceptor>> {
        let exact_key = origin.key();
        let mut candidates: Vec<Arc<Interceptor>> = self
            .lists
            .iter()
            .filter(|(key, list)| {
                if **key == exact_key {
                    return true;
                }
                key.starts_with("pattern:")
                    && list.first().is_some_and(|i| i.origin.matches(origin))
            })
            .flat_map(|(_, list)| list.iter().cloned())
            .filter(|i| i.is_available())
            .collect();
        candidates.sort_by_key(|i| i.id);
        candidates
    }

    /// Whether any active interceptor could serve this origin.
    pub fn has_interceptors_for(&self, origin: &Origin) -> bool {
        !self.candidates(origin).is_empty()
    }

    /// Find the first interceptor accepting the request and consume it.
    ///
    /// An interceptor whose budget reaches zero is removed before this
    /// returns, so no later request can match it.
    pub fn find(&mut self, request: &RequestDescriptor) -> FindResult {
        let mut mismatches = Vec::new();
        for candidate in self.candidates(&request.origin) {
            let outcome = candidate.evaluate(request);
            if outcome.ok {
                if candidate.consume(request) {
                    debug!("Interceptor {} exhausted its budget", candidate.id);
                    self.remove(candidate.id);
                }
                return FindResult::Matched(candidate);
            }
            mismatches.push(candidate.mismatch(outcome));
        }
        FindResult::NoMatch(mismatches)
    }

    /// Remove an interceptor by id. Returns `false` if it was not registered.
    pub fn remove(&mut self, id: u64) -> bool {
        let mut removed = None;
        for list in self.lists.values_mut() {
            if let Some(pos) = list.iter().position(|i| i.id == id) {
                removed = Some(list.remove(pos));
                break;
            }
        }
        self.lists.retain(|_, list| !list.is_empty());
        match removed {
            Some(interceptor) => {
                interceptor.mark_removed();
                true
            }
            None => false,
        }
    }

    /// Drop every interceptor.
    pub fn clear(&mut self) {
        for interceptor in self.lists.values().flatten() {
            interceptor.mark_removed();
        }
        self.lists.clear();
    }

    /// Every registered interceptor in registration order.
    pub fn all(&self) -> Vec<Arc<Interceptor>> {
        let mut all: Vec<_> = self.lists.values().flatten().cloned().collect();
        all.sort_by_key(|i| i.id);
        all
    }

    pub fn pending(&self) -> Vec<PendingExpectation> {
        self.all()
            .iter()
            .filter(|i| i.is_pending())
            .map(|i| PendingExpectation::from(i.as_ref()))
            .collect()
    }

    /// Registered interceptors that can still match, persistent ones included.
    pub fn active(&self) -> Vec<PendingExpectation> {
        self.all()
            .iter()
            .filter(|i| i.is_available())
            .map(|i| PendingExpectation::from(i.as_ref()))
            .collect()
    }

    /// Whether every non-persistent, non-optional interceptor is satisfied.
    pub fn is_done(&self) -> bool {
        self.lists.values().flatten().all(|i| !i.is_pending())
    }

    /// Registry keys that currently hold interceptors, sorted.
    pub fn origins(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.lists.keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn len(&self) -> usize {
        self.lists.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.lists.is_empty()
    }
}
