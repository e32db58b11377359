//! Interception state.
//!
//! [`InterceptionState`] is the explicit context object that owns the origin
//! registry, the net-connect policy, the event bus and every live call. It
//! is cheap to clone; clones share the same state. Separate states are fully
//! isolated from each other, so parallel tests each create their own.

use crate::config::{ConfigError, InterceptionConfig};
use crate::descriptor::{DescriptorError, Origin, RequestDescriptor};
use crate::error::{InterceptError, Result};
use crate::events::{EventBus, EventKind, InterceptEvent, SubscriptionId};
use crate::interceptor::OriginPattern;
use crate::lifecycle::{CallCore, LifecycleHandle, MatchDecision, MockResponse};
use crate::registry::{FindResult, HostMatcher, NetConnectPolicy, OriginRegistry, PendingExpectation};
use crate::scope::ScopeHandle;
use parking_lot::{Mutex, RwLock};
use regex::Regex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tracing::{debug, info};

/// Outcome of handing a request to the interception layer.
#[derive(Debug)]
pub enum Interception {
    /// The call is emulated; drive it through the handle.
    Mocked(LifecycleHandle),
    /// The transport should perform the request for real.
    Passthrough(RequestDescriptor),
}

pub(crate) struct StateInner {
    config: InterceptionConfig,
    pub(crate) registry: RwLock<OriginRegistry>,
    policy: RwLock<NetConnectPolicy>,
    pub(crate) events: EventBus,
    calls: Mutex<Vec<Weak<CallCore>>>,
    active: AtomicBool,
    next_interceptor_id: AtomicU64,
    next_call_id: AtomicU64,
}

impl StateInner {
    pub(crate) fn next_call_id(&self) -> u64 {
        self.next_call_id.fetch_add(1, Ordering::Relaxed)
    }

    pub(crate) fn next_interceptor_id(&self) -> u64 {
        self.next_interceptor_id.fetch_add(1, Ordering::Relaxed)
    }

    pub(crate) fn default_history_cap(&self) -> usize {
        self.config.default_history_cap
    }

    pub(crate) fn track_call(&self, core: &Arc<CallCore>) {
        let mut calls = self.calls.lock();
        calls.retain(|call| call.upgrade().is_some_and(|c| !c.phase().is_terminal()));
        calls.push(Arc::downgrade(core));
    }

    /// Match a completed request. Budget is spent here, before any reply
    /// content exists.
    pub(crate) fn decide(&self, request: RequestDescriptor) -> MatchDecision {
        let result = self.registry.write().find(&request);
        match result {
            FindResult::Matched(interceptor) => {
                debug!(
                    "{} {} matched interceptor {}",
                    request.method,
                    request.url(),
                    interceptor.id
                );
                MatchDecision::Matched {
                    interceptor,
                    request,
                }
            }
            FindResult::NoMatch(mismatches) => {
                let allow_net = self.policy.read().allows(&request.origin);
                debug!(
                    "{} {} matched none of {} candidates (real connections {})",
                    request.method,
                    request.url(),
                    mismatches.len(),
                    if allow_net { "allowed" } else { "denied" }
                );
                MatchDecision::Unmatched {
                    request,
                    mismatches,
                    allow_net,
                }
            }
        }
    }
}

#[derive(Clone)]
pub struct InterceptionState {
    inner: Arc<StateInner>,
}

impl Default for InterceptionState {
    fn default() -> Self {
        Self::create()
    }
}

impl InterceptionState {
    /// State with default configuration: active, real connections allowed.
    pub fn create() -> Self {
        Self::build(InterceptionConfig::default())
    }

    pub fn with_config(config: InterceptionConfig) -> std::result::Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self::build(config))
    }

    fn build(config: InterceptionConfig) -> Self {
        let policy = config.net_connect_policy();
        let active = config.enabled;
        Self {
            inner: Arc::new(StateInner {
                config,
                registry: RwLock::new(OriginRegistry::new()),
                policy: RwLock::new(policy),
                events: EventBus::new(),
                calls: Mutex::new(Vec::new()),
                active: AtomicBool::new(active),
                next_interceptor_id: AtomicU64::new(1),
                next_call_id: AtomicU64::new(1),
            }),
        }
    }

    pub fn config(&self) -> &InterceptionConfig {
        &self.inner.config
    }

    /// Start declaring interceptors for `scheme://host[:port]`.
    pub fn declare_origin(&self, origin: &str) -> std::result::Result<ScopeHandle, DescriptorError> {
        let origin = Origin::parse(origin)?;
        Ok(ScopeHandle::new(Arc::clone(&self.inner), origin.into()))
    }

    /// Start declaring interceptors for every origin the pattern matches.
    pub fn declare_origin_matching(&self, pattern: Regex) -> ScopeHandle {
        ScopeHandle::new(Arc::clone(&self.inner), OriginPattern::from(pattern))
    }

    /// Decide whether a request is emulated or passes through.
    ///
    /// A request is emulated when its origin has active interceptors or when
    /// real connections to it are denied. Must be called inside a tokio
    /// runtime.
    pub fn intercept(&self, request: RequestDescriptor) -> Interception {
        if !self.is_active() {
            return Interception::Passthrough(request);
        }

        let has_interceptors = self
            .inner
            .registry
            .read()
            .has_interceptors_for(&request.origin);
        if !has_interceptors && self.inner.policy.read().allows(&request.origin) {
            debug!("No interceptors for {}, passing through", request.origin);
            self.inner.events.publish(&InterceptEvent::NoMatch {
                descriptor: request.clone(),
                mismatches: Vec::new(),
            });
            return Interception::Passthrough(request);
        }

        Interception::Mocked(CallCore::start(Arc::clone(&self.inner), request))
    }

    /// Intercept, end and collect a request in one step.
    pub async fn send(&self, request: RequestDescriptor) -> Result<MockResponse> {
        match self.intercept(request) {
            Interception::Passthrough(request) => Err(InterceptError::Unmocked(Box::new(request))),
            Interception::Mocked(handle) => {
                handle.end()?;
                handle.collect().await
            }
        }
    }

    pub fn on<F>(&self, kind: EventKind, handler: F) -> SubscriptionId
    where
        F: Fn(&InterceptEvent) + Send + Sync + 'static,
    {
        self.inner.events.subscribe(kind, handler)
    }

    pub fn off(&self, id: SubscriptionId) -> bool {
        self.inner.events.unsubscribe(id)
    }

    pub fn pending_expectations(&self) -> Vec<PendingExpectation> {
        self.inner.registry.read().pending()
    }

    pub fn active_expectations(&self) -> Vec<PendingExpectation> {
        self.inner.registry.read().active()
    }

    /// True when every non-persistent, non-optional interceptor used its
    /// full budget.
    pub fn is_fully_satisfied(&self) -> bool {
        self.inner.registry.read().is_done()
    }

    pub fn origins(&self) -> Vec<String> {
        self.inner.registry.read().origins()
    }

    pub fn disallow_real_connections(&self, hosts: Option<HostMatcher>) {
        self.inner.policy.write().disallow(hosts);
    }

    pub fn allow_real_connections(&self, hosts: Option<HostMatcher>) {
        self.inner.policy.write().allow(hosts);
    }

    pub fn allows_real_connection(&self, origin: &Origin) -> bool {
        self.inner.policy.read().allows(origin)
    }

    /// Abort every live call. Returns how many were aborted.
    pub fn abort_pending(&self) -> usize {
        let calls: Vec<Arc<CallCore>> = self
            .inner
            .calls
            .lock()
            .drain(..)
            .filter_map(|call| call.upgrade())
            .collect();
        calls.into_iter().filter(|call| call.abort()).count()
    }

    /// Drop every interceptor. Live calls keep running.
    pub fn clear(&self) {
        self.inner.registry.write().clear();
    }

    /// Return to a clean, inactive state.
    ///
    /// Interceptors, live calls and event subscribers are dropped and the
    /// net-connect policy is reset to the configured one. Until
    /// [`activate`](Self::activate) is called every request passes through.
    pub fn teardown(&self) {
        self.clear();
        let aborted = self.abort_pending();
        self.inner.events.clear();
        *self.inner.policy.write() = self.inner.config.net_connect_policy();
        self.inner.active.store(false, Ordering::SeqCst);
        info!("Interception state torn down ({} live calls aborted)", aborted);
    }

    pub fn activate(&self) {
        self.inner.active.store(true, Ordering::SeqCst);
        info!("Interception activated");
    }

    pub fn is_active(&self) -> bool {
        self.inner.active.load(Ordering::SeqCst)
    }
}

impl std::fmt::Debug for InterceptionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InterceptionState")
            .field("active", &self.is_active())
            .field("interceptors", &self.inner.registry.read().len())
            .finish()
    }
}
