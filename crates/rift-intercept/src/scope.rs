//! Declaration API.
//!
//! A [`ScopeHandle`] collects interceptors for one origin (or origin
//! pattern). Each `expect`-style call returns an [`InterceptorBuilder`]; its
//! terminal `respond*` method registers the interceptor and returns an
//! [`InterceptorHandle`] for inspecting it afterwards.
//!
//! ```ignore
//! let scope = state.declare_origin("http://api.example.test")?;
//! scope
//!     .get("/users/1")
//!     .times(2)
//!     .delay(Duration::from_millis(50))
//!     .respond(200, r#"{"id": 1}"#);
//! ```

use crate::delay::Delay;
use crate::descriptor::RequestDescriptor;
use crate::error::{ScriptedError, UnsatisfiedExpectations};
use crate::interceptor::{
    Budget, Interceptor, InterceptorParts, OriginPattern, RecordedCall, Reply,
    ReplyDecorations, ReplyHeaders, ReplySpec,
};
use crate::predicate::{
    BodyMatcher, HeaderMatcher, PathMatcher, QueryMatcher, QueryValue, RequestMatcher,
    ValueMatcher,
};
use crate::registry::PendingExpectation;
use crate::state::StateInner;
use bytes::Bytes;
use futures::stream::BoxStream;
use http::Method;
use parking_lot::Mutex;
use serde_json::Value;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Clone, Default)]
struct ScopeOptions {
    persist: bool,
    headers: Vec<HeaderMatcher>,
    bad_headers: Vec<String>,
    decorations: ReplyDecorations,
}

/// Interceptor declarations for one origin.
///
/// Options set on the scope apply to interceptors declared after them.
/// Clones share the list of declared interceptors.
#[derive(Clone)]
pub struct ScopeHandle {
    state: Arc<StateInner>,
    origin: OriginPattern,
    options: ScopeOptions,
    declared: Arc<Mutex<Vec<Arc<Interceptor>>>>,
}

impl ScopeHandle {
    pub(crate) fn new(state: Arc<StateInner>, origin: OriginPattern) -> Self {
        Self {
            state,
            origin,
            options: ScopeOptions::default(),
            declared: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn origin(&self) -> &OriginPattern {
        &self.origin
    }

    /// Require a header on every interceptor of this scope.
    pub fn match_header(mut self, name: impl Into<String>, value: impl Into<ValueMatcher>) -> Self {
        self.options.headers.push(HeaderMatcher::new(name, value));
        self
    }

    /// Reject requests carrying any of these headers.
    pub fn bad_headers<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.options
            .bad_headers
            .extend(names.into_iter().map(Into::into));
        self
    }

    /// Make every interceptor of this scope persistent.
    pub fn persist(mut self) -> Self {
        self.options.persist = true;
        self
    }

    pub fn default_reply_headers(mut self, headers: ReplyHeaders) -> Self {
        self.options.decorations.default_headers = headers;
        self
    }

    /// Add `Content-Length` to buffered replies that lack it.
    pub fn reply_content_length(mut self) -> Self {
        self.options.decorations.content_length = true;
        self
    }

    /// Add a `Date` header to replies that lack it.
    pub fn reply_date(mut self) -> Self {
        self.options.decorations.date = true;
        self
    }

    pub fn expect(&self, method: Method, path: impl Into<PathMatcher>) -> InterceptorBuilder {
        let mut matcher = RequestMatcher::new(method, path.into());
        matcher.headers = self.options.headers.clone();
        matcher.forbidden_headers = self.options.bad_headers.clone();
        InterceptorBuilder {
            scope: self.clone(),
            matcher,
            budget: if self.options.persist {
                Budget::Unlimited
            } else {
                Budget::Times(1)
            },
            optional: false,
            connection_delay: Delay::None,
            response_delay: Delay::None,
            history_cap: self.state.default_history_cap(),
        }
    }

    pub fn expect_with_body(
        &self,
        method: Method,
        path: impl Into<PathMatcher>,
        body: impl Into<BodyMatcher>,
    ) -> InterceptorBuilder {
        self.expect(method, path).body(body)
    }

    pub fn get(&self, path: impl Into<PathMatcher>) -> InterceptorBuilder {
        self.expect(Method::GET, path)
    }

    pub fn post(&self, path: impl Into<PathMatcher>) -> InterceptorBuilder {
        self.expect(Method::POST, path)
    }

    pub fn put(&self, path: impl Into<PathMatcher>) -> InterceptorBuilder {
        self.expect(Method::PUT, path)
    }

    pub fn patch(&self, path: impl Into<PathMatcher>) -> InterceptorBuilder {
        self.expect(Method::PATCH, path)
    }

    pub fn delete(&self, path: impl Into<PathMatcher>) -> InterceptorBuilder {
        self.expect(Method::DELETE, path)
    }

    pub fn head(&self, path: impl Into<PathMatcher>) -> InterceptorBuilder {
        self.expect(Method::HEAD, path)
    }

    pub fn options(&self, path: impl Into<PathMatcher>) -> InterceptorBuilder {
        self.expect(Method::OPTIONS, path)
    }

    /// Whether every interceptor declared through this scope is satisfied.
    pub fn is_done(&self) -> bool {
        self.declared.lock().iter().all(|i| !i.is_pending())
    }

    pub fn pending(&self) -> Vec<PendingExpectation> {
        self.declared
            .lock()
            .iter()
            .filter(|i| i.is_pending())
            .map(|i| PendingExpectation::from(i.as_ref()))
            .collect()
    }

    /// Assert that the scope is done.
    pub fn done(&self) -> Result<(), UnsatisfiedExpectations> {
        let pending = self.pending();
        if pending.is_empty() {
            Ok(())
        } else {
            Err(UnsatisfiedExpectations { pending })
        }
    }
}

impl fmt::Debug for ScopeHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScopeHandle")
            .field("origin", &self.origin)
            .field("declared", &self.declared.lock().len())
            .finish()
    }
}

/// One interceptor under construction.
#[must_use = "an interceptor is only registered by a respond* call"]
pub struct InterceptorBuilder {
    scope: ScopeHandle,
    matcher: RequestMatcher,
    budget: Budget,
    optional: bool,
    connection_delay: Delay,
    response_delay: Delay,
    history_cap: usize,
}

impl InterceptorBuilder {
    /// Accept exactly `n` matches. Zero is treated as one.
    pub fn times(mut self, n: u32) -> Self {
        if n == 0 {
            warn!("times(0) on {} treated as times(1)", self.matcher.path.describe());
        }
        self.budget = Budget::Times(n.max(1));
        self
    }

    pub fn once(self) -> Self {
        self.times(1)
    }

    pub fn twice(self) -> Self {
        self.times(2)
    }

    pub fn thrice(self) -> Self {
        self.times(3)
    }

    /// Accept unlimited matches, or revert to a single match.
    pub fn persist(mut self, flag: bool) -> Self {
        self.budget = if flag {
            Budget::Unlimited
        } else {
            Budget::Times(1)
        };
        self
    }

    /// Do not report this interceptor as pending.
    pub fn optionally(mut self) -> Self {
        self.optional = true;
        self
    }

    /// Delay before the response head.
    pub fn delay_connection(mut self, delay: impl Into<Delay>) -> Self {
        self.connection_delay = delay.into();
        self
    }

    /// Delay between the response head and the body.
    pub fn delay(mut self, delay: impl Into<Delay>) -> Self {
        self.response_delay = delay.into();
        self
    }

    /// Keep the last `max` matched requests.
    pub fn remember(mut self, max: usize) -> Self {
        self.history_cap = max;
        self
    }

    pub fn match_header(mut self, name: impl Into<String>, value: impl Into<ValueMatcher>) -> Self {
        self.matcher.headers.push(HeaderMatcher::new(name, value));
        self
    }

    pub fn bad_headers<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.matcher
            .forbidden_headers
            .extend(names.into_iter().map(Into::into));
        self
    }

    /// Require exactly these decoded query parameters.
    pub fn query<I, K, V>(mut self, params: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<QueryValue>,
    {
        self.matcher.query = Some(QueryMatcher::exact(params.into_iter().collect()));
        self
    }

    /// Require a query equal to a JSON object (nested objects and arrays
    /// use bracket notation).
    pub fn query_json(mut self, expected: &Value) -> Self {
        self.matcher.query = Some(QueryMatcher::exact(QueryValue::from_json(expected)));
        self
    }

    /// Like [`query`](Self::query), but values are compared still encoded.
    pub fn query_encoded<I, K, V>(mut self, params: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<QueryValue>,
    {
        self.matcher.query = Some(QueryMatcher::encoded(params.into_iter().collect()));
        self
    }

    pub fn any_query(mut self) -> Self {
        self.matcher.query = Some(QueryMatcher::any());
        self
    }

    pub fn query_matching<F>(mut self, f: F) -> Self
    where
        F: Fn(&QueryValue) -> bool + Send + Sync + 'static,
    {
        self.matcher.query = Some(QueryMatcher::predicate(f));
        self
    }

    pub fn body(mut self, body: impl Into<BodyMatcher>) -> Self {
        self.matcher.body = Some(body.into());
        self
    }

    /// Require a JSON body containing at least these fields.
    pub fn json_body(self, expected: Value) -> Self {
        self.body(BodyMatcher::Json(expected))
    }

    /// Require a urlencoded form body equal to this JSON object.
    pub fn form_body(self, expected: &Value) -> Self {
        self.body(BodyMatcher::Form(QueryValue::from_json(expected)))
    }

    pub fn body_matching<F>(self, f: F) -> Self
    where
        F: Fn(&[u8]) -> bool + Send + Sync + 'static,
    {
        self.body(BodyMatcher::predicate(f))
    }

    pub fn respond(self, status: u16, body: impl Into<Bytes>) -> InterceptorHandle {
        self.respond_with_headers(status, body, ReplyHeaders::new())
    }

    pub fn respond_with_headers(
        self,
        status: u16,
        body: impl Into<Bytes>,
        headers: ReplyHeaders,
    ) -> InterceptorHandle {
        self.register(ReplySpec::Literal {
            status,
            body: body.into(),
            headers,
        })
    }

    /// Compute the reply from the matched request.
    pub fn respond_with<F>(self, generate: F) -> InterceptorHandle
    where
        F: Fn(&RequestDescriptor) -> Result<Reply, ScriptedError> + Send + Sync + 'static,
    {
        self.register(ReplySpec::Generator(Arc::new(generate)))
    }

    /// Reply with the contents of a file read when the call is replied.
    pub fn respond_with_file(self, status: u16, path: impl Into<PathBuf>) -> InterceptorHandle {
        self.register(ReplySpec::File {
            status,
            path: path.into(),
            headers: ReplyHeaders::new(),
        })
    }

    /// Stream the body chunk by chunk from a fresh stream per call.
    pub fn respond_with_stream<F>(
        self,
        status: u16,
        headers: ReplyHeaders,
        factory: F,
    ) -> InterceptorHandle
    where
        F: Fn(&RequestDescriptor) -> BoxStream<'static, Bytes> + Send + Sync + 'static,
    {
        self.register(ReplySpec::Stream {
            status,
            headers,
            factory: Arc::new(factory),
        })
    }

    /// Fail the call with this error instead of replying.
    pub fn respond_with_error(self, err: impl Into<ScriptedError>) -> InterceptorHandle {
        self.register(ReplySpec::Error(err.into()))
    }

    fn register(self, reply: ReplySpec) -> InterceptorHandle {
        let scope = self.scope;
        let interceptor = Arc::new(Interceptor::new(
            scope.state.next_interceptor_id(),
            InterceptorParts {
                origin: scope.origin.clone(),
                matcher: self.matcher,
                reply,
                decorations: scope.options.decorations.clone(),
                budget: self.budget,
                connection_delay: self.connection_delay,
                response_delay: self.response_delay,
                optional: self.optional,
                history_cap: self.history_cap,
            },
        ));
        info!(
            "Registered interceptor {} ({}, budget {}): {}",
            interceptor.id,
            interceptor.reply.kind(),
            interceptor.initial_budget(),
            interceptor.describe()
        );

        scope.state.registry.write().register(Arc::clone(&interceptor));
        scope.declared.lock().push(Arc::clone(&interceptor));
        InterceptorHandle {
            interceptor,
            state: scope.state,
        }
    }
}

/// Inspection handle of a registered interceptor.
#[derive(Clone)]
pub struct InterceptorHandle {
    interceptor: Arc<Interceptor>,
    state: Arc<StateInner>,
}

impl InterceptorHandle {
    pub fn id(&self) -> u64 {
        self.interceptor.id
    }

    pub fn remaining(&self) -> Budget {
        self.interceptor.remaining()
    }

    pub fn match_count(&self) -> u64 {
        self.interceptor.match_count()
    }

    pub fn history(&self) -> Vec<RecordedCall> {
        self.interceptor.history()
    }

    /// Exhausted or removed; a persistent interceptor is done once matched.
    pub fn is_done(&self) -> bool {
        if self.interceptor.is_persistent() {
            return self.interceptor.match_count() > 0;
        }
        !self.interceptor.is_available()
    }

    pub fn describe(&self) -> String {
        self.interceptor.describe()
    }

    /// Unregister the interceptor. Returns `false` if it was already gone.
    pub fn remove(&self) -> bool {
        self.state.registry.write().remove(self.interceptor.id)
    }
}

impl fmt::Debug for InterceptorHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&self.interceptor, f)
    }
}
