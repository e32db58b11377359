//! In-process HTTP call interception and mock playback.
//!
//! Requests are described by [`RequestDescriptor`] and handed to
//! [`InterceptionState::intercept`]. When the target origin has interceptors
//! (or real connections are denied) the call is emulated: the request body
//! is matched against registered interceptors in registration order and the
//! winning interceptor's reply is played back through the same milestone
//! sequence a real connection produces, including simulated latency,
//! streaming, pause/resume, abort and timeouts.
//!
//! ```ignore
//! let state = InterceptionState::create();
//! state
//!     .declare_origin("http://api.example.test")?
//!     .post("/users")
//!     .json_body(json!({"name": "ann"}))
//!     .respond(201, r#"{"id": 7}"#);
//!
//! let request = RequestDescriptor::builder("POST", "http://api.example.test/users")
//!     .body(r#"{"name": "ann", "age": 3}"#)
//!     .build()?;
//! let response = state.send(request).await?;
//! assert_eq!(response.status, 201);
//! ```

// ===== Request model and matching =====
pub mod descriptor;
pub mod predicate;

// ===== Interceptors and their registry =====
pub mod delay;
pub mod interceptor;
pub mod registry;
pub mod scope;

// ===== Playback and observation =====
pub mod events;
pub mod lifecycle;

pub mod config;
pub mod error;
pub mod state;

pub use config::{ConfigError, InterceptionConfig};
pub use delay::Delay;
pub use descriptor::{DescriptorError, HeaderList, Origin, RequestDescriptor};
pub use error::{InterceptError, InterceptorMismatch, Result, ScriptedError, UnsatisfiedExpectations};
pub use events::{EventKind, InterceptEvent, SubscriptionId};
pub use interceptor::{Budget, RecordedCall, Reply, ReplyHeaders};
pub use lifecycle::{
    CallController, CallPhase, CloseReason, LifecycleHandle, Milestone, MockResponse,
    ResponseHead, TimeoutScope,
};
pub use predicate::{BodyMatcher, PathMatcher, QueryValue, ValueMatcher};
pub use registry::{HostMatcher, PendingExpectation};
pub use scope::{InterceptorBuilder, InterceptorHandle, ScopeHandle};
pub use state::{Interception, InterceptionState};
