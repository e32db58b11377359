//! Lifecycle emulation for intercepted calls.
//!
//! Each mocked call gets a driver task that plays the milestones a real
//! connection would produce: socket assignment, request completion, the
//! response head, body chunks, end of body and close. Connection and
//! response delays run on tokio's timer, so tests can drive them with a
//! paused clock.
//!
//! Callers control a call through [`LifecycleHandle`] or a cloned
//! [`CallController`]:
//!
//! - `write` / `end` feed the request body; matching happens at `end`
//! - `abort` ends the call with `Close(Aborted)` and suppresses everything
//!   that would have followed
//! - `pause` / `resume` hold body delivery between chunks
//! - `set_timeout` emits a non-terminal `Timeout` milestone

mod call;
mod emulator;
mod handle;
mod milestone;

pub(crate) use call::CallCore;
pub(crate) use emulator::MatchDecision;

pub use call::CallController;
pub use handle::LifecycleHandle;
pub use milestone::{
    CallPhase, CloseReason, Milestone, MockResponse, ResponseHead, TimeoutScope,
};
