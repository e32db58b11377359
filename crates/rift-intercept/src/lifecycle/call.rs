//! Shared state of one intercepted call.
//!
//! Every milestone goes out under the call mutex after a phase check, and
//! every terminal transition flips the phase under the same lock before it
//! cancels the driver. Whichever side takes the lock first wins, so nothing
//! can be emitted after `Close`.
//!
//! The sender that hands the match decision to the driver is owned by the
//! controllers, not by the core. Dropping every controller before `end`
//! closes the channel and the driver aborts the call.

use super::emulator::{self, MatchDecision};
use super::handle::LifecycleHandle;
use super::milestone::{CallPhase, CloseReason, Milestone, TimeoutScope};
use crate::descriptor::RequestDescriptor;
use crate::error::{InterceptError, Result};
use crate::state::StateInner;
use bytes::{Bytes, BytesMut};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};
use tracing::debug;

struct CallInner {
    phase: CallPhase,
    request: RequestDescriptor,
    written: BytesMut,
    ended: bool,
    subscribers: Vec<mpsc::UnboundedSender<Milestone>>,
}

impl CallInner {
    fn broadcast(&mut self, milestone: &Milestone) {
        self.subscribers.retain(|tx| tx.send(milestone.clone()).is_ok());
    }
}

pub(crate) struct CallCore {
    pub(crate) id: u64,
    state: Arc<StateInner>,
    inner: Mutex<CallInner>,
    cancel: CancellationToken,
    paused: watch::Sender<bool>,
}

impl CallCore {
    /// Create the call and spawn its driver. Must run inside a tokio runtime.
    pub(crate) fn start(state: Arc<StateInner>, request: RequestDescriptor) -> LifecycleHandle {
        let (milestone_tx, milestone_rx) = mpsc::unbounded_channel();
        let (decision_tx, decision_rx) = oneshot::channel();
        let (paused, _) = watch::channel(false);

        let core = Arc::new(CallCore {
            id: state.next_call_id(),
            state: Arc::clone(&state),
            inner: Mutex::new(CallInner {
                phase: CallPhase::Pending,
                request,
                written: BytesMut::new(),
                ended: false,
                subscribers: vec![milestone_tx],
            }),
            cancel: CancellationToken::new(),
            paused,
        });
        state.track_call(&core);
        debug!("Call {} intercepted", core.id);

        tokio::spawn(emulator::drive(Arc::clone(&core), decision_rx));
        let controller = CallController {
            core,
            decision_tx: Arc::new(Mutex::new(Some(decision_tx))),
        };
        LifecycleHandle::new(controller, milestone_rx)
    }

    pub(crate) fn state(&self) -> &StateInner {
        &self.state
    }

    pub(crate) fn phase(&self) -> CallPhase {
        self.inner.lock().phase
    }

    pub(crate) fn cancelled(&self) -> WaitForCancellationFuture<'_> {
        self.cancel.cancelled()
    }

    /// Deliver a milestone unless the call already reached a terminal phase.
    pub(crate) fn emit(&self, milestone: Milestone) -> bool {
        let mut inner = self.inner.lock();
        if inner.phase.is_terminal() {
            return false;
        }
        inner.broadcast(&milestone);
        true
    }

    /// Move to a non-terminal phase. Returns `false` if the call is over.
    pub(crate) fn enter(&self, phase: CallPhase) -> bool {
        let mut inner = self.inner.lock();
        if inner.phase.is_terminal() {
            return false;
        }
        inner.phase = phase;
        true
    }

    /// Deliver the final milestones, enter `phase` and stop the driver.
    ///
    /// Returns `false` when another transition already ended the call.
    pub(crate) fn terminate<I>(&self, phase: CallPhase, milestones: I) -> bool
    where
        I: IntoIterator<Item = Milestone>,
    {
        {
            let mut inner = self.inner.lock();
            if inner.phase.is_terminal() {
                return false;
            }
            for milestone in milestones {
                inner.broadcast(&milestone);
            }
            inner.phase = phase;
            inner.subscribers.clear();
        }
        self.cancel.cancel();
        debug!("Call {} finished: {:?}", self.id, phase);
        true
    }

    pub(crate) fn fail(&self, err: InterceptError) -> bool {
        debug!("Call {} failed: {}", self.id, err);
        self.terminate(
            CallPhase::Errored,
            [Milestone::Error(err), Milestone::Close(CloseReason::Errored)],
        )
    }

    pub(crate) fn abort(&self) -> bool {
        self.terminate(CallPhase::Aborted, [Milestone::Close(CloseReason::Aborted)])
    }

    /// Sleep unless the call ends first. Returns `false` if it ended.
    pub(crate) async fn sleep(&self, wait: Duration) -> bool {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => false,
            _ = tokio::time::sleep(wait) => !self.phase().is_terminal(),
        }
    }

    /// Wait while playback is paused. Returns `false` if the call ended.
    pub(crate) async fn wait_unpaused(&self) -> bool {
        let mut rx = self.paused.subscribe();
        loop {
            if !*rx.borrow_and_update() {
                return !self.phase().is_terminal();
            }
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return false,
                changed = rx.changed() => {
                    if changed.is_err() {
                        return false;
                    }
                }
            }
        }
    }

    fn write(&self, chunk: Bytes) -> Result<()> {
        let mut inner = self.inner.lock();
        if inner.phase.is_terminal() {
            return Err(InterceptError::ProtocolMisuse(format!(
                "write after the call finished ({:?})",
                inner.phase
            )));
        }
        if inner.ended {
            drop(inner);
            let err = InterceptError::ProtocolMisuse("write after end".to_string());
            self.fail(err.clone());
            return Err(err);
        }
        inner.written.extend_from_slice(&chunk);
        Ok(())
    }

    /// Seal the request body. Returns the complete request on the first
    /// call and `None` on later ones.
    fn end(&self) -> Result<Option<RequestDescriptor>> {
        let mut inner = self.inner.lock();
        if inner.phase.is_terminal() {
            return Err(InterceptError::ProtocolMisuse(format!(
                "end after the call finished ({:?})",
                inner.phase
            )));
        }
        if inner.ended {
            return Ok(None);
        }
        inner.ended = true;
        inner.phase = CallPhase::Matching;
        if !inner.written.is_empty() {
            let mut body = BytesMut::from(inner.request.body.as_ref());
            body.extend_from_slice(&inner.written.split());
            inner.request.body = body.freeze();
        }
        Ok(Some(inner.request.clone()))
    }

    fn fire_timeout(&self, scope: TimeoutScope) {
        let mut inner = self.inner.lock();
        if inner.phase.is_terminal() {
            return;
        }
        if scope == TimeoutScope::Response && inner.phase.has_response() {
            return;
        }
        debug!("Call {} timed out ({:?})", self.id, scope);
        inner.broadcast(&Milestone::Timeout);
    }

    fn subscribe(&self) -> mpsc::UnboundedReceiver<Milestone> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut inner = self.inner.lock();
        if !inner.phase.is_terminal() {
            inner.subscribers.push(tx);
        }
        rx
    }
}

/// Cloneable control surface of an intercepted call.
///
/// Dropping every controller of a call that was never ended aborts it.
#[derive(Clone)]
pub struct CallController {
    core: Arc<CallCore>,
    decision_tx: Arc<Mutex<Option<oneshot::Sender<MatchDecision>>>>,
}

impl CallController {
    pub fn id(&self) -> u64 {
        self.core.id
    }

    pub fn phase(&self) -> CallPhase {
        self.core.phase()
    }

    /// Request as currently known; the body is complete after `end`.
    pub fn request(&self) -> RequestDescriptor {
        self.core.inner.lock().request.clone()
    }

    /// Append to the request body.
    ///
    /// Writing after `end` fails the call with a protocol-misuse error.
    pub fn write(&self, chunk: impl Into<Bytes>) -> Result<()> {
        self.core.write(chunk.into())
    }

    /// Finish the request body and match it. A second call is a no-op.
    pub fn end(&self) -> Result<()> {
        let Some(request) = self.core.end()? else {
            return Ok(());
        };
        let decision = self.core.state.decide(request);
        if let Some(tx) = self.decision_tx.lock().take() {
            // The driver only drops its receiver once the call is over
            let _ = tx.send(decision);
        }
        Ok(())
    }

    /// Cancel the call. Idempotent; only the first abort emits `Close`.
    pub fn abort(&self) {
        if self.core.abort() {
            debug!("Call {} aborted", self.core.id);
        }
    }

    /// Hold body delivery after the current chunk.
    pub fn pause(&self) {
        self.core.paused.send_replace(true);
    }

    pub fn resume(&self) {
        self.core.paused.send_replace(false);
    }

    pub fn is_paused(&self) -> bool {
        *self.core.paused.borrow()
    }

    /// Emit `Timeout` once after `after` unless the call progressed past
    /// `scope` first. The call itself keeps running.
    pub fn set_timeout(&self, after: Duration, scope: TimeoutScope) {
        let core = Arc::clone(&self.core);
        tokio::spawn(async move {
            tokio::select! {
                biased;
                _ = core.cancel.cancelled() => {}
                _ = tokio::time::sleep(after) => core.fire_timeout(scope),
            }
        });
    }

    /// Additional receiver seeing milestones emitted from now on.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<Milestone> {
        self.core.subscribe()
    }
}

impl std::fmt::Debug for CallController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallController")
            .field("id", &self.core.id)
            .field("phase", &self.phase())
            .finish()
    }
}
