use super::call::CallController;
use super::milestone::{CallPhase, CloseReason, Milestone, MockResponse, TimeoutScope};
use crate::error::{InterceptError, Result};
use bytes::{Bytes, BytesMut};
use futures::Stream;
use std::time::Duration;
use tokio::sync::mpsc;

/// Handle returned for a mocked call.
///
/// Owns the primary milestone receiver, which exists from the moment the
/// call is intercepted so no milestone can be missed.
#[derive(Debug)]
pub struct LifecycleHandle {
    controller: CallController,
    milestones: mpsc::UnboundedReceiver<Milestone>,
}

impl LifecycleHandle {
    pub(crate) fn new(
        controller: CallController,
        milestones: mpsc::UnboundedReceiver<Milestone>,
    ) -> Self {
        Self {
            controller,
            milestones,
        }
    }

    pub fn id(&self) -> u64 {
        self.controller.id()
    }

    pub fn controller(&self) -> CallController {
        self.controller.clone()
    }

    pub fn phase(&self) -> CallPhase {
        self.controller.phase()
    }

    pub fn write(&self, chunk: impl Into<Bytes>) -> Result<()> {
        self.controller.write(chunk)
    }

    pub fn end(&self) -> Result<()> {
        self.controller.end()
    }

    pub fn abort(&self) {
        self.controller.abort()
    }

    pub fn pause(&self) {
        self.controller.pause()
    }

    pub fn resume(&self) {
        self.controller.resume()
    }

    pub fn set_timeout(&self, after: Duration, scope: TimeoutScope) {
        self.controller.set_timeout(after, scope)
    }

    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<Milestone> {
        self.controller.subscribe()
    }

    /// Next milestone, or `None` once the call is over and drained.
    pub async fn next_milestone(&mut self) -> Option<Milestone> {
        self.milestones.recv().await
    }

    /// Next milestone if one is already queued.
    pub fn try_next_milestone(&mut self) -> Option<Milestone> {
        self.milestones.try_recv().ok()
    }

    pub fn into_stream(self) -> impl Stream<Item = Milestone> {
        futures::stream::unfold(self.milestones, |mut rx| async move {
            rx.recv().await.map(|milestone| (milestone, rx))
        })
    }

    /// Drain milestones until the call closes and assemble the response.
    ///
    /// The request must be ended, by this handle or a controller clone.
    pub async fn collect(mut self) -> Result<MockResponse> {
        let mut head = None;
        let mut body = BytesMut::new();
        let mut failure = None;

        while let Some(milestone) = self.milestones.recv().await {
            match milestone {
                Milestone::Response(h) => head = Some(h),
                Milestone::Data(chunk) => body.extend_from_slice(&chunk),
                Milestone::Error(err) => failure = Some(err),
                Milestone::Passthrough(request) => {
                    return Err(InterceptError::Unmocked(Box::new(request)))
                }
                Milestone::Close(CloseReason::Aborted) => return Err(InterceptError::Aborted),
                Milestone::Close(CloseReason::Errored) => {
                    return Err(failure.unwrap_or_else(|| {
                        InterceptError::ProtocolMisuse("call closed with an error".to_string())
                    }))
                }
                Milestone::Close(CloseReason::Completed) => {
                    let Some(head) = head else {
                        break;
                    };
                    return Ok(MockResponse {
                        status: head.status,
                        headers: head.headers,
                        body: body.freeze(),
                    });
                }
                Milestone::Socket | Milestone::Finish | Milestone::End | Milestone::Timeout => {}
            }
        }

        Err(InterceptError::ProtocolMisuse(
            "call ended without a response".to_string(),
        ))
    }
}
