//! Driver task playing one call's milestones.

use super::call::CallCore;
use super::milestone::{CallPhase, CloseReason, Milestone, ResponseHead};
use crate::descriptor::RequestDescriptor;
use crate::error::{InterceptError, InterceptorMismatch};
use crate::events::InterceptEvent;
use crate::interceptor::{BodySource, Interceptor};
use futures::StreamExt;
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

/// Outcome of matching a completed request.
pub(crate) enum MatchDecision {
    Matched {
        interceptor: Arc<Interceptor>,
        request: RequestDescriptor,
    },
    Unmatched {
        request: RequestDescriptor,
        mismatches: Vec<InterceptorMismatch>,
        allow_net: bool,
    },
}

pub(crate) async fn drive(core: Arc<CallCore>, mut decision_rx: oneshot::Receiver<MatchDecision>) {
    let decision = if core.emit(Milestone::Socket) {
        tokio::select! {
            biased;
            // An abort after end() still leaves the decision queued
            _ = core.cancelled() => decision_rx.try_recv().ok(),
            decision = &mut decision_rx => decision.ok(),
        }
    } else {
        decision_rx.try_recv().ok()
    };
    let Some(decision) = decision else {
        // Aborted, or every controller dropped, before the request was ended
        core.abort();
        return;
    };

    // end() returns before anything it caused becomes observable
    tokio::task::yield_now().await;
    let live = core.emit(Milestone::Finish);

    match decision {
        MatchDecision::Matched {
            interceptor,
            request,
        } => {
            if live {
                play(core, interceptor, request).await;
            }
        }
        MatchDecision::Unmatched {
            request,
            mismatches,
            allow_net,
        } => {
            // Observers hear about failed matches even if the call is gone
            core.state().events.publish(&InterceptEvent::NoMatch {
                descriptor: request.clone(),
                mismatches: mismatches.clone(),
            });
            if !live {
                return;
            }
            if allow_net {
                debug!("Call {} passes through to {}", core.id, request.url());
                core.terminate(CallPhase::Unmatched, [Milestone::Passthrough(request)]);
            } else {
                warn!(
                    "Call {} matched no interceptor and real connections to {} are disabled",
                    core.id, request.origin
                );
                core.fail(InterceptError::NoMatch {
                    descriptor: Box::new(request),
                    mismatches,
                    net_connect_denied: true,
                });
            }
        }
    }
}

async fn play(core: Arc<CallCore>, interceptor: Arc<Interceptor>, request: RequestDescriptor) {
    if !core.enter(CallPhase::Matched) {
        return;
    }
    info!(
        "Call {} matched interceptor {}: {} {}",
        core.id,
        interceptor.id,
        request.method,
        request.url()
    );
    core.state().events.publish(&InterceptEvent::Request {
        interceptor_id: interceptor.id,
        descriptor: request.clone(),
    });

    if let Some(err) = interceptor.reply.scripted_error() {
        core.fail(err.clone().into());
        return;
    }

    if let Some(wait) = interceptor.connection_delay.sample() {
        if !core.enter(CallPhase::Delaying) || !core.sleep(wait).await {
            return;
        }
    }

    let reply = match interceptor.resolve_reply(&request) {
        Ok(reply) => reply,
        Err(err) => {
            core.fail(err.into());
            return;
        }
    };
    let status = reply.status;

    if !core.enter(CallPhase::Replying)
        || !core.emit(Milestone::Response(ResponseHead {
            status,
            headers: reply.headers,
        }))
    {
        return;
    }

    if let Some(wait) = interceptor.response_delay.sample() {
        if !core.sleep(wait).await {
            return;
        }
    }

    if !core.enter(CallPhase::Streaming) {
        return;
    }
    match reply.body {
        BodySource::Chunks(chunks) => {
            for chunk in chunks {
                if !core.wait_unpaused().await || !core.emit(Milestone::Data(chunk)) {
                    return;
                }
            }
        }
        BodySource::Stream(mut stream) => loop {
            if !core.wait_unpaused().await {
                return;
            }
            let next = tokio::select! {
                biased;
                _ = core.cancelled() => return,
                next = stream.next() => next,
            };
            match next {
                Some(chunk) if chunk.is_empty() => {}
                Some(chunk) => {
                    if !core.emit(Milestone::Data(chunk)) {
                        return;
                    }
                }
                None => break,
            }
        },
    }

    if !core.emit(Milestone::End) {
        return;
    }
    if core.terminate(CallPhase::Complete, [Milestone::Close(CloseReason::Completed)]) {
        core.state().events.publish(&InterceptEvent::Replied {
            interceptor_id: interceptor.id,
            descriptor: request,
            status,
        });
    }
}
