use crate::descriptor::{HeaderList, RequestDescriptor};
use crate::error::InterceptError;
use bytes::Bytes;
use std::fmt;

/// Status line and headers of a mocked response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseHead {
    pub status: u16,
    pub headers: HeaderList,
}

/// Why a call stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    Completed,
    Errored,
    Aborted,
}

/// One observable step of an intercepted call.
///
/// Milestones reach every subscriber in the order listed here:
/// `Socket`, `Finish`, `Response`, `Data`*, `End`, `Close`. An `Error` is
/// always followed by `Close(Errored)`, and `Close` is always the last
/// milestone a call emits.
#[derive(Debug, Clone)]
pub enum Milestone {
    Socket,
    /// The request body was fully written
    Finish,
    Response(ResponseHead),
    Data(Bytes),
    End,
    /// A caller-set timeout elapsed; the call keeps running
    Timeout,
    Error(InterceptError),
    /// No interceptor matched and the request goes to the real network
    Passthrough(RequestDescriptor),
    Close(CloseReason),
}

impl Milestone {
    pub fn name(&self) -> &'static str {
        match self {
            Milestone::Socket => "socket",
            Milestone::Finish => "finish",
            Milestone::Response(_) => "response",
            Milestone::Data(_) => "data",
            Milestone::End => "end",
            Milestone::Timeout => "timeout",
            Milestone::Error(_) => "error",
            Milestone::Passthrough(_) => "passthrough",
            Milestone::Close(_) => "close",
        }
    }
}

impl fmt::Display for Milestone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Progress of a single intercepted call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallPhase {
    /// Created; the request body is still being written
    Pending,
    Matching,
    Matched,
    /// Handed to the real network
    Unmatched,
    Delaying,
    Replying,
    Streaming,
    Complete,
    Aborted,
    Errored,
}

impl CallPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            CallPhase::Unmatched | CallPhase::Complete | CallPhase::Aborted | CallPhase::Errored
        )
    }

    /// Whether the response head has been delivered.
    pub fn has_response(&self) -> bool {
        matches!(
            self,
            CallPhase::Replying | CallPhase::Streaming | CallPhase::Complete
        )
    }
}

/// What a caller-set timeout measures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TimeoutScope {
    /// Fires only if no response head arrived in time
    #[default]
    Response,
    /// Fires unless the whole call finished in time
    Total,
}

/// A fully collected mocked response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockResponse {
    pub status: u16,
    pub headers: HeaderList,
    pub body: Bytes,
}

impl MockResponse {
    pub fn text(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.body)
    }

    pub fn json<T: serde::de::DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_slice(&self.body)
    }
}
