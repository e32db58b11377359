//! Error types surfaced to intercepted calls.

use crate::descriptor::RequestDescriptor;
use crate::predicate::describe_value;
use crate::registry::PendingExpectation;
use std::fmt;
use thiserror::Error;

/// Convenience alias used across the crate.
pub type Result<T> = std::result::Result<T, InterceptError>;

/// Failure of an intercepted call.
///
/// Every variant is one-shot: the engine never retries, and the interceptor
/// budget consumed at match time is never refunded.
#[derive(Debug, Clone, Error)]
pub enum InterceptError {
    /// No interceptor accepted the request and real connections are denied.
    #[error("{}", format_no_match(.descriptor, .mismatches, *.net_connect_denied))]
    NoMatch {
        descriptor: Box<RequestDescriptor>,
        mismatches: Vec<InterceptorMismatch>,
        net_connect_denied: bool,
    },

    /// The matched interceptor was scripted to fail.
    #[error(transparent)]
    ScriptedReply(#[from] ScriptedError),

    /// The caller broke the call-object contract (e.g. write after end).
    #[error("protocol misuse: {0}")]
    ProtocolMisuse(String),

    /// The caller cancelled the call.
    #[error("request aborted")]
    Aborted,

    /// The call was handed back to the transport for a real network exchange.
    #[error("request to {} was not mocked and passes through to the network", .0.url())]
    Unmocked(Box<RequestDescriptor>),
}

impl InterceptError {
    /// Code of the failure, mirroring what a transport would report.
    pub fn code(&self) -> Option<&str> {
        match self {
            InterceptError::NoMatch {
                net_connect_denied: true,
                ..
            } => Some("ENETUNREACH"),
            InterceptError::NoMatch { .. } => Some("ERR_NO_MATCH"),
            InterceptError::ScriptedReply(e) => e.code.as_deref(),
            InterceptError::ProtocolMisuse(_) => Some("ERR_PROTOCOL_MISUSE"),
            InterceptError::Aborted => Some("ECONNRESET"),
            InterceptError::Unmocked(_) => None,
        }
    }

    pub fn is_aborted(&self) -> bool {
        matches!(self, InterceptError::Aborted)
    }

    pub fn is_no_match(&self) -> bool {
        matches!(self, InterceptError::NoMatch { .. })
    }
}

fn format_no_match(
    descriptor: &RequestDescriptor,
    mismatches: &[InterceptorMismatch],
    net_connect_denied: bool,
) -> String {
    let mut out = format!(
        "no match for request {} {}",
        descriptor.method,
        descriptor.url()
    );
    if !descriptor.body.is_empty() {
        out.push_str(&format!(
            " with body {}",
            describe_value(&String::from_utf8_lossy(&descriptor.body))
        ));
    }
    if net_connect_denied {
        out.push_str(" (real network connections are disabled for this host)");
    }
    for mismatch in mismatches {
        out.push_str(&format!("\n  {mismatch}"));
    }
    out
}

/// Why one registered interceptor rejected a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterceptorMismatch {
    pub interceptor_id: u64,
    /// Human readable `METHOD origin/path` of the interceptor.
    pub expectation: String,
    pub reasons: Vec<String>,
}

impl fmt::Display for InterceptorMismatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.expectation, self.reasons.join("; "))
    }
}

/// Error an interceptor is scripted to fail with.
///
/// The code and message are delivered verbatim as the call's own failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct ScriptedError {
    pub code: Option<String>,
    pub message: String,
}

impl ScriptedError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            code: None,
            message: message.into(),
        }
    }

    pub fn with_code(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: Some(code.into()),
            message: message.into(),
        }
    }
}

impl From<&str> for ScriptedError {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

impl From<String> for ScriptedError {
    fn from(message: String) -> Self {
        Self::new(message)
    }
}

/// Returned by `ScopeHandle::done` while expectations remain.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{} expectation(s) not satisfied:{}", .pending.len(), format_pending(.pending))]
pub struct UnsatisfiedExpectations {
    pub pending: Vec<PendingExpectation>,
}

fn format_pending(pending: &[PendingExpectation]) -> String {
    pending.iter().map(|p| format!("\n  {p}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::RequestDescriptor;

    #[test]
    fn test_no_match_message_lists_reasons() {
        let descriptor = RequestDescriptor::builder("POST", "http://example.test/")
            .body("actual")
            .build()
            .unwrap();
        let err = InterceptError::NoMatch {
            descriptor: Box::new(descriptor),
            mismatches: vec![InterceptorMismatch {
                interceptor_id: 1,
                expectation: "POST http://example.test/".to_string(),
                reasons: vec![r#"Body mismatch: expected "expected", got "actual""#.to_string()],
            }],
            net_connect_denied: true,
        };
        let message = err.to_string();
        assert!(message.starts_with("no match for request POST http://example.test/"));
        assert!(message.contains("real network connections are disabled"));
        assert!(message.contains(r#"Body mismatch: expected "expected", got "actual""#));
        assert_eq!(err.code(), Some("ENETUNREACH"));
    }

    #[test]
    fn test_scripted_error_keeps_identity() {
        let err: InterceptError = ScriptedError::with_code("ECONNREFUSED", "refused").into();
        assert_eq!(err.code(), Some("ECONNREFUSED"));
        assert_eq!(err.to_string(), "refused");
    }
}
