//! Interceptors: a request matcher, a reply, a budget and optional delays.
//!
//! Interceptors are declared through a [`ScopeHandle`](crate::scope::ScopeHandle)
//! and owned by the origin registry once registered.

mod core;
mod reply;

pub use self::core::{Budget, Interceptor, InterceptorParts, OriginPattern, RecordedCall};
pub use reply::{
    BodySource, HeaderValueSpec, Reply, ReplyDecorations, ReplyGenerator, ReplyHeaders,
    ReplySpec, ResolvedReply, StreamFactory,
};
