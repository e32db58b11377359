//! Reply specifications and their per-call resolution.

use crate::descriptor::{HeaderList, RequestDescriptor};
use crate::error::ScriptedError;
use bytes::Bytes;
use futures::stream::BoxStream;
use std::collections::VecDeque;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

/// Value of one reply header.
#[derive(Clone)]
pub enum HeaderValueSpec {
    Static(String),
    /// Repeated header, one entry per value
    Multi(Vec<String>),
    /// Computed from the matched request
    Computed(Arc<dyn Fn(&RequestDescriptor) -> String + Send + Sync>),
}

impl fmt::Debug for HeaderValueSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HeaderValueSpec::Static(v) => f.debug_tuple("Static").field(v).finish(),
            HeaderValueSpec::Multi(v) => f.debug_tuple("Multi").field(v).finish(),
            HeaderValueSpec::Computed(_) => f.write_str("Computed(..)"),
        }
    }
}

impl From<&str> for HeaderValueSpec {
    fn from(v: &str) -> Self {
        HeaderValueSpec::Static(v.to_string())
    }
}

impl From<String> for HeaderValueSpec {
    fn from(v: String) -> Self {
        HeaderValueSpec::Static(v)
    }
}

impl From<Vec<&str>> for HeaderValueSpec {
    fn from(v: Vec<&str>) -> Self {
        HeaderValueSpec::Multi(v.into_iter().map(String::from).collect())
    }
}

impl From<Vec<String>> for HeaderValueSpec {
    fn from(v: Vec<String>) -> Self {
        HeaderValueSpec::Multi(v)
    }
}

/// Ordered reply header declarations, resolved per call.
#[derive(Debug, Clone, Default)]
pub struct ReplyHeaders {
    entries: Vec<(String, HeaderValueSpec)>,
}

impl ReplyHeaders {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<HeaderValueSpec>) -> Self {
        self.entries.push((name.into(), value.into()));
        self
    }

    pub fn computed<F>(mut self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&RequestDescriptor) -> String + Send + Sync + 'static,
    {
        self.entries
            .push((name.into(), HeaderValueSpec::Computed(Arc::new(f))));
        self
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.iter().any(|(n, _)| n.eq_ignore_ascii_case(name))
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Produce concrete headers for one request.
    pub fn resolve(&self, request: &RequestDescriptor) -> HeaderList {
        let mut out = HeaderList::new();
        self.resolve_into(request, &mut out);
        out
    }

    fn resolve_into(&self, request: &RequestDescriptor, out: &mut HeaderList) {
        for (name, value) in &self.entries {
            match value {
                HeaderValueSpec::Static(v) => out.append(name.clone(), v.clone()),
                HeaderValueSpec::Multi(values) => {
                    for v in values {
                        out.append(name.clone(), v.clone());
                    }
                }
                HeaderValueSpec::Computed(f) => out.append(name.clone(), f(request)),
            }
        }
    }
}

impl<K, V> FromIterator<(K, V)> for ReplyHeaders
where
    K: Into<String>,
    V: Into<HeaderValueSpec>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        iter.into_iter()
            .fold(ReplyHeaders::new(), |headers, (k, v)| headers.header(k, v))
    }
}

/// Reply produced by a generator function.
#[derive(Debug, Clone)]
pub struct Reply {
    pub status: u16,
    pub headers: HeaderList,
    pub body: Bytes,
}

impl Reply {
    pub fn new(status: u16, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            headers: HeaderList::new(),
            body: body.into(),
        }
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.append(name, value);
        self
    }
}

pub type ReplyGenerator =
    Arc<dyn Fn(&RequestDescriptor) -> Result<Reply, ScriptedError> + Send + Sync>;
pub type StreamFactory = Arc<dyn Fn(&RequestDescriptor) -> BoxStream<'static, Bytes> + Send + Sync>;

/// What an interceptor answers with.
#[derive(Clone)]
pub enum ReplySpec {
    Literal {
        status: u16,
        body: Bytes,
        headers: ReplyHeaders,
    },
    Generator(ReplyGenerator),
    Stream {
        status: u16,
        headers: ReplyHeaders,
        factory: StreamFactory,
    },
    File {
        status: u16,
        path: PathBuf,
        headers: ReplyHeaders,
    },
    Error(ScriptedError),
}

impl ReplySpec {
    pub fn scripted_error(&self) -> Option<&ScriptedError> {
        match self {
            ReplySpec::Error(e) => Some(e),
            _ => None,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ReplySpec::Literal { .. } => "literal",
            ReplySpec::Generator(_) => "generator",
            ReplySpec::Stream { .. } => "stream",
            ReplySpec::File { .. } => "file",
            ReplySpec::Error(_) => "error",
        }
    }

    /// Resolve the reply for one matched request.
    ///
    /// Runs exactly once per call, after the connection delay.
    pub fn resolve(
        &self,
        request: &RequestDescriptor,
        decorations: &ReplyDecorations,
    ) -> Result<ResolvedReply, ScriptedError> {
        let (status, mut headers, body) = match self {
            ReplySpec::Literal {
                status,
                body,
                headers,
            } => (*status, headers.resolve(request), BodySource::single(body.clone())),
            ReplySpec::Generator(generate) => {
                let reply = generate(request)?;
                (reply.status, reply.headers, BodySource::single(reply.body))
            }
            ReplySpec::Stream {
                status,
                headers,
                factory,
            } => (
                *status,
                headers.resolve(request),
                BodySource::Stream(factory(request)),
            ),
            ReplySpec::File {
                status,
                path,
                headers,
            } => {
                let contents = std::fs::read(path).map_err(|e| {
                    let code = match e.kind() {
                        std::io::ErrorKind::NotFound => "ENOENT",
                        std::io::ErrorKind::PermissionDenied => "EACCES",
                        _ => "EIO",
                    };
                    ScriptedError::with_code(
                        code,
                        format!("failed to read reply file {}: {e}", path.display()),
                    )
                })?;
                (
                    *status,
                    headers.resolve(request),
                    BodySource::single(Bytes::from(contents)),
                )
            }
            ReplySpec::Error(e) => return Err(e.clone()),
        };

        decorations.apply(request, &mut headers, body.known_len());
        Ok(ResolvedReply {
            status,
            headers,
            body,
        })
    }
}

impl fmt::Debug for ReplySpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReplySpec::Literal { status, body, .. } => f
                .debug_struct("Literal")
                .field("status", status)
                .field("body_len", &body.len())
                .finish(),
            ReplySpec::Error(e) => f.debug_tuple("Error").field(e).finish(),
            ReplySpec::File { status, path, .. } => f
                .debug_struct("File")
                .field("status", status)
                .field("path", path)
                .finish(),
            other => write!(f, "{}(..)", other.kind()),
        }
    }
}

/// Scope-wide reply additions captured when the interceptor is declared.
#[derive(Debug, Clone, Default)]
pub struct ReplyDecorations {
    pub default_headers: ReplyHeaders,
    pub content_length: bool,
    pub date: bool,
}

impl ReplyDecorations {
    fn apply(&self, request: &RequestDescriptor, headers: &mut HeaderList, body_len: Option<usize>) {
        let mut defaults = HeaderList::new();
        self.default_headers.resolve_into(request, &mut defaults);
        for (name, value) in defaults.iter() {
            if !headers.contains(name) {
                headers.append(name, value);
            }
        }
        if self.content_length && !headers.contains("content-length") {
            if let Some(len) = body_len {
                headers.append("Content-Length", len.to_string());
            }
        }
        if self.date && !headers.contains("date") {
            headers.append(
                "Date",
                chrono::Utc::now()
                    .format("%a, %d %b %Y %H:%M:%S GMT")
                    .to_string(),
            );
        }
    }
}

/// Reply content ready for playback.
pub struct ResolvedReply {
    pub status: u16,
    pub headers: HeaderList,
    pub body: BodySource,
}

/// Ordered body chunks, either buffered or pulled from a stream.
pub enum BodySource {
    Chunks(VecDeque<Bytes>),
    Stream(BoxStream<'static, Bytes>),
}

impl BodySource {
    fn single(body: Bytes) -> Self {
        let mut chunks = VecDeque::new();
        if !body.is_empty() {
            chunks.push_back(body);
        }
        BodySource::Chunks(chunks)
    }

    fn known_len(&self) -> Option<usize> {
        match self {
            BodySource::Chunks(chunks) => Some(chunks.iter().map(Bytes::len).sum()),
            BodySource::Stream(_) => None,
        }
    }
}
