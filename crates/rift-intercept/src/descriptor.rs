//! Transport-independent view of an outgoing request.
//!
//! The wiring layer builds a [`RequestDescriptor`] from whatever native call
//! object it captured. Everything downstream (matching, history, events and
//! errors) works on this type only.

use bytes::Bytes;
use http::Method;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Errors raised while building a descriptor or parsing an origin.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DescriptorError {
    #[error("invalid origin '{0}': expected scheme://host[:port]")]
    InvalidOrigin(String),
    #[error("unsupported scheme '{0}'")]
    UnsupportedScheme(String),
    #[error("invalid port in '{0}'")]
    InvalidPort(String),
    #[error("invalid method '{0}'")]
    InvalidMethod(String),
}

/// Scheme, host and port identifying an interception target.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Origin {
    pub scheme: String,
    pub host: String,
    pub port: u16,
}

impl Origin {
    /// Parse `scheme://host[:port]`. A trailing path is ignored.
    pub fn parse(input: &str) -> Result<Self, DescriptorError> {
        let (origin, _) = split_url(input)?;
        Ok(origin)
    }

    pub fn new(scheme: &str, host: &str, port: Option<u16>) -> Result<Self, DescriptorError> {
        let scheme = scheme.to_ascii_lowercase();
        let port = match port {
            Some(p) => p,
            None => default_port(&scheme)
                .ok_or_else(|| DescriptorError::UnsupportedScheme(scheme.clone()))?,
        };
        Ok(Self {
            scheme,
            host: host.to_ascii_lowercase(),
            port,
        })
    }

    /// Normalized registry key, always `scheme://host:port`.
    pub fn key(&self) -> String {
        format!("{}://{}:{}", self.scheme, self.host, self.port)
    }

    /// `host:port`, the form net-connect rules are matched against.
    pub fn authority(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn is_default_port(&self) -> bool {
        default_port(&self.scheme) == Some(self.port)
    }
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_default_port() {
            write!(f, "{}://{}", self.scheme, self.host)
        } else {
            write!(f, "{}://{}:{}", self.scheme, self.host, self.port)
        }
    }
}

impl FromStr for Origin {
    type Err = DescriptorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Origin::parse(s)
    }
}

fn default_port(scheme: &str) -> Option<u16> {
    match scheme {
        "http" | "ws" => Some(80),
        "https" | "wss" => Some(443),
        _ => None,
    }
}

/// Split a URL into its origin and `path?query` remainder.
fn split_url(input: &str) -> Result<(Origin, String), DescriptorError> {
    let (scheme, rest) = input
        .split_once("://")
        .ok_or_else(|| DescriptorError::InvalidOrigin(input.to_string()))?;
    let (authority, path) = match rest.find(['/', '?']) {
        Some(idx) => (&rest[..idx], &rest[idx..]),
        None => (rest, ""),
    };
    if authority.is_empty() {
        return Err(DescriptorError::InvalidOrigin(input.to_string()));
    }
    let (host, port) = match authority.rsplit_once(':') {
        // IPv6 literals keep their colons inside brackets
        Some((h, p)) if !p.contains(']') => {
            let port = p
                .parse::<u16>()
                .map_err(|_| DescriptorError::InvalidPort(input.to_string()))?;
            (h, Some(port))
        }
        _ => (authority, None),
    };
    let origin = Origin::new(scheme, host, port)?;
    let path = if path.is_empty() {
        "/".to_string()
    } else if path.starts_with('?') {
        format!("/{path}")
    } else {
        path.to_string()
    };
    Ok((origin, path))
}

/// Ordered header multimap with case-insensitive lookup.
///
/// Names keep the casing the caller used; lookups ignore it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeaderList {
    entries: Vec<(String, String)>,
}

impl HeaderList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.entries.push((name.into(), value.into()));
    }

    /// Replace every value of `name` with a single one.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        self.remove(&name);
        self.entries.push((name, value.into()));
    }

    pub fn remove(&mut self, name: &str) {
        self.entries.retain(|(n, _)| !n.eq_ignore_ascii_case(name));
    }

    pub fn get_all<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.entries
            .iter()
            .filter(move |(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// All values for `name` joined with `", "`, or `None` when absent.
    pub fn get(&self, name: &str) -> Option<String> {
        let values: Vec<&str> = self.get_all(name).collect();
        if values.is_empty() {
            None
        } else {
            Some(values.join(", "))
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.iter().any(|(n, _)| n.eq_ignore_ascii_case(name))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<K, V> FromIterator<(K, V)> for HeaderList
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut list = HeaderList::new();
        for (k, v) in iter {
            list.append(k, v);
        }
        list
    }
}

/// Normalized outgoing request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestDescriptor {
    pub origin: Origin,
    pub method: Method,
    /// Path including the raw query string.
    pub path: String,
    pub headers: HeaderList,
    pub body: Bytes,
}

impl RequestDescriptor {
    pub fn new(method: Method, url: &str) -> Result<Self, DescriptorError> {
        let (origin, path) = split_url(url)?;
        Ok(Self {
            origin,
            method,
            path,
            headers: HeaderList::new(),
            body: Bytes::new(),
        })
    }

    pub fn builder(method: &str, url: &str) -> RequestDescriptorBuilder {
        RequestDescriptorBuilder {
            method: method.to_string(),
            url: url.to_string(),
            headers: HeaderList::new(),
            body: Bytes::new(),
        }
    }

    /// Path without the query string.
    pub fn path_only(&self) -> &str {
        match self.path.split_once('?') {
            Some((p, _)) => p,
            None => &self.path,
        }
    }

    /// Raw, still-encoded query string (without `?`).
    pub fn raw_query(&self) -> Option<&str> {
        self.path.split_once('?').map(|(_, q)| q)
    }

    pub fn url(&self) -> String {
        format!("{}{}", self.origin, self.path)
    }

    pub fn body_text(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.body)
    }
}

/// Builder used by wiring code and tests.
#[derive(Debug, Clone)]
pub struct RequestDescriptorBuilder {
    method: String,
    url: String,
    headers: HeaderList,
    body: Bytes,
}

impl RequestDescriptorBuilder {
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.append(name, value);
        self
    }

    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    pub fn build(self) -> Result<RequestDescriptor, DescriptorError> {
        let method = Method::from_bytes(self.method.to_ascii_uppercase().as_bytes())
            .map_err(|_| DescriptorError::InvalidMethod(self.method.clone()))?;
        let mut descriptor = RequestDescriptor::new(method, &self.url)?;
        descriptor.headers = self.headers;
        descriptor.body = self.body;
        Ok(descriptor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_origin_parse_default_ports() {
        let origin = Origin::parse("http://Example.TEST").unwrap();
        assert_eq!(origin.host, "example.test");
        assert_eq!(origin.port, 80);
        assert_eq!(origin.key(), "http://example.test:80");
        assert_eq!(origin.to_string(), "http://example.test");

        let secure = Origin::parse("https://example.test/api").unwrap();
        assert_eq!(secure.port, 443);

        let custom = Origin::parse("http://localhost:8080").unwrap();
        assert_eq!(custom.port, 8080);
        assert_eq!(custom.to_string(), "http://localhost:8080");
    }

    #[test]
    fn test_origin_parse_errors() {
        assert!(matches!(
            Origin::parse("example.test"),
            Err(DescriptorError::InvalidOrigin(_))
        ));
        assert!(matches!(
            Origin::parse("ftp://example.test"),
            Err(DescriptorError::UnsupportedScheme(_))
        ));
        assert!(matches!(
            Origin::parse("http://example.test:99999"),
            Err(DescriptorError::InvalidPort(_))
        ));
    }

    #[test]
    fn test_descriptor_path_and_query() {
        let d = RequestDescriptor::builder("get", "http://example.test/users?page=2&sort=asc")
            .build()
            .unwrap();
        assert_eq!(d.method, Method::GET);
        assert_eq!(d.path, "/users?page=2&sort=asc");
        assert_eq!(d.path_only(), "/users");
        assert_eq!(d.raw_query(), Some("page=2&sort=asc"));

        let root = RequestDescriptor::builder("GET", "http://example.test").build().unwrap();
        assert_eq!(root.path, "/");
        assert_eq!(root.raw_query(), None);
    }

    #[test]
    fn test_header_list_is_case_insensitive_and_ordered() {
        let mut headers = HeaderList::new();
        headers.append("X-Trace", "a");
        headers.append("Content-Type", "text/plain");
        headers.append("x-trace", "b");

        assert_eq!(headers.get("x-TRACE"), Some("a, b".to_string()));
        assert!(headers.contains("content-type"));
        let names: Vec<&str> = headers.iter().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["X-Trace", "Content-Type", "x-trace"]);

        headers.set("X-TRACE", "c");
        assert_eq!(headers.get("x-trace"), Some("c".to_string()));
        assert_eq!(headers.len(), 2);
    }
}
