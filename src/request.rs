//! Incoming HTTP request type.

use std::collections::HashMap;
use std::net::SocketAddr;

use bytes::Bytes;
use http::request::Parts;
use http::{HeaderMap, Uri};

/// An incoming HTTP request with its body fully buffered.
///
/// The server collects the body before dispatch, so handlers and
/// interceptors see plain bytes and never poll the connection.
pub struct Request {
    pub(crate) parts: Parts,
    pub(crate) body: Bytes,
    pub(crate) params: HashMap<String, String>,
}

impl Request {
    pub(crate) fn new(parts: Parts, body: Bytes, params: HashMap<String, String>) -> Self {
        Self { parts, body, params }
    }

    /// The raw request method. May be a non-standard verb.
    pub fn method(&self) -> &http::Method { &self.parts.method }
    pub fn uri(&self) -> &Uri { &self.parts.uri }
    pub fn path(&self) -> &str { self.parts.uri.path() }
    pub fn query(&self) -> Option<&str> { self.parts.uri.query() }
    pub fn headers(&self) -> &HeaderMap { &self.parts.headers }
    pub fn body(&self) -> &[u8] { &self.body }

    /// Header lookup. Names are case-insensitive; non-UTF-8 values yield `None`.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.parts.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Returns a named path parameter.
    ///
    /// For a route `/users/{id}`, `req.param("id")` on `/users/42` returns `Some("42")`.
    pub fn param(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(String::as_str)
    }

    /// The peer address of the connection this request arrived on.
    ///
    /// `None` when the request did not come through [`Server`](crate::Server),
    /// e.g. when a [`Dispatcher`](crate::Dispatcher) is driven directly.
    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.parts.extensions.get::<SocketAddr>().copied()
    }

    /// Request extensions, for interceptors that pass values down the chain.
    pub fn extensions(&self) -> &http::Extensions { &self.parts.extensions }
    pub fn extensions_mut(&mut self) -> &mut http::Extensions { &mut self.parts.extensions }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(uri: &str) -> Request {
        let (parts, ()) = http::Request::builder()
            .uri(uri)
            .header("X-Trace-Id", "abc")
            .body(())
            .unwrap()
            .into_parts();
        let params = HashMap::from([("id".to_owned(), "42".to_owned())]);
        Request::new(parts, Bytes::from_static(b"hi"), params)
    }

    #[test]
    fn accessors() {
        let req = request("/users/42?verbose=1");
        assert_eq!(req.path(), "/users/42");
        assert_eq!(req.query(), Some("verbose=1"));
        assert_eq!(req.header("x-trace-id"), Some("abc"));
        assert_eq!(req.param("id"), Some("42"));
        assert_eq!(req.param("missing"), None);
        assert_eq!(req.body(), b"hi");
        assert_eq!(req.remote_addr(), None);
    }
}
