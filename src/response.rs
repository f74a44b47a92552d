//! Responses produced by handlers, interceptors and the dispatcher itself.
//!
//! Bodies are fully buffered [`Bytes`]; the server converts a [`Response`]
//! into an `http::Response<Full<Bytes>>` once, right before hyper writes it.

use bytes::Bytes;
use http::header::{CONTENT_TYPE, HeaderName, HeaderValue};
use http::{HeaderMap, StatusCode};
use http_body_util::Full;

/// `Content-Type` values accepted by [`ResponseBuilder::bytes`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ContentType {
    Html,
    Json,
    OctetStream,
    Text,
    Xml,
}

impl ContentType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Html        => "text/html; charset=utf-8",
            Self::Json        => "application/json",
            Self::OctetStream => "application/octet-stream",
            Self::Text        => "text/plain; charset=utf-8",
            Self::Xml         => "application/xml",
        }
    }
}

/// A buffered HTTP response.
///
/// ```rust
/// use keel::{ContentType, Response, StatusCode};
///
/// let ok = Response::text("PONG");
/// let gone = Response::status(StatusCode::GONE);
/// let created = Response::builder()
///     .status(StatusCode::CREATED)
///     .header("location", "/users/42")
///     .json(&br#"{"id":42}"#[..]);
/// let feed = Response::builder().bytes(ContentType::Xml, &b"<feed/>"[..]);
/// # let _ = (ok, gone, created, feed);
/// ```
#[derive(Debug)]
pub struct Response {
    pub(crate) body: Bytes,
    pub(crate) headers: HeaderMap,
    pub(crate) status: StatusCode,
}

impl Response {
    /// `200 OK`, `application/json`.
    pub fn json(body: impl Into<Bytes>) -> Self {
        Self::builder().finish(ContentType::Json.as_str(), body.into())
    }

    /// `200 OK`, `text/plain; charset=utf-8`.
    pub fn text(body: impl Into<String>) -> Self {
        Self::builder().text(body)
    }

    /// `code` with an empty body and no headers.
    pub fn status(code: StatusCode) -> Self {
        Self { body: Bytes::new(), headers: HeaderMap::new(), status: code }
    }

    /// Starts from `200 OK` with no headers.
    pub fn builder() -> ResponseBuilder {
        ResponseBuilder { headers: HeaderMap::new(), status: StatusCode::OK }
    }

    pub fn status_code(&self) -> StatusCode { self.status }
    pub fn headers(&self) -> &HeaderMap { &self.headers }
    pub fn headers_mut(&mut self) -> &mut HeaderMap { &mut self.headers }
    pub fn body(&self) -> &[u8] { &self.body }

    /// Header lookup. Names are case-insensitive; non-UTF-8 values yield `None`.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Converts into the `http` response hyper writes to the wire.
    pub(crate) fn into_inner(self) -> http::Response<Full<Bytes>> {
        let mut res = http::Response::new(Full::new(self.body));
        *res.status_mut() = self.status;
        *res.headers_mut() = self.headers;
        res
    }
}

/// Builds a [`Response`] with a custom status or extra headers.
///
/// Finished by one of the body methods. All but [`no_body`](Self::no_body)
/// set `Content-Type`.
pub struct ResponseBuilder {
    headers: HeaderMap,
    status: StatusCode,
}

impl ResponseBuilder {
    pub fn status(mut self, code: StatusCode) -> Self {
        self.status = code;
        self
    }

    /// Appends a header.
    ///
    /// # Panics
    ///
    /// Panics if `name` or `value` is not a valid header name/value. Header
    /// names in handlers are almost always literals, so this is a bug in the
    /// handler, not a runtime condition.
    pub fn header(mut self, name: &str, value: &str) -> Self {
        let name = HeaderName::from_bytes(name.as_bytes())
            .unwrap_or_else(|e| panic!("invalid header name `{name}`: {e}"));
        let value = HeaderValue::from_str(value)
            .unwrap_or_else(|e| panic!("invalid value for header `{name}`: {e}"));
        self.headers.append(name, value);
        self
    }

    /// `application/json` body.
    pub fn json(self, body: impl Into<Bytes>) -> Response {
        self.finish(ContentType::Json.as_str(), body.into())
    }

    /// UTF-8 plain-text body.
    pub fn text(self, body: impl Into<String>) -> Response {
        let text: String = body.into();
        self.finish(ContentType::Text.as_str(), Bytes::from(text))
    }

    pub fn bytes(self, content_type: ContentType, body: impl Into<Bytes>) -> Response {
        self.finish(content_type.as_str(), body.into())
    }

    /// Empty body, no `Content-Type`. Used for `204`, `405` and the like.
    pub fn no_body(self) -> Response {
        Response { body: Bytes::new(), headers: self.headers, status: self.status }
    }

    fn finish(mut self, content_type: &'static str, body: Bytes) -> Response {
        self.headers.insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
        Response { body, headers: self.headers, status: self.status }
    }
}

/// What a handler may return.
///
/// Strings become `200 OK` plain text, a bare [`StatusCode`] an empty
/// response with that status.
pub trait IntoResponse {
    fn into_response(self) -> Response;
}

impl IntoResponse for Response {
    fn into_response(self) -> Self {
        self
    }
}

impl IntoResponse for &'static str {
    fn into_response(self) -> Response {
        Response::text(self)
    }
}

impl IntoResponse for String {
    fn into_response(self) -> Response {
        Response::text(self)
    }
}

impl IntoResponse for StatusCode {
    fn into_response(self) -> Response {
        Response::status(self)
    }
}

impl IntoResponse for (StatusCode, &'static str) {
    fn into_response(self) -> Response {
        Response::builder().status(self.0).text(self.1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_keeps_status_and_headers() {
        let res = Response::builder()
            .status(StatusCode::CREATED)
            .header("location", "/users/42")
            .json(&b"{}"[..]);
        assert_eq!(res.status_code(), StatusCode::CREATED);
        assert_eq!(res.header("Location"), Some("/users/42"));
        assert_eq!(res.header("content-type"), Some("application/json"));
        assert_eq!(res.body(), b"{}");
    }

    #[test]
    fn into_inner_preserves_everything() {
        let res = (StatusCode::IM_A_TEAPOT, "short and stout").into_response().into_inner();
        assert_eq!(res.status(), StatusCode::IM_A_TEAPOT);
        assert_eq!(res.headers()[CONTENT_TYPE], "text/plain; charset=utf-8");
    }

    #[test]
    #[should_panic(expected = "invalid header name")]
    fn invalid_header_name_panics() {
        let _ = Response::builder().header("bad header", "x");
    }
}
