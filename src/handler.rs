//! Endpoint handlers.
//!
//! Any `Fn(Request) -> impl Future<Output: IntoResponse>` is a [`Handler`].
//! At registration it is erased into a [`BoxedHandler`], the one type the
//! route table, the interceptor chain and the dispatcher deal in:
//!
//! ```text
//! async fn users(req: Request) -> String      registered with routes.on(..)
//!   → Arc<Endpoint<users>>                    BoxedHandler, stored per (path, method)
//!   → Arc<FromFnHandler { next: .. }>         each interceptor wraps the previous layer
//!   → layer.call(req)                         one virtual call per layer per request
//! ```

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use http::StatusCode;

use crate::request::Request;
use crate::response::{IntoResponse, Response};

/// The future every erased handler returns.
pub type BoxFuture = Pin<Box<dyn Future<Output = Response> + Send + 'static>>;

/// Object-safe request handler. Terminal handlers and interceptor layers
/// both implement it.
pub trait ErasedHandler {
    fn call(&self, req: Request) -> BoxFuture;
}

/// A handler shared by every connection task.
pub type BoxedHandler = Arc<dyn ErasedHandler + Send + Sync + 'static>;

/// A typed endpoint handler.
///
/// Sealed: satisfied by async functions and closures of the form
/// `Fn(Request) -> impl Future<Output = impl IntoResponse>`, nothing else.
pub trait Handler: sealed::Sealed + Send + Sync + 'static {
    #[doc(hidden)]
    fn into_boxed_handler(self) -> BoxedHandler;
}

mod sealed {
    pub trait Sealed {}
}

impl<F, Fut, R> sealed::Sealed for F
where
    F: Fn(Request) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = R> + Send + 'static,
    R: IntoResponse + Send + 'static,
{
}

impl<F, Fut, R> Handler for F
where
    F: Fn(Request) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = R> + Send + 'static,
    R: IntoResponse + Send + 'static,
{
    fn into_boxed_handler(self) -> BoxedHandler {
        Arc::new(Endpoint(self))
    }
}

/// Erases `handler`.
pub fn boxed(handler: impl Handler) -> BoxedHandler {
    handler.into_boxed_handler()
}

/// Stands in for endpoints registered without a handler.
pub fn not_implemented() -> BoxedHandler {
    boxed(|_req: Request| async { StatusCode::NOT_IMPLEMENTED })
}

struct Endpoint<F>(F);

impl<F, Fut, R> ErasedHandler for Endpoint<F>
where
    F: Fn(Request) -> Fut + Send + Sync,
    Fut: Future<Output = R> + Send + 'static,
    R: IntoResponse + Send + 'static,
{
    fn call(&self, req: Request) -> BoxFuture {
        let fut = (self.0)(req);
        Box::pin(async move { fut.await.into_response() })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use bytes::Bytes;

    use super::*;

    fn request() -> Request {
        let (parts, ()) = http::Request::new(()).into_parts();
        Request::new(parts, Bytes::new(), HashMap::new())
    }

    async fn created(_req: Request) -> (StatusCode, &'static str) {
        (StatusCode::CREATED, "made")
    }

    #[tokio::test]
    async fn return_values_become_responses() {
        let res = boxed(created).call(request()).await;
        assert_eq!(res.status_code(), StatusCode::CREATED);
        assert_eq!(res.body(), b"made");

        let res = boxed(|_req: Request| async { String::from("owned") }).call(request()).await;
        assert_eq!(res.header("content-type"), Some("text/plain; charset=utf-8"));
    }

    #[tokio::test]
    async fn not_implemented_answers_501() {
        let res = not_implemented().call(request()).await;
        assert_eq!(res.status_code(), StatusCode::NOT_IMPLEMENTED);
        assert!(res.body().is_empty());
    }
}
