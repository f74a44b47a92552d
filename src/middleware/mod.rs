//! Interceptors.
//!
//! An interceptor wraps the next handler in the chain and decides, per
//! request, whether to call it. This is the place for cross-cutting
//! concerns: tracing, authentication, request-id injection.
//!
//! Chains are composed once, when the [`Dispatcher`](crate::Dispatcher) is
//! built, never per request. The first interceptor in a list is the
//! outermost: it sees the request first and the response last.
//!
//! ```rust
//! use keel::middleware::{self, Next};
//! use keel::{Request, Response, StatusCode};
//!
//! let require_token = middleware::from_fn(|req: Request, next: Next| async move {
//!     if req.header("authorization").is_none() {
//!         return Response::status(StatusCode::UNAUTHORIZED);
//!     }
//!     next.run(req).await
//! });
//! ```

use std::future::Future;
use std::sync::Arc;

use crate::handler::{BoxFuture, BoxedHandler, ErasedHandler};
use crate::request::Request;
use crate::response::Response;

mod trace;

pub use trace::trace;

/// Wraps the next handler of a chain.
///
/// Implemented for any `Fn(BoxedHandler) -> BoxedHandler`; most interceptors
/// are easier to write with [`from_fn`].
pub trait Interceptor: Send + Sync + 'static {
    fn wrap(&self, next: BoxedHandler) -> BoxedHandler;
}

impl<F> Interceptor for F
where
    F: Fn(BoxedHandler) -> BoxedHandler + Send + Sync + 'static,
{
    fn wrap(&self, next: BoxedHandler) -> BoxedHandler {
        self(next)
    }
}

/// A shareable interceptor, as stored in route entries and common lists.
pub type SharedInterceptor = Arc<dyn Interceptor>;

/// Composes `interceptors` around `terminal`.
///
/// The list may hold `SharedInterceptor`s or `Option<SharedInterceptor>`s;
/// `None` entries are skipped. An empty list returns `terminal` itself.
///
/// # Panics
///
/// Panics if `terminal` is `None`: a chain without an endpoint is a bug.
pub fn chain<I>(interceptors: I, terminal: Option<BoxedHandler>) -> BoxedHandler
where
    I: IntoIterator,
    I::IntoIter: DoubleEndedIterator,
    I::Item: Into<Option<SharedInterceptor>>,
{
    let terminal = terminal.expect("interceptor chain requires a terminal handler");
    interceptors
        .into_iter()
        .rev()
        .fold(terminal, |next, interceptor| match interceptor.into() {
            Some(interceptor) => interceptor.wrap(next),
            None => next,
        })
}

// ── from_fn ───────────────────────────────────────────────────────────────────

/// The rest of the chain, handed to a [`from_fn`] interceptor.
#[derive(Clone)]
pub struct Next(BoxedHandler);

impl Next {
    /// Passes the request to the next interceptor or the endpoint handler.
    pub async fn run(self, req: Request) -> Response {
        self.0.call(req).await
    }
}

/// Builds an interceptor from an async function of `(Request, Next)`.
pub fn from_fn<F, Fut>(f: F) -> SharedInterceptor
where
    F: Fn(Request, Next) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Response> + Send + 'static,
{
    Arc::new(FromFn(Arc::new(f)))
}

struct FromFn<F>(Arc<F>);

impl<F, Fut> Interceptor for FromFn<F>
where
    F: Fn(Request, Next) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Response> + Send + 'static,
{
    fn wrap(&self, next: BoxedHandler) -> BoxedHandler {
        Arc::new(FromFnHandler { f: Arc::clone(&self.0), next })
    }
}

struct FromFnHandler<F> {
    f: Arc<F>,
    next: BoxedHandler,
}

impl<F, Fut> ErasedHandler for FromFnHandler<F>
where
    F: Fn(Request, Next) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Response> + Send + 'static,
{
    fn call(&self, req: Request) -> BoxFuture {
        Box::pin((self.f)(req, Next(Arc::clone(&self.next))))
    }
}
