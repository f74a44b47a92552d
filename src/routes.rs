//! Route table and its write-once builder.
//!
//! Endpoint providers register `(path, method)` pairs on a [`RouteBuilder`].
//! [`RouteBuilder::compile`] hands out the finished [`RouteTable`] and
//! freezes the builder: every later registration panics, because a compiled
//! table may already be shared with request-handling tasks.
//!
//! Registration mistakes (bad path, unknown method, duplicate endpoint) are
//! deployment bugs, so they panic at startup rather than return errors.

use std::collections::BTreeMap;
use std::collections::btree_map::Entry;
use std::fmt::Display;

use crate::handler::{BoxedHandler, Handler, not_implemented};
use crate::method::Method;
use crate::middleware::SharedInterceptor;
use crate::validate::validate_path;

/// One registered endpoint: its own interceptors plus the terminal handler.
#[derive(Clone, Default)]
pub struct Route {
    pub(crate) interceptors: Vec<SharedInterceptor>,
    pub(crate) handler: Option<BoxedHandler>,
}

impl Route {
    /// A route with no interceptors and no handler yet.
    pub fn new() -> Self {
        Self::default()
    }

    /// A route that calls `handler` with no endpoint-specific interceptors.
    pub fn to(handler: impl Handler) -> Self {
        Self::new().handler(handler)
    }

    pub fn handler(mut self, handler: impl Handler) -> Self {
        self.handler = Some(handler.into_boxed_handler());
        self
    }

    /// Appends an interceptor. Interceptors run in the order they are added.
    pub fn interceptor(mut self, interceptor: SharedInterceptor) -> Self {
        self.interceptors.push(interceptor);
        self
    }

    pub fn interceptors(&self) -> &[SharedInterceptor] {
        &self.interceptors
    }

    /// The terminal handler. Always `Some` for routes read out of a [`RouteTable`].
    pub fn terminal(&self) -> Option<&BoxedHandler> {
        self.handler.as_ref()
    }
}

/// The compiled, immutable route table: path → method → route.
#[derive(Clone, Default)]
pub struct RouteTable {
    routes: BTreeMap<String, BTreeMap<Method, Route>>,
}

impl RouteTable {
    pub fn get(&self, path: &str, method: Method) -> Option<&Route> {
        self.routes.get(path)?.get(&method)
    }

    /// Methods registered for `path`, sorted.
    pub fn methods(&self, path: &str) -> Vec<Method> {
        self.routes
            .get(path)
            .map(|m| m.keys().copied().collect())
            .unwrap_or_default()
    }

    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.routes.keys().map(String::as_str)
    }

    /// Number of registered endpoints.
    pub fn len(&self) -> usize {
        self.routes.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    pub(crate) fn into_inner(self) -> BTreeMap<String, BTreeMap<Method, Route>> {
        self.routes
    }
}

enum State {
    Building(RouteTable),
    Compiled,
}

/// Write-once registry of endpoints.
pub struct RouteBuilder {
    state: State,
}

impl RouteBuilder {
    pub fn new() -> Self {
        Self { state: State::Building(RouteTable::default()) }
    }

    /// Registers `route` for `(path, method)`.
    ///
    /// A `None` route, or a route without a handler, is registered with a
    /// handler that answers `501 Not Implemented`.
    ///
    /// # Panics
    ///
    /// Panics if the builder is already compiled, `path` violates the route
    /// grammar, `method` is not a standard HTTP method, or `(path, method)`
    /// is already registered. A failed registration leaves the table as it
    /// was.
    pub fn register<M>(&mut self, path: &str, method: M, route: Option<Route>) -> &mut Self
    where
        M: TryInto<Method>,
        M::Error: Display,
    {
        let State::Building(table) = &mut self.state else {
            panic!("cannot register `{path}`: route table already compiled");
        };
        if let Err(e) = validate_path(path) {
            panic!("invalid route path `{path}`: {e}");
        }
        let method = method
            .try_into()
            .unwrap_or_else(|e| panic!("invalid method for route `{path}`: {e}"));

        let mut route = route.unwrap_or_default();
        if route.handler.is_none() {
            route.handler = Some(not_implemented());
        }

        match table.routes.entry(path.to_owned()).or_default().entry(method) {
            Entry::Vacant(slot) => {
                slot.insert(route);
            }
            Entry::Occupied(_) => panic!("duplicate endpoint {method} {path}"),
        }
        self
    }

    /// Shorthand for `register(path, method, Some(Route::to(handler)))`.
    pub fn on(&mut self, method: Method, path: &str, handler: impl Handler) -> &mut Self {
        self.register(path, method, Some(Route::to(handler)))
    }

    /// Freezes the builder and returns the table.
    ///
    /// # Panics
    ///
    /// Panics if called twice.
    pub fn compile(&mut self) -> RouteTable {
        match std::mem::replace(&mut self.state, State::Compiled) {
            State::Building(table) => table,
            State::Compiled => panic!("route table already compiled"),
        }
    }

    pub fn is_compiled(&self) -> bool {
        matches!(self.state, State::Compiled)
    }
}

impl Default for RouteBuilder {
    fn default() -> Self { Self::new() }
}

/// A source of endpoints: registers zero or more routes on the builder.
///
/// Called once per provider while the server is built. Any
/// `Fn(&mut RouteBuilder)` is a provider.
pub trait Endpoints: Send + 'static {
    fn register(&self, routes: &mut RouteBuilder);
}

impl<F> Endpoints for F
where
    F: Fn(&mut RouteBuilder) + Send + 'static,
{
    fn register(&self, routes: &mut RouteBuilder) {
        self(routes)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::panic::{AssertUnwindSafe, catch_unwind};

    use bytes::Bytes;
    use http::StatusCode;

    use super::*;
    use crate::request::Request;

    async fn ok(_req: Request) -> &'static str { "first" }
    async fn other(_req: Request) -> &'static str { "second" }

    fn request() -> Request {
        let (parts, ()) = http::Request::new(()).into_parts();
        Request::new(parts, Bytes::new(), HashMap::new())
    }

    #[test]
    fn registers_and_compiles() {
        let mut routes = RouteBuilder::new();
        routes
            .on(Method::Get, "/users/{id}", ok)
            .on(Method::Delete, "/users/{id}", ok)
            .register("/", "POST", Some(Route::to(ok)));

        let table = routes.compile();

        assert!(routes.is_compiled());
        assert_eq!(table.len(), 3);
        assert_eq!(table.methods("/users/{id}"), [Method::Delete, Method::Get]);
        assert!(table.get("/", Method::Post).is_some());
        assert!(table.get("/", Method::Get).is_none());
        assert_eq!(table.paths().collect::<Vec<_>>(), ["/", "/users/{id}"]);
    }

    #[tokio::test]
    async fn missing_handler_becomes_not_implemented() {
        let mut routes = RouteBuilder::new();
        routes
            .register("/a", Method::Get, None)
            .register("/b", Method::Get, Some(Route::new()));
        let table = routes.compile();

        for path in ["/a", "/b"] {
            let handler = table.get(path, Method::Get).and_then(Route::terminal).unwrap();
            let res = handler.call(request()).await;
            assert_eq!(res.status_code(), StatusCode::NOT_IMPLEMENTED);
        }
    }

    #[tokio::test]
    async fn duplicate_keeps_first_registration() {
        let mut routes = RouteBuilder::new();
        routes.on(Method::Get, "/x", ok);

        let dup = catch_unwind(AssertUnwindSafe(|| {
            routes.on(Method::Get, "/x", other);
        }));
        assert!(dup.is_err());

        let table = routes.compile();
        assert_eq!(table.len(), 1);
        let handler = table.get("/x", Method::Get).and_then(Route::terminal).unwrap();
        assert_eq!(handler.call(request()).await.body(), b"first");
    }

    #[test]
    #[should_panic(expected = "duplicate endpoint GET /x")]
    fn duplicate_panics() {
        let mut routes = RouteBuilder::new();
        routes.on(Method::Get, "/x", ok).on(Method::Get, "/x", ok);
    }

    #[test]
    #[should_panic(expected = "already compiled")]
    fn register_after_compile_panics() {
        let mut routes = RouteBuilder::new();
        routes.on(Method::Get, "/x", ok);
        let _table = routes.compile();
        routes.on(Method::Post, "/x", ok);
    }

    #[test]
    #[should_panic(expected = "invalid route path `/x/`")]
    fn trailing_slash_panics() {
        RouteBuilder::new().on(Method::Get, "/x/", ok);
    }

    #[test]
    #[should_panic(expected = "unsupported HTTP method `FETCH`")]
    fn unknown_method_panics() {
        RouteBuilder::new().register("/x", "FETCH", None);
    }

    #[test]
    fn route_is_moved_into_the_table() {
        let mut routes = RouteBuilder::new();
        let mut interceptors = vec![crate::middleware::trace()];
        let route = interceptors
            .iter()
            .cloned()
            .fold(Route::to(ok), Route::interceptor);
        routes.register("/x", Method::Get, Some(route));
        interceptors.push(crate::middleware::trace());

        let table = routes.compile();
        assert_eq!(table.get("/x", Method::Get).unwrap().interceptors().len(), 1);
    }
}
