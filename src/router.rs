//! Radix-tree request dispatcher.
//!
//! Built once from a compiled [`RouteTable`] plus the common interceptors.
//! Every `(path, method)` gets one merged handler (common interceptors, then
//! the route's own, then its terminal handler), composed here and never
//! again. Paths live in a single [`matchit`] tree; each path node holds its
//! method map and a precomputed `Allow` value.
//!
//! The two "no" answers are kept apart: a path the table does not know is
//! `404 Not Found`, a known path without the request's method is
//! `405 Method Not Allowed` with the registered methods in `Allow`.

use std::collections::{BTreeMap, HashMap};

use bytes::Bytes;
use http::StatusCode;
use http::header::ALLOW;
use matchit::Router as MatchitRouter;

use crate::error::Error;
use crate::handler::BoxedHandler;
use crate::method::Method;
use crate::middleware::{SharedInterceptor, chain};
use crate::request::Request;
use crate::response::Response;
use crate::routes::RouteTable;

/// Merged handlers for one registered path.
struct PathRoutes {
    handlers: BTreeMap<Method, BoxedHandler>,
    allow: String,
}

/// Outcome of looking up a request against the table.
pub(crate) enum Resolved<'a> {
    Found(BoxedHandler, HashMap<String, String>),
    MethodNotAllowed(&'a str),
    NotFound,
}

/// Routes requests to the merged handler for their exact path and method.
///
/// Immutable after construction; share it behind an `Arc`.
pub struct Dispatcher {
    paths: MatchitRouter<PathRoutes>,
}

impl Dispatcher {
    /// Composes every route in `table` with `common` in front of it.
    ///
    /// Fails if two registered patterns overlap in a way the radix tree
    /// cannot tell apart, e.g. `/users/{id}` and `/users/{name}`.
    pub fn new(table: RouteTable, common: &[SharedInterceptor]) -> Result<Self, Error> {
        let mut paths = MatchitRouter::new();

        for (path, methods) in table.into_inner() {
            let handlers: BTreeMap<Method, BoxedHandler> = methods
                .into_iter()
                .map(|(method, route)| {
                    let interceptors = common.iter().chain(&route.interceptors).cloned();
                    (method, chain(interceptors, route.handler))
                })
                .collect();
            let allow = handlers
                .keys()
                .map(|m| m.as_str())
                .collect::<Vec<_>>()
                .join(", ");

            paths
                .insert(path.as_str(), PathRoutes { handlers, allow })
                .map_err(|source| Error::RouteConflict { path, source })?;
        }

        Ok(Self { paths })
    }

    pub(crate) fn resolve(&self, method: &http::Method, path: &str) -> Resolved<'_> {
        let Ok(matched) = self.paths.at(path) else {
            return Resolved::NotFound;
        };
        let routes = matched.value;
        let handler = Method::try_from(method)
            .ok()
            .and_then(|m| routes.handlers.get(&m));

        match handler {
            Some(handler) => {
                let params = matched.params.iter()
                    .map(|(k, v)| (k.to_owned(), v.to_owned()))
                    .collect();
                Resolved::Found(BoxedHandler::clone(handler), params)
            }
            None => Resolved::MethodNotAllowed(&routes.allow),
        }
    }

    /// Routes one buffered request and produces one response.
    pub async fn dispatch(&self, req: http::Request<Bytes>) -> Response {
        let (parts, body) = req.into_parts();

        match self.resolve(&parts.method, parts.uri.path()) {
            Resolved::Found(handler, params) => handler.call(Request::new(parts, body, params)).await,
            Resolved::MethodNotAllowed(allow) => Response::builder()
                .status(StatusCode::METHOD_NOT_ALLOWED)
                .header(ALLOW.as_str(), allow)
                .no_body(),
            Resolved::NotFound => Response::status(StatusCode::NOT_FOUND),
        }
    }
}
