//! # keel
//!
//! An embeddable HTTP/1.1 server core. It terminates connections (plain, TLS
//! or mutual TLS), runs requests through a composable interceptor chain to
//! the handler registered for their exact path and method, and gives you a
//! lifecycle that cannot be started twice or shut down halfway.
//!
//! ## What you bring
//!
//! - A [`Config`], or a provider function that loads one.
//! - One or more [`Endpoints`] providers that register routes.
//! - Optional common interceptors (see [`middleware`]).
//!
//! ## What keel owns
//!
//! - Route bookkeeping: a write-once [`RouteBuilder`], exact-path dispatch via
//!   [`matchit`], `404` vs `405` + `Allow` kept distinct.
//! - Transport security: [`TrustMode`] `Off`, `Tls` or `MutualTls` (TLS 1.3,
//!   client certificate required), resolved once at build time.
//! - Lifecycle: [`Server::run`] exactly once, [`Server::shutdown`] any number
//!   of times from any task, one drain.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use keel::{Config, Method, Request, RouteBuilder, Server, middleware};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), keel::Error> {
//!     let server = Arc::new(
//!         Server::builder()
//!             .config(Config { port: 3000, ..Config::default() })
//!             .interceptor(middleware::trace())
//!             .endpoints(|routes: &mut RouteBuilder| {
//!                 routes.on(Method::Get, "/users/{id}", get_user);
//!             })
//!             .on_bound(|addr| println!("listening on {addr}"))
//!             .build()?,
//!     );
//!
//!     let stopper = Arc::clone(&server);
//!     tokio::spawn(async move {
//!         let _ = keel::shutdown_signal().await;
//!         let _ = stopper.shutdown(tokio::time::sleep(Duration::from_secs(30))).await;
//!     });
//!
//!     server.run().await
//! }
//!
//! async fn get_user(req: Request) -> String {
//!     format!("user {}", req.param("id").unwrap_or("unknown"))
//! }
//! ```

mod config;
mod error;
mod method;
mod request;
mod response;
mod router;
mod routes;
mod server;

pub mod handler;
pub mod middleware;
pub mod tls;
pub mod validate;

pub use config::Config;
pub use error::{BoxError, Error, ShutdownError};
pub use handler::{BoxedHandler, Handler};
pub use http::StatusCode;
pub use method::{Method, UnknownMethod};
pub use request::Request;
pub use response::{ContentType, IntoResponse, Response, ResponseBuilder};
pub use router::Dispatcher;
pub use routes::{Endpoints, Route, RouteBuilder, RouteTable};
pub use server::{Server, ServerBuilder, shutdown_signal};
pub use tls::{TlsError, TrustMode};
