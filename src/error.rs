//! Error types.
//!
//! Application-level errors (404, 422, etc.) are expressed as HTTP
//! [`Response`](crate::Response) values, not as `Error`s. These types surface
//! infrastructure failures: building a server, binding, accepting, draining.

use std::io;

use crate::tls::TlsError;

/// Boxed error produced by a configuration provider.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// The error type returned when building or running a [`Server`](crate::Server).
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("failed to load configuration: {0}")]
    Config(#[source] BoxError),

    #[error(transparent)]
    Tls(#[from] TlsError),

    #[error("route `{path}` conflicts with an existing route: {source}")]
    RouteConflict {
        path: String,
        #[source]
        source: matchit::InsertError,
    },

    #[error("failed to resolve address {addr}: {source}")]
    Resolve {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("listener closed unexpectedly: {0}")]
    Accept(#[source] io::Error),
}

/// Outcome of a failed drain, shared by every caller of
/// [`Server::shutdown`](crate::Server::shutdown).
#[derive(Clone, Debug, Eq, PartialEq, thiserror::Error)]
pub enum ShutdownError {
    #[error("shutdown deadline exceeded; {aborted} connection(s) aborted")]
    DeadlineExceeded { aborted: usize },
}
