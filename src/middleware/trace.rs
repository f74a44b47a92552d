//! Per-request tracing.

use std::time::Instant;

use tracing::info;

use super::{Next, SharedInterceptor, from_fn};
use crate::request::Request;

/// One `tracing` event per request with method, path, status and latency.
///
/// Put it first in the common list so the latency covers every other
/// interceptor.
pub fn trace() -> SharedInterceptor {
    from_fn(|req: Request, next: Next| async move {
        let method = req.method().clone();
        let path = req.path().to_owned();
        let started = Instant::now();

        let res = next.run(req).await;

        info!(
            %method,
            %path,
            status = res.status_code().as_u16(),
            latency_us = started.elapsed().as_micros() as u64,
            "request"
        );
        res
    })
}
