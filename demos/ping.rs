//! Minimal keel example: one endpoint, request tracing, graceful shutdown.
//!
//! Run with:
//!   RUST_LOG=info cargo run --example ping
//!
//! Try:
//!   curl http://localhost:3000/            # 200 PONG
//!   curl -X POST http://localhost:3000/    # 405, Allow: GET
//!   curl http://localhost:3000/echo/hello  # 200 hello
//!   curl http://localhost:3000/missing     # 404
//!
//! Ctrl-C (or SIGTERM) drains in-flight requests for up to 30 seconds.

use std::sync::Arc;
use std::time::Duration;

use keel::{Config, Method, Request, RouteBuilder, Server, middleware};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), keel::Error> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let server = Server::builder()
        .config(Config { port: 3000, ..Config::default() })
        .interceptor(middleware::trace())
        .endpoints(|routes: &mut RouteBuilder| {
            routes
                .on(Method::Get, "/", ping)
                .on(Method::Get, "/echo/{word}", echo);
        })
        .on_bound(|addr| tracing::info!("try: curl http://{addr}/"))
        .build()?;
    let server = Arc::new(server);

    let stopper = Arc::clone(&server);
    tokio::spawn(async move {
        if let Err(e) = keel::shutdown_signal().await {
            tracing::error!("failed to listen for shutdown signals: {e}");
            return;
        }
        if let Err(e) = stopper.shutdown(tokio::time::sleep(Duration::from_secs(30))).await {
            tracing::warn!("{e}");
        }
    });

    server.run().await
}

async fn ping(_req: Request) -> &'static str {
    "PONG"
}

// GET /echo/{word}
async fn echo(req: Request) -> String {
    req.param("word").unwrap_or_default().to_owned()
}
