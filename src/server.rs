//! HTTP server lifecycle: build once, run once, shut down any number of times.
//!
//! ```text
//! Server::builder()…build()  ──►  run()  ──►  shutdown()*  ──►  stopped
//! ```
//!
//! # Graceful shutdown
//!
//! The first [`Server::shutdown`] call:
//! 1. Immediately stops `listener.accept()` and closes the listener.
//! 2. Asks every live connection to finish its in-flight request and close.
//! 3. Waits for [`Server::run`] to return.
//!
//! If the caller's deadline fires first, the remaining connection tasks are
//! aborted. Every concurrent or later caller gets the outcome of that one
//! drain. If the first caller stops waiting (its future is dropped), the
//! drain keeps going and the next caller waits for it under its own
//! deadline; nothing is drained twice.

use std::convert::Infallible;
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use bytes::Bytes;
use http::StatusCode;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::{TokioIo, TokioTimer};
use tokio::net::{TcpListener, TcpStream, lookup_host};
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio_rustls::TlsAcceptor;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::error::{BoxError, Error, ShutdownError};
use crate::middleware::SharedInterceptor;
use crate::response::Response;
use crate::router::Dispatcher;
use crate::routes::{Endpoints, RouteBuilder};
use crate::tls::{self, TrustMode};

/// hyper refuses read buffers smaller than this.
const MIN_BUF_SIZE: usize = 8192;

/// Pause after the process runs out of file descriptors, before accepting again.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(50);

type BoundCallback = Box<dyn FnOnce(SocketAddr) + Send + 'static>;
type ConfigProvider = Box<dyn FnOnce() -> Result<Config, BoxError> + Send + 'static>;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum Phase {
    Serving,
    Draining,
    Abort,
}

/// Progress of the one drain, as seen by `shutdown` callers.
#[derive(Clone, Debug)]
enum DrainState {
    /// The elected caller is waiting for `run` to return.
    Waiting,
    /// The elected caller was dropped before the server stopped.
    Abandoned,
    Done(Result<(), ShutdownError>),
}

/// Per-connection settings derived from [`Config`].
#[derive(Clone, Copy, Debug)]
struct ConnSettings {
    read: Option<Duration>,
    write: Option<Duration>,
    idle: Option<Duration>,
    header: Option<Duration>,
    max_header_bytes: usize,
    keep_alive: bool,
}

impl From<&Config> for ConnSettings {
    fn from(config: &Config) -> Self {
        Self {
            read: config.read_timeout(),
            write: config.write_timeout(),
            idle: config.idle_timeout(),
            header: config.read_header_timeout(),
            max_header_bytes: config.max_header_bytes,
            keep_alive: config.keep_alive,
        }
    }
}

// ── Builder ───────────────────────────────────────────────────────────────────

/// Collects configuration, endpoints and interceptors for a [`Server`].
pub struct ServerBuilder {
    config: ConfigProvider,
    endpoints: Vec<Box<dyn Endpoints>>,
    interceptors: Vec<SharedInterceptor>,
    on_bound: Option<BoundCallback>,
}

impl ServerBuilder {
    /// Uses a ready configuration value.
    pub fn config(self, config: Config) -> Self {
        self.config_provider(move || Ok::<_, Infallible>(config))
    }

    /// Uses `provider` to produce the configuration at [`build`](Self::build)
    /// time. A provider error fails the build.
    pub fn config_provider<F, E>(mut self, provider: F) -> Self
    where
        F: FnOnce() -> Result<Config, E> + Send + 'static,
        E: Into<BoxError>,
    {
        self.config = Box::new(move || -> Result<Config, BoxError> { provider().map_err(Into::into) });
        self
    }

    /// Adds an endpoint provider. Providers register in the order added.
    pub fn endpoints(mut self, provider: impl Endpoints) -> Self {
        self.endpoints.push(Box::new(provider));
        self
    }

    /// Adds a common interceptor, run in front of every endpoint's own.
    pub fn interceptor(mut self, interceptor: SharedInterceptor) -> Self {
        self.interceptors.push(interceptor);
        self
    }

    /// Called once with the bound address, after the socket is listening
    /// and before the first connection is accepted.
    pub fn on_bound(mut self, callback: impl FnOnce(SocketAddr) + Send + 'static) -> Self {
        self.on_bound = Some(Box::new(callback));
        self
    }

    /// Loads the configuration, compiles the routes and resolves TLS.
    ///
    /// # Panics
    ///
    /// Panics if an endpoint provider registers an invalid or duplicate
    /// route (see [`RouteBuilder::register`]).
    pub fn build(self) -> Result<Server, Error> {
        let config = (self.config)().map_err(Error::Config)?;

        let mut routes = RouteBuilder::new();
        for provider in &self.endpoints {
            provider.register(&mut routes);
        }
        let table = routes.compile();
        let endpoints = table.len();
        let dispatcher = Dispatcher::new(table, &self.interceptors)?;

        let tls = tls::resolve(
            config.trust_mode,
            &config.cert_path,
            &config.key_path,
            &config.client_ca_paths,
        )?
        .map(TlsAcceptor::from);

        debug!(endpoints, trust_mode = %config.trust_mode, addr = %config.address(), "server built");

        Ok(Server {
            addr: config.address(),
            trust_mode: config.trust_mode,
            settings: ConnSettings::from(&config),
            dispatcher: Arc::new(dispatcher),
            tls,
            has_run: AtomicBool::new(false),
            shutting_down: AtomicBool::new(false),
            drains: AtomicUsize::new(0),
            aborted: AtomicUsize::new(0),
            phase: watch::Sender::new(Phase::Serving),
            finished: watch::Sender::new(false),
            outcome: watch::Sender::new(DrainState::Waiting),
            on_bound: Mutex::new(self.on_bound),
        })
    }
}

// ── Server ────────────────────────────────────────────────────────────────────

/// The HTTP server.
///
/// Share it behind an `Arc` to call [`shutdown`](Self::shutdown) from another
/// task while [`run`](Self::run) is serving.
pub struct Server {
    addr: String,
    trust_mode: TrustMode,
    settings: ConnSettings,
    dispatcher: Arc<Dispatcher>,
    tls: Option<TlsAcceptor>,
    has_run: AtomicBool,
    shutting_down: AtomicBool,
    drains: AtomicUsize,
    aborted: AtomicUsize,
    phase: watch::Sender<Phase>,
    finished: watch::Sender<bool>,
    outcome: watch::Sender<DrainState>,
    on_bound: Mutex<Option<BoundCallback>>,
}

impl Server {
    /// Starts a builder with the default [`Config`].
    pub fn builder() -> ServerBuilder {
        ServerBuilder {
            config: Box::new(|| Ok(Config::default())),
            endpoints: Vec::new(),
            interceptors: Vec::new(),
            on_bound: None,
        }
    }

    /// The transport-security mode this server was built with.
    pub fn trust_mode(&self) -> TrustMode {
        self.trust_mode
    }

    /// Whether [`shutdown`](Self::shutdown) has been called.
    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::SeqCst)
    }

    /// Binds the listener and serves until [`shutdown`](Self::shutdown).
    ///
    /// Returns `Ok(())` after a requested shutdown, once every connection
    /// task has finished. If shutdown was requested before `run`, returns
    /// `Ok(())` without binding.
    ///
    /// # Panics
    ///
    /// Panics if called more than once on the same server, including
    /// concurrently: exactly one caller gets to serve.
    pub async fn run(&self) -> Result<(), Error> {
        if self
            .has_run
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            panic!("Server::run called more than once");
        }
        let _finished = Finished(&self.finished);

        if self.is_shutting_down() {
            info!("shutdown requested before run, not serving");
            return Ok(());
        }

        let listener = self.listen().await?;
        self.serve(listener).await
    }

    /// Stops the server, waiting for in-flight requests until `deadline`
    /// resolves.
    ///
    /// Only the first call drains; concurrent and later calls wait for that
    /// drain and return its outcome. Pass `std::future::pending()` to wait
    /// without a deadline, or `tokio::time::sleep(..)` to bound the wait.
    ///
    /// Dropping the first call's future does not restart the drain: the next
    /// caller waits for the server to stop, bounded by its own deadline.
    pub async fn shutdown<D>(&self, deadline: D) -> Result<(), ShutdownError>
    where
        D: Future<Output = ()>,
    {
        let elected = self
            .shutting_down
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok();
        if elected {
            return self.drain(deadline).await;
        }

        let mut outcome = self.outcome.subscribe();
        let state = match outcome.wait_for(|s| !matches!(s, DrainState::Waiting)).await {
            Ok(state) => state.clone(),
            Err(_) => DrainState::Abandoned,
        };
        match state {
            DrainState::Done(res) => res,
            DrainState::Abandoned | DrainState::Waiting => {
                debug!("previous shutdown caller went away, waiting for the drain");
                let res = self.wait_stopped(deadline).await;
                self.publish(res)
            }
        }
    }

    async fn drain<D>(&self, deadline: D) -> Result<(), ShutdownError>
    where
        D: Future<Output = ()>,
    {
        self.drains.fetch_add(1, Ordering::SeqCst);
        self.phase.send_replace(Phase::Draining);

        if !self.has_run.load(Ordering::SeqCst) {
            info!("server shut down before it ran");
            return self.publish(Ok(()));
        }

        let _elected = Elected(&self.outcome);
        let res = self.wait_stopped(deadline).await;
        self.publish(res)
    }

    /// Waits for `run` to return, aborting connections if `deadline` fires first.
    async fn wait_stopped<D>(&self, deadline: D) -> Result<(), ShutdownError>
    where
        D: Future<Output = ()>,
    {
        let mut finished = self.finished.subscribe();
        tokio::select! {
            () = wait_finished(&mut finished) => Ok(()),
            () = deadline => {
                self.phase.send_replace(Phase::Abort);
                wait_finished(&mut finished).await;
                Err(ShutdownError::DeadlineExceeded {
                    aborted: self.aborted.load(Ordering::SeqCst),
                })
            }
        }
    }

    /// Records the first outcome and returns whichever outcome won.
    fn publish(&self, res: Result<(), ShutdownError>) -> Result<(), ShutdownError> {
        self.outcome.send_if_modified(|state| match state {
            DrainState::Done(_) => false,
            _ => {
                *state = DrainState::Done(res);
                true
            }
        });
        match &*self.outcome.borrow() {
            DrainState::Done(res) => res.clone(),
            DrainState::Waiting | DrainState::Abandoned => Ok(()),
        }
    }

    async fn listen(&self) -> Result<TcpListener, Error> {
        let resolve_error = |source| Error::Resolve { addr: self.addr.clone(), source };
        let bind_error = |source| Error::Bind { addr: self.addr.clone(), source };

        let addr = lookup_host(&self.addr)
            .await
            .map_err(resolve_error)?
            .next()
            .ok_or_else(|| resolve_error(io::Error::new(io::ErrorKind::NotFound, "no addresses found")))?;
        let listener = TcpListener::bind(addr).await.map_err(bind_error)?;
        let local_addr = listener.local_addr().map_err(bind_error)?;

        info!(addr = %local_addr, trust_mode = %self.trust_mode, "keel listening");

        let callback = self.on_bound.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(callback) = callback {
            callback(local_addr);
        }
        Ok(listener)
    }

    async fn serve(&self, listener: TcpListener) -> Result<(), Error> {
        let mut phase = self.phase.subscribe();

        // Every connection task, so the drain can wait on (or abort) them.
        let mut tasks = JoinSet::new();

        let result = loop {
            tokio::select! {
                // Phase first: once draining, queued connections are not accepted.
                biased;

                () = wait_phase(&mut phase, |p| *p != Phase::Serving) => {
                    info!(in_flight = tasks.len(), "shutdown requested, draining connections");
                    break Ok(());
                }

                res = listener.accept() => {
                    let (stream, peer) = match res {
                        Ok(v) => v,
                        Err(e) if is_fd_exhaustion(&e) => {
                            error!("accept error: {e}");
                            tokio::time::sleep(ACCEPT_BACKOFF).await;
                            continue;
                        }
                        Err(e) if is_transient(&e) => {
                            debug!("accept error: {e}");
                            continue;
                        }
                        Err(e) => {
                            error!(in_flight = tasks.len(), "listener failed: {e}");
                            self.phase.send_if_modified(|p| {
                                let serving = *p == Phase::Serving;
                                if serving {
                                    *p = Phase::Draining;
                                }
                                serving
                            });
                            break Err(Error::Accept(e));
                        }
                    };

                    tasks.spawn(serve_connection(Connection {
                        stream,
                        peer,
                        dispatcher: Arc::clone(&self.dispatcher),
                        tls: self.tls.clone(),
                        settings: self.settings,
                        phase: self.phase.subscribe(),
                    }));
                }

                // Reap closed connections as we go.
                Some(_) = tasks.join_next(), if !tasks.is_empty() => {}
            }
        };

        drop(listener);

        let aborted = tokio::select! {
            () = join_all(&mut tasks) => false,
            () = wait_phase(&mut phase, |p| *p == Phase::Abort) => true,
        };
        if aborted {
            let remaining = tasks.len();
            warn!(remaining, "shutdown deadline exceeded, aborting connections");
            self.aborted.store(remaining, Ordering::SeqCst);
            tasks.abort_all();
            join_all(&mut tasks).await;
        }

        info!("keel stopped");
        result
    }

    #[cfg(test)]
    fn drains(&self) -> usize {
        self.drains.load(Ordering::SeqCst)
    }
}

/// Marks `run` as returned when dropped, whichever way it exits.
struct Finished<'a>(&'a watch::Sender<bool>);

impl Drop for Finished<'_> {
    fn drop(&mut self) {
        self.0.send_replace(true);
    }
}

/// Held by the elected drainer. Dropped before publishing, it tells the
/// other callers to stop waiting on it.
struct Elected<'a>(&'a watch::Sender<DrainState>);

impl Drop for Elected<'_> {
    fn drop(&mut self) {
        self.0.send_if_modified(|state| {
            let waiting = matches!(state, DrainState::Waiting);
            if waiting {
                *state = DrainState::Abandoned;
            }
            waiting
        });
    }
}

async fn wait_finished(rx: &mut watch::Receiver<bool>) {
    let _ = rx.wait_for(|done| *done).await;
}

async fn wait_phase(rx: &mut watch::Receiver<Phase>, f: impl FnMut(&Phase) -> bool) {
    let _ = rx.wait_for(f).await;
}

async fn join_all(tasks: &mut JoinSet<()>) {
    while tasks.join_next().await.is_some() {}
}

fn is_transient(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionRefused
            | io::ErrorKind::Interrupted
            | io::ErrorKind::WouldBlock
            | io::ErrorKind::TimedOut
    )
}

/// ENFILE / EMFILE.
fn is_fd_exhaustion(e: &io::Error) -> bool {
    matches!(e.raw_os_error(), Some(23 | 24))
}

// ── Connections ───────────────────────────────────────────────────────────────

struct Connection {
    stream: TcpStream,
    peer: SocketAddr,
    dispatcher: Arc<Dispatcher>,
    tls: Option<TlsAcceptor>,
    settings: ConnSettings,
    phase: watch::Receiver<Phase>,
}

async fn serve_connection(conn: Connection) {
    let Connection { stream, peer, dispatcher, tls, settings, phase } = conn;

    let Some(acceptor) = tls else {
        return serve_http(TokioIo::new(stream), peer, dispatcher, settings, phase).await;
    };

    // Handshake failures are connection-level: the client sees a TLS alert
    // or a closed socket, never an HTTP status.
    match bounded(settings.read, acceptor.accept(stream)).await {
        Some(Ok(stream)) => serve_http(TokioIo::new(stream), peer, dispatcher, settings, phase).await,
        Some(Err(e)) => debug!(%peer, "TLS handshake failed: {e}"),
        None => debug!(%peer, "TLS handshake timed out"),
    }
}

async fn serve_http<I>(
    io: I,
    peer: SocketAddr,
    dispatcher: Arc<Dispatcher>,
    settings: ConnSettings,
    mut phase: watch::Receiver<Phase>,
) where
    I: hyper::rt::Read + hyper::rt::Write + Unpin + Send + 'static,
{
    let activity = Arc::new(Activity::new());

    // Called once per request on this connection.
    let svc = {
        let activity = Arc::clone(&activity);
        service_fn(move |req| {
            let dispatcher = Arc::clone(&dispatcher);
            let in_flight = activity.begin();
            async move {
                let res = handle(&dispatcher, req, peer, settings).await;
                drop(in_flight);
                Ok::<_, Infallible>(res)
            }
        })
    };

    let mut builder = http1::Builder::new();
    builder.keep_alive(settings.keep_alive);
    if let Some(timeout) = settings.header {
        builder.timer(TokioTimer::new()).header_read_timeout(timeout);
    }
    if settings.max_header_bytes > 0 {
        builder.max_buf_size(settings.max_header_bytes.max(MIN_BUF_SIZE));
    }

    let conn = builder.serve_connection(io, svc);
    tokio::pin!(conn);

    let mut closing = false;
    loop {
        tokio::select! {
            res = conn.as_mut() => {
                if let Err(e) = res {
                    debug!(%peer, "connection error: {e}");
                }
                break;
            }
            () = wait_phase(&mut phase, |p| *p != Phase::Serving), if !closing => {
                closing = true;
                conn.as_mut().graceful_shutdown();
            }
            () = idle_expired(&activity, settings.idle), if !closing && settings.idle.is_some() => {
                debug!(%peer, "closing idle connection");
                closing = true;
                conn.as_mut().graceful_shutdown();
            }
        }
    }
}

/// Buffers the body, then runs the request through the dispatcher.
async fn handle(
    dispatcher: &Dispatcher,
    req: hyper::Request<Incoming>,
    peer: SocketAddr,
    settings: ConnSettings,
) -> http::Response<Full<Bytes>> {
    let (mut parts, body) = req.into_parts();
    parts.extensions.insert(peer);

    let body = match bounded(settings.read, body.collect()).await {
        Some(Ok(collected)) => collected.to_bytes(),
        Some(Err(e)) => {
            debug!(%peer, "failed to read request body: {e}");
            return Response::status(StatusCode::BAD_REQUEST).into_inner();
        }
        None => return Response::status(StatusCode::REQUEST_TIMEOUT).into_inner(),
    };

    match bounded(settings.write, dispatcher.dispatch(http::Request::from_parts(parts, body))).await {
        Some(res) => res.into_inner(),
        None => {
            warn!(%peer, "handler exceeded the write timeout");
            Response::builder()
                .status(StatusCode::SERVICE_UNAVAILABLE)
                .header("connection", "close")
                .no_body()
                .into_inner()
        }
    }
}

/// Runs `fut` to completion, or until `limit` elapses (`None`).
async fn bounded<F: Future>(limit: Option<Duration>, fut: F) -> Option<F::Output> {
    match limit {
        Some(limit) => tokio::time::timeout(limit, fut).await.ok(),
        None => Some(fut.await),
    }
}

/// Request activity on one connection, for the idle timeout.
struct Activity {
    opened: Instant,
    in_flight: AtomicUsize,
    last_active_ms: AtomicU64,
}

impl Activity {
    fn new() -> Self {
        Self { opened: Instant::now(), in_flight: AtomicUsize::new(0), last_active_ms: AtomicU64::new(0) }
    }

    fn begin(self: &Arc<Self>) -> InFlight {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        InFlight(Arc::clone(self))
    }

    /// How long the connection has had no request in flight.
    fn idle_for(&self) -> Option<Duration> {
        if self.in_flight.load(Ordering::SeqCst) > 0 {
            return None;
        }
        let last = Duration::from_millis(self.last_active_ms.load(Ordering::SeqCst));
        Some(self.opened.elapsed().saturating_sub(last))
    }
}

struct InFlight(Arc<Activity>);

impl Drop for InFlight {
    fn drop(&mut self) {
        let now = self.0.opened.elapsed().as_millis() as u64;
        self.0.last_active_ms.store(now, Ordering::SeqCst);
        self.0.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

async fn idle_expired(activity: &Activity, limit: Option<Duration>) {
    let Some(limit) = limit else {
        return std::future::pending().await;
    };
    loop {
        match activity.idle_for() {
            Some(idle) if idle >= limit => return,
            Some(idle) => tokio::time::sleep(limit - idle).await,
            None => tokio::time::sleep(limit).await,
        }
    }
}

// ── Shutdown signal ───────────────────────────────────────────────────────────

/// Resolves on the first SIGTERM or Ctrl-C the process receives.
///
/// Embedding binaries pass it to a task that calls [`Server::shutdown`].
/// On Windows only Ctrl-C is available.
pub async fn shutdown_signal() -> io::Result<()> {
    #[cfg(unix)]
    let sigterm = async {
        use tokio::signal::unix::{SignalKind, signal};

        signal(SignalKind::terminate())?.recv().await;
        Ok::<_, io::Error>(())
    };

    // `pending()` never resolves: on non-Unix platforms the SIGTERM arm is
    // effectively disabled.
    #[cfg(not(unix))]
    let sigterm = std::future::pending::<io::Result<()>>();

    tokio::select! {
        res = tokio::signal::ctrl_c() => res,
        res = sigterm => res,
    }
}
