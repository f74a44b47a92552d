//! Server configuration.
//!
//! keel does not read environment variables or files. Embedders load and
//! validate a [`Config`] however they like and hand the server a provider
//! function; a provider error fails construction.

use std::path::PathBuf;
use std::time::Duration;

use crate::tls::TrustMode;

/// Everything the server needs to bind, time out and secure connections.
///
/// Timeouts of [`Duration::ZERO`] mean "no timeout". The idle and
/// read-header timeouts fall back to `read_timeout` when zero.
#[derive(Clone, Debug)]
pub struct Config {
    pub host: String,
    pub port: u16,

    /// Bounds reading the request body and the TLS handshake.
    pub read_timeout: Duration,
    /// Bounds handler execution for one request.
    pub write_timeout: Duration,
    /// Closes keep-alive connections that sit without a request this long.
    pub idle_timeout: Duration,
    /// Bounds reading the request line and headers.
    pub read_header_timeout: Duration,

    pub trust_mode: TrustMode,
    pub cert_path: PathBuf,
    pub key_path: PathBuf,
    pub client_ca_paths: Vec<PathBuf>,

    /// Upper bound on the request head buffer. `0` keeps hyper's default.
    pub max_header_bytes: usize,
    pub keep_alive: bool,
}

impl Config {
    /// `host:port`, as handed to the resolver.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn read_timeout(&self) -> Option<Duration> {
        timeout(self.read_timeout)
    }

    pub fn write_timeout(&self) -> Option<Duration> {
        timeout(self.write_timeout)
    }

    pub fn idle_timeout(&self) -> Option<Duration> {
        timeout(self.idle_timeout).or_else(|| self.read_timeout())
    }

    pub fn read_header_timeout(&self) -> Option<Duration> {
        timeout(self.read_header_timeout).or_else(|| self.read_timeout())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_owned(),
            port: 8080,
            read_timeout: Duration::ZERO,
            write_timeout: Duration::ZERO,
            idle_timeout: Duration::ZERO,
            read_header_timeout: Duration::ZERO,
            trust_mode: TrustMode::Off,
            cert_path: PathBuf::new(),
            key_path: PathBuf::new(),
            client_ca_paths: Vec::new(),
            max_header_bytes: 0,
            keep_alive: true,
        }
    }
}

/// Zero means disabled.
pub fn timeout(d: Duration) -> Option<Duration> {
    (!d.is_zero()).then_some(d)
}
