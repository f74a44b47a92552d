//! Shared utilities for integration tests: a running-server handle, a small
//! hyper-based HTTP/1.1 client, and throwaway PKI material.

#![allow(dead_code)]

use std::fs;
use std::future::pending;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytes::Bytes;
use http::{HeaderMap, StatusCode};
use http_body_util::{BodyExt, Full};
use hyper::client::conn::http1;
use hyper_util::rt::TokioIo;
use keel::{BoxError, Config, Server, ServerBuilder};
use rcgen::{
    BasicConstraints, Certificate, CertificateParams, DnType, ExtendedKeyUsagePurpose, IsCa,
    KeyPair,
};
use rustls::pki_types::ServerName;
use tokio::net::TcpStream;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_rustls::TlsConnector;

// ── Server ────────────────────────────────────────────────────────────────────

pub fn local_config() -> Config {
    Config { host: "127.0.0.1".to_owned(), port: 0, ..Config::default() }
}

/// A server serving on a background task.
pub struct Running {
    pub server: Arc<Server>,
    pub addr: SocketAddr,
    pub task: JoinHandle<Result<(), keel::Error>>,
}

/// Builds the server and returns once its listener is bound.
pub async fn spawn(builder: ServerBuilder) -> Running {
    let (tx, rx) = oneshot::channel();
    let server = builder
        .on_bound(move |addr| {
            let _ = tx.send(addr);
        })
        .build()
        .expect("server builds");
    let server = Arc::new(server);

    let task = tokio::spawn({
        let server = Arc::clone(&server);
        async move { server.run().await }
    });
    let addr = rx.await.expect("server bound");

    Running { server, addr, task }
}

impl Running {
    /// Shuts down without a deadline and checks `run` returned cleanly.
    pub async fn stop(self) {
        self.server.shutdown(pending()).await.expect("clean shutdown");
        self.task.await.expect("run task").expect("run result");
    }
}

// ── Client ────────────────────────────────────────────────────────────────────

pub struct Reply {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl Reply {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}

/// One keep-alive HTTP/1.1 connection.
pub struct Client {
    sender: http1::SendRequest<Full<Bytes>>,
}

impl Client {
    pub async fn connect(addr: SocketAddr) -> Result<Self, BoxError> {
        let stream = TcpStream::connect(addr).await?;
        Self::handshake(TokioIo::new(stream)).await
    }

    pub async fn connect_tls(addr: SocketAddr, tls: rustls::ClientConfig) -> Result<Self, BoxError> {
        let stream = TcpStream::connect(addr).await?;
        let stream = TlsConnector::from(Arc::new(tls))
            .connect(ServerName::try_from("localhost")?, stream)
            .await?;
        Self::handshake(TokioIo::new(stream)).await
    }

    async fn handshake<I>(io: I) -> Result<Self, BoxError>
    where
        I: hyper::rt::Read + hyper::rt::Write + Unpin + Send + 'static,
    {
        let (sender, conn) = http1::handshake(io).await?;
        tokio::spawn(async move {
            let _ = conn.await;
        });
        Ok(Self { sender })
    }

    pub async fn send(&mut self, method: &str, path: &str) -> Result<Reply, BoxError> {
        self.sender.ready().await?;
        let req = http::Request::builder()
            .method(method)
            .uri(path)
            .header("host", "localhost")
            .body(Full::new(Bytes::new()))?;
        let res = self.sender.send_request(req).await?;

        let status = res.status();
        let headers = res.headers().clone();
        let body = res.into_body().collect().await?.to_bytes();
        Ok(Reply { status, headers, body })
    }
}

/// Connects, sends one request, returns the reply.
pub async fn request(addr: SocketAddr, method: &str, path: &str) -> Result<Reply, BoxError> {
    Client::connect(addr).await?.send(method, path).await
}

// ── PKI ───────────────────────────────────────────────────────────────────────

/// A CA, a server certificate for `localhost`, a client certificate from the
/// same CA, and a client certificate from an unrelated CA.
pub struct Pki {
    dir: tempfile::TempDir,
}

impl Pki {
    pub fn generate() -> Self {
        let dir = tempfile::tempdir().expect("tempdir");

        let (ca, ca_key) = authority("keel test CA");
        let (rogue, rogue_key) = authority("rogue CA");

        let server_key = KeyPair::generate().unwrap();
        let mut server = CertificateParams::new(vec!["localhost".to_owned()]).unwrap();
        server.extended_key_usages = vec![ExtendedKeyUsagePurpose::ServerAuth];
        let server = server.signed_by(&server_key, &ca, &ca_key).unwrap();

        let client_key = KeyPair::generate().unwrap();
        let client = client_params("trusted client").signed_by(&client_key, &ca, &ca_key).unwrap();

        let intruder_key = KeyPair::generate().unwrap();
        let intruder = client_params("intruder").signed_by(&intruder_key, &rogue, &rogue_key).unwrap();

        let write = |name: &str, pem: String| fs::write(dir.path().join(name), pem).unwrap();
        write("ca.pem", ca.pem());
        write("server.pem", server.pem());
        write("server.key", server_key.serialize_pem());
        write("client.pem", client.pem());
        write("client.key", client_key.serialize_pem());
        write("intruder.pem", intruder.pem());
        write("intruder.key", intruder_key.serialize_pem());

        Self { dir }
    }

    pub fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    /// Client config that trusts the test CA, presenting `identity`
    /// (`"client"` or `"intruder"`) if given.
    pub fn client_config(&self, identity: Option<&str>) -> rustls::ClientConfig {
        let mut roots = rustls::RootCertStore::empty();
        for cert in read_certs(&self.path("ca.pem")) {
            roots.add(cert).unwrap();
        }

        let builder = rustls::ClientConfig::builder_with_provider(Arc::new(
            rustls::crypto::ring::default_provider(),
        ))
        .with_safe_default_protocol_versions()
        .unwrap()
        .with_root_certificates(roots);

        match identity {
            None => builder.with_no_client_auth(),
            Some(name) => {
                let certs = read_certs(&self.path(&format!("{name}.pem")));
                let key_pem = fs::read(self.path(&format!("{name}.key"))).unwrap();
                let key = rustls_pemfile::private_key(&mut key_pem.as_slice()).unwrap().unwrap();
                builder.with_client_auth_cert(certs, key).unwrap()
            }
        }
    }
}

fn authority(name: &str) -> (Certificate, KeyPair) {
    let key = KeyPair::generate().unwrap();
    let mut params = CertificateParams::new(Vec::<String>::new()).unwrap();
    params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
    params.distinguished_name.push(DnType::CommonName, name);
    (params.self_signed(&key).unwrap(), key)
}

fn client_params(name: &str) -> CertificateParams {
    let mut params = CertificateParams::new(Vec::<String>::new()).unwrap();
    params.distinguished_name.push(DnType::CommonName, name);
    params.extended_key_usages = vec![ExtendedKeyUsagePurpose::ClientAuth];
    params
}

fn read_certs(path: &Path) -> Vec<rustls::pki_types::CertificateDer<'static>> {
    let pem = fs::read(path).unwrap();
    rustls_pemfile::certs(&mut pem.as_slice())
        .collect::<Result<_, _>>()
        .unwrap()
}
