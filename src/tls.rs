//! Trust modes and TLS configuration.
//!
//! [`resolve`] turns a [`TrustMode`] plus certificate paths into either no
//! TLS at all, a server-authenticated `rustls` config, or a mutually
//! authenticated one. It only reads the files it is pointed at: the crypto
//! provider is passed explicitly and nothing is installed process-wide.

use std::fmt;
use std::fs;
use std::io::{self, BufReader};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use rustls::RootCertStore;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::server::WebPkiClientVerifier;
use rustls::{ServerConfig, version};
use tracing::debug;

/// The server's transport-security posture.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum TrustMode {
    /// Plain TCP.
    #[default]
    Off,
    /// Server-authenticated TLS.
    Tls,
    /// TLS 1.3 with a client certificate required on every connection.
    MutualTls,
}

impl TrustMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Off       => "off",
            Self::Tls       => "tls",
            Self::MutualTls => "mtls",
        }
    }
}

/// Case-insensitive: `off`, `tls`, `mtls` (or `mutual_tls`).
impl FromStr for TrustMode {
    type Err = TlsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "off" => Ok(Self::Off),
            "tls" => Ok(Self::Tls),
            "mtls" | "mutual_tls" => Ok(Self::MutualTls),
            _ => Err(TlsError::InvalidMode(s.to_owned())),
        }
    }
}

impl fmt::Display for TrustMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a TLS configuration could not be produced.
#[derive(Debug, thiserror::Error)]
pub enum TlsError {
    #[error("invalid TLS mode: {0}")]
    InvalidMode(String),

    #[error("failed to load the server certificates ({cert}, {key}): {reason}")]
    ServerCertificates {
        cert: PathBuf,
        key: PathBuf,
        reason: String,
    },

    #[error("no client CAs provided")]
    NoClientCas,

    #[error("failed to read client CA {path}: {source}")]
    ReadClientCa {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to parse client CA {path}: {reason}")]
    ParseClientCa { path: PathBuf, reason: String },

    #[error("failed to build TLS configuration: {0}")]
    Config(String),
}

/// Produces the `rustls` configuration for `mode`.
///
/// Returns `Ok(None)` for [`TrustMode::Off`] without looking at any path.
pub fn resolve(
    mode: TrustMode,
    cert_path: &Path,
    key_path: &Path,
    client_ca_paths: &[PathBuf],
) -> Result<Option<Arc<ServerConfig>>, TlsError> {
    let provider = Arc::new(rustls::crypto::ring::default_provider());

    let config = match mode {
        TrustMode::Off => return Ok(None),
        TrustMode::Tls => {
            let (certs, key) = load_server_certificates(cert_path, key_path)?;
            ServerConfig::builder_with_provider(provider)
                .with_safe_default_protocol_versions()
                .map_err(|e| TlsError::Config(e.to_string()))?
                .with_no_client_auth()
                .with_single_cert(certs, key)
                .map_err(|e| server_certificates(cert_path, key_path, e))?
        }
        TrustMode::MutualTls => {
            let (certs, key) = load_server_certificates(cert_path, key_path)?;
            let roots = load_client_cas(client_ca_paths)?;
            let verifier = WebPkiClientVerifier::builder_with_provider(Arc::new(roots), Arc::clone(&provider))
                .build()
                .map_err(|e| TlsError::Config(e.to_string()))?;
            ServerConfig::builder_with_provider(provider)
                .with_protocol_versions(&[&version::TLS13])
                .map_err(|e| TlsError::Config(e.to_string()))?
                .with_client_cert_verifier(verifier)
                .with_single_cert(certs, key)
                .map_err(|e| server_certificates(cert_path, key_path, e))?
        }
    };

    debug!(%mode, cert = %cert_path.display(), "TLS configuration resolved");
    Ok(Some(Arc::new(config)))
}

fn server_certificates(cert: &Path, key: &Path, reason: impl fmt::Display) -> TlsError {
    TlsError::ServerCertificates {
        cert: cert.to_owned(),
        key: key.to_owned(),
        reason: reason.to_string(),
    }
}

fn load_server_certificates(
    cert_path: &Path,
    key_path: &Path,
) -> Result<(Vec<CertificateDer<'static>>, PrivateKeyDer<'static>), TlsError> {
    let fail = |reason: String| server_certificates(cert_path, key_path, reason);

    let cert_pem = fs::read(cert_path).map_err(|e| fail(format!("reading certificate: {e}")))?;
    let certs = rustls_pemfile::certs(&mut BufReader::new(cert_pem.as_slice()))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| fail(format!("parsing certificate: {e}")))?;
    if certs.is_empty() {
        return Err(fail("no certificate found in PEM".to_owned()));
    }

    let key_pem = fs::read(key_path).map_err(|e| fail(format!("reading private key: {e}")))?;
    let key = rustls_pemfile::private_key(&mut BufReader::new(key_pem.as_slice()))
        .map_err(|e| fail(format!("parsing private key: {e}")))?
        .ok_or_else(|| fail("no private key found in PEM".to_owned()))?;

    Ok((certs, key))
}

fn load_client_cas(paths: &[PathBuf]) -> Result<RootCertStore, TlsError> {
    if paths.is_empty() {
        return Err(TlsError::NoClientCas);
    }

    let mut roots = RootCertStore::empty();
    for path in paths {
        let pem = fs::read(path).map_err(|source| TlsError::ReadClientCa {
            path: path.clone(),
            source,
        })?;
        let parse_error = |reason: String| TlsError::ParseClientCa { path: path.clone(), reason };

        let certs = rustls_pemfile::certs(&mut BufReader::new(pem.as_slice()))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| parse_error(e.to_string()))?;
        if certs.is_empty() {
            return Err(parse_error("no certificate found in PEM".to_owned()));
        }
        for cert in certs {
            roots.add(cert).map_err(|e| parse_error(e.to_string()))?;
        }
    }
    Ok(roots)
}
