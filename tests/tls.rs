//! Server TLS and mutual TLS, end to end.

mod common;

use common::{Client, Pki, local_config, spawn};
use keel::{Config, Error, Method, Request, RouteBuilder, Server, StatusCode, TlsError, TrustMode};

fn ping(routes: &mut RouteBuilder) {
    routes.on(Method::Get, "/", |_req: Request| async { "PONG" });
}

fn tls_config(pki: &Pki, trust_mode: TrustMode) -> Config {
    Config {
        trust_mode,
        cert_path: pki.path("server.pem"),
        key_path: pki.path("server.key"),
        client_ca_paths: match trust_mode {
            TrustMode::MutualTls => vec![pki.path("ca.pem")],
            _ => Vec::new(),
        },
        ..local_config()
    }
}

#[tokio::test]
async fn tls_serves_https() {
    let pki = Pki::generate();
    let running = spawn(
        Server::builder()
            .config(tls_config(&pki, TrustMode::Tls))
            .endpoints(ping),
    )
    .await;
    assert_eq!(running.server.trust_mode(), TrustMode::Tls);

    let mut client = Client::connect_tls(running.addr, pki.client_config(None)).await.unwrap();
    let res = client.send("GET", "/").await.unwrap();
    assert_eq!(res.status, StatusCode::OK);
    assert_eq!(&res.body[..], b"PONG");

    // A plaintext request never gets an HTTP status back.
    let plain = match Client::connect(running.addr).await {
        Ok(mut client) => client.send("GET", "/").await.map(|res| res.status),
        Err(e) => Err(e),
    };
    assert!(plain.is_err(), "{plain:?}");

    running.stop().await;
}

#[tokio::test]
async fn mutual_tls_accepts_only_trusted_clients() {
    let pki = Pki::generate();
    let running = spawn(
        Server::builder()
            .config(tls_config(&pki, TrustMode::MutualTls))
            .endpoints(ping),
    )
    .await;
    let addr = running.addr;

    let mut trusted = Client::connect_tls(addr, pki.client_config(Some("client"))).await.unwrap();
    let res = trusted.send("GET", "/").await.unwrap();
    assert_eq!(res.status, StatusCode::OK);
    assert_eq!(&res.body[..], b"PONG");

    // With TLS 1.3 the client finishes its side of the handshake before the
    // server checks the certificate, so the rejection may only surface on the
    // first request.
    for identity in [None, Some("intruder")] {
        let outcome = match Client::connect_tls(addr, pki.client_config(identity)).await {
            Ok(mut client) => client.send("GET", "/").await.map(|res| res.status),
            Err(e) => Err(e),
        };
        assert!(outcome.is_err(), "{identity:?} was served: {outcome:?}");
    }

    // The rejected handshakes did not disturb the server.
    assert_eq!(trusted.send("GET", "/").await.unwrap().status, StatusCode::OK);

    running.stop().await;
}

#[test]
fn mutual_tls_without_client_cas_fails_build() {
    let pki = Pki::generate();
    let err = Server::builder()
        .config(Config { client_ca_paths: Vec::new(), ..tls_config(&pki, TrustMode::MutualTls) })
        .build()
        .err()
        .unwrap();
    assert!(matches!(err, Error::Tls(TlsError::NoClientCas)));
    assert!(err.to_string().contains("no client CAs provided"));
}

#[test]
fn trust_mode_off_ignores_certificate_paths() {
    let server = Server::builder()
        .config(Config {
            trust_mode: TrustMode::Off,
            cert_path: "/nonexistent/cert.pem".into(),
            key_path: "/nonexistent/key.pem".into(),
            ..local_config()
        })
        .build()
        .unwrap();
    assert_eq!(server.trust_mode(), TrustMode::Off);
}
