//! End-to-end tests over real TLS connections

use acserv_cert::{CertificateEntry, CertificateResolver};
use acserv_http::RouteTable;
use acserv_server::{ConnectionOptions, GatewayContext, ListenerManager};
use rustls::pki_types::{CertificateDer, ServerName};
use rustls::ClientConfig;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio_rustls::client::TlsStream;
use tokio_rustls::TlsConnector;

#[derive(Debug)]
struct SkipVerification;

impl rustls::client::danger::ServerCertVerifier for SkipVerification {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: rustls::pki_types::UnixTime,
    ) -> Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        rustls::crypto::ring::default_provider()
            .signature_verification_algorithms
            .supported_schemes()
    }
}

struct Gateway {
    manager: Arc<ListenerManager>,
    serving: JoinHandle<()>,
    addrs: Vec<SocketAddr>,
    leaves: Vec<CertificateDer<'static>>,
    _public: tempfile::TempDir,
}

impl Gateway {
    /// Two certificates, each bound to its own listener
    async fn start() -> Self {
        let addrs = vec![free_addr(), free_addr()];
        let mut entries = Vec::new();
        let mut leaves = Vec::new();

        for (name, addr) in [("a.example.com", addrs[0]), ("b.example.com", addrs[1])] {
            let certified = rcgen::generate_simple_self_signed(vec![name.to_string()]).unwrap();
            leaves.push(certified.cert.der().clone());
            entries.push(
                CertificateEntry::from_pem(
                    certified.cert.pem().as_bytes(),
                    certified.key_pair.serialize_pem().as_bytes(),
                    Some(addr),
                )
                .unwrap(),
            );
        }

        let public = tempfile::tempdir().unwrap();
        std::fs::write(public.path().join("install.sh"), b"#!/bin/sh\necho ok\n").unwrap();

        let context = GatewayContext::new(
            addrs.clone(),
            CertificateResolver::new(entries).unwrap(),
            RouteTable::new(public.path()),
            ConnectionOptions::default(),
        );
        let manager = Arc::new(ListenerManager::bind(context).await.unwrap());

        let serving = {
            let manager = manager.clone();
            tokio::spawn(async move { manager.start().await })
        };

        Self {
            manager,
            serving,
            addrs,
            leaves,
            _public: public,
        }
    }

    async fn stop(self) {
        tokio::time::timeout(Duration::from_secs(5), self.manager.shutdown())
            .await
            .unwrap();
        self.manager.wait_stopped().await;
        self.serving.await.unwrap();
    }
}

fn free_addr() -> SocketAddr {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap()
}

fn client_config() -> Arc<ClientConfig> {
    let mut config =
        ClientConfig::builder_with_provider(Arc::new(rustls::crypto::ring::default_provider()))
            .with_safe_default_protocol_versions()
            .unwrap()
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(SkipVerification))
            .with_no_client_auth();
    config.alpn_protocols = vec![b"http/1.1".to_vec()];
    Arc::new(config)
}

async fn connect(addr: SocketAddr, sni: Option<&str>) -> TlsStream<TcpStream> {
    let tcp = TcpStream::connect(addr).await.unwrap();
    let server_name = match sni {
        Some(name) => ServerName::try_from(name.to_string()).unwrap(),
        // IP addresses are never sent as SNI
        None => ServerName::IpAddress(addr.ip().into()),
    };
    TlsConnector::from(client_config())
        .connect(server_name, tcp)
        .await
        .unwrap()
}

fn peer_leaf(stream: &TlsStream<TcpStream>) -> CertificateDer<'static> {
    stream.get_ref().1.peer_certificates().unwrap()[0].clone()
}

async fn request(addr: SocketAddr, raw: &[u8]) -> String {
    let mut stream = connect(addr, None).await;
    stream.write_all(raw).await.unwrap();

    let mut out = Vec::new();
    let _ = tokio::time::timeout(Duration::from_secs(5), stream.read_to_end(&mut out)).await;
    String::from_utf8_lossy(&out).to_string()
}

#[tokio::test]
async fn test_certificate_follows_local_address() {
    let gateway = Gateway::start().await;

    let on_a = connect(gateway.addrs[0], None).await;
    assert_eq!(peer_leaf(&on_a), gateway.leaves[0]);

    let on_b = connect(gateway.addrs[1], None).await;
    assert_eq!(peer_leaf(&on_b), gateway.leaves[1]);

    drop((on_a, on_b));
    gateway.stop().await;
}

#[tokio::test]
async fn test_server_name_beats_local_address() {
    let gateway = Gateway::start().await;

    let stream = connect(gateway.addrs[0], Some("b.example.com")).await;
    assert_eq!(peer_leaf(&stream), gateway.leaves[1]);

    let stream = connect(gateway.addrs[0], Some("unknown.example.org")).await;
    assert_eq!(peer_leaf(&stream), gateway.leaves[0]);

    drop(stream);
    gateway.stop().await;
}

#[tokio::test]
async fn test_portal_over_tls() {
    let gateway = Gateway::start().await;
    let addr = gateway.addrs[0];

    let response = request(addr, b"GET /does-not-exist HTTP/1.1\r\n\r\n").await;
    assert!(response.starts_with("HTTP/1.1 404 Not Found\r\n"));
    assert!(response.contains("Connection: close\r\n"));
    assert!(response.contains("X-Transcend-Version: 1\r\n"));

    let response = request(addr, b"GET /install.sh HTTP/1.1\r\nConnection: close\r\n\r\n").await;
    assert!(response.contains("Content-Type: application/x-shellscript\r\n"));
    assert!(response.ends_with("#!/bin/sh\necho ok\n"));

    let response = request(
        addr,
        b"POST /auth HTTP/1.1\r\nContent-Type: application/x-www-form-urlencoded\r\nContent-Length: 21\r\nConnection: close\r\n\r\nusername=h&password=h",
    )
    .await;
    assert_eq!(response.matches("Set-Cookie: ").count(), 4);
    assert!(response.contains(r#"type="complete""#));

    let response = request(
        addr,
        b"POST /auth HTTP/1.1\r\nContent-Type: application/x-www-form-urlencoded\r\nContent-Length: 21\r\nConnection: close\r\n\r\nusername=h&password=x",
    )
    .await;
    assert!(response.contains(r#"type="auth-request""#));
    assert!(response.contains("Set-Cookie: webvpncontext=; expires=Thu, 01 Jan 1970 22:00:00 GMT; path=/; Secure\r\n"));

    gateway.stop().await;
}

#[tokio::test]
async fn test_shutdown_ends_open_tunnel() {
    let gateway = Gateway::start().await;

    let mut tunnel = connect(gateway.addrs[1], None).await;
    tunnel
        .write_all(b"CONNECT /CSCOSSLC/tunnel HTTP/1.1\r\nX-CSTP-Hostname: laptop-01\r\n\r\n")
        .await
        .unwrap();

    let mut buf = vec![0u8; 4096];
    let mut read = 0;
    while !buf[..read].ends_with(b"\r\n\r\n") {
        read += tunnel.read(&mut buf[read..]).await.unwrap();
    }
    let handshake = String::from_utf8_lossy(&buf[..read]).to_string();
    assert!(handshake.starts_with("HTTP/1.1 200 CONNECTED\r\n"));
    assert!(handshake.contains("X-CSTP-Hostname: laptop-01\r\n"));

    tunnel.write_all(b"\x53\x54\x46\x01\x00\x00\x07\x00").await.unwrap();

    // The relay holds the connection open until the gateway stops
    let addrs = gateway.addrs.clone();
    gateway.stop().await;

    for addr in addrs {
        assert!(TcpStream::connect(addr).await.is_err());
    }
}
