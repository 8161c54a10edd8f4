//! TLS termination with per-handshake certificate selection

use acserv_cert::{CertificateResolver, ClientHelloInfo, Selection};
use rustls::server::Acceptor;
use std::io;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_rustls::server::TlsStream;
use tokio_rustls::LazyConfigAcceptor;
use tracing::debug;

use crate::ServerError;

/// Complete the server side of a TLS handshake.
///
/// The ClientHello is read first so the certificate can be chosen from the
/// requested server name, the local address the client connected to, and the
/// offered signature schemes.
pub async fn accept<IO>(
    stream: IO,
    resolver: &CertificateResolver,
    local_addr: Option<SocketAddr>,
    deadline: Option<Duration>,
) -> Result<(TlsStream<IO>, Selection), ServerError>
where
    IO: AsyncRead + AsyncWrite + Unpin,
{
    let handshake = async {
        let start = LazyConfigAcceptor::new(Acceptor::default(), stream).await?;

        let hello = start.client_hello();
        let server_name = hello.server_name().map(|name| name.to_string());
        let schemes = hello.signature_schemes().to_vec();

        let selection = resolver.select(
            &ClientHelloInfo {
                server_name: server_name.as_deref(),
                signature_schemes: &schemes,
            },
            local_addr,
        );
        debug!(
            "Selected certificate {:?} for SNI {:?} on {:?} ({:?})",
            selection.entry.names(),
            server_name,
            local_addr,
            selection.matched_by
        );

        let tls = start.into_stream(selection.entry.server_config()).await?;
        Ok::<_, io::Error>((tls, selection))
    };

    let result = match deadline {
        Some(duration) => match tokio::time::timeout(duration, handshake).await {
            Ok(result) => result,
            Err(_) => Err(io::Error::new(
                io::ErrorKind::TimedOut,
                "TLS handshake timed out",
            )),
        },
        None => handshake.await,
    };

    result.map_err(ServerError::Handshake)
}
