//! Gateway server: listeners, TLS termination and the per-connection loop
//!
//! [`ListenerManager`] binds every configured address and runs one accept
//! loop per listener. Each accepted socket gets its own task which completes
//! the TLS handshake with a certificate picked by the shared
//! `CertificateResolver`, then hands the stream to a [`ConnectionHandler`].
//! `CONNECT` requests switch the connection over to the
//! [`TunnelNegotiator`].

pub mod connection;
pub mod context;
pub mod listener;
pub mod running;
pub mod tls;
pub mod tunnel;

pub use connection::ConnectionHandler;
pub use context::{ConnectionOptions, GatewayContext};
pub use listener::ListenerManager;
pub use running::RunningFlag;
pub use tunnel::{TunnelNegotiator, TunnelProfile};

use std::net::SocketAddr;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Failed to bind to {address}: {source}")]
    Bind {
        address: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("Configuration error: {0}")]
    Config(#[from] acserv_config::ConfigError),

    #[error("Certificate error: {0}")]
    Cert(#[from] acserv_cert::CertError),

    #[error("HTTP error: {0}")]
    Http(#[from] acserv_http::HttpError),

    #[error("TLS handshake failed: {0}")]
    Handshake(std::io::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
