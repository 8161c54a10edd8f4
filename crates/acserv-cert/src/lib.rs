//! Certificate loading and per-handshake certificate selection
//!
//! Certificates are loaded once at startup into [`CertificateEntry`] values
//! and indexed by [`CertificateResolver`], which picks the certificate to
//! present for each incoming TLS handshake from the requested server name,
//! the local address the client connected to, and the client's offered
//! signature schemes.

pub mod entry;
pub mod resolver;

pub use entry::CertificateEntry;
pub use resolver::{CertificateResolver, ClientHelloInfo, MatchedBy, Selection};

use std::net::SocketAddr;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CertError {
    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("No certificate found in {0}")]
    NoCertificate(String),

    #[error("No private key found in {0}")]
    NoPrivateKey(String),

    #[error("Invalid certificate: {0}")]
    InvalidCertificate(String),

    #[error("Unsupported private key: {0}")]
    UnsupportedKey(String),

    #[error("TLS error: {0}")]
    Tls(#[from] rustls::Error),

    #[error("No certificate configured")]
    NoCertificates,

    #[error("Duplicate address configured for certificates: {0}")]
    DuplicateAddress(SocketAddr),
}
